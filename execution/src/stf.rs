use crate::{
    config::ValidatedConfig,
    context::{make_context, ExecutionContext, PhaseOutput},
    gas::{GasError, GasMeter},
    handler::{BlockHooks, MessageHandler, QueryHandler, Tx, TxDecoder, TxValidator},
    store::{BranchStore, ReadonlyStore, StoreError},
};
use keel_types::{
    Block, BlockHeader, BlockResponse, ChangeSet, Event, Identity, Phase, TxError, TxResult,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Failure that aborts block delivery. The returned branch (if any) must be discarded.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("cancelled")]
    Cancelled,
    #[error("block has {count} transactions (max {max})")]
    TooManyTransactions { count: usize, max: usize },
    #[error("consensus message {index} failed")]
    ConsensusMessage {
        index: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("begin block failed")]
    BeginBlock(#[source] anyhow::Error),
    #[error("end block failed")]
    EndBlock(#[source] anyhow::Error),
    #[error("{phase} store error")]
    Store {
        phase: Phase,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("cancelled")]
    Cancelled,
    #[error("query ran out of gas (used={used}, limit={limit})")]
    OutOfGas { used: u64, limit: u64 },
    #[error("query failed")]
    Handler(#[source] anyhow::Error),
}

/// Outcome of a mempool admission check that did not admit the transaction.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Rejected(#[from] TxError),
}

/// The state transition function.
///
/// Applies blocks to a read-only view of state, one phase at a time and strictly in order. Every
/// phase runs in its own [ExecutionContext] over a fresh branch; its effects are merged into the
/// block's working branch only if it succeeds.
pub struct Stf<D, H, Q, V, B> {
    decoder: D,
    handler: H,
    querier: Q,
    validator: V,
    hooks: B,

    runtime_identity: Identity,
    max_block_transactions: usize,
    query_gas_limit: u64,
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), BlockError> {
    if cancel.is_cancelled() {
        return Err(BlockError::Cancelled);
    }
    Ok(())
}

fn merge<S: ReadonlyStore>(
    state: &mut BranchStore<'_, S>,
    phase: Phase,
    changes: ChangeSet,
) -> Result<(), BlockError> {
    state
        .apply_change_sets([changes])
        .map_err(|source| BlockError::Store { phase, source })
}

/// Map a handler failure to the transaction error it represents.
fn classify(phase: Phase, err: anyhow::Error) -> TxError {
    if let Some(GasError::OutOfGas { used, limit }) = err.downcast_ref::<GasError>() {
        return TxError::OutOfGas {
            phase,
            used: *used,
            limit: *limit,
        };
    }
    let reason = format!("{err:#}");
    if err.downcast_ref::<StoreError>().is_some() {
        return TxError::Store { phase, reason };
    }
    match phase {
        Phase::Validation => TxError::Validation(reason),
        _ => TxError::Execution(reason),
    }
}

/// Close a metered phase: an overrun wins over whatever the handler returned.
fn settle<S: ReadonlyStore, T>(
    phase: Phase,
    ctx: ExecutionContext<'_, S>,
    outcome: anyhow::Result<T>,
) -> Result<(T, PhaseOutput), TxError> {
    if let Err(GasError::OutOfGas { used, limit }) = ctx.check_gas() {
        return Err(TxError::OutOfGas { phase, used, limit });
    }
    let value = outcome.map_err(|err| classify(phase, err))?;
    let output = ctx.finish().map_err(|err| TxError::Store {
        phase,
        reason: err.to_string(),
    })?;
    Ok((value, output))
}

impl<D, H, Q, V, B> Stf<D, H, Q, V, B>
where
    D: TxDecoder,
    D::Tx: Tx<Message = H::Message>,
    H: MessageHandler,
    Q: QueryHandler,
    V: TxValidator<D::Tx>,
    B: BlockHooks,
{
    pub fn new(
        config: &ValidatedConfig,
        decoder: D,
        handler: H,
        querier: Q,
        validator: V,
        hooks: B,
    ) -> Self {
        Self {
            decoder,
            handler,
            querier,
            validator,
            hooks,
            runtime_identity: config.runtime_identity.clone(),
            max_block_transactions: config.max_block_transactions,
            query_gas_limit: config.query_gas_limit,
        }
    }

    pub fn runtime_identity(&self) -> &Identity {
        &self.runtime_identity
    }

    fn system_context<'a, T: ReadonlyStore>(
        &self,
        cancel: &CancellationToken,
        store: &'a T,
        header: BlockHeader,
    ) -> ExecutionContext<'a, T> {
        make_context(
            cancel,
            self.runtime_identity.clone(),
            store,
            GasMeter::unmetered(),
            header,
        )
    }

    /// Apply `block` on top of `state`.
    ///
    /// Returns the block's results and the branch holding its effects. Nothing is committed: the
    /// caller decides whether to persist the branch. On error the branch is dropped, even if some
    /// transactions had already been merged into it.
    pub async fn deliver_block<'s, S: ReadonlyStore>(
        &self,
        cancel: &CancellationToken,
        block: &Block<H::Message>,
        state: &'s S,
    ) -> Result<(BlockResponse<H::Response>, BranchStore<'s, S>), BlockError> {
        if block.txs.len() > self.max_block_transactions {
            return Err(BlockError::TooManyTransactions {
                count: block.txs.len(),
                max: self.max_block_transactions,
            });
        }
        let header = block.header();
        let mut new_state = BranchStore::branch(state);
        let mut response = BlockResponse::default();

        for (index, message) in block.consensus_messages.iter().enumerate() {
            ensure_live(cancel)?;
            let mut ctx = self.system_context(cancel, &new_state, header);
            let outcome = self.handler.handle(&mut ctx, message).await;
            ensure_live(cancel)?;
            let reply = outcome.map_err(|source| BlockError::ConsensusMessage { index, source })?;
            let output = ctx.finish().map_err(|source| BlockError::Store {
                phase: Phase::ConsensusMessage,
                source,
            })?;
            debug!(
                height = block.height,
                index,
                events = output.events.len(),
                "applied consensus message"
            );
            merge(&mut new_state, Phase::ConsensusMessage, output.changes)?;
            response.consensus_message_responses.push(reply);
            response.consensus_message_events.push(output.events);
        }

        response.begin_block_events = self.begin_block(cancel, header, &mut new_state).await?;

        let mut failed = 0;
        for (index, raw) in block.txs.iter().enumerate() {
            ensure_live(cancel)?;
            let result = self.deliver_tx(cancel, header, &mut new_state, raw).await?;
            if let Some(err) = result.error() {
                failed += 1;
                debug!(height = block.height, index, code = err.code(), error = %err, "transaction failed");
            }
            response.tx_results.push(result);
        }

        response.end_block_events = self.end_block(cancel, header, &mut new_state).await?;

        info!(
            height = block.height,
            txs = block.txs.len(),
            failed,
            staged = new_state.len(),
            "delivered block"
        );
        Ok((response, new_state))
    }

    async fn begin_block<S: ReadonlyStore>(
        &self,
        cancel: &CancellationToken,
        header: BlockHeader,
        state: &mut BranchStore<'_, S>,
    ) -> Result<Vec<Event>, BlockError> {
        ensure_live(cancel)?;
        let mut ctx = self.system_context(cancel, &*state, header);
        let outcome = self.hooks.begin_block(&mut ctx).await;
        ensure_live(cancel)?;
        outcome.map_err(BlockError::BeginBlock)?;
        let output = ctx.finish().map_err(|source| BlockError::Store {
            phase: Phase::BeginBlock,
            source,
        })?;
        merge(state, Phase::BeginBlock, output.changes)?;
        Ok(output.events)
    }

    async fn end_block<S: ReadonlyStore>(
        &self,
        cancel: &CancellationToken,
        header: BlockHeader,
        state: &mut BranchStore<'_, S>,
    ) -> Result<Vec<Event>, BlockError> {
        ensure_live(cancel)?;
        let mut ctx = self.system_context(cancel, &*state, header);
        let outcome = self.hooks.end_block(&mut ctx).await;
        ensure_live(cancel)?;
        outcome.map_err(BlockError::EndBlock)?;
        let output = ctx.finish().map_err(|source| BlockError::Store {
            phase: Phase::EndBlock,
            source,
        })?;
        merge(state, Phase::EndBlock, output.changes)?;
        Ok(output.events)
    }

    /// Decode, validate and execute one transaction against `state`.
    ///
    /// Only cancellation is reported as an error; every other failure is captured in the result.
    async fn deliver_tx<S: ReadonlyStore>(
        &self,
        cancel: &CancellationToken,
        header: BlockHeader,
        state: &mut BranchStore<'_, S>,
        raw: &[u8],
    ) -> Result<TxResult<H::Response>, BlockError> {
        let tx = match self.decoder.decode(raw) {
            Ok(tx) => tx,
            Err(err) => return Ok(TxResult::failed(TxError::Decode(err.to_string()))),
        };

        // Validation effects are merged before execution starts and persist even if it fails.
        let validation = self.validate(cancel, header, &*state, &tx).await;
        ensure_live(cancel)?;
        let validation = match validation {
            Ok(output) => output,
            Err(err) => return Ok(TxResult::failed(err)),
        };
        if let Err(err) = state.apply_change_sets([validation.changes]) {
            return Ok(TxResult::failed(TxError::Store {
                phase: Phase::Validation,
                reason: err.to_string(),
            }));
        }
        let mut events = validation.events;
        let validation_gas = validation.gas_used;

        let remaining = tx.gas_limit().saturating_sub(validation_gas);
        let execution = self.execute(cancel, header, &*state, &tx, remaining).await;
        ensure_live(cancel)?;
        let (reply, output) = match execution {
            Ok(executed) => executed,
            Err(err) => {
                return Ok(TxResult {
                    events,
                    gas_used: validation_gas,
                    outcome: Err(err),
                })
            }
        };
        if let Err(err) = state.apply_change_sets([output.changes]) {
            return Ok(TxResult {
                events,
                gas_used: validation_gas,
                outcome: Err(TxError::Store {
                    phase: Phase::Execution,
                    reason: err.to_string(),
                }),
            });
        }
        events.extend(output.events);
        Ok(TxResult {
            events,
            gas_used: validation_gas + output.gas_used,
            outcome: Ok(reply),
        })
    }

    async fn validate<S: ReadonlyStore>(
        &self,
        cancel: &CancellationToken,
        header: BlockHeader,
        state: &S,
        tx: &D::Tx,
    ) -> Result<PhaseOutput, TxError> {
        let mut ctx = make_context(
            cancel,
            tx.sender().clone(),
            state,
            GasMeter::limited(tx.gas_limit()),
            header,
        );
        let outcome = self.validator.validate(&mut ctx, tx).await;
        settle(Phase::Validation, ctx, outcome).map(|((), output)| output)
    }

    async fn execute<S: ReadonlyStore>(
        &self,
        cancel: &CancellationToken,
        header: BlockHeader,
        state: &S,
        tx: &D::Tx,
        gas_limit: u64,
    ) -> Result<(H::Response, PhaseOutput), TxError> {
        let mut ctx = make_context(
            cancel,
            tx.sender().clone(),
            state,
            GasMeter::limited(gas_limit),
            header,
        );
        let outcome = self.handler.handle(&mut ctx, tx.message()).await;
        settle(Phase::Execution, ctx, outcome)
    }

    /// Run a single transaction against a fresh branch of `state`, as if it were the only
    /// transaction in a block. The returned branch is never committed.
    pub async fn simulate<'s, S: ReadonlyStore>(
        &self,
        cancel: &CancellationToken,
        state: &'s S,
        header: BlockHeader,
        raw: &[u8],
    ) -> Result<(TxResult<H::Response>, BranchStore<'s, S>), BlockError> {
        ensure_live(cancel)?;
        let mut branch = BranchStore::branch(state);
        let result = self.deliver_tx(cancel, header, &mut branch, raw).await?;
        Ok((result, branch))
    }

    /// Mempool admission check: decode and validate, discarding all effects.
    ///
    /// Returns the gas validation consumed.
    pub async fn validate_tx<S: ReadonlyStore>(
        &self,
        cancel: &CancellationToken,
        state: &S,
        header: BlockHeader,
        raw: &[u8],
    ) -> Result<u64, CheckError> {
        if cancel.is_cancelled() {
            return Err(CheckError::Cancelled);
        }
        let tx = self
            .decoder
            .decode(raw)
            .map_err(|err| TxError::Decode(err.to_string()))?;
        let output = self.validate(cancel, header, state, &tx).await;
        if cancel.is_cancelled() {
            return Err(CheckError::Cancelled);
        }
        Ok(output?.gas_used)
    }

    /// Answer a read request as the runtime identity. Writes made by the handler are discarded.
    pub async fn query<S: ReadonlyStore>(
        &self,
        cancel: &CancellationToken,
        state: &S,
        header: BlockHeader,
        request: &Q::Request,
    ) -> Result<Q::Response, QueryError> {
        if cancel.is_cancelled() {
            return Err(QueryError::Cancelled);
        }
        let mut ctx = make_context(
            cancel,
            self.runtime_identity.clone(),
            state,
            GasMeter::limited(self.query_gas_limit),
            header,
        );
        let outcome = self.querier.query(&mut ctx, request).await;
        if cancel.is_cancelled() {
            return Err(QueryError::Cancelled);
        }
        if let Err(GasError::OutOfGas { used, limit }) = ctx.check_gas() {
            return Err(QueryError::OutOfGas { used, limit });
        }
        outcome.map_err(QueryError::Handler)
    }
}
