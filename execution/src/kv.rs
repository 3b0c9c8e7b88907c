//! Reference key-value application.
//!
//! Every transaction pays a fee and bumps its sender's nonce during validation, so fees are
//! charged even when execution fails. Execution stores or removes a value under the `data/`
//! namespace and is metered per byte written.

use crate::{
    config::ValidatedConfig,
    context::ExecutionContext,
    handler::{
        BlockHooks, DecodeError, MessageHandler, QueryHandler, Tx, TxDecoder, TxValidator,
    },
    store::ReadonlyStore,
    stf::Stf,
};
use anyhow::{Context as _, Result};
use commonware_codec::{DecodeExt, Encode};
use commonware_utils::hex;
use keel_types::{
    envelope::{EnvelopeError, Registry},
    kv::{
        account_key, data_key, height_key, registry, Account, KvMsg, KvQuery, KvResponse, KvTx,
    },
    Event, Identity, Value,
};
use thiserror::Error;

/// Flat cost of the fee and nonce check.
pub const VALIDATION_GAS: u64 = 1_000;
/// Cost per byte of key and value written.
pub const WRITE_GAS_PER_BYTE: u64 = 10;
/// Cost of a single query read.
pub const READ_GAS: u64 = 100;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("nonce mismatch (expected={expected}, got={got})")]
    NonceMismatch { expected: u64, got: u64 },
    #[error("insufficient balance for fee (balance={balance}, fee={fee})")]
    InsufficientBalance { balance: u64, fee: u64 },
    #[error("nonce overflow")]
    NonceOverflow,
    #[error("key {key} not found")]
    MissingKey { key: String },
}

impl Tx for KvTx {
    type Message = KvMsg;

    fn message(&self) -> &KvMsg {
        &self.msg
    }

    fn sender(&self) -> &Identity {
        &self.sender
    }

    fn gas_limit(&self) -> u64 {
        self.gas_limit
    }
}

fn write_gas(bytes: usize) -> u64 {
    (bytes as u64).saturating_mul(WRITE_GAS_PER_BYTE)
}

pub(crate) async fn load_account<S: ReadonlyStore>(
    ctx: &ExecutionContext<'_, S>,
    identity: &Identity,
) -> Result<Account> {
    Ok(match ctx.get(&account_key(identity)).await? {
        Some(value) => Account::decode(value.as_bytes()).context("decode account")?,
        None => Account::default(),
    })
}

fn store_account<S: ReadonlyStore>(
    ctx: &mut ExecutionContext<'_, S>,
    identity: &Identity,
    account: &Account,
) -> Result<()> {
    ctx.insert(account_key(identity), Value::new(account.encode().to_vec()))?;
    Ok(())
}

/// Implements every collaborator of the [Stf] for [KvMsg] transactions.
#[derive(Clone)]
pub struct KvApp {
    registry: Registry<KvMsg>,
}

impl KvApp {
    pub fn new() -> Result<Self, EnvelopeError> {
        Ok(Self {
            registry: registry()?,
        })
    }
}

pub type KvStf = Stf<KvApp, KvApp, KvApp, KvApp, KvApp>;

/// Assemble a state transition function for the key-value application.
pub fn stf(config: &ValidatedConfig) -> Result<KvStf, EnvelopeError> {
    let app = KvApp::new()?;
    Ok(Stf::new(
        config,
        app.clone(),
        app.clone(),
        app.clone(),
        app.clone(),
        app,
    ))
}

impl TxDecoder for KvApp {
    type Tx = KvTx;

    fn decode(&self, bytes: &[u8]) -> Result<KvTx, DecodeError> {
        Ok(KvTx::decode(bytes, &self.registry)?)
    }
}

impl TxValidator<KvTx> for KvApp {
    async fn validate<S: ReadonlyStore>(
        &self,
        ctx: &mut ExecutionContext<'_, S>,
        tx: &KvTx,
    ) -> Result<()> {
        ctx.consume_gas(VALIDATION_GAS)?;
        let mut account = load_account(ctx, &tx.sender).await?;
        if account.nonce != tx.nonce {
            return Err(KvError::NonceMismatch {
                expected: account.nonce,
                got: tx.nonce,
            }
            .into());
        }
        account.balance =
            account
                .balance
                .checked_sub(tx.fee)
                .ok_or(KvError::InsufficientBalance {
                    balance: account.balance,
                    fee: tx.fee,
                })?;
        account.nonce = account.nonce.checked_add(1).ok_or(KvError::NonceOverflow)?;
        store_account(ctx, &tx.sender, &account)?;
        ctx.emit(
            Event::new("fee")
                .with("payer", &tx.sender)
                .with("amount", tx.fee)
                .with("nonce", tx.nonce),
        );
        Ok(())
    }
}

impl MessageHandler for KvApp {
    type Message = KvMsg;
    type Response = KvResponse;

    async fn handle<S: ReadonlyStore>(
        &self,
        ctx: &mut ExecutionContext<'_, S>,
        message: &KvMsg,
    ) -> Result<KvResponse> {
        match message {
            KvMsg::Set { key, value } => {
                ctx.consume_gas(write_gas(key.len() + value.len()))?;
                let storage_key = data_key(key);
                let replaced = ctx.get(&storage_key).await?.is_some();
                ctx.insert(storage_key, Value::new(value.clone()))?;
                ctx.emit(
                    Event::new("set")
                        .with("key", hex(key))
                        .with("replaced", replaced),
                );
                Ok(KvResponse::Stored { replaced })
            }
            KvMsg::Remove { key } => {
                ctx.consume_gas(write_gas(key.len()))?;
                let storage_key = data_key(key);
                let previous = ctx
                    .get(&storage_key)
                    .await?
                    .ok_or_else(|| KvError::MissingKey { key: hex(key) })?;
                ctx.delete(storage_key)?;
                ctx.emit(Event::new("remove").with("key", hex(key)));
                Ok(KvResponse::Removed {
                    previous: previous.into_inner(),
                })
            }
        }
    }
}

impl QueryHandler for KvApp {
    type Request = KvQuery;
    type Response = KvResponse;

    async fn query<S: ReadonlyStore>(
        &self,
        ctx: &mut ExecutionContext<'_, S>,
        request: &KvQuery,
    ) -> Result<KvResponse> {
        ctx.consume_gas(READ_GAS)?;
        match request {
            KvQuery::Get { key } => Ok(KvResponse::Value {
                value: ctx.get(&data_key(key)).await?.map(Value::into_inner),
            }),
            KvQuery::Account { identity } => {
                Ok(KvResponse::Account(load_account(ctx, identity).await?))
            }
        }
    }
}

impl BlockHooks for KvApp {
    async fn begin_block<S: ReadonlyStore>(&self, ctx: &mut ExecutionContext<'_, S>) -> Result<()> {
        let header = *ctx.header();
        ctx.insert(height_key(), Value::new(header.height.to_be_bytes().to_vec()))?;
        ctx.emit(
            Event::new("block_begin")
                .with("height", header.height)
                .with("time_ms", header.time_ms),
        );
        Ok(())
    }

    async fn end_block<S: ReadonlyStore>(&self, ctx: &mut ExecutionContext<'_, S>) -> Result<()> {
        let header = *ctx.header();
        ctx.emit(
            Event::new("block_end")
                .with("height", header.height)
                .with("hash", hex(header.hash.as_ref())),
        );
        Ok(())
    }
}
