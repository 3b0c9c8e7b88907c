use crate::{
    gas::{GasError, GasMeter},
    store::{BranchStore, ReadonlyStore, StoreError},
};
use keel_types::{BlockHeader, ChangeSet, Event, Identity, Key, Value};
use tokio_util::sync::CancellationToken;

/// Scope for exactly one handler invocation.
///
/// Handlers read and write only through the context. Writes land in a private branch of the store
/// the context was made from and stay there until the orchestrator merges them.
pub struct ExecutionContext<'a, S: ReadonlyStore> {
    cancel: CancellationToken,
    store: BranchStore<'a, S>,
    gas: GasMeter,
    events: Vec<Event>,
    sender: Identity,
    header: BlockHeader,
}

/// Effects of a completed phase.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PhaseOutput {
    pub changes: ChangeSet,
    pub events: Vec<Event>,
    pub gas_used: u64,
}

/// Create a context over a new branch of `store`.
pub fn make_context<'a, S: ReadonlyStore>(
    cancel: &CancellationToken,
    sender: Identity,
    store: &'a S,
    gas: GasMeter,
    header: BlockHeader,
) -> ExecutionContext<'a, S> {
    ExecutionContext {
        cancel: cancel.clone(),
        store: BranchStore::branch(store),
        gas,
        events: Vec::new(),
        sender,
        header,
    }
}

impl<'a, S: ReadonlyStore> ExecutionContext<'a, S> {
    /// Identity the work is performed on behalf of.
    pub fn sender(&self) -> &Identity {
        &self.sender
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn gas_used(&self) -> u64 {
        self.gas.used()
    }

    /// `None` for unmetered system phases.
    pub fn gas_limit(&self) -> Option<u64> {
        self.gas.limit()
    }

    pub fn consume_gas(&mut self, amount: u64) -> Result<(), GasError> {
        self.gas.consume(amount)
    }

    pub(crate) fn check_gas(&self) -> Result<(), GasError> {
        self.gas.check()
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub async fn get(&self, key: &Key) -> Result<Option<Value>, StoreError> {
        self.store.get(key).await
    }

    pub fn insert(&mut self, key: Key, value: Value) -> Result<(), StoreError> {
        self.store.insert(key, value)
    }

    pub fn delete(&mut self, key: Key) -> Result<(), StoreError> {
        self.store.delete(key)
    }

    /// Private branch backing this context.
    pub fn store(&self) -> &BranchStore<'a, S> {
        &self.store
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Drain the context into the effects it staged.
    pub fn finish(self) -> Result<PhaseOutput, StoreError> {
        Ok(PhaseOutput {
            changes: self.store.into_change_set()?,
            events: self.events,
            gas_used: self.gas.used(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Memory;
    use commonware_cryptography::{sha256::Sha256, Hasher};
    use commonware_runtime::{deterministic::Runner, Runner as _};
    use keel_types::Status;

    fn header() -> BlockHeader {
        BlockHeader::new(1, 1_000, Sha256::hash(b"block"))
    }

    #[test]
    fn context_stages_privately() {
        let executor = Runner::default();
        executor.start(|_| async move {
            let mut memory = Memory::default();
            memory.insert(Key::from("k"), Value::from(&b"old"[..]));
            let cancel = CancellationToken::new();

            let mut ctx = make_context(
                &cancel,
                Identity::new(b"alice".to_vec()),
                &memory,
                GasMeter::limited(100),
                header(),
            );
            assert_eq!(ctx.sender().as_bytes(), b"alice");
            assert_eq!(ctx.gas_used(), 0);
            assert!(ctx.events().is_empty());

            ctx.insert(Key::from("k"), Value::from(&b"new"[..])).unwrap();
            ctx.consume_gas(30).unwrap();
            ctx.emit(Event::new("touched"));
            assert_eq!(
                ctx.get(&Key::from("k")).await.unwrap(),
                Some(Value::from(&b"new"[..]))
            );
            assert_eq!(
                memory.get(&Key::from("k")).await.unwrap(),
                Some(Value::from(&b"old"[..]))
            );

            let output = ctx.finish().unwrap();
            assert_eq!(output.gas_used, 30);
            assert_eq!(output.events, vec![Event::new("touched")]);
            let staged: Vec<_> = output.changes.into_iter().collect();
            assert_eq!(
                staged,
                vec![(Key::from("k"), Status::Update(Value::from(&b"new"[..])))]
            );
        });
    }

    #[test]
    fn overrun_survives_swallowed_error() {
        let memory = Memory::default();
        let cancel = CancellationToken::new();
        let mut ctx = make_context(
            &cancel,
            Identity::default(),
            &memory,
            GasMeter::limited(5),
            header(),
        );
        let _ = ctx.consume_gas(6);
        assert_eq!(ctx.check_gas(), Err(GasError::OutOfGas { used: 6, limit: 5 }));
    }

    #[test]
    fn context_observes_cancellation() {
        let memory = Memory::default();
        let cancel = CancellationToken::new();
        let ctx = make_context(
            &cancel,
            Identity::default(),
            &memory,
            GasMeter::unmetered(),
            header(),
        );
        assert!(!ctx.is_cancelled());
        cancel.cancel();
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.gas_limit(), None);
    }
}
