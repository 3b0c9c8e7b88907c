//! Keel execution layer.
//!
//! This crate contains the deterministic state transition function ([Stf]) that applies blocks of
//! opaque transactions to a read-only view of state, plus the reference key-value application
//! ([kv::KvApp]) used by tests and as a usage example.
//!
//! ## Determinism requirements
//! - Do not use wall-clock time inside handlers; use the block header.
//! - Do not let iteration order of hash-based collections influence outputs.
//! - Phases run strictly in order: consensus messages, begin block, each transaction
//!   (validation then execution), end block.
//!
//! ## Isolation
//! Every phase stages its writes in a private [BranchStore]. A phase's writes reach the block's
//! working branch only if the phase succeeds. The working branch is returned to the caller and is
//! never committed by this crate.
//!
//! ## Minimal execution pipeline (example)
//! ```rust,ignore
//! use keel_execution::{kv, logging, mocks, Config};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load("keel.yaml")?.validate()?;
//! logging::init_from(&config)?;
//! let stf = kv::stf(&config)?;
//! let state = mocks::funded(&[(&mocks::identity("alice"), 100)]);
//! let tx = mocks::kv_tx(&mocks::identity("alice"), 0, 10_000, 1, mocks::set(b"k", b"v"));
//! let (response, branch) = stf
//!     .deliver_block(&CancellationToken::new(), &mocks::block(1, vec![tx]), &state)
//!     .await?;
//! assert!(response.tx_results[0].is_ok());
//! let _changes = branch.into_change_set()?;
//! # Ok(())
//! # }
//! ```

mod config;
mod context;
pub mod defaults;
mod gas;
mod handler;
pub mod kv;
pub mod logging;
mod stf;
mod store;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

#[cfg(test)]
mod determinism_tests;

pub use config::{Config, ConfigError, ValidatedConfig};
pub use context::{make_context, ExecutionContext, PhaseOutput};
pub use gas::{GasError, GasMeter};
pub use handler::{
    BlockHooks, DecodeError, MessageHandler, QueryHandler, Tx, TxDecoder, TxValidator,
};
pub use stf::{BlockError, CheckError, QueryError, Stf};
#[cfg(any(test, feature = "mocks"))]
pub use store::Memory;
pub use store::{BranchStore, ReadonlyStore, StoreError};
