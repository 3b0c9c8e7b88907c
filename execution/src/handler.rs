//! Collaborators the state transition function is assembled from.
//!
//! Applications supply the business logic. The engine supplies ordering, isolation and gas
//! budgets. Handler failures are reported as [anyhow::Error]; errors of type
//! [crate::GasError] or [crate::StoreError] anywhere in the chain are classified as such.

use crate::{context::ExecutionContext, store::ReadonlyStore};
use keel_types::{envelope::EnvelopeError, Identity};
use std::future::Future;
use thiserror::Error;

/// A decoded transaction.
pub trait Tx {
    type Message;

    fn message(&self) -> &Self::Message;
    fn sender(&self) -> &Identity;
    /// Gas available to validation and execution combined.
    fn gas_limit(&self) -> u64;
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error(transparent)]
    Codec(#[from] commonware_codec::Error),
    #[error("invalid transaction: {0}")]
    Invalid(String),
}

/// Turns raw block bytes into transactions. Must be pure.
pub trait TxDecoder {
    type Tx: Tx;

    fn decode(&self, bytes: &[u8]) -> Result<Self::Tx, DecodeError>;
}

pub trait MessageHandler {
    type Message;
    type Response;

    fn handle<S: ReadonlyStore>(
        &self,
        ctx: &mut ExecutionContext<'_, S>,
        message: &Self::Message,
    ) -> impl Future<Output = anyhow::Result<Self::Response>>;
}

/// Read path. Writes made through the context are discarded.
pub trait QueryHandler {
    type Request;
    type Response;

    fn query<S: ReadonlyStore>(
        &self,
        ctx: &mut ExecutionContext<'_, S>,
        request: &Self::Request,
    ) -> impl Future<Output = anyhow::Result<Self::Response>>;
}

/// Admission check run before execution. Mutations it stages (fees, nonces) persist even if
/// execution later fails.
pub trait TxValidator<T> {
    fn validate<S: ReadonlyStore>(
        &self,
        ctx: &mut ExecutionContext<'_, S>,
        tx: &T,
    ) -> impl Future<Output = anyhow::Result<()>>;
}

pub trait BlockHooks {
    fn begin_block<S: ReadonlyStore>(
        &self,
        ctx: &mut ExecutionContext<'_, S>,
    ) -> impl Future<Output = anyhow::Result<()>>;

    fn end_block<S: ReadonlyStore>(
        &self,
        ctx: &mut ExecutionContext<'_, S>,
    ) -> impl Future<Output = anyhow::Result<()>>;
}
