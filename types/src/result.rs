//! Outcomes of transaction and block delivery.

use crate::{
    codec::{string_encode_size, write_string},
    Event,
};
use bytes::BufMut;
use commonware_codec::{Encode, EncodeSize, Write};
use commonware_cryptography::{
    sha256::{Digest, Sha256},
    Hasher,
};
use std::fmt;
use thiserror::Error as ThisError;

/// Longest error reason kept in the encoded response; longer reasons are clamped.
pub const MAX_REASON_LEN: usize = 1024;

/// Execution scope a piece of work runs in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    ConsensusMessage,
    BeginBlock,
    Validation,
    Execution,
    EndBlock,
    Query,
}

impl Phase {
    fn tag(&self) -> u8 {
        match self {
            Phase::ConsensusMessage => 0,
            Phase::BeginBlock => 1,
            Phase::Validation => 2,
            Phase::Execution => 3,
            Phase::EndBlock => 4,
            Phase::Query => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::ConsensusMessage => "consensus_message",
            Phase::BeginBlock => "begin_block",
            Phase::Validation => "validation",
            Phase::Execution => "execution",
            Phase::EndBlock => "end_block",
            Phase::Query => "query",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction-local failure. Never aborts the enclosing block.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum TxError {
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("{phase} ran out of gas (used={used}, limit={limit})")]
    OutOfGas { phase: Phase, used: u64, limit: u64 },
    #[error("{phase} store error: {reason}")]
    Store { phase: Phase, reason: String },
}

impl TxError {
    /// Stable numeric code for the error class.
    pub fn code(&self) -> u8 {
        match self {
            TxError::Decode(_) => 1,
            TxError::Validation(_) => 2,
            TxError::Execution(_) => 3,
            TxError::OutOfGas { .. } => 4,
            TxError::Store { .. } => 5,
        }
    }
}

impl Write for TxError {
    fn write(&self, writer: &mut impl BufMut) {
        self.code().write(writer);
        match self {
            TxError::Decode(reason) | TxError::Validation(reason) | TxError::Execution(reason) => {
                write_string(reason, MAX_REASON_LEN, writer);
            }
            TxError::OutOfGas { phase, used, limit } => {
                phase.tag().write(writer);
                used.write(writer);
                limit.write(writer);
            }
            TxError::Store { phase, reason } => {
                phase.tag().write(writer);
                write_string(reason, MAX_REASON_LEN, writer);
            }
        }
    }
}

impl EncodeSize for TxError {
    fn encode_size(&self) -> usize {
        1 + match self {
            TxError::Decode(reason) | TxError::Validation(reason) | TxError::Execution(reason) => {
                string_encode_size(reason, MAX_REASON_LEN)
            }
            TxError::OutOfGas { .. } => 1 + 8 + 8,
            TxError::Store { reason, .. } => 1 + string_encode_size(reason, MAX_REASON_LEN),
        }
    }
}

/// Outcome of one transaction.
///
/// `events` and `gas_used` reflect the phases that completed before any failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxResult<R> {
    pub events: Vec<Event>,
    pub gas_used: u64,
    pub outcome: Result<R, TxError>,
}

impl<R> TxResult<R> {
    /// A transaction that failed before any phase completed.
    pub fn failed(error: TxError) -> Self {
        Self {
            events: Vec::new(),
            gas_used: 0,
            outcome: Err(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn response(&self) -> Option<&R> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&TxError> {
        self.outcome.as_ref().err()
    }
}

impl<R: Write + EncodeSize> Write for TxResult<R> {
    fn write(&self, writer: &mut impl BufMut) {
        self.events.write(writer);
        self.gas_used.write(writer);
        match &self.outcome {
            Ok(response) => {
                0u8.write(writer);
                response.write(writer);
            }
            Err(error) => {
                1u8.write(writer);
                error.write(writer);
            }
        }
    }
}

impl<R: Write + EncodeSize> EncodeSize for TxResult<R> {
    fn encode_size(&self) -> usize {
        self.events.encode_size()
            + self.gas_used.encode_size()
            + 1
            + match &self.outcome {
                Ok(response) => response.encode_size(),
                Err(error) => error.encode_size(),
            }
    }
}

/// Outcome of one block. `tx_results[i]` is the outcome of `block.txs[i]`.
///
/// Consensus message `i` produced `consensus_message_responses[i]` and
/// `consensus_message_events[i]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockResponse<R> {
    pub consensus_message_responses: Vec<R>,
    pub consensus_message_events: Vec<Vec<Event>>,
    pub begin_block_events: Vec<Event>,
    pub tx_results: Vec<TxResult<R>>,
    pub end_block_events: Vec<Event>,
}

impl<R> Default for BlockResponse<R> {
    fn default() -> Self {
        Self {
            consensus_message_responses: Vec::new(),
            consensus_message_events: Vec::new(),
            begin_block_events: Vec::new(),
            tx_results: Vec::new(),
            end_block_events: Vec::new(),
        }
    }
}

impl<R: Write + EncodeSize> BlockResponse<R> {
    /// Commitment to the canonical encoding of the response.
    ///
    /// Replicas that executed the same block against the same state produce the same digest.
    pub fn digest(&self) -> Digest {
        Sha256::hash(&self.encode())
    }
}

impl<R: Write + EncodeSize> Write for BlockResponse<R> {
    fn write(&self, writer: &mut impl BufMut) {
        self.consensus_message_responses.write(writer);
        self.consensus_message_events.write(writer);
        self.begin_block_events.write(writer);
        self.tx_results.write(writer);
        self.end_block_events.write(writer);
    }
}

impl<R: Write + EncodeSize> EncodeSize for BlockResponse<R> {
    fn encode_size(&self) -> usize {
        self.consensus_message_responses.encode_size()
            + self.consensus_message_events.encode_size()
            + self.begin_block_events.encode_size()
            + self.tx_results.encode_size()
            + self.end_block_events.encode_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(gas_used: u64, outcome: Result<u64, TxError>) -> TxResult<u64> {
        TxResult {
            events: vec![Event::new("fee").with("amount", gas_used)],
            gas_used,
            outcome,
        }
    }

    #[test]
    fn digest_commits_to_result_order() {
        let ok = result(10, Ok(1));
        let failed = result(5, Err(TxError::Execution("boom".into())));

        let forward = BlockResponse {
            tx_results: vec![ok.clone(), failed.clone()],
            ..Default::default()
        };
        let reversed = BlockResponse {
            tx_results: vec![failed, ok],
            ..Default::default()
        };
        assert_eq!(forward.digest(), forward.clone().digest());
        assert_ne!(forward.digest(), reversed.digest());
    }

    #[test]
    fn digest_commits_to_error_details() {
        let a = BlockResponse::<u64> {
            tx_results: vec![TxResult::failed(TxError::OutOfGas {
                phase: Phase::Validation,
                used: 11,
                limit: 10,
            })],
            ..Default::default()
        };
        let b = BlockResponse::<u64> {
            tx_results: vec![TxResult::failed(TxError::OutOfGas {
                phase: Phase::Execution,
                used: 11,
                limit: 10,
            })],
            ..Default::default()
        };
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn digest_commits_to_consensus_message_events() {
        let quiet = BlockResponse::<u64> {
            consensus_message_responses: vec![1],
            consensus_message_events: vec![vec![]],
            ..Default::default()
        };
        let loud = BlockResponse::<u64> {
            consensus_message_responses: vec![1],
            consensus_message_events: vec![vec![Event::new("set")]],
            ..Default::default()
        };
        assert_ne!(quiet.digest(), loud.digest());
    }

    #[test]
    fn long_reasons_are_clamped() {
        let long = TxError::Execution("r".repeat(MAX_REASON_LEN * 2));
        let bounded = TxError::Execution("r".repeat(MAX_REASON_LEN));
        assert_eq!(long.encode_size(), bounded.encode_size());
        assert_eq!(long.encode(), bounded.encode());
    }

    #[test]
    fn failed_result_carries_only_the_error() {
        let result = TxResult::<u64>::failed(TxError::Decode("short buffer".into()));
        assert!(!result.is_ok());
        assert!(result.events.is_empty());
        assert_eq!(result.gas_used, 0);
        assert_eq!(result.response(), None);
        assert_eq!(result.error().map(TxError::code), Some(1));
    }
}
