//! Common types used throughout keel.

pub mod block;
pub mod envelope;
pub mod event;
pub mod kv;
pub mod result;
pub mod state;

mod codec;
mod identity;
mod serde_hex;

pub use block::{Block, BlockHeader};
pub use event::{Attribute, Event};
pub use identity::{Identity, MAX_IDENTITY_LEN};
pub use result::{BlockResponse, Phase, TxError, TxResult};
pub use state::{ChangeSet, Key, Status, Value};
