//! Messages and transactions of the bundled key-value application.
//!
//! The application stores opaque values under opaque keys and charges a fee per transaction.
//! Messages travel in a tagged envelope:
//!
//! | Tag    | Name     | Payload                                   |
//! |--------|----------|-------------------------------------------|
//! | `0x01` | `set`    | `[keyLen:varint] [key] [valueLen:varint] [value]` |
//! | `0x02` | `remove` | `[keyLen:varint] [key]`                   |
//!
//! A transaction is `[sender] [nonce:u64] [gasLimit:u64] [fee:u64] [envelope]`.

use crate::{
    envelope::{EnvelopeError, Registry, Tagged},
    state::{Key, MAX_KEY_LEN, MAX_VALUE_LEN},
    Identity,
};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, FixedSize, Read, ReadExt, ReadRangeExt, Write};
use serde::{Deserialize, Serialize};

pub const SET_TAG: u8 = 0x01;
pub const REMOVE_TAG: u8 = 0x02;

/// Namespace for account records.
pub const ACCOUNT_PREFIX: &[u8] = b"acct/";
/// Namespace for user data.
pub const DATA_PREFIX: &[u8] = b"data/";
/// Key holding the height of the last block that began.
pub const HEIGHT_KEY: &[u8] = b"sys/height";

/// Longest user key that still fits under [MAX_KEY_LEN] once namespaced.
pub const MAX_DATA_KEY_LEN: usize = MAX_KEY_LEN - DATA_PREFIX.len();

pub fn account_key(identity: &Identity) -> Key {
    Key::with_prefix(ACCOUNT_PREFIX, identity.as_bytes())
}

pub fn data_key(key: &[u8]) -> Key {
    Key::with_prefix(DATA_PREFIX, key)
}

pub fn height_key() -> Key {
    Key::from(HEIGHT_KEY)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum KvMsg {
    Set {
        #[serde(with = "crate::serde_hex")]
        key: Vec<u8>,
        #[serde(with = "crate::serde_hex")]
        value: Vec<u8>,
    },
    Remove {
        #[serde(with = "crate::serde_hex")]
        key: Vec<u8>,
    },
}

impl Tagged for KvMsg {
    fn tag(&self) -> u8 {
        match self {
            KvMsg::Set { .. } => SET_TAG,
            KvMsg::Remove { .. } => REMOVE_TAG,
        }
    }
}

fn decode_set(reader: &mut &[u8]) -> Result<KvMsg, Error> {
    let key = Vec::<u8>::read_range(reader, 1..=MAX_DATA_KEY_LEN)?;
    let value = Vec::<u8>::read_range(reader, 0..=MAX_VALUE_LEN)?;
    Ok(KvMsg::Set { key, value })
}

fn decode_remove(reader: &mut &[u8]) -> Result<KvMsg, Error> {
    let key = Vec::<u8>::read_range(reader, 1..=MAX_DATA_KEY_LEN)?;
    Ok(KvMsg::Remove { key })
}

/// Registry of every [KvMsg] variant.
pub fn registry() -> Result<Registry<KvMsg>, EnvelopeError> {
    let mut registry = Registry::new();
    registry
        .register(SET_TAG, "set", decode_set)?
        .register(REMOVE_TAG, "remove", decode_remove)?;
    Ok(registry)
}

impl Write for KvMsg {
    fn write(&self, writer: &mut impl BufMut) {
        self.tag().write(writer);
        match self {
            KvMsg::Set { key, value } => {
                key.write(writer);
                value.write(writer);
            }
            KvMsg::Remove { key } => key.write(writer),
        }
    }
}

impl EncodeSize for KvMsg {
    fn encode_size(&self) -> usize {
        u8::SIZE
            + match self {
                KvMsg::Set { key, value } => key.encode_size() + value.encode_size(),
                KvMsg::Remove { key } => key.encode_size(),
            }
    }
}

/// A decoded key-value transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvTx {
    pub sender: Identity,
    pub nonce: u64,
    pub gas_limit: u64,
    pub fee: u64,
    pub msg: KvMsg,
}

impl KvTx {
    pub fn decode(bytes: &[u8], registry: &Registry<KvMsg>) -> Result<Self, EnvelopeError> {
        let mut reader = bytes;
        let sender = Identity::read(&mut reader)?;
        let nonce = u64::read(&mut reader)?;
        let gas_limit = u64::read(&mut reader)?;
        let fee = u64::read(&mut reader)?;
        let msg = registry.decode(reader)?;
        Ok(Self {
            sender,
            nonce,
            gas_limit,
            fee,
            msg,
        })
    }
}

impl Write for KvTx {
    fn write(&self, writer: &mut impl BufMut) {
        self.sender.write(writer);
        self.nonce.write(writer);
        self.gas_limit.write(writer);
        self.fee.write(writer);
        self.msg.write(writer);
    }
}

impl EncodeSize for KvTx {
    fn encode_size(&self) -> usize {
        self.sender.encode_size() + u64::SIZE * 3 + self.msg.encode_size()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum KvQuery {
    Get {
        #[serde(with = "crate::serde_hex")]
        key: Vec<u8>,
    },
    Account {
        identity: Identity,
    },
}

/// Per-identity record: replay protection and fee balance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub nonce: u64,
    pub balance: u64,
}

impl Write for Account {
    fn write(&self, writer: &mut impl BufMut) {
        self.nonce.write(writer);
        self.balance.write(writer);
    }
}

impl Read for Account {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            nonce: u64::read(reader)?,
            balance: u64::read(reader)?,
        })
    }
}

impl FixedSize for Account {
    const SIZE: usize = u64::SIZE * 2;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum KvResponse {
    Stored {
        replaced: bool,
    },
    Removed {
        #[serde(with = "crate::serde_hex")]
        previous: Vec<u8>,
    },
    Value {
        #[serde(with = "serde_hex_option")]
        value: Option<Vec<u8>>,
    },
    Account(Account),
}

mod serde_hex_option {
    use commonware_utils::{from_hex_formatted, hex};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(bytes) => serializer.serialize_some(&hex(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|s| {
                from_hex_formatted(&s)
                    .ok_or_else(|| serde::de::Error::custom("expected a hex string"))
            })
            .transpose()
    }
}

impl Write for KvResponse {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            KvResponse::Stored { replaced } => {
                0u8.write(writer);
                replaced.write(writer);
            }
            KvResponse::Removed { previous } => {
                1u8.write(writer);
                previous.write(writer);
            }
            KvResponse::Value { value } => {
                2u8.write(writer);
                value.write(writer);
            }
            KvResponse::Account(account) => {
                3u8.write(writer);
                account.write(writer);
            }
        }
    }
}

impl EncodeSize for KvResponse {
    fn encode_size(&self) -> usize {
        u8::SIZE
            + match self {
                KvResponse::Stored { replaced } => replaced.encode_size(),
                KvResponse::Removed { previous } => previous.encode_size(),
                KvResponse::Value { value } => value.encode_size(),
                KvResponse::Account(_) => Account::SIZE,
            }
    }
}
