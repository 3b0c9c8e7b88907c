use crate::{config::ValidatedConfig, store::Memory, Config};
use commonware_codec::Encode;
use commonware_cryptography::{sha256::Sha256, Hasher};
use keel_types::{
    kv::{account_key, Account, KvMsg, KvTx},
    Block, BlockHeader, Identity, Value,
};

/// Creates an identity from a readable name
pub fn identity(name: &str) -> Identity {
    Identity::new(name.as_bytes().to_vec())
}

/// Creates a header whose hash is derived from the height
pub fn header(height: u64) -> BlockHeader {
    BlockHeader::new(
        height,
        1_700_000_000_000 + height * 1_000,
        Sha256::hash(&height.to_be_bytes()),
    )
}

/// Creates committed state holding the given balances
pub fn funded(balances: &[(&Identity, u64)]) -> Memory {
    let mut memory = Memory::default();
    for (identity, balance) in balances {
        let account = Account {
            nonce: 0,
            balance: *balance,
        };
        memory.insert(account_key(identity), Value::new(account.encode().to_vec()));
    }
    memory
}

/// Encodes a key-value transaction
pub fn kv_tx(sender: &Identity, nonce: u64, gas_limit: u64, fee: u64, msg: KvMsg) -> Vec<u8> {
    KvTx {
        sender: sender.clone(),
        nonce,
        gas_limit,
        fee,
        msg,
    }
    .encode()
    .to_vec()
}

pub fn set(key: &[u8], value: &[u8]) -> KvMsg {
    KvMsg::Set {
        key: key.to_vec(),
        value: value.to_vec(),
    }
}

pub fn remove(key: &[u8]) -> KvMsg {
    KvMsg::Remove { key: key.to_vec() }
}

/// Creates a block with no consensus messages
pub fn block(height: u64, txs: Vec<Vec<u8>>) -> Block<KvMsg> {
    Block::new(header(height), txs, Vec::new())
}

/// Default validated configuration
pub fn config() -> ValidatedConfig {
    Config::default()
        .validate()
        .expect("default config should validate")
}
