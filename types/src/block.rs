use bytes::{Buf, BufMut};
use commonware_codec::{varint::UInt, EncodeSize, Error, RangeCfg, Read, ReadExt, Write};
use commonware_cryptography::sha256::Digest;

/// Maximum number of transactions that can be decoded from an encoded block.
pub const MAX_BLOCK_TRANSACTIONS: usize = 10_000;
/// Maximum size of a single raw transaction.
pub const MAX_TRANSACTION_SIZE: usize = 1 << 20;
/// Maximum number of consensus messages that can be decoded from an encoded block.
pub const MAX_CONSENSUS_MESSAGES: usize = 64;

/// Block metadata made available to every execution scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub height: u64,
    /// Consensus timestamp in milliseconds since the unix epoch.
    pub time_ms: u64,
    pub hash: Digest,
}

impl BlockHeader {
    pub fn new(height: u64, time_ms: u64, hash: Digest) -> Self {
        Self {
            height,
            time_ms,
            hash,
        }
    }
}

impl Write for BlockHeader {
    fn write(&self, writer: &mut impl BufMut) {
        UInt(self.height).write(writer);
        UInt(self.time_ms).write(writer);
        self.hash.write(writer);
    }
}

impl Read for BlockHeader {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let height = UInt::read(reader)?.into();
        let time_ms = UInt::read(reader)?.into();
        let hash = Digest::read(reader)?;
        Ok(Self {
            height,
            time_ms,
            hash,
        })
    }
}

impl EncodeSize for BlockHeader {
    fn encode_size(&self) -> usize {
        UInt(self.height).encode_size() + UInt(self.time_ms).encode_size() + self.hash.encode_size()
    }
}

/// Unit of consensus input: ordered raw transactions plus ordered consensus messages.
///
/// Transactions stay opaque until the state transition function decodes them, so a block with
/// malformed transactions is still a valid block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block<M> {
    pub height: u64,
    pub time_ms: u64,
    pub hash: Digest,
    pub txs: Vec<Vec<u8>>,
    pub consensus_messages: Vec<M>,
}

impl<M> Block<M> {
    pub fn new(
        header: BlockHeader,
        txs: Vec<Vec<u8>>,
        consensus_messages: Vec<M>,
    ) -> Self {
        Self {
            height: header.height,
            time_ms: header.time_ms,
            hash: header.hash,
            txs,
            consensus_messages,
        }
    }

    pub fn header(&self) -> BlockHeader {
        BlockHeader::new(self.height, self.time_ms, self.hash)
    }
}

impl<M: Write> Write for Block<M> {
    fn write(&self, writer: &mut impl BufMut) {
        self.header().write(writer);
        self.txs.write(writer);
        self.consensus_messages.write(writer);
    }
}

impl<M: Read<Cfg = ()>> Read for Block<M> {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let header = BlockHeader::read(reader)?;
        let txs = Vec::<Vec<u8>>::read_cfg(
            reader,
            &(
                RangeCfg::from(0..=MAX_BLOCK_TRANSACTIONS),
                (RangeCfg::from(0..=MAX_TRANSACTION_SIZE), ()),
            ),
        )?;
        let consensus_messages =
            Vec::<M>::read_cfg(reader, &(RangeCfg::from(0..=MAX_CONSENSUS_MESSAGES), ()))?;
        Ok(Self::new(header, txs, consensus_messages))
    }
}

impl<M: EncodeSize> EncodeSize for Block<M> {
    fn encode_size(&self) -> usize {
        self.header().encode_size() + self.txs.encode_size() + self.consensus_messages.encode_size()
    }
}
