//! Keys, values and the change sets that stage mutations to them.

use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, ReadExt, ReadRangeExt, Write};
use commonware_utils::hex;
use std::{collections::BTreeMap, fmt};

/// Maximum length of a [Key].
pub const MAX_KEY_LEN: usize = 1024;
/// Maximum length of a [Value].
pub const MAX_VALUE_LEN: usize = 1 << 20;
/// Maximum number of mutations in an encoded [ChangeSet].
pub const MAX_CHANGE_SET_OPS: usize = 1 << 20;

#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(Vec<u8>);

impl Key {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Concatenate a namespace prefix and a suffix into a key.
    pub fn with_prefix(prefix: &[u8], suffix: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(prefix.len() + suffix.len());
        bytes.extend_from_slice(prefix);
        bytes.extend_from_slice(suffix);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Key {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", hex(&self.0))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex(&self.0))
    }
}

impl Write for Key {
    fn write(&self, writer: &mut impl BufMut) {
        self.0.write(writer);
    }
}

impl Read for Key {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self(Vec::<u8>::read_range(reader, 1..=MAX_KEY_LEN)?))
    }
}

impl EncodeSize for Key {
    fn encode_size(&self) -> usize {
        self.0.encode_size()
    }
}

#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Value(Vec<u8>);

impl Value {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl AsRef<[u8]> for Value {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({})", hex(&self.0))
    }
}

impl Write for Value {
    fn write(&self, writer: &mut impl BufMut) {
        self.0.write(writer);
    }
}

impl Read for Value {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self(Vec::<u8>::read_range(reader, 0..=MAX_VALUE_LEN)?))
    }
}

impl EncodeSize for Value {
    fn encode_size(&self) -> usize {
        self.0.encode_size()
    }
}

/// A single staged mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Update(Value),
    Delete,
}

impl Write for Status {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Status::Update(value) => {
                0u8.write(writer);
                value.write(writer);
            }
            Status::Delete => 1u8.write(writer),
        }
    }
}

impl Read for Status {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let kind = u8::read(reader)?;
        match kind {
            0 => Ok(Status::Update(Value::read(reader)?)),
            1 => Ok(Status::Delete),
            _ => Err(Error::InvalidEnum(kind)),
        }
    }
}

impl EncodeSize for Status {
    fn encode_size(&self) -> usize {
        1 + match self {
            Status::Update(value) => value.encode_size(),
            Status::Delete => 0,
        }
    }
}

/// Ordered log of mutations staged by one execution scope.
///
/// Later entries for the same key supersede earlier ones. The log is never reordered, so two
/// scopes that perform the same writes in the same order produce identical change sets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    ops: Vec<(Key, Status)>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: Key, status: Status) {
        self.ops.push((key, status));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Key, Status)> {
        self.ops.iter()
    }

    /// Collapse the log to the final status of each key, ordered by key.
    pub fn compact(&self) -> ChangeSet {
        let mut latest = BTreeMap::new();
        for (key, status) in &self.ops {
            latest.insert(key, status);
        }
        latest
            .into_iter()
            .map(|(key, status)| (key.clone(), status.clone()))
            .collect()
    }
}

impl IntoIterator for ChangeSet {
    type Item = (Key, Status);
    type IntoIter = std::vec::IntoIter<(Key, Status)>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

impl FromIterator<(Key, Status)> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = (Key, Status)>>(iter: I) -> Self {
        Self {
            ops: iter.into_iter().collect(),
        }
    }
}

impl Write for ChangeSet {
    fn write(&self, writer: &mut impl BufMut) {
        (self.ops.len() as u32).write(writer);
        for (key, status) in &self.ops {
            key.write(writer);
            status.write(writer);
        }
    }
}

impl Read for ChangeSet {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let len = u32::read(reader)? as usize;
        if len > MAX_CHANGE_SET_OPS {
            return Err(Error::Invalid("ChangeSet", "too many operations"));
        }
        let mut ops = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            let key = Key::read(reader)?;
            let status = Status::read(reader)?;
            ops.push((key, status));
        }
        Ok(Self { ops })
    }
}

impl EncodeSize for ChangeSet {
    fn encode_size(&self) -> usize {
        4 + self
            .ops
            .iter()
            .map(|(key, status)| key.encode_size() + status.encode_size())
            .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{DecodeExt, Encode};

    fn update(value: &[u8]) -> Status {
        Status::Update(Value::from(value))
    }

    #[test]
    fn compact_keeps_last_write_in_key_order() {
        let mut changes = ChangeSet::new();
        changes.push(Key::from("b"), update(b"1"));
        changes.push(Key::from("a"), update(b"2"));
        changes.push(Key::from("b"), Status::Delete);
        changes.push(Key::from("a"), update(b"3"));

        let compacted: Vec<_> = changes.compact().into_iter().collect();
        assert_eq!(
            compacted,
            vec![(Key::from("a"), update(b"3")), (Key::from("b"), Status::Delete)]
        );
        assert_eq!(changes.len(), 4);
    }

    #[test]
    fn change_set_encoding_is_stable() {
        let mut changes = ChangeSet::new();
        changes.push(Key::from("k"), update(b"v"));
        changes.push(Key::from("k"), Status::Delete);

        let encoded = changes.encode();
        assert_eq!(
            encoded.as_ref(),
            &[0, 0, 0, 2, 1, b'k', 0, 1, b'v', 1, b'k', 1]
        );
        assert_eq!(ChangeSet::decode(encoded.as_ref()).unwrap(), changes);
    }

    #[test]
    fn empty_key_is_not_decodable() {
        let encoded = [0u8, 0, 0, 1, 0, 1];
        assert!(ChangeSet::decode(encoded.as_ref()).is_err());
    }
}
