//! Tagged-union envelopes.
//!
//! An envelope is `[tag:u8] [payload...]`. A [Registry] maps each tag (and a stable,
//! human-readable name) to the function that decodes that variant's payload. Registration is
//! explicit and happens once, when the application is assembled.

use commonware_codec::Error;
use std::collections::BTreeMap;
use thiserror::Error as ThisError;

/// Decodes one variant's payload, advancing the reader past it.
pub type DecodeFn<T> = fn(&mut &[u8]) -> Result<T, Error>;

/// Implemented by sum types whose variants are registered in a [Registry].
pub trait Tagged {
    fn tag(&self) -> u8;
}

#[derive(Debug, ThisError)]
pub enum EnvelopeError {
    #[error("tag {0:#04x} is already registered")]
    DuplicateTag(u8),
    #[error("name {0} is already registered")]
    DuplicateName(&'static str),
    #[error("empty envelope")]
    Empty,
    #[error("unknown tag {0:#04x}")]
    UnknownTag(u8),
    #[error("invalid {name} payload")]
    Payload {
        name: &'static str,
        #[source]
        source: Error,
    },
    #[error("{0} trailing bytes after envelope")]
    TrailingBytes(usize),
    #[error(transparent)]
    Codec(#[from] Error),
}

struct Entry<T> {
    name: &'static str,
    decode: DecodeFn<T>,
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            decode: self.decode,
        }
    }
}

pub struct Registry<T> {
    entries: BTreeMap<u8, Entry<T>>,
}

impl<T> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        tag: u8,
        name: &'static str,
        decode: DecodeFn<T>,
    ) -> Result<&mut Self, EnvelopeError> {
        if self.entries.contains_key(&tag) {
            return Err(EnvelopeError::DuplicateTag(tag));
        }
        if self.tag_of(name).is_some() {
            return Err(EnvelopeError::DuplicateName(name));
        }
        self.entries.insert(tag, Entry { name, decode });
        Ok(self)
    }

    pub fn name(&self, tag: u8) -> Option<&'static str> {
        self.entries.get(&tag).map(|entry| entry.name)
    }

    pub fn tag_of(&self, name: &str) -> Option<u8> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.name == name)
            .map(|(tag, _)| *tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decode one envelope from the front of `reader`, leaving any remaining bytes.
    pub fn decode_from(&self, reader: &mut &[u8]) -> Result<T, EnvelopeError> {
        let (&tag, rest) = reader.split_first().ok_or(EnvelopeError::Empty)?;
        *reader = rest;
        let entry = self
            .entries
            .get(&tag)
            .ok_or(EnvelopeError::UnknownTag(tag))?;
        (entry.decode)(reader).map_err(|source| EnvelopeError::Payload {
            name: entry.name,
            source,
        })
    }

    /// Decode exactly one envelope.
    pub fn decode(&self, bytes: &[u8]) -> Result<T, EnvelopeError> {
        let mut reader = bytes;
        let value = self.decode_from(&mut reader)?;
        if !reader.is_empty() {
            return Err(EnvelopeError::TrailingBytes(reader.len()));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::ReadExt;

    #[derive(Debug, PartialEq)]
    enum Shape {
        Circle(u64),
        Square(u64),
    }

    fn circle(reader: &mut &[u8]) -> Result<Shape, Error> {
        Ok(Shape::Circle(u64::read(reader)?))
    }

    fn square(reader: &mut &[u8]) -> Result<Shape, Error> {
        Ok(Shape::Square(u64::read(reader)?))
    }

    fn registry() -> Registry<Shape> {
        let mut registry = Registry::new();
        registry
            .register(0x1, "circle", circle)
            .unwrap()
            .register(0x2, "square", square)
            .unwrap();
        registry
    }

    #[test]
    fn dispatches_on_tag() {
        let registry = registry();
        let mut bytes = vec![0x2];
        bytes.extend_from_slice(&9u64.to_be_bytes());
        assert_eq!(registry.decode(&bytes).unwrap(), Shape::Square(9));
        assert_eq!(registry.name(0x1), Some("circle"));
        assert_eq!(registry.tag_of("square"), Some(0x2));
    }

    #[test]
    fn rejects_duplicate_registrations() {
        let mut registry = registry();
        assert!(matches!(
            registry.register(0x1, "triangle", circle),
            Err(EnvelopeError::DuplicateTag(0x1))
        ));
        assert!(matches!(
            registry.register(0x3, "circle", circle),
            Err(EnvelopeError::DuplicateName("circle"))
        ));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn rejects_unknown_empty_and_trailing() {
        let registry = registry();
        assert!(matches!(registry.decode(&[]), Err(EnvelopeError::Empty)));
        assert!(matches!(
            registry.decode(&[0x7, 0, 0]),
            Err(EnvelopeError::UnknownTag(0x7))
        ));
        assert!(matches!(
            registry.decode(&[0x1, 0, 0]),
            Err(EnvelopeError::Payload { name: "circle", .. })
        ));

        let mut bytes = vec![0x1];
        bytes.extend_from_slice(&1u64.to_be_bytes());
        bytes.push(0xff);
        assert!(matches!(
            registry.decode(&bytes),
            Err(EnvelopeError::TrailingBytes(1))
        ));
    }
}
