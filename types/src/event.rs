use crate::codec::{read_string, string_encode_size, write_string};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, ReadExt, Write};
use serde::{Deserialize, Serialize};

/// Maximum length of an event kind or attribute string. Longer strings are clamped on encode.
pub const MAX_EVENT_STRING_LEN: usize = 4096;
/// Maximum number of attributes on a single event.
pub const MAX_EVENT_ATTRIBUTES: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

/// Observable side effect emitted by a handler.
///
/// Attribute order is part of the event: replicas must emit attributes in the same order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: String,
    pub attributes: Vec<Attribute>,
}

impl Event {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attributes: Vec::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.attributes.push(Attribute {
            key: key.into(),
            value: value.to_string(),
        });
        self
    }

    /// Returns the first attribute value stored under `key`.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attribute| attribute.key == key)
            .map(|attribute| attribute.value.as_str())
    }
}

impl Write for Event {
    fn write(&self, writer: &mut impl BufMut) {
        write_string(&self.kind, MAX_EVENT_STRING_LEN, writer);
        (self.attributes.len() as u32).write(writer);
        for attribute in &self.attributes {
            write_string(&attribute.key, MAX_EVENT_STRING_LEN, writer);
            write_string(&attribute.value, MAX_EVENT_STRING_LEN, writer);
        }
    }
}

impl Read for Event {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let kind = read_string(reader, MAX_EVENT_STRING_LEN)?;
        let len = u32::read(reader)? as usize;
        if len > MAX_EVENT_ATTRIBUTES {
            return Err(Error::Invalid("Event", "too many attributes"));
        }
        let mut attributes = Vec::with_capacity(len);
        for _ in 0..len {
            let key = read_string(reader, MAX_EVENT_STRING_LEN)?;
            let value = read_string(reader, MAX_EVENT_STRING_LEN)?;
            attributes.push(Attribute { key, value });
        }
        Ok(Self { kind, attributes })
    }
}

impl EncodeSize for Event {
    fn encode_size(&self) -> usize {
        string_encode_size(&self.kind, MAX_EVENT_STRING_LEN)
            + 4
            + self
                .attributes
                .iter()
                .map(|a| {
                    string_encode_size(&a.key, MAX_EVENT_STRING_LEN)
                        + string_encode_size(&a.value, MAX_EVENT_STRING_LEN)
                })
                .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{DecodeExt, Encode};

    #[test]
    fn event_attributes_keep_insertion_order() {
        let event = Event::new("transfer")
            .with("to", "bob")
            .with("amount", 10u64)
            .with("to", "carol");
        assert_eq!(event.attribute("to"), Some("bob"));
        assert_eq!(event.attribute("amount"), Some("10"));
        assert_eq!(event.attribute("missing"), None);

        let decoded = Event::decode(event.encode().as_ref()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn oversized_attribute_still_decodes() {
        let event = Event::new("set").with("value", "v".repeat(MAX_EVENT_STRING_LEN + 10));
        let encoded = event.encode();
        assert_eq!(encoded.len(), event.encode_size());

        let decoded = Event::decode(encoded.as_ref()).unwrap();
        assert_eq!(decoded.attributes[0].value.len(), MAX_EVENT_STRING_LEN);
    }

    #[test]
    fn event_json_shape() {
        let event = Event::new("set").with("key", "00ff");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "kind": "set",
                "attributes": [{"key": "key", "value": "00ff"}],
            })
        );
    }
}
