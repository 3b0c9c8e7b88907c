use bytes::{Buf, BufMut};
use commonware_codec::{varint::UInt, EncodeSize, Error, ReadExt, Write};

/// Longest prefix of `s` that fits in `max_len` bytes without splitting a character.
///
/// Writers clamp before encoding so that every encoded string is accepted by [read_string]
/// with the same bound.
pub(crate) fn clamp(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Write at most `max_len` bytes of `s`, varint length-prefixed.
pub(crate) fn write_string(s: &str, max_len: usize, writer: &mut impl BufMut) {
    let s = clamp(s, max_len);
    UInt(s.len() as u32).write(writer);
    writer.put_slice(s.as_bytes());
}

pub(crate) fn read_string(reader: &mut impl Buf, max_len: usize) -> Result<String, Error> {
    let len: u32 = UInt::<u32>::read(reader)?.into();
    let len = len as usize;
    if len > max_len {
        return Err(Error::Invalid("String", "too long"));
    }
    if reader.remaining() < len {
        return Err(Error::EndOfBuffer);
    }
    let mut bytes = vec![0u8; len];
    reader.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|_| Error::Invalid("String", "invalid UTF-8"))
}

pub(crate) fn string_encode_size(s: &str, max_len: usize) -> usize {
    let s = clamp(s, max_len);
    UInt(s.len() as u32).encode_size() + s.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_respects_char_boundaries() {
        assert_eq!(clamp("short", 16), "short");
        assert_eq!(clamp("abcdef", 3), "abc");
        // "é" is two bytes; cutting at 2 would split it.
        assert_eq!(clamp("aéb", 2), "a");
    }

    #[test]
    fn oversized_strings_are_written_clamped() {
        let long = "x".repeat(40);
        let mut buf = Vec::new();
        write_string(&long, 8, &mut buf);
        assert_eq!(buf.len(), string_encode_size(&long, 8));

        let decoded = read_string(&mut buf.as_slice(), 8).unwrap();
        assert_eq!(decoded, "x".repeat(8));
    }

    #[test]
    fn reader_rejects_strings_over_the_bound() {
        let mut buf = Vec::new();
        write_string("too long", 64, &mut buf);
        assert!(matches!(
            read_string(&mut buf.as_slice(), 3),
            Err(Error::Invalid("String", "too long"))
        ));
    }
}
