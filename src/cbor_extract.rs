//! # Witness CBOR Extractor
//!
//! Best-effort recovery of the `app_public_inputs` field from spell witness
//! data, used only when the primary spell decoder cannot parse the blob.
//!
//! The scanner runs over arbitrary, attacker-influenced on-chain bytes:
//! every failure mode yields "not found", never a panic, and scan length,
//! item count and nesting depth are all capped.

use crate::builder::transaction_from_hex;
use crate::config::cbor;

/// A decoded CBOR value, restricted to what the scan needs.
#[derive(Debug, Clone, PartialEq)]
enum CborValue {
    Uint(u64),
    Nint(i64),
    Bytes(Vec<u8>),
    Text(String),
    Array(Vec<CborValue>),
    Map(Vec<(CborValue, CborValue)>),
    Bool(bool),
    Null,
}

/// Minimal CBOR reader over a byte slice.
///
/// Supports major types 0-7; tags are skipped transparently. Decoding
/// returns `None` on any malformation, overrun or exceeded bound.
struct CborReader<'a> {
    data: &'a [u8],
    pos: usize,
    items: usize,
}

impl<'a> CborReader<'a> {
    fn new(data: &'a [u8], pos: usize) -> Self {
        Self {
            data,
            pos,
            items: 0,
        }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        if end > self.data.len() {
            return None;
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Some(slice)
    }

    fn read_uint(&mut self, bytes: usize) -> Option<u64> {
        let slice = self.take(bytes)?;
        let mut value: u64 = 0;
        for b in slice {
            value = (value << 8) | u64::from(*b);
        }
        Some(value)
    }

    /// Read the argument encoded in the additional-info bits.
    fn read_argument(&mut self, additional: u8) -> Option<u64> {
        match additional {
            0..=23 => Some(u64::from(additional)),
            24 => self.read_uint(1),
            25 => self.read_uint(2),
            26 => self.read_uint(4),
            27 => self.read_uint(8),
            _ => None,
        }
    }

    fn decode_item(&mut self, depth: usize) -> Option<CborValue> {
        if depth > cbor::MAX_DEPTH {
            return None;
        }
        self.items += 1;
        if self.items > cbor::MAX_ITEMS {
            return None;
        }

        let initial = *self.data.get(self.pos)?;
        self.pos += 1;
        let major = initial >> 5;
        let additional = initial & 0x1f;

        match major {
            0 => self.read_argument(additional).map(CborValue::Uint),
            1 => {
                let arg = self.read_argument(additional)?;
                let value = i64::try_from(arg).ok()?.checked_neg()?.checked_sub(1)?;
                Some(CborValue::Nint(value))
            }
            2 => {
                let len = usize::try_from(self.read_argument(additional)?).ok()?;
                self.take(len).map(|b| CborValue::Bytes(b.to_vec()))
            }
            3 => {
                let len = usize::try_from(self.read_argument(additional)?).ok()?;
                let bytes = self.take(len)?;
                Some(CborValue::Text(
                    String::from_utf8_lossy(bytes).into_owned(),
                ))
            }
            4 => {
                let len = usize::try_from(self.read_argument(additional)?).ok()?;
                if len > cbor::MAX_ITEMS {
                    return None;
                }
                let mut array = Vec::with_capacity(len.min(64));
                for _ in 0..len {
                    array.push(self.decode_item(depth + 1)?);
                }
                Some(CborValue::Array(array))
            }
            5 => {
                let len = usize::try_from(self.read_argument(additional)?).ok()?;
                if len > cbor::MAX_ITEMS {
                    return None;
                }
                let mut map = Vec::with_capacity(len.min(64));
                for _ in 0..len {
                    let key = self.decode_item(depth + 1)?;
                    let value = self.decode_item(depth + 1)?;
                    map.push((key, value));
                }
                Some(CborValue::Map(map))
            }
            6 => {
                // Tag: consume the tag number, decode the tagged item.
                self.read_argument(additional)?;
                self.decode_item(depth + 1)
            }
            7 => match additional {
                20 => Some(CborValue::Bool(false)),
                21 => Some(CborValue::Bool(true)),
                22 | 23 => Some(CborValue::Null),
                24 => {
                    self.take(1)?;
                    Some(CborValue::Null)
                }
                25 => {
                    self.take(2)?;
                    Some(CborValue::Null)
                }
                26 => {
                    self.take(4)?;
                    Some(CborValue::Null)
                }
                27 => {
                    self.take(8)?;
                    Some(CborValue::Null)
                }
                _ => Some(CborValue::Null),
            },
            _ => None,
        }
    }
}

/// Render 32 bytes as a comma-separated decimal list.
fn join_decimal(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Coerce a value into a 32-entry byte vector: either a 32-byte string or
/// an array of 32 small integers.
fn to_bytes32(value: &CborValue) -> Option<Vec<u8>> {
    match value {
        CborValue::Bytes(bytes) if bytes.len() == 32 => Some(bytes.clone()),
        CborValue::Array(items) if items.len() == 32 => items
            .iter()
            .map(|item| match item {
                CborValue::Uint(n) => u8::try_from(*n).ok(),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

/// Interpret the value found under an `app_public_inputs` key.
///
/// Three encodings are recognized: a literal `t,...` string, a
/// `['t', bytes32, bytes32]` array, and a map whose values include two
/// 32-length arrays (preferring one stored under a `"t"` key).
fn candidate_from_value(value: &CborValue) -> Option<String> {
    match value {
        CborValue::Text(text) if text.starts_with("t,") => Some(text.clone()),
        CborValue::Array(items) if items.len() >= 3 => {
            if !matches!(&items[0], CborValue::Text(t) if t == "t") {
                return None;
            }
            let first = to_bytes32(&items[1])?;
            let second = to_bytes32(&items[2])?;
            Some(format!("t,{},{}", join_decimal(&first), join_decimal(&second)))
        }
        CborValue::Map(entries) => {
            let mut arrays: Vec<Vec<u8>> = Vec::new();
            let preferred = entries.iter().find_map(|(key, value)| {
                matches!(key, CborValue::Text(t) if t == "t")
                    .then(|| to_bytes32(value))
                    .flatten()
            });
            if let Some(t_array) = &preferred {
                arrays.push(t_array.clone());
            }
            for (key, value) in entries {
                if let CborValue::Text(text) = key {
                    if text.starts_with("t,") {
                        return Some(text.clone());
                    }
                }
                if let CborValue::Text(text) = value {
                    if text.starts_with("t,") {
                        return Some(text.clone());
                    }
                }
                if let Some(bytes) = to_bytes32(value) {
                    if preferred.as_deref() != Some(bytes.as_slice()) {
                        arrays.push(bytes);
                    }
                }
                if arrays.len() >= 2 {
                    break;
                }
            }
            if arrays.len() >= 2 {
                Some(format!(
                    "t,{},{}",
                    join_decimal(&arrays[0]),
                    join_decimal(&arrays[1])
                ))
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Walk a decoded value looking for the candidate string, either under an
/// `app_public_inputs` key or as a bare `t,...` text nested anywhere.
fn walk(value: &CborValue) -> Option<String> {
    match value {
        CborValue::Text(text) if text.starts_with("t,") => Some(text.clone()),
        CborValue::Array(items) => items.iter().find_map(walk),
        CborValue::Map(entries) => {
            for (key, val) in entries {
                if matches!(key, CborValue::Text(t) if t == "app_public_inputs") {
                    if let Some(found) = candidate_from_value(val) {
                        return Some(found);
                    }
                }
            }
            entries.iter().find_map(|(_, val)| walk(val))
        }
        _ => None,
    }
}

/// Scan a witness item for an embedded `app_public_inputs` candidate,
/// trying every byte offset because the field may be nested at an arbitrary
/// position inside the pushed spell data.
pub fn scan_witness_item(buf: &[u8]) -> Option<String> {
    let limit = buf.len().min(cbor::MAX_SCAN_BYTES);
    for offset in 0..limit {
        let mut reader = CborReader::new(buf, offset);
        if let Some(value) = reader.decode_item(0) {
            if let Some(found) = walk(&value) {
                return Some(found);
            }
        }
    }
    fallback_text_scan(buf)
}

/// Raw fallback: look for a literal `t,` followed by at least 64
/// comma-separated decimal values in the lossy UTF-8 rendering.
fn fallback_text_scan(buf: &[u8]) -> Option<String> {
    let limit = buf.len().min(cbor::MAX_SCAN_BYTES);
    let data = &buf[..limit];

    for start in 0..data.len() {
        if data[start] != b't' {
            continue;
        }
        let mut pos = start + 1;
        let mut values = 0usize;
        let mut end = start;
        while pos < data.len() && data[pos] == b',' {
            pos += 1;
            let digits_start = pos;
            while pos < data.len() && data[pos].is_ascii_digit() {
                pos += 1;
            }
            if pos == digits_start {
                break;
            }
            values += 1;
            end = pos;
        }
        if values >= cbor::FALLBACK_MIN_VALUES {
            return std::str::from_utf8(&data[start..end])
                .ok()
                .map(str::to_owned);
        }
    }
    None
}

/// Extract `app_public_inputs` from a raw transaction hex.
///
/// Inspects each input's witness stack for spell-sized items carrying the
/// `spell` marker and scans them. Any parse failure yields `None`.
pub fn extract_app_public_inputs(tx_hex: &str) -> Option<String> {
    let tx = transaction_from_hex(tx_hex).ok()?;
    for input in &tx.input {
        for item in input.witness.iter() {
            if item.len() < cbor::MIN_SPELL_WITNESS_LEN {
                continue;
            }
            if !contains_spell_marker(item) {
                continue;
            }
            if let Some(found) = scan_witness_item(item) {
                return Some(found);
            }
        }
    }
    None
}

fn contains_spell_marker(data: &[u8]) -> bool {
    data.windows(5).any(|w| w == b"spell")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hand-encode a CBOR text string.
    fn cbor_text(s: &str) -> Vec<u8> {
        let mut out = cbor_header(3, s.len() as u64);
        out.extend_from_slice(s.as_bytes());
        out
    }

    /// Hand-encode a CBOR byte string.
    fn cbor_bytes(b: &[u8]) -> Vec<u8> {
        let mut out = cbor_header(2, b.len() as u64);
        out.extend_from_slice(b);
        out
    }

    fn cbor_header(major: u8, len: u64) -> Vec<u8> {
        if len < 24 {
            vec![(major << 5) | len as u8]
        } else if len < 256 {
            vec![(major << 5) | 24, len as u8]
        } else {
            vec![(major << 5) | 25, (len >> 8) as u8, len as u8]
        }
    }

    fn expected_string() -> String {
        let first: Vec<u8> = (0..32).collect();
        let second: Vec<u8> = (100..132).collect();
        format!("t,{},{}", join_decimal(&first), join_decimal(&second))
    }

    /// A map `{"app_public_inputs": {"$00": ["t", b32, b32]}}`.
    fn embedded_map() -> Vec<u8> {
        let first: Vec<u8> = (0..32).collect();
        let second: Vec<u8> = (100..132).collect();

        let mut inner_array = cbor_header(4, 3);
        inner_array.extend(cbor_text("t"));
        inner_array.extend(cbor_bytes(&first));
        inner_array.extend(cbor_bytes(&second));

        let mut keyed = cbor_header(5, 1);
        keyed.extend(cbor_text("$00"));
        keyed.extend(inner_array);

        let mut outer = cbor_header(5, 1);
        outer.extend(cbor_text("app_public_inputs"));
        outer.extend(keyed);
        outer
    }

    #[test]
    fn test_literal_string_encoding() {
        let expected = expected_string();
        let mut map = cbor_header(5, 1);
        map.extend(cbor_text("app_public_inputs"));
        map.extend(cbor_text(&expected));
        assert_eq!(scan_witness_item(&map), Some(expected));
    }

    #[test]
    fn test_array_encoding() {
        assert_eq!(scan_witness_item(&embedded_map()), Some(expected_string()));
    }

    #[test]
    fn test_map_of_arrays_encoding() {
        let first: Vec<u8> = (0..32).collect();
        let second: Vec<u8> = (100..132).collect();

        let mut value_map = cbor_header(5, 2);
        value_map.extend(cbor_text("t"));
        value_map.extend(cbor_bytes(&first));
        value_map.extend(cbor_text("x"));
        value_map.extend(cbor_bytes(&second));

        let mut outer = cbor_header(5, 1);
        outer.extend(cbor_text("app_public_inputs"));
        outer.extend(value_map);

        assert_eq!(scan_witness_item(&outer), Some(expected_string()));
    }

    #[test]
    fn test_embedded_at_offset() {
        // Leading garbage forces the offset scan to find the map.
        let mut buf = vec![0xde, 0xad, 0xbe, 0xef, 0x00];
        buf.extend(embedded_map());
        assert_eq!(scan_witness_item(&buf), Some(expected_string()));
    }

    #[test]
    fn test_fallback_text_scan() {
        let expected = expected_string();
        let mut buf = b"garbage prefix ".to_vec();
        buf.extend_from_slice(expected.as_bytes());
        buf.extend_from_slice(b" trailing");
        // No decodable CBOR anywhere: the raw text scan must find it.
        assert_eq!(fallback_text_scan(&buf), Some(expected));
    }

    #[test]
    fn test_fallback_requires_enough_values() {
        let short = "t,1,2,3,4,5";
        assert_eq!(fallback_text_scan(short.as_bytes()), None);
    }

    #[test]
    fn test_garbage_never_panics() {
        // High-bit bytes only: nothing can decode into a `t,` text.
        let garbage: Vec<u8> = (0..2048u32).map(|i| (i % 100 + 128) as u8).collect();
        assert_eq!(scan_witness_item(&garbage), None);

        assert_eq!(extract_app_public_inputs("not-hex"), None);
        assert_eq!(extract_app_public_inputs("00"), None);
    }

    #[test]
    fn test_truncated_structures_return_none() {
        let mut map = embedded_map();
        map.truncate(map.len() / 2);
        // A truncated nested map can still expose a shorter valid prefix;
        // it must never produce the full candidate or panic.
        assert_ne!(scan_witness_item(&map), Some(expected_string()));
    }
}
