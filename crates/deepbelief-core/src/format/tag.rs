use std::borrow::Cow;

use crate::error::{Error, Result};

// Tagged binary format
//
//   ┌──────────────┬──────────────┬──────────────────────────┐
//   │ type (u32 LE)│ length (u32) │ `length` payload bytes   │
//   └──────────────┴──────────────┴──────────────────────────┘
//
// Type codes are four ASCII characters read as a little-endian u32. DICT and
// LIST payloads are themselves sequences of tags; a DICT alternates CHAR keys
// with values. Strings are NUL terminated and padded with NULs to a multiple
// of four bytes, blobs are zero padded to a multiple of four.

/// Header length in bytes.
pub const HEADER_LEN: usize = 8;

/// The seven tag types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagType {
    Char,
    Uint,
    Fl32,
    Fary,
    Dict,
    List,
    Blob,
}

impl TagType {
    pub fn code(&self) -> u32 {
        u32::from_le_bytes(*self.fourcc())
    }

    pub fn fourcc(&self) -> &'static [u8; 4] {
        match self {
            TagType::Char => b"CHAR",
            TagType::Uint => b"UINT",
            TagType::Fl32 => b"FL32",
            TagType::Fary => b"FARY",
            TagType::Dict => b"DICT",
            TagType::List => b"LIST",
            TagType::Blob => b"BLOB",
        }
    }

    pub fn from_code(code: u32) -> Option<TagType> {
        [
            TagType::Char,
            TagType::Uint,
            TagType::Fl32,
            TagType::Fary,
            TagType::Dict,
            TagType::List,
            TagType::Blob,
        ]
        .into_iter()
        .find(|t| t.code() == code)
    }

    pub fn name(&self) -> &'static str {
        match self {
            TagType::Char => "CHAR",
            TagType::Uint => "UINT",
            TagType::Fl32 => "FL32",
            TagType::Fary => "FARY",
            TagType::Dict => "DICT",
            TagType::List => "LIST",
            TagType::Blob => "BLOB",
        }
    }
}

/// A decoded tag. Strings and blobs borrow from the input bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Tag<'a> {
    Str(Cow<'a, str>),
    Uint(u32),
    Float(f32),
    FloatArray(Vec<f32>),
    Blob(Cow<'a, [u8]>),
    Dict(Vec<(Cow<'a, str>, Tag<'a>)>),
    List(Vec<Tag<'a>>),
}

impl<'a> Tag<'a> {
    pub fn tag_type(&self) -> TagType {
        match self {
            Tag::Str(_) => TagType::Char,
            Tag::Uint(_) => TagType::Uint,
            Tag::Float(_) => TagType::Fl32,
            Tag::FloatArray(_) => TagType::Fary,
            Tag::Blob(_) => TagType::Blob,
            Tag::Dict(_) => TagType::Dict,
            Tag::List(_) => TagType::List,
        }
    }

    // Constructors

    pub fn string(value: impl Into<String>) -> Tag<'static> {
        Tag::Str(Cow::Owned(value.into()))
    }

    pub fn blob(bytes: Vec<u8>) -> Tag<'static> {
        Tag::Blob(Cow::Owned(bytes))
    }

    /// Build a dict from `(key, value)` pairs, preserving order.
    pub fn dict<K: Into<String>>(entries: impl IntoIterator<Item = (K, Tag<'a>)>) -> Tag<'a> {
        Tag::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (Cow::Owned(k.into()), v))
                .collect(),
        )
    }

    /// Detach from the input bytes.
    pub fn into_owned(self) -> Tag<'static> {
        match self {
            Tag::Str(s) => Tag::Str(Cow::Owned(s.into_owned())),
            Tag::Uint(v) => Tag::Uint(v),
            Tag::Float(v) => Tag::Float(v),
            Tag::FloatArray(v) => Tag::FloatArray(v),
            Tag::Blob(b) => Tag::Blob(Cow::Owned(b.into_owned())),
            Tag::Dict(entries) => Tag::Dict(
                entries
                    .into_iter()
                    .map(|(k, v)| (Cow::Owned(k.into_owned()), v.into_owned()))
                    .collect(),
            ),
            Tag::List(items) => Tag::List(items.into_iter().map(Tag::into_owned).collect()),
        }
    }

    // Typed access

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Tag::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Tag::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Tag::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_floats(&self) -> Option<&[f32]> {
        match self {
            Tag::FloatArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Tag::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Tag<'a>]> {
        match self {
            Tag::List(items) => Some(items),
            _ => None,
        }
    }

    /// Dict lookup; when a key repeats, the last occurrence wins.
    pub fn get(&self, key: &str) -> Option<&Tag<'a>> {
        match self {
            Tag::Dict(entries) => entries
                .iter()
                .rev()
                .find(|(k, _)| k.as_ref() == key)
                .map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn require(&self, key: &str) -> Result<&Tag<'a>> {
        if !matches!(self, Tag::Dict(_)) {
            return Err(Error::WrongTagType {
                key: key.to_string(),
                expected: TagType::Dict.name(),
                got: self.tag_type().name(),
            });
        }
        self.get(key).ok_or_else(|| Error::MissingKey {
            key: key.to_string(),
        })
    }

    pub fn require_str(&self, key: &str) -> Result<&str> {
        let tag = self.require(key)?;
        tag.as_str().ok_or_else(|| wrong_type(key, TagType::Char, tag))
    }

    pub fn require_u32(&self, key: &str) -> Result<u32> {
        let tag = self.require(key)?;
        tag.as_u32().ok_or_else(|| wrong_type(key, TagType::Uint, tag))
    }

    pub fn require_usize(&self, key: &str) -> Result<usize> {
        Ok(self.require_u32(key)? as usize)
    }

    pub fn require_f32(&self, key: &str) -> Result<f32> {
        let tag = self.require(key)?;
        tag.as_f32().ok_or_else(|| wrong_type(key, TagType::Fl32, tag))
    }

    pub fn require_list(&self, key: &str) -> Result<&[Tag<'a>]> {
        let tag = self.require(key)?;
        tag.as_list().ok_or_else(|| wrong_type(key, TagType::List, tag))
    }

    pub fn optional_u32(&self, key: &str) -> Result<Option<u32>> {
        match self.get(key) {
            None => Ok(None),
            Some(tag) => tag
                .as_u32()
                .map(Some)
                .ok_or_else(|| wrong_type(key, TagType::Uint, tag)),
        }
    }

    pub fn optional_f32(&self, key: &str) -> Result<Option<f32>> {
        match self.get(key) {
            None => Ok(None),
            Some(tag) => tag
                .as_f32()
                .map(Some)
                .ok_or_else(|| wrong_type(key, TagType::Fl32, tag)),
        }
    }

    pub fn optional_str(&self, key: &str) -> Result<Option<&str>> {
        match self.get(key) {
            None => Ok(None),
            Some(tag) => tag
                .as_str()
                .map(Some)
                .ok_or_else(|| wrong_type(key, TagType::Char, tag)),
        }
    }
}

fn wrong_type(key: &str, expected: TagType, got: &Tag<'_>) -> Error {
    Error::WrongTagType {
        key: key.to_string(),
        expected: expected.name(),
        got: got.tag_type().name(),
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    let end = offset.checked_add(4).filter(|&e| e <= bytes.len());
    match end {
        Some(end) => {
            let mut word = [0u8; 4];
            word.copy_from_slice(&bytes[offset..end]);
            Ok(u32::from_le_bytes(word))
        }
        None => Err(Error::Truncated {
            offset,
            needed: 4,
            available: bytes.len().saturating_sub(offset),
        }),
    }
}

/// Deepest DICT/LIST nesting the decoder accepts.
pub const MAX_NESTING: usize = 64;

/// Decode the tag starting at `offset`.
///
/// Returns the tag and the number of bytes it occupies, header included.
/// Nothing past the declared payload length is ever read.
pub fn decode(bytes: &[u8], offset: usize) -> Result<(Tag<'_>, usize)> {
    decode_at_depth(bytes, offset, 0)
}

fn decode_at_depth(bytes: &[u8], offset: usize, depth: usize) -> Result<(Tag<'_>, usize)> {
    let type_code = read_u32(bytes, offset)?;
    let length = read_u32(bytes, offset + 4)? as usize;
    let tag_type = TagType::from_code(type_code).ok_or(Error::UnknownTagType { type_code, offset })?;
    let start = offset + HEADER_LEN;
    let available = bytes.len().saturating_sub(start);
    if length > available {
        return Err(Error::Truncated {
            offset,
            needed: length,
            available,
        });
    }
    let payload = &bytes[start..start + length];

    let tag = match tag_type {
        TagType::Char => {
            let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
            let text = std::str::from_utf8(&payload[..end])
                .map_err(|e| Error::malformed(offset, format!("invalid utf-8 in CHAR: {e}")))?;
            Tag::Str(Cow::Borrowed(text))
        }
        TagType::Uint => {
            expect_len(offset, tag_type, length, 4)?;
            Tag::Uint(read_u32(payload, 0)?)
        }
        TagType::Fl32 => {
            expect_len(offset, tag_type, length, 4)?;
            Tag::Float(f32::from_bits(read_u32(payload, 0)?))
        }
        TagType::Fary => {
            if length % 4 != 0 {
                return Err(Error::malformed(
                    offset,
                    format!("FARY length {length} is not a multiple of 4"),
                ));
            }
            Tag::FloatArray(
                payload
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            )
        }
        TagType::Blob => Tag::Blob(Cow::Borrowed(payload)),
        TagType::List | TagType::Dict if depth >= MAX_NESTING => {
            return Err(Error::malformed(
                offset,
                format!("nesting deeper than {MAX_NESTING} levels"),
            ));
        }
        TagType::List => Tag::List(decode_sequence(payload, start, depth + 1)?),
        TagType::Dict => {
            let items = decode_sequence(payload, start, depth + 1)?;
            if items.len() % 2 != 0 {
                return Err(Error::malformed(
                    offset,
                    format!("DICT holds an odd number ({}) of subtags", items.len()),
                ));
            }
            let mut entries = Vec::with_capacity(items.len() / 2);
            let mut iter = items.into_iter();
            while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
                match key {
                    Tag::Str(key) => entries.push((key, value)),
                    other => {
                        return Err(Error::malformed(
                            offset,
                            format!("DICT key is a {}", other.tag_type().name()),
                        ))
                    }
                }
            }
            Tag::Dict(entries)
        }
    };
    Ok((tag, HEADER_LEN + length))
}

fn expect_len(offset: usize, tag_type: TagType, length: usize, expected: usize) -> Result<()> {
    if length != expected {
        return Err(Error::malformed(
            offset,
            format!("{} payload is {length} bytes, expected {expected}", tag_type.name()),
        ));
    }
    Ok(())
}

/// Decode back-to-back tags filling `payload` exactly.
///
/// `base` is the payload's position in the whole input, for error offsets.
fn decode_sequence(payload: &[u8], base: usize, depth: usize) -> Result<Vec<Tag<'_>>> {
    let mut items = Vec::new();
    let mut cursor = 0usize;
    while cursor < payload.len() {
        let (tag, consumed) =
            decode_at_depth(payload, cursor, depth).map_err(|e| rebase(e, base))?;
        items.push(tag);
        cursor += consumed;
    }
    Ok(items)
}

fn rebase(error: Error, base: usize) -> Error {
    match error {
        Error::UnknownTagType { type_code, offset } => Error::UnknownTagType {
            type_code,
            offset: offset + base,
        },
        Error::Truncated {
            offset,
            needed,
            available,
        } => Error::Truncated {
            offset: offset + base,
            needed,
            available,
        },
        Error::MalformedTag { offset, reason } => Error::MalformedTag {
            offset: offset + base,
            reason,
        },
        other => other,
    }
}
