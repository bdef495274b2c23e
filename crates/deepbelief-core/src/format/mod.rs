//! The tagged binary format that model files are written in.

pub mod encode;
pub mod tag;
pub mod tensor;

pub use encode::round_up4;
pub use tag::{decode, Tag, TagType, HEADER_LEN, MAX_NESTING};
pub use tensor::{buffer_from_tag, buffer_to_tag};

/// Decode a whole file: the first tag at offset zero is the root.
pub fn decode_root(bytes: &[u8]) -> crate::Result<Tag<'_>> {
    let (root, _) = decode(bytes, 0)?;
    Ok(root)
}
