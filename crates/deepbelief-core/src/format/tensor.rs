// Tensor tags
//
// A tensor is a DICT:
//
//   float_bits      UINT  32, 16 or 8
//   dims            LIST  of UINT, outermost first
//   data            FARY  (32 bit only)
//   quantized_data  BLOB  (8/16 bit only) little-endian codes
//   min, max        FL32  (8/16 bit only) affine range of the codes

use crate::buffer::{Buffer, Storage};
use crate::dims::Dimensions;
use crate::error::{Error, Result};
use crate::precision::Precision;

use super::encode::round_up4;
use super::tag::{Tag, TagType};

/// Build a buffer from a tensor tag. Quantized data stays quantized.
pub fn buffer_from_tag(tag: &Tag<'_>) -> Result<Buffer> {
    let precision = Precision::from_bits(tag.require_u32("float_bits")?)?;
    let sizes = tag
        .require_list("dims")?
        .iter()
        .map(|item| {
            item.as_u32().map(|v| v as usize).ok_or(Error::WrongTagType {
                key: "dims".to_string(),
                expected: TagType::Uint.name(),
                got: item.tag_type().name(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let dims = Dimensions::try_new(sizes)?;
    let count = dims.element_count();

    match precision {
        Precision::F32 => {
            let data_tag = tag.require("data")?;
            let data = data_tag.as_floats().ok_or_else(|| Error::WrongTagType {
                key: "data".to_string(),
                expected: TagType::Fary.name(),
                got: data_tag.tag_type().name(),
            })?;
            if data.len() != count {
                return Err(Error::ReshapeElementMismatch {
                    src: data.len(),
                    dst: count,
                    dst_dims: dims,
                });
            }
            Buffer::from_vec(data.to_vec(), dims)
        }
        Precision::Q16 | Precision::Q8 => {
            let blob_tag = tag.require("quantized_data")?;
            let blob = blob_tag.as_blob().ok_or_else(|| Error::WrongTagType {
                key: "quantized_data".to_string(),
                expected: TagType::Blob.name(),
                got: blob_tag.tag_type().name(),
            })?;
            let needed = count
                .checked_mul(precision.bytes_per_element())
                .ok_or_else(|| Error::malformed(0, format!("{count} elements overflow the blob size")))?;
            if needed > blob.len() || blob.len() != round_up4(needed) {
                return Err(Error::msg(format!(
                    "quantized_data holds {} bytes, expected {} padded to four for {} elements of {} bits",
                    blob.len(),
                    needed,
                    count,
                    precision.bits()
                )));
            }
            let min = tag.require_f32("min")?;
            let max = tag.require_f32("max")?;
            let bytes = &blob[..needed];
            if precision == Precision::Q8 {
                Buffer::from_u8_codes(bytes.to_vec(), dims, min, max)
            } else {
                let codes = bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                Buffer::from_u16_codes(codes, dims, min, max)
            }
        }
    }
}

/// Serialize a buffer as a tensor tag at the requested bit depth.
///
/// Buffers already stored at that depth are written as they are; anything
/// else is converted first.
pub fn buffer_to_tag(buffer: &Buffer, bits: u32) -> Result<Tag<'static>> {
    let precision = Precision::from_bits(bits)?;
    let dims = Tag::List(
        buffer
            .dims()
            .sizes()
            .iter()
            .map(|&s| Tag::Uint(s as u32))
            .collect(),
    );
    let header = vec![("float_bits", Tag::Uint(bits)), ("dims", dims)];

    if precision == Precision::F32 {
        let mut entries = header;
        entries.push(("data", Tag::FloatArray(buffer.to_f32_vec()?)));
        return Ok(Tag::dict(entries));
    }

    let source = if buffer.precision()? == precision && buffer.layout().is_compact() {
        buffer.clone()
    } else {
        buffer.quantize(bits)?
    };
    let storage = source.storage()?;
    let start = source.layout().offset();
    let count = source.element_count();
    let (bytes, params) = match &*storage {
        Storage::Q8 { codes, params } => (codes[start..start + count].to_vec(), *params),
        Storage::Q16 { codes, params } => (
            codes[start..start + count]
                .iter()
                .flat_map(|c| c.to_le_bytes())
                .collect(),
            *params,
        ),
        Storage::F32(_) => return Err(Error::UnsupportedPrecision { bits }),
    };
    let mut entries = header;
    entries.push(("quantized_data", Tag::blob(bytes)));
    entries.push(("min", Tag::Float(params.min)));
    entries.push(("max", Tag::Float(params.max)));
    Ok(Tag::dict(entries))
}
