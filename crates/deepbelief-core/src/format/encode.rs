use super::tag::{Tag, TagType, HEADER_LEN};

/// Round up to the next multiple of four.
pub fn round_up4(n: usize) -> usize {
    (n + 3) & !3
}

impl Tag<'_> {
    /// Payload length as written in the header.
    pub fn payload_len(&self) -> usize {
        match self {
            // at least one NUL terminator
            Tag::Str(s) => round_up4(s.len() + 1),
            Tag::Uint(_) | Tag::Float(_) => 4,
            Tag::FloatArray(v) => v.len() * 4,
            Tag::Blob(b) => round_up4(b.len()),
            Tag::Dict(entries) => entries
                .iter()
                .map(|(k, v)| HEADER_LEN + round_up4(k.len() + 1) + v.encoded_len())
                .sum(),
            Tag::List(items) => items.iter().map(Tag::encoded_len).sum(),
        }
    }

    /// Total length including the header.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload_len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        write_header(out, self.tag_type(), self.payload_len());
        match self {
            Tag::Str(s) => write_padded(out, s.as_bytes(), round_up4(s.len() + 1)),
            Tag::Uint(v) => out.extend_from_slice(&v.to_le_bytes()),
            Tag::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
            Tag::FloatArray(values) => {
                for v in values {
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
            Tag::Blob(bytes) => write_padded(out, bytes, round_up4(bytes.len())),
            Tag::Dict(entries) => {
                for (key, value) in entries {
                    write_header(out, TagType::Char, round_up4(key.len() + 1));
                    write_padded(out, key.as_bytes(), round_up4(key.len() + 1));
                    value.encode_into(out);
                }
            }
            Tag::List(items) => {
                for item in items {
                    item.encode_into(out);
                }
            }
        }
    }
}

fn write_header(out: &mut Vec<u8>, tag_type: TagType, length: usize) {
    out.extend_from_slice(&tag_type.code().to_le_bytes());
    out.extend_from_slice(&(length as u32).to_le_bytes());
}

fn write_padded(out: &mut Vec<u8>, bytes: &[u8], padded_len: usize) {
    out.extend_from_slice(bytes);
    out.resize(out.len() + (padded_len - bytes.len()), 0);
}
