use crate::dims::Dimensions;

/// Broad failure category, used by callers that only care about the class of
/// problem (a corrupt model file versus a programming error, say).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The byte stream or the graph description inside it is malformed.
    Decode,
    /// Operand or parameter shapes do not fit together.
    Shape,
    /// Unsupported bit depth or an operation the precision cannot express.
    Precision,
    /// The compute substrate refused or failed an operation.
    Backend,
}

/// All errors that can occur while loading or running a network.
///
/// Every failure is fatal to the operation that raised it; nothing is
/// retried and no partially built network is ever returned.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A tag header carried a type code outside the known set.
    #[error("unknown tag type {type_code:#010x} at byte {offset}")]
    UnknownTagType { type_code: u32, offset: usize },

    /// A tag header or payload runs past the end of the input.
    #[error("truncated tag at byte {offset}: needs {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// A tag is structurally invalid (odd dict, bad scalar length, bad utf-8).
    #[error("malformed tag at byte {offset}: {reason}")]
    MalformedTag { offset: usize, reason: String },

    /// A dict lacks a key the reader requires.
    #[error("missing key '{key}'")]
    MissingKey { key: String },

    /// A value has a different tag type than the reader expects.
    #[error("wrong tag type for '{key}': expected {expected}, got {got}")]
    WrongTagType {
        key: String,
        expected: &'static str,
        got: &'static str,
    },

    /// A layer dict names a class with no corresponding layer kind.
    #[error("unknown layer class '{class}'")]
    UnknownLayerClass { class: String },

    /// Two shapes that must agree do not.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Dimensions, got: Dimensions },

    /// An operation requires a specific rank.
    #[error("rank mismatch: expected rank {expected}, got {got}")]
    RankMismatch { expected: usize, got: usize },

    /// An index lies outside the dimension it addresses.
    #[error("index {index} out of range for dimension {dim} of size {size}")]
    IndexOutOfRange {
        dim: usize,
        index: usize,
        size: usize,
    },

    /// Matrix multiplication operands do not line up.
    #[error("gemm shape mismatch: [{m}x{k1}] @ [{k2}x{n}]")]
    MatmulShapeMismatch {
        m: usize,
        k1: usize,
        k2: usize,
        n: usize,
    },

    /// Reshape target has a different element count.
    #[error("cannot reshape: source has {src} elements, target {dst_dims} has {dst}")]
    ReshapeElementMismatch {
        src: usize,
        dst: usize,
        dst_dims: Dimensions,
    },

    /// The operation needs densely packed row-major data.
    #[error("buffer '{name}' is not compact in memory")]
    NotCompact { name: String },

    /// Bit depth outside {8, 16, 32}.
    #[error("unsupported precision: {bits} bits per element")]
    UnsupportedPrecision { bits: u32 },

    /// The parallel compute substrate failed.
    #[error("compute substrate error: {0}")]
    Substrate(String),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    pub fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Error::MalformedTag {
            offset,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownTagType { .. }
            | Error::Truncated { .. }
            | Error::MalformedTag { .. }
            | Error::MissingKey { .. }
            | Error::WrongTagType { .. }
            | Error::UnknownLayerClass { .. } => ErrorKind::Decode,
            Error::ShapeMismatch { .. }
            | Error::RankMismatch { .. }
            | Error::IndexOutOfRange { .. }
            | Error::MatmulShapeMismatch { .. }
            | Error::ReshapeElementMismatch { .. }
            | Error::NotCompact { .. } => ErrorKind::Shape,
            Error::UnsupportedPrecision { .. } => ErrorKind::Precision,
            Error::Substrate(_) => ErrorKind::Backend,
            Error::Msg(_) => ErrorKind::Shape,
        }
    }
}

/// Convenience Result type used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Early return with a formatted [`Error::Msg`].
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
