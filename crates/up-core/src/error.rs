//! Error types for the unpsp package unpacker

use thiserror::Error;

/// Main error type for package extraction
///
/// None of these are process-fatal: a failure aborts the current item or
/// package and the caller decides whether to continue with the next one.
#[derive(Error, Debug)]
pub enum UnpackError {
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Range decode error: {0}")]
    RangeDecode(#[from] RangeDecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Extraction cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),
}

/// Container layout errors (bad magic, broken size invariants, unsupported variants)
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Invalid {structure} magic: 0x{found:08x}")]
    BadMagic { structure: &'static str, found: u32 },

    #[error("File too small: {what} needs {needed} bytes, have {available}")]
    TooSmall {
        what: &'static str,
        needed: u64,
        available: u64,
    },

    #[error("Unsupported content type 0x{0:x}")]
    UnsupportedContentType(u32),

    #[error("Unsupported key type 0x{0:x}")]
    UnsupportedKeyType(u8),

    #[error("Unsupported EDAT: {0}")]
    UnsupportedEdat(String),

    #[error("Unsupported PSAR block size {0} (max 16 sectors)")]
    UnsupportedBlockSize(u32),

    #[error("Corrupted package: {0}")]
    Corrupted(String),

    #[error("Encrypted length {0} is not a multiple of 16")]
    UnalignedLength(usize),
}

/// LZRC block decoding errors, fatal to the current item only
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeDecodeError {
    #[error("Truncated input: need {needed} bytes, have {available}")]
    TruncatedInput { needed: usize, available: usize },

    #[error("Output overflow at {position} (buffer holds {capacity})")]
    OutputOverflow { position: usize, capacity: usize },

    #[error("Match distance {distance} exceeds {produced} decoded bytes")]
    DistanceOutOfRange { distance: usize, produced: usize },

    #[error("Decompressed {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// Result type alias for unpacker operations
pub type Result<T> = std::result::Result<T, UnpackError>;
