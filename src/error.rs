use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Scan and upgrade failures.
///
/// Fatal variants (`UnknownVersion`, `CorruptHeader`) abort the whole scan.
/// The record/segment/page-scoped variants are recoverable: the damaged unit
/// is skipped and the rest of the store is still processed.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    /// Store magic does not match the v10 constant.
    UnknownVersion(u64),
    /// The meta header failed its CRC check.
    CorruptHeader { expected: u32, actual: u32 },
    /// One table/segment meta record failed its CRC check.
    CorruptMetaRecord { code: u8, offset: u64 },
    /// A segment's trailing index block cannot be trusted.
    UnindexableSegment { segment: u32, reason: String },
    /// Unrecognized row tag while reading a leaf base block.
    MalformedPage { pid: u32, tag: u8 },
    /// Unrecognized op tag while replaying a delta run.
    MalformedDelta { pid: u32, tag: u8 },
    /// A table's serialized schema could not be decoded.
    SchemaDecode(String),
    /// A typed accessor was called on a column of a different type.
    TypeMismatch { column: String, requested: &'static str },
    /// A column index past the end of the schema.
    NoSuchColumn(usize),
    /// A string/blob value whose stored length carries the large-blob flag.
    OversizedBlob { offset: u16, length: u16 },
    /// A string column holding bytes that are not valid UTF-8.
    InvalidString { column: String },
    /// A read ran past the end of its bounded range.
    TruncatedRead { position: u64, wanted: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::UnknownVersion(magic) => {
                write!(f, "Unknown store version: magic 0x{:016x}", magic)
            }
            Error::CorruptHeader { expected, actual } => {
                write!(
                    f,
                    "Meta header CRC mismatch: expected 0x{:08x}, found 0x{:08x}",
                    expected, actual
                )
            }
            Error::CorruptMetaRecord { code, offset } => {
                write!(
                    f,
                    "Meta record CRC mismatch: code 0x{:02x} at offset {}",
                    code, offset
                )
            }
            Error::UnindexableSegment { segment, reason } => {
                write!(f, "Unindexable segment {}: {}", segment, reason)
            }
            Error::MalformedPage { pid, tag } => {
                write!(f, "Malformed page {}: unrecognized row tag 0x{:02x}", pid, tag)
            }
            Error::MalformedDelta { pid, tag } => {
                write!(f, "Malformed delta for page {}: unrecognized op tag 0x{:02x}", pid, tag)
            }
            Error::SchemaDecode(msg) => write!(f, "Schema decode error: {}", msg),
            Error::TypeMismatch { column, requested } => {
                write!(f, "Type mismatch: column {} does not support {}", column, requested)
            }
            Error::NoSuchColumn(index) => write!(f, "No column at index {}", index),
            Error::OversizedBlob { offset, length } => {
                write!(
                    f,
                    "Oversized blob value (offset {}, stored length 0x{:04x}) is not supported",
                    offset, length
                )
            }
            Error::InvalidString { column } => {
                write!(f, "Column {} holds invalid UTF-8", column)
            }
            Error::TruncatedRead { position, wanted } => {
                write!(f, "Truncated read: {} bytes wanted at position {}", wanted, position)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}
