use crate::online::{ErrorCode, OnlineError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Punctured-set query: one membership bit and one offset per chunk.
///
/// Bit `c` of `mask` set means chunk `c` belongs to the left side. Both sides
/// share the same per-chunk offset vector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuncturedQuery {
    pub mask: Vec<u8>,
    pub offsets: Vec<u32>,
}

impl PuncturedQuery {
    /// Number of chunks assigned to the left side.
    pub fn left_len(&self, num_chunks: usize) -> usize {
        (0..num_chunks).filter(|&c| bit_is_set(&self.mask, c)).count()
    }
}

/// Server reply to a punctured query: XOR parities of both sides.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parities {
    pub left: Vec<u8>,
    pub right: Vec<u8>,
}

/// Server-side change notification: `delta = old ^ new` at `index`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryUpdate {
    pub index: u64,
    pub delta: Vec<u8>,
}

/// Errors from parameter derivation and validation.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("database must contain at least one entry")]
    EmptyDatabase,
    #[error("entry size must be greater than 0")]
    ZeroEntrySize,
    #[error("security parameter must be greater than 0")]
    ZeroSecurityParam,
    #[error("query budget must be greater than 0")]
    ZeroQueryBudget,
    #[error("query budget {budget} must be below backup hint count {backups}")]
    BudgetExceedsBackups { budget: u64, backups: u64 },
    #[error("invalid chunk geometry: {0}")]
    InvalidGeometry(&'static str),
    #[error("hint count {0} exceeds the hint id space")]
    TooManyHints(u64),
    #[error("parameter overflow")]
    Overflow,
}

/// Unrecoverable protocol failures. A session that hits one must be discarded.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ProtocolAbort {
    #[error("no primary hint covers index {index}")]
    HintNotFound { index: u64 },
    #[error("backup hints exhausted")]
    BackupExhausted,
    #[error("punctured sides differ in size: left {left}, right {right}")]
    SetSizeMismatch { left: u64, right: u64 },
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("amendment value for index {index} is not cached")]
    UnresolvedAmendment { index: u64 },
    #[error("server rejected request ({code:?}): {message}")]
    Rejected { code: ErrorCode, message: String },
}

/// Errors returned by the server when streaming, answering, or updating.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Abort(#[from] ProtocolAbort),
    #[error("index {index} out of range [0, {num_entries})")]
    IndexOutOfRange { index: u64, num_entries: u64 },
    #[error("chunk range {first}+{count} out of range")]
    ChunkOutOfRange { first: u64, count: u64 },
    #[error("offset {offset} out of range for chunk {chunk}")]
    OffsetOutOfRange { chunk: u64, offset: u64 },
    #[error("entry size mismatch: expected {expected}, got {got}")]
    EntrySizeMismatch { expected: usize, got: usize },
    #[error("database does not match params: {0}")]
    ParamsMismatch(String),
    #[error("database is read-only")]
    ReadOnly,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors encountered on the client side.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("protocol abort: {0}")]
    Abort(#[from] ProtocolAbort),
    #[error("index {index} out of range [0, {num_entries})")]
    InvalidIndex { index: u64, num_entries: u64 },
    #[error("entry size mismatch: expected {expected}, got {got}")]
    EntrySizeMismatch { expected: usize, got: usize },
    #[error("exchange failed: {0}")]
    Exchange(#[from] OnlineError),
    #[error("session aborted earlier; start a new session")]
    Poisoned,
}

impl ClientError {
    /// True for failures that leave the session unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Abort(_) | ClientError::Exchange(_) | ClientError::Poisoned
        )
    }
}

/// Bytes needed for a bitmask over `bits` chunks.
#[inline]
pub fn bitmask_len(bits: usize) -> usize {
    bits.div_ceil(8)
}

#[inline]
pub fn set_bit(mask: &mut [u8], bit: usize) {
    mask[bit / 8] |= 1u8 << (bit % 8);
}

#[inline]
pub fn bit_is_set(mask: &[u8], bit: usize) -> bool {
    mask.get(bit / 8).is_some_and(|b| (b >> (bit % 8)) & 1 == 1)
}

/// True when any bit at position `>= bits` is set.
pub fn has_trailing_bits(mask: &[u8], bits: usize) -> bool {
    (bits..mask.len() * 8).any(|b| bit_is_set(mask, b))
}
