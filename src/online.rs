use crate::messages::{ConfigError, Parities, PuncturedQuery};
use crate::params::Params;
use serde::{Deserialize, Serialize};

/// Parameters the server advertises to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub num_entries: u64,
    pub entry_size: usize,
    pub security_param: u32,
    pub query_budget: u64,
    pub chunk_size: u64,
    pub chunk_num: u64,
}

impl RunConfig {
    pub fn from_params(params: &Params) -> Self {
        Self {
            num_entries: params.num_entries,
            entry_size: params.entry_size,
            security_param: params.security_param,
            query_budget: params.query_budget,
            chunk_size: params.chunk_size,
            chunk_num: params.chunk_num,
        }
    }

    /// Rebuild the server's params and check the advertised geometry matches.
    pub fn to_params(&self) -> Result<Params, ConfigError> {
        let params = Params::new(self.num_entries, self.entry_size, self.security_param)?
            .with_query_budget(self.query_budget)?;
        if params.chunk_size != self.chunk_size || params.chunk_num != self.chunk_num {
            return Err(ConfigError::InvalidGeometry("server chunk geometry differs"));
        }
        Ok(params)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Describe,
    Stream { first_chunk: u64, num_chunks: u64 },
    Punctured(PuncturedQuery),
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    Describe(RunConfig),
    Chunks { first_chunk: u64, data: Vec<u8> },
    Parities(Parities),
    Empty,
    Error { code: ErrorCode, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Malformed,
    SetSizeMismatch,
    OutOfRange,
    Server,
}

#[derive(Debug, thiserror::Error)]
pub enum OnlineError {
    #[error("decode error")]
    Decode,
    #[error("encode error")]
    Encode,
    #[error("connection closed")]
    Closed,
    #[error("protocol mismatch")]
    Protocol,
    #[error("server error: {0}")]
    Server(String),
}

/// Ordered request/reply primitive between a client session and a server.
pub trait Exchange {
    fn exchange(&mut self, request: Request) -> Result<Reply, OnlineError>;
}

impl<E: Exchange + ?Sized> Exchange for &mut E {
    fn exchange(&mut self, request: Request) -> Result<Reply, OnlineError> {
        (**self).exchange(request)
    }
}
