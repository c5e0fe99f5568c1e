use crate::messages::{ProtocolAbort, ServerError};
use crate::online::{ErrorCode, Exchange, OnlineError, Reply, Request, RunConfig};
use crate::online_transport::Transport;
use crate::server::{Db, Server};

fn error_code(err: &ServerError) -> ErrorCode {
    match err {
        ServerError::Abort(ProtocolAbort::SetSizeMismatch { .. }) => ErrorCode::SetSizeMismatch,
        ServerError::Abort(_) => ErrorCode::Malformed,
        ServerError::IndexOutOfRange { .. }
        | ServerError::ChunkOutOfRange { .. }
        | ServerError::OffsetOutOfRange { .. } => ErrorCode::OutOfRange,
        _ => ErrorCode::Server,
    }
}

fn rejected(what: &str, err: ServerError) -> Reply {
    log::warn!("{} request failed: {}", what, err);
    Reply::Error { code: error_code(&err), message: err.to_string() }
}

/// Dispatch one request. Failures come back as `Reply::Error`; the server
/// keeps no per-client state.
pub fn handle_request<D: Db>(server: &Server<D>, request: Request) -> Reply {
    match request {
        Request::Describe => Reply::Describe(RunConfig::from_params(server.params())),
        Request::Stream { first_chunk, num_chunks } => match server.stream_chunks(first_chunk, num_chunks) {
            Ok(data) => Reply::Chunks { first_chunk, data },
            Err(err) => rejected("stream", err),
        },
        Request::Punctured(query) => match server.answer(&query) {
            Ok(parities) => Reply::Parities(parities),
            Err(err) => rejected("punctured", err),
        },
        Request::Empty => Reply::Empty,
    }
}

/// In-process exchange: a client can talk to a server directly.
impl<D: Db> Exchange for Server<D> {
    fn exchange(&mut self, request: Request) -> Result<Reply, OnlineError> {
        Ok(handle_request(self, request))
    }
}

/// Answer requests from `transport` until the peer hangs up. Returns the
/// number of requests served.
pub fn serve<T: Transport, D: Db>(transport: &mut T, server: &Server<D>) -> Result<u64, OnlineError> {
    let mut served = 0u64;
    loop {
        let request: Request = match transport.recv() {
            Ok(request) => request,
            Err(OnlineError::Closed) => {
                log::debug!("peer closed after {} requests", served);
                return Ok(served);
            }
            Err(err) => return Err(err),
        };
        let reply = handle_request(server, request);
        transport.send(&reply)?;
        served += 1;
    }
}
