//! Client-side reply checks. Any reply of the wrong shape is a protocol abort.

use crate::messages::{ClientError, Parities, ProtocolAbort};
use crate::online::{Exchange, Reply, Request};
use crate::params::Params;

fn unexpected(expected: &str, reply: &Reply) -> ProtocolAbort {
    match reply {
        Reply::Error { code, message } => ProtocolAbort::Rejected {
            code: *code,
            message: message.clone(),
        },
        other => ProtocolAbort::MalformedPayload(format!(
            "expected {} reply, got {}",
            expected,
            reply_name(other)
        )),
    }
}

fn reply_name(reply: &Reply) -> &'static str {
    match reply {
        Reply::Describe(_) => "describe",
        Reply::Chunks { .. } => "chunks",
        Reply::Parities(_) => "parities",
        Reply::Empty => "empty",
        Reply::Error { .. } => "error",
    }
}

/// Unwrap a chunk batch, checking it holds exactly `num_chunks` chunks.
pub fn expect_chunks(
    reply: Reply,
    params: &Params,
    first_chunk: u64,
    num_chunks: u64,
) -> Result<Vec<u8>, ProtocolAbort> {
    match reply {
        Reply::Chunks { first_chunk: got, data } => {
            let expected_len = num_chunks as usize * params.chunk_size as usize * params.entry_size;
            if got != first_chunk {
                return Err(ProtocolAbort::MalformedPayload(format!(
                    "expected chunk batch at {}, got {}",
                    first_chunk, got
                )));
            }
            if data.len() != expected_len {
                return Err(ProtocolAbort::MalformedPayload(format!(
                    "chunk batch of {} bytes, expected {}",
                    data.len(),
                    expected_len
                )));
            }
            Ok(data)
        }
        other => Err(unexpected("chunks", &other)),
    }
}

/// Unwrap the two side parities of a punctured-query reply.
pub fn expect_parities(reply: Reply, entry_size: usize) -> Result<Parities, ProtocolAbort> {
    match reply {
        Reply::Parities(parities) => {
            if parities.left.len() != entry_size || parities.right.len() != entry_size {
                return Err(ProtocolAbort::MalformedPayload(format!(
                    "parity lengths {}/{}, expected {}",
                    parities.left.len(),
                    parities.right.len(),
                    entry_size
                )));
            }
            Ok(parities)
        }
        other => Err(unexpected("parities", &other)),
    }
}

pub fn expect_empty(reply: Reply) -> Result<(), ProtocolAbort> {
    match reply {
        Reply::Empty => Ok(()),
        other => Err(unexpected("empty", &other)),
    }
}

/// Ask the server for the params it serves under.
pub fn fetch_params<E: Exchange + ?Sized>(exchange: &mut E) -> Result<Params, ClientError> {
    match exchange.exchange(Request::Describe)? {
        Reply::Describe(cfg) => Ok(cfg.to_params()?),
        other => Err(unexpected("describe", &other).into()),
    }
}
