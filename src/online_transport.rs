use crate::online::{Exchange, OnlineError, Reply, Request};
use crate::online_framing::{try_read_frame, write_frame};
use serde::{de::DeserializeOwned, Serialize};
use std::io::{Read, Write};

/// Trait for sending and receiving bincode-serialized messages over a framed stream.
pub trait Transport {
    /// Serialize and send a value.
    fn send<T: Serialize>(&mut self, value: &T) -> Result<(), OnlineError>;
    /// Receive and deserialize a value.
    fn recv<T: DeserializeOwned>(&mut self) -> Result<T, OnlineError>;
}

/// [`Transport`] implementation backed by a length-framed `Read + Write` stream.
pub struct FramedIo<RW> {
    inner: RW,
}

impl<RW> FramedIo<RW> {
    /// Wrap a stream.
    pub fn new(inner: RW) -> Self {
        Self { inner }
    }

    /// Unwrap the inner stream.
    pub fn into_inner(self) -> RW {
        self.inner
    }
}

impl<RW: Read + Write> Transport for FramedIo<RW> {
    fn send<T: Serialize>(&mut self, value: &T) -> Result<(), OnlineError> {
        let bytes = bincode::serialize(value).map_err(|e| {
            log::debug!("transport serialize error: {}", e);
            OnlineError::Encode
        })?;
        write_frame(&mut self.inner, &bytes).map_err(|e| {
            log::debug!("transport write error: {}", e);
            OnlineError::Encode
        })
    }

    fn recv<T: DeserializeOwned>(&mut self) -> Result<T, OnlineError> {
        let bytes = try_read_frame(&mut self.inner)
            .map_err(|e| {
                log::debug!("transport read error: {}", e);
                OnlineError::Decode
            })?
            .ok_or(OnlineError::Closed)?;
        bincode::deserialize(&bytes).map_err(|e| {
            log::debug!("transport deserialize error: {}", e);
            OnlineError::Decode
        })
    }
}

/// A framed stream acts as the client side of a request/reply exchange.
impl<RW: Read + Write> Exchange for FramedIo<RW> {
    fn exchange(&mut self, request: Request) -> Result<Reply, OnlineError> {
        self.send(&request)?;
        self.recv()
    }
}
