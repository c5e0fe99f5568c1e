use std::io::{self, Read, Write};

/// Largest frame accepted in either direction.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

pub fn write_frame<W: Write>(mut writer: W, payload: &[u8]) -> io::Result<()> {
    if payload.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "payload size must be > 0",
        ));
    }
    if payload.len() > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("payload size {} exceeds maximum {}", payload.len(), MAX_FRAME_SIZE),
        ));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}

pub fn read_frame<R: Read>(reader: R) -> io::Result<Vec<u8>> {
    try_read_frame(reader)?
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "stream ended before frame"))
}

/// Like [`read_frame`], but a stream that ends cleanly before the next length
/// header yields `Ok(None)`. EOF anywhere inside a frame is `UnexpectedEof`.
pub fn try_read_frame<R: Read>(mut reader: R) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match reader.read(&mut len_buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated frame header"));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame size must be > 0"));
    }
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame size {} exceeds maximum {}", len, MAX_FRAME_SIZE),
        ));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Some(payload))
}
