//! Length-prefixed frame codec for the signaling wire.
//!
//! Each frame is a 4-byte big-endian unsigned length followed by that many
//! bytes of UTF-8 JSON. Framing and JSON decoding are deliberately split:
//! [`read_frame`] consumes exactly one frame's bytes, so a payload that turns
//! out to be malformed JSON costs one frame, never stream synchronisation.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use lancall_common::{Error, Result, SignalMessage};

/// Largest accepted frame payload. A declared length beyond this cannot be
/// resynchronised and tears the connection down.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Encode one message as a length-prefixed frame.
pub fn encode_frame(msg: &SignalMessage) -> Result<Bytes> {
    let json = msg.to_json()?;
    if json.len() > MAX_FRAME_BYTES {
        return Err(Error::protocol(format!(
            "outbound frame of {} bytes exceeds {MAX_FRAME_BYTES}",
            json.len()
        )));
    }
    let mut buf = BytesMut::with_capacity(4 + json.len());
    buf.put_u32(json.len() as u32);
    buf.put_slice(json.as_bytes());
    Ok(buf.freeze())
}

/// Read exactly one frame payload.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary. EOF inside the
/// length header or the payload is an [`Error::Io`]; a declared length above
/// [`MAX_FRAME_BYTES`] is a fatal [`Error::Protocol`]. Never yields a
/// partial frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer disconnected inside length header",
            )));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(Error::protocol(format!(
            "declared frame length {len} exceeds {MAX_FRAME_BYTES}"
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(|_| {
        Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "peer disconnected inside frame payload",
        ))
    })?;
    Ok(Some(Bytes::from(payload)))
}
