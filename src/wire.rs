//! JSON framing for the two transports.
//!
//! Loopback TCP channels carry one unframed document per connection: the
//! client writes the whole body and closes, the server reads until EOF.
//! The native-messaging pipe uses a 4-byte native-endian length prefix
//! followed by the UTF-8 JSON body.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

/// Largest message the browser accepts from a native host.
pub const MAX_OUTBOUND_FRAME: usize = 1024 * 1024;
/// Largest message the browser will send to a native host.
pub const MAX_INBOUND_FRAME: usize = 64 * 1024 * 1024;

const HEADER_LEN: usize = 4;

/// Pause after a failed accept, so errors like EMFILE do not spin a loop.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("truncated frame header: got {got} of 4 bytes")]
    TruncatedHeader { got: usize },
    #[error("truncated frame body: expected {expected} bytes, got {got}")]
    TruncatedBody { expected: usize, got: usize },
    #[error("frame of {len} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { len: usize, limit: usize },
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("failed to encode document: {0}")]
    Encode(serde_json::Error),
    #[error("outbound frame of {len} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { len: usize, limit: usize },
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl WireError {
    /// True when the peer was simply not listening.
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, WireError::Io(e) if e.kind() == io::ErrorKind::ConnectionRefused)
    }
}

pub fn encode<T: Serialize + ?Sized>(doc: &T) -> Result<Vec<u8>, WireError> {
    serde_json::to_vec(doc).map_err(WireError::Encode)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    Ok(serde_json::from_slice(bytes)?)
}

pub fn encode_frame<T: Serialize + ?Sized>(doc: &T) -> Result<Vec<u8>, WireError> {
    let body = encode(doc)?;
    if body.len() > MAX_OUTBOUND_FRAME {
        return Err(WireError::FrameTooLarge {
            len: body.len(),
            limit: MAX_OUTBOUND_FRAME,
        });
    }
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_ne_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode one frame from the front of `bytes`, returning the document and
/// the number of bytes consumed.
pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> Result<(T, usize), DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::TruncatedHeader { got: bytes.len() });
    }
    let len = frame_len(&bytes[..HEADER_LEN])?;
    let body = &bytes[HEADER_LEN..];
    if body.len() < len {
        return Err(DecodeError::TruncatedBody {
            expected: len,
            got: body.len(),
        });
    }
    let doc = decode(&body[..len])?;
    Ok((doc, HEADER_LEN + len))
}

fn frame_len(header: &[u8]) -> Result<usize, DecodeError> {
    let mut raw = [0u8; HEADER_LEN];
    raw.copy_from_slice(header);
    let len = u32::from_ne_bytes(raw) as usize;
    if len > MAX_INBOUND_FRAME {
        return Err(DecodeError::FrameTooLarge {
            len,
            limit: MAX_INBOUND_FRAME,
        });
    }
    Ok(len)
}

/// Read one frame body. `Ok(None)` means the pipe closed cleanly between
/// frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let got = read_full(reader, &mut header).await?;
    if got == 0 {
        return Ok(None);
    }
    if got < HEADER_LEN {
        return Err(DecodeError::TruncatedHeader { got }.into());
    }

    let len = frame_len(&header)?;
    let mut body = vec![0u8; len];
    let got = read_full(reader, &mut body).await?;
    if got < len {
        return Err(DecodeError::TruncatedBody { expected: len, got }.into());
    }
    Ok(Some(body))
}

pub async fn write_frame<W, T>(writer: &mut W, doc: &T) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let frame = encode_frame(doc)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Fill `buf` as far as the stream allows, returning how many bytes landed.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Open a fresh connection, write the document, and close.
pub async fn send_document<T>(addr: SocketAddr, doc: &T) -> Result<(), WireError>
where
    T: Serialize + ?Sized,
{
    let body = encode(doc)?;
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(&body).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Read an unframed document until the peer closes.
///
/// There is no read deadline: a peer that never closes keeps this pending.
pub async fn read_document<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

/// Retry `accept` until it yields a connection, logging each failure and
/// waiting [`ACCEPT_BACKOFF`] before the next attempt.
pub async fn accept_with_backoff<F, Fut, T>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(conn) => return conn,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Bind a listener with SO_REUSEADDR so a quick restart does not trip over
/// a socket still in TIME_WAIT.
pub fn bind_reusable(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(128)
}
