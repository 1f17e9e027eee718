use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;

/// Maximum allowed frame payload (10 MiB).
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    /// EOF on the length prefix: the peer closed the pipe cleanly.
    #[error("peer closed the pipe")]
    Closed,

    #[error("received zero-length frame")]
    ZeroLength,

    #[error("frame too large: {0} bytes (max {MAX_MESSAGE_SIZE})")]
    TooLarge(usize),

    /// EOF in the middle of a payload: the peer died mid-write.
    #[error("truncated frame: {0}")]
    Truncated(std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// True only for a clean close (EOF before any frame bytes).
    pub fn is_clean_close(&self) -> bool {
        matches!(self, CodecError::Closed)
    }
}

/// Writes length-prefixed frames: `[4-byte big-endian length][payload]`.
///
/// Writes are serialized by an internal mutex and flushed per frame so
/// frames from concurrent tasks cannot interleave.
pub struct FrameWriter<W> {
    inner: Mutex<BufWriter<W>>,
}

impl<W: AsyncWrite + Unpin + Send> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(BufWriter::new(writer)),
        }
    }

    pub async fn write_frame(&self, payload: &[u8]) -> Result<(), CodecError> {
        if payload.is_empty() {
            return Err(CodecError::ZeroLength);
        }
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(CodecError::TooLarge(payload.len()));
        }

        let mut writer = self.inner.lock().await;
        writer.write_u32(payload.len() as u32).await?;
        writer.write_all(payload).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Reads length-prefixed frames written by [`FrameWriter`].
pub struct FrameReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin + Send> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
        }
    }

    /// Reads the next frame payload. `CodecError::Closed` means the peer
    /// shut down cleanly; any other error is a transport fault.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = match self.inner.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(CodecError::Closed)
            }
            Err(e) => return Err(CodecError::Io(e)),
        };

        if len == 0 {
            return Err(CodecError::ZeroLength);
        }
        if len > MAX_MESSAGE_SIZE {
            return Err(CodecError::TooLarge(len));
        }

        let mut payload = vec![0u8; len];
        self.inner.read_exact(&mut payload).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                CodecError::Truncated(e)
            } else {
                CodecError::Io(e)
            }
        })?;

        Ok(payload)
    }
}
