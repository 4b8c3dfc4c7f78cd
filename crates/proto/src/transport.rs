use std::path::Path;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::envelope::{Envelope, FilePayload, wall_timestamp};
use crate::error::ProtoError;

/// Local-failure budget for one send or receive (default).
pub const MAX_ATTEMPTS: u32 = 3;

/// Cap on retransmissions triggered by `NACK` for a single message.
///
/// `NACK` retries do not consume the local attempt budget; this bound
/// only prevents two confused endpoints from refusing each other
/// forever.
pub const NACK_RETRY_LIMIT: u32 = 64;

const ACK_TOKEN: [u8; 4] = *b"ACK\n";
const NACK_TOKEN: [u8; 4] = *b"NACK";

/// One half-duplex protocol endpoint over a stream transport.
///
/// The two endpoints must stay in phase: every frame written is
/// answered by exactly one 4-byte acknowledgement before the next frame
/// may cross the wire in either direction. A `Channel` must therefore
/// never be shared between concurrent dialogs.
pub struct Channel<S> {
    stream: S,
    max_attempts: u32,
    io_timeout: Option<Duration>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Channel<S> {
    /// Wrap a connected stream with default retry settings.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            max_attempts: MAX_ATTEMPTS,
            io_timeout: None,
        }
    }

    /// Override the local-failure budget per message.
    pub fn set_max_attempts(&mut self, max_attempts: u32) {
        self.max_attempts = max_attempts.max(1);
    }

    /// Bound every single read/write; `None` waits indefinitely.
    pub fn set_io_timeout(&mut self, io_timeout: Option<Duration>) {
        self.io_timeout = io_timeout;
    }

    /// Construct and send a message, waiting for the acknowledgement.
    ///
    /// When `file_path` is given the file is read and base64-encoded
    /// into the envelope under its bare file name.
    pub async fn send(
        &mut self,
        topic: &str,
        message: Option<&str>,
        file_path: Option<&Path>,
    ) -> Result<(), ProtoError> {
        let mut envelope = Envelope {
            topic: topic.to_string(),
            timestamp: wall_timestamp(),
            message: message.map(str::to_string),
            data: None,
        };

        if let Some(path) = file_path {
            let bytes = tokio::fs::read(path).await?;
            let filename = path
                .file_name()
                .ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("file path has no name: {}", path.display()),
                    )
                })?
                .to_string_lossy()
                .into_owned();
            envelope.data = Some(FilePayload {
                file: B64.encode(bytes),
                filename,
            });
        }

        self.send_envelope(&envelope).await
    }

    /// Send a prebuilt envelope, waiting for the acknowledgement.
    ///
    /// The envelope is encoded once; every retransmission (local retry
    /// or `NACK`) puts the identical bytes back on the wire.
    pub async fn send_envelope(&mut self, envelope: &Envelope) -> Result<(), ProtoError> {
        let payload = serde_json::to_vec(envelope).map_err(ProtoError::BadEnvelope)?;
        let size = u32::try_from(payload.len()).map_err(|_| ProtoError::InvalidLength(u32::MAX))?;
        if size == 0 {
            return Err(ProtoError::InvalidLength(0));
        }
        let header = size.to_be_bytes();

        let mut attempts = 0u32;
        let mut nack_count = 0u32;
        loop {
            let attempt = match self.write_frame(&header, &payload).await {
                Ok(()) => self.read_ack().await,
                Err(err) => Err(err),
            };

            let failure = match attempt {
                Ok(ack) if ack == ACK_TOKEN => return Ok(()),
                Ok(ack) if ack == NACK_TOKEN => {
                    // Receiver-caused: retransmit without touching the
                    // local attempt budget.
                    nack_count += 1;
                    if nack_count > NACK_RETRY_LIMIT {
                        return Err(ProtoError::SendExhausted {
                            attempts,
                            last: Box::new(ProtoError::NegativeAck),
                        });
                    }
                    continue;
                }
                Ok(_) => ProtoError::InvalidAck,
                Err(err @ ProtoError::ConnectionClosed) => return Err(err),
                Err(err) => err,
            };

            attempts += 1;
            if attempts >= self.max_attempts {
                return Err(ProtoError::SendExhausted {
                    attempts,
                    last: Box::new(failure),
                });
            }
        }
    }

    /// Receive one message and acknowledge it.
    ///
    /// When the envelope carries a file and `save_dir` is given, the
    /// file is decoded and written to `save_dir/filename` (directory
    /// created on demand) before the `ACK` goes out.
    pub async fn recv(&mut self, save_dir: Option<&Path>) -> Result<Envelope, ProtoError> {
        let mut attempts = 0u32;
        loop {
            let failure = match self.recv_once(save_dir).await {
                Ok(envelope) => {
                    self.write_all_timed(&ACK_TOKEN).await?;
                    return Ok(envelope);
                }
                Err(err @ ProtoError::ConnectionClosed) => return Err(err),
                Err(err) => err,
            };

            attempts += 1;
            if attempts >= self.max_attempts {
                return Err(ProtoError::RecvExhausted {
                    attempts,
                    last: Box::new(failure),
                });
            }

            self.write_all_timed(&NACK_TOKEN).await?;
            self.drain_pending().await;
        }
    }

    /// Receive one message and require its topic.
    ///
    /// A topic mismatch means the dialog partners disagree about where
    /// they are in the sequence; that is fatal for the dialog.
    pub async fn expect(
        &mut self,
        expected: &str,
        save_dir: Option<&Path>,
    ) -> Result<Envelope, ProtoError> {
        let envelope = self.recv(save_dir).await?;
        if envelope.topic != expected {
            return Err(ProtoError::OutOfSync {
                expected: expected.to_string(),
                actual: envelope.topic,
            });
        }
        Ok(envelope)
    }

    async fn recv_once(&mut self, save_dir: Option<&Path>) -> Result<Envelope, ProtoError> {
        let mut header = [0u8; 4];
        self.read_exact_timed(&mut header).await?;
        let size = u32::from_be_bytes(header);
        if size == 0 {
            return Err(ProtoError::InvalidLength(size));
        }

        let mut payload = vec![0u8; size as usize];
        self.read_exact_timed(&mut payload).await?;

        let envelope: Envelope =
            serde_json::from_slice(&payload).map_err(ProtoError::BadEnvelope)?;

        if let (Some(dir), Some(data)) = (save_dir, &envelope.data) {
            save_payload(dir, data).await?;
        }

        Ok(envelope)
    }

    async fn write_frame(&mut self, header: &[u8], payload: &[u8]) -> Result<(), ProtoError> {
        self.write_all_timed(header).await?;
        self.write_all_timed(payload).await
    }

    async fn read_ack(&mut self) -> Result<[u8; 4], ProtoError> {
        let mut ack = [0u8; 4];
        self.read_exact_timed(&mut ack).await?;
        Ok(ack)
    }

    async fn read_exact_timed(&mut self, buf: &mut [u8]) -> Result<(), ProtoError> {
        let res = match self.io_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.stream.read_exact(buf)).await {
                    Ok(res) => res,
                    Err(_) => {
                        return Err(ProtoError::Io(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "read timed out",
                        )));
                    }
                }
            }
            None => self.stream.read_exact(buf).await,
        };

        match res {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(ProtoError::ConnectionClosed)
            }
            Err(err) => Err(ProtoError::Io(err)),
        }
    }

    async fn write_all_timed(&mut self, buf: &[u8]) -> Result<(), ProtoError> {
        let res = match self.io_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.stream.write_all(buf)).await {
                    Ok(res) => res,
                    Err(_) => {
                        return Err(ProtoError::Io(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "write timed out",
                        )));
                    }
                }
            }
            None => self.stream.write_all(buf).await,
        };
        res?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Discard whatever the peer already buffered, without blocking.
    ///
    /// Called after a `NACK` so a half-read frame cannot be mistaken
    /// for the length prefix of the retransmission.
    async fn drain_pending(&mut self) {
        let mut scratch = [0u8; 4096];
        loop {
            match tokio::time::timeout(Duration::ZERO, self.stream.read(&mut scratch)).await {
                Ok(Ok(n)) if n > 0 => continue,
                _ => break,
            }
        }
    }
}

async fn save_payload(dir: &Path, data: &FilePayload) -> Result<(), ProtoError> {
    let bytes = B64
        .decode(data.file.as_bytes())
        .map_err(ProtoError::BadFileEncoding)?;

    // Strip any directory components a peer might smuggle in.
    let filename = Path::new(&data.filename).file_name().ok_or_else(|| {
        ProtoError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("unusable payload filename: {}", data.filename),
        ))
    })?;

    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join(filename), bytes).await?;
    Ok(())
}
