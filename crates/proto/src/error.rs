/// Everything that can go wrong on a [`crate::Channel`].
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// I/O failure on the stream; retried while the attempt budget lasts.
    #[error("i/o failure on the wire")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream before a full frame arrived.
    #[error("connection closed before the full frame arrived")]
    ConnectionClosed,

    /// A frame announced an unusable length.
    #[error("invalid frame length {0}")]
    InvalidLength(u32),

    /// The acknowledgement token was neither `ACK` nor `NACK`.
    #[error("invalid acknowledgement token")]
    InvalidAck,

    /// The receiver refused the frame more times than the retransmit cap.
    #[error("receiver kept refusing the frame")]
    NegativeAck,

    /// A frame could not be decoded as an envelope.
    #[error("frame is not a valid message envelope")]
    BadEnvelope(#[source] serde_json::Error),

    /// A file payload was not valid base64.
    #[error("file payload is not valid base64")]
    BadFileEncoding(#[source] base64::DecodeError),

    /// All send attempts were used up.
    #[error("send failed after {attempts} attempts")]
    SendExhausted {
        /// Local failures counted before giving up.
        attempts: u32,
        /// The failure observed on the last attempt.
        #[source]
        last: Box<ProtoError>,
    },

    /// All receive attempts were used up.
    #[error("receive failed after {attempts} attempts")]
    RecvExhausted {
        /// Failures counted before giving up.
        attempts: u32,
        /// The failure observed on the last attempt.
        #[source]
        last: Box<ProtoError>,
    },

    /// The dialog partners disagree about the next topic; fatal.
    #[error("out of sync: expected `{expected}`, got `{actual}`")]
    OutOfSync {
        /// Topic this side was waiting for.
        expected: String,
        /// Topic that actually arrived.
        actual: String,
    },

    /// A `Processed Data` payload was not valid JSON; fatal, not retried.
    #[error("could not decode result payload as JSON")]
    DecodePayloadFailed(#[source] serde_json::Error),
}

impl ProtoError {
    /// True when the error means the peer is gone rather than confused.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ProtoError::ConnectionClosed)
            || matches!(self,
                ProtoError::SendExhausted { last, .. }
                | ProtoError::RecvExhausted { last, .. }
                    if last.is_disconnect())
    }
}
