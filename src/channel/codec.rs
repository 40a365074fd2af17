//! NDJSON line codec for agent byte streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a fixed maximum line length
//! to prevent memory exhaustion caused by unterminated or maliciously large
//! messages from a misbehaving agent process.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};
use tracing::warn;

use crate::{ClientError, Result};

/// Maximum line length accepted by the codec: 1 MiB.
///
/// An inbound line exceeding this limit is discarded through its terminating
/// newline and logged; decoding resumes with the following line. The limit
/// bounds memory for a single message without ending the stream.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Line codec for bidirectional agent streams.
///
/// Delegates framing to [`LinesCodec`] with the [`MAX_LINE_BYTES`] limit.
/// Each newline-terminated (`\n`) UTF-8 string is one complete protocol
/// message.
#[derive(Debug)]
pub struct LineCodec(LinesCodec);

impl LineCodec {
    /// Create a new `LineCodec` with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = ClientError;

    /// Decode the next newline-terminated line from `src`.
    ///
    /// Returns `Ok(None)` when `src` contains no complete line yet. An
    /// oversized line is dropped here instead of surfacing an error:
    /// `FramedRead` treats any decoder error as terminal, so the skip must
    /// happen below it. `LinesCodec` discards to the next newline once its
    /// limit trips; polling it again resumes framing.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.0.decode(src) {
                Ok(item) => return Ok(item),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(limit = MAX_LINE_BYTES, "dropping oversized line");
                }
                Err(LinesCodecError::Io(err)) => return Err(ClientError::Io(err.to_string())),
            }
        }
    }

    /// Decode the final, possibly unterminated line at EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.0.decode_eof(src) {
                Ok(item) => return Ok(item),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(limit = MAX_LINE_BYTES, "dropping oversized line at EOF");
                }
                Err(LinesCodecError::Io(err)) => return Err(ClientError::Io(err.to_string())),
            }
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = ClientError;

    /// Encode `item` as a `\n`-terminated line into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Io`] on underlying I/O failures.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        // LinesCodec::encode does not enforce a max line length;
        // the limit applies only to decoding.
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

/// Map a [`LinesCodecError`] to a [`ClientError`].
fn map_codec_error(e: LinesCodecError) -> ClientError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            ClientError::Protocol(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => ClientError::Io(io_err.to_string()),
    }
}
