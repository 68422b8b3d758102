//! IRC line codec: frames a byte stream into [`Message`]s.
//!
//! Splits on `\n` (a preceding `\r` is stripped, so both CR-LF and bare LF
//! servers work), decodes lossily as UTF-8, and serializes outgoing
//! messages with `\r\n` termination.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::irc::{Message, ParseError};

/// Maximum buffered line length (including `\r\n`) before we give up on a peer.
/// RFC 1459 says 512 bytes; IRCv3 tags can push this to 8191.
pub const MAX_LINE_LENGTH: usize = 8191;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("line exceeds maximum length ({MAX_LINE_LENGTH} bytes)")]
    LineTooLong,
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IrcCodec;

impl Decoder for IrcCodec {
    type Item = Message;
    type Error = CodecError;

    /// A line that fails to parse is still consumed from `src`, so the
    /// caller may log the error and keep decoding.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(pos) = src.iter().position(|b| *b == b'\n') else {
            if src.len() > MAX_LINE_LENGTH {
                return Err(CodecError::LineTooLong);
            }
            return Ok(None);
        };

        let line = src.split_to(pos);
        src.advance(1);

        let text = String::from_utf8_lossy(&line);
        Ok(Some(Message::parse(&text)?))
    }
}

impl Encoder<Message> for IrcCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        <Self as Encoder<&Message>>::encode(self, &item, dst)
    }
}

impl<'a> Encoder<&'a Message> for IrcCodec {
    type Error = CodecError;

    fn encode(&mut self, item: &'a Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let wire = item.to_wire();
        dst.reserve(wire.len() + 2);
        dst.put_slice(wire.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
