//! OpenFlow header framing
//!
//! Every message starts with a fixed header:
//! ```text
//! [ version: u8 ][ type: u8 ][ length: u16 BE ][ xid: u32 BE ][ body ... ]
//! ```
//!
//! `length` counts the whole message, header included. Datagram transports
//! use [`check_datagram`] (one datagram is one message or garbage); byte
//! stream transports accumulate into a [`FrameDecoder`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::{MAX_MESSAGE_SIZE, OFP_HEADER_LEN};

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Message too large: {0} bytes (max: {MAX_MESSAGE_SIZE})")]
    MessageTooLarge(usize),

    #[error("Declared message length {0} is shorter than the {OFP_HEADER_LEN}-byte header")]
    InvalidLength(u16),
}

/// Fixed-size message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfpHeader {
    pub version: u8,
    pub msg_type: u8,
    pub length: u16,
    pub xid: u32,
}

impl OfpHeader {
    /// Parse the header at the start of `bytes`, or `None` if too short
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < OFP_HEADER_LEN {
            return None;
        }
        let mut buf = &bytes[..OFP_HEADER_LEN];
        Some(OfpHeader {
            version: buf.get_u8(),
            msg_type: buf.get_u8(),
            length: buf.get_u16(),
            xid: buf.get_u32(),
        })
    }

    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        buf.put_u8(self.msg_type);
        buf.put_u16(self.length);
        buf.put_u32(self.xid);
    }
}

/// Build a complete message from its header fields and body
pub fn encode_message(
    version: u8,
    msg_type: u8,
    xid: u32,
    body: &[u8],
) -> Result<Bytes, CodecError> {
    let total = OFP_HEADER_LEN + body.len();
    if total > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge(total));
    }

    let mut buf = BytesMut::with_capacity(total);
    OfpHeader {
        version,
        msg_type,
        length: total as u16,
        xid,
    }
    .write_to(&mut buf);
    buf.put_slice(body);

    Ok(buf.freeze())
}

/// Result of reconciling a datagram with the length its header declares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramCheck {
    /// The message occupies the first `len` bytes; anything after is padding
    Complete { len: usize },
    /// Not even a header arrived
    TooShort { received: usize },
    /// Header claims more bytes than the datagram carried
    Truncated { declared: usize, received: usize },
    /// Header claims fewer bytes than the header itself
    Undersized { declared: usize },
}

/// Reconcile a received datagram with its header.
///
/// A datagram is atomic, so a message claiming more bytes than arrived can
/// never be completed by a later read.
pub fn check_datagram(datagram: &[u8]) -> DatagramCheck {
    let received = datagram.len();
    let header = match OfpHeader::parse(datagram) {
        Some(h) => h,
        None => return DatagramCheck::TooShort { received },
    };

    let declared = header.length as usize;
    if declared < OFP_HEADER_LEN {
        DatagramCheck::Undersized { declared }
    } else if declared > received {
        DatagramCheck::Truncated { declared, received }
    } else {
        DatagramCheck::Complete { len: declared }
    }
}

/// Reassembles messages from a byte stream
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Partial frame data being accumulated
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to split the next complete message off the buffer
    ///
    /// Returns:
    /// - `Ok(Some(msg))` if a complete message was available
    /// - `Ok(None)` if more bytes are needed
    /// - `Err(...)` if the header is unusable, which a byte stream cannot recover from
    pub fn decode_next(&mut self) -> Result<Option<Bytes>, CodecError> {
        let header = match OfpHeader::parse(&self.buffer) {
            Some(h) => h,
            None => return Ok(None),
        };

        let declared = header.length as usize;
        if declared < OFP_HEADER_LEN {
            return Err(CodecError::InvalidLength(header.length));
        }
        if self.buffer.len() < declared {
            return Ok(None);
        }

        Ok(Some(self.buffer.split_to(declared).freeze()))
    }

    /// Number of buffered bytes not yet returned as a message
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg_type;

    fn echo_request(xid: u32, body: &[u8]) -> Bytes {
        encode_message(0x04, msg_type::ECHO_REQUEST, xid, body).expect("encode failed")
    }

    #[test]
    fn test_encode_header_fields() {
        let msg = echo_request(0xdead_beef, b"ping");
        assert_eq!(msg.len(), 12);

        let header = OfpHeader::parse(&msg).expect("header");
        assert_eq!(header.version, 0x04);
        assert_eq!(header.msg_type, msg_type::ECHO_REQUEST);
        assert_eq!(header.length, 12);
        assert_eq!(header.xid, 0xdead_beef);
        assert_eq!(&msg[8..], b"ping");
    }

    #[test]
    fn test_encode_too_large() {
        let body = vec![0u8; MAX_MESSAGE_SIZE];
        let result = encode_message(0x04, msg_type::HELLO, 1, &body);
        assert_eq!(result, Err(CodecError::MessageTooLarge(MAX_MESSAGE_SIZE + OFP_HEADER_LEN)));
    }

    #[test]
    fn test_check_complete_datagram() {
        let msg = echo_request(1, b"abc");
        assert_eq!(check_datagram(&msg), DatagramCheck::Complete { len: 11 });
    }

    #[test]
    fn test_check_padded_datagram() {
        let mut padded = echo_request(1, b"abc").to_vec();
        padded.extend_from_slice(&[0u8; 5]);
        assert_eq!(check_datagram(&padded), DatagramCheck::Complete { len: 11 });
    }

    #[test]
    fn test_check_truncated_datagram() {
        let msg = echo_request(1, b"abcdef");
        assert_eq!(
            check_datagram(&msg[..10]),
            DatagramCheck::Truncated {
                declared: 14,
                received: 10
            }
        );
    }

    #[test]
    fn test_check_short_and_undersized() {
        assert_eq!(check_datagram(&[0x04, 0x00, 0x00]), DatagramCheck::TooShort { received: 3 });

        let bogus = [0x04, 0x00, 0x00, 0x04, 0, 0, 0, 1];
        assert_eq!(check_datagram(&bogus), DatagramCheck::Undersized { declared: 4 });
    }

    #[test]
    fn test_frame_decoder_partial() {
        let msg = echo_request(7, b"hello");
        let mut decoder = FrameDecoder::new();

        // Feed data in chunks
        decoder.extend(&msg[..5]);
        assert!(decoder.decode_next().expect("decode error").is_none());

        decoder.extend(&msg[5..]);
        let decoded = decoder
            .decode_next()
            .expect("decode error")
            .expect("should have message");
        assert_eq!(decoded, msg);
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_frame_decoder_multiple_frames() {
        let first = echo_request(1, b"one");
        let second = echo_request(2, b"two");

        let mut decoder = FrameDecoder::new();
        decoder.extend(&first);
        decoder.extend(&second);

        assert_eq!(decoder.decode_next().expect("decode error"), Some(first));
        assert_eq!(decoder.decode_next().expect("decode error"), Some(second));
        assert!(decoder.decode_next().expect("decode error").is_none());
    }

    #[test]
    fn test_frame_decoder_invalid_length() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0x04, 0x00, 0x00, 0x02, 0, 0, 0, 0]);
        assert_eq!(decoder.decode_next(), Err(CodecError::InvalidLength(2)));
    }
}
