// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Binary message framing.
//!
//! Every message on the socket starts with an 8-byte header:
//!
//! ```text
//! +------+------+-----------------+
//! | type | kind |   size (u32 LE) |
//! | 3 B  | 1 B  |   4 B           |
//! +------+------+-----------------+
//! ```
//!
//! `type` is one of `HEL`, `ACK`, `ERR`, `OPN`, `MSG`, `CLO`; `kind` is the
//! chunk type `F` (final), `C` (intermediate) or `A` (abort). The size
//! covers the whole frame, header included.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::TransportLimits;
use crate::error::{CodecError, UaError, UaResult};
use crate::types::StatusCode;

/// Size of the message header.
pub const HEADER_SIZE: usize = 8;

/// Protocol version sent in Hello.
pub const PROTOCOL_VERSION: u32 = 0;

// =============================================================================
// MessageType / ChunkType
// =============================================================================

/// Message type of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Hello.
    Hello,
    /// Acknowledge.
    Acknowledge,
    /// Transport error.
    Error,
    /// OpenSecureChannel.
    OpenSecureChannel,
    /// Secure message.
    Message,
    /// CloseSecureChannel.
    CloseSecureChannel,
}

impl MessageType {
    /// Returns the three ASCII bytes of the type.
    pub const fn as_bytes(&self) -> &'static [u8; 3] {
        match self {
            Self::Hello => b"HEL",
            Self::Acknowledge => b"ACK",
            Self::Error => b"ERR",
            Self::OpenSecureChannel => b"OPN",
            Self::Message => b"MSG",
            Self::CloseSecureChannel => b"CLO",
        }
    }

    /// Parses the three ASCII bytes of a type.
    pub fn from_bytes(bytes: [u8; 3]) -> UaResult<Self> {
        match &bytes {
            b"HEL" => Ok(Self::Hello),
            b"ACK" => Ok(Self::Acknowledge),
            b"ERR" => Ok(Self::Error),
            b"OPN" => Ok(Self::OpenSecureChannel),
            b"MSG" => Ok(Self::Message),
            b"CLO" => Ok(Self::CloseSecureChannel),
            _ => Err(CodecError::UnknownMessageType(bytes).into()),
        }
    }

    /// Returns `true` for messages that carry a secure channel id.
    #[inline]
    pub const fn is_secure(&self) -> bool {
        matches!(
            self,
            Self::OpenSecureChannel | Self::Message | Self::CloseSecureChannel
        )
    }
}

/// Chunk type of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkType {
    /// Last chunk of a message.
    Final,
    /// More chunks follow.
    Intermediate,
    /// The message is abandoned.
    Abort,
}

impl ChunkType {
    /// Returns the ASCII byte.
    pub const fn as_byte(&self) -> u8 {
        match self {
            Self::Final => b'F',
            Self::Intermediate => b'C',
            Self::Abort => b'A',
        }
    }

    /// Parses the ASCII byte.
    pub fn from_byte(byte: u8) -> UaResult<Self> {
        match byte {
            b'F' => Ok(Self::Final),
            b'C' => Ok(Self::Intermediate),
            b'A' => Ok(Self::Abort),
            other => Err(UaError::malformed(format!("invalid chunk type 0x{other:02X}"))),
        }
    }
}

// =============================================================================
// MessageHeader
// =============================================================================

/// The 8-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Message type.
    pub message_type: MessageType,
    /// Chunk type.
    pub chunk_type: ChunkType,
    /// Total frame size including the header.
    pub message_size: u32,
}

impl MessageHeader {
    /// Writes the header.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(self.message_type.as_bytes());
        dst.put_u8(self.chunk_type.as_byte());
        dst.put_u32_le(self.message_size);
    }

    /// Reads a header from the first 8 bytes of `src`.
    pub fn decode(src: &[u8]) -> UaResult<Self> {
        if src.len() < HEADER_SIZE {
            return Err(UaError::malformed("truncated message header"));
        }
        let message_type = MessageType::from_bytes([src[0], src[1], src[2]])?;
        let chunk_type = ChunkType::from_byte(src[3])?;
        let message_size = u32::from_le_bytes([src[4], src[5], src[6], src[7]]);
        if (message_size as usize) < HEADER_SIZE {
            return Err(UaError::malformed(format!(
                "message size {message_size} smaller than header"
            )));
        }
        Ok(Self {
            message_type,
            chunk_type,
            message_size,
        })
    }
}

// =============================================================================
// Transport bodies
// =============================================================================

/// Hello message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloMessage {
    /// Protocol version.
    pub protocol_version: u32,
    /// Our receive buffer size.
    pub receive_buffer_size: u32,
    /// Our send buffer size.
    pub send_buffer_size: u32,
    /// Largest message we accept.
    pub max_message_size: u32,
    /// Most chunks we accept.
    pub max_chunk_count: u32,
    /// Endpoint URL.
    pub endpoint_url: String,
}

impl HelloMessage {
    /// Creates a Hello offering `limits`.
    pub fn new(endpoint_url: impl Into<String>, limits: &TransportLimits) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            receive_buffer_size: limits.max_recv_buffer_size,
            send_buffer_size: limits.max_send_buffer_size,
            max_message_size: limits.max_message_size,
            max_chunk_count: limits.max_chunk_count,
            endpoint_url: endpoint_url.into(),
        }
    }

    /// Encodes the body.
    pub fn encode_body(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(24 + self.endpoint_url.len());
        buf.put_u32_le(self.protocol_version);
        buf.put_u32_le(self.receive_buffer_size);
        buf.put_u32_le(self.send_buffer_size);
        buf.put_u32_le(self.max_message_size);
        buf.put_u32_le(self.max_chunk_count);
        put_ua_string(&mut buf, Some(&self.endpoint_url));
        buf.freeze()
    }

    /// Decodes the body.
    pub fn decode_body(mut src: &[u8]) -> UaResult<Self> {
        ensure_remaining(src, 20, "Hello")?;
        Ok(Self {
            protocol_version: src.get_u32_le(),
            receive_buffer_size: src.get_u32_le(),
            send_buffer_size: src.get_u32_le(),
            max_message_size: src.get_u32_le(),
            max_chunk_count: src.get_u32_le(),
            endpoint_url: get_ua_string(&mut src)?.unwrap_or_default(),
        })
    }
}

/// Acknowledge message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcknowledgeMessage {
    /// Protocol version.
    pub protocol_version: u32,
    /// Server receive buffer size.
    pub receive_buffer_size: u32,
    /// Server send buffer size.
    pub send_buffer_size: u32,
    /// Largest message the server accepts.
    pub max_message_size: u32,
    /// Most chunks the server accepts.
    pub max_chunk_count: u32,
}

impl AcknowledgeMessage {
    /// Encodes the body.
    pub fn encode_body(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(20);
        buf.put_u32_le(self.protocol_version);
        buf.put_u32_le(self.receive_buffer_size);
        buf.put_u32_le(self.send_buffer_size);
        buf.put_u32_le(self.max_message_size);
        buf.put_u32_le(self.max_chunk_count);
        buf.freeze()
    }

    /// Decodes the body.
    pub fn decode_body(mut src: &[u8]) -> UaResult<Self> {
        ensure_remaining(src, 20, "Acknowledge")?;
        Ok(Self {
            protocol_version: src.get_u32_le(),
            receive_buffer_size: src.get_u32_le(),
            send_buffer_size: src.get_u32_le(),
            max_message_size: src.get_u32_le(),
            max_chunk_count: src.get_u32_le(),
        })
    }

    /// Returns the limits the client uses from now on.
    pub fn negotiated_limits(&self) -> TransportLimits {
        TransportLimits::negotiated(
            self.receive_buffer_size,
            self.send_buffer_size,
            self.max_message_size,
            self.max_chunk_count,
        )
    }
}

/// Error message body, also the body of abort chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    /// Status code.
    pub error: StatusCode,
    /// Reason.
    pub reason: String,
}

impl ErrorMessage {
    /// Encodes the body.
    pub fn encode_body(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8 + self.reason.len());
        buf.put_u32_le(self.error.bits());
        put_ua_string(&mut buf, Some(&self.reason));
        buf.freeze()
    }

    /// Decodes the body.
    pub fn decode_body(mut src: &[u8]) -> UaResult<Self> {
        ensure_remaining(src, 4, "Error")?;
        let error = StatusCode::from_bits(src.get_u32_le());
        let reason = get_ua_string(&mut src)?.unwrap_or_default();
        Ok(Self { error, reason })
    }
}

// =============================================================================
// RawFrame + FrameCodec
// =============================================================================

/// One frame: header plus the bytes after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Message type.
    pub message_type: MessageType,
    /// Chunk type.
    pub chunk_type: ChunkType,
    /// Everything after the 8-byte header.
    pub body: Bytes,
}

impl RawFrame {
    /// Creates a frame.
    pub fn new(message_type: MessageType, chunk_type: ChunkType, body: Bytes) -> Self {
        Self {
            message_type,
            chunk_type,
            body,
        }
    }

    /// Total encoded size.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }
}

/// Splits the byte stream into frames.
///
/// Frames larger than the receive buffer are rejected with
/// `BadTcpMessageTooLarge`. The limit is shared so it can be tightened
/// after the Acknowledge while the reader task owns the codec.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: Arc<AtomicUsize>,
}

impl FrameCodec {
    /// Creates a codec accepting frames up to `max_frame_size` bytes.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: Arc::new(AtomicUsize::new(max_frame_size)),
        }
    }

    /// Returns a handle to the shared frame limit.
    pub fn limit_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.max_frame_size)
    }

    fn max_frame_size(&self) -> usize {
        self.max_frame_size.load(Ordering::Relaxed)
    }
}

impl Decoder for FrameCodec {
    type Item = RawFrame;
    type Error = UaError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = MessageHeader::decode(&src[..HEADER_SIZE])?;
        let size = header.message_size as usize;
        let limit = self.max_frame_size();
        if limit > 0 && size > limit {
            return Err(CodecError::ChunkTooLarge { size, limit }.into());
        }

        if src.len() < size {
            src.reserve(size - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(size);
        frame.advance(HEADER_SIZE);
        Ok(Some(RawFrame::new(
            header.message_type,
            header.chunk_type,
            frame.freeze(),
        )))
    }
}

impl Encoder<RawFrame> for FrameCodec {
    type Error = UaError;

    fn encode(&mut self, item: RawFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let size = item.encoded_len();
        dst.reserve(size);
        MessageHeader {
            message_type: item.message_type,
            chunk_type: item.chunk_type,
            message_size: size as u32,
        }
        .encode(dst);
        dst.put_slice(&item.body);
        Ok(())
    }
}

// =============================================================================
// Primitive helpers
// =============================================================================

pub(crate) fn ensure_remaining(src: &[u8], needed: usize, what: &str) -> UaResult<()> {
    if src.remaining() < needed {
        return Err(UaError::malformed(format!(
            "{what}: need {needed} bytes, have {}",
            src.remaining()
        )));
    }
    Ok(())
}

/// Writes a UA string: i32 length (-1 for null) then UTF-8 bytes.
pub(crate) fn put_ua_string(dst: &mut impl BufMut, value: Option<&str>) {
    put_byte_string(dst, value.map(str::as_bytes));
}

/// Reads a UA string.
pub(crate) fn get_ua_string(src: &mut &[u8]) -> UaResult<Option<String>> {
    match get_byte_string(src)? {
        Some(bytes) => String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| UaError::malformed(format!("invalid UTF-8 in string: {e}"))),
        None => Ok(None),
    }
}

/// Writes a byte string: i32 length (-1 for null) then the bytes.
pub(crate) fn put_byte_string(dst: &mut impl BufMut, value: Option<&[u8]>) {
    match value {
        Some(bytes) => {
            dst.put_i32_le(bytes.len() as i32);
            dst.put_slice(bytes);
        }
        None => dst.put_i32_le(-1),
    }
}

/// Reads a byte string.
pub(crate) fn get_byte_string(src: &mut &[u8]) -> UaResult<Option<Vec<u8>>> {
    ensure_remaining(*src, 4, "string length")?;
    let length = src.get_i32_le();
    if length < 0 {
        return Ok(None);
    }
    let length = length as usize;
    ensure_remaining(*src, length, "string body")?;
    let bytes = src[..length].to_vec();
    src.advance(length);
    Ok(Some(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_waits_for_full_frame() {
        let mut codec = FrameCodec::new(65_535);
        let mut buf = BytesMut::new();
        codec
            .encode(
                RawFrame::new(
                    MessageType::Message,
                    ChunkType::Final,
                    Bytes::from_static(&[1, 2, 3, 4]),
                ),
                &mut buf,
            )
            .unwrap();
        assert_eq!(&buf[..4], b"MSGF");
        assert_eq!(u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]), 12);

        let mut partial = buf.split_to(10);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.unsplit(buf);

        let frame = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(frame.message_type, MessageType::Message);
        assert_eq!(&frame.body[..], &[1, 2, 3, 4]);
        assert!(partial.is_empty());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = FrameCodec::new(16);
        let mut buf = BytesMut::new();
        MessageHeader {
            message_type: MessageType::Message,
            chunk_type: ChunkType::Final,
            message_size: 17,
        }
        .encode(&mut buf);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(err.is_status(StatusCode::BAD_TCP_MESSAGE_TOO_LARGE));
    }

    #[test]
    fn test_unknown_message_type() {
        let mut buf = BytesMut::from(&b"XYZF\x08\x00\x00\x00"[..]);
        let err = FrameCodec::new(0).decode(&mut buf).unwrap_err();
        assert!(err.is_status(StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID));
    }

    #[test]
    fn test_hello_layout() {
        let hello = HelloMessage::new("opc.tcp://plc:4840", &TransportLimits::default());
        let body = hello.encode_body();
        assert_eq!(&body[..4], &0u32.to_le_bytes());
        assert_eq!(&body[20..24], &18i32.to_le_bytes());
        assert_eq!(HelloMessage::decode_body(&body).unwrap(), hello);
    }

    #[test]
    fn test_acknowledge_swaps_buffers() {
        let ack = AcknowledgeMessage {
            protocol_version: 0,
            receive_buffer_size: 8192,
            send_buffer_size: 16384,
            max_message_size: 0,
            max_chunk_count: 0,
        };
        let decoded = AcknowledgeMessage::decode_body(&ack.encode_body()).unwrap();
        let limits = decoded.negotiated_limits();
        assert_eq!(limits.max_send_buffer_size, 8192);
        assert_eq!(limits.max_recv_buffer_size, 16384);
    }

    #[test]
    fn test_null_string() {
        let mut buf = BytesMut::new();
        put_ua_string(&mut buf, None);
        let mut slice = &buf[..];
        assert_eq!(get_ua_string(&mut slice).unwrap(), None);
    }
}
