// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Secure conversation chunks.
//!
//! A secure message body is split into chunks that each fit the
//! negotiated send buffer:
//!
//! ```text
//! +--------+------------+-----------------+-----------------+------+-----------+
//! | header | channel id | security header | sequence header | body | signature |
//! |  8 B   |    4 B     | OPN: asymmetric |   seq + req id  |      | if signed |
//! |        |            | else: token id  |      8 B        |      |           |
//! +--------+------------+-----------------+-----------------+------+-----------+
//!                                          \_______ encrypted if SignAndEncrypt _/
//! ```
//!
//! The signature covers everything before it, with the header size field
//! holding the unencrypted chunk size.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::config::TransportLimits;
use crate::error::{ChannelError, CodecError, SecurityError, UaError, UaResult};
use crate::security::SecurityPolicy;
use crate::types::MessageSecurityMode;

use super::framing::{
    ensure_remaining, get_byte_string, get_ua_string, put_byte_string, put_ua_string, ChunkType,
    ErrorMessage, MessageHeader, MessageType, RawFrame, HEADER_SIZE,
};

/// Sequence numbers wrap to 1 once they reach this value.
pub const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX - 1024;

/// Fixed bytes per symmetric chunk: header and channel id (12), token id
/// (4), sequence header (8).
pub const SYMMETRIC_OVERHEAD: usize = 24;

const SEQUENCE_HEADER_SIZE: usize = 8;

// =============================================================================
// Headers
// =============================================================================

/// Sequence header of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceHeader {
    /// Chunk sequence number.
    pub sequence_number: u32,
    /// Request the chunk belongs to.
    pub request_id: u32,
}

/// Security header used by OpenSecureChannel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsymmetricSecurityHeader {
    /// Security policy URI.
    pub policy_uri: String,
    /// Sender certificate (DER).
    pub sender_certificate: Option<Vec<u8>>,
    /// Thumbprint of the receiver certificate.
    pub receiver_thumbprint: Option<Vec<u8>>,
}

/// Security header of a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityHeader {
    /// OpenSecureChannel.
    Asymmetric(AsymmetricSecurityHeader),
    /// Every other secure message.
    Symmetric {
        /// Token the chunk is secured with.
        token_id: u32,
    },
}

impl SecurityHeader {
    fn encode(&self, dst: &mut impl BufMut) {
        match self {
            Self::Asymmetric(header) => {
                put_ua_string(dst, Some(&header.policy_uri));
                put_byte_string(dst, header.sender_certificate.as_deref());
                put_byte_string(dst, header.receiver_thumbprint.as_deref());
            }
            Self::Symmetric { token_id } => dst.put_u32_le(*token_id),
        }
    }

    fn decode(src: &mut &[u8], message_type: MessageType) -> UaResult<Self> {
        if message_type == MessageType::OpenSecureChannel {
            Ok(Self::Asymmetric(AsymmetricSecurityHeader {
                policy_uri: get_ua_string(src)?.unwrap_or_default(),
                sender_certificate: get_byte_string(src)?,
                receiver_thumbprint: get_byte_string(src)?,
            }))
        } else {
            ensure_remaining(*src, 4, "token id")?;
            Ok(Self::Symmetric {
                token_id: src.get_u32_le(),
            })
        }
    }
}

// =============================================================================
// Sequence numbers
// =============================================================================

/// Issues outgoing sequence numbers.
#[derive(Debug, Clone)]
pub struct SequenceCounter {
    next: u32,
}

impl SequenceCounter {
    /// Creates a counter starting at 1.
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Creates a counter whose next value is `next`.
    pub fn starting_at(next: u32) -> Self {
        Self { next }
    }

    /// Returns the next sequence number.
    pub fn next_number(&mut self) -> u32 {
        let number = self.next;
        self.next = if number >= SEQUENCE_WRAP_THRESHOLD {
            1
        } else {
            number + 1
        };
        number
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks incoming sequence numbers.
#[derive(Debug, Clone, Default)]
pub struct SequenceValidator {
    last: Option<u32>,
}

impl SequenceValidator {
    /// Creates a validator that accepts any first number.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts `number` if it follows the previous one.
    pub fn check(&mut self, number: u32) -> UaResult<()> {
        if let Some(previous) = self.last {
            let wrapped = previous >= SEQUENCE_WRAP_THRESHOLD && number < 1024;
            if number != previous.wrapping_add(1) && !wrapped {
                return Err(ChannelError::SequenceNumber {
                    expected: previous.wrapping_add(1),
                    actual: number,
                }
                .into());
            }
        }
        self.last = Some(number);
        Ok(())
    }
}

// =============================================================================
// Token window
// =============================================================================

/// Token ids accepted on incoming chunks.
///
/// After a renewal the previous token stays valid until the server sends
/// its first chunk under the new one.
#[derive(Debug, Clone, Default)]
pub struct TokenWindow {
    current: Option<u32>,
    previous: Option<u32>,
}

impl TokenWindow {
    /// Installs a new token.
    pub fn install(&mut self, token_id: u32) {
        if self.current != Some(token_id) {
            self.previous = self.current;
            self.current = Some(token_id);
        }
    }

    /// Returns the token used for sending.
    pub fn current(&self) -> Option<u32> {
        self.current
    }

    /// Checks an incoming token id.
    pub fn accept(&mut self, token_id: u32) -> UaResult<()> {
        if self.current == Some(token_id) {
            self.previous = None;
            Ok(())
        } else if self.previous == Some(token_id) {
            Ok(())
        } else {
            Err(ChannelError::WrongTokenId {
                expected: self.current.unwrap_or_default(),
                actual: token_id,
            }
            .into())
        }
    }
}

// =============================================================================
// Chunk
// =============================================================================

/// One decoded chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Message type.
    pub message_type: MessageType,
    /// Chunk type.
    pub chunk_type: ChunkType,
    /// Secure channel id.
    pub channel_id: u32,
    /// Security header.
    pub security: SecurityHeader,
    /// Sequence header.
    pub sequence: SequenceHeader,
    /// Body slice carried by this chunk.
    pub body: Bytes,
}

/// How chunks are secured.
#[derive(Clone, Copy)]
pub struct ChunkSecurity<'a> {
    /// Active policy.
    pub policy: &'a dyn SecurityPolicy,
    /// Channel security mode.
    pub mode: MessageSecurityMode,
    /// Key passed to `encrypt`.
    pub key: &'a [u8],
}

impl ChunkSecurity<'_> {
    fn signature_size(&self) -> usize {
        if self.mode.is_signed() {
            self.policy.signature_size()
        } else {
            0
        }
    }
}

/// Splits a message body into chunks that fit `limits`.
///
/// OpenSecureChannel messages are never split. Fails with
/// `BadRequestTooLarge` when the chunk count or message size limit would be
/// exceeded.
#[allow(clippy::too_many_arguments)]
pub fn split_message(
    message_type: MessageType,
    channel_id: u32,
    security: &SecurityHeader,
    request_id: u32,
    body: &[u8],
    limits: &TransportLimits,
    signature_size: usize,
    sequence: &mut SequenceCounter,
) -> UaResult<Vec<Chunk>> {
    let send_buffer = limits.max_send_buffer_size as usize;
    let max_body = if message_type == MessageType::OpenSecureChannel {
        body.len().max(1)
    } else {
        send_buffer.saturating_sub(SYMMETRIC_OVERHEAD + signature_size)
    };

    if max_body == 0 {
        return Err(CodecError::RequestTooLarge {
            message: format!("send buffer of {send_buffer} bytes leaves no room for a body"),
        }
        .into());
    }

    let chunk_count = body.len().div_ceil(max_body).max(1);
    if !limits.allows(chunk_count, body.len()) {
        return Err(CodecError::RequestTooLarge {
            message: format!(
                "{} bytes in {} chunks exceeds max {} chunks / {} bytes",
                body.len(),
                chunk_count,
                limits.max_chunk_count,
                limits.max_message_size
            ),
        }
        .into());
    }

    let mut chunks = Vec::with_capacity(chunk_count);
    let mut parts = body.chunks(max_body).peekable();
    if parts.peek().is_none() {
        chunks.push(Chunk {
            message_type,
            chunk_type: ChunkType::Final,
            channel_id,
            security: security.clone(),
            sequence: SequenceHeader {
                sequence_number: sequence.next_number(),
                request_id,
            },
            body: Bytes::new(),
        });
        return Ok(chunks);
    }

    while let Some(part) = parts.next() {
        let chunk_type = if parts.peek().is_some() {
            ChunkType::Intermediate
        } else {
            ChunkType::Final
        };
        chunks.push(Chunk {
            message_type,
            chunk_type,
            channel_id,
            security: security.clone(),
            sequence: SequenceHeader {
                sequence_number: sequence.next_number(),
                request_id,
            },
            body: Bytes::copy_from_slice(part),
        });
    }
    Ok(chunks)
}

fn header_bytes(message_type: MessageType, chunk_type: ChunkType, size: usize) -> BytesMut {
    let mut header = BytesMut::with_capacity(HEADER_SIZE);
    MessageHeader {
        message_type,
        chunk_type,
        message_size: size as u32,
    }
    .encode(&mut header);
    header
}

/// Secures a chunk and turns it into a frame.
pub fn encode_chunk(chunk: &Chunk, security: ChunkSecurity<'_>) -> UaResult<RawFrame> {
    let mut prefix = BytesMut::new();
    prefix.put_u32_le(chunk.channel_id);
    chunk.security.encode(&mut prefix);

    let mut secured = BytesMut::with_capacity(SEQUENCE_HEADER_SIZE + chunk.body.len());
    secured.put_u32_le(chunk.sequence.sequence_number);
    secured.put_u32_le(chunk.sequence.request_id);
    secured.put_slice(&chunk.body);

    if security.mode.is_signed() {
        let plain_size =
            HEADER_SIZE + prefix.len() + secured.len() + security.signature_size();
        let mut signed = header_bytes(chunk.message_type, chunk.chunk_type, plain_size);
        signed.put_slice(&prefix);
        signed.put_slice(&secured);
        let signature = security.policy.sign(&signed)?;
        secured.put_slice(&signature);
    }

    let secured = if security.mode.is_encrypted() {
        Bytes::from(security.policy.encrypt(&secured, security.key)?)
    } else {
        secured.freeze()
    };

    let mut body = prefix;
    body.put_slice(&secured);
    Ok(RawFrame::new(chunk.message_type, chunk.chunk_type, body.freeze()))
}

/// Decodes a secure frame, checking its signature.
pub fn decode_chunk(frame: &RawFrame, security: ChunkSecurity<'_>) -> UaResult<Chunk> {
    let mut src: &[u8] = &frame.body;
    ensure_remaining(src, 4, "channel id")?;
    let channel_id = src.get_u32_le();
    let header = SecurityHeader::decode(&mut src, frame.message_type)?;
    let prefix_len = frame.body.len() - src.len();

    let secured: Vec<u8> = if security.mode.is_encrypted() {
        security.policy.decrypt(src)?
    } else {
        src.to_vec()
    };

    let plain: &[u8] = if security.mode.is_signed() {
        let signature_size = security.signature_size();
        if secured.len() < signature_size {
            return Err(UaError::malformed("chunk shorter than its signature"));
        }
        let (plain, signature) = secured.split_at(secured.len() - signature_size);

        let plain_size = HEADER_SIZE + prefix_len + secured.len();
        let mut signed = header_bytes(frame.message_type, frame.chunk_type, plain_size);
        signed.put_slice(&frame.body[..prefix_len]);
        signed.put_slice(plain);
        if !security.policy.verify(&signed, signature)? {
            return Err(SecurityError::signature_invalid("secure channel chunk").into());
        }
        plain
    } else {
        &secured
    };

    let mut plain = plain;
    ensure_remaining(plain, SEQUENCE_HEADER_SIZE, "sequence header")?;
    let sequence = SequenceHeader {
        sequence_number: plain.get_u32_le(),
        request_id: plain.get_u32_le(),
    };

    Ok(Chunk {
        message_type: frame.message_type,
        chunk_type: frame.chunk_type,
        channel_id,
        security: header,
        sequence,
        body: Bytes::copy_from_slice(plain),
    })
}

// =============================================================================
// MessageAssembler
// =============================================================================

/// A fully reassembled message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledMessage {
    /// Message type.
    pub message_type: MessageType,
    /// Request id.
    pub request_id: u32,
    /// Concatenated body.
    pub body: Bytes,
}

/// Result of feeding one chunk to the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// More chunks are needed.
    Partial,
    /// The message is complete.
    Complete(AssembledMessage),
    /// The server abandoned the message.
    Aborted {
        /// Request id.
        request_id: u32,
        /// Error carried by the abort chunk.
        error: ErrorMessage,
    },
}

#[derive(Debug)]
struct PartialMessage {
    message_type: MessageType,
    request_id: u32,
    parts: Vec<Bytes>,
    size: usize,
}

/// Reassembles chunks into messages, enforcing the receive limits.
#[derive(Debug)]
pub struct MessageAssembler {
    limits: TransportLimits,
    partial: Option<PartialMessage>,
}

impl MessageAssembler {
    /// Creates an assembler enforcing `limits`.
    pub fn new(limits: TransportLimits) -> Self {
        Self {
            limits,
            partial: None,
        }
    }

    /// Replaces the limits, e.g. after the Acknowledge.
    pub fn set_limits(&mut self, limits: TransportLimits) {
        self.limits = limits;
    }

    /// Feeds one chunk.
    ///
    /// Fails with `BadResponseTooLarge` when the message outgrows the limits
    /// and with a channel error when chunks of two requests interleave.
    pub fn push(&mut self, chunk: Chunk) -> UaResult<ChunkOutcome> {
        let request_id = chunk.sequence.request_id;

        if chunk.chunk_type == ChunkType::Abort {
            if self
                .partial
                .as_ref()
                .is_some_and(|p| p.request_id == request_id)
            {
                self.partial = None;
            }
            let error = ErrorMessage::decode_body(&chunk.body)?;
            return Ok(ChunkOutcome::Aborted { request_id, error });
        }

        let partial = self.partial.get_or_insert_with(|| PartialMessage {
            message_type: chunk.message_type,
            request_id,
            parts: Vec::new(),
            size: 0,
        });

        if partial.request_id != request_id {
            let expected = partial.request_id;
            self.partial = None;
            return Err(ChannelError::RequestIdMismatch {
                expected,
                actual: request_id,
            }
            .into());
        }

        partial.size += chunk.body.len();
        partial.parts.push(chunk.body);

        if !self.limits.allows(partial.parts.len(), partial.size) {
            let message = format!(
                "{} bytes in {} chunks exceeds max {} chunks / {} bytes",
                partial.size,
                partial.parts.len(),
                self.limits.max_chunk_count,
                self.limits.max_message_size
            );
            self.partial = None;
            return Err(CodecError::ResponseTooLarge { message }.into());
        }

        if chunk.chunk_type == ChunkType::Intermediate {
            return Ok(ChunkOutcome::Partial);
        }

        let Some(done) = self.partial.take() else {
            return Ok(ChunkOutcome::Partial);
        };
        let mut body = BytesMut::with_capacity(done.size);
        for part in done.parts {
            body.put_slice(&part);
        }
        Ok(ChunkOutcome::Complete(AssembledMessage {
            message_type: done.message_type,
            request_id: done.request_id,
            body: body.freeze(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::NoSecurity;
    use crate::types::StatusCode;

    fn limits(send_buffer: u32, max_chunks: u32, max_size: u32) -> TransportLimits {
        TransportLimits {
            max_recv_buffer_size: send_buffer,
            max_send_buffer_size: send_buffer,
            max_chunk_count: max_chunks,
            max_message_size: max_size,
        }
    }

    fn none_security() -> ChunkSecurity<'static> {
        ChunkSecurity {
            policy: &NoSecurity,
            mode: MessageSecurityMode::None,
            key: &[],
        }
    }

    #[test]
    fn test_split_respects_send_buffer() {
        let body = vec![7u8; 100];
        let mut seq = SequenceCounter::new();
        let chunks = split_message(
            MessageType::Message,
            5,
            &SecurityHeader::Symmetric { token_id: 1 },
            9,
            &body,
            &limits(64, 0, 0),
            0,
            &mut seq,
        )
        .unwrap();

        // 64 - 24 = 40 bytes per chunk
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chunk_type, ChunkType::Intermediate);
        assert_eq!(chunks[2].chunk_type, ChunkType::Final);
        assert_eq!(chunks[2].body.len(), 20);
        let numbers: Vec<u32> = chunks.iter().map(|c| c.sequence.sequence_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);

        for chunk in &chunks {
            let frame = encode_chunk(chunk, none_security()).unwrap();
            assert!(frame.encoded_len() <= 64);
        }
    }

    #[test]
    fn test_split_enforces_limits() {
        let mut seq = SequenceCounter::new();
        let err = split_message(
            MessageType::Message,
            5,
            &SecurityHeader::Symmetric { token_id: 1 },
            9,
            &[0u8; 100],
            &limits(64, 2, 0),
            0,
            &mut seq,
        )
        .unwrap_err();
        assert!(err.is_status(StatusCode::BAD_REQUEST_TOO_LARGE));

        let err = split_message(
            MessageType::Message,
            5,
            &SecurityHeader::Symmetric { token_id: 1 },
            9,
            &[0u8; 100],
            &limits(65_535, 0, 99),
            0,
            &mut seq,
        )
        .unwrap_err();
        assert!(err.is_status(StatusCode::BAD_REQUEST_TOO_LARGE));
    }

    #[test]
    fn test_open_is_single_chunk() {
        let mut seq = SequenceCounter::new();
        let header = SecurityHeader::Asymmetric(AsymmetricSecurityHeader {
            policy_uri: crate::types::SecurityPolicyKind::NONE_URI.to_string(),
            sender_certificate: None,
            receiver_thumbprint: None,
        });
        let chunks = split_message(
            MessageType::OpenSecureChannel,
            0,
            &header,
            1,
            &[1u8; 200],
            &limits(64, 0, 0),
            0,
            &mut seq,
        )
        .unwrap();
        assert_eq!(chunks.len(), 1);

        let frame = encode_chunk(&chunks[0], none_security()).unwrap();
        let decoded = decode_chunk(&frame, none_security()).unwrap();
        assert_eq!(decoded.security, header);
        assert_eq!(decoded.body.len(), 200);
    }

    #[test]
    fn test_sequence_wrap() {
        let mut counter = SequenceCounter::starting_at(SEQUENCE_WRAP_THRESHOLD);
        assert_eq!(counter.next_number(), SEQUENCE_WRAP_THRESHOLD);
        assert_eq!(counter.next_number(), 1);

        let mut validator = SequenceValidator::new();
        validator.check(SEQUENCE_WRAP_THRESHOLD).unwrap();
        validator.check(3).unwrap();
        validator.check(4).unwrap();
        let err = validator.check(6).unwrap_err();
        assert!(matches!(
            err,
            UaError::Channel(ChannelError::SequenceNumber {
                expected: 5,
                actual: 6
            })
        ));
    }

    #[test]
    fn test_previous_token_accepted_until_new_one_seen() {
        let mut window = TokenWindow::default();
        window.install(1);
        window.install(2);
        assert!(window.accept(1).is_ok());
        assert!(window.accept(2).is_ok());
        assert!(window.accept(1).is_err());
        assert!(window.accept(7).is_err());
    }

    fn chunk(chunk_type: ChunkType, request_id: u32, body: &[u8]) -> Chunk {
        Chunk {
            message_type: MessageType::Message,
            chunk_type,
            channel_id: 1,
            security: SecurityHeader::Symmetric { token_id: 1 },
            sequence: SequenceHeader {
                sequence_number: 1,
                request_id,
            },
            body: Bytes::copy_from_slice(body),
        }
    }

    #[test]
    fn test_assembler_joins_chunks() {
        let mut assembler = MessageAssembler::new(TransportLimits::default());
        assert_eq!(
            assembler.push(chunk(ChunkType::Intermediate, 4, b"ab")).unwrap(),
            ChunkOutcome::Partial
        );
        match assembler.push(chunk(ChunkType::Final, 4, b"cd")).unwrap() {
            ChunkOutcome::Complete(message) => {
                assert_eq!(message.request_id, 4);
                assert_eq!(&message.body[..], b"abcd");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_assembler_abort_discards_partial() {
        let mut assembler = MessageAssembler::new(TransportLimits::default());
        assembler.push(chunk(ChunkType::Intermediate, 4, b"ab")).unwrap();

        let error = ErrorMessage {
            error: StatusCode::BAD_RESPONSE_TOO_LARGE,
            reason: "too big".into(),
        };
        let outcome = assembler
            .push(chunk(ChunkType::Abort, 4, &error.encode_body()))
            .unwrap();
        assert_eq!(
            outcome,
            ChunkOutcome::Aborted {
                request_id: 4,
                error
            }
        );

        // the next message starts fresh
        assert!(matches!(
            assembler.push(chunk(ChunkType::Final, 5, b"x")).unwrap(),
            ChunkOutcome::Complete(_)
        ));
    }

    #[test]
    fn test_assembler_enforces_receive_limits() {
        let mut assembler = MessageAssembler::new(limits(65_535, 1, 0));
        assembler.push(chunk(ChunkType::Intermediate, 4, b"ab")).ok();
        let err = assembler
            .push(chunk(ChunkType::Final, 4, b"cd"))
            .unwrap_err();
        assert!(err.is_status(StatusCode::BAD_RESPONSE_TOO_LARGE));
    }

    #[test]
    fn test_interleaved_requests_rejected() {
        let mut assembler = MessageAssembler::new(TransportLimits::default());
        assembler.push(chunk(ChunkType::Intermediate, 4, b"ab")).unwrap();
        assert!(assembler.push(chunk(ChunkType::Final, 5, b"cd")).is_err());
    }
}
