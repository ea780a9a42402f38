// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Socket implementation of [`UaConnection`].
//!
//! One reader task owns the read half of the socket. It verifies and
//! reassembles chunks and hands each complete response to the oneshot
//! registered under its request id. Writers serialize on the write half so
//! the chunks of one message are never interleaved with another's.
//!
//! When the socket dies every pending request fails with a connection
//! error instead of waiting for its timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::{ClientConfig, TransportLimits};
use crate::error::{
    ChannelError, CodecError, ConnectionError, TimeoutError, UaError, UaResult,
};
use crate::messages::{
    ChannelSecurityToken, CloseSecureChannelResponse, ServiceRequest, ServiceResponse,
};
use crate::security::SecurityPolicy;
use crate::types::{MessageSecurityMode, NodeId};

use super::chunking::{
    decode_chunk, encode_chunk, split_message, AsymmetricSecurityHeader, AssembledMessage,
    ChunkOutcome, ChunkSecurity, MessageAssembler, SecurityHeader, SequenceCounter,
    SequenceValidator, TokenWindow,
};
use super::framing::{
    AcknowledgeMessage, ChunkType, ErrorMessage, FrameCodec, HelloMessage, MessageType, RawFrame,
};
use super::{socket_address, RequestStamper, TransportState, UaConnection};

// =============================================================================
// ServiceCodec
// =============================================================================

/// Encodes service bodies.
///
/// The secure conversation layer treats bodies as opaque bytes; this seam
/// plugs in the binary encoding of the service structures.
pub trait ServiceCodec: Send + Sync {
    /// Encodes a request body.
    fn encode_request(&self, request: &ServiceRequest) -> UaResult<Vec<u8>>;

    /// Decodes a response body.
    fn decode_response(&self, body: &[u8]) -> UaResult<ServiceResponse>;
}

// =============================================================================
// Shared state
// =============================================================================

type Writer = FramedWrite<OwnedWriteHalf, FrameCodec>;
type Reader = FramedRead<OwnedReadHalf, FrameCodec>;
type PendingSender = oneshot::Sender<UaResult<AssembledMessage>>;

#[derive(Debug)]
struct SecureState {
    channel_id: u32,
    tokens: TokenWindow,
    send_sequence: SequenceCounter,
    limits: TransportLimits,
    server_nonce: Vec<u8>,
}

impl SecureState {
    fn new(limits: TransportLimits) -> Self {
        Self {
            channel_id: 0,
            tokens: TokenWindow::default(),
            send_sequence: SequenceCounter::new(),
            limits,
            server_nonce: Vec::new(),
        }
    }
}

struct Shared {
    codec: Arc<dyn ServiceCodec>,
    policy: Arc<dyn SecurityPolicy>,
    mode: MessageSecurityMode,
    connect_timeout: Duration,
    request_timeout: Duration,
    initial_limits: TransportLimits,
    stamper: RequestStamper,
    state: RwLock<TransportState>,
    writer: AsyncMutex<Option<Writer>>,
    pending: Mutex<HashMap<u32, PendingSender>>,
    hello_waiter: Mutex<Option<oneshot::Sender<UaResult<AcknowledgeMessage>>>>,
    secure: Mutex<SecureState>,
    opening: AtomicBool,
    next_request_id: AtomicU32,
    frame_limit: Mutex<Option<Arc<AtomicUsize>>>,
    cancel: Mutex<Option<CancellationToken>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn set_state(&self, state: TransportState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!(from = %previous, to = %state, "Transport state changed");
        }
    }

    fn fail_pending(&self, make_error: impl Fn() -> UaError) {
        let pending: Vec<PendingSender> = self.pending.lock().drain().map(|(_, tx)| tx).collect();
        if !pending.is_empty() {
            debug!(count = pending.len(), "Failing pending requests");
        }
        for tx in pending {
            let _ = tx.send(Err(make_error()));
        }
    }

    fn complete(&self, request_id: u32, result: UaResult<AssembledMessage>) {
        match self.pending.lock().remove(&request_id) {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => warn!(request_id, "Response for unknown request id"),
        }
    }

    fn handle_frame(
        &self,
        frame: RawFrame,
        assembler: &mut MessageAssembler,
        sequence: &mut SequenceValidator,
    ) -> UaResult<()> {
        match frame.message_type {
            MessageType::Acknowledge => {
                let ack = AcknowledgeMessage::decode_body(&frame.body);
                if let Some(tx) = self.hello_waiter.lock().take() {
                    let _ = tx.send(ack);
                }
                Ok(())
            }
            MessageType::Error => {
                let message = ErrorMessage::decode_body(&frame.body)?;
                warn!(status = %message.error, reason = %message.reason, "Server sent ERR");
                let error = || ConnectionError::ServerError {
                    status: message.error,
                    reason: message.reason.clone(),
                };
                if let Some(tx) = self.hello_waiter.lock().take() {
                    let _ = tx.send(Err(error().into()));
                }
                Err(error().into())
            }
            MessageType::Hello => Err(UaError::malformed("unexpected Hello from server")),
            MessageType::OpenSecureChannel | MessageType::Message | MessageType::CloseSecureChannel => {
                self.handle_chunk(frame, assembler, sequence)
            }
        }
    }

    fn handle_chunk(
        &self,
        frame: RawFrame,
        assembler: &mut MessageAssembler,
        sequence: &mut SequenceValidator,
    ) -> UaResult<()> {
        let security = ChunkSecurity {
            policy: self.policy.as_ref(),
            mode: self.mode,
            key: &[],
        };
        let chunk = decode_chunk(&frame, security)?;

        {
            let mut secure = self.secure.lock();
            if let SecurityHeader::Symmetric { token_id } = chunk.security {
                secure.tokens.accept(token_id)?;
                if secure.channel_id != 0 && chunk.channel_id != secure.channel_id {
                    return Err(ChannelError::WrongChannelId {
                        expected: secure.channel_id,
                        actual: chunk.channel_id,
                    }
                    .into());
                }
            }
            assembler.set_limits(secure.limits);
        }

        sequence.check(chunk.sequence.sequence_number)?;
        let request_id = chunk.sequence.request_id;
        trace!(
            request_id,
            sequence_number = chunk.sequence.sequence_number,
            chunk_type = ?chunk.chunk_type,
            "Received chunk"
        );

        match assembler.push(chunk) {
            Ok(ChunkOutcome::Partial) => Ok(()),
            Ok(ChunkOutcome::Complete(message)) => {
                self.complete(message.request_id, Ok(message));
                Ok(())
            }
            Ok(ChunkOutcome::Aborted { request_id, error }) => {
                debug!(request_id, status = %error.error, "Server aborted message");
                self.complete(
                    request_id,
                    Err(ChannelError::Aborted {
                        request_id,
                        status: error.error,
                        reason: error.reason,
                    }
                    .into()),
                );
                Ok(())
            }
            Err(UaError::Codec(e @ CodecError::ResponseTooLarge { .. })) => {
                self.complete(request_id, Err(e.into()));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

async fn read_loop(shared: Arc<Shared>, mut frames: Reader, cancel: CancellationToken) {
    let mut assembler = MessageAssembler::new(shared.initial_limits);
    let mut sequence = SequenceValidator::new();

    let failure = loop {
        tokio::select! {
            _ = cancel.cancelled() => break None,
            frame = frames.next() => match frame {
                Some(Ok(frame)) => {
                    if let Err(e) = shared.handle_frame(frame, &mut assembler, &mut sequence) {
                        break Some(e);
                    }
                }
                Some(Err(e)) => break Some(e),
                None => break Some(UaError::connection_closed("server closed the socket")),
            }
        }
    };

    if let Some(error) = failure {
        error.log("transport reader");
        let reason = error.to_string();
        shared.set_state(TransportState::Failed);
        if let Some(tx) = shared.hello_waiter.lock().take() {
            let _ = tx.send(Err(UaError::connection_closed(reason.clone())));
        }
        shared.fail_pending(|| UaError::connection_closed(reason.clone()));
    }
}

/// RAII guard allowing one OpenSecureChannel exchange at a time.
struct OpenGuard<'a>(&'a AtomicBool);

impl<'a> OpenGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> UaResult<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            return Err(ChannelError::OpenInProgress.into());
        }
        Ok(Self(flag))
    }
}

impl Drop for OpenGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// =============================================================================
// TcpConnection
// =============================================================================

/// OPC UA binary connection over TCP.
pub struct TcpConnection {
    shared: Arc<Shared>,
}

impl TcpConnection {
    /// Creates an unconnected transport.
    pub fn new(
        config: &ClientConfig,
        codec: Arc<dyn ServiceCodec>,
        policy: Arc<dyn SecurityPolicy>,
    ) -> Self {
        let limits = config.transport_limits;
        Self {
            shared: Arc::new(Shared {
                codec,
                policy,
                mode: config.security_mode,
                connect_timeout: config.connect_timeout,
                request_timeout: config.request_timeout,
                initial_limits: limits,
                stamper: RequestStamper::new(config.timeout_hint_ms()),
                state: RwLock::new(TransportState::Disconnected),
                writer: AsyncMutex::new(None),
                pending: Mutex::new(HashMap::new()),
                hello_waiter: Mutex::new(None),
                secure: Mutex::new(SecureState::new(limits)),
                opening: AtomicBool::new(false),
                next_request_id: AtomicU32::new(1),
                frame_limit: Mutex::new(None),
                cancel: Mutex::new(None),
                reader: Mutex::new(None),
            }),
        }
    }

    /// Returns the limits currently in force.
    pub fn limits(&self) -> TransportLimits {
        self.shared.secure.lock().limits
    }

    fn next_request_id(&self) -> u32 {
        let id = self.shared.next_request_id.fetch_add(1, Ordering::Relaxed);
        if id == 0 {
            self.shared.next_request_id.fetch_add(1, Ordering::Relaxed)
        } else {
            id
        }
    }

    fn encode_frames(
        &self,
        message_type: MessageType,
        request_id: u32,
        body: &[u8],
    ) -> UaResult<Vec<RawFrame>> {
        let shared = &self.shared;
        let mut guard = shared.secure.lock();
        let secure = &mut *guard;

        let security_header = if message_type == MessageType::OpenSecureChannel {
            let certificate = shared.policy.host_certificate();
            SecurityHeader::Asymmetric(AsymmetricSecurityHeader {
                policy_uri: shared.policy.uri().to_string(),
                sender_certificate: (!certificate.is_empty()).then(|| certificate.to_vec()),
                receiver_thumbprint: None,
            })
        } else {
            let token_id = secure.tokens.current().ok_or(ChannelError::NotOpen)?;
            SecurityHeader::Symmetric { token_id }
        };

        let signature_size = if shared.mode.is_signed() {
            shared.policy.signature_size()
        } else {
            0
        };

        let chunks = split_message(
            message_type,
            secure.channel_id,
            &security_header,
            request_id,
            body,
            &secure.limits,
            signature_size,
            &mut secure.send_sequence,
        )?;

        let key: &[u8] = if message_type == MessageType::OpenSecureChannel {
            shared.policy.peer_certificate().unwrap_or_default()
        } else {
            &secure.server_nonce
        };
        let security = ChunkSecurity {
            policy: shared.policy.as_ref(),
            mode: shared.mode,
            key,
        };

        chunks
            .iter()
            .map(|chunk| encode_chunk(chunk, security))
            .collect()
    }

    async fn write_message(
        &self,
        message_type: MessageType,
        request_id: u32,
        body: &[u8],
    ) -> UaResult<()> {
        let mut writer = self.shared.writer.lock().await;
        let writer = writer.as_mut().ok_or_else(UaError::not_connected)?;

        // sequence numbers are assigned under the writer lock to keep them in wire order
        let frames = self.encode_frames(message_type, request_id, body)?;
        trace!(request_id, chunks = frames.len(), "Writing message");
        for frame in frames {
            writer.feed(frame).await?;
        }
        writer.flush().await
    }

    async fn write_raw(&self, frame: RawFrame) -> UaResult<()> {
        let mut writer = self.shared.writer.lock().await;
        let writer = writer.as_mut().ok_or_else(UaError::not_connected)?;
        writer.send(frame).await
    }
}

#[async_trait]
impl UaConnection for TcpConnection {
    async fn connect_socket(&self, endpoint_url: &str, timeout: Duration) -> UaResult<()> {
        let address = socket_address(endpoint_url)?;
        self.shared.set_state(TransportState::Connecting);

        let stream = match tokio::time::timeout(timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.shared.set_state(TransportState::Disconnected);
                return Err(ConnectionError::refused_with(endpoint_url, e).into());
            }
            Err(_) => {
                self.shared.set_state(TransportState::Disconnected);
                return Err(ConnectionError::timed_out(endpoint_url, timeout).into());
            }
        };
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let codec = FrameCodec::new(self.shared.initial_limits.max_recv_buffer_size as usize);
        *self.shared.frame_limit.lock() = Some(codec.limit_handle());
        *self.shared.writer.lock().await = Some(FramedWrite::new(write_half, codec.clone()));
        *self.shared.secure.lock() = SecureState::new(self.shared.initial_limits);

        let cancel = CancellationToken::new();
        *self.shared.cancel.lock() = Some(cancel.clone());
        let reader = FramedRead::new(read_half, codec);
        let handle = tokio::spawn(read_loop(Arc::clone(&self.shared), reader, cancel));
        *self.shared.reader.lock() = Some(handle);

        self.shared.set_state(TransportState::Connected);
        debug!(endpoint = %endpoint_url, address = %address, "Socket connected");
        Ok(())
    }

    async fn send_hello(
        &self,
        endpoint_url: &str,
        limits: TransportLimits,
    ) -> UaResult<TransportLimits> {
        let (tx, rx) = oneshot::channel();
        *self.shared.hello_waiter.lock() = Some(tx);

        let hello = HelloMessage::new(endpoint_url, &limits);
        self.write_raw(RawFrame::new(
            MessageType::Hello,
            ChunkType::Final,
            hello.encode_body(),
        ))
        .await?;

        let duration = self.shared.connect_timeout;
        let ack = match tokio::time::timeout(duration, rx).await {
            Ok(Ok(ack)) => ack?,
            Ok(Err(_)) => return Err(UaError::connection_closed("reader stopped before Acknowledge")),
            Err(_) => {
                self.shared.hello_waiter.lock().take();
                return Err(TimeoutError::Hello { duration }.into());
            }
        };

        let negotiated = ack.negotiated_limits();
        self.shared.secure.lock().limits = negotiated;
        if let Some(limit) = self.shared.frame_limit.lock().as_ref() {
            limit.store(negotiated.max_recv_buffer_size as usize, Ordering::Relaxed);
        }
        debug!(
            send_buffer = negotiated.max_send_buffer_size,
            recv_buffer = negotiated.max_recv_buffer_size,
            max_message_size = negotiated.max_message_size,
            max_chunk_count = negotiated.max_chunk_count,
            "Transport limits negotiated"
        );
        Ok(negotiated)
    }

    async fn send_request(&self, mut request: ServiceRequest) -> UaResult<ServiceResponse> {
        if !self.state().is_connected() {
            return Err(UaError::not_connected());
        }

        let service = request.service_name();
        let message_type = match &request {
            ServiceRequest::OpenSecureChannel(_) => MessageType::OpenSecureChannel,
            ServiceRequest::CloseSecureChannel(_) => MessageType::CloseSecureChannel,
            _ => MessageType::Message,
        };
        let _open_guard = if message_type == MessageType::OpenSecureChannel {
            Some(OpenGuard::acquire(&self.shared.opening)?)
        } else {
            None
        };

        self.shared.stamper.stamp(&mut request);
        let body = self.shared.codec.encode_request(&request)?;
        let request_id = self.next_request_id();

        let receiver = if message_type == MessageType::CloseSecureChannel {
            None
        } else {
            let (tx, rx) = oneshot::channel();
            self.shared.pending.lock().insert(request_id, tx);
            Some(rx)
        };

        if let Err(e) = self.write_message(message_type, request_id, &body).await {
            self.shared.pending.lock().remove(&request_id);
            return Err(e);
        }

        let Some(receiver) = receiver else {
            debug!(request_id, "CloseSecureChannel sent");
            self.shared.fail_pending(|| ChannelError::Closed.into());
            return Ok(CloseSecureChannelResponse::default().into());
        };

        let received = if request.is_publish() {
            receiver.await
        } else {
            match tokio::time::timeout(self.shared.request_timeout, receiver).await {
                Ok(received) => received,
                Err(_) => {
                    self.shared.pending.lock().remove(&request_id);
                    return Err(TimeoutError::request(service, self.shared.request_timeout).into());
                }
            }
        };

        let message = received
            .map_err(|_| UaError::connection_closed("connection dropped the request"))??;
        self.shared.codec.decode_response(&message.body)
    }

    fn install_security_token(&self, token: &ChannelSecurityToken, server_nonce: &[u8]) {
        let mut secure = self.shared.secure.lock();
        secure.channel_id = token.channel_id;
        secure.tokens.install(token.token_id);
        secure.server_nonce = server_nonce.to_vec();
        debug!(
            channel_id = token.channel_id,
            token_id = token.token_id,
            lifetime_ms = token.revised_lifetime,
            "Security token installed"
        );
    }

    fn set_authentication_token(&self, token: NodeId) {
        self.shared.stamper.set_authentication_token(token);
    }

    async fn disconnect_socket(&self) -> UaResult<()> {
        if let Some(cancel) = self.shared.cancel.lock().take() {
            cancel.cancel();
        }

        let writer = self.shared.writer.lock().await.take();
        if let Some(writer) = writer {
            let mut socket = writer.into_inner();
            if let Err(e) = socket.shutdown().await {
                debug!(error = %e, "Socket shutdown failed");
            }
        }

        let reader = self.shared.reader.lock().take();
        if let Some(handle) = reader {
            let _ = handle.await;
        }

        self.shared
            .fail_pending(|| UaError::connection_closed("connection closed by client"));
        *self.shared.secure.lock() = SecureState::new(self.shared.initial_limits);
        self.shared.set_state(TransportState::Disconnected);
        Ok(())
    }

    fn state(&self) -> TransportState {
        *self.shared.state.read()
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        if let Some(cancel) = self.shared.cancel.lock().take() {
            cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{OpenSecureChannelRequest, RequestHeader, SecurityTokenRequestType};
    use crate::security::NoSecurity;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    struct EchoCodec;

    impl ServiceCodec for EchoCodec {
        fn encode_request(&self, request: &ServiceRequest) -> UaResult<Vec<u8>> {
            Ok(request.service_name().as_bytes().to_vec())
        }

        fn decode_response(&self, _body: &[u8]) -> UaResult<ServiceResponse> {
            Ok(CloseSecureChannelResponse::default().into())
        }
    }

    fn connection(endpoint: &str) -> TcpConnection {
        let config = ClientConfig::new(endpoint);
        TcpConnection::new(&config, Arc::new(EchoCodec), Arc::new(NoSecurity))
    }

    fn open_request() -> ServiceRequest {
        OpenSecureChannelRequest {
            request_header: RequestHeader::default(),
            client_protocol_version: 0,
            request_type: SecurityTokenRequestType::Issue,
            security_mode: MessageSecurityMode::None,
            client_nonce: vec![],
            requested_lifetime: 60_000,
        }
        .into()
    }

    #[tokio::test]
    async fn test_hello_negotiates_limits() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("opc.tcp://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut header = [0u8; 8];
            socket.read_exact(&mut header).await.unwrap();
            assert_eq!(&header[..4], b"HELF");
            let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
            let mut body = vec![0u8; size - 8];
            socket.read_exact(&mut body).await.unwrap();

            let ack = AcknowledgeMessage {
                protocol_version: 0,
                receive_buffer_size: 8192,
                send_buffer_size: 16384,
                max_message_size: 1 << 20,
                max_chunk_count: 64,
            };
            let mut frame = bytes::BytesMut::new();
            let mut codec = FrameCodec::new(0);
            tokio_util::codec::Encoder::encode(
                &mut codec,
                RawFrame::new(MessageType::Acknowledge, ChunkType::Final, ack.encode_body()),
                &mut frame,
            )
            .unwrap();
            socket.write_all(&frame).await.unwrap();
            socket
        });

        let conn = connection(&endpoint);
        conn.connect_socket(&endpoint, Duration::from_secs(2)).await.unwrap();
        let limits = conn
            .send_hello(&endpoint, TransportLimits::default())
            .await
            .unwrap();
        assert_eq!(limits.max_send_buffer_size, 8192);
        assert_eq!(limits.max_recv_buffer_size, 16384);
        assert_eq!(conn.limits(), limits);

        let _socket = server.await.unwrap();
        conn.disconnect_socket().await.unwrap();
        assert_eq!(conn.state(), TransportState::Disconnected);
    }

    #[tokio::test]
    async fn test_pending_request_fails_when_socket_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("opc.tcp://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let _ = socket.read(&mut buf).await;
            drop(socket);
        });

        let conn = connection(&endpoint);
        conn.connect_socket(&endpoint, Duration::from_secs(2)).await.unwrap();
        let err = conn.send_request(open_request()).await.unwrap_err();
        assert!(err.is_connection_loss());
        server.await.unwrap();
        assert_eq!(conn.state(), TransportState::Failed);
    }

    #[tokio::test]
    async fn test_request_before_connect() {
        let conn = connection("opc.tcp://127.0.0.1:1");
        let err = conn.send_request(open_request()).await.unwrap_err();
        assert!(matches!(
            err,
            UaError::Connection(ConnectionError::NotConnected)
        ));
    }
}
