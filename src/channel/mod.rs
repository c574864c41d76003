//! The protocol engine tying frames, buffers and the outgoing queue to a transport and a client.
//!
//! A [`Channel`] never performs I/O by itself. The host forwards transport events to the
//! `did_*` methods, application calls to `send_*`/[`Channel::close`], and receives everything
//! that happens on the connection through its [`Client`] implementation.
//!
//! Callbacks may call back into the channel (for example `close()` from inside
//! `on_text_message`). The channel never holds a borrow of its state while a callback runs, and
//! every entry point keeps the state alive until it returns, even if the callback drops the
//! host's last handle.
mod receive;
mod send;

use std::{
    cell::{RefCell, RefMut},
    fmt,
    rc::{Rc, Weak},
};

use bytes::Bytes;
use tokio::task::JoinHandle;
use url::Url;

use crate::{
    buffer::ReceiveBuffer,
    close::{self, CloseCode, CloseInfo, MAX_REASON_LEN},
    codec::{Decoder, Encoder, Role},
    compression::Compression,
    fragment::ContinuationState,
    frame::OpCode,
    materializer::{DeferredPayload, Materializer},
    options::{Options, CLOSING_TIMEOUT},
    queue::{OutgoingMessage, OutgoingQueue, QueueStatus},
    Result, WebSocketError,
};

/// Receives everything that happens on a [`Channel`].
///
/// Callbacks run synchronously on the thread driving the channel.
pub trait Client {
    /// The opening handshake completed.
    fn on_connected(&self, protocol: &str, extensions: &str);

    fn on_text_message(&self, text: String);

    fn on_binary_message(&self, data: Bytes);

    /// The channel entered the closing handshake, initiated by either side.
    fn on_closing_handshake_started(&self) {}

    /// The connection is gone. Called at most once, after which the client is detached.
    ///
    /// `was_clean` is `true` only if Close frames were exchanged in both directions, nothing
    /// failed and the transport confirmed the closure with no data left unsent.
    fn on_closed(&self, was_clean: bool, code: u16, reason: &str);

    /// The channel failed. Called at most once; `on_closed` follows when the transport goes away.
    fn on_error(&self, error: &WebSocketError);

    fn on_buffered_amount_update(&self, _amount: usize) {}
}

/// The byte stream a [`Channel`] writes serialized frames to.
pub trait Transport {
    /// Hands `data` to the stream. Returning `false` fails the channel.
    fn send(&self, data: &[u8]) -> bool;

    /// Gracefully closes the stream once the closing handshake is complete.
    fn close(&self) {
        self.disconnect();
    }

    /// Tears the stream down immediately.
    fn disconnect(&self);

    /// Bytes accepted by [`Transport::send`] that have not been written out yet.
    fn buffered_amount(&self) -> usize;
}

/// Lifecycle of a [`Channel`]. `Closed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the opening handshake.
    Connecting,
    Open,
    /// Our Close frame is queued or sent; waiting for the server's.
    ClosingSent,
    /// Both Close frames are queued or exchanged; waiting for the transport to close.
    ClosingReceivedAndSent,
    Closed,
    Failed,
}

impl ConnectionState {
    pub fn is_closing(&self) -> bool {
        matches!(self, Self::ClosingSent | Self::ClosingReceivedAndSent)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::ClosingSent => "closing (sent)",
            Self::ClosingReceivedAndSent => "closing (received and sent)",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The single slot for deferred payloads.
#[derive(Debug)]
enum Materialization {
    Idle,
    InFlight(Materializer),
    /// The last materialization failed; the channel is failing and nothing is sent anymore.
    Failed,
}

struct Shared {
    state: ConnectionState,
    url: Option<Url>,
    protocols: Vec<String>,
    options: Options,
    decoder: Decoder,
    encoder: Encoder,
    compression: Option<Compression>,
    client: Option<Weak<dyn Client>>,
    transport: Option<Weak<dyn Transport>>,
    buffer: ReceiveBuffer,
    continuation: ContinuationState,
    queue: OutgoingQueue,
    materialization: Materialization,
    closing_timer: Option<JoinHandle<()>>,
    close_info: Option<CloseInfo>,
    protocol: String,
    extensions: String,

    /// Received bytes are dropped instead of buffered.
    discard_received: bool,
    suspended: bool,
    /// The receive loop is running further up the stack.
    processing: bool,
    /// The outgoing queue is being drained further up the stack.
    draining: bool,
    transport_closed: bool,
    /// `on_closed` is owed, to be delivered on `resume()`.
    close_pending: bool,
    close_enqueued: bool,
    close_sent: bool,
    close_received: bool,
    failed: bool,
    unhandled_buffered_amount: usize,
}

impl Shared {
    fn client(&self) -> Option<Rc<dyn Client>> {
        self.client.as_ref().and_then(Weak::upgrade)
    }

    fn transport(&self) -> Option<Rc<dyn Transport>> {
        self.transport.as_ref().and_then(Weak::upgrade)
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(timer) = self.closing_timer.take() {
            timer.abort();
        }
    }
}

struct Inner {
    shared: RefCell<Shared>,
}

/// A client-side WebSocket connection.
///
/// `Channel` is a cheap handle; clones refer to the same connection.
#[derive(Clone)]
pub struct Channel {
    inner: Rc<Inner>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.shared.try_borrow() {
            Ok(shared) => f
                .debug_struct("Channel")
                .field("state", &shared.state)
                .field("url", &shared.url.as_ref().map(Url::as_str))
                .field("queued", &shared.queue.len())
                .field("buffered", &shared.buffer.len())
                .finish(),
            Err(_) => f.debug_struct("Channel").finish_non_exhaustive(),
        }
    }
}

impl Channel {
    /// Creates a channel in the `Connecting` state.
    ///
    /// Both collaborators are held weakly: the channel stops reporting to a dropped client and
    /// treats a dropped transport as unable to send.
    pub fn new(client: Weak<dyn Client>, transport: Weak<dyn Transport>, options: Options) -> Self {
        let shared = Shared {
            state: ConnectionState::Connecting,
            url: None,
            protocols: Vec::new(),
            decoder: Decoder::new(Role::Client, options.payload_limit()),
            encoder: Encoder::new(Role::Client),
            compression: None,
            client: Some(client),
            transport: Some(transport),
            buffer: ReceiveBuffer::new(options.read_buffer_limit()),
            continuation: ContinuationState::Idle,
            queue: OutgoingQueue::new(),
            materialization: Materialization::Idle,
            closing_timer: None,
            close_info: None,
            protocol: String::new(),
            extensions: String::new(),
            options,
            discard_received: false,
            suspended: false,
            processing: false,
            draining: false,
            transport_closed: false,
            close_pending: false,
            close_enqueued: false,
            close_sent: false,
            close_received: false,
            failed: false,
            unhandled_buffered_amount: 0,
        };

        Self {
            inner: Rc::new(Inner {
                shared: RefCell::new(shared),
            }),
        }
    }

    fn from_weak(inner: &Weak<Inner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    fn downgrade(&self) -> Weak<Inner> {
        Rc::downgrade(&self.inner)
    }

    fn shared(&self) -> RefMut<'_, Shared> {
        self.inner.shared.borrow_mut()
    }

    fn client(&self) -> Option<Rc<dyn Client>> {
        self.inner.shared.borrow().client()
    }

    fn transport(&self) -> Option<Rc<dyn Transport>> {
        self.inner.shared.borrow().transport()
    }

    /// Validates and records the target of the connection.
    ///
    /// `url` must use the `ws` or `wss` scheme. Each requested sub-protocol must be a non-empty
    /// HTTP token and appear only once. The opening handshake itself is performed by the host,
    /// which reports its outcome through [`Channel::did_connect`] or [`Channel::fail`].
    pub fn connect(&self, url: Url, protocols: &[&str]) -> Result<()> {
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(WebSocketError::InvalidHttpScheme);
        }
        for (i, protocol) in protocols.iter().enumerate() {
            if protocol.is_empty() || !protocol.bytes().all(is_token_char) {
                return Err(WebSocketError::InvalidProtocol(protocol.to_string()));
            }
            if protocols[..i].contains(protocol) {
                return Err(WebSocketError::InvalidProtocol(protocol.to_string()));
            }
        }

        let mut shared = self.shared();
        if shared.state != ConnectionState::Connecting || shared.url.is_some() {
            return Err(WebSocketError::AlreadyConnecting);
        }

        #[cfg(feature = "logging")]
        log::debug!("Connecting to {url} (protocols: {protocols:?})");

        shared.url = Some(url);
        shared.protocols = protocols.iter().map(|p| p.to_string()).collect();
        Ok(())
    }

    /// The transport opened its stream; the opening handshake can start.
    pub fn did_open(&self) {
        #[cfg(feature = "logging")]
        {
            let shared = self.inner.shared.borrow();
            log::debug!(
                "Transport open for {}",
                shared.url.as_ref().map(Url::as_str).unwrap_or_default()
            );
        }
    }

    /// The opening handshake succeeded with the given negotiated sub-protocol and extensions.
    ///
    /// Fails the channel if the server accepted permessage-deflate without it being offered
    /// or with a malformed parameter list.
    pub fn did_connect(&self, protocol: &str, extensions: &str) {
        let this = self.clone();

        let negotiated = {
            let shared = this.inner.shared.borrow();
            if shared.state != ConnectionState::Connecting {
                return;
            }
            Compression::negotiate(shared.options.compression.as_ref(), extensions)
        };
        let compression = match negotiated {
            Ok(compression) => compression,
            Err(err) => return this.fail(err),
        };

        let client = {
            let mut shared = this.shared();
            shared.decoder.set_allow_rsv1(compression.is_some());
            shared.compression = compression;
            shared.protocol = protocol.to_owned();
            shared.extensions = extensions.to_owned();
            shared.state = ConnectionState::Open;
            shared.client()
        };

        #[cfg(feature = "logging")]
        log::debug!("Connection open (protocol: {protocol:?}, extensions: {extensions:?})");

        if let Some(client) = client {
            client.on_connected(protocol, extensions);
        }

        this.process_buffer();
    }

    /// Feeds bytes read from the transport.
    pub fn did_receive_data(&self, data: &[u8]) {
        let this = self.clone();
        {
            let mut shared = this.shared();
            if shared.discard_received || shared.state.is_terminal() || data.is_empty() {
                return;
            }
            shared.buffer.append(data);
        }
        this.process_buffer();
    }

    /// The transport's stream is closed.
    ///
    /// Cancels the closing timer and anything still queued, then reports `on_closed`, unless
    /// the channel is suspended, in which case the report waits for [`Channel::resume`].
    pub fn did_close(&self) {
        let this = self.clone();

        let transport = {
            let mut shared = this.shared();
            if shared.transport_closed {
                return;
            }
            shared.transport_closed = true;
            if let Some(timer) = shared.closing_timer.take() {
                timer.abort();
            }
            shared.transport()
        };
        let unhandled = transport.map_or(0, |transport| transport.buffered_amount());

        #[cfg(feature = "logging")]
        log::debug!("Transport closed ({unhandled} bytes unsent)");

        this.abort_outgoing_queue();

        let suspended = {
            let mut shared = this.shared();
            shared.unhandled_buffered_amount = unhandled;
            if shared.state != ConnectionState::Failed {
                shared.state = ConnectionState::Closed;
            }
            if shared.suspended {
                shared.close_pending = true;
            }
            shared.suspended
        };
        if !suspended {
            this.deliver_closed();
        }
    }

    /// The transport hit an error.
    pub fn did_fail(&self, message: &str) {
        self.fail(WebSocketError::Transport(message.to_owned()));
    }

    /// The transport's buffered amount changed.
    pub fn did_update_buffered_amount(&self, amount: usize) {
        if let Some(client) = self.client() {
            client.on_buffered_amount_update(amount);
        }
    }

    /// Queues `message` for sending.
    ///
    /// Returns a usage error if the channel is not open; delivery problems surface later
    /// through [`Client::on_error`].
    pub fn send(&self, message: OutgoingMessage) -> Result<()> {
        let this = self.clone();
        {
            let mut shared = this.shared();
            match shared.state {
                ConnectionState::Open => {}
                ConnectionState::Connecting => return Err(WebSocketError::NotConnected),
                _ => return Err(WebSocketError::ConnectionClosed),
            }

            #[cfg(feature = "logging")]
            if !message.internal {
                log::trace!("Queueing {:?} message", message.opcode);
            }

            shared.queue.push_back(message);
        }
        this.process_outgoing_queue();
        Ok(())
    }

    pub fn send_text(&self, text: &str) -> Result<()> {
        self.send(OutgoingMessage::text(text))
    }

    /// Sends `length` bytes of `data` starting at `offset` as a binary message.
    pub fn send_binary(&self, data: &[u8], offset: usize, length: usize) -> Result<()> {
        let range = offset
            .checked_add(length)
            .filter(|end| *end <= data.len())
            .map(|end| offset..end)
            .ok_or(WebSocketError::InvalidRange {
                offset,
                length,
                len: data.len(),
            })?;
        self.send(OutgoingMessage::binary(Bytes::copy_from_slice(&data[range])))
    }

    /// Sends a binary message whose bytes are produced asynchronously.
    ///
    /// The payload is materialized when it reaches the front of the queue; messages queued
    /// after it wait. Must be called inside a [`tokio::task::LocalSet`].
    pub fn send_deferred(&self, payload: Rc<dyn DeferredPayload>) -> Result<()> {
        self.send(OutgoingMessage::deferred(payload))
    }

    /// Serializes `data` to JSON and sends it as a text message.
    #[cfg(feature = "json")]
    #[cfg_attr(docsrs, doc(cfg(feature = "json")))]
    pub fn send_json<T: serde::Serialize>(&self, data: &T) -> Result<()> {
        let text = serde_json::to_string(data)?;
        self.send(OutgoingMessage::text(text))
    }

    /// Starts the closing handshake.
    ///
    /// `code` must be 1000 or within 3000-4999; a reason without a code is sent with 1000.
    /// The reason may hold at most 123 bytes. Closing a channel that is still connecting fails
    /// it; closing one that is already closing or closed does nothing.
    ///
    /// Arms the closing timer ([`CLOSING_TIMEOUT`]), so this must be called inside a
    /// [`tokio::task::LocalSet`].
    pub fn close(&self, code: Option<u16>, reason: &str) -> Result<()> {
        if let Some(code) = code {
            if !CloseCode::from(code).is_sendable_by_client() {
                return Err(WebSocketError::InvalidCloseCodeArgument(code));
            }
        }
        if reason.len() > MAX_REASON_LEN {
            return Err(WebSocketError::InvalidCloseReason);
        }
        let code = match code {
            None if !reason.is_empty() => Some(CloseCode::Normal.into()),
            code => code,
        };

        let this = self.clone();
        let state = this.inner.shared.borrow().state;
        match state {
            ConnectionState::Connecting => {
                this.fail(WebSocketError::ClosedBeforeOpen);
                return Ok(());
            }
            ConnectionState::Open => {}
            _ => return Ok(()),
        }

        if let Some(code) = code {
            this.shared()
                .close_info
                .get_or_insert_with(|| CloseInfo::new(code, reason));
        }

        #[cfg(feature = "logging")]
        log::debug!("Closing with code {code:?} reason {reason:?}");

        this.start_closing_handshake(code, reason);
        this.arm_closing_timer();
        Ok(())
    }

    /// Stops delivering received data. Incoming bytes keep being buffered.
    pub fn suspend(&self) {
        self.shared().suspended = true;
    }

    /// Continues delivery where [`Channel::suspend`] stopped it, then reports a close that
    /// happened in the meantime.
    pub fn resume(&self) {
        let this = self.clone();
        this.shared().suspended = false;
        this.process_buffer();

        let deliver = {
            let mut shared = this.shared();
            let deliver = shared.close_pending && !shared.suspended;
            if deliver {
                shared.close_pending = false;
            }
            deliver
        };
        if deliver {
            this.deliver_closed();
        }
    }

    /// Bytes the transport has accepted but not written yet; `0` once it is gone.
    pub fn buffered_amount(&self) -> usize {
        self.transport()
            .map_or(0, |transport| transport.buffered_amount())
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.borrow().state
    }

    /// The close status recorded so far, if any.
    pub fn close_info(&self) -> Option<CloseInfo> {
        self.inner.shared.borrow().close_info.clone()
    }

    pub fn url(&self) -> Option<Url> {
        self.inner.shared.borrow().url.clone()
    }

    /// Sub-protocols passed to [`Channel::connect`].
    pub fn requested_protocols(&self) -> Vec<String> {
        self.inner.shared.borrow().protocols.clone()
    }

    /// The sub-protocol selected by the server; empty until connected or if none.
    pub fn protocol(&self) -> String {
        self.inner.shared.borrow().protocol.clone()
    }

    /// The extensions accepted by the server; empty until connected or if none.
    pub fn extensions(&self) -> String {
        self.inner.shared.borrow().extensions.clone()
    }

    /// The `Sec-WebSocket-Extensions` value the handshake should offer.
    pub fn extension_offer(&self) -> Option<String> {
        self.inner.shared.borrow().options.extension_offer()
    }

    pub fn is_suspended(&self) -> bool {
        self.inner.shared.borrow().suspended
    }

    /// Detaches the client and tears everything down without a closing handshake.
    ///
    /// No callbacks are made afterwards. An in-flight deferred payload is cancelled and the
    /// transport is disconnected.
    pub fn disconnect(&self) {
        let this = self.clone();
        let transport = {
            let mut shared = this.shared();
            shared.client = None;
            shared.discard_received = true;
            shared.buffer.clear();
            shared.continuation.clear();
            if let Some(timer) = shared.closing_timer.take() {
                timer.abort();
            }
            let transport = shared.transport.take();
            if shared.transport_closed {
                None
            } else {
                transport.and_then(|transport| transport.upgrade())
            }
        };

        #[cfg(feature = "logging")]
        log::debug!("Disconnecting");

        this.abort_outgoing_queue();
        if let Some(transport) = transport {
            transport.disconnect();
        }
    }

    /// Fails the connection: received data is dropped, the client gets `on_error` and the
    /// transport is disconnected. Only the first failure is reported, and none once the
    /// channel is closed.
    ///
    /// The host calls this directly when the opening handshake fails.
    pub fn fail(&self, error: WebSocketError) {
        let this = self.clone();
        let (client, transport) = {
            let mut shared = this.shared();
            if shared.failed || shared.state.is_terminal() {
                return;
            }
            shared.failed = true;
            shared.state = ConnectionState::Failed;
            shared.discard_received = true;
            if let Some(timer) = shared.closing_timer.take() {
                timer.abort();
            }
            shared.buffer.clear();
            shared.continuation.clear();
            let transport = if shared.transport_closed {
                None
            } else {
                shared.transport()
            };
            (shared.client(), transport)
        };

        #[cfg(feature = "logging")]
        log::warn!("Channel failed ({}): {error}", u16::from(error.close_code()));

        if let Some(client) = client {
            client.on_error(&error);
        }
        if let Some(transport) = transport {
            transport.disconnect();
        }
        this.abort_outgoing_queue();
    }

    /// Queues our Close frame (unless one is queued already) and moves into a closing state.
    fn start_closing_handshake(&self, code: Option<u16>, reason: &str) {
        let (started, client) = {
            let mut shared = self.shared();
            if !shared.close_enqueued {
                shared.close_enqueued = true;
                shared
                    .queue
                    .push_back(OutgoingMessage::control(OpCode::Close, close::payload(code, reason)));
                if shared.queue.status() == QueueStatus::Open {
                    shared.queue.set_status(QueueStatus::Closing);
                }
            }
            let started = shared.state == ConnectionState::Open;
            if started || shared.state.is_closing() {
                shared.state = if shared.close_received {
                    ConnectionState::ClosingReceivedAndSent
                } else {
                    ConnectionState::ClosingSent
                };
            }
            (started, shared.client())
        };

        if started {
            if let Some(client) = client {
                client.on_closing_handshake_started();
            }
        }
        self.process_outgoing_queue();
    }

    /// The server's Close frame arrived.
    fn did_receive_close(&self, info: CloseInfo) {
        #[cfg(feature = "logging")]
        log::debug!("Received close frame: {} {:?}", info.code, info.reason);

        let code = (info.code != u16::from(CloseCode::Status)).then_some(info.code);
        {
            let mut shared = self.shared();
            shared.close_received = true;
            shared.discard_received = true;
            shared.buffer.clear();
            shared.continuation.clear();
            if shared.close_info.is_none() {
                shared.close_info = Some(info);
            }
        }
        self.start_closing_handshake(code, "");
    }

    fn arm_closing_timer(&self) {
        let mut shared = self.shared();
        if shared.close_received || shared.transport_closed || shared.closing_timer.is_some() {
            return;
        }
        if shared.state != ConnectionState::ClosingSent {
            return;
        }

        let weak = self.downgrade();
        shared.closing_timer = Some(tokio::task::spawn_local(async move {
            tokio::time::sleep(CLOSING_TIMEOUT).await;
            if let Some(channel) = Channel::from_weak(&weak) {
                channel.closing_timer_expired();
            }
        }));
    }

    fn closing_timer_expired(&self) {
        let transport = {
            let mut shared = self.shared();
            // dropping our own handle detaches it
            shared.closing_timer = None;
            if shared.transport_closed {
                return;
            }
            shared.transport()
        };

        #[cfg(feature = "logging")]
        log::warn!("Closing handshake timed out after {CLOSING_TIMEOUT:?}");

        if let Some(transport) = transport {
            transport.disconnect();
        }
    }

    /// Reports `on_closed` and detaches the client.
    fn deliver_closed(&self) {
        let (client, was_clean, info) = {
            let mut shared = self.shared();
            let client = shared.client.take().and_then(|client| client.upgrade());
            shared.transport = None;
            let was_clean = shared.close_sent
                && shared.close_received
                && !shared.failed
                && shared.unhandled_buffered_amount == 0;
            let info = if shared.failed {
                CloseInfo::abnormal()
            } else {
                shared.close_info.clone().unwrap_or_else(CloseInfo::abnormal)
            };
            (client, was_clean, info)
        };

        #[cfg(feature = "logging")]
        log::debug!(
            "Closed (clean: {was_clean}, code: {}, reason: {:?})",
            info.code,
            info.reason
        );

        if let Some(client) = client {
            client.on_closed(was_clean, info.code, &info.reason);
        }
    }
}

/// RFC 2616 token characters: visible ASCII except separators.
fn is_token_char(c: u8) -> bool {
    (0x21..=0x7e).contains(&c) && !b"()<>@,;:\\\"/[]?={}".contains(&c)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nobody;

    impl Client for Nobody {
        fn on_connected(&self, _: &str, _: &str) {}
        fn on_text_message(&self, _: String) {}
        fn on_binary_message(&self, _: Bytes) {}
        fn on_closed(&self, _: bool, _: u16, _: &str) {}
        fn on_error(&self, _: &WebSocketError) {}
    }

    struct Sink;

    impl Transport for Sink {
        fn send(&self, _: &[u8]) -> bool {
            true
        }
        fn disconnect(&self) {}
        fn buffered_amount(&self) -> usize {
            0
        }
    }

    fn channel() -> (Channel, Rc<Nobody>, Rc<Sink>) {
        let client = Rc::new(Nobody);
        let transport = Rc::new(Sink);
        let client_weak = Rc::downgrade(&client);
        let transport_weak = Rc::downgrade(&transport);
        let channel = Channel::new(client_weak, transport_weak, Options::default());
        (channel, client, transport)
    }

    #[test]
    fn test_connect_validates_scheme() {
        let (channel, _client, _transport) = channel();
        let url = Url::parse("http://example.com").unwrap();
        assert!(matches!(
            channel.connect(url, &[]),
            Err(WebSocketError::InvalidHttpScheme)
        ));
        assert!(channel.url().is_none());
    }

    #[test]
    fn test_connect_validates_protocols() {
        let (channel, _client, _transport) = channel();
        let url = Url::parse("wss://example.com/chat").unwrap();
        for bad in [&["a b"][..], &[""], &["chat", "chat"], &["x,y"]] {
            assert!(matches!(
                channel.connect(url.clone(), bad),
                Err(WebSocketError::InvalidProtocol(_))
            ));
        }

        channel.connect(url.clone(), &["chat", "superchat"]).unwrap();
        assert_eq!(channel.requested_protocols(), vec!["chat", "superchat"]);
        assert_eq!(channel.url(), Some(url.clone()));
        assert!(matches!(
            channel.connect(url, &[]),
            Err(WebSocketError::AlreadyConnecting)
        ));
    }

    #[test]
    fn test_send_before_open() {
        let (channel, _client, _transport) = channel();
        assert!(matches!(
            channel.send_text("early"),
            Err(WebSocketError::NotConnected)
        ));
    }

    #[test]
    fn test_close_argument_validation() {
        let (channel, _client, _transport) = channel();
        channel.did_connect("", "");

        assert!(matches!(
            channel.close(Some(1001), ""),
            Err(WebSocketError::InvalidCloseCodeArgument(1001))
        ));
        assert!(matches!(
            channel.close(Some(1000), &"x".repeat(124)),
            Err(WebSocketError::InvalidCloseReason)
        ));
        assert_eq!(channel.state(), ConnectionState::Open);
    }

    #[test]
    fn test_close_while_connecting_fails() {
        let (channel, _client, _transport) = channel();
        channel.close(None, "").unwrap();
        assert_eq!(channel.state(), ConnectionState::Failed);
    }

    #[test]
    fn test_send_binary_range() {
        let (channel, _client, _transport) = channel();
        channel.did_connect("", "");

        assert!(channel.send_binary(b"abcdef", 2, 4).is_ok());
        assert!(matches!(
            channel.send_binary(b"abcdef", 3, 4),
            Err(WebSocketError::InvalidRange { offset: 3, length: 4, len: 6 })
        ));
        assert!(matches!(
            channel.send_binary(b"abcdef", usize::MAX, 2),
            Err(WebSocketError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_ping_after_transport_close_is_dropped() {
        let (channel, _client, _transport) = channel();
        channel.did_connect("", "");
        channel.suspend();
        channel.did_receive_data(&[0x89, 0x02, b'h', b'i']);
        channel.did_close();
        channel.resume();

        assert_eq!(channel.state(), ConnectionState::Closed);
        assert!(channel.inner.shared.borrow().queue.is_empty());
    }

    #[test]
    fn test_token_chars() {
        assert!(b"chat.v2-beta_1".iter().all(|c| is_token_char(*c)));
        for c in b" \t,;=\"/()" {
            assert!(!is_token_char(*c));
        }
    }

    #[test]
    fn test_state_helpers() {
        assert!(ConnectionState::ClosingSent.is_closing());
        assert!(!ConnectionState::Open.is_closing());
        assert!(ConnectionState::Failed.is_terminal());
        assert_eq!(ConnectionState::Open.to_string(), "open");
    }
}
