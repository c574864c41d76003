#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    io,
    rc::Rc,
};

use bytes::{Bytes, BytesMut};
use futures::{
    channel::oneshot,
    future::{FutureExt, LocalBoxFuture},
};
use url::Url;
use wschannel::{
    codec::{Decoder, Encoder},
    Channel, Client, DeferredPayload, Frame, OpCode, Options, Role, Transport, WebSocketError,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected(String, String),
    Text(String),
    Binary(Vec<u8>),
    ClosingStarted,
    Closed(bool, u16, String),
    /// `Debug` rendering of the error.
    Error(String),
    Buffered(usize),
}

/// Records callbacks, optionally closing the channel from inside `on_text_message`.
#[derive(Default)]
pub struct MockClient {
    pub events: RefCell<Vec<Event>>,
    pub channel: RefCell<Option<Channel>>,
    pub close_on_text: Cell<bool>,
}

impl MockClient {
    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                Event::Error(err) => Some(err.clone()),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Event) {
        self.events.borrow_mut().push(event);
    }
}

impl Client for MockClient {
    fn on_connected(&self, protocol: &str, extensions: &str) {
        self.push(Event::Connected(protocol.to_owned(), extensions.to_owned()));
    }

    fn on_text_message(&self, text: String) {
        self.push(Event::Text(text));
        if self.close_on_text.get() {
            if let Some(channel) = self.channel.borrow().as_ref() {
                channel.close(Some(1000), "").unwrap();
            }
        }
    }

    fn on_binary_message(&self, data: Bytes) {
        self.push(Event::Binary(data.to_vec()));
    }

    fn on_closing_handshake_started(&self) {
        self.push(Event::ClosingStarted);
    }

    fn on_closed(&self, was_clean: bool, code: u16, reason: &str) {
        self.push(Event::Closed(was_clean, code, reason.to_owned()));
    }

    fn on_error(&self, error: &WebSocketError) {
        self.push(Event::Error(format!("{error:?}")));
    }

    fn on_buffered_amount_update(&self, amount: usize) {
        self.push(Event::Buffered(amount));
    }
}

/// Collects written chunks; each `send` call carries exactly one frame.
#[derive(Default)]
pub struct MockTransport {
    pub sent: RefCell<Vec<Vec<u8>>>,
    pub refuse: Cell<bool>,
    pub closed: Cell<usize>,
    pub disconnected: Cell<usize>,
    pub buffered: Cell<usize>,
}

impl Transport for MockTransport {
    fn send(&self, data: &[u8]) -> bool {
        if self.refuse.get() {
            return false;
        }
        self.sent.borrow_mut().push(data.to_vec());
        true
    }

    fn close(&self) {
        self.closed.set(self.closed.get() + 1);
    }

    fn disconnect(&self) {
        self.disconnected.set(self.disconnected.get() + 1);
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.get()
    }
}

/// A frame as the server received it.
#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub opcode: OpCode,
    pub rsv1: bool,
    pub payload: Vec<u8>,
}

impl MockTransport {
    /// Decodes everything written so far the way a server would, which also checks masking.
    pub fn frames(&self) -> Vec<Sent> {
        let mut decoder = Decoder::new(Role::Server, usize::MAX);
        decoder.set_allow_rsv1(true);
        self.sent
            .borrow()
            .iter()
            .map(|chunk| {
                let (frame, consumed) = decoder.decode(chunk, false).unwrap().unwrap();
                assert_eq!(consumed, chunk.len());
                assert!(frame.is_masked());
                assert!(frame.fin);
                Sent {
                    opcode: frame.opcode,
                    rsv1: frame.rsv1,
                    payload: frame.unmasked_payload().into_owned(),
                }
            })
            .collect()
    }
}

pub struct Harness {
    pub channel: Channel,
    pub client: Rc<MockClient>,
    pub transport: Rc<MockTransport>,
}

impl Harness {
    /// A channel still waiting for its handshake.
    pub fn connecting(options: Options) -> Self {
        let client = Rc::new(MockClient::default());
        let transport = Rc::new(MockTransport::default());
        let client_weak = Rc::downgrade(&client);
        let transport_weak = Rc::downgrade(&transport);
        let channel = Channel::new(client_weak, transport_weak, options);
        channel
            .connect(Url::parse("ws://localhost:9001/socket").unwrap(), &[])
            .unwrap();
        Self {
            channel,
            client,
            transport,
        }
    }

    /// A channel past its handshake, with the `Connected` event already cleared.
    pub fn open(options: Options) -> Self {
        let harness = Self::connecting(options);
        harness.channel.did_connect("", "");
        harness.client.events.borrow_mut().clear();
        harness
    }

    pub fn receive(&self, data: &[u8]) {
        self.channel.did_receive_data(data);
    }
}

/// Serializes a frame the way a server sends it: unmasked.
pub fn server_frame(fin: bool, opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    let mut dst = BytesMut::new();
    Encoder::new(Role::Server).encode_frame(Frame::new(fin, opcode, payload), &mut dst);
    dst.to_vec()
}

pub fn server_close(code: u16, reason: &str) -> Vec<u8> {
    let mut payload = code.to_be_bytes().to_vec();
    payload.extend_from_slice(reason.as_bytes());
    server_frame(true, OpCode::Close, &payload)
}

pub fn close_payload(code: u16, reason: &str) -> Vec<u8> {
    let mut payload = code.to_be_bytes().to_vec();
    payload.extend_from_slice(reason.as_bytes());
    payload
}

/// A deferred payload released by the test through a oneshot.
pub struct Gate {
    rx: RefCell<Option<oneshot::Receiver<io::Result<Bytes>>>>,
    pub started: Cell<usize>,
}

impl Gate {
    pub fn new() -> (Rc<Self>, oneshot::Sender<io::Result<Bytes>>) {
        let (tx, rx) = oneshot::channel();
        let gate = Rc::new(Self {
            rx: RefCell::new(Some(rx)),
            started: Cell::new(0),
        });
        (gate, tx)
    }
}

impl DeferredPayload for Gate {
    fn materialize(&self) -> LocalBoxFuture<'static, io::Result<Bytes>> {
        self.started.set(self.started.get() + 1);
        let rx = self.rx.borrow_mut().take();
        async move {
            match rx {
                Some(rx) => rx
                    .await
                    .unwrap_or_else(|_| Err(io::Error::other("gate dropped"))),
                None => Err(io::Error::other("materialized twice")),
            }
        }
        .boxed_local()
    }
}

/// Lets spawned local tasks run until `done` holds, giving up after a few rounds.
pub async fn settle(done: impl Fn() -> bool) {
    for _ in 0..20 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
    }
}
