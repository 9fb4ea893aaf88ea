//! User-facing connection handle.
//!
//! [`WebClient`] configures a request, spawns or reuses a connection driver,
//! and plays the serialized dispatcher: events posted by the driver are
//! delivered to the registered delegates from [`WebClient::pump`] /
//! [`WebClient::poll_events`], one at a time, on the caller's task. All
//! state a delegate can observe is updated here, never on the I/O side.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::runtime::Handle;
use tokio_util::codec::Encoder as _;
use tracing::{debug, error};
use webwire_codec::{CloseCode, Frame, FrameCodec};

use crate::{
    config::ClientConfig,
    conn::{self, Command, ConnHandle, Event},
    error::Result,
    h1::RequestPlan,
    headers::Headers,
    response::Response,
    url::Target,
};

/// Connection state as reported to the state receiver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketState {
    /// No connection, or a client-initiated close has completed.
    Closed,
    /// Resolving, dialing or handshaking.
    Connecting,
    /// Transport established; requests and frames may flow.
    Connected,
    /// Client-initiated close in progress.
    Closing,
    /// The peer (or the network) ended the connection.
    Disconnected,
    /// Transient state between a disconnect and the automatic retry.
    Retry,
}

type StateReceiver = Box<dyn FnMut(SocketState) + Send>;
type DataReceiver = Box<dyn FnMut(Response) + Send>;
type FrameReceiver = Box<dyn FnMut(Frame) + Send>;
type ErrorHandler = Box<dyn FnMut() + Send>;

#[derive(Default)]
struct Delegates {
    state: Option<StateReceiver>,
    data: Option<DataReceiver>,
    frame: Option<FrameReceiver>,
    error: Option<ErrorHandler>,
}

/// One logical client connection: request configuration, delegates, and the
/// dispatch loop over the driver's events.
pub struct WebClient {
    config: Arc<ClientConfig>,
    target: Target,
    method: String,
    headers: Headers,
    body: Bytes,
    delegates: Delegates,
    state: SocketState,
    conn: Option<ConnHandle>,
    encoder: FrameCodec,
    retry_attempts: u32,
    websocket: bool,
}

impl WebClient {
    pub(crate) fn new(config: Arc<ClientConfig>, target: Target) -> Self {
        Self {
            config,
            target,
            method: "GET".to_string(),
            headers: Headers::new(),
            body: Bytes::new(),
            delegates: Delegates::default(),
            state: SocketState::Closed,
            conn: None,
            encoder: FrameCodec::client(),
            retry_attempts: 0,
            websocket: false,
        }
    }

    // ==================== configuration ====================

    pub fn state(&self) -> SocketState {
        self.state
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Binds a new URL. Resets the retry budget.
    pub fn set_url(&mut self, url: &str) -> Result<()> {
        self.target = Target::parse(url)?;
        self.retry_attempts = 0;
        Ok(())
    }

    pub(crate) fn rebind(&mut self, target: Target) {
        self.target = target;
        self.retry_attempts = 0;
    }

    /// Sets the request method; `GET` by default.
    pub fn set_request_type(&mut self, method: impl Into<String>) {
        self.method = method.into();
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// Replaces the header set, or merges into it when `merge` is true.
    pub fn set_headers(&mut self, headers: Headers, merge: bool) {
        if merge {
            self.headers.merge(&headers);
        } else {
            self.headers = headers;
        }
    }

    /// Body for POST and PUT requests.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    pub fn set_state_receiver(&mut self, receiver: impl FnMut(SocketState) + Send + 'static) {
        self.delegates.state = Some(Box::new(receiver));
    }

    pub fn set_data_receiver(&mut self, receiver: impl FnMut(Response) + Send + 'static) {
        self.delegates.data = Some(Box::new(receiver));
    }

    pub fn set_frame_receiver(&mut self, receiver: impl FnMut(Frame) + Send + 'static) {
        self.delegates.frame = Some(Box::new(receiver));
    }

    pub fn set_error_handler(&mut self, handler: impl FnMut() + Send + 'static) {
        self.delegates.error = Some(Box::new(handler));
    }

    pub fn clear_delegates(&mut self) {
        self.delegates = Delegates::default();
    }

    // ==================== lifecycle ====================

    /// Emits one request, connecting or reusing the live connection.
    ///
    /// Returns `false` only when no tokio runtime is available; every other
    /// failure is delivered asynchronously through the delegates.
    pub fn send(&mut self) -> bool {
        if Handle::try_current().is_err() {
            return false;
        }

        let websocket = self.target.is_websocket();
        let reusable = self.state == SocketState::Connected
            && !websocket
            && self
                .conn
                .as_ref()
                .is_some_and(|conn| conn.target.can_reuse_for(&self.target));
        if reusable {
            self.websocket = false;
            let plan = self.plan();
            if let Some(conn) = &self.conn {
                if conn.commands.send(Command::Request(plan)).is_ok() {
                    return true;
                }
            }
            // Driver died underneath us; fall through and reconnect.
        }

        self.websocket = websocket;
        // Dropping the old handle unwinds the previous driver.
        self.conn = None;
        let plan = self.plan();
        self.set_state(SocketState::Connecting);
        self.conn = Some(conn::spawn(
            Arc::clone(&self.config),
            self.target.clone(),
            plan,
        ));
        true
    }

    /// Starts a client-initiated close. Idempotent; terminal states and
    /// never-connected clients return immediately.
    pub fn close(&mut self) -> bool {
        if self.conn.is_none()
            || matches!(
                self.state,
                SocketState::Closing | SocketState::Closed | SocketState::Disconnected
            )
        {
            return true;
        }

        debug!(url = %self.target, "closing connection");
        self.retry_attempts = 0;
        self.set_state(SocketState::Closing);
        if let Some(conn) = &self.conn {
            let _ = conn.ctrl.send(());
        }
        true
    }

    /// Closes and pumps the dispatcher until the close completes.
    pub async fn shutdown(&mut self) -> bool {
        self.close();
        while self.state == SocketState::Closing {
            if !self.pump().await {
                // Driver ended without a terminal event.
                self.set_state(SocketState::Closed);
            }
        }
        true
    }

    // ==================== dispatch ====================

    /// Waits for the next event and delivers it to the delegates. Returns
    /// `false` once the connection has no more events to deliver.
    pub async fn pump(&mut self) -> bool {
        let Some(conn) = self.conn.as_mut() else {
            return false;
        };
        match conn.events.recv().await {
            Some(event) => {
                self.dispatch(event);
                true
            }
            None => false,
        }
    }

    /// Delivers every already-queued event without waiting. Returns the
    /// number dispatched.
    pub fn poll_events(&mut self) -> usize {
        let mut dispatched = 0;
        loop {
            let Some(conn) = self.conn.as_mut() else {
                return dispatched;
            };
            match conn.events.try_recv() {
                Ok(event) => {
                    self.dispatch(event);
                    dispatched += 1;
                }
                Err(_) => return dispatched,
            }
        }
    }

    fn dispatch(&mut self, event: Event) {
        match event {
            Event::Connected => match self.state {
                SocketState::Connecting => self.set_state(SocketState::Connected),
                SocketState::Closing => self.on_close(),
                _ => {
                    debug!(state = ?self.state, "connected event in unexpected state");
                    self.on_disconnected();
                }
            },
            Event::Data(response) => {
                let teardown = response.done && response.wants_close();
                if let Some(receiver) = self.delegates.data.as_mut() {
                    receiver(response);
                }
                if teardown {
                    self.on_close();
                }
            }
            Event::Frame(frame) => {
                if let Some(receiver) = self.delegates.frame.as_mut() {
                    receiver(frame);
                }
            }
            Event::WsClosed | Event::Closed => self.on_close(),
            Event::ProtocolError => {
                if let Some(handler) = self.delegates.error.as_mut() {
                    handler();
                }
            }
            Event::Disconnected => self.on_disconnected(),
        }
    }

    fn on_close(&mut self) {
        if matches!(
            self.state,
            SocketState::Connected | SocketState::Connecting | SocketState::Closing
        ) {
            self.set_state(SocketState::Closed);
        }
    }

    fn on_disconnected(&mut self) {
        if !matches!(
            self.state,
            SocketState::Connected | SocketState::Connecting | SocketState::Closing
        ) {
            return;
        }

        // A client-initiated close lands here too, because closing the
        // socket fails the in-flight operation; report CLOSED, not
        // DISCONNECTED, and never retry.
        if self.state == SocketState::Closing {
            self.set_state(SocketState::Closed);
            return;
        }

        if self.retry_attempts < self.config.max_retry_attempts {
            self.retry_attempts += 1;
            debug!(
                url = %self.target,
                attempt = self.retry_attempts,
                budget = self.config.max_retry_attempts,
                "resending after disconnect"
            );
            self.set_state(SocketState::Retry);
            if !self.send() {
                self.set_state(SocketState::Disconnected);
            }
        } else {
            error!(url = %self.target, "disconnected");
            self.set_state(SocketState::Disconnected);
        }
    }

    fn set_state(&mut self, state: SocketState) {
        self.state = state;
        if let Some(receiver) = self.delegates.state.as_mut() {
            receiver(state);
        }
    }

    fn plan(&self) -> RequestPlan {
        RequestPlan {
            method: self.method.clone(),
            host: self.target.host().to_string(),
            endpoint: self.target.endpoint(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            websocket: self.websocket,
        }
    }

    // ==================== websocket sends ====================

    /// Sends a text frame. Invalid UTF-8 is logged and dropped.
    pub fn send_text(&mut self, data: impl Into<Bytes>) {
        let data = data.into();
        if std::str::from_utf8(&data).is_err() {
            error!(url = %self.target, "send_text called with invalid utf-8, dropping");
            return;
        }
        self.send_frame(Frame::text(data), "send_text");
    }

    /// Sends a binary frame.
    pub fn send_binary(&mut self, data: impl Into<Bytes>) {
        self.send_frame(Frame::binary(data.into()), "send_binary");
    }

    /// Sends a ping frame.
    pub fn send_ping(&mut self, data: impl Into<Bytes>) {
        self.send_frame(Frame::ping(data.into()), "send_ping");
    }

    /// Sends a pong frame.
    pub fn send_pong(&mut self, data: impl Into<Bytes>) {
        self.send_frame(Frame::pong(data.into()), "send_pong");
    }

    /// Sends a close frame with a normal status and the given reason.
    pub fn send_close(&mut self, reason: &str) {
        self.send_frame(Frame::close(CloseCode::Normal, reason), "send_close");
    }

    /// Validates state and mode, encodes (masking included) and hands the
    /// bytes to the driver. Frames enqueued while the upgrade handshake is
    /// still in flight are flushed, in order, once it succeeds.
    fn send_frame(&mut self, frame: Frame, operation: &str) {
        if !matches!(
            self.state,
            SocketState::Connected | SocketState::Connecting
        ) {
            error!(url = %self.target, state = ?self.state, operation, "send in wrong state, dropping");
            return;
        }
        if !self.websocket {
            error!(url = %self.target, operation, "send on non-websocket connection, dropping");
            return;
        }

        let mut bytes = BytesMut::new();
        if let Err(frame_error) = self.encoder.encode(frame, &mut bytes) {
            error!(url = %self.target, %frame_error, operation, "frame encoding failed, dropping");
            return;
        }

        let Some(conn) = &self.conn else {
            return;
        };
        if conn.commands.send(Command::Send(bytes.freeze())).is_err() {
            debug!(url = %self.target, "connection driver is gone, dropping frame");
        }
    }
}
