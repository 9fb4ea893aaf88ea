//! Per-connection driver task.
//!
//! Each connection is owned by one tokio task that walks the lifecycle:
//! resolve, connect, optional TLS handshake, request emission, then either
//! HTTP response assembly or the WebSocket frame loop. The facade talks to
//! the driver over two channels: a control channel whose only message means
//! "close now" and is honored at every suspension point, and a command
//! channel carrying encoded frames and follow-up requests. Everything the
//! application may observe is posted to the event queue and delivered by
//! the facade's dispatch loop.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::codec::Decoder as _;
use tracing::{debug, error, warn};
use webwire_codec::{Frame, FrameCodec, OpCode};

use crate::{
    config::ClientConfig,
    error::{Error, Result},
    h1::{self, RequestPlan},
    metrics,
    response::Response,
    transport::{Connector, NetTransport},
    url::Target,
};

/// Messages from the driver to the facade's dispatch loop.
pub(crate) enum Event {
    /// Transport (and TLS, when secure) is established.
    Connected,
    /// A completed response, or a progressive chunked slice.
    Data(Response),
    /// One inbound WebSocket frame.
    Frame(Frame),
    /// The peer sent a close frame.
    WsClosed,
    /// The driver gave up without a transport failure (empty request).
    Closed,
    /// The peer violated the protocol; fired before the disconnect.
    ProtocolError,
    /// The connection is gone; the dispatch loop decides between CLOSED,
    /// RETRY and DISCONNECTED.
    Disconnected,
}

/// Messages from the facade into the driver.
pub(crate) enum Command {
    /// Emit another request on the kept-alive connection.
    Request(RequestPlan),
    /// Write an already-encoded WebSocket frame.
    Send(Bytes),
}

/// Facade-side handle to a spawned driver.
pub(crate) struct ConnHandle {
    pub ctrl: mpsc::UnboundedSender<()>,
    pub commands: mpsc::UnboundedSender<Command>,
    pub events: mpsc::UnboundedReceiver<Event>,
    /// URL the connection was established for.
    pub target: Target,
}

/// Where the driver currently is; carried in log lines only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Resolving,
    ConnectingTcp,
    SendingRequest,
    ReadingHeaders,
    ReadingBody,
    ReadingChunkLen,
    ReadingChunkFooter,
    Idle,
    Frames,
}

/// Spawns a driver for `target` and returns the facade handle.
///
/// Must be called from within a tokio runtime; the facade checks for one
/// before calling.
pub(crate) fn spawn(config: Arc<ClientConfig>, target: Target, plan: RequestPlan) -> ConnHandle {
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let driver = Driver {
        connector: Connector::new(&config),
        host: target.host().to_string(),
        port: target.port(),
        secure: target.is_secure(),
        decoder: FrameCodec::client().with_max_payload(config.max_frame_payload),
        config,
        ctrl: ctrl_rx,
        commands: command_rx,
        events: event_tx,
        phase: Phase::Resolving,
        ws_key: None,
        requests_sent: 0,
    };
    tokio::spawn(driver.run(plan));

    ConnHandle {
        ctrl: ctrl_tx,
        commands: command_tx,
        events: event_rx,
        target,
    }
}

/// Outcome of one guarded transport operation.
enum Step<T> {
    /// Close was requested (or every facade handle is gone).
    Interrupted,
    Completed(T),
}

struct Driver {
    config: Arc<ClientConfig>,
    connector: Connector,
    host: String,
    port: u16,
    secure: bool,
    ctrl: mpsc::UnboundedReceiver<()>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<Event>,
    decoder: FrameCodec,
    phase: Phase,
    ws_key: Option<String>,
    requests_sent: u32,
}

impl Driver {
    async fn run(mut self, plan: RequestPlan) {
        debug!(host = %self.host, port = self.port, secure = self.secure, "driver starting");

        let Some(mut transport) = self.establish().await else {
            return;
        };
        self.post(Event::Connected);

        if plan.websocket {
            self.run_websocket(&mut transport, plan).await;
        } else {
            self.run_http(&mut transport, plan).await;
        }

        transport.close().await;
        debug!(host = %self.host, requests = self.requests_sent, "driver stopped");
    }

    /// Resolve and connect, honoring close requests throughout. `None`
    /// means the driver already posted its terminal event.
    async fn establish(&mut self) -> Option<NetTransport> {
        self.phase = Phase::Resolving;
        let endpoints = match guard(&mut self.ctrl, self.connector.resolve(&self.host, self.port)).await
        {
            Step::Interrupted => {
                self.post(Event::Disconnected);
                return None;
            }
            Step::Completed(Err(error)) => {
                self.fail(error);
                return None;
            }
            Step::Completed(Ok(endpoints)) => endpoints,
        };

        self.phase = Phase::ConnectingTcp;
        match guard(
            &mut self.ctrl,
            self.connector.dial(endpoints, &self.host, self.secure),
        )
        .await
        {
            Step::Interrupted => {
                self.post(Event::Disconnected);
                None
            }
            Step::Completed(Err(error)) => {
                self.fail(error);
                None
            }
            Step::Completed(Ok(transport)) => Some(transport),
        }
    }

    // ======================== HTTP ========================

    async fn run_http(&mut self, transport: &mut NetTransport, mut plan: RequestPlan) {
        loop {
            if !self.emit_request(transport, &plan).await {
                return;
            }
            if !self.read_response(transport).await {
                return;
            }

            // Keep-alive: park on the open transport until the facade emits
            // another request or closes. No read is pending while idle, so a
            // peer teardown surfaces on next use, as in a freshly pooled
            // connection.
            self.phase = Phase::Idle;
            plan = loop {
                enum Idle {
                    Ctrl,
                    Cmd(Option<Command>),
                }
                let outcome = tokio::select! {
                    biased;
                    _ = self.ctrl.recv() => Idle::Ctrl,
                    command = self.commands.recv() => Idle::Cmd(command),
                };
                match outcome {
                    Idle::Ctrl => {
                        self.post(Event::Disconnected);
                        return;
                    }
                    Idle::Cmd(Some(Command::Request(next))) => break next,
                    Idle::Cmd(Some(Command::Send(_))) => {
                        warn!("dropping websocket frame queued on a plain http connection");
                    }
                    Idle::Cmd(None) => return,
                }
            };
        }
    }

    /// Serializes and writes one request. `false` ends the driver.
    async fn emit_request(&mut self, transport: &mut NetTransport, plan: &RequestPlan) -> bool {
        self.phase = Phase::SendingRequest;
        let prepared = match h1::build_request(plan, &self.config) {
            Ok(prepared) => prepared,
            Err(error) => {
                error!(host = %self.host, %error, "closing connection");
                self.post(Event::Closed);
                return false;
            }
        };
        self.ws_key = prepared.ws_key;
        self.requests_sent += 1;
        metrics::record_request();
        self.write(transport, &prepared.bytes).await
    }

    /// Reads one complete response and posts its deliveries. `true` means
    /// the connection can be reused.
    async fn read_response(&mut self, transport: &mut NetTransport) -> bool {
        self.phase = Phase::ReadingHeaders;
        let response = loop {
            let Some(head) = self.read_until(transport, b"\r\n\r\n").await else {
                return false;
            };
            match h1::parse_response_head(&head) {
                // A provisional response; the real one follows.
                Ok(head) if head.status_code == 100 => {
                    debug!("discarding 100 Continue");
                }
                Ok(head) => break head,
                Err(error) => {
                    self.fail(error);
                    return false;
                }
            }
        };

        let chunked = response
            .headers
            .value_equals("Transfer-Encoding", "chunked");
        if chunked {
            self.read_chunked(transport, response).await
        } else {
            self.read_identity(transport, response).await
        }
    }

    /// Identity body: `Content-Length` bytes, or everything until EOF when
    /// the length is unspecified.
    async fn read_identity(&mut self, transport: &mut NetTransport, mut response: Response) -> bool {
        self.phase = Phase::ReadingBody;
        let declared = response
            .headers
            .get("Content-Length")
            .and_then(|value| value.trim().parse::<usize>().ok());

        match declared {
            Some(total) => {
                response.content.reserve(total);
                let buffered = transport.buffered();
                let take = total.min(buffered.len());
                response.content.extend_from_slice(&buffered.split_to(take));
                let missing = total - take;
                if missing > 0 {
                    let Some(rest) = self.read_exactly(transport, missing).await else {
                        return false;
                    };
                    response.content.extend_from_slice(&rest);
                }
            }
            None => {
                let buffered = transport.buffered().split();
                response.content.extend_from_slice(&buffered);
                loop {
                    match guard(&mut self.ctrl, transport.read_some()).await {
                        Step::Interrupted => {
                            self.post(Event::Disconnected);
                            return false;
                        }
                        Step::Completed(Ok(0)) => break,
                        Step::Completed(Ok(_)) => {
                            let buffered = transport.buffered().split();
                            response.content.extend_from_slice(&buffered);
                        }
                        Step::Completed(Err(error)) => {
                            self.fail(error);
                            return false;
                        }
                    }
                }
            }
        }

        response.done = true;
        self.post(Event::Data(response));
        true
    }

    /// Chunked body: every chunk except the last is delivered with
    /// `done == false` and cumulative content; trailers merge into the final
    /// delivery.
    async fn read_chunked(&mut self, transport: &mut NetTransport, mut response: Response) -> bool {
        loop {
            self.phase = Phase::ReadingChunkLen;
            let Some(line) = self.read_until(transport, b"\r\n").await else {
                return false;
            };
            let text = String::from_utf8_lossy(&line);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                // Separator between chunk data and the next size line.
                continue;
            }
            let size = match h1::parse_chunk_size(trimmed) {
                Ok(size) => size,
                Err(error) => {
                    self.fail(error);
                    return false;
                }
            };

            if size == 0 {
                self.phase = Phase::ReadingChunkFooter;
                loop {
                    let Some(line) = self.read_until(transport, b"\r\n").await else {
                        return false;
                    };
                    if line.as_ref() == b"\r\n" {
                        break;
                    }
                    h1::absorb_header_line(&mut response, &String::from_utf8_lossy(&line));
                }
                response.done = true;
                self.post(Event::Data(response));
                return true;
            }

            self.phase = Phase::ReadingBody;
            let buffered = transport.buffered();
            let take = size.min(buffered.len());
            response.content.extend_from_slice(&buffered.split_to(take));
            let missing = size - take;
            if missing > 0 {
                let Some(rest) = self.read_exactly(transport, missing).await else {
                    return false;
                };
                response.content.extend_from_slice(&rest);
            }

            // Hand a snapshot to streaming consumers, keep accumulating.
            self.post(Event::Data(response.clone()));
        }
    }

    // ======================== WebSocket ========================

    async fn run_websocket(&mut self, transport: &mut NetTransport, plan: RequestPlan) {
        if !self.emit_request(transport, &plan).await {
            return;
        }

        self.phase = Phase::ReadingHeaders;
        let Some(head) = self.read_until(transport, b"\r\n\r\n").await else {
            return;
        };
        let mut response = match h1::parse_response_head(&head) {
            Ok(response) => response,
            Err(error) => {
                self.fail(error);
                return;
            }
        };

        if response.status_code != 101 || !response.headers.value_equals("Upgrade", "websocket") {
            self.fail(Error::UpgradeRejected {
                status: response.status_code,
            });
            return;
        }
        // Verify the accept digest when the server sent one.
        if let (Some(key), Some(accept)) = (&self.ws_key, response.headers.get("Sec-WebSocket-Accept"))
        {
            if accept != h1::accept_digest(key) {
                self.fail(Error::AcceptMismatch);
                return;
            }
        }

        response.done = true;
        self.post(Event::Data(response));

        // Frames enqueued while the handshake was in flight have been
        // waiting in the command channel; flush them in order now.
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Send(bytes) => {
                    if !self.write(transport, &bytes).await {
                        return;
                    }
                }
                Command::Request(_) => {
                    warn!("dropping http request queued on a websocket connection");
                }
            }
        }

        self.phase = Phase::Frames;
        loop {
            // Drain every complete frame already buffered before reading on.
            loop {
                match self.decoder.decode(transport.buffered()) {
                    Ok(Some(frame)) => {
                        let closing = frame.opcode() == OpCode::Close;
                        if closing {
                            debug!(
                                reason = frame.close_reason().unwrap_or_default(),
                                "received close frame"
                            );
                        }
                        self.post(Event::Frame(frame));
                        if closing {
                            self.post(Event::WsClosed);
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        self.fail(error.into());
                        return;
                    }
                }
            }

            enum Ws {
                Ctrl,
                Cmd(Option<Command>),
                Read(Result<usize>),
            }
            let outcome = tokio::select! {
                biased;
                _ = self.ctrl.recv() => Ws::Ctrl,
                command = self.commands.recv() => Ws::Cmd(command),
                result = transport.read_some() => Ws::Read(result),
            };
            match outcome {
                Ws::Ctrl | Ws::Cmd(None) => {
                    self.post(Event::Disconnected);
                    return;
                }
                Ws::Cmd(Some(Command::Send(bytes))) => {
                    if !self.write(transport, &bytes).await {
                        return;
                    }
                }
                Ws::Cmd(Some(Command::Request(_))) => {
                    warn!("dropping http request queued on a websocket connection");
                }
                Ws::Read(Ok(0)) => {
                    debug!(host = %self.host, "websocket peer closed the stream");
                    self.post(Event::Disconnected);
                    return;
                }
                Ws::Read(Ok(_)) => {}
                Ws::Read(Err(error)) => {
                    self.fail(error);
                    return;
                }
            }
        }
    }

    // ======================== plumbing ========================

    async fn read_until(
        &mut self,
        transport: &mut NetTransport,
        delimiter: &[u8],
    ) -> Option<bytes::BytesMut> {
        match guard(&mut self.ctrl, transport.read_until(delimiter)).await {
            Step::Interrupted => {
                self.post(Event::Disconnected);
                None
            }
            Step::Completed(Ok(bytes)) => Some(bytes),
            Step::Completed(Err(error)) => {
                self.fail(error);
                None
            }
        }
    }

    async fn read_exactly(
        &mut self,
        transport: &mut NetTransport,
        count: usize,
    ) -> Option<bytes::BytesMut> {
        match guard(&mut self.ctrl, transport.read_exactly(count)).await {
            Step::Interrupted => {
                self.post(Event::Disconnected);
                None
            }
            Step::Completed(Ok(bytes)) => Some(bytes),
            Step::Completed(Err(error)) => {
                self.fail(error);
                None
            }
        }
    }

    /// Writes are serialized: the driver performs one `write_all` at a time,
    /// so at most one write is ever in flight per connection.
    async fn write(&mut self, transport: &mut NetTransport, bytes: &[u8]) -> bool {
        match guard(&mut self.ctrl, transport.write_all(bytes)).await {
            Step::Interrupted => {
                self.post(Event::Disconnected);
                false
            }
            Step::Completed(Ok(())) => true,
            Step::Completed(Err(error)) => {
                self.fail(error);
                false
            }
        }
    }

    /// Logs a failure and posts the disconnect, flagging protocol
    /// violations for the error handler delegate.
    fn fail(&self, error: Error) {
        if error.is_protocol() {
            error!(host = %self.host, phase = ?self.phase, %error, "protocol violation");
            self.post(Event::ProtocolError);
        } else {
            warn!(host = %self.host, phase = ?self.phase, %error, "connection failed");
        }
        self.post(Event::Disconnected);
    }

    fn post(&self, event: Event) {
        // The facade may already be gone; events then have no audience.
        let _ = self.events.send(event);
    }
}

/// Runs `operation` unless a close request arrives first (or every facade
/// handle was dropped).
async fn guard<T>(
    ctrl: &mut mpsc::UnboundedReceiver<()>,
    operation: impl std::future::Future<Output = T>,
) -> Step<T> {
    tokio::select! {
        biased;
        _ = ctrl.recv() => Step::Interrupted,
        value = operation => Step::Completed(value),
    }
}
