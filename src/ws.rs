use crate::{codec::*, CloseCode, Error, Frame, Opcode, Registry, Result, TimeoutManager, TimeoutReason};
use parking_lot::Mutex;
use std::{
    ops::ControlFlow,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    time::{sleep_until, timeout, Instant},
};
use tracing::{debug, info, trace, warn};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a [Websocket]. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum allowed payload length in bytes, for a single frame as well as
    /// for a reassembled message.
    ///
    /// Default: 16 MB
    pub max_payload_len: usize,

    /// Send a ping after this much idle time, so that a silent peer is
    /// detected within [TimeoutManager::TIMEOUT] instead of waiting for the
    /// keep-alive deadline.
    ///
    /// Default: disabled
    pub ping_interval: Option<Duration>,

    /// Decoded frames buffered between the reader task and the serve loop.
    pub frame_buffer: usize,

    /// Messages buffered for the application. A peer that fills the buffer
    /// faster than [Incoming] is drained gets closed with
    /// [CloseCode::TryLater].
    ///
    /// Default: 256
    pub message_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_payload_len: 16 * 1024 * 1024,
            ping_interval: None,
            frame_buffer: 16,
            message_buffer: 256,
        }
    }
}

/// A complete application message, reassembled from its fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Box<[u8]>),
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_owned())
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Message::Binary(data.into_boxed_slice())
    }
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Frame::text(text),
            Message::Binary(data) => Frame::binary(data),
        }
    }
}

/// Messages received on a connection. Yields `None` once it is closed.
#[derive(Debug)]
pub struct Incoming {
    rx: mpsc::Receiver<Message>,
}

impl Incoming {
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

#[derive(Debug)]
enum Command {
    Send(Frame),
    Close(CloseCode),
}

/// A server side WebSocket connection.
///
/// The connection is driven by a task of its own, spawned by
/// [Websocket::serve]. That task holds a strong reference until the
/// connection is [State::Closed]; any other lifetime extension is up to the
/// caller. Registries only ever hold weak references.
#[derive(Debug)]
pub struct Websocket {
    id: u64,
    config: Config,
    lifecycle: Arc<watch::Sender<State>>,
    timeouts: Mutex<TimeoutManager>,
    close_code: Mutex<Option<CloseCode>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Websocket {
    /// Serve an already upgraded stream with the default [Config], tracked
    /// by [Registry::global].
    ///
    /// Must be called from within a tokio runtime.
    pub fn serve<IO>(io: IO) -> (Arc<Self>, Incoming)
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::serve_with(io, Config::default(), Registry::global())
    }

    pub fn serve_with<IO>(io: IO, config: Config, registry: &Registry) -> (Arc<Self>, Incoming)
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (incoming, incoming_rx) = mpsc::channel(config.message_buffer.max(1));
        let (lifecycle, _) = watch::channel(State::Connecting);

        let ws = Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            config,
            lifecycle: Arc::new(lifecycle),
            timeouts: Mutex::new(TimeoutManager::new()),
            close_code: Mutex::new(None),
            commands,
        });

        ws.set_state(State::Open);
        registry.register(&ws);
        debug!(conn_id = ws.id, "websocket opened");

        let (reader, writer) = tokio::io::split(io);
        let session = Session {
            ws: Arc::clone(&ws),
            writer,
            incoming,
            fragment: None,
        };
        tokio::spawn(session.run(reader, command_rx));

        (ws, Incoming { rx: incoming_rx })
    }

    /// Connections tracked by [Registry::global] that are still reachable.
    pub fn instances() -> Vec<Arc<Websocket>> {
        Registry::global().live_instances()
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn state(&self) -> State {
        *self.lifecycle.borrow()
    }

    /// Code the connection was (or is being) closed with.
    pub fn close_code(&self) -> Option<CloseCode> {
        *self.close_code.lock()
    }

    /// Why the connection timed out, if it did.
    pub fn timeout_reason(&self) -> Option<TimeoutReason> {
        self.timeouts.lock().timeout_reason()
    }

    /// Queue an application message.
    pub fn send(&self, message: impl Into<Message>) -> Result<()> {
        let message: Message = message.into();
        self.command(Command::Send(Frame::from(message)))
    }

    /// Queue a ping. The peer must answer within [TimeoutManager::TIMEOUT].
    pub fn ping(&self, data: impl Into<Box<[u8]>>) -> Result<()> {
        self.command(Command::Send(Frame::with_payload(Opcode::Ping, data)))
    }

    /// Start the closing handshake with `code`.
    ///
    /// The peer has [TimeoutManager::TIMEOUT] to acknowledge. A code that may
    /// not appear on the wire, such as [CloseCode::AbnormalClosure], drops
    /// the transport without a handshake.
    pub fn close(&self, code: CloseCode) -> Result<()> {
        self.command(Command::Close(code))
    }

    /// Wait until the connection is closed and its serve task has let go of
    /// it.
    pub async fn closed(&self) -> CloseCode {
        let mut state = self.lifecycle.subscribe();
        let _ = state.wait_for(|current| *current == State::Closed).await;
        self.close_code().unwrap_or(CloseCode::AbnormalClosure)
    }

    fn command(&self, command: Command) -> Result<()> {
        if self.state() != State::Open {
            return Err(Error::Closed);
        }
        self.commands.send(command).map_err(|_| Error::Closed)
    }

    fn set_state(&self, state: State) {
        let previous = self.lifecycle.send_replace(state);
        trace!(conn_id = self.id, ?previous, ?state, "state changed");
    }

    fn record_close(&self, code: CloseCode) {
        let _ = self.close_code.lock().get_or_insert(code);
    }
}

impl Drop for Websocket {
    fn drop(&mut self) {
        trace!(conn_id = self.id, "websocket reclaimed");
    }
}

async fn read_frames<R>(mut reader: FrameReader<R>, frames: mpsc::Sender<Result<Frame>>)
where
    R: Unpin + AsyncRead,
{
    loop {
        let frame = reader.read_frame().await;
        let failed = frame.is_err();
        if frames.send(frame).await.is_err() || failed {
            break;
        }
    }
}

/// State owned by the serve task of one connection.
struct Session<W> {
    ws: Arc<Websocket>,
    writer: W,
    incoming: mpsc::Sender<Message>,
    fragment: Option<(Opcode, Vec<u8>)>,
}

impl<W> Session<W>
where
    W: Unpin + AsyncWrite,
{
    async fn run<R>(mut self, reader: R, mut commands: mpsc::UnboundedReceiver<Command>)
    where
        R: Unpin + AsyncRead + Send + 'static,
    {
        let mut reader = FrameReader::new(BufReader::new(reader), Role::Server);
        reader.max_payload_len = self.ws.config.max_payload_len;
        let (frame_tx, mut frames) = mpsc::channel(self.ws.config.frame_buffer.max(1));

        // Reading a frame is not cancel safe, so it runs apart from the
        // select below; aborting the task unblocks a pending read.
        let reader_task = tokio::spawn(read_frames(reader, frame_tx));

        loop {
            let wakeup = self.next_wakeup();
            let flow = tokio::select! {
                frame = frames.recv() => match frame {
                    Some(Ok(frame)) => self.on_frame(frame).await,
                    Some(Err(err)) => self.fail(err).await,
                    None => self.fail(Error::Closed).await,
                },
                Some(command) = commands.recv() => self.on_command(command).await,
                () = sleep_until(wakeup) => self.on_tick().await,
            };
            if flow.is_break() {
                break;
            }
        }

        reader_task.abort();
        let _ = timeout(TimeoutManager::TIMEOUT, self.writer.shutdown()).await;

        let Session {
            ws,
            writer,
            incoming,
            ..
        } = self;
        drop((writer, incoming));

        ws.record_close(CloseCode::AbnormalClosure);
        let code = ws.close_code();
        let (id, lifecycle) = (ws.id, Arc::clone(&ws.lifecycle));
        drop(ws);

        lifecycle.send_replace(State::Closed);
        info!(conn_id = id, ?code, "websocket closed");
    }

    fn next_wakeup(&self) -> Instant {
        let timeouts = self.ws.timeouts.lock();
        let deadline = timeouts.next_deadline();
        match self.ws.config.ping_interval {
            Some(interval) if timeouts.awaited_opcode().is_none() && self.ws.state() == State::Open => {
                match timeouts.last_activity_time().checked_add(interval) {
                    Some(heartbeat) => deadline.min(heartbeat),
                    None => deadline,
                }
            }
            _ => deadline,
        }
    }

    async fn on_tick(&mut self) -> ControlFlow<()> {
        let timed_out = self.ws.timeouts.lock().has_timed_out();
        if !timed_out {
            if self.next_wakeup() <= Instant::now() {
                trace!(conn_id = self.ws.id, "sending heartbeat ping");
                return self.send(Frame::new(Opcode::Ping)).await;
            }
            return ControlFlow::Continue(());
        }

        let reason = self.ws.timeout_reason();
        match self.ws.state() {
            State::Open => {
                warn!(conn_id = self.ws.id, ?reason, "websocket timed out");
                let code = reason.map_or(CloseCode::AbnormalClosure, CloseCode::from);
                self.start_closing(code).await
            }
            _ => {
                warn!(conn_id = self.ws.id, "close handshake was not acknowledged");
                ControlFlow::Break(())
            }
        }
    }

    async fn on_command(&mut self, command: Command) -> ControlFlow<()> {
        if self.ws.state() != State::Open {
            debug!(conn_id = self.ws.id, ?command, "dropping command, connection is closing");
            return ControlFlow::Continue(());
        }
        match command {
            Command::Send(frame) => self.send(frame).await,
            Command::Close(code) => self.start_closing(code).await,
        }
    }

    async fn on_frame(&mut self, frame: Frame) -> ControlFlow<()> {
        self.ws.timeouts.lock().acknowledge_frame_receipt(&frame);
        trace!(
            conn_id = self.ws.id,
            opcode = ?frame.opcode(),
            len = frame.payload().len(),
            "frame received"
        );
        match frame.opcode() {
            Opcode::Ping if self.ws.state() == State::Open => {
                self.send(Frame::with_payload(Opcode::Pong, frame.into_payload()))
                    .await
            }
            Opcode::Ping | Opcode::Pong => ControlFlow::Continue(()),
            Opcode::Close => self.on_close(&frame).await,
            Opcode::Text | Opcode::Binary | Opcode::Continuation => self.on_data(frame).await,
        }
    }

    async fn on_close(&mut self, frame: &Frame) -> ControlFlow<()> {
        if self.ws.state() != State::Open {
            debug!(conn_id = self.ws.id, "close handshake completed");
            return ControlFlow::Break(());
        }

        let payload = frame.payload();
        let status = match (frame.close_status(), payload.len()) {
            (_, 1) => return self.fail(Error::Protocol("close frame with a 1 byte body")).await,
            (None, _) => None,
            (Some(code @ (1000..=1003 | 1007..=1014 | 3000..=4999)), _) => Some(code),
            (Some(_), _) => return self.fail(Error::Protocol("invalid close code")).await,
        };
        if payload.len() > 2 && std::str::from_utf8(&payload[2..]).is_err() {
            return self.fail(Error::InvalidUtf8).await;
        }

        let code = status.map_or(CloseCode::Clean, |status| {
            CloseCode::try_from(status).unwrap_or(CloseCode::MessageViolatingPolicy)
        });
        info!(conn_id = self.ws.id, ?status, "peer closed the connection");
        self.ws.record_close(code);
        self.ws.set_state(State::Closing);

        // When sending a Close frame in response, the endpoint typically
        // echos the status code it received.
        let echo = match status {
            Some(status) => Frame::with_payload(Opcode::Close, status.to_be_bytes()),
            None => Frame::new(Opcode::Close),
        };
        let _ = self.send(echo).await;
        ControlFlow::Break(())
    }

    async fn on_data(&mut self, frame: Frame) -> ControlFlow<()> {
        if self.ws.state() != State::Open {
            debug!(conn_id = self.ws.id, "discarding data frame received while closing");
            return ControlFlow::Continue(());
        }

        let fin = frame.fin();
        let (ty, data) = match (self.fragment.take(), frame.opcode()) {
            (None, Opcode::Continuation) => {
                return self.fail(Error::Protocol("continuation frame without a message to continue")).await
            }
            (None, opcode) => (opcode, frame.into_payload().into_vec()),
            (Some((ty, mut data)), Opcode::Continuation) => {
                data.extend_from_slice(frame.payload());
                (ty, data)
            }
            (Some(_), _) => return self.fail(Error::Protocol("expected continuation frame")).await,
        };

        let max = self.ws.config.max_payload_len;
        if data.len() > max {
            return self.fail(Error::PayloadTooLarge { len: data.len(), max }).await;
        }
        if !fin {
            self.fragment = Some((ty, data));
            return ControlFlow::Continue(());
        }

        let message = match ty {
            Opcode::Text => match String::from_utf8(data) {
                Ok(text) => Message::Text(text),
                Err(_) => return self.fail(Error::InvalidUtf8).await,
            },
            _ => Message::Binary(data.into_boxed_slice()),
        };
        match self.incoming.try_send(message) {
            Ok(()) => ControlFlow::Continue(()),
            // Nobody listening is not a reason to drop the connection.
            Err(TrySendError::Closed(_)) => ControlFlow::Continue(()),
            Err(TrySendError::Full(_)) => {
                let capacity = self.ws.config.message_buffer;
                self.fail(Error::Overloaded { capacity }).await
            }
        }
    }

    async fn start_closing(&mut self, code: CloseCode) -> ControlFlow<()> {
        self.ws.record_close(code);
        self.ws.set_state(State::Closing);
        self.fragment = None;
        if !code.is_sendable() {
            debug!(conn_id = self.ws.id, ?code, "dropping transport without handshake");
            return ControlFlow::Break(());
        }
        self.send(Frame::close(code)).await
    }

    /// Tear the connection down after an error. The peer still gets a Close
    /// frame when the transport is usable.
    async fn fail(&mut self, err: Error) -> ControlFlow<()> {
        let code = err.close_code();
        self.ws.record_close(code);
        if err.is_transport() || !code.is_sendable() {
            debug!(conn_id = self.ws.id, error = %err, "transport closed");
            return ControlFlow::Break(());
        }
        warn!(conn_id = self.ws.id, error = %err, ?code, "closing websocket on protocol violation");
        self.ws.set_state(State::Closing);
        let _ = self.send(Frame::close(code)).await;
        ControlFlow::Break(())
    }

    /// Write one frame and acknowledge it to the timeout manager. Every
    /// write is bounded by [TimeoutManager::TIMEOUT].
    async fn send(&mut self, frame: Frame) -> ControlFlow<()> {
        let mut bytes = Vec::new();
        frame.encode(Role::Server, &mut bytes);

        let writer = &mut self.writer;
        let written = timeout(TimeoutManager::TIMEOUT, async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        })
        .await;

        match written {
            Ok(Ok(())) => {
                self.ws.timeouts.lock().acknowledge_frame_sent(&frame);
                ControlFlow::Continue(())
            }
            Ok(Err(err)) => {
                debug!(conn_id = self.ws.id, error = %err, "write failed");
                self.ws.record_close(CloseCode::AbnormalClosure);
                ControlFlow::Break(())
            }
            Err(_) => {
                warn!(conn_id = self.ws.id, "write timed out");
                self.ws.record_close(CloseCode::AbnormalClosure);
                ControlFlow::Break(())
            }
        }
    }
}
