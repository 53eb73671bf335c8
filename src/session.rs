//! A session is one connection between two peers, both of which can send and receive messages.
//!
//! Each session has two tasks:
//! * a reader task that does nothing but decode frames from the stream and forward them
//! * the session task which owns all protocol state (send window, receive window, retransmission
//!    timers) and the stream's write half. It waits for the next event (a frame, a command from
//!    application code, a timer deadline or an abort) and handles it to completion before looking
//!    at the next one
//!
//! Since all state changes happen in the session task, there is no locking, and an ACK can not
//!  race with the expiry of the timer it disarms.

use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::select;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, span, trace, warn, Instrument, Level};
use uuid::Uuid;
use crate::config::{ClientConfig, ServerConfig, TransferConfig};
use crate::error::ArqError;
use crate::framing::read_frame;
use crate::handshake::{client_handshake, server_handshake, SessionParameters};
use crate::packet::Packet;
use crate::packet_sink::{FramedSink, PacketSink};
use crate::receiver::ReceiveWindow;
use crate::sender::send_window::{SendReport, SendWindow};
use crate::seq_num::SeqNum;

const COMMAND_CHANNEL_CAPACITY: usize = 16;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Role {
    Client,
    Server,
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

/// Entry points for establishing a session
pub struct Session;

impl Session {
    pub async fn connect(addr: impl ToSocketAddrs, config: ClientConfig) -> anyhow::Result<SessionHandle> {
        config.validate()?;
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!("connected to {:?}", stream.peer_addr()?);
        Session::client(stream, config).await
    }

    /// Run the handshake as a client on an established stream
    pub async fn client<S>(mut stream: S, config: ClientConfig) -> anyhow::Result<SessionHandle>
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
    {
        config.validate()?;

        let session_id = Uuid::new_v4();
        let span = span!(Level::INFO, "session", ?session_id, role = %Role::Client);

        let params = client_handshake(&mut stream, &config)
            .instrument(span.clone())
            .await?;
        Ok(start(stream, params, config.transfer, session_id, span))
    }

    pub async fn accept(listener: &TcpListener, config: ServerConfig) -> anyhow::Result<SessionHandle> {
        config.validate()?;
        let (stream, peer_addr) = listener.accept().await?;
        stream.set_nodelay(true)?;
        info!("accepted connection from {:?}", peer_addr);
        Session::server(stream, config).await
    }

    /// Run the handshake as a server on an established stream
    pub async fn server<S>(mut stream: S, config: ServerConfig) -> anyhow::Result<SessionHandle>
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
    {
        config.validate()?;

        let session_id = Uuid::new_v4();
        let span = span!(Level::INFO, "session", ?session_id, role = %Role::Server);

        let params = server_handshake(&mut stream, &config)
            .instrument(span.clone())
            .await?;
        Ok(start(stream, params, config.transfer, session_id, span))
    }
}

fn start<S>(stream: S, params: SessionParameters, transfer: TransferConfig, session_id: Uuid, span: tracing::Span) -> SessionHandle
where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
{
    let (read_half, write_half) = tokio::io::split(stream);

    // NB: unbounded so that the reader never waits for the session task, which may itself be
    //  blocked writing to the peer. The peer's window bounds what can pile up here.
    let (frame_send, frame_recv) = mpsc::unbounded_channel();
    let (command_send, command_recv) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (delivered_send, delivered_recv) = mpsc::unbounded_channel();
    let (abort_send, abort_recv) = watch::channel(false);

    let reader = tokio::spawn(
        read_loop(read_half, transfer.max_frame_len, frame_send)
            .instrument(span.clone())
    );

    let params = Arc::new(params);
    let driver = SessionDriver {
        receiver: ReceiveWindow::new(&params),
        params: params.clone(),
        transfer,
        sink: FramedSink::new(write_half),
        active: None,
        queue: VecDeque::new(),
        next_seq: SeqNum::ZERO,
        commands: command_recv,
        commands_open: true,
        frames: frame_recv,
        delivered: delivered_send,
        abort: abort_recv,
        reader,
    };
    let task = tokio::spawn(driver.run().instrument(span));

    SessionHandle {
        session_id,
        params,
        sender: MessageSender { commands: command_send },
        delivered: delivered_recv,
        abort: abort_send,
        task,
    }
}

async fn read_loop<R: AsyncRead>(mut reader: ReadHalf<R>, max_frame_len: usize, frames: mpsc::UnboundedSender<Result<Packet, ArqError>>) {
    loop {
        let frame = read_frame(&mut reader, max_frame_len).await;
        let is_final = frame.is_err();
        if frames.send(frame).is_err() {
            trace!("session ended - stopping reader");
            break;
        }
        if is_final {
            break;
        }
    }
}


enum Command {
    Send {
        message: String,
        reply: oneshot::Sender<Result<SendReport, ArqError>>,
    },
}

struct PendingSend {
    message: String,
    reply: oneshot::Sender<Result<SendReport, ArqError>>,
}

struct ActiveSend {
    window: SendWindow,
    reply: oneshot::Sender<Result<SendReport, ArqError>>,
}

struct SessionDriver<S> {
    params: Arc<SessionParameters>,
    transfer: TransferConfig,
    sink: FramedSink<WriteHalf<S>>,
    receiver: ReceiveWindow,

    /// at most one message is being sent at any time, others are queued
    active: Option<ActiveSend>,
    queue: VecDeque<PendingSend>,
    /// sequence numbers continue across messages
    next_seq: SeqNum,

    commands: mpsc::Receiver<Command>,
    commands_open: bool,
    frames: mpsc::UnboundedReceiver<Result<Packet, ArqError>>,
    delivered: mpsc::UnboundedSender<Result<String, ArqError>>,
    abort: watch::Receiver<bool>,
    reader: JoinHandle<()>,
}

impl<S: AsyncRead + AsyncWrite + Send + 'static> SessionDriver<S> {
    async fn run(mut self) {
        info!("session started: window size {}, {}{}, max message size {}, encryption {}",
            self.params.window_size,
            self.params.operation_mode,
            if self.params.mode_fallback { " (fallback)" } else { "" },
            self.params.max_message_size,
            self.params.cipher.as_ref().map(|c| c.name()).unwrap_or("disabled"),
        );

        let result = self.event_loop().await;
        match &result {
            Ok(()) => info!("session closed"),
            Err(ArqError::Aborted) => info!("session aborted"),
            Err(e) => error!("session failed: {}", e),
        }

        self.shutdown(result).await;
    }

    async fn event_loop(&mut self) -> Result<(), ArqError> {
        loop {
            if !self.commands_open && self.active.is_none() && self.queue.is_empty() && self.receiver.is_idle() {
                debug!("all messages sent, no more commands and no message coming in - closing");
                return Ok(());
            }

            let deadline = self.active.as_ref()
                .and_then(|a| a.window.next_deadline());

            select! {
                biased;
                _ = self.abort.changed() => {
                    // either an explicit abort, or the handle was dropped
                    return Err(ArqError::Aborted);
                }
                frame = self.frames.recv() => match frame {
                    Some(Ok(packet)) => self.on_packet(packet).await?,
                    Some(Err(e)) if e.is_clean_close() => return self.on_stream_closed(),
                    Some(Err(e)) => return Err(e),
                    None => return self.on_stream_closed(),
                },
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(Command::Send { message, reply }) => {
                        self.queue.push_back(PendingSend { message, reply });
                        self.start_next_send().await?;
                    }
                    None => self.commands_open = false,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(active) = &mut self.active {
                        active.window.on_timers_due(Instant::now(), &mut self.sink).await?;
                    }
                }
            }
        }
    }

    async fn on_packet(&mut self, packet: Packet) -> Result<(), ArqError> {
        match packet {
            Packet::Data(data) => {
                let seq = data.seq_num;
                if let Some(response) = self.receiver.on_data(data)? {
                    trace!("responding to #{} with {}", seq, response.kind());
                    self.sink.send_packet(&response).await?;
                }
                if let Some(message) = self.receiver.take_message() {
                    info!("received message of {} characters", message.chars().count());
                    self.deliver(Ok(message));
                }
            }
            Packet::Ack { seq_num } => {
                match &mut self.active {
                    Some(active) => active.window.on_ack(seq_num, &mut self.sink).await?,
                    None => debug!("ACK for #{} while no message is being sent - ignoring", seq_num),
                }
                self.complete_send_if_done().await?;
            }
            Packet::Nack { seq_num } => {
                match &mut self.active {
                    Some(active) => active.window.on_nack(seq_num, &mut self.sink).await?,
                    None => debug!("NACK for #{} while no message is being sent - ignoring", seq_num),
                }
            }
            Packet::Handshake(_) | Packet::HandshakeAck(_) => {
                warn!("received '{}' packet in an established session - ignoring", packet.kind());
            }
        }
        Ok(())
    }

    async fn complete_send_if_done(&mut self) -> Result<(), ArqError> {
        if !self.active.as_ref().map(|a| a.window.is_done()).unwrap_or(false) {
            return Ok(());
        }

        if let Some(active) = self.active.take() {
            let report = active.window.report();
            info!("message of {} fragments sent in {:?} with {} retransmissions", report.fragments, report.elapsed, report.retransmitted.len());
            if active.reply.send(Ok(report)).is_err() {
                debug!("nobody is waiting for the send result");
            }
        }
        self.start_next_send().await
    }

    async fn start_next_send(&mut self) -> Result<(), ArqError> {
        while self.active.is_none() {
            let Some(pending) = self.queue.pop_front() else {
                return Ok(());
            };

            match SendWindow::new(&pending.message, self.next_seq, &self.params, &self.transfer) {
                Ok(window) => {
                    self.next_seq = window.end_seq();
                    let active = self.active.insert(ActiveSend { window, reply: pending.reply });
                    active.window.fill(&mut self.sink).await?;
                }
                Err(e) => {
                    // this affects only this message, not the session
                    warn!("not sending message: {}", e);
                    let _ = pending.reply.send(Err(e));
                }
            }
        }
        Ok(())
    }

    fn on_stream_closed(&mut self) -> Result<(), ArqError> {
        debug!("peer closed the stream");
        if let Some(message) = self.receiver.finish_on_close()? {
            info!("received message of {} characters (terminated by end of stream)", message.chars().count());
            self.deliver(Ok(message));
        }
        if self.active.is_some() || !self.queue.is_empty() {
            return Err(ArqError::StreamClosed);
        }
        Ok(())
    }

    fn deliver(&self, message: Result<String, ArqError>) {
        if self.delivered.send(message).is_err() {
            debug!("nobody is receiving messages - discarding");
        }
    }

    async fn shutdown(mut self, result: Result<(), ArqError>) {
        self.reader.abort();

        if let Err(e) = self.sink.close().await {
            debug!("error closing the stream: {}", e);
        }

        let error = match result {
            Ok(()) => ArqError::StreamClosed,
            Err(e) => {
                self.deliver(Err(e.clone()));
                e
            }
        };

        if let Some(active) = self.active.take() {
            let _ = active.reply.send(Err(error.clone()));
        }
        for pending in self.queue.drain(..) {
            let _ = pending.reply.send(Err(error.clone()));
        }
        self.commands.close();
        while let Ok(Command::Send { reply, .. }) = self.commands.try_recv() {
            let _ = reply.send(Err(error.clone()));
        }
    }
}


/// Submits messages to a session. This can be cloned to send from several places.
///
/// NB: [SessionHandle::close] waits until all clones are dropped
#[derive(Clone)]
pub struct MessageSender {
    commands: mpsc::Sender<Command>,
}

impl MessageSender {
    /// Send a message, returning when all of its fragments are acknowledged. Messages are sent one
    ///  at a time in the order in which they are submitted.
    ///
    /// If the session ended before the message could be handed over, this returns
    ///  [ArqError::StreamClosed].
    pub async fn send_message(&self, message: &str) -> Result<SendReport, ArqError> {
        let (reply, result) = oneshot::channel();
        self.commands.send(Command::Send { message: message.to_string(), reply }).await
            .map_err(|_| ArqError::StreamClosed)?;
        result.await
            .map_err(|_| ArqError::StreamClosed)?
    }
}

pub struct SessionHandle {
    session_id: Uuid,
    params: Arc<SessionParameters>,
    sender: MessageSender,
    delivered: mpsc::UnboundedReceiver<Result<String, ArqError>>,
    abort: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn parameters(&self) -> &SessionParameters {
        &self.params
    }

    pub fn sender(&self) -> MessageSender {
        self.sender.clone()
    }

    pub async fn send_message(&self, message: &str) -> Result<SendReport, ArqError> {
        self.sender.send_message(message).await
    }

    /// The next message received from the peer. `None` means that the session ended without
    ///  error, a fatal error is returned once before that.
    pub async fn next_message(&mut self) -> Option<Result<String, ArqError>> {
        self.delivered.recv().await
    }

    /// Ends the session immediately, failing pending sends with [ArqError::Aborted]
    pub fn abort(&self) {
        let _ = self.abort.send(true);
    }

    /// Finish sending all submitted messages, then close the stream. A message the peer is in the
    ///  middle of sending is received to completion first, so that the peer's send does not fail.
    pub async fn close(self) -> anyhow::Result<()> {
        let SessionHandle { sender, abort, task, .. } = self;
        drop(sender);
        task.await?;
        drop(abort);
        Ok(())
    }
}
