//! Rebroadcast: one transcoder writes an mpegts stream into a private port,
//! the stream is cut back into whole transport packets and fanned out to
//! every client of a public loopback port.
//!
//! ```text
//!  transcoder ──tcp──► producer port (accepts once)
//!                           │
//!                     PacketAligner (188-byte multiples)
//!                           │
//!                  broadcast<RebroadcastEvent>
//!                     ┌─────┼─────┐
//!                     ▼     ▼     ▼
//!                  client client client   (consumer port)
//! ```
//!
//! Slow clients are not waited for: a client that falls behind the event
//! buffer loses whole chunks.

use std::{
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::broadcast,
    task::JoinHandle,
};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::{
    error::{MediaError, Result},
    ffmpeg_input::FFmpegInput,
    listener::{SingleAccept, bind_loopback},
    transcoder::{Diagnostics, Transcoder, TranscoderProcess},
};

/// Size of one mpegts transport packet.
pub const TS_PACKET_SIZE: usize = 188;
pub const PRODUCER_ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

const READ_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct RebroadcastOptions {
    pub vcodec: Vec<String>,
    pub acodec: Vec<String>,
    /// Placed before the mpegts output.
    pub additional_outputs: Vec<String>,
    /// Kill the session after this long without clients.
    pub timeout: Option<Duration>,
    pub packet_size: usize,
    pub producer_timeout: Duration,
    /// Chunks a client may fall behind before it starts losing data.
    pub event_capacity: usize,
}

impl Default for RebroadcastOptions {
    fn default() -> Self {
        Self {
            vcodec: vec!["-vcodec".to_string(), "copy".to_string()],
            acodec: vec!["-acodec".to_string(), "copy".to_string()],
            additional_outputs: Vec::new(),
            timeout: None,
            packet_size: TS_PACKET_SIZE,
            producer_timeout: PRODUCER_ACCEPT_TIMEOUT,
            event_capacity: 1024,
        }
    }
}

#[derive(Clone, Debug)]
pub enum RebroadcastEvent {
    /// Packet-aligned bytes, in arrival order.
    Data(Bytes),
    /// Sent once, when the session dies.
    Killed,
}

/// Accumulates arbitrary chunks and releases the longest prefix that is a
/// whole number of packets.
#[derive(Debug)]
pub struct PacketAligner {
    packet_size: usize,
    pending: BytesMut,
}

impl PacketAligner {
    pub fn new(packet_size: usize) -> Self {
        Self {
            packet_size: packet_size.max(1),
            pending: BytesMut::new(),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Option<Bytes> {
        self.pending.extend_from_slice(chunk);
        if self.pending.len() < self.packet_size {
            return None;
        }
        let flush_len = self.pending.len() / self.packet_size * self.packet_size;
        Some(self.pending.split_to(flush_len).freeze())
    }

    /// Bytes held back waiting for the rest of their packet.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[derive(Clone)]
pub struct RebroadcastSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    events: broadcast::Sender<RebroadcastEvent>,
    cancel: CancellationToken,
    active: AtomicBool,
    timeout: Option<Duration>,
    idle: Mutex<IdleState>,
    process: TranscoderProcess,
    port: u16,
}

/// Client count and idle timer change together under one lock, so a client
/// arriving while the last one leaves never finds a timer armed.
#[derive(Default)]
struct IdleState {
    clients: usize,
    timer: Option<JoinHandle<()>>,
}

impl RebroadcastSession {
    /// Launches the transcoder and returns once it has connected to the
    /// producer port.
    pub async fn start(
        transcoder: &dyn Transcoder,
        input: &FFmpegInput,
        options: RebroadcastOptions,
    ) -> Result<Self> {
        let consumers = bind_loopback().await?;
        let port = consumers.local_addr()?.port();
        let producer = SingleAccept::bind().await?;

        let mut args = input.input_arguments.clone();
        args.extend(options.additional_outputs.iter().cloned());
        args.extend(["-f".to_string(), "mpegts".to_string()]);
        args.extend(options.vcodec.iter().cloned());
        args.extend(options.acodec.iter().cloned());
        args.push(producer.url());

        let process = transcoder.spawn(args, Diagnostics::Ignore)?;

        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        let session = Self {
            inner: Arc::new(SessionInner {
                events,
                cancel: CancellationToken::new(),
                active: AtomicBool::new(true),
                timeout: options.timeout,
                idle: Mutex::new(IdleState::default()),
                process,
                port,
            }),
        };
        session.reset_activity_timer();

        tokio::spawn(Self::accept_loop(session.downgrade(), consumers));

        let cancel = session.inner.cancel.clone();
        let accepted = tokio::select! {
            accepted = producer.accept_until(&cancel, options.producer_timeout) => accepted,
            code = session.inner.process.wait() => Err(MediaError::Transcoder(format!(
                "exited before connecting (code {:?})",
                code
            ))),
        };
        let socket = match accepted {
            Ok(Some(socket)) => socket,
            Ok(None) => {
                return Err(MediaError::Transcoder(
                    "session killed before the transcoder connected".to_string(),
                ));
            }
            Err(e) => {
                log::error!("rebroadcast producer failed: {}", e);
                session.kill();
                return Err(e);
            }
        };
        log::info!("rebroadcast producer connected, serving on {}", port);

        tokio::spawn(Self::producer_loop(
            session.clone(),
            socket,
            PacketAligner::new(options.packet_size),
        ));
        tokio::spawn(Self::watch_process(session.clone()));

        Ok(session)
    }

    /// Descriptor that reads the multiplexed output like any other input.
    pub fn ffmpeg_input(&self) -> FFmpegInput {
        FFmpegInput::mpegts_tcp(self.inner.port)
    }

    pub fn port(&self) -> u16 {
        self.inner.port
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn clients(&self) -> usize {
        self.idle().clients
    }

    /// Receives every event sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RebroadcastEvent> {
        self.inner.events.subscribe()
    }

    /// Resolves once the session has been killed.
    pub fn killed(&self) -> WaitForCancellationFuture<'_> {
        self.inner.cancel.cancelled()
    }

    pub fn kill_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Safe to call any number of times from anywhere; `Killed` goes out once.
    pub fn kill(&self) {
        if self.inner.active.swap(false, Ordering::SeqCst) {
            log::info!("rebroadcast session on {} killed", self.inner.port);
            let _ = self.inner.events.send(RebroadcastEvent::Killed);
        }
        self.inner.cancel.cancel();
        self.inner.process.kill();
        self.clear_activity_timer();
    }

    /// (Re)arms the idle timer while no client is connected. No-op without a
    /// timeout.
    pub fn reset_activity_timer(&self) {
        let mut idle = self.idle();
        if idle.clients == 0 {
            self.arm_timer(&mut idle);
        }
    }

    fn arm_timer(&self, idle: &mut IdleState) {
        let Some(timeout) = self.inner.timeout else {
            return;
        };
        if !self.is_active() {
            return;
        }
        // Clients can leave while the runtime is shutting down.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let weak = self.downgrade();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(session) = Self::upgrade(&weak) {
                log::info!(
                    "rebroadcast session on {} idle for {:?}",
                    session.inner.port,
                    timeout
                );
                session.kill();
            }
        });
        if let Some(previous) = idle.timer.replace(handle) {
            previous.abort();
        }
    }

    fn clear_activity_timer(&self) {
        if let Some(timer) = self.idle().timer.take() {
            timer.abort();
        }
    }

    fn idle(&self) -> std::sync::MutexGuard<'_, IdleState> {
        self.inner.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn downgrade(&self) -> Weak<SessionInner> {
        Arc::downgrade(&self.inner)
    }

    fn upgrade(weak: &Weak<SessionInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    async fn accept_loop(weak: Weak<SessionInner>, listener: TcpListener) {
        let Some(cancel) = weak.upgrade().map(|inner| inner.cancel.clone()) else {
            return;
        };
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            let Some(session) = Self::upgrade(&weak) else {
                break;
            };
            match accepted {
                Ok((socket, peer)) => {
                    log::debug!("rebroadcast client connected from {}", peer);
                    tokio::spawn(session.serve_client(socket));
                }
                Err(e) => log::warn!("rebroadcast accept error: {:#}", e),
            }
        }
        log::debug!("rebroadcast consumer listener closed");
    }

    async fn producer_loop(session: Self, mut socket: TcpStream, mut aligner: PacketAligner) {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let cancel = session.inner.cancel.clone();
        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => break,
                read = socket.read(&mut buf) => read,
            };
            match read {
                Ok(0) => {
                    log::info!(
                        "rebroadcast producer closed, {} bytes unflushed",
                        aligner.pending_len()
                    );
                    break;
                }
                Ok(n) => {
                    if let Some(data) = aligner.push(&buf[..n]) {
                        // no receivers is fine
                        let _ = session.inner.events.send(RebroadcastEvent::Data(data));
                    }
                }
                Err(e) => {
                    log::error!("rebroadcast producer read error: {:#}", e);
                    break;
                }
            }
        }
        session.kill();
    }

    async fn watch_process(session: Self) {
        let cancel = session.kill_token();
        tokio::select! {
            _ = cancel.cancelled() => {}
            code = session.inner.process.wait() => {
                log::warn!("rebroadcast transcoder exited (code {:?})", code);
                session.kill();
            }
        }
    }

    async fn serve_client(self, socket: TcpStream) {
        let mut events = self.subscribe();
        let guard = ClientGuard::register(&self);
        let (mut reader, mut writer) = socket.into_split();
        let mut scratch = [0u8; 512];
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(RebroadcastEvent::Data(data)) => {
                        if let Err(e) = writer.write_all(&data).await {
                            log::debug!("rebroadcast client write error: {:#}", e);
                            break;
                        }
                    }
                    Ok(RebroadcastEvent::Killed) | Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("rebroadcast client fell behind, dropped {} chunks", skipped);
                    }
                },
                read = reader.read(&mut scratch) => match read {
                    Ok(0) | Err(_) => break,
                    // clients have nothing to say
                    Ok(_) => {}
                },
            }
        }
        let _ = writer.shutdown().await;
        drop(guard);
    }
}

/// Counts a connected client; the count drops exactly once, whichever way
/// the client goes away.
struct ClientGuard {
    session: RebroadcastSession,
}

impl ClientGuard {
    fn register(session: &RebroadcastSession) -> Self {
        {
            let mut idle = session.idle();
            idle.clients += 1;
            if let Some(timer) = idle.timer.take() {
                timer.abort();
            }
            log::info!("rebroadcast client {}", idle.clients);
        }
        Self {
            session: session.clone(),
        }
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        let mut idle = self.session.idle();
        idle.clients = idle.clients.saturating_sub(1);
        log::info!("rebroadcast client left, {} remaining", idle.clients);
        if idle.clients == 0 {
            self.session.arm_timer(&mut idle);
        }
    }
}

#[cfg(test)]
#[path = "rebroadcast_test.rs"]
mod rebroadcast_test;
