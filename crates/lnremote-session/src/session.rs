use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use lnremote_protocol::{Command, Frame, HostCodec};
use lnremote_transport::{DeviceStream, Endpoint};
use parking_lot::{Mutex, RwLock};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::notify::{FrameObserver, Notifications};

/// Positive acknowledgement of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub seq: u16,
}

/// Link state as seen by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => f.write_str("connected"),
            Self::Disconnected => f.write_str("disconnected"),
        }
    }
}

type Responder = oneshot::Sender<Result<Ack>>;
type Writer = FramedWrite<WriteHalf<DeviceStream>, HostCodec>;
type Reader = FramedRead<ReadHalf<DeviceStream>, HostCodec>;

/// State shared between the session handle and its drain task.
struct Shared {
    pending: Mutex<HashMap<u16, Responder>>,
    observers: RwLock<Vec<Arc<dyn FrameObserver>>>,
    notify_tx: broadcast::Sender<Frame>,
    state_tx: watch::Sender<SessionState>,
    /// Bumped on every (re)connect so a stale drain task cannot tear down its successor.
    generation: AtomicU64,
}

impl Shared {
    fn dispatch(&self, frame: Frame) {
        match frame {
            Frame::CommandAck { seq } => self.resolve(seq, Ok(Ack { seq })),
            Frame::CommandNack { seq, reason } => {
                self.resolve(seq, Err(SessionError::Rejected { seq, reason }))
            }
            notification => {
                for observer in self.observers.read().iter() {
                    observer.observe(&notification);
                }
                // No subscribers is fine.
                let _ = self.notify_tx.send(notification);
            }
        }
    }

    fn resolve(&self, seq: u16, result: Result<Ack>) {
        match self.pending.lock().remove(&seq) {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => debug!(seq, "response for unknown or expired command"),
        }
    }

    fn fail_pending(&self) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            warn!(count = drained.len(), "failing outstanding commands");
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(SessionError::Disconnected));
        }
    }

    fn mark_disconnected(&self, generation: u64) {
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        let was_connected = self.state_tx.send_replace(SessionState::Disconnected)
            == SessionState::Connected;
        self.fail_pending();
        if was_connected {
            warn!("session disconnected");
        }
    }
}

/// Forgets a pending command however `send` exits, including cancellation.
struct PendingGuard<'a> {
    shared: &'a Shared,
    seq: u16,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending.lock().remove(&self.seq);
    }
}

struct Link {
    writer: Writer,
    drain: JoinHandle<()>,
    label: String,
}

/// Exclusive owner of one device connection.
///
/// Only the session writes to the transport. Concurrent callers may have
/// several commands outstanding; each is matched to its response by
/// sequence number and bounded by [`SessionConfig::command_timeout`].
pub struct Session {
    shared: Arc<Shared>,
    link: tokio::sync::Mutex<Option<Link>>,
    next_seq: AtomicU16,
    endpoint: Option<Endpoint>,
    config: SessionConfig,
}

impl Session {
    /// Connect to `endpoint` and start draining it.
    pub async fn open(endpoint: Endpoint, config: SessionConfig) -> Result<Self> {
        let stream = lnremote_transport::connect(&endpoint, config.connect_timeout).await?;
        info!(endpoint = %endpoint, "session opened");
        let session = Self::build(Some(endpoint), config);
        session.install(stream).await;
        Ok(session)
    }

    /// Wrap an already-connected stream. Such a session can only be
    /// reconnected through [`reconnect_with`](Self::reconnect_with).
    ///
    /// Must be called from within a tokio runtime.
    pub async fn with_stream(stream: DeviceStream, config: SessionConfig) -> Self {
        let session = Self::build(None, config);
        session.install(stream).await;
        session
    }

    fn build(endpoint: Option<Endpoint>, config: SessionConfig) -> Self {
        let (notify_tx, _) = broadcast::channel(config.notification_capacity.max(1));
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                pending: Mutex::new(HashMap::new()),
                observers: RwLock::new(Vec::new()),
                notify_tx,
                state_tx,
                generation: AtomicU64::new(0),
            }),
            link: tokio::sync::Mutex::new(None),
            next_seq: AtomicU16::new(1),
            endpoint,
            config,
        }
    }

    async fn install(&self, stream: DeviceStream) {
        let mut link = self.link.lock().await;
        if let Some(old) = link.take() {
            old.drain.abort();
            // Watchers must see the old link go down even though a new one follows.
            self.shared
                .mark_disconnected(self.shared.generation.load(Ordering::Acquire));
        }
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        // Anything still waiting belongs to the previous connection.
        self.shared.fail_pending();

        let label = stream.label().to_string();
        let (read_half, write_half) = tokio::io::split(stream);
        let reader = FramedRead::new(read_half, HostCodec::new(self.config.codec.clone()));
        let writer = FramedWrite::new(write_half, HostCodec::new(self.config.codec.clone()));
        let drain = tokio::spawn(drain(Arc::clone(&self.shared), reader, generation));

        *link = Some(Link {
            writer,
            drain,
            label,
        });
        self.shared.state_tx.send_replace(SessionState::Connected);
    }

    /// Send `command` and wait for its ACK.
    ///
    /// The sequence number is assigned here. A command that sees no response
    /// within the timeout resolves to [`SessionError::Timeout`] and is never
    /// resent.
    pub async fn send(&self, command: Command) -> Result<Ack> {
        if self.state() == SessionState::Disconnected {
            return Err(SessionError::Disconnected);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let command = command.with_seq(seq);
        let (rx, _pending) = self.register(seq)?;

        self.write(command).await?;
        debug!(%command, "command sent");

        match tokio::time::timeout(self.config.command_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::Disconnected),
            Err(_) => {
                warn!(seq, after = ?self.config.command_timeout, "command timed out");
                Err(SessionError::Timeout {
                    seq,
                    after: self.config.command_timeout,
                })
            }
        }
    }

    /// Add `seq` to the pending table.
    ///
    /// The state is checked after inserting: a disconnect that ran before the
    /// insert never saw this entry in `fail_pending`.
    fn register(&self, seq: u16) -> Result<(oneshot::Receiver<Result<Ack>>, PendingGuard<'_>)> {
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(seq, tx);
        let guard = PendingGuard {
            shared: &self.shared,
            seq,
        };
        if self.state() == SessionState::Disconnected {
            return Err(SessionError::Disconnected);
        }
        Ok((rx, guard))
    }

    async fn write(&self, command: Command) -> Result<()> {
        let mut guard = self.link.lock().await;
        let link = guard.as_mut().ok_or(SessionError::Disconnected)?;
        if let Err(err) = link.writer.send(command).await {
            warn!(error = %err, link = %link.label, "write failed");
            let generation = self.shared.generation.load(Ordering::Acquire);
            self.shared.mark_disconnected(generation);
            return Err(SessionError::Disconnected);
        }
        Ok(())
    }

    /// Subscribe to unsolicited frames.
    pub fn subscribe(&self) -> Notifications {
        Notifications::new(self.shared.notify_tx.subscribe())
    }

    /// Register an observer invoked for every unsolicited frame.
    pub fn add_observer(&self, observer: Arc<dyn FrameObserver>) {
        self.shared.observers.write().push(observer);
    }

    /// Current link state.
    pub fn state(&self) -> SessionState {
        *self.shared.state_tx.borrow()
    }

    /// Identifies the current link. Changes on every connect and reconnect.
    pub fn link_generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }

    /// Watch link state transitions.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    /// Endpoint this session was opened with, if any.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Reopen the original endpoint, replacing the current link.
    pub async fn reconnect(&self) -> Result<()> {
        let endpoint = self.endpoint.as_ref().ok_or(SessionError::NotReconnectable)?;
        let stream = lnremote_transport::connect(endpoint, self.config.connect_timeout).await?;
        self.install(stream).await;
        info!(endpoint = %endpoint, "session reconnected");
        Ok(())
    }

    /// Replace the current link with `stream`.
    pub async fn reconnect_with(&self, stream: DeviceStream) {
        let label = stream.label().to_string();
        self.install(stream).await;
        info!(link = %label, "session reconnected");
    }

    /// Close the link. Outstanding commands fail with `Disconnected`.
    pub async fn close(&self) {
        let link = self.link.lock().await.take();
        if let Some(mut link) = link {
            if let Err(err) = SinkExt::<Command>::close(&mut link.writer).await {
                debug!(error = %err, "error while closing link");
            }
            link.drain.abort();
            info!(link = %link.label, "session closed");
        }
        let generation = self.shared.generation.load(Ordering::Acquire);
        self.shared.mark_disconnected(generation);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().as_ref() {
            link.drain.abort();
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

async fn drain(shared: Arc<Shared>, mut reader: Reader, generation: u64) {
    while let Some(item) = reader.next().await {
        match item {
            Ok(Ok(frame)) => shared.dispatch(frame),
            // Already logged by the codec; the stream has resynchronized.
            Ok(Err(_)) => {}
            Err(err) => {
                warn!(error = %err, "transport read failed");
                break;
            }
        }
    }
    debug!(generation, "drain task finished");
    shared.mark_disconnected(generation);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use lnremote_protocol::{Axis, CommandKind, DeviceCodec, NackReason};
    use tokio_util::codec::Framed;

    use super::*;

    type DeviceSide = Framed<DeviceStream, DeviceCodec>;

    async fn pair(timeout: Duration) -> (Session, DeviceSide) {
        let (host, device) = DeviceStream::memory_pair(1024);
        let config = SessionConfig::default().with_command_timeout(timeout);
        let session = Session::with_stream(host, config).await;
        (session, Framed::new(device, DeviceCodec::default()))
    }

    async fn next_command(device: &mut DeviceSide) -> Command {
        device.next().await.unwrap().unwrap().unwrap()
    }

    #[tokio::test]
    async fn ack_resolves_matching_command() {
        let (session, mut device) = pair(Duration::from_secs(1)).await;

        let send = session.send(Command::new(Axis::X, CommandKind::Enable));
        let device_side = async {
            let cmd = next_command(&mut device).await;
            device.send(Frame::CommandAck { seq: cmd.seq }).await.unwrap();
            cmd
        };
        let (ack, cmd) = tokio::join!(send, device_side);

        assert_eq!(ack.unwrap(), Ack { seq: cmd.seq });
        assert_eq!(cmd.kind, CommandKind::Enable);
    }

    #[tokio::test]
    async fn out_of_order_responses_are_correlated() {
        let (session, mut device) = pair(Duration::from_secs(1)).await;

        let first = session.send(Command::new(Axis::X, CommandKind::Poll));
        let second = session.send(Command::new(Axis::Y, CommandKind::Stop));
        let device_side = async {
            let a = next_command(&mut device).await;
            let b = next_command(&mut device).await;
            device
                .send(Frame::CommandNack {
                    seq: b.seq,
                    reason: NackReason::Busy,
                })
                .await
                .unwrap();
            device.send(Frame::CommandAck { seq: a.seq }).await.unwrap();
        };
        let (first, second, ()) = tokio::join!(first, second, device_side);

        assert!(first.is_ok());
        assert!(matches!(
            second,
            Err(SessionError::Rejected {
                reason: NackReason::Busy,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_ack_times_out_without_retry() {
        let (session, mut device) = pair(Duration::from_secs(3)).await;

        let result = session
            .send(Command::new(Axis::Z, CommandKind::Poll))
            .await;
        assert!(matches!(result, Err(SessionError::Timeout { seq: 1, .. })));

        // Exactly one command hit the wire.
        let cmd = next_command(&mut device).await;
        assert_eq!(cmd.seq, 1);
        let again = tokio::time::timeout(Duration::from_secs(10), device.next()).await;
        assert!(again.is_err());
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn notifications_reach_observers_and_subscribers_in_order() {
        struct Recorder(Mutex<Vec<Frame>>);
        impl FrameObserver for Recorder {
            fn observe(&self, frame: &Frame) {
                self.0.lock().push(*frame);
            }
        }

        let (session, mut device) = pair(Duration::from_secs(1)).await;
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        session.add_observer(recorder.clone());
        let mut notifications = session.subscribe();

        let reports: Vec<Frame> = [10.0, 20.0, 30.0]
            .into_iter()
            .map(|position| Frame::PositionReport {
                axis: Axis::X,
                position,
                moving: true,
                enabled: true,
            })
            .collect();
        for report in &reports {
            device.send(*report).await.unwrap();
        }
        device.send(Frame::Heartbeat).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(notifications.next().await.unwrap());
        }
        assert_eq!(&seen[..3], &reports[..]);
        assert_eq!(seen[3], Frame::Heartbeat);
        assert_eq!(*recorder.0.lock(), seen);
    }

    #[tokio::test]
    async fn disconnect_fails_outstanding_and_blocks_new_commands() {
        let (session, mut device) = pair(Duration::from_secs(5)).await;
        let mut state = session.state_changes();

        let send = session.send(Command::new(Axis::X, CommandKind::Poll));
        let device_side = async move {
            let _ = next_command(&mut device).await;
            drop(device);
        };
        let (result, ()) = tokio::join!(send, device_side);

        assert!(matches!(result, Err(SessionError::Disconnected)));
        state
            .wait_for(|s| *s == SessionState::Disconnected)
            .await
            .unwrap();
        assert!(matches!(
            session.send(Command::new(Axis::X, CommandKind::Poll)).await,
            Err(SessionError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn reconnect_with_restores_service() {
        let (session, device) = pair(Duration::from_secs(1)).await;
        drop(device);
        session
            .state_changes()
            .wait_for(|s| *s == SessionState::Disconnected)
            .await
            .unwrap();

        let (host, device) = DeviceStream::memory_pair(1024);
        session.reconnect_with(host).await;
        assert_eq!(session.state(), SessionState::Connected);

        let mut device = Framed::new(device, DeviceCodec::default());
        let send = session.send(Command::new(Axis::Y, CommandKind::Enable));
        let device_side = async {
            let cmd = next_command(&mut device).await;
            device.send(Frame::CommandAck { seq: cmd.seq }).await.unwrap();
        };
        let (ack, ()) = tokio::join!(send, device_side);
        assert!(ack.is_ok());
    }

    #[tokio::test]
    async fn replacing_a_live_link_fails_its_commands_and_bumps_generation() {
        let (session, mut device) = pair(Duration::from_secs(5)).await;
        let before = session.link_generation();
        let (host, _replacement) = DeviceStream::memory_pair(1024);

        let send = session.send(Command::new(Axis::X, CommandKind::Poll));
        let swap = async {
            // Swap only once the command is on the old wire.
            let _ = next_command(&mut device).await;
            session.reconnect_with(host).await;
        };
        let (result, ()) = tokio::join!(send, swap);

        assert!(matches!(result, Err(SessionError::Disconnected)));
        assert_ne!(session.link_generation(), before);
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn registration_rechecks_state_after_insert() {
        let (session, _device) = pair(Duration::from_secs(1)).await;

        let (rx, _guard) = session.register(40).unwrap();
        session
            .shared
            .mark_disconnected(session.link_generation());
        assert!(matches!(rx.await, Ok(Err(SessionError::Disconnected))));

        assert!(matches!(
            session.register(41),
            Err(SessionError::Disconnected)
        ));
        assert!(session.shared.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn stream_session_is_not_reconnectable() {
        let (session, _device) = pair(Duration::from_secs(1)).await;
        assert!(matches!(
            session.reconnect().await,
            Err(SessionError::NotReconnectable)
        ));
    }

    #[tokio::test]
    async fn close_marks_disconnected() {
        let (session, _device) = pair(Duration::from_secs(1)).await;
        session.close().await;
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
