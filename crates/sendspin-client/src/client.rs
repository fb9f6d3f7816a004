//! Sendspin client façade
//!
//! One session task owns the transport, the state machine, the sync engine and
//! the decode pipeline. It processes transport events one at a time in arrival
//! order and runs the reconnect loop. The public handle talks to it through a
//! command channel and reads shared state for snapshots.

use crate::audio::DecodePipeline;
use crate::config::ClientConfig;
use crate::events::{ClientEvent, ErrorReport, Severity};
use crate::identity;
use crate::playback::{AudioSink, DriftMode, NullSink, PlaybackScheduler, SharedScheduler};
use crate::protocol::ClientMessage;
use crate::session::{SessionAction, SessionMachine, SessionState};
use crate::supervisor::{ReconnectDecision, ReconnectionPolicy, ReconnectionSupervisor};
use crate::sync::{ClockEstimate, MonotonicClock, SharedClock, SyncEngine};
use crate::transport::{CloseInfo, TransportEvent, WebSocketTransport, ABNORMAL_CLOSE, NORMAL_CLOSE};
use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Point-in-time view of the client
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientSnapshot {
    /// Lifecycle state
    pub state: SessionState,
    /// Active stream id
    pub stream_id: Option<String>,
    /// Server minus local clock, microseconds
    pub clock_offset_us: f64,
    /// Offset change per sync round, microseconds
    pub clock_drift_us: f64,
    /// Kalman variance
    pub clock_variance: f64,
    /// Drift correction tier of the latest buffer
    pub drift_mode: DriftMode,
    /// Playback rate of the latest buffer
    pub playback_rate: f64,
    /// Queued, unfinished buffers
    pub queue_depth: usize,
    /// Volume 0.0-1.0
    pub volume: f32,
    /// Mute flag
    pub muted: bool,
    /// Reconnect attempts since the last successful connect
    pub reconnect_attempts: u32,
}

#[derive(Debug, Clone)]
struct Status {
    state: SessionState,
    stream_id: Option<String>,
    volume: u8,
    muted: bool,
}

enum Command {
    SetVolume(u8),
    SetMuted(bool),
    Disconnect,
}

struct Inner {
    config: ClientConfig,
    client_id: String,
    clock: MonotonicClock,
    shared_clock: SharedClock,
    scheduler: SharedScheduler,
    supervisor: ReconnectionSupervisor,
    events: broadcast::Sender<ClientEvent>,
    state_tx: watch::Sender<SessionState>,
    status: RwLock<Status>,
    control: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_state(&self, from: SessionState, to: SessionState) {
        self.status.write().state = to;
        self.state_tx.send_replace(to);
        self.emit(ClientEvent::StateChanged { from, to });
    }

    fn set_output(&self, volume: u8, muted: bool) {
        {
            let mut status = self.status.write();
            status.volume = volume;
            status.muted = muted;
        }
        self.scheduler
            .lock()
            .set_volume(volume as f32 / 100.0, muted);
        self.emit(ClientEvent::VolumeChanged {
            volume: volume as f32 / 100.0,
            muted,
        });
    }

    fn report(&self, report: ErrorReport) {
        match report.severity {
            Severity::NonFatal => warn!("{}", report.message),
            Severity::Fatal => error!("{}", report.message),
        }
        self.emit(ClientEvent::Error(report));
    }
}

/// Handle to a Sendspin player session
///
/// # Example
///
/// ```no_run
/// use sendspin_client::{ClientConfig, SendspinClient};
///
/// # async fn run() -> sendspin_client::Result<()> {
/// let client = SendspinClient::new(ClientConfig::new("ws://localhost:8927/sendspin"))?;
/// let mut events = client.subscribe();
/// client.connect().await?;
/// while let Ok(event) = events.recv().await {
///     println!("{:?}", event);
/// }
/// # Ok(())
/// # }
/// ```
pub struct SendspinClient {
    inner: Arc<Inner>,
}

impl SendspinClient {
    /// Create a client that discards audio
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_sink(config, Box::new(NullSink::new()))
    }

    /// Create a client rendering to `sink`
    ///
    /// The client id comes from the config or from the persisted identity.
    pub fn with_sink(config: ClientConfig, sink: Box<dyn AudioSink>) -> Result<Self> {
        Self::with_clock(config, MonotonicClock::new(), sink)
    }

    /// Create a client on a shared time base
    ///
    /// Sinks that turn scheduled start times into device instants must be
    /// built on the same `clock`.
    pub fn with_clock(
        config: ClientConfig,
        clock: MonotonicClock,
        sink: Box<dyn AudioSink>,
    ) -> Result<Self> {
        config.validate()?;

        let client_id = match &config.client_id {
            Some(id) => id.clone(),
            None => identity::load_or_create_client_id(&identity::data_dir())?,
        };

        let shared_clock: SharedClock =
            Arc::new(RwLock::new(ClockEstimate::new(config.sync.initial_variance)));

        let volume = (config.playback.initial_volume * 100.0).round() as u8;
        let muted = config.playback.initial_muted;

        let mut scheduler = PlaybackScheduler::new(&config.playback, shared_clock.clone(), sink);
        scheduler.set_volume(volume as f32 / 100.0, muted);

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, _) = watch::channel(SessionState::Disconnected);

        info!(client_id = %client_id, name = %config.client_name, "Created Sendspin client");

        Ok(Self {
            inner: Arc::new(Inner {
                supervisor: ReconnectionSupervisor::new(ReconnectionPolicy::from(&config.reconnect)),
                config,
                client_id,
                clock,
                shared_clock,
                scheduler: scheduler.into_shared(),
                events,
                state_tx,
                status: RwLock::new(Status {
                    state: SessionState::Disconnected,
                    stream_id: None,
                    volume,
                    muted,
                }),
                control: Mutex::new(None),
                task: Mutex::new(None),
            }),
        })
    }

    /// Client id announced to the server
    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.inner.status.read().state
    }

    /// True while the session task runs, including reconnect backoff
    pub fn is_running(&self) -> bool {
        self.inner
            .task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Watch lifecycle state changes
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Subscribe to client events
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Open a session and wait for the handshake
    ///
    /// Returns once the server answered the hello or the handshake grace
    /// period elapsed. Fails if the socket cannot be opened in time.
    #[instrument(skip(self), fields(url = %self.inner.config.server_url))]
    pub async fn connect(&self) -> Result<()> {
        if self.is_running() {
            debug!("Session already running");
            return Ok(());
        }

        self.inner.supervisor.reset();

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let session = SessionTask::new(Arc::clone(&self.inner), command_rx, ready_tx);

        *self.inner.control.lock() = Some(command_tx);
        *self.inner.task.lock() = Some(tokio::spawn(session.run()));

        ready_rx.await.unwrap_or(Err(Error::NotConnected))
    }

    /// Close the session; never reconnects afterwards
    ///
    /// Idempotent. Stops clock sync and all scheduled audio.
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.supervisor.suppress();

        if let Some(control) = self.inner.control.lock().take() {
            let _ = control.send(Command::Disconnect);
        }

        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Session task failed: {}", e);
                }
            }
        }

        self.inner.scheduler.lock().stop();

        let state = self.state();
        if state != SessionState::Disconnected {
            self.inner.set_state(state, SessionState::Disconnected);
        }
        Ok(())
    }

    /// Set output volume (0.0-1.0)
    pub fn set_volume(&self, volume: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(Error::InvalidConfig(format!(
                "volume must be in range 0.0-1.0, got {}",
                volume
            )));
        }
        let level = (volume * 100.0).round() as u8;

        if self.send_command(Command::SetVolume(level)) {
            return Ok(());
        }
        let muted = self.inner.status.read().muted;
        self.inner.set_output(level, muted);
        Ok(())
    }

    /// Set mute
    pub fn set_muted(&self, muted: bool) -> Result<()> {
        if self.send_command(Command::SetMuted(muted)) {
            return Ok(());
        }
        let volume = self.inner.status.read().volume;
        self.inner.set_output(volume, muted);
        Ok(())
    }

    /// Current state of the session, clock and playback
    pub fn snapshot(&self) -> ClientSnapshot {
        let status = self.inner.status.read().clone();
        let clock = self.inner.shared_clock.read().clone();
        let (correction, queue_depth) = {
            let scheduler = self.inner.scheduler.lock();
            (scheduler.correction(), scheduler.queue_depth())
        };

        ClientSnapshot {
            state: status.state,
            stream_id: status.stream_id,
            clock_offset_us: clock.offset_us,
            clock_drift_us: clock.drift_us,
            clock_variance: clock.variance,
            drift_mode: correction.mode,
            playback_rate: correction.playback_rate,
            queue_depth,
            volume: status.volume as f32 / 100.0,
            muted: status.muted,
            reconnect_attempts: self.inner.supervisor.attempts(),
        }
    }

    fn send_command(&self, command: Command) -> bool {
        match self.inner.control.lock().as_ref() {
            Some(control) => control.send(command).is_ok(),
            None => false,
        }
    }
}

impl Drop for SendspinClient {
    fn drop(&mut self) {
        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
        }
    }
}

/// How one connection ended
enum ConnectionEnd {
    /// Caller asked to disconnect
    Disconnected,
    /// Socket closed
    Closed(CloseInfo),
    /// Socket could not be opened
    Failed(Error),
}

struct SessionTask {
    inner: Arc<Inner>,
    machine: SessionMachine,
    sync: SyncEngine,
    pipeline: DecodePipeline,
    reports: mpsc::UnboundedReceiver<Error>,
    commands: mpsc::UnboundedReceiver<Command>,
    ready: Option<oneshot::Sender<Result<()>>>,
    sync_interval: Option<Interval>,
    audio_ready_sent: bool,
}

impl SessionTask {
    fn new(
        inner: Arc<Inner>,
        commands: mpsc::UnboundedReceiver<Command>,
        ready: oneshot::Sender<Result<()>>,
    ) -> Self {
        let (volume, muted) = {
            let status = inner.status.read();
            (status.volume, status.muted)
        };
        let machine = SessionMachine::new(inner.client_id.clone(), &inner.config)
            .with_output(volume, muted);
        let sync = SyncEngine::with_shared(&inner.config.sync, inner.shared_clock.clone());
        let (reports_tx, reports) = mpsc::unbounded_channel();
        let pipeline = DecodePipeline::new(inner.scheduler.clone(), inner.clock, reports_tx);

        Self {
            inner,
            machine,
            sync,
            pipeline,
            reports,
            commands,
            ready: Some(ready),
            sync_interval: None,
            audio_ready_sent: false,
        }
    }

    async fn run(mut self) {
        loop {
            let error = match self.run_connection().await {
                ConnectionEnd::Disconnected => break,
                ConnectionEnd::Closed(close) if close.is_normal() => {
                    info!("Server closed the session");
                    break;
                }
                ConnectionEnd::Closed(close) => close.to_error(),
                ConnectionEnd::Failed(e) => e,
            };

            // The first connect reports failure to the caller instead of retrying
            if let Some(ready) = self.ready.take() {
                let _ = ready.send(Err(error));
                break;
            }

            match self.inner.supervisor.on_abnormal_close() {
                ReconnectDecision::Retry { attempt, delay } => {
                    self.inner.report(ErrorReport {
                        severity: Severity::NonFatal,
                        message: format!("{}; reconnect attempt {} in {:?}", error, attempt, delay),
                    });
                    if !self.backoff(delay).await {
                        break;
                    }
                }
                ReconnectDecision::GiveUp { attempts } => {
                    self.inner.report(ErrorReport {
                        severity: Severity::Fatal,
                        message: format!("giving up after {} reconnect attempts: {}", attempts, error),
                    });
                    break;
                }
                ReconnectDecision::Suppressed => break,
            }
        }

        self.pipeline.stop();
        self.inner.scheduler.lock().stop();
        *self.inner.control.lock() = None;
        debug!("Session task finished");
    }

    async fn run_connection(&mut self) -> ConnectionEnd {
        let actions = self.machine.begin_connect();
        self.apply(actions, None);
        self.sync.reset();
        self.audio_ready_sent = false;

        let url = self.inner.config.server_url.clone();
        let connect = WebSocketTransport::connect(&url, self.inner.config.connect_timeout());
        tokio::pin!(connect);

        let (transport, mut events) = loop {
            tokio::select! {
                result = &mut connect => match result {
                    Ok(opened) => break opened,
                    Err(e) => {
                        error!("Failed to connect: {}", e);
                        let actions = self.machine.closed();
                        self.apply(actions, None);
                        return ConnectionEnd::Failed(e);
                    }
                },
                command = self.commands.recv() => {
                    if !self.handle_command(command, None) {
                        let actions = self.machine.closed();
                        self.apply(actions, None);
                        return ConnectionEnd::Disconnected;
                    }
                }
            }
        };

        self.inner.supervisor.record_success();
        let actions = self.machine.transport_opened();
        self.apply(actions, Some(&transport));

        let grace = tokio::time::sleep(self.inner.config.handshake_grace());
        tokio::pin!(grace);
        let mut grace_pending = true;

        let mut housekeeping = tokio::time::interval(Duration::from_millis(
            self.inner.config.playback.purge_interval_ms,
        ));
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Control(message)) => {
                        let actions = self.machine.handle(message, self.inner.clock.now_us());
                        self.apply(actions, Some(&transport));
                    }
                    Some(TransportEvent::Audio(frame)) => {
                        if let Err(e) = self.pipeline.submit(frame) {
                            self.inner.report(ErrorReport::non_fatal(&e));
                        }
                    }
                    Some(TransportEvent::Malformed(e)) => {
                        if e.is_frame_level() {
                            warn!("Dropping malformed frame: {}", e);
                        } else {
                            self.inner.report(ErrorReport::non_fatal(&e));
                        }
                    }
                    Some(TransportEvent::Closed(close)) => {
                        let actions = self.machine.closed();
                        self.apply(actions, None);
                        return ConnectionEnd::Closed(close);
                    }
                    None => {
                        let actions = self.machine.closed();
                        self.apply(actions, None);
                        return ConnectionEnd::Closed(CloseInfo::new(ABNORMAL_CLOSE, "transport ended"));
                    }
                },
                _ = &mut grace, if grace_pending => {
                    grace_pending = false;
                    let actions = self.machine.handshake_grace_elapsed();
                    self.apply(actions, Some(&transport));
                }
                _ = tick(&mut self.sync_interval) => {
                    self.request_time(&transport);
                }
                _ = housekeeping.tick() => {
                    let now = self.inner.clock.now_us();
                    self.inner.scheduler.lock().purge(now);
                    let actions = self.machine.check_deadlines(now);
                    self.apply(actions, Some(&transport));
                }
                Some(e) = self.reports.recv() => {
                    self.inner.report(ErrorReport::non_fatal(&e));
                }
                command = self.commands.recv() => {
                    if !self.handle_command(command, Some(&transport)) {
                        if let Err(e) = transport.close(NORMAL_CLOSE) {
                            debug!("Close frame not sent: {}", e);
                        }
                        let actions = self.machine.closed();
                        self.apply(actions, None);
                        return ConnectionEnd::Disconnected;
                    }
                }
            }
        }
    }

    /// Sleep before a reconnect; false if the caller disconnected meanwhile
    async fn backoff(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = self.commands.recv() => {
                    if !self.handle_command(command, None) {
                        return false;
                    }
                }
            }
        }
    }

    /// Apply a caller command; false means stop the session
    fn handle_command(
        &mut self,
        command: Option<Command>,
        transport: Option<&WebSocketTransport>,
    ) -> bool {
        match command {
            Some(Command::SetVolume(volume)) => {
                let actions = self.machine.set_volume(volume);
                self.apply(actions, transport);
                true
            }
            Some(Command::SetMuted(muted)) => {
                let actions = self.machine.set_muted(muted);
                self.apply(actions, transport);
                true
            }
            Some(Command::Disconnect) | None => false,
        }
    }

    fn request_time(&mut self, transport: &WebSocketTransport) {
        let request = self.sync.begin_request(self.inner.clock.now_us());
        if let Err(e) = transport.send(&ClientMessage::Time(request)) {
            debug!("Time request not sent: {}", e);
        }
    }

    fn apply(&mut self, actions: Vec<SessionAction>, transport: Option<&WebSocketTransport>) {
        for action in actions {
            match action {
                SessionAction::Send(message) => {
                    let Some(transport) = transport else {
                        debug!(kind = message.kind(), "No transport, message dropped");
                        continue;
                    };
                    match transport.send(&message) {
                        Ok(()) => {
                            // Queued on an open socket settles the owed ack
                            if matches!(message, ClientMessage::State(_)) {
                                self.machine.state_ack_sent();
                            }
                        }
                        Err(e) => warn!(kind = message.kind(), "Failed to send: {}", e),
                    }
                }
                SessionAction::StateChanged { from, to } => self.inner.set_state(from, to),
                SessionAction::StartSync => {
                    let period = Duration::from_millis(self.inner.config.sync.interval_ms);
                    let mut interval =
                        tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.sync_interval = Some(interval);
                    if let Some(transport) = transport {
                        self.request_time(transport);
                    }
                }
                SessionAction::StopSync => self.sync_interval = None,
                SessionAction::TimeResponse(response) => {
                    if self
                        .sync
                        .handle_response(&response, self.inner.clock.now_us())
                        .is_ok()
                    {
                        self.check_audio_ready();
                    }
                }
                SessionAction::StartStream(info) => {
                    self.inner.scheduler.lock().rebase(self.inner.clock.now_us());
                    if let Err(e) = self.pipeline.configure(&info) {
                        self.inner.report(ErrorReport::non_fatal(&e));
                    }
                    self.inner.status.write().stream_id = Some(info.stream_id.clone());
                    self.audio_ready_sent = false;
                    self.inner.emit(ClientEvent::StreamStarted(info));
                    self.check_audio_ready();
                }
                SessionAction::EndStream { stream_id } => {
                    self.pipeline.stop();
                    self.inner.scheduler.lock().stop();
                    self.inner.status.write().stream_id = None;
                    self.audio_ready_sent = false;
                    self.inner.emit(ClientEvent::StreamEnded { stream_id });
                }
                SessionAction::ClearStream => {
                    self.inner.scheduler.lock().rebase(self.inner.clock.now_us());
                    self.inner.emit(ClientEvent::StreamCleared);
                }
                SessionAction::VolumeChanged { volume, muted } => {
                    self.inner.set_output(volume, muted);
                }
                SessionAction::Report(e) => self.inner.report(ErrorReport::non_fatal(&e)),
            }
        }

        if self.machine.state().is_established() {
            if let Some(ready) = self.ready.take() {
                let _ = ready.send(Ok(()));
            }
        }
    }

    /// Emit `AudioReady` once per stream when the clock is valid
    fn check_audio_ready(&mut self) {
        if self.audio_ready_sent {
            return;
        }
        let Some(stream) = self.machine.stream() else {
            return;
        };
        if self.inner.shared_clock.read().is_valid() {
            let stream_id = stream.stream_id.clone();
            info!(stream_id = %stream_id, "Audio ready");
            self.audio_ready_sent = true;
            self.inner.emit(ClientEvent::AudioReady { stream_id });
        }
    }
}

/// Tick an optional interval; pending forever when absent
async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientConfig {
        ClientConfig {
            client_id: Some("test-client".to_string()),
            ..ClientConfig::new("ws://127.0.0.1:1/sendspin")
        }
    }

    #[test]
    fn test_new_uses_configured_id() {
        let client = SendspinClient::new(config()).unwrap();
        assert_eq!(client.client_id(), "test-client");
        assert_eq!(client.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut cfg = config();
        cfg.server_url = "localhost".to_string();
        assert!(SendspinClient::new(cfg).is_err());
    }

    #[test]
    fn test_snapshot_defaults() {
        let client = SendspinClient::new(config()).unwrap();
        let snapshot = client.snapshot();
        assert_eq!(snapshot.state, SessionState::Disconnected);
        assert_eq!(snapshot.stream_id, None);
        assert_eq!(snapshot.clock_offset_us, 0.0);
        assert_eq!(snapshot.clock_variance, 1_000_000.0);
        assert_eq!(snapshot.drift_mode, DriftMode::None);
        assert_eq!(snapshot.playback_rate, 1.0);
        assert_eq!(snapshot.queue_depth, 0);
        assert_eq!(snapshot.volume, 1.0);
        assert_eq!(snapshot.reconnect_attempts, 0);
    }

    #[test]
    fn test_volume_offline() {
        let client = SendspinClient::new(config()).unwrap();
        let mut events = client.subscribe();

        client.set_volume(0.25).unwrap();
        client.set_muted(true).unwrap();
        assert!(client.set_volume(1.5).is_err());

        let snapshot = client.snapshot();
        assert_eq!(snapshot.volume, 0.25);
        assert!(snapshot.muted);
        assert!(matches!(
            events.try_recv().unwrap(),
            ClientEvent::VolumeChanged { muted: false, .. }
        ));
    }

    #[tokio::test]
    async fn test_connect_refused_fails_fast() {
        let mut cfg = config();
        cfg.connect_timeout_ms = 2_000;
        let client = SendspinClient::new(cfg).unwrap();

        let err = client.connect().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(client.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let client = SendspinClient::new(config()).unwrap();
        client.disconnect().await.unwrap();
        client.disconnect().await.unwrap();
        assert_eq!(client.state(), SessionState::Disconnected);
        assert_eq!(client.snapshot().reconnect_attempts, 5);
    }
}
