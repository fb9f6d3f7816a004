//! Handshake and stream lifecycle
//!
//! The machine is pure: every input returns the actions the session task has
//! to carry out (messages to send, scheduler and sync changes, events). This
//! keeps protocol decisions testable without a socket.

use super::state::SessionState;
use crate::audio::StreamInfo;
use crate::config::ClientConfig;
use crate::protocol::{
    ClientHello, ClientMessage, ClientState, Connected, DeviceInfo, PlayerCommandKind,
    PlayerState, PlayerSupport, PlayerSyncState, ServerHello, ServerMessage, ServerTime,
    StreamStart, PLAYER_ROLE, PROTOCOL_VERSION,
};
use crate::Error;
use tracing::{debug, info, warn};

/// Work produced by the machine for the session task
#[derive(Debug)]
pub enum SessionAction {
    /// Send a control message
    Send(ClientMessage),
    /// Lifecycle transition happened
    StateChanged {
        /// Previous state
        from: SessionState,
        /// New state
        to: SessionState,
    },
    /// Begin clock sync (immediate request plus interval)
    StartSync,
    /// Stop the sync timer
    StopSync,
    /// Fold a time response into the clock estimate
    TimeResponse(ServerTime),
    /// Configure decoding and rebase playback for a new stream
    StartStream(StreamInfo),
    /// Drop the stream and flush queued audio
    EndStream {
        /// Stream that ended
        stream_id: String,
    },
    /// Flush queued audio and rebase playback
    ClearStream,
    /// Volume or mute changed
    VolumeChanged {
        /// Volume 0-100
        volume: u8,
        /// Mute flag
        muted: bool,
    },
    /// Non-fatal problem to surface
    Report(Error),
}

/// Identity the server reported in its hello
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    /// Server id
    pub server_id: String,
    /// Server name
    pub name: String,
    /// Roles the server activated
    pub active_roles: Vec<String>,
}

/// Session lifecycle driven by control messages
#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
    client_id: String,
    name: String,
    device_info: DeviceInfo,
    player_support: PlayerSupport,
    server: Option<ServerIdentity>,
    stream: Option<StreamInfo>,
    volume: u8,
    muted: bool,
    registered: bool,
    state_ack_deadline_us: i64,
    pending_state_ack: Option<i64>,
}

impl SessionMachine {
    /// Create a machine for `client_id` from config
    pub fn new(client_id: String, config: &ClientConfig) -> Self {
        let caps = &config.capabilities;
        Self {
            state: SessionState::Disconnected,
            client_id,
            name: config.client_name.clone(),
            device_info: DeviceInfo {
                product_name: caps.product_name.clone(),
                manufacturer: caps.manufacturer.clone(),
                software_version: Some(crate::version().to_string()),
            },
            player_support: PlayerSupport {
                supported_formats: caps.supported_formats.clone(),
                buffer_capacity: caps.buffer_capacity_ms,
                supported_commands: vec!["volume".to_string(), "mute".to_string()],
            },
            server: None,
            stream: None,
            volume: (config.playback.initial_volume.clamp(0.0, 1.0) * 100.0).round() as u8,
            muted: config.playback.initial_muted,
            registered: false,
            state_ack_deadline_us: config.state_ack_deadline_ms as i64 * 1_000,
            pending_state_ack: None,
        }
    }

    /// Start from an existing output level instead of the configured one
    pub fn with_output(mut self, volume: u8, muted: bool) -> Self {
        self.volume = volume.min(100);
        self.muted = muted;
        self
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Client id used for this session
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Server identity once known
    pub fn server(&self) -> Option<&ServerIdentity> {
        self.server.as_ref()
    }

    /// Active stream
    pub fn stream(&self) -> Option<&StreamInfo> {
        self.stream.as_ref()
    }

    /// Volume 0-100
    pub fn volume(&self) -> u8 {
        self.volume
    }

    /// Mute flag
    pub fn muted(&self) -> bool {
        self.muted
    }

    /// Whether a `connected` message registered the client
    pub fn registered(&self) -> bool {
        self.registered
    }

    /// The socket is being opened
    pub fn begin_connect(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        self.transition(SessionState::Connecting, &mut actions);
        actions
    }

    /// The socket is open: announce ourselves
    pub fn transport_opened(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        self.transition(SessionState::Authenticating, &mut actions);
        actions.push(SessionAction::Send(ClientMessage::Hello(self.hello())));
        actions
    }

    /// No counter-handshake within the grace period
    ///
    /// The session is treated as usable anyway.
    pub fn handshake_grace_elapsed(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.state == SessionState::Authenticating {
            warn!("No server/hello within grace period, continuing optimistically");
            self.establish(&mut actions);
        }
        actions
    }

    /// `client/state` was queued on an open socket
    ///
    /// The session task calls this as soon as the transport accepts the
    /// message, so the deadline only trips when the socket refused it.
    /// Delivery beyond the local send queue is not tracked.
    pub fn state_ack_sent(&mut self) {
        self.pending_state_ack = None;
    }

    /// Report a `client/state` that was owed but never queued in time
    pub fn check_deadlines(&mut self, now_us: i64) -> Vec<SessionAction> {
        match self.pending_state_ack {
            Some(deadline) if now_us > deadline => {
                self.pending_state_ack = None;
                vec![SessionAction::Report(Error::ProtocolViolation(
                    "client/state not sent within deadline after server/hello".to_string(),
                ))]
            }
            _ => Vec::new(),
        }
    }

    /// Apply a control message
    pub fn handle(&mut self, message: ServerMessage, now_us: i64) -> Vec<SessionAction> {
        let mut actions = Vec::new();

        match message {
            ServerMessage::Hello(hello) => self.on_server_hello(hello, now_us, &mut actions),
            ServerMessage::Connected(connected) => {
                self.on_connected(connected, now_us, &mut actions)
            }
            ServerMessage::Time(time) => actions.push(SessionAction::TimeResponse(time)),
            ServerMessage::StreamStart(start) => self.on_stream_start(start, &mut actions),
            ServerMessage::StreamEnd(_) => {
                if self.state == SessionState::Streaming {
                    self.end_stream(&mut actions);
                    self.transition(SessionState::Syncing, &mut actions);
                } else {
                    debug!(state = %self.state, "Ignoring stream/end without active stream");
                }
            }
            ServerMessage::StreamClear(_) => {
                if self.stream.is_some() {
                    actions.push(SessionAction::ClearStream);
                } else {
                    debug!("Ignoring stream/clear without active stream");
                }
            }
            ServerMessage::State(state) => {
                if let Some(update) = state.player {
                    self.apply_volume(
                        update.volume.unwrap_or(self.volume),
                        update.muted.unwrap_or(self.muted),
                        &mut actions,
                    );
                }
            }
            ServerMessage::Command(command) => {
                let player = command.player;
                match player.command {
                    PlayerCommandKind::Volume => match player.volume {
                        Some(volume) => self.apply_volume(volume, self.muted, &mut actions),
                        None => actions.push(SessionAction::Report(Error::ProtocolViolation(
                            "volume command without volume".to_string(),
                        ))),
                    },
                    PlayerCommandKind::Mute => match player.mute {
                        Some(mute) => self.apply_volume(self.volume, mute, &mut actions),
                        None => actions.push(SessionAction::Report(Error::ProtocolViolation(
                            "mute command without mute flag".to_string(),
                        ))),
                    },
                }
            }
            ServerMessage::Error(err) => {
                warn!(code = ?err.code, "Server error: {}", err.message);
                let message = match err.code {
                    Some(code) => format!("server error {}: {}", code, err.message),
                    None => format!("server error: {}", err.message),
                };
                actions.push(SessionAction::Report(Error::ProtocolViolation(message)));
            }
        }

        actions
    }

    /// Local volume change (0-100)
    pub fn set_volume(&mut self, volume: u8) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        self.apply_volume(volume, self.muted, &mut actions);
        actions
    }

    /// Local mute change
    pub fn set_muted(&mut self, muted: bool) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        self.apply_volume(self.volume, muted, &mut actions);
        actions
    }

    /// Socket closed or caller disconnected
    pub fn closed(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.state == SessionState::Disconnected {
            return actions;
        }
        if self.stream.is_some() {
            self.end_stream(&mut actions);
        }
        actions.push(SessionAction::StopSync);
        self.pending_state_ack = None;
        self.server = None;
        self.transition(SessionState::Disconnected, &mut actions);
        actions
    }

    fn hello(&self) -> ClientHello {
        ClientHello {
            client_id: self.client_id.clone(),
            name: self.name.clone(),
            version: PROTOCOL_VERSION,
            supported_roles: vec![PLAYER_ROLE.to_string()],
            device_info: Some(self.device_info.clone()),
            player_support: Some(self.player_support.clone()),
        }
    }

    fn client_state(&self) -> ClientMessage {
        ClientMessage::State(ClientState {
            player: Some(PlayerState {
                state: PlayerSyncState::Synchronized,
                volume: self.volume,
                muted: self.muted,
            }),
        })
    }

    fn on_server_hello(&mut self, hello: ServerHello, now_us: i64, actions: &mut Vec<SessionAction>) {
        info!(server_id = %hello.server_id, server = %hello.name, "Received server/hello");
        if !hello.active_roles.is_empty() && !hello.active_roles.iter().any(|r| r == PLAYER_ROLE) {
            warn!(roles = ?hello.active_roles, "Server did not activate the player role");
        }

        self.server = Some(ServerIdentity {
            server_id: hello.server_id,
            name: hello.name,
            active_roles: hello.active_roles,
        });
        self.acknowledge(now_us, actions);

        if self.state == SessionState::Authenticating {
            self.establish(actions);
        }
    }

    fn on_connected(&mut self, connected: Connected, now_us: i64, actions: &mut Vec<SessionAction>) {
        if connected.client_id != self.client_id {
            info!(client_id = %connected.client_id, "Server assigned client id");
            self.client_id = connected.client_id;
        }
        self.registered = connected.authenticated && connected.registered;

        if !connected.authenticated {
            actions.push(SessionAction::Report(Error::ProtocolViolation(
                "server did not authenticate the client; session not registered".to_string(),
            )));
            return;
        }

        if self.state == SessionState::Connecting {
            self.transition(SessionState::Authenticating, actions);
        }
        self.acknowledge(now_us, actions);
        if self.state == SessionState::Authenticating {
            self.establish(actions);
        }
    }

    fn on_stream_start(&mut self, start: StreamStart, actions: &mut Vec<SessionAction>) {
        if !matches!(
            self.state,
            SessionState::Ready | SessionState::Syncing | SessionState::Streaming
        ) {
            actions.push(SessionAction::Report(Error::ProtocolViolation(format!(
                "stream/start in state {}",
                self.state
            ))));
            return;
        }

        let info = match StreamInfo::from_start(&start) {
            Ok(info) => info,
            Err(e) => {
                actions.push(SessionAction::Report(e));
                return;
            }
        };

        if self.state == SessionState::Streaming {
            self.end_stream(actions);
        }

        info!(
            stream_id = %info.stream_id,
            codec = %info.codec,
            sample_rate = info.sample_rate,
            channels = info.channels,
            "Stream started"
        );
        self.stream = Some(info.clone());
        actions.push(SessionAction::StartStream(info));
        if self.state != SessionState::Streaming {
            self.transition(SessionState::Streaming, actions);
        }
    }

    fn end_stream(&mut self, actions: &mut Vec<SessionAction>) {
        if let Some(stream) = self.stream.take() {
            info!(stream_id = %stream.stream_id, "Stream ended");
            actions.push(SessionAction::EndStream {
                stream_id: stream.stream_id,
            });
        }
    }

    fn acknowledge(&mut self, now_us: i64, actions: &mut Vec<SessionAction>) {
        self.pending_state_ack = Some(now_us.saturating_add(self.state_ack_deadline_us));
        actions.push(SessionAction::Send(self.client_state()));
    }

    fn establish(&mut self, actions: &mut Vec<SessionAction>) {
        self.transition(SessionState::Ready, actions);
        self.transition(SessionState::Syncing, actions);
        actions.push(SessionAction::StartSync);
    }

    fn apply_volume(&mut self, volume: u8, muted: bool, actions: &mut Vec<SessionAction>) {
        let volume = volume.min(100);
        if volume == self.volume && muted == self.muted {
            return;
        }
        self.volume = volume;
        self.muted = muted;
        actions.push(SessionAction::VolumeChanged { volume, muted });
        if self.state.is_established() {
            actions.push(SessionAction::Send(self.client_state()));
        }
    }

    fn transition(&mut self, to: SessionState, actions: &mut Vec<SessionAction>) {
        let from = self.state;
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            warn!(%from, %to, "Unexpected state transition");
        }
        info!(%from, %to, "Session state changed");
        self.state = to;
        actions.push(SessionAction::StateChanged { from, to });
    }
}
