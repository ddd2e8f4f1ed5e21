//! Call-Control State Machine
//!
//! Führt einen ausgehenden Call vom Start bis zum Abbau und koordiniert
//! dabei Audio-Bridge, Signaling-Client und native Call-UI.
//!
//! Läuft ausschließlich im Control-Task (siehe `actor`). Alle Handler sind
//! synchron, externe Antworten kommen als neue Kommandos in die Queue.

use super::actor::CallCommand;
use super::audio::{
    AudioHardwareBridge, BridgeStats, ConfigurationStep, HardwareConfigurationError, OutputRoute,
};
use super::media::{media_pair, DeviceMediaPort};
use crate::events::{CallStatus, EventEmitter};
use crate::native_ui::{EndReason, NativeCallUi, NativeUiAction, NativeUiActionSink, StartCallRequest};
use crate::signaling::{CallHandle, ConnectOptions, SignalingEvent, SignalingEventSink, VoiceSignalingClient};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum CallEngineError {
    #[error("Call engine not initialized")]
    NotInitialized,

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Already in a call")]
    AlreadyInCall,

    #[error("Call engine stopped")]
    EngineStopped,

    #[error("Audio hardware error: {0}")]
    Hardware(#[from] HardwareConfigurationError),
}

// ============================================================================
// CALL STATE
// ============================================================================

/// Aktueller Status eines Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CallState {
    /// Kein aktiver Anruf
    Idle,
    /// Wartet auf Freigabe durch die native UI
    RequestingNativeUi,
    /// Signaling baut die Verbindung auf
    Connecting,
    /// Gegenstelle klingelt
    Ringing,
    /// Anruf aktiv, Audio läuft
    Active,
    /// Wird lokal beendet
    Ending,
    Ended,
    Failed,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Ended | CallState::Failed)
    }
}

/// Ausgehender Anruf wie ihn der Host anfordert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MakeCallRequest {
    pub number: String,
    pub call_id: String,
    pub contact_name: Option<String>,
}

impl MakeCallRequest {
    pub fn new(number: impl Into<String>, call_id: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            call_id: call_id.into(),
            contact_name: None,
        }
    }

    pub fn with_contact_name(mut self, name: impl Into<String>) -> Self {
        self.contact_name = Some(name.into());
        self
    }

    fn validate(&self) -> Result<(), CallEngineError> {
        if self.number.trim().is_empty() {
            return Err(CallEngineError::InvalidArgs("number is required".into()));
        }
        if self.call_id.trim().is_empty() {
            return Err(CallEngineError::InvalidArgs("callId is required".into()));
        }
        Ok(())
    }
}

/// Zugangsdaten für den Voice-Dienst
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &format_args!("<{} bytes>", self.access_token.len()))
            .finish()
    }
}

/// Lesesicht auf den aktuellen Call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSnapshot {
    pub state: CallState,
    pub correlation_id: Option<Uuid>,
    pub call_id: Option<String>,
    pub destination: Option<String>,
    pub display_name: Option<String>,
    pub is_muted: bool,
    pub is_speaker_on: bool,
    pub connected_at: Option<DateTime<Utc>>,
}

/// Wer das Auflegen ausgelöst hat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EndOrigin {
    Host,
    NativeUi,
}

pub type MakeCallReply = oneshot::Sender<Result<bool, CallEngineError>>;

// ============================================================================
// CALL SESSION
// ============================================================================

/// Der eine laufende Call
struct CallSession {
    correlation_id: Uuid,
    call_id: String,
    destination: String,
    display_name: Option<String>,
    state: CallState,
    is_muted: bool,
    is_speaker_on: bool,
    created_at: DateTime<Utc>,
    connected_at: Option<DateTime<Utc>>,
    handle: Option<CallHandle>,
    device_port: Option<DeviceMediaPort>,
    /// `make_call` wartet bis die native UI entschieden hat
    pending_reply: Option<MakeCallReply>,
}

// ============================================================================
// STATE MACHINE
// ============================================================================

/// Kollaborateure der State Machine
pub struct EngineParts {
    pub bridge: AudioHardwareBridge,
    pub signaling: Box<dyn VoiceSignalingClient>,
    pub native_ui: Box<dyn NativeCallUi>,
    pub events: EventEmitter,
    /// Ringpuffer-Größe der Media-Ports in Bytes (pro Richtung)
    pub media_capacity: usize,
}

pub(crate) struct CallStateMachine {
    bridge: AudioHardwareBridge,
    signaling: Box<dyn VoiceSignalingClient>,
    native_ui: Box<dyn NativeCallUi>,
    events: EventEmitter,
    commands: mpsc::UnboundedSender<CallCommand>,
    media_capacity: usize,
    credentials: Option<Credentials>,
    session: Option<CallSession>,
    speaker_on: bool,
}

impl CallStateMachine {
    pub(crate) fn new(parts: EngineParts, commands: mpsc::UnboundedSender<CallCommand>) -> Self {
        Self {
            bridge: parts.bridge,
            signaling: parts.signaling,
            native_ui: parts.native_ui,
            events: parts.events,
            commands,
            media_capacity: parts.media_capacity,
            credentials: None,
            session: None,
            speaker_on: false,
        }
    }

    /// Speichert die Zugangsdaten und prüft die Audio-Hardware.
    ///
    /// Ein Hardware-Fehler wird gemeldet, die Zugangsdaten bleiben trotzdem
    /// gesetzt. Die Bridge wird beim nächsten Connect erneut versucht.
    pub(crate) fn initialize(&mut self, credentials: Credentials) -> Result<(), CallEngineError> {
        if credentials.access_token.trim().is_empty() {
            return Err(CallEngineError::InvalidArgs("access token is empty".into()));
        }
        self.credentials = Some(credentials);
        tracing::info!("Call engine initialized");

        // Erneutes Initialize (z.B. Token-Refresh) lässt eine laufende Bridge in Ruhe
        if self.bridge.is_initialized() {
            return Ok(());
        }

        self.bridge.initialize()?;
        // Clock ruht bis ein Call aktiv wird
        self.bridge.stop();
        Ok(())
    }

    pub(crate) fn make_call(&mut self, request: MakeCallRequest, reply: MakeCallReply) {
        if let Err(e) = self.check_can_call(&request) {
            tracing::warn!("makeCall rejected: {}", e);
            let _ = reply.send(Err(e));
            return;
        }

        let correlation_id = Uuid::new_v4();
        let start = StartCallRequest {
            correlation_id,
            handle: request.number.clone(),
            display_name: request.contact_name.clone(),
        };

        tracing::info!(
            "Starting call {} to {} ({})",
            request.call_id,
            request.number,
            correlation_id
        );

        // Mute gilt pro Call
        self.bridge.set_muted(false);
        self.session = Some(CallSession {
            correlation_id,
            call_id: request.call_id,
            destination: request.number,
            display_name: request.contact_name,
            state: CallState::RequestingNativeUi,
            is_muted: false,
            is_speaker_on: self.speaker_on,
            created_at: Utc::now(),
            connected_at: None,
            handle: None,
            device_port: None,
            pending_reply: Some(reply),
        });

        let actions = NativeUiActionSink::new(correlation_id, self.commands.clone());
        self.native_ui.request_start(start, actions);
    }

    fn check_can_call(&self, request: &MakeCallRequest) -> Result<(), CallEngineError> {
        if self.credentials.is_none() {
            return Err(CallEngineError::NotInitialized);
        }
        request.validate()?;
        if self.session.is_some() {
            return Err(CallEngineError::AlreadyInCall);
        }
        Ok(())
    }

    fn is_current(&self, correlation_id: Uuid) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.correlation_id == correlation_id)
    }

    // ========================================================================
    // NATIVE UI
    // ========================================================================

    pub(crate) fn on_native_ui(&mut self, correlation_id: Uuid, action: NativeUiAction) {
        if !self.is_current(correlation_id) {
            tracing::debug!("Ignoring native UI action {:?} for stale call {}", action, correlation_id);
            return;
        }

        match action {
            NativeUiAction::StartApproved => self.on_start_approved(),
            NativeUiAction::StartRejected { reason } => {
                tracing::warn!("Native UI rejected call {}: {}", correlation_id, reason);
                self.finish(CallStatus::Failed, None, false);
            }
            NativeUiAction::EndCall => self.end_call(EndOrigin::NativeUi),
            NativeUiAction::SetMuted(muted) => self.set_muted(muted),
            NativeUiAction::Reset => {
                tracing::warn!("Native UI reset, dropping call {}", correlation_id);
                self.finish(CallStatus::Failed, None, true);
            }
        }
    }

    fn on_start_approved(&mut self) {
        let Some(token) = self.credentials.as_ref().map(|c| c.access_token.clone()) else {
            self.finish(CallStatus::Failed, Some(EndReason::Failed), false);
            return;
        };

        let (correlation_id, options) = match self.session.as_mut() {
            Some(session) if session.state == CallState::RequestingNativeUi => {
                session.state = CallState::Connecting;
                let options = ConnectOptions::new(
                    token,
                    &session.destination,
                    &session.call_id,
                    session.correlation_id,
                );
                (session.correlation_id, options)
            }
            _ => {
                tracing::debug!("Duplicate start approval ignored");
                return;
            }
        };

        self.native_ui.report_connecting(correlation_id, Utc::now());
        self.events.emit(CallStatus::Connecting);

        let (device_port, network_port) = media_pair(self.media_capacity);
        let sink = SignalingEventSink::new(correlation_id, self.commands.clone());

        match self.signaling.connect(options, network_port, sink) {
            Ok(handle) => {
                tracing::info!("Signaling connecting {} (sid {})", correlation_id, handle.sid);
                if let Some(session) = self.session.as_mut() {
                    if session.is_muted {
                        self.signaling.set_muted(true);
                    }
                    session.handle = Some(handle);
                    session.device_port = Some(device_port);
                    if let Some(reply) = session.pending_reply.take() {
                        let _ = reply.send(Ok(true));
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Signaling connect failed for {}: {}", correlation_id, e);
                self.finish(CallStatus::Failed, Some(EndReason::Failed), false);
            }
        }
    }

    // ========================================================================
    // SIGNALING
    // ========================================================================

    pub(crate) fn on_signaling(&mut self, correlation_id: Uuid, event: SignalingEvent) {
        if !self.is_current(correlation_id) {
            tracing::debug!("Ignoring signaling event {:?} for stale call {}", event, correlation_id);
            return;
        }

        match event {
            SignalingEvent::Ringing => {
                if let Some(session) = self.session.as_mut() {
                    if session.state == CallState::Connecting {
                        session.state = CallState::Ringing;
                        self.events.emit(CallStatus::Ringing);
                    }
                }
            }
            SignalingEvent::Connected => self.on_connected(),
            SignalingEvent::Disconnected { error: None } => {
                tracing::info!("Call {} ended by remote", correlation_id);
                self.finish(CallStatus::Ended, Some(EndReason::RemoteEnded), false);
            }
            SignalingEvent::Disconnected { error: Some(error) }
            | SignalingEvent::FailedToConnect { error } => {
                tracing::warn!("Call {} failed: {}", correlation_id, error);
                self.finish(CallStatus::Failed, Some(EndReason::Failed), false);
            }
        }
    }

    fn on_connected(&mut self) {
        let now = Utc::now();
        let (correlation_id, port) = match self.session.as_mut() {
            Some(session) if matches!(session.state, CallState::Connecting | CallState::Ringing) => {
                session.state = CallState::Active;
                session.connected_at = Some(now);
                (session.correlation_id, session.device_port.take())
            }
            _ => {
                tracing::debug!("Unexpected connected event ignored");
                return;
            }
        };

        self.native_ui.report_connected(correlation_id, now);
        self.events.emit(CallStatus::Active);

        if let Err(e) = self.activate_audio(correlation_id, port) {
            tracing::error!("Audio activation failed for {}: {}", correlation_id, e);
            self.finish(CallStatus::Failed, Some(EndReason::Failed), true);
        }
    }

    fn activate_audio(
        &mut self,
        correlation_id: Uuid,
        port: Option<DeviceMediaPort>,
    ) -> Result<(), CallEngineError> {
        self.bridge.initialize()?;

        match port {
            Some(port) => self.bridge.attach(correlation_id, port),
            None => tracing::warn!("No media port for call {}", correlation_id),
        }

        if !self.bridge.start() {
            return Err(HardwareConfigurationError::new(
                ConfigurationStep::Start,
                "audio clock did not start",
            )
            .into());
        }
        Ok(())
    }

    // ========================================================================
    // TEARDOWN
    // ========================================================================

    /// Beendet den Call. Ohne Call ein No-op.
    pub(crate) fn end_call(&mut self, origin: EndOrigin) {
        let Some(session) = self.session.as_mut() else {
            tracing::debug!("endCall without active call ignored");
            return;
        };

        session.state = CallState::Ending;
        tracing::info!("Ending call {} ({:?})", session.correlation_id, origin);

        // Die native UI kennt ihr eigenes Auflegen schon
        let report = match origin {
            EndOrigin::Host => Some(EndReason::LocalEnded),
            EndOrigin::NativeUi => None,
        };
        self.finish(CallStatus::Ended, report, true);
    }

    /// Baut die Session ab und meldet genau einen Endzustand
    fn finish(&mut self, status: CallStatus, report: Option<EndReason>, disconnect: bool) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        if disconnect && session.handle.is_some() {
            self.signaling.disconnect();
        }
        if let Some(reason) = report {
            self.native_ui
                .report_ended(session.correlation_id, Utc::now(), reason);
        }

        self.bridge.stop();
        self.bridge.detach();

        session.state = match status {
            CallStatus::Ended => CallState::Ended,
            _ => CallState::Failed,
        };
        if let Some(reply) = session.pending_reply.take() {
            let _ = reply.send(Ok(false));
        }

        let duration = session
            .connected_at
            .map(|at| (Utc::now() - at).num_seconds())
            .unwrap_or(0);
        tracing::info!(
            "Call {} ({}) finished as {:?} after {}s (created {})",
            session.call_id,
            session.correlation_id,
            session.state,
            duration,
            session.created_at.to_rfc3339()
        );

        self.events.emit(status);
    }

    // ========================================================================
    // CONTROLS
    // ========================================================================

    /// Host- und UI-Mute: Signaling (ausgehend) und Telemetrie zusammen
    pub(crate) fn set_muted(&mut self, muted: bool) {
        let Some(session) = self.session.as_mut() else {
            tracing::debug!("Mute without active call ignored");
            return;
        };

        session.is_muted = muted;
        if session.handle.is_some() {
            self.signaling.set_muted(muted);
        }
        self.bridge.set_muted(muted);
        tracing::info!("Call {} muted: {}", session.correlation_id, muted);
    }

    pub(crate) fn set_speaker(&mut self, on: bool) {
        self.speaker_on = on;
        if let Some(session) = self.session.as_mut() {
            session.is_speaker_on = on;
        }
        let route = if on { OutputRoute::Speaker } else { OutputRoute::Receiver };
        self.bridge.set_output_route(route);
    }

    pub(crate) fn snapshot(&self) -> CallSnapshot {
        match &self.session {
            Some(session) => CallSnapshot {
                state: session.state,
                correlation_id: Some(session.correlation_id),
                call_id: Some(session.call_id.clone()),
                destination: Some(session.destination.clone()),
                display_name: session.display_name.clone(),
                is_muted: session.is_muted,
                is_speaker_on: session.is_speaker_on,
                connected_at: session.connected_at,
            },
            None => CallSnapshot {
                state: CallState::Idle,
                correlation_id: None,
                call_id: None,
                destination: None,
                display_name: None,
                is_muted: false,
                is_speaker_on: self.speaker_on,
                connected_at: None,
            },
        }
    }

    pub(crate) fn stats(&self) -> BridgeStats {
        self.bridge.stats()
    }

    pub(crate) fn shutdown(&mut self) {
        self.end_call(EndOrigin::Host);
        self.bridge.shutdown();
    }
}

// ============================================================================
// TESTS
// ============================================================================
