//! Test-Doubles für Signaling-Client und native UI
//!
//! Beide sind `Clone` und teilen ihren Zustand: eine Kopie geht an die
//! State Machine, mit der anderen steuert und prüft der Test.

use crate::call_engine::NetworkMediaPort;
use crate::native_ui::{EndReason, NativeCallUi, NativeUiAction, NativeUiActionSink, StartCallRequest};
use crate::signaling::{
    CallHandle, ConnectOptions, SignalingError, SignalingEvent, SignalingEventSink,
    VoiceSignalingClient,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// RECORDING SIGNALING
// ============================================================================

#[derive(Debug, Default)]
struct SignalingLog {
    connects: Vec<ConnectOptions>,
    disconnects: usize,
    muted: Option<bool>,
    refuse_next: Option<SignalingError>,
    media: Option<NetworkMediaPort>,
    sink: Option<SignalingEventSink>,
}

/// Zeichnet alle Aufrufe auf; Events werden vom Test ausgelöst
#[derive(Debug, Clone, Default)]
pub struct RecordingSignaling {
    log: Arc<Mutex<SignalingLog>>,
}

impl RecordingSignaling {
    pub fn new() -> Self {
        Self::default()
    }

    /// Der nächste `connect()` schlägt mit `error` fehl
    pub fn refuse_next_connect(&self, error: SignalingError) {
        self.log.lock().refuse_next = Some(error);
    }

    pub fn connect_count(&self) -> usize {
        self.log.lock().connects.len()
    }

    pub fn last_options(&self) -> Option<ConnectOptions> {
        self.log.lock().connects.last().cloned()
    }

    pub fn disconnect_count(&self) -> usize {
        self.log.lock().disconnects
    }

    /// Zuletzt gesetzter Mute-Status
    pub fn muted(&self) -> Option<bool> {
        self.log.lock().muted
    }

    /// Sink des zuletzt verbundenen Calls
    pub fn sink(&self) -> Option<SignalingEventSink> {
        self.log.lock().sink.clone()
    }

    /// Meldet `event` für den zuletzt verbundenen Call
    pub fn emit(&self, event: SignalingEvent) -> bool {
        self.sink().is_some_and(|sink| sink.emit(event))
    }

    /// Liest gesendetes Mikrofon-Audio
    pub fn pull_local(&self, buf: &mut [u8]) -> Option<usize> {
        self.log.lock().media.as_mut().map(|media| media.pull_local(buf))
    }

    /// Liefert Audio der Gegenstelle
    pub fn push_remote(&self, bytes: &[u8]) -> Option<usize> {
        self.log.lock().media.as_mut().map(|media| media.push_remote(bytes))
    }
}

impl VoiceSignalingClient for RecordingSignaling {
    fn connect(
        &mut self,
        options: ConnectOptions,
        media: NetworkMediaPort,
        events: SignalingEventSink,
    ) -> Result<CallHandle, SignalingError> {
        let mut log = self.log.lock();
        if let Some(error) = log.refuse_next.take() {
            return Err(error);
        }

        let handle = CallHandle::new(format!("CA{}", options.uuid.simple()));
        log.connects.push(options);
        log.media = Some(media);
        log.sink = Some(events);
        log.muted = None;
        Ok(handle)
    }

    fn disconnect(&mut self) {
        self.log.lock().disconnects += 1;
    }

    fn set_muted(&mut self, muted: bool) {
        self.log.lock().muted = Some(muted);
    }
}

// ============================================================================
// SCRIPTED CALL UI
// ============================================================================

/// Antwort auf `request_start`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartDecision {
    Approve,
    Reject(String),
    /// Test entscheidet selbst über [`ScriptedCallUi::approve`]
    Manual,
}

/// Meldungen der State Machine an die UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiReport {
    Connecting(Uuid),
    Connected(Uuid),
    Ended(Uuid, EndReason),
}

#[derive(Debug)]
struct UiLog {
    decision: StartDecision,
    requests: Vec<StartCallRequest>,
    reports: Vec<UiReport>,
    sink: Option<NativeUiActionSink>,
}

#[derive(Debug, Clone)]
pub struct ScriptedCallUi {
    log: Arc<Mutex<UiLog>>,
}

impl ScriptedCallUi {
    pub fn new(decision: StartDecision) -> Self {
        Self {
            log: Arc::new(Mutex::new(UiLog {
                decision,
                requests: Vec::new(),
                reports: Vec::new(),
                sink: None,
            })),
        }
    }

    pub fn approving() -> Self {
        Self::new(StartDecision::Approve)
    }

    pub fn rejecting(reason: impl Into<String>) -> Self {
        Self::new(StartDecision::Reject(reason.into()))
    }

    pub fn manual() -> Self {
        Self::new(StartDecision::Manual)
    }

    pub fn requests(&self) -> Vec<StartCallRequest> {
        self.log.lock().requests.clone()
    }

    pub fn reports(&self) -> Vec<UiReport> {
        self.log.lock().reports.clone()
    }

    fn send(&self, action: NativeUiAction) -> bool {
        let sink = self.log.lock().sink.clone();
        sink.is_some_and(|sink| sink.emit(action))
    }

    pub fn approve(&self) -> bool {
        self.send(NativeUiAction::StartApproved)
    }

    pub fn reject(&self, reason: impl Into<String>) -> bool {
        self.send(NativeUiAction::StartRejected {
            reason: reason.into(),
        })
    }

    /// Benutzer drückt "Auflegen"
    pub fn end_call(&self) -> bool {
        self.send(NativeUiAction::EndCall)
    }

    pub fn set_muted(&self, muted: bool) -> bool {
        self.send(NativeUiAction::SetMuted(muted))
    }

    pub fn reset(&self) -> bool {
        self.send(NativeUiAction::Reset)
    }
}

impl NativeCallUi for ScriptedCallUi {
    fn request_start(&mut self, request: StartCallRequest, actions: NativeUiActionSink) {
        let mut log = self.log.lock();
        log.requests.push(request);

        match log.decision.clone() {
            StartDecision::Approve => {
                actions.emit(NativeUiAction::StartApproved);
            }
            StartDecision::Reject(reason) => {
                actions.emit(NativeUiAction::StartRejected { reason });
            }
            StartDecision::Manual => {}
        }
        log.sink = Some(actions);
    }

    fn report_connecting(&mut self, correlation_id: Uuid, _at: DateTime<Utc>) {
        self.log.lock().reports.push(UiReport::Connecting(correlation_id));
    }

    fn report_connected(&mut self, correlation_id: Uuid, _at: DateTime<Utc>) {
        self.log.lock().reports.push(UiReport::Connected(correlation_id));
    }

    fn report_ended(&mut self, correlation_id: Uuid, _at: DateTime<Utc>, reason: EndReason) {
        self.log
            .lock()
            .reports
            .push(UiReport::Ended(correlation_id, reason));
    }
}
