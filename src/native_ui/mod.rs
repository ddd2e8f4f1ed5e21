//! Native Call UI - Grenze zur System-Anruf-Oberfläche
//!
//! Die native UI genehmigt ausgehende Calls, zeigt deren Status an und
//! liefert Benutzeraktionen (Auflegen, Stummschalten) zurück. Aktionen
//! laufen über eine [`NativeUiActionSink`] in die Control-Queue.

mod headless;

pub use headless::HeadlessCallUi;

use crate::call_engine::CallCommand;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

// ============================================================================
// TYPES
// ============================================================================

/// Anfrage an die native UI, einen ausgehenden Call zu starten
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCallRequest {
    pub correlation_id: Uuid,
    /// Zielnummer
    pub handle: String,
    pub display_name: Option<String>,
}

/// Grund fürs Call-Ende, wie er der nativen UI gemeldet wird
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    LocalEnded,
    RemoteEnded,
    Failed,
}

/// Aktionen aus der nativen UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeUiAction {
    /// Start-Anfrage genehmigt
    StartApproved,
    /// Start-Anfrage abgelehnt
    StartRejected { reason: String },
    /// Benutzer hat aufgelegt
    EndCall,
    /// Benutzer hat stummgeschaltet
    SetMuted(bool),
    /// Die UI hat ihren Zustand verworfen, alle Calls sind weg
    Reset,
}

// ============================================================================
// TRAIT
// ============================================================================

/// Native Anruf-Oberfläche des Betriebssystems
///
/// Alle Methoden werden nur aus dem Control-Task aufgerufen und dürfen nicht
/// blockieren. Die Antwort auf `request_start` kommt asynchron über `actions`.
pub trait NativeCallUi: Send {
    fn request_start(&mut self, request: StartCallRequest, actions: NativeUiActionSink);

    fn report_connecting(&mut self, correlation_id: Uuid, at: DateTime<Utc>);

    fn report_connected(&mut self, correlation_id: Uuid, at: DateTime<Utc>);

    fn report_ended(&mut self, correlation_id: Uuid, at: DateTime<Utc>, reason: EndReason);
}

// ============================================================================
// ACTION SINK
// ============================================================================

/// Liefert UI-Aktionen eines Calls an die State Machine
#[derive(Debug, Clone)]
pub struct NativeUiActionSink {
    correlation_id: Uuid,
    tx: mpsc::UnboundedSender<CallCommand>,
}

impl NativeUiActionSink {
    pub(crate) fn new(correlation_id: Uuid, tx: mpsc::UnboundedSender<CallCommand>) -> Self {
        Self { correlation_id, tx }
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Reiht die Aktion ein. `false` wenn die State Machine nicht mehr läuft.
    pub fn emit(&self, action: NativeUiAction) -> bool {
        tracing::debug!("Native UI action for {}: {:?}", self.correlation_id, action);
        self.tx
            .send(CallCommand::NativeUi {
                correlation_id: self.correlation_id,
                action,
            })
            .is_ok()
    }
}
