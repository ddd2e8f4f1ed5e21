//! Schnittstelle zum Cloud-Voice-Signaling-Client
//!
//! Der Client läuft auf eigenen Threads/Tasks. Er bekommt beim Verbinden
//! die Netzwerk-Seite der Media-Ports und einen [`SignalingEventSink`], über
//! den alle Events in die Control-Queue der State Machine wandern.

use super::messages::{CallHandle, ConnectOptions, SignalingEvent};
use crate::call_engine::{CallCommand, NetworkMediaPort};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Connection timed out")]
    Timeout,

    #[error("No connected call")]
    NotConnected,
}

// ============================================================================
// CLIENT TRAIT
// ============================================================================

/// Voice-Signaling-Client (Cloud-Dienst)
///
/// Alle Methoden werden nur aus dem Control-Task aufgerufen.
pub trait VoiceSignalingClient: Send {
    /// Baut einen ausgehenden Call auf.
    ///
    /// Ein `Err` heißt, dass der Versuch gar nicht erst gestartet wurde.
    /// Spätere Fehler kommen als [`SignalingEvent::FailedToConnect`].
    fn connect(
        &mut self,
        options: ConnectOptions,
        media: NetworkMediaPort,
        events: SignalingEventSink,
    ) -> Result<CallHandle, SignalingError>;

    /// Trennt den aktuellen Call, ohne Call ein No-op
    fn disconnect(&mut self);

    /// Stummschaltung des ausgehenden Audios
    fn set_muted(&mut self, muted: bool);
}

// ============================================================================
// EVENT SINK
// ============================================================================

/// Liefert Signaling-Events eines Calls an die State Machine
#[derive(Debug, Clone)]
pub struct SignalingEventSink {
    correlation_id: Uuid,
    tx: mpsc::UnboundedSender<CallCommand>,
}

impl SignalingEventSink {
    pub(crate) fn new(correlation_id: Uuid, tx: mpsc::UnboundedSender<CallCommand>) -> Self {
        Self { correlation_id, tx }
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Reiht das Event ein. `false` wenn die State Machine nicht mehr läuft.
    pub fn emit(&self, event: SignalingEvent) -> bool {
        tracing::debug!("Signaling event for {}: {:?}", self.correlation_id, event);
        self.tx
            .send(CallCommand::Signaling {
                correlation_id: self.correlation_id,
                event,
            })
            .is_ok()
    }
}
