//! Typen an der Grenze zum Voice-Signaling-Client
//!
//! Das Wire-Protokoll des Cloud-Dienstes ist Sache des Clients. Hier stehen
//! nur Verbindungsparameter, Call-Handle und das Event-Vokabular.

use super::client::SignalingError;
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

// ============================================================================
// CONNECT OPTIONS
// ============================================================================

/// Parameter-Name für die Zielnummer
pub const PARAM_TO: &str = "To";

/// Parameter-Name für die Call-ID des Hosts
pub const PARAM_CALL_ID: &str = "CallId";

/// Verbindungsparameter für einen ausgehenden Call
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub access_token: String,
    pub params: BTreeMap<String, String>,
    /// Verknüpft den Signaling-Call mit dem Call in der nativen UI
    pub uuid: Uuid,
}

impl ConnectOptions {
    pub fn new(access_token: impl Into<String>, to: &str, call_id: &str, uuid: Uuid) -> Self {
        let params = BTreeMap::from([
            (PARAM_TO.to_string(), to.to_string()),
            (PARAM_CALL_ID.to_string(), call_id.to_string()),
        ]);

        Self {
            access_token: access_token.into(),
            params,
            uuid,
        }
    }

    pub fn to(&self) -> Option<&str> {
        self.params.get(PARAM_TO).map(String::as_str)
    }

    pub fn call_id(&self) -> Option<&str> {
        self.params.get(PARAM_CALL_ID).map(String::as_str)
    }
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("access_token", &format_args!("<{} bytes>", self.access_token.len()))
            .field("params", &self.params)
            .field("uuid", &self.uuid)
            .finish()
    }
}

// ============================================================================
// CALL HANDLE
// ============================================================================

/// Vom Client vergebene Kennung des verbundenen Calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallHandle {
    pub sid: String,
}

impl CallHandle {
    pub fn new(sid: impl Into<String>) -> Self {
        Self { sid: sid.into() }
    }
}

// ============================================================================
// SIGNALING EVENTS
// ============================================================================

/// Events die der Signaling-Client asynchron meldet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    /// Gegenstelle klingelt
    Ringing,

    /// Verbindung steht, Audio fließt
    Connected,

    /// Verbindung beendet. Ohne Fehler ist das ein normales Auflegen.
    Disconnected { error: Option<SignalingError> },

    /// Verbindungsaufbau gescheitert
    FailedToConnect { error: SignalingError },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_options_params() {
        let id = Uuid::new_v4();
        let options = ConnectOptions::new("token", "+15551234567", "call-1", id);

        assert_eq!(options.to(), Some("+15551234567"));
        assert_eq!(options.call_id(), Some("call-1"));
        assert_eq!(options.uuid, id);
        assert_eq!(options.params.len(), 2);
    }

    #[test]
    fn test_debug_hides_token() {
        let options = ConnectOptions::new("secret-token", "+1", "c", Uuid::nil());
        let printed = format!("{:?}", options);

        assert!(!printed.contains("secret-token"));
        assert!(printed.contains("<12 bytes>"));
    }
}
