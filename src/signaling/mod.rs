//! Signaling Module - Grenze zum Cloud-Voice-Dienst
//!
//! Dieses Modul enthält:
//! - den Trait für den Signaling-Client und seine Event-Sink
//! - Verbindungsparameter und Event-Vokabular
//! - einen Loopback-Client (Echo) für Demo und Tests
//!

mod client;
mod loopback;
mod messages;

pub use client::{SignalingError, SignalingEventSink, VoiceSignalingClient};
pub use loopback::{LoopbackConfig, LoopbackOutcome, LoopbackSignaling};
pub use messages::*;
