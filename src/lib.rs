//! Phone Calls - Voice-Call-Audio-Bridge für die Companion-App
//!
//! Ausgehende Telefonate über einen Cloud-Voice-Dienst mit:
//! - Audio-Hardware-Bridge (Capture/Render, Mute, Speaker)
//! - Call-State-Machine mit nativer Call-UI
//! - Event-Kanal zum Host (Call-Status + Audio-Telemetrie)

pub mod call_engine;
pub mod config;
pub mod events;
pub mod native_ui;
pub mod signaling;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

use call_engine::{
    AudioFormat, AudioHardwareBridge, BridgeStats, CallControl, CallEngineError, CallSnapshot,
    Credentials, EngineParts, HardwareDevice, MakeCallRequest,
};
use config::PhoneCallsConfig;
use events::{event_channel, EventStream};
use native_ui::{HeadlessCallUi, NativeCallUi};
use parking_lot::Mutex;
use signaling::{LoopbackSignaling, VoiceSignalingClient};
use tokio::task::JoinHandle;

pub use call_engine::CallState;
pub use events::{AudioChannel, CallStatus, HostEvent};

// ============================================================================
// LOGGING
// ============================================================================

/// Initialisiert das Logging. Mehrfache Aufrufe sind erlaubt.
pub fn init_tracing(filter: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(filter))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config::DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}

// ============================================================================
// PHONE CALLS
// ============================================================================

/// Kommando-Oberfläche für den Host
///
/// Hält den Control-Task und den Event-Stream. Muss innerhalb einer
/// Tokio-Runtime gebaut werden.
pub struct PhoneCalls {
    control: CallControl,
    events: Mutex<Option<EventStream>>,
    task: Option<JoinHandle<()>>,
}

impl PhoneCalls {
    pub fn builder() -> PhoneCallsBuilder {
        PhoneCallsBuilder::default()
    }

    /// Setzt das Access-Token und prüft die Audio-Hardware
    pub async fn initialize(&self, credentials: Credentials) -> Result<(), CallEngineError> {
        self.control.initialize(credentials).await
    }

    /// Startet einen ausgehenden Call.
    ///
    /// `Ok(true)` sobald die native UI zugestimmt hat und das Signaling
    /// verbindet, `Ok(false)` bei Ablehnung. Den weiteren Verlauf liefert
    /// der Event-Stream.
    pub async fn make_call(
        &self,
        number: &str,
        call_id: &str,
        contact_name: Option<&str>,
    ) -> Result<bool, CallEngineError> {
        let mut request = MakeCallRequest::new(number, call_id);
        if let Some(name) = contact_name {
            request = request.with_contact_name(name);
        }
        self.control.make_call(request).await
    }

    pub async fn end_call(&self) -> Result<(), CallEngineError> {
        self.control.end_call().await
    }

    pub async fn toggle_mute(&self, muted: bool) -> Result<(), CallEngineError> {
        self.control.set_muted(muted).await
    }

    pub async fn toggle_speaker(&self, on: bool) -> Result<(), CallEngineError> {
        self.control.set_speaker(on).await
    }

    pub async fn snapshot(&self) -> Result<CallSnapshot, CallEngineError> {
        self.control.snapshot().await
    }

    pub async fn stats(&self) -> Result<BridgeStats, CallEngineError> {
        self.control.stats().await
    }

    /// Übernimmt den Event-Stream (nur einmal möglich)
    pub fn take_events(&self) -> Option<EventStream> {
        self.events.lock().take()
    }

    /// Beendet einen laufenden Call und baut die Hardware ab
    pub async fn shutdown(mut self) -> Result<(), CallEngineError> {
        self.control.shutdown().await?;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("Call control task failed: {}", e);
            }
        }
        Ok(())
    }
}

impl Drop for PhoneCalls {
    fn drop(&mut self) {
        if self.task.is_some() && self.control.is_running() {
            self.control.request_shutdown();
        }
    }
}

// ============================================================================
// BUILDER
// ============================================================================

#[derive(Default)]
pub struct PhoneCallsBuilder {
    config: Option<PhoneCallsConfig>,
    device: Option<HardwareDevice>,
    signaling: Option<Box<dyn VoiceSignalingClient>>,
    native_ui: Option<Box<dyn NativeCallUi>>,
}

impl PhoneCallsBuilder {
    pub fn config(mut self, config: PhoneCallsConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Gerät direkt vorgeben statt über `config.device`
    pub fn device(mut self, device: HardwareDevice) -> Self {
        self.device = Some(device);
        self
    }

    pub fn signaling(mut self, client: impl VoiceSignalingClient + 'static) -> Self {
        self.signaling = Some(Box::new(client));
        self
    }

    pub fn native_ui(mut self, ui: impl NativeCallUi + 'static) -> Self {
        self.native_ui = Some(Box::new(ui));
        self
    }

    /// Baut die Pipeline und startet den Control-Task
    pub fn build(self) -> PhoneCalls {
        let config = self.config.unwrap_or_default();
        let device = self
            .device
            .unwrap_or_else(|| HardwareDevice::from_kind(config.device));

        let (emitter, tap, events) = event_channel(
            config.telemetry_pool_frames,
            config.telemetry_queue_frames,
            AudioFormat::VOICE.block_bytes(),
        );

        tracing::info!("Starting phone calls ({:?} audio device)", device.kind());

        let parts = EngineParts {
            bridge: AudioHardwareBridge::new(device, tap),
            signaling: self
                .signaling
                .unwrap_or_else(|| Box::new(LoopbackSignaling::default())),
            native_ui: self
                .native_ui
                .unwrap_or_else(|| Box::new(HeadlessCallUi::new())),
            events: emitter,
            media_capacity: config.media_capacity_bytes(),
        };
        let (control, task) = CallControl::spawn(parts);

        PhoneCalls {
            control,
            events: Mutex::new(Some(events)),
            task: Some(task),
        }
    }
}
