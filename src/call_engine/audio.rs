//! Audio Hardware Bridge - Capture/Render Callbacks und Buffer-Lifecycle
//!
//! Einziger Berührungspunkt zwischen Audio-Hardware und dem Rest:
//! - Capture: Mikrofon → Media-Port (Signaling) + Tee "local"
//! - Render:  Media-Port → Lautsprecher + Tee "remote"
//!
//! Die Callbacks laufen im Echtzeit-Thread der Hardware. Sie dürfen nicht
//! blockieren, nicht loggen und im Normalbetrieb nicht allokieren.

use super::device::HardwareDevice;
use super::media::DeviceMediaPort;
use crate::events::{AudioChannel, TelemetryTap};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Producer};
use ringbuf::{HeapCons, HeapProd};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Sample Rate (48kHz, wie von der Voice-Session gefordert)
pub const SAMPLE_RATE: u32 = 48000;

/// Channels (Mono für Voice)
pub const CHANNELS: u16 = 1;

/// Bytes pro Sample (16-bit signed)
pub const SAMPLE_SIZE: usize = 2;

/// Frames pro Callback (1024 @ 48kHz ≈ 21ms)
pub const FRAMES_PER_BUFFER: usize = 1024;

// ============================================================================
// AUDIO FORMAT
// ============================================================================

/// Festes PCM-Format für Capture und Render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_size: usize,
    pub frames_per_buffer: usize,
}

impl AudioFormat {
    pub const VOICE: Self = Self {
        sample_rate: SAMPLE_RATE,
        channels: CHANNELS,
        sample_size: SAMPLE_SIZE,
        frames_per_buffer: FRAMES_PER_BUFFER,
    };

    pub const fn bytes_per_frame(&self) -> usize {
        self.sample_size * self.channels as usize
    }

    pub const fn block_bytes(&self) -> usize {
        self.frames_per_buffer * self.bytes_per_frame()
    }

    /// Dauer eines Callback-Blocks
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames_per_buffer as f64 / f64::from(self.sample_rate))
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::VOICE
    }
}

const BYTES_PER_FRAME: usize = AudioFormat::VOICE.bytes_per_frame();

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Konfigurationsschritte in `initialize()`, in dieser Reihenfolge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigurationStep {
    EnableInput,
    EnableOutput,
    SetFormat,
    InstallCallbacks,
    Start,
}

impl std::fmt::Display for ConfigurationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConfigurationStep::EnableInput => "enable input",
            ConfigurationStep::EnableOutput => "enable output",
            ConfigurationStep::SetFormat => "set format",
            ConfigurationStep::InstallCallbacks => "install callbacks",
            ConfigurationStep::Start => "start",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Hardware configuration failed at '{step}': {reason}")]
pub struct HardwareConfigurationError {
    pub step: ConfigurationStep,
    pub reason: String,
}

impl HardwareConfigurationError {
    pub fn new(step: ConfigurationStep, reason: impl Into<String>) -> Self {
        Self {
            step,
            reason: reason.into(),
        }
    }
}

// ============================================================================
// OUTPUT ROUTE
// ============================================================================

/// Ausgabeweg für das Audio der Gegenstelle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputRoute {
    /// Hörmuschel / Standardausgabe
    #[default]
    Receiver,
    /// Lautsprecher
    Speaker,
}

// ============================================================================
// CONTEXTS
// ============================================================================

/// Render-Kontext eines Calls: Quelle für Remote-Audio plus Arbeitspuffer
struct RenderContext {
    correlation_id: Uuid,
    inbound: HeapCons<u8>,
    buffer: Vec<u8>,
}

/// Capture-Kontext eines Calls: Ziel für Mikrofon-Audio plus Arbeitspuffer
struct CaptureContext {
    correlation_id: Uuid,
    outbound: HeapProd<u8>,
    buffer: Vec<u8>,
}

/// Slot-Tabelle der Kontexte.
///
/// Der Audio-Thread nimmt die Locks nur per `try_lock`.
#[derive(Default)]
struct ContextTable {
    render: Mutex<Option<RenderContext>>,
    capture: Mutex<Option<CaptureContext>>,
}

#[derive(Debug, Default)]
struct BridgeCounters {
    captured_blocks: AtomicU64,
    rendered_blocks: AtomicU64,
    silent_blocks: AtomicU64,
    underruns: AtomicU64,
    overruns: AtomicU64,
    capture_errors: AtomicU64,
    contended: AtomicU64,
    buffer_resizes: AtomicU64,
}

impl BridgeCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Zähler der Bridge (Snapshot)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStats {
    pub captured_blocks: u64,
    pub rendered_blocks: u64,
    pub silent_blocks: u64,
    pub underruns: u64,
    pub overruns: u64,
    pub capture_errors: u64,
    pub contended: u64,
    pub buffer_resizes: u64,
    pub telemetry_dropped: u64,
}

struct BridgeShared {
    contexts: ContextTable,
    muted: AtomicBool,
    tap: TelemetryTap,
    counters: BridgeCounters,
}

/// Passt `buffer` auf `needed` Bytes an. Allokiert nur bei geänderter Framezahl.
fn ensure_buffer(buffer: &mut Vec<u8>, needed: usize, counters: &BridgeCounters) {
    if buffer.len() != needed {
        buffer.resize(needed, 0);
        BridgeCounters::bump(&counters.buffer_resizes);
    }
}

// ============================================================================
// CALLBACK HOOKS
// ============================================================================

/// Einstiegspunkte für die Hardware-Callbacks.
///
/// Wird beim `install_callbacks`-Schritt an das Gerät übergeben. Hält nur
/// einen `Arc` auf den geteilten Zustand, die Bridge selbst kann also
/// unabhängig davon gedroppt werden.
#[derive(Clone)]
pub struct CallbackHooks {
    shared: Arc<BridgeShared>,
}

impl CallbackHooks {
    /// Render-Callback für Geräte mit PCM16-Byte-Puffern.
    ///
    /// Ohne aktiven Call wird `output` komplett mit Nullen gefüllt.
    pub fn render(&self, output: &mut [u8]) {
        self.render_with(output.len() / BYTES_PER_FRAME, |block| match block {
            Some(bytes) => {
                output[..bytes.len()].copy_from_slice(bytes);
                output[bytes.len()..].fill(0);
            }
            None => output.fill(0),
        });
    }

    /// Render-Callback mit eigener Ausgabe-Konvertierung.
    ///
    /// `write` bekommt den Block (PCM16 LE) oder `None` für Stille.
    pub fn render_with(&self, frame_count: usize, write: impl FnOnce(Option<&[u8]>)) {
        let shared = &self.shared;

        let Some(mut slot) = shared.contexts.render.try_lock() else {
            BridgeCounters::bump(&shared.counters.contended);
            BridgeCounters::bump(&shared.counters.silent_blocks);
            write(None);
            return;
        };

        let Some(ctx) = slot.as_mut() else {
            BridgeCounters::bump(&shared.counters.silent_blocks);
            write(None);
            return;
        };

        let needed = frame_count * BYTES_PER_FRAME;
        ensure_buffer(&mut ctx.buffer, needed, &shared.counters);

        let read = ctx.inbound.pop_slice(&mut ctx.buffer);
        if read < needed {
            ctx.buffer[read..].fill(0);
            BridgeCounters::bump(&shared.counters.underruns);
        }

        shared.tap.tee(AudioChannel::Remote, &ctx.buffer);
        BridgeCounters::bump(&shared.counters.rendered_blocks);
        write(Some(&ctx.buffer));
    }

    /// Capture-Callback.
    ///
    /// `read` füllt den Arbeitspuffer mit `frame_count` Frames aus der
    /// Hardware und meldet Erfolg. Gibt `false` zurück wenn kein Call
    /// aktiv ist oder nichts gelesen wurde.
    pub fn capture(&self, frame_count: usize, read: impl FnOnce(&mut [u8]) -> bool) -> bool {
        let shared = &self.shared;

        let Some(mut slot) = shared.contexts.capture.try_lock() else {
            BridgeCounters::bump(&shared.counters.contended);
            return false;
        };
        let Some(ctx) = slot.as_mut() else {
            return false;
        };

        ensure_buffer(&mut ctx.buffer, frame_count * BYTES_PER_FRAME, &shared.counters);

        if !read(&mut ctx.buffer) {
            BridgeCounters::bump(&shared.counters.capture_errors);
            return false;
        }

        // Erst an den Signaling-Client, dann Telemetrie
        let written = ctx.outbound.push_slice(&ctx.buffer);
        if written < ctx.buffer.len() {
            BridgeCounters::bump(&shared.counters.overruns);
        }

        if !shared.muted.load(Ordering::Relaxed) {
            shared.tap.tee(AudioChannel::Local, &ctx.buffer);
        }

        BridgeCounters::bump(&shared.counters.captured_blocks);
        true
    }

    /// Capture-Callback für Geräte mit PCM16-Byte-Puffern
    pub fn capture_bytes(&self, input: &[u8]) -> bool {
        self.capture(input.len() / BYTES_PER_FRAME, |buffer| {
            buffer.copy_from_slice(&input[..buffer.len()]);
            true
        })
    }
}

impl std::fmt::Debug for CallbackHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHooks")
            .field("muted", &self.shared.muted.load(Ordering::Relaxed))
            .finish()
    }
}

// ============================================================================
// AUDIO HARDWARE BRIDGE
// ============================================================================

/// Besitzt die Voice-Audio-Pipeline der Hardware.
///
/// Kennt keine Call-Semantik. Gesteuert wird sie ausschließlich von der
/// Call-State-Machine (Control-Queue), nie aus dem Audio-Thread.
pub struct AudioHardwareBridge {
    device: HardwareDevice,
    shared: Arc<BridgeShared>,
    format: AudioFormat,
    initialized: bool,
    route: OutputRoute,
}

impl AudioHardwareBridge {
    /// Erstellt eine Bridge über `device`, Telemetrie geht an `tap`
    pub fn new(device: HardwareDevice, tap: TelemetryTap) -> Self {
        let shared = Arc::new(BridgeShared {
            contexts: ContextTable::default(),
            muted: AtomicBool::new(false),
            tap,
            counters: BridgeCounters::default(),
        });

        Self {
            device,
            shared,
            format: AudioFormat::VOICE,
            initialized: false,
            route: OutputRoute::default(),
        }
    }

    /// Konfiguriert die Hardware für Duplex-I/O und startet die Clock.
    ///
    /// Bricht beim ersten fehlgeschlagenen Schritt ab. Danach ist die Bridge
    /// uninitialisiert und `initialize()` kann erneut versucht werden.
    pub fn initialize(&mut self) -> Result<(), HardwareConfigurationError> {
        if self.initialized {
            return Ok(());
        }

        let hooks = self.hooks();
        if let Err(e) = Self::configure(&mut self.device, &self.format, hooks) {
            tracing::warn!("Audio hardware setup failed: {}", e);
            self.device.teardown();
            return Err(e);
        }

        self.initialized = true;
        tracing::info!(
            "Audio bridge initialized: {} Hz, {} channel(s), {}-bit, {} frames/buffer ({:?})",
            self.format.sample_rate,
            self.format.channels,
            self.format.sample_size * 8,
            self.format.frames_per_buffer,
            self.device.kind()
        );
        Ok(())
    }

    fn configure(
        device: &mut HardwareDevice,
        format: &AudioFormat,
        hooks: CallbackHooks,
    ) -> Result<(), HardwareConfigurationError> {
        device.enable_input(format)?;
        device.enable_output(format)?;
        device.set_format(format)?;
        device.install_callbacks(hooks)?;
        device.start_clock()
    }

    /// Startet die bereits konfigurierte Clock (idempotent)
    pub fn start(&mut self) -> bool {
        if !self.initialized {
            tracing::warn!("Audio bridge start requested before initialize");
            return false;
        }
        match self.device.start_clock() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to start audio clock: {}", e);
                false
            }
        }
    }

    /// Stoppt die Clock (idempotent)
    pub fn stop(&mut self) -> bool {
        if !self.initialized {
            return false;
        }
        self.device.stop_clock()
    }

    pub fn is_running(&self) -> bool {
        self.initialized && self.device.is_running()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Hängt die Media-Ports eines Calls an Render- und Capture-Callback
    pub fn attach(&mut self, correlation_id: Uuid, port: DeviceMediaPort) {
        let (inbound, outbound) = port.split();
        let block = self.format.block_bytes();

        *self.shared.contexts.render.lock() = Some(RenderContext {
            correlation_id,
            inbound,
            buffer: vec![0; block],
        });
        *self.shared.contexts.capture.lock() = Some(CaptureContext {
            correlation_id,
            outbound,
            buffer: vec![0; block],
        });

        tracing::debug!("Audio contexts attached for call {}", correlation_id);
    }

    /// Entfernt die Kontexte, Render liefert danach Stille
    pub fn detach(&mut self) {
        let render = self.shared.contexts.render.lock().take();
        let capture = self.shared.contexts.capture.lock().take();

        if let Some(id) = render
            .map(|ctx| ctx.correlation_id)
            .or(capture.map(|ctx| ctx.correlation_id))
        {
            tracing::debug!("Audio contexts detached for call {}", id);
        }
    }

    /// Call-ID der aktuell eingehängten Kontexte
    pub fn attached_call(&self) -> Option<Uuid> {
        self.shared
            .contexts
            .render
            .lock()
            .as_ref()
            .map(|ctx| ctx.correlation_id)
    }

    /// Mute betrifft nur den lokalen Telemetrie-Tee
    pub fn set_muted(&self, muted: bool) {
        self.shared.muted.store(muted, Ordering::Relaxed);
        tracing::debug!("Local audio tee muted: {}", muted);
    }

    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::Relaxed)
    }

    pub fn set_output_route(&mut self, route: OutputRoute) {
        self.route = route;
        self.device.set_output_route(route);
    }

    pub fn output_route(&self) -> OutputRoute {
        self.route
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Hooks für die Hardware-Callbacks
    pub fn hooks(&self) -> CallbackHooks {
        CallbackHooks {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn stats(&self) -> BridgeStats {
        let c = &self.shared.counters;
        BridgeStats {
            captured_blocks: c.captured_blocks.load(Ordering::Relaxed),
            rendered_blocks: c.rendered_blocks.load(Ordering::Relaxed),
            silent_blocks: c.silent_blocks.load(Ordering::Relaxed),
            underruns: c.underruns.load(Ordering::Relaxed),
            overruns: c.overruns.load(Ordering::Relaxed),
            capture_errors: c.capture_errors.load(Ordering::Relaxed),
            contended: c.contended.load(Ordering::Relaxed),
            buffer_resizes: c.buffer_resizes.load(Ordering::Relaxed),
            telemetry_dropped: self.shared.tap.dropped(),
        }
    }

    /// Kontexte entfernen und Gerät abbauen
    pub fn shutdown(&mut self) {
        self.detach();
        self.device.teardown();
        self.initialized = false;
        tracing::info!("Audio bridge shut down");
    }
}

impl Drop for AudioHardwareBridge {
    fn drop(&mut self) {
        if self.initialized {
            self.shutdown();
        }
    }
}

impl std::fmt::Debug for AudioHardwareBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioHardwareBridge")
            .field("device", &self.device.kind())
            .field("initialized", &self.initialized)
            .field("running", &self.is_running())
            .field("muted", &self.is_muted())
            .field("route", &self.route)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
