//! Audio-Geräte unter der Bridge
//!
//! - `Cpal`: echte Hardware über cpal, Streams leben auf einem eigenen
//!   Clock-Thread (cpal Streams sind nicht `Send`)
//! - `Silence`: keine Hardware, Callbacks per [`DeviceClock`] oder freilaufendem
//!   Ticker. Für Tests, CI und Desktop-Demos.

use super::audio::{AudioFormat, CallbackHooks, ConfigurationStep, HardwareConfigurationError, OutputRoute};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, StreamConfig, SupportedBufferSize, SupportedStreamConfigRange};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::runtime::RuntimeFlavor;

// ============================================================================
// DEVICE KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Standard-Ein-/Ausgabe des Systems
    #[default]
    Hardware,
    /// Keine Hardware, Stille im Blocktakt
    Silence,
}

impl std::str::FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hardware" | "cpal" => Ok(DeviceKind::Hardware),
            "silence" | "null" => Ok(DeviceKind::Silence),
            other => Err(format!("unknown device kind '{}'", other)),
        }
    }
}

// ============================================================================
// HARDWARE DEVICE
// ============================================================================

/// Gerät unter der Bridge, wird bei der Konstruktion festgelegt
pub enum HardwareDevice {
    Cpal(CpalDevice),
    Silence(SilenceDevice),
}

impl HardwareDevice {
    pub fn from_kind(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Hardware => HardwareDevice::Cpal(CpalDevice::new()),
            DeviceKind::Silence => HardwareDevice::Silence(SilenceDevice::free_running()),
        }
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            HardwareDevice::Cpal(_) => DeviceKind::Hardware,
            HardwareDevice::Silence(_) => DeviceKind::Silence,
        }
    }

    pub(crate) fn enable_input(&mut self, format: &AudioFormat) -> Result<(), HardwareConfigurationError> {
        match self {
            HardwareDevice::Cpal(d) => d.enable_input(format),
            HardwareDevice::Silence(d) => d.enable_input(),
        }
    }

    pub(crate) fn enable_output(&mut self, format: &AudioFormat) -> Result<(), HardwareConfigurationError> {
        match self {
            HardwareDevice::Cpal(d) => d.enable_output(format),
            HardwareDevice::Silence(d) => d.enable_output(),
        }
    }

    pub(crate) fn set_format(&mut self, format: &AudioFormat) -> Result<(), HardwareConfigurationError> {
        match self {
            HardwareDevice::Cpal(d) => d.set_format(format),
            HardwareDevice::Silence(d) => d.set_format(format),
        }
    }

    pub(crate) fn install_callbacks(&mut self, hooks: CallbackHooks) -> Result<(), HardwareConfigurationError> {
        match self {
            HardwareDevice::Cpal(d) => d.install_callbacks(hooks),
            HardwareDevice::Silence(d) => d.install_callbacks(hooks),
        }
    }

    pub(crate) fn start_clock(&mut self) -> Result<(), HardwareConfigurationError> {
        match self {
            HardwareDevice::Cpal(d) => d.start_clock(),
            HardwareDevice::Silence(d) => d.start_clock(),
        }
    }

    pub(crate) fn stop_clock(&mut self) -> bool {
        match self {
            HardwareDevice::Cpal(d) => d.stop_clock(),
            HardwareDevice::Silence(d) => d.stop_clock(),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        match self {
            HardwareDevice::Cpal(d) => d.running,
            HardwareDevice::Silence(d) => d.is_running(),
        }
    }

    pub(crate) fn set_output_route(&mut self, route: OutputRoute) {
        match self {
            HardwareDevice::Cpal(d) => d.set_output_route(route),
            HardwareDevice::Silence(d) => d.route = route,
        }
    }

    pub(crate) fn teardown(&mut self) {
        match self {
            HardwareDevice::Cpal(d) => d.teardown(),
            HardwareDevice::Silence(d) => d.teardown(),
        }
    }
}

// ============================================================================
// SILENCE DEVICE
// ============================================================================

/// Schaltet gezielt einen Konfigurationsschritt auf Fehler
#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    step: Arc<Mutex<Option<ConfigurationStep>>>,
}

impl FaultInjector {
    pub fn fail_at(&self, step: ConfigurationStep) {
        *self.step.lock() = Some(step);
    }

    pub fn clear(&self) {
        *self.step.lock() = None;
    }

    fn check(&self, step: ConfigurationStep) -> Result<(), HardwareConfigurationError> {
        if *self.step.lock() == Some(step) {
            return Err(HardwareConfigurationError::new(step, "injected fault"));
        }
        Ok(())
    }
}

struct ClockShared {
    hooks: CallbackHooks,
    running: AtomicBool,
    epoch: AtomicU64,
}

/// Handle auf die Clock eines [`SilenceDevice`].
///
/// Liefert Callbacks nur solange die Clock läuft, wie echte Hardware.
#[derive(Clone, Default)]
pub struct DeviceClock {
    installed: Arc<Mutex<Option<Arc<ClockShared>>>>,
}

impl DeviceClock {
    fn current(&self) -> Option<Arc<ClockShared>> {
        self.installed.lock().clone()
    }

    /// Ein Render-Callback. `false` wenn die Clock steht.
    pub fn render(&self, output: &mut [u8]) -> bool {
        match self.current() {
            Some(clock) if clock.running.load(Ordering::Acquire) => {
                clock.hooks.render(output);
                true
            }
            _ => false,
        }
    }

    /// Ein Capture-Callback mit `input` als Mikrofon-Daten
    pub fn capture(&self, input: &[u8]) -> bool {
        match self.current() {
            Some(clock) if clock.running.load(Ordering::Acquire) => clock.hooks.capture_bytes(input),
            _ => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.current()
            .is_some_and(|clock| clock.running.load(Ordering::Acquire))
    }
}

impl std::fmt::Debug for DeviceClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let clock = self.current();
        f.debug_struct("DeviceClock")
            .field("installed", &clock.is_some())
            .field(
                "running",
                &clock.is_some_and(|c| c.running.load(Ordering::Acquire)),
            )
            .finish()
    }
}

/// Gerät ohne Hardware
#[derive(Debug, Default)]
pub struct SilenceDevice {
    faults: FaultInjector,
    clock: DeviceClock,
    free_running: bool,
    input_enabled: bool,
    output_enabled: bool,
    format: Option<AudioFormat>,
    route: OutputRoute,
}

impl SilenceDevice {
    /// Manuell getaktet über [`clock`](Self::clock)
    pub fn new() -> Self {
        Self::default()
    }

    /// Eigener Ticker-Thread liefert Stille im Blocktakt
    pub fn free_running() -> Self {
        Self {
            free_running: true,
            ..Self::default()
        }
    }

    pub fn failing_at(self, step: ConfigurationStep) -> Self {
        self.faults.fail_at(step);
        self
    }

    pub fn fault_injector(&self) -> FaultInjector {
        self.faults.clone()
    }

    pub fn clock(&self) -> DeviceClock {
        self.clock.clone()
    }

    pub fn output_route(&self) -> OutputRoute {
        self.route
    }

    fn is_running(&self) -> bool {
        self.clock.is_running()
    }

    fn enable_input(&mut self) -> Result<(), HardwareConfigurationError> {
        self.faults.check(ConfigurationStep::EnableInput)?;
        self.input_enabled = true;
        Ok(())
    }

    fn enable_output(&mut self) -> Result<(), HardwareConfigurationError> {
        self.faults.check(ConfigurationStep::EnableOutput)?;
        self.output_enabled = true;
        Ok(())
    }

    fn set_format(&mut self, format: &AudioFormat) -> Result<(), HardwareConfigurationError> {
        self.faults.check(ConfigurationStep::SetFormat)?;
        if !(self.input_enabled && self.output_enabled) {
            return Err(HardwareConfigurationError::new(
                ConfigurationStep::SetFormat,
                "input and output must be enabled first",
            ));
        }
        self.format = Some(*format);
        Ok(())
    }

    fn install_callbacks(&mut self, hooks: CallbackHooks) -> Result<(), HardwareConfigurationError> {
        self.faults.check(ConfigurationStep::InstallCallbacks)?;
        *self.clock.installed.lock() = Some(Arc::new(ClockShared {
            hooks,
            running: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
        }));
        Ok(())
    }

    fn start_clock(&mut self) -> Result<(), HardwareConfigurationError> {
        self.faults.check(ConfigurationStep::Start)?;
        let clock = self.clock.current().ok_or_else(|| {
            HardwareConfigurationError::new(ConfigurationStep::Start, "callbacks not installed")
        })?;

        if clock.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let epoch = clock.epoch.fetch_add(1, Ordering::AcqRel) + 1;

        if self.free_running {
            let format = self.format.unwrap_or_default();
            let ticker = Arc::clone(&clock);
            let spawned = std::thread::Builder::new()
                .name("voice-silence-clock".into())
                .spawn(move || run_silence_ticker(ticker, epoch, format));
            if let Err(e) = spawned {
                clock.running.store(false, Ordering::Release);
                return Err(HardwareConfigurationError::new(
                    ConfigurationStep::Start,
                    e.to_string(),
                ));
            }
        }
        Ok(())
    }

    fn stop_clock(&mut self) -> bool {
        if let Some(clock) = self.clock.current() {
            if clock.running.swap(false, Ordering::AcqRel) {
                clock.epoch.fetch_add(1, Ordering::AcqRel);
            }
        }
        true
    }

    fn teardown(&mut self) {
        self.stop_clock();
        *self.clock.installed.lock() = None;
        self.input_enabled = false;
        self.output_enabled = false;
        self.format = None;
    }
}

/// Takt-Schleife; endet sobald die Epoche wechselt
fn run_silence_ticker(clock: Arc<ClockShared>, epoch: u64, format: AudioFormat) {
    let silence = vec![0u8; format.block_bytes()];
    let mut output = vec![0u8; format.block_bytes()];
    let period = format.block_duration();

    loop {
        std::thread::sleep(period);
        if clock.epoch.load(Ordering::Acquire) != epoch || !clock.running.load(Ordering::Acquire) {
            break;
        }
        clock.hooks.capture_bytes(&silence);
        clock.hooks.render(&mut output);
    }
}

// ============================================================================
// CPAL DEVICE
// ============================================================================

/// Konvertierung zwischen nativen Samples und PCM16
trait VoiceSample: cpal::SizedSample + Send + 'static {
    fn from_pcm16(sample: i16) -> Self;
    fn to_pcm16(self) -> i16;
}

impl VoiceSample for i16 {
    fn from_pcm16(sample: i16) -> Self {
        sample
    }

    fn to_pcm16(self) -> i16 {
        self
    }
}

impl VoiceSample for f32 {
    fn from_pcm16(sample: i16) -> Self {
        f32::from(sample) / 32768.0
    }

    fn to_pcm16(self) -> i16 {
        (self.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
    }
}

/// Gewählte Stream-Konfiguration eines Geräts
struct StreamSetup {
    device: cpal::Device,
    config: StreamConfig,
    sample_format: SampleFormat,
}

/// Maximale Wartezeit auf eine Antwort des Clock-Threads
const CLOCK_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Wartet begrenzt auf den Clock-Thread.
///
/// Läuft im Control-Task. Auf einer Multi-Thread-Runtime wird der Worker
/// per `block_in_place` freigegeben.
fn wait_for_clock<T: Send>(reply: &Receiver<T>) -> Result<T, String> {
    let wait = || match reply.recv_timeout(CLOCK_REPLY_TIMEOUT) {
        Ok(value) => Ok(value),
        Err(RecvTimeoutError::Timeout) => Err("clock thread did not answer in time".to_string()),
        Err(RecvTimeoutError::Disconnected) => Err("clock thread is gone".to_string()),
    };

    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(wait)
        }
        _ => wait(),
    }
}

enum ClockCommand {
    Play(Sender<Result<(), String>>),
    Pause(Sender<Result<(), String>>),
    Shutdown,
}

/// Thread der die cpal Streams besitzt
struct ClockThread {
    commands: Sender<ClockCommand>,
    handle: Option<JoinHandle<()>>,
}

impl ClockThread {
    fn spawn(input: StreamSetup, output: StreamSetup, hooks: CallbackHooks) -> Result<Self, String> {
        let (commands, command_rx) = bounded::<ClockCommand>(8);
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);

        let handle = std::thread::Builder::new()
            .name("voice-hardware-clock".into())
            .spawn(move || run_clock_thread(input, output, hooks, command_rx, ready_tx))
            .map_err(|e| e.to_string())?;

        match wait_for_clock(&ready_rx) {
            Ok(Ok(())) => Ok(Self {
                commands,
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            // Thread endet von selbst sobald `commands` gedroppt ist
            Err(e) => Err(e),
        }
    }

    fn request(&self, make: impl FnOnce(Sender<Result<(), String>>) -> ClockCommand) -> Result<(), String> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(make(reply_tx))
            .map_err(|_| "clock thread is gone".to_string())?;
        wait_for_clock(&reply_rx)?
    }

    fn shutdown(&mut self) {
        let _ = self.commands.send(ClockCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Audio clock thread panicked");
            }
        }
    }
}

impl Drop for ClockThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_clock_thread(
    input: StreamSetup,
    output: StreamSetup,
    hooks: CallbackHooks,
    commands: Receiver<ClockCommand>,
    ready: Sender<Result<(), String>>,
) {
    let streams = build_input_stream(&input, hooks.clone())
        .and_then(|i| build_output_stream(&output, hooks).map(|o| (i, o)));

    let (input_stream, output_stream) = match streams {
        Ok(streams) => {
            let _ = ready.send(Ok(()));
            streams
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    for command in commands.iter() {
        match command {
            ClockCommand::Play(reply) => {
                let result = input_stream
                    .play()
                    .and_then(|_| output_stream.play())
                    .map_err(|e| e.to_string());
                let _ = reply.send(result);
            }
            ClockCommand::Pause(reply) => {
                let result = input_stream
                    .pause()
                    .and_then(|_| output_stream.pause())
                    .map_err(|e| e.to_string());
                let _ = reply.send(result);
            }
            ClockCommand::Shutdown => break,
        }
    }

    tracing::debug!("Audio clock thread exiting");
}

fn build_input_stream(setup: &StreamSetup, hooks: CallbackHooks) -> Result<cpal::Stream, String> {
    match setup.sample_format {
        SampleFormat::I16 => input_stream_for::<i16>(setup, hooks),
        SampleFormat::F32 => input_stream_for::<f32>(setup, hooks),
        other => Err(format!("unsupported input sample format {:?}", other)),
    }
}

fn build_output_stream(setup: &StreamSetup, hooks: CallbackHooks) -> Result<cpal::Stream, String> {
    match setup.sample_format {
        SampleFormat::I16 => output_stream_for::<i16>(setup, hooks),
        SampleFormat::F32 => output_stream_for::<f32>(setup, hooks),
        other => Err(format!("unsupported output sample format {:?}", other)),
    }
}

fn input_stream_for<T: VoiceSample>(setup: &StreamSetup, hooks: CallbackHooks) -> Result<cpal::Stream, String> {
    let channels = usize::from(setup.config.channels.max(1));

    setup
        .device
        .build_input_stream(
            &setup.config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let frames = data.len() / channels;
                // Mono: erster Kanal jedes Frames
                hooks.capture(frames, |buffer| {
                    for (pcm, frame) in buffer.chunks_exact_mut(2).zip(data.chunks_exact(channels)) {
                        pcm.copy_from_slice(&frame[0].to_pcm16().to_le_bytes());
                    }
                    true
                });
            },
            |err| tracing::error!("Audio capture error: {}", err),
            None,
        )
        .map_err(|e| e.to_string())
}

fn output_stream_for<T: VoiceSample>(setup: &StreamSetup, hooks: CallbackHooks) -> Result<cpal::Stream, String> {
    let channels = usize::from(setup.config.channels.max(1));

    setup
        .device
        .build_output_stream(
            &setup.config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                hooks.render_with(frames, |block| match block {
                    Some(bytes) => {
                        // Mono auf alle Kanäle verteilen
                        for (frame, pcm) in data.chunks_exact_mut(channels).zip(bytes.chunks_exact(2)) {
                            frame.fill(T::from_pcm16(i16::from_le_bytes([pcm[0], pcm[1]])));
                        }
                    }
                    None => data.fill(T::from_pcm16(0)),
                });
            },
            |err| tracing::error!("Audio playback error: {}", err),
            None,
        )
        .map_err(|e| e.to_string())
}

/// Wählt eine Konfiguration mit exakt der Ziel-Samplerate.
///
/// Priorität: gewünschte Kanalzahl > I16 > F32. Feste Puffergröße nur wenn
/// das Gerät sie unterstützt.
fn select_config(
    ranges: impl IntoIterator<Item = SupportedStreamConfigRange>,
    format: &AudioFormat,
) -> Option<(StreamConfig, SampleFormat)> {
    let rate = SampleRate(format.sample_rate);
    let frames = format.frames_per_buffer as u32;

    let range = ranges
        .into_iter()
        .filter(|r| r.min_sample_rate() <= rate && r.max_sample_rate() >= rate)
        .filter(|r| matches!(r.sample_format(), SampleFormat::I16 | SampleFormat::F32))
        .min_by_key(|r| {
            (
                r.channels() != format.channels,
                r.sample_format() != SampleFormat::I16,
            )
        })?;

    let buffer_size = match range.buffer_size() {
        SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&frames) => {
            BufferSize::Fixed(frames)
        }
        _ => BufferSize::Default,
    };
    let sample_format = range.sample_format();

    let mut config = range.with_sample_rate(rate).config();
    config.buffer_size = buffer_size;
    Some((config, sample_format))
}

/// Standard-Ein-/Ausgabe via cpal
#[derive(Default)]
pub struct CpalDevice {
    input: Option<StreamSetup>,
    output: Option<StreamSetup>,
    clock: Option<ClockThread>,
    running: bool,
    route: OutputRoute,
}

impl CpalDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn enable_input(&mut self, format: &AudioFormat) -> Result<(), HardwareConfigurationError> {
        let step = ConfigurationStep::EnableInput;
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| HardwareConfigurationError::new(step, "no input device"))?;
        let ranges = device
            .supported_input_configs()
            .map_err(|e| HardwareConfigurationError::new(step, e.to_string()))?;
        let (config, sample_format) = select_config(ranges, format).ok_or_else(|| {
            HardwareConfigurationError::new(step, "no input config at the voice sample rate")
        })?;

        tracing::info!(
            "Audio input: {} ({} ch, {:?})",
            device.name().unwrap_or_else(|_| "unknown".into()),
            config.channels,
            sample_format
        );
        self.input = Some(StreamSetup {
            device,
            config,
            sample_format,
        });
        Ok(())
    }

    fn enable_output(&mut self, format: &AudioFormat) -> Result<(), HardwareConfigurationError> {
        let step = ConfigurationStep::EnableOutput;
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| HardwareConfigurationError::new(step, "no output device"))?;
        let ranges = device
            .supported_output_configs()
            .map_err(|e| HardwareConfigurationError::new(step, e.to_string()))?;
        let (config, sample_format) = select_config(ranges, format).ok_or_else(|| {
            HardwareConfigurationError::new(step, "no output config at the voice sample rate")
        })?;

        tracing::info!(
            "Audio output: {} ({} ch, {:?})",
            device.name().unwrap_or_else(|_| "unknown".into()),
            config.channels,
            sample_format
        );
        self.output = Some(StreamSetup {
            device,
            config,
            sample_format,
        });
        Ok(())
    }

    fn set_format(&mut self, format: &AudioFormat) -> Result<(), HardwareConfigurationError> {
        let step = ConfigurationStep::SetFormat;
        for setup in [&self.input, &self.output] {
            let setup = setup
                .as_ref()
                .ok_or_else(|| HardwareConfigurationError::new(step, "device not enabled"))?;
            if setup.config.sample_rate.0 != format.sample_rate {
                return Err(HardwareConfigurationError::new(
                    step,
                    format!("device runs at {} Hz", setup.config.sample_rate.0),
                ));
            }
        }
        Ok(())
    }

    fn install_callbacks(&mut self, hooks: CallbackHooks) -> Result<(), HardwareConfigurationError> {
        let step = ConfigurationStep::InstallCallbacks;
        let (Some(input), Some(output)) = (self.input.take(), self.output.take()) else {
            return Err(HardwareConfigurationError::new(step, "device not enabled"));
        };

        let clock = ClockThread::spawn(input, output, hooks)
            .map_err(|e| HardwareConfigurationError::new(step, e))?;
        self.clock = Some(clock);
        Ok(())
    }

    fn start_clock(&mut self) -> Result<(), HardwareConfigurationError> {
        let step = ConfigurationStep::Start;
        if self.running {
            return Ok(());
        }
        let clock = self
            .clock
            .as_ref()
            .ok_or_else(|| HardwareConfigurationError::new(step, "callbacks not installed"))?;

        clock
            .request(ClockCommand::Play)
            .map_err(|e| HardwareConfigurationError::new(step, e))?;
        self.running = true;
        Ok(())
    }

    fn stop_clock(&mut self) -> bool {
        if !self.running {
            return true;
        }
        let Some(clock) = self.clock.as_ref() else {
            return false;
        };

        match clock.request(ClockCommand::Pause) {
            Ok(()) => {
                self.running = false;
                true
            }
            Err(e) => {
                tracing::error!("Failed to pause audio streams: {}", e);
                false
            }
        }
    }

    fn set_output_route(&mut self, route: OutputRoute) {
        // cpal kennt kein Routing, Ausgabe bleibt das Standardgerät
        self.route = route;
        tracing::info!("Output route set to {:?}", route);
    }

    fn teardown(&mut self) {
        if let Some(mut clock) = self.clock.take() {
            clock.shutdown();
        }
        self.input = None;
        self.output = None;
        self.running = false;
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_engine::audio::AudioHardwareBridge;
    use crate::events::event_channel;
    use std::time::{Duration, Instant};

    fn silence_bridge(device: SilenceDevice) -> AudioHardwareBridge {
        let (_emitter, tap, _events) = event_channel(4, 4, 2048);
        AudioHardwareBridge::new(HardwareDevice::Silence(device), tap)
    }

    #[test]
    fn test_device_kind_parse() {
        assert_eq!("silence".parse::<DeviceKind>(), Ok(DeviceKind::Silence));
        assert_eq!(" Hardware ".parse::<DeviceKind>(), Ok(DeviceKind::Hardware));
        assert!("speaker".parse::<DeviceKind>().is_err());
    }

    #[test]
    fn test_clock_only_ticks_while_running() {
        let device = SilenceDevice::new();
        let clock = device.clock();
        let mut bridge = silence_bridge(device);

        let mut output = [1u8; 8];
        assert!(!clock.render(&mut output));

        bridge.initialize().unwrap();
        assert!(clock.render(&mut output));
        assert_eq!(output, [0u8; 8]);

        bridge.stop();
        assert!(!clock.is_running());
        assert!(!clock.render(&mut output));
    }

    #[test]
    fn test_teardown_removes_clock() {
        let device = SilenceDevice::new();
        let clock = device.clock();
        let mut bridge = silence_bridge(device);

        bridge.initialize().unwrap();
        bridge.shutdown();
        assert!(!clock.is_running());
        assert!(!bridge.is_initialized());

        bridge.initialize().unwrap();
        assert!(clock.is_running());
    }

    #[test]
    fn test_free_running_ticker_renders_silence() {
        let mut bridge = silence_bridge(SilenceDevice::free_running());
        bridge.initialize().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while bridge.stats().silent_blocks < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(bridge.stats().silent_blocks >= 2);

        bridge.stop();
        std::thread::sleep(Duration::from_millis(60));
        let after_stop = bridge.stats().silent_blocks;
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(bridge.stats().silent_blocks, after_stop);
    }

    #[test]
    fn test_f32_conversion() {
        assert_eq!(1.0f32.to_pcm16(), i16::MAX);
        assert_eq!((-2.0f32).to_pcm16(), -i16::MAX);
        assert_eq!(f32::from_pcm16(0), 0.0);
        assert_eq!(f32::from_pcm16(i16::MIN), -1.0);
    }

    #[test]
    fn test_clock_request_times_out() {
        let (commands, _command_rx) = bounded(8);
        let clock = ClockThread {
            commands,
            handle: None,
        };

        let started = Instant::now();
        let err = clock.request(ClockCommand::Play).unwrap_err();
        assert!(err.contains("did not answer"));
        assert!(started.elapsed() >= CLOCK_REPLY_TIMEOUT);
    }

    #[test]
    fn test_clock_request_thread_gone() {
        let (commands, command_rx) = bounded(8);
        drop(command_rx);
        let clock = ClockThread {
            commands,
            handle: None,
        };

        assert_eq!(clock.request(ClockCommand::Pause).unwrap_err(), "clock thread is gone");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_clock_wait_inside_multi_thread_runtime() {
        let (reply_tx, reply_rx) = bounded(1);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            let _ = reply_tx.send(7u8);
        });

        assert_eq!(wait_for_clock(&reply_rx), Ok(7));
    }

    #[tokio::test]
    async fn test_clock_wait_inside_current_thread_runtime() {
        let (reply_tx, reply_rx) = bounded(1);
        reply_tx.send(3u8).unwrap();
        assert_eq!(wait_for_clock(&reply_rx), Ok(3));
    }
}
