//! Integration tests for the call flow through the public `PhoneCalls` facade.
//!
//! Hardware is replaced by a manually clocked `SilenceDevice`, the cloud
//! service by `RecordingSignaling` and the system call UI by `ScriptedCallUi`.

use std::time::Duration;

use phone_calls_lib::call_engine::{
    AudioHardwareBridge, CallEngineError, CallState, ConfigurationStep, Credentials, DeviceClock,
    HardwareDevice, SilenceDevice,
};
use phone_calls_lib::events::{event_channel, AudioChannel, EventStream, HostEvent};
use phone_calls_lib::signaling::SignalingEvent;
use phone_calls_lib::testing::{RecordingSignaling, ScriptedCallUi};
use phone_calls_lib::{CallStatus, PhoneCalls};

const BLOCK: usize = 2048;

struct Rig {
    phone: PhoneCalls,
    events: EventStream,
    signaling: RecordingSignaling,
    ui: ScriptedCallUi,
    clock: DeviceClock,
}

async fn rig(ui: ScriptedCallUi) -> Rig {
    let device = SilenceDevice::new();
    let clock = device.clock();
    let signaling = RecordingSignaling::new();

    let phone = PhoneCalls::builder()
        .device(HardwareDevice::Silence(device))
        .signaling(signaling.clone())
        .native_ui(ui.clone())
        .build();
    let events = phone.take_events().unwrap();
    phone.initialize(Credentials::new("test-token")).await.unwrap();

    Rig {
        phone,
        events,
        signaling,
        ui,
        clock,
    }
}

impl Rig {
    /// Wartet bis die Control-Queue alles Eingereihte abgearbeitet hat
    async fn settle(&self) {
        self.phone.snapshot().await.unwrap();
    }

    async fn emit(&self, event: SignalingEvent) {
        assert!(self.signaling.emit(event));
        self.settle().await;
    }

    fn pending(&mut self) -> Vec<HostEvent> {
        self.events.drain()
    }

    fn pending_states(&mut self) -> Vec<CallStatus> {
        self.pending().iter().filter_map(HostEvent::state).collect()
    }

    async fn place_call(&self) {
        let started = self
            .phone
            .make_call("+15551234567", "call-1", None)
            .await
            .unwrap();
        assert!(started);
    }
}

#[tokio::test]
async fn test_ringing_then_connected() {
    let mut rig = rig(ScriptedCallUi::approving()).await;

    rig.place_call().await;
    rig.emit(SignalingEvent::Ringing).await;
    rig.emit(SignalingEvent::Connected).await;

    assert_eq!(
        rig.pending_states(),
        vec![CallStatus::Connecting, CallStatus::Ringing, CallStatus::Active]
    );

    let snapshot = rig.phone.snapshot().await.unwrap();
    assert_eq!(snapshot.state, CallState::Active);
    assert_eq!(snapshot.call_id.as_deref(), Some("call-1"));
    assert!(snapshot.connected_at.is_some());
}

#[tokio::test]
async fn test_audio_only_after_active() {
    let mut rig = rig(ScriptedCallUi::approving()).await;

    rig.place_call().await;
    assert!(!rig.clock.capture(&[3u8; BLOCK]));

    rig.emit(SignalingEvent::Connected).await;
    assert!(rig.clock.capture(&[3u8; BLOCK]));

    let events = rig.pending();
    let first_audio = events
        .iter()
        .position(|e| matches!(e, HostEvent::AudioData(_)))
        .unwrap();
    let active = events
        .iter()
        .position(|e| e.state() == Some(CallStatus::Active))
        .unwrap();
    assert!(active < first_audio);
}

#[tokio::test]
async fn test_capture_block_forwarded_and_teed() {
    let mut rig = rig(ScriptedCallUi::approving()).await;
    rig.place_call().await;
    rig.emit(SignalingEvent::Connected).await;
    rig.pending();

    let block: Vec<u8> = (0..BLOCK).map(|i| (i % 199) as u8).collect();
    assert!(rig.clock.capture(&block));

    let mut sent = vec![0u8; BLOCK];
    assert_eq!(rig.signaling.pull_local(&mut sent), Some(BLOCK));
    assert_eq!(sent, block);

    let events = rig.pending();
    assert_eq!(events.len(), 1);
    match &events[0] {
        HostEvent::AudioData(frame) => {
            assert_eq!(frame.channel(), AudioChannel::Local);
            assert_eq!(frame.bytes(), &block[..]);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_remote_audio_rendered_and_teed() {
    let mut rig = rig(ScriptedCallUi::approving()).await;
    rig.place_call().await;
    rig.emit(SignalingEvent::Connected).await;
    rig.pending();

    assert_eq!(rig.signaling.push_remote(&[11u8; BLOCK]), Some(BLOCK));
    let mut out = vec![0u8; BLOCK];
    assert!(rig.clock.render(&mut out));
    assert!(out.iter().all(|&b| b == 11));

    let events = rig.pending();
    assert!(matches!(
        &events[..],
        [HostEvent::AudioData(frame)] if frame.channel() == AudioChannel::Remote
    ));
    assert_eq!(events[0].to_json()["channel"], 2);
}

#[tokio::test]
async fn test_mute_round_trip_keeps_call() {
    let mut rig = rig(ScriptedCallUi::approving()).await;
    rig.place_call().await;
    rig.emit(SignalingEvent::Connected).await;
    rig.pending();

    rig.phone.toggle_mute(true).await.unwrap();
    assert!(rig.clock.capture(&[1u8; BLOCK]));
    assert!(rig.pending().is_empty());
    assert_eq!(rig.signaling.muted(), Some(true));

    rig.phone.toggle_mute(false).await.unwrap();
    assert!(rig.clock.capture(&[1u8; BLOCK]));
    let events = rig.pending();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], HostEvent::AudioData(_)));

    assert_eq!(rig.phone.snapshot().await.unwrap().state, CallState::Active);
    assert_eq!(rig.signaling.connect_count(), 1);
}

#[tokio::test]
async fn test_token_refresh_during_active_call() {
    let mut rig = rig(ScriptedCallUi::approving()).await;
    rig.place_call().await;
    rig.emit(SignalingEvent::Connected).await;
    rig.pending();

    rig.phone
        .initialize(Credentials::new("refreshed-token"))
        .await
        .unwrap();

    assert_eq!(rig.phone.snapshot().await.unwrap().state, CallState::Active);
    assert!(rig.clock.is_running());
    assert!(rig.clock.capture(&[5u8; BLOCK]));
    assert!(rig.pending_states().is_empty());
}

#[tokio::test]
async fn test_end_call_twice_single_terminal_event() {
    let mut rig = rig(ScriptedCallUi::approving()).await;
    rig.place_call().await;
    rig.emit(SignalingEvent::Connected).await;
    rig.pending();

    rig.phone.end_call().await.unwrap();
    rig.phone.end_call().await.unwrap();

    assert_eq!(rig.pending_states(), vec![CallStatus::Ended]);
    assert_eq!(rig.signaling.disconnect_count(), 1);
    assert_eq!(rig.phone.snapshot().await.unwrap().state, CallState::Idle);
}

#[tokio::test]
async fn test_end_call_when_idle_is_noop() {
    let mut rig = rig(ScriptedCallUi::approving()).await;
    rig.phone.end_call().await.unwrap();
    assert!(rig.pending().is_empty());
}

#[tokio::test]
async fn test_native_ui_rejection() {
    let mut rig = rig(ScriptedCallUi::rejecting("user declined")).await;

    let started = rig
        .phone
        .make_call("+15551234567", "call-1", Some("Alex"))
        .await
        .unwrap();
    assert!(!started);

    assert_eq!(rig.pending_states(), vec![CallStatus::Failed]);
    assert_eq!(rig.signaling.connect_count(), 0);
    assert_eq!(rig.ui.requests()[0].display_name.as_deref(), Some("Alex"));
}

#[tokio::test]
async fn test_stale_events_do_not_touch_next_call() {
    let mut rig = rig(ScriptedCallUi::approving()).await;
    rig.place_call().await;
    let old_sink = rig.signaling.sink().unwrap();
    rig.phone.end_call().await.unwrap();
    rig.pending();

    rig.place_call().await;
    old_sink.emit(SignalingEvent::Connected);
    old_sink.emit(SignalingEvent::Disconnected { error: None });
    rig.settle().await;

    assert_eq!(rig.pending_states(), vec![CallStatus::Connecting]);
    assert_eq!(
        rig.phone.snapshot().await.unwrap().state,
        CallState::Connecting
    );

    rig.emit(SignalingEvent::Connected).await;
    assert_eq!(rig.pending_states(), vec![CallStatus::Active]);
}

#[tokio::test]
async fn test_previous_call_audio_not_delivered_in_next_call() {
    let mut rig = rig(ScriptedCallUi::approving()).await;
    rig.place_call().await;
    rig.emit(SignalingEvent::Connected).await;
    assert!(rig.clock.capture(&[0xA1; BLOCK]));
    rig.phone.end_call().await.unwrap();

    let started = rig
        .phone
        .make_call("+15557654321", "call-2", None)
        .await
        .unwrap();
    assert!(started);
    rig.emit(SignalingEvent::Connected).await;
    assert!(rig.clock.capture(&[0xB2; BLOCK]));

    let order: Vec<String> = rig
        .pending()
        .iter()
        .map(|event| match event {
            HostEvent::CallStateChanged(state) => state.to_string(),
            HostEvent::AudioData(frame) => format!("audio:{:#x}", frame.bytes()[0]),
        })
        .collect();
    assert_eq!(
        order,
        vec!["connecting", "active", "ended", "connecting", "active", "audio:0xb2"]
    );
    assert_eq!(rig.events.stale_dropped(), 1);
}

#[tokio::test]
async fn test_make_call_while_busy() {
    let rig = rig(ScriptedCallUi::approving()).await;
    rig.place_call().await;

    let err = rig
        .phone
        .make_call("+15550000000", "call-2", None)
        .await
        .unwrap_err();
    assert!(matches!(err, CallEngineError::AlreadyInCall));
}

#[tokio::test]
async fn test_make_call_before_initialize() {
    let phone = PhoneCalls::builder()
        .device(HardwareDevice::Silence(SilenceDevice::new()))
        .signaling(RecordingSignaling::new())
        .native_ui(ScriptedCallUi::approving())
        .build();

    let err = phone.make_call("+1555", "call-1", None).await.unwrap_err();
    assert!(matches!(err, CallEngineError::NotInitialized));
}

#[tokio::test]
async fn test_speaker_toggle() {
    let rig = rig(ScriptedCallUi::approving()).await;
    rig.phone.toggle_speaker(true).await.unwrap();
    assert!(rig.phone.snapshot().await.unwrap().is_speaker_on);
}

#[tokio::test]
async fn test_shutdown_stops_engine() {
    let mut rig = rig(ScriptedCallUi::approving()).await;
    rig.place_call().await;
    rig.emit(SignalingEvent::Connected).await;

    let control_events = rig.phone.take_events();
    assert!(control_events.is_none());

    rig.phone.shutdown().await.unwrap();
    let states: Vec<_> = rig.events.drain().iter().filter_map(HostEvent::state).collect();
    assert_eq!(states.last(), Some(&CallStatus::Ended));
    assert!(!rig.clock.is_running());
}

#[tokio::test]
async fn test_event_stream_waits_for_next_event() {
    let mut rig = rig(ScriptedCallUi::approving()).await;
    rig.place_call().await;

    let event = tokio::time::timeout(Duration::from_secs(1), rig.events.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event.to_json(),
        serde_json::json!({"type": "callStateChanged", "state": "connecting"})
    );
}

// ============================================================================
// Bridge without call
// ============================================================================

#[test]
fn test_render_without_call_is_exact_silence() {
    let (_emitter, tap, _events) = event_channel(4, 4, BLOCK);
    let mut bridge = AudioHardwareBridge::new(HardwareDevice::Silence(SilenceDevice::new()), tap);
    bridge.initialize().unwrap();

    for size in [BLOCK, 960, 17] {
        let mut out = vec![0x7Fu8; size];
        bridge.hooks().render(&mut out);
        assert_eq!(out.len(), size);
        assert!(out.iter().all(|&b| b == 0));
    }
}

#[test]
fn test_bridge_recovers_after_failed_initialize() {
    let device = SilenceDevice::new().failing_at(ConfigurationStep::InstallCallbacks);
    let faults = device.fault_injector();
    let clock = device.clock();
    let (_emitter, tap, _events) = event_channel(4, 4, BLOCK);
    let mut bridge = AudioHardwareBridge::new(HardwareDevice::Silence(device), tap);

    let err = bridge.initialize().unwrap_err();
    assert_eq!(err.step, ConfigurationStep::InstallCallbacks);
    assert!(!clock.is_running());

    faults.clear();
    bridge.initialize().unwrap();
    assert!(bridge.is_running());
    assert!(clock.is_running());
}
