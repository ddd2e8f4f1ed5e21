//! Event Channel - Call-Events und Audio-Telemetrie zum Host
//!
//! Zwei Wege mit unterschiedlicher Garantie:
//! - State-Events: unbounded, geordnet, gehen nie verloren
//! - Audio-Frames: bounded, best-effort (siehe [`telemetry`])
//!
//! Der [`EventStream`] liest State-Events immer zuerst. Audio-Frames eines
//! beendeten oder früheren Calls werden dort verworfen: jedes `connecting`
//! startet eine neue Call-Generation, die der [`TelemetryTap`] in jeden Frame
//! stempelt.

pub mod telemetry;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures::future::Either;
use futures::Stream;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub use telemetry::{AudioChannel, AudioFrame, FramePool, TelemetryTap};

// ============================================================================
// HOST EVENTS
// ============================================================================

/// Call-Status wie ihn der Host sieht
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Connecting,
    Ringing,
    Active,
    Ended,
    Failed,
}

impl CallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::Connecting => "connecting",
            CallStatus::Ringing => "ringing",
            CallStatus::Active => "active",
            CallStatus::Ended => "ended",
            CallStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CallStatus::Ended | CallStatus::Failed)
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events an die Host-Applikation
#[derive(Debug)]
pub enum HostEvent {
    CallStateChanged(CallStatus),
    AudioData(AudioFrame),
}

impl HostEvent {
    /// Serialisiert das Event in das Format des Host-Event-Kanals
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            HostEvent::CallStateChanged(state) => serde_json::json!({
                "type": "callStateChanged",
                "state": state,
            }),
            HostEvent::AudioData(frame) => serde_json::json!({
                "type": "audioData",
                "data": BASE64.encode(frame.bytes()),
                "channel": frame.channel().wire_id(),
            }),
        }
    }

    pub fn state(&self) -> Option<CallStatus> {
        match self {
            HostEvent::CallStateChanged(state) => Some(*state),
            HostEvent::AudioData(_) => None,
        }
    }
}

// ============================================================================
// CHANNEL
// ============================================================================

/// Erstellt den Event-Kanal.
///
/// `pool_frames` Puffer à `frame_bytes` für die Telemetrie,
/// `queue_frames` Frames dürfen beim Host anstehen.
pub fn event_channel(
    pool_frames: usize,
    queue_frames: usize,
    frame_bytes: usize,
) -> (EventEmitter, TelemetryTap, EventStream) {
    let (state_tx, state_rx) = mpsc::unbounded_channel();
    let (audio_tx, audio_rx) = mpsc::channel(queue_frames.max(1));
    let generation = Arc::new(AtomicU64::new(0));

    let tap = TelemetryTap::new(
        FramePool::new(pool_frames, frame_bytes),
        audio_tx,
        generation.clone(),
    );

    (
        EventEmitter {
            tx: state_tx,
            generation,
        },
        tap,
        EventStream {
            state_rx,
            audio_rx,
            generation: 0,
            call_over: false,
            stale_dropped: 0,
        },
    )
}

/// State-Event mit der Call-Generation in der es entstanden ist
#[derive(Debug, Clone, Copy)]
struct StateChange {
    state: CallStatus,
    generation: u64,
}

/// Sendeseite für State-Events (nur die State Machine hält sie)
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<StateChange>,
    generation: Arc<AtomicU64>,
}

impl EventEmitter {
    pub fn emit(&self, state: CallStatus) {
        tracing::info!("Call state changed: {}", state);

        // Hochzählen vor dem Senden: Frames danach gehören zum neuen Call
        let generation = if state == CallStatus::Connecting {
            self.generation.fetch_add(1, Ordering::AcqRel) + 1
        } else {
            self.generation.load(Ordering::Acquire)
        };

        if self.tx.send(StateChange { state, generation }).is_err() {
            tracing::debug!("No event listener, dropped state event {}", state);
        }
    }
}

/// Empfangsseite für den Host
#[derive(Debug)]
pub struct EventStream {
    state_rx: mpsc::UnboundedReceiver<StateChange>,
    audio_rx: mpsc::Receiver<AudioFrame>,
    /// Generation des zuletzt gelieferten State-Events
    generation: u64,
    call_over: bool,
    stale_dropped: u64,
}

impl EventStream {
    /// Wartet auf das nächste Event. `None` wenn beide Seiten geschlossen sind.
    pub async fn next(&mut self) -> Option<HostEvent> {
        loop {
            let received = tokio::select! {
                biased;
                Some(change) = self.state_rx.recv() => Either::Left(change),
                Some(frame) = self.audio_rx.recv() => Either::Right(frame),
                else => return None,
            };
            match received {
                Either::Left(change) => return Some(self.deliver_state(change)),
                Either::Right(frame) => {
                    if let Some(event) = self.deliver_frame(frame) {
                        return Some(event);
                    }
                }
            }
        }
    }

    /// Nicht-blockierende Variante von [`next`](Self::next)
    pub fn try_next(&mut self) -> Option<HostEvent> {
        if let Ok(change) = self.state_rx.try_recv() {
            return Some(self.deliver_state(change));
        }
        while let Ok(frame) = self.audio_rx.try_recv() {
            if let Some(event) = self.deliver_frame(frame) {
                return Some(event);
            }
        }
        None
    }

    /// Verworfene Frames beendeter Calls
    pub fn stale_dropped(&self) -> u64 {
        self.stale_dropped
    }

    fn deliver_state(&mut self, change: StateChange) -> HostEvent {
        self.generation = change.generation;
        self.call_over = change.state.is_terminal();
        HostEvent::CallStateChanged(change.state)
    }

    /// `None` wenn der Frame zu einem bereits beendeten Call gehört
    fn deliver_frame(&mut self, frame: AudioFrame) -> Option<HostEvent> {
        let stale = frame.generation() < self.generation
            || (frame.generation() == self.generation && self.call_over);
        if stale {
            self.stale_dropped += 1;
            return None;
        }
        Some(HostEvent::AudioData(frame))
    }

    /// Alle aktuell anstehenden Events
    pub fn drain(&mut self) -> Vec<HostEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    pub fn into_stream(self) -> impl Stream<Item = HostEvent> {
        futures::stream::unfold(self, |mut events| async move {
            events.next().await.map(|event| (event, events))
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_state_events_before_audio() {
        let (emitter, tap, mut events) = event_channel(4, 4, 8);

        assert!(tap.tee(AudioChannel::Local, &[1; 8]));
        emitter.emit(CallStatus::Active);

        let first = events.try_next().unwrap();
        assert_eq!(first.state(), Some(CallStatus::Active));
        assert!(matches!(events.try_next(), Some(HostEvent::AudioData(_))));
        assert!(events.try_next().is_none());
    }

    #[test]
    fn test_state_events_keep_order() {
        let (emitter, _tap, mut events) = event_channel(1, 1, 8);

        emitter.emit(CallStatus::Connecting);
        emitter.emit(CallStatus::Ringing);
        emitter.emit(CallStatus::Active);
        emitter.emit(CallStatus::Ended);

        let states: Vec<_> = events.drain().iter().filter_map(HostEvent::state).collect();
        assert_eq!(
            states,
            vec![
                CallStatus::Connecting,
                CallStatus::Ringing,
                CallStatus::Active,
                CallStatus::Ended
            ]
        );
    }

    #[test]
    fn test_previous_call_audio_dropped_after_new_call_starts() {
        let (emitter, tap, mut events) = event_channel(8, 8, 8);

        emitter.emit(CallStatus::Connecting);
        emitter.emit(CallStatus::Active);
        assert!(tap.tee(AudioChannel::Local, &[0xA1; 8]));
        emitter.emit(CallStatus::Ended);
        emitter.emit(CallStatus::Connecting);

        let delivered = events.drain();
        assert!(delivered.iter().all(|e| e.state().is_some()));
        assert_eq!(delivered.len(), 4);
        assert_eq!(events.stale_dropped(), 1);

        emitter.emit(CallStatus::Active);
        assert!(tap.tee(AudioChannel::Local, &[0xB2; 8]));
        let delivered = events.drain();
        assert_eq!(delivered[0].state(), Some(CallStatus::Active));
        match &delivered[1] {
            HostEvent::AudioData(frame) => assert_eq!(frame.bytes(), &[0xB2; 8]),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_no_audio_after_terminal_event() {
        let (emitter, tap, mut events) = event_channel(4, 4, 8);

        emitter.emit(CallStatus::Connecting);
        emitter.emit(CallStatus::Active);
        assert!(tap.tee(AudioChannel::Remote, &[1; 8]));
        emitter.emit(CallStatus::Failed);

        let states: Vec<_> = events.drain().iter().map(|e| e.state()).collect();
        assert_eq!(
            states,
            vec![
                Some(CallStatus::Connecting),
                Some(CallStatus::Active),
                Some(CallStatus::Failed)
            ]
        );
        assert_eq!(events.stale_dropped(), 1);
    }

    #[tokio::test]
    async fn test_next_skips_stale_frames() {
        let (emitter, tap, mut events) = event_channel(4, 4, 8);

        emitter.emit(CallStatus::Connecting);
        assert_eq!(events.next().await.unwrap().state(), Some(CallStatus::Connecting));
        assert!(tap.tee(AudioChannel::Local, &[1; 8]));
        emitter.emit(CallStatus::Ended);
        assert_eq!(events.next().await.unwrap().state(), Some(CallStatus::Ended));

        drop(emitter);
        drop(tap);
        assert!(events.next().await.is_none());
        assert_eq!(events.stale_dropped(), 1);
    }

    #[test]
    fn test_json_shape() {
        let event = HostEvent::CallStateChanged(CallStatus::Ringing);
        assert_eq!(
            event.to_json(),
            serde_json::json!({"type": "callStateChanged", "state": "ringing"})
        );

        let event = HostEvent::AudioData(AudioFrame::detached(AudioChannel::Remote, vec![0, 1, 2]));
        let json = event.to_json();
        assert_eq!(json["type"], "audioData");
        assert_eq!(json["channel"], 2);
        assert_eq!(json["data"], "AAEC");
    }

    #[tokio::test]
    async fn test_stream_ends_when_senders_dropped() {
        let (emitter, tap, events) = event_channel(2, 2, 8);

        emitter.emit(CallStatus::Failed);
        drop(emitter);
        drop(tap);

        let collected: Vec<_> = events.into_stream().collect().await;
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].state(), Some(CallStatus::Failed));
    }
}
