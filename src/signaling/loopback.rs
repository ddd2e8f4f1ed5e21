//! Loopback-Signaling - Echo-Dienst ohne Netzwerk
//!
//! Simuliert einen Cloud-Call: klingelt, nimmt ab und schickt das lokale
//! Audio als Remote-Audio zurück. Für Demo und Desktop-Tests.

use super::client::{SignalingError, SignalingEventSink, VoiceSignalingClient};
use super::messages::{CallHandle, ConnectOptions, SignalingEvent};
use crate::call_engine::{AudioFormat, NetworkMediaPort};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Verhalten der Gegenstelle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopbackOutcome {
    /// Nimmt ab und spiegelt Audio
    Answer,
    /// Klingelt, dann `failedToConnect`
    FailToConnect(String),
    /// `connect()` schlägt sofort fehl
    RefuseConnect(String),
}

#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    pub ring_after: Duration,
    pub answer_after: Duration,
    /// Gegenstelle legt nach dieser Zeit auf
    pub hangup_after: Option<Duration>,
    pub outcome: LoopbackOutcome,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            ring_after: Duration::from_millis(300),
            answer_after: Duration::from_secs(1),
            hangup_after: None,
            outcome: LoopbackOutcome::Answer,
        }
    }
}

#[derive(Debug, Default)]
pub struct LoopbackSignaling {
    config: LoopbackConfig,
    muted: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl LoopbackSignaling {
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            config,
            muted: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }
}

impl VoiceSignalingClient for LoopbackSignaling {
    fn connect(
        &mut self,
        options: ConnectOptions,
        media: NetworkMediaPort,
        events: SignalingEventSink,
    ) -> Result<CallHandle, SignalingError> {
        if let LoopbackOutcome::RefuseConnect(reason) = &self.config.outcome {
            return Err(SignalingError::ConnectFailed(reason.clone()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SignalingError::ConnectFailed(e.to_string()))?;

        self.disconnect();
        self.muted.store(false, Ordering::Relaxed);

        tracing::info!(
            "Loopback call to {} (call id {})",
            options.to().unwrap_or("?"),
            options.call_id().unwrap_or("?")
        );

        let config = self.config.clone();
        let muted = Arc::clone(&self.muted);
        self.task = Some(runtime.spawn(run_loopback(config, media, events, muted)));

        Ok(CallHandle::new(format!("LB{}", options.uuid.simple())))
    }

    fn disconnect(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("Loopback call disconnected");
        }
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }
}

impl Drop for LoopbackSignaling {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn run_loopback(
    config: LoopbackConfig,
    mut media: NetworkMediaPort,
    events: SignalingEventSink,
    muted: Arc<AtomicBool>,
) {
    tokio::time::sleep(config.ring_after).await;
    events.emit(SignalingEvent::Ringing);
    tokio::time::sleep(config.answer_after).await;

    if let LoopbackOutcome::FailToConnect(reason) = config.outcome {
        events.emit(SignalingEvent::FailedToConnect {
            error: SignalingError::ConnectFailed(reason),
        });
        return;
    }
    events.emit(SignalingEvent::Connected);

    let format = AudioFormat::VOICE;
    let hangup_at = config.hangup_after.map(|after| Instant::now() + after);
    let mut block = vec![0u8; format.block_bytes()];
    let mut ticker = tokio::time::interval(format.block_duration());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        if hangup_at.is_some_and(|at| Instant::now() >= at) {
            events.emit(SignalingEvent::Disconnected { error: None });
            return;
        }

        // Echo: lokales Audio kommt als Remote zurück
        while media.local_available() >= block.len() {
            media.pull_local(&mut block);
            if muted.load(Ordering::Relaxed) {
                block.fill(0);
            }
            media.push_remote(&block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_engine::{media_pair, CallCommand};
    use ringbuf::traits::{Consumer, Producer};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn next_event(rx: &mut mpsc::UnboundedReceiver<CallCommand>) -> Option<SignalingEvent> {
        match rx.try_recv().ok()? {
            CallCommand::Signaling { event, .. } => Some(event),
            _ => None,
        }
    }

    fn options(id: Uuid) -> ConnectOptions {
        ConnectOptions::new("token", "+15551234567", "call-1", id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_rings_answers_and_echoes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let (device, network) = media_pair(8192);
        let (mut inbound, mut outbound) = device.split();

        let mut client = LoopbackSignaling::default();
        let handle = client
            .connect(options(id), network, SignalingEventSink::new(id, tx))
            .unwrap();
        assert!(handle.sid.starts_with("LB"));

        tokio::time::sleep(Duration::from_millis(1400)).await;
        assert_eq!(next_event(&mut rx), Some(SignalingEvent::Ringing));
        assert_eq!(next_event(&mut rx), Some(SignalingEvent::Connected));

        let block = vec![42u8; 2048];
        outbound.push_slice(&block);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut echoed = vec![0u8; 2048];
        assert_eq!(inbound.pop_slice(&mut echoed), 2048);
        assert_eq!(echoed, block);

        client.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn test_muted_echo_is_silent() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let (device, network) = media_pair(8192);
        let (mut inbound, mut outbound) = device.split();

        let mut client = LoopbackSignaling::default();
        client
            .connect(options(id), network, SignalingEventSink::new(id, tx))
            .unwrap();
        client.set_muted(true);

        tokio::time::sleep(Duration::from_millis(1400)).await;
        outbound.push_slice(&[9u8; 2048]);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut echoed = vec![1u8; 2048];
        assert_eq!(inbound.pop_slice(&mut echoed), 2048);
        assert!(echoed.iter().all(|&b| b == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_to_connect_after_ringing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let (_device, network) = media_pair(64);

        let mut client = LoopbackSignaling::new(LoopbackConfig {
            outcome: LoopbackOutcome::FailToConnect("busy".into()),
            ..LoopbackConfig::default()
        });
        client
            .connect(options(id), network, SignalingEventSink::new(id, tx))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(next_event(&mut rx), Some(SignalingEvent::Ringing));
        assert_eq!(
            next_event(&mut rx),
            Some(SignalingEvent::FailedToConnect {
                error: SignalingError::ConnectFailed("busy".into())
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_hangup() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let (_device, network) = media_pair(64);

        let mut client = LoopbackSignaling::new(LoopbackConfig {
            hangup_after: Some(Duration::from_millis(500)),
            ..LoopbackConfig::default()
        });
        client
            .connect(options(id), network, SignalingEventSink::new(id, tx))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        let events: Vec<_> = std::iter::from_fn(|| next_event(&mut rx)).collect();
        assert_eq!(
            events,
            vec![
                SignalingEvent::Ringing,
                SignalingEvent::Connected,
                SignalingEvent::Disconnected { error: None }
            ]
        );
    }

    #[test]
    fn test_refuse_connect() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let (_device, network) = media_pair(64);

        let mut client = LoopbackSignaling::new(LoopbackConfig {
            outcome: LoopbackOutcome::RefuseConnect("no token".into()),
            ..LoopbackConfig::default()
        });
        let err = client
            .connect(options(id), network, SignalingEventSink::new(id, tx))
            .unwrap_err();
        assert_eq!(err, SignalingError::ConnectFailed("no token".into()));
    }
}
