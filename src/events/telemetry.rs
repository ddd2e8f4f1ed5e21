//! Audio-Telemetrie - Tee der beiden Audio-Richtungen an den Host
//!
//! Läuft direkt im Audio-Callback. Deshalb:
//! - Payload-Puffer kommen aus einem vorab allokierten Pool
//! - Zustellung per `try_send`, bei vollem Kanal wird verworfen
//! - Ein gedroppter Frame gibt seinen Puffer an den Pool zurück
//! - Jeder Frame trägt die Call-Generation, in der er entstanden ist

use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

// ============================================================================
// AUDIO CHANNEL
// ============================================================================

/// Herkunft eines Telemetrie-Frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioChannel {
    /// Mikrofon (eigene Stimme)
    Local,
    /// Lautsprecher (Gegenstelle)
    Remote,
}

impl AudioChannel {
    /// Kanal-Nummer im Host-Event (1 = local, 2 = remote)
    pub fn wire_id(self) -> u8 {
        match self {
            AudioChannel::Local => 1,
            AudioChannel::Remote => 2,
        }
    }
}

// ============================================================================
// AUDIO FRAME
// ============================================================================

/// Kopie eines Audio-Blocks für den Host.
///
/// Der Puffer gehört dem [`FramePool`] und wandert beim Drop dorthin zurück.
#[derive(Debug)]
pub struct AudioFrame {
    channel: AudioChannel,
    generation: u64,
    payload: Vec<u8>,
    recycle: Option<Sender<Vec<u8>>>,
}

impl AudioFrame {
    /// Frame ohne Pool (z.B. für Tests oder Host-seitige Kopien)
    pub fn detached(channel: AudioChannel, payload: Vec<u8>) -> Self {
        Self {
            channel,
            generation: 0,
            payload,
            recycle: None,
        }
    }

    pub fn channel(&self) -> AudioChannel {
        self.channel
    }

    /// Call-Generation zum Zeitpunkt des Callbacks
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn bytes(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl Drop for AudioFrame {
    fn drop(&mut self) {
        if let Some(recycle) = self.recycle.take() {
            // Pool voll heißt: Puffer stammt nicht aus diesem Pool, einfach freigeben
            let _ = recycle.try_send(std::mem::take(&mut self.payload));
        }
    }
}

// ============================================================================
// FRAME POOL
// ============================================================================

/// Freiliste fester Größe für Telemetrie-Puffer
#[derive(Debug, Clone)]
pub struct FramePool {
    free_tx: Sender<Vec<u8>>,
    free_rx: Receiver<Vec<u8>>,
}

impl FramePool {
    /// Allokiert `frames` Puffer mit je `frame_bytes` Kapazität
    pub fn new(frames: usize, frame_bytes: usize) -> Self {
        let frames = frames.max(1);
        let (free_tx, free_rx) = bounded(frames);
        for _ in 0..frames {
            let _ = free_tx.try_send(Vec::with_capacity(frame_bytes));
        }

        Self { free_tx, free_rx }
    }

    /// Kopiert `bytes` in einen freien Puffer.
    ///
    /// `None` wenn alle Puffer noch beim Host liegen.
    pub fn acquire(&self, channel: AudioChannel, bytes: &[u8]) -> Option<AudioFrame> {
        let mut payload = self.free_rx.try_recv().ok()?;
        payload.clear();
        payload.extend_from_slice(bytes);

        Some(AudioFrame {
            channel,
            generation: 0,
            payload,
            recycle: Some(self.free_tx.clone()),
        })
    }

    /// Anzahl aktuell freier Puffer
    pub fn available(&self) -> usize {
        self.free_rx.len()
    }
}

// ============================================================================
// TELEMETRY TAP
// ============================================================================

/// Sendeseite der Audio-Telemetrie, wird vom Audio-Thread benutzt
#[derive(Debug, Clone)]
pub struct TelemetryTap {
    pool: FramePool,
    tx: mpsc::Sender<AudioFrame>,
    generation: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl TelemetryTap {
    /// `generation` wird vom [`EventEmitter`](super::EventEmitter) pro Call hochgezählt
    pub(crate) fn new(
        pool: FramePool,
        tx: mpsc::Sender<AudioFrame>,
        generation: Arc<AtomicU64>,
    ) -> Self {
        Self {
            pool,
            tx,
            generation,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Best-effort Zustellung einer Kopie von `bytes`.
    ///
    /// Blockiert nie. Gibt `false` zurück wenn der Frame verworfen wurde.
    pub fn tee(&self, channel: AudioChannel, bytes: &[u8]) -> bool {
        let Some(mut frame) = self.pool.acquire(channel, bytes) else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        frame.generation = self.generation.load(Ordering::Acquire);

        // Bei Full/Closed wird der Frame hier gedroppt und recycelt
        if self.tx.try_send(frame).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// Anzahl verworfener Frames seit Start
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_ids() {
        assert_eq!(AudioChannel::Local.wire_id(), 1);
        assert_eq!(AudioChannel::Remote.wire_id(), 2);
    }

    #[test]
    fn test_pool_recycles_on_drop() {
        let pool = FramePool::new(2, 16);
        assert_eq!(pool.available(), 2);

        let frame = pool.acquire(AudioChannel::Local, &[1, 2, 3]).unwrap();
        assert_eq!(frame.bytes(), &[1, 2, 3]);
        assert_eq!(pool.available(), 1);

        drop(frame);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_pool_exhaustion() {
        let pool = FramePool::new(1, 4);
        let held = pool.acquire(AudioChannel::Remote, &[9; 4]).unwrap();

        assert!(pool.acquire(AudioChannel::Remote, &[9; 4]).is_none());

        drop(held);
        assert!(pool.acquire(AudioChannel::Remote, &[9; 4]).is_some());
    }

    #[test]
    fn test_recycled_buffer_is_overwritten() {
        let pool = FramePool::new(1, 8);
        drop(pool.acquire(AudioChannel::Local, &[7; 8]).unwrap());

        let frame = pool.acquire(AudioChannel::Local, &[1, 2]).unwrap();
        assert_eq!(frame.bytes(), &[1, 2]);
    }

    #[test]
    fn test_tap_drops_when_queue_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let tap = TelemetryTap::new(FramePool::new(4, 8), tx, Arc::default());

        assert!(tap.tee(AudioChannel::Local, &[1; 8]));
        assert!(!tap.tee(AudioChannel::Local, &[2; 8]));
        assert_eq!(tap.dropped(), 1);

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.bytes(), &[1; 8]);
        assert_eq!(frame.channel(), AudioChannel::Local);
    }

    #[test]
    fn test_tap_drops_when_pool_empty() {
        let (tx, mut rx) = mpsc::channel(8);
        let tap = TelemetryTap::new(FramePool::new(1, 8), tx, Arc::default());

        assert!(tap.tee(AudioChannel::Remote, &[1; 8]));
        // Host hält den ersten Frame noch
        let held = rx.try_recv().unwrap();
        assert!(!tap.tee(AudioChannel::Remote, &[2; 8]));
        assert_eq!(tap.dropped(), 1);

        drop(held);
        assert!(tap.tee(AudioChannel::Remote, &[3; 8]));
    }

    #[test]
    fn test_tap_with_closed_receiver() {
        let (tx, rx) = mpsc::channel(4);
        let pool = FramePool::new(2, 8);
        let tap = TelemetryTap::new(pool.clone(), tx, Arc::default());
        drop(rx);

        assert!(!tap.tee(AudioChannel::Local, &[1; 8]));
        // Puffer ist trotzdem zurück im Pool
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_tap_stamps_current_generation() {
        let (tx, mut rx) = mpsc::channel(4);
        let generation = Arc::new(AtomicU64::new(0));
        let tap = TelemetryTap::new(FramePool::new(4, 8), tx, generation.clone());

        assert!(tap.tee(AudioChannel::Local, &[1; 8]));
        generation.store(3, Ordering::Release);
        assert!(tap.tee(AudioChannel::Local, &[2; 8]));

        assert_eq!(rx.try_recv().unwrap().generation(), 0);
        assert_eq!(rx.try_recv().unwrap().generation(), 3);
    }
}
