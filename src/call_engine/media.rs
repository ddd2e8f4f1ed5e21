//! Media Ports - Audio zwischen Hardware-Bridge und Signaling-Client
//!
//! Zwei lock-freie SPSC Ring-Buffer (PCM16 LE Bytes):
//! - local:  Capture-Callback → Signaling-Client (ausgehend)
//! - remote: Signaling-Client → Render-Callback (eingehend)

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Erstellt ein verbundenes Port-Paar mit `capacity_bytes` pro Richtung
pub fn media_pair(capacity_bytes: usize) -> (DeviceMediaPort, NetworkMediaPort) {
    let capacity = capacity_bytes.max(1);
    let (local_prod, local_cons) = HeapRb::<u8>::new(capacity).split();
    let (remote_prod, remote_cons) = HeapRb::<u8>::new(capacity).split();

    (
        DeviceMediaPort {
            outbound: local_prod,
            inbound: remote_cons,
        },
        NetworkMediaPort {
            outbound: local_cons,
            inbound: remote_prod,
        },
    )
}

/// Hardware-Seite, wird beim Verbinden in die Bridge eingehängt
pub struct DeviceMediaPort {
    outbound: HeapProd<u8>,
    inbound: HeapCons<u8>,
}

impl DeviceMediaPort {
    /// Trennt in (Render-Quelle, Capture-Ziel)
    pub(crate) fn split(self) -> (HeapCons<u8>, HeapProd<u8>) {
        (self.inbound, self.outbound)
    }
}

impl std::fmt::Debug for DeviceMediaPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceMediaPort")
            .field("outbound_queued", &self.outbound.occupied_len())
            .field("inbound_queued", &self.inbound.occupied_len())
            .finish()
    }
}

/// Netzwerk-Seite, gehört dem Signaling-Client
pub struct NetworkMediaPort {
    outbound: HeapCons<u8>,
    inbound: HeapProd<u8>,
}

impl NetworkMediaPort {
    /// Liest aufgenommenes Mikrofon-Audio (zum Senden)
    pub fn pull_local(&mut self, buf: &mut [u8]) -> usize {
        self.outbound.pop_slice(buf)
    }

    /// Schreibt empfangenes Audio der Gegenstelle (zum Abspielen).
    ///
    /// Gibt die Anzahl übernommener Bytes zurück, der Rest wird verworfen.
    pub fn push_remote(&mut self, bytes: &[u8]) -> usize {
        self.inbound.push_slice(bytes)
    }

    /// Bytes die zum Senden bereitliegen
    pub fn local_available(&self) -> usize {
        self.outbound.occupied_len()
    }

    /// Freier Platz für eingehendes Audio
    pub fn remote_capacity(&self) -> usize {
        self.inbound.vacant_len()
    }
}

impl std::fmt::Debug for NetworkMediaPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMediaPort")
            .field("local_available", &self.local_available())
            .field("remote_capacity", &self.remote_capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_direction() {
        let (device, mut network) = media_pair(16);
        let (_inbound, mut outbound) = device.split();

        assert_eq!(outbound.push_slice(&[1, 2, 3, 4]), 4);
        assert_eq!(network.local_available(), 4);

        let mut buf = [0u8; 8];
        assert_eq!(network.pull_local(&mut buf), 4);
        assert_eq!(&buf[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_remote_direction_is_bounded() {
        let (device, mut network) = media_pair(4);
        let (mut inbound, _outbound) = device.split();

        assert_eq!(network.push_remote(&[5, 6, 7, 8, 9, 10]), 4);
        assert_eq!(network.remote_capacity(), 0);

        let mut buf = [0u8; 4];
        assert_eq!(inbound.pop_slice(&mut buf), 4);
        assert_eq!(buf, [5, 6, 7, 8]);
    }
}
