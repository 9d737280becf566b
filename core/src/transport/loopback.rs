// In-process radio medium
//
// `LoopbackAir` is the shared ether; each `LoopbackRadio` is one device on
// it. With no links configured everybody hears everybody. Once any link is
// added, only linked radios hear each other, which is enough to model a
// chain A - B - C where A and C are out of range.

use super::radio::{check_payload, RadioTransport, ScanObservation, TransportError};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const AIR_CAPACITY: usize = 1024;
const DEFAULT_RSSI: i16 = -60;

#[derive(Debug, Clone)]
struct Frame {
    from: String,
    payload: Vec<u8>,
}

#[derive(Clone)]
pub struct LoopbackAir {
    tx: broadcast::Sender<Frame>,
    links: Arc<RwLock<HashMap<String, HashSet<String>>>>,
}

impl Default for LoopbackAir {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackAir {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(AIR_CAPACITY);
        Self {
            tx,
            links: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Put `a` and `b` in range of each other
    pub fn link(&self, a: &str, b: &str) {
        let mut links = self.links.write();
        links.entry(a.to_string()).or_default().insert(b.to_string());
        links.entry(b.to_string()).or_default().insert(a.to_string());
    }

    /// Attach a radio with the given address
    pub fn radio(&self, address: &str) -> LoopbackRadio {
        LoopbackRadio {
            address: address.to_string(),
            air: self.clone(),
            repeats: 1,
            scan_task: Mutex::new(None),
            transmitted: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn in_range(&self, listener: &str, from: &str) -> bool {
        let links = self.links.read();
        if links.is_empty() {
            return true;
        }
        links
            .get(listener)
            .is_some_and(|neighbors| neighbors.contains(from))
    }

    fn transmit(&self, from: &str, payload: Vec<u8>) {
        // No subscribers just means nobody is scanning
        let _ = self.tx.send(Frame {
            from: from.to_string(),
            payload,
        });
    }
}

pub struct LoopbackRadio {
    address: String,
    air: LoopbackAir,
    repeats: usize,
    scan_task: Mutex<Option<JoinHandle<()>>>,
    transmitted: Arc<AtomicUsize>,
}

impl LoopbackRadio {
    /// Report every heard frame `repeats` times, like a scanner catching
    /// the same advertisement on several intervals
    pub fn with_repeats(mut self, repeats: usize) -> Self {
        self.repeats = repeats.max(1);
        self
    }

    /// Frames this radio has put on the air (presence and messages)
    pub fn transmitted(&self) -> usize {
        self.transmitted.load(Ordering::SeqCst)
    }

    fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        check_payload(&payload)?;
        self.transmitted.fetch_add(1, Ordering::SeqCst);
        self.air.transmit(&self.address, payload);
        Ok(())
    }
}

#[async_trait]
impl RadioTransport for LoopbackRadio {
    async fn start_scan(&self, sink: mpsc::Sender<ScanObservation>) -> Result<(), TransportError> {
        let mut rx = self.air.tx.subscribe();
        let air = self.air.clone();
        let address = self.address.clone();
        let repeats = self.repeats;

        let task = tokio::spawn(async move {
            loop {
                let frame = match rx.recv().await {
                    Ok(frame) => frame,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Radio {} missed {} frames", address, skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if frame.from == address || !air.in_range(&address, &frame.from) {
                    continue;
                }

                for _ in 0..repeats {
                    let observation = ScanObservation {
                        payload: frame.payload.clone(),
                        rssi: DEFAULT_RSSI,
                        source_address: frame.from.clone(),
                    };
                    if sink.send(observation).await.is_err() {
                        debug!("Scan sink for {} closed", address);
                        return;
                    }
                }
            }
        });

        if let Some(previous) = self.scan_task.lock().replace(task) {
            previous.abort();
        }
        debug!("Radio {} scanning", self.address);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        if let Some(task) = self.scan_task.lock().take() {
            task.abort();
            debug!("Radio {} stopped scanning", self.address);
        }
        Ok(())
    }

    async fn broadcast(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.send(payload)
    }

    async fn advertise_presence(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.send(payload)
    }
}

impl Drop for LoopbackRadio {
    fn drop(&mut self) {
        if let Some(task) = self.scan_task.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next(rx: &mut mpsc::Receiver<ScanObservation>) -> Option<ScanObservation> {
        timeout(Duration::from_millis(200), rx.recv()).await.ok().flatten()
    }

    #[tokio::test]
    async fn test_radio_does_not_hear_itself() {
        let air = LoopbackAir::new();
        let a = air.radio("a");
        let b = air.radio("b");
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        a.start_scan(tx_a).await.unwrap();
        b.start_scan(tx_b).await.unwrap();

        a.broadcast(b"AAAAAAAAAAAA:hi".to_vec()).await.unwrap();

        let heard = next(&mut rx_b).await.unwrap();
        assert_eq!(heard.payload, b"AAAAAAAAAAAA:hi");
        assert_eq!(heard.source_address, "a");
        assert!(next(&mut rx_a).await.is_none());
        assert_eq!(a.transmitted(), 1);
    }

    #[tokio::test]
    async fn test_links_limit_range() {
        let air = LoopbackAir::new();
        air.link("a", "b");
        air.link("b", "c");
        let a = air.radio("a");
        let c = air.radio("c");
        let (tx_c, mut rx_c) = mpsc::channel(8);
        c.start_scan(tx_c).await.unwrap();

        a.advertise_presence(b"AAAAAAAAAAAA".to_vec()).await.unwrap();
        assert!(next(&mut rx_c).await.is_none());
    }

    #[tokio::test]
    async fn test_repeats_and_stop_scan() {
        let air = LoopbackAir::new();
        let a = air.radio("a");
        let b = air.radio("b").with_repeats(3);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        b.start_scan(tx_b).await.unwrap();

        a.broadcast(b"x".to_vec()).await.unwrap();
        for _ in 0..3 {
            assert!(next(&mut rx_b).await.is_some());
        }
        assert!(next(&mut rx_b).await.is_none());

        b.stop_scan().await.unwrap();
        a.broadcast(b"y".to_vec()).await.unwrap();
        assert!(next(&mut rx_b).await.is_none());
    }

    #[tokio::test]
    async fn test_oversize_payload_rejected() {
        let air = LoopbackAir::new();
        let a = air.radio("a");
        let result = a.broadcast(vec![b'A'; 32]).await;
        assert!(matches!(result, Err(TransportError::PayloadTooLarge { .. })));
        assert_eq!(a.transmitted(), 0);
    }
}
