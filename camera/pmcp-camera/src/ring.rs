use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use pmcp_types::Frame;

/// Bounded ring of recent frames for one camera.
///
/// Thread-safe; eviction is FIFO. A watch channel carries the newest seqno
/// so async consumers can wait without polling.
pub struct FrameRing {
    capacity: usize,
    inner: Mutex<VecDeque<Arc<Frame>>>,
    newest_tx: watch::Sender<u64>,
}

impl FrameRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        let (newest_tx, _) = watch::channel(0u64);
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            newest_tx,
        }
    }

    pub fn push(&self, frame: Arc<Frame>) {
        let seqno = frame.seqno;
        {
            let mut inner = self.inner.lock();
            if let Some(last) = inner.back() {
                debug_assert!(frame.seqno > last.seqno);
            }
            if inner.len() == self.capacity {
                inner.pop_front();
            }
            inner.push_back(frame);
        }
        self.newest_tx.send_replace(seqno);
    }

    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.inner.lock().back().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Wait until a frame with seqno greater than `since_seqno` exists, or
    /// `timeout` elapses.
    pub async fn wait_for_new(&self, since_seqno: u64, timeout: Duration) -> Option<Arc<Frame>> {
        let mut rx = self.newest_tx.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if *rx.borrow_and_update() > since_seqno {
                // The newest frame may have advanced past the ring's oldest
                // retained entry; latest() is what callers want anyway.
                return self.latest();
            }
            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => continue,
                // Sender dropped or timeout.
                Ok(Err(_)) | Err(_) => return None,
            }
        }
    }

    /// Up to `n` retained frames, evenly spaced by position, oldest first.
    pub fn sampled(&self, n: usize) -> Vec<Arc<Frame>> {
        let inner = self.inner.lock();
        if n == 0 || inner.is_empty() {
            return Vec::new();
        }
        if inner.len() <= n {
            return inner.iter().cloned().collect();
        }
        let step = (inner.len() - 1) as f64 / (n - 1).max(1) as f64;
        (0..n)
            .map(|i| {
                let idx = (i as f64 * step).round() as usize;
                inner[idx.min(inner.len() - 1)].clone()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;
    use pmcp_types::CameraId;

    fn frame(seqno: u64) -> Arc<Frame> {
        Arc::new(Frame::new(
            CameraId::new("t"),
            seqno,
            Utc::now(),
            8,
            8,
            Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]),
        ))
    }

    #[test]
    fn fifo_eviction_at_capacity() {
        let ring = FrameRing::new(3);
        for s in 1..=5 {
            ring.push(frame(s));
        }
        assert_eq!(ring.len(), 3);
        let sampled = ring.sampled(3);
        assert_eq!(
            sampled.iter().map(|f| f.seqno).collect::<Vec<_>>(),
            vec![3, 4, 5]
        );
        assert_eq!(ring.latest().unwrap().seqno, 5);
    }

    #[test]
    fn sampled_is_evenly_spaced() {
        let ring = FrameRing::new(10);
        for s in 1..=10 {
            ring.push(frame(s));
        }
        let sampled = ring.sampled(4);
        assert_eq!(
            sampled.iter().map(|f| f.seqno).collect::<Vec<_>>(),
            vec![1, 4, 7, 10]
        );
        // Requesting more than retained returns everything.
        assert_eq!(ring.sampled(50).len(), 10);
    }

    #[tokio::test]
    async fn wait_for_new_sees_later_push() {
        let ring = Arc::new(FrameRing::new(4));
        ring.push(frame(1));

        let waiter = {
            let ring = ring.clone();
            tokio::spawn(async move { ring.wait_for_new(1, Duration::from_secs(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        ring.push(frame(2));

        let got = waiter.await.unwrap().expect("frame");
        assert_eq!(got.seqno, 2);
    }

    #[tokio::test]
    async fn wait_for_new_times_out() {
        let ring = FrameRing::new(4);
        ring.push(frame(1));
        let got = ring.wait_for_new(1, Duration::from_millis(50)).await;
        assert!(got.is_none());
    }
}
