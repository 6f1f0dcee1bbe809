// THEORY:
// The `telemetry` module fans blob reports out to any number of consumers (a
// network sender, a logger, an overlay) without coupling them to the detection
// loop. It is a thin broadcast bus: the producer never blocks, and a consumer
// that falls behind skips the reports it missed rather than slowing detection.

use crate::pipeline::BlobReport;
use tokio::sync::broadcast;

/// Reports buffered per subscriber before the oldest are skipped.
pub const DEFAULT_BUS_CAPACITY: usize = 16;

#[derive(Clone)]
pub struct BlobBus {
    reports_tx: broadcast::Sender<BlobReport>,
}

impl BlobBus {
    pub fn new(capacity: usize) -> Self {
        let (reports_tx, _) = broadcast::channel::<BlobReport>(capacity.max(1));
        Self { reports_tx }
    }

    /// Sends a report to every current subscriber. Returns how many received it;
    /// with no subscribers the report is dropped.
    pub fn publish(&self, report: BlobReport) -> usize {
        match self.reports_tx.send(report) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::trace!("blob report dropped, no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BlobReport> {
        self.reports_tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.reports_tx.receiver_count()
    }
}

impl Default for BlobBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    fn report(frame_no: u64) -> BlobReport {
        BlobReport {
            frame_no,
            ..BlobReport::default()
        }
    }

    #[tokio::test]
    async fn every_subscriber_sees_each_report() {
        let bus = BlobBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        assert_eq!(bus.publish(report(7)), 2);
        assert_eq!(first.recv().await.expect("report").frame_no, 7);
        assert_eq!(second.recv().await.expect("report").frame_no, 7);
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_harmless() {
        let bus = BlobBus::new(4);
        assert_eq!(bus.publish(report(1)), 0);
        let mut late = bus.subscribe();
        bus.publish(report(2));
        assert_eq!(late.recv().await.expect("report").frame_no, 2);
    }

    #[tokio::test]
    async fn slow_subscribers_skip_old_reports() {
        let bus = BlobBus::new(2);
        let mut slow = bus.subscribe();
        for frame_no in 1..=5 {
            bus.publish(report(frame_no));
        }
        assert!(matches!(slow.recv().await, Err(RecvError::Lagged(3))));
        assert_eq!(slow.recv().await.expect("report").frame_no, 4);
    }
}
