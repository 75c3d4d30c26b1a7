//! Metrics sink seam, per the design notes: the core only ever calls this
//! trait, never a concrete metrics backend. `custodyd` supplies a
//! Prometheus-backed implementation; tests and the CLI use [`NoopSink`].

/// A single named measurement the access resolver or orchestration layer
/// reports: a counter increment (`value = 1.0`) or a duration/size sample.
pub trait MetricsSink: Send + Sync {
    /// Record `value` under `event`. Implementations must not block the
    /// caller on I/O; a channel-backed or lock-free counter implementation
    /// is expected.
    fn record(&self, event: &str, value: f64);
}

/// A sink that discards every measurement. The default for [`crate::CustodyService::new`]
/// and for tests that don't care about metrics.
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn record(&self, _event: &str, _value: f64) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink(AtomicUsize);

    impl MetricsSink for CountingSink {
        fn record(&self, _event: &str, _value: f64) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_sink_does_not_panic() {
        let sink = NoopSink;
        sink.record("anything", 1.0);
    }

    #[test]
    fn counting_sink_counts() {
        let sink = CountingSink(AtomicUsize::new(0));
        sink.record("a", 1.0);
        sink.record("b", 2.0);
        assert_eq!(sink.0.load(Ordering::SeqCst), 2);
    }
}
