//! In-memory batching of telemetry points.
//!
//! [`TelemetryCache`] is the cheap, cloneable handle used on the request
//! path. [`CacheFlusher`] is the single background task that writes batches
//! to the sink. The buffer is swapped out under its lock, so a batch in
//! flight never blocks new points.

use crate::metrics_defs::{
    BATCHES_DROPPED, FLUSH_BATCH_SIZE, FLUSH_DURATION, FLUSH_FAILURES, POINTS_ENQUEUED,
};
use crate::point::TelemetryPoint;
use crate::sink::TelemetrySink;
use parking_lot::Mutex;
use shared::{counter, histogram};
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Full generations waiting for the flusher. Beyond this, new full
/// generations are dropped.
pub const MAX_PENDING_BATCHES: usize = 16;

#[derive(Debug)]
struct Buffer {
    points: Mutex<Vec<TelemetryPoint>>,
    capacity: usize,
}

impl Buffer {
    fn take(&self) -> Vec<TelemetryPoint> {
        mem::replace(&mut *self.points.lock(), Vec::with_capacity(self.capacity))
    }
}

#[derive(Clone, Copy, Debug)]
enum FlushTrigger {
    Size,
    Interval,
    Shutdown,
}

impl FlushTrigger {
    const fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Interval => "interval",
            FlushTrigger::Shutdown => "shutdown",
        }
    }
}

#[derive(Clone, Debug)]
pub struct TelemetryCache {
    buffer: Arc<Buffer>,
    full_tx: mpsc::Sender<Vec<TelemetryPoint>>,
}

impl TelemetryCache {
    /// Appends a point. When this fills the buffer, the whole generation is
    /// handed to the flusher before the lock is released, so the next point
    /// starts a new generation. Never waits on the flusher: if it is already
    /// [`MAX_PENDING_BATCHES`] generations behind, the full one is dropped.
    pub fn enqueue(&self, point: TelemetryPoint) {
        {
            let mut points = self.buffer.points.lock();
            points.push(point);
            if points.len() >= self.buffer.capacity {
                let batch = mem::replace(&mut *points, Vec::with_capacity(self.buffer.capacity));
                match self.full_tx.try_send(batch) {
                    Ok(()) => {}
                    Err(TrySendError::Full(batch)) => {
                        counter!(BATCHES_DROPPED).increment(1);
                        tracing::warn!(
                            points = batch.len(),
                            "Telemetry flusher is falling behind, dropping full batch"
                        );
                    }
                    Err(TrySendError::Closed(batch)) => {
                        counter!(BATCHES_DROPPED).increment(1);
                        tracing::warn!(
                            points = batch.len(),
                            "Telemetry flusher has stopped, dropping full batch"
                        );
                    }
                }
            }
        }
        counter!(POINTS_ENQUEUED).increment(1);
    }

    /// Points waiting in the current generation.
    pub fn pending(&self) -> usize {
        self.buffer.points.lock().len()
    }
}

pub struct CacheFlusher {
    buffer: Arc<Buffer>,
    full_rx: mpsc::Receiver<Vec<TelemetryPoint>>,
    sink: Arc<dyn TelemetrySink>,
    sync_interval: Duration,
}

impl CacheFlusher {
    /// `capacity` is clamped to at least one point.
    pub fn new(
        capacity: usize,
        sync_interval: Duration,
        sink: Arc<dyn TelemetrySink>,
    ) -> (Self, TelemetryCache) {
        let capacity = capacity.max(1);
        let buffer = Arc::new(Buffer {
            points: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        });
        let (full_tx, full_rx) = mpsc::channel(MAX_PENDING_BATCHES);

        let flusher = CacheFlusher {
            buffer: buffer.clone(),
            full_rx,
            sink,
            sync_interval,
        };
        (flusher, TelemetryCache { buffer, full_tx })
    }

    /// Runs until `shutdown` is cancelled, then writes whatever is left
    /// and returns.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        tracing::info!(
            capacity = self.buffer.capacity,
            sync_interval = ?self.sync_interval,
            "Telemetry flusher started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(batch) = self.full_rx.recv() => {
                    self.flush(batch, FlushTrigger::Size).await;
                }
                _ = ticker.tick() => {
                    let batch = self.buffer.take();
                    self.flush(batch, FlushTrigger::Interval).await;
                }
            }
        }

        // Generations already captured by the size trigger go out first
        let mut remaining = Vec::new();
        while let Ok(batch) = self.full_rx.try_recv() {
            remaining.extend(batch);
        }
        remaining.extend(self.buffer.take());
        self.flush(remaining, FlushTrigger::Shutdown).await;

        tracing::info!("Telemetry flusher stopped");
    }

    async fn flush(&self, batch: Vec<TelemetryPoint>, trigger: FlushTrigger) {
        if batch.is_empty() {
            return;
        }

        histogram!(FLUSH_BATCH_SIZE, "trigger" => trigger.as_str()).record(batch.len() as f64);
        let start = Instant::now();
        let result = self.sink.write(&batch).await;
        histogram!(FLUSH_DURATION).record(start.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                tracing::debug!(points = batch.len(), trigger = trigger.as_str(), "Flushed telemetry batch");
            }
            Err(e) => {
                counter!(FLUSH_FAILURES).increment(1);
                tracing::error!(
                    points = batch.len(),
                    trigger = trigger.as_str(),
                    error = %e,
                    "Failed to write telemetry batch, dropping it"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::RecordingSink;
    use std::time::UNIX_EPOCH;

    const LONG: Duration = Duration::from_secs(3600);

    fn point(n: usize) -> TelemetryPoint {
        TelemetryPoint::new("upgrade_request", UNIX_EPOCH)
            .with_tag("app_version", format!("1.0.{n}"))
            .with_field("value", 1)
    }

    fn versions(batch: &[TelemetryPoint]) -> Vec<String> {
        batch
            .iter()
            .map(|p| p.tag("app_version").unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_size_trigger_flushes_whole_generation() {
        let sink = Arc::new(RecordingSink::default());
        let (flusher, cache) = CacheFlusher::new(3, LONG, sink.clone());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(flusher.run(shutdown.clone()));

        for n in 0..3 {
            cache.enqueue(point(n));
        }
        // Starts the next generation
        cache.enqueue(point(3));
        assert_eq!(cache.pending(), 1);

        sink.wait_for_batches(1).await;
        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(versions(&batches[0]), ["1.0.0", "1.0.1", "1.0.2"]);

        shutdown.cancel();
        task.await.unwrap();
        let batches = sink.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(versions(&batches[1]), ["1.0.3"]);
    }

    #[tokio::test]
    async fn test_interval_trigger() {
        let sink = Arc::new(RecordingSink::default());
        let (flusher, cache) = CacheFlusher::new(100, Duration::from_millis(50), sink.clone());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(flusher.run(shutdown.clone()));

        cache.enqueue(point(0));
        cache.enqueue(point(1));
        sink.wait_for_batches(1).await;
        assert_eq!(versions(&sink.batches()[0]), ["1.0.0", "1.0.1"]);
        assert_eq!(cache.pending(), 0);

        // Empty intervals write nothing
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.batches().len(), 1);

        shutdown.cancel();
        task.await.unwrap();
        assert_eq!(sink.batches().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_remaining_once() {
        let sink = Arc::new(RecordingSink::default());
        let (flusher, cache) = CacheFlusher::new(10, LONG, sink.clone());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(flusher.run(shutdown.clone()));

        for n in 0..4 {
            cache.enqueue(point(n));
        }
        shutdown.cancel();
        task.await.unwrap();

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 4);
        assert_eq!(cache.pending(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_with_empty_buffer_writes_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let (flusher, _cache) = CacheFlusher::new(10, LONG, sink.clone());
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        flusher.run(shutdown).await;
        assert!(sink.batches().is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_drops_batch() {
        let sink = Arc::new(RecordingSink::failing());
        let (flusher, cache) = CacheFlusher::new(2, LONG, sink.clone());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(flusher.run(shutdown.clone()));

        cache.enqueue(point(0));
        cache.enqueue(point(1));
        sink.wait_for_batches(1).await;

        cache.enqueue(point(2));
        shutdown.cancel();
        task.await.unwrap();

        // The failed batch is not retried on shutdown
        let batches = sink.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(versions(&batches[1]), ["1.0.2"]);
    }

    #[tokio::test]
    async fn test_concurrent_enqueue_loses_nothing() {
        let sink = Arc::new(RecordingSink::default());
        // 200 points make fewer full generations than the queue holds
        let (flusher, cache) = CacheFlusher::new(20, LONG, sink.clone());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(flusher.run(shutdown.clone()));

        let mut handles = Vec::new();
        for worker in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for n in 0..25 {
                    cache.enqueue(point(worker * 100 + n));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        shutdown.cancel();
        task.await.unwrap();

        let batches = sink.batches();
        assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), 200);
        // Every batch but the last is a full generation
        for batch in &batches[..batches.len() - 1] {
            assert_eq!(batch.len(), 20);
        }
    }

    #[tokio::test]
    async fn test_stalled_sink_bounds_pending_batches() {
        let sink = Arc::new(RecordingSink::stalled());
        let (flusher, cache) = CacheFlusher::new(10, LONG, sink.clone());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(flusher.run(shutdown.clone()));

        // The first full generation reaches the sink and blocks there
        for n in 0..10 {
            cache.enqueue(point(n));
        }
        sink.wait_for_writes(1).await;

        for n in 10..10_000 {
            cache.enqueue(point(n));
        }
        assert_eq!(cache.pending(), 0);
        assert_eq!(cache.full_tx.capacity(), 0);

        sink.release();
        shutdown.cancel();
        task.await.unwrap();

        // The blocked generation plus whatever fit in the queue
        let written: usize = sink.batches().iter().map(Vec::len).sum();
        assert_eq!(written, (MAX_PENDING_BATCHES + 1) * 10);
    }

    #[test]
    fn test_capacity_is_at_least_one() {
        let (flusher, cache) = CacheFlusher::new(0, LONG, Arc::new(RecordingSink::default()));
        assert_eq!(flusher.buffer.capacity, 1);
        cache.enqueue(point(0));
        assert_eq!(cache.pending(), 0);
    }
}
