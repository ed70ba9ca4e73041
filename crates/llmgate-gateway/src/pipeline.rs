//! Asynchronous event pipeline.
//!
//! The gateway hands ownership of each event to a bounded queue; a worker
//! task drains it FIFO through enrichment, durable storage, anomaly
//! analysis, and alerting. Per-queue FIFO gives causal ordering for any
//! single `request_id`; no cross-request ordering is promised.

use crate::alerts::AlertEmitter;
use crate::anomaly::AnomalyDetector;
use crate::processor;
use chrono::Utc;
use llmgate_core::config::{AnomalyConfig, OverflowPolicy, PipelineConfig};
use llmgate_core::{EventStore, GatewayEvent};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// EventQueue
// ---------------------------------------------------------------------------

/// Bounded FIFO queue with a configurable overflow policy.
pub struct EventQueue {
    inner: Mutex<VecDeque<GatewayEvent>>,
    /// Woken when an event is pushed.
    pushed: Notify,
    /// Woken when an event is popped (backpressure waiters).
    popped: Notify,
    capacity: usize,
    policy: OverflowPolicy,
    backpressure_deadline: Duration,
    dropped: AtomicU64,
}

impl EventQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy, backpressure_deadline: Duration) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            pushed: Notify::new(),
            popped: Notify::new(),
            capacity,
            policy,
            backpressure_deadline,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue an event.
    ///
    /// Non-blocking while the queue has room. When full, `drop_oldest`
    /// evicts the head; `backpressure` waits for space up to the short
    /// deadline and then drops the new event.
    pub async fn enqueue(&self, event: GatewayEvent) {
        let deadline = Instant::now() + self.backpressure_deadline;
        let mut event = Some(event);

        loop {
            {
                let mut queue = self.inner.lock().unwrap_or_else(|p| p.into_inner());
                if queue.len() < self.capacity {
                    queue.push_back(event.take().expect("event still pending"));
                    drop(queue);
                    self.pushed.notify_one();
                    return;
                }
                if self.policy == OverflowPolicy::DropOldest {
                    queue.pop_front();
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    queue.push_back(event.take().expect("event still pending"));
                    drop(queue);
                    self.pushed.notify_one();
                    warn!("Event queue full: dropped oldest event");
                    return;
                }
            }

            // Backpressure: wait for the worker to make room.
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero()
                || timeout(remaining, self.popped.notified()).await.is_err()
            {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Event queue full past backpressure deadline: dropped event");
                return;
            }
        }
    }

    fn pop(&self) -> Option<GatewayEvent> {
        let event = self
            .inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        if event.is_some() {
            self.popped.notify_one();
        }
        event
    }

    pub fn depth(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Events dropped by overflow handling since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// EventPipeline
// ---------------------------------------------------------------------------

/// Handle over the running pipeline: the enqueue side, the pattern-level
/// analysis entry point, and shutdown.
pub struct EventPipeline {
    queue: Arc<EventQueue>,
    store: Arc<dyn EventStore>,
    detector: Arc<AnomalyDetector>,
    alerts: Option<Arc<AlertEmitter>>,
    anomaly_config: AnomalyConfig,
    shutdown_tx: watch::Sender<bool>,
    drain_deadline: Duration,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl EventPipeline {
    /// Spawn the worker and return the handle.
    pub fn start(
        config: &PipelineConfig,
        anomaly_config: AnomalyConfig,
        store: Arc<dyn EventStore>,
        alerts: Option<Arc<AlertEmitter>>,
    ) -> Arc<Self> {
        let queue = Arc::new(EventQueue::new(
            config.queue_capacity,
            config.overflow,
            Duration::from_millis(config.backpressure_deadline_ms),
        ));
        let detector = Arc::new(AnomalyDetector::new(anomaly_config.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = tokio::spawn(worker_loop(
            Arc::clone(&queue),
            Arc::clone(&store),
            Arc::clone(&detector),
            alerts.clone(),
            anomaly_config.clone(),
            shutdown_rx,
        ));

        Arc::new(Self {
            queue,
            store,
            detector,
            alerts,
            anomaly_config,
            shutdown_tx,
            drain_deadline: Duration::from_secs(config.shutdown_drain_secs),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Hand an event to the pipeline.
    pub async fn emit(&self, event: GatewayEvent) {
        self.queue.enqueue(event).await;
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    pub fn dropped_events(&self) -> u64 {
        self.queue.dropped()
    }

    /// Run the pattern-level anomaly pass over the stored windows.
    pub async fn run_pattern_analysis(&self) {
        let now = Utc::now();
        let short_since =
            now - chrono::Duration::minutes(self.anomaly_config.pattern_window_minutes);
        let hourly_since = now - chrono::Duration::minutes(60);

        let short = match self.store.events_since(short_since).await {
            Ok(events) => events,
            Err(e) => {
                warn!("Pattern analysis: failed to load short window: {e}");
                return;
            }
        };
        let hourly = match self.store.events_since(hourly_since).await {
            Ok(events) => events,
            Err(e) => {
                warn!("Pattern analysis: failed to load hourly window: {e}");
                return;
            }
        };

        let anomalies = self.detector.analyze_patterns(&short, &hourly);
        for anomaly in &anomalies {
            if let Err(e) = self.store.insert_anomaly(anomaly).await {
                warn!("Failed to persist pattern anomaly: {e}");
            }
            if let Some(ref alerts) = self.alerts {
                alerts.emit(anomaly);
            }
        }
        if !anomalies.is_empty() {
            debug!(count = anomalies.len(), "Pattern analysis produced anomalies");
        }
    }

    /// Drain the queue within the bounded deadline, run a final pattern
    /// pass, and stop the worker. Aborts the worker if the deadline
    /// passes.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        // Wake a sleeping worker so it observes the flag.
        self.queue.pushed.notify_one();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = worker {
            match timeout(self.drain_deadline, handle).await {
                Ok(_) => debug!("Event pipeline drained"),
                Err(_) => {
                    warn!(
                        "Event pipeline drain exceeded {}s: aborting",
                        self.drain_deadline.as_secs()
                    );
                }
            }
        }

        self.run_pattern_analysis().await;
    }
}

/// Worker: drain FIFO, process one event at a time.
async fn worker_loop(
    queue: Arc<EventQueue>,
    store: Arc<dyn EventStore>,
    detector: Arc<AnomalyDetector>,
    alerts: Option<Arc<AlertEmitter>>,
    anomaly_config: AnomalyConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        match queue.pop() {
            Some(event) => {
                process_one(&store, &detector, &alerts, &anomaly_config, event).await;
            }
            None => {
                if *shutdown_rx.borrow() {
                    break;
                }
                tokio::select! {
                    _ = queue.pushed.notified() => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
        }
    }
}

/// One event through the chain: enrich → store → anomaly scan → alerts.
/// Storage completes before anomaly analysis reports anything, so the
/// event is durable before the pipeline reports completion.
async fn process_one(
    store: &Arc<dyn EventStore>,
    detector: &Arc<AnomalyDetector>,
    alerts: &Option<Arc<AlertEmitter>>,
    anomaly_config: &AnomalyConfig,
    event: GatewayEvent,
) {
    let mut event = processor::enrich(event);

    // Per-model history for spike baselines, captured before this event
    // lands in the store.
    let since = Utc::now() - chrono::Duration::minutes(anomaly_config.spike_window_minutes);
    let history = match store.events_for_model_since(&event.model, since).await {
        Ok(events) => events,
        Err(e) => {
            warn!("Failed to load anomaly history: {e}");
            Vec::new()
        }
    };

    let anomalies = detector.analyze_event(&event, &history);

    // A critical anomaly (prompt injection and the like) escalates the
    // event's classification past what the flag score alone yields.
    if anomalies
        .iter()
        .any(|a| a.severity == llmgate_core::AnomalySeverity::Critical)
    {
        event.risk_level = llmgate_core::RiskLevel::Critical;
    }

    if let Err(e) = store.insert_event(&event).await {
        warn!(request_id = %event.request_id, "Failed to persist event: {e}");
    }

    for anomaly in &anomalies {
        if let Err(e) = store.insert_anomaly(anomaly).await {
            warn!("Failed to persist anomaly: {e}");
        }
        if let Some(alerts) = alerts {
            alerts.emit(anomaly);
        }
    }
}
