// aswarm-pheromone: Dual-path watcher
//
// One task consumes the control-plane lease stream; the fast-path callback
// feeds the same window from the listener's worker threads. Decisions are
// synchronous (the window is small); artifact writes are detached.

use crate::artifact::{spawn_artifact_write, SignalSource};
use crate::error::{PheromoneError, PheromoneResult};
use crate::quorum::{Decision, ElevationEngine, QuorumConfig};
use crate::signals::{parse_lease_signal, signal_from_fastpath, WitnessSignal};
use crate::window::SignalWindow;
use aswarm_control::{ControlPlane, LabelSelector, WatchEvent};
use aswarm_fastpath::ElevationCallback;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Label selector the watcher subscribes to
pub const SENTINEL_SELECTOR_KEY: &str = "app.kubernetes.io/component";
pub const SENTINEL_SELECTOR_VALUE: &str = "sentinel";

/// Sliding-window quorum aggregator over both transports
pub struct PheromoneWatcher {
    cp: Arc<dyn ControlPlane>,
    window: Arc<SignalWindow>,
    engine: Arc<ElevationEngine>,
}

impl PheromoneWatcher {
    pub fn new(cp: Arc<dyn ControlPlane>, config: QuorumConfig) -> Arc<Self> {
        Arc::new(Self {
            cp,
            window: Arc::new(SignalWindow::new()),
            engine: Arc::new(ElevationEngine::new(config)),
        })
    }

    pub fn window(&self) -> Arc<SignalWindow> {
        Arc::clone(&self.window)
    }

    /// Insert one signal and evaluate the elevation predicate
    ///
    /// Must run inside a tokio runtime context: elevation artifacts are
    /// written from detached tasks.
    pub fn handle_signal(&self, signal: WitnessSignal, source: SignalSource) -> Decision {
        let run_id = signal.run_id.clone();
        self.window.push(signal);

        let now = Utc::now();
        let stats = self
            .window
            .stats(self.engine.config().window_ms, run_id.as_deref(), now);
        let decision = self.engine.decide(stats.as_ref(), run_id.as_deref());

        if decision.elevated {
            if let Some(event) = &decision.event {
                info!(
                    elevation = true,
                    reason = decision.reason.as_str(),
                    source = source.as_str(),
                    witness_count = event.witness_count,
                    mean_score = format!("{:.3}", event.mean_score),
                    p95_score = format!("{:.3}", event.p95_score),
                    confidence = format!("{:.3}", event.confidence),
                    run_id = run_id.as_deref().unwrap_or(""),
                    decision_ts_server = %event.decision_ts.to_rfc3339(),
                    "quorum elevation"
                );
                spawn_artifact_write(Arc::clone(&self.cp), event.clone(), source);
            }
        } else {
            debug!(
                reason = decision.reason.as_str(),
                source = source.as_str(),
                run_id = run_id.as_deref().unwrap_or(""),
                "no elevation"
            );
        }

        decision
    }

    /// Callback for the fast-path listener's worker threads
    ///
    /// The server timestamp is assigned here, on receipt. The handle carries
    /// the runtime the artifact writes are spawned onto.
    pub fn fastpath_callback(
        self: &Arc<Self>,
        runtime: tokio::runtime::Handle,
    ) -> ElevationCallback {
        let watcher = Arc::clone(self);
        Arc::new(move |packet| {
            let Some(signal) = signal_from_fastpath(&packet, Utc::now()) else {
                debug!("fast-path packet without usable signal fields, ignored");
                return;
            };
            let _guard = runtime.enter();
            watcher.handle_signal(signal, SignalSource::FastPath);
        })
    }

    /// Consume the lease watch stream until shutdown
    ///
    /// Stream termination is the one error this component surfaces; the
    /// caller reconnects with backoff.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> PheromoneResult<()> {
        let selector =
            LabelSelector::new().with(SENTINEL_SELECTOR_KEY, SENTINEL_SELECTOR_VALUE);
        let mut events = self.cp.watch_leases(selector);
        info!(
            window_ms = self.engine.config().window_ms,
            quorum = self.engine.config().quorum_threshold,
            "pheromone watcher started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("pheromone watcher stopping");
                        return Ok(());
                    }
                }
                event = events.recv() => match event {
                    Some(WatchEvent::Added(record)) | Some(WatchEvent::Modified(record)) => {
                        if let Some(signal) = parse_lease_signal(&record) {
                            self.handle_signal(signal, SignalSource::Lease);
                        }
                    }
                    Some(WatchEvent::Deleted(_)) => {}
                    None => {
                        return Err(PheromoneError::WatchTerminated(
                            "lease watch stream closed".to_string(),
                        ));
                    }
                }
            }
        }
    }
}
