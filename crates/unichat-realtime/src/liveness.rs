//! Liveness probing
//!
//! Periodically writes an `IsAlive` heartbeat to every registered connection
//! and evicts the ones that do not answer within the probe timeout. Probes
//! run concurrently, bounded by `max_concurrent_probes`, against a snapshot
//! of the registry; nothing is removed until every probe in the sweep has
//! finished.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::envelope::HEARTBEAT_FRAME;
use crate::handle::CloseReason;
use crate::registry::{ConnectionRegistry, SweepVerdict};

/// Where the probe currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SweepPhase {
    Idle = 0,
    Probing = 1,
    Evaluating = 2,
}

impl SweepPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => SweepPhase::Probing,
            2 => SweepPhase::Evaluating,
            _ => SweepPhase::Idle,
        }
    }
}

/// Summary of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub probed: usize,
    pub alive: usize,
    pub evicted: usize,
    /// Another sweep was already running, so this one did nothing
    pub skipped: bool,
}

/// Returns the phase to `Idle` when a sweep ends, including when its future
/// is dropped mid-probe.
struct PhaseReset<'a>(&'a AtomicU8);

impl Drop for PhaseReset<'_> {
    fn drop(&mut self) {
        self.0.store(SweepPhase::Idle as u8, Ordering::Release);
    }
}

pub struct LivenessProbe {
    registry: Arc<ConnectionRegistry>,
    probe_timeout: Duration,
    max_concurrent: usize,
    phase: AtomicU8,
}

impl LivenessProbe {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        let config = registry.config();
        let probe_timeout = config.probe_timeout;
        let max_concurrent = config.max_concurrent_probes;
        Self {
            registry,
            probe_timeout,
            max_concurrent,
            phase: AtomicU8::new(SweepPhase::Idle as u8),
        }
    }

    pub fn phase(&self) -> SweepPhase {
        SweepPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Probe every registered connection once and evict the dead ones.
    ///
    /// Overlapping calls are skipped rather than queued.
    pub async fn sweep_once(&self) -> SweepReport {
        if self
            .phase
            .compare_exchange(
                SweepPhase::Idle as u8,
                SweepPhase::Probing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            debug!("Liveness sweep already in progress, skipping");
            return SweepReport {
                skipped: true,
                ..SweepReport::default()
            };
        }
        let _idle_on_exit = PhaseReset(&self.phase);

        let timeout = self.probe_timeout;
        let verdicts = self
            .registry
            .inspect(self.max_concurrent, |handle| async move {
                let outcome = handle.probe(HEARTBEAT_FRAME, timeout).await;
                if outcome.is_alive() {
                    SweepVerdict::Keep
                } else {
                    debug!(
                        connection_id = %handle.id(),
                        key = %handle.key(),
                        ?outcome,
                        "Connection failed liveness probe"
                    );
                    SweepVerdict::Evict(CloseReason::Dead)
                }
            })
            .await;

        self.phase
            .store(SweepPhase::Evaluating as u8, Ordering::Release);

        let probed = verdicts.len();
        let alive = verdicts
            .iter()
            .filter(|(_, verdict)| *verdict == SweepVerdict::Keep)
            .count();
        let evicted = self.registry.apply_verdicts(verdicts).await;

        SweepReport {
            probed,
            alive,
            evicted,
            skipped: false,
        }
    }

    /// Sweep every `interval` until `shutdown` resolves.
    ///
    /// The first sweep runs one full interval after start.
    pub async fn run<F>(self: Arc<Self>, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval = ?interval, "Liveness probe started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let report = self.sweep_once().await;
                    if report.evicted > 0 {
                        info!(
                            probed = report.probed,
                            evicted = report.evicted,
                            "Evicted unresponsive connections"
                        );
                    } else {
                        debug!(probed = report.probed, "Liveness sweep complete");
                    }
                }
            }
        }
        info!("Liveness probe stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RealtimeConfig;
    use crate::ids::{EntityScope, UserId};
    use crate::testing::mock_pair;

    fn fast_registry() -> Arc<ConnectionRegistry> {
        let config = RealtimeConfig::builder()
            .probe_timeout(Duration::from_millis(30))
            .unwrap()
            .close_timeout(Duration::from_millis(50))
            .unwrap()
            .build();
        Arc::new(ConnectionRegistry::new(config))
    }

    #[tokio::test]
    async fn test_sweep_of_empty_registry() {
        let probe = LivenessProbe::new(fast_registry());
        let report = probe.sweep_once().await;
        assert_eq!(report, SweepReport::default());
        assert_eq!(probe.phase(), SweepPhase::Idle);
    }

    #[tokio::test]
    async fn test_sweep_evicts_silent_peer_and_keeps_live_one() {
        let registry = fast_registry();

        let (live, live_peer) = mock_pair();
        live_peer.auto_reply();
        registry
            .register("Conversation", EntityScope::None, UserId::new(1), live)
            .await
            .unwrap();

        let (silent, _silent_peer) = mock_pair();
        let silent_handle = registry
            .register("Conversation", EntityScope::None, UserId::new(2), silent)
            .await
            .unwrap();

        let report = LivenessProbe::new(Arc::clone(&registry)).sweep_once().await;

        assert_eq!(report.probed, 2);
        assert_eq!(report.alive, 1);
        assert_eq!(report.evicted, 1);
        assert_eq!(silent_handle.close_reason(), Some(CloseReason::Dead));
        assert!(registry.contains("Conversation", EntityScope::None, UserId::new(1)));
    }

    #[tokio::test]
    async fn test_cancelled_sweep_does_not_block_later_sweeps() {
        let config = RealtimeConfig::builder()
            .probe_timeout(Duration::from_secs(5))
            .unwrap()
            .build();
        let registry = Arc::new(ConnectionRegistry::new(config));
        let (silent, _silent_peer) = mock_pair();
        registry
            .register("Conversation", EntityScope::None, UserId::new(1), silent)
            .await
            .unwrap();

        let probe = LivenessProbe::new(registry);
        let cancelled = tokio::time::timeout(Duration::from_millis(20), probe.sweep_once()).await;
        assert!(cancelled.is_err());
        assert_eq!(probe.phase(), SweepPhase::Idle);

        let next = tokio::time::timeout(Duration::from_millis(20), probe.sweep_once()).await;
        assert!(next.is_err(), "second sweep should start probing, not skip");
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let probe = Arc::new(LivenessProbe::new(fast_registry()));
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let task = tokio::spawn(Arc::clone(&probe).run(Duration::from_millis(10), async move {
            let _ = stop_rx.await;
        }));
        tokio::time::sleep(Duration::from_millis(35)).await;
        stop_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(probe.phase(), SweepPhase::Idle);
    }
}
