//! Paced concurrent telemetry dispatch.
//!
//! Runs a fixed number of send iterations. Within one iteration every live
//! session's send runs as its own task, so fleet-wide latency is bounded by
//! the slowest single send rather than the sum; between iterations the
//! scheduler sleeps to pace load against the hub. A failed send is recorded
//! and never stops the other sends in the batch.

use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::DispatchPlan;
use crate::pool::Session;
use crate::shutdown::ShutdownSignal;

/// One send that did not complete, with the offending device and cause.
#[derive(Debug, Clone, Serialize)]
pub struct SendFailure {
    pub device_id: String,
    pub reason: String,
}

/// Aggregated dispatch results across all iterations.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub iterations_run: u32,
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<SendFailure>,
    /// True when a shutdown signal aborted remaining iterations.
    pub cancelled: bool,
}

/// Runs the send loop over a set of live sessions.
pub struct DispatchScheduler {
    plan: DispatchPlan,
}

impl DispatchScheduler {
    pub fn new(plan: DispatchPlan) -> Self {
        Self { plan }
    }

    /// Runs `iteration_count` iterations of "send one message per session".
    ///
    /// All sends of an iteration are submitted before the pacing delay
    /// starts. With `await_sends` unset, outcomes are collected
    /// concurrently with the delay (best-effort pacing); set it to await
    /// every send before the delay. After the final iteration the drain
    /// delay gives in-flight sends a chance to land before teardown; this
    /// is a tunable grace period, not a delivery guarantee.
    pub async fn run(&self, sessions: &[Session], shutdown: &ShutdownSignal) -> DispatchReport {
        let mut report = DispatchReport::default();

        for iteration in 0..self.plan.iteration_count {
            if shutdown.is_cancelled() {
                report.cancelled = true;
                break;
            }

            info!(iteration, sessions = sessions.len(), "send iteration starting");
            let tasks = submit_sends(sessions);
            report.attempted += tasks.len();
            report.iterations_run += 1;

            let last = iteration + 1 == self.plan.iteration_count;
            let delay = if last {
                Duration::ZERO
            } else {
                self.plan.inter_iteration_delay
            };

            let cancelled = if self.plan.await_sends {
                collect_outcomes(tasks, &mut report).await;
                shutdown.sleep(delay).await
            } else {
                let (cancelled, ()) =
                    tokio::join!(shutdown.sleep(delay), collect_outcomes(tasks, &mut report));
                cancelled
            };

            if cancelled {
                report.cancelled = true;
                break;
            }
        }

        if !report.cancelled && !sessions.is_empty() {
            info!(drain_delay = ?self.plan.drain_delay, "draining in-flight sends");
            shutdown.sleep(self.plan.drain_delay).await;
        }

        info!(
            iterations = report.iterations_run,
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failures.len(),
            "dispatch complete"
        );
        report
    }
}

type SendTask = (String, JoinHandle<Result<(), String>>);

/// Spawns one send task per session; payload carries the device id.
fn submit_sends(sessions: &[Session]) -> Vec<SendTask> {
    sessions
        .iter()
        .map(|session| {
            let session = session.clone();
            let device_id = session.device_id().to_string();
            let task = tokio::spawn(async move {
                let payload = Bytes::copy_from_slice(session.device_id().as_bytes());
                match session.send(payload).await {
                    Ok(()) => {
                        info!(device_id = %session.device_id(), "sent message");
                        Ok(())
                    }
                    Err(error) => {
                        warn!(device_id = %session.device_id(), %error, "send failed");
                        Err(error.to_string())
                    }
                }
            });
            (device_id, task)
        })
        .collect()
}

async fn collect_outcomes(tasks: Vec<SendTask>, report: &mut DispatchReport) {
    let (device_ids, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
    let results = futures::future::join_all(handles).await;

    for (device_id, result) in device_ids.into_iter().zip(results) {
        match result {
            Ok(Ok(())) => report.succeeded += 1,
            Ok(Err(reason)) => report.failures.push(SendFailure { device_id, reason }),
            Err(join_error) => report.failures.push(SendFailure {
                device_id,
                reason: format!("send task aborted: {join_error}"),
            }),
        }
    }
}

#[cfg(test)]
mod dispatch_tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::config::PoolingPolicy;
    use crate::pool::ConnectionPool;
    use crate::provision::{FleetMember, ProvisionOutcome};
    use crate::registry::DeviceIdentity;
    use crate::shutdown::shutdown_channel;
    use crate::transport::{HubConnection, HubTransport, PoolKey, TransportError};

    struct CountingConnection {
        key: PoolKey,
        sends: Arc<AtomicUsize>,
        failing_devices: Arc<HashSet<String>>,
    }

    #[async_trait]
    impl HubConnection for CountingConnection {
        async fn send(&self, device_id: &str, payload: Bytes) -> Result<(), TransportError> {
            assert_eq!(payload, Bytes::copy_from_slice(device_id.as_bytes()));
            self.sends.fetch_add(1, Ordering::SeqCst);
            if self.failing_devices.contains(device_id) {
                return Err(TransportError::SendFailed {
                    device_id: device_id.to_string(),
                    reason: "injected".to_string(),
                });
            }
            Ok(())
        }

        fn pool_key(&self) -> PoolKey {
            self.key
        }
    }

    struct CountingTransport {
        sends: Arc<AtomicUsize>,
        failing_devices: Arc<HashSet<String>>,
    }

    #[async_trait]
    impl HubTransport for CountingTransport {
        async fn connect(
            &self,
            _host: &str,
            key: PoolKey,
        ) -> Result<Arc<dyn HubConnection>, TransportError> {
            Ok(Arc::new(CountingConnection {
                key,
                sends: self.sends.clone(),
                failing_devices: self.failing_devices.clone(),
            }))
        }

        async fn attach_session(
            &self,
            _connection: &Arc<dyn HubConnection>,
            _identity: &DeviceIdentity,
        ) -> Result<(), TransportError> {
            Ok(())
        }
    }

    async fn sessions_with(
        count: usize,
        failing: &[&str],
    ) -> (Vec<crate::pool::Session>, Arc<AtomicUsize>) {
        let sends = Arc::new(AtomicUsize::new(0));
        let transport = Arc::new(CountingTransport {
            sends: sends.clone(),
            failing_devices: Arc::new(failing.iter().map(|s| s.to_string()).collect()),
        });
        let members: Vec<FleetMember> = (0..count)
            .map(|i| {
                let id = format!("dev{i}");
                FleetMember {
                    id: id.clone(),
                    identity: Some(DeviceIdentity {
                        id,
                        primary_key: "key".to_string(),
                        etag: "etag".to_string(),
                    }),
                    outcome: ProvisionOutcome::Created,
                }
            })
            .collect();
        let mut pool = ConnectionPool::new(
            transport,
            "hub.local".to_string(),
            PoolingPolicy {
                enabled: true,
                max_pool_size: 2,
            },
        );
        let (sessions, failures) = pool.open_sessions(&members).await;
        assert!(failures.is_empty());
        (sessions, sends)
    }

    fn fast_plan(iterations: u32, await_sends: bool) -> DispatchPlan {
        DispatchPlan {
            iteration_count: iterations,
            inter_iteration_delay: Duration::from_millis(1),
            await_sends,
            drain_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_attempts_equal_iterations_times_sessions() {
        let (sessions, sends) = sessions_with(4, &[]).await;
        let scheduler = DispatchScheduler::new(fast_plan(3, true));

        let report = scheduler.run(&sessions, &ShutdownSignal::none()).await;
        assert_eq!(report.iterations_run, 3);
        assert_eq!(report.attempted, 12);
        assert_eq!(report.succeeded, 12);
        assert!(report.failures.is_empty());
        assert_eq!(sends.load(Ordering::SeqCst), 12);
    }

    #[tokio::test]
    async fn test_send_failure_does_not_reduce_other_attempts() {
        let (sessions, sends) = sessions_with(3, &["dev1"]).await;
        let scheduler = DispatchScheduler::new(fast_plan(2, true));

        let report = scheduler.run(&sessions, &ShutdownSignal::none()).await;
        assert_eq!(report.attempted, 6);
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().all(|f| f.device_id == "dev1"));
        assert_eq!(sends.load(Ordering::SeqCst), 6, "all sends still attempted");
    }

    #[tokio::test]
    async fn test_best_effort_mode_still_counts_outcomes() {
        let (sessions, _) = sessions_with(2, &[]).await;
        let scheduler = DispatchScheduler::new(fast_plan(2, false));

        let report = scheduler.run(&sessions, &ShutdownSignal::none()).await;
        assert_eq!(report.attempted, 4);
        assert_eq!(report.succeeded, 4);
    }

    #[tokio::test]
    async fn test_no_sessions_no_attempts() {
        let scheduler = DispatchScheduler::new(fast_plan(5, true));
        let report = scheduler.run(&[], &ShutdownSignal::none()).await;
        assert_eq!(report.attempted, 0);
        assert_eq!(report.iterations_run, 5);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_remaining_iterations() {
        let (sessions, _) = sessions_with(2, &[]).await;
        let plan = DispatchPlan {
            iteration_count: 1000,
            inter_iteration_delay: Duration::from_secs(60),
            await_sends: true,
            drain_delay: Duration::from_secs(60),
        };
        let scheduler = DispatchScheduler::new(plan);
        let (handle, signal) = shutdown_channel();

        let run = tokio::spawn(async move { scheduler.run(&sessions, &signal).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown();

        let report = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("dispatch did not stop on shutdown")
            .unwrap();
        assert!(report.cancelled);
        assert!(report.iterations_run < 1000);
    }
}
