//! Partial failure isolation across stages.
//!
//! One device's failure at any stage must never stop the rest of the
//! fleet, and cleanup stays best-effort.

use std::sync::Arc;
use std::time::Duration;

use flotilla_core::{
    DispatchPlan, FleetConfig, FlotillaConfig, HubConfig, Orchestrator, PoolingPolicy,
};
use flotilla_sim::{InMemoryRegistry, SimulatedTransport};

fn config(fleet_size: u32, max_pool_size: u32) -> FlotillaConfig {
    FlotillaConfig {
        fleet: FleetConfig {
            id_prefix: "dev".to_string(),
            fleet_size,
        },
        pooling: PoolingPolicy {
            enabled: true,
            max_pool_size,
        },
        dispatch: DispatchPlan {
            iteration_count: 2,
            inter_iteration_delay: Duration::from_millis(1),
            await_sends: true,
            drain_delay: Duration::from_millis(1),
        },
        hub: HubConfig::default(),
    }
}

#[tokio::test]
async fn test_send_failure_does_not_starve_other_devices() {
    let registry = Arc::new(InMemoryRegistry::new());
    let transport = Arc::new(SimulatedTransport::builder().fail_send_for("dev1").build());
    let orchestrator = Orchestrator::new(config(4, 2), registry, transport.clone()).unwrap();

    let report = orchestrator.run().await;

    // 2 iterations x 4 sessions attempted; dev1's sends fail, rest land.
    assert_eq!(report.dispatch.attempted, 8);
    assert_eq!(report.dispatch.succeeded, 6);
    assert_eq!(report.dispatch.failures.len(), 2);
    assert!(report.dispatch.failures.iter().all(|f| f.device_id == "dev1"));
    for id in ["dev0", "dev2", "dev3"] {
        assert_eq!(transport.messages_for(id), 2);
    }
}

#[tokio::test]
async fn test_connection_failure_excludes_only_its_members() {
    let registry = Arc::new(InMemoryRegistry::new());
    // Pool key 1 hosts members 2 and 3 with max_pool_size = 2.
    let transport = Arc::new(SimulatedTransport::builder().fail_connect_key(1).build());
    let orchestrator =
        Orchestrator::new(config(6, 2), registry.clone(), transport.clone()).unwrap();

    let report = orchestrator.run().await;

    assert_eq!(report.sessions_opened, 4);
    assert_eq!(report.session_failures.len(), 2);
    let failed_ids: Vec<&str> = report
        .session_failures
        .iter()
        .map(|f| f.device_id.as_str())
        .collect();
    assert_eq!(failed_ids, vec!["dev2", "dev3"]);

    // Members without sessions still get torn down; they exist in the registry.
    assert_eq!(report.teardown.identities_deleted, 6);
    assert_eq!(registry.device_count(), 0);
}

#[tokio::test]
async fn test_failed_delete_batch_leaves_rest_attempted() {
    let registry = Arc::new(
        InMemoryRegistry::builder()
            .fail_delete_batch(0)
            .build(),
    );
    let transport = Arc::new(SimulatedTransport::new());
    let mut cfg = config(150, 50);
    cfg.dispatch.iteration_count = 1;
    let orchestrator = Orchestrator::new(cfg, registry.clone(), transport).unwrap();

    let report = orchestrator.run().await;

    assert_eq!(report.teardown.batches_attempted, 2);
    assert_eq!(report.teardown.batches_failed, 1);
    assert_eq!(report.teardown.identities_deleted, 50);
    // The failed first batch of 100 stays registered.
    assert_eq!(registry.device_count(), 100);
}

#[tokio::test]
async fn test_provisioning_failure_flows_through_whole_run() {
    let registry = Arc::new(
        InMemoryRegistry::builder()
            .fail_create_for("dev0")
            .build(),
    );
    let transport = Arc::new(SimulatedTransport::new());
    let orchestrator =
        Orchestrator::new(config(3, 2), registry.clone(), transport.clone()).unwrap();

    let report = orchestrator.run().await;

    assert_eq!(report.provision.failed, 1);
    assert_eq!(report.sessions_opened, 2);
    assert_eq!(report.dispatch.attempted, 4);
    assert_eq!(transport.messages_for("dev0"), 0);
    // dev0 never existed in the registry, so only two identities to delete.
    assert_eq!(report.teardown.identities_deleted, 2);
}
