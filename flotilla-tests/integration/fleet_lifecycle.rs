//! Full lifecycle test: provision, pool, dispatch, teardown.

use std::sync::Arc;
use std::time::Duration;

use flotilla_core::{
    DispatchPlan, FleetConfig, FlotillaConfig, HubConfig, Orchestrator, PoolingPolicy,
    shutdown_channel,
};
use flotilla_sim::{InMemoryRegistry, SimulatedTransport};

fn test_config(fleet_size: u32, pooling_enabled: bool, max_pool_size: u32) -> FlotillaConfig {
    FlotillaConfig {
        fleet: FleetConfig {
            id_prefix: "tdevice".to_string(),
            fleet_size,
        },
        pooling: PoolingPolicy {
            enabled: pooling_enabled,
            max_pool_size,
        },
        dispatch: DispatchPlan {
            iteration_count: 3,
            inter_iteration_delay: Duration::from_millis(1),
            await_sends: true,
            drain_delay: Duration::from_millis(1),
        },
        hub: HubConfig::default(),
    }
}

#[tokio::test]
async fn test_full_run_delivers_all_messages_and_cleans_up() {
    let registry = Arc::new(InMemoryRegistry::new());
    let transport = Arc::new(SimulatedTransport::new());
    let orchestrator =
        Orchestrator::new(test_config(10, true, 2), registry.clone(), transport.clone()).unwrap();

    let report = orchestrator.run().await;

    assert_eq!(report.provision.created, 10);
    assert_eq!(report.sessions_opened, 10);
    assert!(report.session_failures.is_empty());

    // 3 iterations x 10 sessions, all delivered
    assert_eq!(report.dispatch.attempted, 30);
    assert_eq!(report.dispatch.succeeded, 30);
    assert_eq!(transport.total_messages(), 30);
    for i in 0..10 {
        assert_eq!(transport.messages_for(&format!("tdevice{i}")), 3);
    }

    // Pool of 2 across 10 devices: 5 physical connections
    assert_eq!(transport.connections_opened(), 5);

    // Fleet fully deregistered in one batch
    assert_eq!(report.teardown.batches_attempted, 1);
    assert_eq!(report.teardown.identities_deleted, 10);
    assert_eq!(registry.device_count(), 0);
}

#[tokio::test]
async fn test_three_devices_pool_of_two_use_two_connections() {
    let registry = Arc::new(InMemoryRegistry::new());
    let transport = Arc::new(SimulatedTransport::new());
    let orchestrator =
        Orchestrator::new(test_config(3, true, 2), registry, transport.clone()).unwrap();

    let report = orchestrator.run().await;
    assert_eq!(report.sessions_opened, 3);
    assert_eq!(transport.connections_opened(), 2);
}

#[tokio::test]
async fn test_pooling_disabled_dedicated_connections() {
    let registry = Arc::new(InMemoryRegistry::new());
    let transport = Arc::new(SimulatedTransport::new());
    let orchestrator =
        Orchestrator::new(test_config(4, false, 2), registry, transport.clone()).unwrap();

    let report = orchestrator.run().await;
    assert_eq!(report.sessions_opened, 4);
    assert_eq!(transport.connections_opened(), 4);
}

#[tokio::test]
async fn test_250_devices_tear_down_in_three_batches() {
    let registry = Arc::new(InMemoryRegistry::new());
    let transport = Arc::new(SimulatedTransport::new());
    let mut config = test_config(250, true, 50);
    config.dispatch.iteration_count = 1;
    let orchestrator = Orchestrator::new(config, registry.clone(), transport).unwrap();

    let report = orchestrator.run().await;
    assert_eq!(report.provision.created, 250);
    assert_eq!(report.teardown.batches_attempted, 3);
    assert_eq!(report.teardown.identities_deleted, 250);

    let sizes: Vec<usize> = registry.delete_batches().iter().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![100, 100, 50]);
    assert_eq!(registry.device_count(), 0);
}

#[tokio::test]
async fn test_malformed_connection_string_halts_before_any_stage() {
    let registry = Arc::new(InMemoryRegistry::new());
    let transport = Arc::new(SimulatedTransport::new());
    let mut config = test_config(5, true, 2);
    config.hub.connection_string = "not a connection string".to_string();

    let result = Orchestrator::new(config, registry.clone(), transport);
    assert!(result.is_err());
    assert_eq!(registry.create_calls(), 0, "no stage ran");
}

#[tokio::test]
async fn test_shutdown_before_dispatch_still_tears_down() {
    let registry = Arc::new(InMemoryRegistry::new());
    let transport = Arc::new(SimulatedTransport::new());
    let orchestrator =
        Orchestrator::new(test_config(5, true, 2), registry.clone(), transport.clone()).unwrap();

    let (handle, signal) = shutdown_channel();
    handle.shutdown();
    let report = orchestrator.run_with_shutdown(&signal).await;

    assert!(report.dispatch.cancelled);
    assert_eq!(report.dispatch.attempted, 0);
    assert_eq!(transport.total_messages(), 0);
    // Provisioned identities are still cleaned up.
    assert_eq!(report.teardown.identities_deleted, 5);
    assert_eq!(registry.device_count(), 0);
}

#[tokio::test]
async fn test_best_effort_pacing_still_delivers() {
    let registry = Arc::new(InMemoryRegistry::new());
    let transport = Arc::new(
        SimulatedTransport::builder()
            .with_send_latency(Duration::from_millis(1))
            .build(),
    );
    let mut config = test_config(6, true, 3);
    config.dispatch.await_sends = false;
    config.dispatch.inter_iteration_delay = Duration::from_millis(5);
    config.dispatch.drain_delay = Duration::from_millis(20);
    let orchestrator = Orchestrator::new(config, registry, transport.clone()).unwrap();

    let report = orchestrator.run().await;
    assert_eq!(report.dispatch.attempted, 18);
    assert_eq!(report.dispatch.succeeded, 18);
    assert_eq!(transport.total_messages(), 18);
}

#[tokio::test]
async fn test_zero_fleet_runs_to_completion() {
    let registry = Arc::new(InMemoryRegistry::new());
    let transport = Arc::new(SimulatedTransport::new());
    let orchestrator =
        Orchestrator::new(test_config(0, true, 2), registry, transport.clone()).unwrap();

    let report = orchestrator.run().await;
    assert_eq!(report.provision.created, 0);
    assert_eq!(report.sessions_opened, 0);
    assert_eq!(report.dispatch.attempted, 0);
    assert_eq!(report.teardown.batches_attempted, 0);
    assert_eq!(transport.connections_opened(), 0);
}
