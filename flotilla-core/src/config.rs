//! Centralized configuration for Flotilla.
//!
//! All tunable parameters are defined here and passed explicitly into the
//! orchestrator at construction; there is no process-wide mutable state.

use std::time::Duration;

/// Central configuration for all Flotilla components.
///
/// Groups related settings into logical sections.
#[derive(Debug, Clone, Default)]
pub struct FlotillaConfig {
    pub fleet: FleetConfig,
    pub pooling: PoolingPolicy,
    pub dispatch: DispatchPlan,
    pub hub: HubConfig,
}

/// Fleet identity configuration.
///
/// Controls how many devices are simulated and how their registry ids
/// are derived (`id_prefix` + sequential index).
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Prefix for each device id
    pub id_prefix: String,
    /// Number of devices to simulate
    pub fleet_size: u32,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            id_prefix: "tdevice".to_string(),
            fleet_size: 1000,
        }
    }
}

/// Connection pooling (multiplexing) policy.
///
/// When enabled, consecutive devices share physical hub connections in
/// groups of `max_pool_size`; when disabled, every session gets a
/// dedicated connection.
#[derive(Debug, Clone)]
pub struct PoolingPolicy {
    /// Whether sessions share physical connections
    pub enabled: bool,
    /// Maximum sessions per physical connection when pooling is enabled
    pub max_pool_size: u32,
}

impl PoolingPolicy {
    /// Pool size with a zero value clamped to 1 so key assignment never divides by zero.
    pub fn effective_pool_size(&self) -> u32 {
        self.max_pool_size.max(1)
    }
}

impl Default for PoolingPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_pool_size: 2,
        }
    }
}

/// Telemetry dispatch schedule.
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    /// Number of send iterations
    pub iteration_count: u32,
    /// Delay between send iterations; paces load against the hub
    pub inter_iteration_delay: Duration,
    /// Await every send in an iteration before starting the pacing delay.
    ///
    /// When false, sends are collected concurrently with the delay. That is
    /// a deliberate best-effort semantic matching fire-and-continue load
    /// generation; enable for stricter test determinism.
    pub await_sends: bool,
    /// Wait after the last iteration so in-flight sends can complete
    /// before teardown. Best-effort, not a delivery guarantee.
    pub drain_delay: Duration,
}

impl Default for DispatchPlan {
    fn default() -> Self {
        Self {
            iteration_count: 10,
            inter_iteration_delay: Duration::from_secs(10),
            await_sends: false,
            drain_delay: Duration::from_secs(5),
        }
    }
}

/// Hub endpoint configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Owner connection string, `key=value;` delimited. The hub host name
    /// is extracted from the `HostName` entry.
    pub connection_string: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            connection_string:
                "HostName=sim.hub.local;SharedAccessKeyName=owner;SharedAccessKey=simulated"
                    .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_sections() {
        let config = FlotillaConfig::default();
        assert_eq!(config.fleet.id_prefix, "tdevice");
        assert!(config.pooling.enabled);
        assert_eq!(config.pooling.max_pool_size, 2);
        assert_eq!(config.dispatch.iteration_count, 10);
        assert_eq!(config.dispatch.drain_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_effective_pool_size_clamps_zero() {
        let policy = PoolingPolicy {
            enabled: true,
            max_pool_size: 0,
        };
        assert_eq!(policy.effective_pool_size(), 1);
    }
}
