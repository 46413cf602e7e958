//! Metrics server (spec.md §6): a small `warp`-based HTTP endpoint both the
//! agent and the controller-manager expose.

use std::net::IpAddr;
use std::sync::Arc;

use prometheus::{Encoder, Gauge, Registry, TextEncoder};
use tracing::{debug, instrument};
use warp::Filter;

const PING: &str = "hostlet metrics server";

/// Process info + heartbeat gauges every binary in this workspace registers
/// (spec.md §6 "Prometheus-style metrics endpoint").
pub struct Metrics {
    registry: Registry,
    pub info: Gauge,
    pub heartbeat: Gauge,
}

impl Metrics {
    /// `component` is e.g. `"host-agent"` or `"controller-manager"`, folded
    /// into the info gauge's help text so a shared Grafana dashboard can
    /// tell the two apart.
    pub fn new(component: &str, version: &str) -> anyhow::Result<Arc<Self>> {
        let registry = Registry::new();

        let info = Gauge::new(
            "hostlet_info",
            format!("Build info for {component} {version}, always 1"),
        )?;
        info.set(1.0);
        registry.register(Box::new(info.clone()))?;

        let heartbeat = Gauge::new(
            "hostlet_last_heartbeat_timestamp_seconds",
            "Unix timestamp of the most recent successful reconcile loop",
        )?;
        registry.register(Box::new(heartbeat.clone()))?;

        Ok(Arc::new(Self {
            registry,
            info,
            heartbeat,
        }))
    }

    fn gather(&self) -> String {
        let families = self.registry.gather();
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buf)
            .expect("prometheus text encoding never fails for in-memory gauges");
        String::from_utf8(buf).expect("prometheus encoder emits UTF-8")
    }
}

/// Serves `/healthz` and `/metrics` on `addr:port` until the process exits.
#[instrument(level = "info", skip(metrics))]
pub async fn start(metrics: Arc<Metrics>, addr: IpAddr, port: u16) -> anyhow::Result<()> {
    let health = warp::get().and(warp::path("healthz")).map(|| PING);
    let ping = warp::get().and(warp::path::end()).map(|| PING);

    let metrics_route = warp::get().and(warp::path("metrics")).map(move || {
        debug!("serving metrics scrape");
        metrics.gather()
    });

    let routes = ping.or(health).or(metrics_route);
    warp::serve(routes).run((addr, port)).await;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn metrics_registers_without_name_collision() {
        let metrics = Metrics::new("host-agent", "0.1.0").unwrap();
        metrics.heartbeat.set(42.0);
        let text = metrics.gather();
        assert!(text.contains("hostlet_info"));
        assert!(text.contains("hostlet_last_heartbeat_timestamp_seconds 42"));
    }
}
