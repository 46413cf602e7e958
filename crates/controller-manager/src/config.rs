//! `controller-manager` CLI configuration (spec.md §6).

use clap::Parser;
use host_lifecycle::config::DEFAULT_METRICS_PORT;

#[derive(Parser, Clone, Debug)]
#[clap(name = "controller-manager", about = "Runs the host-lifecycle management-plane control loops")]
pub struct Opts {
    #[clap(
        long,
        env = "HOSTLET_IDENTITY",
        help = "Identity recorded in claim leases; defaults to a random UUID so two replicas never collide"
    )]
    pub identity: Option<String>,

    #[clap(long, env = "HOSTLET_METRICS_PORT", default_value = "9090")]
    pub metrics_port: u16,

    #[clap(long, env = "HOSTLET_METRICS_ADDR", default_value = "0.0.0.0")]
    pub metrics_addr: std::net::IpAddr,

    #[clap(
        long,
        env = "HOST_CLEANUP_TIMEOUT",
        default_value = "5m",
        help = "Per-host cleanup timeout before force-release (spec.md 4.D); clamped to [2m, 15m]"
    )]
    pub cleanup_timeout: String,

    #[clap(
        long,
        env = "HOSTLET_CONTROL_PLANE_ENDPOINT",
        help = "Control-plane endpoint host written onto claimed Hosts (spec.md 4.E step 5)"
    )]
    pub control_plane_endpoint: String,

    #[clap(
        long,
        env = "HOSTLET_BUNDLE_REGISTRY",
        default_value = "",
        help = "Component bundle/container-image registry written onto claimed Hosts (spec.md 4.E step 5)"
    )]
    pub bundle_registry: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub identity: String,
    pub metrics_port: u16,
    pub metrics_addr: std::net::IpAddr,
    pub cleanup_timeout: std::time::Duration,
    pub control_plane_endpoint: String,
    pub bundle_registry: String,
}

impl Config {
    pub fn from_opts(opts: Opts) -> anyhow::Result<Self> {
        let identity = opts
            .identity
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let cleanup_timeout = parse_clamped_duration(&opts.cleanup_timeout)?;
        Ok(Self {
            identity,
            metrics_port: opts.metrics_port,
            metrics_addr: opts.metrics_addr,
            cleanup_timeout,
            control_plane_endpoint: opts.control_plane_endpoint,
            bundle_registry: opts.bundle_registry,
        })
    }
}

/// Parses a `"5m"`/`"300s"`-style duration and clamps it to `[2m, 15m]`
/// (spec.md §6), so a misconfigured env var can't produce a cleanup timeout
/// so short it force-releases hosts mid-legitimate-teardown, or so long a
/// stuck agent ties up a Machine indefinitely.
fn parse_clamped_duration(raw: &str) -> anyhow::Result<std::time::Duration> {
    let raw = raw.trim();
    let (num, unit) = raw.split_at(raw.len() - 1);
    let value: u64 = num.parse()?;
    let seconds = match unit {
        "s" => value,
        "m" => value * 60,
        other => anyhow::bail!("unsupported duration unit {other:?}, expected 's' or 'm'"),
    };
    let clamped = seconds.clamp(120, 900);
    Ok(std::time::Duration::from_secs(clamped))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn clamps_below_minimum() {
        assert_eq!(parse_clamped_duration("30s").unwrap().as_secs(), 120);
    }

    #[test]
    fn clamps_above_maximum() {
        assert_eq!(parse_clamped_duration("20m").unwrap().as_secs(), 900);
    }

    #[test]
    fn rejects_unsupported_unit() {
        assert!(parse_clamped_duration("1h").is_err());
    }

    #[test]
    fn passes_through_in_range_value() {
        assert_eq!(parse_clamped_duration("5m").unwrap().as_secs(), 300);
    }

    #[test]
    fn default_metrics_port_matches_shared_default() {
        assert_eq!(DEFAULT_METRICS_PORT, 9090);
    }
}
