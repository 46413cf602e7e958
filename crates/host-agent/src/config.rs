//! `host-agent` CLI configuration (spec.md §6), `clap`-derived.

use std::path::PathBuf;

use clap::Parser;
use host_lifecycle::config::{default_data_dir, default_hostname, DEFAULT_METRICS_PORT};

#[derive(Parser, Clone, Debug)]
#[clap(name = "host-agent", about = "Registers this host and bootstraps it into a cluster")]
pub struct Opts {
    #[clap(long, env = "HOSTLET_HOST_NAME", help = "Name to register this Host under; defaults to the local hostname")]
    pub host_name: Option<String>,

    #[clap(long, env = "HOSTLET_DATA_DIR", help = "Local scratch directory for registration state")]
    pub data_dir: Option<PathBuf>,

    #[clap(long, env = "HOSTLET_METRICS_PORT", default_value = "9090")]
    pub metrics_port: u16,

    #[clap(long, env = "HOSTLET_METRICS_ADDR", default_value = "0.0.0.0")]
    pub metrics_addr: std::net::IpAddr,

    #[clap(
        long,
        env = "HOSTLET_DRIFT_INTERVAL_SECS",
        default_value = "300",
        help = "Interval between drift-detector sweeps (spec.md 4.G)"
    )]
    pub drift_interval_secs: u64,

    #[clap(
        long,
        env = "HOSTLET_ZOMBIE_GRACE_SECS",
        default_value = "120",
        help = "Grace period before a Host with no MachineRef but local claim evidence is treated as a zombie (spec.md 4.F)"
    )]
    pub zombie_grace_secs: u64,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub host_name: String,
    pub data_dir: PathBuf,
    pub metrics_port: u16,
    pub metrics_addr: std::net::IpAddr,
    pub drift_interval_secs: u64,
    pub zombie_grace_secs: u64,
}

impl Config {
    pub fn from_opts(opts: Opts) -> anyhow::Result<Self> {
        let host_name = match opts.host_name {
            Some(n) => n,
            None => default_hostname()?,
        };
        let data_dir = match opts.data_dir {
            Some(d) => d,
            None => default_data_dir()?,
        };
        Ok(Self {
            host_name,
            data_dir,
            metrics_port: opts.metrics_port,
            metrics_addr: opts.metrics_addr,
            drift_interval_secs: opts.drift_interval_secs,
            zombie_grace_secs: opts.zombie_grace_secs,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn falls_back_to_local_hostname_when_unset() {
        let opts = Opts {
            host_name: None,
            data_dir: Some(PathBuf::from("/tmp/hostlet-test")),
            metrics_port: DEFAULT_METRICS_PORT,
            metrics_addr: "0.0.0.0".parse().unwrap(),
            drift_interval_secs: 300,
            zombie_grace_secs: 120,
        };
        let config = Config::from_opts(opts).unwrap();
        assert!(!config.host_name.is_empty());
    }
}
