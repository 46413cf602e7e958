//! Config helpers shared by the `host-agent` and `controller-manager`
//! binaries' own `clap`-derived `Opts` (spec.md §6 "Configuration").
//!
//! Each binary owns its full `Opts`/`Config` pair; this module only holds
//! the bits that would otherwise be duplicated between them.

use std::net::IpAddr;
use std::path::PathBuf;

/// Default metrics port both binaries expose (spec.md §6), overridable via
/// `--metrics-port` / `HOSTLET_METRICS_PORT` in each binary's own `Opts`.
pub const DEFAULT_METRICS_PORT: u16 = 9090;

/// Resolves this machine's hostname, lower-cased to satisfy the DNS-label
/// rules Kubernetes names are held to.
pub fn default_hostname() -> anyhow::Result<String> {
    let raw = hostname::get()?
        .into_string()
        .map_err(|_| anyhow::anyhow!("invalid utf-8 hostname string"))?;
    Ok(sanitize_hostname(&raw))
}

/// Some hostnames (particularly local ones) can have uppercase letters,
/// which DNS-label names in Kubernetes disallow.
pub fn sanitize_hostname(hostname: &str) -> String {
    hostname.to_lowercase()
}

/// `$HOME/.hostlet`, the default data directory for whichever binary needs
/// local scratch state (the agent's registration cache, the
/// controller-manager's leader-election lock file if configured for one).
pub fn default_data_dir() -> anyhow::Result<PathBuf> {
    Ok(dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("unable to determine home directory"))?
        .join(".hostlet"))
}

/// Picks a metrics bind address matching the given address family, mirroring
/// how the agent picks its node IP: `0.0.0.0` for v4, `::` for v6.
pub fn default_metrics_addr(preferred: &IpAddr) -> IpAddr {
    match preferred {
        IpAddr::V4(_) => "0.0.0.0".parse().unwrap(),
        IpAddr::V6(_) => "::".parse().unwrap(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sanitize_lowercases() {
        assert_eq!(sanitize_hostname("HOST-01.Local"), "host-01.local");
    }

    #[test]
    fn default_metrics_addr_matches_family() {
        assert_eq!(
            default_metrics_addr(&"10.0.0.1".parse().unwrap()),
            "0.0.0.0".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            default_metrics_addr(&"::1".parse().unwrap()),
            "::".parse::<IpAddr>().unwrap()
        );
    }
}
