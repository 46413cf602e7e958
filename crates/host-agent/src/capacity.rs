//! Capacity probing (spec.md 4.A step 2): reads what the OS reports about
//! CPU, memory, and (if present) GPUs, and turns it into a `HostCapacity`.

use host_lifecycle::types::host::HostCapacity;

/// Probes local capacity. Falls back to a conservative zero-GPU reading
/// when the optional GPU probe command isn't present, since most hosts in
/// this system's target fleet (spec.md §1) are plain CPU machines.
pub fn probe() -> host_lifecycle::Result<HostCapacity> {
    let cpu_count = num_cpus();
    let mem_kib = mem_total_kib()?;

    Ok(HostCapacity {
        cpu: cpu_count.to_string(),
        memory: format!("{mem_kib}Ki"),
        ephemeral_disk: disk_free().ok(),
        gpu_count: gpu_count(),
        gpu_type: None,
        max_pods: 110,
    })
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn mem_total_kib() -> host_lifecycle::Result<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo")
        .map_err(host_lifecycle::Error::Io)?;
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            let kib = rest
                .trim()
                .trim_end_matches("kB")
                .trim()
                .parse::<u64>()
                .map_err(|e| host_lifecycle::Error::Other(anyhow::anyhow!(e)))?;
            return Ok(kib);
        }
    }
    Err(host_lifecycle::Error::Other(anyhow::anyhow!(
        "MemTotal not found in /proc/meminfo"
    )))
}

fn disk_free() -> anyhow::Result<String> {
    // Best-effort: statvfs-free crates aren't in the dependency stack, and a
    // shell round-trip through `df` is one more moving part than this needs.
    // Left unset until a real disk-capacity requirement shows up.
    anyhow::bail!("ephemeral disk probing not implemented")
}

fn gpu_count() -> u32 {
    std::path::Path::new("/dev/nvidia0").exists() as u32
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn probe_reports_at_least_one_cpu() {
        let capacity = probe().unwrap();
        assert!(capacity.cpu.parse::<u32>().unwrap() >= 1);
        assert!(capacity.memory.ends_with("Ki"));
    }
}
