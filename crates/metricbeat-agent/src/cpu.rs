// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `system/cpu` metricset
//!
//! Reads cgroup v1 CPU accounting files and reports the cumulative usage and
//! the effective CPU limit of the cgroup the agent runs in.

use async_trait::async_trait;
use metricbeat::errors::ModuleError;
use metricbeat::event::MetricSetEvent;
use metricbeat::module::MetricSet;
use serde_json::{json, Map};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const NAME: &str = "cpu";

const CPU_USAGE_FILE: &str = "cpu/cpuacct.usage"; // Total CPU time, in nanoseconds, consumed by all tasks in this cgroup
const CPUSET_CPUS_FILE: &str = "cpuset/cpuset.cpus"; // CPUs that tasks in this cgroup are permitted to access
const CPU_PERIOD_FILE: &str = "cpu/cpu.cfs_period_us"; // CFS period, in microseconds
const CPU_QUOTA_FILE: &str = "cpu/cpu.cfs_quota_us"; // CFS quota per period, in microseconds

const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Statistics from cgroup v1 files, normalized to nanoseconds
#[derive(Debug, Default, PartialEq)]
struct CgroupStats {
    total: Option<u64>,
    cpu_count: Option<u64>,
    scheduler_period: Option<u64>,
    scheduler_quota: Option<u64>,
}

pub struct CpuMetricSet {
    cgroup_root: PathBuf,
}

impl Default for CpuMetricSet {
    fn default() -> Self {
        Self::new(DEFAULT_CGROUP_ROOT)
    }
}

impl CpuMetricSet {
    pub fn new(cgroup_root: impl Into<PathBuf>) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
        }
    }

    fn read_cgroup_stats(&self) -> CgroupStats {
        let total = read_u64(&self.cgroup_root.join(CPU_USAGE_FILE));
        if total.is_none() {
            debug!("Could not read CPU usage from {CPU_USAGE_FILE}");
        }

        let cpu_count = fs::read_to_string(self.cgroup_root.join(CPUSET_CPUS_FILE))
            .and_then(|contents| parse_cpu_count(&contents))
            .ok();

        // Convert from microseconds to nanoseconds
        let scheduler_period =
            read_u64(&self.cgroup_root.join(CPU_PERIOD_FILE)).map(|v| v.saturating_mul(1000));

        let scheduler_quota = fs::read_to_string(self.cgroup_root.join(CPU_QUOTA_FILE))
            .ok()
            .and_then(|contents| contents.trim().parse::<i64>().ok())
            .and_then(|quota| {
                if quota < 0 {
                    debug!("CFS scheduler quota is unlimited");
                    None
                } else {
                    Some((quota as u64).saturating_mul(1000))
                }
            });

        CgroupStats {
            total,
            cpu_count,
            scheduler_period,
            scheduler_quota,
        }
    }
}

#[async_trait]
impl MetricSet for CpuMetricSet {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch(&self) -> Result<Vec<MetricSetEvent>, ModuleError> {
        let stats = self.read_cgroup_stats();
        let Some(total) = stats.total else {
            return Err(ModuleError::fetch(
                NAME,
                "cgroup CPU usage is not available",
            ));
        };

        let host_cpu_count = num_cpus::get() as u64;
        let (limit_pct, defaulted) = match compute_cgroup_cpu_limit_pct(&stats, host_cpu_count) {
            Some(limit) => (limit, false),
            None => (host_cpu_count as f64 * 100.0, true),
        };

        let mut fields = Map::new();
        fields.insert("usage".to_string(), json!({ "ns": total }));
        fields.insert(
            "limit".to_string(),
            json!({ "pct": limit_pct, "defaulted": defaulted }),
        );
        if let Some(cpu_count) = stats.cpu_count {
            fields.insert("cores".to_string(), json!(cpu_count));
        }

        Ok(vec![MetricSetEvent::with_metricset_fields(fields)])
    }
}

fn read_u64(path: &Path) -> Option<u64> {
    fs::read_to_string(path)
        .ok()
        .and_then(|contents| contents.trim().parse::<u64>().ok())
}

/// Counts the CPUs listed in a cpuset, e.g. "0-2,16" is 4 CPUs.
fn parse_cpu_count(contents: &str) -> Result<u64, io::Error> {
    let cpuset = contents.trim();
    if cpuset.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "cpuset is empty"));
    }

    let mut cpu_count: u64 = 0;
    for part in cpuset.split(',') {
        match part.split_once('-') {
            Some((start, end)) => {
                let start = parse_cpu_id(start)?;
                let end = parse_cpu_id(end)?;
                if end < start {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("invalid cpu range {part}"),
                    ));
                }
                cpu_count = cpu_count.saturating_add((end - start).saturating_add(1));
            }
            None => {
                parse_cpu_id(part)?;
                cpu_count = cpu_count.saturating_add(1);
            }
        }
    }

    Ok(cpu_count)
}

fn parse_cpu_id(raw: &str) -> Result<u64, io::Error> {
    raw.trim().parse::<u64>().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("failed to parse cpu id {raw:?}: {e}"),
        )
    })
}

/// Limit is computed using min(cpuset, CFS quota). A cpuset covering every
/// host CPU is not a limit.
fn compute_cgroup_cpu_limit_pct(stats: &CgroupStats, host_cpu_count: u64) -> Option<f64> {
    let cpuset_limit = stats
        .cpu_count
        .filter(|count| *count != host_cpu_count)
        .map(|count| count as f64 * 100.0);

    let quota_limit = match (stats.scheduler_quota, stats.scheduler_period) {
        (Some(quota), Some(period)) if period > 0 => Some(100.0 * (quota as f64 / period as f64)),
        _ => None,
    };

    match (cpuset_limit, quota_limit) {
        (Some(cpuset), Some(quota)) => Some(cpuset.min(quota)),
        (cpuset, quota) => cpuset.or(quota),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_count() {
        assert_eq!(parse_cpu_count("0-2,16\n").expect("valid"), 4);
        assert_eq!(parse_cpu_count("3").expect("valid"), 1);
        assert!(parse_cpu_count("").is_err());
        assert!(parse_cpu_count("a-b").is_err());
        assert!(parse_cpu_count("4-2").is_err());
    }

    #[test]
    fn test_limit_prefers_lower_of_cpuset_and_quota() {
        let stats = CgroupStats {
            total: Some(1),
            cpu_count: Some(4),
            scheduler_period: Some(100_000_000),
            scheduler_quota: Some(150_000_000),
        };
        assert_eq!(compute_cgroup_cpu_limit_pct(&stats, 8), Some(150.0));
    }

    #[test]
    fn test_cpuset_matching_host_is_not_a_limit() {
        let stats = CgroupStats {
            total: Some(1),
            cpu_count: Some(8),
            ..Default::default()
        };
        assert_eq!(compute_cgroup_cpu_limit_pct(&stats, 8), None);
    }

    #[tokio::test]
    async fn test_fetch_from_cgroup_files() {
        let root = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(root.path().join("cpu")).expect("cpu dir");
        fs::create_dir_all(root.path().join("cpuset")).expect("cpuset dir");
        fs::write(root.path().join(CPU_USAGE_FILE), "123456789\n").expect("usage");
        fs::write(root.path().join(CPU_PERIOD_FILE), "100000\n").expect("period");
        fs::write(root.path().join(CPU_QUOTA_FILE), "50000\n").expect("quota");

        let events = CpuMetricSet::new(root.path())
            .fetch()
            .await
            .expect("fetch succeeds");

        assert_eq!(events.len(), 1);
        let fields = &events[0].metricset_fields;
        assert_eq!(fields["usage"]["ns"], json!(123456789));
        assert_eq!(fields["limit"]["pct"], json!(50.0));
        assert_eq!(fields["limit"]["defaulted"], json!(false));
    }

    #[test]
    fn test_huge_scheduler_values_saturate() {
        let root = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(root.path().join("cpu")).expect("cpu dir");
        fs::write(root.path().join(CPU_PERIOD_FILE), format!("{}\n", u64::MAX)).expect("period");
        fs::write(root.path().join(CPU_QUOTA_FILE), format!("{}\n", i64::MAX)).expect("quota");

        let stats = CpuMetricSet::new(root.path()).read_cgroup_stats();

        assert_eq!(stats.scheduler_period, Some(u64::MAX));
        assert_eq!(stats.scheduler_quota, Some(u64::MAX));
        assert_eq!(parse_cpu_count(&format!("0-{}", u64::MAX)).expect("valid"), u64::MAX);
    }

    #[tokio::test]
    async fn test_fetch_without_cgroup_fails() {
        let root = tempfile::tempdir().expect("tempdir");

        let result = CpuMetricSet::new(root.path()).fetch().await;

        assert!(matches!(result, Err(ModuleError::Fetch { .. })));
    }
}
