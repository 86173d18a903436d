//! Stats ingestor: per-node and per-instance delta computation,
//! plus the tenant-usage coalescing policy.

use chrono::{DateTime, Duration, Utc};

use crate::types::{stats::NO_LOAD_SAMPLE, Id, InstanceLastStat, InstanceState, UsageSample};

/// One `Stat` message from the southbound pipeline: a node's own
/// capacity/load sample plus a per-instance report for every instance
/// the node is currently hosting.
#[derive(Debug, Clone)]
pub struct Stat {
    pub node_id: Id,
    pub hostname: String,
    pub mem_total_mib: i64,
    pub mem_available_mib: i64,
    pub disk_total_mib: i64,
    pub disk_available_mib: i64,
    pub load: f64,
    pub cpu_count: i32,
    pub instances: Vec<PerInstanceReport>,
}

/// One instance's line within a `Stat` message.
#[derive(Debug, Clone)]
pub struct PerInstanceReport {
    pub instance_id: Id,
    pub state: InstanceState,
    pub ssh_ip: String,
    pub ssh_port: u16,
    pub cpu_units: i64,
    pub mem_mib: i64,
    pub disk_mib: i64,
    pub attached_volumes: Vec<Id>,
}

/// Coalescing window: a new sample folds into the previous one if it
/// arrives less than this long after it.
const COALESCE_WINDOW_MINUTES: i64 = 5;

/// One reported per-instance usage line from a `Stat` message.
#[derive(Debug, Clone)]
pub struct ReportedInstanceUsage {
    pub instance_id: Id,
    pub cpu_units: i64,
    pub mem_mib: i64,
    pub disk_mib: i64,
}

/// Clamps a reported value to zero (negative readings are a sensor
/// glitch, never a real negative usage).
fn clamp_nonneg(v: i64) -> i64 {
    v.max(0)
}

/// `true` if `load` is the "no sample in this packet" sentinel.
pub fn is_load_sample_present(load: f64) -> bool {
    load != NO_LOAD_SAMPLE
}

/// Computes `(delta, new_last_stat)` for one reported instance, given
/// its previous last-stat (or `None` on first report).
pub fn compute_delta(
    reported: &ReportedInstanceUsage,
    previous: Option<&InstanceLastStat>,
    at: DateTime<Utc>,
) -> (UsageSample, InstanceLastStat) {
    let cpu = clamp_nonneg(reported.cpu_units);
    let mem = clamp_nonneg(reported.mem_mib);
    let disk = clamp_nonneg(reported.disk_mib);

    let (prev_cpu, prev_mem, prev_disk) = match previous {
        Some(p) => (p.cpu_units, p.mem_mib, p.disk_mib),
        None => (0, 0, 0),
    };

    let delta = UsageSample {
        timestamp: at,
        vcpu: (cpu - prev_cpu).max(0),
        mem_mib: (mem - prev_mem).max(0),
        disk_mib: (disk - prev_disk).max(0),
    };

    let new_last_stat = InstanceLastStat {
        instance_id: reported.instance_id.clone(),
        cpu_units: cpu,
        mem_mib: mem,
        disk_mib: disk,
        updated_at: at,
    };

    (delta, new_last_stat)
}

/// Folds `delta` into `history`: skip all-zero deltas; extend
/// the last entry in place if it is within the coalescing window,
/// otherwise append a new entry.
pub fn fold_usage(history: &mut Vec<UsageSample>, delta: &UsageSample) {
    if delta.vcpu == 0 && delta.mem_mib == 0 && delta.disk_mib == 0 {
        return;
    }

    if let Some(last) = history.last_mut() {
        if delta.timestamp - last.timestamp < Duration::minutes(COALESCE_WINDOW_MINUTES) {
            last.vcpu += delta.vcpu;
            last.mem_mib += delta.mem_mib;
            last.disk_mib += delta.disk_mib;
            return;
        }
    }

    history.push(delta.clone());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(instance_id: &str, cpu: i64, mem: i64, disk: i64) -> ReportedInstanceUsage {
        ReportedInstanceUsage {
            instance_id: instance_id.to_string(),
            cpu_units: cpu,
            mem_mib: mem,
            disk_mib: disk,
        }
    }

    #[test]
    fn negative_usage_clamps_to_zero() {
        let now = Utc::now();
        let (delta, last) = compute_delta(&usage("i1", -5, 10, -1), None, now);
        assert_eq!(delta.vcpu, 0);
        assert_eq!(last.cpu_units, 0);
        assert_eq!(last.mem_mib, 10);
    }

    #[test]
    fn delta_is_current_minus_previous() {
        let now = Utc::now();
        let previous = InstanceLastStat {
            instance_id: "i1".into(),
            cpu_units: 2,
            mem_mib: 100,
            disk_mib: 50,
            updated_at: now - Duration::minutes(1),
        };
        let (delta, _) = compute_delta(&usage("i1", 5, 150, 50), Some(&previous), now);
        assert_eq!(delta.vcpu, 3);
        assert_eq!(delta.mem_mib, 50);
        assert_eq!(delta.disk_mib, 0);
    }

    #[test]
    fn fold_usage_skips_all_zero_delta() {
        let mut history = Vec::new();
        fold_usage(
            &mut history,
            &UsageSample { timestamp: Utc::now(), vcpu: 0, mem_mib: 0, disk_mib: 0 },
        );
        assert!(history.is_empty());
    }

    #[test]
    fn fold_usage_coalesces_within_window() {
        let now = Utc::now();
        let mut history = vec![UsageSample { timestamp: now, vcpu: 1, mem_mib: 1, disk_mib: 1 }];
        fold_usage(
            &mut history,
            &UsageSample {
                timestamp: now + Duration::minutes(1),
                vcpu: 2,
                mem_mib: 2,
                disk_mib: 2,
            },
        );
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].vcpu, 3);
    }

    #[test]
    fn fold_usage_appends_after_window() {
        let now = Utc::now();
        let mut history = vec![UsageSample { timestamp: now, vcpu: 1, mem_mib: 1, disk_mib: 1 }];
        fold_usage(
            &mut history,
            &UsageSample {
                timestamp: now + Duration::minutes(6),
                vcpu: 2,
                mem_mib: 2,
                disk_mib: 2,
            },
        );
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn load_sentinel_detected() {
        assert!(!is_load_sample_present(NO_LOAD_SAMPLE));
        assert!(is_load_sample_present(0.0));
    }
}
