use crate::collectors::{bytes_to_mb, now, round_to, ItemRead, SkipReason, Timestamp};
use crate::config::SamplingConfig;
use serde::Serialize;
use std::cmp::Ordering;
use std::thread;
use std::time::Duration;
use sysinfo::{PidExt, ProcessExt, ProcessStatus, System, SystemExt, UserExt};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub username: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessSnapshot {
    pub top_cpu: Vec<ProcessInfo>,
    pub top_memory: Vec<ProcessInfo>,
    pub total_processes: usize,
    pub skipped_processes: usize,
    pub explanation: String,
    pub educational_note: &'static str,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub username: Option<String>,
    pub cpu_usage: f32,
    pub memory_bytes: u64,
    pub status: ProcessStatus,
}

pub fn decode_sample(sample: ProcessSample, total_memory: u64) -> ItemRead<ProcessInfo> {
    match sample.status {
        ProcessStatus::Zombie => return ItemRead::Skipped(SkipReason::Zombie),
        ProcessStatus::Dead => return ItemRead::Skipped(SkipReason::Vanished),
        _ => {}
    }
    // Nothing readable at all: the kernel refused us.
    if sample.name.is_empty() && sample.memory_bytes == 0 {
        return ItemRead::Skipped(SkipReason::AccessDenied);
    }

    let memory_percent = if total_memory > 0 {
        round_to(sample.memory_bytes as f64 / total_memory as f64 * 100.0, 2)
    } else {
        0.0
    };
    let cpu_percent = if sample.cpu_usage.is_finite() {
        round_to(sample.cpu_usage.max(0.0) as f64, 1)
    } else {
        0.0
    };

    ItemRead::Read(ProcessInfo {
        pid: sample.pid,
        name: sample.name,
        username: sample.username.unwrap_or_else(|| "unknown".to_string()),
        cpu_percent,
        memory_percent,
        memory_mb: bytes_to_mb(sample.memory_bytes),
    })
}

pub fn rank(processes: &[ProcessInfo], limit: usize) -> (Vec<ProcessInfo>, Vec<ProcessInfo>) {
    let top_by = |key: fn(&ProcessInfo) -> f64| {
        let mut sorted = processes.to_vec();
        sorted.sort_by(|a, b| key(b).partial_cmp(&key(a)).unwrap_or(Ordering::Equal));
        sorted.truncate(limit);
        sorted
    };
    (top_by(|p| p.cpu_percent), top_by(|p| p.memory_percent))
}

pub fn summarize(samples: Vec<ProcessSample>, total_memory: u64, limit: usize) -> ProcessSnapshot {
    let mut processes = Vec::with_capacity(samples.len());
    let mut skipped = 0_usize;
    for sample in samples {
        let pid = sample.pid;
        match decode_sample(sample, total_memory) {
            ItemRead::Read(info) => processes.push(info),
            ItemRead::Skipped(reason) => {
                debug!(pid, ?reason, "process skipped");
                skipped += 1;
            }
        }
    }

    let (top_cpu, top_memory) = rank(&processes, limit);
    let total_processes = processes.len();
    ProcessSnapshot {
        top_cpu,
        top_memory,
        total_processes,
        skipped_processes: skipped,
        explanation: format!(
            "Monitoring {total_processes} active processes. Top processes show what's currently using your system resources."
        ),
        educational_note: "High CPU processes might be doing intensive work. High memory processes are keeping lots of data in RAM. Both are normal for active homelab services.",
        timestamp: now(),
    }
}

pub fn collect_processes(sampling: &SamplingConfig, limit: usize) -> ProcessSnapshot {
    let mut system = System::new();
    system.refresh_memory();
    system.refresh_users_list();
    // Per-process CPU usage is the delta between two refreshes.
    system.refresh_processes();
    thread::sleep(Duration::from_millis(sampling.process_window_ms));
    system.refresh_processes();

    let samples = system
        .processes()
        .iter()
        .map(|(pid, process)| ProcessSample {
            pid: pid.as_u32(),
            name: process.name().to_string(),
            username: process
                .user_id()
                .and_then(|uid| system.get_user_by_id(uid))
                .map(|user| user.name().to_string()),
            cpu_usage: process.cpu_usage(),
            memory_bytes: process.memory(),
            status: process.status(),
        })
        .collect();

    summarize(samples, system.total_memory(), limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(pid: u32, name: &str, cpu: f32, memory_bytes: u64) -> ProcessSample {
        ProcessSample {
            pid,
            name: name.to_string(),
            username: Some("root".to_string()),
            cpu_usage: cpu,
            memory_bytes,
            status: ProcessStatus::Run,
        }
    }

    const MB: u64 = 1024 * 1024;

    #[test]
    fn zombies_and_unreadable_processes_are_skipped() {
        let mut zombie = sample(2, "defunct", 0.0, 0);
        zombie.status = ProcessStatus::Zombie;
        let mut dead = sample(3, "gone", 0.0, 10 * MB);
        dead.status = ProcessStatus::Dead;
        let hidden = sample(4, "", 0.0, 0);

        assert_eq!(decode_sample(zombie, 1000 * MB), ItemRead::Skipped(SkipReason::Zombie));
        assert_eq!(decode_sample(dead, 1000 * MB), ItemRead::Skipped(SkipReason::Vanished));
        assert_eq!(decode_sample(hidden, 1000 * MB), ItemRead::Skipped(SkipReason::AccessDenied));
    }

    #[test]
    fn decode_converts_units() {
        let mut s = sample(10, "nginx", 12.345, 250 * MB);
        s.username = None;
        let ItemRead::Read(info) = decode_sample(s, 1000 * MB) else {
            panic!("expected a readable process");
        };
        assert_eq!(info.cpu_percent, 12.3);
        assert_eq!(info.memory_percent, 25.0);
        assert_eq!(info.memory_mb, 250.0);
        assert_eq!(info.username, "unknown");
    }

    #[test]
    fn rank_produces_two_independent_views() {
        let samples = vec![
            sample(1, "a", 50.0, 10 * MB),
            sample(2, "b", 5.0, 500 * MB),
            sample(3, "c", 20.0, 100 * MB),
            sample(4, "d", 1.0, MB),
        ];
        let snapshot = summarize(samples, 1000 * MB, 2);
        let cpu: Vec<u32> = snapshot.top_cpu.iter().map(|p| p.pid).collect();
        let mem: Vec<u32> = snapshot.top_memory.iter().map(|p| p.pid).collect();
        assert_eq!(cpu, vec![1, 3]);
        assert_eq!(mem, vec![2, 3]);
        assert_eq!(snapshot.total_processes, 4);
        assert_eq!(snapshot.skipped_processes, 0);
    }

    #[test]
    fn limit_larger_than_table_returns_everything() {
        let snapshot = summarize(vec![sample(1, "a", 1.0, MB)], 1000 * MB, 10);
        assert_eq!(snapshot.top_cpu.len(), 1);
        assert_eq!(snapshot.top_memory.len(), 1);
    }

    #[test]
    fn live_process_table_contains_current_process() {
        let sampling = SamplingConfig {
            process_window_ms: 10,
            ..SamplingConfig::default()
        };
        let snapshot = collect_processes(&sampling, 5);
        assert!(snapshot.total_processes >= 1);
        assert!(snapshot.top_cpu.len() <= 5);
        assert!(snapshot.top_memory.len() <= 5);
    }
}
