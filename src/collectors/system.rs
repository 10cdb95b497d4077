use crate::collectors::disk::{collect_disk, DiskSnapshot, MountProbe};
use crate::collectors::process::{collect_processes, ProcessSnapshot};
use crate::collectors::{
    bytes_to_gb, clamp_percent, now, percent_of, round_to, CollectionError, Ladder, StatusLevel,
    Timestamp,
};
use crate::config::SamplingConfig;
use chrono::{Local, TimeZone};
use serde::Serialize;
use std::collections::BTreeMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::thread;
use std::time::Duration;
use sysinfo::{CpuExt, System, SystemExt};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageLevel {
    High,
    Moderate,
    Normal,
}

impl UsageLevel {
    pub fn from_percent(usage_percent: f64) -> Self {
        if usage_percent > 80.0 {
            UsageLevel::High
        } else if usage_percent < 50.0 {
            UsageLevel::Normal
        } else {
            UsageLevel::Moderate
        }
    }

    fn advice(self) -> &'static str {
        match self {
            UsageLevel::High => "High usage (>80%) may slow down other processes.",
            UsageLevel::Moderate => "Moderate usage - monitor if sustained.",
            UsageLevel::Normal => "Normal usage level.",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CoreCounts {
    pub logical: usize,
    pub physical: usize,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Frequency {
    pub current: Option<f64>,
    pub max: Option<f64>,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CpuSnapshot {
    pub usage_percent: f64,
    pub usage_level: UsageLevel,
    pub usage_explanation: String,
    pub cores: CoreCounts,
    pub frequency: Frequency,
    pub per_core_usage: Vec<f64>,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwapSnapshot {
    pub total_gb: f64,
    pub used_gb: f64,
    pub percent: f64,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemorySnapshot {
    pub total_gb: f64,
    pub used_gb: f64,
    pub available_gb: f64,
    pub usage_percent: f64,
    pub status: StatusLevel,
    pub status_detail: &'static str,
    pub explanation: String,
    pub swap: SwapSnapshot,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Uptime {
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UptimeInfo {
    #[serde(flatten)]
    pub parts: Uptime,
    pub human: String,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadAverage {
    #[serde(rename = "1min")]
    pub one: f64,
    #[serde(rename = "5min")]
    pub five: f64,
    #[serde(rename = "15min")]
    pub fifteen: f64,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemOverview {
    pub hostname: String,
    pub boot_time: Timestamp,
    pub uptime: UptimeInfo,
    pub load_average: Option<LoadAverage>,
    pub cpu: CpuSnapshot,
    pub memory: MemorySnapshot,
    pub disk: DiskSnapshot,
    pub processes: ProcessSnapshot,
    pub timestamp: Timestamp,
    pub health_summary: &'static str,
}

fn ensure_supported() -> Result<(), CollectionError> {
    if System::IS_SUPPORTED {
        Ok(())
    } else {
        Err(CollectionError::Unsupported)
    }
}

/// Samples overall usage over the CPU window, then per-core usage over the
/// shorter per-core window. Blocks for the sum of both windows.
pub fn collect_cpu(sampling: &SamplingConfig) -> Result<CpuSnapshot, CollectionError> {
    ensure_supported()?;
    let mut system = System::new();
    system.refresh_cpu();
    if system.cpus().is_empty() {
        return Err(CollectionError::Query {
            what: "cpu",
            detail: "no CPUs reported by the operating system".to_string(),
        });
    }

    thread::sleep(Duration::from_millis(sampling.cpu_window_ms));
    system.refresh_cpu();
    let usage_percent = round_to(clamp_percent(system.global_cpu_info().cpu_usage() as f64), 1);

    thread::sleep(Duration::from_millis(sampling.per_core_window_ms));
    system.refresh_cpu();
    let per_core_usage: Vec<f64> = system
        .cpus()
        .iter()
        .map(|cpu| round_to(clamp_percent(cpu.cpu_usage() as f64), 1))
        .collect();

    let logical = per_core_usage.len();
    let physical = system.physical_core_count().unwrap_or(logical);
    let current_mhz = system
        .cpus()
        .first()
        .map(|cpu| cpu.frequency())
        .filter(|mhz| *mhz > 0)
        .map(|mhz| mhz as f64);
    let frequency = frequency_info(current_mhz, current_mhz.map(|c| max_frequency_mhz().unwrap_or(c)));

    let usage_level = UsageLevel::from_percent(usage_percent);
    Ok(CpuSnapshot {
        usage_percent,
        usage_level,
        usage_explanation: format!("CPU is {usage_percent:.1}% busy. {}", usage_level.advice()),
        cores: CoreCounts {
            logical,
            physical,
            explanation: cores_explanation(logical, physical),
        },
        frequency,
        per_core_usage,
        timestamp: now(),
    })
}

fn cores_explanation(logical: usize, physical: usize) -> String {
    let hyperthreading = if logical > physical {
        "enabled"
    } else {
        "disabled"
    };
    format!(
        "Your system has {physical} physical cores with {logical} threads (hyperthreading: {hyperthreading})"
    )
}

fn frequency_info(current: Option<f64>, max: Option<f64>) -> Frequency {
    match (current, max) {
        (Some(current), Some(max)) => Frequency {
            current: Some(round_to(current, 2)),
            max: Some(round_to(max, 2)),
            explanation: format!("Running at {current:.1}MHz (max: {max:.1}MHz)"),
        },
        _ => Frequency {
            current: None,
            max: None,
            explanation: "Frequency data not available".to_string(),
        },
    }
}

#[cfg(target_os = "linux")]
fn max_frequency_mhz() -> Option<f64> {
    let raw = fs::read_to_string("/sys/devices/system/cpu/cpu0/cpufreq/cpuinfo_max_freq").ok()?;
    let khz = raw.trim().parse::<f64>().ok()?;
    (khz > 0.0).then(|| khz / 1000.0)
}

#[cfg(not(target_os = "linux"))]
fn max_frequency_mhz() -> Option<f64> {
    None
}

pub fn collect_memory() -> Result<MemorySnapshot, CollectionError> {
    ensure_supported()?;
    let mut system = System::new();
    system.refresh_memory();
    let total = system.total_memory();
    if total == 0 {
        return Err(CollectionError::Query {
            what: "memory",
            detail: "operating system reported zero total memory".to_string(),
        });
    }

    Ok(memory_snapshot(
        total,
        system.used_memory(),
        system.available_memory(),
        system.total_swap(),
        system.used_swap(),
    ))
}

pub fn memory_snapshot(
    total: u64,
    used: u64,
    available: u64,
    swap_total: u64,
    swap_used: u64,
) -> MemorySnapshot {
    let total_gb = bytes_to_gb(total);
    let used_gb = bytes_to_gb(used);
    let usage_percent = percent_of(total.saturating_sub(available), total);
    let status = Ladder::MEMORY.classify(usage_percent);
    let status_detail = memory_status_detail(status);

    let swap_percent = percent_of(swap_used, swap_total);
    let swap_state = if swap_percent > 10.0 {
        "actively swapping - may impact performance"
    } else {
        "minimal swap usage - good"
    };

    MemorySnapshot {
        total_gb,
        used_gb,
        available_gb: bytes_to_gb(available),
        usage_percent,
        status,
        status_detail,
        explanation: format!(
            "Using {used_gb}GB of {total_gb}GB RAM ({usage_percent:.1}%). {status_detail}."
        ),
        swap: SwapSnapshot {
            total_gb: bytes_to_gb(swap_total),
            used_gb: bytes_to_gb(swap_used),
            percent: swap_percent,
            explanation: format!("Swap usage: {swap_percent:.1}% ({swap_state})"),
        },
        timestamp: now(),
    }
}

pub fn memory_status_detail(status: StatusLevel) -> &'static str {
    match status {
        StatusLevel::Critical => "Critical - consider closing applications or adding RAM",
        StatusLevel::High => "High - monitor closely",
        StatusLevel::Moderate => "Moderate - normal for active homelab",
        StatusLevel::Good => "Good - plenty of available memory",
    }
}

pub fn decompose_uptime(seconds: u64) -> Uptime {
    Uptime {
        days: seconds / 86_400,
        hours: (seconds % 86_400) / 3_600,
        minutes: (seconds % 3_600) / 60,
    }
}

fn uptime_info(seconds: u64) -> UptimeInfo {
    let parts = decompose_uptime(seconds);
    let whole_minutes = Duration::from_secs(seconds - seconds % 60);
    UptimeInfo {
        parts,
        human: humantime::format_duration(whole_minutes).to_string(),
        explanation: format!(
            "System has been running for {} days, {} hours, {} minutes since last reboot",
            parts.days, parts.hours, parts.minutes
        ),
    }
}

#[cfg(unix)]
fn load_average(system: &System, logical_cores: usize) -> Option<LoadAverage> {
    let load = system.load_average();
    Some(LoadAverage {
        one: round_to(load.one, 2),
        five: round_to(load.five, 2),
        fifteen: round_to(load.fifteen, 2),
        explanation: format!(
            "Load average shows system demand over time. Values above {logical_cores} indicate high demand."
        ),
    })
}

#[cfg(not(unix))]
fn load_average(_system: &System, _logical_cores: usize) -> Option<LoadAverage> {
    None
}

pub fn collect_overview(
    sampling: &SamplingConfig,
    process_limit: usize,
    mounts: &dyn MountProbe,
) -> Result<SystemOverview, CollectionError> {
    ensure_supported()?;
    let cpu = collect_cpu(sampling)?;
    let memory = collect_memory()?;
    let disk = collect_disk(mounts)?;
    let processes = collect_processes(sampling, process_limit);

    let system = System::new();
    let boot_secs = system.boot_time();
    let boot_time = Local
        .timestamp_opt(boot_secs as i64, 0)
        .single()
        .unwrap_or_else(now);
    let current = now();
    let uptime_secs = (current.timestamp() - boot_secs as i64).max(0) as u64;
    debug!(boot_secs, uptime_secs, "overview uptime");

    Ok(SystemOverview {
        hostname: system.host_name().unwrap_or_else(|| "unknown".to_string()),
        boot_time,
        uptime: uptime_info(uptime_secs),
        load_average: load_average(&system, cpu.cores.logical),
        cpu,
        memory,
        disk,
        processes,
        timestamp: current,
        health_summary: "System monitoring active - use individual metrics for detailed analysis",
    })
}

pub fn educational_context() -> BTreeMap<&'static str, &'static str> {
    BTreeMap::from([
        ("cpu_usage", "CPU usage shows how busy your processor is. High usage (>80%) for extended periods may indicate the need for optimization or hardware upgrades."),
        ("memory_usage", "Memory (RAM) usage shows how much working space your programs are using. When memory is full, the system uses slower disk swap."),
        ("disk_usage", "Disk usage shows storage consumption. Full disks can cause system failures, so monitoring and cleanup are essential."),
        ("processes", "Processes are running programs. Monitoring top processes helps identify what's using your system resources."),
        ("load_average", "Load average shows system demand over 1, 5, and 15 minutes. Values above your CPU core count indicate high demand."),
        ("uptime", "Uptime shows how long the system has been running since last reboot. Long uptimes indicate system stability."),
        ("monitoring_importance", "Regular monitoring helps predict issues, optimize performance, and maintain homelab reliability."),
    ])
}
