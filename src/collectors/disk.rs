use crate::collectors::{bytes_to_gb, now, round_to, CollectionError, Ladder, StatusLevel, Timestamp};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: String,
    pub fs_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
}

impl FsUsage {
    pub fn usage_percent(&self) -> f64 {
        let usable = self.used_bytes.saturating_add(self.free_bytes);
        if usable == 0 {
            return 0.0;
        }
        round_to(self.used_bytes as f64 / usable as f64 * 100.0, 1)
    }
}

pub trait MountProbe: Send + Sync {
    fn mounts(&self) -> Result<Vec<MountEntry>, CollectionError>;
    fn usage(&self, mount_point: &str) -> io::Result<FsUsage>;
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionInfo {
    pub device: String,
    pub filesystem: String,
    pub total_gb: f64,
    pub used_gb: f64,
    pub free_gb: f64,
    pub usage_percent: f64,
    pub status: StatusLevel,
    pub status_detail: &'static str,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionError {
    pub device: String,
    pub filesystem: String,
    pub error: String,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PartitionEntry {
    Usage(PartitionInfo),
    Error(PartitionError),
}

#[derive(Debug, Clone, Serialize)]
pub struct DiskSnapshot {
    pub partitions: BTreeMap<String, PartitionEntry>,
    pub timestamp: Timestamp,
}

pub fn collect_disk(probe: &dyn MountProbe) -> Result<DiskSnapshot, CollectionError> {
    let mut partitions = BTreeMap::new();
    for mount in probe.mounts()? {
        let entry = match probe.usage(&mount.mount_point) {
            Ok(usage) => PartitionEntry::Usage(describe_partition(&mount, usage)),
            Err(err) => {
                warn!(mount = %mount.mount_point, error = %err, "cannot read filesystem usage");
                PartitionEntry::Error(partition_error(&mount, &err))
            }
        };
        partitions.insert(mount.mount_point, entry);
    }

    Ok(DiskSnapshot {
        partitions,
        timestamp: now(),
    })
}

fn describe_partition(mount: &MountEntry, usage: FsUsage) -> PartitionInfo {
    let total_gb = bytes_to_gb(usage.total_bytes);
    let used_gb = bytes_to_gb(usage.used_bytes);
    let usage_percent = usage.usage_percent();
    let status = Ladder::DISK.classify(usage_percent);
    let status_detail = disk_status_detail(status);

    PartitionInfo {
        device: mount.device.clone(),
        filesystem: mount.fs_type.clone(),
        total_gb,
        used_gb,
        free_gb: bytes_to_gb(usage.free_bytes),
        usage_percent,
        status,
        status_detail,
        explanation: format!(
            "{}. Using {used_gb}GB of {total_gb}GB ({usage_percent:.1}%). {status_detail}.",
            mount_purpose(&mount.mount_point)
        ),
    }
}

fn partition_error(mount: &MountEntry, err: &io::Error) -> PartitionError {
    let (error, explanation) = if err.kind() == io::ErrorKind::PermissionDenied {
        (
            "Permission denied".to_string(),
            format!(
                "Cannot access {} - may require elevated permissions",
                mount.mount_point
            ),
        )
    } else {
        (
            err.to_string(),
            format!("Cannot read usage for {}", mount.mount_point),
        )
    };
    PartitionError {
        device: mount.device.clone(),
        filesystem: mount.fs_type.clone(),
        error,
        explanation,
    }
}

pub fn disk_status_detail(status: StatusLevel) -> &'static str {
    match status {
        StatusLevel::Critical => "Critical - cleanup needed immediately",
        StatusLevel::High => "High - cleanup recommended",
        StatusLevel::Moderate => "Moderate - monitor growth",
        StatusLevel::Good => "Good - sufficient space",
    }
}

pub fn mount_purpose(mount_point: &str) -> String {
    match mount_point {
        "/" => "Root filesystem - contains system files and programs".to_string(),
        "/home" => "User data and personal files".to_string(),
        "/var" => "Variable data - logs, databases, cache".to_string(),
        "/tmp" => "Temporary files - cleaned on reboot".to_string(),
        "/boot" => "Boot files - kernel and bootloader".to_string(),
        other => format!("Mounted storage at {other}"),
    }
}

pub fn default_probe() -> Arc<dyn MountProbe> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(linux::ProcMounts::default())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(fallback::SysinfoDisks)
    }
}

#[cfg(target_os = "linux")]
pub mod linux {
    use super::{FsUsage, MountEntry, MountProbe};
    use crate::collectors::CollectionError;
    use std::collections::HashSet;
    use std::fs;
    use std::io;

    #[derive(Debug, Clone)]
    pub struct ProcMounts {
        mounts_path: String,
        filesystems_path: String,
    }

    impl Default for ProcMounts {
        fn default() -> Self {
            Self {
                mounts_path: "/proc/self/mounts".to_string(),
                filesystems_path: "/proc/filesystems".to_string(),
            }
        }
    }

    impl MountProbe for ProcMounts {
        fn mounts(&self) -> Result<Vec<MountEntry>, CollectionError> {
            let table = fs::read_to_string(&self.mounts_path).map_err(|err| {
                CollectionError::Query {
                    what: "mount table",
                    detail: format!("{}: {err}", self.mounts_path),
                }
            })?;
            let physical = fs::read_to_string(&self.filesystems_path)
                .map(|text| physical_fs_types(&text))
                .unwrap_or_default();
            Ok(parse_mounts(&table, &physical))
        }

        fn usage(&self, mount_point: &str) -> io::Result<FsUsage> {
            statvfs(mount_point)
        }
    }

    pub fn physical_fs_types(text: &str) -> HashSet<String> {
        let mut types: HashSet<String> = text
            .lines()
            .filter(|line| !line.starts_with("nodev"))
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        types.insert("zfs".to_string());
        types
    }

    pub fn parse_mounts(table: &str, physical: &HashSet<String>) -> Vec<MountEntry> {
        table
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let device = unescape(fields.next()?);
                let mount_point = unescape(fields.next()?);
                let fs_type = fields.next()?.to_string();
                if device.is_empty() || device == "none" {
                    return None;
                }
                if !physical.is_empty() && !physical.contains(&fs_type) {
                    return None;
                }
                Some(MountEntry {
                    device,
                    mount_point,
                    fs_type,
                })
            })
            .collect()
    }

    /// Decodes the octal escapes (`\040` etc.) the kernel uses for
    /// whitespace in mount fields.
    fn unescape(field: &str) -> String {
        let bytes = field.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'\\' && i + 4 <= bytes.len() {
                let octal = std::str::from_utf8(&bytes[i + 1..i + 4])
                    .ok()
                    .and_then(|digits| u8::from_str_radix(digits, 8).ok());
                if let Some(v) = octal {
                    out.push(v);
                    i += 4;
                    continue;
                }
            }
            out.push(bytes[i]);
            i += 1;
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    fn statvfs(mount_point: &str) -> io::Result<FsUsage> {
        let stat = nix::sys::statvfs::statvfs(mount_point).map_err(io::Error::from)?;

        let frsize = stat.fragment_size() as u64;
        let blocks = stat.blocks() as u64;
        let total_bytes = blocks.saturating_mul(frsize);
        let free_bytes = (stat.blocks_available() as u64).saturating_mul(frsize);
        let used_bytes = blocks
            .saturating_sub(stat.blocks_free() as u64)
            .saturating_mul(frsize);
        Ok(FsUsage {
            total_bytes,
            used_bytes,
            free_bytes,
        })
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        const FILESYSTEMS: &str = "nodev\tsysfs\nnodev\tproc\nnodev\ttmpfs\n\text4\n\tvfat\n";

        #[test]
        fn keeps_only_physical_filesystems() {
            let physical = physical_fs_types(FILESYSTEMS);
            assert!(physical.contains("ext4"));
            assert!(physical.contains("vfat"));
            assert!(physical.contains("zfs"));
            assert!(!physical.contains("proc"));

            let table = "\
/dev/sda2 / ext4 rw,relatime 0 0
proc /proc proc rw,nosuid 0 0
tmpfs /run tmpfs rw 0 0
/dev/sda1 /boot/efi vfat rw 0 0
/dev/sdb1 /mnt/My\\040Disk ext4 rw 0 0
";
            let mounts = parse_mounts(table, &physical);
            let points: Vec<&str> = mounts.iter().map(|m| m.mount_point.as_str()).collect();
            assert_eq!(points, vec!["/", "/boot/efi", "/mnt/My Disk"]);
            assert_eq!(mounts[0].device, "/dev/sda2");
            assert_eq!(mounts[0].fs_type, "ext4");
        }

        #[test]
        fn unknown_filesystem_list_keeps_device_mounts() {
            let mounts = parse_mounts("none /x tmpfs rw 0 0\n/dev/vda1 / xfs rw 0 0\n", &HashSet::new());
            assert_eq!(mounts.len(), 1);
            assert_eq!(mounts[0].mount_point, "/");
        }

        #[test]
        fn statvfs_missing_mount_is_an_io_error() {
            let err = statvfs("/nonexistent/mount/point").expect_err("no such path");
            assert_eq!(err.kind(), io::ErrorKind::NotFound);
        }

        #[test]
        fn statvfs_reads_root() {
            let usage = statvfs("/").expect("root is always statable");
            assert!(usage.total_bytes > 0);
            assert!(usage.used_bytes <= usage.total_bytes);
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub mod fallback {
    use super::{FsUsage, MountEntry, MountProbe};
    use crate::collectors::CollectionError;
    use std::io;
    use sysinfo::{DiskExt, System, SystemExt};

    #[derive(Debug, Clone, Copy, Default)]
    pub struct SysinfoDisks;

    impl MountProbe for SysinfoDisks {
        fn mounts(&self) -> Result<Vec<MountEntry>, CollectionError> {
            let mut system = System::new();
            system.refresh_disks_list();
            Ok(system
                .disks()
                .iter()
                .map(|d| MountEntry {
                    device: d.name().to_string_lossy().to_string(),
                    mount_point: d.mount_point().to_string_lossy().to_string(),
                    fs_type: String::from_utf8_lossy(d.file_system()).to_string(),
                })
                .collect())
        }

        fn usage(&self, mount_point: &str) -> io::Result<FsUsage> {
            let mut system = System::new();
            system.refresh_disks_list();
            system.refresh_disks();
            let disk = system
                .disks()
                .iter()
                .find(|d| d.mount_point().to_string_lossy() == mount_point)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "disk disappeared"))?;
            let total_bytes = disk.total_space();
            let free_bytes = disk.available_space();
            Ok(FsUsage {
                total_bytes,
                used_bytes: total_bytes.saturating_sub(free_bytes),
                free_bytes,
            })
        }
    }
}
