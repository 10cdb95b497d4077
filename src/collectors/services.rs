use crate::collectors::classify::{self, CategoryTable, CRITICAL_SERVICES};
use crate::collectors::CollectionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tokio::time;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnitRecord {
    pub unit: String,
    #[serde(default)]
    pub description: String,
    pub load: String,
    pub active: String,
    pub sub: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitScope {
    All,
    ActiveOnly,
}

#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn list_units(&self, scope: UnitScope) -> Result<Vec<UnitRecord>, CollectionError>;
    async fn active_state(&self, unit: &str) -> Result<String, CollectionError>;
}

#[derive(Debug, Clone)]
pub struct Systemctl {
    path: String,
    timeout: Duration,
}

impl Systemctl {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Output, CollectionError> {
        let child = Command::new(&self.path)
            .args(args)
            .kill_on_drop(true)
            .output();

        match time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(CollectionError::ServiceManager {
                detail: format!("failed to run {}: {err}", self.path),
            }),
            Err(_elapsed) => Err(CollectionError::ServiceManager {
                detail: format!(
                    "{} {} timed out after {}ms",
                    self.path,
                    args.first().copied().unwrap_or_default(),
                    self.timeout.as_millis()
                ),
            }),
        }
    }
}

#[async_trait]
impl ServiceManager for Systemctl {
    async fn list_units(&self, scope: UnitScope) -> Result<Vec<UnitRecord>, CollectionError> {
        let state_arg = match scope {
            UnitScope::All => "--all",
            UnitScope::ActiveOnly => "--state=active",
        };
        let output = self
            .run(&[
                "list-units",
                "--type=service",
                state_arg,
                "--output=json",
                "--no-pager",
            ])
            .await?;

        if !output.status.success() {
            return Err(CollectionError::ServiceManager {
                detail: format!(
                    "{} list-units exited with {}: {}",
                    self.path,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|err| CollectionError::ServiceManager {
            detail: format!("unexpected list-units output: {err}"),
        })
    }

    async fn active_state(&self, unit: &str) -> Result<String, CollectionError> {
        // is-active exits non-zero for every state but "active"; stdout is
        // the answer either way.
        let output = self.run(&["is-active", unit]).await?;

        let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if state.is_empty() {
            return Err(CollectionError::ServiceManager {
                detail: format!(
                    "{} is-active {unit} printed nothing: {}",
                    self.path,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(state)
    }
}

#[derive(Debug, Clone)]
pub enum Listing<T> {
    Complete(T),
    Degraded { value: T, cause: String },
}

impl<T> Listing<T> {
    pub fn value(&self) -> &T {
        match self {
            Listing::Complete(value) | Listing::Degraded { value, .. } => value,
        }
    }

    pub fn cause(&self) -> Option<&str> {
        match self {
            Listing::Complete(_) => None,
            Listing::Degraded { cause, .. } => Some(cause),
        }
    }
}

impl<T: Serialize> Serialize for Listing<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Rendered<'a, T> {
            #[serde(skip_serializing_if = "Option::is_none")]
            error: Option<&'a str>,
            #[serde(flatten)]
            value: &'a T,
        }

        Rendered {
            error: self.cause(),
            value: self.value(),
        }
        .serialize(serializer)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceUnit {
    pub name: String,
    pub description: String,
    pub load_state: String,
    pub active_state: String,
    pub sub_state: String,
    pub category: String,
    pub educational_note: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateBucket {
    Active,
    Inactive,
    Failed,
    Masked,
}

/// Bucket precedence: active state first, then a masked load state. Units
/// in any other state ("activating", "reloading", ...) get no bucket.
pub fn bucket_for(active_state: &str, load_state: &str) -> Option<StateBucket> {
    match active_state {
        "active" => Some(StateBucket::Active),
        "inactive" => Some(StateBucket::Inactive),
        "failed" => Some(StateBucket::Failed),
        _ if load_state == "masked" => Some(StateBucket::Masked),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceBuckets {
    pub active: Vec<ServiceUnit>,
    pub inactive: Vec<ServiceUnit>,
    pub failed: Vec<ServiceUnit>,
    pub masked: Vec<ServiceUnit>,
}

impl ServiceBuckets {
    fn push(&mut self, bucket: StateBucket, unit: ServiceUnit) {
        match bucket {
            StateBucket::Active => self.active.push(unit),
            StateBucket::Inactive => self.inactive.push(unit),
            StateBucket::Failed => self.failed.push(unit),
            StateBucket::Masked => self.masked.push(unit),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceSummary {
    pub total_services: usize,
    pub active_count: usize,
    pub inactive_count: usize,
    pub failed_count: usize,
    pub masked_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceRegistrySnapshot {
    pub services: ServiceBuckets,
    pub summary: ServiceSummary,
    pub educational_context: SystemdContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemdContext {
    pub what_is_systemd: &'static str,
    pub what_are_services: &'static str,
    pub service_states: BTreeMap<&'static str, &'static str>,
    pub learning_commands: Vec<&'static str>,
}

impl SystemdContext {
    pub fn new() -> Self {
        Self {
            what_is_systemd: "systemd is the init system and service manager for modern Linux distributions. It manages the startup and running of system services.",
            what_are_services: "Services are background programs that provide system functionality like networking, audio, printing, and user session management.",
            service_states: BTreeMap::from([
                ("active", "Service is currently running and operational"),
                ("inactive", "Service is stopped but can be started when needed"),
                ("failed", "Service failed to start or crashed - may need attention"),
                ("masked", "Service is completely disabled and cannot be started"),
            ]),
            learning_commands: vec![
                "systemctl status <service> - Check detailed status of a service",
                "systemctl start <service> - Start a stopped service",
                "systemctl stop <service> - Stop a running service",
                "systemctl enable <service> - Enable service to start at boot",
                "systemctl disable <service> - Disable service from starting at boot",
            ],
        }
    }
}

impl Default for SystemdContext {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn list_services(
    manager: &dyn ServiceManager,
    table: &CategoryTable,
) -> Listing<ServiceRegistrySnapshot> {
    let units = match manager.list_units(UnitScope::All).await {
        Ok(units) => units,
        Err(err) => {
            warn!(error = %err, "service listing degraded");
            return Listing::Degraded {
                value: ServiceRegistrySnapshot {
                    services: ServiceBuckets::default(),
                    summary: ServiceSummary::default(),
                    educational_context: SystemdContext::new(),
                },
                cause: format!("Failed to get systemd services: {err}"),
            };
        }
    };

    let total_services = units.len();
    let mut buckets = ServiceBuckets::default();
    for record in units {
        let Some(bucket) = bucket_for(&record.active, &record.load) else {
            debug!(unit = %record.unit, active = %record.active, load = %record.load, "unit has no state bucket");
            continue;
        };
        buckets.push(bucket, describe_unit(record, table));
    }

    let summary = ServiceSummary {
        total_services,
        active_count: buckets.active.len(),
        inactive_count: buckets.inactive.len(),
        failed_count: buckets.failed.len(),
        masked_count: buckets.masked.len(),
    };

    Listing::Complete(ServiceRegistrySnapshot {
        services: buckets,
        summary,
        educational_context: SystemdContext::new(),
    })
}

fn describe_unit(record: UnitRecord, table: &CategoryTable) -> ServiceUnit {
    ServiceUnit {
        category: table.classify(&record.unit).to_string(),
        educational_note: classify::annotate(&record.unit).to_string(),
        name: record.unit,
        description: record.description,
        load_state: record.load,
        active_state: record.active,
        sub_state: record.sub,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorizedUnit {
    pub name: String,
    pub description: String,
    pub educational_note: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorizedServices {
    pub categories: BTreeMap<String, Vec<CategorizedUnit>>,
    pub category_descriptions: BTreeMap<String, String>,
}

pub async fn categorize_services(
    manager: &dyn ServiceManager,
    table: &CategoryTable,
) -> Listing<CategorizedServices> {
    let mut categories: BTreeMap<String, Vec<CategorizedUnit>> = table
        .names()
        .map(|name| (name.to_string(), Vec::new()))
        .collect();
    let category_descriptions = table.descriptions();

    let units = match manager.list_units(UnitScope::ActiveOnly).await {
        Ok(units) => units,
        Err(err) => {
            warn!(error = %err, "service categorisation degraded");
            return Listing::Degraded {
                value: CategorizedServices {
                    categories,
                    category_descriptions,
                },
                cause: format!("Failed to categorize services: {err}"),
            };
        }
    };

    for record in units {
        let category = table.classify(&record.unit);
        let entry = CategorizedUnit {
            educational_note: classify::annotate(&record.unit).to_string(),
            name: record.unit,
            description: record.description,
        };
        categories.entry(category.to_string()).or_default().push(entry);
    }

    Listing::Complete(CategorizedServices {
        categories,
        category_descriptions,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct CriticalServiceStatus {
    pub status: String,
    pub is_critical: bool,
    pub importance: String,
    pub troubleshooting: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CriticalServicesReport {
    pub critical_services: BTreeMap<String, CriticalServiceStatus>,
    pub educational_context: BTreeMap<&'static str, &'static str>,
}

pub async fn critical_services(manager: &dyn ServiceManager) -> CriticalServicesReport {
    let mut critical_services = BTreeMap::new();
    for name in CRITICAL_SERVICES {
        let status = match manager.active_state(name).await {
            Ok(state) => state,
            Err(err) => {
                warn!(unit = name, error = %err, "critical service state unknown");
                "unknown".to_string()
            }
        };
        critical_services.insert(
            name.to_string(),
            CriticalServiceStatus {
                status,
                is_critical: true,
                importance: classify::importance(name).to_string(),
                troubleshooting: classify::troubleshooting(name).into_owned(),
            },
        );
    }

    CriticalServicesReport {
        critical_services,
        educational_context: BTreeMap::from([
            (
                "what_are_critical_services",
                "Critical services are essential system components that enable basic functionality like networking, display management, and user sessions.",
            ),
            (
                "why_monitor_them",
                "Monitoring critical services helps identify system issues early and ensures your desktop environment remains stable and functional.",
            ),
            (
                "learning_objective",
                "Understanding which services are critical helps in system troubleshooting and maintenance planning.",
            ),
        ]),
    }
}
