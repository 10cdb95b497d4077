use crate::collectors::disk::{DiskSnapshot, PartitionEntry};
use crate::collectors::services::ServiceSummary;
use prometheus::core::Collector;
use prometheus::{opts, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at: Instant,
    pub homelab_requests_total: CounterVec,
    pub homelab_collect_errors_total: CounterVec,
    pub homelab_collect_duration_seconds: GaugeVec,
    pub homelab_cpu_usage_percent: Gauge,
    pub homelab_memory_usage_percent: Gauge,
    pub homelab_disk_usage_percent: GaugeVec,
    pub homelab_services_count: GaugeVec,
    pub homelab_uptime_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let homelab_requests_total = CounterVec::new(
            opts!("homelab_requests_total", "API requests served by endpoint"),
            &["endpoint"],
        )?;
        let homelab_collect_errors_total = CounterVec::new(
            opts!(
                "homelab_collect_errors_total",
                "Failed or degraded collector calls by collector"
            ),
            &["collector"],
        )?;
        let homelab_collect_duration_seconds = GaugeVec::new(
            opts!(
                "homelab_collect_duration_seconds",
                "Duration of the last collector call in seconds"
            ),
            &["collector"],
        )?;
        let homelab_cpu_usage_percent = Gauge::with_opts(opts!(
            "homelab_cpu_usage_percent",
            "Overall CPU usage from the last CPU sample (0..100)"
        ))?;
        let homelab_memory_usage_percent = Gauge::with_opts(opts!(
            "homelab_memory_usage_percent",
            "Memory usage from the last memory sample (0..100)"
        ))?;
        let homelab_disk_usage_percent = GaugeVec::new(
            opts!(
                "homelab_disk_usage_percent",
                "Disk usage in percent by mount point"
            ),
            &["mount"],
        )?;
        let homelab_services_count = GaugeVec::new(
            opts!(
                "homelab_services_count",
                "Service units per state bucket from the last listing"
            ),
            &["state"],
        )?;
        let homelab_uptime_seconds = Gauge::with_opts(opts!(
            "homelab_uptime_seconds",
            "Daemon uptime in seconds"
        ))?;

        register(&registry, &homelab_requests_total)?;
        register(&registry, &homelab_collect_errors_total)?;
        register(&registry, &homelab_collect_duration_seconds)?;
        register(&registry, &homelab_cpu_usage_percent)?;
        register(&registry, &homelab_memory_usage_percent)?;
        register(&registry, &homelab_disk_usage_percent)?;
        register(&registry, &homelab_services_count)?;
        register(&registry, &homelab_uptime_seconds)?;

        Ok(Arc::new(Self {
            registry,
            started_at: Instant::now(),
            homelab_requests_total,
            homelab_collect_errors_total,
            homelab_collect_duration_seconds,
            homelab_cpu_usage_percent,
            homelab_memory_usage_percent,
            homelab_disk_usage_percent,
            homelab_services_count,
            homelab_uptime_seconds,
        }))
    }

    pub fn inc_request(&self, endpoint: &str) {
        self.homelab_requests_total
            .with_label_values(&[endpoint])
            .inc();
    }

    pub fn inc_collect_error(&self, collector: &str) {
        self.homelab_collect_errors_total
            .with_label_values(&[collector])
            .inc();
    }

    pub fn observe_duration(&self, collector: &str, elapsed: Duration) {
        self.homelab_collect_duration_seconds
            .with_label_values(&[collector])
            .set(elapsed.as_secs_f64());
    }

    pub fn observe_cpu(&self, usage_percent: f64) {
        self.homelab_cpu_usage_percent.set(usage_percent);
    }

    pub fn observe_memory(&self, usage_percent: f64) {
        self.homelab_memory_usage_percent.set(usage_percent);
    }

    pub fn observe_disk(&self, snapshot: &DiskSnapshot) {
        self.homelab_disk_usage_percent.reset();
        for (mount, entry) in &snapshot.partitions {
            if let PartitionEntry::Usage(info) = entry {
                self.homelab_disk_usage_percent
                    .with_label_values(&[mount])
                    .set(info.usage_percent);
            }
        }
    }

    pub fn observe_services(&self, summary: &ServiceSummary) {
        let buckets = [
            ("total", summary.total_services),
            ("active", summary.active_count),
            ("inactive", summary.inactive_count),
            ("failed", summary.failed_count),
            ("masked", summary.masked_count),
        ];
        for (state, count) in buckets {
            self.homelab_services_count
                .with_label_values(&[state])
                .set(count as f64);
        }
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        self.homelab_uptime_seconds
            .set(self.started_at.elapsed().as_secs_f64().floor());

        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::disk::collect_disk;
    use crate::collectors::disk::tests::root_and_tmp;

    fn encoded(metrics: &Metrics) -> String {
        String::from_utf8(metrics.encode_metrics().expect("encode")).expect("utf8")
    }

    #[test]
    fn request_counter_is_labelled_by_endpoint() {
        let metrics = Metrics::new().expect("metrics");
        metrics.inc_request("cpu");
        metrics.inc_request("cpu");
        metrics.inc_request("memory");

        let text = encoded(&metrics);
        assert!(text.contains("homelab_requests_total{endpoint=\"cpu\"} 2"));
        assert!(text.contains("homelab_requests_total{endpoint=\"memory\"} 1"));
        assert!(text.contains("homelab_uptime_seconds"));
    }

    #[test]
    fn disk_gauges_skip_unreadable_mounts() {
        let metrics = Metrics::new().expect("metrics");
        let snapshot = collect_disk(&root_and_tmp()).expect("disk snapshot");
        metrics.observe_disk(&snapshot);

        let text = encoded(&metrics);
        assert!(text.contains("homelab_disk_usage_percent{mount=\"/\"} 96"));
        assert!(!text.contains("mount=\"/tmp\""));
    }

    #[test]
    fn service_counts_per_bucket() {
        let metrics = Metrics::new().expect("metrics");
        metrics.observe_services(&ServiceSummary {
            total_services: 7,
            active_count: 4,
            inactive_count: 1,
            failed_count: 1,
            masked_count: 0,
        });

        let text = encoded(&metrics);
        assert!(text.contains("homelab_services_count{state=\"total\"} 7"));
        assert!(text.contains("homelab_services_count{state=\"failed\"} 1"));
        assert!(text.contains("homelab_services_count{state=\"masked\"} 0"));
    }

    #[test]
    fn collect_errors_and_durations() {
        let metrics = Metrics::new().expect("metrics");
        metrics.inc_collect_error("services");
        metrics.observe_duration("cpu", Duration::from_millis(1500));

        let text = encoded(&metrics);
        assert!(text.contains("homelab_collect_errors_total{collector=\"services\"} 1"));
        assert!(text.contains("homelab_collect_duration_seconds{collector=\"cpu\"} 1.5"));
    }
}
