use metrics::{Counter, Histogram, Key, Label, Recorder};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use tracing::info;

use crate::{ArchiveError, Service};

/// Counters and timings of one service's archiver
pub struct ServiceMetrics {
    pub attempts: Counter,
    pub successes: Counter,
    pub failures: Counter,
    pub retry_prompts: Counter,
    pub archive_duration: Histogram,
}

impl ServiceMetrics {
    fn register(service: Service) -> Self {
        let name = service.name();
        Self {
            attempts: metrics::register_counter!("archive_attempts_total", "service" => name),
            successes: metrics::register_counter!("archive_successes_total", "service" => name),
            failures: metrics::register_counter!("archive_failures_total", "service" => name),
            retry_prompts: metrics::register_counter!("archive_retry_prompts_total", "service" => name),
            archive_duration: metrics::register_histogram!(
                "archive_duration_seconds",
                "service" => name
            ),
        }
    }

    fn register_with(recorder: &dyn Recorder, service: Service) -> Self {
        let key = |name: &'static str| {
            Key::from_parts(name, vec![Label::new("service", service.name())])
        };
        Self {
            attempts: recorder.register_counter(&key("archive_attempts_total")),
            successes: recorder.register_counter(&key("archive_successes_total")),
            failures: recorder.register_counter(&key("archive_failures_total")),
            retry_prompts: recorder.register_counter(&key("archive_retry_prompts_total")),
            archive_duration: recorder.register_histogram(&key("archive_duration_seconds")),
        }
    }

    pub fn record_attempt(&self) {
        self.attempts.increment(1);
    }

    pub fn record_outcome(&self, duration: Duration, success: bool) {
        if success {
            self.successes.increment(1);
        } else {
            self.failures.increment(1);
        }

        self.archive_duration.record(duration.as_secs_f64());
    }

    pub fn record_retry_prompt(&self) {
        self.retry_prompts.increment(1);
    }
}

/// Per-service metrics of a run
///
/// Handles are resolved against the global recorder when created, so build
/// this after [`install_metrics_recorder`] when metrics are exported.
pub struct ArchiveMetrics {
    archive_org: ServiceMetrics,
    archive_today: ServiceMetrics,
}

impl ArchiveMetrics {
    pub fn new() -> Self {
        Self {
            archive_org: ServiceMetrics::register(Service::ArchiveOrg),
            archive_today: ServiceMetrics::register(Service::ArchiveToday),
        }
    }

    /// Register against a specific recorder instead of the global one.
    pub fn with_recorder(recorder: &dyn Recorder) -> Self {
        Self {
            archive_org: ServiceMetrics::register_with(recorder, Service::ArchiveOrg),
            archive_today: ServiceMetrics::register_with(recorder, Service::ArchiveToday),
        }
    }

    pub fn service(&self, service: Service) -> &ServiceMetrics {
        match service {
            Service::ArchiveOrg => &self.archive_org,
            Service::ArchiveToday => &self.archive_today,
        }
    }
}

impl Default for ArchiveMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Install the Prometheus recorder globally and return a handle for rendering.
pub fn install_metrics_recorder() -> Result<PrometheusHandle, ArchiveError> {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    metrics::set_boxed_recorder(Box::new(recorder))
        .map_err(|e| ArchiveError::Configuration(format!("metrics recorder: {e}")))?;

    info!("Prometheus metrics recorder installed");
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_without_recorder_are_noops() {
        let metrics = ArchiveMetrics::new();
        let service = metrics.service(Service::ArchiveOrg);
        service.record_attempt();
        service.record_outcome(Duration::from_secs(3), true);
        service.record_retry_prompt();
    }

    #[test]
    fn test_counters_render_per_service() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let metrics = ArchiveMetrics::with_recorder(&recorder);

        let today = metrics.service(Service::ArchiveToday);
        today.record_attempt();
        today.record_attempt();
        today.record_outcome(Duration::from_millis(1500), false);
        metrics.service(Service::ArchiveOrg).record_attempt();

        let rendered = handle.render();
        assert!(rendered.contains("archive_attempts_total{service=\"archive.today\"} 2"));
        assert!(rendered.contains("archive_attempts_total{service=\"archive.org\"} 1"));
        assert!(rendered.contains("archive_failures_total{service=\"archive.today\"} 1"));
    }
}
