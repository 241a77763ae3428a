//! # Application State
//!
//! Shared state behind every HTTP and WebSocket handler: the runtime
//! configuration, the per-client context catalog discovered at startup, and
//! the service metrics. Everything mutable sits behind `Arc<RwLock<T>>` so
//! concurrent requests read without blocking each other and updates are
//! serialized.

use crate::config::AppConfig;
use crate::tools::context::ContextCatalog;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    /// Runtime configuration, updatable through the config endpoint.
    pub config: Arc<RwLock<AppConfig>>,

    /// Prompt fragments for the configured client, discovered once at startup.
    pub catalog: Arc<ContextCatalog>,

    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started.
    pub start_time: Instant,
}

/// Counters accumulated across all requests and calls.
#[derive(Debug, Default)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Telephone calls currently in progress.
    pub active_calls: u32,
    /// Per-endpoint statistics, keyed by "METHOD /path".
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Build the state, discovering the context catalog for the configured
    /// client.
    pub fn new(config: AppConfig) -> Self {
        let catalog = Arc::new(ContextCatalog::discover(
            Path::new(&config.client.prompts_dir),
            &config.client.client_id,
        ));
        Self {
            config: Arc::new(RwLock::new(config)),
            catalog,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// State with a prebuilt catalog, for tests.
    #[cfg(test)]
    pub fn with_catalog(config: AppConfig, catalog: Arc<ContextCatalog>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            catalog,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Snapshot the current configuration without holding the lock.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Account one finished HTTP request under one lock acquisition.
    ///
    /// `duration_ms` is `None` for the media WebSocket upgrade: its response
    /// completes when the call hangs up, so its elapsed time says nothing
    /// about server latency and would swamp the averages.
    pub fn record_request(&self, endpoint: &str, duration_ms: Option<u64>, failed: bool) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
        if failed {
            metrics.error_count += 1;
        }

        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();
        endpoint_metric.request_count += 1;
        if let Some(ms) = duration_ms {
            endpoint_metric.total_duration_ms += ms;
        }
        if failed {
            endpoint_metric.error_count += 1;
        }
    }

    /// Admit a new call unless the concurrent-call limit is reached.
    ///
    /// Returns `false` without changing anything when at capacity; the caller
    /// must not start a session in that case.
    pub fn try_begin_call(&self) -> bool {
        let limit = self.config.read().unwrap().performance.max_concurrent_calls;
        let mut metrics = self.metrics.write().unwrap();
        if (metrics.active_calls as usize) >= limit {
            return false;
        }
        metrics.active_calls += 1;
        true
    }

    pub fn end_call(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_calls > 0 {
            metrics.active_calls -= 1;
        }
    }

    pub fn active_calls(&self) -> u32 {
        self.metrics.read().unwrap().active_calls
    }

    /// Consistent copy of the metrics for the metrics endpoint.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_calls: metrics.active_calls,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn test_state() -> AppState {
        let catalog = Arc::new(ContextCatalog::from_fragments(
            "test",
            "base",
            StdHashMap::new(),
        ));
        AppState::with_catalog(AppConfig::default(), catalog)
    }

    #[test]
    fn test_call_admission_respects_limit() {
        let state = test_state();
        state.config.write().unwrap().performance.max_concurrent_calls = 2;

        assert!(state.try_begin_call());
        assert!(state.try_begin_call());
        assert!(!state.try_begin_call());
        assert_eq!(state.active_calls(), 2);

        state.end_call();
        assert!(state.try_begin_call());
    }

    #[test]
    fn test_end_call_never_underflows() {
        let state = test_state();
        state.end_call();
        assert_eq!(state.active_calls(), 0);
    }

    #[test]
    fn test_endpoint_metrics_accumulate() {
        let state = test_state();
        state.record_request("GET /health", Some(10), false);
        state.record_request("GET /health", Some(30), true);

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.request_count, 2);
        assert_eq!(snapshot.error_count, 1);
        let metric = &snapshot.endpoint_metrics["GET /health"];
        assert_eq!(metric.request_count, 2);
        assert!((metric.average_duration_ms() - 20.0).abs() < f64::EPSILON);
        assert!((metric.error_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_media_upgrade_counted_without_latency() {
        let state = test_state();
        state.record_request("GET /ws/media", None, false);
        state.record_request("GET /ws/media", None, false);

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.request_count, 2);
        let metric = &snapshot.endpoint_metrics["GET /ws/media"];
        assert_eq!(metric.request_count, 2);
        // Call lifetimes never pollute the latency figures.
        assert_eq!(metric.total_duration_ms, 0);
        assert!(metric.average_duration_ms().abs() < f64::EPSILON);
    }
}
