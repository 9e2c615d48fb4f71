//! Metrics collection and export for resource pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Point-in-time metrics snapshot for a pool.
///
/// # Examples
///
/// ```
/// use respool::{CancelToken, Pool};
///
/// let pool = Pool::<u32, &str>::new(|| Ok(7), |_| Ok(()));
///
/// let res = pool.get(&CancelToken::never()).unwrap();
/// let metrics = pool.metrics();
/// assert_eq!(metrics.created, 1);
/// assert_eq!(metrics.active_resources, 1);
/// pool.put(res);
/// ```
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Successful `create` callback invocations.
    pub created: usize,

    /// `destroy` callback invocations.
    pub destroyed: usize,

    /// `destroy` invocations that returned an error. Destroy errors are
    /// never propagated to callers, so this counter is the hook for
    /// monitoring them.
    pub destroy_failures: usize,

    /// Resources handed to callers.
    pub acquired: usize,

    /// Resources given back by callers.
    pub released: usize,

    /// Returns that were handed directly to a blocked waiter instead of
    /// parking in the idle queue.
    pub handoffs: usize,

    /// Resources currently checked out.
    pub active_resources: usize,

    /// Resources currently idle in the pool.
    pub idle_resources: usize,
}

impl PoolMetrics {
    /// Export metrics as a string map.
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("created".to_string(), self.created.to_string());
        metrics.insert("destroyed".to_string(), self.destroyed.to_string());
        metrics.insert(
            "destroy_failures".to_string(),
            self.destroy_failures.to_string(),
        );
        metrics.insert("acquired".to_string(), self.acquired.to_string());
        metrics.insert("released".to_string(), self.released.to_string());
        metrics.insert("handoffs".to_string(), self.handoffs.to_string());
        metrics.insert(
            "active_resources".to_string(),
            self.active_resources.to_string(),
        );
        metrics.insert(
            "idle_resources".to_string(),
            self.idle_resources.to_string(),
        );
        metrics
    }
}

/// Metrics exporter for Prometheus format.
pub struct MetricsExporter;

impl MetricsExporter {
    /// Export metrics in Prometheus exposition format.
    ///
    /// # Examples
    ///
    /// ```
    /// use respool::{CancelToken, Pool};
    ///
    /// let pool = Pool::<u32, &str>::new(|| Ok(7), |_| Ok(()));
    /// let res = pool.get(&CancelToken::never()).unwrap();
    /// pool.put(res);
    ///
    /// let output = pool.export_metrics_prometheus("demo", None);
    /// assert!(output.contains("respool_resources_created_total"));
    /// assert!(output.contains("pool=\"demo\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut output = String::new();
        let labels = Self::format_labels(pool_name, tags);

        // Gauge metrics
        output.push_str("# HELP respool_resources_active Resources currently checked out\n");
        output.push_str("# TYPE respool_resources_active gauge\n");
        output.push_str(&format!(
            "respool_resources_active{{{}}} {}\n",
            labels, metrics.active_resources
        ));

        output.push_str("# HELP respool_resources_idle Resources currently idle\n");
        output.push_str("# TYPE respool_resources_idle gauge\n");
        output.push_str(&format!(
            "respool_resources_idle{{{}}} {}\n",
            labels, metrics.idle_resources
        ));

        // Counter metrics
        output.push_str("# HELP respool_resources_created_total Resources created\n");
        output.push_str("# TYPE respool_resources_created_total counter\n");
        output.push_str(&format!(
            "respool_resources_created_total{{{}}} {}\n",
            labels, metrics.created
        ));

        output.push_str("# HELP respool_resources_destroyed_total Resources destroyed\n");
        output.push_str("# TYPE respool_resources_destroyed_total counter\n");
        output.push_str(&format!(
            "respool_resources_destroyed_total{{{}}} {}\n",
            labels, metrics.destroyed
        ));

        output.push_str("# HELP respool_acquired_total Resources handed to callers\n");
        output.push_str("# TYPE respool_acquired_total counter\n");
        output.push_str(&format!(
            "respool_acquired_total{{{}}} {}\n",
            labels, metrics.acquired
        ));

        output.push_str("# HELP respool_released_total Resources given back by callers\n");
        output.push_str("# TYPE respool_released_total counter\n");
        output.push_str(&format!(
            "respool_released_total{{{}}} {}\n",
            labels, metrics.released
        ));

        output.push_str("# HELP respool_handoffs_total Returns handed directly to a waiter\n");
        output.push_str("# TYPE respool_handoffs_total counter\n");
        output.push_str(&format!(
            "respool_handoffs_total{{{}}} {}\n",
            labels, metrics.handoffs
        ));

        output.push_str("# HELP respool_destroy_failures_total Destroy callbacks that failed\n");
        output.push_str("# TYPE respool_destroy_failures_total counter\n");
        output.push_str(&format!(
            "respool_destroy_failures_total{{{}}} {}\n",
            labels, metrics.destroy_failures
        ));

        output
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            for (key, value) in tags {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Internal metrics tracker
pub(crate) struct MetricsTracker {
    pub created: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub destroy_failures: AtomicUsize,
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub handoffs: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            created: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
            destroy_failures: AtomicUsize::new(0),
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            handoffs: AtomicUsize::new(0),
        }
    }

    pub fn snapshot(&self, active: usize, idle: usize) -> PoolMetrics {
        PoolMetrics {
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            destroy_failures: self.destroy_failures.load(Ordering::Relaxed),
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            handoffs: self.handoffs.load(Ordering::Relaxed),
            active_resources: active,
            idle_resources: idle,
        }
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}
