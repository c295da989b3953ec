//! Metric names and Prometheus text format primitives.

use std::fmt::{self, Write};

/// Per-node CPU core count.
pub const CPU_COUNT_METRIC: &str = "rancher_cluster_cpu_count";
pub const CPU_COUNT_HELP: &str = "Rancher Cluster CPU count";

/// Per-node memory total in KiB.
pub const MEMORY_COUNT_METRIC: &str = "rancher_cluster_memory_count";
pub const MEMORY_COUNT_HELP: &str = "Rancher Cluster memory total in KiB";

/// Label names of the per-node gauges, in rendering order.
pub const NODE_LABELS: [&str; 3] = ["cluster", "node", "type"];

/// Exporter self-metrics.
pub const SCRAPES_METRIC: &str = "rancher_exporter_scrapes_total";
pub const SCRAPE_FAILURES_METRIC: &str = "rancher_exporter_scrape_failures_total";
pub const LAST_DURATION_METRIC: &str = "rancher_exporter_last_scrape_duration_seconds";
pub const LAST_SUCCESS_METRIC: &str = "rancher_exporter_last_success_timestamp_seconds";

/// Prometheus metric type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrometheusType {
    Counter,
    Gauge,
}

impl PrometheusType {
    /// Get the TYPE comment string for Prometheus exposition format.
    pub fn as_str(&self) -> &'static str {
        match self {
            PrometheusType::Counter => "counter",
            PrometheusType::Gauge => "gauge",
        }
    }
}

impl fmt::Display for PrometheusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Escape special characters in label values.
pub fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Escape HELP text (backslash and newline only).
pub fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Format labels for Prometheus exposition format.
///
/// Labels are written in the given order.
pub fn format_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}

/// Format a floating point value for Prometheus.
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// Write the `# HELP` and `# TYPE` lines of a metric family.
pub fn write_header(out: &mut String, name: &str, help: &str, metric_type: PrometheusType) {
    let _ = writeln!(out, "# HELP {} {}", name, escape_help(help));
    let _ = writeln!(out, "# TYPE {} {}", name, metric_type);
}

/// Write one sample line.
pub fn write_sample(out: &mut String, name: &str, labels: &[(&str, &str)], value: impl fmt::Display) {
    let _ = writeln!(out, "{}{} {}", name, format_labels(labels), value);
}
