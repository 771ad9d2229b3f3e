use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use prettytable::{row, Table};
use serde::{Deserialize, Serialize};

use crate::metrics::collector::{EstimatorWrapper, MetricsCollector};

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub enum OutputFormat {
    #[default]
    JSON,
    PrettyTable,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct MetricsPrinterConfig {
    #[serde(default)]
    pub format: OutputFormat,
    pub output_file: PathBuf,
}

pub fn print_metrics(
    collector: Arc<Mutex<MetricsCollector>>,
    config: &MetricsPrinterConfig,
) -> std::io::Result<()> {
    let mut metrics_file = File::create(&config.output_file)?;
    let metrics = collector.lock();
    match config.format {
        OutputFormat::PrettyTable => write_metrics_as_pretty_table(&metrics, &mut metrics_file),
        OutputFormat::JSON => write_metrics_as_json(&metrics, &mut metrics_file),
    }
}

fn stats_row(table: &mut Table, name: &str, stats: &EstimatorWrapper) {
    table.add_row(row![
        name,
        stats.min(),
        stats.max(),
        stats.mean(),
        stats.population_variance()
    ]);
}

pub fn write_metrics_as_pretty_table<W: Write>(
    metrics: &MetricsCollector,
    out: &mut W,
) -> std::io::Result<()> {
    let mut aggregated_table = Table::new();
    aggregated_table.add_row(row!["Metric", "Count"]);
    aggregated_table.add_row(row!["Total nodes in trace", metrics.total_nodes_in_trace]);
    aggregated_table.add_row(row!["Total pods in trace", metrics.total_pods_in_trace]);
    aggregated_table.add_row(row!["Pods scheduled", metrics.pods_scheduled]);
    aggregated_table.add_row(row!["Pods unschedulable", metrics.pods_unschedulable]);
    aggregated_table.add_row(row!["Scheduling errors", metrics.scheduling_errors]);
    aggregated_table.add_row(row!["Pods left in queue", metrics.pods_left_in_queue]);
    aggregated_table.add_row(row!["Endpoints selected", metrics.endpoints_selected]);
    aggregated_table.add_row(row![
        "Endpoint lookup failures",
        metrics.endpoint_lookup_failures
    ]);

    let mut stats_table = Table::new();
    stats_table.add_row(row!["Metric", "Min", "Max", "Mean", "Variance"]);
    stats_row(
        &mut stats_table,
        "Scheduling algorithm latency",
        &metrics.scheduling_algorithm_latency_stats,
    );
    stats_row(&mut stats_table, "Pod queue time", &metrics.pod_queue_time_stats);
    stats_row(
        &mut stats_table,
        "Pod scheduling attempts",
        &metrics.pod_scheduling_attempts_stats,
    );
    stats_row(
        &mut stats_table,
        "Endpoint selection latency",
        &metrics.endpoint_selection_latency_stats,
    );

    aggregated_table.print(out)?;
    stats_table.print(out)?;
    Ok(())
}

#[derive(Serialize)]
struct MetricsJSON {
    counters: Counters,
    timings: Timings,
}

#[derive(Serialize)]
struct Counters {
    total_nodes_in_trace: u64,
    total_pods_in_trace: u64,
    pods_scheduled: u64,
    pods_unschedulable: u64,
    scheduling_errors: u64,
    pods_left_in_queue: u64,
    endpoints_selected: u64,
    endpoint_lookup_failures: u64,
}

#[derive(Serialize)]
struct Timings {
    scheduling_algorithm_latency: TimingsStats,
    pod_queue_time: TimingsStats,
    pod_scheduling_attempts: TimingsStats,
    endpoint_selection_latency: TimingsStats,
}

#[derive(Serialize)]
struct TimingsStats {
    min: f64,
    max: f64,
    mean: f64,
    variance: f64,
}

impl From<&EstimatorWrapper> for TimingsStats {
    fn from(stats: &EstimatorWrapper) -> Self {
        Self {
            min: stats.min(),
            max: stats.max(),
            mean: stats.mean(),
            variance: stats.population_variance(),
        }
    }
}

pub fn write_metrics_as_json<W: Write>(
    metrics: &MetricsCollector,
    out: &mut W,
) -> std::io::Result<()> {
    let metrics = MetricsJSON {
        counters: Counters {
            total_nodes_in_trace: metrics.total_nodes_in_trace,
            total_pods_in_trace: metrics.total_pods_in_trace,
            pods_scheduled: metrics.pods_scheduled,
            pods_unschedulable: metrics.pods_unschedulable,
            scheduling_errors: metrics.scheduling_errors,
            pods_left_in_queue: metrics.pods_left_in_queue,
            endpoints_selected: metrics.endpoints_selected,
            endpoint_lookup_failures: metrics.endpoint_lookup_failures,
        },
        timings: Timings {
            scheduling_algorithm_latency: (&metrics.scheduling_algorithm_latency_stats).into(),
            pod_queue_time: (&metrics.pod_queue_time_stats).into(),
            pod_scheduling_attempts: (&metrics.pod_scheduling_attempts_stats).into(),
            endpoint_selection_latency: (&metrics.endpoint_selection_latency_stats).into(),
        },
    };

    let serialized_json = serde_json::to_string_pretty(&metrics)?;
    out.write_all(serialized_json.as_bytes())
}
