use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use kubernetriks_scheduler::config::SchedulerConfig;
use kubernetriks_scheduler::metrics::collector::MetricsCollector;
use kubernetriks_scheduler::metrics::printer::print_metrics;
use kubernetriks_scheduler::replay::{replay_balancing, replay_scheduling};
use kubernetriks_scheduler::trace::endpoints::EndpointsTrace;
use kubernetriks_scheduler::trace::generic::{GenericClusterTrace, GenericWorkloadTrace};

#[derive(Parser)]
#[command(about = "Replays traces through the pod scheduler and the service load balancer")]
struct Args {
    #[clap(short, long)]
    config_file: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Schedules pods of a workload trace onto nodes of a cluster trace.
    Schedule {
        #[clap(long)]
        cluster_trace_file: PathBuf,
        #[clap(short, long)]
        workload_trace_file: PathBuf,
    },
    /// Routes connections of an endpoints trace to service endpoints.
    Balance {
        #[clap(short, long)]
        endpoints_trace_file: PathBuf,
    },
}

fn read_trace<T: DeserializeOwned>(path: &Path) -> Result<T, Box<dyn std::error::Error>> {
    info!("Path to trace file: {:?}", path);
    let trace_yaml = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str::<T>(&trace_yaml)?)
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    info!("Path to config file: {:?}", args.config_file);
    let config = SchedulerConfig::from_file(&args.config_file)?;
    let metrics_collector = Arc::new(Mutex::new(MetricsCollector::new()));

    match args.command {
        Command::Schedule {
            cluster_trace_file,
            workload_trace_file,
        } => {
            let mut cluster_trace: GenericClusterTrace = read_trace(&cluster_trace_file)?;
            let mut workload_trace: GenericWorkloadTrace = read_trace(&workload_trace_file)?;
            let result = replay_scheduling(
                &config,
                &mut cluster_trace,
                &mut workload_trace,
                metrics_collector.clone(),
            )?;
            for (pod_key, node_name) in result.placements.iter() {
                println!("{} {}", pod_key, node_name);
            }
            for (pod_key, reason) in result.unschedulable.iter() {
                println!("{} <unschedulable: {}>", pod_key, reason);
            }
        }
        Command::Balance {
            endpoints_trace_file,
        } => {
            let mut endpoints_trace: EndpointsTrace = read_trace(&endpoints_trace_file)?;
            let result =
                replay_balancing(&config, &mut endpoints_trace, metrics_collector.clone())?;
            for connection in result.connections.iter() {
                let source = connection
                    .source
                    .map_or_else(|| "-".to_string(), |addr| addr.to_string());
                match &connection.endpoint {
                    Ok(endpoint) => println!(
                        "{} {} {} {}",
                        connection.timestamp, connection.service, source, endpoint
                    ),
                    Err(err) => println!(
                        "{} {} {} <error: {}>",
                        connection.timestamp, connection.service, source, err
                    ),
                }
            }
        }
    }

    if let Some(printer_config) = config.metrics_printer.as_ref() {
        print_metrics(metrics_collector, printer_config)?;
        info!("Metrics written to {:?}", printer_config.output_file);
    }
    Ok(())
}

fn main() -> ExitCode {
    // log level INFO by default
    let mut env_logger_builder = env_logger::builder();
    if env::var("RUST_LOG").is_err() {
        env_logger_builder.filter_level(log::LevelFilter::Info);
    }
    env_logger_builder.init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
