//! Runs the access point / multi-link station scenario and prints the flow
//! report as JSON on stdout.
//!
//! Usage: `mlo-scenario [scenario.json]`. Without a file the built-in
//! defaults apply. Log verbosity follows `RUST_LOG` (default `info`).

use mlosim_core::{Result, Scenario, ScenarioConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ScenarioConfig::from_path(path)?,
        None => ScenarioConfig::default(),
    };
    info!(
        stations = config.n_stations,
        distance_m = config.distance_m,
        payload_size = config.payload_size,
        sim_time_s = config.sim_time_s,
        "starting scenario"
    );

    let mut scenario = Scenario::build(&config)?;
    let report = scenario.run()?;
    let summary = report.summary();
    info!(
        flows = summary.flow_count,
        tx = summary.tx_packets,
        rx = summary.rx_packets,
        lost = summary.lost_packets,
        throughput_mbps = summary.avg_throughput_mbps,
        delay_ms = summary.avg_delay_ms,
        jitter_ms = summary.avg_jitter_ms,
        "averages across flows"
    );
    println!("{}", report.to_json()?);
    Ok(())
}
