use anyhow::Context;
use clap::Parser;
use generator::stations;
use http_bridge::bridge::{default_bind_address, HttpBridge};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use workflow::config::WorkflowConfig;
use workflow::journal::Journal;
use workflow::runner::Runner;

mod generator;
mod http_bridge;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Storm tracking workflow driver")]
struct Args {
    /// Run the configured number of synthetic scans and journal the events
    #[arg(long, default_value_t = false)]
    offline: bool,
    /// Load a workflow config from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    #[arg(long, default_value = "KTLX")]
    station: String,
    #[arg(long, default_value_t = 6)]
    scans: usize,
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Keep the HTTP bridge alive for snapshot queries and generated scans
    #[arg(long, default_value_t = false)]
    serve: bool,
    #[arg(long)]
    bind: Option<SocketAddr>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let workflow_config = if let Some(path) = args.workflow {
        WorkflowConfig::load(path)?
    } else {
        WorkflowConfig::from_args(&args.station, args.scans, args.seed)
    };

    let runtime = TokioBuilder::new_multi_thread()
        .enable_all()
        .build()
        .context("creating tokio runtime")?;
    let runner = Arc::new(Runner::new(workflow_config));

    runtime.block_on(async {
        if args.offline {
            let mut journal = Journal::open(&runner.config().journal)?;
            let result = runner
                .execute(Some(&mut journal))
                .await
                .context("running offline workflow")?;

            for report in &result.reports {
                println!(
                    "{} {} pass {} -> regions {}, cells {}, births {}, terminations {}",
                    report.station,
                    report.scan_time.format("%H:%M:%SZ"),
                    report.sequence,
                    report.regions,
                    report.snapshot.cells.len(),
                    report.births(),
                    report.terminations()
                );
            }
            if let Some(snapshot) = result.last_snapshot() {
                for record in &snapshot.cells {
                    let near = stations::nearest(record.cell.centroid)
                        .map(|(site, km)| {
                            format!("{:.0} km from {} ({}, {})", km, site.code, site.name, site.state)
                        })
                        .unwrap_or_default();
                    println!(
                        "  {} {:?} peak {:.1} dBZ, rotation {:?}, hail {:.0}%, threat {:?}, {}",
                        record.cell.id,
                        record.trend,
                        record.cell.peak_dbz,
                        record.cell.rotation.class,
                        record.cell.hail.probability * 100.0,
                        record.threat.tier,
                        near
                    );
                }
            }
            println!(
                "Journaled {} of {} events to {}",
                journal.written(),
                result.event_count(),
                journal.path().display()
            );
        }

        if args.serve {
            let address = args.bind.unwrap_or_else(default_bind_address);
            tokio::spawn(HttpBridge::serve(Arc::clone(&runner), address));
            println!("HTTP bridge running on {} (Ctrl+C to stop)...", address);
            signal::ctrl_c().await.context("awaiting Ctrl+C to exit")?;
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}
