use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use hrdl_ingest::config::{IngestConfig, PcapTransport, SourceKind, DEFAULT_QUEUE_CAPACITY};
use hrdl_ingest::engine::{DebugMode, Engine};
use hrdl_ingest::hrdl::accounting::Selector;
use hrdl_ingest::metrics::IngestMetrics;
use hrdl_ingest::{report, source};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "hrdl-ingest")]
#[command(about = "Spacecraft downlink ingest: CADU validation, gap accounting and HRDL reassembly", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// Byte source protocol (udp, tcp, file, pcap+udp, pcap+tcp)
    #[arg(short = 'p', long, default_value = "file")]
    proto: String,

    /// Per-CADU HRDFE timestamp prefix (file sources only)
    #[arg(long)]
    hrdfe: bool,

    /// Capacity of the CADU queue between decoder and consumer
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue: usize,

    /// Socket address (udp/tcp) or one or more file paths
    #[arg(required = true)]
    inputs: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List every decoded CADU with its gap and integrity state
    Cadus {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Report sequence discontinuities in the CADU stream
    Gaps {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Reassemble HRDL packets and report per-key statistics
    Packets {
        #[command(flatten)]
        source: SourceArgs,

        /// Report by `channel` or by `origin`
        #[arg(long, default_value = "channel")]
        by: String,

        /// Dump each packet while accounting (raw, header)
        #[arg(long)]
        debug: Option<String>,

        /// Zero-fill reassembly gaps instead of resynchronising
        #[arg(long)]
        gap_fill: bool,

        /// Emit the summary as JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn source_kind(args: &SourceArgs) -> Result<SourceKind> {
    let paths = || args.inputs.iter().map(PathBuf::from).collect::<Vec<_>>();
    match args.proto.as_str() {
        "udp" => Ok(SourceKind::Udp(
            args.inputs[0].parse().with_context(|| format!("invalid udp address {}", args.inputs[0]))?,
        )),
        "tcp" => Ok(SourceKind::Tcp(
            args.inputs[0].parse().with_context(|| format!("invalid tcp address {}", args.inputs[0]))?,
        )),
        "file" => Ok(SourceKind::File { paths: paths(), hrdfe: args.hrdfe }),
        "pcap+udp" => Ok(SourceKind::Pcap { paths: paths(), transport: PcapTransport::Udp }),
        "pcap+tcp" => Ok(SourceKind::Pcap { paths: paths(), transport: PcapTransport::Tcp }),
        other => bail!("unsupported protocol {other}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let (source_args, selector, debug, gap_fill, json) = match &cli.command {
        Commands::Cadus { source } | Commands::Gaps { source } => (source, Selector::Channel, None, false, false),
        Commands::Packets { source, by, debug, gap_fill, json } => {
            let selector: Selector = by.parse().map_err(anyhow::Error::msg)?;
            let debug = debug
                .as_deref()
                .map(|s| s.parse::<DebugMode>().map_err(anyhow::Error::msg))
                .transpose()?;
            (source, selector, debug, *gap_fill, *json)
        }
    };

    let mut config = IngestConfig::new(source_kind(source_args)?);
    config.selector = selector;
    config.queue_capacity = source_args.queue.max(1);
    config.gap_fill = gap_fill;

    let metrics = Arc::new(IngestMetrics::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let spawned = source::spawn(&config, Arc::clone(&metrics), shutdown_rx.clone())
        .await
        .context("cannot attach to byte source")?;
    match spawned.local_addr {
        Some(addr) => info!("ingest.event=attached source={} addr={addr}", config.source.describe()),
        None => info!("ingest.event=attached source={}", config.source.describe()),
    }

    let interrupt = shutdown_tx.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("ingest.event=interrupt");
            let _ = interrupt.send(true);
        }
    });

    let engine = Engine::new(Arc::clone(&metrics));
    match &cli.command {
        Commands::Cadus { .. } => {
            let tracker = engine.run_cadus(spawned.cadus, shutdown_rx).await;
            report::print_cadu_summary(&tracker);
        }
        Commands::Gaps { .. } => {
            let run = engine.run_gaps(spawned.cadus, shutdown_rx).await;
            report::print_gap_summary(&run.tracker, run.in_gaps, run.wall);
        }
        Commands::Packets { .. } => {
            let summary = engine.run_packets(spawned.cadus, shutdown_rx, &config, debug).await;
            if json {
                println!("{}", report::packet_summary_json(&summary, metrics.snapshot()));
            } else {
                report::print_packet_summary(&summary);
            }
        }
    }

    let dropped = metrics.dropped();
    if dropped > 0 {
        warn!("ingest.event=overload cadus_dropped={dropped}");
    }

    // Stop the producer and release its socket or file handles.
    let _ = shutdown_tx.send(true);
    spawned.handle.abort();
    Ok(())
}
