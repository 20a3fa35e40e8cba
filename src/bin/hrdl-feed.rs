use anyhow::{Context, Result};
use clap::Parser;
use hrdl_ingest::cadu::CADU_BODY_LEN;
use hrdl_ingest::fixtures;
use log::info;
use rand::Rng;
use std::fs;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{sleep, Duration};

#[derive(Parser, Debug)]
#[command(name = "hrdl-feed")]
#[command(about = "Frame a byte stream into CADUs and emit them at a fixed rate, with optional loss injection.")]
struct Args {
    /// Transport to the receiver (udp, tcp)
    #[arg(short = 'p', long, default_value = "udp")]
    proto: String,

    /// Payload stream to frame; zero-filled bodies when omitted
    #[arg(short = 'f', long)]
    file: Option<PathBuf>,

    /// Number of CADUs to emit (0 = until the payload stream drains)
    #[arg(short = 'c', long, default_value_t = 0)]
    count: u32,

    /// Milliseconds between CADUs
    #[arg(short = 'r', long, default_value_t = 500)]
    rate_ms: u64,

    /// Randomized drop-window threshold; 0 disables loss injection
    #[arg(short = 't', long, default_value_t = 0)]
    threshold: u32,

    /// Receiver addresses
    #[arg(required = true)]
    targets: Vec<String>,
}

enum Out {
    Udp(UdpSocket),
    Tcp(TcpStream),
}

impl Out {
    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        match self {
            Out::Udp(socket) => {
                socket.send(frame).await.context("udp send")?;
            }
            Out::Tcp(stream) => {
                stream.write_all(frame).await.context("tcp write")?;
            }
        }
        Ok(())
    }
}

/// Alternates randomly sized send and drop windows, so the receiver sees
/// sequence gaps of realistic shapes.
struct GapInjector {
    threshold: u32,
    limit: u32,
    current: u32,
    dropping: bool,
}

impl GapInjector {
    fn new(threshold: u32) -> Option<Self> {
        (threshold > 0).then(|| Self {
            threshold,
            limit: rand::thread_rng().gen_range(1..=threshold),
            current: 0,
            dropping: false,
        })
    }

    fn should_drop(&mut self) -> bool {
        self.current += 1;
        if self.current >= self.limit {
            self.limit = rand::thread_rng().gen_range(1..=self.threshold);
            self.current = 0;
            self.dropping = !self.dropping;
        }
        self.dropping
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut outputs = Vec::with_capacity(args.targets.len());
    for target in &args.targets {
        let out = match args.proto.as_str() {
            "udp" => {
                let socket = UdpSocket::bind("0.0.0.0:0").await.context("udp bind")?;
                socket.connect(target).await.with_context(|| format!("udp connect {target}"))?;
                Out::Udp(socket)
            }
            "tcp" => Out::Tcp(
                TcpStream::connect(target).await.with_context(|| format!("tcp connect {target}"))?,
            ),
            other => anyhow::bail!("unsupported protocol {other}"),
        };
        outputs.push(out);
    }

    let stream = match &args.file {
        Some(path) => fs::read(path).with_context(|| format!("read {}", path.display()))?,
        None => Vec::new(),
    };
    let mut injector = GapInjector::new(args.threshold);

    let mut sent = 0u64;
    let mut sequence = 0u32;
    let mut offset = 0usize;
    loop {
        if args.count > 0 && sequence >= args.count {
            break;
        }
        if args.file.is_some() && offset >= stream.len() {
            break;
        }
        let mut body = [0u8; CADU_BODY_LEN];
        if !stream.is_empty() {
            let take = (stream.len() - offset).min(CADU_BODY_LEN);
            body[..take].copy_from_slice(&stream[offset..offset + take]);
            offset += take;
        }
        let frame = fixtures::build_cadu(sequence, &body);
        sequence = sequence.wrapping_add(1);

        let dropped = injector.as_mut().map(|i| i.should_drop()).unwrap_or(false);
        if !dropped {
            for out in &mut outputs {
                out.send(&frame).await?;
            }
            sent += 1;
        }
        sleep(Duration::from_millis(args.rate_ms)).await;
    }
    // Let the last datagrams land before the sockets close.
    sleep(Duration::from_millis(args.rate_ms)).await;
    info!("feed.event=done framed={sequence} sent={sent}");
    Ok(())
}
