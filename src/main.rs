use std::path::PathBuf;
use std::sync::OnceLock;

use clap::Parser;
use tracing::{debug, error, info};

use ringtap::config::{self, Mode, Options};
use ringtap::telemetry::init_logging;
use ringtap::{BreakHandle, Context, Recv, Verdict};

#[derive(Parser)]
#[command(name = "ringtap")]
#[command(about = "AF_PACKET ring capture and in-line forwarding")]
struct Cli {
    /// Path to a TOML options file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Colon-separated interface specification, e.g. "eth0" or "eth0:eth1"
    #[arg(short, long)]
    interfaces: Option<String>,

    /// Bridge interfaces in pairs and forward passed traffic between them
    #[arg(long)]
    inline: bool,

    /// Maximum captured bytes per packet
    #[arg(long)]
    snaplen: Option<u32>,

    /// Poll timeout in milliseconds; non-positive waits indefinitely
    #[arg(long)]
    timeout_ms: Option<i32>,

    /// Megabytes of total ring memory, or "max" for the default
    #[arg(long)]
    buffer_size_mb: Option<String>,

    /// BPF filter expression
    #[arg(short, long)]
    filter: Option<String>,

    /// Kernel fanout method: hash, lb, cpu, rollover, rnd or qm
    #[arg(long)]
    fanout_type: Option<String>,

    /// Kernel fanout flag: rollover or defrag (repeatable)
    #[arg(long)]
    fanout_flag: Vec<String>,

    /// Enable diagnostic output
    #[arg(long)]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

static BREAK: OnceLock<BreakHandle> = OnceLock::new();

extern "C" fn on_sigint(_signal: libc::c_int) {
    if let Some(handle) = BREAK.get() {
        handle.set();
    }
}

fn install_sigint(handle: BreakHandle) {
    let _ = BREAK.set(handle);
    let handler: extern "C" fn(libc::c_int) = on_sigint;
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(if cli.debug { "debug" } else { "info" }, cli.json_logs);

    if let Err(e) = run(cli) {
        eprintln!("[ERROR] {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> ringtap::Result<()> {
    let mut options = match &cli.config {
        Some(path) => config::load(path)?,
        None => Options::new(String::new(), Mode::Passive),
    };

    if let Some(interfaces) = cli.interfaces {
        options.interfaces = interfaces;
    }
    if cli.inline {
        options.mode = Mode::Inline;
    }
    if let Some(snaplen) = cli.snaplen {
        options.snaplen = snaplen;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        options.timeout_ms = timeout_ms;
    }
    if let Some(size) = &cli.buffer_size_mb {
        options.apply_variable("buffer_size_mb", Some(size))?;
    }
    if cli.debug {
        options.apply_variable("debug", None)?;
    }
    if let Some(kind) = &cli.fanout_type {
        options.apply_variable("fanout_type", Some(kind))?;
    }
    for flag in &cli.fanout_flag {
        options.apply_variable("fanout_flag", Some(flag))?;
    }
    if let Some(filter) = cli.filter {
        options.filter = Some(filter);
    }

    let config = options.resolve()?;
    let mut ctx = Context::new(config)?;
    if let Some(expr) = &options.filter {
        ctx.set_filter(expr)?;
    }
    ctx.start()?;
    install_sigint(ctx.break_handle());
    info!(
        interfaces = ctx.interface_count(),
        snaplen = ctx.snaplen(),
        "capturing, ctrl-c to stop"
    );

    let mut received: u64 = 0;
    loop {
        match ctx.msg_receive() {
            Ok(Recv::Packet(msg)) => {
                let hdr = *ctx.packet_header(&msg)?;
                debug!(
                    caplen = hdr.caplen,
                    pktlen = hdr.pktlen,
                    ingress = hdr.ingress_index,
                    "packet"
                );
                ctx.msg_finalize(msg, Verdict::Pass)?;
                received += 1;
            }
            Ok(Recv::Timeout) | Ok(Recv::Interrupted) => continue,
            Ok(Recv::BreakLoop) => break,
            Err(e) => {
                error!(error = %e, "receive failed");
                break;
            }
        }
    }

    let stats = ctx.get_stats().clone();
    info!(
        received,
        hw_received = stats.hw_packets_received,
        hw_dropped = stats.hw_packets_dropped,
        filtered = stats.packets_filtered,
        injected = stats.packets_injected,
        "session finished"
    );
    ctx.shutdown();
    Ok(())
}
