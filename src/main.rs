use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use totp_sync::{
    ProviderConfig, SyncConfig, SyncContext, SyncOutcome, Tick, Ticker, WindowCodeProducer,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Show TOTP codes against network-synchronized time", long_about = None)]
struct Args {
    /// Base32 secret, otpauth:// URI or `secret|label`
    #[arg(env = "TOTP_SECRET", hide_env_values = true)]
    secret: String,

    /// JSON time endpoint, repeatable. Replaces the built-in providers.
    #[arg(long = "provider")]
    providers: Vec<String>,

    /// Origin whose Date header is read when every provider fails
    #[arg(long)]
    fallback_origin: Option<String>,

    /// Per-provider timeout in milliseconds
    #[arg(long, default_value_t = 2500)]
    timeout_ms: u64,

    /// Also show the previous and next codes
    #[arg(long)]
    adjacent: bool,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    seconds: Option<u64>,

    /// Skip clock synchronization and use local time
    #[arg(long)]
    offline: bool,
}

impl Args {
    fn sync_config(&self) -> SyncConfig {
        let mut config =
            SyncConfig::default().with_probe_timeout(Duration::from_millis(self.timeout_ms));
        if !self.providers.is_empty() {
            config.providers = self.providers.iter().map(ProviderConfig::new).collect();
        }
        if let Some(origin) = &self.fallback_origin {
            config = config.with_fallback_origin(origin);
        }
        config
    }
}

const LOCAL_TIME: &str = "  (local time)";

fn sync_status(outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::Synced {
            offset_ms,
            source,
            rtt_ms,
        } => format!("synced via {source}, offset {offset_ms} ms, rtt {rtt_ms} ms"),
        SyncOutcome::Unavailable { offset_ms } => {
            format!("unsynchronized, using local time (offset {offset_ms} ms)")
        }
        SyncOutcome::Skipped { offset_ms, .. } => {
            format!("sync already running (offset {offset_ms} ms)")
        }
    }
}

fn render_line(tick: &Tick, synchronized: bool) -> String {
    let mut line = match tick {
        Tick::Current(current) => format!("{}  ({}s)", current.display(), current.remaining),
        Tick::Window(codes) => format!(
            "{}  [{}]  {}  ({}s)",
            codes.previous.display(),
            codes.current.display(),
            codes.next.display(),
            codes.current.remaining
        ),
    };
    if !synchronized {
        line.push_str(LOCAL_TIME);
    }
    line
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let ctx = Arc::new(
        SyncContext::from_config(&args.sync_config()).context("invalid clock sync configuration")?,
    );
    if args.offline {
        println!("offline, using local time");
    } else {
        let outcome = ctx.sync().await;
        info!(
            "clock offset {} ms (synchronized: {})",
            outcome.offset_ms(),
            outcome.is_success()
        );
        println!("{}", sync_status(&outcome));
    }

    let status = ctx.clone();
    let producer = WindowCodeProducer::new(ctx);
    let ticker = Ticker::spawn(producer, args.secret, args.adjacent, move |tick| {
        println!("{}", render_line(&tick, status.is_synchronized()));
    });

    match args.seconds {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?,
    }

    ticker.cancel().await;
    Ok(())
}
