//! Cairn Monitor Daemon
//!
//! Runs a single-node cluster-map monitor: redb-backed persistence, an
//! in-process consensus log, and the periodic maintenance tick. Admin
//! commands given on the command line are applied after startup.

mod service;

use anyhow::{Context, Result};
use cairn_common::{ClusterFsid, MonitorConfig, SystemClock};
use cairn_mon::{
    IdlePlacement, LocalLog, MonitorDeps, NoMdsPeers, OsdMonitor, RedbStore, Role,
    TraceMessenger, TracingEventLog,
};
use clap::Parser;
use service::MonitorService;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "cairn-mond")]
#[command(about = "Cairn cluster-map monitor daemon")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/cairn/mond.toml")]
    config: PathBuf,

    /// Data directory for the monitor store
    #[arg(short, long, default_value = "/var/lib/cairn/mon")]
    data_dir: PathBuf,

    /// Cluster fsid; generated and persisted on first start if omitted
    #[arg(long)]
    fsid: Option<ClusterFsid>,

    /// OSD slots to allocate in the genesis map
    #[arg(long, default_value = "8")]
    max_osd: u32,

    /// Admin commands to apply after startup, e.g. --cmd "osd pool create data"
    #[arg(long = "cmd")]
    commands: Vec<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_config(path: &PathBuf) -> Result<MonitorConfig> {
    if path.exists() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    } else {
        Ok(MonitorConfig::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting cairn monitor daemon");

    let config = load_config(&args.config)?;

    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("creating {}", args.data_dir.display()))?;
    let store = Arc::new(RedbStore::open(args.data_dir.join("mon.redb"))?);
    let log = Arc::new(LocalLog::open(store.clone())?);

    let fsid = match args.fsid {
        Some(fsid) => fsid,
        None => {
            let fsid = ClusterFsid::generate();
            info!(%fsid, "generated cluster fsid");
            fsid
        }
    };

    let deps = MonitorDeps {
        log: log.clone(),
        store,
        messenger: Arc::new(TraceMessenger),
        placement: Arc::new(IdlePlacement),
        mds: Arc::new(NoMdsPeers),
        events: Arc::new(TracingEventLog),
        clock: Arc::new(SystemClock),
    };

    let monitor = OsdMonitor::new(fsid, config.clone(), Role::Leader, deps);
    let mut svc = MonitorService::new(monitor, log, config);

    svc.bootstrap(args.max_osd)?;
    svc.apply_startup_commands(&args.commands);
    svc.run().await;

    info!("monitor daemon shut down");
    Ok(())
}
