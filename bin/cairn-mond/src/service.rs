//! Monitor event loop
//!
//! Single task owning the monitor. Commits from the in-process log are
//! drained after every action; the maintenance tick runs on the configured
//! interval until ctrl-c.

use cairn_common::MonitorConfig;
use cairn_map::OsdMap;
use cairn_mon::{AdminCommand, ConsensusLog, Message, OsdMonitor};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// The daemon's monitor loop
pub struct MonitorService {
    monitor: OsdMonitor,
    log: Arc<dyn ConsensusLog>,
    config: MonitorConfig,
}

impl MonitorService {
    /// Wrap a monitor and the log handle used to detect commits
    pub fn new(monitor: OsdMonitor, log: Arc<dyn ConsensusLog>, config: MonitorConfig) -> Self {
        Self {
            monitor,
            log,
            config,
        }
    }

    /// Create the genesis map on first start, or catch up to the persisted
    /// log on restart.
    pub fn bootstrap(&mut self, max_osd: u32) -> anyhow::Result<()> {
        if self.log.version() == 0 {
            let genesis =
                OsdMap::build_initial(self.monitor.fsid(), max_osd, chrono::Utc::now());
            self.monitor.create_initial(&genesis.encode()?)?;
            self.monitor.propose_pending();
            self.pump();
            info!(epoch = self.monitor.osdmap().epoch, max_osd, "genesis map committed");
        } else {
            self.monitor.update_from_log()?;
            self.monitor.create_pending();
            info!(
                epoch = self.monitor.osdmap().epoch,
                "recovered map from log"
            );
        }
        Ok(())
    }

    /// Apply `--cmd` lines given on the command line
    pub fn apply_startup_commands(&mut self, commands: &[String]) {
        let shell: SocketAddr = "127.0.0.1:0".parse().expect("loopback address");
        for line in commands {
            let cmd: Vec<String> = line.split_whitespace().map(str::to_string).collect();
            if cmd.is_empty() {
                warn!(%line, "skipping empty command");
                continue;
            }
            info!(%line, "applying startup command");
            self.monitor.dispatch(
                Message::Command(AdminCommand {
                    cmd,
                    data: Vec::new(),
                }),
                shell,
            );
            self.pump();
        }
    }

    /// Apply any newly committed log entries
    fn pump(&mut self) {
        while self.log.version() > self.monitor.osdmap().epoch {
            self.monitor.on_log_committed();
        }
    }

    /// Run ticks until ctrl-c
    pub async fn run(&mut self) {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.monitor.tick();
                    self.pump();
                }
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        error!(%e, "signal wait failed");
                    }
                    info!("shutting down");
                    break;
                }
            }
        }
    }
}
