//! The OSD-map monitor
//!
//! Owns the committed map, the pending increment, and the bookkeeping tables
//! (`down_pending_out`, `waiting_for_map`). All state lives on one task; the
//! consensus log, store, and messenger are reached through trait objects.

mod command;
mod handlers;

use crate::external::{
    ConsensusLog, EventLog, KvStore, LogLevel, MdsPeer, Messenger, PlacementPeer,
};
use crate::journal::MapJournal;
use crate::messages::{MapShipment, Message, Outbound};
use crate::pending::PendingMap;
use cairn_common::{Clock, ClusterFsid, Epoch, MonitorConfig, OsdId, Result};
use cairn_map::{Incremental, OsdMap};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Consensus role of this monitor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Runs prepares and proposes
    Leader,
    /// Preprocesses only
    Peon,
}

/// External collaborators handed to the monitor at construction
pub struct MonitorDeps {
    pub log: Arc<dyn ConsensusLog>,
    pub store: Arc<dyn KvStore>,
    pub messenger: Arc<dyn Messenger>,
    pub placement: Arc<dyn PlacementPeer>,
    pub mds: Arc<dyn MdsPeer>,
    pub events: Arc<dyn EventLog>,
    pub clock: Arc<dyn Clock>,
}

/// Outcome of the preprocess phase
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Disposition {
    /// Message consumed, possibly with a reply
    Handled,
    /// New and valid; hand to prepare on the leader
    Forward,
}

/// Continuation to run once the pending increment commits
#[derive(Debug)]
enum CommitAction {
    /// Send the latest map(s) starting at `start`
    SendLatest { addr: SocketAddr, start: Epoch },
    /// Boot acknowledgement: latest map plus an operator event
    Booted { addr: SocketAddr, start: Epoch },
    /// Re-dispatch a message whose precondition needed this commit
    Retry { from: SocketAddr, msg: Message },
    /// Admin command acknowledgement
    CommandReply { addr: SocketAddr, status: String },
    /// Pool snapshot acknowledgement
    PoolSnapReply { addr: SocketAddr, tid: u64, epoch: Epoch },
}

/// The OSD-map monitor state machine
pub struct OsdMonitor {
    fsid: ClusterFsid,
    config: MonitorConfig,
    role: Role,

    osdmap: OsdMap,
    pending: PendingMap,
    journal: MapJournal,

    log: Arc<dyn ConsensusLog>,
    messenger: Arc<dyn Messenger>,
    placement: Arc<dyn PlacementPeer>,
    mds: Arc<dyn MdsPeer>,
    events: Arc<dyn EventLog>,
    clock: Arc<dyn Clock>,

    /// Down-and-in OSDs and when we first saw them that way
    down_pending_out: BTreeMap<OsdId, DateTime<Utc>>,
    /// Peers waiting for an epoch we cannot serve yet (0 = wants full map)
    waiting_for_map: BTreeMap<SocketAddr, Epoch>,
    /// Continuations for the in-flight proposal
    commit_waiters: Vec<CommitAction>,
    /// Deferred routine propose deadline
    propose_due: Option<DateTime<Utc>>,
    /// A proposal is in flight; mutations recorded now ride the next one
    proposing: bool,
}

impl OsdMonitor {
    /// Build a monitor around an empty map; call
    /// [`create_initial`](Self::create_initial) or
    /// [`update_from_log`](Self::update_from_log) next.
    pub fn new(fsid: ClusterFsid, config: MonitorConfig, role: Role, deps: MonitorDeps) -> Self {
        let pending = PendingMap::new(fsid, 1);
        Self {
            fsid,
            config,
            role,
            osdmap: OsdMap::default(),
            pending,
            journal: MapJournal::new(deps.store),
            log: deps.log,
            messenger: deps.messenger,
            placement: deps.placement,
            mds: deps.mds,
            events: deps.events,
            clock: deps.clock,
            down_pending_out: BTreeMap::new(),
            waiting_for_map: BTreeMap::new(),
            commit_waiters: Vec::new(),
            propose_due: None,
            proposing: false,
        }
    }

    /// The committed map
    #[must_use]
    pub fn osdmap(&self) -> &OsdMap {
        &self.osdmap
    }

    /// The increment under construction
    #[must_use]
    pub fn pending_incremental(&self) -> &Incremental {
        self.pending.incremental()
    }

    /// Cluster identity
    #[must_use]
    pub fn fsid(&self) -> ClusterFsid {
        self.fsid
    }

    /// Whether this monitor runs prepares
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    /// Change role after an election
    pub fn set_role(&mut self, role: Role) {
        if role != self.role {
            info!(?role, "monitor role changed");
            self.role = role;
        }
    }

    /// Peers parked until a wanted epoch commits
    #[must_use]
    pub fn waiting_for_map(&self) -> &BTreeMap<SocketAddr, Epoch> {
        &self.waiting_for_map
    }

    /// Down-and-in OSDs being watched for demotion
    #[must_use]
    pub fn down_pending_out(&self) -> &BTreeMap<OsdId, DateTime<Utc>> {
        &self.down_pending_out
    }

    // ---- consensus glue ----

    /// Seed the pending increment with a bootstrap map: epoch 1, our fsid,
    /// fresh timestamps.
    pub fn create_initial(&mut self, bytes: &[u8]) -> Result<()> {
        let mut map = OsdMap::decode(bytes)?;
        let now = self.clock.now();
        map.epoch = 1;
        map.fsid = self.fsid;
        map.created = Some(now);
        map.modified = Some(now);
        info!(fsid = %self.fsid, max_osd = map.max_osd(), "creating initial map");
        self.pending.set_fullmap(map.encode()?);
        Ok(())
    }

    /// Catch the in-memory map up to the committed log. Idempotent; safe to
    /// call on every tick and after every commit.
    pub fn update_from_log(&mut self) -> Result<()> {
        let logv = self.log.version();
        if logv == self.osdmap.epoch {
            return Ok(());
        }

        if self.osdmap.epoch == 0 && logv > 1 {
            if let Some((v, bytes)) = self.log.get_latest() {
                info!(epoch = v, "startup: loading latest full map");
                self.osdmap = OsdMap::decode(&bytes)?;
            }
        }

        let mut last_full: Option<Vec<u8>> = None;
        while self.log.version() > self.osdmap.epoch {
            let e = self.osdmap.epoch + 1;
            let Some(bytes) = self.log.read(e) else {
                // the log claims this version committed; a hole is corruption
                panic!("committed log entry missing at version {e}");
            };
            let inc = Incremental::decode(&bytes)?;
            self.journal.put_incremental(e, &bytes)?;
            self.osdmap.apply(&inc)?;
            let full = self.osdmap.encode()?;
            self.journal.put_full(e, &full)?;
            debug!(epoch = e, "applied incremental");
            last_full = Some(full);
        }

        if let Some(full) = last_full {
            self.log.stash_latest(self.osdmap.epoch, full);
        }

        // a recovered map is authoritative about the cluster identity
        if self.osdmap.epoch > 0 && self.fsid != self.osdmap.fsid {
            warn!(old = %self.fsid, new = %self.osdmap.fsid, "adopting fsid from committed map");
            self.fsid = self.osdmap.fsid;
        }

        // anyone newly observed down-and-in starts the demotion timer
        let now = self.clock.now();
        for osd in 0..self.osdmap.max_osd() {
            if self.osdmap.is_down(osd)
                && self.osdmap.is_in(osd)
                && !self.down_pending_out.contains_key(&osd)
            {
                debug!(osd, "watching down-and-in osd for demotion");
                self.down_pending_out.insert(osd, now);
            }
        }

        if self.is_leader() {
            self.placement.check_osd_map(self.osdmap.epoch);
            self.bcast_latest_mds();
        }

        self.send_to_waiting();
        Ok(())
    }

    /// Rebuild the pending increment for the epoch after the committed map
    pub fn create_pending(&mut self) {
        self.pending.rebuild(self.fsid, self.osdmap.epoch + 1);
        debug!(epoch = self.pending.epoch(), "created pending increment");
    }

    /// Stamp and encode the pending increment for proposal
    fn encode_pending(&mut self) -> Result<Vec<u8>> {
        let inc = self.pending.incremental();
        for (osd, clean) in &inc.new_down {
            debug!(osd, clean, "pending: osd down");
        }
        for (osd, addr) in &inc.new_up {
            debug!(osd, %addr, "pending: osd up");
        }
        for (osd, weight) in &inc.new_weight {
            debug!(osd, weight, "pending: osd weight");
        }
        assert_eq!(
            self.log.version() + 1,
            self.pending.epoch(),
            "pending increment desynchronized from log"
        );
        self.pending.encode_for_proposal(self.clock.now())
    }

    /// Encode the pending increment and submit it to the log. Changes
    /// recorded while a proposal is already in flight lost the race: they
    /// are clobbered when the pending increment is rebuilt after commit.
    pub fn propose_pending(&mut self) {
        if self.proposing {
            debug!("proposal already in flight");
            return;
        }
        self.propose_due = None;
        match self.encode_pending() {
            Ok(bytes) => {
                self.log.propose(bytes);
                self.proposing = true;
            }
            Err(e) => error!(%e, "failed to encode pending increment"),
        }
    }

    /// Run the propose policy after a prepare mutated the pending increment
    fn maybe_propose(&mut self) {
        let (propose, delay) = self.pending.should_propose(&self.osdmap, &self.config);
        if !propose {
            return;
        }
        if delay.is_zero() {
            self.propose_pending();
        } else if self.propose_due.is_none() {
            let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            self.propose_due = Some(self.clock.now() + delay);
        }
    }

    /// Fire a deferred propose whose deadline has passed
    pub fn poll_propose(&mut self) {
        if let Some(due) = self.propose_due {
            if self.clock.now() >= due {
                self.propose_pending();
            }
        }
    }

    /// Driver hook: the log committed one or more versions. Applies them,
    /// rebuilds the pending increment, and drains commit continuations
    /// exactly once each.
    pub fn on_log_committed(&mut self) {
        self.proposing = false;
        if let Err(e) = self.update_from_log() {
            error!(%e, "update from log failed");
            return;
        }
        self.create_pending();

        let waiters = std::mem::take(&mut self.commit_waiters);
        for action in waiters {
            self.finish_commit(action);
        }

        self.committed();
    }

    /// Post-commit: nudge one arbitrary up OSD with the news
    fn committed(&mut self) {
        if let Some(osd) = self.osdmap.get_any_up_osd() {
            if let Some(inst) = self.osdmap.get_inst(osd) {
                debug!(osd, "committed, telling an up osd");
                self.send_latest(inst.addr, self.osdmap.epoch.saturating_sub(1));
            }
        }
    }

    fn finish_commit(&mut self, action: CommitAction) {
        match action {
            CommitAction::SendLatest { addr, start } => self.send_latest(addr, start),
            CommitAction::Booted { addr, start } => self.booted(addr, start, true),
            CommitAction::Retry { from, msg } => self.dispatch(msg, from),
            CommitAction::CommandReply { addr, status } => {
                self.send_command_reply(addr, 0, status, Vec::new());
            }
            CommitAction::PoolSnapReply { addr, tid, epoch } => {
                self.send_pool_snap_reply(addr, tid, 0, epoch);
            }
        }
    }

    // ---- dispatch ----

    /// Route one inbound message through preprocess and, on the leader,
    /// prepare. `from` is where replies go.
    pub fn dispatch(&mut self, msg: Message, from: SocketAddr) {
        match self.preprocess(&msg, from) {
            Disposition::Handled => {}
            Disposition::Forward => {
                if !self.is_leader() {
                    debug!(%from, "not leader, dropping update");
                    return;
                }
                if self.prepare(msg, from) {
                    self.maybe_propose();
                }
            }
        }
    }

    // ---- tick ----

    /// Periodic maintenance: demote lingering down-and-in OSDs, expire
    /// blacklist entries, fire deferred proposals.
    pub fn tick(&mut self) {
        if !self.log.is_active() {
            return;
        }
        if let Err(e) = self.update_from_log() {
            warn!(%e, "tick: update from log failed");
            return;
        }
        if !self.is_leader() {
            return;
        }

        let mut do_propose = false;
        let now = self.clock.now();
        let grace = self.config.down_out_interval();

        let watched: Vec<(OsdId, DateTime<Utc>)> = self
            .down_pending_out
            .iter()
            .map(|(&osd, &since)| (osd, since))
            .collect();
        for (osd, since) in watched {
            if self.osdmap.is_down(osd) && self.osdmap.is_in(osd) {
                let down_for = (now - since).to_std().unwrap_or_default();
                if down_for >= grace {
                    info!(osd, secs = down_for.as_secs(), "marking lingering osd out");
                    self.pending.mark_out(osd);
                    self.events
                        .log(LogLevel::Info, format!("osd{osd} out (down for {}s)", down_for.as_secs()));
                    do_propose = true;
                    self.down_pending_out.remove(&osd);
                }
            } else {
                self.down_pending_out.remove(&osd);
            }
        }

        let expired: Vec<SocketAddr> = self
            .osdmap
            .blacklist
            .iter()
            .filter(|(_, &until)| until < now)
            .map(|(&addr, _)| addr)
            .collect();
        for addr in expired {
            debug!(%addr, "expiring blacklist entry");
            self.pending.expire_blacklist_entry(addr);
            do_propose = true;
        }

        if do_propose {
            self.propose_pending();
        } else {
            self.poll_propose();
        }
    }

    /// Leader shutdown sweep: mark every up OSD down (cleanly) in one epoch.
    pub fn mark_all_down(&mut self) {
        assert!(self.is_leader(), "only the leader may mark all down");
        info!("marking all up osds down");
        for osd in self.osdmap.get_up_osds() {
            self.pending.mark_down(osd, true);
        }
        self.propose_pending();
    }

    // ---- distribution ----

    /// Ship the current full map
    pub fn send_full(&self, who: SocketAddr) {
        debug!(%who, epoch = self.osdmap.epoch, "sending full map");
        match self.osdmap.encode() {
            Ok(bytes) => {
                let mut shipment = MapShipment::new(self.fsid);
                shipment.full_maps.insert(self.osdmap.epoch, bytes);
                self.messenger.send(who, Outbound::MapShipment(shipment));
            }
            Err(e) => error!(%e, "failed to encode full map"),
        }
    }

    /// Ship everything from `from` through the current epoch: per epoch the
    /// increment if persisted, else the full map. One of the two must exist
    /// for every committed epoch; a gap means the store is corrupt and we
    /// stop rather than hand out wrong history.
    pub fn send_incremental(&self, who: SocketAddr, from: Epoch) {
        debug!(%who, from, to = self.osdmap.epoch, "sending incrementals");
        let mut shipment = MapShipment::new(self.fsid);

        let mut e = self.osdmap.epoch;
        while e >= from && e > 0 {
            let inc = match self.journal.get_incremental(e) {
                Ok(v) => v,
                Err(err) => {
                    error!(epoch = e, %err, "store read failed, dropping shipment");
                    return;
                }
            };
            if let Some(bytes) = inc {
                shipment.incremental_maps.insert(e, bytes);
            } else {
                let full = match self.journal.get_full(e) {
                    Ok(v) => v,
                    Err(err) => {
                        error!(epoch = e, %err, "store read failed, dropping shipment");
                        return;
                    }
                };
                match full {
                    Some(bytes) => {
                        shipment.full_maps.insert(e, bytes);
                    }
                    None => panic!("no increment or full map persisted at epoch {e}"),
                }
            }
            e -= 1;
        }

        self.messenger.send(who, Outbound::MapShipment(shipment));
    }

    /// Ship the newest maps now, or park the peer until consensus is
    /// readable and the wanted epoch exists.
    pub fn send_latest(&mut self, who: SocketAddr, start: Epoch) {
        if self.log.is_readable() {
            debug!(%who, start, "sending latest now");
            if start == 0 {
                self.send_full(who);
            } else {
                self.send_incremental(who, start);
            }
        } else {
            debug!(%who, start, "consensus not readable, parking peer");
            self.waiting_for_map.insert(who, start);
        }
    }

    /// Flush peers whose wanted epoch has arrived
    fn send_to_waiting(&mut self) {
        let entries: Vec<(SocketAddr, Epoch)> = self
            .waiting_for_map
            .iter()
            .map(|(&a, &e)| (a, e))
            .collect();
        for (addr, start) in entries {
            if start > 0 {
                if start > self.osdmap.epoch {
                    debug!(%addr, wants = start, "still waiting");
                    continue;
                }
                self.send_incremental(addr, start);
            } else {
                self.send_full(addr);
            }
            self.waiting_for_map.remove(&addr);
        }
    }

    /// Send the newest maps to every up OSD
    pub fn bcast_latest_osd(&self) {
        let epoch = self.osdmap.epoch;
        debug!(epoch, "broadcasting latest to up osds");
        for osd in self.osdmap.get_up_osds() {
            if let Some(inst) = self.osdmap.get_inst(osd) {
                self.send_incremental(inst.addr, epoch);
            }
        }
    }

    /// Send the full map to every up OSD
    pub fn bcast_full_osd(&self) {
        debug!(epoch = self.osdmap.epoch, "broadcasting full map to up osds");
        for osd in self.osdmap.get_up_osds() {
            if let Some(inst) = self.osdmap.get_inst(osd) {
                self.send_full(inst.addr);
            }
        }
    }

    /// Send the newest maps to every up metadata server
    fn bcast_latest_mds(&self) {
        let epoch = self.osdmap.epoch;
        for addr in self.mds.up_mds_addrs() {
            self.send_incremental(addr, epoch);
        }
    }

    /// Operator shortcut: blacklist an address until `until`
    pub fn blacklist(&mut self, addr: SocketAddr, until: DateTime<Utc>) {
        debug!(%addr, %until, "blacklisting");
        self.pending.add_to_blacklist(addr, until);
    }

    // ---- small reply helpers ----

    fn send_command_reply(&self, addr: SocketAddr, code: i32, status: String, data: Vec<u8>) {
        self.messenger.send(
            addr,
            Outbound::Command(crate::messages::CommandReply { code, status, data }),
        );
    }

    fn send_pool_snap_reply(&self, addr: SocketAddr, tid: u64, code: i32, epoch: Epoch) {
        self.messenger
            .send(addr, Outbound::PoolSnap(crate::messages::PoolSnapReply { tid, code, epoch }));
    }

    fn booted(&mut self, addr: SocketAddr, start: Epoch, logit: bool) {
        self.send_latest(addr, start);
        if logit {
            self.events.log(LogLevel::Info, format!("{addr} boot"));
        }
    }
}
