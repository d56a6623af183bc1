//! Preprocess / prepare handlers for OSD traffic
//!
//! Preprocess runs on every replica against the committed map and must stay
//! side-effect-free with respect to consensus: it filters duplicates and
//! stale reports so they never consume a round. Prepare runs on the leader
//! only, mutates the pending increment, and registers a continuation that
//! answers the client once the round lands.

use super::{CommitAction, Disposition, OsdMonitor};
use crate::external::LogLevel;
use crate::messages::{
    AliveNotice, BootRecord, FailureReport, Message, PoolSnapRequest, SnapPurge,
};
use cairn_common::{ClusterFsid, Epoch, EEXIST, ENOENT, WEIGHT_IN};
use std::net::SocketAddr;
use tracing::{debug, info, warn};

impl OsdMonitor {
    pub(super) fn preprocess(&mut self, msg: &Message, from: SocketAddr) -> Disposition {
        match msg {
            Message::GetMap { fsid, start } => {
                self.handle_getmap(*fsid, *start, from);
                Disposition::Handled
            }
            Message::Failure(m) => self.preprocess_failure(m, from),
            Message::Boot(m) => self.preprocess_boot(m),
            Message::Alive(m) => self.preprocess_alive(m),
            Message::PoolSnap(m) => self.preprocess_pool_snap(m, from),
            Message::RemoveSnaps(m) => self.preprocess_remove_snaps(m),
            Message::Command(m) => self.preprocess_command(m, from),
        }
    }

    pub(super) fn prepare(&mut self, msg: Message, from: SocketAddr) -> bool {
        match msg {
            Message::Failure(m) => self.prepare_failure(m, from),
            Message::Boot(m) => self.prepare_boot(m, from),
            Message::Alive(m) => self.prepare_alive(m),
            Message::PoolSnap(m) => self.prepare_pool_snap(m, from),
            Message::RemoveSnaps(m) => self.prepare_remove_snaps(&m),
            Message::Command(m) => self.prepare_command(m, from),
            Message::GetMap { .. } => false,
        }
    }

    // ---- explicit map requests ----

    fn handle_getmap(&mut self, fsid: ClusterFsid, start: Epoch, from: SocketAddr) {
        debug!(%from, start, "map request");
        if fsid != self.fsid() {
            warn!(got = %fsid, "map request with wrong fsid");
            return;
        }
        if start > 0 {
            if start <= self.osdmap().epoch {
                self.send_incremental(from, start);
            } else {
                self.waiting_for_map.insert(from, start);
            }
        } else {
            self.send_full(from);
        }
    }

    // ---- failure reports ----

    fn preprocess_failure(&mut self, m: &FailureReport, from: SocketAddr) -> Disposition {
        let badboy = m.failed.id;

        if m.fsid != self.fsid {
            warn!(got = %m.fsid, "failure report with wrong fsid");
            return Disposition::Handled;
        }

        // The reporting host must itself be a live, known OSD. Reports are
        // still taken on a single reporter's word; see prepare_failure.
        let reporter = m.reporter;
        if !self.osdmap.exists(reporter.id)
            || self.osdmap.get_addr(reporter.id) != Some(reporter.addr)
            || self.osdmap.is_down(reporter.id)
        {
            debug!(%reporter, "failure report from dead osd, ignoring");
            self.send_incremental(from, m.epoch + 1);
            return Disposition::Handled;
        }

        if !self.osdmap.have_inst(badboy) {
            debug!(failed = %m.failed, %reporter, "failure report for unknown osd");
            if m.epoch < self.osdmap.epoch {
                self.send_incremental(from, m.epoch + 1);
            }
            return Disposition::Handled;
        }
        if self.osdmap.get_inst(badboy) != Some(m.failed) {
            debug!(
                report = %m.failed,
                current = ?self.osdmap.get_inst(badboy),
                "failure report for wrong incarnation"
            );
            if m.epoch < self.osdmap.epoch {
                self.send_incremental(from, m.epoch + 1);
            }
            return Disposition::Handled;
        }
        if self.osdmap.is_down(badboy) {
            debug!(failed = %m.failed, "duplicate failure report");
            if m.epoch < self.osdmap.epoch {
                self.send_incremental(from, m.epoch + 1);
            }
            return Disposition::Handled;
        }

        debug!(failed = %m.failed, %reporter, "new failure report");
        Disposition::Forward
    }

    fn prepare_failure(&mut self, m: FailureReport, from: SocketAddr) -> bool {
        info!(failed = %m.failed, reporter = %m.reporter, "preparing failure");
        self.events.log(
            LogLevel::Info,
            format!("{} failed (by {})", m.failed, m.reporter),
        );

        let badboy = m.failed.id;
        // preprocess certified both of these
        assert!(self.osdmap.is_up(badboy));
        assert_eq!(self.osdmap.get_addr(badboy), Some(m.failed.addr));

        self.pending.mark_down(badboy, false);
        self.commit_waiters.push(CommitAction::SendLatest {
            addr: from,
            start: m.epoch,
        });
        true
    }

    // ---- boots ----

    fn preprocess_boot(&mut self, m: &BootRecord) -> Disposition {
        if m.sb.fsid != self.fsid {
            warn!(got = %m.sb.fsid, "boot with wrong fsid");
            return Disposition::Handled;
        }

        let id = m.inst.id;
        if self.osdmap.is_up(id) && self.osdmap.get_inst(id) == Some(m.inst) {
            // same incarnation is already up: answer without a round
            debug!(inst = %m.inst, "duplicate boot");
            self.booted(m.inst.addr, m.sb.current_epoch + 1, false);
            return Disposition::Handled;
        }

        debug!(inst = %m.inst, "boot");
        Disposition::Forward
    }

    fn prepare_boot(&mut self, m: BootRecord, from: SocketAddr) -> bool {
        debug!(inst = %m.inst, sb = ?m.sb, "preparing boot");
        let id = m.inst.id;

        if !self.osdmap.exists(id) {
            info!(osd = id, "boot from non-existent osd, increase max_osd?");
            return false;
        }

        if self.osdmap.is_up(id) {
            // a previous incarnation is still marked up: take it down first
            // and retry the boot once that lands
            debug!(
                old = ?self.osdmap.get_inst(id),
                "booting over a live incarnation, marking previous down first"
            );
            assert_ne!(self.osdmap.get_inst(id), Some(m.inst));
            self.pending.mark_down(id, false);
            self.commit_waiters.push(CommitAction::Retry {
                from,
                msg: Message::Boot(m),
            });
        } else {
            self.down_pending_out.remove(&id);
            self.pending.mark_up(id, m.inst.addr);
            self.pending.set_weight(id, WEIGHT_IN);
            if m.sb.weight > 0 {
                self.pending.note_osd_weight(id, m.sb.weight);
            }

            // advance the last clean interval if the superblock moves it
            let info = self.osdmap.get_info(id);
            if m.sb.mounted > info.last_clean_first
                || (m.sb.mounted == info.last_clean_first
                    && m.sb.clean_thru > info.last_clean_last)
            {
                let first = m.sb.mounted;
                let mut last = m.sb.clean_thru;
                // stretch to the epoch the osd was actually marked down
                if info.up_from == first && info.down_at.saturating_sub(1) > last {
                    last = info.down_at - 1;
                }
                debug!(
                    osd = id,
                    old_first = info.last_clean_first,
                    old_last = info.last_clean_last,
                    first,
                    last,
                    "advancing last clean interval"
                );
                self.pending.set_last_clean_interval(id, first, last);
            }

            self.commit_waiters.push(CommitAction::Booted {
                addr: m.inst.addr,
                start: m.sb.current_epoch + 1,
            });
        }
        true
    }

    // ---- liveness ----

    fn preprocess_alive(&mut self, m: &AliveNotice) -> Disposition {
        let id = m.inst.id;
        if self.osdmap.is_up(id)
            && self.osdmap.get_inst(id) == Some(m.inst)
            && self.osdmap.get_up_thru(id) >= m.map_epoch
        {
            debug!(inst = %m.inst, epoch = m.map_epoch, "duplicate alive");
            self.send_latest(m.inst.addr, m.map_epoch);
            return Disposition::Handled;
        }

        debug!(inst = %m.inst, epoch = m.map_epoch, "alive");
        Disposition::Forward
    }

    fn prepare_alive(&mut self, m: AliveNotice) -> bool {
        debug!(inst = %m.inst, epoch = m.map_epoch, "preparing alive");
        self.pending.set_up_thru(m.inst.id, m.map_epoch);
        self.commit_waiters.push(CommitAction::SendLatest {
            addr: m.inst.addr,
            start: m.map_epoch,
        });
        true
    }

    // ---- snapshot purges ----

    fn preprocess_remove_snaps(&mut self, m: &SnapPurge) -> Disposition {
        debug!(pools = m.snaps.len(), "remove snaps");
        for (pool, snaps) in &m.snaps {
            let Some(pi) = self.osdmap.get_pool(*pool) else {
                debug!(pool, "ignoring snap removal on non-existent pool");
                continue;
            };
            for &snap in snaps {
                if snap > pi.snap_seq || !pi.is_removed_snap(snap) {
                    return Disposition::Forward;
                }
            }
        }
        Disposition::Handled
    }

    fn prepare_remove_snaps(&mut self, m: &SnapPurge) -> bool {
        debug!(pools = m.snaps.len(), "preparing remove snaps");
        for (&pool, snaps) in &m.snaps {
            if self.osdmap.get_pool(pool).is_none() {
                continue;
            }
            for &snap in snaps {
                let committed_removed = self
                    .osdmap
                    .get_pool(pool)
                    .is_some_and(|p| p.is_removed_snap(snap));
                let pending_removed = self
                    .pending
                    .incremental()
                    .new_pools
                    .get(&pool)
                    .is_some_and(|p| p.is_removed_snap(snap));
                if committed_removed || pending_removed {
                    continue;
                }

                let epoch = self.pending.epoch();
                let Some(pp) = self.pending.pool_for_update(pool, &self.osdmap) else {
                    continue;
                };
                pp.mark_snap_removed(snap);
                pp.snap_epoch = epoch;
                debug!(pool, snap, removed = %pp.removed_snaps, "marked snap removed");
            }
        }
        true
    }

    // ---- named pool snapshots ----

    fn preprocess_pool_snap(&mut self, m: &PoolSnapRequest, from: SocketAddr) -> Disposition {
        let pending_epoch = self.pending.epoch();
        if m.pool < 0 {
            self.send_pool_snap_reply(from, m.tid, -ENOENT, pending_epoch);
            return Disposition::Handled;
        }
        let Some(p) = self.osdmap.get_pool(m.pool) else {
            self.send_pool_snap_reply(from, m.tid, -ENOENT, pending_epoch);
            return Disposition::Handled;
        };

        let snap_exists =
            p.snap_exists(&m.name).is_some() || self.pending.pending_snap_exists(m.pool, &m.name);

        if m.create {
            if snap_exists {
                self.send_pool_snap_reply(from, m.tid, -EEXIST, pending_epoch);
                return Disposition::Handled;
            }
            return Disposition::Forward;
        }

        // deletion
        if !snap_exists {
            self.send_pool_snap_reply(from, m.tid, -ENOENT, pending_epoch);
            return Disposition::Handled;
        }
        Disposition::Forward
    }

    fn prepare_pool_snap(&mut self, m: PoolSnapRequest, from: SocketAddr) -> bool {
        let now = self.clock.now();
        let epoch = self.pending.epoch();

        let Some(pp) = self.pending.pool_for_update(m.pool, &self.osdmap) else {
            self.send_pool_snap_reply(from, m.tid, -ENOENT, epoch);
            return false;
        };

        if m.create {
            let id = pp.add_snap(m.name.clone(), now);
            pp.snap_epoch = epoch;
            debug!(pool = m.pool, name = %m.name, snap = id, "created pool snap");
        } else if let Some(id) = pp.snap_exists(&m.name) {
            pp.remove_snap(id);
            pp.snap_epoch = epoch;
            debug!(pool = m.pool, name = %m.name, snap = id, "removed pool snap");
        }

        self.commit_waiters.push(CommitAction::PoolSnapReply {
            addr: from,
            tid: m.tid,
            epoch,
        });
        true
    }
}
