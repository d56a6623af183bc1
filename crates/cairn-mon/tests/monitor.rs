//! End-to-end monitor scenarios against an in-memory consensus log
//!
//! The log commits proposals immediately unless a test holds them; a
//! recording messenger captures everything the monitor ships; a manual
//! clock drives the down→out demotion timer.

use cairn_common::{
    Clock, ClusterFsid, Epoch, MonitorConfig, OsdInst, EAGAIN, EEXIST, ENOENT, WEIGHT_IN,
};
use cairn_map::{Incremental, OsdMap};
use cairn_mon::{
    AdminCommand, AliveNotice, BootRecord, ConsensusLog, FailureReport, KvStore, MapShipment,
    MdsPeer, MemStore, Message, Messenger, MonitorDeps, OsdMonitor, Outbound, PlacementPeer,
    PoolSnapRequest, Role, SnapPurge, Superblock, TracingEventLog,
};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

// ---- fakes ----

#[derive(Default)]
struct LogInner {
    version: Epoch,
    entries: BTreeMap<Epoch, Vec<u8>>,
    latest: Option<(Epoch, Vec<u8>)>,
    staged: VecDeque<Vec<u8>>,
    hold: bool,
    unreadable: bool,
}

/// In-memory total-order log with controllable commit timing
#[derive(Default)]
struct MemLog {
    inner: Mutex<LogInner>,
}

impl MemLog {
    fn hold_commits(&self) {
        self.inner.lock().hold = true;
    }

    fn release_commits(&self) {
        let mut inner = self.inner.lock();
        inner.hold = false;
        while let Some(bytes) = inner.staged.pop_front() {
            let next = inner.version + 1;
            inner.entries.insert(next, bytes);
            inner.version = next;
        }
    }

    fn set_readable(&self, readable: bool) {
        self.inner.lock().unreadable = !readable;
    }
}

impl ConsensusLog for MemLog {
    fn version(&self) -> Epoch {
        self.inner.lock().version
    }

    fn is_active(&self) -> bool {
        true
    }

    fn is_readable(&self) -> bool {
        !self.inner.lock().unreadable
    }

    fn read(&self, version: Epoch) -> Option<Vec<u8>> {
        self.inner.lock().entries.get(&version).cloned()
    }

    fn get_latest(&self) -> Option<(Epoch, Vec<u8>)> {
        self.inner.lock().latest.clone()
    }

    fn stash_latest(&self, version: Epoch, bytes: Vec<u8>) {
        self.inner.lock().latest = Some((version, bytes));
    }

    fn propose(&self, bytes: Vec<u8>) {
        let mut inner = self.inner.lock();
        if inner.hold {
            inner.staged.push_back(bytes);
        } else {
            let next = inner.version + 1;
            inner.entries.insert(next, bytes);
            inner.version = next;
        }
    }
}

/// Messenger that records every send
#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<(SocketAddr, Outbound)>>,
}

impl Messenger for Recorder {
    fn send(&self, to: SocketAddr, msg: Outbound) {
        self.sent.lock().push((to, msg));
    }

    fn mark_down(&self, _addr: SocketAddr) {}
}

impl Recorder {
    fn take(&self) -> Vec<(SocketAddr, Outbound)> {
        std::mem::take(&mut *self.sent.lock())
    }

    fn shipments_to(&self, addr: SocketAddr) -> Vec<MapShipment> {
        self.sent
            .lock()
            .iter()
            .filter(|(to, _)| *to == addr)
            .filter_map(|(_, msg)| match msg {
                Outbound::MapShipment(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    fn command_replies(&self) -> Vec<(SocketAddr, i32, String)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(to, msg)| match msg {
                Outbound::Command(r) => Some((*to, r.code, r.status.clone())),
                _ => None,
            })
            .collect()
    }

    fn pool_snap_replies(&self) -> Vec<(u64, i32)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(_, msg)| match msg {
                Outbound::PoolSnap(r) => Some((r.tid, r.code)),
                _ => None,
            })
            .collect()
    }
}

/// Clock driven by the tests
struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

impl ManualClock {
    fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap();
        let mut now = self.now.lock();
        *now += delta;
    }
}

/// Placement peer recording notifications
#[derive(Default)]
struct TestPlacement {
    creating: Mutex<bool>,
    checked: Mutex<Vec<Epoch>>,
}

impl PlacementPeer for TestPlacement {
    fn check_osd_map(&self, epoch: Epoch) {
        self.checked.lock().push(epoch);
    }

    fn creating_pgs(&self) -> bool {
        *self.creating.lock()
    }
}

#[derive(Default)]
struct NoMds;

impl MdsPeer for NoMds {
    fn up_mds_addrs(&self) -> Vec<SocketAddr> {
        Vec::new()
    }
}

// ---- harness ----

struct Harness {
    mon: OsdMonitor,
    log: Arc<MemLog>,
    store: Arc<MemStore>,
    net: Arc<Recorder>,
    clock: Arc<ManualClock>,
    placement: Arc<TestPlacement>,
    fsid: ClusterFsid,
}

const SHELL: &str = "192.168.1.1:7000";

fn addr(n: u8) -> SocketAddr {
    format!("10.0.0.{n}:6800").parse().unwrap()
}

fn shell() -> SocketAddr {
    SHELL.parse().unwrap()
}

impl Harness {
    fn new(max_osd: u32) -> Self {
        let fsid = ClusterFsid::generate();
        let log = Arc::new(MemLog::default());
        let store = Arc::new(MemStore::default());
        let net = Arc::new(Recorder::default());
        let clock = Arc::new(ManualClock::default());
        let placement = Arc::new(TestPlacement::default());

        let config = MonitorConfig {
            propose_interval_secs: 0,
            ..Default::default()
        };
        let deps = MonitorDeps {
            log: log.clone(),
            store: store.clone(),
            messenger: net.clone(),
            placement: placement.clone(),
            mds: Arc::new(NoMds),
            events: Arc::new(TracingEventLog),
            clock: clock.clone(),
        };
        let mut mon = OsdMonitor::new(fsid, config, Role::Leader, deps);

        let genesis = OsdMap::build_initial(fsid, max_osd, clock.now());
        mon.create_initial(&genesis.encode().unwrap()).unwrap();
        mon.propose_pending();

        let mut harness = Self {
            mon,
            log,
            store,
            net,
            clock,
            placement,
            fsid,
        };
        harness.pump();
        harness
    }

    /// Apply every committed log entry the monitor has not seen yet
    fn pump(&mut self) {
        while self.log.version() > self.mon.osdmap().epoch {
            self.mon.on_log_committed();
        }
    }

    fn dispatch(&mut self, msg: Message, from: SocketAddr) {
        self.mon.dispatch(msg, from);
        self.pump();
    }

    fn boot(&mut self, id: u32, a: SocketAddr) {
        self.boot_with_sb(id, a, 0, 0, WEIGHT_IN);
    }

    fn boot_with_sb(&mut self, id: u32, a: SocketAddr, mounted: Epoch, clean_thru: Epoch, weight: u32) {
        let msg = Message::Boot(BootRecord {
            inst: OsdInst::new(id, a),
            sb: Superblock {
                fsid: self.fsid,
                mounted,
                clean_thru,
                weight,
                current_epoch: 0,
            },
        });
        self.dispatch(msg, a);
    }

    fn command(&mut self, args: &[&str]) {
        let msg = Message::Command(AdminCommand {
            cmd: args.iter().map(|s| s.to_string()).collect(),
            data: Vec::new(),
        });
        self.dispatch(msg, shell());
    }

    fn failure(&mut self, failed: OsdInst, reporter: OsdInst, epoch: Epoch) {
        let msg = Message::Failure(FailureReport {
            fsid: self.fsid,
            failed,
            reporter,
            epoch,
        });
        self.dispatch(msg, reporter.addr);
    }

    /// Decode the committed increment that produced `epoch`
    fn committed_inc(&self, epoch: Epoch) -> Incremental {
        let bytes = self
            .store
            .get_bytes("osdmap", epoch as u64)
            .unwrap()
            .expect("increment persisted");
        Incremental::decode(&bytes).unwrap()
    }
}

// ---- scenarios ----

#[test]
fn genesis_map_all_down_and_out() {
    let h = Harness::new(4);
    let map = h.mon.osdmap();
    assert_eq!(map.epoch, 1);
    assert_eq!(map.fsid, h.fsid);
    assert_eq!(map.get_all_osds(), vec![0, 1, 2, 3]);
    for osd in 0..4 {
        assert!(map.is_down(osd));
        assert!(map.is_out(osd));
    }
    // both the increment and the full map are persisted at epoch 1
    assert!(h.store.get_bytes("osdmap", 1).unwrap().is_some());
    assert!(h.store.get_bytes("osdmap_full", 1).unwrap().is_some());
}

#[test]
fn boot_brings_osd_up_and_in() {
    let mut h = Harness::new(4);
    h.boot(2, addr(2));

    let map = h.mon.osdmap();
    assert_eq!(map.epoch, 2);
    assert!(map.is_up(2));
    assert!(map.is_in(2));
    assert_eq!(map.get_addr(2), Some(addr(2)));

    // the booting osd is told about the new map
    let shipments = h.net.shipments_to(addr(2));
    assert!(!shipments.is_empty());
    assert_eq!(shipments.last().unwrap().newest_epoch(), Some(2));
}

#[test]
fn duplicate_boot_answers_without_a_round() {
    let mut h = Harness::new(4);
    h.boot(2, addr(2));
    let epoch = h.mon.osdmap().epoch;
    h.net.take();

    h.boot(2, addr(2));
    assert_eq!(h.mon.osdmap().epoch, epoch);
    assert!(!h.net.shipments_to(addr(2)).is_empty());
}

#[test]
fn boot_from_nonexistent_slot_is_rejected() {
    let mut h = Harness::new(2);
    h.boot(7, addr(7));
    assert_eq!(h.mon.osdmap().epoch, 1);
    assert!(!h.mon.osdmap().exists(7));
}

#[test]
fn failure_marks_down_then_tick_marks_out() {
    let mut h = Harness::new(4);
    h.boot(2, addr(2));
    h.boot(3, addr(3));
    let epoch_before = h.mon.osdmap().epoch;

    h.failure(
        OsdInst::new(2, addr(2)),
        OsdInst::new(3, addr(3)),
        epoch_before,
    );

    let map = h.mon.osdmap();
    assert_eq!(map.epoch, epoch_before + 1);
    assert!(map.is_down(2));
    assert!(map.is_in(2));
    assert!(h.mon.down_pending_out().contains_key(&2));

    // before the grace period nothing happens
    h.clock.advance(Duration::from_secs(100));
    h.mon.tick();
    h.pump();
    assert!(h.mon.osdmap().is_in(2));

    // after it the osd is evicted
    h.clock.advance(Duration::from_secs(201));
    h.mon.tick();
    h.pump();

    let map = h.mon.osdmap();
    assert_eq!(map.epoch, epoch_before + 2);
    assert!(map.is_down(2));
    assert!(map.is_out(2));
    assert!(!h.mon.down_pending_out().contains_key(&2));
}

#[test]
fn replayed_failure_report_is_a_duplicate() {
    let mut h = Harness::new(4);
    h.boot(2, addr(2));
    h.boot(3, addr(3));
    let report_epoch = h.mon.osdmap().epoch;

    h.failure(
        OsdInst::new(2, addr(2)),
        OsdInst::new(3, addr(3)),
        report_epoch,
    );
    let epoch_after = h.mon.osdmap().epoch;
    h.net.take();

    // replaying the same report consumes no round and catches the
    // reporter up from the epoch after its stale view
    h.failure(
        OsdInst::new(2, addr(2)),
        OsdInst::new(3, addr(3)),
        report_epoch,
    );
    assert_eq!(h.mon.osdmap().epoch, epoch_after);

    let shipments = h.net.shipments_to(addr(3));
    assert_eq!(shipments.len(), 1);
    let expected: Vec<Epoch> = (report_epoch + 1..=epoch_after).collect();
    let got: Vec<Epoch> = shipments[0].incremental_maps.keys().copied().collect();
    assert_eq!(got, expected);
}

#[test]
fn failure_from_dead_reporter_is_ignored() {
    let mut h = Harness::new(4);
    h.boot(2, addr(2));
    let epoch = h.mon.osdmap().epoch;

    // osd 3 never booted; its report must not take osd 2 down
    h.failure(OsdInst::new(2, addr(2)), OsdInst::new(3, addr(3)), epoch);
    assert_eq!(h.mon.osdmap().epoch, epoch);
    assert!(h.mon.osdmap().is_up(2));
}

#[test]
fn two_reports_one_round_one_down_entry() {
    let mut h = Harness::new(4);
    h.boot(2, addr(2));
    h.boot(3, addr(3));
    h.boot(1, addr(1));
    let epoch = h.mon.osdmap().epoch;

    // both reports arrive before the round commits
    h.log.hold_commits();
    h.mon.dispatch(
        Message::Failure(FailureReport {
            fsid: h.fsid,
            failed: OsdInst::new(2, addr(2)),
            reporter: OsdInst::new(3, addr(3)),
            epoch,
        }),
        addr(3),
    );
    h.mon.dispatch(
        Message::Failure(FailureReport {
            fsid: h.fsid,
            failed: OsdInst::new(2, addr(2)),
            reporter: OsdInst::new(1, addr(1)),
            epoch,
        }),
        addr(1),
    );
    h.log.release_commits();
    h.pump();

    // exactly one commit with exactly one down entry
    assert_eq!(h.mon.osdmap().epoch, epoch + 1);
    let inc = h.committed_inc(epoch + 1);
    assert_eq!(inc.new_down.len(), 1);
    assert!(inc.new_down.contains_key(&2));
    assert!(inc.new_up.is_empty());

    // both reporters were answered after the commit
    assert!(!h.net.shipments_to(addr(3)).is_empty());
    assert!(!h.net.shipments_to(addr(1)).is_empty());
}

#[test]
fn boot_over_live_incarnation_takes_two_epochs() {
    let mut h = Harness::new(4);
    h.boot(2, addr(2));
    let epoch = h.mon.osdmap().epoch;

    // same slot, different address: the old incarnation goes down first,
    // then the retried boot brings the new one up
    h.boot(2, addr(9));

    let map = h.mon.osdmap();
    assert_eq!(map.epoch, epoch + 2);
    assert!(map.is_up(2));
    assert_eq!(map.get_addr(2), Some(addr(9)));

    let down_inc = h.committed_inc(epoch + 1);
    assert!(down_inc.new_down.contains_key(&2));
    assert!(down_inc.new_up.is_empty());

    let up_inc = h.committed_inc(epoch + 2);
    assert_eq!(up_inc.new_up.get(&2), Some(&addr(9)));
    assert!(up_inc.new_down.is_empty());
}

#[test]
fn boot_records_clean_interval_with_stretch() {
    let mut h = Harness::new(4);
    // first lifetime: up at epoch 2
    h.boot_with_sb(2, addr(2), 0, 0, WEIGHT_IN);
    let up_from = h.mon.osdmap().get_info(2).up_from;

    // goes down a few epochs later
    h.boot(3, addr(3));
    h.boot(1, addr(1));
    let report_epoch = h.mon.osdmap().epoch;
    h.failure(
        OsdInst::new(2, addr(2)),
        OsdInst::new(3, addr(3)),
        report_epoch,
    );
    let down_at = h.mon.osdmap().get_info(2).down_at;
    assert!(down_at > up_from);

    // reboots claiming it was clean only through up_from; the recorded
    // interval stretches to the epoch before it was marked down
    h.boot_with_sb(2, addr(2), up_from, up_from, WEIGHT_IN);
    let info = h.mon.osdmap().get_info(2);
    assert_eq!(info.last_clean_first, up_from);
    assert_eq!(info.last_clean_last, down_at - 1);
}

#[test]
fn alive_advances_up_thru_once() {
    let mut h = Harness::new(4);
    h.boot(2, addr(2));
    let epoch = h.mon.osdmap().epoch;
    assert_eq!(h.mon.osdmap().get_up_thru(2), 0);

    h.dispatch(
        Message::Alive(AliveNotice {
            inst: OsdInst::new(2, addr(2)),
            map_epoch: epoch,
        }),
        addr(2),
    );
    assert_eq!(h.mon.osdmap().get_up_thru(2), epoch);
    let committed = h.mon.osdmap().epoch;

    // the second notice is already covered and consumes no round
    h.net.take();
    h.dispatch(
        Message::Alive(AliveNotice {
            inst: OsdInst::new(2, addr(2)),
            map_epoch: epoch,
        }),
        addr(2),
    );
    assert_eq!(h.mon.osdmap().epoch, committed);
    assert!(!h.net.shipments_to(addr(2)).is_empty());
}

#[test]
fn pool_create_mksnap_and_purge_roundtrip() {
    let mut h = Harness::new(4);
    h.command(&["osd", "pool", "create", "foo"]);

    let pool_id = h.mon.osdmap().lookup_pool_name("foo").expect("pool created");
    let pool = h.mon.osdmap().get_pool(pool_id).unwrap();
    assert_eq!(pool.size, 2);
    assert_eq!(pool.pg_num, 8);
    assert_eq!(pool.pgp_num, 8);

    h.command(&["osd", "pool", "mksnap", "foo", "s1"]);
    let pool = h.mon.osdmap().get_pool(pool_id).unwrap();
    let snap_id = pool.snap_exists("s1").expect("snap created");

    let mut purge = SnapPurge::default();
    purge.snaps.insert(pool_id, vec![snap_id]);
    let epoch_before = h.mon.osdmap().epoch;
    h.dispatch(Message::RemoveSnaps(purge.clone()), addr(2));

    let pool = h.mon.osdmap().get_pool(pool_id).unwrap();
    assert!(pool.is_removed_snap(snap_id));
    assert!(pool.snap_seq >= snap_id);
    assert_eq!(pool.snap_exists("s1"), None);
    assert_eq!(h.mon.osdmap().epoch, epoch_before + 1);

    // replaying the purge is fully absorbed by preprocess
    h.dispatch(Message::RemoveSnaps(purge), addr(2));
    assert_eq!(h.mon.osdmap().epoch, epoch_before + 1);
}

#[test]
fn snap_purge_skips_unknown_pools() {
    let mut h = Harness::new(4);
    let mut purge = SnapPurge::default();
    purge.snaps.insert(42, vec![1, 2, 3]);
    let epoch = h.mon.osdmap().epoch;
    h.dispatch(Message::RemoveSnaps(purge), addr(2));
    assert_eq!(h.mon.osdmap().epoch, epoch);
}

#[test]
fn pool_snap_request_lifecycle() {
    let mut h = Harness::new(4);
    h.command(&["osd", "pool", "create", "foo"]);
    let pool_id = h.mon.osdmap().lookup_pool_name("foo").unwrap();

    let snap = |tid: u64, pool, name: &str, create| {
        Message::PoolSnap(PoolSnapRequest {
            fsid: ClusterFsid::nil(),
            tid,
            pool,
            name: name.to_string(),
            create,
        })
    };

    // unknown pool id
    h.dispatch(snap(1, -1, "s", true), shell());
    // create, duplicate create, delete, duplicate delete
    h.dispatch(snap(2, pool_id, "nightly", true), shell());
    h.dispatch(snap(3, pool_id, "nightly", true), shell());
    h.dispatch(snap(4, pool_id, "nightly", false), shell());
    h.dispatch(snap(5, pool_id, "nightly", false), shell());

    let replies = h.net.pool_snap_replies();
    assert_eq!(
        replies,
        vec![
            (1, -ENOENT),
            (2, 0),
            (3, -EEXIST),
            (4, 0),
            (5, -ENOENT),
        ]
    );
}

#[test]
fn send_incremental_covers_every_epoch() {
    let mut h = Harness::new(4);
    h.boot(0, addr(1));
    h.boot(1, addr(2));
    h.boot(2, addr(3));
    let current = h.mon.osdmap().epoch;

    let client = addr(10);
    h.mon.send_latest(client, 1);
    let shipments = h.net.shipments_to(client);
    assert_eq!(shipments.len(), 1);
    let covered: Vec<Epoch> = shipments[0]
        .incremental_maps
        .keys()
        .chain(shipments[0].full_maps.keys())
        .copied()
        .collect();
    let mut covered_sorted = covered;
    covered_sorted.sort_unstable();
    assert_eq!(covered_sorted, (1..=current).collect::<Vec<_>>());
}

#[test]
fn send_incremental_falls_back_to_full_map() {
    let mut h = Harness::new(4);
    h.boot(0, addr(1));
    let current = h.mon.osdmap().epoch;

    // lose one increment; the persisted full map fills the gap
    h.store.remove("osdmap", current as u64);
    let client = addr(10);
    h.mon.send_latest(client, 1);

    let shipments = h.net.shipments_to(client);
    assert_eq!(shipments.len(), 1);
    assert!(shipments[0].full_maps.contains_key(&current));
    assert!(shipments[0].incremental_maps.contains_key(&(current - 1)));
}

#[test]
#[should_panic(expected = "no increment or full map")]
fn send_incremental_panics_on_log_gap() {
    let mut h = Harness::new(4);
    h.boot(0, addr(1));
    let current = h.mon.osdmap().epoch;

    h.store.remove("osdmap", current as u64);
    h.store.remove("osdmap_full", current as u64);
    h.mon.send_latest(addr(10), 1);
}

#[test]
fn unreadable_log_parks_requesters_until_commit() {
    let mut h = Harness::new(4);
    h.log.set_readable(false);

    let client = addr(10);
    h.mon.send_latest(client, 1);
    assert_eq!(h.mon.waiting_for_map().get(&client), Some(&1));
    assert!(h.net.shipments_to(client).is_empty());

    h.log.set_readable(true);
    h.boot(0, addr(1));

    assert!(h.mon.waiting_for_map().is_empty());
    assert!(!h.net.shipments_to(client).is_empty());
}

#[test]
fn getmap_ahead_of_current_waits_for_epoch() {
    let mut h = Harness::new(4);
    let client = addr(10);
    let wanted = h.mon.osdmap().epoch + 2;

    h.dispatch(
        Message::GetMap {
            fsid: h.fsid,
            start: wanted,
        },
        client,
    );
    assert_eq!(h.mon.waiting_for_map().get(&client), Some(&wanted));

    h.boot(0, addr(1));
    assert_eq!(h.mon.waiting_for_map().get(&client), Some(&wanted));

    h.boot(1, addr(2));
    assert!(h.mon.waiting_for_map().is_empty());
    assert!(!h.net.shipments_to(client).is_empty());
}

#[test]
fn getmap_with_wrong_fsid_is_dropped() {
    let mut h = Harness::new(4);
    let client = addr(10);
    h.dispatch(
        Message::GetMap {
            fsid: ClusterFsid::generate(),
            start: 0,
        },
        client,
    );
    assert!(h.net.shipments_to(client).is_empty());
}

#[test]
fn blacklist_expires_on_tick() {
    let mut h = Harness::new(4);
    let victim = addr(66);
    let until = h.clock.now() + chrono::Duration::seconds(30);

    h.mon.blacklist(victim, until);
    h.mon.propose_pending();
    h.pump();
    assert!(h.mon.osdmap().blacklist.contains_key(&victim));

    h.clock.advance(Duration::from_secs(10));
    h.mon.tick();
    h.pump();
    assert!(h.mon.osdmap().blacklist.contains_key(&victim));

    h.clock.advance(Duration::from_secs(31));
    h.mon.tick();
    h.pump();
    assert!(!h.mon.osdmap().blacklist.contains_key(&victim));
}

#[test]
fn placement_peer_sees_every_committed_epoch() {
    let mut h = Harness::new(4);
    h.boot(0, addr(1));
    h.boot(1, addr(2));
    let checked = h.placement.checked.lock().clone();
    assert!(checked.contains(&2));
    assert!(checked.contains(&3));
}

#[test]
fn bcast_latest_reaches_up_osds_only() {
    let mut h = Harness::new(4);
    h.boot(1, addr(1));
    h.boot(2, addr(2));
    h.command(&["osd", "down", "2"]);
    h.net.take();

    h.mon.bcast_latest_osd();
    assert!(!h.net.shipments_to(addr(1)).is_empty());
    assert!(h.net.shipments_to(addr(2)).is_empty());

    h.net.take();
    h.mon.bcast_full_osd();
    let shipments = h.net.shipments_to(addr(1));
    assert_eq!(shipments.len(), 1);
    assert!(shipments[0].full_maps.contains_key(&h.mon.osdmap().epoch));
}

#[test]
fn mark_all_down_takes_every_up_osd_down() {
    let mut h = Harness::new(4);
    h.boot(0, addr(1));
    h.boot(1, addr(2));
    h.boot(2, addr(3));

    h.mon.mark_all_down();
    h.pump();

    let map = h.mon.osdmap();
    for osd in 0..3 {
        assert!(map.is_down(osd));
    }
    let inc = h.committed_inc(map.epoch);
    // a shutdown sweep records clean downs
    assert!(inc.new_down.values().all(|&clean| clean));
}

#[test]
fn peon_preprocesses_but_never_prepares() {
    let mut h = Harness::new(4);
    h.boot(2, addr(2));
    let epoch = h.mon.osdmap().epoch;

    h.mon.set_role(Role::Peon);
    h.boot(3, addr(3));
    assert_eq!(h.mon.osdmap().epoch, epoch);

    // duplicate boots are still answered from the committed map
    h.net.take();
    h.boot(2, addr(2));
    assert!(!h.net.shipments_to(addr(2)).is_empty());
}

// ---- admin command surface ----

#[test]
fn stat_and_getmaxosd_answer_from_current_map() {
    let mut h = Harness::new(4);
    h.boot(2, addr(2));
    h.net.take();

    h.command(&["osd", "stat"]);
    h.command(&["osd", "getmaxosd"]);

    let replies = h.net.command_replies();
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0].1, 0);
    assert!(replies[0].2.contains("1 up"));
    assert_eq!(replies[1].1, 0);
    assert!(replies[1].2.contains("max_osd = 4"));
}

#[test]
fn dump_missing_epoch_is_enoent() {
    let mut h = Harness::new(4);
    h.command(&["osd", "dump", "99"]);
    let replies = h.net.command_replies();
    assert_eq!(replies.last().unwrap().1, -ENOENT);
}

#[test]
fn setmaxosd_grows_the_slot_table() {
    let mut h = Harness::new(4);
    h.command(&["osd", "setmaxosd", "16"]);
    assert_eq!(h.mon.osdmap().max_osd(), 16);
}

#[test]
fn down_out_in_reweight_lost_flow() {
    let mut h = Harness::new(4);
    h.boot(2, addr(2));

    h.command(&["osd", "down", "2"]);
    assert!(h.mon.osdmap().is_down(2));

    h.command(&["osd", "out", "2"]);
    assert!(h.mon.osdmap().is_out(2));

    h.command(&["osd", "in", "2"]);
    assert!(h.mon.osdmap().is_in(2));

    h.command(&["osd", "reweight", "2", "0.5"]);
    assert_eq!(h.mon.osdmap().get_weight(2), WEIGHT_IN / 2);

    // lost requires the confirmation flag
    h.net.take();
    h.command(&["osd", "lost", "2"]);
    assert_eq!(h.mon.osdmap().get_info(2).lost_at, 0);
    let replies = h.net.command_replies();
    assert!(replies.last().unwrap().2.contains("SURE"));

    h.command(&["osd", "lost", "2", "--yes-i-really-mean-it"]);
    let down_at = h.mon.osdmap().get_info(2).down_at;
    assert_eq!(h.mon.osdmap().get_info(2).lost_at, down_at);
}

#[test]
fn lost_rejected_while_osd_is_up() {
    let mut h = Harness::new(4);
    h.boot(2, addr(2));
    h.command(&["osd", "lost", "2", "--yes-i-really-mean-it"]);
    assert_eq!(h.mon.osdmap().get_info(2).lost_at, 0);
    let replies = h.net.command_replies();
    assert!(replies.last().unwrap().2.contains("not down"));
}

#[test]
fn pool_set_respects_monotonic_pg_num() {
    let mut h = Harness::new(4);
    h.command(&["osd", "pool", "create", "foo"]);

    h.command(&["osd", "pool", "set", "foo", "pg_num", "16"]);
    let pool_id = h.mon.osdmap().lookup_pool_name("foo").unwrap();
    assert_eq!(h.mon.osdmap().get_pool(pool_id).unwrap().pg_num, 16);

    // shrinking is rejected
    h.net.take();
    h.command(&["osd", "pool", "set", "foo", "pg_num", "8"]);
    assert_eq!(h.mon.osdmap().get_pool(pool_id).unwrap().pg_num, 16);
    let replies = h.net.command_replies();
    assert_eq!(replies.last().unwrap().1, -cairn_common::EINVAL);

    // pgp_num may not exceed pg_num
    h.net.take();
    h.command(&["osd", "pool", "set", "foo", "pgp_num", "32"]);
    let replies = h.net.command_replies();
    assert_eq!(replies.last().unwrap().1, -cairn_common::EINVAL);

    h.command(&["osd", "pool", "set", "foo", "pgp_num", "16"]);
    assert_eq!(h.mon.osdmap().get_pool(pool_id).unwrap().pgp_num, 16);
}

#[test]
fn pool_resize_blocked_while_pgs_creating() {
    let mut h = Harness::new(4);
    h.command(&["osd", "pool", "create", "foo"]);
    *h.placement.creating.lock() = true;

    h.net.take();
    h.command(&["osd", "pool", "set", "foo", "pg_num", "16"]);
    let replies = h.net.command_replies();
    assert_eq!(replies.last().unwrap().1, -EAGAIN);
}

#[test]
fn pool_create_duplicate_is_eexist() {
    let mut h = Harness::new(4);
    h.command(&["osd", "pool", "create", "foo"]);
    h.net.take();
    h.command(&["osd", "pool", "create", "foo"]);
    let replies = h.net.command_replies();
    assert_eq!(replies.last().unwrap().1, -EEXIST);
}

#[test]
fn pool_ids_are_assigned_past_the_maximum() {
    let mut h = Harness::new(4);
    h.command(&["osd", "pool", "create", "foo"]);
    h.command(&["osd", "pool", "create", "bar"]);
    assert_eq!(h.mon.osdmap().lookup_pool_name("foo"), Some(1));
    assert_eq!(h.mon.osdmap().lookup_pool_name("bar"), Some(2));
}

#[test]
fn mksnap_rmsnap_shell_commands() {
    let mut h = Harness::new(4);
    h.command(&["osd", "pool", "create", "foo"]);
    h.command(&["osd", "pool", "mksnap", "foo", "s1"]);

    let pool_id = h.mon.osdmap().lookup_pool_name("foo").unwrap();
    assert!(h.mon.osdmap().get_pool(pool_id).unwrap().snap_exists("s1").is_some());

    // duplicate snap name
    h.net.take();
    h.command(&["osd", "pool", "mksnap", "foo", "s1"]);
    assert_eq!(h.net.command_replies().last().unwrap().1, -EEXIST);

    h.command(&["osd", "pool", "rmsnap", "foo", "s1"]);
    assert!(h.mon.osdmap().get_pool(pool_id).unwrap().snap_exists("s1").is_none());

    h.net.take();
    h.command(&["osd", "pool", "rmsnap", "foo", "s1"]);
    assert_eq!(h.net.command_replies().last().unwrap().1, -ENOENT);
}

#[test]
fn scrub_reaches_up_osds_only() {
    let mut h = Harness::new(4);
    h.boot(1, addr(1));
    h.boot(2, addr(2));
    h.net.take();

    h.command(&["osd", "scrub", "*"]);
    let sent = h.net.take();
    let scrub_targets: Vec<SocketAddr> = sent
        .iter()
        .filter_map(|(to, msg)| matches!(msg, Outbound::Scrub { .. }).then_some(*to))
        .collect();
    assert_eq!(scrub_targets, vec![addr(1), addr(2)]);
}

#[test]
fn getcrushmap_returns_blob_after_setcrushmap() {
    let mut h = Harness::new(4);
    let blob = vec![7u8; 32];
    h.dispatch(
        Message::Command(AdminCommand {
            cmd: vec!["osd".into(), "setcrushmap".into()],
            data: blob.clone(),
        }),
        shell(),
    );
    assert_eq!(h.mon.osdmap().crush.bytes(), &blob[..]);
    assert_eq!(h.mon.osdmap().crush.version, 1);

    h.net.take();
    h.command(&["osd", "getcrushmap"]);
    let sent = h.net.take();
    let reply = sent
        .iter()
        .find_map(|(_, msg)| match msg {
            Outbound::Command(r) => Some(r.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(reply.code, 0);
    assert_eq!(reply.data, blob);
}

#[test]
fn setmap_replaces_map_wholesale() {
    let mut h = Harness::new(4);
    let pending_epoch = h.mon.osdmap().epoch + 1;
    let replacement = OsdMap::build_initial(h.fsid, 12, h.clock.now());

    h.dispatch(
        Message::Command(AdminCommand {
            cmd: vec!["osd".into(), "setmap".into(), pending_epoch.to_string()],
            data: replacement.encode().unwrap(),
        }),
        shell(),
    );
    assert_eq!(h.mon.osdmap().epoch, pending_epoch);
    assert_eq!(h.mon.osdmap().max_osd(), 12);
}

#[test]
fn setmap_with_wrong_epoch_or_fsid_is_rejected() {
    let mut h = Harness::new(4);
    let epoch = h.mon.osdmap().epoch;

    let replacement = OsdMap::build_initial(h.fsid, 12, h.clock.now());
    h.dispatch(
        Message::Command(AdminCommand {
            cmd: vec!["osd".into(), "setmap".into(), "99".into()],
            data: replacement.encode().unwrap(),
        }),
        shell(),
    );
    assert_eq!(h.mon.osdmap().epoch, epoch);

    let foreign = OsdMap::build_initial(ClusterFsid::generate(), 12, h.clock.now());
    h.dispatch(
        Message::Command(AdminCommand {
            cmd: vec![
                "osd".into(),
                "setmap".into(),
                (epoch + 1).to_string(),
            ],
            data: foreign.encode().unwrap(),
        }),
        shell(),
    );
    assert_eq!(h.mon.osdmap().epoch, epoch);
    let replies = h.net.command_replies();
    assert!(replies.iter().all(|(_, code, _)| *code != 0));
}
