//! Administrative command handlers
//!
//! Read-side commands answer from the committed map (or persistence) during
//! preprocess; write-side commands enqueue mutations in prepare and reply
//! once the round commits. Replies carry 0 or a negative errno plus a short
//! status line for the shell.

use super::{CommitAction, Disposition, OsdMonitor};
use crate::messages::{AdminCommand, Outbound};
use cairn_common::{OsdId, PoolId, EAGAIN, EEXIST, EINVAL, ENOENT, WEIGHT_IN, WEIGHT_OUT};
use cairn_map::{CrushBlob, OsdMap, Pool, PoolType};
use std::net::SocketAddr;
use tracing::debug;

/// Pool creation defaults
const POOL_DEFAULT_SIZE: u32 = 2;
const POOL_DEFAULT_PG_NUM: u32 = 8;
const POOL_DEFAULT_PGP_NUM: u32 = 8;

impl OsdMonitor {
    pub(super) fn preprocess_command(&mut self, m: &AdminCommand, from: SocketAddr) -> Disposition {
        let cmd = &m.cmd;
        let mut code: Option<i32> = None;
        let mut status = String::new();
        let mut data = Vec::new();

        if cmd.len() > 1 {
            match cmd[1].as_str() {
                "stat" => {
                    let mut out = Vec::new();
                    if self.osdmap.print_summary(&mut out).is_ok() {
                        status = String::from_utf8_lossy(&out).trim_end().to_string();
                        code = Some(0);
                    }
                }
                "dump" => {
                    if cmd.len() > 2 {
                        match cmd[2].parse::<u32>() {
                            Ok(e) => match self.journal.get_full(e) {
                                Ok(Some(bytes)) => match OsdMap::decode(&bytes) {
                                    Ok(map) => {
                                        let mut out = Vec::new();
                                        if map.print(&mut out).is_ok() {
                                            data = out;
                                            status = format!("dumped osdmap epoch {}", map.epoch);
                                            code = Some(0);
                                        }
                                    }
                                    Err(_) => {
                                        status = format!("osdmap at epoch {e} is unreadable");
                                        code = Some(-EINVAL);
                                    }
                                },
                                Ok(None) => {
                                    status = format!("no osdmap at epoch {e}");
                                    code = Some(-ENOENT);
                                }
                                Err(_) => {
                                    status = "store read failed".to_string();
                                    code = Some(-EINVAL);
                                }
                            },
                            Err(_) => {
                                status = format!("invalid epoch '{}'", cmd[2]);
                                code = Some(-EINVAL);
                            }
                        }
                    } else {
                        let mut out = Vec::new();
                        if self.osdmap.print(&mut out).is_ok() {
                            data = out;
                            status = format!("dumped osdmap epoch {}", self.osdmap.epoch);
                            code = Some(0);
                        }
                    }
                }
                "getmap" => {
                    if let Ok(bytes) = self.osdmap.encode() {
                        data = bytes;
                        status = format!("got osdmap epoch {}", self.osdmap.epoch);
                        code = Some(0);
                    }
                }
                "getcrushmap" => {
                    data = self.osdmap.crush.bytes().to_vec();
                    status = format!(
                        "got crush map from osdmap epoch {}",
                        self.osdmap.epoch
                    );
                    code = Some(0);
                }
                "getmaxosd" => {
                    status = format!(
                        "max_osd = {} in epoch {}",
                        self.osdmap.max_osd(),
                        self.osdmap.epoch
                    );
                    code = Some(0);
                }
                "injectargs" if cmd.len() == 4 => {
                    if cmd[2] == "*" {
                        for osd in self.osdmap.get_up_osds() {
                            if let Some(inst) = self.osdmap.get_inst(osd) {
                                self.messenger.send(
                                    inst.addr,
                                    Outbound::InjectArgs {
                                        args: cmd[3].clone(),
                                    },
                                );
                            }
                        }
                        status = "ok bcast".to_string();
                        code = Some(0);
                    } else {
                        match cmd[2].parse::<OsdId>() {
                            Ok(osd) if self.osdmap.is_up(osd) => {
                                if let Some(inst) = self.osdmap.get_inst(osd) {
                                    self.messenger.send(
                                        inst.addr,
                                        Outbound::InjectArgs {
                                            args: cmd[3].clone(),
                                        },
                                    );
                                }
                                status = "ok".to_string();
                                code = Some(0);
                            }
                            _ => {
                                status = "specify osd number or *".to_string();
                                code = Some(-EINVAL);
                            }
                        }
                    }
                }
                "scrub" if cmd.len() > 2 => {
                    if cmd[2] == "*" {
                        let mut scrubbed = Vec::new();
                        for osd in self.osdmap.get_up_osds() {
                            if let Some(inst) = self.osdmap.get_inst(osd) {
                                self.messenger
                                    .send(inst.addr, Outbound::Scrub { fsid: self.fsid });
                                scrubbed.push(osd.to_string());
                            }
                        }
                        status = format!("osds {} instructed to scrub", scrubbed.join(","));
                        code = Some(0);
                    } else {
                        match cmd[2].parse::<OsdId>() {
                            Ok(osd) if self.osdmap.is_up(osd) => {
                                if let Some(inst) = self.osdmap.get_inst(osd) {
                                    self.messenger
                                        .send(inst.addr, Outbound::Scrub { fsid: self.fsid });
                                }
                                status = format!("osd{osd} instructed to scrub");
                                code = Some(0);
                            }
                            Ok(osd) => {
                                status = format!("osd{osd} is not up");
                                code = Some(-EINVAL);
                            }
                            Err(_) => {
                                status = format!("invalid osd id '{}'", cmd[2]);
                                code = Some(-EINVAL);
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        if let Some(code) = code {
            debug!(%from, code, %status, "command handled in preprocess");
            self.send_command_reply(from, code, status, data);
            Disposition::Handled
        } else {
            Disposition::Forward
        }
    }

    pub(super) fn prepare_command(&mut self, m: AdminCommand, from: SocketAddr) -> bool {
        let cmd = &m.cmd;
        let err = -EINVAL;
        let mut status = String::new();

        if cmd.len() > 1 {
            match cmd[1].as_str() {
                "setcrushmap" => {
                    debug!("setting new crush map");
                    self.pending
                        .replace_crush(CrushBlob::replacing(&self.osdmap.crush, m.data.clone()));
                    self.wait_command_reply(from, "set crush map");
                    return true;
                }
                "setmap" if cmd.len() == 3 => match OsdMap::decode(&m.data) {
                    Ok(mut map) => match cmd[2].parse::<u32>() {
                        Ok(e) => {
                            if map.fsid == self.fsid {
                                if self.pending.epoch() == e {
                                    map.epoch = e;
                                    match map.encode() {
                                        Ok(bytes) => {
                                            self.pending.set_fullmap(bytes);
                                            self.wait_command_reply(from, "set osd map");
                                            return true;
                                        }
                                        Err(e) => status = format!("encode failed: {e}"),
                                    }
                                } else {
                                    status = format!(
                                        "next osdmap epoch {} != {e}",
                                        self.pending.epoch()
                                    );
                                }
                            } else {
                                status = format!(
                                    "osdmap fsid {} does not match cluster fsid {}",
                                    map.fsid, self.fsid
                                );
                            }
                        }
                        Err(_) => status = format!("invalid epoch '{}'", cmd[2]),
                    },
                    Err(e) => status = format!("invalid osdmap: {e}"),
                },
                "setmaxosd" if cmd.len() > 2 => match cmd[2].parse::<u32>() {
                    Ok(n) => {
                        self.pending.set_max_osd(n);
                        self.wait_command_reply(from, format!("set new max_osd = {n}"));
                        return true;
                    }
                    Err(_) => status = format!("invalid max_osd '{}'", cmd[2]),
                },
                "down" if cmd.len() == 3 => match cmd[2].parse::<OsdId>() {
                    Ok(osd) => {
                        if !self.osdmap.exists(osd) {
                            status = format!("osd{osd} does not exist");
                        } else if self.osdmap.is_down(osd) {
                            status = format!("osd{osd} is already down");
                        } else {
                            self.pending.mark_down(osd, false);
                            // park the victim so it learns of its own demise
                            if let Some(inst) = self.osdmap.get_inst(osd) {
                                self.waiting_for_map.insert(inst.addr, self.osdmap.epoch);
                            }
                            self.wait_command_reply(from, format!("marked down osd{osd}"));
                            return true;
                        }
                    }
                    Err(_) => status = format!("invalid osd id '{}'", cmd[2]),
                },
                "out" if cmd.len() == 3 => match cmd[2].parse::<OsdId>() {
                    Ok(osd) => {
                        if !self.osdmap.exists(osd) {
                            status = format!("osd{osd} does not exist");
                        } else if self.osdmap.is_out(osd) {
                            status = format!("osd{osd} is already out");
                        } else {
                            self.pending.set_weight(osd, WEIGHT_OUT);
                            self.wait_command_reply(from, format!("marked out osd{osd}"));
                            return true;
                        }
                    }
                    Err(_) => status = format!("invalid osd id '{}'", cmd[2]),
                },
                "in" if cmd.len() == 3 => match cmd[2].parse::<OsdId>() {
                    Ok(osd) => {
                        if self.osdmap.is_in(osd) {
                            status = format!("osd{osd} is already in");
                        } else if !self.osdmap.exists(osd) {
                            status = format!("osd{osd} does not exist");
                        } else {
                            self.pending.set_weight(osd, WEIGHT_IN);
                            self.wait_command_reply(from, format!("marked in osd{osd}"));
                            return true;
                        }
                    }
                    Err(_) => status = format!("invalid osd id '{}'", cmd[2]),
                },
                "reweight" if cmd.len() == 4 => {
                    match (cmd[2].parse::<OsdId>(), cmd[3].parse::<f64>()) {
                        (Ok(osd), Ok(w)) if w >= 0.0 => {
                            if self.osdmap.exists(osd) {
                                let ww = (f64::from(WEIGHT_IN) * w).round() as u32;
                                self.pending.set_weight(osd, ww);
                                self.wait_command_reply(
                                    from,
                                    format!("reweighted osd{osd} to {w} ({ww:#x})"),
                                );
                                return true;
                            }
                            status = format!("osd{osd} does not exist");
                        }
                        _ => status = "usage: osd reweight <id> <weight>".to_string(),
                    }
                }
                "lost" if cmd.len() >= 3 => match cmd[2].parse::<OsdId>() {
                    Ok(osd) => {
                        if cmd.len() < 4 || cmd[3] != "--yes-i-really-mean-it" {
                            status = "are you SURE?  this might mean real, permanent data loss.  \
                                      pass --yes-i-really-mean-it if you really do."
                                .to_string();
                        } else if !self.osdmap.exists(osd) || !self.osdmap.is_down(osd) {
                            status = format!("osd{osd} is not down or doesn't exist");
                        } else {
                            let e = self.osdmap.get_info(osd).down_at;
                            self.pending.mark_lost(osd, e);
                            self.wait_command_reply(
                                from,
                                format!("marked osd lost in epoch {e}"),
                            );
                            return true;
                        }
                    }
                    Err(_) => status = format!("invalid osd id '{}'", cmd[2]),
                },
                "pool" if cmd.len() >= 3 => {
                    return self.prepare_pool_command(&m, from);
                }
                other => status = format!("unknown command {other}"),
            }
        } else {
            status = "no command?".to_string();
        }

        if cmd.len() > 1 && status.is_empty() {
            status = format!("unknown command {}", cmd[1]);
        }
        self.send_command_reply(from, err, status, Vec::new());
        false
    }

    fn prepare_pool_command(&mut self, m: &AdminCommand, from: SocketAddr) -> bool {
        let cmd = &m.cmd;
        let mut err = -EINVAL;
        let mut status = String::new();

        match cmd[2].as_str() {
            "mksnap" if cmd.len() >= 5 => {
                match self.osdmap.lookup_pool_name(&cmd[3]) {
                    None => {
                        status = format!("unrecognized pool '{}'", cmd[3]);
                        err = -ENOENT;
                    }
                    Some(pool) => {
                        let snapname = &cmd[4];
                        let committed_exists = self
                            .osdmap
                            .get_pool(pool)
                            .is_some_and(|p| p.snap_exists(snapname).is_some());
                        if committed_exists || self.pending.pending_snap_exists(pool, snapname) {
                            status =
                                format!("pool {} snap {snapname} already exists", cmd[3]);
                            err = -EEXIST;
                        } else {
                            let now = self.clock.now();
                            let epoch = self.pending.epoch();
                            if let Some(pp) = self.pending.pool_for_update(pool, &self.osdmap) {
                                pp.add_snap(snapname.clone(), now);
                                pp.snap_epoch = epoch;
                                self.wait_command_reply(
                                    from,
                                    format!("created pool {} snap {snapname}", cmd[3]),
                                );
                                return true;
                            }
                        }
                    }
                }
            }
            "rmsnap" if cmd.len() >= 5 => {
                match self.osdmap.lookup_pool_name(&cmd[3]) {
                    None => {
                        status = format!("unrecognized pool '{}'", cmd[3]);
                        err = -ENOENT;
                    }
                    Some(pool) => {
                        let snapname = &cmd[4];
                        let committed_exists = self
                            .osdmap
                            .get_pool(pool)
                            .is_some_and(|p| p.snap_exists(snapname).is_some());
                        if !committed_exists && !self.pending.pending_snap_exists(pool, snapname) {
                            status =
                                format!("pool {} snap {snapname} does not exist", cmd[3]);
                            err = -ENOENT;
                        } else {
                            let epoch = self.pending.epoch();
                            if let Some(pp) = self.pending.pool_for_update(pool, &self.osdmap) {
                                if let Some(id) = pp.snap_exists(snapname) {
                                    pp.remove_snap(id);
                                    pp.snap_epoch = epoch;
                                }
                                self.wait_command_reply(
                                    from,
                                    format!("removed pool {} snap {snapname}", cmd[3]),
                                );
                                return true;
                            }
                        }
                    }
                }
            }
            "create" if cmd.len() >= 4 => {
                let name = &cmd[3];
                let mut pool: PoolId = 1;
                for (&id, existing) in &self.osdmap.pool_names {
                    if existing == name {
                        self.send_command_reply(
                            from,
                            -EEXIST,
                            format!("pool '{name}' exists"),
                            Vec::new(),
                        );
                        return false;
                    }
                    if id >= pool {
                        pool = id + 1;
                    }
                }
                let value = Pool {
                    pool_type: PoolType::Replicated,
                    size: POOL_DEFAULT_SIZE,
                    crush_ruleset: 0,
                    pg_num: POOL_DEFAULT_PG_NUM,
                    pgp_num: POOL_DEFAULT_PGP_NUM,
                    lpg_num: 0,
                    lpgp_num: 0,
                    last_change: self.pending.epoch(),
                    ..Default::default()
                };
                self.pending.upsert_pool(pool, value);
                self.pending.set_pool_name(pool, name.clone());
                self.wait_command_reply(from, format!("pool '{name}' created"));
                return true;
            }
            "set" if cmd.len() >= 6 => {
                match self.osdmap.lookup_pool_name(&cmd[3]) {
                    None => {
                        status = format!("unrecognized pool '{}'", cmd[3]);
                        err = -ENOENT;
                    }
                    Some(pool) => {
                        let n: u32 = cmd[5].parse().unwrap_or(0);
                        if n == 0 {
                            status = format!("invalid value '{}'", cmd[5]);
                        } else {
                            return self.prepare_pool_set(pool, &cmd[3], &cmd[4], n, from);
                        }
                    }
                }
            }
            other => status = format!("unknown pool command {other}"),
        }

        self.send_command_reply(from, err, status, Vec::new());
        false
    }

    fn prepare_pool_set(
        &mut self,
        pool: PoolId,
        pool_name: &str,
        field: &str,
        n: u32,
        from: SocketAddr,
    ) -> bool {
        let mut err = -EINVAL;
        let mut status;

        let Some(p) = self.osdmap.get_pool(pool) else {
            self.send_command_reply(
                from,
                -ENOENT,
                format!("unrecognized pool '{pool_name}'"),
                Vec::new(),
            );
            return false;
        };
        let (cur_pg, cur_pgp) = (p.pg_num, p.pgp_num);

        match field {
            "size" => {
                if let Some(pp) = self.pending.pool_for_update(pool, &self.osdmap) {
                    pp.size = n;
                    self.wait_command_reply(from, format!("set pool {pool} size to {n}"));
                    return true;
                }
                status = format!("unrecognized pool '{pool_name}'");
                err = -ENOENT;
            }
            "pg_num" => {
                if n <= cur_pg {
                    status = format!("specified pg_num {n} <= current {cur_pg}");
                } else if self.placement.creating_pgs() {
                    status = "currently creating pgs, wait".to_string();
                    err = -EAGAIN;
                } else {
                    if let Some(pp) = self.pending.pool_for_update(pool, &self.osdmap) {
                        pp.pg_num = n;
                        self.wait_command_reply(from, format!("set pool {pool} pg_num to {n}"));
                        return true;
                    }
                    status = format!("unrecognized pool '{pool_name}'");
                    err = -ENOENT;
                }
            }
            "pgp_num" => {
                if n <= cur_pgp {
                    status = format!("specified pgp_num {n} <= current {cur_pgp}");
                } else if n > cur_pg {
                    status = format!("specified pgp_num {n} > pg_num {cur_pg}");
                } else if self.placement.creating_pgs() {
                    status = "still creating pgs, wait".to_string();
                    err = -EAGAIN;
                } else {
                    if let Some(pp) = self.pending.pool_for_update(pool, &self.osdmap) {
                        pp.pgp_num = n;
                        self.wait_command_reply(from, format!("set pool {pool} pgp_num to {n}"));
                        return true;
                    }
                    status = format!("unrecognized pool '{pool_name}'");
                    err = -ENOENT;
                }
            }
            other => status = format!("unrecognized pool field {other}"),
        }

        self.send_command_reply(from, err, status, Vec::new());
        false
    }

    fn wait_command_reply(&mut self, addr: SocketAddr, status: impl Into<String>) {
        self.commit_waiters.push(CommitAction::CommandReply {
            addr,
            status: status.into(),
        });
    }
}
