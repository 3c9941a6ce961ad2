//! Generic node base.
//!
//! [`NodeCore`] bundles the state every Kvik node type shares: the node
//! configuration, the message ID generator and the replay-protection
//! validators built on [`MsgIdCache`]. Node types (the client here, gateway
//! and relay elsewhere) embed it by composition.

use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::local_addr::LocalAddr;
use crate::msg_id_cache::MsgIdCache;
use crate::time;

pub struct NodeCore {
    conf: NodeConfig,
    /// Next message ID. Seeded randomly per instance so IDs don't restart
    /// from the same point after every reboot.
    msg_id: AtomicU16,
    msg_id_cache: MsgIdCache,
}

impl NodeCore {
    /// Fails with [`Error::InvalidArg`] when `msg_id_cache.max_age` is zero.
    /// Spawns the cache's eviction timer, so a tokio runtime must be
    /// current.
    pub fn new(conf: NodeConfig) -> Result<Self> {
        if conf.msg_id_cache.max_age == 0 {
            return Err(Error::InvalidArg);
        }

        let msg_id_cache = MsgIdCache::new(conf.msg_id_cache.time_unit, conf.msg_id_cache.max_age);

        Ok(Self {
            conf,
            msg_id: AtomicU16::new(rand::random()),
            msg_id_cache,
        })
    }

    pub fn conf(&self) -> &NodeConfig {
        &self.conf
    }

    /// Returns the current message ID and post-increments (wrapping).
    pub fn next_msg_id(&self) -> u16 {
        self.msg_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Records `(addr, id)` in the cache; `false` means a duplicate within
    /// the replay-protection window.
    pub fn validate_msg_id(&self, addr: &LocalAddr, id: u16) -> bool {
        self.msg_id_cache.insert(addr, id)
    }

    /// Checks a received timestamp against the accepted drift window.
    ///
    /// `ts` is accepted iff it lies in `[now - (max_age - 1), now]` where
    /// `now` is the current unit timestamp under `ts_diff_ms`. The window is
    /// modular: when its start would underflow the `u16` range, both the
    /// window and `ts` are shifted by `max_age` before comparing.
    pub fn validate_msg_timestamp(&self, ts: u16, ts_diff_ms: i64) -> bool {
        let max_age = self.conf.msg_id_cache.max_age as u16;
        let drift = max_age - 1;

        let mut now_units = time::unit_timestamp(ts_diff_ms, self.conf.msg_id_cache.time_unit);
        let mut ts = ts;
        if now_units < drift {
            now_units = now_units.wrapping_add(max_age);
            ts = ts.wrapping_add(max_age);
        }

        ts <= now_units && ts >= now_units - drift
    }

    /// Topic on which the RSSI towards `addr` is reported:
    /// `{base_topic}/{rssi_subtopic}/{addr}`.
    pub fn build_report_rssi_topic(&self, addr: &LocalAddr) -> String {
        let sep = &self.conf.topic_sep.level_separator;
        format!(
            "{}{sep}{}{sep}{}",
            self.conf.reporting.base_topic, self.conf.reporting.rssi_subtopic, addr
        )
    }

    /// The configured replay-protection time unit.
    pub fn time_unit(&self) -> Duration {
        self.conf.msg_id_cache.time_unit
    }
}
