//! Node and client configuration.
//!
//! All tunables are plain structs with `Default` impls carrying the
//! recommended values. Construct with struct-update syntax:
//!
//! ```
//! use std::time::Duration;
//! use kvik::config::{ClientConfig, GatewayDiscovery};
//!
//! let conf = ClientConfig {
//!     gw_dscv: GatewayDiscovery {
//!         dscv_min_delay: Duration::from_millis(100),
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//! # let _ = conf;
//! ```

use std::time::Duration;

/// Generic message delivery tunables.
#[derive(Clone, Debug)]
pub struct LocalDelivery {
    /// Response timeout for `PROBE_RES`, `OK` and `FAIL` responses.
    pub resp_timeout: Duration,
}

impl Default for LocalDelivery {
    fn default() -> Self {
        Self {
            resp_timeout: Duration::from_millis(500),
        }
    }
}

/// Message ID cache and replay-protection tunables.
#[derive(Clone, Debug)]
pub struct MsgIdCacheConfig {
    /// Eviction check interval of the message ID cache.
    ///
    /// Must be low enough to keep the cache small and high enough that
    /// ordinary clock drift plus transmission delay doesn't produce false
    /// duplicates.
    ///
    /// This is also the unit of the on-wire replay-protection timestamps,
    /// so it has to be the SAME VALUE on all communicating nodes.
    pub time_unit: Duration,

    /// Maximum cache entry age as a multiple of `time_unit`. Must be >= 1.
    ///
    /// Each cache entry lives between `max_age * time_unit` and
    /// `(max_age + 1) * time_unit`; `(max_age - 1) * time_unit` is the
    /// maximum accepted time drift of a received message. With the defaults
    /// an entry lives 1.5-2 s and up to 1 s of drift is tolerated.
    pub max_age: u8,
}

impl Default for MsgIdCacheConfig {
    fn default() -> Self {
        Self {
            time_unit: Duration::from_millis(500),
            max_age: 3,
        }
    }
}

/// Topics used for node self-reporting.
#[derive(Clone, Debug)]
pub struct Reporting {
    /// Base topic for reporting purposes.
    pub base_topic: String,
    /// Subtopic for RSSI reporting.
    pub rssi_subtopic: String,
}

impl Default for Reporting {
    fn default() -> Self {
        Self {
            base_topic: "_report".to_string(),
            rssi_subtopic: "rssi".to_string(),
        }
    }
}

/// Topic level separator and wildcard tokens.
///
/// The three tokens must be non-empty and pairwise distinct; node
/// construction fails otherwise.
#[derive(Clone, Debug)]
pub struct TopicSeparators {
    /// Separator between topic levels.
    pub level_separator: String,
    /// Single-level wildcard token.
    pub single_level_wildcard: String,
    /// Multi-level wildcard token.
    pub multi_level_wildcard: String,
}

impl Default for TopicSeparators {
    fn default() -> Self {
        Self {
            level_separator: "/".to_string(),
            single_level_wildcard: "+".to_string(),
            multi_level_wildcard: "#".to_string(),
        }
    }
}

/// Generic configuration for any node type.
#[derive(Clone, Debug, Default)]
pub struct NodeConfig {
    pub local_delivery: LocalDelivery,
    pub msg_id_cache: MsgIdCacheConfig,
    pub reporting: Reporting,
    pub topic_sep: TopicSeparators,
}

/// Gateway discovery tunables.
#[derive(Clone, Debug)]
pub struct GatewayDiscovery {
    /// Cooldown after the first failed discovery attempt.
    ///
    /// The actual delay starts here and doubles after each further failure
    /// until capped at `dscv_max_delay`. Successful discovery resets it.
    pub dscv_min_delay: Duration,

    /// Cap for the discovery backoff delay.
    pub dscv_max_delay: Duration,

    /// Give up initial discovery after this many failed attempts.
    ///
    /// Value 0 means retry indefinitely.
    pub initial_dscv_fail_thres: u16,

    /// Trigger background rediscovery after this many failed or unanswered
    /// unicast messages in a row. Values 0 and 1 are equivalent (no loss is
    /// permitted).
    pub trig_msgs_fail_cnt: u16,

    /// Trigger background rediscovery after this many unanswered time-sync
    /// probes in a row. Values 0 and 1 are equivalent.
    pub trig_time_sync_no_resp_cnt: u16,
}

impl Default for GatewayDiscovery {
    fn default() -> Self {
        Self {
            dscv_min_delay: Duration::from_secs(1),
            dscv_max_delay: Duration::from_secs(120),
            initial_dscv_fail_thres: 5,
            trig_msgs_fail_cnt: 5,
            trig_time_sync_no_resp_cnt: 2,
        }
    }
}

/// Client-side reporting switches.
#[derive(Clone, Debug)]
pub struct ClientReporting {
    /// Report the RSSI of every probe response received during gateway
    /// discovery, i.e. the client's signal strength towards all reachable
    /// gateways. A single publication message carries all reports.
    pub rssi_on_gw_dscv: bool,
}

impl Default for ClientReporting {
    fn default() -> Self {
        Self {
            rssi_on_gw_dscv: true,
        }
    }
}

/// Subscription database tunables.
#[derive(Clone, Debug)]
pub struct SubDb {
    /// Client-side subscription lifetime; subscriptions are renewed with
    /// the gateway on this period. The gateway's own lifetime must be
    /// longer (its default is 15 minutes).
    pub sub_lifetime: Duration,
}

impl Default for SubDb {
    fn default() -> Self {
        Self {
            sub_lifetime: Duration::from_secs(600),
        }
    }
}

/// Time synchronization tunables.
#[derive(Clone, Debug)]
pub struct TimeSync {
    /// Write the gateway-synchronized time into the system clock after each
    /// successful sync. Useful on bare IoT devices; on hosts where NTP
    /// already manages the clock leave this off — the synchronized time is
    /// then only used internally for message validation.
    pub sync_system_time: bool,

    /// How often to reprobe the gateway to keep `tsDiff` fresh, which the
    /// replay protection depends on. Zero disables the periodic sync; call
    /// [`crate::Client::sync_time`] yourself (safe for devices that
    /// fully re-initialize after periodic deep sleep).
    pub reprobe_gateway_interval: Duration,
}

impl Default for TimeSync {
    fn default() -> Self {
        Self {
            sync_system_time: false,
            reprobe_gateway_interval: Duration::from_secs(3600),
        }
    }
}

/// Client node configuration.
#[derive(Clone, Debug, Default)]
pub struct ClientConfig {
    pub node: NodeConfig,
    pub gw_dscv: GatewayDiscovery,
    pub reporting: ClientReporting,
    pub sub_db: SubDb,
    pub time_sync: TimeSync,
}
