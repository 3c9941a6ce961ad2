//! Local message representation.
//!
//! [`LocalMsg`] is the record exchanged between the client and its local
//! layer. Its on-wire framing is the layer's concern; this module only
//! defines the structure and the equality/display semantics used throughout
//! the crate.

use serde::{Deserialize, Serialize};

use crate::local_addr::LocalAddr;
use crate::pub_sub::{PubData, SubData};

/// RSSI "unknown" value.
pub const MSG_RSSI_UNKNOWN: i16 = i16::MIN;

/// Local message types.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalMsgType {
    #[default]
    None,
    Ok,
    Fail,
    ProbeReq,
    ProbeRes,
    PubSubUnsub,
    SubData,
}

impl LocalMsgType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalMsgType::None => "NONE",
            LocalMsgType::Ok => "OK",
            LocalMsgType::Fail => "FAIL",
            LocalMsgType::ProbeReq => "PROBE_REQ",
            LocalMsgType::ProbeRes => "PROBE_RES",
            LocalMsgType::PubSubUnsub => "PUB_SUB_UNSUB",
            LocalMsgType::SubData => "SUB_DATA",
        }
    }
}

impl std::fmt::Display for LocalMsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node types.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    #[default]
    Unknown,
    Client,
    Gateway,
    Relay,
}

/// `FAIL` message reason.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalMsgFailReason {
    /// No/unknown failure.
    #[default]
    None,
    /// Duplicate message ID. Not sent in `FAIL` messages (an attacker could
    /// DoS the node just by replaying in a loop), reported locally only.
    DupId,
    /// Invalid timestamp. Not sent in `FAIL` messages for the same reason.
    InvalidTs,
    /// Processing failed, e.g. transmission over the remote layer or
    /// relaying.
    ProcessingFailed,
    /// Unknown message sender.
    UnknownSender,
}

impl LocalMsgFailReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalMsgFailReason::None => "NONE",
            LocalMsgFailReason::DupId => "DUP_ID",
            LocalMsgFailReason::InvalidTs => "INVALID_TS",
            LocalMsgFailReason::ProcessingFailed => "PROCESSING_FAILED",
            LocalMsgFailReason::UnknownSender => "UNKNOWN_SENDER",
        }
    }
}

impl std::fmt::Display for LocalMsgFailReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local message.
///
/// Equality compares the message intent only: type, addresses and payload
/// collections. Per-send metadata (`id`, `ts`, `req_id`, `fail_reason`,
/// `rssi`, `pref`, `ts_diff_ms`) is deliberately excluded so two sends of
/// the same logical message compare equal.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LocalMsg {
    /// Type of message.
    pub msg_type: LocalMsgType,
    /// Source address on receive, destination on send. Empty = broadcast.
    pub addr: LocalAddr,
    /// Address substituted by a relay hop, if any.
    pub relayed_addr: LocalAddr,
    /// Publications (`PUB_SUB_UNSUB` only).
    pub pubs: Vec<PubData>,
    /// Subscription topics (`PUB_SUB_UNSUB` only).
    pub subs: Vec<String>,
    /// Unsubscription topics (`PUB_SUB_UNSUB` only).
    pub unsubs: Vec<String>,
    /// Subscription data (`SUB_DATA` only).
    pub subs_data: Vec<SubData>,

    /// Message ID, sender-chosen, monotonically increasing from a random
    /// seed.
    pub id: u16,
    /// Timestamp in configured time units (wraps).
    pub ts: u16,
    /// ID of the corresponding request (`OK`, `FAIL`, `PROBE_RES` only).
    pub req_id: u16,
    /// Sending node's type.
    pub node_type: NodeType,
    /// Fail reason (`FAIL` only).
    pub fail_reason: LocalMsgFailReason,
    /// RSSI of the received message, [`MSG_RSSI_UNKNOWN`] when the layer
    /// doesn't measure it. On send, the RSSI of the corresponding received
    /// message so the layer can pick a data rate.
    pub rssi: i16,
    /// Peer preference for gateway selection (`PROBE_RES` only).
    pub pref: i16,
    /// Sender's clock minus local steady clock in milliseconds
    /// (`PROBE_RES` only).
    pub ts_diff_ms: i64,
}

impl LocalMsg {
    /// Request message of the given type, with metadata left for
    /// [`crate::Client`] to fill in before dispatch.
    pub fn new(msg_type: LocalMsgType) -> Self {
        Self {
            msg_type,
            rssi: MSG_RSSI_UNKNOWN,
            pref: i16::MIN,
            ..Default::default()
        }
    }
}

impl PartialEq for LocalMsg {
    fn eq(&self, other: &Self) -> bool {
        self.msg_type == other.msg_type
            && self.addr == other.addr
            && self.relayed_addr == other.relayed_addr
            && self.pubs == other.pubs
            && self.subs == other.subs
            && self.unsubs == other.unsubs
            && self.subs_data == other.subs_data
    }
}

impl Eq for LocalMsg {}

impl std::fmt::Display for LocalMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ", self.msg_type)?;
        if self.addr.is_empty() {
            write!(f, "(no addr)")?;
        } else {
            write!(f, "{}", self.addr)?;
        }
        if !self.relayed_addr.is_empty() {
            write!(f, " {}", self.relayed_addr)?;
        }

        match self.msg_type {
            LocalMsgType::Fail => write!(f, " | failed due to {}", self.fail_reason),
            LocalMsgType::ProbeRes => write!(f, " | pref {}", self.pref),
            LocalMsgType::PubSubUnsub => {
                let mut parts = Vec::new();
                for p in &self.pubs {
                    parts.push(format!("PUB {p}"));
                }
                for s in &self.subs {
                    parts.push(format!("SUB {s}"));
                }
                for u in &self.unsubs {
                    parts.push(format!("UNSUB {u}"));
                }
                write!(f, " | {}", parts.join(", "))
            }
            LocalMsgType::SubData => {
                let parts: Vec<String> =
                    self.subs_data.iter().map(|d| d.to_string()).collect();
                write!(f, " | {}", parts.join(", "))
            }
            _ => Ok(()),
        }
    }
}
