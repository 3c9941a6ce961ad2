//! Local layer peer info.

use serde::{Deserialize, Serialize};

use crate::local_addr::LocalAddr;

/// "Unknown" marker for preference and RSSI values.
pub const PEER_PREF_UNKNOWN: i16 = i16::MIN;

/// Maximum address length a retained peer can carry.
pub const RETAINED_ADDR_MAX_LEN: usize = 32;

/// Local layer peer info.
///
/// Equality considers the address only; channel, preference, RSSI and time
/// difference are additional data riding along.
#[derive(Clone, Debug)]
pub struct LocalPeer {
    /// Peer address.
    pub addr: LocalAddr,
    /// Wireless channel (only meaningful for channel-hopping local layers).
    pub channel: u16,
    /// Peer preference (gateway selection weight, higher is better).
    /// Local layer specific, not comparable between different local layers.
    pub pref: i16,
    /// RSSI of the last probe response, [`PEER_PREF_UNKNOWN`] if not known.
    pub rssi: i16,
    /// Signed offset from the local steady clock to the peer's clock, in
    /// milliseconds. Established by time synchronization.
    pub ts_diff_ms: i64,
}

impl Default for LocalPeer {
    fn default() -> Self {
        Self {
            addr: LocalAddr::default(),
            channel: 0,
            pref: PEER_PREF_UNKNOWN,
            rssi: PEER_PREF_UNKNOWN,
            ts_diff_ms: 0,
        }
    }
}

impl PartialEq for LocalPeer {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for LocalPeer {}

impl LocalPeer {
    /// A peer is empty iff its address is empty.
    pub fn is_empty(&self) -> bool {
        self.addr.is_empty()
    }

    /// Fixed-size snapshot of this peer for deep-sleep retention.
    ///
    /// Addresses longer than [`RETAINED_ADDR_MAX_LEN`] bytes are truncated.
    pub fn retain(&self) -> RetainedLocalPeer {
        let mut retained = RetainedLocalPeer::default();
        let len = self.addr.as_bytes().len().min(RETAINED_ADDR_MAX_LEN);
        retained.addr[..len].copy_from_slice(&self.addr.as_bytes()[..len]);
        retained.addr_len = len as u8;
        retained.channel = self.channel;
        retained
    }
}

impl std::fmt::Display for LocalPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.addr)?;
        if self.channel != 0 {
            write!(f, " (channel {})", self.channel)?;
        }
        if self.pref != PEER_PREF_UNKNOWN {
            write!(f, " (pref {})", self.pref)?;
        }
        Ok(())
    }
}

/// Retained local layer peer info.
///
/// A [`LocalPeer`] without any heap allocation, intended for RTC memory of
/// IoT microcontrollers across deep sleep. Not used for anything else.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetainedLocalPeer {
    pub addr: [u8; RETAINED_ADDR_MAX_LEN],
    pub addr_len: u8,
    pub channel: u16,
}

impl Default for RetainedLocalPeer {
    fn default() -> Self {
        Self {
            addr: [0; RETAINED_ADDR_MAX_LEN],
            addr_len: 0,
            channel: 0,
        }
    }
}

impl RetainedLocalPeer {
    /// Restores the full peer representation. Preference, RSSI and time
    /// difference are not retained and come back as unknown/zero.
    pub fn unretain(&self) -> LocalPeer {
        let len = (self.addr_len as usize).min(RETAINED_ADDR_MAX_LEN);
        LocalPeer {
            addr: LocalAddr(self.addr[..len].to_vec()),
            channel: self.channel,
            ..Default::default()
        }
    }
}
