//! Local layer address container.

use serde::{Deserialize, Serialize};

/// Opaque local layer peer address.
///
/// The internal byte representation is decisive: two addresses are equal iff
/// their bytes are equal. The string form (also used when talking to remote
/// layer protocols like MQTT) is a lowercase hex dump without delimiters.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalAddr(pub Vec<u8>);

impl LocalAddr {
    /// Address built from a 6-byte MAC, the common case for RF layers.
    pub fn from_mac(mac: [u8; 6]) -> Self {
        Self(mac.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// An empty address denotes broadcast (or "no peer").
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for LocalAddr {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for LocalAddr {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl std::fmt::Display for LocalAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

// Debug forwards to the hex form; addresses appear in nearly every log line
// and the derived byte-list form is too noisy.
impl std::fmt::Debug for LocalAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_string_form() {
        let addr = LocalAddr(vec![0x00, 0x1a, 0xff]);
        assert_eq!(addr.to_string(), "001aff");
    }

    #[test]
    fn empty_address() {
        assert!(LocalAddr::default().is_empty());
        assert_eq!(LocalAddr::default().to_string(), "");
        assert!(!LocalAddr(vec![1]).is_empty());
    }

    #[test]
    fn equality_is_byte_exact() {
        assert_eq!(LocalAddr(vec![1, 2]), LocalAddr(vec![1, 2]));
        assert_ne!(LocalAddr(vec![1, 2]), LocalAddr(vec![1, 2, 0]));
    }

    #[test]
    fn from_mac() {
        let addr = LocalAddr::from_mac([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);
        assert_eq!(addr.to_string(), "deadbeef0001");
    }
}
