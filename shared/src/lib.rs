//! ofconn Shared Protocol Types
//!
//! This crate provides the header layout, framing codec and version
//! bookkeeping shared by every transport binding.

pub mod codec;
pub mod state_machine;

pub use codec::{CodecError, DatagramCheck, FrameDecoder, OfpHeader};
pub use state_machine::{ConnEvent, ConnState, ConnStateMachine, Transition};

/// Size of the fixed OpenFlow header in bytes
pub const OFP_HEADER_LEN: usize = 8;

/// Largest message the 16-bit length field can describe
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

/// IANA-assigned OpenFlow port, used when a target omits its port
pub const OFP_PORT: u16 = 6653;

/// Wire protocol versions
pub mod version {
    pub const OFP10: u8 = 0x01;
    pub const OFP11: u8 = 0x02;
    pub const OFP12: u8 = 0x03;
    pub const OFP13: u8 = 0x04;
    pub const OFP14: u8 = 0x05;
    pub const OFP15: u8 = 0x06;
}

/// Message types the transport layer itself needs to recognize
pub mod msg_type {
    pub const HELLO: u8 = 0;
    pub const ERROR: u8 = 1;
    pub const ECHO_REQUEST: u8 = 2;
    pub const ECHO_REPLY: u8 = 3;
}

/// Liveness defaults for connection managers
pub mod probe {
    /// Idle time before an echo request is sent
    pub const PROBE_INTERVAL_MS: u64 = 5000;

    /// Time without any inbound traffic before the connection is dropped
    pub const INACTIVITY_TIMEOUT_MS: u64 = 15000;

    /// First reconnect delay
    pub const RECONNECT_DELAY_MS: u64 = 1000;

    /// Upper bound for exponential reconnect backoff
    pub const MAX_RECONNECT_DELAY_MS: u64 = 30000;
}

/// Set of protocol versions a connection may negotiate.
///
/// Bit `n` set means wire version `n` is allowed. The transport layer only
/// stores this; negotiation happens above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VersionBitmap(pub u32);

impl VersionBitmap {
    /// Every version from 1.0 through 1.5
    pub const ALL: VersionBitmap = VersionBitmap(0b111_1110);

    /// Build a bitmap from a list of wire versions, ignoring values above 31
    pub fn from_versions(versions: &[u8]) -> Self {
        let bits = versions
            .iter()
            .filter(|v| **v < 32)
            .fold(0u32, |acc, v| acc | (1 << v));
        Self(bits)
    }

    pub fn contains(&self, version: u8) -> bool {
        version < 32 && self.0 & (1 << version) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Highest allowed version
    pub fn highest(&self) -> Option<u8> {
        self.highest_common(*self)
    }

    /// Highest version present in both bitmaps
    pub fn highest_common(&self, other: VersionBitmap) -> Option<u8> {
        let common = self.0 & other.0;
        if common == 0 {
            None
        } else {
            Some(31 - common.leading_zeros() as u8)
        }
    }
}

impl std::fmt::Display for VersionBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for v in 0..32u8 {
            if self.contains(v) {
                if !first {
                    write!(f, ",")?;
                }
                write!(f, "0x{:02x}", v)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitmap_from_versions() {
        let bitmap = VersionBitmap::from_versions(&[version::OFP10, version::OFP13]);
        assert!(bitmap.contains(version::OFP10));
        assert!(bitmap.contains(version::OFP13));
        assert!(!bitmap.contains(version::OFP14));
        assert!(!bitmap.contains(40));
    }

    #[test]
    fn test_highest_common_version() {
        let ours = VersionBitmap::from_versions(&[version::OFP10, version::OFP13, version::OFP14]);
        let theirs = VersionBitmap::from_versions(&[version::OFP10, version::OFP13]);
        assert_eq!(ours.highest_common(theirs), Some(version::OFP13));

        let disjoint = VersionBitmap::from_versions(&[version::OFP15]);
        assert_eq!(theirs.highest_common(disjoint), None);
    }

    #[test]
    fn test_all_versions() {
        for v in version::OFP10..=version::OFP15 {
            assert!(VersionBitmap::ALL.contains(v));
        }
        assert!(!VersionBitmap::ALL.contains(0));
        assert_eq!(VersionBitmap::ALL.highest(), Some(version::OFP15));
        assert_eq!(VersionBitmap::default().highest(), None);
        assert_eq!(VersionBitmap::ALL.to_string(), "0x01,0x02,0x03,0x04,0x05,0x06");
    }
}
