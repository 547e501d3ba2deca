//! Protocol versioning for outbound envelopes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Version stamped on every outbound envelope.
///
/// `major.minor`: a major bump breaks subscribers, a minor bump only adds
/// fields they may ignore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    /// Current protocol version.
    pub const CURRENT: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_version_on_the_wire() {
        assert_eq!(ProtocolVersion::default().to_string(), "1.0");
        let json = serde_json::to_string(&ProtocolVersion::CURRENT).unwrap();
        assert_eq!(json, r#"{"major":1,"minor":0}"#);
    }
}
