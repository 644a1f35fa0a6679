//! Connection-quality bookkeeping attached to each known peer.

use serde::{Deserialize, Serialize};

/// Coarse quality grade of a peer session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionGrade {
    Unspecified,
    Low,
    Middle,
    High,
}

impl Default for SessionGrade {
    fn default() -> Self {
        SessionGrade::Unspecified
    }
}

/// Health/latency state of one peer connection, maintained by the transport
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    pub grade: SessionGrade,
    /// Round-trip time in milliseconds
    pub ping: u32,
    /// 0.0 (dead) ..= 1.0 (healthy)
    pub health: f64,
    /// Estimated throughput, transport-defined units
    pub speed: f64,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_default() {
        let state = SessionState::default();
        assert_eq!(state.grade, SessionGrade::Unspecified);
        assert_eq!(state.ping, 0);
    }
}
