use crate::session::SessionSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for diagnostics and reliability testing
///
/// The defaults match a DSP8-130 on a healthy LAN. All timeouts are in
/// milliseconds so the struct stays flat for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Mk3Config {
    /// TCP port of the binary control protocol
    pub control_port: u16,
    /// Deadline for the TCP handshake
    pub connect_timeout_ms: u64,
    /// Deadline for each response read
    pub read_timeout_ms: u64,
    /// Output groups to walk in a diagnostic battery (8 on DSP8-130, 2 on
    /// DSP2 models)
    pub group_count: usize,
    /// Commands per burst test
    pub burst_count: usize,
    /// Candidate inter-command delays for the minimum-delay search
    pub candidate_delays_ms: Vec<u64>,
    /// Error rate a delay candidate may not exceed to pass
    pub max_acceptable_error_rate: f64,
}

impl Default for Mk3Config {
    fn default() -> Self {
        Self {
            control_port: crate::commands::DEFAULT_PORT,
            connect_timeout_ms: 5_000,
            read_timeout_ms: 2_000,
            group_count: 8,
            burst_count: 10,
            candidate_delays_ms: vec![0, 10, 25, 50, 100, 250, 500],
            max_acceptable_error_rate: 5.0,
        }
    }
}

impl Mk3Config {
    /// Session settings derived from the configured timeouts
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            ..SessionSettings::default()
        }
    }
}
