//! Rust library for diagnosing and controlling Sonance MK3 DSP networked amplifiers
//!
//! MK3 amplifiers (DSP 2-150 / 2-750 / 8-130 MKIII) expose a binary control
//! protocol on TCP port 52000. Every command starts with the header bytes
//! `FF 55`; responses are either raw status bytes or legacy `Cmd:`-tagged
//! text lines depending on the firmware revision. This library provides:
//!
//! - Building the full command set (power, volume, mute, source, per-group
//!   and per-channel queries) as immutable wire-format values
//! - Decoding responses, including the reverse-engineered fault and
//!   thermal bitfields, without ever discarding raw bytes
//! - A TCP session with explicit connect/disconnect, bounded reads, and
//!   per-command round-trip latency measurement
//! - Reliability testing: command bursts with reconnect-on-drop, and an
//!   adaptive search for the minimum safe inter-command delay
//! - A full-status diagnostic that assembles one serializable
//!   [`DeviceStatus`] snapshot with an aggregated fault summary
//!
//! # Quick Start
//!
//! ```no_run
//! use sonance_mk3::{DiagnosticRunner, Mk3Config};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Mk3Config::default();
//!     let runner = DiagnosticRunner::from_config(&config);
//!     let cancel = CancellationToken::new();
//!
//!     let status = runner
//!         .run_full_diagnostic("192.168.1.50", config.control_port, config.group_count, &cancel)
//!         .await;
//!
//!     if status.has_any_fault {
//!         for fault in &status.fault_summary {
//!             eprintln!("{fault}");
//!         }
//!     }
//! }
//! ```
//!
//! # Sending individual commands
//!
//! ```no_run
//! use sonance_mk3::{Command, GroupIndex, Session, SessionSettings};
//!
//! #[tokio::main]
//! async fn main() -> sonance_mk3::Result<()> {
//!     let mut session = Session::new(SessionSettings::default());
//!     session.connect("192.168.1.50:52000").await?;
//!
//!     let group = GroupIndex::new(0)?;
//!     let response = session.send(&Command::group_volume_set(group, -30)).await?;
//!     println!("answered in {:.1} ms", response.latency_ms);
//!
//!     session.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Commands**: wire-format command construction and the volume codec
//! - **Protocol**: response sniffing, text parsing, fault bitfield decode
//! - **Session**: one TCP connection, one command in flight at a time
//! - **Reliability**: burst tests and minimum-delay search on top of Session
//! - **Diagnostics**: the fixed query battery and fault aggregation
//!
//! A `Session` is not meant to be shared across tasks; run one session per
//! logical operation. The amplifier's own command queue is the contended
//! resource, which is exactly what the reliability harness measures.

mod commands;
mod config;
mod diagnostics;
mod error;
mod protocol;
mod reliability;
mod session;
mod types;

// Public exports
pub use commands::{
    byte_to_volume, is_volume_byte, opcode, volume_to_byte, ChannelIndex, Command, GroupIndex,
    DEFAULT_PORT, HEADER,
};
pub use config::Mk3Config;
pub use diagnostics::DiagnosticRunner;
pub use error::{Mk3Error, Result};
pub use protocol::{decode, hex_string, GlobalFault, GroupFault, Payload, ThermalState};
pub use reliability::ReliabilityTester;
pub use session::{CommandResponse, SendFailure, Session, SessionSettings};
pub use types::{
    BurstTestResult, ChannelStatus, DelaySearchResult, DelayTrial, DeviceStatus, GroupStatus,
    Mk3Model, PowerStatus, ThermalStatus,
};
