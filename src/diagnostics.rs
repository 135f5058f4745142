use crate::commands::{ChannelIndex, Command, GroupIndex};
use crate::error::Result;
use crate::protocol::{self, GlobalFault, GroupFault, ThermalState};
use crate::session::{CommandResponse, Session, SessionSettings};
use crate::types::{ChannelStatus, DeviceStatus, GroupStatus, PowerStatus, ThermalStatus};
use tokio_util::sync::CancellationToken;

/// Full-status diagnostic orchestrator
///
/// Sequences the fixed battery of MK3 status queries over one persistent
/// session and assembles the answers into a single [`DeviceStatus`]
/// snapshot with an aggregated fault summary. The snapshot is a pure
/// function of the raw response map, so it can be replayed offline.
pub struct DiagnosticRunner {
    settings: SessionSettings,
}

impl DiagnosticRunner {
    pub fn new(settings: SessionSettings) -> Self {
        Self { settings }
    }

    /// Build a runner from the shared tunables
    pub fn from_config(config: &crate::config::Mk3Config) -> Self {
        Self::new(config.session_settings())
    }

    /// Query everything the device can report
    ///
    /// Starts with a timed connectivity probe; if that fails the snapshot
    /// comes back immediately with `is_reachable = false` and no queries
    /// attempted. Otherwise one session carries the whole battery: power,
    /// global fault, thermal (an unanswered thermal query is reported as
    /// unsupported firmware, not an error), then volume/mute/source/fault
    /// per group and short/overtemp/DSP-preset per channel. Every raw
    /// response is retained keyed by query name. Cancellation between
    /// queries returns the partial snapshot.
    pub async fn run_full_diagnostic(
        &self,
        host: &str,
        port: u16,
        group_count: usize,
        cancel: &CancellationToken,
    ) -> DeviceStatus {
        let target = format!("{host}:{port}");
        let mut status = DeviceStatus::new(host, port);

        tracing::info!(target = %target, group_count, "running full diagnostic");

        // Connectivity probe: connect + disconnect, timed. A dead control
        // port short-circuits the whole battery.
        let mut session = Session::new(self.settings.clone());
        match session.connect(&target).await {
            Ok(latency) => {
                status.is_reachable = true;
                status
                    .response_times
                    .insert("connectivity".to_string(), latency);
                session.disconnect().await;
            }
            Err(e) => {
                tracing::warn!(target = %target, error = %e, "control port not reachable");
                status.errors.push(format!("connection failed: {e}"));
                return status;
            }
        }

        if let Err(e) = self
            .run_battery(&mut session, &target, group_count, cancel, &mut status)
            .await
        {
            tracing::warn!(target = %target, error = %e, "diagnostic aborted");
            status.errors.push(format!("diagnostic aborted: {e}"));
        }
        session.disconnect().await;

        if status.has_any_fault {
            tracing::warn!(target = %target, faults = ?status.fault_summary, "faults detected");
        } else {
            tracing::info!(target = %target, "no faults detected");
        }

        status
    }

    /// The query battery proper; bails out only when the session cannot be
    /// re-established
    async fn run_battery(
        &self,
        session: &mut Session,
        target: &str,
        group_count: usize,
        cancel: &CancellationToken,
        status: &mut DeviceStatus,
    ) -> Result<()> {
        session.connect(target).await?;

        if cancel.is_cancelled() {
            return Ok(());
        }

        // Power
        let resp = self.run_query(session, target, &Command::power_query()).await?;
        status
            .response_times
            .insert("power".to_string(), resp.latency_ms);
        if resp.success {
            status
                .raw_responses
                .insert("power".to_string(), resp.raw.clone());
            status.power = protocol::parse_power(&resp.raw).map(|is_on| PowerStatus { is_on });
        } else if let Some(text) = resp.error_text() {
            status.errors.push(format!("power query failed: {text}"));
        }

        // Global fault bits
        let resp = self
            .run_query(session, target, &Command::query_global_protect())
            .await?;
        status
            .response_times
            .insert("global_protect".to_string(), resp.latency_ms);
        if resp.success && !resp.raw.is_empty() {
            status
                .raw_responses
                .insert("global_protect".to_string(), resp.raw.clone());
            let fault = GlobalFault::decode(resp.raw[0]);
            if fault.has_any_fault {
                status.has_any_fault = true;
                if fault.protection_active {
                    status
                        .fault_summary
                        .push("PROTECTION ACTIVE - amplifier in protection mode".to_string());
                }
                if fault.thermal_warning {
                    status
                        .fault_summary
                        .push("THERMAL WARNING - amplifier is overheating".to_string());
                }
                if fault.power_supply_fault {
                    status
                        .fault_summary
                        .push("POWER SUPPLY FAULT - PSU issue detected".to_string());
                }
                if fault.amplifier_fault {
                    status
                        .fault_summary
                        .push("AMPLIFIER FAULT - generic amp fault".to_string());
                }
            }
            status.global_fault = Some(fault);
        } else if let Some(text) = resp.error_text() {
            status
                .errors
                .push(format!("global protect query failed: {text}"));
        }

        // Thermal state; absent on some firmware, which is a capability
        // gap rather than a failure.
        let resp = self
            .run_query(session, target, &Command::query_thermal_state())
            .await?;
        status
            .response_times
            .insert("thermal".to_string(), resp.latency_ms);
        if resp.success && !resp.raw.is_empty() {
            status
                .raw_responses
                .insert("thermal".to_string(), resp.raw.clone());
            let state = ThermalState::decode(resp.raw[0]);
            let thermal = ThermalStatus::from_state(state);
            if thermal.is_critical {
                status.record_fault(format!("THERMAL CRITICAL - {}", thermal.state_name));
            } else if thermal.is_warning {
                status
                    .fault_summary
                    .push(format!("THERMAL WARNING - {}", thermal.state_name));
            }
            status.thermal = Some(thermal);
        } else {
            status.thermal = Some(ThermalStatus::unsupported());
        }

        // Per-group volume, mute, source, protect
        for group in GroupIndex::first(group_count) {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let group_status = self.query_group(session, target, group, status).await?;
            if let Some(fault) = &group_status.fault {
                if fault.has_any_fault {
                    status.record_fault(format!(
                        "GROUP {} FAULT: {}",
                        group_status.name,
                        fault.cause_tags().join(", ")
                    ));
                }
            }
            status.groups.push(group_status);
        }

        // Per-channel protection and DSP preset; one leg per group.
        for channel in ChannelIndex::first(group_count) {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let channel_status = self.query_channel(session, target, channel, status).await?;
            if channel_status.has_short {
                status.record_fault(format!(
                    "CHANNEL {} FAULT: short circuit",
                    channel_status.name
                ));
            }
            if channel_status.has_overtemp {
                status.record_fault(format!(
                    "CHANNEL {} FAULT: over-temperature",
                    channel_status.name
                ));
            }
            status.channels.push(channel_status);
        }

        Ok(())
    }

    async fn query_group(
        &self,
        session: &mut Session,
        target: &str,
        group: GroupIndex,
        status: &mut DeviceStatus,
    ) -> Result<GroupStatus> {
        let mut g = GroupStatus::new(group.value(), group.name());

        let resp = self
            .run_query(session, target, &Command::query_group_volume(group))
            .await?;
        if resp.success {
            g.volume = protocol::parse_group_volume(&resp.raw);
            g.raw_volume = Some(resp.raw.clone());
            status
                .raw_responses
                .insert(format!("group_{}_volume", g.name), resp.raw);
        }

        let resp = self
            .run_query(session, target, &Command::query_group_mute(group))
            .await?;
        if resp.success {
            g.mute = protocol::parse_group_mute(&resp.raw);
            g.raw_mute = Some(resp.raw.clone());
            status
                .raw_responses
                .insert(format!("group_{}_mute", g.name), resp.raw);
        }

        let resp = self
            .run_query(session, target, &Command::query_group_source(group))
            .await?;
        if resp.success {
            g.source = protocol::parse_group_source(&resp.raw);
            g.raw_source = Some(resp.raw.clone());
            status
                .raw_responses
                .insert(format!("group_{}_source", g.name), resp.raw);
        }

        let resp = self
            .run_query(session, target, &Command::query_group_protect(group))
            .await?;
        if resp.success && !resp.raw.is_empty() {
            g.fault = Some(GroupFault::decode(resp.raw[0]));
            g.raw_protect = Some(resp.raw.clone());
            status
                .raw_responses
                .insert(format!("group_{}_protect", g.name), resp.raw);
        }

        tracing::debug!(
            group = %g.name,
            volume = ?g.volume,
            mute = ?g.mute,
            source = ?g.source,
            fault = g.fault.as_ref().is_some_and(|f| f.has_any_fault),
            "group status"
        );
        Ok(g)
    }

    async fn query_channel(
        &self,
        session: &mut Session,
        target: &str,
        channel: ChannelIndex,
        status: &mut DeviceStatus,
    ) -> Result<ChannelStatus> {
        let mut ch = ChannelStatus::new(channel.value(), channel.name());

        let resp = self
            .run_query(session, target, &Command::query_channel_short_protect(channel))
            .await?;
        if resp.success {
            let (has_short, text) = protocol::parse_short_protect(&resp.raw);
            ch.has_short = has_short;
            ch.short_status = text;
            ch.raw_short_protect = Some(resp.raw.clone());
            status
                .raw_responses
                .insert(format!("channel_{}_short", ch.name), resp.raw);
        }

        let resp = self
            .run_query(session, target, &Command::query_channel_overtemp(channel))
            .await?;
        if resp.success {
            let (has_overtemp, text) = protocol::parse_overtemp(&resp.raw);
            ch.has_overtemp = has_overtemp;
            ch.overtemp_status = text;
            ch.raw_overtemp = Some(resp.raw.clone());
            status
                .raw_responses
                .insert(format!("channel_{}_overtemp", ch.name), resp.raw);
        }

        let resp = self
            .run_query(session, target, &Command::query_channel_dsp_preset(channel))
            .await?;
        if resp.success {
            ch.dsp_preset = protocol::parse_dsp_preset(&resp.raw);
            ch.raw_dsp_preset = Some(resp.raw.clone());
            status
                .raw_responses
                .insert(format!("channel_{}_dsp_preset", ch.name), resp.raw);
        }

        tracing::debug!(
            channel = %ch.name,
            short = %ch.short_status,
            overtemp = %ch.overtemp_status,
            dsp = ?ch.dsp_preset,
            "channel status"
        );
        Ok(ch)
    }

    /// One query round trip, re-establishing the session first if a prior
    /// failure dropped it; an unrecoverable reconnect aborts the battery
    async fn run_query(
        &self,
        session: &mut Session,
        target: &str,
        command: &Command,
    ) -> Result<CommandResponse> {
        if !session.is_connected() {
            tracing::debug!(target = %target, "session dropped, reconnecting");
            session.connect(target).await?;
        }
        session.send(command).await
    }
}
