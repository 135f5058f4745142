use crate::protocol::{serialize_hex, GlobalFault, GroupFault, ThermalState};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// MK3 DSP amplifier models
///
/// The model decides how many output groups and physical channels a
/// diagnostic battery should walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mk3Model {
    /// 8 channels, 4 stereo pairs, groups A-H
    #[serde(rename = "DSP8-130")]
    Dsp8_130,
    /// 2 channels, 1 stereo pair, groups A-B
    #[serde(rename = "DSP2-150")]
    Dsp2_150,
    /// 2 channels, 1 stereo pair, groups A-B
    #[serde(rename = "DSP2-750")]
    Dsp2_750,
}

impl Mk3Model {
    /// Addressable output groups on this model
    pub fn group_count(&self) -> usize {
        match self {
            Self::Dsp8_130 => 8,
            Self::Dsp2_150 | Self::Dsp2_750 => 2,
        }
    }

    /// Physical output legs (two per group)
    pub fn channel_count(&self) -> usize {
        self.group_count()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Dsp8_130 => "DSP8-130",
            Self::Dsp2_150 => "DSP2-150",
            Self::Dsp2_750 => "DSP2-750",
        }
    }
}

fn serialize_opt_hex<S>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match bytes {
        Some(b) => serialize_hex(b, s),
        None => s.serialize_none(),
    }
}

fn serialize_hex_map<S>(map: &BTreeMap<String, Vec<u8>>, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.collect_map(map.iter().map(|(k, v)| (k, crate::protocol::hex_string(v))))
}

/// Power state reported by the amplifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PowerStatus {
    pub is_on: bool,
}

/// Thermal state reported by the amplifier
///
/// `query_supported` is false when the firmware did not answer the thermal
/// query at all; that is a capability gap, not a communication failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThermalStatus {
    pub state_code: u8,
    pub state_name: String,
    pub is_normal: bool,
    pub is_warning: bool,
    pub is_critical: bool,
    pub query_supported: bool,
}

impl ThermalStatus {
    /// Build from a decoded thermal state byte
    pub fn from_state(state: ThermalState) -> Self {
        Self {
            state_code: state.code(),
            state_name: state.name(),
            is_normal: state.is_normal(),
            is_warning: state.is_warning(),
            is_critical: state.is_critical(),
            query_supported: true,
        }
    }

    /// Build the marker value for firmware without the thermal query
    pub fn unsupported() -> Self {
        Self {
            state_code: 0,
            state_name: "Query not supported".to_string(),
            is_normal: true,
            is_warning: false,
            is_critical: false,
            query_supported: false,
        }
    }
}

/// Status of a single output group (zone)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStatus {
    /// Wire index, 0 = A
    pub index: u8,
    /// Group letter A-H
    pub name: char,
    /// Level in dB when the response was interpretable
    pub volume: Option<i32>,
    pub mute: Option<bool>,
    /// Selected input source 1-4
    pub source: Option<u8>,
    pub fault: Option<GroupFault>,
    #[serde(serialize_with = "serialize_opt_hex")]
    pub raw_volume: Option<Vec<u8>>,
    #[serde(serialize_with = "serialize_opt_hex")]
    pub raw_mute: Option<Vec<u8>>,
    #[serde(serialize_with = "serialize_opt_hex")]
    pub raw_source: Option<Vec<u8>>,
    #[serde(serialize_with = "serialize_opt_hex")]
    pub raw_protect: Option<Vec<u8>>,
}

impl GroupStatus {
    pub fn new(index: u8, name: char) -> Self {
        Self {
            index,
            name,
            volume: None,
            mute: None,
            source: None,
            fault: None,
            raw_volume: None,
            raw_mute: None,
            raw_source: None,
            raw_protect: None,
        }
    }
}

/// Status of a single physical output channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelStatus {
    /// Wire index, 0x08 = 1L
    pub index: u8,
    /// Leg name ("1L", "1R", ...)
    pub name: String,
    pub dsp_preset: Option<String>,
    pub has_short: bool,
    pub short_status: String,
    pub has_overtemp: bool,
    pub overtemp_status: String,
    #[serde(serialize_with = "serialize_opt_hex")]
    pub raw_dsp_preset: Option<Vec<u8>>,
    #[serde(serialize_with = "serialize_opt_hex")]
    pub raw_short_protect: Option<Vec<u8>>,
    #[serde(serialize_with = "serialize_opt_hex")]
    pub raw_overtemp: Option<Vec<u8>>,
}

impl ChannelStatus {
    pub fn new(index: u8, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            dsp_preset: None,
            has_short: false,
            short_status: "Unknown".to_string(),
            has_overtemp: false,
            overtemp_status: "Unknown".to_string(),
            raw_dsp_preset: None,
            raw_short_protect: None,
            raw_overtemp: None,
        }
    }
}

/// Complete device snapshot assembled by a full diagnostic run
///
/// Self-contained and serializable; the reporting layer renders it without
/// talking to the device again. Field names are a stable boundary.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub addr: String,
    pub port: u16,
    pub is_reachable: bool,
    pub power: Option<PowerStatus>,
    pub global_fault: Option<GlobalFault>,
    pub thermal: Option<ThermalStatus>,
    pub groups: Vec<GroupStatus>,
    pub channels: Vec<ChannelStatus>,
    /// Named round-trip latencies in milliseconds
    pub response_times: BTreeMap<String, f64>,
    /// Every raw response keyed by query name, kept regardless of parse success
    #[serde(serialize_with = "serialize_hex_map")]
    pub raw_responses: BTreeMap<String, Vec<u8>>,
    pub errors: Vec<String>,
    /// OR of every sub-component fault flag
    pub has_any_fault: bool,
    /// Human-readable cause tags, one per detected fault
    pub fault_summary: Vec<String>,
}

impl DeviceStatus {
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
            is_reachable: false,
            power: None,
            global_fault: None,
            thermal: None,
            groups: Vec::new(),
            channels: Vec::new(),
            response_times: BTreeMap::new(),
            raw_responses: BTreeMap::new(),
            errors: Vec::new(),
            has_any_fault: false,
            fault_summary: Vec::new(),
        }
    }

    /// Record a fault cause and latch the summary flag
    pub fn record_fault(&mut self, summary: impl Into<String>) {
        self.has_any_fault = true;
        self.fault_summary.push(summary.into());
    }
}

/// Outcome of a single command burst
#[derive(Debug, Clone, Serialize)]
pub struct BurstTestResult {
    pub total_commands: usize,
    pub successful: usize,
    pub failed: usize,
    /// Inter-command delay used for this burst
    pub delay_ms: u64,
    pub error_rate_percent: f64,
    /// Round-trip latency of each successful command, in order
    pub latencies_ms: Vec<f64>,
    pub min_ms: Option<f64>,
    pub avg_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub stddev_ms: Option<f64>,
    pub errors: Vec<String>,
}

impl BurstTestResult {
    pub fn new(total_commands: usize, delay_ms: u64) -> Self {
        Self {
            total_commands,
            successful: 0,
            failed: 0,
            delay_ms,
            error_rate_percent: 0.0,
            latencies_ms: Vec::new(),
            min_ms: None,
            avg_ms: None,
            max_ms: None,
            stddev_ms: None,
            errors: Vec::new(),
        }
    }

    /// Compute the error rate and latency statistics from the samples
    pub fn finalize(&mut self) {
        if self.total_commands > 0 {
            self.error_rate_percent = self.failed as f64 / self.total_commands as f64 * 100.0;
        }
        if self.latencies_ms.is_empty() {
            return;
        }
        let n = self.latencies_ms.len() as f64;
        let sum: f64 = self.latencies_ms.iter().sum();
        let avg = sum / n;
        self.min_ms = self.latencies_ms.iter().copied().reduce(f64::min);
        self.max_ms = self.latencies_ms.iter().copied().reduce(f64::max);
        self.avg_ms = Some(avg);
        if self.latencies_ms.len() > 1 {
            let var: f64 = self
                .latencies_ms
                .iter()
                .map(|x| (x - avg).powi(2))
                .sum::<f64>()
                / (n - 1.0);
            self.stddev_ms = Some(var.sqrt());
        }
    }
}

/// One burst-test data point from a delay search
#[derive(Debug, Clone, Serialize)]
pub struct DelayTrial {
    pub delay_ms: u64,
    pub error_rate_percent: f64,
    pub avg_latency_ms: Option<f64>,
    pub successful: usize,
    pub failed: usize,
}

/// Outcome of an adaptive delay search
///
/// Carries the full error-rate curve, not just the recommendation, so a
/// caller can see how sharply reliability falls off below the threshold.
#[derive(Debug, Clone, Serialize)]
pub struct DelaySearchResult {
    /// One entry per candidate delay, ascending
    pub trials: Vec<DelayTrial>,
    /// Smallest candidate whose error rate met the threshold; None when no
    /// candidate passed and the caller must report "no reliable delay found"
    pub recommended_delay_ms: Option<u64>,
    pub all_passed_at_zero: bool,
}
