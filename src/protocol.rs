use crate::commands::{byte_to_volume, is_volume_byte};
use serde::{Serialize, Serializer};

/// Render bytes as spaced upper-hex, e.g. `FF 55 01 70`
pub fn hex_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn serialize_hex<S>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.serialize_str(&hex_string(bytes))
}

/// Decoded shape of a raw amplifier response
///
/// MK3 firmware answers some queries with a single status byte and others
/// with a legacy `Cmd:`-tagged text line; which one arrives depends on the
/// firmware revision, not the command, so the split is decided by content
/// sniffing. `Unparsed` is the safe fallback; the bytes are always kept.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    /// Raw status byte(s)
    Binary(#[serde(serialize_with = "serialize_hex")] Vec<u8>),
    /// Legacy delimited text line
    Text(String),
    /// Printable but unrecognized, or empty; kept for forensic display
    Unparsed(#[serde(serialize_with = "serialize_hex")] Vec<u8>),
}

/// Markers that identify a legacy text response.
const TEXT_MARKERS: [&str; 2] = ["Cmd:", "Power status"];

/// Classify raw response bytes as binary status, legacy text, or unparsed
///
/// Never fails; unrecognizable payloads come back as `Unparsed` with the
/// bytes preserved.
pub fn decode(raw: &[u8]) -> Payload {
    if raw.is_empty() {
        return Payload::Unparsed(Vec::new());
    }
    if let Ok(text) = std::str::from_utf8(raw) {
        let printable = text
            .chars()
            .all(|c| !c.is_control() || c == '\r' || c == '\n' || c == '\t');
        if printable {
            if TEXT_MARKERS.iter().any(|m| text.contains(m)) {
                return Payload::Text(text.trim().to_string());
            }
            // Printable but no recognizable tag: keep, do not guess.
            return Payload::Unparsed(raw.to_vec());
        }
    }
    Payload::Binary(raw.to_vec())
}

// ============================================================================
// Fault/protect bitfield decoders
//
// Bit assignments below are reverse-engineered from device behavior; they
// are NOT in the published Sonance IP codes documentation. Reserved bits
// are surfaced in the decoded struct rather than discarded, so a firmware
// revision that starts using them shows up in reports instead of vanishing.
// ============================================================================

/// Global protect status bits (response to `FF 55 01 71`).
mod global_bits {
    pub const PROTECTION_ACTIVE: u8 = 0x01;
    pub const THERMAL_WARNING: u8 = 0x02;
    pub const POWER_SUPPLY_FAULT: u8 = 0x04;
    pub const AMPLIFIER_FAULT: u8 = 0x08;
    // Bits 4-7: reserved / model-specific
}

/// Decoded global protection/fault status
///
/// Bit meanings are inferred, not vendor-documented; `reserved_bits`
/// carries the upper nibble verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct GlobalFault {
    pub protection_active: bool,
    pub thermal_warning: bool,
    pub power_supply_fault: bool,
    pub amplifier_fault: bool,
    /// Upper four bits, meaning unknown upstream
    pub reserved_bits: u8,
    pub raw: u8,
    pub has_any_fault: bool,
}

impl GlobalFault {
    /// Decode a status byte; total over all 256 values
    pub fn decode(byte: u8) -> Self {
        Self {
            protection_active: byte & global_bits::PROTECTION_ACTIVE != 0,
            thermal_warning: byte & global_bits::THERMAL_WARNING != 0,
            power_supply_fault: byte & global_bits::POWER_SUPPLY_FAULT != 0,
            amplifier_fault: byte & global_bits::AMPLIFIER_FAULT != 0,
            reserved_bits: (byte >> 4) & 0x0F,
            raw: byte,
            has_any_fault: byte != 0,
        }
    }
}

/// Per-group protect status bits (response to `FF 55 02 13 <group>`).
mod group_bits {
    pub const MUTED_DUE_TO_PROTECT: u8 = 0x01;
    pub const THERMAL_PROTECT: u8 = 0x02;
    pub const OVER_CURRENT: u8 = 0x04;
    pub const LOAD_FAULT: u8 = 0x08;
    pub const DC_FAULT: u8 = 0x10;
    // Bits 5-7: reserved
}

/// Decoded per-group protection/fault status
///
/// Bit meanings are inferred, not vendor-documented; `reserved_bits`
/// carries the upper three bits verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct GroupFault {
    pub muted_due_to_protect: bool,
    pub thermal_protect: bool,
    pub over_current: bool,
    pub load_fault: bool,
    pub dc_fault: bool,
    /// Upper three bits, meaning unknown upstream
    pub reserved_bits: u8,
    pub raw: u8,
    pub has_any_fault: bool,
}

impl GroupFault {
    /// Decode a status byte; total over all 256 values
    pub fn decode(byte: u8) -> Self {
        Self {
            muted_due_to_protect: byte & group_bits::MUTED_DUE_TO_PROTECT != 0,
            thermal_protect: byte & group_bits::THERMAL_PROTECT != 0,
            over_current: byte & group_bits::OVER_CURRENT != 0,
            load_fault: byte & group_bits::LOAD_FAULT != 0,
            dc_fault: byte & group_bits::DC_FAULT != 0,
            reserved_bits: (byte >> 5) & 0x07,
            raw: byte,
            has_any_fault: byte != 0,
        }
    }

    /// Short cause tags for the set flags, e.g. `["thermal", "over-current/short"]`
    pub fn cause_tags(&self) -> Vec<&'static str> {
        let mut tags = Vec::new();
        if self.muted_due_to_protect {
            tags.push("auto-muted");
        }
        if self.thermal_protect {
            tags.push("thermal");
        }
        if self.over_current {
            tags.push("over-current/short");
        }
        if self.load_fault {
            tags.push("load fault");
        }
        if self.dc_fault {
            tags.push("DC fault");
        }
        tags
    }
}

/// Thermal state codes (response to `FF 55 01 72`)
///
/// Inferred from device behavior; the query itself is absent on some
/// firmware revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThermalState {
    Normal,
    Warm,
    Hot,
    ThermalProtect,
    /// Unrecognized state code, surfaced as-is
    Unknown(u8),
}

impl ThermalState {
    /// Decode a state byte; total over all 256 values
    pub fn decode(byte: u8) -> Self {
        match byte {
            0x00 => Self::Normal,
            0x01 => Self::Warm,
            0x02 => Self::Hot,
            0x03 => Self::ThermalProtect,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Normal => 0x00,
            Self::Warm => 0x01,
            Self::Hot => 0x02,
            Self::ThermalProtect => 0x03,
            Self::Unknown(c) => *c,
        }
    }

    pub fn name(&self) -> String {
        match self {
            Self::Normal => "Normal".to_string(),
            Self::Warm => "Warm".to_string(),
            Self::Hot => "Hot".to_string(),
            Self::ThermalProtect => "Thermal Protect".to_string(),
            Self::Unknown(c) => format!("Unknown (0x{c:02X})"),
        }
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, Self::Normal)
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, Self::Warm | Self::Hot)
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, Self::ThermalProtect)
    }
}

// ============================================================================
// Field parsers
//
// Pure functions of the raw bytes, so a device snapshot is fully determined
// by its raw response map and can be replayed in tests. Each parser accepts
// both the binary and the legacy text form and returns None when neither
// matches.
// ============================================================================

/// Power state from a `FF 55 01 70` response
///
/// Binary: `0x01` = on, anything else = off. Text: `Power status :On`.
pub fn parse_power(raw: &[u8]) -> Option<bool> {
    match decode(raw) {
        Payload::Text(text) if text.contains("Power status") => {
            Some(text.contains(":On") || text.contains(": On"))
        }
        Payload::Binary(bytes) => Some(bytes[0] == 0x01),
        _ => None,
    }
}

/// Group volume in dB from a volume query response
///
/// Text form: `Cmd:Volume,Group:A Vol=-30 d`. Binary form: a byte on the
/// encoded volume scale.
pub fn parse_group_volume(raw: &[u8]) -> Option<i32> {
    match decode(raw) {
        Payload::Text(text) if text.contains("Cmd:Volume") => {
            let after = text.split("Vol=").nth(1)?;
            after.split_whitespace().next()?.parse().ok()
        }
        Payload::Binary(bytes) if is_volume_byte(bytes[0]) => Some(byte_to_volume(bytes[0])),
        _ => None,
    }
}

/// Group mute state from a mute query response
///
/// Text form: `Cmd:MuteState,Group:A Mute=off`. Binary form: `0x01` = muted.
pub fn parse_group_mute(raw: &[u8]) -> Option<bool> {
    match decode(raw) {
        Payload::Text(text) if text.contains("MuteState") => {
            Some(text.to_lowercase().contains("mute=on"))
        }
        Payload::Binary(bytes) => Some(bytes[0] == 0x01),
        _ => None,
    }
}

/// Selected input source (1-4) from a source query response
///
/// Text form: `Cmd:Source1,Group:A Src1=Input 1L`. Binary form: the source
/// number itself.
pub fn parse_group_source(raw: &[u8]) -> Option<u8> {
    match decode(raw) {
        Payload::Text(text) if text.contains("Cmd:Source") => {
            let after = text.split("Src1=").nth(1)?;
            after
                .chars()
                .find(|c| c.is_ascii_digit())
                .and_then(|c| c.to_digit(10))
                .map(|d| d as u8)
        }
        Payload::Binary(bytes) if (1..=4).contains(&bytes[0]) => Some(bytes[0]),
        _ => None,
    }
}

/// Group letter carried in a legacy text response, if any
pub fn parse_group_letter(raw: &[u8]) -> Option<char> {
    match decode(raw) {
        Payload::Text(text) => text.split("Group:").nth(1)?.chars().next(),
        _ => None,
    }
}

/// Short-circuit protect status from a `FF 55 02 17` response
///
/// Text form: `Cmd:AmpShortCir:No short,Channel Output 1L`. Returns the
/// detected flag plus the status text shown in reports.
pub fn parse_short_protect(raw: &[u8]) -> (bool, String) {
    match decode(raw) {
        Payload::Text(text) if text.contains("AmpShortCir") => {
            let lower = text.to_lowercase();
            let has_short = lower.contains("short") && !lower.contains("no short");
            let status = if has_short { "Short detected" } else { "No short" };
            (has_short, status.to_string())
        }
        Payload::Binary(bytes) => {
            let has_short = bytes[0] != 0;
            let status = if has_short { "Short detected" } else { "No short" };
            (has_short, status.to_string())
        }
        _ => (false, format!("Raw: {}", hex_string(raw))),
    }
}

/// Over-temperature status from a `FF 55 02 18` response
///
/// Text form: `Cmd:AmpOverTemp:Normal Temp,Channel Output 1L`.
pub fn parse_overtemp(raw: &[u8]) -> (bool, String) {
    match decode(raw) {
        Payload::Text(text) if text.contains("AmpOverTemp") => {
            let lower = text.to_lowercase();
            let is_normal = lower.contains("normal");
            let has_overtemp =
                (lower.contains("over temp") || lower.contains("overtemp")) && !is_normal;
            let status = if has_overtemp { "Over Temp" } else { "Normal" };
            (has_overtemp, status.to_string())
        }
        Payload::Binary(bytes) => {
            let has_overtemp = bytes[0] != 0;
            let status = if has_overtemp { "Over Temp" } else { "Normal" };
            (has_overtemp, status.to_string())
        }
        _ => (false, format!("Raw: {}", hex_string(raw))),
    }
}

/// DSP EQ preset name from a `FF 55 02 16` response
///
/// Text form: `Cmd:DSP_Preset:FLAT,Channel Output 1L`.
pub fn parse_dsp_preset(raw: &[u8]) -> Option<String> {
    match decode(raw) {
        Payload::Text(text) if text.contains("DSP_Preset") => {
            let last = text.split(':').next_back()?;
            let preset = last.split(',').next()?.trim();
            (!preset.is_empty()).then(|| preset.to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_text_binary_and_unparsed() {
        assert_eq!(
            decode(b"Cmd:Volume,Group:A Vol=-30 d"),
            Payload::Text("Cmd:Volume,Group:A Vol=-30 d".to_string())
        );
        assert_eq!(decode(&[0x01]), Payload::Binary(vec![0x01]));
        // Printable text without a marker is kept but not interpreted.
        assert_eq!(
            decode(b"hello world"),
            Payload::Unparsed(b"hello world".to_vec())
        );
        assert_eq!(decode(&[]), Payload::Unparsed(Vec::new()));
    }

    #[test]
    fn decode_never_loses_bytes() {
        let raw = [0x00, 0x9C, 0xFF];
        match decode(&raw) {
            Payload::Binary(b) | Payload::Unparsed(b) => assert_eq!(b, raw),
            Payload::Text(_) => panic!("control bytes sniffed as text"),
        }
    }

    #[test]
    fn global_fault_total_over_all_bytes() {
        for byte in 0u16..=255 {
            let byte = byte as u8;
            let fault = GlobalFault::decode(byte);
            assert_eq!(fault.has_any_fault, byte != 0);
            assert_eq!(fault.raw, byte);
            assert_eq!(fault.reserved_bits, byte >> 4);
        }
    }

    #[test]
    fn group_fault_total_over_all_bytes() {
        for byte in 0u16..=255 {
            let byte = byte as u8;
            let fault = GroupFault::decode(byte);
            assert_eq!(fault.has_any_fault, byte != 0);
            assert_eq!(fault.raw, byte);
            assert_eq!(fault.reserved_bits, byte >> 5);
        }
    }

    #[test]
    fn global_fault_bit_assignments() {
        // Bits 0 and 2 set: protection active plus power supply fault.
        let fault = GlobalFault::decode(0x05);
        assert!(fault.protection_active);
        assert!(fault.power_supply_fault);
        assert!(!fault.thermal_warning);
        assert!(!fault.amplifier_fault);
        assert!(fault.has_any_fault);
        assert_eq!(fault.reserved_bits, 0);
    }

    #[test]
    fn reserved_bits_surfaced_not_dropped() {
        let fault = GlobalFault::decode(0xF0);
        assert!(!fault.protection_active);
        assert_eq!(fault.reserved_bits, 0x0F);
        assert!(fault.has_any_fault);

        let group = GroupFault::decode(0xE0);
        assert_eq!(group.reserved_bits, 0x07);
        assert!(group.has_any_fault);
    }

    #[test]
    fn group_fault_cause_tags() {
        let fault = GroupFault::decode(group_bits::OVER_CURRENT | group_bits::DC_FAULT);
        assert_eq!(fault.cause_tags(), ["over-current/short", "DC fault"]);
        assert!(GroupFault::decode(0).cause_tags().is_empty());
    }

    #[test]
    fn thermal_state_codes() {
        assert!(ThermalState::decode(0x00).is_normal());
        assert!(ThermalState::decode(0x01).is_warning());
        assert!(ThermalState::decode(0x02).is_warning());
        assert!(ThermalState::decode(0x03).is_critical());
        for byte in 4u8..=255 {
            let state = ThermalState::decode(byte);
            assert_eq!(state, ThermalState::Unknown(byte));
            assert_eq!(state.code(), byte);
            assert!(!state.is_normal() && !state.is_warning() && !state.is_critical());
        }
        assert_eq!(ThermalState::decode(0xAB).name(), "Unknown (0xAB)");
    }

    #[test]
    fn parses_power_binary_and_text() {
        assert_eq!(parse_power(&[0x01]), Some(true));
        assert_eq!(parse_power(&[0x00]), Some(false));
        assert_eq!(parse_power(&[0x02]), Some(false));
        assert_eq!(parse_power(b"Power status :On"), Some(true));
        assert_eq!(parse_power(b"Power status :Off"), Some(false));
        assert_eq!(parse_power(b""), None);
    }

    #[test]
    fn parses_group_volume() {
        assert_eq!(parse_group_volume(b"Cmd:Volume,Group:A Vol=-30 d"), Some(-30));
        assert_eq!(parse_group_volume(&[0x99]), Some(-29));
        // Below the encoded scale: interpretation unavailable.
        assert_eq!(parse_group_volume(&[0x05]), None);
    }

    #[test]
    fn parses_group_mute_and_source() {
        assert_eq!(parse_group_mute(b"Cmd:MuteState,Group:B Mute=off"), Some(false));
        assert_eq!(parse_group_mute(b"Cmd:MuteState,Group:B Mute=on"), Some(true));
        assert_eq!(parse_group_mute(&[0x01]), Some(true));
        assert_eq!(parse_group_mute(&[0x00]), Some(false));

        assert_eq!(
            parse_group_source(b"Cmd:Source1,Group:A Src1=Input 2L"),
            Some(2)
        );
        assert_eq!(parse_group_source(&[0x03]), Some(3));
        assert_eq!(parse_group_source(&[0x09]), None);

        assert_eq!(parse_group_letter(b"Cmd:MuteState,Group:C Mute=off"), Some('C'));
    }

    #[test]
    fn parses_channel_protection_text() {
        let (has_short, status) =
            parse_short_protect(b"Cmd:AmpShortCir:No short,Channel Output 1L");
        assert!(!has_short);
        assert_eq!(status, "No short");

        let (has_short, status) = parse_short_protect(b"Cmd:AmpShortCir:Short,Channel Output 2R");
        assert!(has_short);
        assert_eq!(status, "Short detected");

        let (overtemp, status) = parse_overtemp(b"Cmd:AmpOverTemp:Normal Temp,Channel Output 1L");
        assert!(!overtemp);
        assert_eq!(status, "Normal");

        let (overtemp, status) = parse_overtemp(b"Cmd:AmpOverTemp:Over Temp,Channel Output 1L");
        assert!(overtemp);
        assert_eq!(status, "Over Temp");
    }

    #[test]
    fn parses_dsp_preset() {
        assert_eq!(
            parse_dsp_preset(b"Cmd:DSP_Preset:FLAT,Channel Output 1L"),
            Some("FLAT".to_string())
        );
        assert_eq!(parse_dsp_preset(&[0x01]), None);
    }

    #[test]
    fn hex_rendering() {
        assert_eq!(hex_string(&[0xFF, 0x55, 0x01, 0x70]), "FF 55 01 70");
        assert_eq!(hex_string(&[]), "");
    }
}
