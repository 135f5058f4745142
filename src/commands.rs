use crate::error::{Mk3Error, Result};
use std::fmt;

/// Every MK3 command starts with these two header bytes.
pub const HEADER: [u8; 2] = [0xFF, 0x55];

/// TCP port the MK3 control protocol listens on.
pub const DEFAULT_PORT: u16 = 52000;

/// Volume range accepted by the direct volume-set commands, in dB.
pub const VOLUME_MIN_DB: i32 = -70;
pub const VOLUME_MAX_DB: i32 = 0;

/// Command byte for -70 dB; the scale runs linearly to 0xB6 at 0 dB.
pub const VOLUME_BYTE_MIN: u8 = 0x71;

/// Scope byte for global (all groups) commands: `FF 55 01 <op>`.
const SCOPE_GLOBAL: u8 = 0x01;
/// Scope byte for per-group/per-channel commands: `FF 55 02 <op> <index>`.
const SCOPE_INDEXED: u8 = 0x02;

/// Opcode tables from the Sonance IP codes documentation (V1.3).
pub mod opcode {
    /// Global power control.
    pub mod power {
        pub const ON: u8 = 0x01;
        pub const OFF: u8 = 0x02;
        pub const TOGGLE: u8 = 0x03;
        pub const QUERY: u8 = 0x70;
    }

    /// Shared by global and per-group scope; the scope byte decides which.
    pub mod audio {
        pub const VOLUME_UP: u8 = 0x04;
        pub const VOLUME_DOWN: u8 = 0x05;
        pub const MUTE_TOGGLE: u8 = 0x06;
        pub const MUTE_ON: u8 = 0x07;
        pub const MUTE_OFF: u8 = 0x08;
        pub const SOURCE_1: u8 = 0x09;
        pub const SOURCE_2: u8 = 0x0A;
        pub const SOURCE_3: u8 = 0x0B;
        pub const SOURCE_4: u8 = 0x0C;
        pub const RETURN_TO_TURN_ON_VOL: u8 = 0x0D;
        pub const VOLUME_UP_3DB: u8 = 0x0E;
        pub const VOLUME_DOWN_3DB: u8 = 0x0F;
    }

    /// Per-group power control (also valid globally as "all groups").
    pub mod group_power {
        pub const ON: u8 = 0x65;
        pub const OFF: u8 = 0x66;
        pub const TOGGLE: u8 = 0x67;
    }

    /// Status queries.
    pub mod query {
        /// Per-group: `FF 55 02 <op> <group>`.
        pub const VOLUME: u8 = 0x10;
        pub const SOURCE: u8 = 0x11;
        pub const MUTE: u8 = 0x12;
        pub const GROUP_PROTECT: u8 = 0x13;

        /// Global: `FF 55 01 <op>`.
        pub const GLOBAL_PROTECT: u8 = 0x71;
        /// Not implemented by every firmware revision.
        pub const THERMAL_STATE: u8 = 0x72;

        /// Per-channel: `FF 55 02 <op> <channel>`.
        pub const DSP_PRESET: u8 = 0x16;
        pub const SHORT_PROTECT: u8 = 0x17;
        pub const OVERTEMP: u8 = 0x18;
    }
}

/// Output group index (0 = A .. 7 = H)
///
/// The DSP8-130 exposes all eight groups; the DSP2-150/DSP2-750 expose
/// only A and B. Construction validates the range so an out-of-range
/// index is rejected before any bytes are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupIndex(u8);

impl GroupIndex {
    pub const MAX: u8 = 7;

    const NAMES: [char; 8] = ['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H'];

    /// Validate and wrap a raw group index
    pub fn new(index: u8) -> Result<Self> {
        if index > Self::MAX {
            return Err(Mk3Error::InvalidIndex {
                kind: "group",
                value: index,
            });
        }
        Ok(Self(index))
    }

    /// The first `count` groups, in order (A, B, ...)
    pub fn first(count: usize) -> impl Iterator<Item = GroupIndex> {
        (0..count.min(8) as u8).map(GroupIndex)
    }

    /// Raw wire index (0-7)
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Group letter, A through H
    pub fn name(&self) -> char {
        Self::NAMES[self.0 as usize]
    }
}

/// Physical output channel index for protection/DSP queries
///
/// Wire values 0x08..=0x0F map to the output legs 1L, 1R, 2L, 2R, 3L,
/// 3R, 4L, 4R. Two channels per stereo group, so a 2-group model only
/// answers for 1L and 1R.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelIndex(u8);

impl ChannelIndex {
    pub const MIN: u8 = 0x08;
    pub const MAX: u8 = 0x0F;

    const NAMES: [&'static str; 8] = ["1L", "1R", "2L", "2R", "3L", "3R", "4L", "4R"];

    /// Validate and wrap a raw channel index
    pub fn new(index: u8) -> Result<Self> {
        if !(Self::MIN..=Self::MAX).contains(&index) {
            return Err(Mk3Error::InvalidIndex {
                kind: "channel",
                value: index,
            });
        }
        Ok(Self(index))
    }

    /// The first `count` channels, in order (1L, 1R, 2L, ...)
    pub fn first(count: usize) -> impl Iterator<Item = ChannelIndex> {
        (0..count.min(8) as u8).map(|i| ChannelIndex(Self::MIN + i))
    }

    /// Raw wire index (0x08-0x0F)
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Channel leg name ("1L", "1R", ...)
    pub fn name(&self) -> &'static str {
        Self::NAMES[(self.0 - Self::MIN) as usize]
    }
}

/// An encoded MK3 command
///
/// Immutable value object holding the exact wire bytes; build once, send
/// as often as needed. Global commands are four bytes, indexed commands
/// five.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    bytes: [u8; 5],
    len: usize,
}

impl Command {
    /// Build a global command: `FF 55 01 <opcode>`
    pub fn global(op: u8) -> Self {
        Self {
            bytes: [HEADER[0], HEADER[1], SCOPE_GLOBAL, op, 0],
            len: 4,
        }
    }

    /// Build a per-group command: `FF 55 02 <opcode> <group>`
    pub fn group(op: u8, group: GroupIndex) -> Self {
        Self {
            bytes: [HEADER[0], HEADER[1], SCOPE_INDEXED, op, group.value()],
            len: 5,
        }
    }

    /// Build a per-channel command: `FF 55 02 <opcode> <channel>`
    pub fn channel(op: u8, channel: ChannelIndex) -> Self {
        Self {
            bytes: [HEADER[0], HEADER[1], SCOPE_INDEXED, op, channel.value()],
            len: 5,
        }
    }

    /// The wire bytes to transmit
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// The opcode byte (fourth byte of the frame)
    pub fn opcode(&self) -> u8 {
        self.bytes[3]
    }

    /// The index byte of a per-group/per-channel command, if present
    pub fn index(&self) -> Option<u8> {
        (self.len == 5).then(|| self.bytes[4])
    }

    // ========== Power ==========

    /// Turn the amplifier on
    pub fn power_on() -> Self {
        Self::global(opcode::power::ON)
    }

    /// Put the amplifier into standby
    pub fn power_off() -> Self {
        Self::global(opcode::power::OFF)
    }

    /// Toggle amplifier power
    pub fn power_toggle() -> Self {
        Self::global(opcode::power::TOGGLE)
    }

    /// Query amplifier power status
    pub fn power_query() -> Self {
        Self::global(opcode::power::QUERY)
    }

    // ========== Global volume / mute / source ==========

    pub fn global_volume_up() -> Self {
        Self::global(opcode::audio::VOLUME_UP)
    }

    pub fn global_volume_down() -> Self {
        Self::global(opcode::audio::VOLUME_DOWN)
    }

    pub fn global_volume_up_3db() -> Self {
        Self::global(opcode::audio::VOLUME_UP_3DB)
    }

    pub fn global_volume_down_3db() -> Self {
        Self::global(opcode::audio::VOLUME_DOWN_3DB)
    }

    pub fn global_mute_toggle() -> Self {
        Self::global(opcode::audio::MUTE_TOGGLE)
    }

    pub fn global_mute_on() -> Self {
        Self::global(opcode::audio::MUTE_ON)
    }

    pub fn global_mute_off() -> Self {
        Self::global(opcode::audio::MUTE_OFF)
    }

    /// Return every group to its configured turn-on volume
    pub fn global_return_to_turn_on_volume() -> Self {
        Self::global(opcode::audio::RETURN_TO_TURN_ON_VOL)
    }

    /// Select input source 1-4 on all groups
    pub fn global_source(source: u8) -> Result<Self> {
        source_opcode(source).map(Self::global)
    }

    /// Set all groups to an absolute level in dB (-70..=0, clamped)
    ///
    /// The volume byte rides in the opcode position: `FF 55 01 <vol>`.
    pub fn global_volume_set(db: i32) -> Self {
        Self::global(volume_to_byte(db))
    }

    pub fn all_groups_power_on() -> Self {
        Self::global(opcode::group_power::ON)
    }

    pub fn all_groups_power_off() -> Self {
        Self::global(opcode::group_power::OFF)
    }

    // ========== Per-group control ==========

    pub fn group_power_on(group: GroupIndex) -> Self {
        Self::group(opcode::group_power::ON, group)
    }

    pub fn group_power_off(group: GroupIndex) -> Self {
        Self::group(opcode::group_power::OFF, group)
    }

    pub fn group_power_toggle(group: GroupIndex) -> Self {
        Self::group(opcode::group_power::TOGGLE, group)
    }

    pub fn group_volume_up(group: GroupIndex) -> Self {
        Self::group(opcode::audio::VOLUME_UP, group)
    }

    pub fn group_volume_down(group: GroupIndex) -> Self {
        Self::group(opcode::audio::VOLUME_DOWN, group)
    }

    pub fn group_mute_toggle(group: GroupIndex) -> Self {
        Self::group(opcode::audio::MUTE_TOGGLE, group)
    }

    pub fn group_mute_on(group: GroupIndex) -> Self {
        Self::group(opcode::audio::MUTE_ON, group)
    }

    pub fn group_mute_off(group: GroupIndex) -> Self {
        Self::group(opcode::audio::MUTE_OFF, group)
    }

    /// Select input source 1-4 on one group
    pub fn group_source(group: GroupIndex, source: u8) -> Result<Self> {
        source_opcode(source).map(|op| Self::group(op, group))
    }

    /// Set one group to an absolute level in dB (-70..=0, clamped)
    pub fn group_volume_set(group: GroupIndex, db: i32) -> Self {
        Self::group(volume_to_byte(db), group)
    }

    // ========== Status queries ==========

    pub fn query_group_volume(group: GroupIndex) -> Self {
        Self::group(opcode::query::VOLUME, group)
    }

    pub fn query_group_source(group: GroupIndex) -> Self {
        Self::group(opcode::query::SOURCE, group)
    }

    pub fn query_group_mute(group: GroupIndex) -> Self {
        Self::group(opcode::query::MUTE, group)
    }

    pub fn query_group_protect(group: GroupIndex) -> Self {
        Self::group(opcode::query::GROUP_PROTECT, group)
    }

    pub fn query_global_protect() -> Self {
        Self::global(opcode::query::GLOBAL_PROTECT)
    }

    pub fn query_thermal_state() -> Self {
        Self::global(opcode::query::THERMAL_STATE)
    }

    pub fn query_channel_dsp_preset(channel: ChannelIndex) -> Self {
        Self::channel(opcode::query::DSP_PRESET, channel)
    }

    pub fn query_channel_short_protect(channel: ChannelIndex) -> Self {
        Self::channel(opcode::query::SHORT_PROTECT, channel)
    }

    pub fn query_channel_overtemp(channel: ChannelIndex) -> Self {
        Self::channel(opcode::query::OVERTEMP, channel)
    }
}

impl fmt::Display for Command {
    /// Spaced upper-hex rendering, e.g. `FF 55 01 70`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.as_bytes().iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

fn source_opcode(source: u8) -> Result<u8> {
    if !(1..=4).contains(&source) {
        return Err(Mk3Error::InvalidIndex {
            kind: "source",
            value: source,
        });
    }
    Ok(opcode::audio::SOURCE_1 + (source - 1))
}

/// Convert a level in dB to the device's offset-encoded volume byte
///
/// -70 dB maps to 0x71 and the scale runs linearly, 1 dB per step, to
/// 0xB6 at 0 dB. Out-of-range levels are clamped.
pub fn volume_to_byte(db: i32) -> u8 {
    let db = db.clamp(VOLUME_MIN_DB, VOLUME_MAX_DB);
    (VOLUME_BYTE_MIN as i32 + (db + 70)) as u8
}

/// Exact inverse of [`volume_to_byte`] over the encoded range
pub fn byte_to_volume(byte: u8) -> i32 {
    (byte as i32 - VOLUME_BYTE_MIN as i32) - 70
}

/// True when `byte` falls inside the encoded volume scale
pub fn is_volume_byte(byte: u8) -> bool {
    (VOLUME_BYTE_MIN..=0xB6).contains(&byte)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_command_wire_format() {
        assert_eq!(Command::power_query().as_bytes(), &[0xFF, 0x55, 0x01, 0x70]);
        assert_eq!(Command::power_on().as_bytes(), &[0xFF, 0x55, 0x01, 0x01]);
        assert_eq!(
            Command::query_global_protect().as_bytes(),
            &[0xFF, 0x55, 0x01, 0x71]
        );
        assert_eq!(
            Command::query_thermal_state().as_bytes(),
            &[0xFF, 0x55, 0x01, 0x72]
        );
    }

    #[test]
    fn group_command_wire_format() {
        let c = GroupIndex::new(2).unwrap();
        assert_eq!(
            Command::query_group_volume(c).as_bytes(),
            &[0xFF, 0x55, 0x02, 0x10, 0x02]
        );
        assert_eq!(
            Command::query_group_protect(c).as_bytes(),
            &[0xFF, 0x55, 0x02, 0x13, 0x02]
        );
        assert_eq!(
            Command::group_power_on(c).as_bytes(),
            &[0xFF, 0x55, 0x02, 0x65, 0x02]
        );
    }

    #[test]
    fn channel_command_wire_format() {
        let ch = ChannelIndex::new(0x0A).unwrap();
        assert_eq!(
            Command::query_channel_short_protect(ch).as_bytes(),
            &[0xFF, 0x55, 0x02, 0x17, 0x0A]
        );
        assert_eq!(
            Command::query_channel_overtemp(ch).as_bytes(),
            &[0xFF, 0x55, 0x02, 0x18, 0x0A]
        );
        assert_eq!(
            Command::query_channel_dsp_preset(ch).as_bytes(),
            &[0xFF, 0x55, 0x02, 0x16, 0x0A]
        );
    }

    #[test]
    fn encode_round_trips_opcode_and_index() {
        for raw in 0u8..=7 {
            let group = GroupIndex::new(raw).unwrap();
            for op in [
                opcode::query::VOLUME,
                opcode::query::SOURCE,
                opcode::query::MUTE,
                opcode::query::GROUP_PROTECT,
                opcode::audio::MUTE_ON,
            ] {
                let cmd = Command::group(op, group);
                assert_eq!(cmd.opcode(), op);
                assert_eq!(cmd.index(), Some(raw));
                assert_eq!(&cmd.as_bytes()[..2], &HEADER);
            }
        }
    }

    #[test]
    fn invalid_indices_rejected() {
        assert!(matches!(
            GroupIndex::new(8),
            Err(Mk3Error::InvalidIndex { kind: "group", .. })
        ));
        assert!(matches!(
            ChannelIndex::new(0x07),
            Err(Mk3Error::InvalidIndex { kind: "channel", .. })
        ));
        assert!(matches!(
            ChannelIndex::new(0x10),
            Err(Mk3Error::InvalidIndex { kind: "channel", .. })
        ));
        assert!(Command::global_source(0).is_err());
        assert!(Command::global_source(5).is_err());
    }

    #[test]
    fn group_and_channel_names() {
        assert_eq!(GroupIndex::new(0).unwrap().name(), 'A');
        assert_eq!(GroupIndex::new(7).unwrap().name(), 'H');
        assert_eq!(ChannelIndex::new(0x08).unwrap().name(), "1L");
        assert_eq!(ChannelIndex::new(0x0F).unwrap().name(), "4R");

        let names: Vec<_> = ChannelIndex::first(4).map(|c| c.name()).collect();
        assert_eq!(names, ["1L", "1R", "2L", "2R"]);
    }

    #[test]
    fn volume_codec_endpoints() {
        assert_eq!(volume_to_byte(-70), 0x71);
        assert_eq!(volume_to_byte(0), 0xB6);
        assert_eq!(byte_to_volume(0x71), -70);
        assert_eq!(byte_to_volume(0xB6), 0);
    }

    #[test]
    fn volume_codec_round_trips_with_clamping() {
        for db in -100..=30 {
            let back = byte_to_volume(volume_to_byte(db));
            assert_eq!(back, db.clamp(-70, 0), "db = {db}");
        }
    }

    #[test]
    fn volume_set_embeds_volume_byte_as_opcode() {
        let g = GroupIndex::new(1).unwrap();
        assert_eq!(
            Command::group_volume_set(g, -30).as_bytes(),
            &[0xFF, 0x55, 0x02, 0x99, 0x01]
        );
        assert_eq!(
            Command::global_volume_set(-70).as_bytes(),
            &[0xFF, 0x55, 0x01, 0x71]
        );
    }

    #[test]
    fn display_renders_spaced_hex() {
        assert_eq!(Command::power_query().to_string(), "FF 55 01 70");
        let g = GroupIndex::new(0).unwrap();
        assert_eq!(Command::query_group_mute(g).to_string(), "FF 55 02 12 00");
    }
}
