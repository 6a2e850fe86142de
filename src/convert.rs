//! Translation between byte-oriented MIDI 1.0 and the Universal MIDI
//! Packet format.
//!
//! Both directions operate on one message/packet per call. The contexts
//! carry the little state the formats require: running status for the
//! MIDI 1 side, the SysEx accumulator for the UMP side.

use crate::message::{
    channel_voice_data_len, is_channel_voice_status, is_realtime_byte, is_status_byte,
    system_common_data_len, MidiMessage,
};
use crate::ump::Ump;

/// Failure of a single conversion. `Unrepresentable` marks packets with no
/// analog in the other protocol; callers decide whether to drop or report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertError {
    Unrepresentable,
    Malformed,
}

impl std::fmt::Display for ConvertError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ConvertError::Unrepresentable => f.write_str("message has no analog in the target protocol"),
            ConvertError::Malformed => f.write_str("malformed message"),
        }
    }
}

impl std::error::Error for ConvertError {}

/// Carries running status across `midi1_to_ump` calls so that messages
/// collapsed by running status upstream still convert.
#[derive(Debug, Default)]
pub struct Midi1ToUmpContext {
    running_status: Option<u8>,
}

impl Midi1ToUmpContext {
    pub fn new() -> Midi1ToUmpContext {
        Midi1ToUmpContext::default()
    }
}

/// Converts one MIDI 1.0 message into UMPs on `group`, emitting each packet
/// through `out`.
///
/// Channel voice maps to type-2 packets, SysEx to a run of type-3 packets
/// with 6-byte payload groups, system common and real-time to type-1.
pub fn midi1_to_ump<F: FnMut(Ump)>(
    bytes: &[u8],
    group: u8,
    ctx: &mut Midi1ToUmpContext,
    mut out: F,
) -> Result<(), ConvertError> {
    let group = u32::from(group & 0x0F);
    let Some(&first) = bytes.first() else {
        return Err(ConvertError::Malformed);
    };

    // Resolve running status up front so the arms below always see a
    // status-led message.
    let (status, data) = if is_status_byte(first) {
        (first, &bytes[1..])
    } else {
        let Some(status) = ctx.running_status else {
            return Err(ConvertError::Malformed);
        };
        (status, bytes)
    };

    if is_channel_voice_status(status) {
        if data.len() != channel_voice_data_len(status) {
            return Err(ConvertError::Malformed);
        }
        ctx.running_status = Some(status);
        let d1 = u32::from(*data.first().unwrap_or(&0));
        let d2 = u32::from(*data.get(1).unwrap_or(&0));
        out(Ump::from_word(
            0x2000_0000 | group << 24 | u32::from(status) << 16 | d1 << 8 | d2,
        ));
        return Ok(());
    }

    // real-time bytes pass through without touching running status
    if is_realtime_byte(status) {
        out(Ump::from_word(0x1000_0000 | group << 24 | u32::from(status) << 16));
        return Ok(());
    }
    ctx.running_status = None;
    if status == 0xF0 {
        if bytes.last() != Some(&0xF7) {
            return Err(ConvertError::Malformed);
        }
        return sysex_to_ump(&bytes[1..bytes.len() - 1], group, out);
    }
    match system_common_data_len(status) {
        Some(expected) if data.len() == expected => {
            let d1 = u32::from(*data.first().unwrap_or(&0));
            let d2 = u32::from(*data.get(1).unwrap_or(&0));
            out(Ump::from_word(
                0x1000_0000 | group << 24 | u32::from(status) << 16 | d1 << 8 | d2,
            ));
            Ok(())
        }
        _ => Err(ConvertError::Malformed),
    }
}

// SysEx7 statuses in the type-3 word
const SYSEX_SINGLE: u32 = 0x0;
const SYSEX_START: u32 = 0x1;
const SYSEX_CONTINUE: u32 = 0x2;
const SYSEX_END: u32 = 0x3;

fn sysex_to_ump<F: FnMut(Ump)>(payload: &[u8], group: u32, mut out: F) -> Result<(), ConvertError> {
    let chunks: Vec<&[u8]> = if payload.is_empty() {
        vec![payload]
    } else {
        payload.chunks(6).collect()
    };
    let last = chunks.len() - 1;
    for (i, chunk) in chunks.iter().enumerate() {
        let status = match (i, i == last) {
            (0, true) => SYSEX_SINGLE,
            (0, false) => SYSEX_START,
            (_, false) => SYSEX_CONTINUE,
            (_, true) => SYSEX_END,
        };
        let mut b = [0u8; 6];
        b[..chunk.len()].copy_from_slice(chunk);
        let w0 = 0x3000_0000
            | group << 24
            | status << 20
            | (chunk.len() as u32) << 16
            | u32::from(b[0]) << 8
            | u32::from(b[1]);
        let w1 = u32::from(b[2]) << 24 | u32::from(b[3]) << 16 | u32::from(b[4]) << 8 | u32::from(b[5]);
        out(Ump::from_words(&[w0, w1]).expect("type 3 is two words"));
    }
    Ok(())
}

/// Accumulates type-3 SysEx fragments across `ump_to_midi1` calls.
#[derive(Debug, Default)]
pub struct UmpToMidi1Context {
    sysex: Vec<u8>,
    in_sysex: bool,
}

impl UmpToMidi1Context {
    pub fn new() -> UmpToMidi1Context {
        UmpToMidi1Context::default()
    }
}

/// Converts one UMP into a MIDI 1.0 message.
///
/// Returns `Ok(None)` when the packet produced no complete message yet
/// (SysEx fragments, utility packets). Type-4 packets map only when a
/// MIDI 1 analog exists; 16-bit velocities and 32-bit controller values are
/// scaled down. Type-5 (SysEx8 / mixed data set) and stream messages are
/// not mapped.
pub fn ump_to_midi1(
    ump: &Ump,
    ctx: &mut UmpToMidi1Context,
) -> Result<Option<MidiMessage>, ConvertError> {
    let w0 = ump[0];
    match ump.message_type() {
        // utility (NOOP, jitter-reduction): nothing to emit
        0x0 => Ok(None),
        0x1 => {
            let status = ((w0 >> 16) & 0xFF) as u8;
            let len = if is_realtime_byte(status) {
                0
            } else {
                system_common_data_len(status).ok_or(ConvertError::Malformed)?
            };
            let mut bytes = vec![status];
            if len >= 1 {
                bytes.push(((w0 >> 8) & 0x7F) as u8);
            }
            if len >= 2 {
                bytes.push((w0 & 0x7F) as u8);
            }
            Ok(Some(MidiMessage::from_bytes(bytes, ump.timestamp)))
        }
        0x2 => {
            let status = ((w0 >> 16) & 0xFF) as u8;
            if !is_channel_voice_status(status) {
                return Err(ConvertError::Malformed);
            }
            let mut bytes = vec![status, ((w0 >> 8) & 0x7F) as u8];
            if channel_voice_data_len(status) == 2 {
                bytes.push((w0 & 0x7F) as u8);
            }
            Ok(Some(MidiMessage::from_bytes(bytes, ump.timestamp)))
        }
        0x3 => sysex7_to_midi1(ump, ctx),
        0x4 => midi2_voice_to_midi1(ump).map(Some),
        _ => Err(ConvertError::Unrepresentable),
    }
}

fn sysex7_to_midi1(
    ump: &Ump,
    ctx: &mut UmpToMidi1Context,
) -> Result<Option<MidiMessage>, ConvertError> {
    let w0 = ump[0];
    let w1 = ump[1];
    let status = (w0 >> 20) & 0x0F;
    let count = ((w0 >> 16) & 0x0F) as usize;
    if count > 6 {
        return Err(ConvertError::Malformed);
    }
    let payload = [
        ((w0 >> 8) & 0x7F) as u8,
        (w0 & 0x7F) as u8,
        ((w1 >> 24) & 0x7F) as u8,
        ((w1 >> 16) & 0x7F) as u8,
        ((w1 >> 8) & 0x7F) as u8,
        (w1 & 0x7F) as u8,
    ];
    match status {
        SYSEX_SINGLE | SYSEX_START => {
            // a new start discards any unterminated run
            ctx.sysex.clear();
            ctx.sysex.push(0xF0);
            ctx.sysex.extend_from_slice(&payload[..count]);
            if status == SYSEX_START {
                ctx.in_sysex = true;
                return Ok(None);
            }
        }
        SYSEX_CONTINUE | SYSEX_END => {
            if !ctx.in_sysex {
                return Err(ConvertError::Malformed);
            }
            ctx.sysex.extend_from_slice(&payload[..count]);
            if status == SYSEX_CONTINUE {
                return Ok(None);
            }
            ctx.in_sysex = false;
        }
        _ => return Err(ConvertError::Malformed),
    }
    let mut bytes = std::mem::take(&mut ctx.sysex);
    bytes.push(0xF7);
    Ok(Some(MidiMessage::from_bytes(bytes, ump.timestamp)))
}

fn midi2_voice_to_midi1(ump: &Ump) -> Result<MidiMessage, ConvertError> {
    let w0 = ump[0];
    let w1 = ump[1];
    let opcode = ((w0 >> 20) & 0x0F) as u8;
    let channel = ((w0 >> 16) & 0x0F) as u8;
    let bytes = match opcode {
        // note off / note on with 16-bit velocity
        0x8 | 0x9 => {
            let note = ((w0 >> 8) & 0x7F) as u8;
            let vel16 = (w1 >> 16) as u16;
            let mut vel = scale_velocity_16_to_7(vel16);
            // a nonzero MIDI 2 velocity must stay audible after scaling;
            // zero is preserved (note-off semantics)
            if opcode == 0x9 && vel16 != 0 && vel == 0 {
                vel = 1;
            }
            let status = if opcode == 0x9 { 0x90 } else { 0x80 };
            vec![status | channel, note, vel]
        }
        0xA => {
            let note = ((w0 >> 8) & 0x7F) as u8;
            vec![0xA0 | channel, note, (w1 >> 25) as u8]
        }
        0xB => {
            let index = ((w0 >> 8) & 0x7F) as u8;
            vec![0xB0 | channel, index, (w1 >> 25) as u8]
        }
        0xC => {
            let program = ((w1 >> 24) & 0x7F) as u8;
            vec![0xC0 | channel, program]
        }
        0xD => vec![0xD0 | channel, (w1 >> 25) as u8],
        0xE => {
            let bend14 = (w1 >> 18) as u16;
            vec![
                0xE0 | channel,
                (bend14 & 0x7F) as u8,
                ((bend14 >> 7) & 0x7F) as u8,
            ]
        }
        // per-note controllers, RPN/NRPN with 32-bit data, per-note
        // pitch bend and management have no MIDI 1 analog
        _ => return Err(ConvertError::Unrepresentable),
    };
    Ok(MidiMessage::from_bytes(bytes, ump.timestamp))
}

/// 16-bit → 7-bit velocity, rounding half up.
fn scale_velocity_16_to_7(v: u16) -> u8 {
    (((u32::from(v) + (1 << 8)) >> 9).min(0x7F)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_ump(bytes: &[u8], ctx: &mut Midi1ToUmpContext) -> Vec<Ump> {
        let mut out = Vec::new();
        midi1_to_ump(bytes, 0, ctx, |u| out.push(u)).unwrap();
        out
    }

    #[test]
    fn channel_voice_maps_to_type_2() {
        let mut ctx = Midi1ToUmpContext::new();
        let umps = to_ump(&[0x91, 0x3C, 0x40], &mut ctx);
        assert_eq!(umps.len(), 1);
        assert_eq!(umps[0].words(), &[0x2091_3C40]);
    }

    #[test]
    fn running_status_data_converts_via_context() {
        let mut ctx = Midi1ToUmpContext::new();
        to_ump(&[0x91, 0x3C, 0x40], &mut ctx);
        let umps = to_ump(&[0x3E, 0x40], &mut ctx);
        assert_eq!(umps[0].words(), &[0x2091_3E40]);

        let mut fresh = Midi1ToUmpContext::new();
        assert_eq!(
            midi1_to_ump(&[0x3E, 0x40], 0, &mut fresh, |_| {}),
            Err(ConvertError::Malformed)
        );
    }

    #[test]
    fn realtime_and_system_common_map_to_type_1() {
        let mut ctx = Midi1ToUmpContext::new();
        assert_eq!(to_ump(&[0xF8], &mut ctx)[0].words(), &[0x10F8_0000]);
        assert_eq!(
            to_ump(&[0xF2, 0x10, 0x20], &mut ctx)[0].words(),
            &[0x10F2_1020]
        );
    }

    #[test]
    fn realtime_does_not_clear_running_status() {
        let mut ctx = Midi1ToUmpContext::new();
        to_ump(&[0x91, 0x3C, 0x40], &mut ctx);
        to_ump(&[0xF8], &mut ctx);
        assert_eq!(to_ump(&[0x3E, 0x40], &mut ctx)[0].words(), &[0x2091_3E40]);

        // but system common does
        to_ump(&[0xF6], &mut ctx);
        assert_eq!(
            midi1_to_ump(&[0x3E, 0x40], 0, &mut ctx, |_| {}),
            Err(ConvertError::Malformed)
        );
    }

    #[test]
    fn sysex_chunks_into_six_byte_groups() {
        let mut ctx = Midi1ToUmpContext::new();
        // 8 payload bytes -> start(6) + end(2)
        let umps = to_ump(&[0xF0, 1, 2, 3, 4, 5, 6, 7, 8, 0xF7], &mut ctx);
        assert_eq!(umps.len(), 2);
        assert_eq!(umps[0].words(), &[0x3016_0102, 0x0304_0506]);
        assert_eq!(umps[1].words(), &[0x3032_0708, 0x0000_0000]);

        // short payload -> single packet
        let umps = to_ump(&[0xF0, 0x7E, 0xF7], &mut ctx);
        assert_eq!(umps.len(), 1);
        assert_eq!(umps[0].words(), &[0x3001_7E00, 0x0000_0000]);
    }

    #[test]
    fn sysex_round_trips_through_type_3() {
        let original = {
            let mut bytes = vec![0xF0];
            bytes.extend((0..20u8).map(|b| b & 0x7F));
            bytes.push(0xF7);
            bytes
        };
        let mut enc = Midi1ToUmpContext::new();
        let mut dec = UmpToMidi1Context::new();
        let mut result = None;
        midi1_to_ump(&original, 0, &mut enc, |u| {
            if let Some(msg) = ump_to_midi1(&u, &mut dec).unwrap() {
                result = Some(msg);
            }
        })
        .unwrap();
        assert_eq!(result.unwrap().bytes, original);
    }

    #[test]
    fn channel_voice_round_trips() {
        let cases = [
            MidiMessage::note_on(0, 60, 127),
            MidiMessage::note_off(9, 61, 0),
            MidiMessage::control_change(3, 7, 100),
            MidiMessage::program_change(15, 42),
            MidiMessage::channel_pressure(2, 33),
            MidiMessage::poly_pressure(1, 70, 90),
            MidiMessage::pitch_bend(0, 0x2000),
        ];
        for case in cases {
            let mut enc = Midi1ToUmpContext::new();
            let mut dec = UmpToMidi1Context::new();
            let mut out = None;
            midi1_to_ump(&case.bytes, 0, &mut enc, |u| {
                out = ump_to_midi1(&u, &mut dec).unwrap();
            })
            .unwrap();
            assert_eq!(out.unwrap().bytes, case.bytes);
        }
    }

    #[test]
    fn midi2_note_on_scales_velocity_down() {
        let ump = Ump::from_words(&[0x40913C00, 0xFFFF0000]).unwrap();
        let mut ctx = UmpToMidi1Context::new();
        let msg = ump_to_midi1(&ump, &mut ctx).unwrap().unwrap();
        assert_eq!(msg.bytes, vec![0x91, 0x3C, 0x7F]);
    }

    #[test]
    fn midi2_note_on_small_velocity_clamps_to_one() {
        let ump = Ump::from_words(&[0x40913C00, 0x0001_0000]).unwrap();
        let mut ctx = UmpToMidi1Context::new();
        let msg = ump_to_midi1(&ump, &mut ctx).unwrap().unwrap();
        assert_eq!(msg.bytes, vec![0x91, 0x3C, 0x01]);
    }

    #[test]
    fn midi2_note_on_velocity_zero_is_preserved() {
        let ump = Ump::from_words(&[0x40913C00, 0x0000_0000]).unwrap();
        let mut ctx = UmpToMidi1Context::new();
        let msg = ump_to_midi1(&ump, &mut ctx).unwrap().unwrap();
        assert_eq!(msg.bytes, vec![0x91, 0x3C, 0x00]);
    }

    #[test]
    fn midi2_controller_scales_down() {
        // CC 7 at full scale
        let ump = Ump::from_words(&[0x40B10700, 0xFFFF_FFFF]).unwrap();
        let mut ctx = UmpToMidi1Context::new();
        let msg = ump_to_midi1(&ump, &mut ctx).unwrap().unwrap();
        assert_eq!(msg.bytes, vec![0xB1, 0x07, 0x7F]);
    }

    #[test]
    fn midi2_pitch_bend_scales_to_14_bits() {
        let ump = Ump::from_words(&[0x40E10000, 0x8000_0000]).unwrap();
        let mut ctx = UmpToMidi1Context::new();
        let msg = ump_to_midi1(&ump, &mut ctx).unwrap().unwrap();
        assert_eq!(msg.bytes, vec![0xE1, 0x00, 0x40]);
    }

    #[test]
    fn unmappable_packets_are_unrepresentable() {
        let mut ctx = UmpToMidi1Context::new();
        // registered per-note controller (opcode 0)
        let ump = Ump::from_words(&[0x4001_3C01, 0x1234_5678]).unwrap();
        assert_eq!(
            ump_to_midi1(&ump, &mut ctx),
            Err(ConvertError::Unrepresentable)
        );
        // SysEx8
        let ump = Ump::from_words(&[0x5000_0000, 0, 0, 0]).unwrap();
        assert_eq!(
            ump_to_midi1(&ump, &mut ctx),
            Err(ConvertError::Unrepresentable)
        );
    }

    #[test]
    fn utility_packets_yield_nothing() {
        let mut ctx = UmpToMidi1Context::new();
        let ump = Ump::from_words(&[0x0000_0000]).unwrap();
        assert_eq!(ump_to_midi1(&ump, &mut ctx), Ok(None));
    }
}
