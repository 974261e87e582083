//! Wire protocol for the second-generation (time-of-flight) sensor.
//!
//! One USB function (045E:02D8, preliminary units 045E:02C4) carries a
//! command channel plus bulk stream endpoints. Commands are 20-byte
//! blocks with a fixed magic; the device acknowledges completion with a
//! separate magic echoing the sequence number. Stream data arrives as
//! container frames holding one native-format image each, which the
//! listener threads group into multi-frame sets.

pub const DEVICE_PIDS: &[u16] = &[0x02d8, 0x02c4];
pub const CONTROL_INTERFACE: u8 = 0;

pub const EP_CMD_OUT: u8 = 0x02;
pub const EP_CMD_IN: u8 = 0x81;
pub const EP_COLOR_IN: u8 = 0x83;
pub const EP_DEPTH_IN: u8 = 0x84;

pub const COLOR_WIDTH: u32 = 1920;
pub const COLOR_HEIGHT: u32 = 1080;
pub const DEPTH_WIDTH: u32 = 512;
pub const DEPTH_HEIGHT: u32 = 424;

/// Native wire bytes per image: color is BGRX, depth and IR are f32.
pub const COLOR_NATIVE_LEN: usize = (COLOR_WIDTH * COLOR_HEIGHT * 4) as usize;
pub const DEPTH_NATIVE_LEN: usize = (DEPTH_WIDTH * DEPTH_HEIGHT * 4) as usize;

const CMD_MAGIC: u32 = 0x0602_2009;
const COMPLETE_MAGIC: u32 = 0x0a6f_e000;

pub const CMD_READ_FIRMWARE_VERSIONS: u32 = 0x02;
pub const CMD_INIT_STREAMS: u32 = 0x09;
pub const CMD_STOP: u32 = 0x0a;
pub const CMD_READ_SERIAL: u32 = 0x22;
pub const CMD_SET_STREAMING: u32 = 0x2b;

/// Builds a 20-byte command block plus u32 LE parameters.
pub fn build_command(sequence: u32, max_response: u32, command: u32, params: &[u32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(20 + params.len() * 4);
    buf.extend_from_slice(&CMD_MAGIC.to_le_bytes());
    buf.extend_from_slice(&sequence.to_le_bytes());
    buf.extend_from_slice(&max_response.to_le_bytes());
    buf.extend_from_slice(&command.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    for param in params {
        buf.extend_from_slice(&param.to_le_bytes());
    }
    buf
}

/// Checks a completion block: magic plus the echoed sequence number.
pub fn parse_completion(buf: &[u8], sequence: u32) -> bool {
    if buf.len() < 8 {
        return false;
    }
    let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let seq = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    magic == COMPLETE_MAGIC && seq == sequence
}

/// Which image a container frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    Color = 0,
    Ir = 1,
    Depth = 2,
}

impl RawKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RawKind::Color),
            1 => Some(RawKind::Ir),
            2 => Some(RawKind::Depth),
            _ => None,
        }
    }
}

pub const FRAME_MAGIC: u32 = 0x4b32_5246;
pub const FRAME_HEADER_LEN: usize = 24;

/// Header of one container frame on a stream endpoint.
#[derive(Debug, Clone, Copy)]
pub struct RawFrameHeader {
    pub kind: RawKind,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
    /// Device clock, milliseconds.
    pub timestamp: u32,
    pub payload_len: usize,
}

pub fn build_frame_header(header: &RawFrameHeader) -> [u8; FRAME_HEADER_LEN] {
    let mut buf = [0u8; FRAME_HEADER_LEN];
    buf[0..4].copy_from_slice(&FRAME_MAGIC.to_le_bytes());
    buf[4] = header.kind as u8;
    buf[8..10].copy_from_slice(&(header.width as u16).to_le_bytes());
    buf[10..12].copy_from_slice(&(header.height as u16).to_le_bytes());
    buf[12..16].copy_from_slice(&header.sequence.to_le_bytes());
    buf[16..20].copy_from_slice(&header.timestamp.to_le_bytes());
    buf[20..24].copy_from_slice(&(header.payload_len as u32).to_le_bytes());
    buf
}

pub fn parse_frame_header(buf: &[u8]) -> Option<RawFrameHeader> {
    if buf.len() < FRAME_HEADER_LEN {
        return None;
    }
    let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if magic != FRAME_MAGIC {
        return None;
    }
    Some(RawFrameHeader {
        kind: RawKind::from_u8(buf[4])?,
        width: u32::from(u16::from_le_bytes([buf[8], buf[9]])),
        height: u32::from(u16::from_le_bytes([buf[10], buf[11]])),
        sequence: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
        timestamp: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
        payload_len: u32::from_le_bytes([buf[20], buf[21], buf[22], buf[23]]) as usize,
    })
}

/// 4-byte BGRX pixels to packed RGB.
pub fn bgrx_to_rgb(bgrx: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(bgrx.len() / 4 * 3);
    for px in bgrx.chunks_exact(4) {
        rgb.push(px[2]);
        rgb.push(px[1]);
        rgb.push(px[0]);
    }
    rgb
}

/// f32 LE millimeter samples to u16 millimeters, clamped to the u16
/// range. Non-finite samples become 0 (invalid).
pub fn depth_f32_to_mm(wire: &[u8]) -> Vec<u16> {
    wire.chunks_exact(4)
        .map(|c| {
            let v = f32::from_le_bytes([c[0], c[1], c[2], c[3]]);
            if !v.is_finite() || v < 0.0 {
                0
            } else if v > 65535.0 {
                65535
            } else {
                v as u16
            }
        })
        .collect()
}

/// f32 LE IR samples (0..65535) normalized to u8.
pub fn ir_f32_to_u8(wire: &[u8]) -> Vec<u8> {
    wire.chunks_exact(4)
        .map(|c| {
            let v = f32::from_le_bytes([c[0], c[1], c[2], c[3]]);
            if !v.is_finite() || v < 0.0 {
                return 0;
            }
            let scaled = v / 65535.0 * 255.0;
            if scaled > 255.0 {
                255
            } else {
                scaled as u8
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_block_layout() {
        let cmd = build_command(3, 0, CMD_SET_STREAMING, &[1]);
        assert_eq!(cmd.len(), 24);
        assert_eq!(&cmd[0..4], &[0x09, 0x20, 0x02, 0x06]);
        assert_eq!(&cmd[4..8], &[0x03, 0x00, 0x00, 0x00]);
        assert_eq!(&cmd[12..16], &[0x2b, 0x00, 0x00, 0x00]);
        assert_eq!(&cmd[20..24], &[0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn completion_checks_magic_and_sequence() {
        let mut ack = Vec::new();
        ack.extend_from_slice(&COMPLETE_MAGIC.to_le_bytes());
        ack.extend_from_slice(&3u32.to_le_bytes());
        assert!(parse_completion(&ack, 3));
        assert!(!parse_completion(&ack, 4));
        assert!(!parse_completion(&ack[..7], 3));
    }

    #[test]
    fn frame_header_round_trip() {
        let header = RawFrameHeader {
            kind: RawKind::Depth,
            width: DEPTH_WIDTH,
            height: DEPTH_HEIGHT,
            sequence: 88,
            timestamp: 123_456,
            payload_len: DEPTH_NATIVE_LEN,
        };
        let wire = build_frame_header(&header);
        let parsed = parse_frame_header(&wire).unwrap();
        assert_eq!(parsed.kind, RawKind::Depth);
        assert_eq!(parsed.width, 512);
        assert_eq!(parsed.height, 424);
        assert_eq!(parsed.sequence, 88);
        assert_eq!(parsed.timestamp, 123_456);
        assert_eq!(parsed.payload_len, DEPTH_NATIVE_LEN);

        let mut bad = wire;
        bad[0] ^= 0xff;
        assert!(parse_frame_header(&bad).is_none());
        assert!(parse_frame_header(&wire[..10]).is_none());
    }

    #[test]
    fn unknown_frame_kind_is_rejected() {
        let mut wire = build_frame_header(&RawFrameHeader {
            kind: RawKind::Color,
            width: 4,
            height: 4,
            sequence: 0,
            timestamp: 0,
            payload_len: 64,
        });
        wire[4] = 9;
        assert!(parse_frame_header(&wire).is_none());
    }

    #[test]
    fn bgrx_drops_the_filler_byte() {
        let wire = [10, 20, 30, 99, 40, 50, 60, 99];
        assert_eq!(bgrx_to_rgb(&wire), vec![30, 20, 10, 60, 50, 40]);
    }

    #[test]
    fn depth_conversion_clamps_to_u16() {
        let mut wire = Vec::new();
        for v in [-5.0f32, 0.0, 1000.7, 70000.0, f32::NAN] {
            wire.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(depth_f32_to_mm(&wire), vec![0, 0, 1000, 65535, 0]);
    }

    #[test]
    fn ir_conversion_normalizes_full_scale() {
        let mut wire = Vec::new();
        for v in [0.0f32, 65535.0, 32767.5, -1.0, 1.0e9] {
            wire.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(ir_f32_to_u8(&wire), vec![0, 255, 127, 0, 255]);
    }
}
