//! Wire protocol for the first-generation sensor.
//!
//! The unit enumerates as three USB functions: camera (045E:02AE, K4W
//! 045E:02BF), motor (045E:02B0) and audio (045E:02AD, K4W 045E:02BE).
//! Camera configuration runs over vendor control transfers carrying
//! `GM`-tagged command blocks answered with `RB`-tagged replies; the
//! streams themselves arrive on bulk endpoints as `RB`-tagged packets
//! that this module reassembles into frames.

/// Camera product ids (Xbox and Kinect-for-Windows variants).
pub const CAMERA_PIDS: &[u16] = &[0x02ae, 0x02bf];
/// Motor/accelerometer product id.
pub const MOTOR_PID: u16 = 0x02b0;
/// Audio product ids (bootloader state, before firmware upload).
pub const AUDIO_PIDS: &[u16] = &[0x02ad, 0x02be];

pub const CAMERA_INTERFACE: u8 = 0;
pub const MOTOR_INTERFACE: u8 = 0;
pub const AUDIO_INTERFACE: u8 = 0;

pub const EP_VIDEO_IN: u8 = 0x81;
pub const EP_DEPTH_IN: u8 = 0x82;
pub const EP_BOOT_OUT: u8 = 0x01;
pub const EP_BOOT_IN: u8 = 0x81;
pub const EP_MIC_IN: u8 = 0x82;

/// Vendor control transfer request types.
pub const CTRL_OUT: u8 = 0x40;
pub const CTRL_IN: u8 = 0xc0;

pub const FRAME_WIDTH: u32 = 640;
pub const FRAME_HEIGHT: u32 = 480;
const FRAME_PIXELS: usize = (FRAME_WIDTH * FRAME_HEIGHT) as usize;

/// Wire bytes of one Bayer video frame.
pub const VIDEO_BAYER_LEN: usize = FRAME_PIXELS;
/// Wire bytes of one 8-bit IR frame.
pub const VIDEO_IR_LEN: usize = FRAME_PIXELS;
/// Wire bytes of one 11-bit packed depth frame.
pub const DEPTH_PACKED_LEN: usize = FRAME_PIXELS * 11 / 8;

// Camera command block: "GM" magic, u16 LE payload length in words,
// u16 LE command, u16 LE tag echoed by the reply.
const CMD_MAGIC: [u8; 2] = [0x47, 0x4d];
const REPLY_MAGIC: [u8; 2] = [0x52, 0x42];
pub const CMD_WRITE_REGISTER: u16 = 0x03;

// Camera register map.
pub const REG_VIDEO_STREAM: u16 = 0x05;
pub const REG_DEPTH_STREAM: u16 = 0x06;
pub const REG_VIDEO_FORMAT: u16 = 0x0c;
pub const REG_VIDEO_RES: u16 = 0x0d;
pub const REG_VIDEO_FPS: u16 = 0x0e;
pub const REG_DEPTH_FORMAT: u16 = 0x12;
pub const REG_DEPTH_RES: u16 = 0x13;
pub const REG_DEPTH_FPS: u16 = 0x14;
pub const REG_IR_BRIGHTNESS: u16 = 0x15;
pub const REG_DEPTH_MIRROR: u16 = 0x17;
pub const REG_VIDEO_MIRROR: u16 = 0x47;
/// Bitfield register for automatic camera behaviors.
pub const REG_CAM_FLAGS: u16 = 0x0106;
/// Manual color exposure, in 100 us units.
pub const REG_EXPOSURE: u16 = 0x0107;

pub const FLAG_AUTO_WHITE_BALANCE: u16 = 1 << 1;
pub const FLAG_NEAR_MODE: u16 = 1 << 6;
pub const FLAG_AUTO_EXPOSURE: u16 = 1 << 14;
/// Mains flicker avoidance; the sensor expects it toggled together
/// with auto exposure.
pub const FLAG_AUTO_FLICKER: u16 = 1 << 15;

pub const STREAM_STOP: u16 = 0x00;
pub const VIDEO_STREAM_START: u16 = 0x01;
pub const DEPTH_STREAM_START: u16 = 0x02;
pub const VIDEO_FMT_BAYER: u16 = 0x00;
pub const VIDEO_FMT_IR_8BIT: u16 = 0x01;
pub const DEPTH_FMT_11BIT: u16 = 0x03;
pub const RES_MEDIUM: u16 = 0x01;
pub const FPS_30: u16 = 0x1e;

/// Motor vendor requests.
pub const REQ_TILT: u8 = 0x31;
pub const REQ_LED: u8 = 0x06;

pub const TILT_MIN_DEG: i32 = -30;
pub const TILT_MAX_DEG: i32 = 30;
pub const LED_MIN: i32 = 0;
pub const LED_MAX: i32 = 6;
pub const EXPOSURE_MIN_US: i32 = 1_000;
pub const EXPOSURE_MAX_US: i32 = 200_000;
pub const IR_BRIGHTNESS_MIN: i32 = 1;
pub const IR_BRIGHTNESS_MAX: i32 = 50;

/// Builds a camera command block for a vendor control transfer.
pub fn build_camera_command(command: u16, tag: u16, data: &[u16]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + data.len() * 2);
    buf.extend_from_slice(&CMD_MAGIC);
    buf.extend_from_slice(&(data.len() as u16).to_le_bytes());
    buf.extend_from_slice(&command.to_le_bytes());
    buf.extend_from_slice(&tag.to_le_bytes());
    for word in data {
        buf.extend_from_slice(&word.to_le_bytes());
    }
    buf
}

pub fn build_register_write(tag: u16, register: u16, value: u16) -> Vec<u8> {
    build_camera_command(CMD_WRITE_REGISTER, tag, &[register, value])
}

/// Parses a camera reply block, checking magic and tag echo. Returns
/// the payload words.
pub fn parse_camera_reply(buf: &[u8], expected_tag: u16) -> Option<Vec<u16>> {
    if buf.len() < 8 || buf[0..2] != REPLY_MAGIC {
        return None;
    }
    let tag = u16::from_le_bytes([buf[6], buf[7]]);
    if tag != expected_tag {
        return None;
    }
    let words = buf[8..]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    Some(words)
}

/// Video format register value and wire frame length for a channel.
pub fn video_format_for(ir: bool) -> (u16, usize) {
    if ir {
        (VIDEO_FMT_IR_8BIT, VIDEO_IR_LEN)
    } else {
        (VIDEO_FMT_BAYER, VIDEO_BAYER_LEN)
    }
}

/// Motor tilt `wValue`: half-degree units, clamped to the physical
/// travel of the head.
pub fn tilt_request(angle_deg: i32) -> u16 {
    let clamped = angle_deg.clamp(TILT_MIN_DEG, TILT_MAX_DEG);
    (clamped as i16 * 2) as u16
}

/// LED pattern `wValue`, clamped to the defined pattern range.
pub fn led_request(option: i32) -> u16 {
    option.clamp(LED_MIN, LED_MAX) as u16
}

/// Register write for manual color exposure, clamping microseconds to
/// the supported range before converting to the 100 us register unit.
pub fn exposure_command(exposure_us: i32) -> (u16, u16) {
    let clamped = exposure_us.clamp(EXPOSURE_MIN_US, EXPOSURE_MAX_US);
    (REG_EXPOSURE, (clamped / 100) as u16)
}

/// Register write for IR projector brightness, clamped to [1, 50].
pub fn ir_brightness_command(level: i32) -> (u16, u16) {
    let clamped = level.clamp(IR_BRIGHTNESS_MIN, IR_BRIGHTNESS_MAX);
    (REG_IR_BRIGHTNESS, clamped as u16)
}

/// Stream packet phase, from the low nibble of the header flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketPhase {
    Start,
    Mid,
    End,
}

/// 12-byte header on every bulk stream packet.
#[derive(Debug, Clone, Copy)]
pub struct PacketHeader {
    pub phase: PacketPhase,
    pub seq: u8,
    pub timestamp: u32,
}

pub const PACKET_HEADER_LEN: usize = 12;

/// Parses a stream packet header. `None` for runt packets, bad magic
/// or an unknown phase nibble.
pub fn parse_packet_header(buf: &[u8]) -> Option<PacketHeader> {
    if buf.len() < PACKET_HEADER_LEN || buf[0..2] != REPLY_MAGIC {
        return None;
    }
    let phase = match buf[3] & 0x0f {
        0x1 => PacketPhase::Start,
        0x2 => PacketPhase::Mid,
        0x5 => PacketPhase::End,
        _ => return None,
    };
    Some(PacketHeader {
        phase,
        seq: buf[5],
        timestamp: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
    })
}

/// Reassembles bulk stream packets into complete frames.
///
/// A frame runs from a Start packet through Mid packets to an End
/// packet with consecutive sequence bytes. Any gap, oversize payload or
/// short final frame drops the partial frame; the stream resynchronizes
/// on the next Start.
pub struct FrameAssembler {
    expected_len: usize,
    buf: Vec<u8>,
    seq: u8,
    in_frame: bool,
    dropped: u64,
}

impl FrameAssembler {
    pub fn new(expected_len: usize) -> Self {
        Self {
            expected_len,
            buf: Vec::with_capacity(expected_len),
            seq: 0,
            in_frame: false,
            dropped: 0,
        }
    }

    /// Switches the expected frame length (video format change),
    /// discarding any partial frame.
    pub fn set_expected_len(&mut self, expected_len: usize) {
        if self.expected_len != expected_len {
            self.expected_len = expected_len;
            self.abandon();
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn abandon(&mut self) {
        if self.in_frame {
            self.dropped += 1;
        }
        self.buf.clear();
        self.in_frame = false;
    }

    /// Feeds one bulk packet. Returns a completed frame payload and its
    /// device timestamp when this packet finished a frame.
    pub fn push(&mut self, packet: &[u8]) -> Option<(Vec<u8>, u32)> {
        let header = parse_packet_header(packet)?;
        let payload = &packet[PACKET_HEADER_LEN..];

        match header.phase {
            PacketPhase::Start => {
                if self.in_frame {
                    self.dropped += 1;
                    log::trace!("Frame restarted mid-assembly, dropping partial");
                }
                self.buf.clear();
                self.buf.extend_from_slice(payload);
                self.seq = header.seq;
                self.in_frame = true;
                None
            }
            PacketPhase::Mid | PacketPhase::End => {
                if !self.in_frame {
                    return None;
                }
                let expected_seq = self.seq.wrapping_add(1);
                if header.seq != expected_seq {
                    log::trace!(
                        "Sequence gap (got {}, expected {}), dropping frame",
                        header.seq,
                        expected_seq
                    );
                    self.abandon();
                    return None;
                }
                self.seq = header.seq;

                if self.buf.len() + payload.len() > self.expected_len {
                    log::trace!("Oversize frame, dropping");
                    self.abandon();
                    return None;
                }
                self.buf.extend_from_slice(payload);

                if header.phase == PacketPhase::Mid {
                    return None;
                }
                self.in_frame = false;
                if self.buf.len() != self.expected_len {
                    log::trace!(
                        "Short frame ({} of {} bytes), dropping",
                        self.buf.len(),
                        self.expected_len
                    );
                    self.dropped += 1;
                    self.buf.clear();
                    return None;
                }
                Some((std::mem::take(&mut self.buf), header.timestamp))
            }
        }
    }
}

/// Unpacks big-endian 11-bit samples into u16 values. Stops early if
/// the packed buffer runs out.
pub fn unpack_depth_11bit(packed: &[u8], pixels: usize) -> Vec<u16> {
    let mut out = Vec::with_capacity(pixels);
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let mut bytes = packed.iter();
    while out.len() < pixels {
        while bits < 11 {
            match bytes.next() {
                Some(&b) => {
                    acc = (acc << 8) | u32::from(b);
                    bits += 8;
                }
                None => return out,
            }
        }
        bits -= 11;
        out.push(((acc >> bits) & 0x7ff) as u16);
    }
    out
}

// Disparity values at and past the tangent pole carry no measurement.
const DISPARITY_NO_RETURN: u16 = 0x7ff;
const DISPARITY_LIMIT: u16 = 1092;

/// Converts a raw 11-bit disparity sample to millimeters, 0 when the
/// sample carries no measurement.
pub fn disparity_to_mm(raw: u16) -> u16 {
    if raw >= DISPARITY_LIMIT || raw == DISPARITY_NO_RETURN {
        return 0;
    }
    let meters = 0.1236 * (f64::from(raw) / 2842.5 + 1.1863).tan();
    let mm = meters * 1000.0;
    if !mm.is_finite() || mm <= 0.0 {
        return 0;
    }
    mm.min(f64::from(u16::MAX)).round() as u16
}

/// Converts one packed 11-bit depth frame to row-major millimeters.
pub fn depth_frame_to_mm(packed: &[u8]) -> Vec<u16> {
    unpack_depth_11bit(packed, FRAME_PIXELS)
        .into_iter()
        .map(disparity_to_mm)
        .collect()
}

/// Nearest-neighbor-with-averaging demosaic of the sensor's GRBG Bayer
/// mosaic into packed RGB.
pub fn demosaic_grbg(src: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut out = vec![0u8; width * height * 3];
    let at = |x: isize, y: isize| -> u16 {
        let x = x.clamp(0, width as isize - 1) as usize;
        let y = y.clamp(0, height as isize - 1) as usize;
        u16::from(src[y * width + x])
    };

    for y in 0..height {
        for x in 0..width {
            let (xi, yi) = (x as isize, y as isize);
            let (r, g, b) = match (y % 2 == 0, x % 2 == 0) {
                // Green site on a green/red row.
                (true, true) => (
                    (at(xi - 1, yi) + at(xi + 1, yi)) / 2,
                    at(xi, yi),
                    (at(xi, yi - 1) + at(xi, yi + 1)) / 2,
                ),
                // Red site.
                (true, false) => (
                    at(xi, yi),
                    (at(xi - 1, yi) + at(xi + 1, yi) + at(xi, yi - 1) + at(xi, yi + 1)) / 4,
                    (at(xi - 1, yi - 1)
                        + at(xi + 1, yi - 1)
                        + at(xi - 1, yi + 1)
                        + at(xi + 1, yi + 1))
                        / 4,
                ),
                // Blue site.
                (false, true) => (
                    (at(xi - 1, yi - 1)
                        + at(xi + 1, yi - 1)
                        + at(xi - 1, yi + 1)
                        + at(xi + 1, yi + 1))
                        / 4,
                    (at(xi - 1, yi) + at(xi + 1, yi) + at(xi, yi - 1) + at(xi, yi + 1)) / 4,
                    at(xi, yi),
                ),
                // Green site on a blue/green row.
                (false, false) => (
                    (at(xi, yi - 1) + at(xi, yi + 1)) / 2,
                    at(xi, yi),
                    (at(xi - 1, yi) + at(xi + 1, yi)) / 2,
                ),
            };
            let base = (y * width + x) * 3;
            out[base] = r as u8;
            out[base + 1] = g as u8;
            out[base + 2] = b as u8;
        }
    }
    out
}

// Audio bootloader blocks: u32 LE magic/tag/byte-count/command/address
// + one reserved word, followed by up to one page of payload.
pub const BOOT_MAGIC: u32 = 0x0602_2009;
pub const BOOT_CMD_WRITE: u32 = 0x03;
pub const BOOT_CMD_RUN: u32 = 0x04;
pub const FIRMWARE_BASE_ADDR: u32 = 0x0008_0000;
pub const BOOT_PAGE_LEN: usize = 512;
pub const BOOT_HEADER_LEN: usize = 24;

pub fn build_boot_command(tag: u32, payload_len: u32, command: u32, addr: u32) -> [u8; 24] {
    let mut buf = [0u8; BOOT_HEADER_LEN];
    buf[0..4].copy_from_slice(&BOOT_MAGIC.to_le_bytes());
    buf[4..8].copy_from_slice(&tag.to_le_bytes());
    buf[8..12].copy_from_slice(&payload_len.to_le_bytes());
    buf[12..16].copy_from_slice(&command.to_le_bytes());
    buf[16..20].copy_from_slice(&addr.to_le_bytes());
    buf
}

/// Checks a 12-byte bootloader status block: magic, tag echo, zero
/// status word.
pub fn parse_boot_status(buf: &[u8], expected_tag: u32) -> bool {
    if buf.len() < 12 {
        return false;
    }
    let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let tag = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let status = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
    magic == BOOT_MAGIC && tag == expected_tag && status == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(flag: u8, seq: u8, timestamp: u32, payload: &[u8]) -> Vec<u8> {
        let mut p = vec![0x52, 0x42, 0x00, flag, 0x00, seq, 0x00, 0x00];
        p.extend_from_slice(&timestamp.to_le_bytes());
        p.extend_from_slice(payload);
        p
    }

    #[test]
    fn camera_command_layout() {
        let cmd = build_register_write(0x1234, REG_DEPTH_STREAM, DEPTH_STREAM_START);
        assert_eq!(
            cmd,
            vec![
                0x47, 0x4d, // magic
                0x02, 0x00, // two payload words
                0x03, 0x00, // write register
                0x34, 0x12, // tag
                0x06, 0x00, // register
                0x02, 0x00, // value
            ]
        );
    }

    #[test]
    fn camera_reply_checks_magic_and_tag() {
        let reply = [0x52, 0x42, 0x01, 0x00, 0x03, 0x00, 0x34, 0x12, 0x00, 0x00];
        assert_eq!(parse_camera_reply(&reply, 0x1234), Some(vec![0x0000]));
        assert_eq!(parse_camera_reply(&reply, 0x9999), None);
        assert_eq!(parse_camera_reply(&reply[..6], 0x1234), None);
        let bad = [0x47, 0x4d, 0x01, 0x00, 0x03, 0x00, 0x34, 0x12];
        assert_eq!(parse_camera_reply(&bad, 0x1234), None);
    }

    #[test]
    fn packet_header_parses_phase_and_timestamp() {
        let p = packet(0x71, 9, 0xdeadbeef, &[1, 2, 3]);
        let hdr = parse_packet_header(&p).unwrap();
        assert_eq!(hdr.phase, PacketPhase::Start);
        assert_eq!(hdr.seq, 9);
        assert_eq!(hdr.timestamp, 0xdeadbeef);

        assert!(parse_packet_header(&packet(0x82, 0, 0, &[])).is_some());
        assert!(parse_packet_header(&packet(0x85, 0, 0, &[])).is_some());
        assert!(parse_packet_header(&packet(0x73, 0, 0, &[])).is_none());
        assert!(parse_packet_header(&[0x52, 0x42, 0, 0x71]).is_none());
        let mut bad = packet(0x71, 0, 0, &[]);
        bad[0] = 0x00;
        assert!(parse_packet_header(&bad).is_none());
    }

    #[test]
    fn assembler_completes_a_frame_across_packets() {
        let mut asm = FrameAssembler::new(6);
        assert!(asm.push(&packet(0x81, 0, 10, &[1, 2])).is_none());
        assert!(asm.push(&packet(0x82, 1, 11, &[3, 4])).is_none());
        let (frame, ts) = asm.push(&packet(0x85, 2, 12, &[5, 6])).unwrap();
        assert_eq!(frame, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(ts, 12);
        assert_eq!(asm.dropped(), 0);
    }

    #[test]
    fn assembler_drops_on_sequence_gap() {
        let mut asm = FrameAssembler::new(4);
        assert!(asm.push(&packet(0x71, 5, 0, &[1, 2])).is_none());
        // Sequence 7 skips 6.
        assert!(asm.push(&packet(0x75, 7, 0, &[3, 4])).is_none());
        assert_eq!(asm.dropped(), 1);

        // Recovers on the next start.
        assert!(asm.push(&packet(0x71, 20, 0, &[9, 9])).is_none());
        let (frame, _) = asm.push(&packet(0x75, 21, 0, &[8, 8])).unwrap();
        assert_eq!(frame, vec![9, 9, 8, 8]);
    }

    #[test]
    fn assembler_drops_wrong_size_frames() {
        let mut asm = FrameAssembler::new(4);
        asm.push(&packet(0x71, 0, 0, &[1]));
        assert!(asm.push(&packet(0x75, 1, 0, &[2])).is_none());
        assert_eq!(asm.dropped(), 1);

        // Oversize payload is abandoned immediately.
        asm.push(&packet(0x71, 0, 0, &[1, 2, 3]));
        assert!(asm.push(&packet(0x75, 1, 0, &[4, 5, 6])).is_none());
        assert_eq!(asm.dropped(), 2);

        // Mid packet without a start is ignored.
        assert!(asm.push(&packet(0x72, 3, 0, &[1])).is_none());
    }

    #[test]
    fn eleven_bit_unpack() {
        assert_eq!(unpack_depth_11bit(&[0xff, 0xe0], 1), vec![0x7ff]);
        assert_eq!(unpack_depth_11bit(&[0x80, 0x0f, 0xfc], 2), vec![1024, 1023]);
        // Short buffer yields fewer samples.
        assert_eq!(unpack_depth_11bit(&[0xff], 2), Vec::<u16>::new());
    }

    #[test]
    fn disparity_conversion_is_monotonic_and_bounded() {
        assert_eq!(disparity_to_mm(DISPARITY_NO_RETURN), 0);
        assert_eq!(disparity_to_mm(2000), 0);

        let near = disparity_to_mm(300);
        let mid = disparity_to_mm(743);
        let far = disparity_to_mm(1000);
        assert!(near < mid && mid < far);
        // Raw 743 sits almost exactly at one meter.
        assert!((990..=1010).contains(&mid), "got {mid}");
    }

    #[test]
    fn demosaic_recovers_uniform_and_primary_scenes() {
        let gray = vec![128u8; 4 * 4];
        let rgb = demosaic_grbg(&gray, 4, 4);
        assert!(rgb.iter().all(|&v| v == 128));

        // Light only on red sites (even rows, odd columns).
        let mut red = vec![0u8; 4 * 4];
        for y in (0..4).step_by(2) {
            for x in (1..4).step_by(2) {
                red[y * 4 + x] = 255;
            }
        }
        let rgb = demosaic_grbg(&red, 4, 4);
        let at = |x: usize, y: usize| {
            let base = (y * 4 + x) * 3;
            [rgb[base], rgb[base + 1], rgb[base + 2]]
        };
        // Interior pixels, where no edge clamping skews the averages.
        assert_eq!(at(1, 2), [255, 0, 0]);
        assert_eq!(at(1, 1), [255, 0, 0]);
    }

    #[test]
    fn tilt_and_led_requests_clamp() {
        assert_eq!(tilt_request(15), 30);
        assert_eq!(tilt_request(45), 60);
        assert_eq!(tilt_request(-45), (-60i16) as u16);
        assert_eq!(led_request(-3), 0);
        assert_eq!(led_request(9), 6);
        assert_eq!(led_request(4), 4);
    }

    #[test]
    fn exposure_and_brightness_commands_clamp() {
        assert_eq!(exposure_command(500), (REG_EXPOSURE, 10));
        assert_eq!(exposure_command(1_000_000), (REG_EXPOSURE, 2000));
        assert_eq!(exposure_command(33_000), (REG_EXPOSURE, 330));
        assert_eq!(ir_brightness_command(0), (REG_IR_BRIGHTNESS, 1));
        assert_eq!(ir_brightness_command(99), (REG_IR_BRIGHTNESS, 50));
    }

    #[test]
    fn boot_command_layout() {
        let cmd = build_boot_command(7, 512, BOOT_CMD_WRITE, FIRMWARE_BASE_ADDR);
        assert_eq!(&cmd[0..4], &[0x09, 0x20, 0x02, 0x06]);
        assert_eq!(&cmd[4..8], &[0x07, 0x00, 0x00, 0x00]);
        assert_eq!(&cmd[8..12], &[0x00, 0x02, 0x00, 0x00]);
        assert_eq!(&cmd[12..16], &[0x03, 0x00, 0x00, 0x00]);
        assert_eq!(&cmd[16..20], &[0x00, 0x00, 0x08, 0x00]);
        assert_eq!(&cmd[20..24], &[0x00; 4]);
    }

    #[test]
    fn boot_status_requires_magic_tag_and_zero() {
        let mut status = Vec::new();
        status.extend_from_slice(&BOOT_MAGIC.to_le_bytes());
        status.extend_from_slice(&7u32.to_le_bytes());
        status.extend_from_slice(&0u32.to_le_bytes());
        assert!(parse_boot_status(&status, 7));
        assert!(!parse_boot_status(&status, 8));
        status[8] = 1;
        assert!(!parse_boot_status(&status, 7));
        assert!(!parse_boot_status(&status[..8], 7));
    }
}
