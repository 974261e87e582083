//! Second-generation backend.
//!
//! The sensor presents a single USB function: a command pipe plus two
//! stream endpoints that carry magic-framed container frames (color on
//! one, IR and depth interleaved on the other). A listener thread
//! groups containers into multi-frame sets and delivers them through a
//! bounded(1) channel where a newer set replaces an undrained one;
//! `update()` waits briefly on that channel and decodes on the
//! consumer's thread.

pub mod protocol;

use crate::device::{KinectBackend, KinectDevice};
use crate::types::{
    is_synthetic_serial, parse_synthetic_serial, synthetic_serial, Capabilities, DeviceInfo,
    FrameData, Generation, ProbeResult, StreamKind,
};
use crate::{usb, KinectError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const PROBE_ATTEMPTS: u32 = 4;
const PROBE_RETRY_DELAY: Duration = Duration::from_millis(80);
const SET_WAIT: Duration = Duration::from_millis(1);
const CMD_TIMEOUT: Duration = Duration::from_millis(500);
const STREAM_READ_TIMEOUT: Duration = Duration::from_millis(50);
const RESPONSE_MAX_LEN: usize = 0x200;
const MAX_RESPONSE_READS: usize = 4;

/// Backend for second-generation sensors.
pub struct V2Backend {
    ctx: Option<rusb::Context>,
}

impl V2Backend {
    pub fn new() -> Self {
        let ctx = match usb::create_context() {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                log::warn!("libusb initialization failed: {e}");
                None
            }
        };
        Self { ctx }
    }
}

impl Default for V2Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl KinectBackend for V2Backend {
    fn name(&self) -> &str {
        "Kinect v2 (libusb)"
    }

    fn generation(&self) -> Generation {
        Generation::V2
    }

    fn probe(&mut self) -> ProbeResult {
        let Some(ctx) = &self.ctx else {
            return ProbeResult {
                available: false,
                detail: "USB context initialization failed.".to_string(),
            };
        };
        let count =
            usb::enumerate_with_retries(ctx, protocol::DEVICE_PIDS, PROBE_ATTEMPTS, PROBE_RETRY_DELAY)
                .len();
        let detail = if count == 0 {
            "Backend ready. No Kinect v2 devices are currently attached.".to_string()
        } else {
            format!("{count} Kinect v2 device(s) detected.")
        };
        ProbeResult {
            available: true,
            detail,
        }
    }

    fn list_devices(&mut self) -> Vec<DeviceInfo> {
        let Some(ctx) = &self.ctx else {
            return Vec::new();
        };
        let devices =
            usb::enumerate_with_retries(ctx, protocol::DEVICE_PIDS, PROBE_ATTEMPTS, PROBE_RETRY_DELAY);
        devices
            .iter()
            .enumerate()
            .map(|(index, dev)| {
                let serial = usb::read_serial(dev).unwrap_or_else(|| synthetic_serial(index));
                DeviceInfo {
                    generation: Generation::V2,
                    name: format!("Kinect v2 ({serial})"),
                    serial,
                }
            })
            .collect()
    }

    fn open_device(&mut self, serial: &str) -> Result<Box<dyn KinectDevice>> {
        let ctx = self.ctx.clone().ok_or(KinectError::NoContext)?;
        let devices =
            usb::enumerate_with_retries(&ctx, protocol::DEVICE_PIDS, PROBE_ATTEMPTS, PROBE_RETRY_DELAY);
        if devices.is_empty() {
            return Err(KinectError::DeviceNotFound(serial.to_string()));
        }

        let pos = if is_synthetic_serial(serial) {
            parse_synthetic_serial(serial).filter(|index| *index < devices.len())
        } else {
            devices
                .iter()
                .position(|dev| usb::read_serial(dev).as_deref() == Some(serial))
        };
        let Some(pos) = pos else {
            return Err(KinectError::DeviceNotFound(serial.to_string()));
        };

        let resolved = usb::read_serial(&devices[pos]).unwrap_or_else(|| synthetic_serial(pos));
        let device = V2Device::open(&devices[pos], resolved)?;
        Ok(Box::new(device))
    }
}

/// One raw container frame as it came off the wire, undecoded.
struct RawFrame {
    width: u32,
    height: u32,
    timestamp: u32,
    payload: Vec<u8>,
}

#[derive(Default)]
struct RawFrameSet {
    color: Option<RawFrame>,
    ir: Option<RawFrame>,
    depth: Option<RawFrame>,
}

impl RawFrameSet {
    fn has(&self, kind: protocol::RawKind) -> bool {
        match kind {
            protocol::RawKind::Color => self.color.is_some(),
            protocol::RawKind::Ir => self.ir.is_some(),
            protocol::RawKind::Depth => self.depth.is_some(),
        }
    }

    fn insert(&mut self, kind: protocol::RawKind, frame: RawFrame) {
        match kind {
            protocol::RawKind::Color => self.color = Some(frame),
            protocol::RawKind::Ir => self.ir = Some(frame),
            protocol::RawKind::Depth => self.depth = Some(frame),
        }
    }

    fn is_complete(&self) -> bool {
        self.color.is_some() && self.ir.is_some() && self.depth.is_some()
    }
}

/// Groups per-stream containers into sets. A set is emitted when all
/// three kinds are present, or when a kind repeats, which marks the
/// next capture cycle while some stream went missing.
#[derive(Default)]
struct FrameSetBuilder {
    pending: RawFrameSet,
}

impl FrameSetBuilder {
    fn push(&mut self, kind: protocol::RawKind, frame: RawFrame) -> Option<RawFrameSet> {
        if self.pending.has(kind) {
            let done = std::mem::take(&mut self.pending);
            self.pending.insert(kind, frame);
            return Some(done);
        }
        self.pending.insert(kind, frame);
        if self.pending.is_complete() {
            return Some(std::mem::take(&mut self.pending));
        }
        None
    }
}

/// Decoded output the consumer reads. `update()` and `get_frame()` run
/// on the same thread, so no lock is involved.
#[derive(Default)]
struct Latest {
    frame: FrameData,
    fresh: bool,
}

struct PumpState {
    stop: Arc<AtomicBool>,
    set_rx: Receiver<RawFrameSet>,
    thread: Option<JoinHandle<()>>,
}

/// One opened second-generation sensor.
pub struct V2Device {
    serial: String,
    handle: Option<Arc<rusb::DeviceHandle<rusb::Context>>>,
    latest: Latest,
    pump: Option<PumpState>,
    selected: StreamKind,
    sequence: u32,
}

impl V2Device {
    fn open(dev: &rusb::Device<rusb::Context>, serial: String) -> Result<V2Device> {
        let handle = usb::open_claim(dev, protocol::CONTROL_INTERFACE)?;
        log::info!(
            "Opened Kinect v2 `{serial}` (bus {:03} addr {:03})",
            dev.bus_number(),
            dev.address(),
        );
        let mut device = V2Device {
            serial,
            handle: Some(Arc::new(handle)),
            latest: Latest::default(),
            pump: None,
            selected: StreamKind::Rgb,
            sequence: 0,
        };
        device.log_identity();
        Ok(device)
    }

    /// Round-trips two informational commands so the log carries what
    /// the unit says about itself. Best-effort.
    fn log_identity(&mut self) {
        let Some(handle) = self.handle.clone() else {
            return;
        };
        match self.command(&handle, protocol::CMD_READ_SERIAL, &[]) {
            Ok(resp) => {
                let text = String::from_utf8_lossy(&resp);
                log::debug!("Device reports serial `{}`", text.trim_end_matches('\0'));
            }
            Err(e) => log::debug!("Serial readback unavailable: {e}"),
        }
        match self.command(&handle, protocol::CMD_READ_FIRMWARE_VERSIONS, &[]) {
            Ok(resp) => log::debug!("Firmware version block: {} bytes", resp.len()),
            Err(e) => log::debug!("Firmware readback unavailable: {e}"),
        }
    }

    /// Sends one command and collects response data until the device
    /// acknowledges the sequence number with a completion block.
    fn command(
        &mut self,
        handle: &rusb::DeviceHandle<rusb::Context>,
        command: u32,
        params: &[u32],
    ) -> Result<Vec<u8>> {
        self.sequence = self.sequence.wrapping_add(1);
        let seq = self.sequence;
        let cmd = protocol::build_command(seq, RESPONSE_MAX_LEN as u32, command, params);
        handle.write_bulk(protocol::EP_CMD_OUT, &cmd, CMD_TIMEOUT)?;

        let mut response = Vec::new();
        let mut buf = vec![0u8; RESPONSE_MAX_LEN];
        for _ in 0..MAX_RESPONSE_READS {
            let n = handle.read_bulk(protocol::EP_CMD_IN, &mut buf, CMD_TIMEOUT)?;
            if protocol::parse_completion(&buf[..n], seq) {
                return Ok(response);
            }
            response.extend_from_slice(&buf[..n]);
        }
        Err(KinectError::Protocol(format!(
            "command 0x{command:02x} never completed"
        )))
    }

    /// Converts whichever containers the set carries into the output
    /// frame. Color has its own resolution, so selecting RGB yields a
    /// color-only frame; IR and depth share dimensions and travel
    /// together.
    fn decode_set(&mut self, set: RawFrameSet) {
        let frame = &mut self.latest.frame;
        let mut stored = false;

        match self.selected {
            StreamKind::Rgb => {
                if let Some(raw) = set.color {
                    frame.set_dimensions(raw.width, raw.height);
                    frame.rgb = protocol::bgrx_to_rgb(&raw.payload);
                    frame.timestamp = raw.timestamp;
                    stored = true;
                }
            }
            StreamKind::Ir | StreamKind::Depth => {
                if let Some(raw) = set.depth {
                    frame.set_dimensions(raw.width, raw.height);
                    frame.depth = protocol::depth_f32_to_mm(&raw.payload);
                    frame.timestamp = raw.timestamp;
                    stored = true;
                }
                if let Some(raw) = set.ir {
                    frame.set_dimensions(raw.width, raw.height);
                    frame.ir = protocol::ir_f32_to_u8(&raw.payload);
                    frame.timestamp = raw.timestamp;
                    stored = true;
                }
            }
        }

        if stored {
            self.latest.fresh = true;
        }
    }

    fn join_pump(&mut self) {
        if let Some(mut pump) = self.pump.take() {
            pump.stop.store(true, Ordering::Relaxed);
            if let Some(thread) = pump.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

impl KinectDevice for V2Device {
    fn start(&mut self) -> bool {
        if self.pump.is_some() {
            return true;
        }
        let Some(handle) = self.handle.clone() else {
            return false;
        };

        self.latest = Latest::default();
        if let Err(e) = self.command(&handle, protocol::CMD_INIT_STREAMS, &[]) {
            log::warn!("Stream init failed: {e}");
            return false;
        }
        if let Err(e) = self.command(&handle, protocol::CMD_SET_STREAMING, &[1]) {
            log::warn!("Streaming enable failed: {e}");
            let _ = self.command(&handle, protocol::CMD_STOP, &[]);
            return false;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let (set_tx, set_rx) = crossbeam_channel::bounded::<RawFrameSet>(1);
        let thread = {
            let handle = Arc::clone(&handle);
            let stop = Arc::clone(&stop);
            let displace_rx = set_rx.clone();
            std::thread::Builder::new()
                .name("kinect2-listener".to_string())
                .spawn(move || listener_loop(&handle, &set_tx, &displace_rx, &stop))
        };
        match thread {
            Ok(thread) => {
                self.pump = Some(PumpState {
                    stop,
                    set_rx,
                    thread: Some(thread),
                });
            }
            Err(e) => {
                log::warn!("Listener would not start: {e}");
                let _ = self.command(&handle, protocol::CMD_SET_STREAMING, &[0]);
                let _ = self.command(&handle, protocol::CMD_STOP, &[]);
                return false;
            }
        }

        log::info!("Kinect v2 `{}` streaming", self.serial);
        true
    }

    fn stop(&mut self) -> bool {
        if self.pump.is_none() {
            return true;
        }
        if let Some(handle) = self.handle.clone() {
            if let Err(e) = self.command(&handle, protocol::CMD_SET_STREAMING, &[0]) {
                log::warn!("Streaming disable failed: {e}");
            }
            if let Err(e) = self.command(&handle, protocol::CMD_STOP, &[]) {
                log::warn!("Stop command failed: {e}");
            }
        }
        self.join_pump();
        log::info!("Kinect v2 `{}` stopped", self.serial);
        true
    }

    fn update(&mut self) -> bool {
        let mut listener_gone = false;
        let received = {
            let Some(pump) = &self.pump else {
                return false;
            };
            match pump.set_rx.recv_timeout(SET_WAIT) {
                Ok(set) => Some(set),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => {
                    listener_gone = true;
                    None
                }
            }
        };
        if listener_gone {
            // The listener exited, most likely a device disconnect.
            log::warn!("Listener for `{}` exited; stopping", self.serial);
            self.join_pump();
        }
        if let Some(set) = received {
            self.decode_set(set);
        }
        self.latest.fresh
    }

    fn get_frame(&mut self, out: &mut FrameData) -> bool {
        if !self.latest.fresh {
            return false;
        }
        out.clone_from(&self.latest.frame);
        self.latest.fresh = false;
        true
    }

    fn set_stream_kind(&mut self, kind: StreamKind) {
        self.selected = kind;
    }

    fn stream_kind(&self) -> StreamKind {
        self.selected
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::DEPTH | Capabilities::IR
    }
}

impl Drop for V2Device {
    fn drop(&mut self) {
        self.stop();
    }
}

fn listener_loop(
    handle: &rusb::DeviceHandle<rusb::Context>,
    set_tx: &Sender<RawFrameSet>,
    displace_rx: &Receiver<RawFrameSet>,
    stop: &AtomicBool,
) {
    let mut builder = FrameSetBuilder::default();
    let mut color_buf = vec![0u8; protocol::FRAME_HEADER_LEN + protocol::COLOR_NATIVE_LEN];
    let mut depth_buf = vec![0u8; protocol::FRAME_HEADER_LEN + protocol::DEPTH_NATIVE_LEN];

    while !stop.load(Ordering::Relaxed) {
        for (ep, buf) in [
            (protocol::EP_COLOR_IN, &mut color_buf),
            (protocol::EP_DEPTH_IN, &mut depth_buf),
        ] {
            match handle.read_bulk(ep, buf, STREAM_READ_TIMEOUT) {
                Ok(n) => {
                    if let Some((header, payload)) = parse_container(&buf[..n]) {
                        let frame = RawFrame {
                            width: header.width,
                            height: header.height,
                            timestamp: header.timestamp,
                            payload,
                        };
                        if let Some(set) = builder.push(header.kind, frame) {
                            deliver_set(set_tx, displace_rx, set);
                        }
                    }
                }
                Err(rusb::Error::Timeout) | Err(rusb::Error::Interrupted) => {}
                Err(e) => {
                    log::warn!("Stream read failed: {e}");
                    return;
                }
            }
        }
    }
}

fn parse_container(buf: &[u8]) -> Option<(protocol::RawFrameHeader, Vec<u8>)> {
    let header = protocol::parse_frame_header(buf)?;
    let total = protocol::FRAME_HEADER_LEN + header.payload_len;
    if buf.len() < total {
        log::trace!(
            "Truncated {:?} container ({} of {total} bytes)",
            header.kind,
            buf.len()
        );
        return None;
    }
    let payload = buf[protocol::FRAME_HEADER_LEN..total].to_vec();
    Some((header, payload))
}

/// Latest wins: a full channel has its stale set displaced, not the
/// fresh one dropped.
fn deliver_set(tx: &Sender<RawFrameSet>, rx: &Receiver<RawFrameSet>, set: RawFrameSet) {
    match tx.try_send(set) {
        Ok(()) => {}
        Err(TrySendError::Full(set)) => {
            let _ = rx.try_recv();
            let _ = tx.try_send(set);
        }
        Err(TrySendError::Disconnected(_)) => {}
    }
}
