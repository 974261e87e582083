//! First-generation backend.
//!
//! The unit is three USB functions (camera, motor, audio). Camera
//! streams are started by register writes and then pushed by the device
//! over bulk endpoints; reader threads reassemble the packets and hand
//! completed frames to the consumer through a mutex-guarded slot. The
//! audio function boots into a DSP loader and needs a firmware upload
//! before it produces microphone data.

pub mod firmware;
pub mod protocol;

use crate::device::{KinectBackend, KinectDevice};
use crate::slot::FrameSlot;
use crate::types::{
    is_synthetic_serial, parse_synthetic_serial, synthetic_serial, Capabilities, DeviceInfo,
    FrameData, Generation, ProbeResult, StreamKind,
};
use crate::{usb, KinectError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const PROBE_ATTEMPTS: u32 = 4;
const PROBE_RETRY_DELAY: Duration = Duration::from_millis(80);
const OPEN_ATTEMPTS: u32 = 6;
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(250);
const UPDATE_WAIT: Duration = Duration::from_millis(2);
const CMD_TIMEOUT: Duration = Duration::from_millis(200);
const STREAM_READ_TIMEOUT: Duration = Duration::from_millis(100);
const BOOT_TIMEOUT: Duration = Duration::from_millis(500);
const REENUMERATE_DELAY: Duration = Duration::from_millis(800);
const STREAM_READ_LEN: usize = 0x4000;

/// Backend for first-generation sensors.
pub struct V1Backend {
    ctx: Option<rusb::Context>,
    firmware: Option<PathBuf>,
}

impl V1Backend {
    /// Never fails; a backend without a USB context reports itself
    /// unavailable from `probe`. The audio firmware is located once
    /// here and the result cached for every device opened later.
    pub fn new() -> Self {
        let ctx = match usb::create_context() {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                log::warn!("libusb initialization failed: {e}");
                None
            }
        };
        let firmware = firmware::locate();
        Self { ctx, firmware }
    }

    fn try_open(&self, ctx: &rusb::Context, serial: &str) -> Result<V1Device> {
        let cameras = usb::matching_devices(ctx, protocol::CAMERA_PIDS)?;
        if cameras.is_empty() {
            return Err(KinectError::DeviceNotFound(serial.to_string()));
        }

        // Candidate positions in strategy order: exact serial match,
        // then the index encoded in a synthetic serial, then every
        // remaining position.
        let mut candidates: Vec<usize> = Vec::new();
        if is_synthetic_serial(serial) {
            if let Some(index) = parse_synthetic_serial(serial) {
                if index < cameras.len() {
                    candidates.push(index);
                }
            }
        } else if let Some(pos) = cameras
            .iter()
            .position(|cam| usb::read_serial(cam).as_deref() == Some(serial))
        {
            candidates.push(pos);
        }
        for pos in 0..cameras.len() {
            if !candidates.contains(&pos) {
                candidates.push(pos);
            }
        }

        let mut last_err = KinectError::DeviceNotFound(serial.to_string());
        for pos in candidates {
            match V1Device::open(ctx, &cameras[pos], pos, self.firmware.clone()) {
                Ok(device) => return Ok(device),
                Err(e) => {
                    log::warn!("Camera at position {pos} would not open: {e}");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

impl Default for V1Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl KinectBackend for V1Backend {
    fn name(&self) -> &str {
        "Kinect v1 (libusb)"
    }

    fn generation(&self) -> Generation {
        Generation::V1
    }

    fn probe(&mut self) -> ProbeResult {
        let Some(ctx) = &self.ctx else {
            return ProbeResult {
                available: false,
                detail: "USB context initialization failed.".to_string(),
            };
        };

        let count =
            usb::enumerate_with_retries(ctx, protocol::CAMERA_PIDS, PROBE_ATTEMPTS, PROBE_RETRY_DELAY)
                .len();
        let mut detail = if count == 0 {
            "Backend ready. No Kinect v1 devices are currently attached.".to_string()
        } else {
            format!("{count} Kinect v1 device(s) detected.")
        };
        if count > 0 && self.firmware.is_none() {
            detail.push_str(" Audio input disabled: firmware not found.");
        }
        ProbeResult {
            available: true,
            detail,
        }
    }

    fn list_devices(&mut self) -> Vec<DeviceInfo> {
        let Some(ctx) = &self.ctx else {
            return Vec::new();
        };
        let cameras =
            usb::enumerate_with_retries(ctx, protocol::CAMERA_PIDS, PROBE_ATTEMPTS, PROBE_RETRY_DELAY);
        cameras
            .iter()
            .enumerate()
            .map(|(index, camera)| {
                let serial = usb::read_serial(camera).unwrap_or_else(|| synthetic_serial(index));
                DeviceInfo {
                    generation: Generation::V1,
                    name: format!("Kinect v1 ({serial})"),
                    serial,
                }
            })
            .collect()
    }

    fn open_device(&mut self, serial: &str) -> Result<Box<dyn KinectDevice>> {
        let ctx = self.ctx.clone().ok_or(KinectError::NoContext)?;

        let mut last_err = KinectError::DeviceNotFound(serial.to_string());
        for attempt in 1..=OPEN_ATTEMPTS {
            match self.try_open(&ctx, serial) {
                Ok(device) => return Ok(Box::new(device)),
                Err(e) => {
                    log::warn!("Open `{serial}` failed (attempt {attempt}/{OPEN_ATTEMPTS}): {e}");
                    last_err = e;
                }
            }
            if attempt < OPEN_ATTEMPTS {
                std::thread::sleep(OPEN_RETRY_DELAY);
            }
        }
        Err(last_err)
    }
}

struct StreamState {
    stop: Arc<AtomicBool>,
    wake_rx: Receiver<()>,
    depth_thread: Option<JoinHandle<()>>,
    video_thread: Option<JoinHandle<()>>,
}

struct AudioStream {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// One opened first-generation sensor.
pub struct V1Device {
    ctx: rusb::Context,
    serial: String,
    index: usize,
    camera: Option<Arc<rusb::DeviceHandle<rusb::Context>>>,
    motor: Option<rusb::DeviceHandle<rusb::Context>>,
    firmware: Option<PathBuf>,
    slot: Arc<FrameSlot>,
    stream: Option<StreamState>,
    audio: Option<AudioStream>,
    requested_kind: StreamKind,
    active_kind: StreamKind,
    ir_mode: Arc<AtomicBool>,
    audio_wanted: bool,
    audio_level: Arc<AtomicU32>,
    cam_flags: u16,
    tag: u16,
}

impl V1Device {
    fn open(
        ctx: &rusb::Context,
        camera_dev: &rusb::Device<rusb::Context>,
        index: usize,
        firmware: Option<PathBuf>,
    ) -> Result<V1Device> {
        let serial = usb::read_serial(camera_dev).unwrap_or_else(|| synthetic_serial(index));
        let camera = usb::open_claim(camera_dev, protocol::CAMERA_INTERFACE)?;
        let motor = Self::open_motor(ctx, index);
        log::info!(
            "Opened Kinect v1 `{serial}` (bus {:03} addr {:03}, motor {})",
            camera_dev.bus_number(),
            camera_dev.address(),
            if motor.is_some() { "attached" } else { "absent" },
        );

        Ok(V1Device {
            ctx: ctx.clone(),
            serial,
            index,
            camera: Some(Arc::new(camera)),
            motor,
            firmware,
            slot: Arc::new(FrameSlot::new()),
            stream: None,
            audio: None,
            requested_kind: StreamKind::Rgb,
            active_kind: StreamKind::Rgb,
            ir_mode: Arc::new(AtomicBool::new(false)),
            audio_wanted: false,
            audio_level: Arc::new(AtomicU32::new(0)),
            cam_flags: protocol::FLAG_AUTO_EXPOSURE
                | protocol::FLAG_AUTO_FLICKER
                | protocol::FLAG_AUTO_WHITE_BALANCE,
            tag: 0,
        })
    }

    /// The motor is its own USB function; pair it with the camera by
    /// enumeration position, best-effort.
    fn open_motor(
        ctx: &rusb::Context,
        index: usize,
    ) -> Option<rusb::DeviceHandle<rusb::Context>> {
        let motors = usb::matching_devices(ctx, &[protocol::MOTOR_PID]).ok()?;
        let motor_dev = motors.get(index).or_else(|| motors.first())?;
        match usb::open_claim(motor_dev, protocol::MOTOR_INTERFACE) {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::warn!("Motor function would not open: {e}");
                None
            }
        }
    }

    fn next_tag(&mut self) -> u16 {
        self.tag = self.tag.wrapping_add(1);
        self.tag
    }

    fn write_register(
        &mut self,
        camera: &rusb::DeviceHandle<rusb::Context>,
        register: u16,
        value: u16,
    ) -> Result<()> {
        let tag = self.next_tag();
        let cmd = protocol::build_register_write(tag, register, value);
        camera.write_control(protocol::CTRL_OUT, 0, 0, 0, &cmd, CMD_TIMEOUT)?;

        let mut reply = [0u8; 12];
        let n = camera.read_control(protocol::CTRL_IN, 0, 0, 0, &mut reply, CMD_TIMEOUT)?;
        if protocol::parse_camera_reply(&reply[..n], tag).is_none() {
            return Err(KinectError::Protocol(format!(
                "register 0x{register:02x} write not acknowledged"
            )));
        }
        Ok(())
    }

    fn configure_depth(&mut self, camera: &rusb::DeviceHandle<rusb::Context>) -> Result<()> {
        self.write_register(camera, protocol::REG_DEPTH_FORMAT, protocol::DEPTH_FMT_11BIT)?;
        self.write_register(camera, protocol::REG_DEPTH_RES, protocol::RES_MEDIUM)?;
        self.write_register(camera, protocol::REG_DEPTH_FPS, protocol::FPS_30)?;
        self.write_register(camera, protocol::REG_DEPTH_STREAM, protocol::DEPTH_STREAM_START)
    }

    /// Stops the video sub-stream, reprograms its format for `kind`,
    /// and restarts it. Depth keeps running throughout.
    fn apply_video_mode(
        &mut self,
        camera: &rusb::DeviceHandle<rusb::Context>,
        kind: StreamKind,
    ) -> Result<()> {
        let ir = kind == StreamKind::Ir;
        let (format, _) = protocol::video_format_for(ir);

        self.write_register(camera, protocol::REG_VIDEO_STREAM, protocol::STREAM_STOP)?;
        self.write_register(camera, protocol::REG_VIDEO_FORMAT, format)?;
        self.write_register(camera, protocol::REG_VIDEO_RES, protocol::RES_MEDIUM)?;
        self.write_register(camera, protocol::REG_VIDEO_FPS, protocol::FPS_30)?;
        self.write_register(camera, protocol::REG_VIDEO_STREAM, protocol::VIDEO_STREAM_START)?;
        self.ir_mode.store(ir, Ordering::Relaxed);
        Ok(())
    }

    /// Folds `bits` into the flag shadow, then pushes the whole
    /// register if a camera handle is present.
    fn write_cam_flags(&mut self, bits: u16, enabled: bool) {
        if enabled {
            self.cam_flags |= bits;
        } else {
            self.cam_flags &= !bits;
        }
        let Some(camera) = self.camera.clone() else {
            return;
        };
        let flags = self.cam_flags;
        if let Err(e) = self.write_register(&camera, protocol::REG_CAM_FLAGS, flags) {
            log::warn!("Camera flag write failed: {e}");
        }
    }

    fn spawn_readers(&mut self) -> Result<StreamState> {
        let camera = self
            .camera
            .clone()
            .ok_or_else(|| KinectError::OpenFailed("camera handle missing".to_string()))?;
        let stop = Arc::new(AtomicBool::new(false));
        let (wake_tx, wake_rx) = crossbeam_channel::bounded::<()>(4);

        let depth_thread = {
            let camera = Arc::clone(&camera);
            let slot = Arc::clone(&self.slot);
            let stop = Arc::clone(&stop);
            let wake = wake_tx.clone();
            std::thread::Builder::new()
                .name("kinect1-depth".to_string())
                .spawn(move || depth_reader_loop(&camera, &slot, &wake, &stop))
                .map_err(KinectError::Io)?
        };

        let video_thread = {
            let slot = Arc::clone(&self.slot);
            let stop_flag = Arc::clone(&stop);
            let ir_mode = Arc::clone(&self.ir_mode);
            let spawned = std::thread::Builder::new()
                .name("kinect1-video".to_string())
                .spawn(move || video_reader_loop(&camera, &slot, &wake_tx, &stop_flag, &ir_mode));
            match spawned {
                Ok(thread) => thread,
                Err(e) => {
                    // Reap the depth reader so nothing outlives a
                    // failed start.
                    stop.store(true, Ordering::Relaxed);
                    let _ = depth_thread.join();
                    return Err(KinectError::Io(e));
                }
            }
        };

        Ok(StreamState {
            stop,
            wake_rx,
            depth_thread: Some(depth_thread),
            video_thread: Some(video_thread),
        })
    }

    fn join_readers(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop.store(true, Ordering::Relaxed);
            for thread in [stream.depth_thread.take(), stream.video_thread.take()]
                .into_iter()
                .flatten()
            {
                let _ = thread.join();
            }
        }
    }

    fn start_audio(&mut self) {
        if self.audio.is_some() {
            return;
        }
        let Some(fw_path) = self.firmware.clone() else {
            log::info!("Audio requested but unavailable: {}", KinectError::FirmwareMissing);
            return;
        };
        match self.boot_audio(&fw_path) {
            Ok(handle) => {
                let stop = Arc::new(AtomicBool::new(false));
                let level = Arc::clone(&self.audio_level);
                let thread = {
                    let stop = Arc::clone(&stop);
                    std::thread::Builder::new()
                        .name("kinect1-audio".to_string())
                        .spawn(move || audio_reader_loop(&handle, &level, &stop))
                };
                match thread {
                    Ok(thread) => {
                        log::info!("Audio input running on `{}`", self.serial);
                        self.audio = Some(AudioStream {
                            stop,
                            thread: Some(thread),
                        });
                    }
                    Err(e) => log::warn!("Audio reader would not start: {e}"),
                }
            }
            Err(e) => log::warn!("Audio startup failed: {e}"),
        }
    }

    fn stop_audio(&mut self) {
        if let Some(mut audio) = self.audio.take() {
            audio.stop.store(true, Ordering::Relaxed);
            if let Some(thread) = audio.thread.take() {
                let _ = thread.join();
            }
        }
        self.audio_level.store(0f32.to_bits(), Ordering::Relaxed);
    }

    /// Uploads the DSP firmware to the audio loader, waits out the
    /// re-enumeration, and reopens the function as a microphone.
    fn boot_audio(&mut self, fw_path: &std::path::Path) -> Result<rusb::DeviceHandle<rusb::Context>> {
        let blob = std::fs::read(fw_path)?;
        let loader_dev = self
            .audio_function()?
            .ok_or_else(|| KinectError::OpenFailed("audio function not found".to_string()))?;
        let loader = usb::open_claim(&loader_dev, protocol::AUDIO_INTERFACE)?;
        upload_firmware(&loader, &blob)?;
        drop(loader);

        // The DSP reboots and the function re-enumerates.
        std::thread::sleep(REENUMERATE_DELAY);
        let mic_dev = self
            .audio_function()?
            .ok_or_else(|| KinectError::OpenFailed("audio function did not return".to_string()))?;
        let handle = usb::open_claim(&mic_dev, protocol::AUDIO_INTERFACE)?;
        Ok(handle)
    }

    fn audio_function(&self) -> Result<Option<rusb::Device<rusb::Context>>> {
        let audios = usb::matching_devices(&self.ctx, protocol::AUDIO_PIDS)?;
        Ok(audios.get(self.index).or_else(|| audios.first()).cloned())
    }
}

impl KinectDevice for V1Device {
    fn start(&mut self) -> bool {
        if self.stream.is_some() {
            return true;
        }
        let Some(camera) = self.camera.clone() else {
            return false;
        };

        self.slot.reset();
        if let Err(e) = self.configure_depth(&camera) {
            log::warn!("Depth stream would not start: {e}");
            return false;
        }
        if let Err(e) = self.apply_video_mode(&camera, self.requested_kind) {
            log::warn!("Video stream would not start: {e}");
            // Video failed after depth came up; take depth back down.
            let _ = self.write_register(&camera, protocol::REG_DEPTH_STREAM, protocol::STREAM_STOP);
            return false;
        }
        self.active_kind = self.requested_kind;

        match self.spawn_readers() {
            Ok(stream) => self.stream = Some(stream),
            Err(e) => {
                log::warn!("Stream readers would not start: {e}");
                let _ = self.write_register(&camera, protocol::REG_VIDEO_STREAM, protocol::STREAM_STOP);
                let _ = self.write_register(&camera, protocol::REG_DEPTH_STREAM, protocol::STREAM_STOP);
                return false;
            }
        }

        if self.audio_wanted {
            self.start_audio();
        }
        log::info!("Kinect v1 `{}` streaming", self.serial);
        true
    }

    fn stop(&mut self) -> bool {
        if self.stream.is_none() {
            return true;
        }
        self.stop_audio();

        // Quiesce the device before joining the readers so in-flight
        // packets drain instead of racing a dead endpoint.
        if let Some(camera) = self.camera.clone() {
            if let Err(e) = self.write_register(&camera, protocol::REG_VIDEO_STREAM, protocol::STREAM_STOP)
            {
                log::warn!("Video stream stop failed: {e}");
            }
            if let Err(e) = self.write_register(&camera, protocol::REG_DEPTH_STREAM, protocol::STREAM_STOP)
            {
                log::warn!("Depth stream stop failed: {e}");
            }
        }
        self.join_readers();
        log::info!("Kinect v1 `{}` stopped", self.serial);
        true
    }

    fn update(&mut self) -> bool {
        let Some(camera) = self.camera.clone() else {
            return false;
        };
        if self.stream.is_none() {
            return false;
        }

        if self.requested_kind != self.active_kind {
            match self.apply_video_mode(&camera, self.requested_kind) {
                Ok(()) => self.active_kind = self.requested_kind,
                // Keep the old mode active and retry on the next pump.
                Err(e) => log::warn!("Stream switch failed: {e}"),
            }
        }

        let mut readers_gone = false;
        if let Some(stream) = &self.stream {
            match stream.wake_rx.recv_timeout(UPDATE_WAIT) {
                Ok(()) => while stream.wake_rx.try_recv().is_ok() {},
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => readers_gone = true,
            }
        }
        if readers_gone {
            // Both readers exited, most likely a device disconnect.
            log::warn!("Stream readers for `{}` exited; stopping", self.serial);
            self.stop_audio();
            self.join_readers();
        }
        self.slot.has_fresh()
    }

    fn get_frame(&mut self, out: &mut FrameData) -> bool {
        self.slot.take_into(out)
    }

    fn set_tilt(&mut self, angle_deg: i32) {
        let Some(motor) = &self.motor else {
            return;
        };
        let value = protocol::tilt_request(angle_deg);
        if let Err(e) = motor.write_control(protocol::CTRL_OUT, protocol::REQ_TILT, value, 0, &[], CMD_TIMEOUT)
        {
            log::warn!("Tilt command failed: {e}");
        }
    }

    fn set_led(&mut self, option: i32) {
        let Some(motor) = &self.motor else {
            return;
        };
        let value = protocol::led_request(option);
        if let Err(e) = motor.write_control(protocol::CTRL_OUT, protocol::REQ_LED, value, 0, &[], CMD_TIMEOUT)
        {
            log::warn!("LED command failed: {e}");
        }
    }

    fn set_stream_kind(&mut self, kind: StreamKind) {
        self.requested_kind = kind;
    }

    fn stream_kind(&self) -> StreamKind {
        self.requested_kind
    }

    fn set_mirror(&mut self, enabled: bool) {
        let Some(camera) = self.camera.clone() else {
            return;
        };
        let value = u16::from(enabled);
        for register in [protocol::REG_VIDEO_MIRROR, protocol::REG_DEPTH_MIRROR] {
            if let Err(e) = self.write_register(&camera, register, value) {
                log::warn!("Mirror write failed: {e}");
            }
        }
    }

    fn set_auto_exposure(&mut self, enabled: bool) {
        // Flicker avoidance rides along with auto exposure.
        self.write_cam_flags(
            protocol::FLAG_AUTO_EXPOSURE | protocol::FLAG_AUTO_FLICKER,
            enabled,
        );
    }

    fn set_auto_white_balance(&mut self, enabled: bool) {
        self.write_cam_flags(protocol::FLAG_AUTO_WHITE_BALANCE, enabled);
    }

    fn set_near_mode(&mut self, enabled: bool) {
        self.write_cam_flags(protocol::FLAG_NEAR_MODE, enabled);
    }

    fn set_manual_exposure_us(&mut self, exposure_us: i32) {
        let Some(camera) = self.camera.clone() else {
            return;
        };
        let (register, value) = protocol::exposure_command(exposure_us);
        if let Err(e) = self.write_register(&camera, register, value) {
            log::warn!("Exposure write failed: {e}");
        }
    }

    fn set_ir_brightness(&mut self, level: i32) {
        let Some(camera) = self.camera.clone() else {
            return;
        };
        let (register, value) = protocol::ir_brightness_command(level);
        if let Err(e) = self.write_register(&camera, register, value) {
            log::warn!("IR brightness write failed: {e}");
        }
    }

    fn set_audio_enabled(&mut self, enabled: bool) {
        self.audio_wanted = enabled;
        if self.stream.is_none() {
            return;
        }
        if enabled {
            self.start_audio();
        } else {
            self.stop_audio();
        }
    }

    fn audio_enabled(&self) -> bool {
        self.audio.is_some()
    }

    fn audio_level(&self) -> f32 {
        f32::from_bits(self.audio_level.load(Ordering::Relaxed))
    }

    fn capabilities(&self) -> Capabilities {
        let mut caps =
            Capabilities::MOTOR | Capabilities::LED | Capabilities::DEPTH | Capabilities::IR;
        if self.firmware.is_some() {
            caps |= Capabilities::AUDIO_IN;
        }
        caps
    }
}

impl Drop for V1Device {
    fn drop(&mut self) {
        self.stop();
    }
}

fn signal_frame(wake: &Sender<()>) {
    match wake.try_send(()) {
        Ok(()) | Err(TrySendError::Full(())) => {}
        Err(TrySendError::Disconnected(())) => {}
    }
}

fn depth_reader_loop(
    camera: &rusb::DeviceHandle<rusb::Context>,
    slot: &FrameSlot,
    wake: &Sender<()>,
    stop: &AtomicBool,
) {
    let mut assembler = protocol::FrameAssembler::new(protocol::DEPTH_PACKED_LEN);
    let mut buf = vec![0u8; STREAM_READ_LEN];

    while !stop.load(Ordering::Relaxed) {
        match camera.read_bulk(protocol::EP_DEPTH_IN, &mut buf, STREAM_READ_TIMEOUT) {
            Ok(n) => {
                if let Some((packed, timestamp)) = assembler.push(&buf[..n]) {
                    let depth = protocol::depth_frame_to_mm(&packed);
                    slot.store(move |frame| {
                        frame.depth = depth;
                        frame.width = protocol::FRAME_WIDTH;
                        frame.height = protocol::FRAME_HEIGHT;
                        frame.timestamp = timestamp;
                    });
                    signal_frame(wake);
                }
            }
            Err(rusb::Error::Timeout) | Err(rusb::Error::Interrupted) => {}
            Err(e) => {
                log::warn!("Depth stream read failed: {e}");
                break;
            }
        }
    }
    log::trace!("Depth reader exit ({} frames dropped)", assembler.dropped());
}

fn video_reader_loop(
    camera: &rusb::DeviceHandle<rusb::Context>,
    slot: &FrameSlot,
    wake: &Sender<()>,
    stop: &AtomicBool,
    ir_mode: &AtomicBool,
) {
    let mut assembler = protocol::FrameAssembler::new(protocol::VIDEO_BAYER_LEN);
    let mut buf = vec![0u8; STREAM_READ_LEN];

    while !stop.load(Ordering::Relaxed) {
        let ir = ir_mode.load(Ordering::Relaxed);
        let (_, expected_len) = protocol::video_format_for(ir);
        assembler.set_expected_len(expected_len);

        match camera.read_bulk(protocol::EP_VIDEO_IN, &mut buf, STREAM_READ_TIMEOUT) {
            Ok(n) => {
                if let Some((payload, timestamp)) = assembler.push(&buf[..n]) {
                    if ir {
                        slot.store(move |frame| {
                            frame.ir = payload;
                            frame.width = protocol::FRAME_WIDTH;
                            frame.height = protocol::FRAME_HEIGHT;
                            frame.timestamp = timestamp;
                        });
                    } else {
                        let rgb = protocol::demosaic_grbg(
                            &payload,
                            protocol::FRAME_WIDTH as usize,
                            protocol::FRAME_HEIGHT as usize,
                        );
                        slot.store(move |frame| {
                            frame.rgb = rgb;
                            frame.width = protocol::FRAME_WIDTH;
                            frame.height = protocol::FRAME_HEIGHT;
                            frame.timestamp = timestamp;
                        });
                    }
                    signal_frame(wake);
                }
            }
            Err(rusb::Error::Timeout) | Err(rusb::Error::Interrupted) => {}
            Err(e) => {
                log::warn!("Video stream read failed: {e}");
                break;
            }
        }
    }
    log::trace!("Video reader exit ({} frames dropped)", assembler.dropped());
}

/// Reads microphone packets and folds them into an RMS level in [0, 1].
fn audio_reader_loop(
    handle: &rusb::DeviceHandle<rusb::Context>,
    level: &AtomicU32,
    stop: &AtomicBool,
) {
    let mut buf = vec![0u8; 512];
    while !stop.load(Ordering::Relaxed) {
        match handle.read_bulk(protocol::EP_MIC_IN, &mut buf, STREAM_READ_TIMEOUT) {
            Ok(n) if n >= 2 => {
                let rms = pcm_rms(&buf[..n]);
                level.store(rms.to_bits(), Ordering::Relaxed);
            }
            Ok(_) => {}
            Err(rusb::Error::Timeout) | Err(rusb::Error::Interrupted) => {}
            Err(e) => {
                log::warn!("Audio stream read failed: {e}");
                break;
            }
        }
    }
}

/// RMS of little-endian 16-bit PCM, normalized to [0, 1].
fn pcm_rms(bytes: &[u8]) -> f32 {
    let mut sum = 0.0f64;
    let mut count = 0u32;
    for pair in bytes.chunks_exact(2) {
        let sample = f64::from(i16::from_le_bytes([pair[0], pair[1]]));
        sum += sample * sample;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    ((sum / f64::from(count)).sqrt() / 32768.0).clamp(0.0, 1.0) as f32
}

fn upload_firmware(loader: &rusb::DeviceHandle<rusb::Context>, blob: &[u8]) -> Result<()> {
    let mut tag = 1u32;
    let mut addr = protocol::FIRMWARE_BASE_ADDR;

    for page in blob.chunks(protocol::BOOT_PAGE_LEN) {
        let header = protocol::build_boot_command(tag, page.len() as u32, protocol::BOOT_CMD_WRITE, addr);
        let mut msg = Vec::with_capacity(protocol::BOOT_HEADER_LEN + page.len());
        msg.extend_from_slice(&header);
        msg.extend_from_slice(page);
        loader.write_bulk(protocol::EP_BOOT_OUT, &msg, BOOT_TIMEOUT)?;

        let mut status = [0u8; 12];
        let n = loader.read_bulk(protocol::EP_BOOT_IN, &mut status, BOOT_TIMEOUT)?;
        if !protocol::parse_boot_status(&status[..n], tag) {
            return Err(KinectError::Protocol(format!(
                "firmware page at 0x{addr:08x} rejected"
            )));
        }
        tag += 1;
        addr += page.len() as u32;
    }

    let header = protocol::build_boot_command(tag, 0, protocol::BOOT_CMD_RUN, protocol::FIRMWARE_BASE_ADDR);
    loader.write_bulk(protocol::EP_BOOT_OUT, &header, BOOT_TIMEOUT)?;
    let mut status = [0u8; 12];
    let n = loader.read_bulk(protocol::EP_BOOT_IN, &mut status, BOOT_TIMEOUT)?;
    if !protocol::parse_boot_status(&status[..n], tag) {
        return Err(KinectError::Protocol("firmware run command rejected".to_string()));
    }
    log::info!("Audio firmware uploaded ({} bytes)", blob.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::KinectBackend;

    /// None on hosts where libusb cannot even create a context.
    fn closed_device() -> Option<V1Device> {
        let ctx = usb::create_context().ok()?;
        Some(V1Device {
            ctx,
            serial: synthetic_serial(0),
            index: 0,
            camera: None,
            motor: None,
            firmware: None,
            slot: Arc::new(FrameSlot::new()),
            stream: None,
            audio: None,
            requested_kind: StreamKind::Rgb,
            active_kind: StreamKind::Rgb,
            ir_mode: Arc::new(AtomicBool::new(false)),
            audio_wanted: false,
            audio_level: Arc::new(AtomicU32::new(0)),
            cam_flags: 0,
            tag: 0,
        })
    }

    #[test]
    fn open_by_out_of_range_synthetic_serial_fails_with_detail() {
        let mut backend = V1Backend::new();
        if backend.probe().detail.contains("device(s) detected") {
            // A live sensor is attached; the failure path is not
            // reachable on this host.
            return;
        }
        let err = match backend.open_device("DeviceIndex-9") {
            Ok(_) => panic!("an out-of-range index must not open"),
            Err(err) => err,
        };
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn probe_reports_ready_without_hardware() {
        let mut backend = V1Backend::new();
        let probe = backend.probe();
        assert!(!probe.detail.is_empty());
        if probe.available {
            assert!(
                probe.detail.contains("Kinect v1"),
                "detail was `{}`",
                probe.detail
            );
        }
    }

    #[test]
    fn preview_without_hardware_fails_promptly() {
        let mut backend = V1Backend::new();
        if !backend.list_devices().is_empty() {
            return;
        }
        let started = std::time::Instant::now();
        let preview = backend.preview(Duration::from_secs(2));
        assert!(!preview.success);
        assert!(!preview.detail.is_empty());
        assert_eq!(preview.color_frames, 0);
        assert_eq!(preview.depth_frames, 0);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn closed_device_is_inert() {
        let Some(mut device) = closed_device() else {
            return;
        };
        assert!(!device.start());
        assert!(device.stop());
        assert!(!device.update());

        let mut frame = FrameData::default();
        assert!(!device.get_frame(&mut frame));

        // Setters without handles must be silent no-ops.
        device.set_tilt(10);
        device.set_led(2);
        device.set_mirror(true);
        device.set_manual_exposure_us(33_000);
        device.set_audio_enabled(true);
        assert!(!device.audio_enabled());
        assert_eq!(device.audio_level(), 0.0);
    }

    #[test]
    fn stream_kind_is_remembered_while_stopped() {
        let Some(mut device) = closed_device() else {
            return;
        };
        assert_eq!(device.stream_kind(), StreamKind::Rgb);
        device.set_stream_kind(StreamKind::Ir);
        assert_eq!(device.stream_kind(), StreamKind::Ir);
    }

    #[test]
    fn capabilities_follow_firmware_presence() {
        let Some(mut device) = closed_device() else {
            return;
        };
        assert!(device.supports_motor());
        assert!(device.supports_led());
        assert!(device.supports_depth());
        assert!(device.supports_ir());
        assert!(!device.supports_audio_input());

        device.firmware = Some(PathBuf::from("/tmp/audios.bin"));
        assert!(device.supports_audio_input());
    }

    #[test]
    fn auto_exposure_carries_flicker_avoidance_with_it() {
        let Some(mut device) = closed_device() else {
            return;
        };
        device.set_auto_white_balance(true);
        device.set_auto_exposure(true);
        assert_eq!(
            device.cam_flags,
            protocol::FLAG_AUTO_EXPOSURE
                | protocol::FLAG_AUTO_FLICKER
                | protocol::FLAG_AUTO_WHITE_BALANCE
        );

        // Disabling clears both bits and leaves the rest alone.
        device.set_auto_exposure(false);
        assert_eq!(device.cam_flags, protocol::FLAG_AUTO_WHITE_BALANCE);
    }

    #[test]
    fn pcm_rms_of_silence_and_full_scale() {
        assert_eq!(pcm_rms(&[]), 0.0);
        assert_eq!(pcm_rms(&[0, 0, 0, 0]), 0.0);

        let mut loud = Vec::new();
        for _ in 0..64 {
            loud.extend_from_slice(&i16::MIN.to_le_bytes());
        }
        let rms = pcm_rms(&loud);
        assert!((rms - 1.0).abs() < 1e-3, "got {rms}");
    }
}
