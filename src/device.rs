//! The backend and device contracts both hardware generations sit
//! behind. Consumers hold `Box<dyn KinectDevice>` and never learn which
//! generation produced it.

use crate::types::{
    Capabilities, DeviceInfo, FrameData, Generation, PreviewResult, ProbeResult, StreamKind,
};
use crate::Result;
use std::time::{Duration, Instant};

/// One opened sensor. `start`/`stop` are idempotent; every setter
/// clamps its argument and silently no-ops when the hardware lacks the
/// feature or the handle is gone.
pub trait KinectDevice: Send {
    /// Brings the streams up. False leaves the device stopped but
    /// reusable; a later call may succeed.
    fn start(&mut self) -> bool;

    /// Takes the streams down: audio first, then video, then depth.
    /// True when already stopped.
    fn stop(&mut self) -> bool;

    /// Pumps the generation's event path with a small bounded wait and
    /// reports whether a fresh frame is pending. Call repeatedly.
    fn update(&mut self) -> bool;

    /// Copies the latest snapshot out once per fresh frame.
    fn get_frame(&mut self, out: &mut FrameData) -> bool;

    fn set_tilt(&mut self, _angle_deg: i32) {}
    fn set_led(&mut self, _option: i32) {}
    fn set_mirror(&mut self, _enabled: bool) {}
    fn set_auto_exposure(&mut self, _enabled: bool) {}
    fn set_auto_white_balance(&mut self, _enabled: bool) {}
    fn set_near_mode(&mut self, _enabled: bool) {}
    fn set_manual_exposure_us(&mut self, _exposure_us: i32) {}
    fn set_ir_brightness(&mut self, _level: i32) {}

    /// Selects which visual channel gets decoded. Takes effect without
    /// a full stop/start, even while streaming.
    fn set_stream_kind(&mut self, _kind: StreamKind) {}
    fn stream_kind(&self) -> StreamKind {
        StreamKind::Rgb
    }

    fn set_audio_enabled(&mut self, _enabled: bool) {}
    fn audio_enabled(&self) -> bool {
        false
    }

    /// RMS of the microphone's noise-cancelled channel, 0 to 1.
    fn audio_level(&self) -> f32 {
        0.0
    }

    /// Constant for the lifetime of the instance.
    fn capabilities(&self) -> Capabilities;

    fn supports_motor(&self) -> bool {
        self.capabilities().contains(Capabilities::MOTOR)
    }
    fn supports_led(&self) -> bool {
        self.capabilities().contains(Capabilities::LED)
    }
    fn supports_audio_input(&self) -> bool {
        self.capabilities().contains(Capabilities::AUDIO_IN)
    }
    fn supports_depth(&self) -> bool {
        self.capabilities().contains(Capabilities::DEPTH)
    }
    fn supports_ir(&self) -> bool {
        self.capabilities().contains(Capabilities::IR)
    }
}

/// Factory and enumerator for one hardware generation.
pub trait KinectBackend: Send {
    fn name(&self) -> &str;
    fn generation(&self) -> Generation;

    /// Never fails; unavailability comes back as a result with detail.
    fn probe(&mut self) -> ProbeResult;

    /// Best-effort enumeration. Units with no readable serial appear
    /// under synthetic identities.
    fn list_devices(&mut self) -> Vec<DeviceInfo>;

    fn open_device(&mut self, serial: &str) -> Result<Box<dyn KinectDevice>>;

    /// Opens the first listed device and polls it until the deadline,
    /// counting what arrived. Blocking; returns promptly when nothing
    /// is attached. Not safe to run concurrently with other use of
    /// this backend's devices.
    fn preview(&mut self, duration: Duration) -> PreviewResult {
        let label = self.generation().label();
        let devices = self.list_devices();
        let Some(first) = devices.first() else {
            return PreviewResult {
                success: false,
                detail: format!("No {label} device available for preview."),
                ..Default::default()
            };
        };

        let mut device = match self.open_device(&first.serial) {
            Ok(device) => device,
            Err(e) => {
                return PreviewResult {
                    success: false,
                    detail: format!("Could not open {label} `{}`: {e}", first.serial),
                    ..Default::default()
                };
            }
        };
        if !device.start() {
            return PreviewResult {
                success: false,
                detail: format!("Could not start {label} preview."),
                ..Default::default()
            };
        }

        let deadline = Instant::now() + duration;
        let mut frame = FrameData::default();
        let mut color_frames = 0u64;
        let mut depth_frames = 0u64;
        while Instant::now() < deadline {
            if device.update() && device.get_frame(&mut frame) {
                if frame.has_rgb() || frame.has_ir() {
                    color_frames += 1;
                }
                if frame.has_depth() {
                    depth_frames += 1;
                }
            }
        }
        device.stop();

        let success = color_frames > 0 || depth_frames > 0;
        PreviewResult {
            success,
            detail: if success {
                "Preview captured.".to_string()
            } else {
                "No frames captured.".to_string()
            },
            color_frames,
            depth_frames,
        }
    }
}

/// One backend per generation, v1 first. Probing order doubles as the
/// auto-selection order.
pub fn all_backends() -> Vec<Box<dyn KinectBackend>> {
    vec![
        Box::new(crate::v1::V1Backend::new()),
        Box::new(crate::v2::V2Backend::new()),
    ]
}
