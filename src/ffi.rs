//! C FFI layer for kinect.
//!
//! Provides opaque handle-based API for C/C++ consumers.
//! The generated C header is written to `include/kinect.h` by cbindgen.

use crate::device::{KinectBackend, KinectDevice};
use crate::error::LastError;
use crate::types::{FrameData, Generation, StreamKind};
use crate::KinectError;
use std::ffi::{c_char, c_int};
use std::path::Path;

/// Last error message for C consumers.
static LAST_ERROR: LastError = LastError::new();

/// Opaque backend handle for C consumers.
pub struct KcBackend(Box<dyn KinectBackend>);

/// Opaque device handle for C consumers.
pub struct KcDevice(Box<dyn KinectDevice>);

/// Opaque frame handle for C consumers.
pub struct KcFrame(FrameData);

/// Device identity in C-compatible layout.
#[repr(C)]
pub struct KcDeviceInfo {
    /// Hardware generation: 1 or 2.
    pub generation: c_int,
    /// Null-terminated serial string.
    pub serial: [c_char; 64],
    /// Null-terminated display name.
    pub name: [c_char; 64],
}

fn str_to_fixed<const N: usize>(s: &str) -> [c_char; N] {
    let mut buf = [0 as c_char; N];
    let bytes = s.as_bytes();
    let len = bytes.len().min(N - 1);
    for (i, &b) in bytes[..len].iter().enumerate() {
        buf[i] = b as c_char;
    }
    buf
}

fn generation_from_int(generation: c_int) -> Option<Generation> {
    match generation {
        1 => Some(Generation::V1),
        2 => Some(Generation::V2),
        _ => None,
    }
}

/// Create a backend for one hardware generation (1 or 2).
/// Returns NULL for an unknown generation.
#[no_mangle]
pub extern "C" fn kc_backend_new(generation: c_int) -> *mut KcBackend {
    let backend: Box<dyn KinectBackend> = match generation_from_int(generation) {
        Some(Generation::V1) => Box::new(crate::v1::V1Backend::new()),
        Some(Generation::V2) => Box::new(crate::v2::V2Backend::new()),
        None => {
            LAST_ERROR.set(&KinectError::OpenFailed(format!(
                "unknown generation {generation}"
            )));
            return std::ptr::null_mut();
        }
    };
    Box::into_raw(Box::new(KcBackend(backend)))
}

/// Free a backend.
///
/// # Safety
/// `backend` must be a pointer returned by `kc_backend_new`, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_backend_free(backend: *mut KcBackend) {
    if !backend.is_null() {
        drop(Box::from_raw(backend));
    }
}

/// Probe backend availability. Writes the human-readable detail into
/// `detail` (truncated, null-terminated) when provided. Returns whether
/// the backend is usable.
///
/// # Safety
/// `backend` must be a valid backend pointer, or null. `detail` must
/// point to at least `detail_len` bytes, or be null.
#[no_mangle]
pub unsafe extern "C" fn kc_probe(
    backend: *mut KcBackend,
    detail: *mut c_char,
    detail_len: usize,
) -> bool {
    if backend.is_null() {
        return false;
    }
    let backend = &mut *backend;
    let probe = backend.0.probe();

    if !detail.is_null() && detail_len > 0 {
        let bytes = probe.detail.as_bytes();
        let len = bytes.len().min(detail_len - 1);
        for (i, &b) in bytes[..len].iter().enumerate() {
            detail.add(i).write(b as c_char);
        }
        detail.add(len).write(0);
    }
    probe.available
}

/// List attached devices for this backend.
///
/// Writes up to `max` entries into `out`. Returns the number of devices
/// found, or -1 on error.
///
/// # Safety
/// `backend` must be a valid backend pointer, or null. `out` must point
/// to an array of at least `max` `KcDeviceInfo` elements, or be null.
#[no_mangle]
pub unsafe extern "C" fn kc_list_devices(
    backend: *mut KcBackend,
    out: *mut KcDeviceInfo,
    max: c_int,
) -> c_int {
    if backend.is_null() || max < 0 {
        return -1;
    }
    let backend = &mut *backend;
    let devices = backend.0.list_devices();

    let count = devices.len().min(max as usize);
    if !out.is_null() {
        for (i, dev) in devices.iter().take(count).enumerate() {
            let info = KcDeviceInfo {
                generation: dev.generation as c_int,
                serial: str_to_fixed(&dev.serial),
                name: str_to_fixed(&dev.name),
            };
            out.add(i).write(info);
        }
    }
    devices.len() as c_int
}

/// Open a device by serial. A null or empty serial opens the first
/// listed device. Returns NULL on error (check kc_last_error()).
///
/// # Safety
/// `backend` must be a valid backend pointer, or null. `serial` must be
/// a null-terminated string, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_open_device(
    backend: *mut KcBackend,
    serial: *const c_char,
) -> *mut KcDevice {
    if backend.is_null() {
        return std::ptr::null_mut();
    }
    let backend = &mut *backend;

    let serial = if serial.is_null() {
        String::new()
    } else {
        std::ffi::CStr::from_ptr(serial)
            .to_string_lossy()
            .into_owned()
    };
    let serial = if serial.is_empty() {
        match backend.0.list_devices().first() {
            Some(first) => first.serial.clone(),
            None => {
                LAST_ERROR.set(&KinectError::DeviceNotFound("<none attached>".to_string()));
                return std::ptr::null_mut();
            }
        }
    } else {
        serial
    };

    match backend.0.open_device(&serial) {
        Ok(device) => Box::into_raw(Box::new(KcDevice(device))),
        Err(e) => {
            LAST_ERROR.set(&e);
            std::ptr::null_mut()
        }
    }
}

/// Close a device and free its resources. Streams stop on close.
///
/// # Safety
/// `device` must be a pointer returned by `kc_open_device`, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_device_free(device: *mut KcDevice) {
    if !device.is_null() {
        drop(Box::from_raw(device));
    }
}

/// Start streaming. Returns whether the device is running.
///
/// # Safety
/// `device` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_device_start(device: *mut KcDevice) -> bool {
    if device.is_null() {
        return false;
    }
    (*device).0.start()
}

/// Stop streaming. Returns whether the device is stopped.
///
/// # Safety
/// `device` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_device_stop(device: *mut KcDevice) -> bool {
    if device.is_null() {
        return false;
    }
    (*device).0.stop()
}

/// Pump the device event path. Returns whether a fresh frame is
/// pending; never blocks beyond a few milliseconds.
///
/// # Safety
/// `device` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_device_update(device: *mut KcDevice) -> bool {
    if device.is_null() {
        return false;
    }
    (*device).0.update()
}

/// Take the latest frame. Returns NULL when nothing new arrived since
/// the previous call. The caller owns the frame and must release it
/// with `kc_frame_free`.
///
/// # Safety
/// `device` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_device_poll_frame(device: *mut KcDevice) -> *mut KcFrame {
    if device.is_null() {
        return std::ptr::null_mut();
    }
    let device = &mut *device;

    let mut frame = FrameData::default();
    if device.0.get_frame(&mut frame) {
        Box::into_raw(Box::new(KcFrame(frame)))
    } else {
        std::ptr::null_mut()
    }
}

/// Free a frame returned by `kc_device_poll_frame`.
///
/// # Safety
/// `frame` must be a pointer returned by `kc_device_poll_frame`, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_frame_free(frame: *mut KcFrame) {
    if !frame.is_null() {
        drop(Box::from_raw(frame));
    }
}

/// Frame width in pixels.
///
/// # Safety
/// `frame` must be a valid frame pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_frame_width(frame: *const KcFrame) -> u32 {
    if frame.is_null() {
        return 0;
    }
    (*frame).0.width
}

/// Frame height in pixels.
///
/// # Safety
/// `frame` must be a valid frame pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_frame_height(frame: *const KcFrame) -> u32 {
    if frame.is_null() {
        return 0;
    }
    (*frame).0.height
}

/// Device clock timestamp in milliseconds.
///
/// # Safety
/// `frame` must be a valid frame pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_frame_timestamp(frame: *const KcFrame) -> u32 {
    if frame.is_null() {
        return 0;
    }
    (*frame).0.timestamp
}

/// Packed RGB bytes, 3 per pixel. NULL when the channel is empty.
/// The pointer is valid until `kc_frame_free`.
///
/// # Safety
/// `frame` must be a valid frame pointer, or null. `out_len` must be a
/// valid pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_frame_rgb(frame: *const KcFrame, out_len: *mut usize) -> *const u8 {
    if frame.is_null() {
        return std::ptr::null();
    }
    let rgb = &(*frame).0.rgb;
    if !out_len.is_null() {
        out_len.write(rgb.len());
    }
    if rgb.is_empty() {
        std::ptr::null()
    } else {
        rgb.as_ptr()
    }
}

/// Infrared bytes, 1 per pixel. NULL when the channel is empty.
///
/// # Safety
/// `frame` must be a valid frame pointer, or null. `out_len` must be a
/// valid pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_frame_ir(frame: *const KcFrame, out_len: *mut usize) -> *const u8 {
    if frame.is_null() {
        return std::ptr::null();
    }
    let ir = &(*frame).0.ir;
    if !out_len.is_null() {
        out_len.write(ir.len());
    }
    if ir.is_empty() {
        std::ptr::null()
    } else {
        ir.as_ptr()
    }
}

/// Depth samples in millimeters, 0 meaning invalid. `out_count` is in
/// elements, not bytes. NULL when the channel is empty.
///
/// # Safety
/// `frame` must be a valid frame pointer, or null. `out_count` must be
/// a valid pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_frame_depth(frame: *const KcFrame, out_count: *mut usize) -> *const u16 {
    if frame.is_null() {
        return std::ptr::null();
    }
    let depth = &(*frame).0.depth;
    if !out_count.is_null() {
        out_count.write(depth.len());
    }
    if depth.is_empty() {
        std::ptr::null()
    } else {
        depth.as_ptr()
    }
}

/// Tilt the motor, degrees, clamped to [-30, 30].
///
/// # Safety
/// `device` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_device_set_tilt(device: *mut KcDevice, angle_deg: c_int) {
    if !device.is_null() {
        (*device).0.set_tilt(angle_deg);
    }
}

/// Set the LED pattern, clamped to [0, 6].
///
/// # Safety
/// `device` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_device_set_led(device: *mut KcDevice, option: c_int) {
    if !device.is_null() {
        (*device).0.set_led(option);
    }
}

/// Mirror both video and depth horizontally.
///
/// # Safety
/// `device` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_device_set_mirror(device: *mut KcDevice, enabled: bool) {
    if !device.is_null() {
        (*device).0.set_mirror(enabled);
    }
}

/// Toggle auto exposure.
///
/// # Safety
/// `device` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_device_set_auto_exposure(device: *mut KcDevice, enabled: bool) {
    if !device.is_null() {
        (*device).0.set_auto_exposure(enabled);
    }
}

/// Toggle auto white balance.
///
/// # Safety
/// `device` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_device_set_auto_white_balance(device: *mut KcDevice, enabled: bool) {
    if !device.is_null() {
        (*device).0.set_auto_white_balance(enabled);
    }
}

/// Toggle near mode on hardware that has it.
///
/// # Safety
/// `device` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_device_set_near_mode(device: *mut KcDevice, enabled: bool) {
    if !device.is_null() {
        (*device).0.set_near_mode(enabled);
    }
}

/// Set manual exposure in microseconds, clamped to [1000, 200000].
///
/// # Safety
/// `device` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_device_set_manual_exposure_us(device: *mut KcDevice, exposure_us: c_int) {
    if !device.is_null() {
        (*device).0.set_manual_exposure_us(exposure_us);
    }
}

/// Set IR emitter brightness, clamped to [1, 50].
///
/// # Safety
/// `device` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_device_set_ir_brightness(device: *mut KcDevice, level: c_int) {
    if !device.is_null() {
        (*device).0.set_ir_brightness(level);
    }
}

/// Select the decoded visual channel.
/// `kind`: 0 = RGB, 1 = IR, 2 = Depth.
///
/// # Safety
/// `device` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_device_set_stream_kind(device: *mut KcDevice, kind: c_int) {
    if device.is_null() {
        return;
    }
    let kind = match kind {
        1 => StreamKind::Ir,
        2 => StreamKind::Depth,
        _ => StreamKind::Rgb,
    };
    (*device).0.set_stream_kind(kind);
}

/// Enable or disable microphone capture.
///
/// # Safety
/// `device` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_device_set_audio_enabled(device: *mut KcDevice, enabled: bool) {
    if !device.is_null() {
        (*device).0.set_audio_enabled(enabled);
    }
}

/// Whether microphone capture is live.
///
/// # Safety
/// `device` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_device_audio_enabled(device: *const KcDevice) -> bool {
    if device.is_null() {
        return false;
    }
    (*device).0.audio_enabled()
}

/// Current microphone RMS level, 0 to 1.
///
/// # Safety
/// `device` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_device_audio_level(device: *const KcDevice) -> f32 {
    if device.is_null() {
        return 0.0;
    }
    (*device).0.audio_level()
}

/// Capability bitmap for the opened device.
///
/// # Safety
/// `device` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_device_capabilities(device: *const KcDevice) -> u32 {
    if device.is_null() {
        return 0;
    }
    (*device).0.capabilities().bits()
}

/// Export a capture bundle (PPM/PGM rasters plus an ASCII PLY point
/// cloud) to `dir`. Returns the number of cloud points written, or -1
/// on invalid arguments.
///
/// # Safety
/// `frame` must be a valid frame pointer, or null. `dir` must be a
/// null-terminated path string, or null.
#[no_mangle]
pub unsafe extern "C" fn kc_export_bundle(
    frame: *const KcFrame,
    dir: *const c_char,
    generation: c_int,
) -> c_int {
    if frame.is_null() || dir.is_null() {
        return -1;
    }
    let Some(generation) = generation_from_int(generation) else {
        LAST_ERROR.set(&KinectError::OpenFailed(format!(
            "unknown generation {generation}"
        )));
        return -1;
    };
    let dir = std::ffi::CStr::from_ptr(dir).to_string_lossy().into_owned();

    let report = crate::export::export_capture_bundle(Path::new(&dir), &(*frame).0, generation);
    report.points as c_int
}

/// Get the last error message. Returns NULL if no error.
/// The returned pointer is valid until the next kinect API call.
#[no_mangle]
pub extern "C" fn kc_last_error() -> *const c_char {
    LAST_ERROR.as_ptr()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_accessors_expose_channels() {
        let frame = Box::into_raw(Box::new(KcFrame(FrameData {
            rgb: vec![1, 2, 3],
            depth: vec![1200],
            ir: Vec::new(),
            width: 1,
            height: 1,
            timestamp: 42,
        })));

        unsafe {
            assert_eq!(kc_frame_width(frame), 1);
            assert_eq!(kc_frame_height(frame), 1);
            assert_eq!(kc_frame_timestamp(frame), 42);

            let mut len = 0usize;
            let rgb = kc_frame_rgb(frame, &mut len);
            assert_eq!(len, 3);
            assert_eq!(std::slice::from_raw_parts(rgb, len), &[1, 2, 3]);

            let mut count = 0usize;
            let depth = kc_frame_depth(frame, &mut count);
            assert_eq!(count, 1);
            assert_eq!(*depth, 1200);

            // An empty channel comes back as NULL with zero length.
            let mut ir_len = 7usize;
            assert!(kc_frame_ir(frame, &mut ir_len).is_null());
            assert_eq!(ir_len, 0);

            kc_frame_free(frame);
        }
    }

    #[test]
    fn null_frame_pointers_are_safe() {
        unsafe {
            assert_eq!(kc_frame_width(std::ptr::null()), 0);
            assert_eq!(kc_frame_timestamp(std::ptr::null()), 0);
            assert!(kc_frame_rgb(std::ptr::null(), std::ptr::null_mut()).is_null());
            assert!(kc_frame_depth(std::ptr::null(), std::ptr::null_mut()).is_null());
            kc_frame_free(std::ptr::null_mut());
            kc_device_free(std::ptr::null_mut());
            kc_backend_free(std::ptr::null_mut());
        }
    }

    #[test]
    fn unknown_generation_is_rejected_with_an_error() {
        let backend = kc_backend_new(9);
        assert!(backend.is_null());
        assert!(!kc_last_error().is_null());
    }

    #[test]
    fn str_to_fixed_truncates_and_terminates() {
        let buf: [c_char; 8] = str_to_fixed("123456789");
        assert_eq!(buf[6], b'7' as c_char);
        assert_eq!(buf[7], 0);
        let empty: [c_char; 4] = str_to_fixed("");
        assert_eq!(empty[0], 0);
    }
}
