use std::fmt;

/// Errors that can occur when talking to a Kinect sensor.
#[derive(Debug, thiserror::Error)]
pub enum KinectError {
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("USB context unavailable")]
    NoContext,

    #[error("No Kinect device matching `{0}`")]
    DeviceNotFound(String),

    #[error("Could not open device: {0}")]
    OpenFailed(String),

    #[error("Audio firmware (audios.bin) not found")]
    FirmwareMissing,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timeout waiting for data")]
    Timeout,
}

/// Thread-safe last-error storage for the C FFI layer.
pub(crate) struct LastError {
    message: std::sync::Mutex<String>,
}

impl LastError {
    pub const fn new() -> Self {
        Self {
            message: std::sync::Mutex::new(String::new()),
        }
    }

    pub fn set(&self, err: &KinectError) {
        if let Ok(mut msg) = self.message.lock() {
            *msg = fmt::format(format_args!("{}\0", err));
        }
    }

    pub fn as_ptr(&self) -> *const std::ffi::c_char {
        match self.message.lock() {
            Ok(msg) if !msg.is_empty() => msg.as_ptr() as *const std::ffi::c_char,
            _ => std::ptr::null(),
        }
    }
}
