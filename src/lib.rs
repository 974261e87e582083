//! # kinect - Rust driver for both Kinect sensor generations
//!
//! Native USB driver built on libusb. Provides:
//! - Device discovery with retry and open-by-serial for v1 and v2 sensors
//! - Live RGB/IR/depth streaming with a latest-wins frame hand-off
//! - Motor, LED, exposure and audio control where the hardware has it
//! - Capture-bundle export (PPM/PGM rasters plus an ASCII PLY cloud)
//! - C FFI for integration with C/C++/Unity/Swift
//!
//! ## Quick Start
//! ```no_run
//! use kinect::{all_backends, FrameData};
//!
//! let mut backend = all_backends().remove(0);
//! let info = backend.list_devices().into_iter().next().unwrap();
//! let mut device = backend.open_device(&info.serial).unwrap();
//!
//! device.start();
//! let mut frame = FrameData::default();
//! loop {
//!     if device.update() && device.get_frame(&mut frame) {
//!         println!("{}x{} @ {} ms", frame.width, frame.height, frame.timestamp);
//!         break;
//!     }
//! }
//! device.stop();
//! ```

pub mod device;
pub mod error;
pub mod export;
pub mod ffi;
pub mod intrinsics;
mod slot;
pub mod types;
pub mod usb;
pub mod v1;
pub mod v2;

pub use device::{all_backends, KinectBackend, KinectDevice};
pub use error::KinectError;
pub use types::*;
pub use v1::V1Backend;
pub use v2::V2Backend;

/// Result type alias for kinect operations.
pub type Result<T> = std::result::Result<T, KinectError>;
