//! Pinhole intrinsics for back-projecting depth pixels into 3D.
//!
//! Both sensor generations ship factory calibration close enough to a
//! fixed preset for capture-export purposes, so the table below is
//! static and shared without locking. Values are the published presets
//! for each camera.

use crate::types::Generation;

/// Pinhole camera calibration parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    /// Focal length x (pixel)
    pub fx: f64,
    /// Focal length y (pixel)
    pub fy: f64,
    /// Principal point x (pixel)
    pub cx: f64,
    /// Principal point y (pixel)
    pub cy: f64,
}

impl Intrinsics {
    /// Back-projects pixel `(px, py)` at `depth_mm` into camera-space
    /// meters: +x right, +y down, +z out along the optical axis.
    pub fn deproject(&self, px: u32, py: u32, depth_mm: u16) -> [f64; 3] {
        let z = f64::from(depth_mm) / 1000.0;
        let x = (f64::from(px) - self.cx) / self.fx * z;
        let y = (f64::from(py) - self.cy) / self.fy * z;
        [x, y, z]
    }
}

struct Entry {
    generation: Generation,
    width: u32,
    height: u32,
    intrinsics: Intrinsics,
}

/// Factory presets per (generation, resolution). First entry for each
/// generation is its native depth resolution.
static TABLE: &[Entry] = &[
    Entry {
        generation: Generation::V1,
        width: 640,
        height: 480,
        intrinsics: Intrinsics {
            fx: 594.21,
            fy: 591.04,
            cx: 339.31,
            cy: 242.74,
        },
    },
    Entry {
        generation: Generation::V2,
        width: 512,
        height: 424,
        intrinsics: Intrinsics {
            fx: 365.456,
            fy: 365.456,
            cx: 254.878,
            cy: 205.395,
        },
    },
    Entry {
        generation: Generation::V2,
        width: 1920,
        height: 1080,
        intrinsics: Intrinsics {
            fx: 1081.37,
            fy: 1081.37,
            cx: 959.5,
            cy: 539.5,
        },
    },
];

/// Preset for the generation's native depth resolution.
pub fn native(generation: Generation) -> &'static Intrinsics {
    // The table always carries a native entry per generation.
    TABLE
        .iter()
        .find(|e| e.generation == generation)
        .map(|e| &e.intrinsics)
        .unwrap_or(&TABLE[0].intrinsics)
}

/// Preset for an exact (generation, resolution), falling back to the
/// generation's native entry for resolutions not in the table.
pub fn lookup(generation: Generation, width: u32, height: u32) -> &'static Intrinsics {
    TABLE
        .iter()
        .find(|e| e.generation == generation && e.width == width && e.height == height)
        .map(|e| &e.intrinsics)
        .unwrap_or_else(|| native(generation))
}
