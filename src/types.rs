/// Sensor hardware generation.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generation {
    /// Structured-light sensor (1414/1473/K4W), 640x480 streams.
    V1 = 1,
    /// Time-of-flight sensor, 512x424 depth/IR and 1920x1080 color.
    V2 = 2,
}

impl Generation {
    pub fn label(self) -> &'static str {
        match self {
            Generation::V1 => "Kinect v1",
            Generation::V2 => "Kinect v2",
        }
    }
}

/// Which visual channel the device decodes for delivery.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Rgb = 0,
    Ir = 1,
    Depth = 2,
}

/// One snapshot of sensor data.
///
/// A frame carries whatever subset of channels the device has produced;
/// a populated channel always holds exactly `width * height` elements
/// (times 3 bytes for RGB). `depth` is millimeters, 0 meaning invalid.
#[derive(Debug, Clone, Default)]
pub struct FrameData {
    /// Packed RGB, 3 bytes per pixel.
    pub rgb: Vec<u8>,
    /// Depth in millimeters, row-major.
    pub depth: Vec<u16>,
    /// Infrared intensity, 1 byte per pixel.
    pub ir: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Device clock, milliseconds.
    pub timestamp: u32,
}

impl FrameData {
    fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn has_rgb(&self) -> bool {
        self.pixels() > 0 && self.rgb.len() >= self.pixels() * 3
    }

    pub fn has_ir(&self) -> bool {
        self.pixels() > 0 && self.ir.len() >= self.pixels()
    }

    pub fn has_depth(&self) -> bool {
        self.pixels() > 0 && self.depth.len() >= self.pixels()
    }

    pub fn is_empty(&self) -> bool {
        self.rgb.is_empty() && self.depth.is_empty() && self.ir.is_empty()
    }

    /// Adopts new pixel dimensions. Channels from the old resolution
    /// cannot describe the new one, so a change discards them all.
    pub fn set_dimensions(&mut self, width: u32, height: u32) {
        if self.width == width && self.height == height {
            return;
        }
        self.rgb.clear();
        self.depth.clear();
        self.ir.clear();
        self.width = width;
        self.height = height;
    }
}

/// Identity of one attached sensor.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub generation: Generation,
    /// Stable serial, or a synthetic `DeviceIndex-<n>` placeholder when
    /// the unit reports none.
    pub serial: String,
    pub name: String,
}

/// Outcome of a backend availability probe. Never an error.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub available: bool,
    pub detail: String,
}

/// Outcome of a blocking preview run.
#[derive(Debug, Clone, Default)]
pub struct PreviewResult {
    pub success: bool,
    pub detail: String,
    pub color_frames: u64,
    pub depth_frames: u64,
}

bitflags::bitflags! {
    /// Capability bitmap for one opened device. Constant per instance.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(C)]
    pub struct Capabilities: u32 {
        const MOTOR    = 1 << 0;
        const LED      = 1 << 1;
        const AUDIO_IN = 1 << 2;
        const DEPTH    = 1 << 3;
        const IR       = 1 << 4;
    }
}

const SYNTHETIC_PREFIX: &str = "DeviceIndex-";

/// Placeholder identity for units that expose no usable serial. Not
/// stable across replug; open logic treats it as an index.
pub fn synthetic_serial(index: usize) -> String {
    format!("{SYNTHETIC_PREFIX}{index}")
}

pub fn is_synthetic_serial(serial: &str) -> bool {
    serial.starts_with(SYNTHETIC_PREFIX)
}

/// Extracts the enumeration index from a synthetic serial.
pub fn parse_synthetic_serial(serial: &str) -> Option<usize> {
    serial.strip_prefix(SYNTHETIC_PREFIX)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_serial_round_trip() {
        let serial = synthetic_serial(3);
        assert_eq!(serial, "DeviceIndex-3");
        assert!(is_synthetic_serial(&serial));
        assert_eq!(parse_synthetic_serial(&serial), Some(3));
    }

    #[test]
    fn real_serials_are_not_synthetic() {
        assert!(!is_synthetic_serial("A00366912345047A"));
        assert_eq!(parse_synthetic_serial("A00366912345047A"), None);
        assert_eq!(parse_synthetic_serial("DeviceIndex-"), None);
        assert_eq!(parse_synthetic_serial("DeviceIndex-x"), None);
    }

    #[test]
    fn channel_presence_checks_length() {
        let mut frame = FrameData {
            width: 4,
            height: 2,
            ..Default::default()
        };
        assert!(!frame.has_rgb());
        assert!(!frame.has_depth());

        frame.rgb = vec![0; 4 * 2 * 3];
        frame.depth = vec![0; 4 * 2 - 1];
        frame.ir = vec![0; 4 * 2];
        assert!(frame.has_rgb());
        assert!(!frame.has_depth());
        assert!(frame.has_ir());
        assert!(!frame.is_empty());
    }

    #[test]
    fn empty_dims_never_report_channels() {
        let frame = FrameData {
            rgb: vec![0; 12],
            ..Default::default()
        };
        assert!(!frame.has_rgb());
    }

    #[test]
    fn dimension_change_discards_channels() {
        let mut frame = FrameData {
            rgb: vec![0; 6],
            depth: vec![0; 2],
            ir: vec![0; 2],
            width: 2,
            height: 1,
            ..Default::default()
        };
        frame.set_dimensions(2, 1);
        assert!(!frame.is_empty());

        frame.set_dimensions(1, 1);
        assert!(frame.is_empty());
        assert_eq!((frame.width, frame.height), (1, 1));
    }
}
