//! Capture-bundle export: raster snapshots plus an ASCII point cloud
//! from one [`FrameData`].
//!
//! Everything here is best-effort. A channel that is missing or fails
//! to write is skipped and recorded in the [`CaptureReport`]; one bad
//! channel never aborts the bundle.

use crate::intrinsics;
use crate::types::{FrameData, Generation};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Closed interval of depth values treated as scene geometry, in mm.
/// Values outside it (including the sensor's 0 = invalid) are skipped
/// by the point cloud, not clamped into range.
pub const DEPTH_MIN_MM: u16 = 350;
pub const DEPTH_MAX_MM: u16 = 6000;

fn depth_in_range(depth_mm: u16) -> bool {
    (DEPTH_MIN_MM..=DEPTH_MAX_MM).contains(&depth_mm)
}

/// Which bundle artifacts were written, and where.
#[derive(Debug, Clone)]
pub struct CaptureReport {
    pub directory: PathBuf,
    pub color: Option<PathBuf>,
    pub ir: Option<PathBuf>,
    pub depth: Option<PathBuf>,
    pub cloud: Option<PathBuf>,
    /// Points that passed the depth validity test and were emitted.
    pub points: usize,
}

impl CaptureReport {
    fn new(directory: &Path) -> Self {
        Self {
            directory: directory.to_path_buf(),
            color: None,
            ir: None,
            depth: None,
            cloud: None,
            points: 0,
        }
    }
}

impl fmt::Display for CaptureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn mark(artifact: &Option<PathBuf>) -> &'static str {
            if artifact.is_some() {
                "ok"
            } else {
                "fail"
            }
        }
        write!(
            f,
            "Capture saved to {} (color={}, ir={}, depth={}, points={})",
            self.directory.display(),
            mark(&self.color),
            mark(&self.ir),
            mark(&self.depth),
            self.points
        )
    }
}

/// Writes `color.ppm`, `ir.pgm`, `depth_mm.pgm` and `scan.ply` for
/// whichever channels the frame carries, creating `dir` if needed.
pub fn export_capture_bundle(
    dir: &Path,
    frame: &FrameData,
    generation: Generation,
) -> CaptureReport {
    let mut report = CaptureReport::new(dir);

    if let Err(e) = fs::create_dir_all(dir) {
        log::warn!("Could not create capture directory {}: {e}", dir.display());
        return report;
    }

    if frame.has_rgb() {
        let path = dir.join("color.ppm");
        match write_color_ppm(&path, &frame.rgb, frame.width, frame.height) {
            Ok(()) => report.color = Some(path),
            Err(e) => log::warn!("Color export failed: {e}"),
        }
    }

    if frame.has_ir() {
        let path = dir.join("ir.pgm");
        match write_gray_pgm(&path, &frame.ir, frame.width, frame.height) {
            Ok(()) => report.ir = Some(path),
            Err(e) => log::warn!("IR export failed: {e}"),
        }
    }

    if frame.has_depth() {
        let path = dir.join("depth_mm.pgm");
        match write_depth_pgm16(&path, &frame.depth, frame.width, frame.height) {
            Ok(()) => report.depth = Some(path),
            Err(e) => log::warn!("Depth export failed: {e}"),
        }

        let path = dir.join("scan.ply");
        match write_point_cloud_ply(&path, frame, generation) {
            Ok(points) => {
                report.cloud = Some(path);
                report.points = points;
            }
            Err(e) => log::warn!("Point cloud export failed: {e}"),
        }
    }

    log::info!("{report}");
    report
}

fn check_len(len: usize, needed: usize, what: &str) -> io::Result<()> {
    if len < needed {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{what} holds {len} elements, {needed} needed"),
        ));
    }
    Ok(())
}

/// Binary PPM, `P6`, 8-bit RGB.
pub fn write_color_ppm(path: &Path, rgb: &[u8], width: u32, height: u32) -> io::Result<()> {
    let pixels = width as usize * height as usize;
    check_len(rgb.len(), pixels * 3, "rgb buffer")?;

    let mut out = BufWriter::new(File::create(path)?);
    write!(out, "P6\n{width} {height}\n255\n")?;
    out.write_all(&rgb[..pixels * 3])?;
    out.flush()
}

/// Binary PGM, `P5`, 8-bit single channel.
pub fn write_gray_pgm(path: &Path, gray: &[u8], width: u32, height: u32) -> io::Result<()> {
    let pixels = width as usize * height as usize;
    check_len(gray.len(), pixels, "gray buffer")?;

    let mut out = BufWriter::new(File::create(path)?);
    write!(out, "P5\n{width} {height}\n255\n")?;
    out.write_all(&gray[..pixels])?;
    out.flush()
}

/// Binary PGM, `P5`, 16-bit samples. PGM requires big-endian sample
/// bytes regardless of host order.
pub fn write_depth_pgm16(path: &Path, depth: &[u16], width: u32, height: u32) -> io::Result<()> {
    let pixels = width as usize * height as usize;
    check_len(depth.len(), pixels, "depth buffer")?;

    let mut out = BufWriter::new(File::create(path)?);
    write!(out, "P5\n{width} {height}\n65535\n")?;
    for &sample in &depth[..pixels] {
        out.write_all(&sample.to_be_bytes())?;
    }
    out.flush()
}

/// ASCII PLY point cloud from the frame's depth channel.
///
/// Each valid depth pixel is back-projected through the intrinsics for
/// (generation, frame resolution) into meters. Point color prefers the
/// co-located RGB sample, then the IR sample broadcast to gray, then a
/// gray ramp over the valid depth range (near is bright). Returns the
/// number of points written, which always matches the header count.
pub fn write_point_cloud_ply(
    path: &Path,
    frame: &FrameData,
    generation: Generation,
) -> io::Result<usize> {
    let pixels = frame.width as usize * frame.height as usize;
    check_len(frame.depth.len(), pixels.max(1), "depth buffer")?;

    let intr = intrinsics::lookup(generation, frame.width, frame.height);
    let valid = frame.depth[..pixels]
        .iter()
        .filter(|&&d| depth_in_range(d))
        .count();

    let mut out = BufWriter::new(File::create(path)?);
    write!(
        out,
        "ply\nformat ascii 1.0\nelement vertex {valid}\n\
         property float x\nproperty float y\nproperty float z\n\
         property uchar red\nproperty uchar green\nproperty uchar blue\n\
         end_header\n"
    )?;

    let has_rgb = frame.has_rgb();
    let has_ir = frame.has_ir();
    let mut written = 0usize;
    for py in 0..frame.height {
        for px in 0..frame.width {
            let i = (py * frame.width + px) as usize;
            let d = frame.depth[i];
            if !depth_in_range(d) {
                continue;
            }
            let [x, y, z] = intr.deproject(px, py, d);
            let [r, g, b] = point_color(frame, i, d, has_rgb, has_ir);
            writeln!(out, "{x} {y} {z} {r} {g} {b}")?;
            written += 1;
        }
    }
    out.flush()?;
    Ok(written)
}

fn point_color(frame: &FrameData, index: usize, depth_mm: u16, has_rgb: bool, has_ir: bool) -> [u8; 3] {
    if has_rgb {
        let base = index * 3;
        [frame.rgb[base], frame.rgb[base + 1], frame.rgb[base + 2]]
    } else if has_ir {
        let v = frame.ir[index];
        [v, v, v]
    } else {
        let g = depth_ramp_gray(depth_mm);
        [g, g, g]
    }
}

/// Gray level for an in-range depth, 255 at the near bound falling
/// linearly to 0 at the far bound.
fn depth_ramp_gray(depth_mm: u16) -> u8 {
    let t = f64::from(depth_mm - DEPTH_MIN_MM) / f64::from(DEPTH_MAX_MM - DEPTH_MIN_MM);
    (255.0 * (1.0 - t)).round() as u8
}

/// Blue-to-red false color for displaying a depth value, black for
/// invalid 0. Display collaborators use this for live depth views.
pub fn depth_to_false_color(depth_mm: u16) -> [u8; 3] {
    if depth_mm == 0 {
        return [0, 0, 0];
    }
    const NEAR: f64 = 400.0;
    const FAR: f64 = 6000.0;
    let t = ((f64::from(depth_mm) - NEAR) / (FAR - NEAR)).clamp(0.0, 1.0);
    let hue = (1.0 - t) * 240.0;

    let sector = (hue / 60.0) as u32;
    let f = hue / 60.0 - f64::from(sector);
    let rising = (f * 255.0).round() as u8;
    let falling = ((1.0 - f) * 255.0).round() as u8;
    match sector {
        0 => [255, rising, 0],
        1 => [falling, 255, 0],
        2 => [0, 255, rising],
        3 => [0, falling, 255],
        _ => [rising, 0, 255],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read};

    fn read_bytes(path: &Path) -> Vec<u8> {
        let mut bytes = Vec::new();
        File::open(path).unwrap().read_to_end(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn ppm_header_and_payload_are_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.ppm");
        let rgb: Vec<u8> = (0..2 * 2 * 3).map(|v| v as u8).collect();
        write_color_ppm(&path, &rgb, 2, 2).unwrap();

        let bytes = read_bytes(&path);
        assert!(bytes.starts_with(b"P6\n2 2\n255\n"));
        assert_eq!(&bytes[11..], &rgb[..]);
    }

    #[test]
    fn pgm16_payload_is_big_endian() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.pgm");
        write_depth_pgm16(&path, &[0x0102, 0xFFFE], 2, 1).unwrap();

        let bytes = read_bytes(&path);
        assert!(bytes.starts_with(b"P5\n2 1\n65535\n"));
        assert_eq!(&bytes[13..], &[0x01, 0x02, 0xFF, 0xFE]);
    }

    #[test]
    fn short_buffers_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_color_ppm(&dir.path().join("c.ppm"), &[0; 5], 2, 2).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        let err = write_gray_pgm(&dir.path().join("i.pgm"), &[0; 3], 2, 2).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn depth_range_bounds_are_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.ply");
        let frame = FrameData {
            depth: vec![0, 349, 350, 6000, 6001],
            width: 5,
            height: 1,
            ..Default::default()
        };
        let points = write_point_cloud_ply(&path, &frame, Generation::V1).unwrap();
        assert_eq!(points, 2);

        let text = String::from_utf8(read_bytes(&path)).unwrap();
        assert!(text.contains("element vertex 2\n"));
        let data_lines = text
            .lines()
            .skip_while(|l| *l != "end_header")
            .skip(1)
            .count();
        assert_eq!(data_lines, points);
    }

    #[test]
    fn flat_wall_round_trips_through_the_cloud() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.ply");
        let (w, h) = (512u32, 424u32);
        let pixels = (w * h) as usize;
        let frame = FrameData {
            rgb: vec![255; pixels * 3],
            depth: vec![1000; pixels],
            width: w,
            height: h,
            ..Default::default()
        };

        let points = write_point_cloud_ply(&path, &frame, Generation::V2).unwrap();
        assert_eq!(points, pixels);

        let mut lines = BufReader::new(File::open(&path).unwrap()).lines();
        let mut header = Vec::new();
        for line in lines.by_ref() {
            let line = line.unwrap();
            if line == "end_header" {
                break;
            }
            header.push(line);
        }
        assert!(header.contains(&format!("element vertex {pixels}")));

        let first = lines.next().unwrap().unwrap();
        let fields: Vec<&str> = first.split_whitespace().collect();
        assert_eq!(fields.len(), 6);
        let z: f64 = fields[2].parse().unwrap();
        assert_eq!(z, 1.0, "1000 mm must come back as exactly 1 m");
        assert_eq!(&fields[3..], &["255", "255", "255"]);

        // Pixel (0,0) sits left of and above the principal point.
        let x: f64 = fields[0].parse().unwrap();
        let y: f64 = fields[1].parse().unwrap();
        assert!(x < 0.0 && y < 0.0);
    }

    #[test]
    fn point_color_falls_back_from_rgb_to_ir_to_ramp() {
        let dir = tempfile::tempdir().unwrap();

        let mut frame = FrameData {
            depth: vec![350],
            width: 1,
            height: 1,
            ..Default::default()
        };
        let ply = |frame: &FrameData, name: &str| {
            let path = dir.path().join(name);
            write_point_cloud_ply(&path, frame, Generation::V1).unwrap();
            String::from_utf8(read_bytes(&path)).unwrap()
        };

        // Depth only: near bound maps to the bright end of the ramp.
        let text = ply(&frame, "ramp.ply");
        assert!(text.ends_with("255 255 255\n"));
        frame.depth = vec![6000];
        let text = ply(&frame, "ramp_far.ply");
        assert!(text.ends_with("0 0 0\n"));

        frame.ir = vec![80];
        let text = ply(&frame, "ir.ply");
        assert!(text.ends_with("80 80 80\n"));

        frame.rgb = vec![10, 20, 30];
        let text = ply(&frame, "rgb.ply");
        assert!(text.ends_with("10 20 30\n"));
    }

    #[test]
    fn bundle_skips_missing_channels() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("bundle");
        let frame = FrameData {
            rgb: vec![9; 4 * 2 * 3],
            depth: vec![1200; 4 * 2],
            width: 4,
            height: 2,
            ..Default::default()
        };

        let report = export_capture_bundle(&out, &frame, Generation::V1);
        assert!(report.color.is_some());
        assert!(report.ir.is_none());
        assert!(report.depth.is_some());
        assert!(report.cloud.is_some());
        assert_eq!(report.points, 8);
        assert!(out.join("color.ppm").is_file());
        assert!(out.join("depth_mm.pgm").is_file());
        assert!(out.join("scan.ply").is_file());
        assert!(!out.join("ir.pgm").exists());

        let line = report.to_string();
        assert!(line.contains("color=ok"));
        assert!(line.contains("ir=fail"));
        assert!(line.contains("points=8"));
    }

    #[test]
    fn false_color_endpoints() {
        assert_eq!(depth_to_false_color(0), [0, 0, 0]);
        assert_eq!(depth_to_false_color(400), [0, 0, 255]);
        assert_eq!(depth_to_false_color(6000), [255, 0, 0]);
        assert_eq!(depth_to_false_color(3200), [0, 255, 0]);
        // Clamped outside the display range, still not black.
        assert_eq!(depth_to_false_color(100), [0, 0, 255]);
        assert_eq!(depth_to_false_color(9000), [255, 0, 0]);
    }
}
