//! Grab one frame from the first attached Kinect and export a capture
//! bundle: color.ppm, ir.pgm, depth_mm.pgm and scan.ply.
//!
//! Usage: cargo run --example capture [output-dir]

use kinect::export::export_capture_bundle;
use kinect::{FrameData, StreamKind};
use std::path::Path;
use std::time::{Duration, Instant};

fn main() {
    env_logger::init();

    let out_dir = std::env::args().nth(1).unwrap_or_else(|| "capture".to_string());

    let mut opened = None;
    for mut backend in kinect::all_backends() {
        let probe = backend.probe();
        println!("{}: {}", backend.name(), probe.detail);
        if !probe.available {
            continue;
        }
        if let Some(info) = backend.list_devices().into_iter().next() {
            match backend.open_device(&info.serial) {
                Ok(dev) => {
                    opened = Some((backend.generation(), dev));
                    break;
                }
                Err(e) => eprintln!("Failed to open {}: {}", info.serial, e),
            }
        }
    }
    let Some((generation, mut device)) = opened else {
        eprintln!("No Kinect device available.");
        std::process::exit(1);
    };

    // Generation 2 decodes only the selected stream, and the cloud
    // needs depth. Generation 1 streams video alongside regardless.
    device.set_stream_kind(StreamKind::Depth);

    if !device.start() {
        eprintln!("Failed to start streaming");
        std::process::exit(1);
    }

    // Wait for a frame that carries depth so the bundle has a cloud.
    println!("Waiting for a depth-bearing frame...");
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut frame = FrameData::default();
    let mut captured = false;
    while Instant::now() < deadline {
        if device.update() && device.get_frame(&mut frame) && frame.has_depth() {
            captured = true;
            break;
        }
    }
    device.stop();

    if !captured {
        eprintln!("No depth frame arrived within 10s");
        std::process::exit(1);
    }

    let report = export_capture_bundle(Path::new(&out_dir), &frame, generation);
    println!("{}", report);
}
