//! Stream frames from the first attached Kinect to stdout.
//!
//! Usage: cargo run --example stream [rgb|ir|depth]
//! Press Ctrl+C to stop.

use kinect::{FrameData, StreamKind};
use std::time::{Duration, Instant};

fn main() {
    env_logger::init();

    let kind = match std::env::args().nth(1).as_deref() {
        Some("ir") => StreamKind::Ir,
        Some("depth") => StreamKind::Depth,
        _ => StreamKind::Rgb,
    };

    let mut device = None;
    for mut backend in kinect::all_backends() {
        let probe = backend.probe();
        println!("{}: {}", backend.name(), probe.detail);
        if !probe.available {
            continue;
        }
        if let Some(info) = backend.list_devices().into_iter().next() {
            match backend.open_device(&info.serial) {
                Ok(dev) => {
                    println!("Opened {}", info.name);
                    device = Some(dev);
                    break;
                }
                Err(e) => eprintln!("Failed to open {}: {}", info.serial, e),
            }
        }
    }
    let Some(mut device) = device else {
        eprintln!("No Kinect device available.");
        std::process::exit(1);
    };

    device.set_stream_kind(kind);
    if !device.start() {
        eprintln!("Failed to start streaming");
        std::process::exit(1);
    }
    println!("Streaming {:?} (Ctrl+C to stop)...", kind);

    let start = Instant::now();
    let mut frame = FrameData::default();
    let mut count: u64 = 0;
    let mut last_frame = Instant::now();
    let mut last_report = Instant::now();

    loop {
        if device.update() && device.get_frame(&mut frame) {
            count += 1;
            last_frame = Instant::now();

            // Print every ~30th frame to avoid flooding the terminal
            if count % 30 == 1 {
                println!(
                    "ts={:<10}  {}x{}  rgb={}  depth={}  ir={}  audio={:.3}",
                    frame.timestamp,
                    frame.width,
                    frame.height,
                    frame.rgb.len(),
                    frame.depth.len(),
                    frame.ir.len(),
                    device.audio_level(),
                );
            }
        }

        let now = Instant::now();
        if now.duration_since(last_report) >= Duration::from_secs(3) {
            let elapsed = start.elapsed().as_secs_f64();
            let hz = count as f64 / elapsed;
            println!("--- {} frames in {:.1}s ({:.1} Hz) ---", count, elapsed, hz);
            last_report = now;
        }
        if now.duration_since(last_frame) >= Duration::from_secs(5) {
            eprintln!("Timeout waiting for frames");
            break;
        }
    }

    device.stop();
    let elapsed = start.elapsed().as_secs_f64();
    println!(
        "\nTotal: {} frames in {:.1}s ({:.1} Hz)",
        count,
        elapsed,
        count as f64 / elapsed
    );
}
