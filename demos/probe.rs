//! Probe backend availability and run a short preview against each
//! generation that has a device attached.
//!
//! Usage: cargo run --example probe

use std::time::Duration;

fn main() {
    env_logger::init();

    for mut backend in kinect::all_backends() {
        let probe = backend.probe();
        println!("{}: available={} ({})", backend.name(), probe.available, probe.detail);
        if !probe.available || backend.list_devices().is_empty() {
            continue;
        }

        println!("  previewing for 3 seconds...");
        let result = backend.preview(Duration::from_secs(3));
        println!(
            "  {} color={} depth={}",
            result.detail, result.color_frames, result.depth_frames
        );
    }
}
