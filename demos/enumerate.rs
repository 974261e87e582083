//! List all connected Kinect devices across both generations.

fn main() {
    env_logger::init();

    let mut total = 0;
    for mut backend in kinect::all_backends() {
        let probe = backend.probe();
        println!("{}: {}", backend.name(), probe.detail);
        if !probe.available {
            continue;
        }

        for (i, dev) in backend.list_devices().iter().enumerate() {
            println!("  [{}] {}  serial={}", i, dev.name, dev.serial);
            total += 1;
        }
    }

    if total == 0 {
        eprintln!("No Kinect devices attached.");
        std::process::exit(1);
    }
}
