//! Shared libusb plumbing for both sensor generations.

use crate::Result;
use rusb::UsbContext;
use std::time::Duration;

/// Microsoft vendor id, common to every Kinect sub-device.
pub const VID: u16 = 0x045e;

pub fn create_context() -> Result<rusb::Context> {
    Ok(rusb::Context::new()?)
}

fn matches(device: &rusb::Device<rusb::Context>, pids: &[u16]) -> bool {
    device
        .device_descriptor()
        .map(|desc| desc.vendor_id() == VID && pids.contains(&desc.product_id()))
        .unwrap_or(false)
}

/// All attached devices whose product id is in `pids`, in bus order.
pub fn matching_devices(
    ctx: &rusb::Context,
    pids: &[u16],
) -> Result<Vec<rusb::Device<rusb::Context>>> {
    let devices = ctx.devices()?;
    Ok(devices.iter().filter(|d| matches(d, pids)).collect())
}

/// Enumerate with a bounded retry. USB enumeration right after a replug
/// can transiently report nothing, so an empty result is retried after
/// `delay` up to `attempts` times before being believed.
pub fn enumerate_with_retries(
    ctx: &rusb::Context,
    pids: &[u16],
    attempts: u32,
    delay: Duration,
) -> Vec<rusb::Device<rusb::Context>> {
    for attempt in 1..=attempts {
        match matching_devices(ctx, pids) {
            Ok(devices) if !devices.is_empty() => return devices,
            Ok(_) => {}
            Err(e) => {
                log::warn!("USB enumeration failed (attempt {attempt}/{attempts}): {e}");
            }
        }
        if attempt < attempts {
            std::thread::sleep(delay);
        }
    }
    Vec::new()
}

/// Open a device and claim `interface`, detaching any kernel driver
/// first where the platform supports it.
pub fn open_claim(
    device: &rusb::Device<rusb::Context>,
    interface: u8,
) -> Result<rusb::DeviceHandle<rusb::Context>> {
    let handle = device.open()?;

    match handle.set_auto_detach_kernel_driver(true) {
        Ok(_) | Err(rusb::Error::NotSupported) => {}
        Err(e) => log::warn!("Auto-detach not enabled: {e} (continuing)"),
    }
    match handle.detach_kernel_driver(interface) {
        Ok(_) => log::info!("Detached kernel driver from interface {interface}"),
        Err(rusb::Error::NotFound) => {}
        Err(rusb::Error::NotSupported) => {}
        Err(e) => log::warn!("Detach: {e} (continuing)"),
    }

    handle.claim_interface(interface)?;
    Ok(handle)
}

/// Serial string for a device, opened temporarily if no handle is at
/// hand. Returns `None` when the unit reports no serial or an unusable
/// all-zero one, which real first-generation cameras do.
pub fn read_serial(device: &rusb::Device<rusb::Context>) -> Option<String> {
    let desc = device.device_descriptor().ok()?;
    let handle = device.open().ok()?;
    let serial = handle.read_serial_number_string_ascii(&desc).ok()?;
    usable_serial(&serial)
}

fn usable_serial(serial: &str) -> Option<String> {
    let trimmed = serial.trim();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '0') {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_zero_serials_are_unusable() {
        assert_eq!(usable_serial("0000000000000000"), None);
        assert_eq!(usable_serial(""), None);
        assert_eq!(usable_serial("  "), None);
        assert_eq!(
            usable_serial("A00366912345047A"),
            Some("A00366912345047A".to_string())
        );
    }

    #[test]
    fn empty_pid_list_matches_nothing() {
        if let Ok(ctx) = create_context() {
            let devices = matching_devices(&ctx, &[]).unwrap_or_default();
            assert!(devices.is_empty());
        }
    }
}
