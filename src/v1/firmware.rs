//! Locating the audio DSP firmware blob (`audios.bin`).
//!
//! The first-generation audio function enumerates as a bootloader and
//! only becomes a microphone after the host uploads this blob. The
//! backend probes for it once at construction; absence simply disables
//! audio input.

use std::path::PathBuf;

pub const FIRMWARE_FILE: &str = "audios.bin";
pub const FIRMWARE_PATH_ENV: &str = "KINECT_FIRMWARE_PATH";

/// Candidate directories in priority order: the environment override,
/// a `firmware/` directory next to the executable, the working
/// directory, then the usual system install locations for the blob.
fn candidate_dirs(env_override: Option<PathBuf>) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(dir) = env_override {
        dirs.push(dir);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            dirs.push(dir.join("firmware"));
        }
    }
    dirs.push(PathBuf::from("firmware"));
    dirs.push(PathBuf::from(".kinect"));
    dirs.push(PathBuf::from("/usr/local/share/libfreenect"));
    dirs.push(PathBuf::from("/usr/share/libfreenect"));
    dirs.push(PathBuf::from("/opt/homebrew/share/libfreenect"));
    dirs
}

fn resolve_in(dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(FIRMWARE_FILE))
        .find(|path| path.is_file())
}

/// Locates `audios.bin`, honoring the `KINECT_FIRMWARE_PATH` override.
pub fn locate() -> Option<PathBuf> {
    let env_override = std::env::var_os(FIRMWARE_PATH_ENV).map(PathBuf::from);
    let found = resolve_in(&candidate_dirs(env_override));
    match &found {
        Some(path) => log::info!("Audio firmware found at {}", path.display()),
        None => log::info!("Audio firmware ({FIRMWARE_FILE}) not found, audio input disabled"),
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_is_highest_priority() {
        let dirs = candidate_dirs(Some(PathBuf::from("/custom/fw")));
        assert_eq!(dirs[0], PathBuf::from("/custom/fw"));
        let dirs = candidate_dirs(None);
        assert!(dirs.iter().all(|d| d != &PathBuf::from("/custom/fw")));
    }

    #[test]
    fn resolve_takes_the_first_dir_holding_the_blob() {
        let empty = tempfile::tempdir().unwrap();
        let stocked = tempfile::tempdir().unwrap();
        std::fs::write(stocked.path().join(FIRMWARE_FILE), b"fw").unwrap();

        let dirs = vec![
            empty.path().to_path_buf(),
            stocked.path().to_path_buf(),
            PathBuf::from("/nonexistent"),
        ];
        assert_eq!(
            resolve_in(&dirs),
            Some(stocked.path().join(FIRMWARE_FILE))
        );
    }

    #[test]
    fn resolve_reports_absence() {
        let empty = tempfile::tempdir().unwrap();
        assert_eq!(resolve_in(&[empty.path().to_path_buf()]), None);
        assert_eq!(resolve_in(&[]), None);
    }
}
