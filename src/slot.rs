//! Single-frame hand-off between reader threads and the consumer.
//!
//! One mutex-guarded slot holds the latest [`FrameData`] plus a fresh
//! flag. Producers overwrite the slot and raise the flag; the consumer
//! copies the frame out and lowers it. A frame never read before the
//! next arrives is silently superseded. Channel buffers persist across
//! reads, so a snapshot accumulates the most recent arrival of each
//! channel; only the flag is consumed.

use crate::types::FrameData;
use std::sync::Mutex;

pub(crate) struct FrameSlot {
    state: Mutex<SlotState>,
}

struct SlotState {
    frame: FrameData,
    fresh: bool,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                frame: FrameData::default(),
                fresh: false,
            }),
        }
    }

    /// Producer side: mutate the shared frame under the lock and mark
    /// it fresh. `write` typically replaces one channel and restamps
    /// dimensions and timestamp.
    pub fn store(&self, write: impl FnOnce(&mut FrameData)) {
        if let Ok(mut state) = self.state.lock() {
            write(&mut state.frame);
            state.fresh = true;
        }
    }

    /// Consumer side: copy the latest frame into `out` exactly once per
    /// fresh arrival. Returns false, leaving `out` untouched, when
    /// nothing new has been stored since the previous call.
    pub fn take_into(&self, out: &mut FrameData) -> bool {
        match self.state.lock() {
            Ok(mut state) if state.fresh => {
                out.clone_from(&state.frame);
                state.fresh = false;
                true
            }
            _ => false,
        }
    }

    pub fn has_fresh(&self) -> bool {
        self.state.lock().map(|s| s.fresh).unwrap_or(false)
    }

    /// Drops any pending frame and clears every channel. Used when a
    /// stream (re)start invalidates previously captured data.
    pub fn reset(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.frame = FrameData::default();
            state.fresh = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn uniform_frame(value: u8) -> impl FnOnce(&mut FrameData) {
        move |frame| {
            frame.rgb = vec![value; 8 * 4 * 3];
            frame.width = 8;
            frame.height = 4;
            frame.timestamp = value as u32;
        }
    }

    #[test]
    fn fresh_flag_is_consumed_on_read() {
        let slot = FrameSlot::new();
        let mut out = FrameData::default();
        assert!(!slot.take_into(&mut out));

        slot.store(uniform_frame(7));
        assert!(slot.has_fresh());
        assert!(slot.take_into(&mut out));
        assert_eq!(out.timestamp, 7);

        assert!(!slot.take_into(&mut out));
        assert_eq!(out.timestamp, 7, "missed read must not clobber the copy");
    }

    #[test]
    fn unread_frames_are_superseded() {
        let slot = FrameSlot::new();
        slot.store(uniform_frame(1));
        slot.store(uniform_frame(2));

        let mut out = FrameData::default();
        assert!(slot.take_into(&mut out));
        assert_eq!(out.timestamp, 2);
        assert!(!slot.take_into(&mut out));
    }

    #[test]
    fn channels_persist_until_reset() {
        let slot = FrameSlot::new();
        slot.store(uniform_frame(3));
        let mut out = FrameData::default();
        assert!(slot.take_into(&mut out));

        // A depth-only arrival leaves the earlier rgb channel in place.
        slot.store(|frame| {
            frame.depth = vec![500; 8 * 4];
            frame.timestamp = 9;
        });
        assert!(slot.take_into(&mut out));
        assert!(out.has_rgb());
        assert!(out.has_depth());

        slot.reset();
        assert!(!slot.has_fresh());
        slot.store(|frame| frame.timestamp = 1);
        assert!(slot.take_into(&mut out));
        assert!(out.rgb.is_empty());
    }

    #[test]
    fn concurrent_reads_never_tear() {
        let slot = Arc::new(FrameSlot::new());
        let producer = Arc::clone(&slot);

        let writer = std::thread::spawn(move || {
            for round in 0..500u32 {
                let value = (round % 251) as u8;
                producer.store(move |frame| {
                    frame.rgb = vec![value; 16 * 2 * 3];
                    frame.width = 16;
                    frame.height = 2;
                    frame.timestamp = value as u32;
                });
            }
        });

        let mut out = FrameData::default();
        let mut seen = 0u32;
        while seen < 100 {
            if slot.take_into(&mut out) {
                let expected = out.timestamp as u8;
                assert!(out.rgb.iter().all(|&b| b == expected), "torn frame");
                seen += 1;
            }
            if writer.is_finished() {
                break;
            }
        }
        writer.join().unwrap();
    }
}
