//! Frame-in-flight cycling and deferred reclamation
//!
//! The swapchain keeps two or three frames in flight; a resource released
//! while any of them might still reference it cannot be freed yet. The
//! coordinator cycles the frame slots, waits on the backend's fences with a
//! bounded budget, and hands queued releases back once their safety window
//! has elapsed.

use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;

/// Upper bound on simultaneously in-flight frames (triple buffering).
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("fence for frame slot {frame_index} not signaled within {timeout_ms} ms, treating device as lost")]
    DeviceLost { frame_index: usize, timeout_ms: u64 },
}

/// Source of frame-completion fences, implemented by the render backend.
///
/// Slot fences start signaled: `wait` must return `true` immediately for a
/// slot that has never had work submitted.
pub trait FenceProvider {
    /// Block until the GPU work submitted for `frame_index` has completed,
    /// or `timeout` expires. Returns `false` on expiry.
    fn wait(&mut self, frame_index: usize, timeout: Duration) -> bool;
}

struct Retired<T> {
    retire_at: u64,
    payload: T,
}

/// Cycles frame slots and retires deferred payloads.
///
/// `T` is whatever the owner needs to reclaim later (blocks, ranges,
/// descriptor slots). Payloads deferred during absolute frame `A` are
/// handed back at the start of frame `A + frames_in_flight`, the first
/// frame that begins after every frame that could reference them has
/// passed its fence.
pub struct FrameCoordinator<T> {
    frames_in_flight: usize,
    fence_timeout: Duration,
    current_slot: usize,
    absolute_frame: u64,
    retire_queue: VecDeque<Retired<T>>,
}

impl<T> FrameCoordinator<T> {
    pub fn new(frames_in_flight: usize, fence_timeout: Duration) -> Self {
        assert!(
            (2..=MAX_FRAMES_IN_FLIGHT).contains(&frames_in_flight),
            "frames in flight must be 2..={}, got {}",
            MAX_FRAMES_IN_FLIGHT,
            frames_in_flight
        );
        Self {
            frames_in_flight,
            fence_timeout,
            current_slot: 0,
            absolute_frame: 0,
            retire_queue: VecDeque::new(),
        }
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Slot index the frame currently being recorded maps to.
    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// Monotonic frame counter, incremented by [`end_frame`](Self::end_frame).
    #[inline]
    pub fn absolute_frame(&self) -> u64 {
        self.absolute_frame
    }

    #[inline]
    pub fn pending_retires(&self) -> usize {
        self.retire_queue.len()
    }

    /// Wait for this slot's previous submission, then drain every payload
    /// whose safety window has elapsed.
    ///
    /// A fence that does not signal within the budget is fatal; there is no
    /// retry path that would not risk reusing memory the GPU still reads.
    pub fn begin_frame(
        &mut self,
        fences: &mut impl FenceProvider,
    ) -> Result<Vec<T>, FrameError> {
        if !fences.wait(self.current_slot, self.fence_timeout) {
            tracing::error!(
                frame_index = self.current_slot,
                timeout_ms = self.fence_timeout.as_millis() as u64,
                "in-flight fence wait expired"
            );
            return Err(FrameError::DeviceLost {
                frame_index: self.current_slot,
                timeout_ms: self.fence_timeout.as_millis() as u64,
            });
        }

        let mut retired = Vec::new();
        while let Some(front) = self.retire_queue.front() {
            if front.retire_at > self.absolute_frame {
                break;
            }
            // Queue is in retire_at order, push order equals defer order.
            retired.push(self.retire_queue.pop_front().expect("front checked").payload);
        }
        Ok(retired)
    }

    /// Queue a payload for reclamation once every frame currently in
    /// flight has completed.
    pub fn defer(&mut self, payload: T) {
        self.retire_queue.push_back(Retired {
            retire_at: self.absolute_frame + self.frames_in_flight as u64,
            payload,
        });
    }

    /// Advance to the next frame slot.
    pub fn end_frame(&mut self) {
        self.current_slot = (self.current_slot + 1) % self.frames_in_flight;
        self.absolute_frame += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fences that signal immediately, optionally jamming one slot.
    struct TestFences {
        stuck_slot: Option<usize>,
    }

    impl FenceProvider for TestFences {
        fn wait(&mut self, frame_index: usize, _timeout: Duration) -> bool {
            self.stuck_slot != Some(frame_index)
        }
    }

    fn coordinator(frames: usize) -> FrameCoordinator<&'static str> {
        FrameCoordinator::new(frames, Duration::from_millis(100))
    }

    #[test]
    fn slots_cycle_modulo_frames_in_flight() {
        let mut frames = coordinator(3);
        let mut fences = TestFences { stuck_slot: None };
        let mut seen = Vec::new();
        for _ in 0..7 {
            frames.begin_frame(&mut fences).unwrap();
            seen.push(frames.current_slot());
            frames.end_frame();
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(frames.absolute_frame(), 7);
    }

    #[test]
    fn deferred_payloads_wait_out_the_window() {
        let mut frames = coordinator(2);
        let mut fences = TestFences { stuck_slot: None };

        // Frame 0: release something mid-frame.
        frames.begin_frame(&mut fences).unwrap();
        frames.defer("geometry");
        frames.end_frame();

        // Frame 1 may still reference it: nothing retires.
        assert_eq!(frames.begin_frame(&mut fences).unwrap(), Vec::<&str>::new());
        frames.end_frame();

        // Frame 2 = 0 + frames_in_flight: safe now.
        assert_eq!(frames.begin_frame(&mut fences).unwrap(), vec!["geometry"]);
        assert_eq!(frames.pending_retires(), 0);
        frames.end_frame();
    }

    #[test]
    fn retires_preserve_defer_order() {
        let mut frames = coordinator(2);
        let mut fences = TestFences { stuck_slot: None };

        frames.begin_frame(&mut fences).unwrap();
        frames.defer("first");
        frames.defer("second");
        frames.end_frame();
        frames.begin_frame(&mut fences).unwrap();
        frames.defer("third");
        frames.end_frame();

        assert_eq!(
            frames.begin_frame(&mut fences).unwrap(),
            vec!["first", "second"]
        );
        frames.end_frame();
        assert_eq!(frames.begin_frame(&mut fences).unwrap(), vec!["third"]);
    }

    #[test]
    fn fence_timeout_is_device_lost() {
        let mut frames = coordinator(2);
        let mut fences = TestFences {
            stuck_slot: Some(1),
        };

        frames.begin_frame(&mut fences).unwrap();
        frames.defer("material");
        frames.end_frame();

        let err = frames.begin_frame(&mut fences).unwrap_err();
        assert_eq!(
            err,
            FrameError::DeviceLost {
                frame_index: 1,
                timeout_ms: 100
            }
        );
        // Nothing retired through the failed frame.
        assert_eq!(frames.pending_retires(), 1);
    }

    #[test]
    #[should_panic(expected = "frames in flight")]
    fn rejects_out_of_range_frame_count() {
        let _ = coordinator(4);
    }
}
