//! The display backend seam.
//!
//! The session core never touches real display hardware; it hands
//! composed [`RenderList`]s to a [`DisplayBackend`] and consumes the
//! presentation acks it reports back. [`Headless`] is the in-tree
//! implementation: it acks immediately and records every frame, which is
//! what the integration tests (and the bounded demo binary) run against.

use indexmap::IndexMap;

use crate::output::OutputId;
use crate::scene::RenderList;
use crate::{Result, TrixieError};

/// Where composed frames go.
///
/// `present` submits a frame; the backend later reports the outcome via
/// `poll_acks`. A present that fails *synchronously* (the backend refused
/// the frame outright) is a [`PresentationFailure`]: the session skips
/// that frame and carries on.
///
/// [`PresentationFailure`]: crate::TrixieError::PresentationFailure
pub trait DisplayBackend {
    /// Submits a composed frame for an output.
    fn present(&mut self, output: OutputId, frame: &RenderList) -> Result<()>;

    /// Drains presentation outcomes for previously submitted frames.
    ///
    /// Each entry is `(output, success)`. A failed ack also means the
    /// frame was skipped, not that anything is fatally wrong.
    fn poll_acks(&mut self) -> Vec<(OutputId, bool)>;
}

/// A backend that displays nothing.
///
/// Every presented frame is recorded and acked on the next poll. Tests
/// can inject failures per output to exercise the skip paths.
#[derive(Debug, Default)]
pub struct Headless {
    pending_acks: Vec<(OutputId, bool)>,
    last_frames: IndexMap<OutputId, RenderList>,
    presented: u64,
    fail_present: Vec<OutputId>,
    fail_ack: Vec<OutputId>,
    hold_acks: bool,
}

impl Headless {
    /// Creates a headless backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// The total number of frames accepted so far.
    pub fn presented_count(&self) -> u64 {
        self.presented
    }

    /// The most recent frame accepted for an output.
    pub fn last_frame(&self, output: OutputId) -> Option<&RenderList> {
        self.last_frames.get(&output)
    }

    /// Makes the next `present` for `output` fail synchronously.
    pub fn fail_next_present(&mut self, output: OutputId) {
        self.fail_present.push(output);
    }

    /// Makes the next frame for `output` be accepted but acked as failed.
    pub fn fail_next_ack(&mut self, output: OutputId) {
        self.fail_ack.push(output);
    }

    /// Holds presentation acks back until released, to keep frames in
    /// the presenting phase across polls.
    pub fn set_hold_acks(&mut self, hold: bool) {
        self.hold_acks = hold;
    }
}

impl DisplayBackend for Headless {
    fn present(&mut self, output: OutputId, frame: &RenderList) -> Result<()> {
        if let Some(pos) = self.fail_present.iter().position(|o| *o == output) {
            self.fail_present.remove(pos);
            return Err(TrixieError::PresentationFailure(output));
        }

        let success = match self.fail_ack.iter().position(|o| *o == output) {
            Some(pos) => {
                self.fail_ack.remove(pos);
                false
            }
            None => true,
        };

        self.presented += 1;
        self.last_frames.insert(output, frame.clone());
        self.pending_acks.push((output, success));
        Ok(())
    }

    fn poll_acks(&mut self) -> Vec<(OutputId, bool)> {
        if self.hold_acks {
            return Vec::new();
        }
        std::mem::take(&mut self.pending_acks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn out(n: u64) -> OutputId {
        OutputId(n)
    }

    #[test]
    fn test_headless_acks_each_present_once() {
        let mut backend = Headless::new();

        backend.present(out(0), &RenderList::default()).unwrap();
        backend.present(out(1), &RenderList::default()).unwrap();

        assert_eq!(backend.poll_acks(), vec![(out(0), true), (out(1), true)]);
        assert!(backend.poll_acks().is_empty());
        assert_eq!(backend.presented_count(), 2);
    }

    #[test]
    fn test_injected_present_failure_is_one_shot() {
        let mut backend = Headless::new();
        backend.fail_next_present(out(0));

        let err = backend.present(out(0), &RenderList::default()).unwrap_err();
        assert_eq!(err, TrixieError::PresentationFailure(out(0)));

        backend.present(out(0), &RenderList::default()).unwrap();
        assert_eq!(backend.poll_acks(), vec![(out(0), true)]);
    }

    #[test]
    fn test_injected_ack_failure() {
        let mut backend = Headless::new();
        backend.fail_next_ack(out(0));

        backend.present(out(0), &RenderList::default()).unwrap();
        assert_eq!(backend.poll_acks(), vec![(out(0), false)]);
    }
}
