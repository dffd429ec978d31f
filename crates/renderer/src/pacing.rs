//! Frame pacing: which fences to wait on, and when.
//!
//! The CPU may run at most `frames_in_flight` frames ahead of the GPU. Each
//! frame slot owns one fence, signalled when that slot's last submission
//! retires. Waiting on it before reusing the slot is the admission point.
//!
//! Slots and presentable images are not paired: with two slots and three
//! images, image 0 may come back while the submission that last rendered to
//! it belongs to the *other* slot. The [`ImageInFlightTable`] remembers, per
//! image, the fence of the last submission that targeted it, and that fence
//! is waited on before the image is claimed again.
//!
//! Everything here is independent of the driver. [`FenceOps`] is the only
//! contact point, so the protocol can be exercised against a simulated GPU.

use std::fmt;

use lumen_rhi::{RhiError, RhiResult};
use tracing::trace;

/// Blocking wait and reset on CPU-visible fences.
pub trait FenceOps {
    type Fence: Copy + Eq + fmt::Debug;

    /// Blocks until `fence` is signalled.
    fn wait(&mut self, fence: Self::Fence) -> RhiResult<()>;

    /// Returns `fence` to the unsignalled state. It must not be pending.
    fn reset(&mut self, fence: Self::Fence) -> RhiResult<()>;
}

/// Per-image record of the fence guarding the last submission to it.
#[derive(Debug, Clone)]
pub struct ImageInFlightTable<F> {
    entries: Vec<Option<F>>,
}

impl<F: Copy + Eq> ImageInFlightTable<F> {
    /// A cleared table for `image_count` images.
    pub fn new(image_count: usize) -> Self {
        Self {
            entries: vec![None; image_count],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fence recorded for `image`, if any.
    pub fn get(&self, image: usize) -> Option<F> {
        self.entries.get(image).copied().flatten()
    }

    /// Records `fence` for `image` and returns what was there before.
    pub fn claim(&mut self, image: usize, fence: F) -> Option<F> {
        self.entries
            .get_mut(image)
            .and_then(|entry| entry.replace(fence))
    }

    /// Clears every entry and resizes to `image_count`.
    pub fn reset(&mut self, image_count: usize) {
        self.entries.clear();
        self.entries.resize(image_count, None);
    }
}

/// Slot rotation plus the image table, driven through [`FenceOps`].
///
/// One frame is `admit` → `claim_image` → (submit) → `advance`. Admission
/// may be repeated without advancing when the surface turned out stale
/// after the wait; the slot fence is only reset once an image is claimed,
/// so a re-admission never blocks on a fence nothing will signal.
#[derive(Debug)]
pub struct FramePacer<F> {
    slot_fences: Vec<F>,
    images: ImageInFlightTable<F>,
    slot: usize,
    frame_number: u64,
    admitted: bool,
    image: Option<u32>,
}

impl<F: Copy + Eq + fmt::Debug> FramePacer<F> {
    /// One slot per fence in `slot_fences`, each fence initially signalled.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Configuration`] when `slot_fences` is empty.
    pub fn new(slot_fences: Vec<F>, image_count: usize) -> RhiResult<Self> {
        if slot_fences.is_empty() {
            return Err(RhiError::Configuration(
                "frame pacing needs at least one frame slot".to_string(),
            ));
        }

        Ok(Self {
            slot_fences,
            images: ImageInFlightTable::new(image_count),
            slot: 0,
            frame_number: 0,
            admitted: false,
            image: None,
        })
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.slot_fences.len()
    }

    /// Index of the slot the next (or current) frame uses.
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Frames completed via [`FramePacer::advance`] so far.
    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    #[inline]
    pub fn slot_fence(&self) -> F {
        self.slot_fences[self.slot]
    }

    /// Image claimed by the current frame.
    #[inline]
    pub fn image(&self) -> Option<u32> {
        self.image
    }

    /// Slot of the open frame: admitted with an image claimed and not yet
    /// advanced. `None` between frames.
    #[inline]
    pub fn open_slot(&self) -> Option<usize> {
        self.image.map(|_| self.slot)
    }

    pub fn image_table(&self) -> &ImageInFlightTable<F> {
        &self.images
    }

    /// Waits until the current slot's previous submission has retired.
    ///
    /// Returns the slot index; its resources may be reset afterwards.
    pub fn admit<O>(&mut self, ops: &mut O) -> RhiResult<usize>
    where
        O: FenceOps<Fence = F>,
    {
        if self.image.is_some() {
            return Err(RhiError::InvalidState(
                "previous frame was not finished before admitting the next".to_string(),
            ));
        }
        if !self.admitted {
            ops.wait(self.slot_fence())?;
            self.admitted = true;
            trace!("Admitted frame slot {}", self.slot);
        }
        Ok(self.slot)
    }

    /// Takes ownership of `image` for the admitted frame.
    ///
    /// Waits on the fence last stamped for the image unless it is the slot's
    /// own (already waited) fence, then resets the slot fence and stamps it.
    pub fn claim_image<O>(&mut self, ops: &mut O, image: u32) -> RhiResult<()>
    where
        O: FenceOps<Fence = F>,
    {
        if !self.admitted || self.image.is_some() {
            return Err(RhiError::InvalidState(
                "an image can only be claimed once per admitted frame".to_string(),
            ));
        }
        let index = image as usize;
        if index >= self.images.len() {
            return Err(RhiError::InvalidState(format!(
                "image index {image} is outside the {}-image table",
                self.images.len()
            )));
        }

        let slot_fence = self.slot_fence();
        if let Some(previous) = self.images.get(index)
            && previous != slot_fence
        {
            trace!("Image {} still guarded by {:?}; waiting", image, previous);
            ops.wait(previous)?;
        }

        ops.reset(slot_fence)?;
        self.images.claim(index, slot_fence);
        self.image = Some(image);
        Ok(())
    }

    /// Moves to the next slot after the frame has been submitted.
    pub fn advance(&mut self) {
        self.slot = (self.slot + 1) % self.slot_fences.len();
        self.frame_number += 1;
        self.admitted = false;
        self.image = None;
    }

    /// Forgets every image after the surface chain was rebuilt.
    ///
    /// The caller must have drained the GPU, so every slot fence is
    /// signalled or about to be re-admitted.
    pub fn reset_images(&mut self, image_count: usize) {
        self.images.reset(image_count);
        self.image = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fences that are always signalled; records every call.
    #[derive(Default)]
    struct Recorder {
        waits: Vec<u8>,
        resets: Vec<u8>,
    }

    impl FenceOps for Recorder {
        type Fence = u8;

        fn wait(&mut self, fence: u8) -> RhiResult<()> {
            self.waits.push(fence);
            Ok(())
        }

        fn reset(&mut self, fence: u8) -> RhiResult<()> {
            self.resets.push(fence);
            Ok(())
        }
    }

    #[test]
    fn test_table_claim_returns_previous() {
        let mut table = ImageInFlightTable::new(2);
        assert_eq!(table.get(0), None);
        assert_eq!(table.claim(0, 7u8), None);
        assert_eq!(table.claim(0, 9u8), Some(7));
        assert_eq!(table.get(0), Some(9));
        assert_eq!(table.get(5), None);

        table.reset(3);
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(0), None);
    }

    #[test]
    fn test_pacer_requires_a_slot() {
        assert!(matches!(
            FramePacer::<u8>::new(Vec::new(), 3),
            Err(RhiError::Configuration(_))
        ));
    }

    #[test]
    fn test_claim_skips_wait_on_own_fence() {
        let mut pacer = FramePacer::new(vec![10u8], 2).unwrap();
        let mut ops = Recorder::default();

        for _ in 0..2 {
            pacer.admit(&mut ops).unwrap();
            pacer.claim_image(&mut ops, 1).unwrap();
            pacer.advance();
        }

        // One admission wait per frame, never a table wait on the same fence.
        assert_eq!(ops.waits, vec![10, 10]);
        assert_eq!(ops.resets, vec![10, 10]);
    }

    #[test]
    fn test_claim_waits_on_other_slot_fence() {
        let mut pacer = FramePacer::new(vec![1u8, 2u8], 2).unwrap();
        let mut ops = Recorder::default();

        pacer.admit(&mut ops).unwrap();
        pacer.claim_image(&mut ops, 0).unwrap();
        pacer.advance();

        pacer.admit(&mut ops).unwrap();
        pacer.claim_image(&mut ops, 0).unwrap();

        assert_eq!(ops.waits, vec![1, 2, 1]);
        assert_eq!(pacer.image_table().get(0), Some(2));
    }

    #[test]
    fn test_readmission_does_not_wait_twice() {
        let mut pacer = FramePacer::new(vec![1u8, 2u8], 3).unwrap();
        let mut ops = Recorder::default();

        assert_eq!(pacer.admit(&mut ops).unwrap(), 0);
        assert_eq!(pacer.admit(&mut ops).unwrap(), 0);
        assert_eq!(ops.waits, vec![1]);
        assert!(ops.resets.is_empty());
    }

    #[test]
    fn test_misuse_is_invalid_state() {
        let mut pacer = FramePacer::new(vec![1u8], 2).unwrap();
        let mut ops = Recorder::default();

        assert!(matches!(
            pacer.claim_image(&mut ops, 0),
            Err(RhiError::InvalidState(_))
        ));

        pacer.admit(&mut ops).unwrap();
        assert!(matches!(
            pacer.claim_image(&mut ops, 2),
            Err(RhiError::InvalidState(_))
        ));

        pacer.claim_image(&mut ops, 0).unwrap();
        assert!(matches!(
            pacer.admit(&mut ops),
            Err(RhiError::InvalidState(_))
        ));
    }

    #[test]
    fn test_open_slot_spans_claim_to_advance() {
        let mut pacer = FramePacer::new(vec![1u8, 2u8], 2).unwrap();
        let mut ops = Recorder::default();
        assert_eq!(pacer.open_slot(), None);

        // Admitted but acquisition may still fail.
        pacer.admit(&mut ops).unwrap();
        assert_eq!(pacer.open_slot(), None);

        pacer.claim_image(&mut ops, 1).unwrap();
        assert_eq!(pacer.open_slot(), Some(0));

        pacer.advance();
        assert_eq!(pacer.open_slot(), None);
        assert_eq!(pacer.slot(), 1);

        pacer.admit(&mut ops).unwrap();
        pacer.claim_image(&mut ops, 0).unwrap();
        assert_eq!(pacer.open_slot(), Some(1));
    }

    #[test]
    fn test_reset_images_clears_table() {
        let mut pacer = FramePacer::new(vec![1u8, 2u8], 2).unwrap();
        let mut ops = Recorder::default();
        pacer.admit(&mut ops).unwrap();
        pacer.claim_image(&mut ops, 1).unwrap();
        pacer.advance();

        pacer.reset_images(4);
        assert_eq!(pacer.image_table().len(), 4);
        assert_eq!(pacer.image_table().get(1), None);
        assert_eq!(pacer.slot(), 1);
        assert_eq!(pacer.frame_number(), 1);
    }
}
