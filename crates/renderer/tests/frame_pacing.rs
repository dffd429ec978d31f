//! Frame pacing against a simulated GPU timeline.
//!
//! The simulated GPU executes submissions in order, each taking a fixed
//! number of ticks. Waiting on a fence advances the CPU clock to the
//! fence's completion time and records the stall.

use std::collections::HashMap;

use lumen_renderer::pacing::{FenceOps, FramePacer};
use lumen_rhi::{RhiError, RhiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    /// Signalled at the given tick. A tick in the future means pending.
    SignalsAt(u64),
    /// Reset and not yet submitted.
    Unsignaled,
}

#[derive(Debug, Clone, Copy)]
struct Stall {
    frame: usize,
    fence: usize,
    ticks: u64,
}

struct SimulatedGpu {
    now: u64,
    gpu_busy_until: u64,
    gpu_cost: u64,
    fences: HashMap<usize, FenceState>,
    image_busy_until: Vec<u64>,
    frame: usize,
    stalls: Vec<Stall>,
}

impl SimulatedGpu {
    fn new(fence_count: usize, image_count: usize, gpu_cost: u64) -> Self {
        Self {
            now: 0,
            gpu_busy_until: 0,
            gpu_cost,
            fences: (0..fence_count)
                .map(|f| (f, FenceState::SignalsAt(0)))
                .collect(),
            image_busy_until: vec![0; image_count],
            frame: 0,
            stalls: Vec::new(),
        }
    }

    fn submit(&mut self, fence: usize, image: u32) {
        assert_eq!(
            self.fences[&fence],
            FenceState::Unsignaled,
            "submitted with a fence that was not reset"
        );
        let start = self.now.max(self.gpu_busy_until);
        let done = start + self.gpu_cost;
        self.gpu_busy_until = done;
        self.fences.insert(fence, FenceState::SignalsAt(done));
        self.image_busy_until[image as usize] = done;
    }

    fn pending(&self) -> usize {
        self.fences
            .values()
            .filter(|state| match state {
                FenceState::SignalsAt(t) => *t > self.now,
                FenceState::Unsignaled => false,
            })
            .count()
    }

    fn stalls_in(&self, frame: usize) -> Vec<Stall> {
        self.stalls
            .iter()
            .copied()
            .filter(|s| s.frame == frame)
            .collect()
    }
}

impl FenceOps for SimulatedGpu {
    type Fence = usize;

    fn wait(&mut self, fence: usize) -> RhiResult<()> {
        match self.fences[&fence] {
            FenceState::SignalsAt(t) => {
                if t > self.now {
                    self.stalls.push(Stall {
                        frame: self.frame,
                        fence,
                        ticks: t - self.now,
                    });
                    self.now = t;
                }
                Ok(())
            }
            FenceState::Unsignaled => Err(RhiError::InvalidState(format!(
                "wait on fence {fence} would never return"
            ))),
        }
    }

    fn reset(&mut self, fence: usize) -> RhiResult<()> {
        match self.fences[&fence] {
            FenceState::SignalsAt(t) if t <= self.now => {
                self.fences.insert(fence, FenceState::Unsignaled);
                Ok(())
            }
            state => Err(RhiError::InvalidState(format!(
                "reset of fence {fence} in state {state:?}"
            ))),
        }
    }
}

/// Runs one frame: admit, claim `image`, record for `record_cost` ticks,
/// submit, advance. Returns the slot used.
fn run_frame(
    pacer: &mut FramePacer<usize>,
    gpu: &mut SimulatedGpu,
    image: u32,
    record_cost: u64,
) -> usize {
    let slot = pacer.admit(gpu).unwrap();
    assert!(
        gpu.pending() < pacer.frames_in_flight(),
        "admitted with {} frames still pending",
        gpu.pending()
    );

    pacer.claim_image(gpu, image).unwrap();
    assert!(
        gpu.image_busy_until[image as usize] <= gpu.now,
        "image {image} claimed at tick {} while busy until {}",
        gpu.now,
        gpu.image_busy_until[image as usize]
    );

    gpu.now += record_cost;
    gpu.submit(pacer.slot_fence(), image);
    pacer.advance();
    gpu.frame += 1;
    slot
}

#[test]
fn test_normal_frames_rotate_slots() {
    let mut gpu = SimulatedGpu::new(2, 3, 5);
    let mut pacer = FramePacer::new(vec![0, 1], 3).unwrap();

    let slots: Vec<usize> = (0..10)
        .map(|frame| run_frame(&mut pacer, &mut gpu, (frame % 3) as u32, 1))
        .collect();

    assert_eq!(slots, vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);
    assert_eq!(pacer.frame_number(), 10);

    assert!(gpu.stalls_in(0).is_empty());
    assert!(gpu.stalls_in(1).is_empty());
}

#[test]
fn test_third_frame_blocks_on_oldest_fence() {
    let mut gpu = SimulatedGpu::new(2, 3, 5);
    let mut pacer = FramePacer::new(vec![0, 1], 3).unwrap();

    for frame in 0..3 {
        run_frame(&mut pacer, &mut gpu, frame as u32, 1);
    }

    let stalls = gpu.stalls_in(2);
    assert_eq!(stalls.len(), 1);
    assert_eq!(stalls[0].fence, 0);
    assert!(stalls[0].ticks > 0);
}

#[test]
fn test_cpu_bound_frames_never_block() {
    // Images come back in slot order, so every table entry is the admitted
    // slot's own fence and only admission can block.
    let mut gpu = SimulatedGpu::new(2, 2, 1);
    let mut pacer = FramePacer::new(vec![0, 1], 2).unwrap();

    for frame in 0..10 {
        run_frame(&mut pacer, &mut gpu, (frame % 2) as u32, 4);
    }

    assert!(gpu.stalls.is_empty());
}

#[test]
fn test_image_guarded_by_other_slot_is_waited() {
    // More slots than images: image 0 comes back while the slot that last
    // rendered to it is not the one being admitted.
    let mut gpu = SimulatedGpu::new(3, 2, 10);
    let mut pacer = FramePacer::new(vec![0, 1, 2], 2).unwrap();

    run_frame(&mut pacer, &mut gpu, 0, 1);
    run_frame(&mut pacer, &mut gpu, 1, 1);
    run_frame(&mut pacer, &mut gpu, 0, 1);

    let stalls = gpu.stalls_in(2);
    assert_eq!(stalls.len(), 1);
    assert_eq!(stalls[0].fence, 0);
    assert_eq!(pacer.image_table().get(0), Some(2));
}

#[test]
fn test_irregular_acquire_order_is_safe() {
    let mut gpu = SimulatedGpu::new(3, 4, 7);
    let mut pacer = FramePacer::new(vec![0, 1, 2], 4).unwrap();

    // Small LCG so the order repeats and skips images unpredictably.
    let mut state: u32 = 12345;
    for frame in 0..200 {
        state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        let image = (state >> 16) % 4;
        let record_cost = 1 + (frame % 5) as u64;
        run_frame(&mut pacer, &mut gpu, image, record_cost);
    }

    assert_eq!(pacer.frame_number(), 200);
}

#[test]
fn test_stale_acquire_readmits_without_deadlock() {
    let mut gpu = SimulatedGpu::new(2, 3, 5);
    let mut pacer = FramePacer::new(vec![0, 1], 3).unwrap();

    run_frame(&mut pacer, &mut gpu, 0, 1);
    run_frame(&mut pacer, &mut gpu, 1, 1);

    // Acquire reports out of date after admission: nothing is claimed, the
    // chain is rebuilt with the GPU drained, then the frame is retried.
    pacer.admit(&mut gpu).unwrap();
    gpu.now = gpu.gpu_busy_until;
    pacer.reset_images(2);

    let slot = run_frame(&mut pacer, &mut gpu, 1, 1);
    assert_eq!(slot, 0);
    assert_eq!(pacer.image_table().len(), 2);

    let slot = run_frame(&mut pacer, &mut gpu, 0, 1);
    assert_eq!(slot, 1);
}

#[test]
fn test_frames_in_flight_one_serializes() {
    let mut gpu = SimulatedGpu::new(1, 3, 5);
    let mut pacer = FramePacer::new(vec![0], 3).unwrap();

    for frame in 0..5 {
        let slot = run_frame(&mut pacer, &mut gpu, (frame % 3) as u32, 1);
        assert_eq!(slot, 0);
        assert_eq!(gpu.pending(), 1);
    }
    assert_eq!(gpu.stalls.len(), 4);
}
