//! Per-frame synchronization protocol
//!
//! [`FrameSynchronizer`] owns the ordering of one frame on its slot:
//! wait on the slot fence, acquire an image, record, reset the fence, submit,
//! present. The GPU calls themselves go through [`FrameBackend`].
//!
//! The fence is reset right before submit rather than right after the wait,
//! so an out-of-date acquire leaves the fence signaled and the slot reusable.
//! A frame that fails after a successful acquire releases its slot with an
//! empty submission: that consumes the image-available semaphore and
//! re-signals the fence. A slot that cannot be released stalls the
//! synchronizer.

use crate::render::backends::vulkan::initialization::{FrameStage, VulkanError, VulkanResult};

/// Result of acquiring a swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    /// An image was acquired
    Image {
        /// Swapchain image index
        index: u32,
        /// The swapchain no longer matches the surface exactly
        suboptimal: bool,
    },
    /// The swapchain must be rebuilt before anything can be acquired
    OutOfDate,
}

/// Result of presenting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    /// Queued for display
    Presented,
    /// Queued, but the swapchain should be rebuilt
    Suboptimal,
    /// Not presented, the swapchain must be rebuilt
    OutOfDate,
}

/// What one iteration of the frame protocol produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame reached the present queue
    Presented {
        /// Frame slot used
        slot: usize,
        /// Swapchain image presented
        image_index: u32,
    },
    /// The swapchain is out of date or suboptimal
    RecreatePending,
}

/// GPU operations a frame is made of, one call per protocol step
pub trait FrameBackend {
    /// Block until the slot's in-flight fence is signaled
    fn wait_for_fence(&mut self, slot: usize) -> VulkanResult<()>;

    /// Acquire the next image, signaling the slot's image-available semaphore
    fn acquire_next_image(&mut self, slot: usize) -> VulkanResult<Acquired>;

    /// Reset and re-record the slot's command buffer for `image_index`
    fn record_commands(&mut self, slot: usize, image_index: u32) -> VulkanResult<()>;

    /// Reset the slot's in-flight fence to unsignaled
    fn reset_fence(&mut self, slot: usize) -> VulkanResult<()>;

    /// Submit the slot's command buffer to the graphics queue
    fn submit(&mut self, slot: usize) -> VulkanResult<()>;

    /// Present `image_index` after the slot's render-finished semaphore
    fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<PresentStatus>;

    /// Submit an empty batch that waits on the slot's image-available
    /// semaphore and signals its (already reset) in-flight fence
    fn release_slot(&mut self, slot: usize) -> VulkanResult<()>;
}

/// Drives frames across `N` slots, frame `i` on slot `i mod N`
#[derive(Debug)]
pub struct FrameSynchronizer {
    frames_in_flight: usize,
    frame_index: usize,
    outstanding: Vec<u32>,
    stalled_slot: Option<usize>,
    slot_usage: Vec<u64>,
    fence_waits: Vec<u64>,
}

impl FrameSynchronizer {
    /// Create a synchronizer for `frames_in_flight` slots
    pub fn new(frames_in_flight: usize) -> VulkanResult<Self> {
        if frames_in_flight == 0 {
            return Err(VulkanError::invalid("At least one frame slot is required"));
        }

        Ok(Self {
            frames_in_flight,
            frame_index: 0,
            outstanding: Vec::new(),
            stalled_slot: None,
            slot_usage: vec![0; frames_in_flight],
            fence_waits: vec![0; frames_in_flight],
        })
    }

    /// Run one frame through the backend
    pub fn draw_frame<B: FrameBackend>(&mut self, backend: &mut B) -> VulkanResult<FrameOutcome> {
        if let Some(stalled) = self.stalled_slot {
            return Err(VulkanError::invalid(format!(
                "Frame slot {} could not be released after a failed frame",
                stalled
            )));
        }

        let slot = self.current_slot();
        self.slot_usage[slot] += 1;

        backend.wait_for_fence(slot).map_err(|e| e.in_frame(FrameStage::Wait))?;
        self.fence_waits[slot] += 1;

        let (image_index, acquire_suboptimal) =
            match backend.acquire_next_image(slot).map_err(|e| e.in_frame(FrameStage::Acquire))? {
                Acquired::Image { index, suboptimal } => (index, suboptimal),
                Acquired::OutOfDate => {
                    log::warn!("Swapchain out of date on acquire (slot {})", slot);
                    return Ok(FrameOutcome::RecreatePending);
                }
            };
        // image-available is now signaled; every failure up to submit must
        // consume it and leave the fence signaled
        let mut fence_reset = false;
        if let Err(e) = self.record_and_submit(backend, slot, image_index, &mut fence_reset) {
            self.recover_slot(backend, slot, fence_reset);
            return Err(e);
        }
        self.frame_index = self.frame_index.wrapping_add(1);

        match self.present(backend, slot, image_index)? {
            PresentStatus::Presented if !acquire_suboptimal => Ok(FrameOutcome::Presented { slot, image_index }),
            status => {
                log::warn!("Swapchain needs rebuild after present ({:?})", status);
                Ok(FrameOutcome::RecreatePending)
            }
        }
    }

    /// Present an acquired image
    ///
    /// Rejects an image index that is not currently acquired, such as one
    /// that was already presented.
    pub fn present<B: FrameBackend>(
        &mut self,
        backend: &mut B,
        slot: usize,
        image_index: u32,
    ) -> VulkanResult<PresentStatus> {
        let position = self
            .outstanding
            .iter()
            .position(|&index| index == image_index)
            .ok_or_else(|| VulkanError::invalid(format!("Image {} presented without being acquired", image_index)))?;
        self.outstanding.swap_remove(position);

        backend
            .present(slot, image_index)
            .map_err(|e| e.in_frame(FrameStage::Present))
    }

    fn record_and_submit<B: FrameBackend>(
        &mut self,
        backend: &mut B,
        slot: usize,
        image_index: u32,
        fence_reset: &mut bool,
    ) -> VulkanResult<()> {
        self.mark_acquired(image_index)?;
        backend
            .record_commands(slot, image_index)
            .map_err(|e| e.in_frame(FrameStage::Record))?;

        backend.reset_fence(slot).map_err(|e| e.in_frame(FrameStage::Submit))?;
        *fence_reset = true;
        backend.submit(slot).map_err(|e| e.in_frame(FrameStage::Submit))
    }

    fn recover_slot<B: FrameBackend>(&mut self, backend: &mut B, slot: usize, fence_reset: bool) {
        let reset = if fence_reset { Ok(()) } else { backend.reset_fence(slot) };
        match reset.and_then(|()| backend.release_slot(slot)) {
            Ok(()) => log::warn!("Frame slot {} released after a failed frame", slot),
            Err(e) => {
                log::error!("Frame slot {} could not be released: {}", slot, e);
                self.stalled_slot = Some(slot);
            }
        }
    }

    fn mark_acquired(&mut self, image_index: u32) -> VulkanResult<()> {
        if self.outstanding.contains(&image_index) {
            return Err(VulkanError::invalid(format!(
                "Image {} acquired again before being presented",
                image_index
            )));
        }
        self.outstanding.push(image_index);
        Ok(())
    }

    /// Forget acquired images after the swapchain was rebuilt
    pub fn reset_acquisitions(&mut self) {
        self.outstanding.clear();
    }

    /// Slot the next frame will use
    pub fn current_slot(&self) -> usize {
        self.frame_index % self.frames_in_flight
    }

    /// Frames submitted so far
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Number of slots
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// How many frames started on each slot
    pub fn slot_usage(&self) -> &[u64] {
        &self.slot_usage
    }

    /// How many fence waits completed on each slot
    pub fn fence_waits(&self) -> &[u64] {
        &self.fence_waits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Record(usize, u32),
        Reset(usize),
        Submit(usize),
        Present(usize, u32),
        Release(usize),
    }

    /// Records calls and hands out images round-robin
    struct MockBackend {
        calls: Vec<Call>,
        image_count: u32,
        next_image: u32,
        acquire_script: VecDeque<Acquired>,
        present_script: VecDeque<PresentStatus>,
        fail_record: bool,
        fail_submit: bool,
        fail_release: bool,
    }

    impl MockBackend {
        fn new(image_count: u32) -> Self {
            Self {
                calls: Vec::new(),
                image_count,
                next_image: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                fail_record: false,
                fail_submit: false,
                fail_release: false,
            }
        }

        fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|call| pred(call)).count()
        }
    }

    impl FrameBackend for MockBackend {
        fn wait_for_fence(&mut self, slot: usize) -> VulkanResult<()> {
            self.calls.push(Call::Wait(slot));
            Ok(())
        }

        fn acquire_next_image(&mut self, slot: usize) -> VulkanResult<Acquired> {
            self.calls.push(Call::Acquire(slot));
            if let Some(scripted) = self.acquire_script.pop_front() {
                return Ok(scripted);
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(Acquired::Image { index, suboptimal: false })
        }

        fn record_commands(&mut self, slot: usize, image_index: u32) -> VulkanResult<()> {
            self.calls.push(Call::Record(slot, image_index));
            if self.fail_record {
                Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
            } else {
                Ok(())
            }
        }

        fn reset_fence(&mut self, slot: usize) -> VulkanResult<()> {
            self.calls.push(Call::Reset(slot));
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> VulkanResult<()> {
            self.calls.push(Call::Submit(slot));
            if self.fail_submit {
                Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST))
            } else {
                Ok(())
            }
        }

        fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<PresentStatus> {
            self.calls.push(Call::Present(slot, image_index));
            Ok(self.present_script.pop_front().unwrap_or(PresentStatus::Presented))
        }

        fn release_slot(&mut self, slot: usize) -> VulkanResult<()> {
            self.calls.push(Call::Release(slot));
            if self.fail_release {
                Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_slots_rotate_and_fence_waits_match_usage() {
        let mut sync = FrameSynchronizer::new(2).unwrap();
        let mut backend = MockBackend::new(3);

        let slots: Vec<usize> = (0..5)
            .map(|_| match sync.draw_frame(&mut backend).unwrap() {
                FrameOutcome::Presented { slot, .. } => slot,
                FrameOutcome::RecreatePending => panic!("unexpected rebuild"),
            })
            .collect();

        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
        assert_eq!(sync.slot_usage(), &[3, 2]);
        assert_eq!(sync.fence_waits(), sync.slot_usage());
        assert_eq!(sync.frame_index(), 5);
    }

    #[test]
    fn test_protocol_order_within_a_frame() {
        let mut sync = FrameSynchronizer::new(2).unwrap();
        let mut backend = MockBackend::new(3);

        sync.draw_frame(&mut backend).unwrap();
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Record(0, 0),
                Call::Reset(0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
    }

    #[test]
    fn test_fence_waited_before_every_record() {
        let mut sync = FrameSynchronizer::new(3).unwrap();
        let mut backend = MockBackend::new(3);
        for _ in 0..7 {
            sync.draw_frame(&mut backend).unwrap();
        }

        for (i, call) in backend.calls.iter().enumerate() {
            if let Call::Record(slot, _) = call {
                let last_wait = backend.calls[..i].iter().rposition(|c| *c == Call::Wait(*slot));
                let last_reset = backend.calls[..i].iter().rposition(|c| *c == Call::Reset(*slot));
                assert!(last_wait.is_some());
                assert!(last_reset < last_wait, "slot {} recorded after reset without a new wait", slot);
            }
        }
    }

    #[test]
    fn test_out_of_date_acquire_leaves_fence_and_slot() {
        let mut sync = FrameSynchronizer::new(2).unwrap();
        let mut backend = MockBackend::new(3);
        backend.acquire_script.push_back(Acquired::OutOfDate);

        assert_eq!(sync.draw_frame(&mut backend).unwrap(), FrameOutcome::RecreatePending);
        assert_eq!(backend.count(|c| matches!(c, Call::Reset(_))), 0);
        assert_eq!(backend.count(|c| matches!(c, Call::Submit(_))), 0);
        assert_eq!(sync.current_slot(), 0);

        // The same slot is retried and its signaled fence is waited on again
        assert!(matches!(
            sync.draw_frame(&mut backend).unwrap(),
            FrameOutcome::Presented { slot: 0, .. }
        ));
        assert_eq!(sync.fence_waits(), &[2, 0]);
    }

    #[test]
    fn test_suboptimal_present_requests_rebuild() {
        let mut sync = FrameSynchronizer::new(2).unwrap();
        let mut backend = MockBackend::new(3);
        backend.present_script.push_back(PresentStatus::Suboptimal);

        assert_eq!(sync.draw_frame(&mut backend).unwrap(), FrameOutcome::RecreatePending);
        // Submission happened, so the frame still counts
        assert_eq!(sync.frame_index(), 1);
    }

    #[test]
    fn test_suboptimal_acquire_requests_rebuild_after_present() {
        let mut sync = FrameSynchronizer::new(2).unwrap();
        let mut backend = MockBackend::new(3);
        backend
            .acquire_script
            .push_back(Acquired::Image { index: 1, suboptimal: true });

        assert_eq!(sync.draw_frame(&mut backend).unwrap(), FrameOutcome::RecreatePending);
        assert_eq!(backend.calls.last(), Some(&Call::Present(0, 1)));
    }

    #[test]
    fn test_double_present_rejected() {
        let mut sync = FrameSynchronizer::new(2).unwrap();
        let mut backend = MockBackend::new(3);

        let image_index = match sync.draw_frame(&mut backend).unwrap() {
            FrameOutcome::Presented { image_index, .. } => image_index,
            FrameOutcome::RecreatePending => panic!("unexpected rebuild"),
        };
        let presents_before = backend.count(|c| matches!(c, Call::Present(..)));

        let err = sync.present(&mut backend, 0, image_index).unwrap_err();
        assert!(matches!(err, VulkanError::InvalidOperation { .. }));
        assert_eq!(backend.count(|c| matches!(c, Call::Present(..))), presents_before);
    }

    #[test]
    fn test_reacquiring_outstanding_image_rejected() {
        let mut sync = FrameSynchronizer::new(2).unwrap();
        let mut backend = MockBackend::new(3);
        backend.fail_record = true;
        assert!(sync.draw_frame(&mut backend).is_err());

        // Image 0 is still acquired; the driver handing it out again is misuse
        backend.fail_record = false;
        backend.calls.clear();
        backend
            .acquire_script
            .push_back(Acquired::Image { index: 0, suboptimal: false });
        let err = sync.draw_frame(&mut backend).unwrap_err();
        assert!(matches!(err, VulkanError::InvalidOperation { .. }));
        // The rejected frame still hands its slot back
        assert_eq!(
            backend.calls,
            vec![Call::Wait(0), Call::Acquire(0), Call::Reset(0), Call::Release(0)]
        );

        sync.reset_acquisitions();
        backend
            .acquire_script
            .push_back(Acquired::Image { index: 0, suboptimal: false });
        assert!(sync.draw_frame(&mut backend).is_ok());
    }

    #[test]
    fn test_record_failure_releases_slot() {
        let mut sync = FrameSynchronizer::new(2).unwrap();
        let mut backend = MockBackend::new(3);
        backend.fail_record = true;

        let err = sync.draw_frame(&mut backend).unwrap_err();
        assert!(matches!(err, VulkanError::Frame { stage: FrameStage::Record, .. }));
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Record(0, 0),
                Call::Reset(0),
                Call::Release(0),
            ]
        );
        assert_eq!(sync.frame_index(), 0);

        // The released fence is signaled again, so the slot is reusable
        backend.fail_record = false;
        backend.calls.clear();
        assert_eq!(
            sync.draw_frame(&mut backend).unwrap(),
            FrameOutcome::Presented { slot: 0, image_index: 1 }
        );
        assert_eq!(backend.calls.first(), Some(&Call::Wait(0)));
        assert_eq!(sync.fence_waits(), &[2, 0]);
    }

    #[test]
    fn test_submit_failure_releases_reset_fence() {
        let mut sync = FrameSynchronizer::new(2).unwrap();
        let mut backend = MockBackend::new(3);
        backend.fail_submit = true;

        let err = sync.draw_frame(&mut backend).unwrap_err();
        assert!(matches!(err, VulkanError::Frame { stage: FrameStage::Submit, .. }));
        // The fence was already reset, so recovery only releases it
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Record(0, 0),
                Call::Reset(0),
                Call::Submit(0),
                Call::Release(0),
            ]
        );
        assert_eq!(sync.frame_index(), 0);
    }

    #[test]
    fn test_failed_release_stalls_further_frames() {
        let mut sync = FrameSynchronizer::new(2).unwrap();
        let mut backend = MockBackend::new(3);
        backend.fail_submit = true;
        backend.fail_release = true;
        assert!(sync.draw_frame(&mut backend).is_err());

        // Waiting on the unsignaled fence would never return
        backend.fail_submit = false;
        backend.fail_release = false;
        backend.calls.clear();
        let err = sync.draw_frame(&mut backend).unwrap_err();
        assert!(matches!(err, VulkanError::InvalidOperation { .. }));
        assert!(backend.calls.is_empty());
    }

    #[test]
    fn test_zero_slots_rejected() {
        assert!(FrameSynchronizer::new(0).is_err());
    }
}
