use color_eyre::Result;

/// What one pass through the frame protocol produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was recorded, submitted, and handed to the presentation engine.
    Presented,
    /// The swapchain no longer matches the surface; the frame was skipped.
    /// Recoverable: the caller decides whether to rebuild the swapchain.
    OutOfDate,
}

/// Result of asking the presentation engine for the next image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquiredImage {
    Index(u32),
    OutOfDate,
}

/// The per-frame operations, in the order `render_frame` drives them.
///
/// The production implementation is `Renderer`, backed by ash. Keeping the
/// sequencing out here lets a fake backend assert the protocol without a
/// device.
pub trait FrameOps {
    /// Block until the previous frame's work fence signals, within the
    /// configured timeout.
    fn wait_frame_fence(&mut self) -> Result<()>;

    /// Return the fence to the unsignaled state for this frame.
    fn reset_frame_fence(&mut self) -> Result<()>;

    /// Acquire the next presentable image, signaling the present semaphore.
    fn acquire_image(&mut self) -> Result<AcquiredImage>;

    /// Reset and re-record the command buffer against the acquired image.
    fn record_commands(&mut self, image_index: u32) -> Result<()>;

    /// Submit the recorded commands, waiting on the present semaphore and
    /// signaling the render semaphore plus the frame fence.
    fn submit_commands(&mut self) -> Result<()>;

    /// Queue the acquired image for presentation, waiting on the render
    /// semaphore.
    fn present_image(&mut self, image_index: u32) -> Result<FrameOutcome>;
}

/// Drive one frame, single frame in flight.
///
/// The fence is reset only after an image was actually acquired: if acquire
/// reports out-of-date the fence stays signaled, so the next frame's wait
/// returns immediately instead of timing out.
pub fn render_frame<O: FrameOps>(ops: &mut O) -> Result<FrameOutcome> {
    ops.wait_frame_fence()?;

    let image_index = match ops.acquire_image()? {
        AcquiredImage::Index(index) => index,
        AcquiredImage::OutOfDate => return Ok(FrameOutcome::OutOfDate),
    };

    ops.reset_frame_fence()?;
    ops.record_commands(image_index)?;
    ops.submit_commands()?;
    ops.present_image(image_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        WaitFence,
        ResetFence,
        Acquire(u32),
        Record(u32),
        Submit,
        Present(u32),
    }

    /// Fake backend over an N-image swapchain. Acquire hands out image
    /// indices round-robin, like a real presentation engine under FIFO.
    struct FakeOps {
        calls: Vec<Call>,
        image_count: u32,
        next_image: u32,
        fence_signaled: bool,
        acquire_out_of_date: bool,
        present_out_of_date: bool,
    }

    impl FakeOps {
        fn new(image_count: u32) -> Self {
            Self {
                calls: Vec::new(),
                image_count,
                next_image: 0,
                // Matches the real renderer: the fence is created signaled
                fence_signaled: true,
                acquire_out_of_date: false,
                present_out_of_date: false,
            }
        }
    }

    impl FrameOps for FakeOps {
        fn wait_frame_fence(&mut self) -> Result<()> {
            assert!(self.fence_signaled, "waited on a fence no frame will signal");
            self.calls.push(Call::WaitFence);
            Ok(())
        }

        fn reset_frame_fence(&mut self) -> Result<()> {
            self.fence_signaled = false;
            self.calls.push(Call::ResetFence);
            Ok(())
        }

        fn acquire_image(&mut self) -> Result<AcquiredImage> {
            if self.acquire_out_of_date {
                return Ok(AcquiredImage::OutOfDate);
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            self.calls.push(Call::Acquire(index));
            Ok(AcquiredImage::Index(index))
        }

        fn record_commands(&mut self, image_index: u32) -> Result<()> {
            // Recording is where the renderer writes host-visible frame
            // state, so the fence must already be waited on and reset.
            assert!(
                !self.fence_signaled,
                "recording must start only after the fence wait and reset"
            );
            self.calls.push(Call::Record(image_index));
            Ok(())
        }

        fn submit_commands(&mut self) -> Result<()> {
            assert!(
                matches!(self.calls.last(), Some(Call::Record(_))),
                "submit must follow recording"
            );
            // Submission signals the fence once the GPU finishes; the fake
            // completes instantly.
            self.fence_signaled = true;
            self.calls.push(Call::Submit);
            Ok(())
        }

        fn present_image(&mut self, image_index: u32) -> Result<FrameOutcome> {
            assert!(
                self.calls.contains(&Call::Submit),
                "present must follow submit"
            );
            if self.present_out_of_date {
                return Ok(FrameOutcome::OutOfDate);
            }
            self.calls.push(Call::Present(image_index));
            Ok(FrameOutcome::Presented)
        }
    }

    #[test]
    fn one_frame_runs_steps_in_order() {
        let mut ops = FakeOps::new(3);
        let outcome = render_frame(&mut ops).unwrap();
        assert_eq!(outcome, FrameOutcome::Presented);
        assert_eq!(
            ops.calls,
            vec![
                Call::WaitFence,
                Call::Acquire(0),
                Call::ResetFence,
                Call::Record(0),
                Call::Submit,
                Call::Present(0),
            ]
        );
    }

    #[test]
    fn k_frames_produce_k_triples_with_cycling_indices() {
        let mut ops = FakeOps::new(3);
        for _ in 0..7 {
            assert_eq!(render_frame(&mut ops).unwrap(), FrameOutcome::Presented);
        }

        let acquires: Vec<u32> = ops
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Acquire(i) => Some(*i),
                _ => None,
            })
            .collect();
        let presents: Vec<u32> = ops
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Present(i) => Some(*i),
                _ => None,
            })
            .collect();
        let submits = ops.calls.iter().filter(|c| **c == Call::Submit).count();
        let waits = ops.calls.iter().filter(|c| **c == Call::WaitFence).count();
        let resets = ops.calls.iter().filter(|c| **c == Call::ResetFence).count();

        assert_eq!(acquires, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(presents, acquires);
        assert_eq!(submits, 7);
        assert_eq!(waits, 7);
        assert_eq!(resets, 7);
    }

    #[test]
    fn frame_state_writes_wait_for_the_fence() {
        let mut ops = FakeOps::new(2);
        render_frame(&mut ops).unwrap();

        let wait_pos = ops
            .calls
            .iter()
            .position(|c| *c == Call::WaitFence)
            .unwrap();
        let record_pos = ops
            .calls
            .iter()
            .position(|c| matches!(c, Call::Record(_)))
            .unwrap();
        assert!(
            wait_pos < record_pos,
            "host writes recorded into the frame must come after the fence wait"
        );
    }

    #[test]
    fn out_of_date_acquire_skips_frame_and_keeps_fence_signaled() {
        let mut ops = FakeOps::new(2);
        ops.acquire_out_of_date = true;

        let outcome = render_frame(&mut ops).unwrap();
        assert_eq!(outcome, FrameOutcome::OutOfDate);
        assert_eq!(ops.calls, vec![Call::WaitFence]);
        assert!(ops.fence_signaled);

        // The next frame must still get through the fence wait.
        ops.acquire_out_of_date = false;
        assert_eq!(render_frame(&mut ops).unwrap(), FrameOutcome::Presented);
    }

    #[test]
    fn out_of_date_present_is_reported_not_fatal() {
        let mut ops = FakeOps::new(2);
        ops.present_out_of_date = true;
        let outcome = render_frame(&mut ops).unwrap();
        assert_eq!(outcome, FrameOutcome::OutOfDate);
        // The frame was still fully recorded and submitted.
        assert!(ops.calls.contains(&Call::Submit));
    }
}
