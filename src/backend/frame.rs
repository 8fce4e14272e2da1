// Frame executor - the per-frame CPU/GPU protocol
//
// FRAME TIMELINE (one frame in flight):
// ┌──────────────────────────────────────────────────────────────────┐
// │  wait fence ─> acquire ─> record ─> submit ─> present ─> (next)  │
// │                                                                  │
// │  CPU blocks     signals     CPU      waits      waits            │
// │  until GPU      image_      only     image_     render_          │
// │  is done        available            available  finished         │
// └──────────────────────────────────────────────────────────────────┘
//
// The fence wait at the top of every frame is the only backpressure: the
// command buffer is never re-recorded while the GPU may still read it.

use super::error::FrameError;

/// GPU-facing steps of one frame. The Vulkan implementation lives in
/// `renderer::SwapchainFrames`.
pub trait FrameTarget {
    /// Block until the previous submission retired, then re-arm the fence
    fn wait_for_previous_frame(&mut self) -> Result<(), FrameError>;

    /// Request the next presentable image; returns its index
    fn acquire_image(&mut self) -> Result<u32, FrameError>;

    /// Re-record the command buffer against the image's framebuffer
    fn record(&mut self, image_index: u32) -> Result<(), FrameError>;

    fn submit(&mut self) -> Result<(), FrameError>;

    fn present(&mut self, image_index: u32) -> Result<(), FrameError>;

    /// Block until the device has no outstanding work
    fn wait_idle(&mut self) -> Result<(), FrameError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording { image_index: u32 },
    Submitted { image_index: u32 },
    Presenting { image_index: u32 },
    /// A step failed; the loop cannot continue
    Faulted,
    /// Shut down after a device-idle barrier
    Stopped,
}

/// Drives `Idle → Acquiring → Recording → Submitted → Presenting → Idle`
pub struct FrameExecutor<T: FrameTarget> {
    target: T,
    state: FrameState,
    frames_presented: u64,
}

impl<T: FrameTarget> FrameExecutor<T> {
    pub fn new(target: T) -> Self {
        Self {
            target,
            state: FrameState::Idle,
            frames_presented: 0,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Run one full cycle. Any error is fatal for the executor.
    pub fn draw_frame(&mut self) -> Result<(), FrameError> {
        match self.state {
            FrameState::Idle => {}
            FrameState::Stopped => return Err(FrameError::Stopped),
            _ => return Err(FrameError::Faulted),
        }

        let result = self.run_cycle();
        if let Err(e) = &result {
            log::error!("Frame failed in state {:?}: {}", self.state, e);
            self.state = FrameState::Faulted;
        }
        result
    }

    fn run_cycle(&mut self) -> Result<(), FrameError> {
        // Idle -> Acquiring
        self.target.wait_for_previous_frame()?;
        self.transition(FrameState::Acquiring);
        let image_index = self.target.acquire_image()?;

        // Acquiring -> Recording
        self.transition(FrameState::Recording { image_index });
        self.target.record(image_index)?;

        // Recording -> Submitted
        self.target.submit()?;
        self.transition(FrameState::Submitted { image_index });

        // Submitted -> Presenting
        self.target.present(image_index)?;
        self.transition(FrameState::Presenting { image_index });

        // Presenting -> Idle: no CPU wait, the next fence wait throttles us
        self.frames_presented += 1;
        self.transition(FrameState::Idle);
        Ok(())
    }

    fn transition(&mut self, next: FrameState) {
        log::trace!("Frame state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Wait for the device to go idle so resources can be destroyed.
    /// Runs even after a fault; repeated calls are no-ops.
    pub fn shutdown(&mut self) -> Result<(), FrameError> {
        if self.state == FrameState::Stopped {
            return Ok(());
        }

        self.target.wait_idle()?;
        self.transition(FrameState::Stopped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::error::FrameStep;
    use ash::vk;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait,
        Acquire,
        Record(u32),
        Submit,
        Present(u32),
        Idle,
    }

    /// Stand-in GPU that tracks whether a submission is outstanding
    #[derive(Default)]
    struct ScriptedTarget {
        calls: Vec<Call>,
        acquire_results: VecDeque<Result<u32, FrameError>>,
        next_image: u32,
        image_count: u32,
        gpu_busy: bool,
        fail_submit: bool,
    }

    impl ScriptedTarget {
        fn with_images(image_count: u32) -> Self {
            Self {
                image_count,
                ..Default::default()
            }
        }

        fn count(&self, call: fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| call(c)).count()
        }
    }

    impl FrameTarget for ScriptedTarget {
        fn wait_for_previous_frame(&mut self) -> Result<(), FrameError> {
            self.calls.push(Call::Wait);
            self.gpu_busy = false;
            Ok(())
        }

        fn acquire_image(&mut self) -> Result<u32, FrameError> {
            self.calls.push(Call::Acquire);
            if let Some(result) = self.acquire_results.pop_front() {
                return result;
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count.max(1);
            Ok(index)
        }

        fn record(&mut self, image_index: u32) -> Result<(), FrameError> {
            assert!(!self.gpu_busy, "command buffer recorded while still in flight");
            self.calls.push(Call::Record(image_index));
            Ok(())
        }

        fn submit(&mut self) -> Result<(), FrameError> {
            self.calls.push(Call::Submit);
            if self.fail_submit {
                return Err(FrameError::Vulkan {
                    step: FrameStep::Submit,
                    result: vk::Result::ERROR_DEVICE_LOST,
                });
            }
            self.gpu_busy = true;
            Ok(())
        }

        fn present(&mut self, image_index: u32) -> Result<(), FrameError> {
            self.calls.push(Call::Present(image_index));
            Ok(())
        }

        fn wait_idle(&mut self) -> Result<(), FrameError> {
            self.calls.push(Call::Idle);
            self.gpu_busy = false;
            Ok(())
        }
    }

    #[test]
    fn cycles_through_every_step_in_order() {
        let mut executor = FrameExecutor::new(ScriptedTarget::with_images(2));

        executor.draw_frame().unwrap();
        executor.draw_frame().unwrap();

        assert_eq!(
            executor.target.calls,
            vec![
                Call::Wait,
                Call::Acquire,
                Call::Record(0),
                Call::Submit,
                Call::Present(0),
                Call::Wait,
                Call::Acquire,
                Call::Record(1),
                Call::Submit,
                Call::Present(1),
            ]
        );
        assert_eq!(executor.state(), FrameState::Idle);
        assert_eq!(executor.frames_presented(), 2);
    }

    #[test]
    fn every_record_follows_a_fence_wait_since_the_last_submit() {
        let mut executor = FrameExecutor::new(ScriptedTarget::with_images(3));
        for _ in 0..10 {
            executor.draw_frame().unwrap();
        }

        let mut unretired = false;
        for call in &executor.target.calls {
            match call {
                Call::Wait => unretired = false,
                Call::Submit => unretired = true,
                Call::Record(_) => assert!(!unretired),
                _ => {}
            }
        }
        assert_eq!(executor.frames_presented(), 10);
    }

    #[test]
    fn stale_chain_on_third_acquire_stops_before_recording() {
        let mut target = ScriptedTarget::with_images(2);
        target.acquire_results = VecDeque::from([
            Ok(0),
            Ok(1),
            Err(FrameError::ChainInvalidated(FrameStep::Acquire)),
        ]);
        let mut executor = FrameExecutor::new(target);

        executor.draw_frame().unwrap();
        executor.draw_frame().unwrap();
        let err = executor.draw_frame().unwrap_err();

        assert!(matches!(err, FrameError::ChainInvalidated(FrameStep::Acquire)));
        assert_eq!(executor.state(), FrameState::Faulted);

        let target = &executor.target;
        assert_eq!(target.calls.last(), Some(&Call::Acquire));
        assert_eq!(target.count(|c| matches!(c, Call::Wait)), 3);
        assert_eq!(target.count(|c| matches!(c, Call::Record(_))), 2);
        assert_eq!(target.count(|c| matches!(c, Call::Submit)), 2);
        assert_eq!(executor.frames_presented(), 2);
    }

    #[test]
    fn faulted_executor_does_not_touch_the_gpu() {
        let mut target = ScriptedTarget::with_images(2);
        target.fail_submit = true;
        let mut executor = FrameExecutor::new(target);

        let err = executor.draw_frame().unwrap_err();
        assert!(matches!(err, FrameError::Vulkan { step: FrameStep::Submit, .. }));
        assert!(!executor.target.calls.contains(&Call::Present(0)));

        let calls_before = executor.target.calls.len();
        assert!(matches!(executor.draw_frame(), Err(FrameError::Faulted)));
        assert_eq!(executor.target.calls.len(), calls_before);
    }

    #[test]
    fn shutdown_waits_for_idle_once() {
        let mut executor = FrameExecutor::new(ScriptedTarget::with_images(2));
        executor.draw_frame().unwrap();

        executor.shutdown().unwrap();
        executor.shutdown().unwrap();

        assert_eq!(executor.state(), FrameState::Stopped);
        assert_eq!(executor.target.count(|c| matches!(c, Call::Idle)), 1);
        assert!(matches!(executor.draw_frame(), Err(FrameError::Stopped)));
    }

    #[test]
    fn shutdown_after_fault_still_waits_for_idle() {
        let mut target = ScriptedTarget::with_images(1);
        target.acquire_results =
            VecDeque::from([Err(FrameError::ChainInvalidated(FrameStep::Acquire))]);
        let mut executor = FrameExecutor::new(target);

        assert!(executor.draw_frame().is_err());
        executor.shutdown().unwrap();

        assert_eq!(executor.target.calls.last(), Some(&Call::Idle));
        assert_eq!(executor.state(), FrameState::Stopped);
    }
}
