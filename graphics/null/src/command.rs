use emugpu_core::gpu::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NullCommandBufferState {
    Ready,
    Recording,
    Finished,
}

pub struct NullCommandBuffer {
    state: NullCommandBufferState,
    recorded: u64,
}

impl NullCommandBuffer {
    pub(crate) fn new() -> Self {
        Self {
            state: NullCommandBufferState::Ready,
            recorded: 0,
        }
    }

    /// How often this command buffer went through begin/finish.
    pub fn recorded_count(&self) -> u64 {
        self.recorded
    }

    pub fn is_finished(&self) -> bool {
        self.state == NullCommandBufferState::Finished
    }
}

impl CommandBuffer for NullCommandBuffer {
    unsafe fn begin(&mut self) -> Result<(), DeviceError> {
        assert_eq!(self.state, NullCommandBufferState::Ready, "Command buffer must be reset before recording.");
        self.state = NullCommandBufferState::Recording;
        Ok(())
    }

    unsafe fn finish(&mut self) -> Result<(), DeviceError> {
        assert_eq!(self.state, NullCommandBufferState::Recording);
        self.state = NullCommandBufferState::Finished;
        self.recorded += 1;
        Ok(())
    }

    unsafe fn reset(&mut self) -> Result<(), DeviceError> {
        self.state = NullCommandBufferState::Ready;
        Ok(())
    }
}
