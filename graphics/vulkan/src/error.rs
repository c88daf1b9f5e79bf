use ash::vk;

use emugpu_core::gpu::DeviceError;

pub(crate) fn vk_error(result: vk::Result) -> DeviceError {
    match result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY => DeviceError::OutOfHostMemory,
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => DeviceError::OutOfDeviceMemory,
        vk::Result::ERROR_DEVICE_LOST => DeviceError::DeviceLost,
        other => DeviceError::Other(other.as_raw()),
    }
}

/// Vulkan timeouts are in nanoseconds, `u64::MAX` waits forever.
pub(crate) fn timeout_ns(timeout: Option<std::time::Duration>) -> u64 {
    timeout.map_or(u64::MAX, |timeout| timeout.as_nanos().min(u64::MAX as u128) as u64)
}
