use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum DeviceError {
    #[error("out of host memory")]
    OutOfHostMemory,
    #[error("out of device memory")]
    OutOfDeviceMemory,
    #[error("device lost")]
    DeviceLost,
    #[error("host API call failed with result code {0}")]
    Other(i32),
}
