// src/kernel/core/mod.rs
//! Kernel-wide base types, error handling and device traits.

pub mod result;
pub mod traits;
pub mod types;

pub use result::{DeviceError, ErrorKind, KernelError, KernelResult, MemoryError, ProcessError};
pub use traits::{CharDevice, Device};
pub use types::{Pid, Tick};
