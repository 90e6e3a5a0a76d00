// src/kernel/core/result.rs
//! Kernel-internal error handling.
//!
//! These errors stay inside the kernel; the syscall boundary speaks negated
//! POSIX codes instead (see `kernel::syscall`), and invariant violations
//! panic rather than return.

use core::fmt;

/// Kernel result type.
pub type KernelResult<T> = Result<T, KernelError>;

/// A kernel error with optional static context.
#[derive(Debug, Clone)]
pub struct KernelError {
    kind: ErrorKind,
    context: Option<&'static str>,
}

impl KernelError {
    #[inline]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    #[inline]
    pub const fn with_context(kind: ErrorKind, ctx: &'static str) -> Self {
        Self {
            kind,
            context: Some(ctx),
        }
    }

    #[inline]
    pub const fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    #[inline]
    pub const fn context(&self) -> Option<&'static str> {
        self.context
    }
}

/// Error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Device(DeviceError),
    Memory(MemoryError),
    Process(ProcessError),
    InvalidArgument,
    ResourceUnavailable,
}

/// Device driver errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    InitFailed,
    Timeout,
    NotFound,
    IoError,
}

/// Memory management errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    /// Physical frame allocator is exhausted.
    OutOfFrames,
    /// Kernel heap is exhausted.
    OutOfMemory,
    /// Address outside the range an operation accepts.
    InvalidAddress,
    /// The page is already mapped.
    AlreadyMapped,
}

/// Process management errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    /// Process table is full.
    NoSlot,
    /// No process with that PID.
    NotFound,
    /// Image rejected by the loader.
    InvalidImage,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::Device(e) => write!(f, "device error: {:?}", e)?,
            ErrorKind::Memory(e) => write!(f, "memory error: {:?}", e)?,
            ErrorKind::Process(e) => write!(f, "process error: {:?}", e)?,
            ErrorKind::InvalidArgument => write!(f, "invalid argument")?,
            ErrorKind::ResourceUnavailable => write!(f, "resource unavailable")?,
        }

        if let Some(ctx) = self.context {
            write!(f, " ({})", ctx)?;
        }

        Ok(())
    }
}

impl From<DeviceError> for KernelError {
    #[inline]
    fn from(e: DeviceError) -> Self {
        KernelError::new(ErrorKind::Device(e))
    }
}

impl From<MemoryError> for KernelError {
    #[inline]
    fn from(e: MemoryError) -> Self {
        KernelError::new(ErrorKind::Memory(e))
    }
}

impl From<ProcessError> for KernelError {
    #[inline]
    fn from(e: ProcessError) -> Self {
        KernelError::new(ErrorKind::Process(e))
    }
}

impl From<ErrorKind> for KernelError {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        KernelError::new(kind)
    }
}
