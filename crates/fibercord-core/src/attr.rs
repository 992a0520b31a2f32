//! Fiber creation attributes

use crate::flags::FiberFlags;

/// Attributes passed to fiber creation.
///
/// ```ignore
/// let attr = FiberAttr::new().stack_size(1 << 20).joinable(true);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiberAttr {
    stack_size: Option<usize>,
    flags: FiberFlags,
}

impl FiberAttr {
    /// Default stack size of the cord, cancellable, client, not joinable.
    pub const fn new() -> Self {
        Self {
            stack_size: None,
            flags: FiberFlags::DEFAULT,
        }
    }

    /// Attributes of a system fiber.
    pub const fn system() -> Self {
        Self {
            stack_size: None,
            flags: FiberFlags::DEFAULT.union(FiberFlags::SYSTEM),
        }
    }

    /// Request a custom stack size. The cord rounds it up to whole pages
    /// and never goes below its configured minimum.
    pub const fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    pub fn joinable(self, yes: bool) -> Self {
        self.with_flag(FiberFlags::JOINABLE, yes)
    }

    pub fn cancellable(self, yes: bool) -> Self {
        self.with_flag(FiberFlags::CANCELLABLE, yes)
    }

    pub fn set_system(self, yes: bool) -> Self {
        self.with_flag(FiberFlags::SYSTEM, yes)
    }

    fn with_flag(mut self, flag: FiberFlags, yes: bool) -> Self {
        self.flags.set(flag, yes);
        self
    }

    /// Requested stack size, `None` for the cord default.
    #[inline]
    pub const fn requested_stack_size(&self) -> Option<usize> {
        self.stack_size
    }

    #[inline]
    pub fn flags(&self) -> FiberFlags {
        self.flags & FiberFlags::ATTR_MASK
    }
}

impl Default for FiberAttr {
    fn default() -> Self {
        Self::new()
    }
}
