//! Fiber flag bits

bitflags::bitflags! {
    /// Independent flag bits carried by every fiber.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FiberFlags: u32 {
        /// Dead record is retained until somebody joins it.
        const JOINABLE = 1 << 0;
        /// `cancel` wakes the fiber if it is suspended.
        const CANCELLABLE = 1 << 1;
        /// Excluded from client accounting and from the shutdown sweep.
        const SYSTEM = 1 << 2;
        /// Entry function has returned.
        const DEAD = 1 << 3;
        /// `cancel` was called on this fiber.
        const CANCELLED = 1 << 4;
        /// A `join` is waiting on this fiber.
        const JOIN_IN_PROGRESS = 1 << 5;
    }
}

impl FiberFlags {
    /// Bits a caller may request through `FiberAttr`.
    pub const ATTR_MASK: FiberFlags = FiberFlags::JOINABLE
        .union(FiberFlags::CANCELLABLE)
        .union(FiberFlags::SYSTEM);

    /// Flags of a freshly created fiber with default attributes.
    pub const DEFAULT: FiberFlags = FiberFlags::CANCELLABLE;

    #[inline]
    pub const fn is_system(self) -> bool {
        self.contains(FiberFlags::SYSTEM)
    }

    #[inline]
    pub const fn is_client(self) -> bool {
        !self.contains(FiberFlags::SYSTEM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_mask() {
        assert!(FiberFlags::ATTR_MASK.contains(FiberFlags::SYSTEM));
        assert!(!FiberFlags::ATTR_MASK.contains(FiberFlags::DEAD));
        assert!(!FiberFlags::ATTR_MASK.contains(FiberFlags::CANCELLED));
    }

    #[test]
    fn test_client_system() {
        assert!(FiberFlags::DEFAULT.is_client());
        let f = FiberFlags::DEFAULT | FiberFlags::SYSTEM;
        assert!(f.is_system());
        assert!(!f.is_client());
    }
}
