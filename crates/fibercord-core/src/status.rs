//! Conversion of entry function return values into fiber outcomes

use crate::error::FiberResult;

/// Values an entry function may return.
///
/// The fiber's recorded outcome is `Ok(status)` or the propagated error;
/// `()` means status 0.
pub trait IntoFiberStatus {
    fn into_status(self) -> FiberResult<i32>;
}

impl IntoFiberStatus for () {
    #[inline]
    fn into_status(self) -> FiberResult<i32> {
        Ok(0)
    }
}

impl IntoFiberStatus for i32 {
    #[inline]
    fn into_status(self) -> FiberResult<i32> {
        Ok(self)
    }
}

impl IntoFiberStatus for FiberResult<()> {
    #[inline]
    fn into_status(self) -> FiberResult<i32> {
        self.map(|()| 0)
    }
}

impl IntoFiberStatus for FiberResult<i32> {
    #[inline]
    fn into_status(self) -> FiberResult<i32> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FiberError;

    #[test]
    fn test_into_status() {
        assert_eq!(().into_status(), Ok(0));
        assert_eq!(42i32.into_status(), Ok(42));
        assert_eq!(FiberResult::<()>::Ok(()).into_status(), Ok(0));
        let failed: FiberResult<()> = Err(FiberError::Cancelled);
        assert_eq!(failed.into_status(), Err(FiberError::Cancelled));
    }
}
