//! Per-fiber scratch region
//!
//! A bump allocator that lives as long as one fiber life. Nothing is freed
//! individually: callers take a mark with [`Region::used`], allocate, and
//! [`Region::truncate`] back to the mark. When the fiber is recycled the
//! runtime checks that the region is empty and then resets it, keeping the
//! chunks for the next life.
//!
//! When first-allocation tracking is on, the region records a backtrace of
//! the allocation that took it from empty to non-empty. That is the site the
//! leak report points at.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::ptr::NonNull;

use crate::error::MemoryError;

const MIN_CHUNK_SIZE: usize = 4096;

/// Where the first allocation of the current life came from.
#[derive(Debug)]
pub enum AllocSite {
    Captured(Backtrace),
    Unsupported,
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "macos", target_os = "freebsd"))] {
        /// Whether first-allocation backtraces can be captured here.
        pub const fn alloc_site_supported() -> bool {
            true
        }

        #[inline(never)]
        fn capture_alloc_site() -> AllocSite {
            let bt = Backtrace::force_capture();
            match bt.status() {
                BacktraceStatus::Captured => AllocSite::Captured(bt),
                _ => AllocSite::Unsupported,
            }
        }
    } else {
        pub const fn alloc_site_supported() -> bool {
            false
        }

        fn capture_alloc_site() -> AllocSite {
            AllocSite::Unsupported
        }
    }
}

struct Chunk {
    buf: Vec<u8>,
    pos: usize,
    /// Region `used` value at the moment this chunk became current.
    base: usize,
}

impl Chunk {
    fn with_capacity(size: usize) -> Result<Self, MemoryError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(size)
            .map_err(|_| MemoryError::RegionExhausted)?;
        Ok(Chunk { buf, pos: 0, base: 0 })
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Offset at which `size` bytes aligned to `align` fit, if they do.
    fn fit(&mut self, size: usize, align: usize) -> Option<usize> {
        let addr = self.buf.as_mut_ptr() as usize + self.pos;
        let pad = addr.wrapping_neg() & (align - 1);
        let start = self.pos.checked_add(pad)?;
        let end = start.checked_add(size)?;
        (end <= self.capacity()).then_some(start)
    }
}

/// Bump allocator backing a fiber's gc region.
#[derive(Default)]
pub struct Region {
    chunks: Vec<Chunk>,
    current: usize,
    track_first_alloc: bool,
    first_alloc: Option<AllocSite>,
}

impl Region {
    pub const fn new() -> Self {
        Self {
            chunks: Vec::new(),
            current: 0,
            track_first_alloc: false,
            first_alloc: None,
        }
    }

    /// Allocate `size` bytes with no alignment requirement.
    #[inline]
    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>, MemoryError> {
        self.aligned_alloc(size, 1)
    }

    /// Allocate `size` bytes aligned to `align` (a power of two).
    pub fn aligned_alloc(&mut self, size: usize, align: usize) -> Result<NonNull<u8>, MemoryError> {
        debug_assert!(align.is_power_of_two());
        if self.track_first_alloc && self.first_alloc.is_none() && self.used() == 0 && size > 0 {
            self.first_alloc = Some(capture_alloc_site());
        }

        loop {
            if let Some(chunk) = self.chunks.get_mut(self.current) {
                if let Some(start) = chunk.fit(size, align) {
                    chunk.pos = start + size;
                    // SAFETY: start + size <= capacity, the buffer is never reallocated
                    let ptr = unsafe { chunk.buf.as_mut_ptr().add(start) };
                    return NonNull::new(ptr).ok_or(MemoryError::RegionExhausted);
                }
            }
            self.advance(size.checked_add(align).ok_or(MemoryError::SizeOverflow)?)?;
        }
    }

    /// Copy `data` into the region.
    pub fn alloc_copy(&mut self, data: &[u8]) -> Result<NonNull<u8>, MemoryError> {
        let ptr = self.alloc(data.len())?;
        // SAFETY: fresh allocation of data.len() bytes, cannot overlap data
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr(), data.len()) };
        Ok(ptr)
    }

    /// Move to the next chunk able to hold `need` bytes, growing if needed.
    fn advance(&mut self, need: usize) -> Result<(), MemoryError> {
        let base = self.used();
        if !self.chunks.is_empty() {
            let next = self.current + 1;
            if let Some(chunk) = self.chunks.get_mut(next) {
                if chunk.capacity() >= need {
                    chunk.pos = 0;
                    chunk.base = base;
                    self.current = next;
                    return Ok(());
                }
            }
            // Chunks past the current one hold nothing; replace them with a bigger one.
            self.chunks.truncate(next);
        }
        let last = self.chunks.last().map_or(0, Chunk::capacity);
        let size = need.max(last.saturating_mul(2)).max(MIN_CHUNK_SIZE);
        let mut chunk = Chunk::with_capacity(size)?;
        chunk.base = base;
        self.chunks.push(chunk);
        self.current = self.chunks.len() - 1;
        Ok(())
    }

    /// Bytes handed out in the current life, alignment padding included.
    #[inline]
    pub fn used(&self) -> usize {
        self.chunks
            .get(self.current)
            .map_or(0, |c| c.base + c.pos)
    }

    /// Bytes reserved across all chunks.
    pub fn capacity(&self) -> usize {
        self.chunks.iter().map(Chunk::capacity).sum()
    }

    /// Release everything allocated after `mark` (a previous `used()` value).
    pub fn truncate(&mut self, mark: usize) {
        if mark >= self.used() {
            return;
        }
        while self.current > 0 && self.chunks[self.current].base > mark {
            self.chunks[self.current].pos = 0;
            self.current -= 1;
        }
        if let Some(chunk) = self.chunks.get_mut(self.current) {
            chunk.pos = mark - chunk.base;
        }
        if mark == 0 {
            self.first_alloc = None;
        }
    }

    /// Drop all allocations and the recorded allocation site. Chunks are kept.
    pub fn reset(&mut self) {
        for chunk in &mut self.chunks {
            chunk.pos = 0;
            chunk.base = 0;
        }
        self.current = 0;
        self.first_alloc = None;
    }

    /// Record a backtrace at the first allocation of each life.
    pub fn set_track_first_alloc(&mut self, yes: bool) {
        self.track_first_alloc = yes;
    }

    #[inline]
    pub fn tracks_first_alloc(&self) -> bool {
        self.track_first_alloc
    }

    pub fn first_alloc_site(&self) -> Option<&AllocSite> {
        self.first_alloc.as_ref()
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("used", &self.used())
            .field("capacity", &self.capacity())
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_reset() {
        let mut r = Region::new();
        assert_eq!(r.used(), 0);
        r.alloc(1).unwrap();
        r.alloc(10).unwrap();
        assert_eq!(r.used(), 11);
        let cap = r.capacity();
        r.reset();
        assert_eq!(r.used(), 0);
        assert_eq!(r.capacity(), cap);
    }

    #[test]
    fn test_aligned_alloc() {
        let mut r = Region::new();
        r.alloc(3).unwrap();
        let p = r.aligned_alloc(16, 16).unwrap();
        assert_eq!(p.as_ptr() as usize % 16, 0);
        assert!(r.used() >= 19);
    }

    #[test]
    fn test_grows_across_chunks() {
        let mut r = Region::new();
        r.alloc(MIN_CHUNK_SIZE - 8).unwrap();
        let mark = r.used();
        r.alloc(MIN_CHUNK_SIZE).unwrap();
        assert!(r.capacity() > MIN_CHUNK_SIZE);
        assert!(r.used() > mark + MIN_CHUNK_SIZE - 1);

        r.truncate(mark);
        assert_eq!(r.used(), mark);
        r.truncate(0);
        assert_eq!(r.used(), 0);
    }

    #[test]
    fn test_alloc_copy() {
        let mut r = Region::new();
        let p = r.alloc_copy(b"fiber").unwrap();
        let got = unsafe { std::slice::from_raw_parts(p.as_ptr(), 5) };
        assert_eq!(got, b"fiber");
    }

    #[test]
    fn test_first_alloc_tracking() {
        let mut r = Region::new();
        r.alloc(1).unwrap();
        assert!(r.first_alloc_site().is_none());
        r.reset();

        r.set_track_first_alloc(true);
        r.alloc(1).unwrap();
        assert!(r.first_alloc_site().is_some());
        r.reset();
        assert!(r.first_alloc_site().is_none());
    }
}
