//! Emulated physical memory with reference-counted frames.
//!
//! Physical memory is one host buffer of `frame_count * PAGE_SIZE` bytes. Frames are handed
//! out from a LIFO free list, zero-filled, and returned to the list once the last mapping
//! drops its reference. Frame 0 is reserved so a zero frame number never names usable
//! memory.

use alloc::{vec, vec::Vec};
use core::fmt;

use crate::{FrameNumber, PAGE_SIZE, PhysicalAddress, frame::Frame, frame::FrameFlags};

/// Errors that can occur during physical memory access or allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// No free frame is available.
    OutOfMemory,
    /// The frame or address lies outside emulated physical memory or is not allocated.
    InvalidFrame,
    /// The frame is already mapped as many times as its reference count can record.
    TooManyReferences,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => f.write_str("out of physical frames"),
            Self::InvalidFrame => f.write_str("invalid physical frame"),
            Self::TooManyReferences => f.write_str("too many references to frame"),
        }
    }
}

/// Physical memory: frame contents plus per-frame metadata.
pub struct PhysicalMemory {
    bytes: Vec<u8>,
    frames: Vec<Frame>,
    free: Vec<FrameNumber>,
}

impl PhysicalMemory {
    /// Creates physical memory with `frame_count` frames. Frame 0 is reserved.
    pub fn new(frame_count: usize) -> Self {
        let mut frames: Vec<Frame> = (0..frame_count).map(|_| Frame::default()).collect();
        if let Some(first) = frames.first_mut() {
            *first = Frame::reserved();
        }
        // Pop order hands out low frames first.
        let free = (1..frame_count).rev().map(FrameNumber::new).collect();

        Self {
            bytes: vec![0u8; frame_count * PAGE_SIZE],
            frames,
            free,
        }
    }

    /// Allocates a zero-filled frame with a reference count of zero.
    pub fn allocate(&mut self) -> Result<FrameNumber, AllocError> {
        let frame = self.free.pop().ok_or(AllocError::OutOfMemory)?;
        self.frames[frame.as_usize()].flags.insert(FrameFlags::ALLOCATED);
        self.frame_bytes_mut(frame)?.fill(0);
        log::trace!("allocated frame {:?}", frame);
        Ok(frame)
    }

    /// Records a new mapping of `frame`.
    pub fn get(&mut self, frame: FrameNumber) -> Result<(), AllocError> {
        self.allocated_mut(frame)?.get()?;
        Ok(())
    }

    /// Drops a mapping of `frame`, freeing it when no mapping remains.
    ///
    /// Returns true if the frame was freed.
    pub fn put(&mut self, frame: FrameNumber) -> Result<bool, AllocError> {
        let meta = self.allocated_mut(frame)?;
        if meta.put() > 0 {
            return Ok(false);
        }
        meta.flags.remove(FrameFlags::ALLOCATED);
        self.free.push(frame);
        log::trace!("freed frame {:?}", frame);
        Ok(true)
    }

    /// Returns a frame's metadata.
    pub fn frame(&self, frame: FrameNumber) -> Option<&Frame> {
        self.frames.get(frame.as_usize())
    }

    /// Returns the contents of an allocated frame.
    pub fn frame_bytes(&self, frame: FrameNumber) -> Result<&[u8], AllocError> {
        if !self.frame(frame).is_some_and(Frame::is_allocated) {
            return Err(AllocError::InvalidFrame);
        }
        let start = frame.as_usize() * PAGE_SIZE;
        Ok(&self.bytes[start..start + PAGE_SIZE])
    }

    /// Returns the mutable contents of an allocated frame.
    pub fn frame_bytes_mut(&mut self, frame: FrameNumber) -> Result<&mut [u8], AllocError> {
        if !self.frame(frame).is_some_and(Frame::is_allocated) {
            return Err(AllocError::InvalidFrame);
        }
        let start = frame.as_usize() * PAGE_SIZE;
        Ok(&mut self.bytes[start..start + PAGE_SIZE])
    }

    /// Reads raw physical memory regardless of allocation state, as a debugger would.
    pub fn read(&self, addr: PhysicalAddress, buf: &mut [u8]) -> Result<(), AllocError> {
        let start = addr.as_usize();
        let end = start.checked_add(buf.len()).ok_or(AllocError::InvalidFrame)?;
        let src = self.bytes.get(start..end).ok_or(AllocError::InvalidFrame)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    /// Total number of frames, including reserved ones.
    pub fn total_frames(&self) -> usize {
        self.frames.len()
    }

    /// Number of frames on the free list.
    pub fn free_frames(&self) -> usize {
        self.free.len()
    }

    /// Number of frames currently handed out.
    pub fn allocated_frames(&self) -> usize {
        self.frames.iter().filter(|frame| frame.is_allocated()).count()
    }

    fn allocated_mut(&mut self, frame: FrameNumber) -> Result<&mut Frame, AllocError> {
        self.frames
            .get_mut(frame.as_usize())
            .filter(|meta| meta.is_allocated())
            .ok_or(AllocError::InvalidFrame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_memory_with_reserved_first_frame() {
        let memory = PhysicalMemory::new(16);
        assert_eq!(memory.total_frames(), 16);
        assert_eq!(memory.free_frames(), 15);
        assert!(memory.frame(FrameNumber::new(0)).unwrap().is_reserved());
    }

    #[test]
    fn allocates_low_frames_first() {
        let mut memory = PhysicalMemory::new(16);
        assert_eq!(memory.allocate(), Ok(FrameNumber::new(1)));
        assert_eq!(memory.allocate(), Ok(FrameNumber::new(2)));
        assert_eq!(memory.allocated_frames(), 2);
    }

    #[test]
    fn allocated_frame_is_zeroed() {
        let mut memory = PhysicalMemory::new(4);
        let frame = memory.allocate().unwrap();
        memory.get(frame).unwrap();
        memory.frame_bytes_mut(frame).unwrap().fill(0xAA);
        assert!(memory.put(frame).unwrap());

        let again = memory.allocate().unwrap();
        assert_eq!(again, frame);
        assert!(memory.frame_bytes(again).unwrap().iter().all(|b| *b == 0));
    }

    #[test]
    fn frame_freed_after_last_reference() {
        let mut memory = PhysicalMemory::new(4);
        let frame = memory.allocate().unwrap();
        memory.get(frame).unwrap();
        memory.get(frame).unwrap();

        assert_eq!(memory.put(frame), Ok(false));
        assert_eq!(memory.put(frame), Ok(true));
        assert_eq!(memory.free_frames(), 3);
        assert_eq!(memory.frame_bytes(frame), Err(AllocError::InvalidFrame));
    }

    #[test]
    fn exhaustion_reports_out_of_memory() {
        let mut memory = PhysicalMemory::new(2);
        memory.allocate().unwrap();
        assert_eq!(memory.allocate(), Err(AllocError::OutOfMemory));
    }

    #[test]
    fn raw_read_bounds() {
        let memory = PhysicalMemory::new(2);
        let mut word = [0u8; 4];
        assert!(memory.read(PhysicalAddress::new(0x1ffc), &mut word).is_ok());
        assert_eq!(
            memory.read(PhysicalAddress::new(0x1ffe), &mut word),
            Err(AllocError::InvalidFrame)
        );
        assert_eq!(
            memory.read(PhysicalAddress::new(0x2000), &mut word),
            Err(AllocError::InvalidFrame)
        );
    }
}
