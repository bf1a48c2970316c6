use std::collections::VecDeque;

use log::trace;

use crate::{error::VmError, translation::FrameNumber};

/// The list of physical frames no process owns.
///
/// Not synchronized on its own: it lives inside the memory manager's core
/// map, behind the allocation lock.
pub struct FrameAllocator {
    free_frames: VecDeque<FrameNumber>,
    is_free: Vec<bool>,
}

impl FrameAllocator {
    pub fn init(num_frames: usize) -> Self {
        Self {
            free_frames: (0..num_frames as FrameNumber).collect(),
            is_free: vec![true; num_frames],
        }
    }

    pub fn num_frames(&self) -> usize {
        self.is_free.len()
    }

    pub fn free_count(&self) -> usize {
        self.free_frames.len()
    }

    pub fn is_free(&self, ppn: FrameNumber) -> bool {
        self.is_free.get(ppn as usize).copied().unwrap_or(false)
    }

    pub fn allocate(&mut self) -> Option<FrameNumber> {
        let ppn = self.free_frames.pop_front()?;
        self.is_free[ppn as usize] = false;
        trace!("Allocated frame {}", ppn);
        Some(ppn)
    }

    pub fn free(&mut self, ppn: FrameNumber) -> Result<(), VmError> {
        match self.is_free.get_mut(ppn as usize) {
            None => Err(VmError::invariant(format!("no such frame {}", ppn))),
            Some(true) => Err(VmError::invariant(format!("frame {} freed twice", ppn))),
            Some(slot) => {
                *slot = true;
                self.free_frames.push_back(ppn);
                trace!("Freed frame {}", ppn);
                Ok(())
            }
        }
    }

    pub fn free_frames(&self) -> impl Iterator<Item = FrameNumber> + '_ {
        self.free_frames.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_frame() {
        let mut allocator = FrameAllocator::init(3);
        assert_eq!(allocator.allocate(), Some(0));
        assert_eq!(allocator.allocate(), Some(1));
        assert_eq!(allocator.free_count(), 1);
        assert!(!allocator.is_free(0));
        assert!(allocator.is_free(2));
    }

    #[test]
    fn test_allocate_frame_full() {
        let mut allocator = FrameAllocator::init(2);
        allocator.allocate();
        allocator.allocate();
        assert_eq!(allocator.allocate(), None);
        allocator.free(1).unwrap();
        assert_eq!(allocator.allocate(), Some(1));
    }

    #[test]
    fn freed_frames_go_to_the_back() {
        let mut allocator = FrameAllocator::init(3);
        let first = allocator.allocate().unwrap();
        allocator.free(first).unwrap();
        assert_eq!(allocator.allocate(), Some(1));
        assert_eq!(allocator.allocate(), Some(2));
        assert_eq!(allocator.allocate(), Some(0));
    }

    #[test]
    fn double_free_is_an_invariant_violation() {
        let mut allocator = FrameAllocator::init(2);
        assert!(matches!(
            allocator.free(0),
            Err(VmError::InvariantViolation(_))
        ));
        assert!(matches!(
            allocator.free(5),
            Err(VmError::InvariantViolation(_))
        ));
        assert_eq!(allocator.free_count(), 2);
    }
}
