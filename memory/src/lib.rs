use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::trace;

#[derive(Debug, PartialEq)]
pub enum MemoryError {
    OverCapacity,
    NoSuchFrame(usize),
    IncorrectFrameSize,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::OverCapacity => write!(f, "physical address out of range"),
            MemoryError::NoSuchFrame(ppn) => write!(f, "no physical frame {}", ppn),
            MemoryError::IncorrectFrameSize => write!(f, "buffer does not match the page size"),
        }
    }
}

impl std::error::Error for MemoryError {}

/// Main memory of the simulated machine, `num_frames` frames of `PAGE_SIZE` bytes.
///
/// Cloning gives another handle on the same memory.
#[derive(Clone)]
pub struct PhysicalMemory<const PAGE_SIZE: usize> {
    num_frames: usize,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl<const PAGE_SIZE: usize> PhysicalMemory<PAGE_SIZE> {
    pub fn create(num_frames: usize) -> Self {
        Self {
            num_frames,
            buffer: Arc::new(Mutex::new(vec![0; num_frames * PAGE_SIZE])),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    pub fn capacity(&self) -> usize {
        self.num_frames * PAGE_SIZE
    }

    pub fn frame_address(ppn: usize) -> u64 {
        (ppn * PAGE_SIZE) as u64
    }

    pub fn check_address(&self, address: u64, len: usize) -> Result<(), MemoryError> {
        match address.checked_add(len as u64) {
            Some(end) if end <= self.capacity() as u64 => {}
            _ => return Err(MemoryError::OverCapacity),
        }
        Ok(())
    }

    fn check_frame(&self, ppn: usize, len: usize) -> Result<(), MemoryError> {
        if ppn >= self.num_frames {
            return Err(MemoryError::NoSuchFrame(ppn));
        }
        if len != PAGE_SIZE {
            return Err(MemoryError::IncorrectFrameSize);
        }
        Ok(())
    }

    pub fn read_u8(&self, address: u64) -> Result<u8, MemoryError> {
        self.check_address(address, 1)?;
        let buffer = self.lock();
        Ok(buffer[address as usize])
    }

    pub fn write_u8(&self, address: u64, byte: u8) -> Result<(), MemoryError> {
        self.check_address(address, 1)?;
        let mut buffer = self.lock();
        buffer[address as usize] = byte;
        Ok(())
    }

    /// Copies `data` into memory starting at `address`.
    pub fn write_bytes(&self, address: u64, data: &[u8]) -> Result<(), MemoryError> {
        self.check_address(address, data.len())?;
        let mut buffer = self.lock();
        buffer[address as usize..address as usize + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn read_bytes(&self, address: u64, data: &mut [u8]) -> Result<(), MemoryError> {
        self.check_address(address, data.len())?;
        let buffer = self.lock();
        data.copy_from_slice(&buffer[address as usize..address as usize + data.len()]);
        Ok(())
    }

    pub fn read_frame(&self, ppn: usize, frame: &mut [u8]) -> Result<(), MemoryError> {
        self.check_frame(ppn, frame.len())?;
        trace!("Reading frame {}", ppn);
        let buffer = self.lock();
        frame.copy_from_slice(&buffer[ppn * PAGE_SIZE..(ppn + 1) * PAGE_SIZE]);
        Ok(())
    }

    pub fn write_frame(&self, ppn: usize, frame: &[u8]) -> Result<(), MemoryError> {
        self.check_frame(ppn, frame.len())?;
        trace!("Writing frame {}", ppn);
        let mut buffer = self.lock();
        buffer[ppn * PAGE_SIZE..(ppn + 1) * PAGE_SIZE].copy_from_slice(frame);
        Ok(())
    }

    pub fn zero_frame(&self, ppn: usize) -> Result<(), MemoryError> {
        self.check_frame(ppn, PAGE_SIZE)?;
        trace!("Zeroing frame {}", ppn);
        let mut buffer = self.lock();
        buffer[ppn * PAGE_SIZE..(ppn + 1) * PAGE_SIZE].fill(0);
        Ok(())
    }
}
