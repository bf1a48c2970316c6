pub mod bitmap;

use std::{
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};

use disk::{Disk, DiskError};
use log::{debug, warn};

use self::bitmap::Bitmap;

pub type SwapPageNumber = u32;

#[derive(Debug, PartialEq)]
pub enum SwapError {
    SwapExhausted,
    UnallocatedSlot(SwapPageNumber),
    Disk(DiskError),
}

impl fmt::Display for SwapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwapError::SwapExhausted => write!(f, "no free swap slot"),
            SwapError::UnallocatedSlot(spn) => write!(f, "swap slot {} is not allocated", spn),
            SwapError::Disk(err) => write!(f, "swap disk: {}", err),
        }
    }
}

impl std::error::Error for SwapError {}

impl From<DiskError> for SwapError {
    fn from(err: DiskError) -> Self {
        SwapError::Disk(err)
    }
}

/// The swap file: page sized slots on a `Disk`, with a bitmap of the slots in use.
///
/// A slot is reserved with `allocate` before anything is written to it, so a
/// full swap file is detected before any page content is touched.
#[derive(Debug)]
pub struct SwapSpace<const PAGE_SIZE: usize> {
    bitmap: Mutex<Bitmap>,
    disk: Disk<PAGE_SIZE>,
}

impl<const PAGE_SIZE: usize> SwapSpace<PAGE_SIZE> {
    pub fn create(name: &str, slots: usize) -> Result<SwapSpace<PAGE_SIZE>, SwapError> {
        let disk = Disk::create(name, slots)?;
        Ok(SwapSpace {
            bitmap: Mutex::new(Bitmap::new(slots)),
            disk,
        })
    }

    fn bitmap(&self) -> MutexGuard<'_, Bitmap> {
        self.bitmap.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.disk.capacity()
    }

    pub fn slots_in_use(&self) -> usize {
        self.bitmap().count_allocated()
    }

    pub fn is_allocated(&self, spn: SwapPageNumber) -> bool {
        self.bitmap().is_allocated(spn as usize)
    }

    pub fn allocate(&self) -> Result<SwapPageNumber, SwapError> {
        match self.bitmap().allocate() {
            Some(slot) => {
                debug!("Reserved swap slot {}", slot);
                Ok(slot as SwapPageNumber)
            }
            None => {
                warn!("Swap space {} is full", self.disk.name());
                Err(SwapError::SwapExhausted)
            }
        }
    }

    pub fn free(&self, spn: SwapPageNumber) -> Result<(), SwapError> {
        if !self.bitmap().deallocate(spn as usize) {
            return Err(SwapError::UnallocatedSlot(spn));
        }
        debug!("Released swap slot {}", spn);
        Ok(())
    }

    pub fn write(&self, spn: SwapPageNumber, page: &[u8]) -> Result<(), SwapError> {
        if !self.is_allocated(spn) {
            return Err(SwapError::UnallocatedSlot(spn));
        }
        self.disk.write_block(spn as usize, page)?;
        Ok(())
    }

    pub fn read(&self, spn: SwapPageNumber, page: &mut [u8]) -> Result<(), SwapError> {
        if !self.is_allocated(spn) {
            return Err(SwapError::UnallocatedSlot(spn));
        }
        self.disk.read_block_into(spn as usize, page)?;
        Ok(())
    }

    pub fn close(self) -> Result<(), SwapError> {
        self.disk.close()?;
        Ok(())
    }

    /// Closes the swap file and removes it from the host file system.
    pub fn destroy(self) -> Result<(), SwapError> {
        self.disk.destroy()?;
        Ok(())
    }
}
