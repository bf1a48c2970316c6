use std::{
    fmt,
    fs::{remove_file, File},
    io::{Read, Seek, SeekFrom, Write},
    mem::size_of,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::{debug, trace};

#[derive(Debug, PartialEq)]
pub enum DiskError {
    IncorrectBlockSize,
    OverCapacity,
    HeaderMismatch { block_size: u32, capacity: u32 },
    Io(std::io::ErrorKind),
}

impl fmt::Display for DiskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskError::IncorrectBlockSize => write!(f, "buffer does not match the block size"),
            DiskError::OverCapacity => write!(f, "block number is past the disk capacity"),
            DiskError::HeaderMismatch {
                block_size,
                capacity,
            } => write!(
                f,
                "disk image header mismatch (block size {}, capacity {})",
                block_size, capacity
            ),
            DiskError::Io(kind) => write!(f, "disk i/o error: {}", kind),
        }
    }
}

impl std::error::Error for DiskError {}

impl From<std::io::Error> for DiskError {
    fn from(err: std::io::Error) -> Self {
        DiskError::Io(err.kind())
    }
}

const HEADER_SIZE: usize = size_of::<u32>() * 2;

/// A file made of `BLOCKSIZE` sized blocks.
///
/// The file only grows as far as the highest block written so far; reading a
/// block that was never written yields zeroes. `capacity` is the number of
/// blocks the disk may grow to.
#[derive(Debug, Clone)]
pub struct Disk<const BLOCKSIZE: usize> {
    file_name: String,
    capacity: usize,
    file: Arc<Mutex<File>>,
}

pub fn make_name(name: &str) -> String {
    let name = name.replace("-", "_");
    let mut disk_name = String::from("DISK_IMAGE_");
    disk_name.push_str(&name);
    disk_name
}

fn write_header(file: &mut File, block_size: u32, capacity: u32) -> Result<(), std::io::Error> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&block_size.to_be_bytes())?;
    file.write_all(&capacity.to_be_bytes())?;
    Ok(())
}

fn read_header(file: &mut File) -> Result<(u32, u32), std::io::Error> {
    let mut block_size = [0; size_of::<u32>()];
    let mut capacity = [0; size_of::<u32>()];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut block_size)?;
    file.read_exact(&mut capacity)?;
    Ok((u32::from_be_bytes(block_size), u32::from_be_bytes(capacity)))
}

fn block_offset<const BLOCKSIZE: usize>(block_number: usize) -> u64 {
    HEADER_SIZE as u64 + (block_number * BLOCKSIZE) as u64
}

impl<const BLOCKSIZE: usize> Disk<BLOCKSIZE> {
    /// Creates (or truncates) the image file for `name`.
    pub fn create(name: &str, capacity: usize) -> Result<Self, DiskError> {
        let mut file = File::options()
            .truncate(true)
            .write(true)
            .read(true)
            .create(true)
            .open(make_name(name))?;
        write_header(&mut file, BLOCKSIZE as u32, capacity as u32)?;
        debug!(
            "Created disk {} ({} blocks of {} bytes)",
            name, capacity, BLOCKSIZE
        );
        Ok(Self {
            file_name: String::from(name),
            capacity,
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Opens an existing image, checking its header against `BLOCKSIZE` and `capacity`.
    pub fn connect(name: &str, capacity: usize) -> Result<Self, DiskError> {
        let mut file = File::options()
            .write(true)
            .read(true)
            .open(make_name(name))?;
        let (block_size, stored_capacity) = read_header(&mut file)?;
        if block_size as usize != BLOCKSIZE || stored_capacity as usize != capacity {
            return Err(DiskError::HeaderMismatch {
                block_size,
                capacity: stored_capacity,
            });
        }
        Ok(Self {
            file_name: String::from(name),
            capacity,
            file: Arc::new(Mutex::new(file)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.file_name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of blocks currently backed by the file.
    pub fn blocks_in_file(&self) -> Result<usize, DiskError> {
        let file = self.lock();
        let len = file.metadata()?.len() as usize;
        Ok(len.saturating_sub(HEADER_SIZE) / BLOCKSIZE)
    }

    pub fn read_block(&self, block_number: usize) -> Result<Box<[u8; BLOCKSIZE]>, DiskError> {
        let mut buf = Box::new([0; BLOCKSIZE]);
        self.read_block_into(block_number, &mut *buf)?;
        Ok(buf)
    }

    pub fn read_block_into(&self, block_number: usize, buf: &mut [u8]) -> Result<(), DiskError> {
        if buf.len() != BLOCKSIZE {
            return Err(DiskError::IncorrectBlockSize);
        } else if block_number >= self.capacity {
            return Err(DiskError::OverCapacity);
        }
        let mut file = self.lock();
        trace!("Start reading block[{}]", block_number);
        let offset = block_offset::<BLOCKSIZE>(block_number);
        if offset + BLOCKSIZE as u64 > file.metadata()?.len() {
            // Never written.
            buf.fill(0);
        } else {
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(buf)?;
        }
        trace!("Done reading block[{}]", block_number);
        Ok(())
    }

    pub fn write_block(&self, block_number: usize, block: &[u8]) -> Result<(), DiskError> {
        if block.len() != BLOCKSIZE {
            return Err(DiskError::IncorrectBlockSize);
        } else if block_number >= self.capacity {
            return Err(DiskError::OverCapacity);
        }
        let mut file = self.lock();
        trace!("Start writing block[{}]", block_number);
        file.seek(SeekFrom::Start(block_offset::<BLOCKSIZE>(block_number)))?;
        file.write_all(block)?;
        trace!("Done writing block[{}]", block_number);
        Ok(())
    }

    pub fn sync(&self) -> Result<(), DiskError> {
        let mut file = self.lock();
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    /// Flushes the image and drops this handle. Other clones keep the file open.
    pub fn close(self) -> Result<(), DiskError> {
        self.sync()?;
        debug!("Closed disk {}", self.file_name);
        Ok(())
    }

    /// Closes the disk and deletes its image file.
    pub fn destroy(self) -> Result<(), DiskError> {
        let path = make_name(&self.file_name);
        drop(self);
        remove_file(path)?;
        Ok(())
    }
}
