/// One bit per swap slot, set when the slot is in use.
#[derive(Debug)]
pub struct Bitmap {
    bitmap: Vec<u8>,
    len: usize,
}

impl Bitmap {
    /// Bytes needed to track `len` slots.
    pub fn size(len: usize) -> usize {
        len / 8 + if len % 8 == 0 { 0 } else { 1 }
    }

    pub fn new(len: usize) -> Bitmap {
        Bitmap {
            bitmap: vec![0; Bitmap::size(len)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Marks the lowest free slot as used and returns it.
    pub fn allocate(&mut self) -> Option<usize> {
        for i in 0..self.bitmap.len() {
            if self.bitmap[i] == 0xff {
                continue;
            }
            for j in 0..8 {
                let slot = i * 8 + j;
                if slot >= self.len {
                    return None;
                }
                if self.bitmap[i] & (1 << j) == 0 {
                    self.bitmap[i] |= 1 << j;
                    return Some(slot);
                }
            }
        }
        None
    }

    /// Returns `false` if the slot was not in use.
    pub fn deallocate(&mut self, slot: usize) -> bool {
        if !self.is_allocated(slot) {
            return false;
        }
        self.bitmap[slot / 8] &= !(1 << (slot % 8));
        true
    }

    pub fn is_allocated(&self, slot: usize) -> bool {
        slot < self.len && self.bitmap[slot / 8] & (1 << (slot % 8)) != 0
    }

    pub fn count_allocated(&self) -> usize {
        self.bitmap.iter().map(|b| b.count_ones() as usize).sum()
    }
}
