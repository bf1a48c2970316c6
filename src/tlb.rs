use std::{
    ops::{Deref, DerefMut},
    sync::{Mutex, MutexGuard, PoisonError},
};

use log::trace;

use crate::{
    error::VmError,
    translation::{FrameNumber, Mapping, PageNumber, TranslationEntry},
};

/// The hardware TLB: a fixed number of slots holding copies of translations.
pub struct Tlb {
    entries: Vec<TranslationEntry>,
    replace_hand: usize,
}

impl Tlb {
    pub fn new(size: usize) -> Self {
        Tlb {
            entries: vec![TranslationEntry::new(0); size],
            replace_hand: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn read_entry(&self, i: usize) -> TranslationEntry {
        self.entries[i]
    }

    pub fn write_entry(&mut self, i: usize, entry: TranslationEntry) {
        self.entries[i] = entry;
    }

    pub fn find(&self, vpn: PageNumber) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.valid && entry.vpn == vpn)
    }

    /// Slot to use for a new translation: the one already holding `vpn`, else
    /// a free one, else the next slot in round-robin order.
    pub(crate) fn slot_for(&mut self, vpn: PageNumber) -> usize {
        if let Some(i) = self.find(vpn) {
            return i;
        }
        if let Some(i) = self.entries.iter().position(|entry| !entry.valid) {
            return i;
        }
        let i = self.replace_hand;
        self.replace_hand = (self.replace_hand + 1) % self.entries.len();
        i
    }

    /// Invalidates any slot translating `vpn` to `ppn`, returning the last
    /// copy so its bits can be written back.
    pub(crate) fn invalidate(&mut self, vpn: PageNumber, ppn: FrameNumber) -> Option<TranslationEntry> {
        let mut stale = None;
        for entry in self.entries.iter_mut() {
            if entry.valid && entry.vpn == vpn && entry.mapping == Mapping::Frame(ppn) {
                trace!("TLB: invalidating page {} -> frame {}", vpn, ppn);
                entry.valid = false;
                stale = Some(*entry);
            }
        }
        stale
    }

    pub fn valid_entries(&self) -> impl Iterator<Item = &TranslationEntry> {
        self.entries.iter().filter(|entry| entry.valid)
    }
}

/// Held while interrupts are disabled. A TLB miss cannot be raised while a
/// guard is alive, so the TLB it exposes is never seen half updated.
pub struct InterruptGuard<'a> {
    tlb: MutexGuard<'a, Tlb>,
}

impl Deref for InterruptGuard<'_> {
    type Target = Tlb;

    fn deref(&self) -> &Self::Target {
        &self.tlb
    }
}

impl DerefMut for InterruptGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.tlb
    }
}

/// The simulated single core: its TLB and the address translation it performs.
pub struct Processor<const PAGE_SIZE: usize> {
    tlb: Mutex<Tlb>,
}

impl<const PAGE_SIZE: usize> Processor<PAGE_SIZE> {
    pub fn new(tlb_size: usize) -> Self {
        Processor {
            tlb: Mutex::new(Tlb::new(tlb_size)),
        }
    }

    /// `None` when the page index does not fit a `PageNumber`, which no
    /// process can map.
    pub fn page_from_address(vaddr: u64) -> Option<PageNumber> {
        PageNumber::try_from(vaddr / PAGE_SIZE as u64).ok()
    }

    pub fn offset_from_address(vaddr: u64) -> u64 {
        vaddr % PAGE_SIZE as u64
    }

    pub fn make_address(ppn: FrameNumber, offset: u64) -> u64 {
        ppn as u64 * PAGE_SIZE as u64 + offset
    }

    pub fn disable_interrupts(&self) -> InterruptGuard<'_> {
        InterruptGuard {
            tlb: self.tlb.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    pub fn tlb_size(&self) -> usize {
        self.disable_interrupts().size()
    }

    /// Translates `vaddr` through the TLB and runs `op` on the physical
    /// address, setting the used and dirty bits like the hardware does.
    /// Returns `Ok(None)` on a TLB miss, which includes addresses beyond any
    /// page number.
    pub fn access<R>(
        &self,
        vaddr: u64,
        write: bool,
        op: impl FnOnce(u64) -> Result<R, VmError>,
    ) -> Result<Option<R>, VmError> {
        let vpn = match Self::page_from_address(vaddr) {
            Some(vpn) => vpn,
            None => {
                trace!("TLB miss at {:#x} (no such page)", vaddr);
                return Ok(None);
            }
        };
        let mut tlb = self.disable_interrupts();
        let i = match tlb.find(vpn) {
            Some(i) => i,
            None => {
                trace!("TLB miss at {:#x} (page {})", vaddr, vpn);
                return Ok(None);
            }
        };
        let mut entry = tlb.read_entry(i);
        let ppn = match entry.mapping {
            Mapping::Frame(ppn) => ppn,
            _ => return Err(VmError::invariant(format!("TLB slot {} has no frame", i))),
        };
        if write && entry.read_only {
            return Err(VmError::ReadOnly { vpn });
        }
        entry.used = true;
        entry.dirty |= write;
        tlb.write_entry(i, entry);
        let paddr = Self::make_address(ppn, Self::offset_from_address(vaddr));
        op(paddr).map(Some)
    }
}
