mod iter;

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::trace;

use crate::{
    error::VmError,
    translation::{FrameNumber, Mapping, PageNumber, ProcessId, SwapPageNumber, TranslationEntry},
};

pub use self::iter::PageTableIterator;

/// What the eviction engine may do to a page table it does not own.
///
/// The inverted page table keeps a weak reference of this type for every
/// resident frame. Every call is made with the allocation lock held.
pub trait PageTableMutator: Send + Sync {
    fn pid(&self) -> ProcessId;

    fn entry(&self, vpn: PageNumber) -> Result<TranslationEntry, VmError>;

    /// Clears the used bit of `vpn`, returning its previous value.
    fn take_used(&self, vpn: PageNumber) -> Result<bool, VmError>;

    /// Folds bits the TLB collected for `vpn` into the entry.
    fn merge_hardware_bits(&self, vpn: PageNumber, used: bool, dirty: bool) -> Result<(), VmError>;

    /// Invalidates `vpn`. With a slot the page now lives in swap, without one
    /// it is reloaded from its section or zero-filled on the next fault.
    fn evict(&self, vpn: PageNumber, slot: Option<SwapPageNumber>) -> Result<(), VmError>;
}

/// Per-process table of translations, indexed by virtual page number.
pub struct PageTable {
    pid: ProcessId,
    entries: Mutex<Vec<TranslationEntry>>,
}

impl PageTable {
    pub fn init(pid: ProcessId, num_pages: usize) -> Self {
        let entries = (0..num_pages as PageNumber)
            .map(TranslationEntry::new)
            .collect();
        Self {
            pid,
            entries: Mutex::new(entries),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<TranslationEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn num_pages(&self) -> usize {
        self.entries().len()
    }

    pub fn lookup(&self, vpn: PageNumber) -> Result<TranslationEntry, VmError> {
        let entries = self.entries();
        entries
            .get(vpn as usize)
            .copied()
            .ok_or(VmError::OutOfBounds {
                vpn: vpn.into(),
                num_pages: entries.len(),
            })
    }

    pub(crate) fn update<R>(
        &self,
        vpn: PageNumber,
        f: impl FnOnce(&mut TranslationEntry) -> R,
    ) -> Result<R, VmError> {
        let mut entries = self.entries();
        let num_pages = entries.len();
        let entry = entries
            .get_mut(vpn as usize)
            .ok_or(VmError::OutOfBounds {
                vpn: vpn.into(),
                num_pages,
            })?;
        Ok(f(entry))
    }

    pub(crate) fn set_read_only(&self, vpn: PageNumber, read_only: bool) -> Result<(), VmError> {
        self.update(vpn, |entry| entry.read_only = read_only)
    }

    /// Makes `vpn` resident in `ppn`. The content was just established, so
    /// the page starts clean and recently used.
    pub(crate) fn map_to_frame(&self, vpn: PageNumber, ppn: FrameNumber) -> Result<(), VmError> {
        self.update(vpn, |entry| {
            if let Mapping::Swap(_) = entry.mapping {
                entry.swap_backed = true;
            }
            entry.mapping = Mapping::Frame(ppn);
            entry.valid = true;
            entry.dirty = false;
            entry.used = true;
        })
    }

    /// Forgets `vpn` entirely, as on process teardown.
    pub(crate) fn unmap(&self, vpn: PageNumber) -> Result<TranslationEntry, VmError> {
        self.update(vpn, |entry| {
            let old = *entry;
            *entry = TranslationEntry {
                read_only: entry.read_only,
                ..TranslationEntry::new(vpn)
            };
            old
        })
    }

    pub fn iter(&self) -> PageTableIterator {
        PageTableIterator::new(self.entries().clone())
    }

    pub fn resident_pages(&self) -> Vec<(PageNumber, FrameNumber)> {
        self.iter()
            .filter_map(|entry| entry.frame().map(|ppn| (entry.vpn, ppn)))
            .collect()
    }
}

impl PageTableMutator for PageTable {
    fn pid(&self) -> ProcessId {
        self.pid
    }

    fn entry(&self, vpn: PageNumber) -> Result<TranslationEntry, VmError> {
        self.lookup(vpn)
    }

    fn take_used(&self, vpn: PageNumber) -> Result<bool, VmError> {
        self.update(vpn, |entry| std::mem::replace(&mut entry.used, false))
    }

    fn merge_hardware_bits(&self, vpn: PageNumber, used: bool, dirty: bool) -> Result<(), VmError> {
        self.update(vpn, |entry| {
            entry.used |= used;
            entry.dirty |= dirty;
        })
    }

    fn evict(&self, vpn: PageNumber, slot: Option<SwapPageNumber>) -> Result<(), VmError> {
        trace!("pid {}: evicting page {} to {:?}", self.pid, vpn, slot);
        self.update(vpn, |entry| {
            entry.valid = false;
            entry.dirty = false;
            entry.used = false;
            match slot {
                Some(spn) => {
                    entry.mapping = Mapping::Swap(spn);
                    entry.swap_backed = true;
                }
                None => {
                    entry.mapping = Mapping::Unassigned;
                    entry.swap_backed = false;
                }
            }
        })
    }
}
