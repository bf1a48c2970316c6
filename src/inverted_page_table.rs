use std::sync::{Arc, Weak};

use crate::{
    clock::{ClockTarget, FrameProbe},
    error::VmError,
    page_table::PageTableMutator,
    translation::{FrameNumber, PageNumber, ProcessId},
};

/// Who owns a physical frame.
pub struct IptEntry {
    pub pid: ProcessId,
    pub vpn: PageNumber,
    pub pin_count: u32,
    owner: Weak<dyn PageTableMutator>,
}

impl IptEntry {
    pub fn owner(&self) -> Result<Arc<dyn PageTableMutator>, VmError> {
        self.owner.upgrade().ok_or_else(|| {
            VmError::invariant(format!(
                "page table of pid {} dropped while it still owns frames",
                self.pid
            ))
        })
    }
}

/// Frame indexed table for the reverse lookup frame -> (process, page).
pub struct InvertedPageTable {
    entries: Vec<Option<IptEntry>>,
}

impl InvertedPageTable {
    pub fn new(num_frames: usize) -> Self {
        let mut entries = Vec::with_capacity(num_frames);
        entries.resize_with(num_frames, || None);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, ppn: FrameNumber) -> Option<&IptEntry> {
        self.entries.get(ppn as usize)?.as_ref()
    }

    fn occupied(&mut self, ppn: FrameNumber) -> Result<&mut IptEntry, VmError> {
        self.entries
            .get_mut(ppn as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| VmError::invariant(format!("frame {} is not assigned", ppn)))
    }

    /// Records `vpn` of `owner` as the user of `ppn`. The frame starts pinned
    /// once, for the duration of the load.
    pub fn assign(
        &mut self,
        ppn: FrameNumber,
        owner: &Arc<dyn PageTableMutator>,
        vpn: PageNumber,
    ) -> Result<(), VmError> {
        let slot = self
            .entries
            .get_mut(ppn as usize)
            .ok_or_else(|| VmError::invariant(format!("no such frame {}", ppn)))?;
        if let Some(entry) = slot {
            return Err(VmError::invariant(format!(
                "frame {} already holds page {} of pid {}",
                ppn, entry.vpn, entry.pid
            )));
        }
        *slot = Some(IptEntry {
            pid: owner.pid(),
            vpn,
            pin_count: 1,
            owner: Arc::downgrade(owner),
        });
        Ok(())
    }

    pub fn release(&mut self, ppn: FrameNumber) -> Result<IptEntry, VmError> {
        let entry = self.occupied(ppn)?;
        if entry.pin_count > 0 {
            return Err(VmError::invariant(format!(
                "releasing frame {} while pinned {} times",
                ppn, entry.pin_count
            )));
        }
        self.entries[ppn as usize]
            .take()
            .ok_or_else(|| VmError::invariant(format!("frame {} is not assigned", ppn)))
    }

    pub fn pin(&mut self, ppn: FrameNumber) -> Result<u32, VmError> {
        let entry = self.occupied(ppn)?;
        entry.pin_count += 1;
        Ok(entry.pin_count)
    }

    pub fn unpin(&mut self, ppn: FrameNumber) -> Result<u32, VmError> {
        let entry = self.occupied(ppn)?;
        if entry.pin_count == 0 {
            return Err(VmError::invariant(format!("frame {} is not pinned", ppn)));
        }
        entry.pin_count -= 1;
        Ok(entry.pin_count)
    }

    pub fn frames_of(&self, pid: ProcessId) -> Vec<FrameNumber> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| matches!(entry, Some(e) if e.pid == pid))
            .map(|(ppn, _)| ppn as FrameNumber)
            .collect()
    }

    pub fn assigned_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_some()).count()
    }
}

impl ClockTarget for InvertedPageTable {
    fn frames(&self) -> usize {
        self.entries.len()
    }

    fn probe(&mut self, ppn: FrameNumber) -> Result<FrameProbe, VmError> {
        let entry = match self.get(ppn) {
            Some(entry) => entry,
            None => return Ok(FrameProbe::Unassigned),
        };
        let pinned = entry.pin_count > 0;
        if entry.owner()?.take_used(entry.vpn)? {
            return Ok(FrameProbe::Referenced { pinned });
        }
        Ok(if pinned {
            FrameProbe::Pinned
        } else {
            FrameProbe::Evictable
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::page_table::PageTable;

    fn table(pid: ProcessId, pages: usize) -> Arc<dyn PageTableMutator> {
        Arc::new(PageTable::init(pid, pages))
    }

    #[test]
    fn assign_and_release() {
        let owner = table(1, 4);
        let mut ipt = InvertedPageTable::new(2);
        ipt.assign(1, &owner, 3).unwrap();
        assert_eq!(ipt.get(1).unwrap().vpn, 3);
        assert_eq!(ipt.get(1).unwrap().pid, 1);
        assert!(ipt.get(0).is_none());

        assert!(ipt.release(1).is_err());
        assert_eq!(ipt.unpin(1).unwrap(), 0);
        let entry = ipt.release(1).unwrap();
        assert_eq!(entry.vpn, 3);
        assert_eq!(ipt.assigned_count(), 0);
    }

    #[test]
    fn double_assign_is_refused() {
        let owner = table(1, 4);
        let mut ipt = InvertedPageTable::new(2);
        ipt.assign(0, &owner, 0).unwrap();
        assert!(matches!(
            ipt.assign(0, &owner, 1),
            Err(VmError::InvariantViolation(_))
        ));
    }

    #[test]
    fn pin_counts() {
        let owner = table(1, 4);
        let mut ipt = InvertedPageTable::new(1);
        ipt.assign(0, &owner, 0).unwrap();
        assert_eq!(ipt.pin(0).unwrap(), 2);
        assert_eq!(ipt.unpin(0).unwrap(), 1);
        assert_eq!(ipt.unpin(0).unwrap(), 0);
        assert!(ipt.unpin(0).is_err());
        assert!(ipt.pin(5).is_err());
    }

    #[test]
    fn frames_of_process() {
        let a = table(1, 4);
        let b = table(2, 4);
        let mut ipt = InvertedPageTable::new(3);
        ipt.assign(0, &a, 0).unwrap();
        ipt.assign(1, &b, 0).unwrap();
        ipt.assign(2, &a, 1).unwrap();
        assert_eq!(ipt.frames_of(1), vec![0, 2]);
        assert_eq!(ipt.frames_of(2), vec![1]);
    }

    #[test]
    fn dropped_owner_is_reported() {
        let mut ipt = InvertedPageTable::new(1);
        {
            let owner = table(9, 1);
            ipt.assign(0, &owner, 0).unwrap();
        }
        assert!(ipt.get(0).unwrap().owner().is_err());
    }
}
