use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use log::{debug, info, trace, warn};
use memory::PhysicalMemory;
use swap_manager::SwapSpace;

use crate::{
    clock::{Clock, Sweep},
    config::VmConfig,
    error::VmError,
    frame_allocator::FrameAllocator,
    inverted_page_table::InvertedPageTable,
    page_table::{PageTable, PageTableMutator},
    section::ExecutableImage,
    tlb::Processor,
    translation::{FrameNumber, Mapping, PageNumber, PageState, ProcessId},
};

/// Everything guarded by the allocation lock.
struct CoreMap {
    allocator: FrameAllocator,
    ipt: InvertedPageTable,
    clock: Clock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOwner {
    pub pid: ProcessId,
    pub vpn: PageNumber,
    pub pin_count: u32,
}

/// The machine wide memory state: physical frames, who owns them, the clock
/// hand, the swap file and the processor's TLB. Built once at boot and shared
/// by every process.
///
/// Lock order is allocation lock, then TLB (interrupts disabled), then a page
/// table. Page table locks are only ever held for a single entry update.
pub struct MemoryManager<const PAGE_SIZE: usize> {
    core_map: Mutex<CoreMap>,
    unpinned: Condvar,
    memory: PhysicalMemory<PAGE_SIZE>,
    swap: SwapSpace<PAGE_SIZE>,
    processor: Processor<PAGE_SIZE>,
}

impl<const PAGE_SIZE: usize> MemoryManager<PAGE_SIZE> {
    pub fn new(config: &VmConfig) -> Result<Self, VmError> {
        if config.num_phys_pages == 0 || config.tlb_size == 0 {
            return Err(VmError::invariant(
                "the machine needs at least one frame and one TLB slot",
            ));
        }
        let swap = SwapSpace::create(&config.swap_name, config.swap_slots)?;
        info!(
            "Memory manager up: {} frames of {} bytes, {} TLB slots, {} swap slots",
            config.num_phys_pages, PAGE_SIZE, config.tlb_size, config.swap_slots
        );
        Ok(MemoryManager {
            core_map: Mutex::new(CoreMap {
                allocator: FrameAllocator::init(config.num_phys_pages),
                ipt: InvertedPageTable::new(config.num_phys_pages),
                clock: Clock::new(),
            }),
            unpinned: Condvar::new(),
            memory: PhysicalMemory::create(config.num_phys_pages),
            swap,
            processor: Processor::new(config.tlb_size),
        })
    }

    fn core_map(&self) -> MutexGuard<'_, CoreMap> {
        self.core_map.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn processor(&self) -> &Processor<PAGE_SIZE> {
        &self.processor
    }

    pub fn memory(&self) -> &PhysicalMemory<PAGE_SIZE> {
        &self.memory
    }

    pub fn num_frames(&self) -> usize {
        self.memory.num_frames()
    }

    pub fn free_frame_count(&self) -> usize {
        self.core_map().allocator.free_count()
    }

    pub fn swap_slots_in_use(&self) -> usize {
        self.swap.slots_in_use()
    }

    pub fn clock_hand(&self) -> usize {
        self.core_map().clock.hand()
    }

    pub fn frame_owner(&self, ppn: FrameNumber) -> Option<FrameOwner> {
        self.core_map().ipt.get(ppn).map(|frame| FrameOwner {
            pid: frame.pid,
            vpn: frame.vpn,
            pin_count: frame.pin_count,
        })
    }

    /// Assigned frames in frame order.
    pub fn resident_frames(&self) -> Vec<(FrameNumber, FrameOwner)> {
        let core = self.core_map();
        (0..core.ipt.len() as FrameNumber)
            .filter_map(|ppn| {
                core.ipt.get(ppn).map(|frame| {
                    (
                        ppn,
                        FrameOwner {
                            pid: frame.pid,
                            vpn: frame.vpn,
                            pin_count: frame.pin_count,
                        },
                    )
                })
            })
            .collect()
    }

    /// Checks that every frame is either free or owned by exactly one
    /// resident page, and that the owner's page table agrees.
    pub fn check_invariants(&self) -> Result<(), VmError> {
        let core = self.core_map();
        let mut on_free_list = vec![false; core.allocator.num_frames()];
        for ppn in core.allocator.free_frames() {
            let seen = on_free_list
                .get_mut(ppn as usize)
                .ok_or_else(|| VmError::invariant(format!("free list holds bogus frame {}", ppn)))?;
            if *seen {
                return Err(VmError::invariant(format!("frame {} is free twice", ppn)));
            }
            *seen = true;
        }
        for (ppn, free) in on_free_list.into_iter().enumerate() {
            let ppn = ppn as FrameNumber;
            match (free, core.ipt.get(ppn)) {
                (true, Some(frame)) => {
                    return Err(VmError::invariant(format!(
                        "frame {} is free but owned by pid {}",
                        ppn, frame.pid
                    )))
                }
                (false, None) => {
                    return Err(VmError::invariant(format!("frame {} is lost", ppn)))
                }
                (false, Some(frame)) => {
                    let entry = frame.owner()?.entry(frame.vpn)?;
                    if entry.frame() != Some(ppn) {
                        return Err(VmError::invariant(format!(
                            "frame {} owned by page {} of pid {}, which maps {:?}",
                            ppn, frame.vpn, frame.pid, entry.mapping
                        )));
                    }
                }
                (true, None) => {}
            }
        }
        Ok(())
    }

    /// Makes `vpn` translatable: resolves the fault if the page is not
    /// resident, then installs the translation in the TLB. The allocation
    /// lock is held from the lookup to the TLB write.
    pub fn handle_tlb_miss(
        &self,
        owner: &Arc<PageTable>,
        image: &dyn ExecutableImage,
        vpn: PageNumber,
    ) -> Result<FrameNumber, VmError> {
        let core = self.resolve(self.core_map(), owner, image, vpn)?;
        let entry = owner.lookup(vpn)?;
        let ppn = entry
            .frame()
            .ok_or_else(|| VmError::invariant(format!("page {} not resident after fault", vpn)))?;
        self.install(&core, entry.vpn, owner)?;
        Ok(ppn)
    }

    /// Keeps `vpn` resident until `unpin`, loading it first if needed.
    pub fn pin(
        &self,
        owner: &Arc<PageTable>,
        image: &dyn ExecutableImage,
        vpn: PageNumber,
        write: bool,
    ) -> Result<FrameNumber, VmError> {
        if write && owner.lookup(vpn)?.read_only {
            return Err(VmError::ReadOnly { vpn });
        }
        let mut core = self.resolve(self.core_map(), owner, image, vpn)?;
        let ppn = owner
            .lookup(vpn)?
            .frame()
            .ok_or_else(|| VmError::invariant(format!("page {} not resident after fault", vpn)))?;
        let pins = core.ipt.pin(ppn)?;
        owner.merge_hardware_bits(vpn, true, write)?;
        trace!("pid {}: pinned page {} in frame {} ({})", owner.pid(), vpn, ppn, pins);
        Ok(ppn)
    }

    pub fn unpin(&self, owner: &Arc<PageTable>, vpn: PageNumber) -> Result<(), VmError> {
        let mut core = self.core_map();
        let ppn = owner
            .lookup(vpn)?
            .frame()
            .ok_or_else(|| VmError::invariant(format!("unpinning non-resident page {}", vpn)))?;
        match core.ipt.get(ppn) {
            Some(frame) if frame.pid == owner.pid() && frame.vpn == vpn => {}
            _ => {
                return Err(VmError::invariant(format!(
                    "frame {} does not belong to page {} of pid {}",
                    ppn,
                    vpn,
                    owner.pid()
                )))
            }
        }
        if core.ipt.unpin(ppn)? == 0 {
            self.unpinned.notify_all();
        }
        trace!("pid {}: unpinned page {}", owner.pid(), vpn);
        Ok(())
    }

    /// Gives back every frame and swap slot of a process that is exiting.
    pub fn release_process(&self, owner: &Arc<PageTable>) -> Result<(), VmError> {
        let mut core = self.core_map();
        let owned = core.ipt.frames_of(owner.pid());
        if let Some(frame) = owned
            .iter()
            .filter_map(|ppn| core.ipt.get(*ppn))
            .find(|frame| frame.pin_count > 0)
        {
            return Err(VmError::invariant(format!(
                "pid {} exiting with page {} pinned",
                frame.pid, frame.vpn
            )));
        }
        {
            let mut tlb = self.processor.disable_interrupts();
            for ppn in owned {
                if let Some(frame) = core.ipt.get(ppn) {
                    tlb.invalidate(frame.vpn, ppn);
                }
            }
        }
        let mut frames = 0;
        let mut slots = 0;
        for entry in owner.iter() {
            match entry.mapping {
                Mapping::Frame(ppn) if entry.valid => {
                    owner.unmap(entry.vpn)?;
                    self.free_frame(&mut core, ppn)?;
                    frames += 1;
                }
                Mapping::Swap(spn) => {
                    owner.unmap(entry.vpn)?;
                    self.swap.free(spn)?;
                    slots += 1;
                }
                _ => {}
            }
        }
        self.unpinned.notify_all();
        info!(
            "pid {}: released {} frames and {} swap slots",
            owner.pid(),
            frames,
            slots
        );
        Ok(())
    }

    /// Closes and deletes the swap file.
    pub fn shutdown(self) -> Result<(), VmError> {
        info!("Memory manager shutting down");
        self.swap.destroy()?;
        Ok(())
    }

    /// Brings `vpn` into memory. Returns with the allocation lock still held.
    fn resolve<'a>(
        &'a self,
        mut core: MutexGuard<'a, CoreMap>,
        owner: &Arc<PageTable>,
        image: &dyn ExecutableImage,
        vpn: PageNumber,
    ) -> Result<MutexGuard<'a, CoreMap>, VmError> {
        loop {
            // Looked up again after every wait, someone else may have loaded it.
            let state = owner.lookup(vpn)?.state();
            if let PageState::Valid(_) = state {
                return Ok(core);
            }
            match self.try_acquire_frame(&mut core)? {
                Some(ppn) => {
                    debug!(
                        "pid {}: page fault on page {} ({:?}), using frame {}",
                        owner.pid(),
                        vpn,
                        state,
                        ppn
                    );
                    self.fill_frame(&mut core, ppn, owner, image, vpn, state)?;
                    return Ok(core);
                }
                None => {
                    debug!("Every frame is pinned, waiting for an unpin");
                    core = self
                        .unpinned
                        .wait(core)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    /// A free frame, or the frame of a page just evicted. `None` when every
    /// frame is pinned.
    fn try_acquire_frame(&self, core: &mut CoreMap) -> Result<Option<FrameNumber>, VmError> {
        if let Some(ppn) = core.allocator.allocate() {
            return Ok(Some(ppn));
        }
        self.sync_tlb_bits(core)?;
        match core.clock.select_victim(&mut core.ipt)? {
            Sweep::Victim(victim) => {
                self.evict(core, victim)?;
                core.allocator
                    .allocate()
                    .map(Some)
                    .ok_or_else(|| VmError::invariant("evicted frame did not reach the free list"))
            }
            Sweep::AllPinned => Ok(None),
        }
    }

    fn fill_frame(
        &self,
        core: &mut CoreMap,
        ppn: FrameNumber,
        owner: &Arc<PageTable>,
        image: &dyn ExecutableImage,
        vpn: PageNumber,
        state: PageState,
    ) -> Result<(), VmError> {
        let mutator: Arc<dyn PageTableMutator> = owner.clone();
        core.ipt.assign(ppn, &mutator, vpn)?;
        if let Err(err) = self.load_content(ppn, image, vpn, state) {
            warn!("pid {}: loading page {} failed: {}", owner.pid(), vpn, err);
            core.ipt.unpin(ppn)?;
            core.ipt.release(ppn)?;
            core.allocator.free(ppn)?;
            return Err(err);
        }
        if let PageState::Swapped(spn) = state {
            self.swap.free(spn)?;
        }
        owner.map_to_frame(vpn, ppn)?;
        core.ipt.unpin(ppn)?;
        Ok(())
    }

    fn load_content(
        &self,
        ppn: FrameNumber,
        image: &dyn ExecutableImage,
        vpn: PageNumber,
        state: PageState,
    ) -> Result<(), VmError> {
        let mut page = [0u8; PAGE_SIZE];
        match state {
            PageState::Swapped(spn) => {
                trace!("Swapping in page {} from slot {}", vpn, spn);
                self.swap.read(spn, &mut page)?;
                self.memory.write_frame(ppn as usize, &page)?;
            }
            _ => match image.section_page(vpn) {
                Some(section_page) => {
                    trace!("Loading page {} from {:?}", vpn, section_page);
                    image.load_page(section_page, &mut page)?;
                    self.memory.write_frame(ppn as usize, &page)?;
                }
                None => self.memory.zero_frame(ppn as usize)?,
            },
        }
        Ok(())
    }

    /// Moves the used and dirty bits the TLB collected into the page tables,
    /// so the clock sees current reference information.
    fn sync_tlb_bits(&self, core: &CoreMap) -> Result<(), VmError> {
        let mut tlb = self.processor.disable_interrupts();
        for i in 0..tlb.size() {
            let mut entry = tlb.read_entry(i);
            let ppn = match (entry.valid, entry.mapping) {
                (true, Mapping::Frame(ppn)) => ppn,
                _ => continue,
            };
            if let Some(frame) = core.ipt.get(ppn).filter(|frame| frame.vpn == entry.vpn) {
                frame
                    .owner()?
                    .merge_hardware_bits(entry.vpn, entry.used, entry.dirty)?;
                entry.used = false;
                entry.dirty = false;
                tlb.write_entry(i, entry);
            }
        }
        Ok(())
    }

    /// Writes the victim out if needed, then takes the frame away from its
    /// owner: reserve slot, write, update the page table, drop stale TLB
    /// entries. Interrupts stay disabled throughout so no access slips in
    /// between the copy and the invalidation.
    fn evict(&self, core: &mut CoreMap, ppn: FrameNumber) -> Result<(), VmError> {
        let (pid, vpn, owner) = match core.ipt.get(ppn) {
            Some(frame) if frame.pin_count == 0 => (frame.pid, frame.vpn, frame.owner()?),
            Some(frame) => {
                return Err(VmError::invariant(format!(
                    "clock picked frame {} pinned {} times",
                    ppn, frame.pin_count
                )))
            }
            None => return Err(VmError::invariant(format!("clock picked free frame {}", ppn))),
        };

        let mut tlb = self.processor.disable_interrupts();
        if let Some(i) = tlb.find(vpn) {
            let cached = tlb.read_entry(i);
            if cached.mapping == Mapping::Frame(ppn) {
                owner.merge_hardware_bits(vpn, cached.used, cached.dirty)?;
            }
        }

        let slot = if owner.entry(vpn)?.needs_writeback() {
            let spn = self.swap.allocate()?;
            if let Err(err) = self.write_to_swap(ppn, spn) {
                self.swap.free(spn)?;
                return Err(err);
            }
            Some(spn)
        } else {
            None
        };

        owner.evict(vpn, slot)?;
        tlb.invalidate(vpn, ppn);
        drop(tlb);

        self.free_frame(core, ppn)?;
        match slot {
            Some(spn) => debug!(
                "Evicted page {} of pid {} from frame {} to swap slot {}",
                vpn, pid, ppn, spn
            ),
            None => debug!("Dropped clean page {} of pid {} from frame {}", vpn, pid, ppn),
        }
        Ok(())
    }

    fn write_to_swap(&self, ppn: FrameNumber, spn: u32) -> Result<(), VmError> {
        let mut page = [0u8; PAGE_SIZE];
        self.memory.read_frame(ppn as usize, &mut page)?;
        self.swap.write(spn, &page)?;
        Ok(())
    }

    /// Returns `ppn` to the free list. The owning translation must already be
    /// invalid and the frame unpinned.
    fn free_frame(&self, core: &mut CoreMap, ppn: FrameNumber) -> Result<(), VmError> {
        if let Some(frame) = core.ipt.get(ppn) {
            if frame.pin_count > 0 {
                return Err(VmError::invariant(format!(
                    "freeing frame {} while pinned {} times",
                    ppn, frame.pin_count
                )));
            }
            if frame.owner()?.entry(frame.vpn)?.frame() == Some(ppn) {
                return Err(VmError::invariant(format!(
                    "freeing frame {} still mapped by page {} of pid {}",
                    ppn, frame.vpn, frame.pid
                )));
            }
            core.ipt.release(ppn)?;
        }
        core.allocator.free(ppn)
    }

    /// Writes the translation of `vpn` into the TLB, first folding the bits of
    /// the entry it replaces back into that entry's page table.
    fn install(&self, core: &CoreMap, vpn: PageNumber, owner: &Arc<PageTable>) -> Result<(), VmError> {
        let mut tlb = self.processor.disable_interrupts();
        let entry = owner.lookup(vpn)?;
        let i = tlb.slot_for(vpn);
        let old = tlb.read_entry(i);
        if let (true, Mapping::Frame(old_ppn)) = (old.valid, old.mapping) {
            if let Some(frame) = core.ipt.get(old_ppn).filter(|frame| frame.vpn == old.vpn) {
                frame
                    .owner()?
                    .merge_hardware_bits(old.vpn, old.used, old.dirty)?;
            }
        }
        tlb.write_entry(i, entry);
        trace!("TLB[{}] <- page {} of pid {}: {:?}", i, vpn, owner.pid(), entry.mapping);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::section::{Executable, Section};

    const PAGE_SIZE: usize = 64;

    fn manager(name: &str, frames: usize) -> MemoryManager<PAGE_SIZE> {
        let config = VmConfig::default()
            .with_phys_pages(frames)
            .with_tlb_size(2)
            .with_swap(name, 16);
        MemoryManager::new(&config).unwrap()
    }

    fn anonymous() -> Executable {
        Executable::new(PAGE_SIZE)
    }

    #[test]
    fn rejects_empty_machine() {
        let config = VmConfig::default()
            .with_phys_pages(0)
            .with_swap("mm_rejects_empty_machine", 1);
        assert!(MemoryManager::<PAGE_SIZE>::new(&config).is_err());
    }

    #[test]
    fn fault_allocates_and_installs() {
        let mm = manager("mm_fault_allocates_and_installs", 2);
        let table = Arc::new(PageTable::init(1, 4));
        let ppn = mm.handle_tlb_miss(&table, &anonymous(), 3).unwrap();
        assert_eq!(ppn, 0);
        assert_eq!(
            mm.frame_owner(0),
            Some(FrameOwner {
                pid: 1,
                vpn: 3,
                pin_count: 0
            })
        );
        assert_eq!(mm.processor().disable_interrupts().find(3), Some(0));
        assert_eq!(mm.free_frame_count(), 1);
        mm.check_invariants().unwrap();
        mm.shutdown().unwrap();
    }

    #[test]
    fn second_fault_on_resident_page_reuses_frame() {
        let mm = manager("mm_second_fault_reuses_frame", 2);
        let table = Arc::new(PageTable::init(1, 4));
        let first = mm.handle_tlb_miss(&table, &anonymous(), 1).unwrap();
        let second = mm.handle_tlb_miss(&table, &anonymous(), 1).unwrap();
        assert_eq!(first, second);
        assert_eq!(mm.free_frame_count(), 1);
        assert_eq!(mm.processor().disable_interrupts().valid_entries().count(), 1);
        mm.shutdown().unwrap();
    }

    #[test]
    fn out_of_bounds_fault() {
        let mm = manager("mm_out_of_bounds_fault", 2);
        let table = Arc::new(PageTable::init(1, 4));
        assert_eq!(
            mm.handle_tlb_miss(&table, &anonymous(), 4),
            Err(VmError::OutOfBounds {
                vpn: 4,
                num_pages: 4
            })
        );
        assert_eq!(mm.free_frame_count(), 2);
        mm.shutdown().unwrap();
    }

    #[test]
    fn clean_pages_are_dropped_dirty_pages_swapped() {
        let mm = manager("mm_clean_dropped_dirty_swapped", 1);
        let table = Arc::new(PageTable::init(1, 4));
        let image = anonymous();

        mm.handle_tlb_miss(&table, &image, 0).unwrap();
        mm.handle_tlb_miss(&table, &image, 1).unwrap();
        assert_eq!(table.lookup(0).unwrap().mapping, Mapping::Unassigned);
        assert_eq!(mm.swap_slots_in_use(), 0);

        table.merge_hardware_bits(1, true, true).unwrap();
        mm.handle_tlb_miss(&table, &image, 2).unwrap();
        assert_eq!(table.lookup(1).unwrap().state(), PageState::Swapped(0));
        assert_eq!(mm.swap_slots_in_use(), 1);
        // The stale translation for page 1 is gone.
        assert_eq!(mm.processor().disable_interrupts().find(1), None);
        mm.check_invariants().unwrap();
        mm.shutdown().unwrap();
    }

    #[test]
    fn cross_process_eviction() {
        let mm = manager("mm_cross_process_eviction", 1);
        let a = Arc::new(PageTable::init(1, 2));
        let b = Arc::new(PageTable::init(2, 2));
        let image = anonymous();

        mm.handle_tlb_miss(&a, &image, 0).unwrap();
        a.merge_hardware_bits(0, true, true).unwrap();
        mm.handle_tlb_miss(&b, &image, 1).unwrap();

        assert_eq!(a.lookup(0).unwrap().state(), PageState::Swapped(0));
        assert_eq!(b.lookup(1).unwrap().state(), PageState::Valid(0));
        assert_eq!(
            mm.resident_frames(),
            vec![(
                0,
                FrameOwner {
                    pid: 2,
                    vpn: 1,
                    pin_count: 0
                }
            )]
        );
        mm.check_invariants().unwrap();
        mm.shutdown().unwrap();
    }

    #[test]
    fn section_pages_are_loaded() {
        let mm = manager("mm_section_pages_are_loaded", 1);
        let table = Arc::new(PageTable::init(1, 2));
        table.set_read_only(0, true).unwrap();
        let image = Executable::new(PAGE_SIZE)
            .with_section(Section::read_only(".text", 0, vec![0x42; PAGE_SIZE]));
        let ppn = mm.handle_tlb_miss(&table, &image, 0).unwrap();
        let mut frame = [0; PAGE_SIZE];
        mm.memory().read_frame(ppn as usize, &mut frame).unwrap();
        assert_eq!(frame, [0x42; PAGE_SIZE]);
        mm.shutdown().unwrap();
    }

    #[test]
    fn pin_protects_from_eviction() {
        let mm = manager("mm_pin_protects_from_eviction", 2);
        let table = Arc::new(PageTable::init(1, 4));
        let image = anonymous();
        let pinned = mm.pin(&table, &image, 0, false).unwrap();
        mm.handle_tlb_miss(&table, &image, 1).unwrap();
        mm.handle_tlb_miss(&table, &image, 2).unwrap();
        mm.handle_tlb_miss(&table, &image, 3).unwrap();
        assert_eq!(table.lookup(0).unwrap().frame(), Some(pinned));
        assert_eq!(mm.frame_owner(pinned).unwrap().pin_count, 1);
        mm.unpin(&table, 0).unwrap();
        assert_eq!(mm.frame_owner(pinned).unwrap().pin_count, 0);
        assert!(mm.unpin(&table, 0).is_err());
        mm.shutdown().unwrap();
    }

    #[test]
    fn pin_for_write_refuses_read_only_page() {
        let mm = manager("mm_pin_for_write_read_only", 2);
        let table = Arc::new(PageTable::init(1, 1));
        table.set_read_only(0, true).unwrap();
        assert_eq!(
            mm.pin(&table, &anonymous(), 0, true),
            Err(VmError::ReadOnly { vpn: 0 })
        );
        mm.shutdown().unwrap();
    }

    #[test]
    fn swap_exhaustion_leaves_victim_resident() {
        let config = VmConfig::default()
            .with_phys_pages(1)
            .with_tlb_size(1)
            .with_swap("mm_swap_exhaustion", 1);
        let mm = MemoryManager::<PAGE_SIZE>::new(&config).unwrap();
        let table = Arc::new(PageTable::init(1, 3));
        let image = anonymous();

        mm.handle_tlb_miss(&table, &image, 0).unwrap();
        table.merge_hardware_bits(0, true, true).unwrap();
        mm.handle_tlb_miss(&table, &image, 1).unwrap();
        table.merge_hardware_bits(1, true, true).unwrap();

        assert_eq!(mm.handle_tlb_miss(&table, &image, 2), Err(VmError::SwapExhausted));
        assert_eq!(table.lookup(1).unwrap().state(), PageState::Valid(0));
        mm.check_invariants().unwrap();
        mm.shutdown().unwrap();
    }

    #[test]
    fn release_returns_frames_and_slots() {
        let mm = manager("mm_release_returns_frames", 1);
        let table = Arc::new(PageTable::init(1, 2));
        let image = anonymous();
        mm.handle_tlb_miss(&table, &image, 0).unwrap();
        table.merge_hardware_bits(0, true, true).unwrap();
        mm.handle_tlb_miss(&table, &image, 1).unwrap();
        assert_eq!(mm.swap_slots_in_use(), 1);

        mm.release_process(&table).unwrap();
        assert_eq!(mm.free_frame_count(), 1);
        assert_eq!(mm.swap_slots_in_use(), 0);
        assert_eq!(mm.processor().disable_interrupts().valid_entries().count(), 0);
        assert!(table.resident_pages().is_empty());
        mm.check_invariants().unwrap();
        mm.shutdown().unwrap();
    }

    #[test]
    fn release_refuses_pinned_frame() {
        let mm = manager("mm_release_refuses_pinned", 1);
        let table = Arc::new(PageTable::init(1, 1));
        mm.pin(&table, &anonymous(), 0, false).unwrap();
        assert!(matches!(
            mm.release_process(&table),
            Err(VmError::InvariantViolation(_))
        ));
        mm.shutdown().unwrap();
    }
}
