use std::sync::Arc;

use log::{debug, info, trace, warn};

use crate::{
    error::VmError,
    memory_manager::MemoryManager,
    page_table::{PageTable, PageTableMutator},
    section::ExecutableImage,
    tlb::Processor,
    translation::{FrameNumber, PageNumber, ProcessId},
};

/// A user process as the virtual memory system sees it: its page table, the
/// executable it was loaded from, and the machine it runs on.
pub struct VmProcess<const PAGE_SIZE: usize> {
    pid: ProcessId,
    page_table: Arc<PageTable>,
    image: Arc<dyn ExecutableImage>,
    manager: Arc<MemoryManager<PAGE_SIZE>>,
}

impl<const PAGE_SIZE: usize> VmProcess<PAGE_SIZE> {
    /// Sets up the address space without touching physical memory. Every page
    /// starts invalid; pages of read-only sections are marked read-only.
    pub fn load_sections(
        pid: ProcessId,
        manager: Arc<MemoryManager<PAGE_SIZE>>,
        image: Arc<dyn ExecutableImage>,
        num_pages: usize,
    ) -> Result<Self, VmError> {
        let page_table = Arc::new(PageTable::init(pid, num_pages));
        let mut read_only = 0;
        for vpn in 0..num_pages as PageNumber {
            if image.section_page(vpn).is_some() {
                page_table.set_read_only(vpn, true)?;
                read_only += 1;
            }
        }
        info!(
            "pid {}: loaded {} pages ({} read-only), nothing resident yet",
            pid, num_pages, read_only
        );
        Ok(VmProcess {
            pid,
            page_table,
            image,
            manager,
        })
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn page_table(&self) -> &Arc<PageTable> {
        &self.page_table
    }

    pub fn num_pages(&self) -> usize {
        self.page_table.num_pages()
    }

    pub fn manager(&self) -> &Arc<MemoryManager<PAGE_SIZE>> {
        &self.manager
    }

    /// Refill handler for a miss at `vaddr`. On return the address is
    /// translatable through the TLB.
    pub fn handle_tlb_miss(&self, vaddr: u64) -> Result<(), VmError> {
        let resolved = self.page_of(vaddr).and_then(|vpn| {
            self.manager
                .handle_tlb_miss(&self.page_table, self.image.as_ref(), vpn)
        });
        match resolved {
            Ok(ppn) => {
                trace!("pid {}: {:#x} now maps to frame {}", self.pid, vaddr, ppn);
                Ok(())
            }
            Err(err) => {
                if err.is_process_fault() {
                    warn!("pid {}: {} at {:#x}, terminating", self.pid, err, vaddr);
                }
                Err(err)
            }
        }
    }

    /// Context switch out: folds the TLB's used and dirty bits into this
    /// process' page table and empties the TLB.
    pub fn save_state(&self) -> Result<(), VmError> {
        let mut tlb = self.manager.processor().disable_interrupts();
        let mut saved = 0;
        for i in 0..tlb.size() {
            let mut entry = tlb.read_entry(i);
            if !entry.valid {
                continue;
            }
            if let Ok(current) = self.page_table.lookup(entry.vpn) {
                if current.valid && current.mapping == entry.mapping {
                    self.page_table
                        .merge_hardware_bits(entry.vpn, entry.used, entry.dirty)?;
                    saved += 1;
                }
            }
            entry.valid = false;
            tlb.write_entry(i, entry);
        }
        debug!("pid {}: saved {} TLB entries", self.pid, saved);
        Ok(())
    }

    /// Context switch in. The TLB refills lazily on the next misses.
    pub fn restore_state(&self) {
        trace!("pid {}: restored, TLB starts cold", self.pid);
    }

    pub fn pin_virtual_page(&self, vpn: PageNumber, write: bool) -> Result<FrameNumber, VmError> {
        self.manager
            .pin(&self.page_table, self.image.as_ref(), vpn, write)
    }

    pub fn unpin_virtual_page(&self, vpn: PageNumber) -> Result<(), VmError> {
        self.manager.unpin(&self.page_table, vpn)
    }

    /// Copies from user memory into `data`, one pinned page at a time.
    pub fn read_virtual_memory(&self, vaddr: u64, data: &mut [u8]) -> Result<(), VmError> {
        let mut done = 0;
        while done < data.len() {
            let (vpn, offset, amount) = self.chunk(vaddr, done, data.len())?;
            let ppn = self.pin_virtual_page(vpn, false)?;
            let paddr = Processor::<PAGE_SIZE>::make_address(ppn, offset);
            let copied = self
                .manager
                .memory()
                .read_bytes(paddr, &mut data[done..done + amount]);
            self.unpin_virtual_page(vpn)?;
            copied?;
            done += amount;
        }
        Ok(())
    }

    /// Copies `data` into user memory. Every page written is marked dirty.
    pub fn write_virtual_memory(&self, vaddr: u64, data: &[u8]) -> Result<(), VmError> {
        let mut done = 0;
        while done < data.len() {
            let (vpn, offset, amount) = self.chunk(vaddr, done, data.len())?;
            let ppn = self.pin_virtual_page(vpn, true)?;
            let paddr = Processor::<PAGE_SIZE>::make_address(ppn, offset);
            let copied = self
                .manager
                .memory()
                .write_bytes(paddr, &data[done..done + amount]);
            self.unpin_virtual_page(vpn)?;
            copied?;
            done += amount;
        }
        Ok(())
    }

    /// The page holding `vaddr`. Addresses past the last representable page
    /// are out of bounds like any other unmapped page.
    fn page_of(&self, vaddr: u64) -> Result<PageNumber, VmError> {
        Processor::<PAGE_SIZE>::page_from_address(vaddr).ok_or_else(|| VmError::OutOfBounds {
            vpn: vaddr / PAGE_SIZE as u64,
            num_pages: self.num_pages(),
        })
    }

    /// Page, offset and length of the next piece of a `len` byte copy at
    /// `start` once `done` bytes are through.
    fn chunk(&self, start: u64, done: usize, len: usize) -> Result<(PageNumber, u64, usize), VmError> {
        let vaddr = start.checked_add(done as u64).unwrap_or(u64::MAX);
        let offset = Processor::<PAGE_SIZE>::offset_from_address(vaddr);
        let amount = (PAGE_SIZE - offset as usize).min(len - done);
        Ok((self.page_of(vaddr)?, offset, amount))
    }

    /// A load through the processor: TLB lookup, refill on a miss, retry.
    pub fn read_u8(&self, vaddr: u64) -> Result<u8, VmError> {
        let memory = self.manager.memory();
        loop {
            let byte = self
                .manager
                .processor()
                .access(vaddr, false, |paddr| Ok(memory.read_u8(paddr)?))?;
            if let Some(byte) = byte {
                return Ok(byte);
            }
            self.handle_tlb_miss(vaddr)?;
        }
    }

    pub fn write_u8(&self, vaddr: u64, byte: u8) -> Result<(), VmError> {
        let memory = self.manager.memory();
        loop {
            let written = self
                .manager
                .processor()
                .access(vaddr, true, |paddr| Ok(memory.write_u8(paddr, byte)?))?;
            if written.is_some() {
                return Ok(());
            }
            self.handle_tlb_miss(vaddr)?;
        }
    }

    /// Process exit: gives back every frame and swap slot.
    pub fn unload_sections(&self) -> Result<(), VmError> {
        self.manager.release_process(&self.page_table)
    }
}
