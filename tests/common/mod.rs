#![allow(dead_code)]

use std::sync::Arc;

use demand_pager::{Executable, MemoryManager, Section, VmConfig, VmProcess};

pub const PAGE_SIZE: usize = 64;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn machine(swap: &str, frames: usize, tlb_size: usize, slots: usize) -> Arc<MemoryManager<PAGE_SIZE>> {
    init_logging();
    let config = VmConfig::default()
        .with_phys_pages(frames)
        .with_tlb_size(tlb_size)
        .with_swap(swap, slots);
    Arc::new(MemoryManager::new(&config).unwrap())
}

pub fn anonymous(
    pid: u32,
    manager: &Arc<MemoryManager<PAGE_SIZE>>,
    num_pages: usize,
) -> VmProcess<PAGE_SIZE> {
    let image = Executable::new(PAGE_SIZE);
    VmProcess::load_sections(pid, manager.clone(), Arc::new(image), num_pages).unwrap()
}

/// Page 0 holds a read-only text section filled with `fill`.
pub fn with_text(
    pid: u32,
    manager: &Arc<MemoryManager<PAGE_SIZE>>,
    num_pages: usize,
    fill: u8,
) -> VmProcess<PAGE_SIZE> {
    let image = Executable::new(PAGE_SIZE)
        .with_section(Section::read_only(".text", 0, vec![fill; PAGE_SIZE]));
    VmProcess::load_sections(pid, manager.clone(), Arc::new(image), num_pages).unwrap()
}

pub fn page_address(vpn: u32, offset: usize) -> u64 {
    vpn as u64 * PAGE_SIZE as u64 + offset as u64
}

/// Removes the swap file once every process is gone.
pub fn finish(manager: Arc<MemoryManager<PAGE_SIZE>>) {
    manager.check_invariants().unwrap();
    if let Ok(manager) = Arc::try_unwrap(manager) {
        manager.shutdown().unwrap();
    }
}
