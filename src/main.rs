use std::sync::Arc;

use demand_pager::{
    Executable, MemoryManager, Section, VmConfig, VmError, VmProcess, DEFAULT_PAGE_SIZE,
};
use log::{error, info};

const NUM_PAGES: usize = 4;

fn address(vpn: u64, offset: u64) -> u64 {
    vpn * DEFAULT_PAGE_SIZE as u64 + offset
}

fn print_state(process: &VmProcess<DEFAULT_PAGE_SIZE>) {
    for entry in process.page_table().iter() {
        println!(
            "  page {}: {:?}{}{}",
            entry.vpn,
            entry.state(),
            if entry.read_only { " ro" } else { "" },
            if entry.dirty { " dirty" } else { "" }
        );
    }
    let tlb = process.manager().processor().disable_interrupts();
    let cached: Vec<_> = tlb.valid_entries().map(|entry| entry.vpn).collect();
    println!("  TLB holds pages {:?}", cached);
}

fn run(manager: Arc<MemoryManager<DEFAULT_PAGE_SIZE>>) -> Result<(), VmError> {
    let text = b"\x55\x48\x89\xe5 demo text".to_vec();
    let image = Executable::new(DEFAULT_PAGE_SIZE).with_section(Section::read_only(".text", 0, text));
    let process = VmProcess::load_sections(1, manager.clone(), Arc::new(image), NUM_PAGES)?;

    println!("---- Touch page 0 (text) ----");
    println!("  byte 0 = {:#x}", process.read_u8(address(0, 0))?);
    println!("---- Touch page 1 (zero fill), write 0x2a ----");
    process.write_u8(address(1, 8), 0x2a)?;
    print_state(&process);

    println!("---- Touch pages 2 and 3 (eviction) ----");
    process.read_u8(address(2, 0))?;
    process.read_u8(address(3, 0))?;
    print_state(&process);
    println!("  swap slots in use: {}", manager.swap_slots_in_use());

    println!("---- Touch page 1 again ----");
    println!("  byte 8 = {:#x}", process.read_u8(address(1, 8))?);
    print_state(&process);

    match process.read_u8(address(NUM_PAGES as u64, 0)) {
        Err(err) if err.is_process_fault() => println!("---- Out of range access: {} ----", err),
        other => println!("---- Out of range access returned {:?} ----", other),
    }

    manager.check_invariants()?;
    process.unload_sections()?;
    info!("Process 1 exited");
    Ok(())
}

fn main() {
    env_logger::init();

    let config = VmConfig::default()
        .with_phys_pages(2)
        .with_tlb_size(2)
        .with_swap("demo_swap", 16);
    let manager = match MemoryManager::<DEFAULT_PAGE_SIZE>::new(&config) {
        Ok(manager) => Arc::new(manager),
        Err(err) => {
            error!("Cannot boot the machine: {}", err);
            std::process::exit(1);
        }
    };
    println!("---- Machine booted ----");

    if let Err(err) = run(manager.clone()) {
        error!("Demo failed: {}", err);
    }

    if let Ok(manager) = Arc::try_unwrap(manager) {
        if let Err(err) = manager.shutdown() {
            error!("Cannot remove the swap file: {}", err);
        }
    }
    println!("---- Machine halted ----");
}
