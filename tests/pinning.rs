mod common;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use common::{anonymous, finish, machine, page_address, PAGE_SIZE};
use demand_pager::{FrameOwner, PageState};
use rand::{thread_rng, Rng};
use serial_test::serial;

#[test]
#[serial]
fn pinned_frames_survive_concurrent_eviction() {
    const THREADS: u32 = 4;
    const PAGES: usize = 4;
    let manager = machine("pinning_concurrent_eviction", 3, 2, 32);

    let workers: Vec<_> = (1..=THREADS)
        .map(|pid| {
            let process = anonymous(pid, &manager, PAGES);
            thread::spawn(move || {
                let mut rng = thread_rng();
                let mut model = [[0u8; PAGE_SIZE]; PAGES];
                for round in 0..150 {
                    let vpn = rng.gen_range(0..PAGES as u32);
                    let write = rng.gen_bool(0.5);
                    let ppn = process.pin_virtual_page(vpn, write).unwrap();
                    let memory = process.manager().memory();
                    let frame_address = ppn as u64 * PAGE_SIZE as u64;

                    if write {
                        let fill = [(pid as u8) << 4 | (round % 16) as u8; PAGE_SIZE];
                        memory.write_bytes(frame_address, &fill).unwrap();
                        model[vpn as usize] = fill;
                    }
                    thread::yield_now();

                    // While pinned, the frame is neither stolen nor rewritten.
                    let owner = process.manager().frame_owner(ppn).unwrap();
                    assert_eq!((owner.pid, owner.vpn), (pid, vpn));
                    assert!(owner.pin_count >= 1);
                    let mut frame = [0; PAGE_SIZE];
                    memory.read_bytes(frame_address, &mut frame).unwrap();
                    assert_eq!(frame, model[vpn as usize]);

                    process.unpin_virtual_page(vpn).unwrap();
                }

                for vpn in 0..PAGES as u32 {
                    let mut page = [0; PAGE_SIZE];
                    process
                        .read_virtual_memory(page_address(vpn, 0), &mut page)
                        .unwrap();
                    assert_eq!(page, model[vpn as usize]);
                }
                process.unload_sections().unwrap();
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(manager.free_frame_count(), 3);
    assert_eq!(manager.swap_slots_in_use(), 0);
    finish(manager);
}

#[test]
#[serial]
fn fault_waits_while_every_frame_is_pinned() {
    let manager = machine("pinning_all_pinned_wait", 1, 1, 4);
    let holder = anonymous(1, &manager, 1);
    let waiter = anonymous(2, &manager, 1);

    let ppn = holder.pin_virtual_page(0, true).unwrap();
    let done = Arc::new(AtomicBool::new(false));
    let blocked = {
        let done = done.clone();
        thread::spawn(move || {
            let frame = waiter.pin_virtual_page(0, false).unwrap();
            done.store(true, Ordering::SeqCst);
            waiter.unpin_virtual_page(0).unwrap();
            waiter.unload_sections().unwrap();
            frame
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!done.load(Ordering::SeqCst));
    assert_eq!(
        manager.frame_owner(ppn),
        Some(FrameOwner {
            pid: 1,
            vpn: 0,
            pin_count: 1
        })
    );

    holder.unpin_virtual_page(0).unwrap();
    assert_eq!(blocked.join().unwrap(), ppn);
    assert!(done.load(Ordering::SeqCst));
    assert!(matches!(
        holder.page_table().lookup(0).unwrap().state(),
        PageState::Swapped(_)
    ));

    holder.unload_sections().unwrap();
    drop(holder);
    finish(manager);
}

#[test]
#[serial]
fn pin_counts_nest() {
    let manager = machine("pinning_counts_nest", 2, 1, 4);
    let process = anonymous(1, &manager, 2);

    let first = process.pin_virtual_page(1, false).unwrap();
    let second = process.pin_virtual_page(1, true).unwrap();
    assert_eq!(first, second);
    assert_eq!(manager.frame_owner(first).unwrap().pin_count, 2);
    assert!(process.page_table().lookup(1).unwrap().dirty);

    process.unpin_virtual_page(1).unwrap();
    process.unpin_virtual_page(1).unwrap();
    assert_eq!(manager.frame_owner(first).unwrap().pin_count, 0);
    assert!(process.unpin_virtual_page(1).is_err());
    assert!(process.unpin_virtual_page(0).is_err());

    process.unload_sections().unwrap();
    drop(process);
    finish(manager);
}
