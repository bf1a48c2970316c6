//! Demand paging for a simulated machine with a software managed TLB.
//!
//! A [`MemoryManager`] owns the physical frames, the inverted page table, the
//! clock hand and the swap file. Each [`VmProcess`] owns a [`PageTable`] and
//! asks the manager for frames when the processor reports a TLB miss.

pub mod clock;
pub mod config;
pub mod error;
pub mod frame_allocator;
pub mod inverted_page_table;
pub mod memory_manager;
pub mod page_table;
pub mod process;
pub mod section;
pub mod tlb;
pub mod translation;

pub use config::{VmConfig, DEFAULT_PAGE_SIZE};
pub use error::VmError;
pub use memory_manager::{FrameOwner, MemoryManager};
pub use page_table::{PageTable, PageTableMutator};
pub use process::VmProcess;
pub use section::{Executable, ExecutableImage, Section, SectionPage};
pub use tlb::{InterruptGuard, Processor, Tlb};
pub use translation::{FrameNumber, Mapping, PageNumber, PageState, ProcessId, TranslationEntry};
