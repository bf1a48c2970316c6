pub use swap_manager::SwapPageNumber;

pub type PageNumber = u32;
pub type FrameNumber = u32;
pub type ProcessId = u32;

/// Where the content of a virtual page currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mapping {
    /// Never loaded, or dropped while clean: comes from its section or is zero-filled.
    Unassigned,
    Frame(FrameNumber),
    Swap(SwapPageNumber),
}

/// What the refill handler has to do for a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Valid(FrameNumber),
    NeverLoaded,
    Swapped(SwapPageNumber),
}

/// A virtual to physical translation. The page table owns the entries, the
/// TLB holds copies of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationEntry {
    pub vpn: PageNumber,
    pub mapping: Mapping,
    pub valid: bool,
    pub read_only: bool,
    pub dirty: bool,
    pub used: bool,
    /// Memory holds the only copy of the page (it came back from swap), so it
    /// is written out on eviction even when `dirty` is clear.
    pub swap_backed: bool,
}

impl TranslationEntry {
    pub fn new(vpn: PageNumber) -> Self {
        TranslationEntry {
            vpn,
            mapping: Mapping::Unassigned,
            valid: false,
            read_only: false,
            dirty: false,
            used: false,
            swap_backed: false,
        }
    }

    pub fn state(&self) -> PageState {
        match (self.valid, self.mapping) {
            (true, Mapping::Frame(ppn)) => PageState::Valid(ppn),
            (_, Mapping::Swap(spn)) => PageState::Swapped(spn),
            _ => PageState::NeverLoaded,
        }
    }

    pub fn frame(&self) -> Option<FrameNumber> {
        match self.state() {
            PageState::Valid(ppn) => Some(ppn),
            _ => None,
        }
    }

    pub fn needs_writeback(&self) -> bool {
        self.dirty || self.swap_backed
    }
}
