pub const DEFAULT_PAGE_SIZE: usize = 1024;

/// Machine parameters. The page size is fixed at compile time through the
/// `PAGE_SIZE` parameter of [`crate::MemoryManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    pub num_phys_pages: usize,
    pub tlb_size: usize,
    /// Name of the swap image, see [`disk::make_name`].
    pub swap_name: String,
    pub swap_slots: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            num_phys_pages: 32,
            tlb_size: 4,
            swap_name: String::from("swap"),
            swap_slots: 1024,
        }
    }
}

impl VmConfig {
    pub fn with_phys_pages(mut self, num_phys_pages: usize) -> Self {
        self.num_phys_pages = num_phys_pages;
        self
    }

    pub fn with_tlb_size(mut self, tlb_size: usize) -> Self {
        self.tlb_size = tlb_size;
        self
    }

    pub fn with_swap(mut self, name: &str, slots: usize) -> Self {
        self.swap_name = String::from(name);
        self.swap_slots = slots;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::VmConfig;

    #[test]
    fn builder_overrides_defaults() {
        let config = VmConfig::default()
            .with_phys_pages(2)
            .with_tlb_size(8)
            .with_swap("cfg", 16);
        assert_eq!(config.num_phys_pages, 2);
        assert_eq!(config.tlb_size, 8);
        assert_eq!(config.swap_name, "cfg");
        assert_eq!(config.swap_slots, 16);
        assert_eq!(VmConfig::default().tlb_size, 4);
    }
}
