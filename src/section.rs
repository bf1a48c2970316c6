use crate::{error::VmError, translation::PageNumber};

/// A page of a read-only program section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionPage {
    pub section: usize,
    /// Page index inside the section.
    pub offset: usize,
}

/// Section metadata of the executable a process was loaded from.
pub trait ExecutableImage: Send + Sync {
    /// `Some` when the initial content of `vpn` comes from a read-only
    /// section. Any other page starts zero-filled.
    fn section_page(&self, vpn: PageNumber) -> Option<SectionPage>;

    /// Copies the section page into `frame`, which is exactly one page long.
    fn load_page(&self, page: SectionPage, frame: &mut [u8]) -> Result<(), VmError>;
}

#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub first_vpn: PageNumber,
    pub read_only: bool,
    pub data: Vec<u8>,
}

impl Section {
    pub fn read_only(name: &str, first_vpn: PageNumber, data: Vec<u8>) -> Self {
        Section {
            name: String::from(name),
            first_vpn,
            read_only: true,
            data,
        }
    }

    pub fn writable(name: &str, first_vpn: PageNumber, data: Vec<u8>) -> Self {
        Section {
            name: String::from(name),
            first_vpn,
            read_only: false,
            data,
        }
    }

    /// Number of pages the section spans for a given page size.
    pub fn length(&self, page_size: usize) -> usize {
        self.data.len().div_ceil(page_size).max(1)
    }
}

/// An in-memory executable: a list of sections laid out in the address space.
#[derive(Debug, Clone)]
pub struct Executable {
    page_size: usize,
    sections: Vec<Section>,
}

impl Executable {
    pub fn new(page_size: usize) -> Self {
        Executable {
            page_size,
            sections: Vec::new(),
        }
    }

    pub fn with_section(mut self, section: Section) -> Self {
        self.sections.push(section);
        self
    }

    /// Pages covered by sections, plus `stack_pages` above them.
    pub fn num_pages(&self, stack_pages: usize) -> usize {
        let image_pages = self
            .sections
            .iter()
            .map(|section| section.first_vpn as usize + section.length(self.page_size))
            .max()
            .unwrap_or(0);
        image_pages + stack_pages
    }
}

impl ExecutableImage for Executable {
    fn section_page(&self, vpn: PageNumber) -> Option<SectionPage> {
        self.sections
            .iter()
            .enumerate()
            .filter(|(_, section)| section.read_only && section.first_vpn <= vpn)
            .find_map(|(id, section)| {
                let offset = (vpn - section.first_vpn) as usize;
                (offset < section.length(self.page_size)).then_some(SectionPage {
                    section: id,
                    offset,
                })
            })
    }

    fn load_page(&self, page: SectionPage, frame: &mut [u8]) -> Result<(), VmError> {
        let section = self.sections.get(page.section).ok_or_else(|| {
            VmError::invariant(format!("no section {} in executable", page.section))
        })?;
        let start = (page.offset * frame.len()).min(section.data.len());
        let end = (start + frame.len()).min(section.data.len());
        let len = end - start;
        frame[..len].copy_from_slice(&section.data[start..end]);
        frame[len..].fill(0);
        Ok(())
    }
}
