use crate::translation::TranslationEntry;

/// Iterates over a snapshot of a page table.
pub struct PageTableIterator {
    current: usize,
    entries: Vec<TranslationEntry>,
}

impl PageTableIterator {
    pub fn new(entries: Vec<TranslationEntry>) -> Self {
        Self {
            current: 0,
            entries,
        }
    }
}

impl Iterator for PageTableIterator {
    type Item = TranslationEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = *self.entries.get(self.current)?;
        self.current += 1;
        Some(entry)
    }
}
