use std::collections::BTreeMap;

use thiserror::Error;

use layout_spec::Page;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("page {0} could not be saved: {1}")]
    Save(u64, String),
}

/// Page persistence owned by the hosting CMS.
pub trait PageStore {
    fn load(&self, id: u64) -> Option<Page>;

    /// Published pages of the form content type, in id order.
    fn published_form_pages(&self) -> Vec<Page>;

    fn save(&mut self, page: &Page) -> Result<(), StoreError>;
}

/// Pages held in memory, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct MemoryPageStore {
    pages: BTreeMap<u64, Page>,
}

impl MemoryPageStore {
    pub fn new(pages: impl IntoIterator<Item = Page>) -> Self {
        Self {
            pages: pages.into_iter().map(|page| (page.id, page)).collect(),
        }
    }

    pub fn get(&self, id: u64) -> Option<&Page> {
        self.pages.get(&id)
    }

    pub fn into_pages(self) -> Vec<Page> {
        self.pages.into_values().collect()
    }
}

impl PageStore for MemoryPageStore {
    fn load(&self, id: u64) -> Option<Page> {
        self.pages.get(&id).cloned()
    }

    fn published_form_pages(&self) -> Vec<Page> {
        self.pages
            .values()
            .filter(|page| page.published && page.is_form())
            .cloned()
            .collect()
    }

    fn save(&mut self, page: &Page) -> Result<(), StoreError> {
        self.pages.insert(page.id, page.clone());
        Ok(())
    }
}
