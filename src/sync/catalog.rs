use crate::error::Result;

use super::SyncEngine;
use super::transport::StoreListItem;

pub type StoreCatalogEntry = StoreListItem;

#[derive(Debug, Clone)]
pub struct StoreCatalogPage {
    pub stores: Vec<StoreCatalogEntry>,
    pub total: i64,
}

impl<'a> SyncEngine<'a> {
    /// Read-only listing of remote stores. Does not alter local state.
    pub fn list_stores(&self, prefix: Option<&str>) -> Result<StoreCatalogPage> {
        let resp = self.transport.list_stores(prefix)?;
        Ok(StoreCatalogPage { stores: resp.stores, total: resp.total })
    }

    pub fn get_store_info(&self) -> Result<StoreCatalogEntry> {
        self.transport.get_store_info(&self.store_id)
    }
}
