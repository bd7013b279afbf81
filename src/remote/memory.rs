//! In-memory address book used by the action tests.

use std::cell::{Cell, RefCell};

use reqwest::StatusCode;

use crate::remote::{AddressBookClient, AddressBookEntry, DavError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub href: String,
    pub data: String,
    pub etag: String,
}

#[derive(Default)]
pub struct MemoryAddressBook {
    /// `(href, etag, content)` in listing order.
    cards: Vec<(String, String, String)>,
    pub created: RefCell<Vec<(String, String)>>,
    pub updates: RefCell<Vec<Update>>,
    pub fetches: Cell<usize>,
    /// Fail the n-th (1-based) fetch.
    pub fail_fetch_at: Option<usize>,
    /// Fail the n-th (1-based) create or update.
    pub fail_write_at: Option<usize>,
}

impl MemoryAddressBook {
    pub fn with_cards(cards: &[(&str, &str, &str)]) -> Self {
        Self {
            cards: cards
                .iter()
                .map(|(href, etag, data)| (href.to_string(), etag.to_string(), data.to_string()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn failing_fetch(mut self, n: usize) -> Self {
        self.fail_fetch_at = Some(n);
        self
    }

    pub fn failing_write(mut self, n: usize) -> Self {
        self.fail_write_at = Some(n);
        self
    }
}

impl AddressBookClient for MemoryAddressBook {
    fn list_entries(&self) -> Result<Vec<AddressBookEntry>, DavError> {
        Ok(self
            .cards
            .iter()
            .map(|(href, etag, _)| AddressBookEntry {
                href: href.clone(),
                etag: etag.clone(),
            })
            .collect())
    }

    fn fetch_card(&self, href: &str) -> Result<String, DavError> {
        self.fetches.set(self.fetches.get() + 1);
        if self.fail_fetch_at == Some(self.fetches.get()) {
            return Err(DavError::BadStatusCode {
                url: href.to_string(),
                status: StatusCode::INTERNAL_SERVER_ERROR,
            });
        }
        self.cards
            .iter()
            .find(|(h, _, _)| h == href)
            .map(|(_, _, data)| data.clone())
            .ok_or_else(|| DavError::BadStatusCode {
                url: href.to_string(),
                status: StatusCode::NOT_FOUND,
            })
    }

    fn create_card(&self, uid: &str, data: &str) -> Result<String, DavError> {
        let mut created = self.created.borrow_mut();
        if self.fail_write_at == Some(created.len() + 1) {
            return Err(DavError::BadStatusCode {
                url: format!("/abook/{uid}.vcf"),
                status: StatusCode::FORBIDDEN,
            });
        }
        created.push((uid.to_string(), data.to_string()));
        Ok(format!("/abook/{uid}.vcf"))
    }

    fn update_card(&self, href: &str, data: &str, etag: &str) -> Result<(), DavError> {
        let mut updates = self.updates.borrow_mut();
        if self.fail_write_at == Some(updates.len() + 1) {
            return Err(DavError::PreconditionFailed(href.to_string()));
        }
        updates.push(Update {
            href: href.to_string(),
            data: data.to_string(),
            etag: etag.to_string(),
        });
        Ok(())
    }
}
