//! Remote address book access.
//!
//! This module provides:
//! - `AddressBookClient` trait, the operations the actions need from a server
//! - `CardDavClient`, the blocking CardDAV implementation
//! - Digest authentication support in `auth`

pub mod auth;
pub mod carddav;
#[cfg(test)]
pub mod memory;

pub use carddav::{CardDavClient, DavError};

/// A card listed in the address book, without its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressBookEntry {
    /// The href (path) on the remote server
    pub href: String,
    /// The ETag observed when listing, used for conditional updates
    pub etag: String,
}

/// Whether a session may modify the address book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    ReadOnly,
    ReadWrite,
}

/// Operations on a single remote address book.
pub trait AddressBookClient {
    /// List every card in the address book, in server order.
    fn list_entries(&self) -> Result<Vec<AddressBookEntry>, DavError>;

    /// Fetch the raw vCard text stored at `href`.
    fn fetch_card(&self, href: &str) -> Result<String, DavError>;

    /// Create a new card named after `uid`. Fails if it already exists.
    /// Returns the href of the created card.
    fn create_card(&self, uid: &str, data: &str) -> Result<String, DavError>;

    /// Replace the card at `href`, provided it still has the given `etag`.
    fn update_card(&self, href: &str, data: &str, etag: &str) -> Result<(), DavError>;
}

impl<T: AddressBookClient + ?Sized> AddressBookClient for &T {
    fn list_entries(&self) -> Result<Vec<AddressBookEntry>, DavError> {
        (**self).list_entries()
    }

    fn fetch_card(&self, href: &str) -> Result<String, DavError> {
        (**self).fetch_card(href)
    }

    fn create_card(&self, uid: &str, data: &str) -> Result<String, DavError> {
        (**self).create_card(uid, data)
    }

    fn update_card(&self, href: &str, data: &str, etag: &str) -> Result<(), DavError> {
        (**self).update_card(href, data, etag)
    }
}
