use std::io::Write;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::console::Console;
use crate::remote::{AddressBookClient, AddressBookEntry, DavError, SessionMode};
use crate::vcard_io;

/// Rebuild the `FN` of every card on the server from its structured name and
/// write each card back in place, conditioned on the listed ETag.
pub fn run<C, F, W>(config: &Config, connect: F, console: &mut Console<W>) -> Result<()>
where
    C: AddressBookClient,
    F: FnOnce(&str, SessionMode) -> Result<C, DavError>,
    W: Write,
{
    let url = config.server.url.as_str();

    console.info(format!("Editing at {url} ..."))?;
    console.info("Listing the addressbook...")?;

    let client = connect(url, SessionMode::ReadWrite)
        .with_context(|| format!("failed to connect to {url}"))?;
    let entries = client
        .list_entries()
        .context("failed to list the address book")?;
    console.info(format!("Found {} cards.", entries.len()))?;

    let fixed = fix_cards(&client, &entries, console);
    console.end_progress()?;
    fixed?;

    console.info("All updated")?;
    Ok(())
}

fn fix_cards<C: AddressBookClient, W: Write>(
    client: &C,
    entries: &[AddressBookEntry],
    console: &mut Console<W>,
) -> Result<()> {
    let total = entries.len();
    for (index, entry) in entries.iter().enumerate() {
        console.progress("Processing", index + 1, total)?;

        let raw = client
            .fetch_card(&entry.href)
            .with_context(|| format!("failed to fetch {}", entry.href))?;
        let fixed = rebuild_formatted_name(&raw)
            .with_context(|| format!("failed to parse {}", entry.href))?;
        client
            .update_card(&entry.href, &fixed, &entry.etag)
            .with_context(|| format!("failed to update {}", entry.href))?;
    }
    Ok(())
}

/// Replace whatever `FN` the card has with one built from its `N`.
///
/// A card without `N` gets an empty `FN`.
pub fn rebuild_formatted_name(raw: &str) -> Result<String, vcard_io::CardError> {
    let stripped = vcard_io::strip_formatted_name(raw);
    let mut card = vcard_io::parse_one(&stripped)?;
    let name = card.structured_name().unwrap_or_default().formatted();
    card.set_formatted_name(&name);
    Ok(card.to_string())
}
