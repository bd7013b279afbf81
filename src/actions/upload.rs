use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use log::debug;
use uuid::Uuid;

use crate::config::Config;
use crate::console::Console;
use crate::remote::{AddressBookClient, DavError, SessionMode};
use crate::vcard_io::{self, VCard};

/// Create every card of the configured file on the server as a new card.
///
/// The whole file is read and validated before connecting. Each card loses its
/// `PRODID` and gets a fresh `UID`, so nothing on the server is overwritten.
pub fn run<C, F, W>(config: &Config, connect: F, console: &mut Console<W>) -> Result<()>
where
    C: AddressBookClient,
    F: FnOnce(&str, SessionMode) -> Result<C, DavError>,
    W: Write,
{
    let url = collection_url(&config.server.url);
    let path = &config.file;

    console.info(format!("Uploading from {} to {url} ...", path.display()))?;
    console.info(format!("Processing cards in {} ...", path.display()))?;
    let cards = read_cards(path)?;
    console.info(format!("Successfully read and validated {} entries", cards.len()))?;

    console.info(format!("Connecting to {url} ..."))?;
    let client = connect(&url, SessionMode::ReadWrite)
        .with_context(|| format!("failed to connect to {url}"))?;

    let uploaded = upload_cards(&client, cards, console);
    console.end_progress()?;
    uploaded?;

    console.info("All done")?;
    Ok(())
}

/// The address book URL with a trailing `/`, so card names resolve inside it.
fn collection_url(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

fn read_cards(path: &Path) -> Result<Vec<VCard>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    vcard_io::parse_components(&raw)
        .with_context(|| format!("invalid vCard data in {}", path.display()))
}

fn upload_cards<C: AddressBookClient, W: Write>(
    client: &C,
    cards: Vec<VCard>,
    console: &mut Console<W>,
) -> Result<()> {
    let total = cards.len();
    for (index, mut card) in cards.into_iter().enumerate() {
        console.progress("Uploading", index + 1, total)?;

        if let Some(product_id) = card.product_id() {
            debug!("dropping PRODID {product_id}");
        }
        card.remove_product_id();
        let uid = Uuid::new_v4().to_string();
        if let Some(previous) = card.uid() {
            debug!("replacing UID {previous} with {uid}");
        }
        card.set_uid(&uid);

        let href = client
            .create_card(&uid, &card.to_string())
            .with_context(|| format!("failed to upload card {} of {total}", index + 1))?;
        debug!("created {href}");
    }
    Ok(())
}
