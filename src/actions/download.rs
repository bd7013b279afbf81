use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::console::Console;
use crate::remote::{AddressBookClient, AddressBookEntry, DavError, SessionMode};

/// Copy every card of the address book, verbatim and in listing order, into
/// the configured file.
///
/// A failed fetch stops the run; whatever was written so far stays on disk.
pub fn run<C, F, W>(config: &Config, connect: F, console: &mut Console<W>) -> Result<()>
where
    C: AddressBookClient,
    F: FnOnce(&str, SessionMode) -> Result<C, DavError>,
    W: Write,
{
    let url = config.server.url.as_str();
    let path = &config.file;

    console.info(format!("Downloading from {url} to {} ...", path.display()))?;
    console.info("Downloading the addressbook...")?;

    let client = connect(url, SessionMode::ReadOnly)
        .with_context(|| format!("failed to connect to {url}"))?;
    let entries = client
        .list_entries()
        .context("failed to list the address book")?;
    console.info(format!("Found {} cards.", entries.len()))?;

    let saved = save_cards(&client, &entries, path, console);
    console.end_progress()?;
    saved?;

    console.info(format!("All saved to: {}", path.display()))?;
    Ok(())
}

fn save_cards<C: AddressBookClient, W: Write>(
    client: &C,
    entries: &[AddressBookEntry],
    path: &Path,
    console: &mut Console<W>,
) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);

    let total = entries.len();
    for (index, entry) in entries.iter().enumerate() {
        console.progress("Fetching", index + 1, total)?;
        let card = client
            .fetch_card(&entry.href)
            .with_context(|| format!("failed to fetch {}", entry.href))?;
        writeln!(out, "{card}").with_context(|| format!("failed to write to {}", path.display()))?;
    }

    out.flush()
        .with_context(|| format!("failed to write to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::actions::testing::{config, output, URL};
    use crate::actions::Action;
    use crate::remote::memory::MemoryAddressBook;

    const ALICE: &str = "BEGIN:VCARD\r\nVERSION:3.0\r\nFN:Alice\r\nEND:VCARD\r\n";
    const BOB: &str = "BEGIN:VCARD\r\nVERSION:4.0\r\nFN:Bob\r\nEND:VCARD";

    fn book() -> MemoryAddressBook {
        MemoryAddressBook::with_cards(&[
            ("/abook/alice.vcf", "\"1\"", ALICE),
            ("/abook/bob.vcf", "\"2\"", BOB),
        ])
    }

    #[test]
    fn test_downloads_every_card_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.vcf");
        let config = config(Action::Download, &path);
        let book = book();
        let mut console = Console::new(Vec::new());

        run(
            &config,
            |url: &str, mode| {
                assert_eq!(url, URL);
                assert_eq!(mode, SessionMode::ReadOnly);
                Ok(&book)
            },
            &mut console,
        )
        .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), format!("{ALICE}\n{BOB}\n"));
        assert_eq!(book.fetches.get(), 2);
        assert!(book.created.borrow().is_empty());
        assert!(book.updates.borrow().is_empty());

        let out = output(console);
        assert!(out.starts_with(&format!(
            "[i] Downloading from {URL} to {} ...\n[i] Downloading the addressbook...\n[i] Found 2 cards.\n",
            path.display()
        )));
        assert!(out.contains("\r[i] Fetching 1 of 2\r[i] Fetching 2 of 2\n"));
        assert!(out.ends_with(&format!("[i] All saved to: {}\n", path.display())));
    }

    #[test]
    fn test_download_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.vcf");
        let second = dir.path().join("second.vcf");
        let book = book();

        for path in [&first, &second] {
            let config = config(Action::Download, path);
            run(&config, |_: &str, _| Ok(&book), &mut Console::new(Vec::new())).unwrap();
        }

        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
    }

    #[test]
    fn test_existing_file_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.vcf");
        fs::write(&path, "stale content that is much longer than the new one\n".repeat(20)).unwrap();

        let book = MemoryAddressBook::with_cards(&[("/abook/bob.vcf", "\"2\"", BOB)]);
        let config = config(Action::Download, &path);
        run(&config, |_: &str, _| Ok(&book), &mut Console::new(Vec::new())).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), format!("{BOB}\n"));
    }

    #[test]
    fn test_empty_address_book() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.vcf");
        let book = MemoryAddressBook::default();
        let config = config(Action::Download, &path);
        let mut console = Console::new(Vec::new());

        run(&config, |_: &str, _| Ok(&book), &mut console).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "");
        assert!(output(console).contains("[i] Found 0 cards.\n"));
    }

    #[test]
    fn test_fetch_failure_keeps_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.vcf");
        let book = book().failing_fetch(2);
        let config = config(Action::Download, &path);
        let mut console = Console::new(Vec::new());

        let err = run(&config, |_: &str, _| Ok(&book), &mut console).unwrap_err();

        assert!(format!("{err:#}").contains("failed to fetch /abook/bob.vcf"));
        assert_eq!(fs::read_to_string(&path).unwrap(), format!("{ALICE}\n"));

        let out = output(console);
        assert!(out.ends_with("\r[i] Fetching 2 of 2\n"));
        assert!(!out.contains("All saved"));
    }

    #[test]
    fn test_connect_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.vcf");
        let config = config(Action::Download, &path);

        let err = run(
            &config,
            |url: &str, _| -> Result<MemoryAddressBook, DavError> {
                Err(DavError::InvalidUrl {
                    url: url.to_string(),
                    reason: "nope".to_string(),
                })
            },
            &mut Console::new(Vec::new()),
        )
        .unwrap_err();

        assert!(err.to_string().contains("failed to connect"));
        assert!(!path.exists());
    }

    #[test]
    fn test_unwritable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("out.vcf");
        let book = book();
        let config = config(Action::Download, &path);

        let err = run(&config, |_: &str, _| Ok(&book), &mut Console::new(Vec::new())).unwrap_err();

        assert!(err.to_string().contains("failed to create"));
        assert_eq!(book.fetches.get(), 0);
    }
}
