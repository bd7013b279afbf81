//! The three things a run can do.
//!
//! Each executor takes the resolved [`Config`], a function that opens a session
//! against the server, and the console to report progress on. The session is
//! opened by the executor so that the upload can validate its input first.

pub mod download;
pub mod fix_fn;
pub mod upload;

use std::io::Write;

use anyhow::Result;

use crate::config::Config;
use crate::console::Console;
use crate::remote::{CardDavClient, SessionMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Copy every card on the server into the local file.
    Download,
    /// Create every card of the local file on the server.
    Upload,
    /// Rebuild the `FN` of every card on the server from its `N`.
    FixFormattedName,
}

/// Run the configured action against the CardDAV server.
pub fn run<W: Write>(config: &Config, console: &mut Console<W>) -> Result<()> {
    let connect = |url: &str, mode: SessionMode| CardDavClient::connect(url, &config.server, mode);

    match config.action {
        Action::Download => download::run(config, connect, console),
        Action::Upload => upload::run(config, connect, console),
        Action::FixFormattedName => fix_fn::run(config, connect, console),
    }
}
