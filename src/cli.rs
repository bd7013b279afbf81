//! Command-line flags and action selection.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, ValueEnum};
use thiserror::Error;

use crate::actions::Action;
use crate::config::{AuthScheme, Defaults, Options};

#[derive(Clone, Debug, ValueEnum)]
enum Verbosity {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Parser, Debug)]
#[command(
    name = "carddav-util",
    version,
    about = "Download, upload and repair vCards on a CardDAV address book",
    args_override_self = true
)]
pub struct Cli {
    /// CardDAV address book, e.g. https://dav.example.com/abook/
    #[arg(long, value_name = "URL")]
    pub url: Option<String>,

    /// Local vCard file
    #[arg(long, value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Username
    #[arg(long)]
    pub user: Option<String>,

    /// Password; if absent, read from CARDDAV_UTIL_PASSWORD or prompted for
    #[arg(long)]
    pub passwd: Option<String>,

    /// Copy server -> file
    #[arg(long)]
    pub download: bool,

    /// Copy file -> server, as new cards
    #[arg(long)]
    pub upload: bool,

    /// Regenerate the FN property of every card on the server
    #[arg(long)]
    pub fixfn: bool,

    /// Use digest authentication
    #[arg(long)]
    pub digest: bool,

    /// Skip TLS certificate verification
    #[arg(long)]
    pub no_cert_verify: bool,

    /// Read defaults from this file instead of the per-user configuration
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Change logging verbosity
    #[arg(short, long)]
    verbose: Option<Verbosity>,
}

/// What the process should do after parsing its arguments.
#[derive(Debug)]
pub enum Invocation {
    /// Print the text and exit successfully.
    Help(String),
    Run(Cli),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("{0}")]
    Malformed(String),
    #[error("You can only choose one action at a time")]
    ConflictingActions,
    #[error("You must choose an action: --download, --upload or --fixfn")]
    NoAction,
    #[error("You must specify both the filename and the url")]
    MissingTarget,
}

impl UsageError {
    pub fn exit_code(&self) -> u8 {
        match self {
            UsageError::Malformed(_) => 1,
            UsageError::ConflictingActions | UsageError::NoAction => 2,
            UsageError::MissingTarget => 3,
        }
    }
}

/// Parse the full argument list, program name included.
pub fn parse_args<I, T>(args: I) -> Result<Invocation, UsageError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    if !starts_with_option(&args) {
        return Ok(Invocation::Help(Cli::command().render_help().to_string()));
    }

    match Cli::try_parse_from(args) {
        Ok(cli) => Ok(Invocation::Run(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                Ok(Invocation::Help(err.to_string()))
            }
            _ => Err(UsageError::Malformed(summary(&err.to_string()))),
        },
    }
}

/// Whether any option precedes the first plain argument. Options after a plain
/// argument are not looked at, so `carddav-util stray --download` shows help.
fn starts_with_option(args: &[OsString]) -> bool {
    args.get(1).is_some_and(|arg| {
        let arg = arg.to_string_lossy();
        arg.len() > 1 && arg.starts_with('-')
    })
}

/// First line of a clap error, without its `error: ` prefix.
fn summary(rendered: &str) -> String {
    let line = rendered.lines().next().unwrap_or_default().trim();
    line.strip_prefix("error: ").unwrap_or(line).to_string()
}

impl Cli {
    /// Returns the desired log level. The default log level is WARN.
    pub fn log_level(&self) -> log::Level {
        match self.verbose {
            Some(Verbosity::Error) => log::Level::Error,
            Some(Verbosity::Warn) | None => log::Level::Warn,
            Some(Verbosity::Info) => log::Level::Info,
            Some(Verbosity::Debug) => log::Level::Debug,
            Some(Verbosity::Trace) => log::Level::Trace,
        }
    }

    /// The selected action, if exactly one was given.
    pub fn action(&self) -> Result<Option<Action>, UsageError> {
        let selected: Vec<Action> = [
            (self.download, Action::Download),
            (self.upload, Action::Upload),
            (self.fixfn, Action::FixFormattedName),
        ]
        .into_iter()
        .filter_map(|(given, action)| given.then_some(action))
        .collect();

        match selected.as_slice() {
            [] => Ok(None),
            [action] => Ok(Some(*action)),
            _ => Err(UsageError::ConflictingActions),
        }
    }

    /// `--file` has no configured default, so its absence is known before any
    /// configuration is read.
    pub fn require_file(&self) -> Result<(), UsageError> {
        match self.file {
            Some(_) => Ok(()),
            None => Err(UsageError::MissingTarget),
        }
    }

    /// Merge the flags over `defaults` and check that a run is fully specified.
    pub fn into_options(
        self,
        action: Option<Action>,
        defaults: Defaults,
    ) -> Result<Options, UsageError> {
        let url = self.url.or(defaults.url);
        let (Some(url), Some(file)) = (url, self.file) else {
            return Err(UsageError::MissingTarget);
        };
        let action = action.ok_or(UsageError::NoAction)?;

        let auth = if self.digest {
            AuthScheme::Digest
        } else {
            defaults.auth.unwrap_or_default()
        };
        let verify_certificates = !self.no_cert_verify && defaults.verify_certificates.unwrap_or(true);

        Ok(Options {
            url,
            file,
            user: self.user.or(defaults.user),
            passwd: self.passwd,
            auth,
            verify_certificates,
            action,
        })
    }
}
