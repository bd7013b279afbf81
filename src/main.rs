mod actions;
mod cli;
mod config;
mod console;
mod credentials;
mod remote;
mod vcard_io;

use std::env;
use std::io::Write;
use std::process::ExitCode;

use anyhow::{Context, Result};
use log::debug;

use cli::{Cli, Invocation, UsageError};
use config::Config;
use console::Console;

/// Exit status for anything that goes wrong after the flags were accepted.
const FAILURE: u8 = 4;

enum Failure {
    Usage(UsageError),
    Run(anyhow::Error),
}

impl From<UsageError> for Failure {
    fn from(err: UsageError) -> Self {
        Failure::Usage(err)
    }
}

impl From<anyhow::Error> for Failure {
    fn from(err: anyhow::Error) -> Self {
        Failure::Run(err)
    }
}

fn main() -> ExitCode {
    let mut console = Console::stdout();

    let outcome = match cli::parse_args(env::args_os()) {
        Ok(Invocation::Help(text)) => {
            print!("{text}");
            return ExitCode::SUCCESS;
        }
        Ok(Invocation::Run(cli)) => run(cli, &mut console),
        Err(err) => Err(err.into()),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => report(&mut console, &failure),
    }
}

fn run<W: Write>(cli: Cli, console: &mut Console<W>) -> Result<(), Failure> {
    if let Err(err) = simple_logger::init_with_level(cli.log_level()) {
        eprintln!("warning: failed to initialise logging: {err}");
    }

    let action = cli.action()?;
    cli.require_file()?;
    let defaults = config::load_defaults(cli.config.as_deref())?;
    let options = cli.into_options(action, defaults)?;
    debug!("running {:?} against {}", options.action, options.url);

    let credentials = credentials::resolve(
        options.user.clone(),
        options.passwd.clone(),
        env::var(credentials::PASSWORD_ENV).ok(),
        credentials::prompt_password,
    )
    .context("failed to read the password")?;

    let config = Config::new(options, credentials);
    actions::run(&config, console)?;
    Ok(())
}

fn report<W: Write>(console: &mut Console<W>, failure: &Failure) -> ExitCode {
    let (message, code) = match failure {
        Failure::Usage(err) => (err.to_string(), err.exit_code()),
        Failure::Run(err) => (single_line(&format!("{err:#}")), FAILURE),
    };
    // Nothing left to report to if stdout is gone; the exit status still tells.
    let _ = console.error(message);
    ExitCode::from(code)
}

/// Join a multi-line message (e.g. a TOML parse error with its caret diagram)
/// into one line.
fn single_line(message: &str) -> String {
    message
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
