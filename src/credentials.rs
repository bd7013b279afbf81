//! Resolving the password for the configured user.

use core::fmt;
use std::io;

/// Environment variable consulted when `--passwd` is not given.
pub const PASSWORD_ENV: &str = "CARDDAV_UTIL_PASSWORD";

/// Wrapper around a [`String`] that is not printed when debugging.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<REDACTED>")
    }
}

impl<S> From<S> for Password
where
    String: From<S>,
{
    fn from(value: S) -> Self {
        Password(String::from(value))
    }
}

impl Password {
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Password,
}

/// Resolve credentials for `user`.
///
/// Without a user the session is anonymous. Otherwise the password comes from
/// `passwd`, then `env_password`, and finally from `prompt`.
pub fn resolve<P>(
    user: Option<String>,
    passwd: Option<String>,
    env_password: Option<String>,
    prompt: P,
) -> io::Result<Option<Credentials>>
where
    P: FnOnce(&str) -> io::Result<String>,
{
    let Some(username) = user else {
        return Ok(None);
    };

    let password = match passwd.or(env_password) {
        Some(password) => password,
        None => prompt(&format!("{username}'s password (won't be echoed): "))?,
    };

    Ok(Some(Credentials {
        username,
        password: password.into(),
    }))
}

/// Read a password from the controlling terminal without echoing it.
pub fn prompt_password(prompt: &str) -> io::Result<String> {
    rpassword::prompt_password(prompt)
}
