//! HTTP digest authentication (RFC 7616).
//!
//! Basic authentication is handled directly by the HTTP client; this module
//! only deals with answering `WWW-Authenticate: Digest` challenges.

use md5::Md5;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Problems with a digest challenge sent by the server.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("digest challenge is missing `{0}`")]
    MissingParameter(&'static str),
    #[error("unsupported digest algorithm `{0}`")]
    UnsupportedAlgorithm(String),
    #[error("unsupported digest qop `{0}`")]
    UnsupportedQop(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Algorithm {
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl Algorithm {
    fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "MD5" => Some(Algorithm::Md5),
            "MD5-SESS" => Some(Algorithm::Md5Sess),
            "SHA-256" => Some(Algorithm::Sha256),
            "SHA-256-SESS" => Some(Algorithm::Sha256Sess),
            _ => None,
        }
    }

    fn token(&self) -> &'static str {
        match self {
            Algorithm::Md5 => "MD5",
            Algorithm::Md5Sess => "MD5-sess",
            Algorithm::Sha256 => "SHA-256",
            Algorithm::Sha256Sess => "SHA-256-sess",
        }
    }

    fn is_session(&self) -> bool {
        matches!(self, Algorithm::Md5Sess | Algorithm::Sha256Sess)
    }

    fn hash(&self, data: &str) -> String {
        match self {
            Algorithm::Md5 | Algorithm::Md5Sess => hex::encode(&Md5::digest(data.as_bytes())),
            Algorithm::Sha256 | Algorithm::Sha256Sess => {
                hex::encode(&Sha256::digest(data.as_bytes()))
            }
        }
    }
}

/// A parsed `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    nonce: String,
    opaque: Option<String>,
    algorithm: Algorithm,
    /// `true` when the server offered `qop=auth`.
    qop_auth: bool,
}

impl DigestChallenge {
    /// Parse a `WWW-Authenticate` header value.
    ///
    /// Returns `Ok(None)` if the header holds a challenge for another scheme.
    pub fn parse(header: &str) -> Result<Option<Self>, AuthError> {
        let header = header.trim();
        let Some((scheme, rest)) = header.split_once(char::is_whitespace) else {
            return Ok(None);
        };
        if !scheme.eq_ignore_ascii_case("digest") {
            return Ok(None);
        }

        let params = parse_params(rest);
        let lookup = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };

        let realm = lookup("realm").ok_or(AuthError::MissingParameter("realm"))?;
        let nonce = lookup("nonce").ok_or(AuthError::MissingParameter("nonce"))?;
        let algorithm = match lookup("algorithm") {
            Some(token) => {
                Algorithm::from_token(&token).ok_or(AuthError::UnsupportedAlgorithm(token))?
            }
            None => Algorithm::Md5,
        };
        let qop_auth = match lookup("qop") {
            Some(qop) => {
                if !qop.split(',').any(|q| q.trim().eq_ignore_ascii_case("auth")) {
                    return Err(AuthError::UnsupportedQop(qop));
                }
                true
            }
            None => false,
        };

        Ok(Some(Self {
            realm,
            nonce,
            opaque: lookup("opaque"),
            algorithm,
            qop_auth,
        }))
    }

    /// Build the `Authorization` header value for one request.
    pub fn respond(
        &self,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        nonce_count: u32,
        cnonce: &str,
    ) -> String {
        let alg = self.algorithm;
        let mut ha1 = alg.hash(&format!("{username}:{}:{password}", self.realm));
        if alg.is_session() {
            ha1 = alg.hash(&format!("{ha1}:{}:{cnonce}", self.nonce));
        }
        let ha2 = alg.hash(&format!("{method}:{uri}"));
        let nc = format!("{nonce_count:08x}");

        let response = if self.qop_auth {
            alg.hash(&format!("{ha1}:{}:{nc}:{cnonce}:auth:{ha2}", self.nonce))
        } else {
            alg.hash(&format!("{ha1}:{}:{ha2}", self.nonce))
        };

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", algorithm={}, response=\"{}\"",
            quote(username),
            quote(&self.realm),
            quote(&self.nonce),
            quote(uri),
            alg.token(),
            response
        );
        if self.qop_auth {
            header.push_str(&format!(", qop=auth, nc={nc}, cnonce=\"{}\"", quote(cnonce)));
        }
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(", opaque=\"{}\"", quote(opaque)));
        }
        header
    }
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Split `key=value, key="quoted, value"` pairs. Keys are lowercased.
fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut rest = input.trim();

    while let Some((key, after)) = rest.split_once('=') {
        let key = key.trim().trim_start_matches(',').trim().to_ascii_lowercase();
        let after = after.trim_start();

        let (value, remainder) = if let Some(quoted) = after.strip_prefix('"') {
            let mut value = String::new();
            let mut escaped = false;
            let mut end = quoted.len();
            for (idx, ch) in quoted.char_indices() {
                if escaped {
                    value.push(ch);
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == '"' {
                    end = idx + 1;
                    break;
                } else {
                    value.push(ch);
                }
            }
            (value, &quoted[end..])
        } else {
            match after.find(',') {
                Some(idx) => (after[..idx].trim().to_string(), &after[idx..]),
                None => (after.trim().to_string(), ""),
            }
        };

        params.push((key, value));
        rest = remainder.trim_start().trim_start_matches(',').trim_start();
    }

    params
}

mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut out = String::with_capacity(bytes.len() * 2);
        for byte in bytes {
            out.push(HEX[(byte >> 4) as usize] as char);
            out.push(HEX[(byte & 0x0f) as usize] as char);
        }
        out
    }
}
