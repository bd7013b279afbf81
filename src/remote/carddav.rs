//! Blocking CardDAV client.
//!
//! Only the handful of requests the actions need are implemented: a depth-1
//! `PROPFIND` to list the collection, `GET` to fetch a card and conditional
//! `PUT`s to create or update one.

use std::cell::RefCell;

use log::{debug, info};
use percent_encoding::percent_decode_str;
use reqwest::blocking::{Client, Response};
use reqwest::header::{
    HeaderMap, HeaderValue, InvalidHeaderValue, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE,
};
use reqwest::{Method, StatusCode, Url};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{AuthScheme, ServerConfig};
use crate::credentials::Credentials;
use crate::remote::auth::{AuthError, DigestChallenge};
use crate::remote::{AddressBookClient, AddressBookEntry, SessionMode};

const DAV: &str = "DAV:";
const RESPONSE: (&str, &str) = (DAV, "response");
const HREF: (&str, &str) = (DAV, "href");
const GETETAG: (&str, &str) = (DAV, "getetag");
const COLLECTION: (&str, &str) = (DAV, "collection");

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<propfind xmlns="DAV:"><prop><resourcetype/><getcontenttype/><getetag/></prop></propfind>"#;

const VCARD_CONTENT_TYPE: &str = "text/vcard; charset=utf-8";

/// Errors talking to the CardDAV server.
#[derive(Debug, Error)]
pub enum DavError {
    #[error("http error executing request")]
    Network(#[from] reqwest::Error),

    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("{url} returned {status}")]
    BadStatusCode { url: String, status: StatusCode },

    #[error("{0} changed on the server since it was listed")]
    PreconditionFailed(String),

    #[error("could not parse XML response")]
    Xml(#[from] roxmltree::Error),

    #[error("missing field '{0}' in response XML")]
    MissingData(&'static str),

    #[error("server listed {0} without an etag")]
    MissingEtag(String),

    #[error("invalid header value")]
    InvalidHeader(#[from] InvalidHeaderValue),

    #[error("invalid request method")]
    InvalidMethod(#[from] http::method::InvalidMethod),

    #[error("failed to negotiate digest authentication")]
    Auth(#[from] AuthError),

    #[error("the session was opened read-only")]
    ReadOnly,
}

struct DigestState {
    challenge: DigestChallenge,
    nonce_count: u32,
}

/// A session against one address book collection.
pub struct CardDavClient {
    http: Client,
    collection: Url,
    credentials: Option<Credentials>,
    scheme: AuthScheme,
    mode: SessionMode,
    digest: RefCell<Option<DigestState>>,
}

impl CardDavClient {
    /// Open a session against the address book at `url`.
    ///
    /// No request is sent until the first operation.
    pub fn connect(url: &str, server: &ServerConfig, mode: SessionMode) -> Result<Self, DavError> {
        let http = Client::builder()
            .danger_accept_invalid_certs(!server.verify_certificates)
            .build()?;
        Self::with_http(http, url, server, mode)
    }

    fn with_http(
        http: Client,
        url: &str,
        server: &ServerConfig,
        mode: SessionMode,
    ) -> Result<Self, DavError> {
        let collection = Url::parse(url).map_err(|err| DavError::InvalidUrl {
            url: url.to_string(),
            reason: err.to_string(),
        })?;

        Ok(Self {
            http,
            collection,
            credentials: server.credentials.clone(),
            scheme: server.auth,
            mode,
            digest: RefCell::new(None),
        })
    }

    fn ensure_writable(&self) -> Result<(), DavError> {
        match self.mode {
            SessionMode::ReadWrite => Ok(()),
            SessionMode::ReadOnly => Err(DavError::ReadOnly),
        }
    }

    /// Resolve an href (absolute path or relative name) against the collection.
    fn resolve(&self, href: &str) -> Result<Url, DavError> {
        self.collection
            .join(href)
            .map_err(|err| DavError::InvalidUrl {
                url: href.to_string(),
                reason: err.to_string(),
            })
    }

    /// Send a request, answering a digest challenge once if the server asks for one.
    fn send(
        &self,
        method: Method,
        url: &Url,
        headers: HeaderMap,
        body: Option<&str>,
    ) -> Result<Response, DavError> {
        let response = self.dispatch(&method, url, &headers, body)?;
        if response.status() != StatusCode::UNAUTHORIZED
            || self.scheme != AuthScheme::Digest
            || self.credentials.is_none()
        {
            return Ok(response);
        }

        let headers_seen = response
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|value| value.to_str().ok());
        let Some(challenge) = usable_challenge(headers_seen)? else {
            return Ok(response);
        };

        info!("answering digest challenge for realm {}", challenge.realm);
        *self.digest.borrow_mut() = Some(DigestState {
            challenge,
            nonce_count: 0,
        });
        self.dispatch(&method, url, &headers, body)
    }

    fn dispatch(
        &self,
        method: &Method,
        url: &Url,
        headers: &HeaderMap,
        body: Option<&str>,
    ) -> Result<Response, DavError> {
        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .headers(headers.clone());
        if let Some(body) = body {
            request = request.body(body.to_string());
        }
        if let Some(credentials) = &self.credentials {
            request = match self.scheme {
                AuthScheme::Basic => request.basic_auth(
                    &credentials.username,
                    Some(credentials.password.as_str()),
                ),
                AuthScheme::Digest => match self.digest_authorization(method, url, credentials) {
                    Some(value) => request.header(AUTHORIZATION, HeaderValue::from_str(&value)?),
                    None => request,
                },
            };
        }

        let response = request.send()?;
        debug!("{method} {url} -> {}", response.status());
        Ok(response)
    }

    fn digest_authorization(
        &self,
        method: &Method,
        url: &Url,
        credentials: &Credentials,
    ) -> Option<String> {
        let mut state = self.digest.borrow_mut();
        let state = state.as_mut()?;
        state.nonce_count += 1;

        let uri = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_string(),
        };
        let cnonce = Uuid::new_v4().simple().to_string();
        Some(state.challenge.respond(
            &credentials.username,
            credentials.password.as_str(),
            method.as_str(),
            &uri,
            state.nonce_count,
            &cnonce,
        ))
    }

    fn put(&self, url: &Url, data: &str, headers: HeaderMap) -> Result<(), DavError> {
        self.ensure_writable()?;
        let mut headers = headers;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(VCARD_CONTENT_TYPE));
        let response = self.send(Method::PUT, url, headers, Some(data))?;
        check_status(response, url)?;
        Ok(())
    }
}

impl AddressBookClient for CardDavClient {
    fn list_entries(&self) -> Result<Vec<AddressBookEntry>, DavError> {
        let mut headers = HeaderMap::new();
        headers.insert("depth", HeaderValue::from_static("1"));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/xml; charset=utf-8"),
        );

        let method = Method::from_bytes(b"PROPFIND")?;
        let response = self.send(method, &self.collection, headers, Some(PROPFIND_BODY))?;
        let body = check_status(response, &self.collection)?.text()?;
        parse_listing(&body, self.collection.path())
    }

    fn fetch_card(&self, href: &str) -> Result<String, DavError> {
        let url = self.resolve(href)?;
        let response = self.send(Method::GET, &url, HeaderMap::new(), None)?;
        Ok(check_status(response, &url)?.text()?)
    }

    fn create_card(&self, uid: &str, data: &str) -> Result<String, DavError> {
        let url = self.resolve(&format!("{uid}.vcf"))?;
        let mut headers = HeaderMap::new();
        headers.insert("if-none-match", HeaderValue::from_static("*"));
        self.put(&url, data, headers)?;
        Ok(url.path().to_string())
    }

    fn update_card(&self, href: &str, data: &str, etag: &str) -> Result<(), DavError> {
        let url = self.resolve(href)?;
        let mut headers = HeaderMap::new();
        headers.insert("if-match", HeaderValue::from_str(etag)?);
        self.put(&url, data, headers).map_err(|err| match err {
            DavError::BadStatusCode { status, .. } if status == StatusCode::PRECONDITION_FAILED => {
                DavError::PreconditionFailed(href.to_string())
            }
            other => other,
        })
    }
}

/// The first digest challenge this client can answer.
///
/// Unsupported challenges are skipped; the first such error is only returned
/// when no usable challenge follows.
fn usable_challenge<'a>(
    values: impl Iterator<Item = &'a str>,
) -> Result<Option<DigestChallenge>, AuthError> {
    let mut first_error = None;
    for value in values {
        match DigestChallenge::parse(value) {
            Ok(Some(challenge)) => return Ok(Some(challenge)),
            Ok(None) => {}
            Err(err) => {
                debug!("skipping digest challenge: {err}");
                first_error.get_or_insert(err);
            }
        }
    }
    first_error.map_or(Ok(None), Err)
}

fn check_status(response: Response, url: &Url) -> Result<Response, DavError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(DavError::BadStatusCode {
            url: url.to_string(),
            status,
        })
    }
}

/// Extract the cards listed in a `PROPFIND` multistatus body.
///
/// The collection itself and any nested collection are skipped.
fn parse_listing(body: &str, collection_path: &str) -> Result<Vec<AddressBookEntry>, DavError> {
    let doc = roxmltree::Document::parse(body)?;
    let responses = doc
        .root_element()
        .descendants()
        .filter(|node| node.has_tag_name(RESPONSE));

    let mut entries = Vec::new();
    for response in responses {
        let href = response
            .descendants()
            .find(|node| node.has_tag_name(HREF))
            .and_then(|node| node.text())
            .map(str::trim)
            .ok_or(DavError::MissingData("href"))?;

        if same_path(href, collection_path)
            || response.descendants().any(|node| node.has_tag_name(COLLECTION))
        {
            continue;
        }

        let etag = response
            .descendants()
            .find(|node| node.has_tag_name(GETETAG))
            .and_then(|node| node.text())
            .map(str::trim)
            .filter(|etag| !etag.is_empty())
            .ok_or_else(|| DavError::MissingEtag(href.to_string()))?;

        entries.push(AddressBookEntry {
            href: href.to_string(),
            etag: etag.to_string(),
        });
    }

    Ok(entries)
}

/// Compare an href from a multistatus response with the collection path,
/// ignoring percent-encoding and trailing slashes.
fn same_path(href: &str, collection_path: &str) -> bool {
    let path = Url::parse(href)
        .map(|url| url.path().to_string())
        .unwrap_or_else(|_| href.to_string());
    normalize_path(&path) == normalize_path(collection_path)
}

fn normalize_path(path: &str) -> String {
    percent_decode_str(path)
        .decode_utf8_lossy()
        .trim_end_matches('/')
        .to_string()
}
