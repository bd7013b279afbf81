//! Reading and writing vCard text.
//!
//! Cards are kept as an ordered list of content lines so that properties this
//! tool does not care about survive a parse/serialize cycle untouched. Only the
//! handful of properties the actions edit (`UID`, `PRODID`, `FN` and `N`) get
//! typed accessors. Both vCard 3.0 and 4.0 input is accepted.

use std::fmt::{self, Write as _};

use thiserror::Error;

/// Maximum length of a serialized line in octets, excluding the line break.
const MAX_LINE_OCTETS: usize = 75;

const SUPPORTED_VERSIONS: [&str; 3] = ["2.1", "3.0", "4.0"];

/// Leading characters that mark a folded continuation line.
const FOLD_CHARS: &[char] = &[' ', '\t'];

/// Errors raised while reading vCard text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CardError {
    #[error("line {line}: content found outside BEGIN:VCARD/END:VCARD")]
    DataOutsideBeginEnd { line: usize },
    #[error("line {line}: BEGIN:VCARD found inside another card")]
    NestedBegin { line: usize },
    #[error("line {line}: END:VCARD without a matching BEGIN:VCARD")]
    UnbalancedEnd { line: usize },
    #[error("card starting at line {line} is not terminated by END:VCARD")]
    Unterminated { line: usize },
    #[error("line {line}: malformed content line `{content}`")]
    MalformedLine { line: usize, content: String },
    #[error("card starting at line {line} is invalid: {reason}")]
    Invalid { line: usize, reason: String },
    #[error("no vCard found in input")]
    Empty,
    #[error("expected a single vCard, found {0}")]
    MultipleCards(usize),
}

/// A single content line, e.g. `item1.TEL;TYPE=cell:+15551234`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub group: Option<String>,
    pub name: String,
    /// Raw parameter text between the name and the value separator.
    pub params: Option<String>,
    /// Raw (still escaped) value.
    pub value: String,
}

impl Property {
    pub fn new(name: &str, value: impl Into<String>) -> Self {
        Self {
            group: None,
            name: name.to_string(),
            params: None,
            value: value.into(),
        }
    }

    /// Parse an unfolded content line. Returns `None` if the line is not of the
    /// form `[group.]name[;params]:value`.
    fn parse(text: &str) -> Option<Self> {
        let mut in_quotes = false;
        let colon = text.char_indices().find_map(|(idx, ch)| match ch {
            '"' => {
                in_quotes = !in_quotes;
                None
            }
            ':' if !in_quotes => Some(idx),
            _ => None,
        })?;

        let (head, value) = (&text[..colon], &text[colon + 1..]);
        let (qualified, params) = match head.split_once(';') {
            Some((name, params)) => (name, Some(params.to_string())),
            None => (head, None),
        };
        let (group, name) = match qualified.split_once('.') {
            Some((group, name)) => (Some(group), name),
            None => (None, qualified),
        };

        if !is_valid_name(name) || group.is_some_and(|g| !is_valid_name(g)) {
            return None;
        }

        Some(Self {
            group: group.map(str::to_string),
            name: name.to_string(),
            params,
            value: value.to_string(),
        })
    }

    fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(group) = &self.group {
            write!(f, "{group}.")?;
        }
        f.write_str(&self.name)?;
        if let Some(params) = &self.params {
            write!(f, ";{params}")?;
        }
        write!(f, ":{}", self.value)
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// The components of the `N` property, unescaped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuredName {
    pub family: String,
    pub given: String,
    pub additional: String,
    pub prefix: String,
    pub suffix: String,
}

impl StructuredName {
    /// Parse the raw value of an `N` property (`family;given;additional;prefix;suffix`).
    ///
    /// Missing trailing components are empty. Comma separated lists inside a
    /// component are joined with a space.
    pub fn parse(value: &str) -> Self {
        let mut components = split_unescaped(value, ';').into_iter().map(|component| {
            split_unescaped(&component, ',')
                .iter()
                .map(|item| unescape_text(item))
                .filter(|item| !item.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        });
        let mut next = || components.next().unwrap_or_default();

        Self {
            family: next(),
            given: next(),
            additional: next(),
            prefix: next(),
            suffix: next(),
        }
    }

    /// Display form: "prefix given additional family suffix", skipping empty parts.
    pub fn formatted(&self) -> String {
        let mut name = String::new();
        for part in [
            &self.prefix,
            &self.given,
            &self.additional,
            &self.family,
            &self.suffix,
        ] {
            if !part.is_empty() {
                name.push_str(part);
                name.push(' ');
            }
        }
        name.trim().to_string()
    }
}

/// A parsed vCard. `BEGIN`/`END` are implied and not stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VCard {
    properties: Vec<Property>,
}

impl VCard {
    #[cfg(test)]
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    fn first(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.is(name))
    }

    fn count(&self, name: &str) -> usize {
        self.properties.iter().filter(|p| p.is(name)).count()
    }

    /// Index right after the first property matching one of `anchors`, tried in order.
    fn insertion_point(&self, anchors: &[&str]) -> usize {
        anchors
            .iter()
            .find_map(|anchor| self.properties.iter().position(|p| p.is(anchor)))
            .map_or(0, |idx| idx + 1)
    }

    /// Replace every `name` property with a single one holding `value`, keeping
    /// the position of the first occurrence. Inserts after `anchors` otherwise.
    fn replace_or_insert(&mut self, name: &str, value: String, anchors: &[&str]) {
        match self.properties.iter().position(|p| p.is(name)) {
            Some(idx) => {
                let mut property = Property::new(name, value);
                property.group = self.properties[idx].group.take();
                self.properties[idx] = property;
                let mut seen = 0;
                self.properties.retain(|p| {
                    if p.is(name) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => {
                let idx = self.insertion_point(anchors);
                self.properties.insert(idx, Property::new(name, value));
            }
        }
    }

    pub fn version(&self) -> Option<&str> {
        self.first("VERSION").map(|p| p.value.trim())
    }

    pub fn uid(&self) -> Option<&str> {
        self.first("UID").map(|p| p.value.as_str())
    }

    /// Set the UID, dropping any parameters the previous value carried.
    pub fn set_uid(&mut self, uid: &str) {
        self.replace_or_insert("UID", uid.to_string(), &["VERSION"]);
    }

    pub fn product_id(&self) -> Option<&str> {
        self.first("PRODID").map(|p| p.value.as_str())
    }

    /// Remove the `PRODID` property. Returns whether one was present.
    pub fn remove_product_id(&mut self) -> bool {
        let before = self.properties.len();
        self.properties.retain(|p| !p.is("PRODID"));
        before != self.properties.len()
    }

    #[cfg(test)]
    pub fn formatted_name(&self) -> Option<String> {
        self.first("FN").map(|p| unescape_text(&p.value))
    }

    pub fn set_formatted_name(&mut self, name: &str) {
        self.replace_or_insert("FN", escape_text(name), &["N", "VERSION"]);
    }

    pub fn structured_name(&self) -> Option<StructuredName> {
        self.first("N").map(|p| StructuredName::parse(&p.value))
    }

    fn validate(&self) -> Result<(), String> {
        match self.count("VERSION") {
            0 => return Err("missing VERSION property".to_string()),
            1 => {}
            n => return Err(format!("{n} VERSION properties, expected one")),
        }
        let version = self.version().unwrap_or_default();
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(format!("unsupported vCard version `{version}`"));
        }
        for name in ["N", "UID", "PRODID"] {
            let n = self.count(name);
            if n > 1 {
                return Err(format!("{n} {name} properties, expected at most one"));
            }
        }
        Ok(())
    }
}

impl fmt::Display for VCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BEGIN:VCARD\r\n")?;
        for property in &self.properties {
            write_folded(f, &property.to_string())?;
        }
        f.write_str("END:VCARD\r\n")
    }
}

fn write_folded(f: &mut fmt::Formatter<'_>, line: &str) -> fmt::Result {
    let mut limit = MAX_LINE_OCTETS;
    let mut used = 0;
    for ch in line.chars() {
        let len = ch.len_utf8();
        if used + len > limit {
            f.write_str("\r\n ")?;
            used = 0;
            // The leading space counts towards the continuation line.
            limit = MAX_LINE_OCTETS - 1;
        }
        f.write_char(ch)?;
        used += len;
    }
    f.write_str("\r\n")
}

/// Join folded lines. Each logical line is returned with its 1-based starting
/// line number in the input.
fn unfold(input: &str) -> Vec<(usize, String)> {
    let mut lines: Vec<(usize, String)> = Vec::new();
    for (idx, physical) in input.split('\n').enumerate() {
        let physical = physical.strip_suffix('\r').unwrap_or(physical);
        if let Some(rest) = physical.strip_prefix(FOLD_CHARS) {
            if let Some((_, last)) = lines.last_mut() {
                last.push_str(rest);
                continue;
            }
        }
        lines.push((idx + 1, physical.to_string()));
    }
    lines
}

struct Block {
    start: usize,
    card: VCard,
}

fn split_cards(input: &str) -> Result<Vec<Block>, CardError> {
    let mut blocks = Vec::new();
    let mut current: Option<Block> = None;

    for (line, text) in unfold(input) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed.eq_ignore_ascii_case("BEGIN:VCARD") {
            if current.is_some() {
                return Err(CardError::NestedBegin { line });
            }
            current = Some(Block {
                start: line,
                card: VCard::default(),
            });
        } else if trimmed.eq_ignore_ascii_case("END:VCARD") {
            let block = current.take().ok_or(CardError::UnbalancedEnd { line })?;
            blocks.push(block);
        } else {
            let block = current
                .as_mut()
                .ok_or(CardError::DataOutsideBeginEnd { line })?;
            let property = Property::parse(&text).ok_or_else(|| CardError::MalformedLine {
                line,
                content: text.clone(),
            })?;
            block.card.properties.push(property);
        }
    }

    if let Some(block) = current {
        return Err(CardError::Unterminated { line: block.start });
    }
    Ok(blocks)
}

/// Parse a stream of cards, validating each one.
pub fn parse_components(input: &str) -> Result<Vec<VCard>, CardError> {
    split_cards(input)?
        .into_iter()
        .map(|block| {
            block
                .card
                .validate()
                .map_err(|reason| CardError::Invalid {
                    line: block.start,
                    reason,
                })?;
            Ok(block.card)
        })
        .collect()
}

/// Parse text holding exactly one card. Only the structure is checked.
pub fn parse_one(input: &str) -> Result<VCard, CardError> {
    let mut blocks = split_cards(input)?;
    match blocks.len() {
        0 => Err(CardError::Empty),
        1 => Ok(blocks.remove(0).card),
        n => Err(CardError::MultipleCards(n)),
    }
}

/// Drop every `FN` line (and its folded continuations) from raw card text.
pub fn strip_formatted_name(raw: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut skipping = false;
    for line in raw.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if skipping && line.starts_with(FOLD_CHARS) {
            continue;
        }
        skipping = Property::parse(line).is_some_and(|p| p.is("FN"));
        if !skipping {
            kept.push(line);
        }
    }
    kept.join("\r\n")
}

/// Split on `sep` where it is not preceded by a backslash. Escapes are kept.
fn split_unescaped(value: &str, sep: char) -> Vec<String> {
    let mut parts = vec![String::new()];
    let mut escaped = false;
    for ch in value.chars() {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == sep {
            parts.push(String::new());
            continue;
        }
        if let Some(last) = parts.last_mut() {
            last.push(ch);
        }
    }
    parts
}

fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n' | 'N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            _ => out.push(ch),
        }
    }
    out
}
