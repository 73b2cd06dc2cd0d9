//! Signing-config templates
//!
//! A stub is plain text with `|NAME|` placeholders. It is parsed once into
//! literal and token segments and rendered in a single pass, so substituted
//! values are never scanned for further tokens.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("config stub {path} is missing or unreadable: {source}")]
    MissingStub {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("value for |{token}| contains a line break")]
    LineBreak { token: String },

    #[error("failed to write rendered config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, TemplateError>;

const DELIMITER: char = '|';

/// Named stubs in the config directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StubKind {
    TrustAnchor,
    DomainBound,
    EmailBound,
    Crl,
}

impl StubKind {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::TrustAnchor => "trust-anchor-stub.cnf",
            Self::DomainBound => "domain-bound-stub.cnf",
            Self::EmailBound => "email-bound-stub.cnf",
            Self::Crl => "crl-stub.cnf",
        }
    }
}

/// Read-only view of the stub directory.
#[derive(Clone, Debug)]
pub struct StubRepository {
    dir: PathBuf,
}

impl StubRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, kind: StubKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    pub fn load(&self, kind: StubKind) -> Result<ConfigTemplate> {
        ConfigTemplate::load(self.path(kind))
    }
}

/// Replacement values keyed by token name.
#[derive(Clone, Debug, Default)]
pub struct TokenMap {
    values: BTreeMap<String, String>,
}

impl TokenMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, token: &str, value: impl Into<String>) -> &mut Self {
        self.values.insert(token.to_string(), value.into());
        self
    }

    pub fn with(mut self, token: &str, value: impl Into<String>) -> Self {
        self.set(token, value);
        self
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.values.get(token).map(String::as_str)
    }

    fn validate(&self) -> Result<()> {
        for (token, value) in &self.values {
            if value.contains(['\n', '\r']) {
                return Err(TemplateError::LineBreak { token: token.clone() });
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Token(String),
}

/// A parsed stub.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigTemplate {
    segments: Vec<Segment>,
}

fn is_token_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

impl ConfigTemplate {
    pub fn parse(text: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = text;

        while let Some(start) = rest.find(DELIMITER) {
            let after = &rest[start + 1..];
            match after.find(DELIMITER) {
                Some(end) if is_token_name(&after[..end]) => {
                    literal.push_str(&rest[..start]);
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Token(after[..end].to_string()));
                    rest = &after[end + 1..];
                }
                // A lone delimiter is ordinary text
                _ => {
                    literal.push_str(&rest[..=start]);
                    rest = after;
                }
            }
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Self { segments }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| TemplateError::MissingStub {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&text))
    }

    /// Substitute every mapped token. Unmapped tokens are emitted as written.
    pub fn render(&self, values: &TokenMap) -> Result<String> {
        values.validate()?;
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Token(name) => match values.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push(DELIMITER);
                        out.push_str(name);
                        out.push(DELIMITER);
                    }
                },
            }
        }
        Ok(out)
    }

    /// Render into `dest`. The stub the template was loaded from is not touched.
    pub fn render_to(&self, values: &TokenMap, dest: &Path) -> Result<()> {
        let text = self.render(values)?;
        fs::write(dest, text).map_err(|source| TemplateError::Write {
            path: dest.to_path_buf(),
            source,
        })
    }
}
