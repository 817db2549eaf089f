use crate::{
    error::{Error, Result},
    Digest,
};
use regex::Regex;
use std::fmt;

lazy_static::lazy_static! {
    static ref NAME_RE: Regex = Regex::new(
        r"^[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*)*$"
    ).unwrap();
    static ref TAG_RE: Regex = Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}$").unwrap();
}

/// Reference to an image, e.g. `r8im/base:latest` or `r8im/weights@sha256:...`
///
/// The registry host is not part of the name; pull/push transport resolves it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageName {
    pub name: String,
    pub reference: Reference,
}

/// Tag or digest part of an image name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    Tag(String),
    Digest(Digest),
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Tag(tag) => write!(f, ":{}", tag),
            Reference::Digest(digest) => write!(f, "@{}", digest),
        }
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.reference)
    }
}

impl ImageName {
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || Error::InvalidImageName(input.to_string());
        let (name, reference) = if let Some((name, digest)) = input.split_once('@') {
            let digest = Digest::new(digest).map_err(|_| invalid())?;
            (name, Reference::Digest(digest))
        } else if let Some((name, tag)) = input.split_once(':') {
            if !TAG_RE.is_match(tag) {
                return Err(invalid());
            }
            (name, Reference::Tag(tag.to_string()))
        } else {
            (input, Reference::Tag("latest".to_string()))
        };
        if !NAME_RE.is_match(name) {
            return Err(invalid());
        }
        Ok(ImageName {
            name: name.to_string(),
            reference,
        })
    }
}
