//! Image reference parsing.
//!
//! A reference is a `name[:tag]` pair plus, once resolved, the 12-hex
//! content address of the image config.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default tag when none is specified.
pub const DEFAULT_TAG: &str = "latest";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    /// Image name as given, including any registry host (e.g. "alpine", "ghcr.io/org/app")
    pub name: String,
    /// Tag (e.g. "latest", "3.19")
    pub tag: String,
    /// Local content address, set once the image is resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse a `name[:tag]` string. Never fails.
    ///
    /// The last `:` is taken as the tag separator only when the text after it
    /// is non-empty and contains no `/`, so `localhost:5000/app` keeps its
    /// port. Anything else becomes a literal name with the default tag.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();

        if let Some(pos) = raw.rfind(':') {
            let (name, tag) = (&raw[..pos], &raw[pos + 1..]);
            if !tag.is_empty() && !tag.contains('/') && !name.is_empty() {
                return Self::new(name, tag);
            }
            if tag.is_empty() {
                return Self::new(name, DEFAULT_TAG);
            }
        }

        Self::new(raw, DEFAULT_TAG)
    }

    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
            digest: None,
        }
    }

    /// Attach the resolved content address.
    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        debug_assert!(self.digest.is_none(), "digest is set exactly once");
        self.digest = Some(digest.into());
        self
    }

    /// Canonical `name:tag` form.
    pub fn identity_key(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }

    /// The resolved digest, if any (empty digests count as unresolved).
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref().filter(|d| !d.is_empty())
    }

    pub fn is_resolved(&self) -> bool {
        self.digest().is_some()
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)?;
        if let Some(digest) = self.digest() {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_name() {
        let r = ImageReference::parse("alpine");
        assert_eq!(r.name, "alpine");
        assert_eq!(r.tag, "latest");
        assert!(r.digest.is_none());
    }

    #[test]
    fn test_parse_name_with_tag() {
        let r = ImageReference::parse("alpine:3.19");
        assert_eq!(r.name, "alpine");
        assert_eq!(r.tag, "3.19");
    }

    #[test]
    fn test_parse_identity_key_round_trip() {
        for raw in ["alpine:latest", "busybox:1.36", "ghcr.io/org/app:v2", "localhost:5000/app:dev"] {
            assert_eq!(ImageReference::parse(raw).identity_key(), raw);
        }
    }

    #[test]
    fn test_parse_registry_with_port_no_tag() {
        let r = ImageReference::parse("localhost:5000/app");
        assert_eq!(r.name, "localhost:5000/app");
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn test_parse_registry_with_port_and_tag() {
        let r = ImageReference::parse("localhost:5000/app:dev");
        assert_eq!(r.name, "localhost:5000/app");
        assert_eq!(r.tag, "dev");
    }

    #[test]
    fn test_parse_trailing_colon_defaults_tag() {
        let r = ImageReference::parse("alpine:");
        assert_eq!(r.name, "alpine");
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn test_parse_malformed_is_literal_name() {
        let r = ImageReference::parse(":tag");
        assert_eq!(r.name, ":tag");
        assert_eq!(r.tag, "latest");

        let empty = ImageReference::parse("");
        assert_eq!(empty.name, "");
        assert_eq!(empty.tag, "latest");
    }

    #[test]
    fn test_with_digest_and_display() {
        let r = ImageReference::parse("alpine").with_digest("0123456789ab");
        assert!(r.is_resolved());
        assert_eq!(r.digest(), Some("0123456789ab"));
        assert_eq!(r.to_string(), "alpine:latest@0123456789ab");
        assert_eq!(r.identity_key(), "alpine:latest");
    }

    #[test]
    fn test_empty_digest_is_unresolved() {
        let r = ImageReference::new("alpine", "latest").with_digest("");
        assert!(!r.is_resolved());
        assert_eq!(r.to_string(), "alpine:latest");
    }

    #[test]
    fn test_serde_skips_missing_digest() {
        let r = ImageReference::parse("alpine");
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, r#"{"name":"alpine","tag":"latest"}"#);
        let back: ImageReference = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
