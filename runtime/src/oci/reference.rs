//! Image reference normalization.
//!
//! Turns the short forms used in `FROM` lines and on the command line
//! (`alpine`, `nginx:1.25`, `ghcr.io/org/app@sha256:...`) into a fully
//! qualified reference, and derives the key the image cache stores it under.

use sha2::{Digest, Sha256};
use strata_core::error::{Result, StrataError};

/// Registry used when a reference names none.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Tag used when a reference carries neither tag nor digest.
const DEFAULT_TAG: &str = "latest";

/// A normalized image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry hostname, with port if any (e.g. "docker.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g. "library/nginx")
    pub repository: String,
    pub tag: Option<String>,
    /// Content digest (e.g. "sha256:abc...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse and normalize a reference string.
    ///
    /// - `alpine` → `docker.io/library/alpine:latest`
    /// - `golang:1.20` → `docker.io/library/golang:1.20`
    /// - `org/app` → `docker.io/org/app:latest`
    /// - `localhost:5000/app` → `localhost:5000/app:latest`
    /// - `ghcr.io/org/app@sha256:...` keeps the digest and gets no tag
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(StrataError::OciImage("Empty image reference".to_string()));
        }

        let (name_tag, digest) = match reference.split_once('@') {
            Some((name_tag, digest)) => {
                if !digest.contains(':') {
                    return Err(StrataError::OciImage(format!(
                        "Invalid digest in reference '{}': expected algorithm:hex",
                        reference
                    )));
                }
                (name_tag, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        let (name, tag) = split_tag(name_tag);
        if name.is_empty() {
            return Err(StrataError::OciImage(format!(
                "Missing repository in reference '{}'",
                reference
            )));
        }
        if tag.map_or(false, str::is_empty) {
            return Err(StrataError::OciImage(format!(
                "Empty tag in reference '{}'",
                reference
            )));
        }

        let (registry, repository) = split_registry(name)?;
        let tag = match (tag, &digest) {
            (Some(tag), _) => Some(tag.to_string()),
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (None, Some(_)) => None,
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Fully qualified reference string, e.g. `docker.io/library/alpine:latest`.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }

    /// Cache key: hex SHA-256 of the fully qualified reference.
    ///
    /// Different spellings of the same image (`alpine`, `docker.io/library/alpine:latest`)
    /// share a key.
    pub fn cache_key(&self) -> String {
        hex::encode(Sha256::digest(self.full_reference().as_bytes()))
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

impl std::str::FromStr for ImageReference {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Split `name[:tag]`. A colon only starts a tag when it follows the last
/// slash, so `localhost:5000/app` has no tag.
fn split_tag(name_tag: &str) -> (&str, Option<&str>) {
    let last_segment_start = name_tag.rfind('/').map_or(0, |i| i + 1);
    match name_tag[last_segment_start..].rfind(':') {
        Some(colon) => {
            let colon = last_segment_start + colon;
            (&name_tag[..colon], Some(&name_tag[colon + 1..]))
        }
        None => (name_tag, None),
    }
}

/// Split a name into registry and repository. The first path component is a
/// registry when it contains a dot or a port, or is `localhost`.
fn split_registry(name: &str) -> Result<(String, String)> {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if rest.is_empty() {
                return Err(StrataError::OciImage(format!(
                    "Empty repository in reference '{}'",
                    name
                )));
            }
            return Ok((first.to_string(), rest.to_string()));
        }
        return Ok((DEFAULT_REGISTRY.to_string(), name.to_string()));
    }
    Ok((DEFAULT_REGISTRY.to_string(), format!("library/{}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_official_image() {
        let r = ImageReference::parse("alpine").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/alpine");
        assert_eq!(r.tag.as_deref(), Some("latest"));
        assert_eq!(r.digest, None);
    }

    #[test]
    fn test_parse_with_tag() {
        let r = ImageReference::parse("golang:1.20").unwrap();
        assert_eq!(r.repository, "library/golang");
        assert_eq!(r.tag.as_deref(), Some("1.20"));
    }

    #[test]
    fn test_parse_user_repository() {
        let r = ImageReference::parse("bitnami/redis:7.2").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "bitnami/redis");
        assert_eq!(r.tag.as_deref(), Some("7.2"));
    }

    #[test]
    fn test_parse_custom_registry() {
        let r = ImageReference::parse("gcr.io/distroless/static:nonroot").unwrap();
        assert_eq!(r.registry, "gcr.io");
        assert_eq!(r.repository, "distroless/static");
        assert_eq!(r.tag.as_deref(), Some("nonroot"));
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ImageReference::parse("localhost:5000/app").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "app");
        assert_eq!(r.tag.as_deref(), Some("latest"));

        let r = ImageReference::parse("registry.local:5000/team/app:v2").unwrap();
        assert_eq!(r.registry, "registry.local:5000");
        assert_eq!(r.repository, "team/app");
        assert_eq!(r.tag.as_deref(), Some("v2"));
    }

    #[test]
    fn test_parse_digest() {
        let r = ImageReference::parse("ghcr.io/org/app@sha256:0123abcd").unwrap();
        assert_eq!(r.tag, None);
        assert_eq!(r.digest.as_deref(), Some("sha256:0123abcd"));
        assert_eq!(r.full_reference(), "ghcr.io/org/app@sha256:0123abcd");
    }

    #[test]
    fn test_parse_tag_and_digest() {
        let r = ImageReference::parse("nginx:1.25@sha256:0123abcd").unwrap();
        assert_eq!(r.tag.as_deref(), Some("1.25"));
        assert_eq!(
            r.full_reference(),
            "docker.io/library/nginx:1.25@sha256:0123abcd"
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("   ").is_err());
        assert!(ImageReference::parse("nginx@nodigest").is_err());
        assert!(ImageReference::parse("nginx:").is_err());
        assert!(ImageReference::parse("ghcr.io/").is_err());
    }

    #[test]
    fn test_display_is_full_reference() {
        let r: ImageReference = "nginx:1.29.1-alpine-slim".parse().unwrap();
        assert_eq!(r.to_string(), "docker.io/library/nginx:1.29.1-alpine-slim");
    }

    #[test]
    fn test_cache_key_normalizes_spelling() {
        let short = ImageReference::parse("alpine").unwrap();
        let long = ImageReference::parse("docker.io/library/alpine:latest").unwrap();
        let other = ImageReference::parse("alpine:3.19").unwrap();

        assert_eq!(short.cache_key(), long.cache_key());
        assert_ne!(short.cache_key(), other.cache_key());
        assert_eq!(short.cache_key().len(), 64);
        assert!(short.cache_key().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
