use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::{CoreError, Result};

const DIGEST_ALGORITHM: &str = "sha256";
const MAX_TAG_LEN: usize = 128;

/// Parsed container image reference:
/// `[registry/]repository[:tag][@sha256:digest]`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    pub registry: Option<String>,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(CoreError::InvalidImage("empty image reference".into()));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(CoreError::InvalidImage(format!(
                "{raw:?} contains whitespace"
            )));
        }

        let (name, digest) = match raw.split_once('@') {
            Some((name, digest)) => (name, Some(parse_digest(raw, digest)?)),
            None => (raw, None),
        };

        // A ':' after the last '/' separates the tag; earlier ones belong to
        // a registry port.
        let last_slash = name.rfind('/').map(|idx| idx + 1).unwrap_or(0);
        let (path, tag) = match name[last_slash..].rfind(':') {
            Some(idx) => {
                let split = last_slash + idx;
                (&name[..split], Some(&name[split + 1..]))
            }
            None => (name, None),
        };

        if let Some(tag) = tag {
            let valid = !tag.is_empty()
                && tag.len() <= MAX_TAG_LEN
                && tag
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || "_.-".contains(c));
            if !valid {
                return Err(CoreError::InvalidImage(format!(
                    "{raw:?} has an invalid tag"
                )));
            }
        }

        let (registry, repository) = match path.split_once('/') {
            Some((first, rest))
                if first.contains('.')
                    || first.contains(':')
                    || first == "localhost" =>
            {
                (Some(first.to_string()), rest)
            }
            _ => (None, path),
        };

        let repository_valid = !repository.is_empty()
            && repository.split('/').all(|component| {
                !component.is_empty()
                    && component.chars().all(|c| {
                        c.is_ascii_lowercase()
                            || c.is_ascii_digit()
                            || "._-".contains(c)
                    })
            });
        if !repository_valid {
            return Err(CoreError::InvalidImage(format!(
                "{raw:?} has an invalid repository"
            )));
        }

        Ok(Self {
            registry,
            repository: repository.to_string(),
            tag: tag.map(str::to_string),
            digest,
        })
    }

    /// Hex part of the pinned digest, if the reference is pinned.
    pub fn digest_hex(&self) -> Option<&str> {
        self.digest
            .as_deref()
            .and_then(|digest| digest.split_once(':'))
            .map(|(_, hex)| hex)
    }
}

fn parse_digest(raw: &str, digest: &str) -> Result<String> {
    let Some((algorithm, hex)) = digest.split_once(':') else {
        return Err(CoreError::InvalidImage(format!(
            "{raw:?} has a digest without an algorithm"
        )));
    };
    if algorithm != DIGEST_ALGORITHM {
        return Err(CoreError::InvalidImage(format!(
            "{raw:?} uses unsupported digest algorithm {algorithm}"
        )));
    }
    if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(CoreError::InvalidImage(format!(
            "{raw:?} has a malformed digest"
        )));
    }
    Ok(digest.to_string())
}

impl FromStr for ImageReference {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{registry}/")?;
        }
        write!(f, "{}", self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

/// Identity of the image content a report was produced for.
///
/// Pinned references hash to their digest; otherwise the digest resolved by
/// the container runtime is used, and as a last resort the SHA-256 of the
/// normalized reference.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageHash(String);

impl ImageHash {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn derive(
        reference: &ImageReference,
        resolved_image_id: Option<&str>,
    ) -> Self {
        if let Some(hex) = reference.digest_hex() {
            return Self(hex.to_string());
        }
        if let Some(hex) = resolved_image_id.and_then(resolved_digest_hex) {
            return Self(hex.to_string());
        }
        let mut hasher = Sha256::new();
        hasher.update(reference.to_string().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix used in labels and job names.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

/// Extracts the digest hex from runtime image ids such as
/// `docker-pullable://repo@sha256:<hex>` or `sha256:<hex>`.
fn resolved_digest_hex(image_id: &str) -> Option<&str> {
    let idx = image_id.rfind("sha256:")?;
    let hex = &image_id[idx + "sha256:".len()..];
    (!hex.is_empty() && hex.chars().all(|c| c.is_ascii_alphanumeric()))
        .then_some(hex)
}

impl fmt::Display for ImageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_registry_port_tag_and_digest() {
        let image = ImageReference::parse(
            "registry.local:5000/team/api:1.2.3@sha256:abc123",
        )
        .expect("valid reference");
        assert_eq!(image.registry.as_deref(), Some("registry.local:5000"));
        assert_eq!(image.repository, "team/api");
        assert_eq!(image.tag.as_deref(), Some("1.2.3"));
        assert_eq!(image.digest_hex(), Some("abc123"));
        assert_eq!(
            image.to_string(),
            "registry.local:5000/team/api:1.2.3@sha256:abc123"
        );
    }

    #[test]
    fn docker_hub_shorthand_has_no_registry() {
        let image = ImageReference::parse("library/nginx:1.25").unwrap();
        assert_eq!(image.registry, None);
        assert_eq!(image.repository, "library/nginx");
    }

    #[test]
    fn rejects_malformed_references() {
        for raw in [
            "",
            "nginx latest",
            "Nginx:1.0",
            "nginx:",
            "nginx@md5:abc",
            "nginx@sha256:",
            "//nginx",
        ] {
            assert!(
                ImageReference::parse(raw).is_err(),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn hash_prefers_pinned_digest_then_resolved_id() {
        let pinned = ImageReference::parse("img@sha256:AAA").unwrap();
        assert_eq!(ImageHash::derive(&pinned, Some("sha256:BBB")).as_str(), "AAA");

        let tagged = ImageReference::parse("img:1.0").unwrap();
        assert_eq!(
            ImageHash::derive(
                &tagged,
                Some("docker-pullable://img@sha256:CCC")
            )
            .as_str(),
            "CCC"
        );

        let fallback = ImageHash::derive(&tagged, None);
        assert_eq!(fallback.as_str().len(), 64);
        assert_eq!(fallback, ImageHash::derive(&tagged, Some("")));
    }
}
