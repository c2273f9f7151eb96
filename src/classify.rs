//! Path classification: deciding whether a request target names a servable
//! resource, and which shape it is.
//!
//! Matching is hand-rolled string parsing rather than a regex or a generic
//! router matcher, since there are exactly four fixed shapes and each one's
//! validity only depends on character class, not on app-defined route
//! patterns.

/// A request target that matched one of the four servable shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// `/registries`
    Registries,
    /// `/registry/{uuid}/{hash}`
    Registry { uuid: String, hash: String },
    /// `/package/{uuid}/{hash}`
    Package { uuid: String, hash: String },
    /// `/artifact/{hash}`
    Artifact { hash: String },
}

impl Resource {
    /// Canonical identifier used as both the cache-relative path and the
    /// fetch-engine coordination key, e.g. `artifact/<hash>`. Never has a
    /// leading slash.
    pub fn id(&self) -> String {
        match self {
            Resource::Registries => "registries".to_string(),
            Resource::Registry { uuid, hash } => format!("registry/{uuid}/{hash}"),
            Resource::Package { uuid, hash } => format!("package/{uuid}/{hash}"),
            Resource::Artifact { hash } => format!("artifact/{hash}"),
        }
    }
}

/// Classifies a raw HTTP request target. Returns `None` if the target is not
/// one of the four servable shapes, carries a query string, or has a
/// trailing slash.
pub fn classify(target: &str) -> Option<Resource> {
    if target.contains('?') {
        return None;
    }
    if target == "/registries" {
        return Some(Resource::Registries);
    }

    let rest = target.strip_prefix('/')?;
    if rest.is_empty() || rest.ends_with('/') {
        return None;
    }
    let mut segments = rest.split('/');

    match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some("registry"), Some(uuid), Some(hash), None) if is_uuid(uuid) && is_hash(hash) => {
            Some(Resource::Registry { uuid: uuid.to_string(), hash: hash.to_string() })
        }
        (Some("package"), Some(uuid), Some(hash), None) if is_uuid(uuid) && is_hash(hash) => {
            Some(Resource::Package { uuid: uuid.to_string(), hash: hash.to_string() })
        }
        (Some("artifact"), Some(hash), None, None) if is_hash(hash) => {
            Some(Resource::Artifact { hash: hash.to_string() })
        }
        _ => None,
    }
}

fn is_lower_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// 40 lowercase hex characters (SHA-1-shaped).
fn is_hash(s: &str) -> bool {
    s.len() == 40 && is_lower_hex(s)
}

/// 8-4-4-4-12 lowercase hex, dash-separated.
fn is_uuid(s: &str) -> bool {
    let groups: Vec<&str> = s.split('-').collect();
    let expected = [8, 4, 4, 4, 12];
    groups.len() == expected.len()
        && groups
            .iter()
            .zip(expected)
            .all(|(g, len)| g.len() == len && is_lower_hex(g))
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "8cf4e0fa-c3c7-4ee4-b1a3-0e58a810291a";
    const HASH: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";

    #[test]
    fn classifies_all_four_shapes() {
        assert_eq!(classify("/registries"), Some(Resource::Registries));
        assert_eq!(
            classify(&format!("/registry/{UUID}/{HASH}")),
            Some(Resource::Registry { uuid: UUID.into(), hash: HASH.into() })
        );
        assert_eq!(
            classify(&format!("/package/{UUID}/{HASH}")),
            Some(Resource::Package { uuid: UUID.into(), hash: HASH.into() })
        );
        assert_eq!(
            classify(&format!("/artifact/{HASH}")),
            Some(Resource::Artifact { hash: HASH.into() })
        );
    }

    #[test]
    fn rejects_query_strings_and_trailing_slashes() {
        assert_eq!(classify(&format!("/artifact/{HASH}?x=1")), None);
        assert_eq!(classify(&format!("/artifact/{HASH}/")), None);
        assert_eq!(classify("/registries/"), None);
    }

    #[test]
    fn rejects_malformed_uuid_or_hash() {
        assert_eq!(classify(&format!("/artifact/{}", &HASH[..39])), None);
        assert_eq!(classify(&format!("/artifact/{}", HASH.to_uppercase())), None);
        let bad_uuid = "8CF4E0FA-c3c7-4ee4-b1a3-0e58a810291a";
        assert_eq!(classify(&format!("/registry/{bad_uuid}/{HASH}")), None);
        assert_eq!(classify(&format!("/registry/{UUID}-extra/{HASH}")), None);
    }

    #[test]
    fn rejects_unknown_shapes() {
        assert_eq!(classify("/"), None);
        assert_eq!(classify(""), None);
        assert_eq!(classify("/health"), None);
        assert_eq!(classify(&format!("/artifact/{HASH}/extra")), None);
    }

    #[test]
    fn resource_id_has_no_leading_slash() {
        let r = classify(&format!("/artifact/{HASH}")).unwrap();
        assert_eq!(r.id(), format!("artifact/{HASH}"));
    }
}
