//! Identifier types for volclone.
//!
//! This module provides the namespaced name used to address claims and the
//! identity of the clone-source pod launched for a target claim.

use std::fmt;

/// Domain-separation context for deriving clone-source identities.
const CLONE_SOURCE_CONTEXT: &str = "volclone clone-source-id v1";

/// Number of hex characters carried in the pod lookup label.
const LABEL_HEX_LEN: usize = 32;

/// Number of hex characters appended to the pod name.
const POD_NAME_HEX_LEN: usize = 16;

/// Prefix of every clone-source pod name.
pub const SOURCE_POD_PREFIX: &str = "volclone-source";

/// A namespace-scoped object name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespacedName {
    /// Namespace the object lives in.
    pub namespace: String,
    /// Name of the object within the namespace.
    pub name: String,
}

impl NamespacedName {
    /// Create a new namespaced name.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse `"<namespace>/<name>"`.
    ///
    /// Returns `None` unless the value has exactly two non-empty segments.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(namespace), Some(name), None) if !namespace.is_empty() && !name.is_empty() => {
                Some(Self::new(namespace, name))
            }
            _ => None,
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A 32-byte identity for the clone-source pod of a target claim.
///
/// The identity is a keyed blake3 hash over the length-prefixed namespace and
/// name of the target claim, so pairs whose plain concatenation is equal
/// (`default`/`testPvc1` and `vc1default`/`testP`) still map to different
/// identities.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloneSourceId([u8; 32]);

impl CloneSourceId {
    /// Derive the identity for the clone-source pod of `target`.
    #[must_use]
    pub fn for_target(target: &NamespacedName) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(CLONE_SOURCE_CONTEXT);
        for part in [&target.namespace, &target.name] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Return the hex-encoded string representation.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Value of the lookup label carried by the clone-source pod.
    ///
    /// Truncated to stay well inside the 63 character label value limit.
    #[must_use]
    pub fn label_value(&self) -> String {
        self.to_hex()[..LABEL_HEX_LEN].to_string()
    }

    /// Deterministic name of the clone-source pod.
    #[must_use]
    pub fn pod_name(&self) -> String {
        format!("{SOURCE_POD_PREFIX}-{}", &self.to_hex()[..POD_NAME_HEX_LEN])
    }
}

impl fmt::Debug for CloneSourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CloneSourceId({})", self.to_hex())
    }
}

impl fmt::Display for CloneSourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn id(namespace: &str, name: &str) -> CloneSourceId {
        CloneSourceId::for_target(&NamespacedName::new(namespace, name))
    }

    #[test]
    fn identity_is_deterministic() {
        assert_eq!(id("default", "testPvc1"), id("default", "testPvc1"));
        assert_eq!(
            id("default", "testPvc1").label_value(),
            id("default", "testPvc1").label_value()
        );
    }

    #[test]
    fn identity_is_unique_per_target() {
        let labels: HashSet<String> = [
            id("default", "testPvc1"),
            id("default2", "testPvc1"),
            id("default", "testPvc2"),
            id("vc1default", "testP"),
        ]
        .iter()
        .map(CloneSourceId::label_value)
        .collect();

        assert_eq!(labels.len(), 4);
    }

    #[test]
    fn concatenation_collisions_are_separated() {
        // "ab" + "c" and "a" + "bc" concatenate to the same string
        assert_ne!(id("ab", "c"), id("a", "bc"));
        assert_ne!(id("", "abc"), id("abc", ""));
    }

    #[test]
    fn label_and_pod_name_shape() {
        let source_id = id("default", "testPvc1");
        assert_eq!(source_id.label_value().len(), 32);

        let name = source_id.pod_name();
        assert!(name.starts_with("volclone-source-"));
        assert_eq!(name.len(), SOURCE_POD_PREFIX.len() + 1 + 16);
    }

    #[test]
    fn label_is_prefix_of_hex_form() {
        let source_id = id("default", "testPvc1");
        let hex = source_id.to_string();
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with(&source_id.label_value()));
        assert!(source_id.pod_name().ends_with(&hex[..16]));
    }

    #[test]
    fn namespaced_name_display() {
        assert_eq!(NamespacedName::new("ns", "pvc").to_string(), "ns/pvc");
    }

    #[test]
    fn namespaced_name_parse() {
        assert_eq!(
            NamespacedName::parse("ns/pvc"),
            Some(NamespacedName::new("ns", "pvc"))
        );
        for bad in ["", "ns", "ns/", "/pvc", "a/b/c", "/"] {
            assert_eq!(NamespacedName::parse(bad), None, "{bad:?}");
        }
    }
}
