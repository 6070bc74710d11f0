//! Clone-authorization payload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use volclone_core::NamespacedName;

/// Resource name of persistent volume claims in the core API group.
pub const PVC_RESOURCE: &str = "persistentvolumeclaims";

/// Payload parameter naming the target claim.
pub const PARAM_TARGET_NAME: &str = "targetName";

/// Payload parameter naming the target claim's namespace.
pub const PARAM_TARGET_NAMESPACE: &str = "targetNamespace";

/// Operation a token authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Clone data out of the source resource.
    Clone,
    /// Upload data into the resource.
    Upload,
}

/// Kubernetes group/version/resource triple.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupVersionResource {
    /// API group, empty for the core group.
    #[serde(default)]
    pub group: String,
    /// API version.
    #[serde(default)]
    pub version: String,
    /// Plural resource name.
    pub resource: String,
}

impl GroupVersionResource {
    /// The core `v1` persistent volume claim resource.
    #[must_use]
    pub fn persistent_volume_claims() -> Self {
        Self {
            group: String::new(),
            version: "v1".to_string(),
            resource: PVC_RESOURCE.to_string(),
        }
    }
}

/// The authorization data bound into a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Authorized operation.
    pub operation: Operation,
    /// Name of the source object.
    pub name: String,
    /// Namespace of the source object.
    pub namespace: String,
    /// Kind of the source object.
    pub resource: GroupVersionResource,
    /// Operation-specific parameters.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl Payload {
    /// Build a payload authorizing a clone of `source` into `target`.
    #[must_use]
    pub fn clone_request(source: &NamespacedName, target: &NamespacedName) -> Self {
        let mut params = BTreeMap::new();
        params.insert(PARAM_TARGET_NAMESPACE.to_string(), target.namespace.clone());
        params.insert(PARAM_TARGET_NAME.to_string(), target.name.clone());

        Self {
            operation: Operation::Clone,
            name: source.name.clone(),
            namespace: source.namespace.clone(),
            resource: GroupVersionResource::persistent_volume_claims(),
            params,
        }
    }

    /// Source identity named by the payload.
    #[must_use]
    pub fn source(&self) -> NamespacedName {
        NamespacedName::new(&self.namespace, &self.name)
    }

    /// Target identity named by the payload parameters, if both are set.
    #[must_use]
    pub fn target(&self) -> Option<NamespacedName> {
        let namespace = self.params.get(PARAM_TARGET_NAMESPACE)?;
        let name = self.params.get(PARAM_TARGET_NAME)?;
        Some(NamespacedName::new(namespace, name))
    }
}
