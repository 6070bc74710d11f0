//! Kubernetes API access for the clone controller.
//!
//! The reconciler talks to the cluster only through the [`ClusterApi`] trait,
//! so it can run against a real API server ([`KubeClusterApi`]) or an
//! in-memory cluster in tests.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::{debug, info, warn};

use volclone_core::NamespacedName;

use crate::{CloneError, Result};

/// Cluster operations needed by the clone reconciler.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch a claim, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    async fn get_claim(&self, key: &NamespacedName) -> Result<Option<PersistentVolumeClaim>>;

    /// Replace a claim, conditioned on the resource version it was read at.
    ///
    /// # Errors
    ///
    /// Returns [`CloneError::Conflict`] if the claim changed since it was read.
    async fn replace_claim(&self, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim>;

    /// Find the single pod in `namespace` matching `selector`.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails or more than one pod matches.
    async fn find_pod(&self, namespace: &str, selector: &str) -> Result<Option<Pod>>;

    /// Find the single pod in any namespace matching `selector`.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails or more than one pod matches.
    async fn find_pod_any_namespace(&self, selector: &str) -> Result<Option<Pod>>;

    /// Create a pod. If a pod of that name already exists it is returned instead.
    ///
    /// # Errors
    ///
    /// Returns an error if creation fails for any other reason.
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod>;

    /// Delete a pod. A pod that is already gone is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if deletion fails (except 404).
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;
}

/// [`ClusterApi`] backed by a Kubernetes client.
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Create a cluster API over an existing client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn claims_api(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods_api(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Scope reported when a lookup spans every namespace.
const ALL_NAMESPACES: &str = "all namespaces";

fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == code)
}

fn single_match(mut pods: Vec<Pod>, scope: &str, selector: &str) -> Result<Option<Pod>> {
    match pods.len() {
        0 | 1 => Ok(pods.pop()),
        n => {
            warn!(scope, selector, count = n, "Multiple pods match clone-source selector");
            Err(CloneError::MultipleSourcePods {
                scope: scope.to_string(),
                selector: selector.to_string(),
            })
        }
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_claim(&self, key: &NamespacedName) -> Result<Option<PersistentVolumeClaim>> {
        Ok(self.claims_api(&key.namespace).get_opt(&key.name).await?)
    }

    async fn replace_claim(&self, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
        let namespace = claim
            .namespace()
            .ok_or_else(|| CloneError::InvalidObject("claim has no namespace".to_string()))?;
        let name = claim.name_any();

        match self
            .claims_api(&namespace)
            .replace(&name, &PostParams::default(), claim)
            .await
        {
            Ok(updated) => Ok(updated),
            Err(e) if is_status(&e, 409) => Err(CloneError::Conflict(format!("{namespace}/{name}"))),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_pod(&self, namespace: &str, selector: &str) -> Result<Option<Pod>> {
        let params = ListParams::default().labels(selector);
        let pods = self.pods_api(namespace).list(&params).await?.items;
        single_match(pods, namespace, selector)
    }

    async fn find_pod_any_namespace(&self, selector: &str) -> Result<Option<Pod>> {
        let params = ListParams::default().labels(selector);
        let pods = Api::<Pod>::all(self.client.clone()).list(&params).await?.items;
        single_match(pods, ALL_NAMESPACES, selector)
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        let pods = self.pods_api(namespace);

        match pods.create(&PostParams::default(), pod).await {
            Ok(created) => Ok(created),
            Err(e) if is_status(&e, 409) => {
                let name = pod.name_any();
                debug!(namespace, pod_name = %name, "Pod already exists, using existing pod");
                Ok(pods.get(&name).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .pods_api(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                info!(namespace, pod_name = name, "Deleted pod");
                Ok(())
            }
            Err(e) if is_status(&e, 404) => {
                debug!(namespace, pod_name = name, "Pod not found, already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// An in-memory cluster for testing without a real API server.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, HashMap};

    /// A mock cluster that stores claims and pods in memory.
    ///
    /// Claim replacement honours resource versions the way the API server
    /// does, and every successful write is counted so tests can assert that
    /// a reconciliation made no writes.
    #[derive(Default)]
    pub struct MockClusterApi {
        state: Mutex<MockState>,
    }

    #[derive(Default)]
    struct MockState {
        claims: HashMap<NamespacedName, PersistentVolumeClaim>,
        pods: BTreeMap<NamespacedName, Pod>,
        next_version: u64,
        claim_writes: usize,
        pod_creates: usize,
        pod_deletes: usize,
        fail_next_create: bool,
    }

    impl MockState {
        fn bump_version(&mut self) -> String {
            self.next_version += 1;
            self.next_version.to_string()
        }
    }

    fn key_of<K: ResourceExt>(obj: &K) -> NamespacedName {
        NamespacedName::new(obj.namespace().unwrap_or_default(), obj.name_any())
    }

    fn matches_selector(pod: &Pod, selector: &str) -> bool {
        let labels = pod.labels();
        selector
            .split(',')
            .filter(|s| !s.is_empty())
            .all(|term| match term.split_once('=') {
                Some((k, v)) => labels.get(k).is_some_and(|l| l == v),
                None => labels.contains_key(term),
            })
    }

    impl MockClusterApi {
        /// Create an empty mock cluster.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Store a claim as if created through the API, assigning a resource version.
        pub fn insert_claim(&self, mut claim: PersistentVolumeClaim) {
            let mut state = self.state.lock();
            claim.metadata.resource_version = Some(state.bump_version());
            state.claims.insert(key_of(&claim), claim);
        }

        /// Current stored copy of a claim.
        #[must_use]
        pub fn claim(&self, key: &NamespacedName) -> Option<PersistentVolumeClaim> {
            self.state.lock().claims.get(key).cloned()
        }

        /// All stored pods.
        #[must_use]
        pub fn pods(&self) -> Vec<Pod> {
            self.state.lock().pods.values().cloned().collect()
        }

        /// Number of stored pods.
        #[must_use]
        pub fn pod_count(&self) -> usize {
            self.state.lock().pods.len()
        }

        /// Number of successful claim replacements.
        #[must_use]
        pub fn claim_writes(&self) -> usize {
            self.state.lock().claim_writes
        }

        /// Number of pods actually created.
        #[must_use]
        pub fn pod_creates(&self) -> usize {
            self.state.lock().pod_creates
        }

        /// Number of pods actually deleted.
        #[must_use]
        pub fn pod_deletes(&self) -> usize {
            self.state.lock().pod_deletes
        }

        /// Total successful writes of any kind.
        #[must_use]
        pub fn total_writes(&self) -> usize {
            let state = self.state.lock();
            state.claim_writes + state.pod_creates + state.pod_deletes
        }

        /// Make the next `create_pod` call fail with a server error.
        pub fn fail_next_create(&self) {
            self.state.lock().fail_next_create = true;
        }

        fn select(&self, selector: &str, namespace: Option<&str>) -> Vec<Pod> {
            self.state
                .lock()
                .pods
                .iter()
                .filter(|(key, pod)| {
                    namespace.is_none_or(|ns| key.namespace == ns) && matches_selector(pod, selector)
                })
                .map(|(_, pod)| pod.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ClusterApi for MockClusterApi {
        async fn get_claim(&self, key: &NamespacedName) -> Result<Option<PersistentVolumeClaim>> {
            Ok(self.state.lock().claims.get(key).cloned())
        }

        async fn replace_claim(
            &self,
            claim: &PersistentVolumeClaim,
        ) -> Result<PersistentVolumeClaim> {
            let mut state = self.state.lock();
            let key = key_of(claim);

            let Some(stored) = state.claims.get(&key) else {
                return Err(CloneError::InvalidObject(format!("claim {key} not found")));
            };
            if stored.metadata.resource_version != claim.metadata.resource_version {
                return Err(CloneError::Conflict(key.to_string()));
            }

            let mut updated = claim.clone();
            updated.metadata.resource_version = Some(state.bump_version());
            state.claim_writes += 1;

            // A deleting claim disappears once its last finalizer is gone
            let released = updated.metadata.deletion_timestamp.is_some()
                && updated.finalizers().is_empty();
            if released {
                state.claims.remove(&key);
            } else {
                state.claims.insert(key, updated.clone());
            }
            Ok(updated)
        }

        async fn find_pod(&self, namespace: &str, selector: &str) -> Result<Option<Pod>> {
            let found = self.select(selector, Some(namespace));
            single_match(found, namespace, selector)
        }

        async fn find_pod_any_namespace(&self, selector: &str) -> Result<Option<Pod>> {
            let found = self.select(selector, None);
            single_match(found, ALL_NAMESPACES, selector)
        }

        async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
            let mut state = self.state.lock();
            if std::mem::take(&mut state.fail_next_create) {
                return Err(CloneError::Conflict(format!(
                    "{namespace}/{}: injected failure",
                    pod.name_any()
                )));
            }

            let key = NamespacedName::new(namespace, pod.name_any());
            if let Some(existing) = state.pods.get(&key) {
                return Ok(existing.clone());
            }

            let mut created = pod.clone();
            created.metadata.namespace = Some(namespace.to_string());
            created.metadata.resource_version = Some(state.bump_version());
            state.pods.insert(key, created.clone());
            state.pod_creates += 1;
            Ok(created)
        }

        async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
            let mut state = self.state.lock();
            if state
                .pods
                .remove(&NamespacedName::new(namespace, name))
                .is_some()
            {
                state.pod_deletes += 1;
            }
            Ok(())
        }
    }
}
