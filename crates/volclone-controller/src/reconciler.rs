//! The clone reconciler.
//!
//! [`CloneReconciler::reconcile`] is level-triggered: it reads the current
//! persisted state, derives one [`CloneState`] from it and performs that
//! state's action. Re-running it against unchanged state performs no writes.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::ResourceExt;
use tracing::{debug, info, warn};

use volclone_core::annotations::{
    self, set_annotation, ANN_CLONE_OF, CLONE_SOURCE_POD_FINALIZER,
};
use volclone_core::NamespacedName;
use volclone_token::TokenValidator;

use crate::certs::{CaBundleFetcher, ClientCertGenerator};
use crate::events::{reasons, EventKind, EventSink, CLONE_SUCCEEDED_MESSAGE};
use crate::k8s::ClusterApi;
use crate::pod::{build_source_pod, source_pod_selector};
use crate::state::{derive_state, has_finalizer, ClaimSnapshot, CloneState};
use crate::types::ControllerConfig;
use crate::{CloneError, Result};

/// External services the reconciler depends on.
#[derive(Clone)]
pub struct Collaborators {
    /// Cluster API access.
    pub cluster: Arc<dyn ClusterApi>,
    /// Clone token verification.
    pub validator: Arc<dyn TokenValidator>,
    /// Client certificates for clone-source pods.
    pub certs: Arc<dyn ClientCertGenerator>,
    /// CA bundle trusted for upload servers.
    pub ca_bundle: Arc<dyn CaBundleFetcher>,
    /// Event recording.
    pub events: Arc<dyn EventSink>,
}

/// Drives target claims from "clone requested" to "clone complete".
#[derive(Clone)]
pub struct CloneReconciler {
    collab: Collaborators,
    config: ControllerConfig,
}

impl CloneReconciler {
    /// Create a reconciler.
    #[must_use]
    pub fn new(collab: Collaborators, config: ControllerConfig) -> Self {
        Self { collab, config }
    }

    /// Reconcile the target claim `key`.
    ///
    /// Returns how long to wait before reconciling again, or `None` to wait
    /// for the next change to the claim or its clone-source pod.
    ///
    /// # Errors
    ///
    /// Returns an error for claims that cannot progress until corrected
    /// (bad annotations, volume mode mismatch, failed authorization) and for
    /// failed API calls. No writes are made before a failure is detected.
    pub async fn reconcile(&self, key: &NamespacedName) -> Result<Option<Duration>> {
        let snapshot = self.snapshot(key).await?;
        let state = derive_state(&snapshot, self.collab.validator.as_ref());
        debug!(claim = %key, state = state.name(), "Derived clone state");

        match (state, snapshot.target) {
            (CloneState::Completing, Some(target)) => {
                self.complete(key, target, snapshot.workload).await?;
            }
            (CloneState::Finalizing, Some(target)) => {
                self.finalize(key, target, snapshot.workload).await?;
            }
            (
                CloneState::Launching {
                    source: source_key,
                    client_name,
                },
                Some(target),
            ) => {
                let source = snapshot
                    .source
                    .ok_or_else(|| CloneError::SourceClaimNotFound(source_key.clone()))?;
                self.launch(key, target, &source, &client_name).await?;
            }
            (state, target) => {
                if let Some(err) = state.error() {
                    warn!(claim = %key, state = state.name(), error = %err, "Clone cannot proceed");
                    if let Some(target) = &target {
                        self.collab
                            .events
                            .record(target, EventKind::Warning, reasons::CLONE_FAILED, &err.to_string())
                            .await;
                    }
                    return Err(err);
                }
            }
        }

        Ok(None)
    }

    /// Find the clone-source pod belonging to `target`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails or more than one pod matches.
    pub async fn find_clone_source_pod(&self, target: &PersistentVolumeClaim) -> Result<Option<Pod>> {
        let Some(source_key) = target
            .metadata
            .annotations
            .as_ref()
            .and_then(annotations::parse_clone_request)
        else {
            return Ok(None);
        };
        let target_key = NamespacedName::new(target.namespace().unwrap_or_default(), target.name_any());

        self.collab
            .cluster
            .find_pod(&source_key.namespace, &source_pod_selector(&target_key))
            .await
    }

    async fn snapshot(&self, key: &NamespacedName) -> Result<ClaimSnapshot> {
        let Some(target) = self.collab.cluster.get_claim(key).await? else {
            return Ok(ClaimSnapshot::default());
        };

        if target.metadata.deletion_timestamp.is_some() {
            // The clone request may have changed since launch, so the pod is
            // found through its unique label alone
            let workload = if has_finalizer(&target) {
                self.collab
                    .cluster
                    .find_pod_any_namespace(&source_pod_selector(key))
                    .await?
            } else {
                None
            };
            return Ok(ClaimSnapshot {
                target: Some(target),
                source: None,
                workload,
            });
        }

        let anns = target.metadata.annotations.as_ref();
        let finished = anns.is_some_and(annotations::is_complete);
        let source_key = anns.and_then(annotations::parse_clone_request);

        let (source, workload) = match source_key {
            Some(source_key) if !finished => (
                self.collab.cluster.get_claim(&source_key).await?,
                self.find_clone_source_pod(&target).await?,
            ),
            _ => (None, None),
        };

        Ok(ClaimSnapshot {
            target: Some(target),
            source,
            workload,
        })
    }

    async fn launch(
        &self,
        key: &NamespacedName,
        target: PersistentVolumeClaim,
        source: &PersistentVolumeClaim,
        client_name: &str,
    ) -> Result<()> {
        let cert = self
            .collab
            .certs
            .make_client_cert(client_name, &[], self.config.client_cert_duration())
            .await?;
        let ca_bundle = self.collab.ca_bundle.bundle().await?;
        let pod = build_source_pod(&target, source, &cert, &ca_bundle, &self.config)?;
        let namespace = source
            .namespace()
            .ok_or_else(|| CloneError::InvalidObject("source claim has no namespace".to_string()))?;

        // The finalizer must be persisted before the pod exists
        let target = if has_finalizer(&target) {
            target
        } else {
            let mut updated = target;
            updated
                .finalizers_mut()
                .push(CLONE_SOURCE_POD_FINALIZER.to_string());
            self.collab.cluster.replace_claim(&updated).await?
        };

        let created = self.collab.cluster.create_pod(&namespace, &pod).await?;
        info!(
            claim = %key,
            namespace = %namespace,
            pod_name = %created.name_any(),
            "Created clone-source pod"
        );
        self.collab
            .events
            .record(
                &target,
                EventKind::Normal,
                reasons::CLONE_SOURCE_CREATED,
                &format!("Created clone-source pod {namespace}/{}", created.name_any()),
            )
            .await;

        Ok(())
    }

    async fn complete(
        &self,
        key: &NamespacedName,
        target: PersistentVolumeClaim,
        workload: Option<Pod>,
    ) -> Result<()> {
        let workload = match workload {
            Some(pod) => Some(pod),
            None => {
                self.collab
                    .cluster
                    .find_pod_any_namespace(&source_pod_selector(key))
                    .await?
            }
        };
        self.delete_workload(key, workload.as_ref()).await?;

        let mut updated = target;
        set_annotation(updated.annotations_mut(), ANN_CLONE_OF, "true");
        remove_finalizer(&mut updated);
        let updated = self.collab.cluster.replace_claim(&updated).await?;

        info!(claim = %key, "Clone complete");
        self.collab
            .events
            .record(
                &updated,
                EventKind::Normal,
                reasons::CLONE_SUCCEEDED,
                CLONE_SUCCEEDED_MESSAGE,
            )
            .await;

        Ok(())
    }

    async fn finalize(
        &self,
        key: &NamespacedName,
        target: PersistentVolumeClaim,
        workload: Option<Pod>,
    ) -> Result<()> {
        self.delete_workload(key, workload.as_ref()).await?;

        let mut updated = target;
        remove_finalizer(&mut updated);
        self.collab.cluster.replace_claim(&updated).await?;

        info!(claim = %key, "Removed clone finalizer from deleted claim");
        Ok(())
    }

    async fn delete_workload(&self, key: &NamespacedName, workload: Option<&Pod>) -> Result<()> {
        let Some(pod) = workload else {
            return Ok(());
        };
        let namespace = pod
            .namespace()
            .ok_or_else(|| CloneError::InvalidObject("clone-source pod has no namespace".to_string()))?;

        self.collab
            .cluster
            .delete_pod(&namespace, &pod.name_any())
            .await?;
        debug!(claim = %key, pod_name = %pod.name_any(), "Deleted clone-source pod");
        Ok(())
    }
}

fn remove_finalizer(claim: &mut PersistentVolumeClaim) {
    claim
        .finalizers_mut()
        .retain(|f| f != CLONE_SOURCE_POD_FINALIZER);
}
