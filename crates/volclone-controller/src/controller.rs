//! Watch wiring for the clone reconciler.
//!
//! Target claims are watched directly. Clone-source pods are watched too and
//! mapped back to their target claim through the `owned-by` annotation, so a
//! pod finishing or disappearing re-triggers reconciliation of its target.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, error, info, warn};

use volclone_core::annotations::ANN_OWNED_BY;
use volclone_core::NamespacedName;

use crate::pod::LABEL_COMPONENT;
use crate::reconciler::CloneReconciler;
use crate::{CloneError, Result};

/// Requeue delay after an error that may clear on its own.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Requeue delay after an error that needs the claim to be corrected.
const FATAL_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Shared state handed to every reconciliation.
pub struct Context {
    reconciler: CloneReconciler,
}

impl Context {
    /// Wrap a reconciler.
    #[must_use]
    pub fn new(reconciler: CloneReconciler) -> Self {
        Self { reconciler }
    }
}

/// Reconcile one claim delivered by the controller runtime.
///
/// # Errors
///
/// Propagates the reconciler's error.
pub async fn reconcile(claim: Arc<PersistentVolumeClaim>, ctx: Arc<Context>) -> Result<Action> {
    let key = NamespacedName::new(claim.namespace().unwrap_or_default(), claim.name_any());
    Ok(match ctx.reconciler.reconcile(&key).await? {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    })
}

/// Decide when to retry a failed reconciliation.
#[must_use]
pub fn error_policy(claim: Arc<PersistentVolumeClaim>, error: &CloneError, _ctx: Arc<Context>) -> Action {
    error!(
        %error,
        claim = %claim.name_any(),
        namespace = claim.namespace().unwrap_or_default(),
        retriable = error.is_retriable(),
        "Clone reconciliation failed"
    );
    if error.is_retriable() {
        Action::requeue(RETRY_DELAY)
    } else {
        Action::requeue(FATAL_RETRY_DELAY)
    }
}

/// The target claim a clone-source pod works for.
#[must_use]
pub fn owning_claim(pod: &Pod) -> Option<ObjectRef<PersistentVolumeClaim>> {
    let owner = NamespacedName::parse(pod.annotations().get(ANN_OWNED_BY)?)?;
    Some(ObjectRef::new(&owner.name).within(&owner.namespace))
}

/// Run the clone controller until a shutdown signal arrives.
///
/// Claims are watched in `namespace` when given, otherwise cluster-wide.
/// Clone-source pods live in source namespaces and are always watched
/// cluster-wide.
pub async fn run(client: Client, reconciler: CloneReconciler, namespace: Option<&str>) {
    let claims: Api<PersistentVolumeClaim> = match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    let pods: Api<Pod> = Api::all(client);
    let pod_watch = WatcherConfig::default().labels(&format!("{LABEL_COMPONENT}=clone-source"));

    info!(namespace = namespace.unwrap_or("<all>"), "Starting clone controller");

    Controller::new(claims, WatcherConfig::default())
        .watches(pods, pod_watch, |pod: Pod| owning_claim(&pod))
        .shutdown_on_signal()
        .run(reconcile, error_policy, Arc::new(Context::new(reconciler)))
        .for_each(|result| {
            match result {
                Ok((claim, action)) => debug!(claim = %claim, ?action, "Reconciled claim"),
                Err(e) => warn!(error = %e, "Controller dispatch error"),
            }
            std::future::ready(())
        })
        .await;

    info!("Clone controller stopped");
}
