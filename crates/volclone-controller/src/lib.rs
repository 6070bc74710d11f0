//! Kubernetes clone controller for volclone.
//!
//! The controller clones a source persistent volume claim into a newly
//! requested target claim. It launches a clone-source pod next to the source
//! claim once the target is ready and a signed clone token authorizes the
//! pair, and marks the target complete once the pod reports success.
//!
//! All progress is derived from persisted state on every reconciliation:
//!
//! - annotations on the target claim (`clone-request`, `pod-ready`,
//!   `clone-token`, `upload-client-name`, `pod-phase`, `clone-of`)
//! - the existence of the clone-source pod, found by label
//! - the `volclone.io/clone-source-pod` finalizer on the target claim
//!
//! # Architecture
//!
//! ```text
//!   watch events (claims, clone-source pods)
//!                   │
//!                   ▼
//!   ┌──────────────────────────────────────┐
//!   │            CloneReconciler            │
//!   │  snapshot ─► derive_state ─► action   │
//!   └──────────────────────────────────────┘
//!      │            │            │        │
//!      ▼            ▼            ▼        ▼
//!  ClusterApi  TokenValidator  Certs   EventSink
//! ```
//!
//! # Testing
//!
//! Enable the `test-utils` feature for `k8s::mock::MockClusterApi` and
//! `volclone_token::MockTokenValidator`, then pair them with
//! [`StaticCertGenerator`], [`MemCaBundle`] and [`MemoryEventSink`]:
//!
//! ```ignore
//! use std::sync::Arc;
//! use volclone_controller::k8s::mock::MockClusterApi;
//! use volclone_controller::{
//!     CloneReconciler, Collaborators, ControllerConfig, MemCaBundle, MemoryEventSink,
//!     StaticCertGenerator,
//! };
//!
//! let reconciler = CloneReconciler::new(
//!     Collaborators {
//!         cluster: Arc::new(MockClusterApi::new()),
//!         validator: Arc::new(validator),
//!         certs: Arc::new(StaticCertGenerator::new("cert", "key")),
//!         ca_bundle: Arc::new(MemCaBundle::new("ca")),
//!         events: Arc::new(MemoryEventSink::new()),
//!     },
//!     ControllerConfig::default(),
//! );
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod certs;
pub mod controller;
pub mod error;
pub mod events;
pub mod k8s;
pub mod pod;
pub mod reconciler;
pub mod state;
pub mod types;

pub use certs::{
    CaBundleFetcher, CaCertGenerator, ClientCert, ClientCertGenerator, FileCaBundle,
    MemCaBundle, StaticCertGenerator,
};
pub use error::{CloneError, Result};
pub use events::{EventKind, EventSink, KubeEventSink, MemoryEventSink};
pub use k8s::{ClusterApi, KubeClusterApi};
pub use reconciler::{CloneReconciler, Collaborators};
pub use state::{derive_state, ClaimSnapshot, CloneState};
pub use types::{ControllerConfig, TokenKeyType, VolumeMode};
