//! Core types and utilities for volclone.
//!
//! This crate provides the foundational pieces shared by the token codec and
//! the clone controller:
//!
//! - **Annotations**: the keys carried on a target volume claim and the pure
//!   readers that turn them into clone state
//! - **Identifiers**: namespaced names and the collision-resistant identity of
//!   a clone-source pod
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use volclone_core::{annotations, CloneSourceId, NamespacedName};
//!
//! let mut anns = BTreeMap::new();
//! annotations::set_annotation(&mut anns, annotations::ANN_CLONE_REQUEST, "default/golden");
//!
//! let source = annotations::parse_clone_request(&anns).unwrap();
//! assert_eq!(source, NamespacedName::new("default", "golden"));
//!
//! let target = NamespacedName::new("default", "copy");
//! let id = CloneSourceId::for_target(&target);
//! assert!(id.pod_name().starts_with("volclone-source-"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod annotations;
pub mod ids;

pub use annotations::{Annotations, AnnotationError};
pub use ids::{CloneSourceId, NamespacedName};
