//! Clone-source pod builder.
//!
//! The clone-source pod runs in the source claim's namespace, mounts the
//! source claim read-only and streams its contents to the upload server
//! fronting the target claim.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PersistentVolumeClaim, PersistentVolumeClaimVolumeSource,
    Pod, PodSpec, ResourceRequirements, SecurityContext, Volume, VolumeDevice, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ObjectMeta;
use kube::ResourceExt;

use volclone_core::annotations::{ANN_CREATED_BY, ANN_OWNED_BY};
use volclone_core::{CloneSourceId, NamespacedName};

use crate::certs::ClientCert;
use crate::events::CONTROLLER_NAME;
use crate::types::{ControllerConfig, VolumeMode};
use crate::{CloneError, Result};

/// Label carrying the clone-source identity of the target claim.
pub const LABEL_CLONE_UNIQUE_ID: &str = "volclone.io/clone-unique-id";

/// Label naming the volclone component a pod belongs to.
pub const LABEL_COMPONENT: &str = "volclone.io/component";

/// Container port of the cloner's metrics endpoint.
const METRICS_PORT: i32 = 8443;

const DATA_VOLUME_NAME: &str = "volclone-data-vol";
const FILESYSTEM_MOUNT_PATH: &str = "/var/run/volclone/clone/source";
const BLOCK_DEVICE_PATH: &str = "/dev/volclone-block-volume";

/// Label selector that finds the clone-source pod of `target`.
#[must_use]
pub fn source_pod_selector(target: &NamespacedName) -> String {
    format!(
        "{LABEL_CLONE_UNIQUE_ID}={}",
        CloneSourceId::for_target(target).label_value()
    )
}

/// URL of the upload server that receives the clone for `target`.
#[must_use]
pub fn upload_server_url(target: &NamespacedName) -> String {
    format!(
        "https://volclone-upload-{}.{}.svc/v1/upload-sync",
        target.name, target.namespace
    )
}

fn claim_key(claim: &PersistentVolumeClaim) -> Result<NamespacedName> {
    let namespace = claim
        .namespace()
        .ok_or_else(|| CloneError::InvalidObject(format!("claim {} has no namespace", claim.name_any())))?;
    Ok(NamespacedName::new(namespace, claim.name_any()))
}

/// Build the clone-source pod that copies `source` into `target`.
///
/// Volume handling follows the source claim's volume mode: a filesystem
/// claim is mounted, a block claim is attached as a raw device.
///
/// # Errors
///
/// Returns [`CloneError::InvalidObject`] if either claim lacks a namespace.
pub fn build_source_pod(
    target: &PersistentVolumeClaim,
    source: &PersistentVolumeClaim,
    cert: &ClientCert,
    ca_bundle: &[u8],
    config: &ControllerConfig,
) -> Result<Pod> {
    let target_key = claim_key(target)?;
    let source_key = claim_key(source)?;
    let id = CloneSourceId::for_target(&target_key);
    let mode = VolumeMode::of_claim(source);

    Ok(Pod {
        metadata: build_metadata(&id, &source_key, &target_key),
        spec: Some(build_pod_spec(
            &source_key,
            &target_key,
            target.uid().unwrap_or_default(),
            mode,
            cert,
            ca_bundle,
            config,
        )),
        ..Default::default()
    })
}

fn build_metadata(id: &CloneSourceId, source: &NamespacedName, target: &NamespacedName) -> ObjectMeta {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), "volclone".to_string());
    labels.insert(LABEL_COMPONENT.to_string(), "clone-source".to_string());
    labels.insert(LABEL_CLONE_UNIQUE_ID.to_string(), id.label_value());

    let mut annotations = BTreeMap::new();
    annotations.insert(ANN_CREATED_BY.to_string(), CONTROLLER_NAME.to_string());
    annotations.insert(ANN_OWNED_BY.to_string(), target.to_string());

    ObjectMeta {
        name: Some(id.pod_name()),
        namespace: Some(source.namespace.clone()),
        labels: Some(labels),
        annotations: Some(annotations),
        ..Default::default()
    }
}

fn build_pod_spec(
    source: &NamespacedName,
    target: &NamespacedName,
    owner_uid: String,
    mode: VolumeMode,
    cert: &ClientCert,
    ca_bundle: &[u8],
    config: &ControllerConfig,
) -> PodSpec {
    PodSpec {
        containers: vec![build_container(target, owner_uid, mode, cert, ca_bundle, config)],
        volumes: Some(vec![build_data_volume(source)]),
        restart_policy: Some("OnFailure".to_string()),
        ..Default::default()
    }
}

fn build_container(
    target: &NamespacedName,
    owner_uid: String,
    mode: VolumeMode,
    cert: &ClientCert,
    ca_bundle: &[u8],
    config: &ControllerConfig,
) -> Container {
    let mut container = Container {
        name: "clone-source".to_string(),
        image: Some(config.cloner_image.clone()),
        image_pull_policy: Some(config.pull_policy.clone()),
        ports: Some(vec![ContainerPort {
            container_port: METRICS_PORT,
            name: Some("metrics".to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(build_env_vars(target, owner_uid, mode, cert, ca_bundle)),
        resources: build_resources(config),
        ..Default::default()
    };

    match mode {
        VolumeMode::Filesystem => {
            container.volume_mounts = Some(vec![VolumeMount {
                name: DATA_VOLUME_NAME.to_string(),
                mount_path: FILESYSTEM_MOUNT_PATH.to_string(),
                ..Default::default()
            }]);
        }
        VolumeMode::Block => {
            container.volume_devices = Some(vec![VolumeDevice {
                name: DATA_VOLUME_NAME.to_string(),
                device_path: BLOCK_DEVICE_PATH.to_string(),
            }]);
            // Raw device access needs root
            container.security_context = Some(SecurityContext {
                run_as_user: Some(0),
                ..Default::default()
            });
        }
    }

    container
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn build_env_vars(
    target: &NamespacedName,
    owner_uid: String,
    mode: VolumeMode,
    cert: &ClientCert,
    ca_bundle: &[u8],
) -> Vec<EnvVar> {
    let mount_point = match mode {
        VolumeMode::Filesystem => FILESYSTEM_MOUNT_PATH,
        VolumeMode::Block => BLOCK_DEVICE_PATH,
    };

    vec![
        env("CLIENT_KEY", String::from_utf8_lossy(&cert.key)),
        env("CLIENT_CERT", String::from_utf8_lossy(&cert.cert)),
        env("SERVER_CA_CERT", String::from_utf8_lossy(ca_bundle)),
        env("UPLOAD_URL", upload_server_url(target)),
        env("OWNER_UID", owner_uid),
        env("VOLUME_MODE", mode.env_value()),
        env("MOUNT_POINT", mount_point),
    ]
}

fn build_data_volume(source: &NamespacedName) -> Volume {
    Volume {
        name: DATA_VOLUME_NAME.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: source.name.clone(),
            read_only: Some(true),
        }),
        ..Default::default()
    }
}

fn build_resources(config: &ControllerConfig) -> Option<ResourceRequirements> {
    let mut quantities = BTreeMap::new();
    if let Some(cpu) = &config.source_cpu {
        quantities.insert("cpu".to_string(), Quantity(cpu.clone()));
    }
    if let Some(memory) = &config.source_memory {
        quantities.insert("memory".to_string(), Quantity(memory.clone()));
    }
    if quantities.is_empty() {
        return None;
    }

    Some(ResourceRequirements {
        requests: Some(quantities.clone()),
        limits: Some(quantities),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PersistentVolumeClaimSpec;

    fn claim(namespace: &str, name: &str, mode: Option<&str>) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                uid: Some(format!("uid-{name}")),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                volume_mode: mode.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn cert() -> ClientCert {
        ClientCert {
            cert: b"foo".to_vec(),
            key: b"bar".to_vec(),
        }
    }

    fn env_value<'a>(pod: &'a Pod, name: &str) -> Option<&'a str> {
        pod.spec.as_ref()?.containers[0]
            .env
            .as_ref()?
            .iter()
            .find(|e| e.name == name)?
            .value
            .as_deref()
    }

    #[test]
    fn upload_url_names_target() {
        let target = NamespacedName::new("targetns", "target");
        assert_eq!(
            upload_server_url(&target),
            "https://volclone-upload-target.targetns.svc/v1/upload-sync"
        );
    }

    #[test]
    fn build_filesystem_pod() {
        let target = claim("targetns", "target", None);
        let source = claim("sourcens", "source", Some("Filesystem"));
        let config = ControllerConfig::default();

        let pod = build_source_pod(&target, &source, &cert(), b"ca", &config).unwrap();

        // Metadata
        let target_key = NamespacedName::new("targetns", "target");
        let id = CloneSourceId::for_target(&target_key);
        assert_eq!(pod.metadata.name.as_deref(), Some(id.pod_name().as_str()));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("sourcens"));
        let labels = pod.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get(LABEL_CLONE_UNIQUE_ID), Some(&id.label_value()));
        assert_eq!(labels.get("app").map(String::as_str), Some("volclone"));
        let annotations = pod.metadata.annotations.as_ref().unwrap();
        assert_eq!(
            annotations.get(ANN_OWNED_BY).map(String::as_str),
            Some("targetns/target")
        );

        // Spec
        let spec = pod.spec.as_ref().unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("OnFailure"));
        let volume = &spec.volumes.as_ref().unwrap()[0];
        let pvc = volume.persistent_volume_claim.as_ref().unwrap();
        assert_eq!(pvc.claim_name, "source");
        assert_eq!(pvc.read_only, Some(true));

        // Container
        let container = &spec.containers[0];
        assert_eq!(container.image.as_deref(), Some(config.cloner_image.as_str()));
        assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 8443);
        assert_eq!(
            container.volume_mounts.as_ref().unwrap()[0].mount_path,
            FILESYSTEM_MOUNT_PATH
        );
        assert!(container.volume_devices.is_none());
        assert!(container.security_context.is_none());
        assert!(container.resources.is_none());

        // Environment variables
        assert_eq!(env_value(&pod, "VOLUME_MODE"), Some("filesystem"));
        assert_eq!(env_value(&pod, "MOUNT_POINT"), Some(FILESYSTEM_MOUNT_PATH));
        assert_eq!(env_value(&pod, "CLIENT_CERT"), Some("foo"));
        assert_eq!(env_value(&pod, "CLIENT_KEY"), Some("bar"));
        assert_eq!(env_value(&pod, "SERVER_CA_CERT"), Some("ca"));
        assert_eq!(env_value(&pod, "OWNER_UID"), Some("uid-target"));
        assert_eq!(
            env_value(&pod, "UPLOAD_URL"),
            Some("https://volclone-upload-target.targetns.svc/v1/upload-sync")
        );
    }

    #[test]
    fn build_block_pod() {
        let target = claim("targetns", "target", Some("Block"));
        let source = claim("sourcens", "source", Some("Block"));

        let pod =
            build_source_pod(&target, &source, &cert(), b"ca", &ControllerConfig::default()).unwrap();
        let container = &pod.spec.as_ref().unwrap().containers[0];

        assert!(container.volume_mounts.is_none());
        let device = &container.volume_devices.as_ref().unwrap()[0];
        assert_eq!(device.device_path, BLOCK_DEVICE_PATH);
        assert_eq!(device.name, DATA_VOLUME_NAME);
        assert_eq!(
            container.security_context.as_ref().unwrap().run_as_user,
            Some(0)
        );
        assert_eq!(env_value(&pod, "VOLUME_MODE"), Some("block"));
        assert_eq!(env_value(&pod, "MOUNT_POINT"), Some(BLOCK_DEVICE_PATH));
    }

    #[test]
    fn build_pod_uses_configured_resources() {
        let config = ControllerConfig {
            source_cpu: Some("500m".to_string()),
            source_memory: Some("256Mi".to_string()),
            ..Default::default()
        };
        let pod = build_source_pod(
            &claim("t", "target", None),
            &claim("s", "source", None),
            &cert(),
            b"ca",
            &config,
        )
        .unwrap();

        let resources = pod.spec.as_ref().unwrap().containers[0]
            .resources
            .clone()
            .unwrap();
        let limits = resources.limits.unwrap();
        assert_eq!(limits.get("cpu"), Some(&Quantity("500m".to_string())));
        assert_eq!(limits.get("memory"), Some(&Quantity("256Mi".to_string())));
        assert_eq!(resources.requests.unwrap().len(), 2);
    }

    #[test]
    fn claim_without_namespace_is_rejected() {
        let mut target = claim("t", "target", None);
        target.metadata.namespace = None;
        let result = build_source_pod(
            &target,
            &claim("s", "source", None),
            &cert(),
            b"ca",
            &ControllerConfig::default(),
        );
        assert!(matches!(result, Err(CloneError::InvalidObject(_))));
    }

    #[test]
    fn selector_matches_pod_label() {
        let target = NamespacedName::new("targetns", "target");
        let selector = source_pod_selector(&target);
        let pod = build_source_pod(
            &claim("targetns", "target", None),
            &claim("s", "source", None),
            &cert(),
            b"ca",
            &ControllerConfig::default(),
        )
        .unwrap();
        let (key, value) = selector.split_once('=').unwrap();
        assert_eq!(pod.labels().get(key).map(String::as_str), Some(value));
    }
}
