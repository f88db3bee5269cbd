//! Shared block-storage class

use std::collections::BTreeMap;

use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::info;

use keel_common::naming::node_id;
use keel_common::{NodeId, ResourceGraph, ResourceNode, Result};

use crate::config::StorageConfig;

/// Provisioner of the block-storage CSI driver
pub const BLOCK_STORAGE_PROVISIONER: &str = "ebs.csi.aws.com";

/// Annotation marking the cluster default class
pub const DEFAULT_CLASS_ANNOTATION: &str = "storageclass.kubernetes.io/is-default-class";

/// Engine type of the storage class node
pub const STORAGE_CLASS_TYPE: &str = "kubernetes_storage_class";

/// Typed storage class for the configured volume settings
pub fn storage_class(config: &StorageConfig) -> StorageClass {
    let mut annotations = BTreeMap::new();
    if config.default_class {
        annotations.insert(DEFAULT_CLASS_ANNOTATION.to_string(), "true".to_string());
    }
    let parameters = BTreeMap::from([
        ("type".to_string(), config.volume_type.clone()),
        ("encrypted".to_string(), "true".to_string()),
        ("fsType".to_string(), "ext4".to_string()),
        ("iops".to_string(), config.iops.to_string()),
        ("throughput".to_string(), config.throughput.to_string()),
    ]);
    StorageClass {
        metadata: ObjectMeta {
            name: Some(config.class_name.clone()),
            annotations: (!annotations.is_empty()).then_some(annotations),
            ..Default::default()
        },
        provisioner: BLOCK_STORAGE_PROVISIONER.to_string(),
        parameters: Some(parameters),
        reclaim_policy: Some("Delete".to_string()),
        volume_binding_mode: Some("Immediate".to_string()),
        allow_volume_expansion: Some(true),
        ..Default::default()
    }
}

/// Declare the storage class; it waits for the CSI add-on that serves it
pub fn declare_storage_class(
    graph: &mut ResourceGraph,
    provider: &str,
    config: &StorageConfig,
    csi_addon: &str,
) -> Result<NodeId> {
    let manifest = serde_json::to_value(storage_class(config))?;
    let id = graph.add_node(
        ResourceNode::resource(node_id(&[&config.class_name]), STORAGE_CLASS_TYPE)
            .with_provider(provider)
            .with_attr("manifest", manifest),
    )?;
    graph.add_edge(&id, csi_addon)?;
    info!(
        class = %config.class_name,
        volume_type = %config.volume_type,
        default = config.default_class,
        "declared storage class"
    );
    Ok(id)
}
