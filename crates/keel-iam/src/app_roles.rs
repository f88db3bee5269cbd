//! Per-application identity roles
//!
//! Each [`AppIamConfig`] entry becomes one [`IdentityRoleSpec`]: a role named
//! `<cluster>-<namespace>-<app>-role`, declared at node `app-iam-<namespace>-<app>`,
//! trusted by the app's service account and carrying one inline policy per
//! grant kind.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use keel_common::naming::{build_graph_node_id, build_runtime_name};
use keel_common::{Error, Expr, Result};

use crate::role::{IdentityRoleSpec, ResourceGrant};

/// Prefix of every application role node id
pub const APP_ROLE_NODE_PREFIX: &str = "app-iam";

/// Name suffix of application roles
pub const APP_ROLE_SUFFIX: &str = "role";

/// One application's identity configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppIamConfig {
    /// Application name
    #[serde(default)]
    pub app_name: String,
    /// Namespace, `*` allowed for prefix patterns
    #[serde(default, alias = "namespace")]
    pub namespace_selector: String,
    /// Service account; defaults to the app name
    #[serde(default, alias = "serviceAccount", skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    /// Secrets Manager names/patterns or ARNs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets_access: Vec<String>,
    /// S3 bucket names or ARNs
    #[serde(default, alias = "s3Access", skip_serializing_if = "Vec::is_empty")]
    pub object_store_access: Vec<String>,
    /// SQS queue names or ARNs
    #[serde(default, alias = "sqsAccess", skip_serializing_if = "Vec::is_empty")]
    pub queue_access: Vec<String>,
    /// Complete policy documents attached verbatim
    #[serde(default, alias = "customPolicies", skip_serializing_if = "Vec::is_empty")]
    pub raw_policies: Vec<serde_json::Value>,
    /// Tags applied to the role
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// Clusters this app is deployed to; empty means every cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clusters: Vec<String>,
}

impl AppIamConfig {
    /// Config for an app in a namespace with no grants
    pub fn new(app_name: impl Into<String>, namespace_selector: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            namespace_selector: namespace_selector.into(),
            ..Default::default()
        }
    }

    /// Grants in declaration order: secrets, buckets, queues, raw documents
    pub fn grants(&self) -> Vec<ResourceGrant> {
        self.secrets_access
            .iter()
            .cloned()
            .map(ResourceGrant::SecretAccess)
            .chain(self.object_store_access.iter().cloned().map(ResourceGrant::ObjectStoreAccess))
            .chain(self.queue_access.iter().cloned().map(ResourceGrant::QueueAccess))
            .chain(self.raw_policies.iter().cloned().map(ResourceGrant::RawPolicy))
            .collect()
    }

    /// Whether this app is deployed to `cluster_name`
    pub fn targets_cluster(&self, cluster_name: &str) -> bool {
        self.clusters.is_empty() || self.clusters.iter().any(|c| c == cluster_name)
    }
}

/// Expands application configs into role specs
pub struct AppRoleRegistry;

impl AppRoleRegistry {
    /// Configs that apply to a cluster, in input order
    pub fn apps_for_cluster<'a>(
        cluster_name: &str,
        configs: &'a [AppIamConfig],
    ) -> Vec<&'a AppIamConfig> {
        let selected: Vec<_> = configs
            .iter()
            .filter(|c| c.targets_cluster(cluster_name))
            .collect();
        debug!(
            cluster = %cluster_name,
            selected = selected.len(),
            total = configs.len(),
            "selected application configs"
        );
        selected
    }

    /// One role spec per config, in input order
    ///
    /// Rejects empty app names or namespace selectors, a repeated app name,
    /// and two configs that derive the same role identity or would declare
    /// the same graph node.
    pub fn expand<'a>(
        cluster_name: &str,
        configs: impl IntoIterator<Item = &'a AppIamConfig>,
    ) -> Result<Vec<IdentityRoleSpec>> {
        let mut specs = Vec::new();
        let mut identities: HashMap<String, String> = HashMap::new();
        let mut namespaces: HashMap<String, String> = HashMap::new();
        let mut claimed: HashMap<String, String> = HashMap::new();

        for (index, config) in configs.into_iter().enumerate() {
            let app = config.app_name.trim();
            if app.is_empty() {
                return Err(Error::invalid_config_for_field(
                    format!("apps[{index}]"),
                    format!("apps[{index}].appName"),
                    "application name must not be empty",
                ));
            }
            let namespace = config.namespace_selector.trim();
            if namespace.is_empty() {
                return Err(Error::invalid_config_for_field(
                    app,
                    format!("apps[{index}].namespaceSelector"),
                    "namespace selector must not be empty",
                ));
            }

            let identity = build_graph_node_id(
                &[Expr::lit(namespace), Expr::lit(app)],
                None,
            )?;
            if let Some(other) = identities.get(&identity) {
                return Err(Error::invalid_config_for(
                    app,
                    format!("derives the same role identity '{identity}' as application '{other}'"),
                ));
            }
            identities.insert(identity.clone(), app.to_string());
            // the role ARN map output is keyed by app name
            if let Some(other) = namespaces.get(app) {
                return Err(Error::invalid_config_for(
                    app,
                    format!(
                        "application name is declared in namespaces '{other}' and '{namespace}'"
                    ),
                ));
            }
            namespaces.insert(app.to_string(), namespace.to_string());

            let mut spec = IdentityRoleSpec::new(
                app,
                namespace,
                build_runtime_name(&[
                    Expr::lit(cluster_name),
                    Expr::lit(namespace),
                    Expr::lit(app),
                    Expr::lit(APP_ROLE_SUFFIX),
                ]),
                format!("{APP_ROLE_NODE_PREFIX}-{identity}"),
            );
            spec.service_account_name = config
                .service_account_name
                .clone()
                .filter(|sa| !sa.trim().is_empty());
            spec.resource_grants = config.grants();
            spec.tags = config.tags.clone();

            for node in spec.claimed_node_ids() {
                if let Some(other) = claimed.get(&node) {
                    return Err(Error::invalid_config_for(
                        app,
                        format!("graph node '{node}' is already claimed by application '{other}'"),
                    ));
                }
                claimed.insert(node, app.to_string());
            }
            specs.push(spec);
        }

        info!(cluster = %cluster_name, roles = specs.len(), "expanded application roles");
        Ok(specs)
    }
}

/// Output name of an application's role ARN: `<namespace>-<app>-role-arn`
pub fn role_arn_output_name(spec: &IdentityRoleSpec) -> String {
    let identity = spec
        .node_id
        .strip_prefix(APP_ROLE_NODE_PREFIX)
        .map(|rest| rest.trim_start_matches('-'))
        .unwrap_or(&spec.node_id);
    format!("{identity}-role-arn")
}
