//! Stack configuration
//!
//! Everything the assembly reads comes from one [`StackConfig`], loaded from a
//! YAML (or JSON) file. Every section has defaults, so an empty file yields the
//! reference deployment.
//!
//! The config file resolution chain (highest priority first):
//! 1. Explicit `--config` flag
//! 2. `KEEL_CONFIG` environment variable
//! 3. `keel.yaml` in the working directory
//! 4. Built-in defaults

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use keel_common::{Error, Result, DEFAULT_PARTITION};
use keel_iam::AppIamConfig;

/// Environment variable naming the config file
pub const KEEL_CONFIG_ENV: &str = "KEEL_CONFIG";

/// Config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "keel.yaml";

/// Most availability zones a region can have (`a`..`z`)
pub const MAX_AVAILABILITY_ZONES: u32 = 26;

/// Complete stack configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StackConfig {
    /// AWS region
    pub region: String,
    /// AWS partition
    pub partition: String,
    /// Account id; looked up at apply time when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    /// Cluster identity and control-plane settings
    pub cluster: ClusterConfig,
    /// VPC and subnets
    pub network: NetworkConfig,
    /// Managed node group
    pub node_pool: NodePoolConfig,
    /// Platform role names
    pub iam: IamConfig,
    /// OIDC federation
    pub federation: FederationConfig,
    /// Native EKS add-ons
    pub addons: AddonsConfig,
    /// Chart-deployed services
    pub charts: ChartsConfig,
    /// Shared storage class
    pub storage: StorageConfig,
    /// Per-application identity roles
    pub apps: Vec<AppIamConfig>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            region: "eu-central-1".to_string(),
            partition: DEFAULT_PARTITION.to_string(),
            account_id: None,
            cluster: ClusterConfig::default(),
            network: NetworkConfig::default(),
            node_pool: NodePoolConfig::default(),
            iam: IamConfig::default(),
            federation: FederationConfig::default(),
            addons: AddonsConfig::default(),
            charts: ChartsConfig::default(),
            storage: StorageConfig::default(),
            apps: Vec::new(),
        }
    }
}

/// Cluster identity and control plane
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterConfig {
    /// Cluster name
    pub name: String,
    /// Kubernetes version
    pub version: String,
    /// Service IPv4 CIDR
    pub service_cidr: String,
    /// EKS authentication mode
    pub authentication_mode: String,
    /// Public API endpoint
    pub endpoint_public_access: bool,
    /// Private API endpoint
    pub endpoint_private_access: bool,
    /// CIDRs allowed to reach the public endpoint
    pub public_access_cidrs: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: "layerx-eks".to_string(),
            version: "1.31".to_string(),
            service_cidr: "10.100.0.0/16".to_string(),
            authentication_mode: "API_AND_CONFIG_MAP".to_string(),
            endpoint_public_access: true,
            endpoint_private_access: false,
            public_access_cidrs: vec!["0.0.0.0/0".to_string()],
        }
    }
}

/// VPC sizing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkConfig {
    /// VPC CIDR block
    pub cidr_block: String,
    /// Number of availability zones (one public subnet each)
    pub availability_zones: u32,
    /// Bits added to the VPC prefix for each subnet
    pub subnet_newbits: u8,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            cidr_block: "10.0.0.0/16".to_string(),
            availability_zones: 2,
            subnet_newbits: 4,
        }
    }
}

/// Managed node group sizing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodePoolConfig {
    /// EC2 instance type
    pub instance_type: String,
    /// Root volume size in GiB
    pub disk_size: u32,
    /// AMI type
    pub ami_type: String,
    /// Minimum nodes
    pub min_size: u32,
    /// Desired nodes
    pub desired_size: u32,
    /// Maximum nodes
    pub max_size: u32,
}

impl Default for NodePoolConfig {
    fn default() -> Self {
        Self {
            instance_type: "t3.micro".to_string(),
            disk_size: 20,
            ami_type: "AL2_x86_64".to_string(),
            min_size: 2,
            desired_size: 3,
            max_size: 4,
        }
    }
}

/// Platform role names
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IamConfig {
    /// Cluster (control plane) role
    pub cluster_role_name: String,
    /// Worker node role
    pub node_role_name: String,
    /// Block-storage CSI driver role
    pub block_storage_role_name: String,
    /// Ingress controller role
    pub ingress_role_name: String,
    /// Managed policies attached to the ingress controller role
    pub ingress_policies: Vec<String>,
}

impl Default for IamConfig {
    fn default() -> Self {
        Self {
            cluster_role_name: "layerx-eks-cluster-role".to_string(),
            node_role_name: "layerx-eks-node-role".to_string(),
            block_storage_role_name: "layerx-eks-ebs-csi-driver-role".to_string(),
            ingress_role_name: "layerx-eks-lb-controller-role".to_string(),
            ingress_policies: vec![
                "ElasticLoadBalancingFullAccess".to_string(),
                "AmazonEC2ReadOnlyAccess".to_string(),
            ],
        }
    }
}

/// OIDC federation settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FederationConfig {
    /// Declare the OIDC provider and rebind workload roles
    pub enabled: bool,
    /// Audience trusted by the provider
    pub audience: String,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            audience: keel_common::STS_AUDIENCE.to_string(),
        }
    }
}

/// One native add-on
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonConfig {
    /// Add-on version
    pub version: String,
    /// Conflict handling on create
    pub resolve_conflicts_on_create: String,
    /// Conflict handling on update
    pub resolve_conflicts_on_update: String,
}

/// Native add-ons
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AddonsConfig {
    /// EBS CSI driver
    pub block_storage: AddonConfig,
}

impl Default for AddonsConfig {
    fn default() -> Self {
        Self {
            block_storage: AddonConfig {
                version: "v1.44.0-eksbuild.1".to_string(),
                resolve_conflicts_on_create: "OVERWRITE".to_string(),
                resolve_conflicts_on_update: "PRESERVE".to_string(),
            },
        }
    }
}

/// One chart release
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    /// Release name
    pub release: String,
    /// Chart repository URL
    pub repository: String,
    /// Chart name
    pub chart: String,
    /// Chart version
    pub version: String,
    /// Target namespace
    pub namespace: String,
    /// Create the namespace if missing
    #[serde(default)]
    pub create_namespace: bool,
    /// Values merged over the built-in values
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub values: serde_json::Value,
}

impl ChartConfig {
    fn new(release: &str, repository: &str, chart: &str, version: &str, namespace: &str) -> Self {
        Self {
            release: release.to_string(),
            repository: repository.to_string(),
            chart: chart.to_string(),
            version: version.to_string(),
            namespace: namespace.to_string(),
            create_namespace: false,
            values: serde_json::Value::Null,
        }
    }
}

/// Chart-deployed services
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChartsConfig {
    /// Ingress controller
    pub ingress: ChartConfig,
    /// Secret synchronizer
    pub secret_sync: ChartConfig,
    /// GitOps engine
    pub gitops: ChartConfig,
}

impl Default for ChartsConfig {
    fn default() -> Self {
        let mut gitops = ChartConfig::new(
            "argocd",
            "https://argoproj.github.io/argo-helm",
            "argo-cd",
            "7.0.0",
            "argocd",
        );
        gitops.create_namespace = true;
        Self {
            ingress: ChartConfig::new(
                "aws-load-balancer-controller",
                "https://aws.github.io/eks-charts",
                "aws-load-balancer-controller",
                "1.7.0",
                keel_common::KUBE_SYSTEM_NAMESPACE,
            ),
            secret_sync: ChartConfig::new(
                "external-secrets",
                "https://charts.external-secrets.io",
                "external-secrets",
                "0.9.9",
                keel_common::KUBE_SYSTEM_NAMESPACE,
            ),
            gitops,
        }
    }
}

/// Shared storage class
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    /// StorageClass name
    pub class_name: String,
    /// Mark as the cluster default
    pub default_class: bool,
    /// EBS volume type
    pub volume_type: String,
    /// Provisioned IOPS
    pub iops: u32,
    /// Throughput in MiB/s
    pub throughput: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            class_name: "ebs-sc-gp3".to_string(),
            default_class: true,
            volume_type: "gp3".to_string(),
            iops: 3000,
            throughput: 125,
        }
    }
}

impl StackConfig {
    /// Parse a YAML or JSON document
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
            .map_err(|e| Error::serialization_for_kind("StackConfig", e.to_string()))
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| Error::io(path.display().to_string(), e))?;
        let config = Self::from_yaml(&content)?;
        config.validate()?;
        debug!(path = %path.display(), cluster = %config.cluster.name, apps = config.apps.len(), "loaded stack config");
        Ok(config)
    }

    /// Load from the resolved path, or use defaults when none exists
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        match resolve_config_path(explicit) {
            Some(path) => Self::load(&path),
            None => {
                debug!("no config file found, using defaults");
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Check everything the assembly relies on
    ///
    /// Per-application entries are checked when roles are expanded.
    pub fn validate(&self) -> Result<()> {
        require("region", "region", &self.region)?;
        require("region", "partition", &self.partition)?;
        if let Some(account) = &self.account_id {
            if account.is_empty() || !account.chars().all(|c| c.is_ascii_digit()) {
                return Err(Error::invalid_config_for_field(
                    "account",
                    "accountId",
                    format!("'{account}' is not a numeric account id"),
                ));
            }
        }
        require("cluster", "cluster.name", &self.cluster.name)?;
        require("cluster", "cluster.version", &self.cluster.version)?;
        parse_cidr(&self.cluster.service_cidr).map_err(|msg| {
            Error::invalid_config_for_field("cluster", "cluster.serviceCidr", msg)
        })?;

        self.validate_network()?;
        self.validate_node_pool()?;

        for (field, name) in [
            ("iam.clusterRoleName", &self.iam.cluster_role_name),
            ("iam.nodeRoleName", &self.iam.node_role_name),
            ("iam.blockStorageRoleName", &self.iam.block_storage_role_name),
            ("iam.ingressRoleName", &self.iam.ingress_role_name),
        ] {
            require("iam", field, name)?;
        }

        require("addons", "addons.blockStorage.version", &self.addons.block_storage.version)?;

        for (section, chart) in [
            ("charts.ingress", &self.charts.ingress),
            ("charts.secretSync", &self.charts.secret_sync),
            ("charts.gitops", &self.charts.gitops),
        ] {
            require(section, &format!("{section}.release"), &chart.release)?;
            require(section, &format!("{section}.chart"), &chart.chart)?;
            require(section, &format!("{section}.version"), &chart.version)?;
            require(section, &format!("{section}.namespace"), &chart.namespace)?;
            if !(chart.values.is_null() || chart.values.is_object()) {
                return Err(Error::invalid_config_for_field(
                    section,
                    format!("{section}.values"),
                    "values must be a mapping",
                ));
            }
        }

        require("storage", "storage.className", &self.storage.class_name)?;
        Ok(())
    }

    fn validate_network(&self) -> Result<()> {
        let (_, prefix) = parse_cidr(&self.network.cidr_block).map_err(|msg| {
            Error::invalid_config_for_field("network", "network.cidrBlock", msg)
        })?;
        let azs = self.network.availability_zones;
        if azs == 0 || azs > MAX_AVAILABILITY_ZONES {
            return Err(Error::invalid_config_for_field(
                "network",
                "network.availabilityZones",
                format!("must be between 1 and {MAX_AVAILABILITY_ZONES}, got {azs}"),
            ));
        }
        let newbits = u32::from(self.network.subnet_newbits);
        if newbits == 0 || prefix + newbits > 32 {
            return Err(Error::invalid_config_for_field(
                "network",
                "network.subnetNewbits",
                format!("/{prefix} cannot be split by {newbits} bits"),
            ));
        }
        if newbits < 32 && azs > (1u32 << newbits) {
            return Err(Error::invalid_config_for_field(
                "network",
                "network.subnetNewbits",
                format!("{newbits} bits give fewer than {azs} subnets"),
            ));
        }
        Ok(())
    }

    fn validate_node_pool(&self) -> Result<()> {
        let pool = &self.node_pool;
        require("nodePool", "nodePool.instanceType", &pool.instance_type)?;
        if !(pool.min_size <= pool.desired_size && pool.desired_size <= pool.max_size) {
            return Err(Error::invalid_config_for_field(
                "nodePool",
                "nodePool.desiredSize",
                format!(
                    "expected minSize <= desiredSize <= maxSize, got {} <= {} <= {}",
                    pool.min_size, pool.desired_size, pool.max_size
                ),
            ));
        }
        if pool.max_size == 0 {
            return Err(Error::invalid_config_for_field(
                "nodePool",
                "nodePool.maxSize",
                "node pool must allow at least one node",
            ));
        }
        Ok(())
    }
}

fn require(subject: &str, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::invalid_config_for_field(
            subject,
            field,
            "must not be empty",
        ));
    }
    Ok(())
}

/// Split `a.b.c.d/n` into the network address and prefix length
pub fn parse_cidr(cidr: &str) -> std::result::Result<(Ipv4Addr, u32), String> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| format!("'{cidr}' is not in a.b.c.d/n form"))?;
    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|_| format!("'{addr}' is not an IPv4 address"))?;
    let prefix: u32 = prefix
        .parse()
        .ok()
        .filter(|p| *p <= 32)
        .ok_or_else(|| format!("'{prefix}' is not a prefix length"))?;
    Ok((addr, prefix))
}

/// Resolve the config path using the priority chain
///
/// Returns `None` when no file is configured and `keel.yaml` does not exist.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(KEEL_CONFIG_ENV) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    local.exists().then_some(local)
}
