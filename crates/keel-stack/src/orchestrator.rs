//! Stack assembly
//!
//! [`assemble`] turns a validated [`StackConfig`] into a [`Stack`]: the full
//! resource graph with every ordering constraint made explicit, the stack
//! outputs, the cluster context and the identity roles. Nothing is executed;
//! the graph is handed to an external engine.
//!
//! Order of declaration (each step waits for the ones before it where it
//! reads from them):
//!
//! ```text
//! providers -> network -> roles (phase one) -> cluster + node pool
//!   -> federation provider -> trust rebind -> native add-ons
//!   -> cluster API promotion -> ingress -> secret sync
//!   -> app outputs -> storage class -> GitOps -> stack outputs
//! ```

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};

use keel_common::graph::GraphDocument;
use keel_common::{Expr, NodeId, ResourceGraph, ResourceNode, Result};
use keel_iam::app_roles::role_arn_output_name;
use keel_iam::platform_roles::{
    block_storage_driver_role, cluster_role, ingress_controller_role, node_role,
};
use keel_iam::trust::PLACEHOLDER_SERVICE;
use keel_iam::{AppRoleRegistry, ArnContext, ClusterContext, IdentityRoleSpec, RoleDraft};

use crate::addons::declare_block_storage_addon;
use crate::cluster::{declare_cluster, declare_cluster_auth, declare_federation, ClusterResources};
use crate::config::StackConfig;
use crate::identity::{bind_draft, bind_drafts, TrustGap, WorkloadRole};
use crate::network::declare_network;
use crate::outputs::{Output, OutputDocument, Outputs};
use crate::providers::{ClusterCredentials, ProviderLifecycleManager};
use crate::services::gitops::declare_gitops;
use crate::services::ingress::{declare_ingress_controller, IngressInputs};
use crate::services::secret_sync::declare_secret_sync;
use crate::storage::declare_storage_class;

/// Caller identity lookup, used when no account id is configured
pub const CALLER_IDENTITY_NODE: &str = "current";

/// Assembled, immutable stack
#[derive(Debug)]
pub struct Stack {
    graph: ResourceGraph,
    outputs: Outputs,
    context: ClusterContext,
    roles: Vec<IdentityRoleSpec>,
    trust_gaps: Vec<TrustGap>,
}

/// Serialized stack: graph plus outputs
#[derive(Debug, Serialize)]
pub struct StackDocument<'a> {
    /// Nodes and edges
    #[serde(flatten)]
    pub graph: GraphDocument<'a>,
    /// Outputs by name
    pub outputs: BTreeMap<&'a str, OutputDocument>,
}

impl Stack {
    /// The resource graph
    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    /// Stack outputs
    pub fn outputs(&self) -> &Outputs {
        &self.outputs
    }

    /// Facts about the declared cluster
    pub fn context(&self) -> &ClusterContext {
        &self.context
    }

    /// Application role specs, in config order
    pub fn roles(&self) -> &[IdentityRoleSpec] {
        &self.roles
    }

    /// Roles left on placeholder trust
    pub fn trust_gaps(&self) -> &[TrustGap] {
        &self.trust_gaps
    }

    /// Graph document with nodes in execution order
    pub fn document(&self) -> Result<StackDocument<'_>> {
        Ok(StackDocument {
            graph: self.graph.document()?,
            outputs: self.outputs.document(),
        })
    }

    /// Pretty JSON of [`Stack::document`]
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.document()?)?)
    }
}

/// Workload roles after rebind, by component
struct WorkloadRoles {
    block_storage: WorkloadRole,
    ingress: WorkloadRole,
    apps: Vec<WorkloadRole>,
}

/// Assemble the stack for `config`
///
/// The config is validated first. Any failure aborts assembly; no partial
/// stack is returned.
pub fn assemble(config: &StackConfig) -> Result<Stack> {
    config.validate()?;
    let cluster_name = config.cluster.name.as_str();
    info!(cluster = %cluster_name, region = %config.region, "assembling stack");

    let mut graph = ResourceGraph::new();
    let mut providers = ProviderLifecycleManager::new();

    // providers and account
    let aws = providers.cloud_provider(&mut graph, &config.region)?;
    let aws = aws.node_id();
    let account_id = match &config.account_id {
        Some(account) => Expr::lit(account.as_str()),
        None => {
            let current = graph.add_node(
                ResourceNode::data(CALLER_IDENTITY_NODE, "aws_caller_identity").with_provider(aws),
            )?;
            Expr::reference(current, "account_id")
        }
    };
    let arns = ArnContext::new(&config.partition, &config.region, account_id.clone());

    // network
    let network = declare_network(&mut graph, aws, cluster_name, &config.region, &config.network)?;

    // roles, phase one
    let iam = &config.iam;
    let cluster_role = cluster_role(&iam.cluster_role_name).declare(&mut graph, aws, &arns)?;
    let node_role = node_role(&iam.node_role_name).declare(&mut graph, aws, &arns)?;
    let block_storage_draft =
        block_storage_driver_role(&iam.block_storage_role_name, PLACEHOLDER_SERVICE);
    let ingress_draft = ingress_controller_role(
        &iam.ingress_role_name,
        &iam.ingress_policies,
        PLACEHOLDER_SERVICE,
    );
    let apps = AppRoleRegistry::apps_for_cluster(cluster_name, &config.apps);
    let app_specs = AppRoleRegistry::expand(cluster_name, apps)?;
    let app_drafts: Vec<RoleDraft> = app_specs
        .iter()
        .map(|spec| RoleDraft::new(spec.clone(), PLACEHOLDER_SERVICE))
        .collect();
    for draft in std::iter::once(&block_storage_draft)
        .chain(std::iter::once(&ingress_draft))
        .chain(&app_drafts)
    {
        draft.declare(&mut graph, aws, cluster_name, &arns)?;
    }

    // cluster, node pool, federation
    let cluster = declare_cluster(&mut graph, aws, config, &network, &cluster_role, &node_role)?;
    let federation = if config.federation.enabled {
        Some(declare_federation(&mut graph, aws, &cluster, &config.federation.audience)?)
    } else {
        info!("federation disabled; workload roles keep placeholder trust");
        None
    };
    let issuer_host = ClusterContext::issuer_host_from(cluster.issuer_url());
    let context = ClusterContext {
        region: config.region.clone(),
        partition: config.partition.clone(),
        cluster_name: cluster_name.to_string(),
        kubernetes_version: config.cluster.version.clone(),
        federation_provider_arn: match &federation {
            Some(provider) => provider.arn(),
            None => ClusterContext::provider_arn_for(&config.partition, &account_id, &issuer_host),
        },
        account_id,
        federation_issuer_host: issuer_host,
        cluster_node: cluster.cluster_node.clone(),
        federation_node: federation.as_ref().map(|f| f.node_id.clone()),
    };

    // trust rebind
    let mut trust_gaps = Vec::new();
    let mut rebind = |graph: &mut ResourceGraph, draft: &RoleDraft| -> Result<WorkloadRole> {
        let (role, gap) = bind_draft(graph, aws, &context, draft)?;
        trust_gaps.extend(gap);
        Ok(role)
    };
    let block_storage = rebind(&mut graph, &block_storage_draft)?;
    let ingress_role = rebind(&mut graph, &ingress_draft)?;
    let roles = WorkloadRoles {
        block_storage,
        ingress: ingress_role,
        apps: bind_drafts(&mut graph, aws, &context, &app_drafts, &mut trust_gaps)?,
    };

    // native add-ons
    let addon = declare_block_storage_addon(
        &mut graph,
        aws,
        &cluster,
        &roles.block_storage,
        &config.addons.block_storage,
    )?;

    // cluster API promotion
    promote(&mut graph, &mut providers, aws, &cluster, &addon)?;
    let k8s = providers.cluster_api_provider()?.node_id().to_string();
    let helm = providers.chart_deploy_provider()?.node_id().to_string();

    // chart services
    let charts = &config.charts;
    let ingress = declare_ingress_controller(
        &mut graph,
        &helm,
        &charts.ingress,
        &IngressInputs {
            cluster_name: cluster.name_expr(),
            region: &config.region,
            vpc_id: network.vpc_id.clone(),
            role: &roles.ingress,
        },
    )?;
    let secret_sync =
        declare_secret_sync(&mut graph, &helm, &charts.secret_sync, &config.region, &ingress)?;

    let mut outputs = Outputs::new();
    app_role_outputs(&mut outputs, &app_specs, &roles.apps, context.federation_node.as_ref())?;

    let storage = declare_storage_class(&mut graph, &k8s, &config.storage, &addon)?;
    declare_gitops(
        &mut graph,
        &helm,
        &charts.gitops,
        &[ingress.as_str(), secret_sync.as_str(), storage.as_str()],
    )?;

    cluster_outputs(&mut outputs, &cluster, &config.region, &app_specs, &roles.apps)?;

    // surface cycles now rather than in the engine
    let order = graph.topological_order()?;
    info!(
        cluster = %cluster_name,
        nodes = order.len(),
        outputs = outputs.len(),
        roles = app_specs.len(),
        trust_gaps = trust_gaps.len(),
        "assembled stack"
    );

    Ok(Stack {
        graph,
        outputs,
        context,
        roles: app_specs,
        trust_gaps,
    })
}

fn promote(
    graph: &mut ResourceGraph,
    providers: &mut ProviderLifecycleManager,
    aws: &str,
    cluster: &ClusterResources,
    addon: &str,
) -> Result<()> {
    let auth = declare_cluster_auth(graph, aws, cluster)?;
    let credentials = ClusterCredentials {
        endpoint: cluster.endpoint(),
        ca_certificate: Expr::base64_decode(cluster.certificate_authority_data()),
        token: Expr::reference(auth, "token"),
    };
    providers.promote(graph, &credentials)?;
    for provider in [
        providers.cluster_api_provider()?.node_id(),
        providers.chart_deploy_provider()?.node_id(),
    ] {
        graph.add_edges(provider, &[cluster.node_pool_node.as_str(), addon])?;
    }
    Ok(())
}

fn app_role_outputs(
    outputs: &mut Outputs,
    specs: &[IdentityRoleSpec],
    roles: &[WorkloadRole],
    federation: Option<&NodeId>,
) -> Result<()> {
    for (spec, role) in specs.iter().zip(roles) {
        let output = Output::new(
            role_arn_output_name(spec),
            role.arn(),
            format!(
                "ARN of the IAM role for {} in namespace {}",
                spec.app_name, spec.namespace_selector
            ),
        )
        .depending_on(federation.cloned())
        .depending_on([role.ready_node().to_string()]);
        debug!(output = %output.name, app = %spec.app_name, "declared role output");
        outputs.insert(output)?;
    }
    Ok(())
}

fn cluster_outputs(
    outputs: &mut Outputs,
    cluster: &ClusterResources,
    region: &str,
    specs: &[IdentityRoleSpec],
    roles: &[WorkloadRole],
) -> Result<()> {
    outputs.insert(Output::new("cluster_name", cluster.name_expr(), "EKS cluster name"))?;
    outputs.insert(Output::new(
        "cluster_endpoint",
        cluster.endpoint(),
        "EKS cluster API endpoint",
    ))?;
    outputs.insert(
        Output::new(
            "cluster_ca_certificate",
            cluster.certificate_authority_data(),
            "EKS cluster CA certificate (base64)",
        )
        .sensitive(),
    )?;
    outputs.insert(Output::new(
        "kubeconfig_command",
        Expr::concat(vec![
            Expr::lit("aws eks update-kubeconfig --name "),
            cluster.name_expr(),
            Expr::lit(format!(" --region {region}")),
        ]),
        "Command to configure kubectl for the cluster",
    ))?;

    let arns: BTreeMap<String, Expr> = specs
        .iter()
        .zip(roles)
        .map(|(spec, role)| (spec.app_name.clone(), role.arn()))
        .collect();
    outputs.insert(Output::map(
        "app_role_arns",
        arns,
        "IAM role ARN per application",
    ))
}
