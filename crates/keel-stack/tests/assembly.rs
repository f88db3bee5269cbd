//! End-to-end assembly of the reference stack

use std::collections::BTreeMap;

use keel_common::Error;
use keel_iam::AppIamConfig;
use keel_stack::{assemble, Stack, StackConfig};

fn event_exporter() -> AppIamConfig {
    let mut app = AppIamConfig::new("event-exporter", "monitoring");
    app.secrets_access = vec!["monitoring/event-exporter/*".to_string()];
    app
}

fn data_processor() -> AppIamConfig {
    let mut app = AppIamConfig::new("data-processor", "data-processing-*");
    app.service_account_name = Some("data-processor-sa".to_string());
    app.object_store_access = vec!["data-lake-bucket".to_string()];
    app.queue_access = vec!["data-processing-queue".to_string()];
    app
}

fn config() -> StackConfig {
    StackConfig {
        account_id: Some("123456789012".to_string()),
        apps: vec![event_exporter(), data_processor()],
        ..StackConfig::default()
    }
}

fn trust_document(stack: &Stack, role_node: &str) -> serde_json::Value {
    let binding = stack
        .graph()
        .node(&format!("{role_node}-trust-binding"))
        .unwrap_or_else(|| panic!("no binding for {role_node}"));
    serde_json::from_str(binding.attr_str("assume_role_policy").unwrap()).unwrap()
}

#[test]
fn platform_services_come_up_in_order() {
    let stack = assemble(&config()).unwrap();
    let graph = stack.graph();
    let chain = [
        "argocd",
        "external-secrets",
        "aws-load-balancer-controller",
        "helm",
        "ebs-csi-addon",
        "ebs-csi-driver-role-trust-binding",
        "eks-oidc-provider",
        "eks-cluster",
        "public-rta-1",
        "vpc",
        "aws",
    ];
    for pair in chain.windows(2) {
        assert!(graph.depends_on(pair[0], pair[1]), "{} must wait for {}", pair[0], pair[1]);
        assert!(!graph.depends_on(pair[1], pair[0]), "{} must not wait for {}", pair[1], pair[0]);
    }
    assert!(graph.depends_on("ebs-sc-gp3", "ebs-csi-addon"));
    assert!(graph.depends_on("argocd", "ebs-sc-gp3"));
    assert!(graph.depends_on("k8s", "eks-node-group"));
    assert!(graph.depends_on("aws-load-balancer-controller", "lb-controller-role-trust-binding"));
}

#[test]
fn execution_order_respects_every_edge() {
    let stack = assemble(&config()).unwrap();
    let order = stack.graph().topological_order().unwrap();
    let position: BTreeMap<&str, usize> = order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    for edge in stack.graph().edges() {
        assert!(
            position[edge.to.as_str()] < position[edge.from.as_str()],
            "{} runs before {}",
            edge.to,
            edge.from
        );
    }
}

/// Story: the monitoring event exporter reads its own secrets only
#[test]
fn story_event_exporter_scenario() {
    let stack = assemble(&config()).unwrap();
    let role = "app-iam-monitoring-event-exporter";

    let node = stack.graph().node(role).unwrap();
    assert_eq!(node.attr_str("name"), Some("layerx-eks-monitoring-event-exporter-role"));

    let trust = trust_document(&stack, role);
    let statement = &trust["Statement"][0];
    assert_eq!(statement["Action"], "sts:AssumeRoleWithWebIdentity");
    assert_eq!(statement["Principal"]["Federated"], "${eks-oidc-provider.arn}");
    let condition = statement["Condition"]["StringEquals"].as_object().unwrap();
    assert_eq!(
        condition.values().next().unwrap(),
        "system:serviceaccount:monitoring:event-exporter"
    );

    let policy = stack
        .graph()
        .node(&format!("{role}-secrets-access"))
        .unwrap();
    let document: serde_json::Value =
        serde_json::from_str(policy.attr_str("policy").unwrap()).unwrap();
    assert_eq!(
        document["Statement"][0]["Resource"][0],
        "arn:aws:secretsmanager:eu-central-1:123456789012:secret:monitoring/event-exporter/*"
    );
}

/// Story: a wildcard namespace gets pattern trust and bucket + object ARNs
#[test]
fn story_data_processing_scenario() {
    let stack = assemble(&config()).unwrap();
    let role = "app-iam-data-processing-wildcard-data-processor";
    assert!(stack.graph().contains(role));

    let trust = trust_document(&stack, role);
    let condition = trust["Statement"][0]["Condition"]["StringLike"].as_object().unwrap();
    assert_eq!(
        condition.values().next().unwrap(),
        "system:serviceaccount:data-processing-*:data-processor-sa"
    );

    let s3 = stack.graph().node(&format!("{role}-s3-access")).unwrap();
    let document: serde_json::Value = serde_json::from_str(s3.attr_str("policy").unwrap()).unwrap();
    assert_eq!(
        document["Statement"][0]["Resource"],
        serde_json::json!(["arn:aws:s3:::data-lake-bucket", "arn:aws:s3:::data-lake-bucket/*"])
    );
    assert!(stack.graph().contains(&format!("{role}-sqs-access")));
    assert!(stack
        .outputs()
        .get("data-processing-wildcard-data-processor-role-arn")
        .is_some());
}

#[test]
fn assembling_twice_yields_the_same_document() {
    let first = assemble(&config()).unwrap().to_json().unwrap();
    let second = assemble(&config()).unwrap().to_json().unwrap();
    assert_eq!(first, second);
}

#[test]
fn disabled_federation_reports_every_workload_role() {
    let mut config = config();
    config.federation.enabled = false;
    let stack = assemble(&config).unwrap();

    assert!(!stack.graph().contains("eks-oidc-provider"));
    let gaps: Vec<&str> = stack.trust_gaps().iter().map(|g| g.app_name.as_str()).collect();
    assert_eq!(
        gaps,
        vec!["ebs-csi-driver", "aws-load-balancer-controller", "event-exporter", "data-processor"]
    );
    assert!(stack.graph().nodes_of_type("aws_iam_role_trust_binding").next().is_none());
    // the add-on still waits for its role
    assert!(stack.graph().has_edge("ebs-csi-addon", "ebs-csi-driver-role"));
}

#[test]
fn federated_stack_has_no_gaps() {
    let stack = assemble(&config()).unwrap();
    assert!(stack.trust_gaps().is_empty());
    assert_eq!(stack.graph().nodes_of_type("aws_iam_role_trust_binding").count(), 4);
    assert_eq!(stack.roles().len(), 2);
}

#[test]
fn colliding_app_identities_abort_assembly() {
    let mut config = config();
    config.apps.push(AppIamConfig::new("event_exporter", "monitoring"));
    let err = assemble(&config).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig { .. }));
    assert!(err.to_string().contains("event-exporter"));
}

#[test]
fn same_app_in_two_namespaces_aborts_assembly() {
    let mut config = config();
    config.apps = vec![
        AppIamConfig::new("worker", "team-a"),
        AppIamConfig::new("worker", "team-b"),
    ];
    let err = assemble(&config).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig { .. }));
    let message = err.to_string();
    assert!(message.contains("team-a") && message.contains("team-b"));
}

#[test]
fn app_named_after_another_apps_policy_aborts_as_config_error() {
    let mut config = config();
    let mut x = AppIamConfig::new("x", "ns");
    x.secrets_access = vec!["ns/x/*".to_string()];
    config.apps = vec![x, AppIamConfig::new("x-secrets-access", "ns")];
    let err = assemble(&config).unwrap_err();
    assert!(err.is_config_error(), "{err}");
    assert_eq!(err.subject(), Some("x-secrets-access"));
}

#[test]
fn role_arn_map_has_one_entry_per_app() {
    let stack = assemble(&config()).unwrap();
    let state = BTreeMap::from([
        ("app-iam-monitoring-event-exporter.arn".to_string(), "arn:a".to_string()),
        ("app-iam-data-processing-wildcard-data-processor.arn".to_string(), "arn:b".to_string()),
        ("eks-cluster.name".to_string(), "layerx-eks".to_string()),
        ("eks-cluster.endpoint".to_string(), "https://x".to_string()),
        ("eks-cluster.certificate_authority.0.data".to_string(), "Q0E=".to_string()),
    ]);
    let resolved = stack.outputs().evaluate(&state).unwrap();
    let arns = resolved["app_role_arns"].value.as_object().unwrap();
    assert_eq!(arns.len(), stack.roles().len());
    assert_eq!(arns["event-exporter"], "arn:a");
    assert_eq!(arns["data-processor"], "arn:b");
}

#[test]
fn apps_for_other_clusters_are_skipped() {
    let mut config = config();
    config.apps[1].clusters = vec!["staging-eks".to_string()];
    let stack = assemble(&config).unwrap();
    assert_eq!(stack.roles().len(), 1);
    assert!(!stack.graph().contains("app-iam-data-processing-wildcard-data-processor"));
}

#[test]
fn outputs_resolve_against_applied_state() {
    let mut config = config();
    config.apps.truncate(1);
    let stack = assemble(&config).unwrap();
    let state = BTreeMap::from([
        ("eks-cluster.name".to_string(), "layerx-eks".to_string()),
        ("eks-cluster.endpoint".to_string(), "https://ABC.eks.amazonaws.com".to_string()),
        ("eks-cluster.certificate_authority.0.data".to_string(), "Q0E=".to_string()),
        (
            "app-iam-monitoring-event-exporter.arn".to_string(),
            "arn:aws:iam::123456789012:role/layerx-eks-monitoring-event-exporter-role".to_string(),
        ),
    ]);
    let resolved = stack.outputs().evaluate(&state).unwrap();
    assert_eq!(
        resolved["kubeconfig_command"].value,
        "aws eks update-kubeconfig --name layerx-eks --region eu-central-1"
    );
    assert!(resolved["cluster_ca_certificate"].sensitive);
    assert_eq!(
        resolved["app_role_arns"].value["event-exporter"],
        "arn:aws:iam::123456789012:role/layerx-eks-monitoring-event-exporter-role"
    );
}
