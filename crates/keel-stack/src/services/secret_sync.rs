//! Secret synchronizer release

use serde_json::{json, Value};
use tracing::info;

use keel_common::{NodeId, ResourceGraph, Result};

use super::{atomic_release, resources, ChartRelease};
use crate::config::ChartConfig;

/// Release node
pub const SECRET_SYNC_RELEASE_NODE: &str = "external-secrets";

/// Service account the synchronizer runs as
pub const SECRET_SYNC_SERVICE_ACCOUNT: &str = "external-secrets";

/// Secret backend the synchronizer reads from
pub const SECRET_BACKEND: &str = "SecretsManager";

fn builtin_values(region: &str) -> Value {
    let small = resources("50m", "64Mi", "100m", "128Mi");
    json!({
        "installCRDs": true,
        "serviceAccount": { "create": true, "name": SECRET_SYNC_SERVICE_ACCOUNT },
        "resources": small,
        "aws": { "region": region, "service": SECRET_BACKEND },
        "webhook": { "resources": small },
        "certController": { "resources": small },
    })
}

/// Declare the synchronizer release after the ingress controller
pub fn declare_secret_sync(
    graph: &mut ResourceGraph,
    provider: &str,
    chart: &ChartConfig,
    region: &str,
    ingress: &str,
) -> Result<NodeId> {
    let release = ChartRelease::new(SECRET_SYNC_RELEASE_NODE, chart, builtin_values(region))
        .with_failure_policy(atomic_release())
        .declare(graph, provider, &[ingress])?;
    info!(release = %chart.release, version = %chart.version, "declared secret synchronizer");
    Ok(release)
}
