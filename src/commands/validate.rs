//! Validate command

use clap::Args;
use tracing::warn;

use keel_stack::{assemble, StackConfig};

use crate::{Error, Result};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Fail when any workload role keeps placeholder trust
    #[arg(long)]
    pub deny_trust_gaps: bool,
}

pub fn run(args: ValidateArgs, config: &StackConfig) -> Result<()> {
    let stack = assemble(config)?;
    println!(
        "  {} valid: {} nodes, {} edges, {} outputs",
        config.cluster.name,
        stack.graph().len(),
        stack.graph().edges().len(),
        stack.outputs().len()
    );
    for role in stack.roles() {
        println!("  role {} -> {}", role.app_name, role.subject());
    }

    let gaps = stack.trust_gaps();
    for gap in gaps {
        warn!(app = %gap.app_name, role = %gap.role_node, reason = %gap.reason, "trust gap");
        println!("  gap {}: {}", gap.app_name, gap.reason);
    }
    if args.deny_trust_gaps && !gaps.is_empty() {
        return Err(Error::TrustGaps { count: gaps.len() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn federated_stack_passes_strict_validation() {
        let args = ValidateArgs {
            deny_trust_gaps: true,
        };
        run(args, &StackConfig::default()).unwrap();
    }

    #[test]
    fn gaps_fail_strict_validation() {
        let mut config = StackConfig::default();
        config.federation.enabled = false;
        let err = run(
            ValidateArgs {
                deny_trust_gaps: true,
            },
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, Error::TrustGaps { count: 2 }));

        run(
            ValidateArgs {
                deny_trust_gaps: false,
            },
            &config,
        )
        .unwrap();
    }
}
