//! Outputs command

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::Args;
use serde_json::Value;

use keel_stack::{assemble, StackConfig};

use crate::{Error, Result};

const REDACTED: &str = "<sensitive>";

#[derive(Args, Debug)]
pub struct OutputsArgs {
    /// JSON file mapping `node.attribute` to applied values
    #[arg(long)]
    pub state: PathBuf,

    /// Print sensitive values instead of redacting them
    #[arg(long)]
    pub show_sensitive: bool,
}

pub fn run(args: OutputsArgs, config: &StackConfig) -> Result<()> {
    let rendered = render(&args, config)?;
    println!("{}", serde_json::to_string_pretty(&rendered)?);
    Ok(())
}

fn render(args: &OutputsArgs, config: &StackConfig) -> Result<BTreeMap<String, Value>> {
    let state = read_state(&args.state)?;
    let stack = assemble(config)?;
    let resolved = stack.outputs().evaluate(&state)?;
    Ok(resolved
        .into_iter()
        .map(|(name, output)| {
            let value = if output.sensitive && !args.show_sensitive {
                Value::String(REDACTED.to_string())
            } else {
                output.value
            };
            (name, value)
        })
        .collect())
}

fn read_state(path: &Path) -> Result<BTreeMap<String, String>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| Error::InvalidState {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn state_file(entries: &[(&str, &str)]) -> tempfile::NamedTempFile {
        let state: BTreeMap<&str, &str> = entries.iter().copied().collect();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string(&state).unwrap()).unwrap();
        file
    }

    fn applied() -> tempfile::NamedTempFile {
        state_file(&[
            ("eks-cluster.name", "layerx-eks"),
            ("eks-cluster.endpoint", "https://ABC.gr7.eu-central-1.eks.amazonaws.com"),
            ("eks-cluster.certificate_authority.0.data", "Q0E="),
        ])
    }

    #[test]
    fn sensitive_values_are_redacted_by_default() {
        let file = applied();
        let args = OutputsArgs {
            state: file.path().to_path_buf(),
            show_sensitive: false,
        };
        let rendered = render(&args, &StackConfig::default()).unwrap();
        assert_eq!(rendered["cluster_ca_certificate"], REDACTED);
        assert_eq!(rendered["cluster_name"], "layerx-eks");
        assert_eq!(rendered["app_role_arns"], serde_json::json!({}));
    }

    #[test]
    fn sensitive_values_shown_on_request() {
        let file = applied();
        let args = OutputsArgs {
            state: file.path().to_path_buf(),
            show_sensitive: true,
        };
        let rendered = render(&args, &StackConfig::default()).unwrap();
        assert_eq!(rendered["cluster_ca_certificate"], "Q0E=");
    }

    #[test]
    fn missing_attribute_names_the_output() {
        let file = state_file(&[("eks-cluster.name", "layerx-eks")]);
        let args = OutputsArgs {
            state: file.path().to_path_buf(),
            show_sensitive: false,
        };
        let err = render(&args, &StackConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::Stack(keel_common::Error::UnresolvedValue { .. })
        ));
    }

    #[test]
    fn malformed_state_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[1, 2]").unwrap();
        let args = OutputsArgs {
            state: file.path().to_path_buf(),
            show_sensitive: false,
        };
        let err = render(&args, &StackConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }
}
