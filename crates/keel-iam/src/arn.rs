//! ARN synthesis
//!
//! Builds resource ARNs for grants that name a resource instead of passing
//! a full ARN. Inputs are only prefix-checked; nothing here validates the
//! rest of an ARN.

use keel_common::Expr;

/// Prefix shared by every ARN
pub const ARN_PREFIX: &str = "arn:";

/// Partition, region and account used to synthesize ARNs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArnContext {
    /// AWS partition ("aws", "aws-cn", ...)
    pub partition: String,
    /// Region of regional resources
    pub region: String,
    /// Account id; late-bound unless configured
    pub account_id: Expr,
}

impl ArnContext {
    /// Context for a partition/region/account
    pub fn new(partition: impl Into<String>, region: impl Into<String>, account_id: Expr) -> Self {
        Self {
            partition: partition.into(),
            region: region.into(),
            account_id,
        }
    }

    fn regional(&self, service: &str, resource: &str) -> Expr {
        Expr::concat(vec![
            Expr::lit(format!(
                "arn:{}:{}:{}:",
                self.partition, service, self.region
            )),
            self.account_id.clone(),
            Expr::lit(format!(":{resource}")),
        ])
    }

    /// Secrets Manager ARN; the pattern is used as-is (no wildcard appended)
    pub fn secret(&self, pattern: &str) -> Expr {
        if is_arn(pattern) {
            return Expr::lit(pattern);
        }
        self.regional("secretsmanager", &format!("secret:{pattern}"))
    }

    /// Bucket ARN and object ARN for a bucket name or bucket ARN
    pub fn bucket(&self, bucket: &str) -> [Expr; 2] {
        let name = strip_s3_arn(bucket);
        [
            Expr::lit(format!("arn:{}:s3:::{name}", self.partition)),
            Expr::lit(format!("arn:{}:s3:::{name}/*", self.partition)),
        ]
    }

    /// SQS queue ARN for a queue name, or the ARN itself
    pub fn queue(&self, name: &str) -> Expr {
        if is_arn(name) {
            return Expr::lit(name);
        }
        self.regional("sqs", name)
    }

    /// ARN of an AWS-managed policy (e.g. "AmazonEKSClusterPolicy")
    pub fn managed_policy(&self, name: &str) -> String {
        if is_arn(name) {
            return name.to_string();
        }
        format!("arn:{}:iam::aws:policy/{name}", self.partition)
    }
}

/// Whether a string already is an ARN
pub fn is_arn(value: &str) -> bool {
    value.starts_with(ARN_PREFIX)
}

/// Bare bucket name from `arn:<partition>:s3:::<bucket>`, or the input
pub fn strip_s3_arn(value: &str) -> &str {
    value
        .strip_prefix(ARN_PREFIX)
        .and_then(|rest| rest.split_once(':'))
        .and_then(|(_, rest)| rest.strip_prefix("s3:::"))
        .unwrap_or(value)
}
