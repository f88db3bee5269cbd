//! IAM synthesis for keel
//!
//! Policy documents, ARN synthesis, the two-phase workload role protocol and
//! the expansion of per-application identity configs into roles.

#![deny(missing_docs)]

pub mod app_roles;
pub mod arn;
pub mod context;
pub mod platform_roles;
pub mod policy;
pub mod role;
pub mod trust;

pub use app_roles::{AppIamConfig, AppRoleRegistry};
pub use arn::ArnContext;
pub use context::ClusterContext;
pub use policy::{Condition, ConditionOperator, PolicyDocument, Principal, Statement};
pub use role::{AttachedPolicy, IdentityRoleSpec, PolicyBody, ResourceGrant, TrustMode};
pub use trust::{
    build_federated_trust, build_placeholder_trust, DeclaredRole, RoleBinding, RoleDraft,
    TrustPolicyDocument,
};
