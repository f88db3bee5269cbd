//! EKS cluster and platform-service graph assembly
//!
//! Declares the network, the cluster and its node pool, the identity roles
//! with their two-phase trust, the native add-ons, the chart-deployed
//! platform services and the stack outputs, all as one [`ResourceGraph`]
//! with explicit ordering. See [`orchestrator::assemble`].
//!
//! [`ResourceGraph`]: keel_common::ResourceGraph

#![deny(missing_docs)]

pub mod addons;
pub mod cluster;
pub mod config;
pub mod identity;
pub mod network;
pub mod orchestrator;
pub mod outputs;
pub mod providers;
pub mod services;
pub mod storage;

pub use config::StackConfig;
pub use identity::{TrustGap, WorkloadRole};
pub use orchestrator::{assemble, Stack, StackDocument};
pub use outputs::{Output, OutputValue, Outputs, ResolvedOutput};
pub use providers::{ClusterCredentials, ProviderLifecycleManager, ProviderState, Promotion};
