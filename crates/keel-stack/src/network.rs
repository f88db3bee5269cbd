//! Network topology: VPC, internet gateway, public route table and one public
//! subnet per availability zone
//!
//! Subnet CIDRs are carved from the VPC CIDR with `cidrsubnet` semantics, so
//! the same config always yields the same, non-overlapping blocks.

use std::net::Ipv4Addr;

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use keel_common::{Error, Expr, NodeId, ResourceGraph, ResourceNode, Result};

use crate::config::{parse_cidr, NetworkConfig, MAX_AVAILABILITY_ZONES};

/// VPC node
pub const VPC_NODE: &str = "vpc";
/// Internet gateway node
pub const INTERNET_GATEWAY_NODE: &str = "igw";
/// Public route table node
pub const ROUTE_TABLE_NODE: &str = "public-rtb";
/// Default route node
pub const DEFAULT_ROUTE_NODE: &str = "public-route";

const ELB_ROLE_TAG: &str = "kubernetes.io/role/elb";
const INTERNAL_ELB_ROLE_TAG: &str = "kubernetes.io/role/internal-elb";

/// One public subnet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubnetRecord {
    /// Subnet node
    pub node_id: NodeId,
    /// Runtime subnet id
    pub id: Expr,
    /// CIDR block
    pub cidr: String,
    /// Availability zone name
    pub availability_zone: String,
    /// Route-table association node
    pub association: NodeId,
}

/// Declared network
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkTopology {
    /// VPC node
    pub vpc_node: NodeId,
    /// Runtime VPC id
    pub vpc_id: Expr,
    /// Subnets in AZ order
    pub subnets: Vec<SubnetRecord>,
}

impl NetworkTopology {
    /// Runtime subnet ids in AZ order
    pub fn subnet_ids(&self) -> Vec<Expr> {
        self.subnets.iter().map(|s| s.id.clone()).collect()
    }

    /// VPC, subnet and association nodes the cluster must wait for
    pub fn readiness_nodes(&self) -> Vec<NodeId> {
        std::iter::once(self.vpc_node.clone())
            .chain(self.subnets.iter().map(|s| s.node_id.clone()))
            .chain(self.subnets.iter().map(|s| s.association.clone()))
            .collect()
    }
}

/// `cidrsubnet(base, newbits, index)`: the `index`-th block of `base`
/// extended by `newbits` prefix bits
pub fn cidrsubnet(base: &str, newbits: u8, index: u32) -> Result<String> {
    let (addr, prefix) = parse_cidr(base)
        .map_err(|msg| Error::invalid_config_for_field("network", "network.cidrBlock", msg))?;
    let newbits = u32::from(newbits);
    let new_prefix = prefix + newbits;
    if new_prefix > 32 {
        return Err(Error::invalid_config_for_field(
            "network",
            "network.subnetNewbits",
            format!("{base} cannot be extended by {newbits} bits"),
        ));
    }
    let capacity = 1u64 << newbits;
    if u64::from(index) >= capacity {
        return Err(Error::invalid_config_for(
            "network",
            format!("subnet index {index} exceeds the {capacity} subnets of {base} /+{newbits}"),
        ));
    }

    let network = u32::from(addr) & prefix_mask(prefix);
    let offset = index.checked_shl(32 - new_prefix).unwrap_or(0);
    Ok(format!("{}/{new_prefix}", Ipv4Addr::from(network | offset)))
}

fn prefix_mask(prefix: u32) -> u32 {
    u32::MAX.checked_shl(32 - prefix).unwrap_or(0)
}

/// `<region><letter>`, `a` for index 0
pub fn availability_zone(region: &str, index: u32) -> Result<String> {
    if index >= MAX_AVAILABILITY_ZONES {
        return Err(Error::invalid_config_for_field(
            "network",
            "network.availabilityZones",
            format!("zone index {index} has no letter"),
        ));
    }
    let letter = char::from(b'a' + index as u8);
    Ok(format!("{region}{letter}"))
}

fn name_tags(cluster_name: &str, name: &str, owned: bool) -> Map<String, Value> {
    let mut tags = Map::new();
    tags.insert("Name".to_string(), Value::String(format!("{cluster_name}-{name}")));
    if owned {
        tags.insert(
            format!("kubernetes.io/cluster/{cluster_name}"),
            Value::String("owned".to_string()),
        );
    }
    tags
}

/// Declare the VPC and everything public traffic needs
pub fn declare_network(
    graph: &mut ResourceGraph,
    provider: &str,
    cluster_name: &str,
    region: &str,
    config: &NetworkConfig,
) -> Result<NetworkTopology> {
    let vpc = graph.add_node(
        ResourceNode::resource(VPC_NODE, "aws_vpc")
            .with_provider(provider)
            .with_attr("cidr_block", config.cidr_block.as_str())
            .with_attr("enable_dns_support", true)
            .with_attr("enable_dns_hostnames", true)
            .with_attr("tags", name_tags(cluster_name, "vpc", true)),
    )?;
    let vpc_id = Expr::reference(&vpc, "id");

    let igw = graph.add_node(
        ResourceNode::resource(INTERNET_GATEWAY_NODE, "aws_internet_gateway")
            .with_provider(provider)
            .with_expr("vpc_id", &vpc_id)
            .with_attr("tags", name_tags(cluster_name, "igw", false)),
    )?;
    let route_table = graph.add_node(
        ResourceNode::resource(ROUTE_TABLE_NODE, "aws_route_table")
            .with_provider(provider)
            .with_expr("vpc_id", &vpc_id)
            .with_attr("tags", name_tags(cluster_name, "public-rtb", false)),
    )?;
    let route_table_id = Expr::reference(&route_table, "id");
    graph.add_node(
        ResourceNode::resource(DEFAULT_ROUTE_NODE, "aws_route")
            .with_provider(provider)
            .with_expr("route_table_id", &route_table_id)
            .with_attr("destination_cidr_block", "0.0.0.0/0")
            .with_expr("gateway_id", &Expr::reference(&igw, "id")),
    )?;

    let mut subnets = Vec::new();
    for index in 0..config.availability_zones {
        let number = index + 1;
        let cidr = cidrsubnet(&config.cidr_block, config.subnet_newbits, index)?;
        let zone = availability_zone(region, index)?;

        let mut tags = name_tags(cluster_name, &format!("public-subnet-{number}"), true);
        tags.insert(ELB_ROLE_TAG.to_string(), json!("1"));
        tags.insert(INTERNAL_ELB_ROLE_TAG.to_string(), json!("1"));

        let subnet = graph.add_node(
            ResourceNode::resource(format!("public-subnet-{number}"), "aws_subnet")
                .with_provider(provider)
                .with_expr("vpc_id", &vpc_id)
                .with_attr("cidr_block", cidr.as_str())
                .with_attr("availability_zone", zone.as_str())
                .with_attr("map_public_ip_on_launch", true)
                .with_attr("tags", tags),
        )?;
        let subnet_id = Expr::reference(&subnet, "id");
        let association = graph.add_node(
            ResourceNode::resource(format!("public-rta-{number}"), "aws_route_table_association")
                .with_provider(provider)
                .with_expr("subnet_id", &subnet_id)
                .with_expr("route_table_id", &route_table_id),
        )?;
        debug!(subnet = %subnet, cidr = %cidr, zone = %zone, "declared public subnet");

        subnets.push(SubnetRecord {
            node_id: subnet,
            id: subnet_id,
            cidr,
            availability_zone: zone,
            association,
        });
    }

    info!(vpc = %config.cidr_block, subnets = subnets.len(), "declared network topology");
    Ok(NetworkTopology {
        vpc_node: vpc,
        vpc_id,
        subnets,
    })
}
