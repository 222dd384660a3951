//! Network topology
//!
//! Computes the subnet layout of a VPC: one public and one private subnet per
//! selected availability zone, carved out of the VPC block in ascending
//! order. Public subnets take blocks `[0, n)` and private subnets take
//! `[n, 2n)`, so public subnet `i` and private subnet `i` share zone `i`.

use crate::cidr::{self, NetworkBlock, Partition};
use crate::error::TopologyError;
use crate::zones::{self, DEFAULT_ZONE_CAP, Zone, ZoneOrdering};
use serde::{Deserialize, Serialize};
use tierflow_config::ResourceNames;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Public,
    Private,
}

impl Tier {
    /// Instances in public subnets receive a public address on launch
    pub fn maps_public_ip(&self) -> bool {
        matches!(self, Tier::Public)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Public => "public",
            Tier::Private => "private",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Naming prefixes of the generated network resources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyNames {
    pub public_subnets: String,
    pub private_subnets: String,
    pub public_association: String,
    pub private_association: String,
    pub public_route_table: String,
    pub private_route_table: String,
}

impl Default for TopologyNames {
    fn default() -> Self {
        Self {
            public_subnets: "public-subnet-".to_string(),
            private_subnets: "private-subnet-".to_string(),
            public_association: "public-subnet-assoc-".to_string(),
            private_association: "private-subnet-assoc-".to_string(),
            public_route_table: "public-route-table".to_string(),
            private_route_table: "private-route-table".to_string(),
        }
    }
}

impl From<&ResourceNames> for TopologyNames {
    fn from(names: &ResourceNames) -> Self {
        Self {
            public_subnets: names.public_subnets.clone(),
            private_subnets: names.private_subnets.clone(),
            public_association: names.public_subnet_association.clone(),
            private_association: names.private_subnet_association.clone(),
            public_route_table: names.public_route_table.clone(),
            private_route_table: names.private_route_table.clone(),
        }
    }
}

impl TopologyNames {
    fn subnet_prefix(&self, tier: Tier) -> &str {
        match tier {
            Tier::Public => &self.public_subnets,
            Tier::Private => &self.private_subnets,
        }
    }

    fn association_prefix(&self, tier: Tier) -> &str {
        match tier {
            Tier::Public => &self.public_association,
            Tier::Private => &self.private_association,
        }
    }

    fn route_table(&self, tier: Tier) -> &str {
        match tier {
            Tier::Public => &self.public_route_table,
            Tier::Private => &self.private_route_table,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetSpec {
    pub name: String,
    pub tier: Tier,
    pub zone: Zone,
    /// Index of the zone in the selected working set
    pub zone_index: usize,
    /// Index of the block in the partition of the VPC block
    pub block_index: usize,
    pub cidr: NetworkBlock,
    pub route_table: String,
    pub map_public_ip_on_launch: bool,
}

/// Binds a subnet to its tier's route table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationSpec {
    pub name: String,
    pub subnet: String,
    pub route_table: String,
    pub tier: Tier,
}

/// Computed subnet layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyPlan {
    pub vpc_cidr: NetworkBlock,
    pub subnet_prefix_len: u8,
    pub zones: Vec<Zone>,
    /// Public subnets first, then private, each by zone index
    pub subnets: Vec<SubnetSpec>,
    pub associations: Vec<AssociationSpec>,
}

impl TopologyPlan {
    pub fn subnets_of(&self, tier: Tier) -> impl Iterator<Item = &SubnetSpec> {
        self.subnets.iter().filter(move |s| s.tier == tier)
    }

    pub fn public_subnets(&self) -> impl Iterator<Item = &SubnetSpec> {
        self.subnets_of(Tier::Public)
    }

    pub fn private_subnets(&self) -> impl Iterator<Item = &SubnetSpec> {
        self.subnets_of(Tier::Private)
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    /// Canonical JSON form
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Builder for [`TopologyPlan`]
#[derive(Debug, Clone)]
pub struct TopologyBuilder {
    vpc_cidr: NetworkBlock,
    subnet_prefix_len: u8,
    zone_cap: usize,
    ordering: ZoneOrdering,
    names: TopologyNames,
}

impl TopologyBuilder {
    pub fn new(vpc_cidr: NetworkBlock, subnet_prefix_len: u8) -> Self {
        Self {
            vpc_cidr,
            subnet_prefix_len,
            zone_cap: DEFAULT_ZONE_CAP,
            ordering: ZoneOrdering::default(),
            names: TopologyNames::default(),
        }
    }

    pub fn zone_cap(mut self, cap: usize) -> Self {
        self.zone_cap = cap;
        self
    }

    pub fn ordering(mut self, ordering: ZoneOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn names(mut self, names: TopologyNames) -> Self {
        self.names = names;
        self
    }

    /// Check that `zone_count` zones fit: one public and one private
    /// block each
    pub fn check_capacity(&self, zone_count: usize) -> Result<Partition, TopologyError> {
        let required = zone_count.saturating_mul(2);
        let insufficient = |available: u128| TopologyError::InsufficientAddressSpace {
            parent: self.vpc_cidr.trunc(),
            prefix_len: self.subnet_prefix_len,
            required,
            available,
        };

        // Subnets as wide as the VPC leave room for a single block
        if self.subnet_prefix_len == self.vpc_cidr.prefix_len() {
            return Err(insufficient(1));
        }
        let partition = cidr::partition(self.vpc_cidr, self.subnet_prefix_len)?;

        match partition.block_count() {
            Some(available) if available < required as u128 => Err(insufficient(available)),
            _ => Ok(partition),
        }
    }

    /// Compute the layout over the zones a backend reported
    pub fn build(&self, available: &[Zone]) -> Result<TopologyPlan, TopologyError> {
        let zones = zones::select(available, self.zone_cap, self.ordering)?;
        let n = zones.len();
        let required = 2 * n;

        let partition = self.check_capacity(n)?;
        let blocks: Vec<NetworkBlock> = partition.clone().take(required).collect();

        let mut subnets = Vec::with_capacity(required);
        let mut associations = Vec::with_capacity(required);

        for (tier, offset) in [(Tier::Public, 0), (Tier::Private, n)] {
            for (zone_index, zone) in zones.iter().enumerate() {
                let block_index = offset + zone_index;
                let subnet_name = format!("{}{}", self.names.subnet_prefix(tier), zone_index);
                let route_table = self.names.route_table(tier).to_string();

                associations.push(AssociationSpec {
                    name: format!("{}{}", self.names.association_prefix(tier), zone_index),
                    subnet: subnet_name.clone(),
                    route_table: route_table.clone(),
                    tier,
                });
                subnets.push(SubnetSpec {
                    name: subnet_name,
                    tier,
                    zone: zone.clone(),
                    zone_index,
                    block_index,
                    cidr: blocks[block_index],
                    route_table,
                    map_public_ip_on_launch: tier.maps_public_ip(),
                });
            }
        }

        tracing::debug!(
            vpc_cidr = %partition.parent(),
            zones = n,
            subnets = subnets.len(),
            "Computed network topology"
        );

        Ok(TopologyPlan {
            vpc_cidr: partition.parent(),
            subnet_prefix_len: self.subnet_prefix_len,
            zones,
            subnets,
            associations,
        })
    }
}

/// Shorthand for [`TopologyBuilder`] with default names and ordering
pub fn build(
    vpc_cidr: NetworkBlock,
    available: &[Zone],
    zone_cap: usize,
    subnet_prefix_len: u8,
) -> Result<TopologyPlan, TopologyError> {
    TopologyBuilder::new(vpc_cidr, subnet_prefix_len)
        .zone_cap(zone_cap)
        .build(available)
}
