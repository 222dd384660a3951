//! Resource kinds understood by provisioning backends

use crate::error::CloudError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Kind of a cloud resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Vpc,
    InternetGateway,
    RouteTable,
    Route,
    Subnet,
    RouteTableAssociation,
    SecurityGroup,
    DbSubnetGroup,
    DbInstance,
    LaunchTemplate,
    TargetGroup,
    LoadBalancer,
    Listener,
    AutoScalingGroup,
    ScalingPolicy,
    DnsRecord,
    SnsTopic,
    IamRole,
    LambdaFunction,
    SnsSubscription,
    LambdaPermission,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 21] = [
        ResourceKind::Vpc,
        ResourceKind::InternetGateway,
        ResourceKind::RouteTable,
        ResourceKind::Route,
        ResourceKind::Subnet,
        ResourceKind::RouteTableAssociation,
        ResourceKind::SecurityGroup,
        ResourceKind::DbSubnetGroup,
        ResourceKind::DbInstance,
        ResourceKind::LaunchTemplate,
        ResourceKind::TargetGroup,
        ResourceKind::LoadBalancer,
        ResourceKind::Listener,
        ResourceKind::AutoScalingGroup,
        ResourceKind::ScalingPolicy,
        ResourceKind::DnsRecord,
        ResourceKind::SnsTopic,
        ResourceKind::IamRole,
        ResourceKind::LambdaFunction,
        ResourceKind::SnsSubscription,
        ResourceKind::LambdaPermission,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Vpc => "vpc",
            ResourceKind::InternetGateway => "internet-gateway",
            ResourceKind::RouteTable => "route-table",
            ResourceKind::Route => "route",
            ResourceKind::Subnet => "subnet",
            ResourceKind::RouteTableAssociation => "route-table-association",
            ResourceKind::SecurityGroup => "security-group",
            ResourceKind::DbSubnetGroup => "db-subnet-group",
            ResourceKind::DbInstance => "db-instance",
            ResourceKind::LaunchTemplate => "launch-template",
            ResourceKind::TargetGroup => "target-group",
            ResourceKind::LoadBalancer => "load-balancer",
            ResourceKind::Listener => "listener",
            ResourceKind::AutoScalingGroup => "auto-scaling-group",
            ResourceKind::ScalingPolicy => "scaling-policy",
            ResourceKind::DnsRecord => "dns-record",
            ResourceKind::SnsTopic => "sns-topic",
            ResourceKind::IamRole => "iam-role",
            ResourceKind::LambdaFunction => "lambda-function",
            ResourceKind::SnsSubscription => "sns-subscription",
            ResourceKind::LambdaPermission => "lambda-permission",
        }
    }

    /// Short prefix used for provider-style identifiers (`vpc-0a1b2c`)
    pub fn id_prefix(&self) -> &'static str {
        match self {
            ResourceKind::Vpc => "vpc",
            ResourceKind::InternetGateway => "igw",
            ResourceKind::RouteTable => "rtb",
            ResourceKind::Route => "r",
            ResourceKind::Subnet => "subnet",
            ResourceKind::RouteTableAssociation => "rtbassoc",
            ResourceKind::SecurityGroup => "sg",
            ResourceKind::DbSubnetGroup => "dbsubnet",
            ResourceKind::DbInstance => "db",
            ResourceKind::LaunchTemplate => "lt",
            ResourceKind::TargetGroup => "tg",
            ResourceKind::LoadBalancer => "alb",
            ResourceKind::Listener => "listener",
            ResourceKind::AutoScalingGroup => "asg",
            ResourceKind::ScalingPolicy => "policy",
            ResourceKind::DnsRecord => "dns",
            ResourceKind::SnsTopic => "sns",
            ResourceKind::IamRole => "role",
            ResourceKind::LambdaFunction => "lambda",
            ResourceKind::SnsSubscription => "sub",
            ResourceKind::LambdaPermission => "perm",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CloudError::UnknownKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse_matches_display() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.to_string().parse::<ResourceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_kind_serde_uses_kebab_case() {
        let json = serde_json::to_string(&ResourceKind::AutoScalingGroup).unwrap();
        assert_eq!(json, "\"auto-scaling-group\"");
    }

    #[test]
    fn test_unknown_kind() {
        assert!(matches!(
            "nat-gateway".parse::<ResourceKind>(),
            Err(CloudError::UnknownKind(_))
        ));
    }
}
