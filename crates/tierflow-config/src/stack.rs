//! Validated stack configuration
//!
//! [`StackConfig::from_values`] turns raw key/value pairs into typed
//! settings. Every missing required key is reported at once so an operator
//! can fix the file in a single pass.

use crate::error::{ConfigError, Result};
use crate::secret::SecretString;
use crate::values::ConfigValues;
use ipnet::IpNet;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

/// Keys that must be present in every stack file
pub const REQUIRED_KEYS: &[&str] = &[
    "region",
    "vpcCidrBlock",
    "vpcName",
    "internetGatewayName",
    "publicRouteTableName",
    "privateRouteTableName",
    "publicSubnetsName",
    "privateSubnetsName",
    "publicSubnetAssoName",
    "privateSubnetAssoName",
    "destinationCidrBlock",
    "amiId",
    "keyName",
    "dbUsername",
    "dbPassword",
    "hostedZoneId",
    "domainName",
    "certificateArn",
    "snsTopicName",
];

/// Keys with defaults
pub const OPTIONAL_KEYS: &[&str] = &[
    "subnetPrefixLength",
    "zoneCap",
    "zoneOrdering",
    "instanceType",
    "appPort",
    "minSize",
    "maxSize",
    "desiredCapacity",
    "targetCpuUtilization",
    "dbName",
    "dbInstanceClass",
    "dbAllocatedStorage",
    "dbEngineVersion",
    "lambdaRuntime",
    "lambdaHandler",
    "lambdaPackage",
    "publicRouteName",
    "lbSecurityGroupName",
    "appSecurityGroupName",
    "dbSecurityGroupName",
    "dbSubnetGroupName",
    "dbInstanceName",
    "launchTemplateName",
    "targetGroupName",
    "loadBalancerName",
    "httpsListenerName",
    "httpListenerName",
    "autoScalingGroupName",
    "scalingPolicyName",
    "dnsRecordName",
    "lambdaRoleName",
    "lambdaFunctionName",
    "snsSubscriptionName",
    "lambdaPermissionName",
];

const LAMBDA_ENV_PREFIX: &str = "lambdaEnv.";
const SECRET_MARKERS: &[&str] = &["SECRET", "PASSWORD", "TOKEN"];

/// All keys that can be overridden from the environment
pub fn known_keys() -> Vec<&'static str> {
    REQUIRED_KEYS
        .iter()
        .chain(OPTIONAL_KEYS.iter())
        .copied()
        .collect()
}

/// Fully validated configuration of one stack
#[derive(Debug, Clone, Serialize)]
pub struct StackConfig {
    pub region: String,
    pub network: NetworkConfig,
    pub names: ResourceNames,
    pub compute: ComputeConfig,
    pub database: DatabaseConfig,
    pub dns: DnsConfig,
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkConfig {
    pub vpc_cidr: IpNet,

    /// Prefix length of every subnet
    pub subnet_prefix_len: u8,

    /// Maximum number of availability zones used
    pub zone_cap: usize,

    /// Sort zone identifiers before truncating to `zone_cap`
    pub sort_zones: bool,

    /// Destination of the public default route
    pub destination_cidr: IpNet,
}

/// Logical names of every declared resource
#[derive(Debug, Clone, Serialize)]
pub struct ResourceNames {
    pub vpc: String,
    pub internet_gateway: String,
    pub public_route_table: String,
    pub private_route_table: String,
    pub public_route: String,
    /// Prefix; the zone index is appended
    pub public_subnets: String,
    /// Prefix; the zone index is appended
    pub private_subnets: String,
    /// Prefix; the zone index is appended
    pub public_subnet_association: String,
    /// Prefix; the zone index is appended
    pub private_subnet_association: String,
    pub lb_security_group: String,
    pub app_security_group: String,
    pub db_security_group: String,
    pub db_subnet_group: String,
    pub db_instance: String,
    pub launch_template: String,
    pub target_group: String,
    pub load_balancer: String,
    pub https_listener: String,
    pub http_listener: String,
    pub auto_scaling_group: String,
    pub scaling_policy: String,
    pub dns_record: String,
    pub sns_topic: String,
    pub lambda_role: String,
    pub lambda_function: String,
    pub sns_subscription: String,
    pub lambda_permission: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComputeConfig {
    pub ami_id: String,
    pub instance_type: String,
    pub key_name: String,
    pub app_port: u16,
    pub min_size: u32,
    pub max_size: u32,
    pub desired_capacity: u32,
    pub target_cpu_utilization: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseConfig {
    pub name: String,
    pub username: String,
    pub password: SecretString,
    pub instance_class: String,
    pub allocated_storage: u32,
    pub engine_version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DnsConfig {
    pub hosted_zone_id: String,
    pub domain_name: String,
    pub certificate_arn: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventsConfig {
    pub runtime: String,
    pub handler: String,

    /// Reference to the packaged function code
    pub package: String,

    pub environment: BTreeMap<String, EnvValue>,
}

/// A Lambda environment value
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EnvValue {
    Plain(String),
    Secret(SecretString),
}

impl EnvValue {
    pub fn is_secret(&self) -> bool {
        matches!(self, EnvValue::Secret(_))
    }
}

/// Lookup helper over raw values
struct Reader<'a> {
    values: &'a ConfigValues,
    missing: Vec<String>,
}

impl<'a> Reader<'a> {
    fn new(values: &'a ConfigValues) -> Self {
        Self {
            values,
            missing: Vec::new(),
        }
    }

    fn get(&self, key: &str) -> Option<&'a str> {
        self.values
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Record `key` as missing instead of failing immediately
    fn required(&mut self, key: &str) -> String {
        match self.get(key) {
            Some(value) => value.to_string(),
            None => {
                self.missing.push(key.to_string());
                String::new()
            }
        }
    }

    fn or_default(&self, key: &str, default: impl FnOnce() -> String) -> String {
        self.get(key).map(str::to_string).unwrap_or_else(default)
    }

    fn parsed<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(raw) => parse_value(key, raw),
            None => Ok(default),
        }
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn parse_network(key: &str, raw: &str) -> Result<IpNet> {
    let net: IpNet = parse_value(key, raw)?;
    if net != net.trunc() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{} has host bits set (did you mean {}?)", net, net.trunc()),
        });
    }
    Ok(net)
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

impl StackConfig {
    /// Validate raw values
    pub fn from_values(values: &ConfigValues) -> Result<Self> {
        let mut r = Reader::new(values);

        let region = r.required("region");
        let vpc_cidr_raw = r.required("vpcCidrBlock");
        let vpc = r.required("vpcName");
        let internet_gateway = r.required("internetGatewayName");
        let public_route_table = r.required("publicRouteTableName");
        let private_route_table = r.required("privateRouteTableName");
        let public_subnets = r.required("publicSubnetsName");
        let private_subnets = r.required("privateSubnetsName");
        let public_subnet_association = r.required("publicSubnetAssoName");
        let private_subnet_association = r.required("privateSubnetAssoName");
        let destination_raw = r.required("destinationCidrBlock");
        let ami_id = r.required("amiId");
        let key_name = r.required("keyName");
        let db_username = r.required("dbUsername");
        let db_password = r.required("dbPassword");
        let hosted_zone_id = r.required("hostedZoneId");
        let domain_name = r.required("domainName");
        let certificate_arn = r.required("certificateArn");
        let sns_topic = r.required("snsTopicName");

        if !r.missing.is_empty() {
            return Err(ConfigError::MissingKeys(r.missing));
        }

        let vpc_cidr = parse_network("vpcCidrBlock", &vpc_cidr_raw)?;
        let destination_cidr = parse_network("destinationCidrBlock", &destination_raw)?;

        let default_prefix = vpc_cidr.prefix_len().saturating_add(8);
        let subnet_prefix_len = r.parsed("subnetPrefixLength", default_prefix)?;

        let zone_cap: usize = r.parsed("zoneCap", 3)?;
        if zone_cap == 0 {
            return Err(invalid("zoneCap", "must be at least 1"));
        }

        let sort_zones = match r.get("zoneOrdering").unwrap_or("sorted") {
            "sorted" => true,
            "provider" => false,
            other => {
                return Err(invalid(
                    "zoneOrdering",
                    format!("expected 'sorted' or 'provider', got '{}'", other),
                ));
            }
        };

        let min_size: u32 = r.parsed("minSize", 1)?;
        let max_size: u32 = r.parsed("maxSize", 3)?;
        let desired_capacity: u32 = r.parsed("desiredCapacity", min_size.max(2).min(max_size))?;
        if min_size > max_size {
            return Err(invalid("minSize", "must not exceed maxSize"));
        }
        if desired_capacity < min_size || desired_capacity > max_size {
            return Err(invalid(
                "desiredCapacity",
                format!("must be between {} and {}", min_size, max_size),
            ));
        }

        let target_cpu_utilization: f64 = r.parsed("targetCpuUtilization", 60.0)?;
        if !(target_cpu_utilization > 0.0 && target_cpu_utilization <= 100.0) {
            return Err(invalid("targetCpuUtilization", "must be in (0, 100]"));
        }

        let names = ResourceNames {
            public_route: r.or_default("publicRouteName", || "public-route".to_string()),
            lb_security_group: r.or_default("lbSecurityGroupName", || format!("{}-lb-sg", vpc)),
            app_security_group: r.or_default("appSecurityGroupName", || format!("{}-app-sg", vpc)),
            db_security_group: r.or_default("dbSecurityGroupName", || format!("{}-db-sg", vpc)),
            db_subnet_group: r.or_default("dbSubnetGroupName", || format!("{}-db-subnets", vpc)),
            db_instance: r.or_default("dbInstanceName", || format!("{}-db", vpc)),
            launch_template: r.or_default("launchTemplateName", || format!("{}-app-lt", vpc)),
            target_group: r.or_default("targetGroupName", || format!("{}-app-tg", vpc)),
            load_balancer: r.or_default("loadBalancerName", || format!("{}-alb", vpc)),
            https_listener: r.or_default("httpsListenerName", || format!("{}-https", vpc)),
            http_listener: r.or_default("httpListenerName", || format!("{}-http", vpc)),
            auto_scaling_group: r.or_default("autoScalingGroupName", || format!("{}-app-asg", vpc)),
            scaling_policy: r.or_default("scalingPolicyName", || format!("{}-cpu-target", vpc)),
            dns_record: r.or_default("dnsRecordName", || format!("{}-alias", vpc)),
            lambda_role: r.or_default("lambdaRoleName", || format!("{}-lambda-role", vpc)),
            lambda_function: r.or_default("lambdaFunctionName", || format!("{}-events", vpc)),
            sns_subscription: r.or_default("snsSubscriptionName", || format!("{}-events-sub", vpc)),
            lambda_permission: r.or_default("lambdaPermissionName", || {
                format!("{}-events-invoke", vpc)
            }),
            sns_topic,
            vpc,
            internet_gateway,
            public_route_table,
            private_route_table,
            public_subnets,
            private_subnets,
            public_subnet_association,
            private_subnet_association,
        };

        let environment = values
            .iter()
            .filter_map(|(key, value)| {
                let name = key.strip_prefix(LAMBDA_ENV_PREFIX)?;
                let upper = name.to_ascii_uppercase();
                let value = if SECRET_MARKERS.iter().any(|m| upper.contains(m)) {
                    EnvValue::Secret(SecretString::new(value.clone()))
                } else {
                    EnvValue::Plain(value.clone())
                };
                Some((name.to_string(), value))
            })
            .collect();

        let config = Self {
            region,
            network: NetworkConfig {
                vpc_cidr,
                subnet_prefix_len,
                zone_cap,
                sort_zones,
                destination_cidr,
            },
            compute: ComputeConfig {
                ami_id,
                instance_type: r.or_default("instanceType", || "t2.micro".to_string()),
                key_name,
                app_port: r.parsed("appPort", 8080)?,
                min_size,
                max_size,
                desired_capacity,
                target_cpu_utilization,
            },
            database: DatabaseConfig {
                name: r.or_default("dbName", || "appdb".to_string()),
                username: db_username,
                password: SecretString::new(db_password),
                instance_class: r.or_default("dbInstanceClass", || "db.t3.micro".to_string()),
                allocated_storage: r.parsed("dbAllocatedStorage", 20)?,
                engine_version: r.or_default("dbEngineVersion", || "16".to_string()),
            },
            dns: DnsConfig {
                hosted_zone_id,
                domain_name,
                certificate_arn,
            },
            events: EventsConfig {
                runtime: r.or_default("lambdaRuntime", || "python3.12".to_string()),
                handler: r.or_default("lambdaHandler", || "handler.lambda_handler".to_string()),
                package: r.or_default("lambdaPackage", || "function.zip".to_string()),
                environment,
            },
            names,
        };

        tracing::debug!(
            region = %config.region,
            vpc_cidr = %config.network.vpc_cidr,
            "Validated stack configuration"
        );
        Ok(config)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_values() -> ConfigValues {
        [
            ("region", "us-east-1"),
            ("vpcCidrBlock", "10.0.0.0/16"),
            ("vpcName", "main-vpc"),
            ("internetGatewayName", "main-igw"),
            ("publicRouteTableName", "public-rt"),
            ("privateRouteTableName", "private-rt"),
            ("publicSubnetsName", "public-subnet-"),
            ("privateSubnetsName", "private-subnet-"),
            ("publicSubnetAssoName", "public-assoc-"),
            ("privateSubnetAssoName", "private-assoc-"),
            ("destinationCidrBlock", "0.0.0.0/0"),
            ("amiId", "ami-0123456789abcdef0"),
            ("keyName", "deploy-key"),
            ("dbUsername", "app"),
            ("dbPassword", "s3cr3t-pass"),
            ("hostedZoneId", "Z0123456789"),
            ("domainName", "app.example.com"),
            ("certificateArn", "arn:aws:acm:us-east-1:123456789012:certificate/abc"),
            ("snsTopicName", "app-events"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_defaults() {
        let config = StackConfig::from_values(&sample_values()).unwrap();

        assert_eq!(config.network.subnet_prefix_len, 24);
        assert_eq!(config.network.zone_cap, 3);
        assert!(config.network.sort_zones);
        assert_eq!(config.compute.app_port, 8080);
        assert_eq!(config.compute.desired_capacity, 2);
        assert_eq!(config.names.load_balancer, "main-vpc-alb");
        assert_eq!(config.names.public_route, "public-route");
        assert_eq!(config.database.password.expose(), "s3cr3t-pass");
    }

    #[test]
    fn test_all_missing_keys_reported() {
        let mut values = sample_values();
        values.remove("region");
        values.remove("amiId");
        values.insert("dbPassword".to_string(), "   ".to_string());

        match StackConfig::from_values(&values) {
            Err(ConfigError::MissingKeys(keys)) => {
                assert_eq!(keys, vec!["region", "amiId", "dbPassword"]);
            }
            other => panic!("expected MissingKeys, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_cidr() {
        let mut values = sample_values();
        values.insert("vpcCidrBlock".to_string(), "10.0.0.0/33".to_string());
        assert!(matches!(
            StackConfig::from_values(&values),
            Err(ConfigError::InvalidValue { key, .. }) if key == "vpcCidrBlock"
        ));
    }

    #[test]
    fn test_host_bits_rejected() {
        let mut values = sample_values();
        values.insert("vpcCidrBlock".to_string(), "10.0.1.0/16".to_string());
        let err = StackConfig::from_values(&values).unwrap_err();
        assert!(err.to_string().contains("10.0.0.0/16"));
    }

    #[test]
    fn test_zone_settings() {
        let mut values = sample_values();
        values.insert("zoneCap".to_string(), "2".to_string());
        values.insert("zoneOrdering".to_string(), "provider".to_string());
        values.insert("subnetPrefixLength".to_string(), "20".to_string());

        let config = StackConfig::from_values(&values).unwrap();
        assert_eq!(config.network.zone_cap, 2);
        assert!(!config.network.sort_zones);
        assert_eq!(config.network.subnet_prefix_len, 20);

        values.insert("zoneCap".to_string(), "0".to_string());
        assert!(StackConfig::from_values(&values).is_err());

        values.insert("zoneCap".to_string(), "3".to_string());
        values.insert("zoneOrdering".to_string(), "random".to_string());
        assert!(StackConfig::from_values(&values).is_err());
    }

    #[test]
    fn test_capacity_bounds() {
        let mut values = sample_values();
        values.insert("minSize".to_string(), "2".to_string());
        values.insert("maxSize".to_string(), "4".to_string());
        values.insert("desiredCapacity".to_string(), "5".to_string());

        assert!(matches!(
            StackConfig::from_values(&values),
            Err(ConfigError::InvalidValue { key, .. }) if key == "desiredCapacity"
        ));
    }

    #[test]
    fn test_lambda_environment_secrets() {
        let mut values = sample_values();
        values.insert("lambdaEnv.STAGE".to_string(), "prod".to_string());
        values.insert("lambdaEnv.API_TOKEN".to_string(), "tok-123".to_string());

        let config = StackConfig::from_values(&values).unwrap();
        let env = &config.events.environment;
        assert!(!env["STAGE"].is_secret());
        assert!(env["API_TOKEN"].is_secret());

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("tok-123"));
        assert!(!json.contains("s3cr3t-pass"));
    }
}
