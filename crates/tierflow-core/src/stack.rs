//! Multi-tier stack declaration
//!
//! Turns a validated [`StackConfig`] and a computed [`TopologyPlan`] into the
//! dependency graph of every resource in the stack: network, security
//! groups, database, compute behind a load balancer, DNS and the event
//! handler.

use crate::binding::{Input, Inputs};
use crate::error::{GraphError, Result};
use crate::graph::DependencyGraph;
use crate::topology::{Tier, TopologyBuilder, TopologyNames, TopologyPlan};
use crate::zones::ZoneOrdering;
use serde_json::json;
use tierflow_cloud::{ProvisioningBackend, ResourceKind};
use tierflow_config::{EnvValue, StackConfig};

const POSTGRES_PORT: u16 = 5432;

/// Bootstrap script of application instances
pub const USER_DATA_TEMPLATE: &str = r#"#!/bin/bash
set -euo pipefail
cat > /etc/app.env <<'EOF'
DB_HOST={{ db_host }}
DB_PORT={{ db_port }}
DB_NAME={{ db_name }}
DB_USER={{ db_user }}
DB_PASSWORD={{ db_password }}
SNS_TOPIC_ARN={{ topic_arn }}
APP_PORT={{ app_port }}
EOF
systemctl restart app.service
"#;

const LAMBDA_BASIC_EXECUTION_POLICY: &str =
    "arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";

/// Topology and resource graph of one stack
#[derive(Debug, Clone)]
pub struct Stack {
    pub topology: TopologyPlan,
    pub graph: DependencyGraph,
}

/// Topology builder configured from `config`
pub fn topology_builder(config: &StackConfig) -> TopologyBuilder {
    TopologyBuilder::new(config.network.vpc_cidr, config.network.subnet_prefix_len)
        .zone_cap(config.network.zone_cap)
        .ordering(ZoneOrdering::from_sorted(config.network.sort_zones))
        .names(TopologyNames::from(&config.names))
}

/// Query zones, compute the topology and declare every resource
///
/// Fails before any mutation when the topology cannot be built.
pub async fn plan_stack(config: &StackConfig, backend: &dyn ProvisioningBackend) -> Result<Stack> {
    let zones = backend.list_zones(&config.region).await?;
    tracing::debug!(region = %config.region, zones = zones.len(), "Listed availability zones");

    let topology = topology_builder(config).build(&zones)?;
    let graph = declare_stack(config, &topology)?;
    Ok(Stack { topology, graph })
}

fn inputs<const N: usize>(entries: [(&str, Input); N]) -> Inputs {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn tags(name: &str) -> Input {
    Input::map([("Name", Input::from(name))])
}

fn ids<'a>(names: impl IntoIterator<Item = &'a str>) -> Input {
    Input::list(names.into_iter().map(|name| Input::output(name, "id")))
}

fn tcp_from_cidr(port: u16, cidr: &str) -> Input {
    Input::map([
        ("protocol", Input::from("tcp")),
        ("from_port", Input::from(port)),
        ("to_port", Input::from(port)),
        ("cidr_blocks", Input::list([Input::from(cidr)])),
    ])
}

fn tcp_from_group(port: u16, group: &str) -> Input {
    Input::map([
        ("protocol", Input::from("tcp")),
        ("from_port", Input::from(port)),
        ("to_port", Input::from(port)),
        ("source_security_group_id", Input::output(group, "id")),
    ])
}

fn allow_all_egress() -> Input {
    Input::list([Input::map([
        ("protocol", Input::from("-1")),
        ("from_port", Input::from(0u16)),
        ("to_port", Input::from(0u16)),
        ("cidr_blocks", Input::list([Input::from("0.0.0.0/0")])),
    ])])
}

/// Declare every resource of the stack
pub fn declare_stack(
    config: &StackConfig,
    topology: &TopologyPlan,
) -> std::result::Result<DependencyGraph, GraphError> {
    let mut graph = DependencyGraph::new();
    let names = &config.names;
    let vpc = names.vpc.as_str();
    let anywhere = config.network.destination_cidr.to_string();
    let no_deps: [&str; 0] = [];

    let public: Vec<&str> = topology.public_subnets().map(|s| s.name.as_str()).collect();
    let private: Vec<&str> = topology.private_subnets().map(|s| s.name.as_str()).collect();

    // Network
    graph.add_node(
        vpc,
        ResourceKind::Vpc,
        inputs([
            ("cidr_block", Input::from(topology.vpc_cidr.to_string())),
            ("enable_dns_support", Input::from(true)),
            ("enable_dns_hostnames", Input::from(true)),
            ("tags", tags(vpc)),
        ]),
        no_deps,
    )?;
    graph.add_node(
        &names.internet_gateway,
        ResourceKind::InternetGateway,
        inputs([
            ("vpc_id", Input::output(vpc, "id")),
            ("tags", tags(&names.internet_gateway)),
        ]),
        [vpc],
    )?;
    for route_table in [&names.public_route_table, &names.private_route_table] {
        graph.add_node(
            route_table,
            ResourceKind::RouteTable,
            inputs([
                ("vpc_id", Input::output(vpc, "id")),
                ("tags", tags(route_table)),
            ]),
            [vpc],
        )?;
    }
    graph.add_node(
        &names.public_route,
        ResourceKind::Route,
        inputs([
            ("route_table_id", Input::output(&names.public_route_table, "id")),
            ("destination_cidr_block", Input::from(anywhere.clone())),
            ("gateway_id", Input::output(&names.internet_gateway, "id")),
        ]),
        [&names.public_route_table, &names.internet_gateway],
    )?;

    for subnet in &topology.subnets {
        graph.add_node(
            &subnet.name,
            ResourceKind::Subnet,
            inputs([
                ("vpc_id", Input::output(vpc, "id")),
                ("cidr_block", Input::from(subnet.cidr.to_string())),
                ("availability_zone", Input::from(subnet.zone.to_string())),
                ("map_public_ip_on_launch", Input::from(subnet.map_public_ip_on_launch)),
                (
                    "tags",
                    Input::map([
                        ("Name", Input::from(subnet.name.as_str())),
                        ("Tier", Input::from(subnet.tier.as_str())),
                    ]),
                ),
            ]),
            [vpc],
        )?;
    }
    for association in &topology.associations {
        // Public subnets route through the internet gateway from the start
        let mut depends_on = vec![association.subnet.as_str(), association.route_table.as_str()];
        if association.tier == Tier::Public {
            depends_on.push(&names.public_route);
        }
        graph.add_node(
            &association.name,
            ResourceKind::RouteTableAssociation,
            inputs([
                ("subnet_id", Input::output(&association.subnet, "id")),
                ("route_table_id", Input::output(&association.route_table, "id")),
            ]),
            depends_on,
        )?;
    }

    // Security groups
    graph.add_node(
        &names.lb_security_group,
        ResourceKind::SecurityGroup,
        inputs([
            ("vpc_id", Input::output(vpc, "id")),
            ("description", Input::from("Load balancer: HTTP and HTTPS from anywhere")),
            (
                "ingress",
                Input::list([tcp_from_cidr(80, &anywhere), tcp_from_cidr(443, &anywhere)]),
            ),
            ("egress", allow_all_egress()),
        ]),
        [vpc],
    )?;
    graph.add_node(
        &names.app_security_group,
        ResourceKind::SecurityGroup,
        inputs([
            ("vpc_id", Input::output(vpc, "id")),
            ("description", Input::from("Application: app port from the load balancer, SSH")),
            (
                "ingress",
                Input::list([
                    tcp_from_group(config.compute.app_port, &names.lb_security_group),
                    tcp_from_cidr(22, &anywhere),
                ]),
            ),
            ("egress", allow_all_egress()),
        ]),
        [vpc, names.lb_security_group.as_str()],
    )?;
    graph.add_node(
        &names.db_security_group,
        ResourceKind::SecurityGroup,
        inputs([
            ("vpc_id", Input::output(vpc, "id")),
            ("description", Input::from("Database: PostgreSQL from the application")),
            (
                "ingress",
                Input::list([tcp_from_group(POSTGRES_PORT, &names.app_security_group)]),
            ),
            ("egress", allow_all_egress()),
        ]),
        [vpc, names.app_security_group.as_str()],
    )?;

    // Database
    graph.add_node(
        &names.db_subnet_group,
        ResourceKind::DbSubnetGroup,
        inputs([
            ("subnet_ids", ids(private.iter().copied())),
            ("description", Input::from("Private subnets of the database tier")),
        ]),
        private.iter().copied(),
    )?;
    let db = &config.database;
    graph.add_node(
        &names.db_instance,
        ResourceKind::DbInstance,
        inputs([
            ("engine", Input::from("postgres")),
            ("engine_version", Input::from(db.engine_version.as_str())),
            ("instance_class", Input::from(db.instance_class.as_str())),
            ("allocated_storage", Input::from(db.allocated_storage)),
            ("db_name", Input::from(db.name.as_str())),
            ("username", Input::from(db.username.as_str())),
            ("password", Input::secret(db.password.clone())),
            ("port", Input::from(POSTGRES_PORT)),
            ("db_subnet_group_name", Input::output(&names.db_subnet_group, "name")),
            (
                "vpc_security_group_ids",
                Input::list([Input::output(&names.db_security_group, "id")]),
            ),
            ("publicly_accessible", Input::from(false)),
            ("skip_final_snapshot", Input::from(true)),
        ]),
        [&names.db_subnet_group, &names.db_security_group],
    )?;

    // Events
    graph.add_node(
        &names.sns_topic,
        ResourceKind::SnsTopic,
        inputs([("name", Input::from(names.sns_topic.as_str()))]),
        no_deps,
    )?;

    // Compute
    let compute = &config.compute;
    let environment = [
        ("db_host", Input::output(&names.db_instance, "address")),
        ("db_port", Input::output(&names.db_instance, "port")),
        ("db_name", Input::from(db.name.as_str())),
        ("db_user", Input::from(db.username.as_str())),
        ("db_password", Input::secret(db.password.clone())),
        ("topic_arn", Input::output(&names.sns_topic, "arn")),
        ("app_port", Input::from(compute.app_port)),
    ];
    graph.add_node(
        &names.launch_template,
        ResourceKind::LaunchTemplate,
        inputs([
            ("image_id", Input::from(compute.ami_id.as_str())),
            ("instance_type", Input::from(compute.instance_type.as_str())),
            ("key_name", Input::from(compute.key_name.as_str())),
            (
                "vpc_security_group_ids",
                Input::list([Input::output(&names.app_security_group, "id")]),
            ),
            (
                "environment",
                Input::map(
                    environment
                        .iter()
                        .map(|(key, input)| (key.to_ascii_uppercase(), input.clone())),
                ),
            ),
            ("user_data", Input::template(USER_DATA_TEMPLATE, environment)),
        ]),
        [&names.app_security_group, &names.db_instance, &names.sns_topic],
    )?;
    graph.add_node(
        &names.target_group,
        ResourceKind::TargetGroup,
        inputs([
            ("vpc_id", Input::output(vpc, "id")),
            ("port", Input::from(compute.app_port)),
            ("protocol", Input::from("HTTP")),
            ("target_type", Input::from("instance")),
            (
                "health_check",
                Input::map([
                    ("path", Input::from("/health")),
                    ("matcher", Input::from("200")),
                ]),
            ),
        ]),
        [vpc],
    )?;

    let mut lb_deps = vec![names.lb_security_group.as_str(), names.internet_gateway.as_str()];
    lb_deps.extend(public.iter().copied());
    graph.add_node(
        &names.load_balancer,
        ResourceKind::LoadBalancer,
        inputs([
            ("load_balancer_type", Input::from("application")),
            ("internal", Input::from(false)),
            (
                "security_groups",
                Input::list([Input::output(&names.lb_security_group, "id")]),
            ),
            ("subnets", ids(public.iter().copied())),
        ]),
        lb_deps,
    )?;
    graph.add_node(
        &names.https_listener,
        ResourceKind::Listener,
        inputs([
            ("load_balancer_arn", Input::output(&names.load_balancer, "arn")),
            ("port", Input::from(443u16)),
            ("protocol", Input::from("HTTPS")),
            ("ssl_policy", Input::from("ELBSecurityPolicy-TLS13-1-2-2021-06")),
            ("certificate_arn", Input::from(config.dns.certificate_arn.as_str())),
            (
                "default_action",
                Input::map([
                    ("type", Input::from("forward")),
                    ("target_group_arn", Input::output(&names.target_group, "arn")),
                ]),
            ),
        ]),
        [&names.load_balancer, &names.target_group],
    )?;
    graph.add_node(
        &names.http_listener,
        ResourceKind::Listener,
        inputs([
            ("load_balancer_arn", Input::output(&names.load_balancer, "arn")),
            ("port", Input::from(80u16)),
            ("protocol", Input::from("HTTP")),
            (
                "default_action",
                Input::map([
                    ("type", Input::from("redirect")),
                    (
                        "redirect",
                        Input::map([
                            ("port", Input::from("443")),
                            ("protocol", Input::from("HTTPS")),
                            ("status_code", Input::from("HTTP_301")),
                        ]),
                    ),
                ]),
            ),
        ]),
        [&names.load_balancer],
    )?;

    let mut asg_deps = vec![names.launch_template.as_str(), names.target_group.as_str()];
    asg_deps.extend(public.iter().copied());
    graph.add_node(
        &names.auto_scaling_group,
        ResourceKind::AutoScalingGroup,
        inputs([
            (
                "launch_template",
                Input::map([
                    ("id", Input::output(&names.launch_template, "id")),
                    ("version", Input::output(&names.launch_template, "latest_version")),
                ]),
            ),
            ("min_size", Input::from(compute.min_size)),
            ("max_size", Input::from(compute.max_size)),
            ("desired_capacity", Input::from(compute.desired_capacity)),
            ("vpc_zone_identifier", ids(public.iter().copied())),
            (
                "target_group_arns",
                Input::list([Input::output(&names.target_group, "arn")]),
            ),
            ("health_check_type", Input::from("ELB")),
            ("health_check_grace_period", Input::from(300u32)),
        ]),
        asg_deps,
    )?;
    graph.add_node(
        &names.scaling_policy,
        ResourceKind::ScalingPolicy,
        inputs([
            (
                "autoscaling_group_name",
                Input::output(&names.auto_scaling_group, "name"),
            ),
            ("policy_type", Input::from("TargetTrackingScaling")),
            (
                "target_tracking_configuration",
                Input::map([
                    ("predefined_metric_type", Input::from("ASGAverageCPUUtilization")),
                    ("target_value", Input::from(compute.target_cpu_utilization)),
                ]),
            ),
        ]),
        [&names.auto_scaling_group],
    )?;

    // DNS
    graph.add_node(
        &names.dns_record,
        ResourceKind::DnsRecord,
        inputs([
            ("zone_id", Input::from(config.dns.hosted_zone_id.as_str())),
            ("name", Input::from(config.dns.domain_name.as_str())),
            ("type", Input::from("A")),
            (
                "alias",
                Input::map([
                    ("name", Input::output(&names.load_balancer, "dns_name")),
                    ("zone_id", Input::output(&names.load_balancer, "zone_id")),
                    ("evaluate_target_health", Input::from(true)),
                ]),
            ),
        ]),
        [&names.load_balancer],
    )?;

    // Event handler
    graph.add_node(
        &names.lambda_role,
        ResourceKind::IamRole,
        inputs([
            (
                "assume_role_policy",
                Input::value(json!({
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Allow",
                        "Principal": { "Service": "lambda.amazonaws.com" },
                        "Action": "sts:AssumeRole",
                    }],
                })),
            ),
            (
                "managed_policy_arns",
                Input::list([Input::from(LAMBDA_BASIC_EXECUTION_POLICY)]),
            ),
        ]),
        no_deps,
    )?;

    let mut lambda_env: Vec<(String, Input)> = config
        .events
        .environment
        .iter()
        .map(|(key, value)| {
            let input = match value {
                EnvValue::Plain(plain) => Input::from(plain.as_str()),
                EnvValue::Secret(secret) => Input::secret(secret.clone()),
            };
            (key.clone(), input)
        })
        .collect();
    lambda_env.push((
        "SNS_TOPIC_ARN".to_string(),
        Input::output(&names.sns_topic, "arn"),
    ));
    graph.add_node(
        &names.lambda_function,
        ResourceKind::LambdaFunction,
        inputs([
            ("runtime", Input::from(config.events.runtime.as_str())),
            ("handler", Input::from(config.events.handler.as_str())),
            ("package", Input::from(config.events.package.as_str())),
            ("role", Input::output(&names.lambda_role, "arn")),
            ("environment", Input::map(lambda_env)),
        ]),
        [&names.lambda_role, &names.sns_topic],
    )?;
    graph.add_node(
        &names.sns_subscription,
        ResourceKind::SnsSubscription,
        inputs([
            ("topic_arn", Input::output(&names.sns_topic, "arn")),
            ("protocol", Input::from("lambda")),
            ("endpoint", Input::output(&names.lambda_function, "arn")),
        ]),
        [&names.sns_topic, &names.lambda_function],
    )?;
    graph.add_node(
        &names.lambda_permission,
        ResourceKind::LambdaPermission,
        inputs([
            ("action", Input::from("lambda:InvokeFunction")),
            ("function_name", Input::output(&names.lambda_function, "name")),
            ("principal", Input::from("sns.amazonaws.com")),
            ("source_arn", Input::output(&names.sns_topic, "arn")),
        ]),
        [&names.lambda_function, &names.sns_topic],
    )?;

    tracing::debug!(resources = graph.len(), "Declared stack");
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use crate::test_support::sample_config;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use tierflow_cloud::{ActionType, LocalBackend, ResourceRecord};
    use tierflow_config::REDACTED;

    fn local_backend(dir: &tempfile::TempDir) -> Arc<LocalBackend> {
        Arc::new(LocalBackend::new(dir.path(), "us-east-1"))
    }

    fn dependency_names(graph: &DependencyGraph, name: &str) -> Vec<String> {
        let node = graph.get(name).unwrap();
        node.depends_on()
            .iter()
            .map(|h| graph.node(*h).name().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_plan_stack_declares_every_resource() {
        let dir = tempfile::tempdir().unwrap();
        let backend = local_backend(&dir);
        let stack = plan_stack(&sample_config(), backend.as_ref()).await.unwrap();

        assert_eq!(stack.topology.zone_count(), 3);
        // 5 network + 6 subnets + 6 associations + 3 groups + 2 database
        // + topic + 7 compute + DNS + 4 event handler
        assert_eq!(stack.graph.len(), 35);
        assert_eq!(
            stack.graph.get("public-route").unwrap().kind(),
            ResourceKind::Route
        );
    }

    #[tokio::test]
    async fn test_load_balancer_and_asg_span_public_subnets() {
        let dir = tempfile::tempdir().unwrap();
        let config = sample_config();
        let stack = plan_stack(&config, local_backend(&dir).as_ref())
            .await
            .unwrap();

        for name in [&config.names.load_balancer, &config.names.auto_scaling_group] {
            let deps = dependency_names(&stack.graph, name);
            for i in 0..3 {
                assert!(deps.contains(&format!("public-subnet-{}", i)), "{}", name);
                assert!(!deps.contains(&format!("private-subnet-{}", i)), "{}", name);
            }
        }
        let db_deps = dependency_names(&stack.graph, &config.names.db_subnet_group);
        assert_eq!(
            db_deps,
            vec!["private-subnet-0", "private-subnet-1", "private-subnet-2"]
        );
    }

    #[tokio::test]
    async fn test_insufficient_space_fails_before_any_resource() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sample_config();
        config.network.vpc_cidr = "10.0.0.0/24".parse().unwrap();
        config.network.subnet_prefix_len = 26;

        let backend = local_backend(&dir);
        let err = plan_stack(&config, backend.as_ref()).await.unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Topology(crate::TopologyError::InsufficientAddressSpace { .. })
        ));
        let state = backend.state_manager().load().await.unwrap();
        assert!(state.resources.is_empty());
    }

    #[tokio::test]
    async fn test_apply_preview_destroy_against_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        let backend = local_backend(&dir);
        let config = sample_config();
        let stack = plan_stack(&config, backend.as_ref()).await.unwrap();
        let executor = Executor::new(stack.graph, backend.clone());

        let report = executor.apply().await.unwrap();
        assert!(report.is_success(), "{:?}", report.failed);
        assert_eq!(report.succeeded.len(), 35);

        let lt: &ResourceRecord = report.record(&config.names.launch_template).unwrap();
        assert_eq!(lt.inputs["user_data"], REDACTED);
        assert_eq!(lt.inputs["environment"]["DB_PASSWORD"], REDACTED);
        let address = report.record(&config.names.db_instance).unwrap().outputs["address"].clone();
        assert_eq!(lt.inputs["environment"]["DB_HOST"], address);
        assert!(
            !serde_json::to_string(&report)
                .unwrap()
                .contains("s3cr3t-pass")
        );

        let dns = report.record(&config.names.dns_record).unwrap();
        let lb = report.record(&config.names.load_balancer).unwrap();
        assert_eq!(dns.inputs["alias"]["name"], lb.outputs["dns_name"]);

        let plan = executor.preview().await.unwrap();
        assert!(!plan.has_changes, "{}", plan.summary());
        assert_eq!(plan.actions_by_type(ActionType::NoOp).len(), 35);

        let report = executor.destroy().await.unwrap();
        assert!(report.is_success());
        let state = backend.state_manager().load().await.unwrap();
        assert!(state.resources.is_empty());
    }

    async fn sample_executor(backend: &Arc<LocalBackend>, zone_cap: usize) -> Executor {
        let mut config = sample_config();
        config.network.zone_cap = zone_cap;
        let stack = plan_stack(&config, backend.as_ref()).await.unwrap();
        Executor::new(stack.graph, backend.clone())
    }

    const THIRD_ZONE: [&str; 4] = [
        "route-table-association:private-assoc-2",
        "route-table-association:public-assoc-2",
        "subnet:private-subnet-2",
        "subnet:public-subnet-2",
    ];

    #[tokio::test]
    async fn test_lowering_zone_cap_removes_third_zone() {
        let dir = tempfile::tempdir().unwrap();
        let backend = local_backend(&dir);
        let report = sample_executor(&backend, 3).await.apply().await.unwrap();
        assert!(report.is_success(), "{:?}", report.failed);

        let executor = sample_executor(&backend, 2).await;
        let plan = executor.preview().await.unwrap();
        let summary = plan.summary();
        assert_eq!(summary.delete, 4, "{}", summary);
        assert_eq!(summary.create, 0, "{}", summary);
        let deleted: BTreeSet<_> = plan
            .actions_by_type(ActionType::Delete)
            .iter()
            .map(|a| format!("{}:{}", a.kind, a.name))
            .collect();
        assert_eq!(deleted, THIRD_ZONE.iter().map(|k| k.to_string()).collect());

        let report = executor.apply().await.unwrap();
        assert!(report.is_success(), "{:?}", report.failed);
        assert_eq!(report.pruned.len(), 4);
        let state = backend.state_manager().load().await.unwrap();
        assert_eq!(state.resources.len(), 31);
        for key in THIRD_ZONE {
            assert!(state.get_resource(key).is_none(), "{} left behind", key);
        }
        assert!(!executor.preview().await.unwrap().has_changes);
    }

    #[tokio::test]
    async fn test_destroy_after_lowering_zone_cap_empties_state() {
        let dir = tempfile::tempdir().unwrap();
        let backend = local_backend(&dir);
        sample_executor(&backend, 3).await.apply().await.unwrap();

        let report = sample_executor(&backend, 2).await.destroy().await.unwrap();
        assert!(report.is_success(), "{:?}", report.failed);
        assert_eq!(report.pruned.len(), 4);
        assert_eq!(report.succeeded.len(), 31);
        let state = backend.state_manager().load().await.unwrap();
        assert!(state.resources.is_empty(), "{:?}", state.resources.keys());
    }
}
