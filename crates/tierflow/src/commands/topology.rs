use crate::utils;
use colored::Colorize;
use tierflow_core::Tier;

pub async fn handle(options: &utils::Options) -> anyhow::Result<()> {
    let config = utils::load_config(options)?;
    let backend = utils::local_backend(options, &config);
    let stack = tierflow_core::plan_stack(&config, backend.as_ref()).await?;
    let topology = &stack.topology;

    if options.json {
        println!("{}", topology.to_json()?);
        return Ok(());
    }

    println!();
    println!("VPC: {}", topology.vpc_cidr.to_string().cyan());
    let zones: Vec<&str> = topology.zones.iter().map(|z| z.as_str()).collect();
    println!(
        "アベイラビリティゾーン ({}個): {}",
        topology.zone_count(),
        zones.join(", ")
    );
    println!("サブネットのプレフィックス長: /{}", topology.subnet_prefix_len);

    for tier in [Tier::Public, Tier::Private] {
        println!();
        let heading = match tier {
            Tier::Public => "パブリックサブネット:",
            Tier::Private => "プライベートサブネット:",
        };
        println!("{}", heading.bold());
        for subnet in topology.subnets_of(tier) {
            println!(
                "  • {:<20} {:<18} {:<14} → {}",
                subnet.name.cyan(),
                subnet.cidr,
                subnet.zone.as_str(),
                subnet.route_table
            );
        }
    }

    Ok(())
}
