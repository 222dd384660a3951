use crate::utils;
use colored::Colorize;
use serde_json::json;
use tierflow_core::Executor;

pub async fn handle(options: &utils::Options) -> anyhow::Result<()> {
    let config = utils::load_config(options)?;
    let backend = utils::local_backend(options, &config);
    let stack = tierflow_core::plan_stack(&config, backend.as_ref()).await?;

    let waves: Vec<Vec<&str>> = stack
        .graph
        .levels()
        .into_iter()
        .map(|level| {
            level
                .into_iter()
                .map(|handle| stack.graph.node(handle).name())
                .collect()
        })
        .collect();

    let executor = Executor::new(stack.graph.clone(), backend).with_parallelism(options.parallelism);
    let plan = executor.preview().await?;

    if options.json {
        return utils::print_json(&json!({
            "topology": stack.topology,
            "waves": waves,
            "plan": plan,
        }));
    }

    println!();
    println!(
        "{}",
        format!("構築順序 ({}個のリソース):", stack.graph.len()).bold()
    );
    for (index, wave) in waves.iter().enumerate() {
        println!("  {} {}", format!("[{}]", index + 1).dimmed(), wave.join(", "));
    }

    println!();
    println!("{}", "変更内容:".bold());
    utils::print_plan(&plan);

    if !plan.has_changes {
        println!();
        println!("{}", "✓ スタックは最新です".green());
    }

    Ok(())
}
