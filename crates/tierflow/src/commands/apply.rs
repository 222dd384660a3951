use crate::utils;
use colored::Colorize;
use tierflow_core::Executor;

pub async fn handle(options: &utils::Options) -> anyhow::Result<()> {
    let config = utils::load_config(options)?;
    let backend = utils::local_backend(options, &config);
    let stack = tierflow_core::plan_stack(&config, backend.as_ref()).await?;

    if !options.json {
        println!(
            "{}",
            format!("{}個のリソースを構築します...", stack.graph.len())
                .blue()
                .bold()
        );
    }

    let lock = backend.state_manager().acquire_lock().await?;
    let executor = Executor::new(stack.graph, backend.clone()).with_parallelism(options.parallelism);
    let report = executor.apply().await;
    lock.release().await?;
    let report = report?;

    if options.json {
        utils::print_json(&report)?;
    } else {
        println!();
        utils::print_report(&report);
    }

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
