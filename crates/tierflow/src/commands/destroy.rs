use crate::utils;
use colored::Colorize;
use tierflow_core::Executor;

pub async fn handle(options: &utils::Options, yes: bool) -> anyhow::Result<()> {
    let config = utils::load_config(options)?;
    let backend = utils::local_backend(options, &config);
    let stack = tierflow_core::plan_stack(&config, backend.as_ref()).await?;

    // 確認（--yesが指定されていない場合）
    if !yes {
        println!();
        println!(
            "{}",
            format!(
                "警告: スタックの{}個のリソースをすべて削除します。",
                stack.graph.len()
            )
            .yellow()
        );
        println!("実行するには --yes オプションを指定してください");
        return Ok(());
    }

    if !options.json {
        println!("{}", "スタックを削除します...".blue().bold());
    }

    let lock = backend.state_manager().acquire_lock().await?;
    let executor = Executor::new(stack.graph, backend.clone()).with_parallelism(options.parallelism);
    let report = executor.destroy().await;
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
