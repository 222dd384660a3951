use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tierflow_cloud::{ActionType, ApplyReport, LocalBackend, Operation, Plan};
use tierflow_config::StackConfig;

/// サブコマンド共通のオプション
pub struct Options {
    pub config: Option<PathBuf>,
    pub state_dir: PathBuf,
    pub parallelism: usize,
    pub json: bool,
}

/// スタックファイルのパスを決定する（--config 優先、なければ自動検出）
pub fn resolve_stack_path(options: &Options) -> anyhow::Result<PathBuf> {
    match &options.config {
        Some(path) => Ok(path.clone()),
        None => Ok(tierflow_config::find_stack_file()?),
    }
}

/// スタックファイルを読み込む
pub fn load_config(options: &Options) -> anyhow::Result<StackConfig> {
    let path = resolve_stack_path(options)?;
    tracing::debug!(path = %path.display(), "Loading stack file");
    print_loaded_stack_file(options, &path);
    Ok(tierflow_config::load_stack(&path)?)
}

/// 状態ディレクトリ上のバックエンドを作成
pub fn local_backend(options: &Options, config: &StackConfig) -> Arc<LocalBackend> {
    Arc::new(LocalBackend::new(&options.state_dir, config.region.clone()))
}

/// 読み込んだスタックファイルを表示（JSON出力時は表示しない）
fn print_loaded_stack_file(options: &Options, path: &Path) {
    if !options.json {
        println!("📄 スタックファイル: {}", path.display().to_string().cyan());
    }
}

/// 値をJSONで標準出力に書き出す
pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// 変更内容を表示
pub fn print_plan(plan: &Plan) {
    for action in &plan.actions {
        let (symbol, label) = match action.action_type {
            ActionType::Create => ("+".green(), "作成".green()),
            ActionType::Update => ("~".yellow(), "更新".yellow()),
            ActionType::Delete => ("-".red(), "削除".red()),
            ActionType::NoOp => ("=".dimmed(), "変更なし".dimmed()),
        };
        println!("  {} {} ({}) {}", symbol, action.name.cyan(), action.kind, label);

        if let Some(changed) = action.details.get("changed").and_then(|v| v.as_array()) {
            let keys: Vec<&str> = changed.iter().filter_map(|k| k.as_str()).collect();
            println!("      変更されるキー: {}", keys.join(", "));
        }
        if action.details.contains_key("known_after_apply") {
            println!("      {}", "(一部の値は適用後に確定)".dimmed());
        }
    }

    let summary = plan.summary();
    println!();
    println!(
        "作成: {}  更新: {}  削除: {}  変更なし: {}",
        summary.create.to_string().green(),
        summary.update.to_string().yellow(),
        summary.delete.to_string().red(),
        summary.no_change
    );
}

/// 実行結果を表示
pub fn print_report(report: &ApplyReport) {
    let verb = match report.operation {
        Operation::Apply => "構築",
        Operation::Destroy => "削除",
    };

    for record in &report.succeeded {
        let detail = match report.operation {
            Operation::Apply => record
                .outputs
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            Operation::Destroy => record
                .outputs
                .get("outcome")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        };
        println!(
            "  {} {} ({}) {}",
            "✓".green(),
            record.name.cyan(),
            record.kind,
            detail.dimmed()
        );
    }

    for record in &report.pruned {
        println!(
            "  {} {} ({}) {}",
            "-".red(),
            record.name.cyan(),
            record.kind,
            "宣言から外れたため削除".dimmed()
        );
    }

    for failure in &report.failed {
        eprintln!(
            "  {} {} ({}) [{}回試行]",
            "✗".red(),
            failure.name.cyan(),
            failure.kind,
            failure.attempts
        );
        eprintln!("      {}", failure.error);
    }

    if !report.skipped.is_empty() {
        println!();
        println!("{}", "中断によりスキップ:".yellow());
        for name in &report.skipped {
            println!("  - {}", name);
        }
    }

    println!();
    if report.is_success() {
        println!(
            "{}",
            format!(
                "✓ {}個のリソースを{}しました ({}ms)",
                report.succeeded.len(),
                verb,
                report.duration_ms
            )
            .green()
            .bold()
        );
        if !report.pruned.is_empty() {
            println!(
                "{}",
                format!("  宣言されていない{}個のリソースを削除しました", report.pruned.len()).green()
            );
        }
    } else {
        eprintln!(
            "{}",
            format!(
                "✗ {}に失敗しました (成功: {}, 失敗: {}, スキップ: {})",
                verb,
                report.succeeded.len(),
                report.failed.len(),
                report.skipped.len()
            )
            .red()
            .bold()
        );
    }
}
