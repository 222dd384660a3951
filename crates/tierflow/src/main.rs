mod commands;
mod utils;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tierflow")]
#[command(about = "VPCから多層スタックまで、依存関係の順に構築する", long_about = None)]
struct Cli {
    /// スタックファイルのパス（省略時は自動検出、TIERFLOW_CONFIG_PATH 環境変数）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 状態ファイルを置くディレクトリ（<DIR>/.tierflow/state.json）
    #[arg(long, global = true, env = "TIERFLOW_STATE_DIR", default_value = ".")]
    state_dir: PathBuf,

    /// 同時に実行するリソース操作の上限
    #[arg(short, long, global = true, default_value_t = tierflow_core::DEFAULT_PARALLELISM)]
    parallelism: usize,

    /// 詳細なログを出力
    #[arg(short, long, global = true)]
    verbose: bool,

    /// 結果をJSONで出力
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// サブネット構成を表示
    Topology,
    /// 構築順序と変更内容を表示
    Plan,
    /// スタックを構築・更新
    Apply,
    /// スタックを削除（依存関係の逆順）
    Destroy {
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },
    /// 設定を検証
    Validate,
    /// バージョン情報を表示
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    // Versionコマンドは設定ファイル不要
    if matches!(cli.command, Commands::Version) {
        println!("tierflow {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let options = utils::Options {
        config: cli.config,
        state_dir: cli.state_dir,
        parallelism: cli.parallelism,
        json: cli.json,
    };

    match cli.command {
        Commands::Topology => commands::topology::handle(&options).await?,
        Commands::Plan => commands::plan::handle(&options).await?,
        Commands::Apply => commands::apply::handle(&options).await?,
        Commands::Destroy { yes } => commands::destroy::handle(&options, yes).await?,
        Commands::Validate => commands::validate::handle(&options)?,
        Commands::Version => unreachable!("Version is handled before config loading"),
    }

    Ok(())
}
