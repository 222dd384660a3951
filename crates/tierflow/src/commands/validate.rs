use crate::utils;
use colored::Colorize;

pub fn handle(options: &utils::Options) -> anyhow::Result<()> {
    println!("{}", "設定を検証中...".blue());

    let path = match utils::resolve_stack_path(options) {
        Ok(path) => path,
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ スタックファイルが見つかりません".red().bold());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    };
    println!("スタックファイル: {}", path.display().to_string().cyan());

    let config = match tierflow_config::load_stack(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ 設定エラー".red().bold());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    };

    // ゾーンの上限数ぶんのサブネットがVPCに収まるか検証
    if let Err(e) =
        tierflow_core::topology_builder(&config).check_capacity(config.network.zone_cap)
    {
        eprintln!();
        eprintln!("{}", "✗ ネットワーク構成エラー".red().bold());
        eprintln!("  {}", e);
        std::process::exit(1);
    }

    println!("{}", "✓ 設定ファイルは正常です！".green().bold());
    println!();
    println!("サマリー:");
    println!("  リージョン: {}", config.region.cyan());
    println!(
        "  VPC: {} (サブネット /{}, 最大{}ゾーン)",
        config.network.vpc_cidr, config.network.subnet_prefix_len, config.network.zone_cap
    );
    println!("  ドメイン: {}", config.dns.domain_name.cyan());
    println!(
        "  アプリケーション: {} x {}〜{}台 (ポート {})",
        config.compute.instance_type,
        config.compute.min_size,
        config.compute.max_size,
        config.compute.app_port
    );
    println!(
        "  データベース: {} ({})",
        config.database.name, config.database.instance_class
    );
    println!("  Lambda環境変数: {}個", config.events.environment.len());

    Ok(())
}
