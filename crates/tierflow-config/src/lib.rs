pub mod error;
pub mod secret;
pub mod stack;
pub mod values;

pub use error::*;
pub use secret::{REDACTED, SecretString};
pub use stack::{
    ComputeConfig, DatabaseConfig, DnsConfig, EnvValue, EventsConfig, NetworkConfig,
    ResourceNames, StackConfig,
};
pub use values::{ConfigValues, apply_env_overrides, env_var_name, load_values, parse_values};

use std::path::{Path, PathBuf};

const STACK_FILE_CANDIDATES: [&str; 4] = [
    "tierflow.local.yaml",
    ".tierflow.local.yaml",
    "tierflow.yaml",
    ".tierflow.yaml",
];

/// tierflowの設定ディレクトリを取得
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("tierflow");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// スタックファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 TIERFLOW_CONFIG_PATH (直接パス指定)
/// 2. カレントディレクトリ: tierflow.local.yaml, .tierflow.local.yaml, tierflow.yaml, .tierflow.yaml
/// 3. ./.tierflow/ ディレクトリ内: 同様の順序
/// 4. ~/.config/tierflow/tierflow.yaml (グローバル設定)
pub fn find_stack_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var("TIERFLOW_CONFIG_PATH") {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;

    for filename in &STACK_FILE_CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let stack_dir = current_dir.join(".tierflow");
    if stack_dir.is_dir() {
        for filename in &STACK_FILE_CANDIDATES {
            let path = stack_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("tierflow").join("tierflow.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::StackFileNotFound)
}

/// スタックファイルを読み込み、環境変数で上書きしてから検証する
pub fn load_stack(path: &Path) -> Result<StackConfig> {
    let mut values = load_values(path)?;
    apply_env_overrides(&mut values, &stack::known_keys(), std::env::vars());
    StackConfig::from_values(&values)
}
