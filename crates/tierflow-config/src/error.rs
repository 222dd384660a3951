use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error(
        "Stack file not found. Looked in:\n\
        - current directory: tierflow.local.yaml, .tierflow.local.yaml, tierflow.yaml, .tierflow.yaml\n\
        - ./.tierflow/ directory\n\
        - ~/.config/tierflow/tierflow.yaml\n\
        Set TIERFLOW_CONFIG_PATH to point at a file directly"
    )]
    StackFileNotFound,

    #[error("Missing required configuration keys: {}", .0.join(", "))]
    MissingKeys(Vec<String>),

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unsupported value for '{key}': sequences and tagged values are not allowed")]
    UnsupportedValue { key: String },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
