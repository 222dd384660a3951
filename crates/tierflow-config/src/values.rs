//! Raw configuration values
//!
//! A stack file is a YAML mapping of string keys to scalars. Nested mappings
//! are flattened with `.` (so `lambdaEnv: { STAGE: prod }` becomes
//! `lambdaEnv.STAGE`). Environment variables named `TIERFLOW_<KEY>` override
//! file values.

use crate::error::{ConfigError, Result};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "TIERFLOW_";

/// Flat key → value mapping
pub type ConfigValues = BTreeMap<String, String>;

/// Read and flatten a stack file
pub fn load_values(path: &Path) -> Result<ConfigValues> {
    let content = std::fs::read_to_string(path)?;
    let values = parse_values(&content)?;
    tracing::debug!(path = %path.display(), keys = values.len(), "Loaded stack file");
    Ok(values)
}

/// Flatten YAML text into configuration values
pub fn parse_values(content: &str) -> Result<ConfigValues> {
    let document: Value = serde_yaml::from_str(content)?;
    let mut values = ConfigValues::new();

    match document {
        Value::Null => {}
        Value::Mapping(mapping) => flatten("", mapping, &mut values)?,
        _ => {
            return Err(ConfigError::InvalidValue {
                key: "<root>".to_string(),
                message: "expected a mapping of keys to values".to_string(),
            });
        }
    }

    Ok(values)
}

fn flatten(prefix: &str, mapping: serde_yaml::Mapping, out: &mut ConfigValues) -> Result<()> {
    for (key, value) in mapping {
        let key = scalar_to_string(&key).ok_or_else(|| ConfigError::UnsupportedValue {
            key: format!("{}<non-scalar key>", prefix),
        })?;
        let full_key = if prefix.is_empty() {
            key
        } else {
            format!("{}.{}", prefix, key)
        };

        match value {
            // `key:` with no value counts as absent
            Value::Null => {}
            Value::Mapping(nested) => flatten(&full_key, nested, out)?,
            Value::Sequence(_) | Value::Tagged(_) => {
                return Err(ConfigError::UnsupportedValue { key: full_key });
            }
            scalar => {
                if let Some(text) = scalar_to_string(&scalar) {
                    out.insert(full_key, text);
                }
            }
        }
    }
    Ok(())
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Environment variable that overrides `key`
///
/// `vpcCidrBlock` → `TIERFLOW_VPC_CIDR_BLOCK`,
/// `lambdaEnv.LOG_LEVEL` → `TIERFLOW_LAMBDA_ENV_LOG_LEVEL`.
pub fn env_var_name(key: &str) -> String {
    let mut name = String::from(ENV_PREFIX);
    let mut previous: Option<char> = None;

    for c in key.chars() {
        if c == '.' || c == '-' {
            name.push('_');
        } else if c.is_ascii_uppercase()
            && previous.is_some_and(|p| p.is_ascii_lowercase() || p.is_ascii_digit())
        {
            name.push('_');
            name.push(c);
        } else {
            name.push(c.to_ascii_uppercase());
        }
        previous = Some(c);
    }

    name
}

/// Apply `TIERFLOW_*` overrides for `known_keys` and for Lambda environment
/// entries (`TIERFLOW_LAMBDA_ENV_<NAME>` → `lambdaEnv.<NAME>`)
pub fn apply_env_overrides<I>(values: &mut ConfigValues, known_keys: &[&str], vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    let lambda_prefix = env_var_name("lambdaEnv.");
    let by_env_name: BTreeMap<String, &str> = known_keys
        .iter()
        .map(|key| (env_var_name(key), *key))
        .collect();

    for (var, value) in vars {
        if let Some(key) = by_env_name.get(&var) {
            tracing::debug!(key = %key, "Configuration overridden from environment");
            values.insert(key.to_string(), value);
        } else if let Some(name) = var.strip_prefix(&lambda_prefix)
            && !name.is_empty()
        {
            tracing::debug!(name = %name, "Lambda environment overridden from environment");
            values.insert(format!("lambdaEnv.{}", name), value);
        }
    }
}
