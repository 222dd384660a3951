//! Resource inputs and output substitution
//!
//! Inputs are declared as a tree of [`Input`] values. Resolution is the only
//! place where outputs of other resources, secrets and rendered templates are
//! substituted. It produces two views of the same tree: the real value sent
//! to the backend and a redacted copy for the audit report.

use crate::error::BindingError;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tera::{Context, Tera};
use tierflow_config::{REDACTED, SecretString};

/// Named inputs of one resource
pub type Inputs = BTreeMap<String, Input>;

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Literal value
    Value(Value),

    /// Output `key` of resource `node`
    Output { node: String, key: String },

    /// Sensitive literal, redacted in reports
    Secret(SecretString),

    /// Tera template rendered against resolved `bindings`
    Template {
        template: String,
        bindings: BTreeMap<String, Input>,
    },

    List(Vec<Input>),

    Map(BTreeMap<String, Input>),
}

impl Input {
    pub fn value(value: impl Into<Value>) -> Self {
        Input::Value(value.into())
    }

    pub fn output(node: impl Into<String>, key: impl Into<String>) -> Self {
        Input::Output {
            node: node.into(),
            key: key.into(),
        }
    }

    pub fn secret(secret: SecretString) -> Self {
        Input::Secret(secret)
    }

    pub fn template<I, K>(template: impl Into<String>, bindings: I) -> Self
    where
        I: IntoIterator<Item = (K, Input)>,
        K: Into<String>,
    {
        Input::Template {
            template: template.into(),
            bindings: bindings.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn list(items: impl IntoIterator<Item = Input>) -> Self {
        Input::List(items.into_iter().collect())
    }

    pub fn map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Input)>,
        K: Into<String>,
    {
        Input::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Every `(node, key)` output this input reads
    pub fn references(&self) -> Vec<(&str, &str)> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, refs: &mut Vec<(&'a str, &'a str)>) {
        match self {
            Input::Output { node, key } => refs.push((node.as_str(), key.as_str())),
            Input::Template { bindings, .. } | Input::Map(bindings) => {
                for input in bindings.values() {
                    input.collect_references(refs);
                }
            }
            Input::List(items) => {
                for input in items {
                    input.collect_references(refs);
                }
            }
            Input::Value(_) | Input::Secret(_) => {}
        }
    }

    fn resolve<F>(&self, lookup: &F) -> Result<Resolved, BindingError>
    where
        F: Fn(&str, &str) -> Option<Value>,
    {
        match self {
            Input::Value(value) => Ok(Resolved::plain(value.clone())),
            Input::Output { node, key } => lookup(node, key)
                .map(Resolved::plain)
                .ok_or_else(|| BindingError::MissingOutput {
                    node: node.clone(),
                    key: key.clone(),
                }),
            Input::Secret(secret) => Ok(Resolved {
                value: Value::String(secret.expose().to_string()),
                redacted: Value::String(REDACTED.to_string()),
                secret: true,
            }),
            Input::Template { template, bindings } => {
                let mut context = Context::new();
                let mut secret = false;
                for (name, input) in bindings {
                    let resolved = input.resolve(lookup)?;
                    secret |= resolved.secret;
                    context.insert(name.as_str(), &resolved.value);
                }

                let rendered = Tera::default()
                    .render_str(template, &context)
                    .map_err(|e| BindingError::Template(extract_tera_error_detail(&e)))?;

                let redacted = if secret {
                    Value::String(REDACTED.to_string())
                } else {
                    Value::String(rendered.clone())
                };
                Ok(Resolved {
                    value: Value::String(rendered),
                    redacted,
                    secret,
                })
            }
            Input::List(items) => {
                let mut value = Vec::with_capacity(items.len());
                let mut redacted = Vec::with_capacity(items.len());
                let mut secret = false;
                for input in items {
                    let resolved = input.resolve(lookup)?;
                    secret |= resolved.secret;
                    value.push(resolved.value);
                    redacted.push(resolved.redacted);
                }
                Ok(Resolved {
                    value: Value::Array(value),
                    redacted: Value::Array(redacted),
                    secret,
                })
            }
            Input::Map(entries) => resolve_map(entries, lookup),
        }
    }
}

impl From<&str> for Input {
    fn from(value: &str) -> Self {
        Input::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Input {
    fn from(value: String) -> Self {
        Input::Value(Value::String(value))
    }
}

impl From<bool> for Input {
    fn from(value: bool) -> Self {
        Input::Value(Value::Bool(value))
    }
}

impl From<u16> for Input {
    fn from(value: u16) -> Self {
        Input::Value(value.into())
    }
}

impl From<u32> for Input {
    fn from(value: u32) -> Self {
        Input::Value(value.into())
    }
}

impl From<f64> for Input {
    fn from(value: f64) -> Self {
        Input::Value(value.into())
    }
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Input::Value(value)
    }
}

impl From<SecretString> for Input {
    fn from(secret: SecretString) -> Self {
        Input::Secret(secret)
    }
}

/// Inputs with every reference substituted
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInputs {
    /// Sent to the backend
    pub value: Value,

    /// Same shape with secrets replaced by [`REDACTED`]
    pub redacted: Value,
}

struct Resolved {
    value: Value,
    redacted: Value,
    secret: bool,
}

impl Resolved {
    fn plain(value: Value) -> Self {
        Self {
            redacted: value.clone(),
            value,
            secret: false,
        }
    }
}

fn resolve_map<F>(entries: &BTreeMap<String, Input>, lookup: &F) -> Result<Resolved, BindingError>
where
    F: Fn(&str, &str) -> Option<Value>,
{
    let mut value = serde_json::Map::new();
    let mut redacted = serde_json::Map::new();
    let mut secret = false;
    for (name, input) in entries {
        let resolved = input.resolve(lookup)?;
        secret |= resolved.secret;
        value.insert(name.clone(), resolved.value);
        redacted.insert(name.clone(), resolved.redacted);
    }
    Ok(Resolved {
        value: Value::Object(value),
        redacted: Value::Object(redacted),
        secret,
    })
}

/// Substitute outputs into `inputs`
///
/// `lookup(node, key)` returns the output `key` of `node`, or `None` when
/// it is not available.
pub fn resolve_inputs<F>(inputs: &Inputs, lookup: F) -> Result<ResolvedInputs, BindingError>
where
    F: Fn(&str, &str) -> Option<Value>,
{
    let resolved = resolve_map(inputs, &lookup)?;
    Ok(ResolvedInputs {
        value: resolved.value,
        redacted: resolved.redacted,
    })
}

/// Nodes whose outputs `inputs` read
pub fn referenced_nodes(inputs: &Inputs) -> BTreeSet<&str> {
    inputs
        .values()
        .flat_map(Input::references)
        .map(|(node, _)| node)
        .collect()
}

fn extract_tera_error_detail(e: &tera::Error) -> String {
    use std::error::Error;

    let mut details = vec![e.to_string()];
    let mut source = e.source();
    while let Some(err) = source {
        details.push(err.to_string());
        source = err.source();
    }
    details.join(": ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outputs(node: &str, key: &str) -> Option<Value> {
        match (node, key) {
            ("db", "address") => Some(json!("db.local")),
            ("db", "port") => Some(json!(5432)),
            ("topic", "arn") => Some(json!("arn:local:sns:events")),
            _ => None,
        }
    }

    fn inputs(entries: Vec<(&str, Input)>) -> Inputs {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn test_literal_and_output() {
        let inputs = inputs(vec![
            ("instance_type", Input::from("t2.micro")),
            ("db_port", Input::output("db", "port")),
        ]);

        let resolved = resolve_inputs(&inputs, outputs).unwrap();
        assert_eq!(
            resolved.value,
            json!({ "instance_type": "t2.micro", "db_port": 5432 })
        );
        assert_eq!(resolved.value, resolved.redacted);
    }

    #[test]
    fn test_missing_output() {
        let inputs = inputs(vec![("vpc_id", Input::output("vpc", "id"))]);
        assert_eq!(
            resolve_inputs(&inputs, outputs),
            Err(BindingError::MissingOutput {
                node: "vpc".to_string(),
                key: "id".to_string(),
            })
        );
    }

    #[test]
    fn test_secret_is_redacted() {
        let inputs = inputs(vec![(
            "environment",
            Input::map([
                ("DB_HOST", Input::output("db", "address")),
                ("DB_PASSWORD", Input::secret(SecretString::new("hunter2"))),
            ]),
        )]);

        let resolved = resolve_inputs(&inputs, outputs).unwrap();
        assert_eq!(resolved.value["environment"]["DB_PASSWORD"], "hunter2");
        assert_eq!(resolved.redacted["environment"]["DB_PASSWORD"], REDACTED);
        assert_eq!(resolved.redacted["environment"]["DB_HOST"], "db.local");
    }

    #[test]
    fn test_template_rendering() {
        let inputs = inputs(vec![(
            "user_data",
            Input::template(
                "DB={{ host }}:{{ port }}\nTOPIC={{ topic }}",
                [
                    ("host", Input::output("db", "address")),
                    ("port", Input::output("db", "port")),
                    ("topic", Input::output("topic", "arn")),
                ],
            ),
        )]);

        let resolved = resolve_inputs(&inputs, outputs).unwrap();
        assert_eq!(
            resolved.value["user_data"],
            "DB=db.local:5432\nTOPIC=arn:local:sns:events"
        );
        assert_eq!(resolved.value, resolved.redacted);
    }

    #[test]
    fn test_template_with_secret_is_redacted() {
        let inputs = inputs(vec![(
            "user_data",
            Input::template(
                "PASSWORD={{ password }}",
                [("password", Input::secret(SecretString::new("hunter2")))],
            ),
        )]);

        let resolved = resolve_inputs(&inputs, outputs).unwrap();
        assert_eq!(resolved.value["user_data"], "PASSWORD=hunter2");
        assert_eq!(resolved.redacted["user_data"], REDACTED);
    }

    #[test]
    fn test_template_undefined_variable() {
        let no_bindings: Vec<(String, Input)> = Vec::new();
        let inputs = inputs(vec![("user_data", Input::template("{{ nope }}", no_bindings))]);
        let err = resolve_inputs(&inputs, outputs).unwrap_err();
        assert!(matches!(err, BindingError::Template(ref msg) if msg.contains("nope")));
    }

    #[test]
    fn test_references() {
        let inputs = inputs(vec![
            ("subnets", Input::list([Input::output("a", "id"), Input::output("b", "id")])),
            ("script", Input::template("{{ x }}", [("x", Input::output("c", "arn"))])),
            ("literal", Input::from(true)),
        ]);

        let nodes: Vec<_> = referenced_nodes(&inputs).into_iter().collect();
        assert_eq!(nodes, vec!["a", "b", "c"]);
    }
}
