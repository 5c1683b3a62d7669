//! Response filters
//!
//! A job's `apply_filter` comes in two shapes:
//!
//! - a flat mapping of `output_key -> source_key`, which picks and renames top-level
//!   keys and never reshapes arrays
//! - a projection expression string (a JMESPath-style query). When the expression
//!   starts with `results[]` the filter runs in *reshape* mode: the projected array
//!   replaces the page's `results` while sibling keys such as `count` pass through.
//!
//! ```
//! use catalog_worker::filter::{Filter, FilterSpec};
//! use serde_json::json;
//!
//! let spec = FilterSpec::parse(&json!("results[].{catalog_id:id}")).unwrap().unwrap();
//! let filter = Filter::compile(spec).unwrap();
//! let page = json!({"count": 1, "results": [{"id": 7, "name": "x"}]});
//! assert_eq!(
//!     filter.apply(&page).unwrap(),
//!     json!({"count": 1, "results": [{"catalog_id": 7}]})
//! );
//! ```

mod eval;
mod lexer;
mod parser;

use serde_json::{Map, Value};
use thiserror::Error;

pub(crate) use eval::is_truthy;
use parser::Ast;

const RESULTS_KEY: &str = "results";
const RESHAPE_MARKER: &str = "results[]";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FilterError {
    #[error("invalid filter spec: {0}")]
    InvalidFilterSpec(String),

    #[error("projection failed: {0}")]
    ProjectionError(String),
}

pub type Result<T> = std::result::Result<T, FilterError>;

/// Uncompiled filter specification, decided once from the job's raw value.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterSpec {
    /// `(output_key, source_key)` pairs in declaration order
    Rename(Vec<(String, String)>),
    Project { expression: String, reshape: bool },
}

impl FilterSpec {
    /// Classify a raw `apply_filter` value.
    ///
    /// Mappings are always renames and strings are always expressions. `null` and
    /// the empty string mean "no filter".
    pub fn parse(value: &Value) -> Result<Option<Self>> {
        match value {
            Value::Null => Ok(None),
            Value::Object(map) => Ok(Some(FilterSpec::Rename(rename_pairs(map)?))),
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => Ok(Some(FilterSpec::Project {
                expression: s.clone(),
                reshape: s.trim_start().starts_with(RESHAPE_MARKER),
            })),
            other => Err(FilterError::InvalidFilterSpec(format!(
                "expected a mapping or an expression string, got {}",
                other
            ))),
        }
    }

    pub fn is_reshape(&self) -> bool {
        matches!(self, FilterSpec::Project { reshape: true, .. })
    }
}

fn rename_pairs(map: &Map<String, Value>) -> Result<Vec<(String, String)>> {
    map.iter()
        .map(|(out_key, source)| match source {
            Value::String(source) => Ok((out_key.clone(), source.clone())),
            other => Err(FilterError::InvalidFilterSpec(format!(
                "source for '{}' must be a key name, got {}",
                out_key, other
            ))),
        })
        .collect()
}

#[derive(Debug, Clone)]
enum Compiled {
    Rename(Vec<(String, String)>),
    Project { ast: Ast, reshape: bool },
}

/// A compiled, stateless filter. Safe to share across pages and jobs.
#[derive(Debug, Clone)]
pub struct Filter {
    compiled: Compiled,
}

impl Filter {
    pub fn compile(spec: FilterSpec) -> Result<Self> {
        let compiled = match spec {
            FilterSpec::Rename(pairs) => Compiled::Rename(pairs),
            FilterSpec::Project { expression, reshape } => {
                // A string holding a JSON object of key names is a rename mapping
                // that arrived serialized.
                match serde_json::from_str::<Map<String, Value>>(expression.trim()) {
                    Ok(map) => Compiled::Rename(rename_pairs(&map)?),
                    Err(_) => Compiled::Project {
                        ast: parser::parse(&expression)?,
                        reshape,
                    },
                }
            }
        };
        Ok(Self { compiled })
    }

    /// Parse and compile a raw `apply_filter` value in one step.
    pub fn from_value(value: Option<&Value>) -> Result<Option<Self>> {
        match value {
            None => Ok(None),
            Some(value) => FilterSpec::parse(value)?.map(Filter::compile).transpose(),
        }
    }

    pub fn is_reshape(&self) -> bool {
        matches!(self.compiled, Compiled::Project { reshape: true, .. })
    }

    pub fn apply(&self, value: &Value) -> Result<Value> {
        match &self.compiled {
            Compiled::Rename(pairs) => Ok(Value::Object(rename(pairs, value))),
            Compiled::Project { ast, reshape: false } => eval::evaluate(ast, value),
            Compiled::Project { ast, reshape: true } => {
                let Value::Object(page) = value else {
                    return Err(FilterError::ProjectionError(format!(
                        "reshape expects an object holding '{}'",
                        RESULTS_KEY
                    )));
                };
                let projected = eval::evaluate(ast, value)?;
                let mut reshaped = page.clone();
                reshaped.insert(RESULTS_KEY.to_string(), projected);
                Ok(Value::Object(reshaped))
            }
        }
    }
}

/// Top-level pick-and-rename; absent source keys are skipped.
fn rename(pairs: &[(String, String)], value: &Value) -> Map<String, Value> {
    let mut out = Map::with_capacity(pairs.len());
    if let Value::Object(source) = value {
        for (out_key, source_key) in pairs {
            if let Some(found) = source.get(source_key) {
                out.insert(out_key.clone(), found.clone());
            }
        }
    }
    out
}
