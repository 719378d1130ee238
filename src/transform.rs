//! Named transform registry.
//!
//! Map and reduce steps are referenced by name plus JSON parameters and
//! resolved against the closed set registered here. Transform code is never
//! shipped over the wire and received text is never executed. A project
//! whose spec names an unknown transform is rejected before any job exists.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{MapswarmError, Result};

/// Per-item transform, applied by worker agents to each job payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MapSpec {
    pub name: String,
    #[serde(default)]
    pub params: Value,
}

/// Final aggregation, applied by the dispatcher to the ordered results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReduceSpec {
    pub name: String,
    #[serde(default)]
    pub params: Value,
}

impl MapSpec {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: Value::Null,
        }
    }

    /// Validate the transform name and its parameters without applying it.
    pub fn validate(&self) -> Result<()> {
        match self.name.as_str() {
            "double" | "square" | "negate" | "word_count" | "n_queens" => Ok(()),
            "scale" => {
                require_number_param(&self.params, "factor")?;
                Ok(())
            }
            "increment" => {
                // `by` defaults to 1 when params are omitted entirely
                if self.params.is_null() {
                    return Ok(());
                }
                require_number_param(&self.params, "by")?;
                Ok(())
            }
            other => Err(MapswarmError::MalformedSpec(format!(
                "unknown map transform '{other}'"
            ))),
        }
    }
}

impl ReduceSpec {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: Value::Null,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.name.as_str() {
            "sum" | "product" | "min" | "max" | "mean" | "collect" | "count_true" => Ok(()),
            "concat" => {
                if let Some(sep) = self.params.get("sep") {
                    if !sep.is_string() {
                        return Err(MapswarmError::MalformedSpec(
                            "concat parameter 'sep' must be a string".to_string(),
                        ));
                    }
                }
                Ok(())
            }
            other => Err(MapswarmError::MalformedSpec(format!(
                "unknown reduce transform '{other}'"
            ))),
        }
    }
}

/// Apply a map transform to one job payload. Used by worker agents.
pub fn apply_map(spec: &MapSpec, payload: &Value) -> Result<Value> {
    match spec.name.as_str() {
        "double" => Ok(number(as_number(payload)? * 2.0)),
        "square" => {
            let n = as_number(payload)?;
            Ok(number(n * n))
        }
        "scale" => {
            let factor = require_number_param(&spec.params, "factor")?;
            Ok(number(as_number(payload)? * factor))
        }
        "increment" => {
            let by = if spec.params.is_null() {
                1.0
            } else {
                require_number_param(&spec.params, "by")?
            };
            Ok(number(as_number(payload)? + by))
        }
        "negate" => Ok(number(-as_number(payload)?)),
        "word_count" => {
            let text = payload.as_str().ok_or_else(|| {
                MapswarmError::Transform("word_count expects a string payload".to_string())
            })?;
            Ok(json!(text.split_whitespace().count()))
        }
        "n_queens" => {
            let n = payload.as_u64().ok_or_else(|| {
                MapswarmError::Transform("n_queens expects a board size".to_string())
            })? as usize;
            if n > 16 {
                return Err(MapswarmError::Transform(format!(
                    "n_queens board size {n} exceeds the limit of 16"
                )));
            }
            Ok(json!(count_n_queens(n)))
        }
        other => Err(MapswarmError::Transform(format!(
            "unknown map transform '{other}'"
        ))),
    }
}

/// Apply a reduce transform to the full, positionally ordered result set.
pub fn apply_reduce(spec: &ReduceSpec, results: &[Value]) -> Result<Value> {
    match spec.name.as_str() {
        "sum" => fold_numbers(results, 0.0, |acc, n| acc + n),
        "product" => fold_numbers(results, 1.0, |acc, n| acc * n),
        "min" => {
            if results.is_empty() {
                return Ok(Value::Null);
            }
            fold_numbers(results, f64::INFINITY, f64::min)
        }
        "max" => {
            if results.is_empty() {
                return Ok(Value::Null);
            }
            fold_numbers(results, f64::NEG_INFINITY, f64::max)
        }
        "mean" => {
            if results.is_empty() {
                return Ok(Value::Null);
            }
            let mut acc = 0.0;
            for value in results {
                acc += as_number(value)?;
            }
            Ok(number(acc / results.len() as f64))
        }
        "concat" => {
            let sep = spec
                .params
                .get("sep")
                .and_then(Value::as_str)
                .unwrap_or("");
            let mut parts = Vec::with_capacity(results.len());
            for value in results {
                match value {
                    Value::String(s) => parts.push(s.clone()),
                    other => parts.push(other.to_string()),
                }
            }
            Ok(json!(parts.join(sep)))
        }
        "collect" => Ok(Value::Array(results.to_vec())),
        "count_true" => Ok(json!(results
            .iter()
            .filter(|v| v.as_bool() == Some(true))
            .count())),
        other => Err(MapswarmError::Transform(format!(
            "unknown reduce transform '{other}'"
        ))),
    }
}

fn fold_numbers(results: &[Value], init: f64, f: impl Fn(f64, f64) -> f64) -> Result<Value> {
    let mut acc = init;
    for value in results {
        acc = f(acc, as_number(value)?);
    }
    Ok(number(acc))
}

fn as_number(value: &Value) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| MapswarmError::Transform(format!("expected a number, got {value}")))
}

fn require_number_param(params: &Value, key: &str) -> Result<f64> {
    params.get(key).and_then(Value::as_f64).ok_or_else(|| {
        MapswarmError::MalformedSpec(format!("missing or non-numeric parameter '{key}'"))
    })
}

/// Render integral values as JSON integers so `double(10)` is `20`, not `20.0`.
fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        json!(n as i64)
    } else {
        json!(n)
    }
}

/// Count solutions to the n-queens puzzle by row backtracking. Bitmask
/// widths hold for board sizes up to 16 (enforced by the caller).
fn count_n_queens(n: usize) -> u64 {
    fn place(n: usize, row: usize, cols: u64, diag1: u64, diag2: u64) -> u64 {
        if row == n {
            return 1;
        }
        let mut count = 0;
        for col in 0..n {
            let c = 1u64 << col;
            let d1 = 1u64 << (row + col);
            let d2 = 1u64 << (n + row - col);
            if cols & c == 0 && diag1 & d1 == 0 && diag2 & d2 == 0 {
                count += place(n, row + 1, cols | c, diag1 | d1, diag2 | d2);
            }
        }
        count
    }
    if n == 0 {
        return 1;
    }
    place(n, 0, 0, 0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_and_square() {
        let doubled = apply_map(&MapSpec::named("double"), &json!(10)).unwrap();
        assert_eq!(doubled, json!(20));

        let squared = apply_map(&MapSpec::named("square"), &json!(7)).unwrap();
        assert_eq!(squared, json!(49));
    }

    #[test]
    fn scale_requires_factor() {
        let spec = MapSpec::named("scale");
        assert!(spec.validate().is_err());

        let spec = MapSpec {
            name: "scale".to_string(),
            params: json!({"factor": 2.5}),
        };
        spec.validate().unwrap();
        assert_eq!(apply_map(&spec, &json!(4)).unwrap(), json!(10));
    }

    #[test]
    fn increment_defaults_to_one() {
        let spec = MapSpec::named("increment");
        spec.validate().unwrap();
        assert_eq!(apply_map(&spec, &json!(41)).unwrap(), json!(42));
    }

    #[test]
    fn word_count_rejects_numbers() {
        let spec = MapSpec::named("word_count");
        assert!(apply_map(&spec, &json!(3)).is_err());
        assert_eq!(
            apply_map(&spec, &json!("three short words")).unwrap(),
            json!(3)
        );
    }

    #[test]
    fn n_queens_known_counts() {
        let spec = MapSpec::named("n_queens");
        assert_eq!(apply_map(&spec, &json!(4)).unwrap(), json!(2));
        assert_eq!(apply_map(&spec, &json!(6)).unwrap(), json!(4));
        assert_eq!(apply_map(&spec, &json!(8)).unwrap(), json!(92));
    }

    #[test]
    fn unknown_map_name_rejected() {
        let spec = MapSpec::named("exec_arbitrary_js");
        assert!(matches!(
            spec.validate(),
            Err(MapswarmError::MalformedSpec(_))
        ));
    }

    #[test]
    fn reduce_sum_and_product() {
        let results = [json!(20), json!(40), json!(60)];
        assert_eq!(
            apply_reduce(&ReduceSpec::named("sum"), &results).unwrap(),
            json!(120)
        );
        assert_eq!(
            apply_reduce(&ReduceSpec::named("product"), &results).unwrap(),
            json!(48000)
        );
    }

    #[test]
    fn reduce_mean_keeps_fractions() {
        let results = [json!(1), json!(2)];
        assert_eq!(
            apply_reduce(&ReduceSpec::named("mean"), &results).unwrap(),
            json!(1.5)
        );
    }

    #[test]
    fn reduce_concat_with_separator() {
        let spec = ReduceSpec {
            name: "concat".to_string(),
            params: json!({"sep": ", "}),
        };
        let results = [json!("a"), json!("b")];
        assert_eq!(apply_reduce(&spec, &results).unwrap(), json!("a, b"));
    }

    #[test]
    fn reduce_collect_preserves_order() {
        let results = [json!(3), json!(1), json!(2)];
        assert_eq!(
            apply_reduce(&ReduceSpec::named("collect"), &results).unwrap(),
            json!([3, 1, 2])
        );
    }

    #[test]
    fn reduce_min_max_empty_is_null() {
        assert_eq!(
            apply_reduce(&ReduceSpec::named("min"), &[]).unwrap(),
            Value::Null
        );
        assert_eq!(
            apply_reduce(&ReduceSpec::named("max"), &[]).unwrap(),
            Value::Null
        );
    }
}
