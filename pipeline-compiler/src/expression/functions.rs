// Built-in Functions for compile-time expressions

use crate::expression::error::{EvalError, EvalErrorKind};
use crate::expression::evaluator::{ExpressionContext, UpstreamStatus};
use crate::expression::value::Value;

use std::cmp::Ordering;

/// Registry of built-in functions
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinFunctions;

impl BuiltinFunctions {
    pub fn new() -> Self {
        Self
    }

    /// Call a built-in function. Names are matched case-insensitively.
    pub fn call(
        &self,
        name: &str,
        args: Vec<Value>,
        context: &ExpressionContext,
    ) -> Result<Value, EvalError> {
        match name.to_lowercase().as_str() {
            // Comparison
            "eq" => self.fn_eq(args),
            "ne" => self.fn_ne(args),
            "lt" => self.fn_compare(args, "lt", |o| o == Ordering::Less),
            "le" => self.fn_compare(args, "le", |o| o != Ordering::Greater),
            "gt" => self.fn_compare(args, "gt", |o| o == Ordering::Greater),
            "ge" => self.fn_compare(args, "ge", |o| o != Ordering::Less),
            "in" => self.fn_in(args),
            "notin" => self.fn_in(args).map(|v| Value::Bool(!v.is_truthy())),

            // Logical
            "and" => self.fn_and(args),
            "or" => self.fn_or(args),
            "not" => self.fn_not(args),
            "xor" => self.fn_xor(args),

            // String and collection
            "contains" => self.fn_contains(args),
            "containsvalue" => self.fn_contains_value(args),
            "startswith" => self.fn_startswith(args),
            "endswith" => self.fn_endswith(args),
            "format" => self.fn_format(args),
            "join" => self.fn_join(args),
            "replace" => self.fn_replace(args),
            "split" => self.fn_split(args),
            "lower" => self.fn_lower(args),
            "upper" => self.fn_upper(args),
            "trim" => self.fn_trim(args),
            "length" => self.fn_length(args),

            // Conversion
            "converttojson" => self.fn_convert_to_json(args),

            // Status
            "succeeded" => self.fn_status(args, "succeeded", context, |s| {
                matches!(s, UpstreamStatus::Succeeded | UpstreamStatus::SucceededWithIssues)
            }),
            "failed" => self.fn_status(args, "failed", context, |s| s == UpstreamStatus::Failed),
            "canceled" => {
                self.fn_status(args, "canceled", context, |s| s == UpstreamStatus::Canceled)
            }
            "succeededorfailed" => self.fn_status(args, "succeededOrFailed", context, |s| {
                s != UpstreamStatus::Canceled
            }),
            "always" => {
                self.require_args(&args, 0, "always")?;
                Ok(Value::Bool(true))
            }

            // Utility
            "coalesce" => Ok(self.fn_coalesce(args)),
            "iif" => self.fn_iif(args),

            "counter" => Err(EvalError::runtime_only(
                "counter() is only available at runtime",
            )),

            _ => Err(EvalError::new(
                EvalErrorKind::UnknownFunction,
                format!("unknown function: {}", name),
            )),
        }
    }

    // =========================================================================
    // Comparison Functions
    // =========================================================================

    fn fn_eq(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "eq")?;
        Ok(Value::Bool(values_equal(&args[0], &args[1])))
    }

    fn fn_ne(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "ne")?;
        Ok(Value::Bool(!values_equal(&args[0], &args[1])))
    }

    fn fn_compare(
        &self,
        args: Vec<Value>,
        name: &str,
        accept: fn(Ordering) -> bool,
    ) -> Result<Value, EvalError> {
        self.require_args(&args, 2, name)?;
        let ordering = compare_values(&args[0], &args[1]).ok_or_else(|| {
            EvalError::type_error(format!(
                "{}() cannot compare {} with {}",
                name,
                args[0].kind_name(),
                args[1].kind_name()
            ))
        })?;
        Ok(Value::Bool(accept(ordering)))
    }

    fn fn_in(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_min_args(&args, 2, "in")?;
        let needle = &args[0];
        Ok(Value::Bool(
            args[1..].iter().any(|candidate| values_equal(needle, candidate)),
        ))
    }

    // =========================================================================
    // Logical Functions
    // =========================================================================

    fn fn_and(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_min_args(&args, 2, "and")?;
        Ok(Value::Bool(args.iter().all(Value::is_truthy)))
    }

    fn fn_or(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_min_args(&args, 2, "or")?;
        Ok(Value::Bool(args.iter().any(Value::is_truthy)))
    }

    fn fn_not(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 1, "not")?;
        Ok(Value::Bool(!args[0].is_truthy()))
    }

    fn fn_xor(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "xor")?;
        Ok(Value::Bool(args[0].is_truthy() ^ args[1].is_truthy()))
    }

    // =========================================================================
    // String Functions
    // =========================================================================

    fn fn_contains(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "contains")?;
        let haystack = args[0].as_string().to_lowercase();
        let needle = args[1].as_string().to_lowercase();
        Ok(Value::Bool(haystack.contains(&needle)))
    }

    fn fn_contains_value(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "containsValue")?;
        let needle = &args[1];
        let found = match &args[0] {
            Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
            Value::Object(map) => map.values().any(|item| values_equal(item, needle)),
            other => values_equal(other, needle),
        };
        Ok(Value::Bool(found))
    }

    fn fn_startswith(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "startsWith")?;
        let s = args[0].as_string().to_lowercase();
        let prefix = args[1].as_string().to_lowercase();
        Ok(Value::Bool(s.starts_with(&prefix)))
    }

    fn fn_endswith(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "endsWith")?;
        let s = args[0].as_string().to_lowercase();
        let suffix = args[1].as_string().to_lowercase();
        Ok(Value::Bool(s.ends_with(&suffix)))
    }

    fn fn_format(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_min_args(&args, 1, "format")?;

        let mut result = args[0].as_string();
        for (i, arg) in args.iter().skip(1).enumerate() {
            let placeholder = format!("{{{}}}", i);
            result = result.replace(&placeholder, &arg.as_string());
        }

        Ok(Value::String(result))
    }

    fn fn_join(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "join")?;

        // join(separator, collection)
        let separator = args[0].as_string();
        match &args[1] {
            Value::Array(items) => {
                let strings: Vec<String> = items.iter().map(Value::as_string).collect();
                Ok(Value::String(strings.join(&separator)))
            }
            Value::Object(map) => {
                let keys: Vec<&str> = map.keys().map(String::as_str).collect();
                Ok(Value::String(keys.join(&separator)))
            }
            other => Ok(Value::String(other.as_string())),
        }
    }

    fn fn_replace(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 3, "replace")?;
        let s = args[0].as_string();
        let from = args[1].as_string();
        let to = args[2].as_string();
        if from.is_empty() {
            return Ok(Value::String(s));
        }
        Ok(Value::String(s.replace(&from, &to)))
    }

    fn fn_split(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "split")?;
        let s = args[0].as_string();
        let delimiter = args[1].as_string();
        if delimiter.is_empty() {
            return Ok(Value::Array(vec![Value::String(s)]));
        }
        let parts = s
            .split(delimiter.as_str())
            .map(|p| Value::String(p.to_string()))
            .collect();
        Ok(Value::Array(parts))
    }

    fn fn_lower(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 1, "lower")?;
        Ok(Value::String(args[0].as_string().to_lowercase()))
    }

    fn fn_upper(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 1, "upper")?;
        Ok(Value::String(args[0].as_string().to_uppercase()))
    }

    fn fn_trim(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 1, "trim")?;
        Ok(Value::String(args[0].as_string().trim().to_string()))
    }

    fn fn_length(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 1, "length")?;
        let len = match &args[0] {
            Value::Null => 0,
            Value::String(s) => s.chars().count(),
            Value::Array(items) => items.len(),
            Value::Object(map) => map.len(),
            other => {
                return Err(EvalError::type_error(format!(
                    "length() requires a string, sequence or mapping, got {}",
                    other.kind_name()
                )))
            }
        };
        Ok(Value::Number(len as f64))
    }

    // =========================================================================
    // Conversion Functions
    // =========================================================================

    fn fn_convert_to_json(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 1, "convertToJson")?;
        Ok(Value::String(args[0].to_json_pretty()))
    }

    // =========================================================================
    // Status Functions
    // =========================================================================

    /// Status checks see only the statically known upstream status. Naming
    /// specific stages or jobs needs their runtime results.
    fn fn_status(
        &self,
        args: Vec<Value>,
        name: &str,
        context: &ExpressionContext,
        check: fn(UpstreamStatus) -> bool,
    ) -> Result<Value, EvalError> {
        if !args.is_empty() {
            return Err(EvalError::runtime_only(format!(
                "{}() with dependency names is only available at runtime",
                name
            )));
        }
        Ok(Value::Bool(check(context.status)))
    }

    // =========================================================================
    // Utility Functions
    // =========================================================================

    fn fn_coalesce(&self, args: Vec<Value>) -> Value {
        args.into_iter()
            .find(|arg| match arg {
                Value::Null => false,
                Value::String(s) => !s.is_empty(),
                _ => true,
            })
            .unwrap_or(Value::Null)
    }

    fn fn_iif(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 3, "iif")?;
        let mut args = args;
        let when_false = args.pop().unwrap_or_default();
        let when_true = args.pop().unwrap_or_default();
        Ok(if args[0].is_truthy() {
            when_true
        } else {
            when_false
        })
    }

    // =========================================================================
    // Helper Functions
    // =========================================================================

    fn require_args(&self, args: &[Value], count: usize, name: &str) -> Result<(), EvalError> {
        if args.len() != count {
            return Err(EvalError::new(
                EvalErrorKind::Arity,
                format!(
                    "{}() requires {} argument(s), got {}",
                    name,
                    count,
                    args.len()
                ),
            ));
        }
        Ok(())
    }

    fn require_min_args(&self, args: &[Value], min: usize, name: &str) -> Result<(), EvalError> {
        if args.len() < min {
            return Err(EvalError::new(
                EvalErrorKind::Arity,
                format!(
                    "{}() requires at least {} argument(s), got {}",
                    name,
                    min,
                    args.len()
                ),
            ));
        }
        Ok(())
    }
}

/// Structural equality used by `eq`, `ne`, `in` and `containsValue`.
///
/// Values of the same type compare structurally, strings ignoring case.
/// Values of different types compare their string renderings.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::String(a), Value::String(b)) => a.to_lowercase() == b.to_lowercase(),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter().all(|(key, x)| {
                    b.iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case(key))
                        .is_some_and(|(_, y)| values_equal(x, y))
                })
        }
        _ => a.as_string().to_lowercase() == b.as_string().to_lowercase(),
    }
}

/// Numeric when both sides are numbers (or numeric strings), otherwise
/// ordinal ignore-case on the string renderings of two scalars.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if !a.is_scalar() || !b.is_scalar() {
        return None;
    }
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return x.partial_cmp(&y);
    }
    Some(a.as_string().to_lowercase().cmp(&b.as_string().to_lowercase()))
}
