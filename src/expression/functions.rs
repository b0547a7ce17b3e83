//! Built-in pipe functions.

use std::cmp::Ordering;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::{Number, Value};
use sha2::{Digest, Sha256, Sha512};

use crate::{error::EvalError, utils};

/// Every function name the evaluator understands, including the AI-backed ones.
pub const FUNCTIONS: &[&str] = &[
    "upper",
    "lower",
    "trim",
    "length",
    "split",
    "join",
    "first",
    "last",
    "reverse",
    "sort",
    "unique",
    "slice",
    "replace",
    "truncate",
    "contains",
    "keys",
    "values",
    "default",
    "json",
    "parse_json",
    "string",
    "number",
    "base64",
    "now",
    "uuid",
    "hash",
    "summarize",
];

/// Render a value for string interpolation: strings raw, everything else as JSON.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn mismatch(
    name: &str,
    expected: &str,
    got: &Value,
) -> EvalError {
    EvalError::type_mismatch(format!("{}() expects {}, got {}", name, expected, type_name(got)))
}

fn str_arg<'a>(
    name: &str,
    args: &'a [Value],
    idx: usize,
    default: Option<&'a str>,
) -> Result<&'a str, EvalError> {
    match args.get(idx) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(mismatch(name, "a string argument", other)),
        None => default.ok_or_else(|| EvalError::function(format!("{}() is missing argument {}", name, idx + 1))),
    }
}

fn int_arg(
    name: &str,
    args: &[Value],
    idx: usize,
) -> Result<Option<i64>, EvalError> {
    match args.get(idx) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).map(Some).ok_or_else(|| mismatch(name, "an integer argument", &Value::Number(n.clone()))),
        Some(other) => Err(mismatch(name, "an integer argument", other)),
    }
}

/// Clamp a possibly negative index into `0..=len`.
fn clamp_index(
    idx: i64,
    len: usize,
) -> usize {
    if idx < 0 {
        len.saturating_sub(idx.unsigned_abs() as usize)
    } else {
        (idx as usize).min(len)
    }
}

fn compare(
    a: &Value,
    b: &Value,
) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64().partial_cmp(&y.as_f64()).unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => render(a).cmp(&render(b)),
    }
}

/// Apply a synchronous function to `input`.
pub fn apply(
    name: &str,
    input: Value,
    args: &[Value],
) -> Result<Value, EvalError> {
    match name {
        "upper" | "lower" | "trim" => match &input {
            Value::String(s) => Ok(Value::String(match name {
                "upper" => s.to_uppercase(),
                "lower" => s.to_lowercase(),
                _ => s.trim().to_string(),
            })),
            other => Err(mismatch(name, "a string", other)),
        },
        "length" => match &input {
            Value::Array(a) => Ok(Value::from(a.len())),
            Value::String(s) => Ok(Value::from(s.chars().count())),
            Value::Object(o) => Ok(Value::from(o.len())),
            Value::Null => Ok(Value::from(0)),
            other => Err(mismatch(name, "an array, string or object", other)),
        },
        "split" => {
            let sep = str_arg(name, args, 0, Some(","))?;
            match &input {
                Value::String(s) => Ok(Value::Array(s.split(sep).map(|p| Value::String(p.to_string())).collect())),
                other => Err(mismatch(name, "a string", other)),
            }
        }
        "join" => {
            let sep = str_arg(name, args, 0, Some(","))?;
            match &input {
                Value::Array(a) => Ok(Value::String(a.iter().map(render).collect::<Vec<_>>().join(sep))),
                other => Err(mismatch(name, "an array", other)),
            }
        }
        "first" | "last" => match input {
            Value::Array(a) => Ok(if name == "first" { a.into_iter().next() } else { a.into_iter().last() }.unwrap_or(Value::Null)),
            Value::String(s) => Ok(if name == "first" { s.chars().next() } else { s.chars().last() }.map(|c| Value::String(c.to_string())).unwrap_or(Value::Null)),
            other => Err(mismatch(name, "an array or string", &other)),
        },
        "reverse" => match input {
            Value::Array(mut a) => {
                a.reverse();
                Ok(Value::Array(a))
            }
            Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
            other => Err(mismatch(name, "an array or string", &other)),
        },
        "sort" => match input {
            Value::Array(mut a) => {
                a.sort_by(compare);
                Ok(Value::Array(a))
            }
            other => Err(mismatch(name, "an array", &other)),
        },
        "unique" => match input {
            Value::Array(a) => {
                let mut out: Vec<Value> = Vec::with_capacity(a.len());
                for v in a {
                    if !out.contains(&v) {
                        out.push(v);
                    }
                }
                Ok(Value::Array(out))
            }
            other => Err(mismatch(name, "an array", &other)),
        },
        "slice" => {
            let start = int_arg(name, args, 0)?.unwrap_or(0);
            let end = int_arg(name, args, 1)?;
            match input {
                Value::Array(a) => {
                    let (s, e) = (clamp_index(start, a.len()), end.map_or(a.len(), |e| clamp_index(e, a.len())));
                    Ok(Value::Array(if s < e { a[s..e].to_vec() } else { Vec::new() }))
                }
                Value::String(text) => {
                    let chars: Vec<char> = text.chars().collect();
                    let (s, e) = (clamp_index(start, chars.len()), end.map_or(chars.len(), |e| clamp_index(e, chars.len())));
                    Ok(Value::String(if s < e { chars[s..e].iter().collect() } else { String::new() }))
                }
                other => Err(mismatch(name, "an array or string", &other)),
            }
        }
        "replace" => {
            let from = str_arg(name, args, 0, None)?;
            let to = str_arg(name, args, 1, Some(""))?;
            match &input {
                Value::String(s) => Ok(Value::String(s.replace(from, to))),
                other => Err(mismatch(name, "a string", other)),
            }
        }
        "truncate" => {
            let n = int_arg(name, args, 0)?.ok_or_else(|| EvalError::function("truncate() is missing argument 1"))?;
            match &input {
                Value::String(s) => Ok(Value::String(s.chars().take(n.max(0) as usize).collect())),
                other => Err(mismatch(name, "a string", other)),
            }
        }
        "contains" => {
            let needle = args.first().ok_or_else(|| EvalError::function("contains() is missing argument 1"))?;
            match &input {
                Value::String(s) => Ok(Value::Bool(s.contains(&render(needle)))),
                Value::Array(a) => Ok(Value::Bool(a.contains(needle))),
                Value::Object(o) => Ok(Value::Bool(o.contains_key(&render(needle)))),
                other => Err(mismatch(name, "a string, array or object", other)),
            }
        }
        "keys" | "values" => match input {
            Value::Object(o) => Ok(Value::Array(if name == "keys" { o.keys().map(|k| Value::String(k.clone())).collect() } else { o.into_iter().map(|(_, v)| v).collect() })),
            other => Err(mismatch(name, "an object", &other)),
        },
        "default" => match input {
            Value::Null => Ok(args.first().cloned().unwrap_or(Value::Null)),
            other => Ok(other),
        },
        "json" => serde_json::to_string(&input).map(Value::String).map_err(|e| EvalError::function(format!("json(): {}", e))),
        "parse_json" => match &input {
            Value::String(s) => serde_json::from_str(s).map_err(|e| EvalError::function(format!("parse_json(): {}", e))),
            other => Err(mismatch(name, "a string", other)),
        },
        "string" => Ok(Value::String(render(&input))),
        "number" => match &input {
            Value::Number(_) => Ok(input),
            Value::Bool(b) => Ok(Value::from(*b as i64)),
            Value::String(s) => {
                let s = s.trim();
                if let Ok(i) = s.parse::<i64>() {
                    return Ok(Value::from(i));
                }
                s.parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| EvalError::function(format!("number(): '{}' is not a number", s)))
            }
            other => Err(mismatch(name, "a string, number or boolean", other)),
        },
        "base64" => Ok(Value::String(STANDARD.encode(render(&input)))),
        "now" => {
            let pattern = match args.first() {
                Some(Value::String(p)) => Some(p.as_str()),
                _ => None,
            };
            utils::time::format_now(pattern).map(Value::String).map_err(|_| EvalError::function(format!("now(): invalid format {:?}", pattern)))
        }
        "uuid" => Ok(Value::String(uuid::Uuid::new_v4().to_string())),
        "hash" => {
            let data = render(&input);
            match str_arg(name, args, 0, Some("sha256"))? {
                "sha256" => Ok(Value::String(format!("{:x}", Sha256::digest(data.as_bytes())))),
                "sha512" => Ok(Value::String(format!("{:x}", Sha512::digest(data.as_bytes())))),
                other => Err(EvalError::function(format!("hash(): unsupported algorithm '{}'", other))),
            }
        }
        other => Err(EvalError::function(format!("unknown function '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::EvalErrorKind;

    fn call(
        name: &str,
        input: Value,
        args: &[Value],
    ) -> Value {
        apply(name, input, args).unwrap()
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(call("upper", json!("ada"), &[]), json!("ADA"));
        assert_eq!(call("trim", json!("  x "), &[]), json!("x"));
        assert_eq!(call("split", json!("a@b.c"), &[json!("@")]), json!(["a", "b.c"]));
        assert_eq!(call("replace", json!("a-b-c"), &[json!("-"), json!("+")]), json!("a+b+c"));
        assert_eq!(call("truncate", json!("héllo"), &[json!(2)]), json!("hé"));
        assert_eq!(call("length", json!("héllo"), &[]), json!(5));
    }

    #[test]
    fn test_collection_functions() {
        let items = json!([3, 1, 2, 3]);
        assert_eq!(call("length", items.clone(), &[]), json!(4));
        assert_eq!(call("first", items.clone(), &[]), json!(3));
        assert_eq!(call("last", json!([]), &[]), Value::Null);
        assert_eq!(call("sort", items.clone(), &[]), json!([1, 2, 3, 3]));
        assert_eq!(call("unique", items.clone(), &[]), json!([3, 1, 2]));
        assert_eq!(call("slice", items.clone(), &[json!(-2)]), json!([2, 3]));
        assert_eq!(call("slice", items.clone(), &[json!(1), json!(3)]), json!([1, 2]));
        assert_eq!(call("join", json!(["a", 1, true]), &[json!("/")]), json!("a/1/true"));
        assert_eq!(call("contains", items, &[json!(2)]), json!(true));
        assert_eq!(call("keys", json!({ "b": 1, "a": 2 }), &[]), json!(["a", "b"]));
    }

    #[test]
    fn test_conversion_functions() {
        assert_eq!(call("number", json!(" 42 "), &[]), json!(42));
        assert_eq!(call("number", json!("1.5"), &[]), json!(1.5));
        assert_eq!(call("parse_json", json!("{\"a\":1}"), &[]), json!({ "a": 1 }));
        assert_eq!(call("json", json!({ "a": 1 }), &[]), json!("{\"a\":1}"));
        assert_eq!(call("string", json!(12), &[]), json!("12"));
        assert_eq!(call("base64", json!("hi"), &[]), json!("aGk="));
        assert_eq!(call("default", Value::Null, &[json!("x")]), json!("x"));
        assert_eq!(call("default", json!(0), &[json!("x")]), json!(0));
        assert_eq!(call("hash", json!("abc"), &[]), json!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"));
    }

    #[test]
    fn test_generators() {
        assert_eq!(call("uuid", Value::Null, &[]).as_str().map(str::len), Some(36));
        assert_eq!(call("now", Value::Null, &[json!("%Y")]).as_str().map(str::len), Some(4));
    }

    #[test]
    fn test_function_errors() {
        assert_eq!(apply("upper", json!(1), &[]).unwrap_err().kind, EvalErrorKind::TypeMismatch);
        assert_eq!(apply("number", json!("abc"), &[]).unwrap_err().kind, EvalErrorKind::FunctionError);
        assert_eq!(apply("hash", json!("a"), &[json!("md5")]).unwrap_err().kind, EvalErrorKind::FunctionError);
        assert_eq!(apply("explode", json!("a"), &[]).unwrap_err().kind, EvalErrorKind::FunctionError);
    }
}
