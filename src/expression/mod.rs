//! `{{ ... }}` expression resolution against a [`VariableScope`].
//!
//! A configuration string without delimiters is a literal. A string that is exactly
//! one expression resolves to the typed JSON value; anything else is interpolated
//! into a string.

mod functions;
mod parser;

use std::sync::{Arc, LazyLock};

use futures::future::BoxFuture;
use regex::Regex;
use serde_json::{Map, Value};

pub use functions::{FUNCTIONS, render};
pub use parser::{Call, Head, Operand, Pipeline, Reference, Root, Segment, parse};

use crate::{
    error::{EvalError, EvalErrorKind},
    gateway::{self, GatewayRequest, GatewayRouter},
    runtime::VariableScope,
};

static TEMPLATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{\{(.*?)\}\}").expect("template pattern is valid"));

/// Whether a string contains at least one expression.
pub fn is_expression(text: &str) -> bool {
    TEMPLATE.is_match(text)
}

/// Parse every expression in `template` without evaluating anything.
pub fn check_syntax(template: &str) -> Result<(), EvalError> {
    for caps in TEMPLATE.captures_iter(template) {
        let pipeline = parse(caps[1].trim())?;
        let calls = pipeline.pipes.iter().chain(match &pipeline.head {
            Head::Call(call) => Some(call),
            _ => None,
        });
        for call in calls {
            if !FUNCTIONS.contains(&call.name.as_str()) {
                return Err(EvalError::function(format!("unknown function '{}' in '{}'", call.name, template)));
            }
        }
    }
    Ok(())
}

#[derive(Clone, Default)]
pub struct Evaluator {
    gateway: Option<Arc<GatewayRouter>>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluator whose AI-backed functions go through `gateway`.
    pub fn with_gateway(gateway: Arc<GatewayRouter>) -> Self {
        Self {
            gateway: Some(gateway),
        }
    }

    pub async fn resolve(
        &self,
        template: &str,
        scope: &VariableScope,
    ) -> Result<Value, EvalError> {
        let spans: Vec<(usize, usize, String)> = TEMPLATE
            .captures_iter(template)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                Some((whole.start(), whole.end(), caps[1].to_string()))
            })
            .collect();

        if spans.is_empty() {
            return Ok(Value::String(template.to_string()));
        }

        if let [(start, end, expr)] = spans.as_slice() {
            if template[..*start].trim().is_empty() && template[*end..].trim().is_empty() {
                return self.evaluate(expr, scope).await;
            }
        }

        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for (start, end, expr) in &spans {
            out.push_str(&template[last..*start]);
            let value = self.evaluate(expr, scope).await?;
            out.push_str(&render(&value));
            last = *end;
        }
        out.push_str(&template[last..]);

        Ok(Value::String(out))
    }

    /// Resolve every string inside a JSON value.
    pub fn resolve_value<'a>(
        &'a self,
        value: &'a Value,
        scope: &'a VariableScope,
    ) -> BoxFuture<'a, Result<Value, EvalError>> {
        Box::pin(async move {
            match value {
                Value::String(s) => self.resolve(s, scope).await,
                Value::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.resolve_value(item, scope).await?);
                    }
                    Ok(Value::Array(out))
                }
                Value::Object(map) => {
                    let mut out = Map::new();
                    for (k, v) in map {
                        out.insert(k.clone(), self.resolve_value(v, scope).await?);
                    }
                    Ok(Value::Object(out))
                }
                other => Ok(other.clone()),
            }
        })
    }

    async fn evaluate(
        &self,
        expr: &str,
        scope: &VariableScope,
    ) -> Result<Value, EvalError> {
        let pipeline = parse(expr.trim())?;

        let mut value = match &pipeline.head {
            Head::Literal(v) => v.clone(),
            Head::Call(call) => self.call(call, Value::Null, scope).await?,
            Head::Ref(reference) => match lookup(reference, scope) {
                Ok(v) => v,
                // `| default(...)` turns a missing reference into null
                Err(e) if e.kind == EvalErrorKind::UnknownReference && pipeline.pipes.first().is_some_and(|c| c.name == "default") => Value::Null,
                Err(e) => return Err(e),
            },
        };

        for call in &pipeline.pipes {
            value = self.call(call, value, scope).await?;
        }

        Ok(value)
    }

    async fn call(
        &self,
        call: &Call,
        input: Value,
        scope: &VariableScope,
    ) -> Result<Value, EvalError> {
        let args = call
            .args
            .iter()
            .map(|arg| match arg {
                Operand::Literal(v) => Ok(v.clone()),
                Operand::Ref(r) => lookup(r, scope),
            })
            .collect::<Result<Vec<_>, _>>()?;

        match call.name.as_str() {
            "summarize" => self.summarize(input, &args).await,
            name => functions::apply(name, input, &args),
        }
    }

    async fn summarize(
        &self,
        input: Value,
        args: &[Value],
    ) -> Result<Value, EvalError> {
        let gateway = self.gateway.as_ref().ok_or_else(|| EvalError::function("summarize() needs an inference gateway"))?;

        let prompt = match args.first().and_then(Value::as_u64) {
            Some(words) => format!("Summarize the following content in at most {} words.", words),
            None => "Summarize the following content.".to_string(),
        };
        let mut request = GatewayRequest::new("summarize", prompt);
        request.content = Some(input);

        match gateway.complete(&request).await {
            Ok(response) => Ok(Value::String(response.text)),
            Err(err) => {
                let mut eval_err = EvalError::function(err.to_string());
                eval_err.cause = Some(gateway::classify(&err));
                Err(eval_err)
            }
        }
    }
}

fn describe(reference: &Reference) -> String {
    let mut out = match &reference.root {
        Root::Trigger => "$trigger".to_string(),
        Root::Node(name) => format!("$node[\"{}\"]", name),
        Root::Prev => "$prev".to_string(),
        Root::Vars => "$vars".to_string(),
        Root::Env => "$env".to_string(),
        Root::Loop => "$loop".to_string(),
        Root::Execution => "$execution".to_string(),
        Root::Workflow => "$workflow".to_string(),
    };
    for segment in &reference.path {
        match segment {
            Segment::Key(k) => {
                out.push('.');
                out.push_str(k);
            }
            Segment::Index(i) => out.push_str(&format!("[{}]", i)),
        }
    }
    out
}

fn first_key<'a>(
    reference: &'a Reference,
    root: &str,
) -> Result<(&'a str, &'a [Segment]), EvalError> {
    match reference.path.split_first() {
        Some((Segment::Key(k), rest)) => Ok((k.as_str(), rest)),
        _ => Err(EvalError::syntax(format!("{} must be followed by a name", root))),
    }
}

fn lookup(
    reference: &Reference,
    scope: &VariableScope,
) -> Result<Value, EvalError> {
    let missing = || EvalError::unknown_reference(format!("'{}' is not defined", describe(reference)));

    let (root, path) = match &reference.root {
        Root::Trigger => (scope.trigger().clone(), reference.path.as_slice()),
        Root::Prev => (scope.prev().clone(), reference.path.as_slice()),
        Root::Vars => (Value::from(scope.vars().clone()), reference.path.as_slice()),
        Root::Node(name) => (scope.output(name).ok_or_else(missing)?, reference.path.as_slice()),
        Root::Env => {
            let (name, rest) = first_key(reference, "$env")?;
            (Value::String(scope.env(name).ok_or_else(missing)?), rest)
        }
        Root::Loop => {
            let frame = scope.loop_frame().ok_or_else(|| EvalError::unknown_reference("$loop is only defined inside a loop body"))?;
            match first_key(reference, "$loop")? {
                ("item", rest) => (frame.item.clone(), rest),
                ("index", rest) => (Value::from(frame.index), rest),
                _ => return Err(missing()),
            }
        }
        Root::Execution => match first_key(reference, "$execution")? {
            ("id", rest) => (Value::String(scope.execution_id().to_string()), rest),
            _ => return Err(missing()),
        },
        Root::Workflow => match first_key(reference, "$workflow")? {
            ("id", rest) => (Value::String(scope.workflow_id().to_string()), rest),
            _ => return Err(missing()),
        },
    };

    walk(root, path).map_err(|e| match e.kind {
        EvalErrorKind::UnknownReference => missing(),
        _ => EvalError::new(e.kind, format!("{}: {}", describe(reference), e.message)),
    })
}

fn walk(
    mut value: Value,
    path: &[Segment],
) -> Result<Value, EvalError> {
    for segment in path {
        value = match (segment, value) {
            (Segment::Key(key), Value::Object(mut map)) => match map.remove(key) {
                Some(v) => v,
                None if key == "length" => Value::from(map.len()),
                None => return Err(EvalError::unknown_reference(key.clone())),
            },
            (Segment::Key(key), Value::Array(items)) if key == "length" => Value::from(items.len()),
            (Segment::Key(key), Value::String(s)) if key == "length" => Value::from(s.chars().count()),
            (Segment::Index(idx), Value::Array(items)) => {
                let len = items.len() as i64;
                let pos = if *idx < 0 { len + idx } else { *idx };
                if pos < 0 || pos >= len {
                    return Err(EvalError::unknown_reference(format!("index {} out of bounds", idx)));
                }
                items.into_iter().nth(pos as usize).unwrap_or(Value::Null)
            }
            (_, Value::Null) => return Err(EvalError::unknown_reference("null")),
            (Segment::Key(key), other) => return Err(EvalError::type_mismatch(format!("cannot read key '{}' of {}", key, kind_of(&other)))),
            (Segment::Index(idx), other) => return Err(EvalError::type_mismatch(format!("cannot index {} with [{}]", kind_of(&other), idx))),
        };
    }
    Ok(value)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use serde_json::json;

    use super::*;
    use crate::{
        common::Vars,
        error::{NodeError, NodeErrorKind},
        gateway::tests::MockProvider,
    };

    fn scope() -> VariableScope {
        let mut names = HashMap::new();
        names.insert("Fetch User".to_string(), "fetch".to_string());
        let mut env = HashMap::new();
        env.insert("REGION".to_string(), "eu-west".to_string());

        let scope = VariableScope::new(
            "exec-1",
            "wf-1",
            json!({ "email": "Ada@Example.com", "rows": [{ "id": 1 }, { "id": 2 }] }),
            Vars::new().with("threshold", 10),
            env,
            names,
        );
        scope.set_output("fetch", json!({ "name": "ada", "tags": ["a", "b", "a"] }));
        scope.with_prev(json!({ "items": [1, 2, 3, 4] }))
    }

    #[tokio::test]
    async fn test_typed_and_interpolated() {
        let eval = Evaluator::new();
        let scope = scope();

        assert_eq!(eval.resolve("{{ $prev.items.length }}", &scope).await.unwrap(), json!(4));
        assert_eq!(eval.resolve("{{$prev.items}}", &scope).await.unwrap(), json!([1, 2, 3, 4]));
        assert_eq!(eval.resolve("count={{ $prev.items.length }}", &scope).await.unwrap(), json!("count=4"));
        assert_eq!(eval.resolve("plain text", &scope).await.unwrap(), json!("plain text"));
        assert_eq!(eval.resolve("{{ $trigger.rows[-1].id }} of {{ $trigger.rows.length }}", &scope).await.unwrap(), json!("2 of 2"));
    }

    #[tokio::test]
    async fn test_references() {
        let eval = Evaluator::new();
        let scope = scope();

        assert_eq!(eval.resolve(r#"{{ $node["Fetch User"].name }}"#, &scope).await.unwrap(), json!("ada"));
        assert_eq!(eval.resolve("{{ $node.fetch.tags[0] }}", &scope).await.unwrap(), json!("a"));
        assert_eq!(eval.resolve("{{ $vars.threshold }}", &scope).await.unwrap(), json!(10));
        assert_eq!(eval.resolve("{{ $env.REGION }}", &scope).await.unwrap(), json!("eu-west"));
        assert_eq!(eval.resolve("{{ $execution.id }}/{{ $workflow.id }}", &scope).await.unwrap(), json!("exec-1/wf-1"));

        let looped = scope.with_loop(json!({ "sku": "x1" }), 2);
        assert_eq!(eval.resolve("{{ $loop.item.sku }}#{{ $loop.index }}", &looped).await.unwrap(), json!("x1#2"));
    }

    #[tokio::test]
    async fn test_pipes() {
        let eval = Evaluator::new();
        let scope = scope();

        assert_eq!(eval.resolve(r#"{{ $trigger.email | lower | split("@") | last }}"#, &scope).await.unwrap(), json!("example.com"));
        assert_eq!(eval.resolve("{{ $node.fetch.tags | unique | join('+') }}", &scope).await.unwrap(), json!("a+b"));
        assert_eq!(eval.resolve("{{ $trigger.nickname | default($node.fetch.name) | upper }}", &scope).await.unwrap(), json!("ADA"));
        assert!(eval.resolve("{{ uuid() }}", &scope).await.unwrap().is_string());
    }

    #[tokio::test]
    async fn test_errors() {
        let eval = Evaluator::new();
        let scope = scope();

        let err = eval.resolve("{{ $trigger.missing }}", &scope).await.unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::UnknownReference);
        assert!(err.message.contains("$trigger.missing"));

        assert_eq!(eval.resolve("{{ $node.ghost }}", &scope).await.unwrap_err().kind, EvalErrorKind::UnknownReference);
        assert_eq!(eval.resolve("{{ $loop.item }}", &scope).await.unwrap_err().kind, EvalErrorKind::UnknownReference);
        assert_eq!(eval.resolve("{{ $vars.threshold | upper }}", &scope).await.unwrap_err().kind, EvalErrorKind::TypeMismatch);
        assert_eq!(eval.resolve("{{ $vars.threshold.x }}", &scope).await.unwrap_err().kind, EvalErrorKind::TypeMismatch);
        assert_eq!(eval.resolve("{{ $trigger | }}", &scope).await.unwrap_err().kind, EvalErrorKind::Syntax);
        assert_eq!(eval.resolve("{{ $prev | summarize }}", &scope).await.unwrap_err().kind, EvalErrorKind::FunctionError);
    }

    #[tokio::test]
    async fn test_resolve_value_walks_json() {
        let eval = Evaluator::new();
        let scope = scope();
        let config = json!({
            "url": "https://api/{{ $node.fetch.name }}",
            "body": { "ids": ["{{ $trigger.rows[0].id }}", 5] },
            "retries": 3
        });
        assert_eq!(
            eval.resolve_value(&config, &scope).await.unwrap(),
            json!({
                "url": "https://api/ada",
                "body": { "ids": [1, 5] },
                "retries": 3
            })
        );
    }

    #[tokio::test]
    async fn test_summarize_through_gateway() {
        let router = GatewayRouter::new(Duration::from_secs(1)).with_provider(MockProvider::ok("local", "short")).with_default_chain(vec!["local".to_string()]);
        let eval = Evaluator::with_gateway(Arc::new(router));
        let out = eval.resolve("{{ $node.fetch.name | summarize(5) }}", &scope()).await.unwrap();
        assert_eq!(out, json!("short: Summarize the following content in at most 5 words."));

        let failing = GatewayRouter::new(Duration::from_secs(1))
            .with_provider(MockProvider::failing("local", NodeError::rate_limited("quota", None)))
            .with_default_chain(vec!["local".to_string()]);
        let eval = Evaluator::with_gateway(Arc::new(failing));
        let err = eval.resolve("{{ $prev | summarize }}", &scope()).await.unwrap_err();
        assert_eq!(err.cause, Some(NodeErrorKind::RateLimited));
        assert!(err.message.contains("quota"));
        assert_eq!(NodeError::from(err).kind, NodeErrorKind::RateLimited);
    }

    #[test]
    fn test_check_syntax() {
        assert!(check_syntax("hello").is_ok());
        assert!(check_syntax("{{ $trigger.a | upper }} and {{ now('%Y') }}").is_ok());
        assert_eq!(check_syntax("{{ $trigger.a | shout }}").unwrap_err().kind, EvalErrorKind::FunctionError);
        assert_eq!(check_syntax("{{ $trigger. }}").unwrap_err().kind, EvalErrorKind::Syntax);
        assert!(is_expression("a {{ $prev }}"));
        assert!(!is_expression("a { b }"));
    }
}
