mod models;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::{
    catalog::{NodeContext, NodeDescriptor, NodeKind, NodeOutput},
    error::NodeError,
    expression::render,
};

use models::*;

/// Port taken when no case matches.
pub const ELSE_PORT: &str = "else";

const IF_ELSE_RESULT: &str = "result";
const IF_ELSE_SELECTED: &str = "selected";

/// Routes to the port named after the first matching case, or `else`.
pub struct IfElseNode;

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

impl IfElseNode {
    /// Evaluate a single comparison
    fn evaluate_comparison(
        &self,
        actual: &Value,
        operator: ComparisonOperator,
        expected: &Option<Value>,
    ) -> bool {
        match operator {
            ComparisonOperator::Null => actual.is_null(),
            ComparisonOperator::NotNull => !actual.is_null(),
            ComparisonOperator::Empty => match actual {
                Value::Null => true,
                Value::String(s) => s.is_empty(),
                Value::Array(arr) => arr.is_empty(),
                Value::Object(obj) => obj.is_empty(),
                _ => false,
            },
            ComparisonOperator::NotEmpty => !self.evaluate_comparison(actual, ComparisonOperator::Empty, expected),
            _ => {
                let Some(expected) = expected else {
                    return false;
                };
                self.evaluate_with_value(actual, operator, expected)
            }
        }
    }

    /// Evaluate comparison operators that require a value
    fn evaluate_with_value(
        &self,
        actual: &Value,
        operator: ComparisonOperator,
        expected: &Value,
    ) -> bool {
        match operator {
            ComparisonOperator::Contains => self.eval_contains(actual, expected),
            ComparisonOperator::NotContains => !self.eval_contains(actual, expected),
            ComparisonOperator::StartWith => matches!((actual, expected), (Value::String(s), Value::String(e)) if s.starts_with(e.as_str())),
            ComparisonOperator::EndWith => matches!((actual, expected), (Value::String(s), Value::String(e)) if s.ends_with(e.as_str())),
            ComparisonOperator::Is => self.eval_is(actual, expected),
            ComparisonOperator::IsNot => !self.eval_is(actual, expected),
            ComparisonOperator::In => self.eval_in(actual, expected),
            ComparisonOperator::NotIn => !self.eval_in(actual, expected),
            ComparisonOperator::AllOf => self.eval_all_of(actual, expected),
            ComparisonOperator::Eq => self.eval_eq(actual, expected),
            ComparisonOperator::Ne => !self.eval_eq(actual, expected),
            ComparisonOperator::Gt => self.eval_cmp(actual, expected, |a, b| a > b),
            ComparisonOperator::Lt => self.eval_cmp(actual, expected, |a, b| a < b),
            ComparisonOperator::Ge => self.eval_cmp(actual, expected, |a, b| a >= b),
            ComparisonOperator::Le => self.eval_cmp(actual, expected, |a, b| a <= b),
            _ => false,
        }
    }

    fn eval_contains(
        &self,
        actual: &Value,
        expected: &Value,
    ) -> bool {
        match actual {
            Value::String(s) => s.contains(render(expected).as_str()),
            Value::Array(arr) => arr.iter().any(|v| v == expected || render(v) == render(expected)),
            Value::Object(obj) => obj.contains_key(render(expected).as_str()),
            _ => false,
        }
    }

    fn eval_is(
        &self,
        actual: &Value,
        expected: &Value,
    ) -> bool {
        match (actual, expected) {
            (Value::Bool(b), Value::String(e)) => (*b && e == "true") || (!*b && e == "false"),
            _ => actual == expected,
        }
    }

    fn eval_in(
        &self,
        actual: &Value,
        expected: &Value,
    ) -> bool {
        match expected {
            Value::Array(list) => list.iter().any(|e| e == actual || render(e) == render(actual)),
            Value::String(s) => matches!(actual, Value::String(a) if s.contains(a.as_str())),
            _ => false,
        }
    }

    fn eval_all_of(
        &self,
        actual: &Value,
        expected: &Value,
    ) -> bool {
        match (actual, expected) {
            (Value::Array(arr), Value::Array(list)) => list.iter().all(|e| arr.contains(e)),
            _ => false,
        }
    }

    fn eval_eq(
        &self,
        actual: &Value,
        expected: &Value,
    ) -> bool {
        match (as_number(actual), as_number(expected)) {
            (Some(a), Some(e)) => a == e,
            _ => actual == expected,
        }
    }

    fn eval_cmp<F>(
        &self,
        actual: &Value,
        expected: &Value,
        cmp: F,
    ) -> bool
    where
        F: Fn(f64, f64) -> bool,
    {
        match (as_number(actual), as_number(expected)) {
            (Some(a), Some(e)) => cmp(a, e),
            _ => false,
        }
    }

    /// Process conditions for a single case
    fn process_conditions(
        &self,
        conditions: &[Condition],
        logical_operator: LogicalOperator,
    ) -> bool {
        let mut results = conditions.iter().map(|c| self.evaluate_comparison(&c.variable, c.comparison_operator, &c.value));

        match logical_operator {
            LogicalOperator::And => results.all(|r| r),
            LogicalOperator::Or => results.any(|r| r),
        }
    }
}

#[async_trait]
impl NodeKind for IfElseNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::task("if_else").with_outputs(&["*"])
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "cases": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "case_id": { "type": "string", "not": { "enum": ["else", "error", "main"] } },
                            "logical_operator": { "type": "string", "enum": ["and", "or"] },
                            "conditions": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "variable": {},
                                        "comparison_operator": {
                                            "type": "string",
                                            "enum": [
                                                "contains", "not_contains", "start_with", "end_with", "is", "is_not", "empty", "not_empty",
                                                "in", "not_in", "all_of", "eq", "ne", "gt", "lt", "ge", "le", "null", "not_null"
                                            ]
                                        },
                                        "value": {}
                                    },
                                    "required": ["variable", "comparison_operator"]
                                }
                            }
                        },
                        "required": ["case_id", "conditions"]
                    }
                }
            },
            "required": ["cases"]
        })
    }

    async fn execute(
        &self,
        config: Value,
        ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let config: IfElseConfig = serde_json::from_value(config)?;

        let mut selected_case_id = ELSE_PORT.to_string();
        let mut final_result = false;

        for case in &config.cases {
            // Short-circuit: first passing case wins
            if self.process_conditions(&case.conditions, case.logical_operator) {
                selected_case_id = case.case_id.clone();
                final_result = true;
                break;
            }
        }

        tracing::debug!(eid = %ctx.execution_id, nid = %ctx.node_id, selected = %selected_case_id, "if_else selected port");
        let outputs = json!({ IF_ELSE_RESULT: final_result, IF_ELSE_SELECTED: selected_case_id });

        Ok(NodeOutput::new(outputs).on_port(&selected_case_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::tests::context;

    fn cases(conditions: Value) -> Value {
        json!({ "cases": [{ "case_id": "hit", "logical_operator": "and", "conditions": conditions }] })
    }

    async fn selected(config: Value) -> String {
        IfElseNode.execute(config, context(Value::Null)).await.unwrap().port.unwrap()
    }

    #[tokio::test]
    async fn test_numeric_comparisons() {
        assert_eq!(selected(cases(json!([{ "variable": 150, "comparison_operator": "gt", "value": 100 }]))).await, "hit");
        assert_eq!(selected(cases(json!([{ "variable": "150", "comparison_operator": "le", "value": "100" }]))).await, "else");
        assert_eq!(selected(cases(json!([{ "variable": 3, "comparison_operator": "eq", "value": "3.0" }]))).await, "hit");
    }

    #[tokio::test]
    async fn test_string_and_collection_operators() {
        assert_eq!(selected(cases(json!([{ "variable": "ada@example.com", "comparison_operator": "end_with", "value": ".com" }]))).await, "hit");
        assert_eq!(selected(cases(json!([{ "variable": ["a", "b"], "comparison_operator": "all_of", "value": ["b", "a"] }]))).await, "hit");
        assert_eq!(selected(cases(json!([{ "variable": "gold", "comparison_operator": "in", "value": ["gold", "silver"] }]))).await, "hit");
        assert_eq!(selected(cases(json!([{ "variable": "", "comparison_operator": "not_empty" }]))).await, "else");
        assert_eq!(selected(cases(json!([{ "variable": null, "comparison_operator": "null" }]))).await, "hit");
        assert_eq!(selected(cases(json!([{ "variable": true, "comparison_operator": "is", "value": "true" }]))).await, "hit");
    }

    #[tokio::test]
    async fn test_first_matching_case_wins() {
        let config = json!({
            "cases": [
                { "case_id": "small", "logical_operator": "or", "conditions": [
                    { "variable": 5, "comparison_operator": "lt", "value": 1 },
                    { "variable": 5, "comparison_operator": "lt", "value": 10 }
                ] },
                { "case_id": "any", "conditions": [{ "variable": 5, "comparison_operator": "not_null" }] }
            ]
        });
        let out = IfElseNode.execute(config, context(Value::Null)).await.unwrap();
        assert_eq!(out.port.as_deref(), Some("small"));
        assert_eq!(out.value, json!({ "result": true, "selected": "small" }));
    }

    #[test]
    fn test_schema_rejects_reserved_case_ids() {
        let bad = cases(json!([])).to_string().replace("hit", "else");
        assert!(IfElseNode.validate_config(&serde_json::from_str(&bad).unwrap()).is_err());
        assert!(IfElseNode.validate_config(&cases(json!([{ "variable": "{{ $prev.n }}", "comparison_operator": "gt", "value": 1 }]))).is_ok());
    }
}
