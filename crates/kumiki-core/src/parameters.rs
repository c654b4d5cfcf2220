//! `${...}` parameter templates.

use crate::definition::Parameters;
use serde_json::Value;

/// Resolves the top-level templates of `parameters` against `context`.
///
/// A value that is exactly a string `${a.b.c}` is replaced by the value at
/// that dotted path (array elements are addressed by index); a path that does
/// not exist yields `null`. Everything else, including nested objects, is
/// copied as is.
///
/// # Examples
///
/// ```
/// use kumiki_core::map_parameters_to_value;
/// use serde_json::json;
///
/// let parameters = json!({"a": "${t1.output.a}", "b": "hardcoded"});
/// let context = json!({"t1": {"output": {"a": "value"}}});
/// let mapped = map_parameters_to_value(parameters.as_object().unwrap(), &context);
/// assert_eq!(mapped, json!({"a": "value", "b": "hardcoded"}));
/// ```
pub fn map_parameters_to_value(parameters: &Parameters, context: &Value) -> Value {
    let mapped = parameters
        .iter()
        .map(|(key, value)| {
            let resolved = match value.as_str().and_then(template_path) {
                Some(path) => lookup(context, path),
                None => value.clone(),
            };
            (key.clone(), resolved)
        })
        .collect();
    Value::Object(mapped)
}

/// Returns the dotted path inside `${...}`.
fn template_path(value: &str) -> Option<&str> {
    value.strip_prefix("${")?.strip_suffix('}')
}

fn lookup(context: &Value, path: &str) -> Value {
    path.split('.')
        .try_fold(context, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
        .cloned()
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Parameters {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {}", other),
        }
    }

    fn context() -> Value {
        json!({
            "t1": {
                "taskReferenceName": "t1",
                "output": {"a": "eiei", "items": [10, 20]},
                "input": {}
            },
            "workflow": {"input": {"orderId": 42}}
        })
    }

    #[test]
    fn test_parse_parameter() {
        let mapped = map_parameters_to_value(
            &params(json!({"a": "${t1.output.a}", "b": "hardcoded"})),
            &context(),
        );
        assert_eq!(mapped, json!({"a": "eiei", "b": "hardcoded"}));
    }

    #[test]
    fn test_wont_parse_nested() {
        let mapped = map_parameters_to_value(
            &params(json!({
                "a": "${t1.output.a}",
                "b": "hardcoded",
                "nested": {"c": "${t1.output.a}"}
            })),
            &context(),
        );
        assert_eq!(
            mapped,
            json!({"a": "eiei", "b": "hardcoded", "nested": {"c": "${t1.output.a}"}})
        );
    }

    #[test]
    fn test_missing_path_is_null() {
        let mapped = map_parameters_to_value(
            &params(json!({"a": "${t9.output.a}", "b": "${t1.output.missing}"})),
            &context(),
        );
        assert_eq!(mapped, json!({"a": null, "b": null}));
    }

    #[test]
    fn test_workflow_and_array_lookup() {
        let mapped = map_parameters_to_value(
            &params(json!({
                "order": "${workflow.input.orderId}",
                "second": "${t1.output.items.1}",
                "whole": "${t1.output}",
                "partial": "prefix ${t1.output.a}",
                "number": 5
            })),
            &context(),
        );
        assert_eq!(
            mapped,
            json!({
                "order": 42,
                "second": 20,
                "whole": {"a": "eiei", "items": [10, 20]},
                "partial": "prefix ${t1.output.a}",
                "number": 5
            })
        );
    }
}
