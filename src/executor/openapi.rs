// src/executor/openapi.rs
use crate::backend::{EndpointParameter, HttpEndpoint};
use serde_json::{Map, Value};

const VERBS: [&str; 5] = ["get", "post", "put", "delete", "patch"];

/// Flattens an OpenAPI document into endpoint descriptors.
pub fn parse_openapi_schema(schema: &Value) -> Vec<Value> {
    let empty = Map::new();
    let paths = schema.get("paths").and_then(Value::as_object).unwrap_or(&empty);
    let components = schema
        .pointer("/components/schemas")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let mut endpoints = Vec::new();
    for (path, operations) in paths {
        let Some(operations) = operations.as_object() else {
            continue;
        };

        for (verb, details) in operations {
            if !VERBS.contains(&verb.to_lowercase().as_str()) {
                continue;
            }

            let mut endpoint = HttpEndpoint {
                path: path.clone(),
                method: verb.to_uppercase(),
                summary: str_field(details, "summary"),
                description: str_field(details, "description"),
                parameters: Vec::new(),
            };

            for param in details.get("parameters").and_then(Value::as_array).into_iter().flatten() {
                endpoint.parameters.push(EndpointParameter {
                    name: str_field(param, "name"),
                    location: str_field(param, "in"),
                    required: param.get("required").and_then(Value::as_bool).unwrap_or(false),
                    param_type: schema_type(param.get("schema")),
                    default: None,
                });
            }

            if let Some(body) = details.pointer("/requestBody/content/application~1json/schema") {
                let body = resolve_schema(body, components);
                let required: Vec<&str> = body
                    .get("required")
                    .and_then(Value::as_array)
                    .map(|r| r.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();

                if let Some(properties) = body.get("properties").and_then(Value::as_object) {
                    for (name, prop) in properties {
                        endpoint.parameters.push(EndpointParameter {
                            name: name.clone(),
                            location: "body".to_string(),
                            required: required.contains(&name.as_str()),
                            param_type: schema_type(Some(prop)),
                            default: prop.get("default").cloned(),
                        });
                    }
                }
            }

            match serde_json::to_value(&endpoint) {
                Ok(value) => endpoints.push(value),
                Err(e) => tracing::warn!(%path, "Skipping endpoint: {}", e),
            }
        }
    }

    endpoints
}

/// Follows a `$ref`, or the first `$ref` inside `allOf`.
fn resolve_schema<'a>(schema: &'a Value, components: &'a Map<String, Value>) -> &'a Value {
    let reference = schema.get("$ref").and_then(Value::as_str).or_else(|| {
        schema
            .get("allOf")
            .and_then(Value::as_array)?
            .iter()
            .find_map(|item| item.get("$ref").and_then(Value::as_str))
    });

    match reference.and_then(|r| r.rsplit('/').next()) {
        Some(name) => components.get(name).unwrap_or(schema),
        None => schema,
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn schema_type(schema: Option<&Value>) -> String {
    schema
        .and_then(|s| s.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_query_and_referenced_body() {
        let schema = json!({
            "paths": {
                "/evaluate": {
                    "post": {
                        "summary": "Evaluate",
                        "parameters": [
                            {"name": "verbose", "in": "query", "required": false, "schema": {"type": "boolean"}}
                        ],
                        "requestBody": {
                            "content": {"application/json": {"schema": {"$ref": "#/components/schemas/EvalRequest"}}}
                        }
                    },
                    "options": {}
                },
                "/health": {"get": {"summary": "Health"}}
            },
            "components": {
                "schemas": {
                    "EvalRequest": {
                        "properties": {
                            "task_type": {"type": "string"},
                            "num_samples": {"type": "integer", "default": 1}
                        },
                        "required": ["task_type"]
                    }
                }
            }
        });

        let endpoints = parse_openapi_schema(&schema);
        assert_eq!(endpoints.len(), 2);

        let evaluate = endpoints.iter().find(|e| e["path"] == "/evaluate").unwrap();
        assert_eq!(evaluate["method"], "POST");
        let params = evaluate["parameters"].as_array().unwrap();
        assert_eq!(params.len(), 3);
        assert_eq!(params[0]["in"], "query");
        assert_eq!(params[0]["type"], "boolean");
        assert_eq!(params[1]["name"], "task_type");
        assert_eq!(params[1]["required"], true);
        assert_eq!(params[2]["default"], 1);
    }

    #[test]
    fn all_of_reference_is_followed() {
        let schema = json!({
            "paths": {"/run": {"post": {"requestBody": {"content": {"application/json": {
                "schema": {"allOf": [{"$ref": "#/components/schemas/Run"}]}
            }}}}}},
            "components": {"schemas": {"Run": {"properties": {"seed": {"type": "integer"}}}}}
        });

        let endpoints = parse_openapi_schema(&schema);
        assert_eq!(endpoints[0]["parameters"][0]["name"], "seed");
        assert_eq!(endpoints[0]["parameters"][0]["required"], false);
    }

    #[test]
    fn missing_paths_yield_nothing() {
        assert!(parse_openapi_schema(&json!({})).is_empty());
    }
}
