// src/backend/methods.rs
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write;

/// A function exported by a function-based environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// `Actor` for methods on the environment's actor class, `module` for free functions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointParameter {
    pub name: String,
    #[serde(rename = "in")]
    pub location: String,
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "type", default = "unknown_type")]
    pub param_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

fn unknown_type() -> String {
    "unknown".to_string()
}

fn default_verb() -> String {
    "GET".to_string()
}

/// An endpoint exposed by an HTTP-based environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpEndpoint {
    pub path: String,
    #[serde(default = "default_verb")]
    pub method: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<EndpointParameter>,
}

/// Typed view over a raw descriptor. The raw value stays authoritative.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodDescriptor {
    Function(FunctionSignature),
    Http(HttpEndpoint),
    Other(Value),
}

impl MethodDescriptor {
    /// A `path` key marks the HTTP shape.
    pub fn from_value(value: &Value) -> Self {
        let parsed = if value.get("path").is_some() {
            serde_json::from_value(value.clone()).map(MethodDescriptor::Http).ok()
        } else {
            serde_json::from_value(value.clone()).map(MethodDescriptor::Function).ok()
        };
        parsed.unwrap_or_else(|| MethodDescriptor::Other(value.clone()))
    }
}

const RULE: &str = "============================================================";

/// Human-readable rendering of a method listing.
pub fn describe_methods(methods: &[Value]) -> String {
    let Some(first) = methods.first() else {
        return "No methods available\n".to_string();
    };

    if !first.is_object() {
        let mut out = String::from("\nAvailable methods:\n");
        for method in methods {
            let _ = writeln!(out, "  - {}", method);
        }
        return out;
    }

    let descriptors: Vec<MethodDescriptor> = methods.iter().map(MethodDescriptor::from_value).collect();
    if first.get("path").is_some() {
        describe_endpoints(&descriptors)
    } else {
        describe_functions(&descriptors)
    }
}

fn describe_functions(descriptors: &[MethodDescriptor]) -> String {
    let mut out = format!("\n{RULE}\nAvailable Methods (function_based)\n{RULE}\n");

    for (source, title) in [("Actor", "Actor Methods"), ("module", "Module Functions")] {
        let group: Vec<&FunctionSignature> = descriptors
            .iter()
            .filter_map(|d| match d {
                MethodDescriptor::Function(f) if f.source.as_deref() == Some(source) => Some(f),
                _ => None,
            })
            .collect();
        if group.is_empty() {
            continue;
        }

        let _ = writeln!(out, "\n{}:", title);
        for f in group {
            let sig = f.signature.as_deref().unwrap_or("(...)");
            let _ = writeln!(out, "  env.{}{}", f.name, sig);
        }
    }

    let _ = writeln!(out, "\n{RULE}");
    out
}

fn describe_endpoints(descriptors: &[MethodDescriptor]) -> String {
    let mut out = format!("\n{RULE}\nAvailable Endpoints (http_based)\n{RULE}\n");

    for endpoint in descriptors.iter().filter_map(|d| match d {
        MethodDescriptor::Http(e) => Some(e),
        _ => None,
    }) {
        let _ = writeln!(out, "\n{} {}", endpoint.method, endpoint.path);
        if !endpoint.summary.is_empty() {
            let _ = writeln!(out, "  Summary: {}", endpoint.summary);
        }
        if !endpoint.description.is_empty() && endpoint.description != endpoint.summary {
            let _ = writeln!(out, "  Description: {}", endpoint.description);
        }

        let query: Vec<_> = endpoint.parameters.iter().filter(|p| p.location == "query").collect();
        let body: Vec<_> = endpoint.parameters.iter().filter(|p| p.location == "body").collect();

        if !query.is_empty() {
            let _ = writeln!(out, "  Query Parameters:");
            for p in query {
                let _ = writeln!(out, "    - {}: {}{}", p.name, p.param_type, required_tag(p.required));
            }
        }
        if !body.is_empty() {
            let _ = writeln!(out, "  Request Body:");
            for p in body {
                let default = match &p.default {
                    Some(v) if !v.is_null() => format!(" = {}", v),
                    _ => String::new(),
                };
                let _ = writeln!(
                    out,
                    "    - {}: {}{}{}",
                    p.name,
                    p.param_type,
                    required_tag(p.required),
                    default
                );
            }
        }
    }

    let _ = writeln!(out, "\n{RULE}");
    out
}

fn required_tag(required: bool) -> &'static str {
    if required {
        " (required)"
    } else {
        " (optional)"
    }
}
