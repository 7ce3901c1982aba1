//! Interactive tools exposed via Model Context Protocol
//!
//! Provides `search_content`, `check_availability` and `get_content_details`. Arguments are
//! validated and normalized here, then delegated to the `BackendProvider`.

use std::collections::HashMap;

use rust_mcp_sdk::schema::{
    CallToolRequestParams, CallToolResult, ContentBlock, TextContent, Tool, ToolInputSchema,
};
use serde_json::{json, Map, Value};

use crate::client::Fetched;
use crate::domain::catalog::{canonical, CONTENT_TYPES, GENRES, PLATFORMS, REGIONS};
use crate::errors::AppError;
use crate::logging::LogLevel;
use crate::mcp::server::{to_result, RequestContext};

pub const SEARCH_CONTENT_TOOL: &str = "search_content";
pub const CHECK_AVAILABILITY_TOOL: &str = "check_availability";
pub const GET_CONTENT_DETAILS_TOOL: &str = "get_content_details";

pub const DEFAULT_SEARCH_LIMIT: u64 = 10;
pub const MAX_SEARCH_LIMIT: u64 = 50;

const SEARCH_EXAMPLES: &[&str] = &[
    "feel-good comedies from the 90s",
    "slow-burn sci-fi with a female lead",
    "true crime documentaries",
];

fn property(schema: Value) -> Map<String, Value> {
    schema.as_object().cloned().unwrap_or_default()
}

fn vocabulary_property(description: &str, values: &[&str]) -> Map<String, Value> {
    property(json!({
        "type": "string",
        "description": description,
        "enum": values,
    }))
}

fn tool(
    name: &str,
    description: &str,
    required: &[&str],
    properties: Vec<(&str, Map<String, Value>)>,
) -> Tool {
    let properties: HashMap<String, Map<String, Value>> = properties
        .into_iter()
        .map(|(key, schema)| (key.to_string(), schema))
        .collect();

    Tool {
        annotations: None,
        description: Some(description.to_string()),
        execution: None,
        icons: vec![],
        input_schema: ToolInputSchema::new(
            required.iter().map(|field| field.to_string()).collect(),
            Some(properties),
            None,
        ),
        meta: None,
        name: name.to_string(),
        output_schema: None,
        title: None,
    }
}

pub fn build_tools_list() -> Vec<Tool> {
    vec![
        tool(
            SEARCH_CONTENT_TOOL,
            "Semantic search across the streaming catalog",
            &["query"],
            vec![
                (
                    "query",
                    property(json!({
                        "type": "string",
                        "description": "Natural language description of what to watch",
                        "examples": SEARCH_EXAMPLES,
                    })),
                ),
                ("genre", vocabulary_property("Restrict to one genre", GENRES)),
                ("platform", vocabulary_property("Restrict to one platform", PLATFORMS)),
                ("region", vocabulary_property("ISO 3166 region code", REGIONS)),
                ("content_type", vocabulary_property("Kind of content", CONTENT_TYPES)),
                (
                    "limit",
                    property(json!({
                        "type": "integer",
                        "description": "Maximum number of results",
                        "minimum": 1,
                        "maximum": MAX_SEARCH_LIMIT,
                        "default": DEFAULT_SEARCH_LIMIT,
                    })),
                ),
            ],
        ),
        tool(
            CHECK_AVAILABILITY_TOOL,
            "Check where a title can be streamed",
            &["title"],
            vec![
                (
                    "title",
                    property(json!({
                        "type": "string",
                        "description": "Title to look up",
                    })),
                ),
                ("region", vocabulary_property("ISO 3166 region code", REGIONS)),
                ("platform", vocabulary_property("Only check this platform", PLATFORMS)),
            ],
        ),
        tool(
            GET_CONTENT_DETAILS_TOOL,
            "Fetch full metadata for one catalog entry",
            &["content_id"],
            vec![(
                "content_id",
                property(json!({
                    "type": "string",
                    "description": "Catalog identifier returned by search_content",
                })),
            )],
        ),
    ]
}

/// `enum` or `examples` declared for `argument` in the named tool's input schema.
pub fn argument_suggestions(tool_name: &str, argument: &str) -> Option<Vec<String>> {
    let tool = build_tools_list()
        .into_iter()
        .find(|tool| tool.name == tool_name)?;
    let schema = tool.input_schema.properties?.remove(argument)?;

    ["enum", "examples"].into_iter().find_map(|key| {
        schema.get(key).and_then(Value::as_array).map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
    })
}

fn required_string(
    arguments: &Map<String, Value>,
    field: &'static str,
) -> Result<String, AppError> {
    arguments
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            AppError::bad_request_with_details(
                "missing_argument",
                format!("{field} is required and must be a non-empty string"),
                json!({ "argument": field }),
            )
        })
}

fn optional_vocabulary(
    arguments: &Map<String, Value>,
    field: &'static str,
    vocabulary: &[&'static str],
) -> Result<Option<&'static str>, AppError> {
    let Some(raw) = arguments.get(field).filter(|value| !value.is_null()) else {
        return Ok(None);
    };

    raw.as_str()
        .and_then(|value| canonical(vocabulary, value))
        .map(Some)
        .ok_or_else(|| {
            AppError::bad_request_with_details(
                "invalid_argument",
                format!("{field} must be one of: {}", vocabulary.join(", ")),
                json!({ "argument": field, "validValues": vocabulary }),
            )
        })
}

fn search_limit(arguments: &Map<String, Value>) -> Result<u64, AppError> {
    let Some(raw) = arguments.get("limit").filter(|value| !value.is_null()) else {
        return Ok(DEFAULT_SEARCH_LIMIT);
    };

    raw.as_u64()
        .filter(|limit| (1..=MAX_SEARCH_LIMIT).contains(limit))
        .ok_or_else(|| {
            AppError::bad_request(
                "invalid_limit",
                format!("limit must be between 1 and {MAX_SEARCH_LIMIT}"),
            )
        })
}

/// Validated backend arguments for `name`, with vocabulary values in canonical spelling.
pub fn normalize_arguments(
    name: &str,
    arguments: &Map<String, Value>,
) -> Result<Map<String, Value>, AppError> {
    let mut normalized = Map::new();

    match name {
        SEARCH_CONTENT_TOOL => {
            let query = required_string(arguments, "query")?;
            normalized.insert("query".to_string(), json!(query));
            copy_vocabulary(&mut normalized, arguments, "genre", GENRES)?;
            copy_vocabulary(&mut normalized, arguments, "platform", PLATFORMS)?;
            copy_vocabulary(&mut normalized, arguments, "region", REGIONS)?;
            copy_vocabulary(&mut normalized, arguments, "content_type", CONTENT_TYPES)?;
            normalized.insert("limit".to_string(), json!(search_limit(arguments)?));
        }
        CHECK_AVAILABILITY_TOOL => {
            let title = required_string(arguments, "title")?;
            normalized.insert("title".to_string(), json!(title));
            copy_vocabulary(&mut normalized, arguments, "region", REGIONS)?;
            copy_vocabulary(&mut normalized, arguments, "platform", PLATFORMS)?;
        }
        GET_CONTENT_DETAILS_TOOL => {
            let content_id = required_string(arguments, "content_id")?;
            normalized.insert("content_id".to_string(), json!(content_id));
        }
        other => {
            return Err(AppError::bad_request_with_details(
                "tool_not_found",
                "unknown tool name",
                json!({ "name": other }),
            ))
        }
    }

    Ok(normalized)
}

fn copy_vocabulary(
    normalized: &mut Map<String, Value>,
    arguments: &Map<String, Value>,
    field: &'static str,
    vocabulary: &[&'static str],
) -> Result<(), AppError> {
    if let Some(value) = optional_vocabulary(arguments, field, vocabulary)? {
        normalized.insert(field.to_string(), json!(value));
    }
    Ok(())
}

fn fetch_meta(fetched: &Fetched<Value>) -> Map<String, Value> {
    let mut meta = Map::new();
    meta.insert("stale".to_string(), json!(fetched.is_stale()));
    meta.insert("attempts".to_string(), json!(fetched.attempts));
    if let Some(cached_at) = fetched.cached_at() {
        meta.insert("cachedAt".to_string(), json!(cached_at.to_rfc3339()));
    }
    meta
}

pub fn build_tool_result(name: &str, fetched: Fetched<Value>) -> Result<Value, AppError> {
    let summary = if fetched.is_stale() {
        format!("{name} returned cached data because the backend is unavailable")
    } else {
        format!("{name} completed")
    };
    let meta = fetch_meta(&fetched);
    let structured_content = match fetched.data {
        Value::Object(map) => map,
        other => Map::from_iter([("result".to_string(), other)]),
    };

    to_result(&CallToolResult {
        content: vec![
            ContentBlock::from(TextContent::new(summary, None, None)),
            ContentBlock::from(TextContent::new(
                Value::Object(structured_content.clone()).to_string(),
                None,
                None,
            )),
        ],
        is_error: None,
        meta: Some(meta),
        structured_content: Some(structured_content),
    })
}

pub async fn handle_tools_call(
    ctx: &RequestContext,
    params: Option<Value>,
) -> Result<Value, AppError> {
    let Some(raw_params) = params else {
        return Err(AppError::bad_request(
            "missing_params",
            "tools/call requires params",
        ));
    };

    let progress_token = raw_params
        .get("_meta")
        .and_then(|meta| meta.get("progressToken"))
        .filter(|token| token.is_string() || token.is_number())
        .cloned();

    let tool_call: CallToolRequestParams = serde_json::from_value(raw_params)
        .map_err(|err| AppError::bad_request("invalid_params", err.to_string()))?;
    let arguments =
        normalize_arguments(&tool_call.name, &tool_call.arguments.unwrap_or_default())?;

    if let Some(token) = &progress_token {
        ctx.session.notify_progress(token, 0, 1, "started");
    }

    let outcome = ctx
        .state
        .backend
        .invoke(&tool_call.name, &arguments, &ctx.call_context())
        .await;

    match outcome {
        Ok(fetched) => {
            if let Some(token) = &progress_token {
                ctx.session.notify_progress(token, 1, 1, "completed");
            }
            if fetched.is_stale() {
                ctx.session.notify_log(
                    &ctx.state.logger,
                    LogLevel::Warn,
                    "tools",
                    json!({ "tool": tool_call.name, "message": "served stale cached data" }),
                );
            }
            build_tool_result(&tool_call.name, fetched)
        }
        Err(err) => {
            if !err.is_cancellation() {
                ctx.session.notify_log(
                    &ctx.state.logger,
                    LogLevel::Error,
                    "tools",
                    json!({ "tool": tool_call.name, "error": err.to_string() }),
                );
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::client::Freshness;

    fn arguments(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object arguments")
    }

    #[test]
    fn tools_list_exposes_three_tools_with_required_fields() {
        let tools = build_tools_list();
        let names: Vec<_> = tools.iter().map(|tool| tool.name.as_str()).collect();

        assert_eq!(
            names,
            vec![SEARCH_CONTENT_TOOL, CHECK_AVAILABILITY_TOOL, GET_CONTENT_DETAILS_TOOL]
        );
        assert_eq!(tools[0].input_schema.required, vec!["query"]);
        assert_eq!(tools[2].input_schema.required, vec!["content_id"]);
    }

    #[test]
    fn suggestions_come_from_enum_then_examples() {
        let genres = argument_suggestions(SEARCH_CONTENT_TOOL, "genre").expect("enum");
        assert!(genres.contains(&"thriller".to_string()));

        let queries = argument_suggestions(SEARCH_CONTENT_TOOL, "query").expect("examples");
        assert_eq!(queries.len(), SEARCH_EXAMPLES.len());

        assert_eq!(argument_suggestions(GET_CONTENT_DETAILS_TOOL, "content_id"), None);
        assert_eq!(argument_suggestions("missing_tool", "genre"), None);
    }

    #[test]
    fn search_arguments_are_canonicalized_with_default_limit() {
        let normalized = normalize_arguments(
            SEARCH_CONTENT_TOOL,
            &arguments(json!({ "query": "  heist movies ", "genre": "Crime", "region": "gb" })),
        )
        .expect("valid");

        assert_eq!(
            Value::Object(normalized),
            json!({
                "query": "heist movies",
                "genre": "crime",
                "region": "GB",
                "limit": DEFAULT_SEARCH_LIMIT,
            })
        );
    }

    #[test]
    fn invalid_vocabulary_value_lists_valid_values() {
        let error = normalize_arguments(
            CHECK_AVAILABILITY_TOOL,
            &arguments(json!({ "title": "Dune", "platform": "betamax" })),
        )
        .expect_err("invalid platform");

        match error {
            AppError::BadRequest { code, details, .. } => {
                assert_eq!(code, "invalid_argument");
                assert_eq!(details["argument"], "platform");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_required_argument_and_bad_limit_are_rejected() {
        assert!(normalize_arguments(GET_CONTENT_DETAILS_TOOL, &Map::new()).is_err());
        assert!(normalize_arguments(
            SEARCH_CONTENT_TOOL,
            &arguments(json!({ "query": "x", "limit": 500 }))
        )
        .is_err());
    }

    #[test]
    fn unknown_tool_is_invalid_params() {
        let error = normalize_arguments("delete_everything", &Map::new()).expect_err("unknown");
        assert!(matches!(error, AppError::BadRequest { code: "tool_not_found", .. }));
    }

    #[test]
    fn stale_results_are_labelled_in_meta() {
        let cached_at = Utc::now();
        let result = build_tool_result(
            SEARCH_CONTENT_TOOL,
            Fetched {
                data: json!({ "results": [] }),
                freshness: Freshness::Stale { cached_at },
                attempts: 4,
            },
        )
        .expect("result");

        assert_eq!(result["_meta"]["stale"], true);
        assert_eq!(result["_meta"]["attempts"], 4);
        assert_eq!(result["_meta"]["cachedAt"], cached_at.to_rfc3339());
        assert_eq!(result["structuredContent"], json!({ "results": [] }));
    }
}
