//! Model Context Protocol resource providers
//!
//! Static vocabulary resources under `catalog://` are served locally. The
//! `catalog://trending/{region}` template is read from the backend.

use rust_mcp_sdk::schema::{
    ReadResourceContent, ReadResourceRequestParams, ReadResourceResult, Resource,
    ResourceTemplate, TextResourceContents,
};
use serde_json::{json, Map, Value};

use crate::backend::TRENDING_URI_PREFIX;
use crate::domain::catalog::{canonical, CONTENT_TYPES, GENRES, PLATFORMS, REGIONS};
use crate::errors::AppError;
use crate::logging::LogLevel;
use crate::mcp::server::{to_result, RequestContext};

pub const GENRES_RESOURCE_URI: &str = "catalog://genres";
pub const PLATFORMS_RESOURCE_URI: &str = "catalog://platforms";
pub const REGIONS_RESOURCE_URI: &str = "catalog://regions";
pub const CONTENT_TYPES_RESOURCE_URI: &str = "catalog://content-types";
pub const TRENDING_RESOURCE_TEMPLATE: &str = "catalog://trending/{region}";

const JSON_MIME_TYPE: &str = "application/json";

struct LocalResource {
    uri: &'static str,
    name: &'static str,
    description: &'static str,
    values: &'static [&'static str],
}

const LOCAL_RESOURCES: &[LocalResource] = &[
    LocalResource {
        uri: GENRES_RESOURCE_URI,
        name: "Genres",
        description: "Genres accepted by search filters",
        values: GENRES,
    },
    LocalResource {
        uri: PLATFORMS_RESOURCE_URI,
        name: "Platforms",
        description: "Streaming platforms known to the catalog",
        values: PLATFORMS,
    },
    LocalResource {
        uri: REGIONS_RESOURCE_URI,
        name: "Regions",
        description: "Supported ISO 3166 region codes",
        values: REGIONS,
    },
    LocalResource {
        uri: CONTENT_TYPES_RESOURCE_URI,
        name: "Content Types",
        description: "Kinds of content in the catalog",
        values: CONTENT_TYPES,
    },
];

pub fn build_resources_list() -> Vec<Resource> {
    LOCAL_RESOURCES
        .iter()
        .map(|resource| Resource {
            annotations: None,
            description: Some(resource.description.to_string()),
            icons: vec![],
            meta: None,
            mime_type: Some(JSON_MIME_TYPE.to_string()),
            name: resource.name.to_string(),
            size: None,
            title: None,
            uri: resource.uri.to_string(),
        })
        .collect()
}

pub fn build_resource_templates_list() -> Vec<ResourceTemplate> {
    vec![ResourceTemplate {
        annotations: None,
        description: Some("Titles trending right now in one region".to_string()),
        icons: vec![],
        meta: None,
        mime_type: Some(JSON_MIME_TYPE.to_string()),
        name: "Trending".to_string(),
        title: None,
        uri_template: TRENDING_RESOURCE_TEMPLATE.to_string(),
    }]
}

/// Static resource URIs followed by template URIs.
pub fn resource_uris() -> Vec<String> {
    LOCAL_RESOURCES
        .iter()
        .map(|resource| resource.uri.to_string())
        .chain(
            build_resource_templates_list()
                .into_iter()
                .map(|template| template.uri_template),
        )
        .collect()
}

/// Allowed values for a template variable, matching either the template or a concrete URI.
pub fn template_argument_values(uri: &str, argument: &str) -> Option<&'static [&'static str]> {
    let is_trending = uri == TRENDING_RESOURCE_TEMPLATE || uri.starts_with(TRENDING_URI_PREFIX);
    match (is_trending, argument) {
        (true, "region") => Some(REGIONS),
        _ => None,
    }
}

fn text_contents(uri: &str, body: &Value) -> ReadResourceContent {
    ReadResourceContent::from(TextResourceContents {
        meta: None,
        mime_type: Some(JSON_MIME_TYPE.to_string()),
        text: body.to_string(),
        uri: uri.to_string(),
    })
}

pub async fn handle_resources_read(
    ctx: &RequestContext,
    params: Option<Value>,
) -> Result<Value, AppError> {
    let Some(raw_params) = params else {
        return Err(AppError::bad_request(
            "missing_params",
            "resources/read requires params",
        ));
    };

    let resource_read: ReadResourceRequestParams = serde_json::from_value(raw_params)
        .map_err(|err| AppError::bad_request("invalid_params", err.to_string()))?;
    let uri = resource_read.uri.trim();

    if let Some(local) = LOCAL_RESOURCES.iter().find(|resource| resource.uri == uri) {
        return to_result(&ReadResourceResult {
            contents: vec![text_contents(uri, &json!({ "values": local.values }))],
            meta: None,
        });
    }

    let concrete_uri = match uri.strip_prefix(TRENDING_URI_PREFIX) {
        Some(region) => match canonical(REGIONS, region) {
            Some(region) => format!("{TRENDING_URI_PREFIX}{region}"),
            None => {
                return Err(AppError::not_found(
                    "unknown_region",
                    "trending is only available for supported regions",
                    json!({ "uri": uri, "validValues": REGIONS }),
                ))
            }
        },
        None => {
            return Err(AppError::not_found(
                "resource_not_found",
                "unknown resource uri",
                json!({ "uri": uri }),
            ))
        }
    };

    match ctx
        .state
        .backend
        .read(&concrete_uri, &ctx.call_context())
        .await
    {
        Ok(fetched) => {
            let mut meta = Map::new();
            meta.insert("stale".to_string(), json!(fetched.is_stale()));
            meta.insert("attempts".to_string(), json!(fetched.attempts));
            if let Some(cached_at) = fetched.cached_at() {
                meta.insert("cachedAt".to_string(), json!(cached_at.to_rfc3339()));
            }

            to_result(&ReadResourceResult {
                contents: vec![text_contents(&concrete_uri, &fetched.data)],
                meta: Some(meta),
            })
        }
        Err(err) => {
            if !err.is_cancellation() {
                ctx.session.notify_log(
                    &ctx.state.logger,
                    LogLevel::Error,
                    "resources",
                    json!({ "uri": concrete_uri, "error": err.to_string() }),
                );
            }
            Err(err)
        }
    }
}
