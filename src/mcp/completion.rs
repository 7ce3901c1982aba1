//! Argument autocompletion for `completion/complete`
//!
//! Suggestions are resolved from the reference and argument name, then filtered by a
//! case-insensitive substring match and capped at [`MAX_COMPLETION_VALUES`].

use rust_mcp_sdk::schema::{CompleteResult, CompleteResultCompletion};
use serde::Deserialize;
use serde_json::Value;

use crate::domain::{catalog::vocabulary_for, prompts, resources, tools};
use crate::errors::AppError;
use crate::mcp::server::to_result;

pub const MAX_COMPLETION_VALUES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum CompletionRef {
    #[serde(rename = "ref/resource")]
    Resource { uri: String },
    #[serde(rename = "ref/prompt")]
    Prompt { name: String },
    #[serde(rename = "ref/tool")]
    Tool { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CompletionArgument {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Deserialize)]
struct CompleteParams {
    #[serde(rename = "ref")]
    reference: CompletionRef,
    argument: CompletionArgument,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub values: Vec<String>,
    pub has_more: bool,
    pub total: usize,
}

fn is_uri_argument(name: &str) -> bool {
    name == "uri" || name.ends_with("uri") || name.ends_with("Uri")
}

fn candidates(reference: &CompletionRef, argument: &str) -> Vec<String> {
    let owned = |values: &[&str]| -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    };

    match reference {
        CompletionRef::Resource { .. } if is_uri_argument(argument) => resources::resource_uris(),
        CompletionRef::Prompt { .. } if argument == "name" => prompts::prompt_names(),
        CompletionRef::Prompt { .. } => vocabulary_for(argument).map(owned).unwrap_or_default(),
        CompletionRef::Tool { name } => {
            tools::argument_suggestions(name, argument).unwrap_or_default()
        }
        CompletionRef::Resource { uri } => resources::template_argument_values(uri, argument)
            .map(owned)
            .unwrap_or_default(),
    }
}

pub fn filter_candidates(candidates: Vec<String>, partial: &str) -> Completion {
    let needle = partial.trim().to_lowercase();
    let matches: Vec<String> = candidates
        .into_iter()
        .filter(|candidate| needle.is_empty() || candidate.to_lowercase().contains(&needle))
        .collect();

    let total = matches.len();
    let values: Vec<String> = matches.into_iter().take(MAX_COMPLETION_VALUES).collect();

    Completion {
        has_more: total > values.len(),
        values,
        total,
    }
}

pub fn complete(reference: &CompletionRef, argument: &CompletionArgument) -> Completion {
    filter_candidates(candidates(reference, &argument.name), &argument.value)
}

pub fn handle_completion_complete(params: Option<Value>) -> Result<Value, AppError> {
    let Some(raw_params) = params else {
        return Err(AppError::bad_request(
            "missing_params",
            "completion/complete requires params",
        ));
    };

    let request: CompleteParams = serde_json::from_value(raw_params)
        .map_err(|err| AppError::bad_request("invalid_params", err.to_string()))?;
    let completion = complete(&request.reference, &request.argument);

    to_result(&CompleteResult {
        completion: CompleteResultCompletion {
            has_more: Some(completion.has_more),
            total: Some(i64::try_from(completion.total).unwrap_or(i64::MAX)),
            values: completion.values,
        },
        meta: None,
    })
}
