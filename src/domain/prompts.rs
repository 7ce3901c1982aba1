use std::collections::HashMap;

use rust_mcp_sdk::schema::{
    ContentBlock, GetPromptRequestParams, GetPromptResult, Prompt, PromptArgument, PromptMessage,
    Role, TextContent,
};
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::mcp::server::to_result;

pub const CONTENT_SEARCH_PROMPT: &str = "content_search";
pub const AVAILABILITY_CHECK_PROMPT: &str = "availability_check";

struct PromptDefinition {
    name: &'static str,
    description: &'static str,
    arguments: &'static [(&'static str, &'static str, bool)],
}

const PROMPTS: &[PromptDefinition] = &[
    PromptDefinition {
        name: CONTENT_SEARCH_PROMPT,
        description: "Find something to watch from a free-form request",
        arguments: &[
            ("query", "What the viewer is in the mood for", true),
            ("genre", "Preferred genre", false),
            ("platform", "Platform the viewer subscribes to", false),
            ("region", "Viewer region code", false),
            ("content_type", "Movie, series, documentary or short", false),
        ],
    },
    PromptDefinition {
        name: AVAILABILITY_CHECK_PROMPT,
        description: "Find out where a specific title is streaming",
        arguments: &[
            ("title", "Title to look up", true),
            ("region", "Viewer region code", false),
        ],
    },
];

pub fn build_prompts_list() -> Vec<Prompt> {
    PROMPTS
        .iter()
        .map(|prompt| Prompt {
            arguments: prompt
                .arguments
                .iter()
                .map(|(name, description, required)| PromptArgument {
                    description: Some(description.to_string()),
                    name: name.to_string(),
                    required: Some(*required),
                    title: None,
                })
                .collect(),
            description: Some(prompt.description.to_string()),
            icons: vec![],
            meta: None,
            name: prompt.name.to_string(),
            title: None,
        })
        .collect()
}

pub fn prompt_names() -> Vec<String> {
    PROMPTS.iter().map(|prompt| prompt.name.to_string()).collect()
}

fn render(name: &str, arguments: &HashMap<String, String>) -> String {
    let argument = |key: &str| arguments.get(key).map(String::as_str).unwrap_or_default();
    let filters: Vec<String> = ["genre", "platform", "region", "content_type"]
        .into_iter()
        .filter(|key| !argument(*key).is_empty())
        .map(|key| format!("{key}={}", argument(key)))
        .collect();

    match name {
        CONTENT_SEARCH_PROMPT if filters.is_empty() => format!(
            "Use the search_content tool to find titles matching: {}",
            argument("query")
        ),
        CONTENT_SEARCH_PROMPT => format!(
            "Use the search_content tool to find titles matching: {} ({})",
            argument("query"),
            filters.join(", ")
        ),
        _ if argument("region").is_empty() => format!(
            "Use the check_availability tool to find where \"{}\" is streaming.",
            argument("title")
        ),
        _ => format!(
            "Use the check_availability tool to find where \"{}\" is streaming in {}.",
            argument("title"),
            argument("region")
        ),
    }
}

pub fn handle_prompts_get(params: Option<Value>) -> Result<Value, AppError> {
    let Some(raw_params) = params else {
        return Err(AppError::bad_request(
            "missing_params",
            "prompts/get requires params",
        ));
    };

    let request: GetPromptRequestParams = serde_json::from_value(raw_params)
        .map_err(|err| AppError::bad_request("invalid_params", err.to_string()))?;

    let Some(prompt) = PROMPTS.iter().find(|prompt| prompt.name == request.name) else {
        return Err(AppError::bad_request_with_details(
            "prompt_not_found",
            "unknown prompt name",
            json!({ "name": request.name }),
        ));
    };

    let arguments = request.arguments.unwrap_or_default();
    if let Some((missing, _, _)) = prompt.arguments.iter().find(|(name, _, required)| {
        *required
            && arguments
                .get(*name)
                .map_or(true, |value| value.trim().is_empty())
    }) {
        return Err(AppError::bad_request_with_details(
            "missing_prompt_argument",
            format!("prompt argument {missing} is required"),
            json!({ "argument": missing }),
        ));
    }

    to_result(&GetPromptResult {
        description: Some(prompt.description.to_string()),
        messages: vec![PromptMessage {
            content: ContentBlock::from(TextContent::new(
                render(prompt.name, &arguments),
                None,
                None,
            )),
            role: Role::User,
        }],
        meta: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_declare_required_arguments() {
        let prompts = build_prompts_list();
        let search = &prompts[0];

        assert_eq!(search.name, CONTENT_SEARCH_PROMPT);
        assert_eq!(search.arguments[0].name, "query");
        assert_eq!(search.arguments[0].required, Some(true));
        assert_eq!(search.arguments[1].required, Some(false));
    }

    #[test]
    fn get_renders_filters_into_message() {
        let result = handle_prompts_get(Some(json!({
            "name": CONTENT_SEARCH_PROMPT,
            "arguments": { "query": "heists", "genre": "crime" }
        })))
        .expect("prompt");

        let text = result["messages"][0]["content"]["text"]
            .as_str()
            .expect("text message");
        assert!(text.contains("heists"));
        assert!(text.contains("genre=crime"));
        assert_eq!(result["messages"][0]["role"], "user");
    }

    #[test]
    fn get_rejects_missing_required_argument() {
        let error = handle_prompts_get(Some(json!({
            "name": AVAILABILITY_CHECK_PROMPT,
            "arguments": { "region": "US" }
        })))
        .expect_err("title missing");

        assert!(matches!(
            error,
            AppError::BadRequest {
                code: "missing_prompt_argument",
                ..
            }
        ));
    }

    #[test]
    fn get_rejects_unknown_prompt() {
        let error =
            handle_prompts_get(Some(json!({ "name": "nope" }))).expect_err("unknown prompt");

        assert!(matches!(
            error,
            AppError::BadRequest {
                code: "prompt_not_found",
                ..
            }
        ));
    }
}
