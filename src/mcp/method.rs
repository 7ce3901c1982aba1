use std::fmt;

/// Every method the engine routes. Parsing is the only way in, so dispatch stays exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum McpMethod {
    Initialize,
    Ping,
    ToolsList,
    ToolsCall,
    ResourcesList,
    ResourceTemplatesList,
    ResourcesRead,
    PromptsList,
    PromptsGet,
    InitializedNotification,
    CancelledNotification,
    LoggingSetLevel,
    CompletionComplete,
}

impl McpMethod {
    pub const ALL: [McpMethod; 13] = [
        McpMethod::Initialize,
        McpMethod::Ping,
        McpMethod::ToolsList,
        McpMethod::ToolsCall,
        McpMethod::ResourcesList,
        McpMethod::ResourceTemplatesList,
        McpMethod::ResourcesRead,
        McpMethod::PromptsList,
        McpMethod::PromptsGet,
        McpMethod::InitializedNotification,
        McpMethod::CancelledNotification,
        McpMethod::LoggingSetLevel,
        McpMethod::CompletionComplete,
    ];

    pub fn parse(method: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|known| known.as_str() == method)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Ping => "ping",
            Self::ToolsList => "tools/list",
            Self::ToolsCall => "tools/call",
            Self::ResourcesList => "resources/list",
            Self::ResourceTemplatesList => "resources/templates/list",
            Self::ResourcesRead => "resources/read",
            Self::PromptsList => "prompts/list",
            Self::PromptsGet => "prompts/get",
            Self::InitializedNotification => "notifications/initialized",
            Self::CancelledNotification => "notifications/cancelled",
            Self::LoggingSetLevel => "logging/setLevel",
            Self::CompletionComplete => "completion/complete",
        }
    }

    /// Methods whose in-flight calls are tracked and can be aborted by `notifications/cancelled`.
    pub fn is_cancellable(self) -> bool {
        matches!(self, Self::ToolsCall | Self::ResourcesRead | Self::PromptsGet)
    }
}

impl fmt::Display for McpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
