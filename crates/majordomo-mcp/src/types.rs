//! Wire types for the tool surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Self-describing definition of one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (`state.get`, `notify`, …).
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema of the input object.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    /// JSON Schema of the output, when the tool declares one.
    #[serde(rename = "outputSchema", default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// Argument names whose values gate on approval.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arg_sensitivities: Vec<String>,
}

/// Content block of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
}

/// Result of one `tools/call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// Content blocks.
    pub content: Vec<ToolContent>,
    /// Structured payload mirroring the content.
    #[serde(
        rename = "structuredContent",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub structured: Option<Value>,
    /// Whether the tool reported a failure it chose not to raise.
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolCallResult {
    /// A successful result carrying a structured value.
    #[must_use]
    pub fn structured(value: Value) -> Self {
        let text = value.to_string();
        Self {
            content: vec![ToolContent::Text { text }],
            structured: Some(value),
            is_error: false,
        }
    }

    /// All text content joined together.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                ToolContent::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// `tools/call` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    /// Tool name.
    pub name: String,
    /// Tool arguments.
    #[serde(default)]
    pub arguments: Value,
}

/// `tools/list` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolListResult {
    /// Every registered tool.
    pub tools: Vec<ToolDefinition>,
}

/// `initialize` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Protocol revision the server speaks.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server identity.
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
    /// Declared capabilities.
    pub capabilities: Value,
}

/// Server identity block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Butler name.
    pub name: String,
    /// Build version.
    pub version: String,
}
