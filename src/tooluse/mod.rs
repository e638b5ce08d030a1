//! 基于提示词的工具调用
//!
//! 工具定义与集合、整步文本上的调用检测、隔离执行、
//! 工具目录注入与流式状态机

pub mod detector;
pub mod executor;
pub mod plugin;
pub mod prompt;
pub mod types;

pub use detector::{contains_tool_use, detect_tool_calls};
pub use executor::{execute_tool_calls, format_tool_results};
pub use plugin::{make_tool_use_transform, PromptToolUsePlugin};
pub use prompt::{build_tool_prompt, TOOL_USAGE_INSTRUCTIONS};
pub use types::{
    JsonSchema, PropertySchema, Tool, ToolCall, ToolCallStatus, ToolDefinition, ToolError,
    ToolResult, ToolSet,
    ToolValidationError,
};
