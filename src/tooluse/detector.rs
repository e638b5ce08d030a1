//! 工具调用检测器
//!
//! 在一步完整的模型输出文本上匹配 `<tool_use>` 标记块，解析出工具
//! 调用列表。检测总是在整步文本上进行，避免标记被流式切分导致漏检。

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use super::types::{ToolCall, ToolSet};

/// 匹配工具调用块：<tool_use><name>...</name><arguments>...</arguments></tool_use>
/// 非贪婪匹配，(?s) 让 `.` 跨行
static TOOL_USE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)<tool_use>\s*<name>(.*?)</name>\s*<arguments>(.*?)</arguments>\s*</tool_use>",
    )
    .expect("工具调用正则无效")
});

/// 在整步文本中检测工具调用
///
/// - 名称经 ToolSet 的别名表改写为规范名称
/// - 未注册的工具记录警告后跳过（不中断整步检测）
/// - 参数先按 JSON 解析，失败时降级为原始字符串
pub fn detect_tool_calls(step_text: &str, tool_set: &ToolSet) -> Vec<ToolCall> {
    let mut calls = Vec::new();

    for captures in TOOL_USE_RE.captures_iter(step_text) {
        let raw_name = captures[1].trim();
        let raw_arguments = captures[2].trim();

        let name = tool_set.canonical_name(raw_name);
        if !tool_set.contains(name) {
            warn!("[ToolUseDetector] 跳过未注册的工具: {}", raw_name);
            continue;
        }

        let arguments = parse_arguments(raw_arguments);
        let id = format!("call-{}", calls.len());
        debug!("[ToolUseDetector] 检测到工具调用: id={}, name={}", id, name);
        calls.push(ToolCall {
            id,
            name: name.to_string(),
            arguments,
        });
    }

    calls
}

/// 参数解析：合法 JSON 直接用，否则保留原始字符串
fn parse_arguments(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => Value::String(raw.to_string()),
    }
}

/// 整步文本中是否存在工具调用标记（快速预检）
pub fn contains_tool_use(step_text: &str) -> bool {
    TOOL_USE_RE.is_match(step_text)
}
