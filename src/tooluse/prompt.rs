//! 工具 Prompt 生成器
//!
//! 把工具集渲染为注入到 system prompt 的工具目录与使用指导。
//! 指导文本面向模型，使用英文；目录用 XML 格式（Claude 风格）。

use super::types::{JsonSchema, ToolDefinition, ToolSet};

/// 工具使用指导
///
/// 开头一行同时作为重复注入的哨兵：system 中已含该行时不再注入
pub const TOOL_USAGE_INSTRUCTIONS: &str = r#"## Tool Use Protocol

You have access to the tools listed below. To call a tool, emit exactly this block in your reply:

<tool_use>
<name>tool_name</name>
<arguments>{"param": "value"}</arguments>
</tool_use>

Rules:
- Arguments must be a single JSON object. Escape double quotes inside string values with a backslash.
- You may call several tools in one reply by emitting several blocks.
- After emitting tool calls, stop and wait for the results; they will be returned to you in <tool_use_result> blocks.
- Only call tools from the list below. Never invent tool names."#;

/// 生成完整的工具段落：指导 + 目录
pub fn build_tool_prompt(tool_set: &ToolSet) -> String {
    let mut prompt = String::from(TOOL_USAGE_INSTRUCTIONS);
    prompt.push_str("\n\n<tools>\n");
    for def in tool_set.definitions() {
        prompt.push_str(&tool_to_xml(&def));
        prompt.push('\n');
    }
    prompt.push_str("</tools>");
    prompt
}

/// system 文本里是否已注入过工具段落
pub fn already_injected(system: &str) -> bool {
    system.contains("## Tool Use Protocol")
}

/// 将单个工具定义转换为 XML 格式
pub fn tool_to_xml(tool: &ToolDefinition) -> String {
    let mut xml = String::new();

    xml.push_str(&format!("<tool name=\"{}\">\n", escape_xml(&tool.name)));
    xml.push_str(&format!(
        "  <description>{}</description>\n",
        escape_xml(&tool.description)
    ));
    xml.push_str("  <parameters>\n");
    xml.push_str(&schema_to_xml(&tool.parameters, 4));
    xml.push_str("  </parameters>\n");
    xml.push_str("</tool>");

    xml
}

/// 将 JsonSchema 转换为 XML 格式
fn schema_to_xml(schema: &JsonSchema, indent: usize) -> String {
    let indent_str = " ".repeat(indent);
    // 按名称排序保证输出稳定
    let mut names: Vec<&String> = schema.properties.keys().collect();
    names.sort();

    let mut xml = String::new();
    for name in names {
        let prop = &schema.properties[name];
        let required = if schema.required.contains(name) {
            " required=\"true\""
        } else {
            ""
        };
        xml.push_str(&format!(
            "{}<parameter name=\"{}\" type=\"{}\"{}>{}</parameter>\n",
            indent_str,
            escape_xml(name),
            escape_xml(&prop.prop_type),
            required,
            escape_xml(&prop.description)
        ));
    }
    xml
}

/// XML 特殊字符转义
pub fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
