//! 工具执行器
//!
//! 顺序执行检测到的工具调用。每个调用独立失败：一个工具报错不影响
//! 其余调用，错误以结果形式回传给模型而不是中断生命周期。

use serde_json::Value;
use tracing::{debug, warn};

use super::types::{ToolCall, ToolCallStatus, ToolResult, ToolSet};

/// 顺序执行一步内检测到的全部工具调用
pub async fn execute_tool_calls(calls: &[ToolCall], tool_set: &ToolSet) -> Vec<ToolResult> {
    let mut results = Vec::with_capacity(calls.len());

    for call in calls {
        // Pending → Executed | Error，状态只向前转移
        let mut result = ToolResult::pending(call);
        match tool_set.get(&call.name) {
            Some(tool) => match tool.execute(call.arguments.clone()).await {
                Ok(output) => {
                    debug!("[ToolExecutor] 工具执行成功: id={}, name={}", call.id, call.name);
                    result.status = ToolCallStatus::Executed;
                    result.output = output;
                }
                Err(e) => {
                    warn!(
                        "[ToolExecutor] 工具执行失败: id={}, name={}, error={}",
                        call.id, call.name, e
                    );
                    result.status = ToolCallStatus::Error;
                    result.error = Some(e.to_string());
                }
            },
            // 检测阶段已过滤未注册工具，这里兜底处理竞态移除
            None => {
                warn!("[ToolExecutor] 工具不存在: {}", call.name);
                result.status = ToolCallStatus::Error;
                result.error = Some(format!("工具不存在: {}", call.name));
            }
        }
        results.push(result);
    }

    results
}

/// 把执行结果格式化为回传给模型的用户消息文本
///
/// 每个结果包在 `<tool_use_result>` 块里，输出为 JSON
pub fn format_tool_results(results: &[ToolResult]) -> String {
    let mut text = String::new();
    for result in results {
        let payload = if result.succeeded() {
            result.output.clone()
        } else {
            Value::String(format!(
                "Error: {}",
                result.error.as_deref().unwrap_or("unknown error")
            ))
        };
        let rendered =
            serde_json::to_string(&payload).unwrap_or_else(|_| "null".to_string());
        text.push_str("<tool_use_result>\n");
        text.push_str(&format!("<name>{}</name>\n", result.name));
        text.push_str(&format!("<result>{}</result>\n", rendered));
        text.push_str("</tool_use_result>\n");
    }
    text
}
