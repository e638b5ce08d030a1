//! 引擎错误类型定义
//!
//! 定义请求生命周期中所有致命错误的分类。
//! 非致命错误（如 usage 形状不匹配）只记录日志，不出现在这里。

use crate::plugin::HookError;
use thiserror::Error;

/// 引擎错误
///
/// 所有致命错误最终以单个 `EngineError` 形式抛给顶层调用方
#[derive(Error, Debug)]
pub enum EngineError {
    /// 模型解析错误：没有插件能将模型 ID 解析为具体模型句柄
    #[error("模型解析失败: {model_id} (provider: {provider_id})")]
    ModelResolution {
        model_id: String,
        provider_id: String,
    },

    /// 递归深度超限：模型持续请求工具调用，超过了最大递归深度
    #[error("递归深度超限: {depth}/{max_depth}")]
    RecursionLimit { depth: u32, max_depth: u32 },

    /// 插件钩子执行失败
    #[error("插件钩子失败: {plugin}.{hook}: {source}")]
    Hook {
        plugin: String,
        hook: &'static str,
        #[source]
        source: HookError,
    },

    /// 执行器调用失败
    #[error("执行器调用失败: {0}")]
    Executor(String),

    /// 上下文未绑定递归调用（非流式调用形态不支持递归）
    #[error("当前上下文不支持递归调用")]
    RecursionUnavailable,

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// 构造钩子错误，附带插件名和钩子名
    pub fn hook(plugin: &str, hook: &'static str, source: HookError) -> Self {
        Self::Hook {
            plugin: plugin.to_string(),
            hook,
            source,
        }
    }
}
