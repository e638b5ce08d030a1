//! hookcast - LLM 请求生命周期插件引擎
//!
//! 把一次模型调用编排为可插件化的生命周期：插件通过钩子参与模型解析、
//! 参数与结果变换、流处理和请求通知；内置基于提示词的工具调用插件，
//! 在不依赖提供商原生 function calling 的情况下完成"检测 → 执行 →
//! 递归回传"的完整工具循环。
//!
//! ## 核心组件
//!
//! - [`engine::PluginEngine`] - 生命周期编排（generate / stream / generate_image）
//! - [`plugin::Plugin`] - 生命周期钩子 trait
//! - [`plugin::PluginManager`] - 按合并策略执行钩子
//! - [`context::RequestContext`] - 跨钩子共享的请求上下文与递归能力
//! - [`stream::TagExtractor`] - 增量标签提取器
//! - [`tooluse::PromptToolUsePlugin`] - 基于提示词的工具调用插件
//!
//! ## 快速开始
//!
//! ```no_run
//! use std::sync::Arc;
//! use hookcast::engine::PluginEngine;
//! use hookcast::tooluse::{PromptToolUsePlugin, ToolSet};
//!
//! let engine = PluginEngine::new();
//! let tools = ToolSet::new();
//! engine.register(Arc::new(PromptToolUsePlugin::new(tools))).unwrap();
//! ```

pub mod context;
pub mod engine;
pub mod error;
pub mod plugin;
pub mod stream;
pub mod tooluse;
pub mod usage;

pub use context::{CallShape, ModelParam, RequestContext};
pub use engine::{GenerateExecutor, ImageExecutor, PluginEngine, StreamExecutor};
pub use error::EngineError;
pub use plugin::{HookError, LanguageModel, ModelHandle, Plugin, PluginTier};
pub use stream::{
    apply_transforms, merge_outside, ChunkStream, FinishReason, StreamChunk, StreamTransform,
    TagConfig, TagExtractor, TextFragment,
};
pub use tooluse::{PromptToolUsePlugin, Tool, ToolDefinition, ToolSet};
pub use usage::Usage;
