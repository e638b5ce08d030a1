//! 基于提示词的工具调用插件
//!
//! 不依赖提供商原生的 function calling：通过 system prompt 教会模型用
//! `<tool_use>` 标记发起调用，在流式输出里过滤标记内容，步结束时在
//! 整步文本上检测调用、执行工具，并把结果通过递归调用回传给模型。

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use super::detector::detect_tool_calls;
use super::executor::{execute_tool_calls, format_tool_results};
use super::prompt::{already_injected, build_tool_prompt};
use super::types::{ToolResult, ToolSet};
use crate::context::RequestContext;
use crate::plugin::{HookError, Plugin, PluginTier};
use crate::stream::{
    ChunkStream, FinishReason, StreamChunk, StreamTransform, TagConfig, TagExtractor,
};

/// 工具调用插件
///
/// 注册为 Post 层级：先让其他插件完成参数改写，再注入工具目录
pub struct PromptToolUsePlugin {
    tool_set: ToolSet,
    tag: TagConfig,
}

impl PromptToolUsePlugin {
    /// 用工具集创建插件
    pub fn new(tool_set: ToolSet) -> Self {
        Self {
            tool_set,
            tag: TagConfig::tool_use(),
        }
    }

    /// 自定义标记配置
    pub fn with_tag(mut self, tag: TagConfig) -> Self {
        self.tag = tag;
        self
    }
}

#[async_trait]
impl Plugin for PromptToolUsePlugin {
    fn name(&self) -> &str {
        "prompt-tool-use"
    }

    fn tier(&self) -> PluginTier {
        PluginTier::Post
    }

    async fn configure_context(&self, ctx: &RequestContext) -> Result<(), HookError> {
        ctx.set_tool_set(self.tool_set.clone());
        Ok(())
    }

    async fn transform_params(
        &self,
        params: &Value,
        _ctx: &RequestContext,
    ) -> Result<Option<Value>, HookError> {
        if self.tool_set.is_empty() {
            return Ok(None);
        }
        let existing = params
            .get("system")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        // 递归调用复用同一参数基底，避免重复注入
        if already_injected(existing) {
            return Ok(None);
        }

        let catalogue = build_tool_prompt(&self.tool_set);
        let system = if existing.is_empty() {
            catalogue
        } else {
            format!("{}\n\n{}", existing, catalogue)
        };
        info!(
            "[PromptToolUse] 注入工具目录: {} 个工具",
            self.tool_set.len()
        );
        Ok(Some(json!({ "system": system })))
    }

    fn transform_stream(&self, ctx: &RequestContext) -> Option<StreamTransform> {
        if self.tool_set.is_empty() {
            return None;
        }
        Some(make_tool_use_transform(ctx.clone(), self.tag.clone()))
    }
}

/// 构造流状态机变换器
///
/// 状态机职责：
/// - 持有 `text-start` 直到确认有标记外内容，纯工具步不产生空文本块
/// - 过滤 `text-delta` 中的标记内容，原始文本全量累积用于整步检测
/// - `finish-step` 时累计用量、检测并执行工具，通过递归调用取回模型
///   后续输出，嵌套流透传（跳过其 `start`，截断其 `finish` 但继续
///   拉取到耗尽）
/// - `finish` 时把累计用量写回 `total_usage`
pub fn make_tool_use_transform(ctx: RequestContext, tag: TagConfig) -> StreamTransform {
    Arc::new(move |input: ChunkStream| -> ChunkStream {
        let ctx = ctx.clone();
        let tag = tag.clone();

        Box::pin(async_stream::stream! {
            let mut input = input;
            let mut extractor = TagExtractor::new(tag.clone());
            let mut step_text = String::new();
            let mut held_start: Option<StreamChunk> = None;
            let mut text_open = false;

            while let Some(item) = input.next().await {
                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(e);
                        continue;
                    }
                };

                match chunk {
                    StreamChunk::TextStart { .. } => {
                        held_start = Some(chunk);
                    }

                    StreamChunk::TextDelta { id, text } => {
                        step_text.push_str(&text);
                        let visible: String = extractor
                            .process(&text)
                            .into_iter()
                            .filter(|f| !f.is_tag_content)
                            .map(|f| f.text)
                            .collect();
                        if !visible.is_empty() {
                            if let Some(start) = held_start.take() {
                                text_open = true;
                                yield Ok(start);
                            }
                            yield Ok(StreamChunk::TextDelta { id, text: visible });
                        }
                    }

                    StreamChunk::TextEnd { id } => {
                        // 冲刷残留缓冲：没凑齐的半个标记当普通文本放行
                        let visible = match extractor.finish() {
                            Some(frag) if !frag.is_tag_content => frag.text,
                            _ => String::new(),
                        };
                        if !visible.is_empty() {
                            if let Some(start) = held_start.take() {
                                text_open = true;
                                yield Ok(start);
                            }
                            yield Ok(StreamChunk::TextDelta {
                                id: id.clone(),
                                text: visible,
                            });
                        }
                        // 纯工具步：text-start 从未放行，text-end 同样吞掉
                        if text_open {
                            yield Ok(StreamChunk::TextEnd { id });
                        }
                        held_start = None;
                        text_open = false;
                    }

                    StreamChunk::FinishStep {
                        finish_reason,
                        usage,
                        response,
                        provider_metadata,
                    } => {
                        if let Some(u) = &usage {
                            ctx.accumulate_usage(u);
                        }

                        // 每步只触发一轮工具执行
                        let calls = if ctx.tools_executed_in_step() {
                            Vec::new()
                        } else {
                            match ctx.tool_set() {
                                Some(set) => detect_tool_calls(&step_text, &set),
                                None => Vec::new(),
                            }
                        };
                        if calls.is_empty() {
                            yield Ok(StreamChunk::FinishStep {
                                finish_reason,
                                usage,
                                response,
                                provider_metadata,
                            });
                        } else {
                            // 本步以工具调用收尾，结束原因改写后再发出
                            yield Ok(StreamChunk::FinishStep {
                                finish_reason: Some(FinishReason::ToolCalls),
                                usage,
                                response,
                                provider_metadata,
                            });
                            let set = ctx.tool_set().unwrap_or_default();
                            debug!(
                                "[PromptToolUse] 本步检测到 {} 个工具调用, depth={}",
                                calls.len(),
                                ctx.depth()
                            );
                            ctx.set_tools_executed_in_step(true);
                            let results = execute_tool_calls(&calls, &set).await;
                            let patch = follow_up_patch(&ctx.params(), &step_text, &results);

                            match ctx.recursive_call(patch).await {
                                Ok(mut nested) => {
                                    while let Some(nested_item) = nested.next().await {
                                        match nested_item {
                                            // 外层流已发出 start / finish，嵌套流的去掉；
                                            // finish 之后继续拉取到耗尽，让嵌套帧的结束通知触发
                                            Ok(StreamChunk::Start) => {}
                                            Ok(StreamChunk::Finish { .. }) => {}
                                            other => yield other,
                                        }
                                    }
                                }
                                Err(e) => {
                                    yield Err(e);
                                    return;
                                }
                            }
                        }

                        // 重置步状态，准备下一步
                        ctx.set_tools_executed_in_step(false);
                        extractor = TagExtractor::new(tag.clone());
                        step_text.clear();
                        held_start = None;
                        text_open = false;
                    }

                    // 新的一步开始，工具执行标志复位（嵌套流共享同一上下文）
                    StreamChunk::StartStep => {
                        ctx.set_tools_executed_in_step(false);
                        yield Ok(StreamChunk::StartStep);
                    }

                    StreamChunk::Finish { finish_reason, .. } => {
                        yield Ok(StreamChunk::Finish {
                            finish_reason,
                            total_usage: ctx.accumulated_usage(),
                        });
                    }

                    other => yield Ok(other),
                }
            }
        })
    })
}

/// 构造回传工具结果的参数补丁
///
/// 在原始消息序列后追加：assistant 的整步原始文本（含标记，模型需要
/// 看到自己发起的调用）+ user 的工具结果文本
fn follow_up_patch(params: &Value, step_text: &str, results: &[ToolResult]) -> Value {
    let mut messages = params
        .get("messages")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    messages.push(json!({ "role": "assistant", "content": step_text }));
    messages.push(json!({ "role": "user", "content": format_tool_results(results) }));
    json!({ "messages": messages })
}
