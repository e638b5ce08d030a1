//! 统一流块类型
//!
//! 定义流式响应的中间表示 (Intermediate Representation)，
//! 用于解耦执行器产出的原始流和插件的流变换链。
//!
//! # 设计原则
//!
//! - 执行器把底层协议事件翻译为 `StreamChunk`
//! - 插件的流变换消费并产出相同的 `StreamChunk` 类型
//! - 工具调用子系统只解释这里列出的块类型，其余一律原样透传

use crate::error::EngineError;
use crate::usage::Usage;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 流块类型流（装箱后的异步流）
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, EngineError>>;

/// 流变换：接收一个块流，返回变换后的块流
///
/// 由插件的 `transform_stream` 钩子提供，引擎按排序后的插件顺序收集，
/// 交给执行器用 [`apply_transforms`] 链接到原始流上
pub type StreamTransform = Arc<dyn Fn(ChunkStream) -> ChunkStream + Send + Sync>;

/// 按顺序将变换链接到流上
///
/// 列表中的第一个变换最先接触原始流（最内层）
pub fn apply_transforms(stream: ChunkStream, transforms: &[StreamTransform]) -> ChunkStream {
    transforms
        .iter()
        .fold(stream, |current, transform| transform(current))
}

/// 统一流块
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamChunk {
    /// 整个流开始
    Start,

    /// 一个步骤（模型轮次）开始
    StartStep,

    /// 文本块开始
    TextStart {
        /// 文本块 ID
        id: String,
    },

    /// 文本增量
    TextDelta {
        /// 文本块 ID
        id: String,
        /// 文本内容
        text: String,
    },

    /// 文本块结束
    TextEnd {
        /// 文本块 ID
        id: String,
    },

    /// 一个步骤结束
    FinishStep {
        /// 结束原因（provider 可能不给）
        #[serde(skip_serializing_if = "Option::is_none")]
        finish_reason: Option<FinishReason>,
        /// 本步骤的用量
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
        /// 响应元信息
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<serde_json::Value>,
        /// Provider 特定元数据
        #[serde(skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<serde_json::Value>,
    },

    /// 整个流结束
    Finish {
        /// 结束原因
        #[serde(skip_serializing_if = "Option::is_none")]
        finish_reason: Option<FinishReason>,
        /// 总用量
        #[serde(skip_serializing_if = "Option::is_none")]
        total_usage: Option<Usage>,
    },

    /// 未识别的原始块（原样透传）
    Raw {
        /// 原始数据
        data: serde_json::Value,
    },
}

/// 步骤/流的结束原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    /// 正常结束
    Stop,
    /// 达到最大 token 数
    Length,
    /// 模型请求了工具调用
    ToolCalls,
    /// 内容被过滤
    ContentFilter,
    /// 错误结束
    Error,
    /// 其他原因
    Other,
}

impl FinishReason {
    /// 从字符串解析结束原因
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "stop" | "end_turn" => Self::Stop,
            "length" | "max_tokens" => Self::Length,
            "tool-calls" | "tool_calls" | "tool_use" => Self::ToolCalls,
            "content-filter" | "content_filter" => Self::ContentFilter,
            "error" => Self::Error,
            _ => Self::Other,
        }
    }

    /// 转换为协议字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolCalls => "tool-calls",
            Self::ContentFilter => "content-filter",
            Self::Error => "error",
            Self::Other => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_finish_reason_from_str() {
        assert_eq!(FinishReason::from_str("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::from_str("end_turn"), FinishReason::Stop);
        assert_eq!(FinishReason::from_str("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::from_str("tool-calls"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::from_str("max_tokens"), FinishReason::Length);
        assert_eq!(FinishReason::from_str("whatever"), FinishReason::Other);
    }

    #[test]
    fn test_chunk_serde_tagging() {
        let chunk = StreamChunk::TextDelta {
            id: "t1".to_string(),
            text: "hello".to_string(),
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["type"], "text-delta");
        assert_eq!(json["text"], "hello");

        let parsed: StreamChunk = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, chunk);
    }

    #[test]
    fn test_finish_step_omits_empty_fields() {
        let chunk = StreamChunk::FinishStep {
            finish_reason: None,
            usage: None,
            response: None,
            provider_metadata: None,
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["type"], "finish-step");
        assert!(json.get("finishReason").is_none());
        assert!(json.get("finish_reason").is_none());
    }

    #[tokio::test]
    async fn test_apply_transforms_order() {
        // 每个变换在文本后面追加自己的标记，验证链接顺序
        fn tagger(tag: &'static str) -> StreamTransform {
            Arc::new(move |input: ChunkStream| -> ChunkStream {
                Box::pin(input.map(move |item| {
                    item.map(|chunk| match chunk {
                        StreamChunk::TextDelta { id, text } => StreamChunk::TextDelta {
                            id,
                            text: format!("{}{}", text, tag),
                        },
                        other => other,
                    })
                }))
            })
        }

        let source: ChunkStream = Box::pin(futures::stream::iter(vec![Ok(
            StreamChunk::TextDelta {
                id: "t".to_string(),
                text: "x".to_string(),
            },
        )]));

        let out = apply_transforms(source, &[tagger("a"), tagger("b")]);
        let chunks: Vec<_> = out.collect().await;
        match chunks[0].as_ref().unwrap() {
            StreamChunk::TextDelta { text, .. } => assert_eq!(text, "xab"),
            other => panic!("意外的块: {:?}", other),
        }
    }
}
