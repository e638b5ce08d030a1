//! Token 用量记录与累加
//!
//! 三种模型类型（语言/图像/嵌入）的用量形状不同，累加只在同形状之间进行；
//! 形状不匹配时跳过并记录诊断日志，绝不破坏已累计的总量。

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Token 细分计数（缓存命中、推理等）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TokenDetails {
    /// 缓存命中的 token 数
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,
    /// 推理消耗的 token 数
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
}

impl TokenDetails {
    /// 按字段累加，缺失字段视为不存在
    fn add(&mut self, other: &TokenDetails) {
        self.cached_tokens = add_opt(self.cached_tokens, other.cached_tokens);
        self.reasoning_tokens = add_opt(self.reasoning_tokens, other.reasoning_tokens);
    }
}

fn add_opt(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (None, None) => None,
        (x, None) => x,
        (None, y) => y,
        (Some(x), Some(y)) => Some(x + y),
    }
}

/// 语言模型用量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LanguageModelUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_token_details: Option<TokenDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_token_details: Option<TokenDetails>,
}

/// 图像模型用量（与语言模型同字段，但没有细分计数）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ImageModelUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// 嵌入模型用量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingModelUsage {
    pub tokens: u64,
}

/// 用量记录（按模型类型区分形状）
///
/// 在产生用量的边界处直接构造对应的变体；反序列化时按字段签名做结构判别：
/// 只有 `tokens` 字段的记录是嵌入用量，带三个 token 计数字段的记录按语言模型
/// 处理（图像用量与不带细分计数的语言模型用量结构相同，只能由生产方显式构造）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Usage {
    Embedding(EmbeddingModelUsage),
    LanguageModel(LanguageModelUsage),
    ImageModel(ImageModelUsage),
}

impl Usage {
    /// 创建语言模型用量
    pub fn language(input_tokens: u64, output_tokens: u64, total_tokens: u64) -> Self {
        Self::LanguageModel(LanguageModelUsage {
            input_tokens,
            output_tokens,
            total_tokens,
            input_token_details: None,
            output_token_details: None,
        })
    }

    /// 创建图像模型用量
    pub fn image(input_tokens: u64, output_tokens: u64, total_tokens: u64) -> Self {
        Self::ImageModel(ImageModelUsage {
            input_tokens,
            output_tokens,
            total_tokens,
        })
    }

    /// 创建嵌入模型用量
    pub fn embedding(tokens: u64) -> Self {
        Self::Embedding(EmbeddingModelUsage { tokens })
    }

    /// 累加另一条同形状的用量记录
    ///
    /// 形状不匹配时保持自身不变，只输出一条 warn 诊断
    pub fn accumulate(&mut self, other: &Usage) {
        match (self, other) {
            (Usage::LanguageModel(a), Usage::LanguageModel(b)) => {
                a.input_tokens += b.input_tokens;
                a.output_tokens += b.output_tokens;
                a.total_tokens += b.total_tokens;
                match (&mut a.input_token_details, &b.input_token_details) {
                    (Some(x), Some(y)) => x.add(y),
                    (slot @ None, Some(y)) => *slot = Some(*y),
                    _ => {}
                }
                match (&mut a.output_token_details, &b.output_token_details) {
                    (Some(x), Some(y)) => x.add(y),
                    (slot @ None, Some(y)) => *slot = Some(*y),
                    _ => {}
                }
            }
            (Usage::ImageModel(a), Usage::ImageModel(b)) => {
                a.input_tokens += b.input_tokens;
                a.output_tokens += b.output_tokens;
                a.total_tokens += b.total_tokens;
            }
            (Usage::Embedding(a), Usage::Embedding(b)) => {
                a.tokens += b.tokens;
            }
            (a, b) => {
                warn!(
                    "[Usage] 用量形状不匹配，跳过累加: {} <- {}",
                    a.shape_name(),
                    b.shape_name()
                );
            }
        }
    }

    /// 将一条记录累加到可能为空的累计值上
    pub fn accumulated(total: Option<Usage>, step: &Usage) -> Usage {
        match total {
            None => step.clone(),
            Some(mut t) => {
                t.accumulate(step);
                t
            }
        }
    }

    /// 形状名称（用于诊断日志）
    pub fn shape_name(&self) -> &'static str {
        match self {
            Usage::LanguageModel(_) => "language-model",
            Usage::ImageModel(_) => "image-model",
            Usage::Embedding(_) => "embedding",
        }
    }
}
