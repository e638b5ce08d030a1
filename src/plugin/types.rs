//! 插件类型定义
//!
//! 插件通过实现 [`Plugin`] trait 参与请求生命周期。所有钩子都有默认
//! 空实现，插件只需覆盖自己关心的钩子。

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::context::RequestContext;
use crate::stream::StreamTransform;

/// 插件执行层级，决定钩子调用顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PluginTier {
    /// 前置：最先执行
    Pre,
    /// 普通：默认层级
    Normal,
    /// 后置：最后执行
    Post,
}

impl Default for PluginTier {
    fn default() -> Self {
        Self::Normal
    }
}

impl PluginTier {
    /// 排序键：Pre < Normal < Post
    pub(crate) fn order(self) -> u8 {
        match self {
            Self::Pre => 0,
            Self::Normal => 1,
            Self::Post => 2,
        }
    }
}

/// 钩子执行错误
#[derive(Debug, Error)]
pub enum HookError {
    /// 参数或结果的形状不符合钩子预期
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 钩子内部执行失败
    #[error("执行失败: {0}")]
    Execution(String),

    /// JSON 处理失败
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),
}

/// 语言模型句柄
///
/// 引擎不关心模型如何推理，只需要可识别的身份信息；
/// 实际调用由执行器闭包完成
pub trait LanguageModel: Send + Sync {
    /// 模型标识
    fn model_id(&self) -> &str;
    /// 提供商标识
    fn provider_id(&self) -> &str;
}

/// 共享模型句柄
pub type ModelHandle = Arc<dyn LanguageModel>;

/// 模型中间件：包装句柄返回新句柄
pub type ModelMiddleware = Arc<dyn Fn(ModelHandle) -> ModelHandle + Send + Sync>;

/// 请求生命周期插件
///
/// 同一钩子在多个插件上的合并策略由管理器决定：
/// - `resolve_model` / `load_template`：首个非 None 结果胜出
/// - `configure_context` / `transform_params` / `transform_result`：顺序链式
/// - `on_request_start` / `on_request_end` / `on_error`：并行
/// - `transform_stream`：收集全部变换器按注册顺序套叠
#[async_trait]
pub trait Plugin: Send + Sync {
    /// 插件名称，注册表内唯一
    fn name(&self) -> &str;

    /// 执行层级
    fn tier(&self) -> PluginTier {
        PluginTier::Normal
    }

    /// 按模型标识解析模型句柄，返回 None 表示不认识该标识
    async fn resolve_model(
        &self,
        _model_id: &str,
        _ctx: &RequestContext,
    ) -> Result<Option<ModelHandle>, HookError> {
        Ok(None)
    }

    /// 按名称加载提示词模板，返回 None 表示没有该模板
    async fn load_template(
        &self,
        _name: &str,
        _ctx: &RequestContext,
    ) -> Result<Option<Value>, HookError> {
        Ok(None)
    }

    /// 在请求开始前装配上下文（注入工具集、元数据等）
    async fn configure_context(&self, _ctx: &RequestContext) -> Result<(), HookError> {
        Ok(())
    }

    /// 返回要浅合并到请求参数上的补丁，None 表示不修改
    async fn transform_params(
        &self,
        _params: &Value,
        _ctx: &RequestContext,
    ) -> Result<Option<Value>, HookError> {
        Ok(None)
    }

    /// 变换非流式调用结果
    async fn transform_result(
        &self,
        result: Value,
        _ctx: &RequestContext,
    ) -> Result<Value, HookError> {
        Ok(result)
    }

    /// 返回流变换器，None 表示不参与流处理
    fn transform_stream(&self, _ctx: &RequestContext) -> Option<StreamTransform> {
        None
    }

    /// 请求开始通知
    async fn on_request_start(&self, _ctx: &RequestContext) -> Result<(), HookError> {
        Ok(())
    }

    /// 请求成功结束通知
    ///
    /// 非流式调用携带最终结果；流式调用没有单一结果值，`result` 为 None，
    /// 累计用量等信息从上下文读取
    async fn on_request_end(
        &self,
        _result: Option<&Value>,
        _ctx: &RequestContext,
    ) -> Result<(), HookError> {
        Ok(())
    }

    /// 请求出错通知
    async fn on_error(
        &self,
        _error: &str,
        _ctx: &RequestContext,
    ) -> Result<(), HookError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(PluginTier::Pre.order() < PluginTier::Normal.order());
        assert!(PluginTier::Normal.order() < PluginTier::Post.order());
        assert_eq!(PluginTier::default(), PluginTier::Normal);
    }

    struct NoopPlugin;

    #[async_trait]
    impl Plugin for NoopPlugin {
        fn name(&self) -> &str {
            "noop"
        }
    }

    #[tokio::test]
    async fn test_default_hooks_are_noops() {
        let plugin = NoopPlugin;
        let ctx = RequestContext::new(Value::Null, crate::context::CallShape::Generate, 10);
        assert!(plugin.resolve_model("m", &ctx).await.unwrap().is_none());
        assert!(plugin.load_template("t", &ctx).await.unwrap().is_none());
        assert!(plugin
            .transform_params(&Value::Null, &ctx)
            .await
            .unwrap()
            .is_none());
        assert!(plugin.transform_stream(&ctx).is_none());
        let result = plugin
            .transform_result(serde_json::json!({"a": 1}), &ctx)
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"a": 1}));
    }
}
