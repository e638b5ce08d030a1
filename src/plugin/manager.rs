//! 插件管理器
//!
//! 按钩子各自的合并策略在注册表上执行钩子：
//! - 首个胜出：`resolveModel`、`loadTemplate`
//! - 顺序链式：`configureContext`、`transformParams`、`transformResult`
//! - 并行：`onRequestStart`、`onRequestEnd`、`onError`（任一失败即失败）
//! - 收集：`transformStream`

use futures::future::try_join_all;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::registry::{PluginRegistry, RegistryError};
use super::types::{ModelHandle, Plugin};
use crate::context::RequestContext;
use crate::error::EngineError;
use crate::stream::StreamTransform;

/// 把补丁浅合并到目标值上
///
/// 双方均为对象时逐键覆盖（仅顶层），补丁为 Null 时不做任何修改，
/// 其余情况整体替换
pub(crate) fn shallow_merge(base: &mut Value, patch: Value) {
    match patch {
        Value::Null => {}
        Value::Object(patch_map) => {
            if let Value::Object(base_map) = base {
                for (key, value) in patch_map {
                    base_map.insert(key, value);
                }
            } else {
                *base = Value::Object(patch_map);
            }
        }
        other => *base = other,
    }
}

/// 插件管理器
#[derive(Default)]
pub struct PluginManager {
    registry: RwLock<PluginRegistry>,
}

impl PluginManager {
    /// 创建空管理器
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册插件
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> Result<(), RegistryError> {
        self.registry.write().register(plugin)
    }

    /// 移除插件
    pub fn unregister(&self, name: &str) -> bool {
        self.registry.write().unregister(name)
    }

    /// 插件数量
    pub fn len(&self) -> usize {
        self.registry.read().len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.registry.read().is_empty()
    }

    /// 按调用顺序取插件快照（异步迭代期间不持锁）
    fn snapshot(&self) -> Vec<Arc<dyn Plugin>> {
        self.registry.read().snapshot()
    }

    /// 首个胜出：解析模型标识
    pub async fn resolve_model(
        &self,
        model_id: &str,
        ctx: &RequestContext,
    ) -> Result<Option<ModelHandle>, EngineError> {
        for plugin in self.snapshot() {
            if let Some(handle) = plugin
                .resolve_model(model_id, ctx)
                .await
                .map_err(|e| EngineError::hook(plugin.name(), "resolveModel", e))?
            {
                debug!(
                    "[PluginManager] 模型已解析: {} -> {} (by {})",
                    model_id,
                    handle.model_id(),
                    plugin.name()
                );
                return Ok(Some(handle));
            }
        }
        Ok(None)
    }

    /// 首个胜出：加载模板
    pub async fn load_template(
        &self,
        name: &str,
        ctx: &RequestContext,
    ) -> Result<Option<Value>, EngineError> {
        for plugin in self.snapshot() {
            if let Some(template) = plugin
                .load_template(name, ctx)
                .await
                .map_err(|e| EngineError::hook(plugin.name(), "loadTemplate", e))?
            {
                return Ok(Some(template));
            }
        }
        Ok(None)
    }

    /// 顺序链式：装配上下文
    pub async fn configure_context(&self, ctx: &RequestContext) -> Result<(), EngineError> {
        for plugin in self.snapshot() {
            plugin
                .configure_context(ctx)
                .await
                .map_err(|e| EngineError::hook(plugin.name(), "configureContext", e))?;
        }
        Ok(())
    }

    /// 顺序链式：参数变换，补丁逐个浅合并到上下文参数上
    pub async fn transform_params(&self, ctx: &RequestContext) -> Result<(), EngineError> {
        for plugin in self.snapshot() {
            let current = ctx.params();
            if let Some(patch) = plugin
                .transform_params(&current, ctx)
                .await
                .map_err(|e| EngineError::hook(plugin.name(), "transformParams", e))?
            {
                debug!("[PluginManager] 参数补丁: plugin={}", plugin.name());
                ctx.merge_params(patch);
            }
        }
        Ok(())
    }

    /// 顺序链式：结果变换
    pub async fn transform_result(
        &self,
        mut result: Value,
        ctx: &RequestContext,
    ) -> Result<Value, EngineError> {
        for plugin in self.snapshot() {
            result = plugin
                .transform_result(result, ctx)
                .await
                .map_err(|e| EngineError::hook(plugin.name(), "transformResult", e))?;
        }
        Ok(result)
    }

    /// 收集流变换器，按注册顺序返回
    pub fn collect_stream_transforms(&self, ctx: &RequestContext) -> Vec<StreamTransform> {
        self.snapshot()
            .iter()
            .filter_map(|p| p.transform_stream(ctx))
            .collect()
    }

    /// 并行：请求开始通知
    pub async fn on_request_start(&self, ctx: &RequestContext) -> Result<(), EngineError> {
        try_join_all(self.snapshot().into_iter().map(|plugin| {
            let ctx = ctx.clone();
            async move {
                plugin
                    .on_request_start(&ctx)
                    .await
                    .map_err(|e| EngineError::hook(plugin.name(), "onRequestStart", e))
            }
        }))
        .await?;
        Ok(())
    }

    /// 并行：请求结束通知，非流式调用携带最终结果
    pub async fn on_request_end(
        &self,
        result: Option<&Value>,
        ctx: &RequestContext,
    ) -> Result<(), EngineError> {
        try_join_all(self.snapshot().into_iter().map(|plugin| {
            let ctx = ctx.clone();
            async move {
                plugin
                    .on_request_end(result, &ctx)
                    .await
                    .map_err(|e| EngineError::hook(plugin.name(), "onRequestEnd", e))
            }
        }))
        .await?;
        Ok(())
    }

    /// 并行：请求出错通知
    pub async fn on_error(
        &self,
        error: &str,
        ctx: &RequestContext,
    ) -> Result<(), EngineError> {
        try_join_all(self.snapshot().into_iter().map(|plugin| {
            let ctx = ctx.clone();
            let error = error.to_string();
            async move {
                plugin
                    .on_error(&error, &ctx)
                    .await
                    .map_err(|e| EngineError::hook(plugin.name(), "onError", e))
            }
        }))
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CallShape;
    use crate::plugin::types::{HookError, PluginTier};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn test_shallow_merge_objects() {
        let mut base = json!({"a": 1, "b": {"x": 1}});
        shallow_merge(&mut base, json!({"b": {"y": 2}, "c": 3}));
        // 顶层逐键覆盖：嵌套对象整体替换而非深合并
        assert_eq!(base, json!({"a": 1, "b": {"y": 2}, "c": 3}));
    }

    #[test]
    fn test_shallow_merge_null_is_noop() {
        let mut base = json!({"a": 1});
        shallow_merge(&mut base, Value::Null);
        assert_eq!(base, json!({"a": 1}));
    }

    #[test]
    fn test_shallow_merge_non_object_replaces() {
        let mut base = json!({"a": 1});
        shallow_merge(&mut base, json!("text"));
        assert_eq!(base, json!("text"));
    }

    struct RecorderPlugin {
        name: String,
        tier: PluginTier,
        log: Arc<Mutex<Vec<String>>>,
        patch: Option<Value>,
        resolves_to: Option<String>,
        fail_on_start: bool,
    }

    impl RecorderPlugin {
        fn new(name: &str, tier: PluginTier, log: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                tier,
                log,
                patch: None,
                resolves_to: None,
                fail_on_start: false,
            }
        }
    }

    struct StubModel {
        id: String,
    }

    impl crate::plugin::LanguageModel for StubModel {
        fn model_id(&self) -> &str {
            &self.id
        }
        fn provider_id(&self) -> &str {
            "stub"
        }
    }

    #[async_trait]
    impl Plugin for RecorderPlugin {
        fn name(&self) -> &str {
            &self.name
        }
        fn tier(&self) -> PluginTier {
            self.tier
        }

        async fn resolve_model(
            &self,
            _model_id: &str,
            _ctx: &RequestContext,
        ) -> Result<Option<ModelHandle>, HookError> {
            self.log.lock().push(format!("{}:resolve", self.name));
            Ok(self
                .resolves_to
                .as_ref()
                .map(|id| Arc::new(StubModel { id: id.clone() }) as ModelHandle))
        }

        async fn transform_params(
            &self,
            _params: &Value,
            _ctx: &RequestContext,
        ) -> Result<Option<Value>, HookError> {
            self.log.lock().push(format!("{}:params", self.name));
            Ok(self.patch.clone())
        }

        async fn on_request_start(&self, _ctx: &RequestContext) -> Result<(), HookError> {
            if self.fail_on_start {
                return Err(HookError::Execution("start failed".to_string()));
            }
            self.log.lock().push(format!("{}:start", self.name));
            Ok(())
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new(json!({}), CallShape::Generate, 10)
    }

    #[tokio::test]
    async fn test_resolve_first_wins_stops_iteration() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = PluginManager::new();

        let mut first = RecorderPlugin::new("first", PluginTier::Normal, log.clone());
        first.resolves_to = Some("model-a".to_string());
        let second = RecorderPlugin::new("second", PluginTier::Normal, log.clone());
        manager.register(Arc::new(first)).unwrap();
        manager.register(Arc::new(second)).unwrap();

        let handle = manager.resolve_model("m", &ctx()).await.unwrap().unwrap();
        assert_eq!(handle.model_id(), "model-a");
        // 命中后不再询问后续插件
        assert_eq!(*log.lock(), vec!["first:resolve"]);
    }

    #[tokio::test]
    async fn test_transform_params_chained_merge() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = PluginManager::new();

        let mut a = RecorderPlugin::new("a", PluginTier::Normal, log.clone());
        a.patch = Some(json!({"temperature": 0.1, "system": "a"}));
        let mut b = RecorderPlugin::new("b", PluginTier::Normal, log.clone());
        b.patch = Some(json!({"system": "b"}));
        manager.register(Arc::new(a)).unwrap();
        manager.register(Arc::new(b)).unwrap();

        let ctx = ctx();
        manager.transform_params(&ctx).await.unwrap();
        // 后注册的补丁覆盖同名键
        assert_eq!(ctx.params(), json!({"temperature": 0.1, "system": "b"}));
        assert_eq!(*log.lock(), vec!["a:params", "b:params"]);
    }

    #[tokio::test]
    async fn test_tier_controls_hook_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = PluginManager::new();
        let mut post = RecorderPlugin::new("post", PluginTier::Post, log.clone());
        post.patch = Some(json!({}));
        let mut pre = RecorderPlugin::new("pre", PluginTier::Pre, log.clone());
        pre.patch = Some(json!({}));
        manager.register(Arc::new(post)).unwrap();
        manager.register(Arc::new(pre)).unwrap();

        manager.transform_params(&ctx()).await.unwrap();
        assert_eq!(*log.lock(), vec!["pre:params", "post:params"]);
    }

    #[tokio::test]
    async fn test_parallel_start_failure_propagates() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = PluginManager::new();
        let mut bad = RecorderPlugin::new("bad", PluginTier::Normal, log.clone());
        bad.fail_on_start = true;
        manager.register(Arc::new(bad)).unwrap();
        manager
            .register(Arc::new(RecorderPlugin::new(
                "good",
                PluginTier::Normal,
                log.clone(),
            )))
            .unwrap();

        let err = manager.on_request_start(&ctx()).await.unwrap_err();
        match err {
            EngineError::Hook { plugin, hook, .. } => {
                assert_eq!(plugin, "bad");
                assert_eq!(hook, "onRequestStart");
            }
            other => panic!("意外错误: {:?}", other),
        }
    }
}
