//! 生命周期引擎
//!
//! 把一次模型调用（非流式生成、流式生成、图像生成）编排为固定的
//! 生命周期：装配上下文 → 开始通知 → 模型解析与中间件 → 参数变换 →
//! 执行 → 结果/流变换 → 结束通知。实际的模型调用由调用方以执行器
//! 闭包注入，引擎不绑定任何提供商。
//!
//! 流式调用在执行前把递归能力绑定到上下文：工具插件在步结束时通过
//! [`RequestContext::recursive_call`] 取回模型的后续输出。嵌套帧重入
//! 同一生命周期骨架（装配、开始通知、参数变换、收尾通知都再跑一遍，
//! 共享同一上下文），只有模型解析因句柄已缓存而跳过。

use futures::future::BoxFuture;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::context::{CallShape, ModelParam, RequestContext};
use crate::error::EngineError;
use crate::plugin::{ModelHandle, Plugin, PluginManager, RegistryError};
use crate::stream::{ChunkStream, StreamTransform};

/// 默认最大递归深度
pub const DEFAULT_MAX_RECURSION_DEPTH: u32 = 10;

/// 非流式执行器：拿到已解析的模型句柄与最终参数，返回结果 JSON
pub type GenerateExecutor =
    Arc<dyn Fn(ModelHandle, Value) -> BoxFuture<'static, Result<Value, EngineError>> + Send + Sync>;

/// 图像执行器：与非流式执行器同形
pub type ImageExecutor = GenerateExecutor;

/// 流式执行器：拿到句柄、最终参数与按插件顺序收集的流变换器。
/// 把变换器套到原始流上（用 [`crate::stream::apply_transforms`]）是执行器的职责，
/// 引擎只保证收集的集合与顺序。
pub type StreamExecutor = Arc<
    dyn Fn(
            ModelHandle,
            Value,
            Vec<StreamTransform>,
        ) -> BoxFuture<'static, Result<ChunkStream, EngineError>>
        + Send
        + Sync,
>;

/// 插件引擎
#[derive(Clone)]
pub struct PluginEngine {
    plugins: Arc<PluginManager>,
    max_recursion_depth: u32,
}

impl Default for PluginEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginEngine {
    /// 创建引擎
    pub fn new() -> Self {
        Self {
            plugins: Arc::new(PluginManager::new()),
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
        }
    }

    /// 设置最大递归深度
    pub fn with_max_recursion_depth(mut self, depth: u32) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    /// 注册插件
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> Result<(), RegistryError> {
        self.plugins.register(plugin)
    }

    /// 移除插件
    pub fn unregister(&self, name: &str) -> bool {
        self.plugins.unregister(name)
    }

    /// 插件管理器
    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    /// 按名称加载提示词模板（首个命中的插件胜出）
    pub async fn load_template(&self, name: &str) -> Result<Option<Value>, EngineError> {
        let ctx = RequestContext::new(Value::Null, CallShape::Generate, self.max_recursion_depth);
        self.plugins.load_template(name, &ctx).await
    }

    /// 非流式文本生成
    pub async fn generate(
        &self,
        model: ModelParam,
        params: Value,
        executor: GenerateExecutor,
    ) -> Result<Value, EngineError> {
        let ctx = RequestContext::new(params, CallShape::Generate, self.max_recursion_depth);
        ctx.set_model_param(model);
        info!(
            "[PluginEngine] generate 开始: request_id={}",
            ctx.request_id()
        );

        self.plugins.configure_context(&ctx).await?;
        self.plugins.on_request_start(&ctx).await?;

        self.settle(&ctx, self.run_generate(&ctx, executor).await)
            .await
    }

    /// 收尾：成功路径跑结束通知，失败路径（含结束通知自身失败）跑出错
    /// 通知后上抛。出错通知自身失败时，新错误取代原错误。
    async fn settle(
        &self,
        ctx: &RequestContext,
        result: Result<Value, EngineError>,
    ) -> Result<Value, EngineError> {
        let err = match result {
            Ok(value) => match self.plugins.on_request_end(Some(&value), ctx).await {
                Ok(()) => return Ok(value),
                Err(e) => e,
            },
            Err(e) => e,
        };
        self.plugins.on_error(&err.to_string(), ctx).await?;
        Err(err)
    }

    async fn run_generate(
        &self,
        ctx: &RequestContext,
        executor: GenerateExecutor,
    ) -> Result<Value, EngineError> {
        let handle = self.resolve_and_wrap(ctx).await?;
        self.plugins.transform_params(ctx).await?;
        let raw = executor(handle, ctx.params()).await?;
        self.plugins.transform_result(raw, ctx).await
    }

    /// 图像生成：与非流式生成同构，只是调用形状不同
    pub async fn generate_image(
        &self,
        model: ModelParam,
        params: Value,
        executor: ImageExecutor,
    ) -> Result<Value, EngineError> {
        let ctx = RequestContext::new(params, CallShape::Image, self.max_recursion_depth);
        ctx.set_model_param(model);
        info!(
            "[PluginEngine] generate_image 开始: request_id={}",
            ctx.request_id()
        );

        self.plugins.configure_context(&ctx).await?;
        self.plugins.on_request_start(&ctx).await?;

        self.settle(&ctx, self.run_generate(&ctx, executor).await)
            .await
    }

    /// 流式文本生成
    ///
    /// 返回的流在被消费到末尾时触发 `onRequestEnd`；结束通知失败会以
    /// 流内错误的形式出现在末尾
    pub async fn stream(
        &self,
        model: ModelParam,
        params: Value,
        executor: StreamExecutor,
    ) -> Result<ChunkStream, EngineError> {
        let ctx = RequestContext::new(params, CallShape::Stream, self.max_recursion_depth);
        ctx.set_model_param(model);
        info!(
            "[PluginEngine] stream 开始: request_id={}",
            ctx.request_id()
        );

        self.plugins.configure_context(&ctx).await?;
        self.plugins.on_request_start(&ctx).await?;

        let opened = self.open_stream(&ctx, executor).await;
        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                self.plugins.on_error(&e.to_string(), &ctx).await?;
                return Err(e);
            }
        };

        Ok(finish_on_exhaustion(self.plugins.clone(), ctx, stream))
    }

    async fn open_stream(
        &self,
        ctx: &RequestContext,
        executor: StreamExecutor,
    ) -> Result<ChunkStream, EngineError> {
        let handle = self.resolve_and_wrap(ctx).await?;
        self.plugins.transform_params(ctx).await?;
        self.bind_recursion(ctx, executor.clone());

        let transforms = self.plugins.collect_stream_transforms(ctx);
        debug!(
            "[PluginEngine] 流变换器: {} 个, request_id={}",
            transforms.len(),
            ctx.request_id()
        );
        executor(handle, ctx.params(), transforms).await
    }

    /// 把递归调用函数绑定到上下文
    ///
    /// 嵌套帧重入与顶层相同的生命周期骨架：装配上下文、开始通知、参数
    /// 变换、执行、耗尽后的结束通知都针对共享上下文再跑一遍，插件在
    /// 工具循环期间照常看到每一帧。句柄已缓存，模型解析跳过。
    ///
    /// 闭包持有上下文的弱引用：上下文自身持有该闭包，强引用会成环
    fn bind_recursion(&self, ctx: &RequestContext, executor: StreamExecutor) {
        let weak = ctx.downgrade();
        let plugins = self.plugins.clone();
        ctx.bind_recursive(Arc::new(move |nested_params| {
            let weak = weak.clone();
            let plugins = plugins.clone();
            let executor = executor.clone();
            Box::pin(async move {
                let ctx = weak.upgrade().ok_or(EngineError::RecursionUnavailable)?;
                let handle = ctx
                    .resolved_model()
                    .ok_or(EngineError::RecursionUnavailable)?;
                plugins.configure_context(&ctx).await?;
                plugins.on_request_start(&ctx).await?;
                ctx.set_params(nested_params);
                plugins.transform_params(&ctx).await?;
                let transforms = plugins.collect_stream_transforms(&ctx);
                let stream = match executor(handle, ctx.params(), transforms).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        plugins.on_error(&e.to_string(), &ctx).await?;
                        return Err(e);
                    }
                };
                Ok(finish_on_exhaustion(plugins, ctx, stream))
            })
        }));
    }

    /// 解析模型并套用中间件
    ///
    /// 传入句柄时跳过解析；传入标识时按插件顺序询问 `resolveModel`，
    /// 无人认领即报错。中间件按注册顺序包装句柄。
    async fn resolve_and_wrap(&self, ctx: &RequestContext) -> Result<ModelHandle, EngineError> {
        let param = ctx
            .model_param()
            .ok_or_else(|| EngineError::ModelResolution {
                model_id: "<missing>".to_string(),
                provider_id: "unknown".to_string(),
            })?;

        let handle = match param {
            ModelParam::Handle(handle) => handle,
            ModelParam::Id(id) => self
                .plugins
                .resolve_model(&id, ctx)
                .await?
                .ok_or_else(|| EngineError::ModelResolution {
                    model_id: id,
                    provider_id: "unknown".to_string(),
                })?,
        };

        let handle = ctx
            .take_middlewares()
            .into_iter()
            .fold(handle, |current, middleware| middleware(current));
        ctx.set_resolved_model(handle.clone());
        Ok(handle)
    }
}

/// 原始流耗尽后补发结束通知；通知失败先跑出错通知，再以流内错误收尾
///
/// 顶层流与递归嵌套流共用：嵌套流被上游变换器完整耗尽（在其 `finish`
/// 处截断转发但继续拉取），因此每一帧的结束通知都会触发
fn finish_on_exhaustion(
    plugins: Arc<PluginManager>,
    ctx: RequestContext,
    stream: ChunkStream,
) -> ChunkStream {
    Box::pin(async_stream::stream! {
        let mut stream = stream;
        while let Some(item) = stream.next().await {
            yield item;
        }
        if let Err(e) = plugins.on_request_end(None, &ctx).await {
            match plugins.on_error(&e.to_string(), &ctx).await {
                Ok(()) => yield Err(e),
                Err(e2) => yield Err(e2),
            }
        }
    })
}
