//! 请求上下文
//!
//! 每次生命周期调用创建一个 [`RequestContext`]，在所有钩子、执行器与
//! 流变换器之间共享。上下文是廉价克隆的句柄（内部 Arc），可变状态由
//! parking_lot 互斥锁保护。
//!
//! 上下文同时承载递归调用能力：工具执行后需要把结果回传给模型时，
//! 流状态机通过 [`RequestContext::recursive_call`] 发起嵌套调用，深度
//! 计数防止失控的工具循环。

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::debug;
use uuid::Uuid;

use crate::error::EngineError;
use crate::plugin::manager::shallow_merge;
use crate::plugin::{ModelHandle, ModelMiddleware};
use crate::stream::ChunkStream;
use crate::tooluse::ToolSet;
use crate::usage::Usage;

/// 生命周期调用形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    /// 非流式文本生成
    Generate,
    /// 流式文本生成
    Stream,
    /// 图像生成
    Image,
}

impl CallShape {
    /// 日志用名称
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Stream => "stream",
            Self::Image => "image",
        }
    }
}

/// 模型参数：调用方可以传标识符（由插件解析）或现成句柄
#[derive(Clone)]
pub enum ModelParam {
    /// 模型标识符，交给 resolve_model 钩子解析
    Id(String),
    /// 现成句柄，跳过解析
    Handle(ModelHandle),
}

impl std::fmt::Debug for ModelParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => f.debug_tuple("Id").field(id).finish(),
            Self::Handle(h) => f.debug_tuple("Handle").field(&h.model_id()).finish(),
        }
    }
}

/// 递归调用函数：由引擎在请求入口绑定
pub type RecursiveCallFn =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<ChunkStream, EngineError>> + Send + Sync>;

/// 可变状态
struct ContextState {
    params: Value,
    model_param: Option<ModelParam>,
    resolved_model: Option<ModelHandle>,
    middlewares: Vec<ModelMiddleware>,
    metadata: HashMap<String, Value>,
    tool_set: Option<ToolSet>,
    depth: u32,
    is_recursive: bool,
    tools_executed_in_step: bool,
    accumulated_usage: Option<Usage>,
    recursive_fn: Option<RecursiveCallFn>,
}

struct ContextInner {
    request_id: String,
    created_at: DateTime<Utc>,
    call_shape: CallShape,
    max_depth: u32,
    state: Mutex<ContextState>,
}

/// 请求上下文句柄
#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<ContextInner>,
}

/// 弱引用句柄，用于打破引擎绑定闭包与上下文之间的循环引用
#[derive(Clone)]
pub struct WeakRequestContext {
    inner: Weak<ContextInner>,
}

impl WeakRequestContext {
    /// 尝试升级为强引用
    pub fn upgrade(&self) -> Option<RequestContext> {
        self.inner.upgrade().map(|inner| RequestContext { inner })
    }
}

impl RequestContext {
    /// 创建新上下文
    pub fn new(params: Value, call_shape: CallShape, max_depth: u32) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                request_id: Uuid::new_v4().to_string(),
                created_at: Utc::now(),
                call_shape,
                max_depth,
                state: Mutex::new(ContextState {
                    params,
                    model_param: None,
                    resolved_model: None,
                    middlewares: Vec::new(),
                    metadata: HashMap::new(),
                    tool_set: None,
                    depth: 0,
                    is_recursive: false,
                    tools_executed_in_step: false,
                    accumulated_usage: None,
                    recursive_fn: None,
                }),
            }),
        }
    }

    /// 请求标识
    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    /// 创建时刻
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// 调用形状
    pub fn call_shape(&self) -> CallShape {
        self.inner.call_shape
    }

    /// 最大递归深度
    pub fn max_depth(&self) -> u32 {
        self.inner.max_depth
    }

    /// 降级为弱引用
    pub fn downgrade(&self) -> WeakRequestContext {
        WeakRequestContext {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// 当前请求参数的快照
    pub fn params(&self) -> Value {
        self.inner.state.lock().params.clone()
    }

    /// 覆盖请求参数
    pub fn set_params(&self, params: Value) {
        self.inner.state.lock().params = params;
    }

    /// 把补丁浅合并到当前参数上
    pub fn merge_params(&self, patch: Value) {
        let mut state = self.inner.state.lock();
        shallow_merge(&mut state.params, patch);
    }

    /// 模型参数
    pub fn model_param(&self) -> Option<ModelParam> {
        self.inner.state.lock().model_param.clone()
    }

    /// 设置模型参数
    pub fn set_model_param(&self, param: ModelParam) {
        self.inner.state.lock().model_param = Some(param);
    }

    /// 已解析的模型句柄
    pub fn resolved_model(&self) -> Option<ModelHandle> {
        self.inner.state.lock().resolved_model.clone()
    }

    /// 记录解析结果
    pub fn set_resolved_model(&self, handle: ModelHandle) {
        self.inner.state.lock().resolved_model = Some(handle);
    }

    /// 注册模型中间件，解析后按注册顺序套用
    pub fn add_middleware(&self, middleware: ModelMiddleware) {
        self.inner.state.lock().middlewares.push(middleware);
    }

    /// 取出全部中间件
    pub(crate) fn take_middlewares(&self) -> Vec<ModelMiddleware> {
        std::mem::take(&mut self.inner.state.lock().middlewares)
    }

    /// 读取元数据
    pub fn metadata(&self, key: &str) -> Option<Value> {
        self.inner.state.lock().metadata.get(key).cloned()
    }

    /// 写入元数据
    pub fn set_metadata(&self, key: impl Into<String>, value: Value) {
        self.inner.state.lock().metadata.insert(key.into(), value);
    }

    /// 当前工具集
    pub fn tool_set(&self) -> Option<ToolSet> {
        self.inner.state.lock().tool_set.clone()
    }

    /// 装配工具集
    pub fn set_tool_set(&self, tool_set: ToolSet) {
        self.inner.state.lock().tool_set = Some(tool_set);
    }

    /// 当前递归深度
    pub fn depth(&self) -> u32 {
        self.inner.state.lock().depth
    }

    /// 当前是否处于递归调用中
    pub fn is_recursive(&self) -> bool {
        self.inner.state.lock().is_recursive
    }

    /// 当前步是否已执行过工具（每步只触发一轮工具执行）
    pub fn tools_executed_in_step(&self) -> bool {
        self.inner.state.lock().tools_executed_in_step
    }

    /// 设置当前步的工具执行标志，步结束时由流变换器复位
    pub fn set_tools_executed_in_step(&self, value: bool) {
        self.inner.state.lock().tools_executed_in_step = value;
    }

    /// 累计用量
    pub fn accumulated_usage(&self) -> Option<Usage> {
        self.inner.state.lock().accumulated_usage.clone()
    }

    /// 把一次调用的用量并入累计值
    pub fn accumulate_usage(&self, usage: &Usage) {
        let mut state = self.inner.state.lock();
        let next = Usage::accumulated(state.accumulated_usage.take(), usage);
        state.accumulated_usage = Some(next);
    }

    /// 绑定递归调用函数（引擎内部使用）
    pub(crate) fn bind_recursive(&self, f: RecursiveCallFn) {
        self.inner.state.lock().recursive_fn = Some(f);
    }

    /// 发起嵌套生命周期调用
    ///
    /// `patch` 浅合并到原始参数上作为嵌套调用的参数。深度计数在调用前
    /// 递增，在嵌套流被消费完（或丢弃）后恢复；调用失败时立即恢复。
    pub async fn recursive_call(&self, patch: Value) -> Result<ChunkStream, EngineError> {
        let (f, nested_params, prev_depth, prev_flag) = {
            let mut state = self.inner.state.lock();
            if state.depth >= self.inner.max_depth {
                return Err(EngineError::RecursionLimit {
                    depth: state.depth,
                    max_depth: self.inner.max_depth,
                });
            }
            let f = state
                .recursive_fn
                .clone()
                .ok_or(EngineError::RecursionUnavailable)?;
            let prev_depth = state.depth;
            let prev_flag = state.is_recursive;
            state.depth += 1;
            state.is_recursive = true;
            let mut nested_params = state.params.clone();
            shallow_merge(&mut nested_params, patch);
            (f, nested_params, prev_depth, prev_flag)
        };

        debug!(
            "[RequestContext] 递归调用: request_id={}, depth={}",
            self.inner.request_id,
            prev_depth + 1
        );

        match f(nested_params).await {
            Ok(inner_stream) => {
                let guard = RecursionGuard {
                    inner: Arc::downgrade(&self.inner),
                    prev_depth,
                    prev_flag,
                };
                let wrapped = async_stream::stream! {
                    let _guard = guard;
                    let mut inner_stream = inner_stream;
                    while let Some(item) = inner_stream.next().await {
                        yield item;
                    }
                };
                Ok(Box::pin(wrapped))
            }
            Err(e) => {
                let mut state = self.inner.state.lock();
                state.depth = prev_depth;
                state.is_recursive = prev_flag;
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RequestContext")
            .field("request_id", &self.inner.request_id)
            .field("call_shape", &self.inner.call_shape)
            .field("depth", &state.depth)
            .field("is_recursive", &state.is_recursive)
            .finish()
    }
}

/// 递归状态恢复守卫：嵌套流结束或被丢弃时恢复深度与标志
struct RecursionGuard {
    inner: Weak<ContextInner>,
    prev_depth: u32,
    prev_flag: bool,
}

impl Drop for RecursionGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut state = inner.state.lock();
            state.depth = self.prev_depth;
            state.is_recursive = self.prev_flag;
        }
    }
}
