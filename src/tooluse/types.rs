//! 工具类型定义
//!
//! 工具定义、参数 Schema、调用与结果的核心类型

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// 工具定义结构
///
/// 包含工具的名称、描述和参数 JSON Schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// 工具名称（唯一标识）
    pub name: String,
    /// 工具描述（供 LLM 理解）
    pub description: String,
    /// 参数 JSON Schema
    pub parameters: JsonSchema,
}

impl ToolDefinition {
    /// 创建新的工具定义
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: JsonSchema::default(),
        }
    }

    /// 设置参数 schema
    pub fn with_parameters(mut self, parameters: JsonSchema) -> Self {
        self.parameters = parameters;
        self
    }

    /// 验证工具定义是否有效
    pub fn validate(&self) -> Result<(), ToolValidationError> {
        if self.name.is_empty() {
            return Err(ToolValidationError::EmptyName);
        }
        if self.description.is_empty() {
            return Err(ToolValidationError::EmptyDescription);
        }
        self.parameters.validate()?;
        Ok(())
    }
}

/// JSON Schema 参数定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonSchema {
    /// Schema 类型（通常为 "object"）
    #[serde(rename = "type")]
    pub schema_type: String,
    /// 属性定义
    #[serde(default)]
    pub properties: HashMap<String, PropertySchema>,
    /// 必需参数列表
    #[serde(default)]
    pub required: Vec<String>,
}

impl Default for JsonSchema {
    fn default() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: HashMap::new(),
            required: Vec::new(),
        }
    }
}

impl JsonSchema {
    /// 创建新的 JSON Schema
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加属性
    pub fn add_property(
        mut self,
        name: impl Into<String>,
        prop: PropertySchema,
        required: bool,
    ) -> Self {
        let name = name.into();
        if required {
            self.required.push(name.clone());
        }
        self.properties.insert(name, prop);
        self
    }

    /// 验证 schema 是否有效
    pub fn validate(&self) -> Result<(), ToolValidationError> {
        // required 中的字段必须在 properties 中定义
        for req in &self.required {
            if !self.properties.contains_key(req) {
                return Err(ToolValidationError::RequiredPropertyNotDefined(req.clone()));
            }
        }
        Ok(())
    }
}

/// 属性 Schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySchema {
    /// 属性类型（string, number, boolean, array, object）
    #[serde(rename = "type")]
    pub prop_type: String,
    /// 属性描述
    pub description: String,
    /// 枚举值（可选，用于限制取值范围）
    #[serde(skip_serializing_if = "Option::is_none", rename = "enum")]
    pub enum_values: Option<Vec<Value>>,
}

impl PropertySchema {
    /// 创建字符串类型属性
    pub fn string(description: impl Into<String>) -> Self {
        Self {
            prop_type: "string".to_string(),
            description: description.into(),
            enum_values: None,
        }
    }

    /// 创建数字类型属性
    pub fn number(description: impl Into<String>) -> Self {
        Self {
            prop_type: "number".to_string(),
            description: description.into(),
            enum_values: None,
        }
    }

    /// 创建布尔类型属性
    pub fn boolean(description: impl Into<String>) -> Self {
        Self {
            prop_type: "boolean".to_string(),
            description: description.into(),
            enum_values: None,
        }
    }

    /// 设置枚举值
    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }
}

/// 工具定义验证错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolValidationError {
    /// 名称为空
    #[error("工具名称不能为空")]
    EmptyName,
    /// 描述为空
    #[error("工具描述不能为空")]
    EmptyDescription,
    /// required 引用了未定义的属性
    #[error("必需参数未定义: {0}")]
    RequiredPropertyNotDefined(String),
}

/// 工具执行错误
#[derive(Debug, Error)]
pub enum ToolError {
    /// 参数不符合工具预期
    #[error("参数无效: {0}")]
    InvalidArguments(String),
    /// 工具内部执行失败
    #[error("执行失败: {0}")]
    Execution(String),
}

/// 可执行工具
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具定义（名称、描述、参数 schema）
    fn definition(&self) -> ToolDefinition;

    /// 执行工具
    async fn execute(&self, arguments: Value) -> Result<Value, ToolError>;
}

/// 工具集合
///
/// 持有按规范名称索引的工具，外加别名映射（旧名称 → 规范名称）。
/// 克隆是浅拷贝（工具以 Arc 共享）。
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: HashMap<String, Arc<dyn Tool>>,
    aliases: HashMap<String, String>,
}

impl ToolSet {
    /// 创建空工具集
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加工具（按定义中的名称索引）
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool.definition().name.clone(), tool);
        self
    }

    /// 添加别名：`alias` 被改写为 `canonical`
    pub fn with_alias(mut self, alias: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), canonical.into());
        self
    }

    /// 把别名改写为规范名称，未知名称原样返回
    pub fn canonical_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(|s| s.as_str()).unwrap_or(name)
    }

    /// 按名称（含别名）查找工具
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(self.canonical_name(name)).cloned()
    }

    /// 是否包含该名称（含别名）的工具
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(self.canonical_name(name))
    }

    /// 全部工具定义，按名称排序保证输出稳定
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// 工具数量
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("aliases", &self.aliases)
            .finish()
    }
}

/// 从模型输出中检测到的一次工具调用
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    /// 调用 ID（同一步内唯一）
    pub id: String,
    /// 规范化后的工具名称
    pub name: String,
    /// 调用参数
    pub arguments: Value,
}

/// 工具调用状态（只向前转移：Pending → Executed | Error）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    /// 已检测，尚未执行
    Pending,
    /// 执行成功
    Executed,
    /// 执行失败
    Error,
}

/// 单次工具调用的执行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// 对应的调用 ID
    pub id: String,
    /// 工具名称
    pub name: String,
    /// 调用状态
    pub status: ToolCallStatus,
    /// 输出内容（未执行或失败时为 Null）
    pub output: Value,
    /// 错误信息（如果失败）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// 待执行结果
    pub fn pending(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            status: ToolCallStatus::Pending,
            output: Value::Null,
            error: None,
        }
    }

    /// 成功结果
    pub fn ok(call: &ToolCall, output: Value) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            status: ToolCallStatus::Executed,
            output,
            error: None,
        }
    }

    /// 失败结果
    pub fn err(call: &ToolCall, error: impl Into<String>) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            status: ToolCallStatus::Error,
            output: Value::Null,
            error: Some(error.into()),
        }
    }

    /// 是否执行成功
    pub fn succeeded(&self) -> bool {
        self.status == ToolCallStatus::Executed
    }
}
