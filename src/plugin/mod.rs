//! 插件系统
//!
//! 插件 trait、注册表与按合并策略执行钩子的管理器

pub mod manager;
pub mod registry;
pub mod types;

pub use manager::PluginManager;
pub use registry::{PluginRegistry, RegistryError};
pub use types::{HookError, LanguageModel, ModelHandle, ModelMiddleware, Plugin, PluginTier};
