//! 插件注册表
//!
//! 维护插件列表并保证调用顺序：先按层级（Pre/Normal/Post），同层级内
//! 保持注册顺序（稳定排序）。

use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use super::types::Plugin;

/// 注册错误
#[derive(Debug, Error)]
pub enum RegistryError {
    /// 同名插件已存在
    #[error("插件名称重复: {0}")]
    DuplicateName(String),
}

/// 插件注册表
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册插件，名称冲突时拒绝
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<(), RegistryError> {
        let name = plugin.name().to_string();
        if self.plugins.iter().any(|p| p.name() == name) {
            return Err(RegistryError::DuplicateName(name));
        }
        info!(
            "[PluginRegistry] 注册插件: {} (tier={:?})",
            name,
            plugin.tier()
        );
        self.plugins.push(plugin);
        // 稳定排序：同层级保持注册顺序
        self.plugins.sort_by_key(|p| p.tier().order());
        Ok(())
    }

    /// 移除插件，返回是否存在
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.plugins.len();
        self.plugins.retain(|p| p.name() != name);
        let removed = self.plugins.len() < before;
        if removed {
            info!("[PluginRegistry] 移除插件: {}", name);
        }
        removed
    }

    /// 按名称查找
    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.iter().find(|p| p.name() == name).cloned()
    }

    /// 按调用顺序返回全部插件的快照
    pub fn snapshot(&self) -> Vec<Arc<dyn Plugin>> {
        self.plugins.clone()
    }

    /// 插件数量
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::types::PluginTier;
    use async_trait::async_trait;

    struct NamedPlugin {
        name: String,
        tier: PluginTier,
    }

    #[async_trait]
    impl Plugin for NamedPlugin {
        fn name(&self) -> &str {
            &self.name
        }
        fn tier(&self) -> PluginTier {
            self.tier
        }
    }

    fn plugin(name: &str, tier: PluginTier) -> Arc<dyn Plugin> {
        Arc::new(NamedPlugin {
            name: name.to_string(),
            tier,
        })
    }

    #[test]
    fn test_tier_ordering_is_stable() {
        let mut registry = PluginRegistry::new();
        registry.register(plugin("n1", PluginTier::Normal)).unwrap();
        registry.register(plugin("post1", PluginTier::Post)).unwrap();
        registry.register(plugin("pre1", PluginTier::Pre)).unwrap();
        registry.register(plugin("n2", PluginTier::Normal)).unwrap();
        registry.register(plugin("pre2", PluginTier::Pre)).unwrap();

        let order: Vec<String> = registry
            .snapshot()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(order, vec!["pre1", "pre2", "n1", "n2", "post1"]);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = PluginRegistry::new();
        registry.register(plugin("p", PluginTier::Normal)).unwrap();
        let err = registry.register(plugin("p", PluginTier::Post)).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(name) if name == "p"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister() {
        let mut registry = PluginRegistry::new();
        registry.register(plugin("p", PluginTier::Normal)).unwrap();
        assert!(registry.unregister("p"));
        assert!(!registry.unregister("p"));
        assert!(registry.is_empty());
    }
}
