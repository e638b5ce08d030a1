//! 标签提取器
//!
//! 在增量到达的文本片段流中识别一对开/闭标签，把每个输出片段标记为
//! "标签内" 或 "标签外"。标签本身被归入标签内片段，因此按输出顺序拼接
//! 所有片段可以无损还原原始输入。
//!
//! 标签可以横跨任意多个输入片段：缓冲区末尾可能是半个标签的部分会被
//! 保留到下一次调用，其余内容立即放行，保证流式低延迟。

/// 标签配置
#[derive(Debug, Clone)]
pub struct TagConfig {
    /// 开标签
    pub opening: String,
    /// 闭标签
    pub closing: String,
    /// 合并标签外片段时插入的分隔符
    pub separator: String,
}

impl TagConfig {
    /// 创建标签配置
    pub fn new(
        opening: impl Into<String>,
        closing: impl Into<String>,
        separator: impl Into<String>,
    ) -> Self {
        Self {
            opening: opening.into(),
            closing: closing.into(),
            separator: separator.into(),
        }
    }

    /// 工具调用标签的默认配置
    pub fn tool_use() -> Self {
        Self::new("<tool_use>", "</tool_use>", "\n")
    }
}

/// 分类后的文本片段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFragment {
    /// 片段内容
    pub text: String,
    /// 是否属于标签内容（含标签本身）
    pub is_tag_content: bool,
}

/// 增量标签提取器
///
/// 状态只在流结束时整体丢弃；`finish` 会冲刷残留缓冲
#[derive(Debug)]
pub struct TagExtractor {
    config: TagConfig,
    buffer: String,
    inside_tag: bool,
}

impl TagExtractor {
    /// 创建新的提取器
    pub fn new(config: TagConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
            inside_tag: false,
        }
    }

    /// 处理一个输入片段，返回已完成分类的输出片段
    pub fn process(&mut self, fragment: &str) -> Vec<TextFragment> {
        self.buffer.push_str(fragment);
        let mut out: Vec<TextFragment> = Vec::new();

        loop {
            let tag = if self.inside_tag {
                self.config.closing.clone()
            } else {
                self.config.opening.clone()
            };

            match self.buffer.find(tag.as_str()) {
                Some(pos) => {
                    if pos > 0 {
                        let text: String = self.buffer.drain(..pos).collect();
                        push_fragment(&mut out, text, self.inside_tag);
                    }
                    // 标签本身归入标签内容
                    let token: String = self.buffer.drain(..tag.len()).collect();
                    if self.inside_tag {
                        push_fragment(&mut out, token, true);
                        self.inside_tag = false;
                    } else {
                        self.inside_tag = true;
                        push_fragment(&mut out, token, true);
                    }
                }
                None => {
                    // 末尾可能是下一个期望标签的前半截，保留待续
                    let keep = partial_tag_suffix(&self.buffer, &tag);
                    let emit_len = self.buffer.len() - keep;
                    if emit_len > 0 {
                        let text: String = self.buffer.drain(..emit_len).collect();
                        push_fragment(&mut out, text, self.inside_tag);
                    }
                    break;
                }
            }
        }

        out
    }

    /// 冲刷残留缓冲
    ///
    /// 残留内容（可能是未能凑齐的半个标签）按当前状态分类后返回
    pub fn finish(&mut self) -> Option<TextFragment> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(TextFragment {
            text: std::mem::take(&mut self.buffer),
            is_tag_content: self.inside_tag,
        })
    }

    /// 当前是否位于标签内
    pub fn inside_tag(&self) -> bool {
        self.inside_tag
    }

    /// 配置
    pub fn config(&self) -> &TagConfig {
        &self.config
    }
}

/// 把标签外片段按分隔符合并为一段可见文本
///
/// 供执行器与流消费方在整步片段上重组可见输出；流式过滤路径逐片段
/// 透传原文，不走合并
pub fn merge_outside(fragments: &[TextFragment], separator: &str) -> String {
    fragments
        .iter()
        .filter(|f| !f.is_tag_content && !f.text.is_empty())
        .map(|f| f.text.as_str())
        .collect::<Vec<_>>()
        .join(separator)
}

/// 相邻同类片段合并，减少下游处理的碎片数量
fn push_fragment(out: &mut Vec<TextFragment>, text: String, is_tag_content: bool) {
    if let Some(last) = out.last_mut() {
        if last.is_tag_content == is_tag_content {
            last.text.push_str(&text);
            return;
        }
    }
    out.push(TextFragment {
        text,
        is_tag_content,
    });
}

/// 返回 buffer 末尾可能是 tag 前缀的最长后缀长度（字节）
fn partial_tag_suffix(buffer: &str, tag: &str) -> usize {
    let max = tag.len().saturating_sub(1).min(buffer.len());
    for len in (1..=max).rev() {
        let start = buffer.len() - len;
        if buffer.is_char_boundary(start) && tag.starts_with(&buffer[start..]) {
            return len;
        }
    }
    0
}
