//! 流式处理
//!
//! 定义引擎的流式语块表示与标签提取器

pub mod chunk;
pub mod tag_extractor;

pub use chunk::{apply_transforms, ChunkStream, FinishReason, StreamChunk, StreamTransform};
pub use tag_extractor::{merge_outside, TagConfig, TagExtractor, TextFragment};
