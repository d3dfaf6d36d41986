//! # handcrafted-llm - 手写前向/反向传播的 Transformer 语言模型
//!
//! 不依赖任何深度学习框架，所有组件的前向传播和梯度都手工推导，
//! 矩阵运算基于 `ndarray`。
//!
//! ## 数据流
//!
//! ```text
//! 文本 → BPE 分词 → one-hot (ctx × vocab)
//!      → 词嵌入 + 位置嵌入 (ctx × emb)
//!      → N × TransformerBlock
//!      → 共享词嵌入的输出投影 (ctx × vocab) → softmax
//! ```
//!
//! ## 模块组织
//!
//! ### 基础
//! - `matrix`: 二维 `f32` 矩阵及其运算（乘法、softmax、交叉熵、拆分拼接）
//! - `error`: 可恢复错误类型 [`ModelError`]
//! - `utils`: 随机数工具
//!
//! ### 网络层
//! - `feed_forward`: 仿射层与带 leaky ReLU 的 MLP
//! - `self_attention`: 注意力头与因果多头注意力
//! - `layer_norm`: 层归一化（近似反向传播）
//! - `transformer`: Transformer 块（注意力 + MLP，两次残差与归一化）
//! - `embeddings`: 词嵌入、位置嵌入与共享输出投影
//! - `llm`: 语言模型，负责训练 (`learn`) 和贪心生成 (`query`)
//!
//! ### 周边
//! - `tokenizer` / `vocab`: 预分词与 BPE 词表
//! - `config`: 模型结构与训练参数
//! - `training_observer`: 训练进度回调
//! - `model_serialization`: 二进制 / JSON 持久化
//! - `classifier` / `features` / `dataset_loader`: 基于同一套 MLP 的分类器及其数据加载

// ============================================================================
// 模块声明
// ============================================================================

pub mod classifier; // 分类器：批量 / 逐样本两种训练策略
pub mod config; // 配置：模型结构与训练参数
pub mod dataset_loader; // 数据加载：文本语料与按目录分类的样本
pub mod embeddings; // 嵌入层：词嵌入 + 位置嵌入，输出端共享词嵌入
pub mod error; // 错误类型
pub mod feed_forward; // 前馈网络：仿射层和 MLP
pub mod features; // 特征提取：原始字节 → 特征向量
pub mod layer_norm; // 层归一化
pub mod llm; // 语言模型主类
pub mod matrix; // 矩阵
pub mod model_serialization; // 模型序列化
pub mod self_attention; // 自注意力
pub mod tokenizer; // 预分词
pub mod training_observer; // 训练进度观察者
pub mod transformer; // Transformer 块
pub mod utils; // 工具函数
pub mod vocab; // BPE 词表

// ============================================================================
// 重导出核心类型
// ============================================================================

pub use classifier::{Evaluation, Example, MlpClassifier, TrainingStrategy};
pub use config::{ModelConfig, TrainingConfig};
pub use dataset_loader::{DirFile, TextCorpus, load_labeled_examples, read_dir_recursive};
pub use embeddings::Embeddings;
pub use error::{ModelError, Result};
pub use feed_forward::{AffineLayer, Mlp};
pub use features::{FeatureExtractor, GrayscaleExtractor};
pub use layer_norm::LayerNorm;
pub use llm::{LLM, Layer};
pub use matrix::Matrix;
pub use model_serialization::{
    load_classifier_json, load_model_auto, load_model_binary, load_model_json,
    save_classifier_json, save_model_binary, save_model_json,
};
pub use self_attention::{AttentionHead, MultiHeadAttention};
pub use training_observer::{LogObserver, LossHistory, SilentObserver, TrainingObserver};
pub use transformer::TransformerBlock;
pub use utils::sample_normal;
pub use vocab::Vocab;

// ============================================================================
// 模型超参数
// ============================================================================

/// **Transformer 块数量**
pub const NUM_LAYERS: usize = 1;

/// **上下文窗口长度**
///
/// 训练和生成都以固定长度的窗口进行，不足的部分用 `</pad>` 补齐。
/// 注意力的计算量随窗口长度平方增长。
pub const CONTEXT_LEN: usize = 256;

/// **嵌入维度**
///
/// 词嵌入、位置嵌入以及每个 Transformer 块的输入输出宽度。
pub const EMBEDDING_DIM: usize = 192;

/// **单个注意力头的维度**
pub const HEAD_DIM: usize = 48;

/// **注意力头数量**
///
/// 各头输出拼接后的宽度为 `NUM_HEADS * HEAD_DIM`，再由 `W_o` 投影回 `EMBEDDING_DIM`。
pub const NUM_HEADS: usize = 4;

/// **leaky ReLU 负半轴斜率**
pub const LEAKY_ALPHA: f32 = 0.01;

/// **MLP 隐藏层扩展倍数**
///
/// Transformer 块中的 MLP 为 `EMBEDDING_DIM → EMBEDDING_DIM * HIDDEN_MULTIPLIER → EMBEDDING_DIM`。
pub const HIDDEN_MULTIPLIER: usize = 8;

/// **每次生成的最大 token 数**
pub const MAX_NEW_TOKENS: usize = 128;

/// **目标词表大小**
///
/// BPE 合并在词表达到这个大小时停止（不含特殊 token）。
pub const DEFAULT_VOCAB_SIZE: usize = 2048;

// ============================================================================
// 训练参数
// ============================================================================

pub const DEFAULT_LEARNING_RATE: f32 = 1e-4;

pub const DEFAULT_EPOCHS: usize = 4;

// ============================================================================
// 数值稳定性常量
// ============================================================================

/// **层归一化方差下限**
///
/// ```text
/// x̂ = (x - μ) / sqrt(σ² + ε)
/// ```
pub const LAYER_NORM_EPSILON: f32 = 1e-6;

/// **对数运算专用常量**
///
/// 交叉熵对概率取对数，概率先被截断到不小于该值，避免 log(0)。
pub const LOG_EPSILON: f32 = 1e-12;
