//! # 模型与训练配置
//!
//! 默认值来自 `lib.rs` 中的超参数常量。`ModelConfig` 随模型一起持久化，
//! 加载时据此重建因果掩码等不保存的结构。

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::{
    CONTEXT_LEN, DEFAULT_EPOCHS, DEFAULT_LEARNING_RATE, EMBEDDING_DIM, HEAD_DIM,
    HIDDEN_MULTIPLIER, LEAKY_ALPHA, MAX_NEW_TOKENS, NUM_HEADS, NUM_LAYERS,
    error::{ModelError, Result},
};

/// **语言模型结构配置**
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct ModelConfig {
    /// Transformer 块数量
    pub num_layers: usize,
    /// 上下文窗口长度
    pub context_len: usize,
    pub embedding_dim: usize,
    /// 每个注意力头的维度
    pub head_dim: usize,
    pub num_heads: usize,
    /// Leaky ReLU 负半轴斜率
    pub leaky_alpha: f32,
    /// 前馈网络隐藏层相对嵌入维度的倍数
    pub hidden_multiplier: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            num_layers: NUM_LAYERS,
            context_len: CONTEXT_LEN,
            embedding_dim: EMBEDDING_DIM,
            head_dim: HEAD_DIM,
            num_heads: NUM_HEADS,
            leaky_alpha: LEAKY_ALPHA,
            hidden_multiplier: HIDDEN_MULTIPLIER,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("context_len", self.context_len),
            ("embedding_dim", self.embedding_dim),
            ("head_dim", self.head_dim),
            ("num_heads", self.num_heads),
            ("hidden_multiplier", self.hidden_multiplier),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(ModelError::Config(format!("{} 必须大于 0", name)));
            }
        }
        if !self.leaky_alpha.is_finite() {
            return Err(ModelError::Config(format!(
                "leaky_alpha 必须是有限值, 实际 {}",
                self.leaky_alpha
            )));
        }
        Ok(())
    }

    /// 前馈网络隐藏层宽度
    pub fn hidden_dim(&self) -> usize {
        self.embedding_dim * self.hidden_multiplier
    }
}

/// **训练与生成参数**
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f32,
    /// 单次生成的 token 上限
    pub max_new_tokens: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: DEFAULT_EPOCHS,
            learning_rate: DEFAULT_LEARNING_RATE,
            max_new_tokens: MAX_NEW_TOKENS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ModelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.hidden_dim(), EMBEDDING_DIM * 8);
    }

    #[test]
    fn test_zero_heads_rejected() {
        let config = ModelConfig {
            num_heads: 0,
            ..ModelConfig::default()
        };
        assert!(matches!(config.validate(), Err(ModelError::Config(_))));
    }
}
