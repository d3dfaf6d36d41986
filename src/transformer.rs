//! # Transformer 块
//!
//! 后归一化（post-norm）结构，两处残差连接：
//!
//! ```text
//! a  = MHA(x)
//! n1 = LN1(a + x)
//! f  = MLP(n1)
//! y  = LN2(f + n1)
//! ```
//!
//! 反向传播时残差分支的梯度要重新加回主路径：
//!
//! ```text
//! dR2 = LN2.backward(d)
//! dF  = MLP.backward(dR2)
//! dN1 = LN1.backward(dF + dR2)
//! dA  = MHA.backward(dN1)
//! dx  = dA + dN1
//! ```

use crate::{
    config::ModelConfig,
    error::{ModelError, Result},
    feed_forward::Mlp,
    layer_norm::LayerNorm,
    llm::Layer,
    matrix::Matrix,
    self_attention::MultiHeadAttention,
};

#[derive(Clone, Debug)]
pub struct TransformerBlock {
    pub attention: MultiHeadAttention,
    pub feed_forward: Mlp,
    pub norm1: LayerNorm, // 注意力之后
    pub norm2: LayerNorm, // 前馈网络之后
}

impl TransformerBlock {
    /// **创建 Transformer 块**
    ///
    /// 前馈网络宽度为 `embedding_dim → hidden_multiplier·embedding_dim → embedding_dim`。
    pub fn new(
        context_len: usize,
        embedding_dim: usize,
        head_dim: usize,
        num_heads: usize,
        hidden_multiplier: usize,
        alpha: f32,
    ) -> Self {
        Self {
            attention: MultiHeadAttention::new(context_len, embedding_dim, head_dim, num_heads),
            feed_forward: Mlp::new(
                alpha,
                context_len,
                embedding_dim,
                &[embedding_dim * hidden_multiplier, embedding_dim],
            ),
            norm1: LayerNorm::new(embedding_dim),
            norm2: LayerNorm::new(embedding_dim),
        }
    }

    /// **按配置校验所有子层的参数形状**
    pub fn check_shapes(&self, config: &ModelConfig) -> Result<()> {
        let dim = config.embedding_dim;
        self.attention
            .check_shapes(dim, config.head_dim, config.num_heads)?;
        self.feed_forward.check_shapes(config.context_len)?;
        if self.feed_forward.fan_in() != dim || self.feed_forward.fan_out() != dim {
            return Err(ModelError::Shape(format!(
                "前馈网络应为 {} → … → {}, 实际 {} → … → {}",
                dim,
                dim,
                self.feed_forward.fan_in(),
                self.feed_forward.fan_out()
            )));
        }
        self.norm1.check_shapes(dim)?;
        self.norm2.check_shapes(dim)
    }
}

impl Layer for TransformerBlock {
    fn layer_type(&self) -> &str {
        "TransformerBlock"
    }

    fn forward(&mut self, input: &Matrix) -> Matrix {
        let attention_out = self.attention.forward(input);
        let norm1_out = self.norm1.normalize(&attention_out.add(input));
        let feed_forward_out = self.feed_forward.forward(&norm1_out);
        self.norm2.normalize(&feed_forward_out.add(&norm1_out))
    }

    fn backward(&mut self, grads: &Matrix, lr: f32) -> Matrix {
        let grad_residual2 = self.norm2.backward(grads, lr);
        let grad_ffn = self.feed_forward.backward_and_update(&grad_residual2, lr);
        let grad_norm1 = self.norm1.backward(&grad_ffn.add(&grad_residual2), lr);
        let grad_attention = self.attention.backward(&grad_norm1, lr);
        grad_attention.add(&grad_norm1)
    }

    fn parameters(&self) -> usize {
        self.attention.parameters()
            + self.feed_forward.parameters()
            + self.norm1.parameters()
            + self.norm2.parameters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_preserves_shape() {
        let mut block = TransformerBlock::new(4, 8, 4, 2, 8, 0.01);
        let x = Matrix::random(4, 8);
        let y = block.forward(&x);
        assert_eq!(y.shape(), (4, 8));
        let dx = block.backward(&Matrix::random(4, 8), 1e-3);
        assert_eq!(dx.shape(), (4, 8));
    }
}
