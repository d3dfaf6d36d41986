//! # 多头因果自注意力（Multi-Head Causal Self-Attention）
//!
//! ## 缩放点积注意力
//!
//! ```text
//! Attention(Q, K, V) = softmax(Q·Kᵀ / scale + mask) · V
//! ```
//!
//! - `Q = x·W_q`, `K = x·W_k`, `V = x·W_v`，投影矩阵均为 (embed_dim, head_dim)，无偏置
//! - `scale = sqrt(head_dim)`
//! - `mask` 为因果掩码：对角线上方为 -∞，其余为 0，位置 i 只能看到 0..=i
//!
//! ## 单头反向传播
//!
//! ```text
//! dAttn   = dOut · Vᵀ
//! dScores = attn ⊙ (dAttn − rowSum(attn ⊙ dAttn))      // softmax 的雅可比
//! dQ      = dScores · (K / scale)
//! dK      = dScoresᵀ · (Q / scale)
//! dV      = attnᵀ · dOut
//! dx      = dQ·W_qᵀ + dK·W_kᵀ + dV·W_vᵀ                 // 使用更新前的权重
//! ```
//!
//! ## 多头组合
//!
//! 每个头独立处理同一输入，输出按列拼接后乘以 `W_o` (heads·head_dim, embed_dim)。
//! 各头之间没有共享的可变状态，前向传播用 rayon 并行执行，结果与串行完全一致。
//!
//! 反向传播时 `dConcat = d · W_oᵀ` 使用更新前的 `W_o`，随后才更新 `W_o`。
//! 先更新再回传的写法会得到略有不同的数值。

use rayon::prelude::*;

use crate::{
    error::{ModelError, Result},
    llm::Layer,
    matrix::Matrix,
};

/// **构造因果掩码** (ctx × ctx)
///
/// ```text
/// [ 0  -∞  -∞ ]
/// [ 0   0  -∞ ]
/// [ 0   0   0 ]
/// ```
pub fn causal_mask(context_len: usize) -> Matrix {
    let mut mask = Matrix::zeros(context_len, context_len);
    for i in 0..context_len {
        for j in (i + 1)..context_len {
            mask.set(i, j, f32::NEG_INFINITY);
        }
    }
    mask
}

/// **单个注意力头**
#[derive(Clone, Debug)]
pub struct AttentionHead {
    pub w_q: Matrix,
    pub w_k: Matrix,
    pub w_v: Matrix,

    /// 缩放因子，默认 `sqrt(head_dim)`
    pub scale: f32,

    // ========== 前向传播缓存 ==========
    cached_input: Option<Matrix>,
    cached_q: Option<Matrix>,
    cached_k: Option<Matrix>,
    cached_v: Option<Matrix>,
    cached_attention: Option<Matrix>,
}

impl AttentionHead {
    pub fn new(embedding_dim: usize, head_dim: usize) -> Self {
        Self::from_weights(
            Matrix::random(embedding_dim, head_dim),
            Matrix::random(embedding_dim, head_dim),
            Matrix::random(embedding_dim, head_dim),
        )
    }

    /// 由给定投影矩阵构造，`scale` 取 `sqrt(head_dim)`
    pub fn from_weights(w_q: Matrix, w_k: Matrix, w_v: Matrix) -> Self {
        let scale = (w_q.cols() as f32).sqrt();
        Self {
            w_q,
            w_k,
            w_v,
            scale,
            cached_input: None,
            cached_q: None,
            cached_k: None,
            cached_v: None,
            cached_attention: None,
        }
    }

    pub fn head_dim(&self) -> usize {
        self.w_q.cols()
    }

    /// 上一次前向传播的注意力权重（每行和为 1）
    pub fn attention_weights(&self) -> Option<&Matrix> {
        self.cached_attention.as_ref()
    }

    pub fn forward(&mut self, input: &Matrix, mask: &Matrix) -> Matrix {
        let q = input.mul(&self.w_q);
        let k = input.mul(&self.w_k);
        let v = input.mul(&self.w_v);

        let scores = q.mul(&k.transpose()).scale(1.0 / self.scale).add(mask);
        let attention = scores.softmax();
        let output = attention.mul(&v);

        self.cached_input = Some(input.clone());
        self.cached_q = Some(q);
        self.cached_k = Some(k);
        self.cached_v = Some(v);
        self.cached_attention = Some(attention);

        output
    }

    pub fn backward(&mut self, grad_output: &Matrix, lr: f32) -> Matrix {
        let (Some(input), Some(q), Some(k), Some(v), Some(attention)) = (
            self.cached_input.as_ref(),
            self.cached_q.as_ref(),
            self.cached_k.as_ref(),
            self.cached_v.as_ref(),
            self.cached_attention.as_ref(),
        ) else {
            panic!("AttentionHead::backward 在 forward 之前被调用");
        };

        let grad_attention = grad_output.mul(&v.transpose());

        // softmax 雅可比：按行 attn ⊙ (g − Σ attn ⊙ g)
        let weighted = attention.mul_elwise(&grad_attention).row_sum();
        let grad_scores = attention.mul_elwise(&grad_attention.sub_col(&weighted));

        let inv_scale = 1.0 / self.scale;
        let grad_q = grad_scores.mul(&k.scale(inv_scale));
        let grad_k = grad_scores.transpose().mul(&q.scale(inv_scale));
        let grad_v = attention.transpose().mul(grad_output);

        let grad_input = grad_q
            .mul(&self.w_q.transpose())
            .add(&grad_k.mul(&self.w_k.transpose()))
            .add(&grad_v.mul(&self.w_v.transpose()));

        let input_t = input.transpose();
        let grad_w_q = input_t.mul(&grad_q);
        let grad_w_k = input_t.mul(&grad_k);
        let grad_w_v = input_t.mul(&grad_v);

        self.w_q.apply_gradient(&grad_w_q, lr);
        self.w_k.apply_gradient(&grad_w_k, lr);
        self.w_v.apply_gradient(&grad_w_v, lr);

        grad_input
    }

    pub fn parameters(&self) -> usize {
        3 * self.w_q.rows() * self.w_q.cols()
    }
}

/// **多头注意力**
#[derive(Clone, Debug)]
pub struct MultiHeadAttention {
    pub heads: Vec<AttentionHead>,

    /// 输出投影 W_o: (num_heads · head_dim, embedding_dim)
    pub w_o: Matrix,

    /// 因果掩码，按上下文长度构造，不参与序列化
    mask: Matrix,

    cached_concat: Option<Matrix>,
}

impl MultiHeadAttention {
    pub fn new(context_len: usize, embedding_dim: usize, head_dim: usize, num_heads: usize) -> Self {
        let heads = (0..num_heads)
            .map(|_| AttentionHead::new(embedding_dim, head_dim))
            .collect();
        Self::from_parts(
            heads,
            Matrix::random(num_heads * head_dim, embedding_dim),
            context_len,
        )
    }

    pub fn from_parts(heads: Vec<AttentionHead>, w_o: Matrix, context_len: usize) -> Self {
        Self {
            heads,
            w_o,
            mask: causal_mask(context_len),
            cached_concat: None,
        }
    }

    pub fn mask(&self) -> &Matrix {
        &self.mask
    }

    /// **校验参数形状**
    ///
    /// 每个头的投影为 `embedding_dim × head_dim`，`W_o` 为 `(num_heads·head_dim) × embedding_dim`。
    pub fn check_shapes(&self, embedding_dim: usize, head_dim: usize, num_heads: usize) -> Result<()> {
        if self.heads.len() != num_heads {
            return Err(ModelError::Shape(format!(
                "注意力头数应为 {}, 实际 {}",
                num_heads,
                self.heads.len()
            )));
        }
        for (i, head) in self.heads.iter().enumerate() {
            let expected = (embedding_dim, head_dim);
            head.w_q.check_shape(expected, &format!("第 {} 个头的 W_q", i))?;
            head.w_k.check_shape(expected, &format!("第 {} 个头的 W_k", i))?;
            head.w_v.check_shape(expected, &format!("第 {} 个头的 W_v", i))?;
        }
        self.w_o.check_shape((num_heads * head_dim, embedding_dim), "W_o")
    }

    /// 加载模型后按持久化的上下文长度重建掩码
    pub fn rebuild_causal_mask(&mut self, context_len: usize) {
        self.mask = causal_mask(context_len);
    }

    pub fn forward(&mut self, input: &Matrix) -> Matrix {
        let mask = &self.mask;
        let outputs: Vec<Matrix> = self
            .heads
            .par_iter_mut()
            .map(|head| head.forward(input, mask))
            .collect();

        let concat = Matrix::concat(&outputs);
        let output = concat.mul(&self.w_o);
        self.cached_concat = Some(concat);
        output
    }

    pub fn backward(&mut self, grad_output: &Matrix, lr: f32) -> Matrix {
        let Some(concat) = self.cached_concat.as_ref() else {
            log::warn!("MultiHeadAttention.backward 在未执行 forward 的情况下被调用，直接传递梯度");
            return grad_output.clone();
        };

        let grad_concat = grad_output.mul(&self.w_o.transpose());
        let grad_w_o = concat.transpose().mul(grad_output);
        self.w_o.apply_gradient(&grad_w_o, lr);

        let chunks = grad_concat.split(self.heads.len());
        let mut grad_input: Option<Matrix> = None;
        for (head, chunk) in self.heads.iter_mut().zip(&chunks) {
            let dx = head.backward(chunk, lr);
            grad_input = Some(match grad_input {
                Some(acc) => acc.add(&dx),
                None => dx,
            });
        }

        grad_input.unwrap_or_else(|| grad_output.clone())
    }
}

impl Layer for MultiHeadAttention {
    fn layer_type(&self) -> &str {
        "MultiHeadAttention"
    }

    fn forward(&mut self, input: &Matrix) -> Matrix {
        MultiHeadAttention::forward(self, input)
    }

    fn backward(&mut self, grads: &Matrix, lr: f32) -> Matrix {
        MultiHeadAttention::backward(self, grads, lr)
    }

    fn parameters(&self) -> usize {
        self.heads.iter().map(AttentionHead::parameters).sum::<usize>()
            + self.w_o.rows() * self.w_o.cols()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_causal_mask_layout() {
        let mask = causal_mask(3);
        for i in 0..3 {
            for j in 0..3 {
                if j > i {
                    assert_eq!(mask.get(i, j), f32::NEG_INFINITY);
                } else {
                    assert_eq!(mask.get(i, j), 0.0);
                }
            }
        }
    }

    #[test]
    fn test_parallel_forward_matches_sequential() {
        let mut mha = MultiHeadAttention::new(4, 8, 4, 2);
        let x = Matrix::random(4, 8);
        let parallel = mha.forward(&x);

        let mut heads = mha.heads.clone();
        let outputs: Vec<Matrix> = heads.iter_mut().map(|h| h.forward(&x, mha.mask())).collect();
        let sequential = Matrix::concat(&outputs).mul(&mha.w_o);

        assert_eq!(parallel, sequential);
    }

    #[test]
    fn test_rebuild_mask_changes_size() {
        let mut mha = MultiHeadAttention::new(4, 8, 4, 2);
        mha.rebuild_causal_mask(6);
        assert_eq!(mha.mask().shape(), (6, 6));
    }
}
