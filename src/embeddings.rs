//! # 词嵌入与位置嵌入（权重共享）
//!
//! ## 输入端
//!
//! ```text
//! embeds = onehot · E + P
//! ```
//!
//! - `E`: 词嵌入表 (vocab_size, embedding_dim)，`</pad>` 对应的行恒为 0
//! - `P`: 可学习的位置嵌入 (context_len, embedding_dim)，随机初始化
//!
//! ## 输出端（共享 E）
//!
//! ```text
//! logits = hidden · Eᵀ
//! ```
//!
//! ## 梯度
//!
//! `E` 在两处被使用，两部分梯度先求和，再做**一次**更新：
//!
//! ```text
//! dE = onehotᵀ · d_embeds + (hiddenᵀ · d_logits)ᵀ
//! dP = d_embeds
//! ```

use crate::matrix::Matrix;

#[derive(Clone, Debug)]
pub struct Embeddings {
    /// **词嵌入表** (vocab_size × embedding_dim)，同时充当输出投影
    pub token_embeddings: Matrix,

    /// **位置嵌入** (context_len × embedding_dim)
    pub positional: Matrix,

    /// `</pad>` 在词表中的编号
    pub pad_index: usize,

    // ========== 前向传播缓存 ==========
    cached_one_hot: Option<Matrix>,
    cached_hidden: Option<Matrix>,
}

impl Embeddings {
    pub fn new(vocab_size: usize, context_len: usize, embedding_dim: usize, pad_index: usize) -> Self {
        Self::from_parts(
            Matrix::random(vocab_size, embedding_dim),
            Matrix::random(context_len, embedding_dim),
            pad_index,
        )
    }

    /// 由已有参数构造，padding 行会被清零
    pub fn from_parts(token_embeddings: Matrix, positional: Matrix, pad_index: usize) -> Self {
        let mut embeddings = Self {
            token_embeddings,
            positional,
            pad_index,
            cached_one_hot: None,
            cached_hidden: None,
        };
        embeddings.zero_padding_row();
        embeddings
    }

    pub fn vocab_size(&self) -> usize {
        self.token_embeddings.rows()
    }

    pub fn embedding_dim(&self) -> usize {
        self.token_embeddings.cols()
    }

    pub fn context_len(&self) -> usize {
        self.positional.rows()
    }

    pub fn zero_padding_row(&mut self) {
        if self.pad_index < self.token_embeddings.rows() {
            self.token_embeddings.fill_row(self.pad_index, 0.0);
        }
    }

    /// one-hot (ctx × vocab) → 嵌入 (ctx × embedding_dim)
    pub fn embed(&mut self, one_hot: &Matrix) -> Matrix {
        let embeds = one_hot.mul(&self.token_embeddings).add(&self.positional);
        self.cached_one_hot = Some(one_hot.clone());
        embeds
    }

    /// 隐藏状态 (ctx × embedding_dim) → logits (ctx × vocab)
    pub fn project(&mut self, hidden: &Matrix) -> Matrix {
        let logits = hidden.mul(&self.token_embeddings.transpose());
        self.cached_hidden = Some(hidden.clone());
        logits
    }

    /// logits 梯度 → 隐藏状态梯度，使用更新前的 E
    pub fn hidden_gradient(&self, grad_logits: &Matrix) -> Matrix {
        grad_logits.mul(&self.token_embeddings)
    }

    /// **更新 P 和 E**
    ///
    /// `grad_embeds` 为第一个 Transformer 块输入处的梯度，`grad_logits` 为输出端梯度。
    pub fn apply_gradients(&mut self, grad_embeds: &Matrix, grad_logits: &Matrix, lr: f32) {
        let (Some(one_hot), Some(hidden)) = (self.cached_one_hot.as_ref(), self.cached_hidden.as_ref())
        else {
            log::warn!("Embeddings.apply_gradients 在未执行 forward 的情况下被调用，跳过参数更新");
            return;
        };

        let grad_tokens = one_hot
            .transpose()
            .mul(grad_embeds)
            .add(&hidden.transpose().mul(grad_logits).transpose());

        self.positional.apply_gradient(grad_embeds, lr);
        self.token_embeddings.apply_gradient(&grad_tokens, lr);
        self.zero_padding_row();
    }

    pub fn parameters(&self) -> usize {
        let (v, d) = self.token_embeddings.shape();
        let (c, _) = self.positional.shape();
        v * d + c * d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_row_is_zero() {
        let emb = Embeddings::new(5, 3, 4, 2);
        for c in 0..4 {
            assert_eq!(emb.token_embeddings.get(2, c), 0.0);
        }
    }

    #[test]
    fn test_padding_row_stays_zero_after_update() {
        let mut emb = Embeddings::new(4, 2, 3, 1);
        let one_hot = Matrix::one_hot(&[1, 0], 4);
        let embeds = emb.embed(&one_hot);
        emb.project(&embeds);
        emb.apply_gradients(&Matrix::random(2, 3), &Matrix::random(2, 4), 0.5);
        for c in 0..3 {
            assert_eq!(emb.token_embeddings.get(1, c), 0.0);
        }
    }

    #[test]
    fn test_embed_adds_positional() {
        let mut emb = Embeddings::from_parts(
            Matrix::from_rows(&[[1.0, 2.0], [0.0, 0.0], [3.0, 4.0]]),
            Matrix::from_rows(&[[0.5, 0.5], [1.0, 1.0]]),
            1,
        );
        let out = emb.embed(&Matrix::one_hot(&[2, 0], 3));
        assert_eq!(out, Matrix::from_rows(&[[3.5, 4.5], [2.0, 3.0]]));
    }

    #[test]
    fn test_tied_gradient_sums_input_and_output_terms() {
        let mut emb = Embeddings::from_parts(
            Matrix::from_rows(&[[1.0, 2.0], [0.0, 0.0], [3.0, 4.0]]),
            Matrix::from_rows(&[[0.5, 0.5], [1.0, 1.0]]),
            1,
        );
        emb.embed(&Matrix::one_hot(&[2, 0], 3));
        emb.project(&Matrix::from_rows(&[[1.0, 0.0], [0.0, 2.0]]));

        let grad_embeds = Matrix::from_rows(&[[0.1, 0.2], [0.3, 0.4]]);
        let grad_logits = Matrix::from_rows(&[[1.0, 0.0, -1.0], [0.0, 2.0, 0.0]]);
        emb.apply_gradients(&grad_embeds, &grad_logits, 1.0);

        // dE = onehotᵀ·dEmb + (Hᵀ·dLogits)ᵀ = [[1.3, 0.4], [0, 4], [-0.9, 0.2]]
        let expected_tokens = Matrix::from_rows(&[[-0.3, 1.6], [0.0, 0.0], [3.9, 3.8]]);
        let expected_positional = Matrix::from_rows(&[[0.4, 0.3], [0.7, 0.6]]);
        for (actual, expected) in [
            (&emb.token_embeddings, &expected_tokens),
            (&emb.positional, &expected_positional),
        ] {
            for (a, e) in actual.to_vec().iter().zip(expected.to_vec()) {
                assert!((a - e).abs() < 1e-5, "{} vs {}", a, e);
            }
        }
    }
}
