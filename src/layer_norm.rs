//! # 层归一化（Layer Normalization）
//!
//! 对每一行（每个位置的特征向量）独立做标准化，再做可学习的缩放和偏移。
//!
//! ## 前向传播
//!
//! ```text
//! μ     = mean(x, 每行)
//! σ²    = var(x, 每行)             // 有偏方差
//! x̂     = (x - μ) / sqrt(σ² + ε)
//! y     = γ ⊙ x̂ + β               // γ、β 形状为 (1, dim)，按行广播
//! ```
//!
//! ## 反向传播（近似）
//!
//! 只保留主项，略去均值和方差对输入的雅可比：
//!
//! ```text
//! dx = γ / sqrt(σ² + ε) ⊙ (d - mean(d, 每行))
//! dγ = colSum(x̂ ⊙ d)
//! dβ = colSum(d)
//! ```
//!
//! 注意：这不是精确的 LayerNorm 梯度。
//!
//! 近似梯度只用到 x̂ 和 σ²，因此前向传播不缓存原始输入 x。
//! 改为精确梯度时需要同时缓存 x。

use crate::{
    LAYER_NORM_EPSILON,
    error::Result,
    llm::Layer,
    matrix::Matrix,
};

/// **层归一化结构体**
#[derive(Clone, Debug)]
pub struct LayerNorm {
    /// **数值稳定性常数**（1e-6）
    pub epsilon: f32,

    /// **缩放参数 γ**: (1, dim)，初始化为 1
    pub gamma: Matrix,

    /// **偏移参数 β**: (1, dim)，初始化为 0
    pub beta: Matrix,

    // ========== 前向传播缓存 ==========
    cached_normalized: Option<Matrix>,
    cached_mean: Option<Matrix>,
    cached_variance: Option<Matrix>,
}

impl LayerNorm {
    pub fn new(dim: usize) -> Self {
        Self::from_parts(
            LAYER_NORM_EPSILON,
            Matrix::from_rows(&[vec![1.0; dim]]),
            Matrix::zeros(1, dim),
        )
    }

    pub fn from_parts(epsilon: f32, gamma: Matrix, beta: Matrix) -> Self {
        Self {
            epsilon,
            gamma,
            beta,
            cached_normalized: None,
            cached_mean: None,
            cached_variance: None,
        }
    }

    /// γ、β 必须都是 `1 × dim`
    pub fn check_shapes(&self, dim: usize) -> Result<()> {
        self.gamma.check_shape((1, dim), "LayerNorm γ")?;
        self.beta.check_shape((1, dim), "LayerNorm β")
    }

    pub fn normalize(&mut self, input: &Matrix) -> Matrix {
        let mean = input.mean_rows();
        let variance = input.variance_rows(&mean);
        let eps = self.epsilon;
        let inv_std = variance.map(|v| 1.0 / (v + eps).sqrt());

        let normalized = input.sub_col(&mean).mul_col(&inv_std);
        let output = normalized.mul_row(&self.gamma).add_row(&self.beta);

        self.cached_normalized = Some(normalized);
        self.cached_mean = Some(mean);
        self.cached_variance = Some(variance);

        output
    }

    /// 上一次前向传播输入的每行均值
    pub fn cached_mean(&self) -> Option<&Matrix> {
        self.cached_mean.as_ref()
    }

    fn backward_approx(&mut self, grads: &Matrix, lr: f32) -> Matrix {
        let (Some(normalized), Some(variance)) =
            (self.cached_normalized.as_ref(), self.cached_variance.as_ref())
        else {
            log::warn!("LayerNorm.backward 在未执行 forward 的情况下被调用，直接传递梯度");
            return grads.clone();
        };

        let eps = self.epsilon;
        let inv_std = variance.map(|v| 1.0 / (v + eps).sqrt());
        let grad_input = grads
            .sub_col(&grads.mean_rows())
            .mul_row(&self.gamma)
            .mul_col(&inv_std);

        let grad_gamma = normalized.mul_elwise(grads).col_sum();
        let grad_beta = grads.col_sum();
        self.gamma.apply_gradient(&grad_gamma, lr);
        self.beta.apply_gradient(&grad_beta, lr);

        grad_input
    }
}

impl Layer for LayerNorm {
    fn layer_type(&self) -> &str {
        "LayerNorm"
    }

    fn forward(&mut self, input: &Matrix) -> Matrix {
        self.normalize(input)
    }

    fn backward(&mut self, grads: &Matrix, lr: f32) -> Matrix {
        self.backward_approx(grads, lr)
    }

    fn parameters(&self) -> usize {
        self.gamma.cols() + self.beta.cols()
    }
}
