//! # 全连接层与多层感知机（Affine Layer / MLP）
//!
//! Transformer 块中的前馈网络和独立的 MLP 分类器都由这里的两个类型组成。
//!
//! ## 仿射层
//!
//! ```text
//! output = x · W + B
//! ```
//!
//! 其中：
//! - `x`: 输入 (batch_rows, fan_in)
//! - `W`: 权重 (fan_in, fan_out)，He 初始化
//! - `B`: 偏置 (batch_rows, fan_out)，全零初始化，每个输入行有独立的偏置
//!
//! ## 反向传播
//!
//! ```text
//! grad_input  = grad_output · Wᵀ
//! grad_W      = xᵀ · grad_output
//! grad_B      = grad_output
//! ```
//!
//! 提供两种变体：
//! - [`AffineLayer::gradients`]：只计算梯度，不修改参数（批量训练时先累积再统一更新）
//! - [`AffineLayer::backward_and_update`]：计算梯度后立即按学习率更新（在线训练）
//!
//! ## MLP
//!
//! 若干仿射层顺序连接，层与层之间插入 Leaky ReLU：
//!
//! ```text
//! x → L₀ → LeakyReLU → L₁ → LeakyReLU → ... → Lₙ → output
//! ```
//!
//! 最后一层之后不加激活，输出直接交给后续的 softmax 或残差连接。

use crate::{
    error::{ModelError, Result},
    llm::Layer,
    matrix::Matrix,
};

/// **单个仿射层的梯度**
#[derive(Clone, Debug)]
pub struct LayerGradients {
    /// 对输入的梯度，传给上一层
    pub input: Matrix,
    pub weight: Matrix,
    pub bias: Matrix,
}

impl LayerGradients {
    /// 把另一组梯度累加进来（批量训练）
    pub fn accumulate(&mut self, other: &LayerGradients) {
        self.input = self.input.add(&other.input);
        self.weight = self.weight.add(&other.weight);
        self.bias = self.bias.add(&other.bias);
    }

    pub fn scale(&mut self, factor: f32) {
        self.input = self.input.scale(factor);
        self.weight = self.weight.scale(factor);
        self.bias = self.bias.scale(factor);
    }
}

/// **仿射层**
#[derive(Clone, Debug)]
pub struct AffineLayer {
    /// 权重 W: (fan_in, fan_out)
    pub weight: Matrix,

    /// 偏置 B: (batch_rows, fan_out)
    pub bias: Matrix,

    // ========== 前向传播缓存 ==========
    cached_input: Option<Matrix>,
    cached_output: Option<Matrix>,
}

impl AffineLayer {
    /// **创建仿射层**
    ///
    /// # 参数
    /// - `batch_rows`: 每次前向传播的输入行数（语言模型中为上下文长度，分类器中为 1）
    /// - `fan_in`: 输入维度
    /// - `fan_out`: 输出维度
    pub fn new(batch_rows: usize, fan_in: usize, fan_out: usize) -> Self {
        Self::from_parts(Matrix::random(fan_in, fan_out), Matrix::zeros(batch_rows, fan_out))
    }

    /// 由已有参数构造（反序列化、测试）
    pub fn from_parts(weight: Matrix, bias: Matrix) -> Self {
        assert_eq!(
            weight.cols(),
            bias.cols(),
            "权重列数 {} 与偏置列数 {} 不一致",
            weight.cols(),
            bias.cols()
        );
        Self {
            weight,
            bias,
            cached_input: None,
            cached_output: None,
        }
    }

    pub fn fan_in(&self) -> usize {
        self.weight.rows()
    }

    pub fn fan_out(&self) -> usize {
        self.weight.cols()
    }

    /// 上一次前向传播的输出（激活前）
    pub fn output(&self) -> Option<&Matrix> {
        self.cached_output.as_ref()
    }

    pub fn forward(&mut self, input: &Matrix) -> Matrix {
        let output = input.mul(&self.weight).add(&self.bias);
        self.cached_input = Some(input.clone());
        self.cached_output = Some(output.clone());
        output
    }

    /// **只计算梯度，不修改参数**
    pub fn gradients(&self, grad_output: &Matrix) -> LayerGradients {
        let Some(input) = self.cached_input.as_ref() else {
            panic!("AffineLayer::gradients 在 forward 之前被调用");
        };
        LayerGradients {
            input: grad_output.mul(&self.weight.transpose()),
            weight: input.transpose().mul(grad_output),
            bias: grad_output.clone(),
        }
    }

    /// 应用外部累积好的梯度
    pub fn update(&mut self, grads: &LayerGradients, lr: f32) {
        self.weight.apply_gradient(&grads.weight, lr);
        self.bias.apply_gradient(&grads.bias, lr);
    }

    /// **计算梯度并立即更新参数**
    ///
    /// 返回的输入梯度基于更新前的权重。
    pub fn backward_and_update(&mut self, grad_output: &Matrix, lr: f32) -> Matrix {
        let grads = self.gradients(grad_output);
        self.update(&grads, lr);
        grads.input
    }
}

impl Layer for AffineLayer {
    fn layer_type(&self) -> &str {
        "Affine"
    }

    fn forward(&mut self, input: &Matrix) -> Matrix {
        AffineLayer::forward(self, input)
    }

    fn backward(&mut self, grads: &Matrix, lr: f32) -> Matrix {
        self.backward_and_update(grads, lr)
    }

    fn parameters(&self) -> usize {
        self.weight.rows() * self.weight.cols() + self.bias.rows() * self.bias.cols()
    }
}

/// **多层感知机**
#[derive(Clone, Debug)]
pub struct Mlp {
    /// Leaky ReLU 负半轴斜率
    pub alpha: f32,
    pub layers: Vec<AffineLayer>,
}

impl Mlp {
    /// **创建 MLP**
    ///
    /// `widths` 为各层输出宽度，第一层的输入宽度为 `fan_in`，
    /// 之后每层的输入宽度是上一层的输出宽度。
    ///
    /// ```text
    /// Mlp::new(0.01, ctx, 192, &[1536, 192])   // 192 → 1536 → 192
    /// ```
    pub fn new(alpha: f32, batch_rows: usize, fan_in: usize, widths: &[usize]) -> Self {
        let mut layers = Vec::with_capacity(widths.len());
        let mut input_width = fan_in;
        for &width in widths {
            layers.push(AffineLayer::new(batch_rows, input_width, width));
            input_width = width;
        }
        Self { alpha, layers }
    }

    pub fn from_layers(alpha: f32, layers: Vec<AffineLayer>) -> Self {
        Self { alpha, layers }
    }

    pub fn forward(&mut self, input: &Matrix) -> Matrix {
        let alpha = self.alpha;
        let mut hidden = input.clone();
        for (i, layer) in self.layers.iter_mut().enumerate() {
            if i > 0 {
                hidden = hidden.leaky_relu(alpha);
            }
            hidden = layer.forward(&hidden);
        }
        hidden
    }

    /// 第 `index` 层输出处的激活导数
    fn activation_derivative(&self, index: usize) -> Matrix {
        let Some(output) = self.layers[index].output() else {
            panic!("Mlp 第 {} 层缺少前向缓存", index);
        };
        output.leaky_relu_derivative(self.alpha)
    }

    /// **只计算各层梯度，不修改参数**
    ///
    /// 返回值与 `layers` 一一对应；第 0 项的 `input` 即整个 MLP 对输入的梯度。
    pub fn gradients(&self, grad_output: &Matrix) -> Vec<LayerGradients> {
        let mut grads = Vec::with_capacity(self.layers.len());
        let mut delta = grad_output.clone();
        for i in (0..self.layers.len()).rev() {
            let layer_grads = self.layers[i].gradients(&delta);
            delta = layer_grads.input.clone();
            if i > 0 {
                delta = delta.mul_elwise(&self.activation_derivative(i - 1));
            }
            grads.push(layer_grads);
        }
        grads.reverse();
        grads
    }

    pub fn update(&mut self, grads: &[LayerGradients], lr: f32) {
        assert_eq!(grads.len(), self.layers.len(), "梯度数量与层数不一致");
        for (layer, layer_grads) in self.layers.iter_mut().zip(grads) {
            layer.update(layer_grads, lr);
        }
    }

    /// **校验参数形状**
    ///
    /// 至少一层，相邻层宽度首尾相接，每层偏置为 `batch_rows × fan_out`。
    pub fn check_shapes(&self, batch_rows: usize) -> Result<()> {
        if self.layers.is_empty() {
            return Err(ModelError::Shape("MLP 至少需要一层".to_string()));
        }
        for (i, layer) in self.layers.iter().enumerate() {
            if i > 0 && layer.fan_in() != self.layers[i - 1].fan_out() {
                return Err(ModelError::Shape(format!(
                    "MLP 第 {} 层输入宽度 {} 与上一层输出宽度 {} 不一致",
                    i,
                    layer.fan_in(),
                    self.layers[i - 1].fan_out()
                )));
            }
            layer
                .bias
                .check_shape((batch_rows, layer.fan_out()), &format!("MLP 第 {} 层偏置", i))?;
        }
        Ok(())
    }

    pub fn fan_in(&self) -> usize {
        self.layers.first().map(AffineLayer::fan_in).unwrap_or(0)
    }

    pub fn fan_out(&self) -> usize {
        self.layers.last().map(AffineLayer::fan_out).unwrap_or(0)
    }

    /// **逐层反向传播并立即更新**
    pub fn backward_and_update(&mut self, grad_output: &Matrix, lr: f32) -> Matrix {
        let mut delta = grad_output.clone();
        for i in (0..self.layers.len()).rev() {
            delta = self.layers[i].backward_and_update(&delta, lr);
            if i > 0 {
                delta = delta.mul_elwise(&self.activation_derivative(i - 1));
            }
        }
        delta
    }
}

impl Layer for Mlp {
    fn layer_type(&self) -> &str {
        "MLP"
    }

    fn forward(&mut self, input: &Matrix) -> Matrix {
        Mlp::forward(self, input)
    }

    fn backward(&mut self, grads: &Matrix, lr: f32) -> Matrix {
        self.backward_and_update(grads, lr)
    }

    fn parameters(&self) -> usize {
        self.layers.iter().map(Layer::parameters).sum()
    }
}
