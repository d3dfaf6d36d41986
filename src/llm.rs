//! # 语言模型（LLM）
//!
//! 把词嵌入、若干 Transformer 块和共享权重的输出投影串成一个完整的自回归语言模型。
//!
//! ```text
//! onehot ─► onehot·E + P ─► Block₁ ─► … ─► Blockₙ ─► hidden·Eᵀ ─► softmax ─► probs
//! ```
//!
//! 训练按滑动窗口逐步进行：每个窗口做一次前向、计算与下一 token 的交叉熵、反向并更新参数。
//! 生成时每次取最后一个有效位置的 arg-max，填入窗口后继续。

use crate::{
    MAX_NEW_TOKENS,
    config::ModelConfig,
    embeddings::Embeddings,
    error::{ModelError, Result},
    matrix::Matrix,
    tokenizer::BREAK_LINE,
    training_observer::{LogObserver, TrainingEvent, TrainingObserver},
    transformer::TransformerBlock,
    utils::shuffle,
    vocab::{EOW, Vocab},
};

/// **可反向传播的层**
///
/// `backward` 接收输出梯度，按学习率更新自身参数，并返回输入梯度。
pub trait Layer {
    fn layer_type(&self) -> &str;

    fn forward(&mut self, input: &Matrix) -> Matrix;

    fn backward(&mut self, grads: &Matrix, lr: f32) -> Matrix;

    fn parameters(&self) -> usize;
}

#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Debug)]
pub struct LLM {
    pub vocab: Vocab,
    pub config: ModelConfig,
    pub embeddings: Embeddings,
    pub blocks: Vec<TransformerBlock>,
}

impl LLM {
    /// **随机初始化一个新模型**
    pub fn new(vocab: Vocab, config: ModelConfig) -> Result<Self> {
        config.validate()?;

        let embeddings = Embeddings::new(
            vocab.len(),
            config.context_len,
            config.embedding_dim,
            vocab.pad_index(),
        );
        let blocks = (0..config.num_layers)
            .map(|_| {
                TransformerBlock::new(
                    config.context_len,
                    config.embedding_dim,
                    config.head_dim,
                    config.num_heads,
                    config.hidden_multiplier,
                    config.leaky_alpha,
                )
            })
            .collect();

        log::info!(
            "创建模型: {} 层, 上下文 {}, 嵌入维度 {}, {} 个注意力头 × {} 维, 词表 {}",
            config.num_layers,
            config.context_len,
            config.embedding_dim,
            config.num_heads,
            config.head_dim,
            vocab.len()
        );

        Ok(Self {
            vocab,
            config,
            embeddings,
            blocks,
        })
    }

    /// **由已有组件组装模型（反序列化）**
    ///
    /// 校验各组件与配置一致，按配置的上下文长度重建因果掩码，并清零 padding 行。
    pub fn from_parts(
        vocab: Vocab,
        config: ModelConfig,
        mut embeddings: Embeddings,
        mut blocks: Vec<TransformerBlock>,
    ) -> Result<Self> {
        config.validate()?;

        if embeddings.vocab_size() != vocab.len() {
            return Err(ModelError::Shape(format!(
                "词嵌入表有 {} 行, 词表有 {} 个 token",
                embeddings.vocab_size(),
                vocab.len()
            )));
        }
        if embeddings.embedding_dim() != config.embedding_dim
            || embeddings.context_len() != config.context_len
        {
            return Err(ModelError::Shape(format!(
                "嵌入形状 ({}, {}) 与配置 (ctx={}, dim={}) 不一致",
                embeddings.context_len(),
                embeddings.embedding_dim(),
                config.context_len,
                config.embedding_dim
            )));
        }
        embeddings
            .positional
            .check_shape((config.context_len, config.embedding_dim), "位置嵌入")?;
        if blocks.len() != config.num_layers {
            return Err(ModelError::Shape(format!(
                "配置为 {} 层, 实际 {} 个 Transformer 块",
                config.num_layers,
                blocks.len()
            )));
        }

        for (i, block) in blocks.iter_mut().enumerate() {
            block.check_shapes(&config).map_err(|e| match e {
                ModelError::Shape(msg) => ModelError::Shape(format!("第 {} 个块: {}", i, msg)),
                other => other,
            })?;
            block.attention.rebuild_causal_mask(config.context_len);
        }
        embeddings.pad_index = vocab.pad_index();
        embeddings.zero_padding_row();

        Ok(Self {
            vocab,
            config,
            embeddings,
            blocks,
        })
    }

    pub fn context_len(&self) -> usize {
        self.config.context_len
    }

    pub fn network_description(&self) -> String {
        let mut parts = vec!["Embeddings".to_string()];
        parts.extend(self.blocks.iter().map(|b| b.layer_type().to_string()));
        parts.push("TiedProjection".to_string());
        parts.join(", ")
    }

    pub fn total_parameters(&self) -> usize {
        self.embeddings.parameters()
            + self
                .blocks
                .iter()
                .map(|block| block.parameters())
                .sum::<usize>()
    }

    /// 文本 → token 编号
    pub fn encode(&self, text: &str) -> Vec<usize> {
        self.vocab.encode(text)
    }

    pub fn one_hot(&self, marks: &[usize]) -> Matrix {
        Matrix::one_hot(marks, self.vocab.len())
    }

    // ========================================================================
    // 前向 / 反向
    // ========================================================================

    /// **前向传播**
    ///
    /// 输入为 (context_len × vocab) 的 one-hot 矩阵，返回每个位置下一 token 的概率分布。
    pub fn forward(&mut self, one_hot: &Matrix) -> Matrix {
        let mut hidden = self.embeddings.embed(one_hot);
        for block in &mut self.blocks {
            hidden = block.forward(&hidden);
        }
        self.embeddings.project(&hidden).softmax()
    }

    /// **反向传播**
    ///
    /// `grad_logits` 为 softmax + 交叉熵合并后的梯度 `probs - target`。
    /// 依次更新所有 Transformer 块（逆序）、位置嵌入和词嵌入。
    pub fn backward(&mut self, grad_logits: &Matrix, lr: f32) {
        let mut grad = self.embeddings.hidden_gradient(grad_logits);
        for block in self.blocks.iter_mut().rev() {
            grad = block.backward(&grad, lr);
        }
        self.embeddings.apply_gradients(&grad, grad_logits, lr);
    }

    // ========================================================================
    // 训练
    // ========================================================================

    /// 在单条文本上训练，进度通过 `log` 输出，返回窗口平均损失
    pub fn learn(&mut self, text: &str, lr: f32, tag: &str) -> f32 {
        self.learn_observed(text, lr, tag, 0, &mut LogObserver)
    }

    /// **在单条文本上训练**
    ///
    /// 1. 编码后在末尾补 `</pad>`，直到长度超过上下文长度
    /// 2. 窗口每次右移一位，`[i, i+ctx)` 预测 `[i+1, i+1+ctx)`
    /// 3. 每个窗口做一次前向 + 反向更新
    pub fn learn_observed(
        &mut self,
        text: &str,
        lr: f32,
        tag: &str,
        epoch: usize,
        observer: &mut dyn TrainingObserver,
    ) -> f32 {
        let ctx = self.context_len();
        let mut marks = self.encode(text);
        while marks.len() <= ctx {
            marks.push(self.vocab.pad_index());
        }
        let one_hot = self.one_hot(&marks);

        let mut total_loss = 0.0;
        let mut windows = 0;
        let mut i = 0;
        while i + 1 + ctx <= marks.len() {
            let input = one_hot.slice_rows(i, i + ctx);
            let target = one_hot.slice_rows(i + 1, i + 1 + ctx);

            let probs = self.forward(&input);
            let loss = probs.cross_entropy(&target);
            observer.on_step(&TrainingEvent {
                tag,
                epoch,
                step: i,
                loss,
            });
            self.backward(&probs.sub(&target), lr);

            total_loss += loss;
            windows += 1;
            i += 1;
        }

        total_loss / windows as f32
    }

    /// **多轮训练**
    ///
    /// 每个 epoch 开始前打乱样本顺序，返回每个 epoch 的平均损失。
    pub fn train<S: AsRef<str>>(
        &mut self,
        texts: &[S],
        epochs: usize,
        lr: f32,
        observer: &mut dyn TrainingObserver,
    ) -> Vec<f32> {
        let mut order: Vec<usize> = (0..texts.len()).collect();
        let mut epoch_losses = Vec::with_capacity(epochs);

        for epoch in 0..epochs {
            shuffle(&mut order);

            let mut total_loss = 0.0;
            for &index in &order {
                let tag = format!("{} {}", epoch, index);
                total_loss += self.learn_observed(texts[index].as_ref(), lr, &tag, epoch, observer);
            }

            let mean_loss = if order.is_empty() {
                0.0
            } else {
                total_loss / order.len() as f32
            };
            observer.on_epoch_end(epoch, mean_loss);
            epoch_losses.push(mean_loss);
        }

        epoch_losses
    }

    // ========================================================================
    // 生成
    // ========================================================================

    pub fn query(&mut self, prompt: &str) -> String {
        self.query_with_budget(prompt, MAX_NEW_TOKENS)
    }

    /// **贪心生成**
    ///
    /// 提示词不足一个窗口时在末尾补 `</pad>`，新 token 先依次填满这些位置，
    /// 之后追加在末尾并让窗口右移。提示词超过窗口长度时只保留最后 `context_len` 个 token。
    /// 填充 padding 位置不计入预算，只有窗口右移才计入。
    pub fn query_with_budget(&mut self, prompt: &str, max_new_tokens: usize) -> String {
        let mut output = String::new();
        for next in self.generate(prompt, max_new_tokens) {
            self.decode_into(next, &mut output);
        }
        output
    }

    /// 生成 token 编号序列，规则同 [`LLM::query_with_budget`]
    pub fn generate(&mut self, prompt: &str, max_new_tokens: usize) -> Vec<usize> {
        let marks = self.encode(prompt);
        if marks.is_empty() {
            log::warn!("提示词编码后为空，不进行生成");
            return Vec::new();
        }

        let mut window = GenerationWindow::new(marks, self.context_len(), self.vocab.pad_index());
        let mut generated = Vec::new();
        let mut appended = 0;
        while appended < max_new_tokens {
            let input = self.one_hot(window.tokens());
            let probs = self.forward(&input);
            let (_, next) = probs.row(window.prediction_row()).max_index();

            if window.push(next) {
                appended += 1;
            }
            generated.push(next);
        }
        generated
    }

    /// 把生成的 token 追加为文本
    fn decode_into(&self, index: usize, output: &mut String) {
        if index == self.vocab.pad_index() {
            return;
        }
        let Some(token) = self.vocab.token(index) else {
            return;
        };

        if let Some(word) = token.strip_suffix(EOW) {
            output.push_str(word);
            output.push(' ');
        } else if token == BREAK_LINE {
            output.push('\n');
        } else {
            output.push_str(token);
        }
    }
}

/// **生成窗口**
///
/// 维护长度固定为 `context_len` 的输入窗口：
///
/// ```text
/// 提示词 [a b]，ctx = 4  →  [a b pad pad]   预测第 1 行
/// push(x)                →  [a b x pad]     预测第 2 行
/// push(y)                →  [a b x y]       预测第 3 行
/// push(z)                →  [b x y z]       窗口右移
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationWindow {
    marks: Vec<usize>,
    start: usize,
    pad_count: usize,
    context_len: usize,
}

impl GenerationWindow {
    pub fn new(mut marks: Vec<usize>, context_len: usize, pad_index: usize) -> Self {
        let start = marks.len().saturating_sub(context_len);
        let mut pad_count = 0;
        while marks.len() - start < context_len {
            marks.push(pad_index);
            pad_count += 1;
        }
        Self {
            marks,
            start,
            pad_count,
            context_len,
        }
    }

    /// 当前窗口内的 token
    pub fn tokens(&self) -> &[usize] {
        &self.marks[self.start..self.start + self.context_len]
    }

    /// 剩余的 padding 位置数
    pub fn pad_count(&self) -> usize {
        self.pad_count
    }

    /// 读取下一 token 预测的行：最后一个非 padding 位置
    pub fn prediction_row(&self) -> usize {
        self.context_len - self.pad_count - 1
    }

    /// 放入新 token。填充 padding 位置返回 `false`，追加并右移窗口返回 `true`
    pub fn push(&mut self, next: usize) -> bool {
        if self.pad_count > 0 {
            let slot = self.marks.len() - self.pad_count;
            self.marks[slot] = next;
            self.pad_count -= 1;
            false
        } else {
            self.marks.push(next);
            self.start += 1;
            true
        }
    }
}
