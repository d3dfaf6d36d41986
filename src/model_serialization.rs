// ============================================================================
// 模型序列化模块 - 支持二进制和 JSON 两种格式
// ============================================================================
//
// 1. **二进制格式** (推荐用于训练中间结果):
//    - 使用 bincode 序列化，文件小、速度快
//    - 权重逐位精确还原
//    - 文件扩展名: .bin
//
// 2. **JSON 格式** (推荐用于调试):
//    - 人类可读，方便检查权重
//    - 文件扩展名: .json
//
// 持久化结构按所有权嵌套：模型 → Transformer 块 → 注意力/前馈/归一化 → 矩阵。
// 因果掩码不保存，加载时按配置中的上下文长度重建；padding 行加载后重新清零。
//
// ============================================================================

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::{
    classifier::MlpClassifier,
    config::ModelConfig,
    embeddings::Embeddings,
    error::{ModelError, Result},
    feed_forward::{AffineLayer, Mlp},
    layer_norm::LayerNorm,
    llm::LLM,
    matrix::Matrix,
    self_attention::{AttentionHead, MultiHeadAttention},
    transformer::TransformerBlock,
    vocab::Vocab,
};

/// 当前持久化格式版本
pub const FORMAT_VERSION: u32 = 1;

// ============================================================================
// 矩阵
// ============================================================================

#[derive(Clone, Debug, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub struct SerializableMatrix {
    pub shape: (usize, usize),
    pub data: Vec<f32>,
}

impl SerializableMatrix {
    pub fn from_matrix(matrix: &Matrix) -> Self {
        Self {
            shape: matrix.shape(),
            data: matrix.to_vec(),
        }
    }

    pub fn to_matrix(&self) -> Result<Matrix> {
        Matrix::from_shape_vec(self.shape.0, self.shape.1, self.data.clone())
    }
}

// ============================================================================
// 各层的可序列化表示
// ============================================================================

#[derive(Clone, Debug, Encode, Decode, Serialize, Deserialize)]
pub struct SerializableAttentionHead {
    pub w_q: SerializableMatrix,
    pub w_k: SerializableMatrix,
    pub w_v: SerializableMatrix,
    pub scale: f32,
}

impl SerializableAttentionHead {
    pub fn from_head(head: &AttentionHead) -> Self {
        Self {
            w_q: SerializableMatrix::from_matrix(&head.w_q),
            w_k: SerializableMatrix::from_matrix(&head.w_k),
            w_v: SerializableMatrix::from_matrix(&head.w_v),
            scale: head.scale,
        }
    }

    pub fn to_head(&self) -> Result<AttentionHead> {
        let mut head = AttentionHead::from_weights(
            self.w_q.to_matrix()?,
            self.w_k.to_matrix()?,
            self.w_v.to_matrix()?,
        );
        head.scale = self.scale;
        Ok(head)
    }
}

#[derive(Clone, Debug, Encode, Decode, Serialize, Deserialize)]
pub struct SerializableAttention {
    pub heads: Vec<SerializableAttentionHead>,
    pub w_o: SerializableMatrix,
}

impl SerializableAttention {
    pub fn from_attention(attention: &MultiHeadAttention) -> Self {
        Self {
            heads: attention
                .heads
                .iter()
                .map(SerializableAttentionHead::from_head)
                .collect(),
            w_o: SerializableMatrix::from_matrix(&attention.w_o),
        }
    }

    pub fn to_attention(&self, context_len: usize) -> Result<MultiHeadAttention> {
        let heads = self
            .heads
            .iter()
            .map(SerializableAttentionHead::to_head)
            .collect::<Result<Vec<_>>>()?;
        Ok(MultiHeadAttention::from_parts(
            heads,
            self.w_o.to_matrix()?,
            context_len,
        ))
    }
}

#[derive(Clone, Debug, Encode, Decode, Serialize, Deserialize)]
pub struct SerializableAffineLayer {
    pub weight: SerializableMatrix,
    pub bias: SerializableMatrix,
}

#[derive(Clone, Debug, Encode, Decode, Serialize, Deserialize)]
pub struct SerializableMlp {
    pub alpha: f32,
    pub layers: Vec<SerializableAffineLayer>,
}

impl SerializableMlp {
    pub fn from_mlp(mlp: &Mlp) -> Self {
        Self {
            alpha: mlp.alpha,
            layers: mlp
                .layers
                .iter()
                .map(|layer| SerializableAffineLayer {
                    weight: SerializableMatrix::from_matrix(&layer.weight),
                    bias: SerializableMatrix::from_matrix(&layer.bias),
                })
                .collect(),
        }
    }

    pub fn to_mlp(&self) -> Result<Mlp> {
        let layers = self
            .layers
            .iter()
            .map(|layer| {
                let weight = layer.weight.to_matrix()?;
                let bias = layer.bias.to_matrix()?;
                if weight.cols() != bias.cols() {
                    return Err(ModelError::Shape(format!(
                        "权重 {:?} 与偏置 {:?} 列数不一致",
                        weight.shape(),
                        bias.shape()
                    )));
                }
                Ok(AffineLayer::from_parts(weight, bias))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Mlp::from_layers(self.alpha, layers))
    }
}

#[derive(Clone, Debug, Encode, Decode, Serialize, Deserialize)]
pub struct SerializableLayerNorm {
    pub epsilon: f32,
    pub gamma: SerializableMatrix,
    pub beta: SerializableMatrix,
}

impl SerializableLayerNorm {
    pub fn from_layer_norm(norm: &LayerNorm) -> Self {
        Self {
            epsilon: norm.epsilon,
            gamma: SerializableMatrix::from_matrix(&norm.gamma),
            beta: SerializableMatrix::from_matrix(&norm.beta),
        }
    }

    pub fn to_layer_norm(&self) -> Result<LayerNorm> {
        Ok(LayerNorm::from_parts(
            self.epsilon,
            self.gamma.to_matrix()?,
            self.beta.to_matrix()?,
        ))
    }
}

#[derive(Clone, Debug, Encode, Decode, Serialize, Deserialize)]
pub struct SerializableTransformerBlock {
    pub attention: SerializableAttention,
    pub feed_forward: SerializableMlp,
    pub norm1: SerializableLayerNorm,
    pub norm2: SerializableLayerNorm,
}

impl SerializableTransformerBlock {
    pub fn from_block(block: &TransformerBlock) -> Self {
        Self {
            attention: SerializableAttention::from_attention(&block.attention),
            feed_forward: SerializableMlp::from_mlp(&block.feed_forward),
            norm1: SerializableLayerNorm::from_layer_norm(&block.norm1),
            norm2: SerializableLayerNorm::from_layer_norm(&block.norm2),
        }
    }

    pub fn to_block(&self, context_len: usize) -> Result<TransformerBlock> {
        Ok(TransformerBlock {
            attention: self.attention.to_attention(context_len)?,
            feed_forward: self.feed_forward.to_mlp()?,
            norm1: self.norm1.to_layer_norm()?,
            norm2: self.norm2.to_layer_norm()?,
        })
    }
}

// ============================================================================
// 完整模型
// ============================================================================

#[derive(Clone, Debug, Encode, Decode, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub vocab_size: usize,
    pub total_parameters: usize,
    pub network: String,
}

#[derive(Clone, Debug, Encode, Decode, Serialize, Deserialize)]
pub struct SerializableModel {
    pub version: u32,
    pub config: ModelConfig,
    /// 排序后的 token 列表
    pub vocab: Vec<String>,
    pub token_embeddings: SerializableMatrix,
    pub positional: SerializableMatrix,
    pub blocks: Vec<SerializableTransformerBlock>,
    pub metadata: ModelMetadata,
}

impl SerializableModel {
    pub fn from_model(model: &LLM) -> Self {
        Self {
            version: FORMAT_VERSION,
            config: model.config.clone(),
            vocab: model.vocab.tokens().to_vec(),
            token_embeddings: SerializableMatrix::from_matrix(&model.embeddings.token_embeddings),
            positional: SerializableMatrix::from_matrix(&model.embeddings.positional),
            blocks: model
                .blocks
                .iter()
                .map(SerializableTransformerBlock::from_block)
                .collect(),
            metadata: ModelMetadata {
                vocab_size: model.vocab.len(),
                total_parameters: model.total_parameters(),
                network: model.network_description(),
            },
        }
    }

    pub fn to_model(&self) -> Result<LLM> {
        if self.version != FORMAT_VERSION {
            log::warn!(
                "模型文件版本 {} 与当前版本 {} 不同，尝试继续加载",
                self.version,
                FORMAT_VERSION
            );
        }

        let vocab = Vocab::from_tokens(self.vocab.clone())?;
        let context_len = self.config.context_len;
        let embeddings = Embeddings::from_parts(
            self.token_embeddings.to_matrix()?,
            self.positional.to_matrix()?,
            vocab.pad_index(),
        );
        let blocks = self
            .blocks
            .iter()
            .map(|block| block.to_block(context_len))
            .collect::<Result<Vec<_>>>()?;

        LLM::from_parts(vocab, self.config.clone(), embeddings, blocks)
    }
}

fn log_file_size(path: &Path) -> Result<()> {
    let file_size = std::fs::metadata(path)?.len();
    log::info!("   文件大小: {:.2} MB", file_size as f64 / 1_048_576.0);
    Ok(())
}

/// 保存模型到二进制文件
pub fn save_model_binary<P: AsRef<Path>>(model: &LLM, path: P) -> Result<()> {
    log::info!("💾 保存模型到二进制文件: {:?}", path.as_ref());

    let serializable_model = SerializableModel::from_model(model);
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    let config = bincode::config::standard();
    bincode::encode_into_std_write(&serializable_model, &mut writer, config)?;
    drop(writer);

    log_file_size(path.as_ref())?;
    log::info!("✅ 模型保存成功");
    Ok(())
}

/// 从二进制文件加载模型
pub fn load_model_binary<P: AsRef<Path>>(path: P) -> Result<LLM> {
    log::info!("📂 从二进制文件加载模型: {:?}", path.as_ref());

    let mut reader = BufReader::new(File::open(path.as_ref())?);
    let config = bincode::config::standard();
    let serializable_model: SerializableModel = bincode::decode_from_std_read(&mut reader, config)?;

    let model = serializable_model.to_model()?;
    log::info!(
        "✅ 模型加载成功: 词汇量 {}, 总参数 {}",
        model.vocab.len(),
        model.total_parameters()
    );
    Ok(model)
}

/// 保存模型到 JSON 文件
pub fn save_model_json<P: AsRef<Path>>(model: &LLM, path: P) -> Result<()> {
    log::info!("💾 保存模型到 JSON 文件: {:?}", path.as_ref());

    let serializable_model = SerializableModel::from_model(model);
    let writer = BufWriter::new(File::create(path.as_ref())?);
    serde_json::to_writer_pretty(writer, &serializable_model)?;

    log_file_size(path.as_ref())?;
    log::info!("✅ 模型保存成功");
    Ok(())
}

/// 从 JSON 文件加载模型
pub fn load_model_json<P: AsRef<Path>>(path: P) -> Result<LLM> {
    log::info!("📂 从 JSON 文件加载模型: {:?}", path.as_ref());

    let reader = BufReader::new(File::open(path.as_ref())?);
    let serializable_model: SerializableModel = serde_json::from_reader(reader)?;

    let model = serializable_model.to_model()?;
    log::info!(
        "✅ 模型加载成功: 词汇量 {}, 总参数 {}",
        model.vocab.len(),
        model.total_parameters()
    );
    Ok(model)
}

/// 按扩展名自动选择加载方法：`.json` 为 JSON，其余按二进制处理
pub fn load_model_auto<P: AsRef<Path>>(path: P) -> Result<LLM> {
    let is_json = path
        .as_ref()
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        load_model_json(path)
    } else {
        load_model_binary(path)
    }
}

// ============================================================================
// 分类器
// ============================================================================

pub fn save_classifier_json<P: AsRef<Path>>(classifier: &MlpClassifier, path: P) -> Result<()> {
    let writer = BufWriter::new(File::create(path.as_ref())?);
    serde_json::to_writer_pretty(writer, &SerializableMlp::from_mlp(&classifier.network))?;
    log::info!("分类器已保存: {:?}", path.as_ref());
    Ok(())
}

pub fn load_classifier_json<P: AsRef<Path>>(path: P) -> Result<MlpClassifier> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let serializable: SerializableMlp = serde_json::from_reader(reader)?;
    let network = serializable.to_mlp()?;
    network.check_shapes(1)?;
    let classifier = MlpClassifier::from_network(network);
    log::info!("分类器已加载: {:?}", path.as_ref());
    Ok(classifier)
}
