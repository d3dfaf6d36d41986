//! # 错误类型
//!
//! 可恢复的失败（文件读写、序列化、配置校验、数据集解析）统一用 [`ModelError`] 表示。
//! 形状不匹配等编程错误不在此列，它们会直接 panic。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 解析失败: {0}")]
    Json(#[from] serde_json::Error),

    #[error("二进制编码失败: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("二进制解码失败: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("矩阵形状错误: {0}")]
    Shape(String),

    #[error("词汇表缺少特殊 token: {0}")]
    MissingSpecialToken(&'static str),

    #[error("配置无效: {0}")]
    Config(String),

    #[error("无法解析标签 {path}: {reason}")]
    Label { path: String, reason: String },

    #[error("特征提取失败: {0}")]
    Feature(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
