//! # 特征提取
//!
//! 把原始字节转换为分类器使用的单行特征向量。
//!
//! 目前只支持未压缩的 RGB8 像素数据，不解码 JPEG、PNG 等图像格式。
//! 压缩图像需要先在外部转换为原始像素再传入，否则长度校验会失败。

use crate::{
    error::{ModelError, Result},
    matrix::Matrix,
};

pub trait FeatureExtractor {
    /// 原始字节 → 特征 (1 × features)
    fn extract(&self, bytes: &[u8]) -> Result<Matrix>;

    fn feature_len(&self) -> usize;
}

/// **RGB8 → 灰度**
///
/// 输入为按行排列、交错存储的 RGB8 像素 (`width · height · 3` 字节)，
/// 每个像素输出一个 [0, 1] 范围内的亮度值：
///
/// ```text
/// gray = (0.3·r + 0.585·g + 0.115·b) / 255
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GrayscaleExtractor {
    pub width: usize,
    pub height: usize,
}

impl GrayscaleExtractor {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }
}

fn luminance(pixel: &[u8]) -> f32 {
    (0.3 * pixel[0] as f32 + 0.585 * pixel[1] as f32 + 0.115 * pixel[2] as f32) / 255.0
}

impl FeatureExtractor for GrayscaleExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Matrix> {
        let expected = self.width * self.height * 3;
        if bytes.len() != expected {
            return Err(ModelError::Feature(format!(
                "期望 {}x{} 的 RGB8 数据 ({} 字节)，实际 {} 字节",
                self.width,
                self.height,
                expected,
                bytes.len()
            )));
        }

        let gray: Vec<f32> = bytes.chunks_exact(3).map(luminance).collect();
        Matrix::from_shape_vec(1, gray.len(), gray)
    }

    fn feature_len(&self) -> usize {
        self.width * self.height
    }
}
