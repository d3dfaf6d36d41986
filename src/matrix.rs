//! # 稠密矩阵（Matrix）
//!
//! 整个引擎唯一的数值容器。所有层的参数、激活值和梯度都是 `Matrix`。
//!
//! ## 约定
//!
//! - 内部存储为 `ndarray::Array2<f32>`，天然是矩形的，行列数都可以为 0
//! - 除 [`Matrix::randomize`] 和 [`Matrix::apply_gradient`] 外，所有运算都返回新矩阵
//! - 形状不匹配属于编程错误，直接 panic 并给出两侧形状
//!
//! ## 常用运算一览
//!
//! ```text
//! mul         矩阵乘法        (m×k)·(k×n) → m×n
//! add/sub     逐元素加减      形状必须完全一致
//! mul_elwise  逐元素乘法（Hadamard 积）
//! softmax     按行归一化为概率分布
//! split       按列等宽切分，concat 为其逆运算
//! ```

use ndarray::{Array2, ArrayView1, Axis, concatenate, s};

use crate::{
    LOG_EPSILON,
    error::{ModelError, Result},
    utils::sample_normal,
};

#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    data: Array2<f32>,
}

impl From<Array2<f32>> for Matrix {
    fn from(data: Array2<f32>) -> Self {
        Self { data }
    }
}

impl Matrix {
    /// 全零矩阵
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            data: Array2::zeros((rows, cols)),
        }
    }

    /// 由若干等长行构造矩阵，各行长度不一致时 panic
    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Self {
        let cols = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            assert_eq!(
                row.len(),
                cols,
                "第 {} 行长度为 {}，与首行长度 {} 不一致",
                i,
                row.len(),
                cols
            );
            data.extend_from_slice(row);
        }
        Self {
            data: Array2::from_shape_vec((rows.len(), cols), data)
                .unwrap_or_else(|e| panic!("构造矩阵失败: {}", e)),
        }
    }

    /// 由扁平数据构造矩阵（行优先），用于反序列化
    pub fn from_shape_vec(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        let len = data.len();
        Array2::from_shape_vec((rows, cols), data)
            .map(Self::from)
            .map_err(|e| ModelError::Shape(format!("{}×{} 需要 {} 个元素, 实际 {}: {}", rows, cols, rows * cols, len, e)))
    }

    /// 随机初始化的矩阵，见 [`Matrix::randomize`]
    pub fn random(rows: usize, cols: usize) -> Self {
        let mut m = Self::zeros(rows, cols);
        m.randomize();
        m
    }

    /// **原地随机初始化**
    ///
    /// 每个元素独立采样自标准正态分布，再乘以 `sqrt(2 / rows)`。
    /// 权重矩阵的行数就是输入维度（fan-in），所以这正是 He 初始化。
    pub fn randomize(&mut self) {
        let rows = self.rows();
        if rows == 0 {
            return;
        }
        let scale = (2.0 / rows as f32).sqrt();
        let mut rng = rand::rng();
        self.data
            .mapv_inplace(|_| sample_normal(&mut rng, 0.0, 1.0) * scale);
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// 形状不符时返回 [`ModelError::Shape`]，用于校验加载的参数
    pub fn check_shape(&self, expected: (usize, usize), name: &str) -> Result<()> {
        if self.shape() != expected {
            return Err(ModelError::Shape(format!(
                "{} 应为 {:?}, 实际 {:?}",
                name,
                expected,
                self.shape()
            )));
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[[row, col]]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.data[[row, col]] = value;
    }

    /// 第 `index` 行，作为 1×cols 矩阵返回
    pub fn row(&self, index: usize) -> Matrix {
        self.data.row(index).to_owned().insert_axis(Axis(0)).into()
    }

    pub fn row_view(&self, index: usize) -> ArrayView1<'_, f32> {
        self.data.row(index)
    }

    /// 把某一行整体置为常数（词嵌入的 padding 行需要保持为 0）
    pub fn fill_row(&mut self, index: usize, value: f32) {
        self.data.row_mut(index).fill(value);
    }

    /// 取 `[start, end)` 行
    pub fn slice_rows(&self, start: usize, end: usize) -> Matrix {
        self.data.slice(s![start..end, ..]).to_owned().into()
    }

    pub fn array(&self) -> &Array2<f32> {
        &self.data
    }

    pub fn into_array(self) -> Array2<f32> {
        self.data
    }

    /// 行优先的扁平数据拷贝
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }

    pub fn sum(&self) -> f32 {
        self.data.sum()
    }

    // ========================================================================
    // 代数运算
    // ========================================================================

    /// 矩阵乘法 `self · other`
    pub fn mul(&self, other: &Matrix) -> Matrix {
        assert_eq!(
            self.cols(),
            other.rows(),
            "矩阵乘法形状不匹配: {:?} · {:?}",
            self.shape(),
            other.shape()
        );
        self.data.dot(&other.data).into()
    }

    pub fn add(&self, other: &Matrix) -> Matrix {
        self.assert_same_shape(other, "加法");
        (&self.data + &other.data).into()
    }

    pub fn sub(&self, other: &Matrix) -> Matrix {
        self.assert_same_shape(other, "减法");
        (&self.data - &other.data).into()
    }

    /// 逐元素乘法（Hadamard 积）
    pub fn mul_elwise(&self, other: &Matrix) -> Matrix {
        self.assert_same_shape(other, "逐元素乘法");
        (&self.data * &other.data).into()
    }

    pub fn scale(&self, factor: f32) -> Matrix {
        self.data.mapv(|x| x * factor).into()
    }

    pub fn transpose(&self) -> Matrix {
        self.data.t().to_owned().into()
    }

    pub fn map(&self, f: impl Fn(f32) -> f32) -> Matrix {
        self.data.mapv(f).into()
    }

    /// 每一行减去列向量 `col`（rows×1）中对应的值
    pub fn sub_col(&self, col: &Matrix) -> Matrix {
        assert_eq!(
            col.shape(),
            (self.rows(), 1),
            "sub_col 需要 {}×1 的列向量, 实际 {:?}",
            self.rows(),
            col.shape()
        );
        let mut out = self.data.clone();
        for (mut row, &c) in out.rows_mut().into_iter().zip(col.data.column(0)) {
            row.mapv_inplace(|x| x - c);
        }
        out.into()
    }

    /// 每一行乘以列向量 `col`（rows×1）中对应的值
    pub fn mul_col(&self, col: &Matrix) -> Matrix {
        assert_eq!(
            col.shape(),
            (self.rows(), 1),
            "mul_col 需要 {}×1 的列向量, 实际 {:?}",
            self.rows(),
            col.shape()
        );
        let mut out = self.data.clone();
        for (mut row, &c) in out.rows_mut().into_iter().zip(col.data.column(0)) {
            row.mapv_inplace(|x| x * c);
        }
        out.into()
    }

    /// 每一行逐元素乘以行向量 `row`（1×cols）
    pub fn mul_row(&self, row: &Matrix) -> Matrix {
        self.assert_row_vector(row, "mul_row");
        (&self.data * &row.data).into()
    }

    /// 每一行逐元素加上行向量 `row`（1×cols）
    pub fn add_row(&self, row: &Matrix) -> Matrix {
        self.assert_row_vector(row, "add_row");
        (&self.data + &row.data).into()
    }

    // ========================================================================
    // 归约与统计
    // ========================================================================

    /// 按行 softmax。先减去行最大值，避免 exp 溢出。
    pub fn softmax(&self) -> Matrix {
        let mut out = self.data.clone();
        for mut row in out.rows_mut() {
            let max_val = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            row.mapv_inplace(|x| (x - max_val).exp());
            let sum_exp: f32 = row.sum();
            row.mapv_inplace(|x| x / sum_exp);
        }
        out.into()
    }

    /// **交叉熵损失**
    ///
    /// `self` 是预测概率，`truth` 是同形状的目标分布（通常为 one-hot）：
    ///
    /// ```text
    /// loss = -Σ truth · ln(clamp(p, ε, 1-ε)) / rows
    /// ```
    /// 上界用 `1 - f32::EPSILON`：f32 中 `1.0 - 1e-12` 等于 1.0
    pub fn cross_entropy(&self, truth: &Matrix) -> f32 {
        self.assert_same_shape(truth, "交叉熵");
        if self.rows() == 0 {
            return 0.0;
        }
        let total: f32 = self
            .data
            .iter()
            .zip(truth.data.iter())
            .map(|(&p, &t)| t * p.clamp(LOG_EPSILON, 1.0 - f32::EPSILON).ln())
            .sum();
        -total / self.rows() as f32
    }

    /// 每行均值，rows×1
    pub fn mean_rows(&self) -> Matrix {
        let cols = self.cols().max(1) as f32;
        self.data
            .sum_axis(Axis(1))
            .mapv(|s| s / cols)
            .insert_axis(Axis(1))
            .into()
    }

    /// 每行的有偏方差，`mean` 为 [`Matrix::mean_rows`] 的结果
    pub fn variance_rows(&self, mean: &Matrix) -> Matrix {
        let centered = self.sub_col(mean);
        centered.mul_elwise(&centered).mean_rows()
    }

    /// 每列求和，1×cols
    pub fn col_sum(&self) -> Matrix {
        self.data.sum_axis(Axis(0)).insert_axis(Axis(0)).into()
    }

    /// 每行求和，rows×1
    pub fn row_sum(&self) -> Matrix {
        self.data.sum_axis(Axis(1)).insert_axis(Axis(1)).into()
    }

    /// 全局第一个最大值的位置 `(row, col)`，空矩阵返回 `(0, 0)`
    pub fn max_index(&self) -> (usize, usize) {
        let mut best = (0, 0);
        let mut best_val = f32::NEG_INFINITY;
        for ((r, c), &v) in self.data.indexed_iter() {
            if v > best_val {
                best_val = v;
                best = (r, c);
            }
        }
        best
    }

    // ========================================================================
    // 拼接与切分
    // ========================================================================

    /// 按列拼接，行数必须一致
    pub fn concat(parts: &[Matrix]) -> Matrix {
        assert!(!parts.is_empty(), "concat 需要至少一个矩阵");
        let views: Vec<_> = parts.iter().map(|m| m.data.view()).collect();
        concatenate(Axis(1), &views)
            .unwrap_or_else(|e| panic!("concat 行数不一致: {}", e))
            .into()
    }

    /// 按列切成 `n` 个等宽的块
    pub fn split(&self, n: usize) -> Vec<Matrix> {
        assert!(self.rows() > 0, "不能切分空矩阵");
        assert!(n > 0, "切分块数必须大于 0");
        assert!(
            self.cols() % n == 0,
            "{} 列无法平均切成 {} 块",
            self.cols(),
            n
        );
        let width = self.cols() / n;
        (0..n)
            .map(|i| {
                self.data
                    .slice(s![.., i * width..(i + 1) * width])
                    .to_owned()
                    .into()
            })
            .collect()
    }

    // ========================================================================
    // 构造辅助
    // ========================================================================

    /// one-hot 编码：第 `i` 行在 `labels[i]` 列为 1
    pub fn one_hot(labels: &[usize], cols: usize) -> Matrix {
        let mut m = Self::zeros(labels.len(), cols);
        for (row, &label) in labels.iter().enumerate() {
            m.data[[row, label]] = 1.0;
        }
        m
    }

    // ========================================================================
    // 激活函数
    // ========================================================================

    /// Leaky ReLU: `max(x, αx)`
    pub fn leaky_relu(&self, alpha: f32) -> Matrix {
        let mut out = self.data.clone();
        out.par_map_inplace(|x| *x = x.max(alpha * *x));
        out.into()
    }

    /// Leaky ReLU 的导数：`x >= 0` 处为 1，否则为 α
    pub fn leaky_relu_derivative(&self, alpha: f32) -> Matrix {
        let mut out = self.data.clone();
        out.par_map_inplace(|x| *x = if *x >= 0.0 { 1.0 } else { alpha });
        out.into()
    }

    // ========================================================================
    // 原地更新
    // ========================================================================

    /// 梯度下降一步：`self -= lr · grad`
    pub fn apply_gradient(&mut self, grad: &Matrix, lr: f32) {
        self.assert_same_shape(grad, "梯度更新");
        self.data.scaled_add(-lr, &grad.data);
    }

    fn assert_same_shape(&self, other: &Matrix, op: &str) {
        assert_eq!(
            self.shape(),
            other.shape(),
            "{}形状不匹配: {:?} vs {:?}",
            op,
            self.shape(),
            other.shape()
        );
    }

    fn assert_row_vector(&self, row: &Matrix, op: &str) {
        assert_eq!(
            row.shape(),
            (1, self.cols()),
            "{} 需要 1×{} 的行向量, 实际 {:?}",
            op,
            self.cols(),
            row.shape()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_col_and_statistics() {
        let m = Matrix::from_rows(&[[1.0, 2.0, 3.0], [4.0, 6.0, 8.0]]);
        let mean = m.mean_rows();
        assert_eq!(mean, Matrix::from_rows(&[[2.0], [6.0]]));

        let centered = m.sub_col(&mean);
        assert_eq!(centered, Matrix::from_rows(&[[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0]]));

        let var = m.variance_rows(&mean);
        assert!((var.get(0, 0) - 2.0 / 3.0).abs() < 1e-6);
        assert!((var.get(1, 0) - 8.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_sums() {
        let m = Matrix::from_rows(&[[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(m.col_sum(), Matrix::from_rows(&[[4.0, 6.0]]));
        assert_eq!(m.row_sum(), Matrix::from_rows(&[[3.0], [7.0]]));
    }

    #[test]
    fn test_max_index_picks_first_maximum() {
        let m = Matrix::from_rows(&[[0.1, 0.9, 0.2], [0.9, 0.0, 0.3]]);
        assert_eq!(m.max_index(), (0, 1));
        assert_eq!(Matrix::zeros(0, 0).max_index(), (0, 0));
        assert_eq!(m.row(1).max_index(), (0, 0));
    }

    #[test]
    fn test_one_hot() {
        let m = Matrix::one_hot(&[2, 0], 3);
        assert_eq!(m, Matrix::from_rows(&[[0.0, 0.0, 1.0], [1.0, 0.0, 0.0]]));
    }

    #[test]
    fn test_leaky_relu_and_derivative() {
        let m = Matrix::from_rows(&[[-2.0, 0.0, 3.0]]);
        let act = m.leaky_relu(0.01);
        assert!((act.get(0, 0) + 0.02).abs() < 1e-7);
        assert_eq!(act.get(0, 2), 3.0);
        assert_eq!(
            m.leaky_relu_derivative(0.01),
            Matrix::from_rows(&[[0.01, 1.0, 1.0]])
        );
    }

    #[test]
    fn test_from_shape_vec_rejects_bad_length() {
        assert!(Matrix::from_shape_vec(2, 2, vec![1.0; 3]).is_err());
        assert!(Matrix::from_shape_vec(0, 5, Vec::new()).is_ok());
    }

    #[test]
    fn test_randomize_scale() {
        let m = Matrix::random(200, 50);
        let n = (m.rows() * m.cols()) as f32;
        let mean = m.sum() / n;
        let var = m.map(|x| (x - mean) * (x - mean)).sum() / n;
        // 期望方差 2 / rows = 0.01
        assert!((var - 0.01).abs() < 0.002, "方差 {} 偏离期望", var);
    }

    #[test]
    #[should_panic(expected = "矩阵乘法形状不匹配")]
    fn test_mul_shape_mismatch_panics() {
        let a = Matrix::zeros(2, 3);
        let b = Matrix::zeros(2, 3);
        let _ = a.mul(&b);
    }

    #[test]
    #[should_panic]
    fn test_split_requires_divisible_width() {
        let _ = Matrix::zeros(2, 5).split(2);
    }

    #[test]
    fn test_check_shape() {
        let m = Matrix::zeros(2, 3);
        assert!(m.check_shape((2, 3), "m").is_ok());
        assert!(matches!(m.check_shape((3, 2), "m"), Err(ModelError::Shape(_))));
    }
}
