/// 工具函数模块
///
/// 随机数相关的通用辅助函数
use rand::Rng;
use rand::seq::SliceRandom;
use rand_distr::{Distribution, Normal};

/// 从正态分布 N(mean, std_dev²) 采样一个值
///
/// `std_dev` 非法（负数或 NaN）时退化为返回 `mean`。
pub fn sample_normal<R: Rng + ?Sized>(rng: &mut R, mean: f32, std_dev: f32) -> f32 {
    match Normal::new(mean, std_dev) {
        Ok(normal) => normal.sample(rng),
        Err(_) => mean,
    }
}

/// 原地打乱切片顺序，每个 epoch 开始时调用
pub fn shuffle<T>(items: &mut [T]) {
    items.shuffle(&mut rand::rng());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_normal_invalid_std_falls_back_to_mean() {
        let mut rng = rand::rng();
        assert_eq!(sample_normal(&mut rng, 3.0, -1.0), 3.0);
    }

    #[test]
    fn test_shuffle_keeps_elements() {
        let mut items: Vec<usize> = (0..100).collect();
        shuffle(&mut items);
        let mut sorted = items.clone();
        sorted.sort();
        assert_eq!(sorted, (0..100).collect::<Vec<_>>());
    }
}
