//! # MLP 分类器
//!
//! 输入为单行特征向量 (1 × features)，输出为各类别的 softmax 概率。
//! 两种训练策略的数值行为不同，分别保留：
//!
//! | 策略 | 做法 |
//! |------|------|
//! | [`TrainingStrategy::Batched`] | 一个批次内只计算梯度并累加，按批次大小取平均后统一更新一次 |
//! | [`TrainingStrategy::Online`] | 每个样本反向传播后立即更新参数 |

use crate::{
    feed_forward::{LayerGradients, Mlp},
    matrix::Matrix,
    training_observer::{TrainingEvent, TrainingObserver},
    utils::shuffle,
};

/// 一个带标签的样本
#[derive(Clone, Debug)]
pub struct Example {
    /// 特征 (1 × features)
    pub input: Matrix,
    pub label: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrainingStrategy {
    /// 累积梯度，每 `batch_size` 个样本更新一次
    Batched { batch_size: usize },
    /// 逐样本更新
    Online,
}

/// 评估结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Evaluation {
    pub total: usize,
    pub errors: usize,
}

impl Evaluation {
    pub fn accuracy(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        (self.total - self.errors) as f32 / self.total as f32
    }
}

#[derive(Clone, Debug)]
pub struct MlpClassifier {
    pub network: Mlp,
}

impl MlpClassifier {
    /// `widths` 的最后一项为类别数
    pub fn new(alpha: f32, input_dim: usize, widths: &[usize]) -> Self {
        Self {
            network: Mlp::new(alpha, 1, input_dim, widths),
        }
    }

    pub fn from_network(network: Mlp) -> Self {
        Self { network }
    }

    pub fn num_classes(&self) -> usize {
        self.network.layers.last().map(|l| l.fan_out()).unwrap_or(0)
    }

    /// 各类别概率 (1 × classes)
    pub fn predict(&mut self, input: &Matrix) -> Matrix {
        self.network.forward(input).softmax()
    }

    /// 概率最大的类别
    pub fn classify(&mut self, input: &Matrix) -> usize {
        self.predict(input).max_index().1
    }

    /// **多轮训练**，每个 epoch 打乱样本顺序，返回每个 epoch 的平均损失
    pub fn train(
        &mut self,
        examples: &[Example],
        epochs: usize,
        lr: f32,
        strategy: TrainingStrategy,
        observer: &mut dyn TrainingObserver,
    ) -> Vec<f32> {
        let mut order: Vec<&Example> = examples.iter().collect();
        let mut epoch_losses = Vec::with_capacity(epochs);

        for epoch in 0..epochs {
            shuffle(&mut order);
            let mean_loss = match strategy {
                TrainingStrategy::Batched { batch_size } => {
                    self.learn_batched(&order, batch_size, lr, epoch, observer)
                }
                TrainingStrategy::Online => self.learn_online(&order, lr, epoch, observer),
            };
            observer.on_epoch_end(epoch, mean_loss);
            epoch_losses.push(mean_loss);
        }

        epoch_losses
    }

    fn loss_and_gradient(&mut self, example: &Example) -> (f32, Matrix) {
        let probs = self.predict(&example.input);
        let truth = Matrix::one_hot(&[example.label], probs.cols());
        (probs.cross_entropy(&truth), probs.sub(&truth))
    }

    /// **批量训练一个 epoch**
    ///
    /// 最后一个批次可能不足 `batch_size`，平均时按实际样本数计算。
    pub fn learn_batched(
        &mut self,
        examples: &[&Example],
        batch_size: usize,
        lr: f32,
        epoch: usize,
        observer: &mut dyn TrainingObserver,
    ) -> f32 {
        let batch_size = batch_size.max(1);
        let mut total_loss = 0.0;

        for (batch_index, batch) in examples.chunks(batch_size).enumerate() {
            let mut batch_loss = 0.0;
            let mut accumulated: Option<Vec<LayerGradients>> = None;

            for example in batch {
                let (loss, grad) = self.loss_and_gradient(example);
                batch_loss += loss;

                let grads = self.network.gradients(&grad);
                match accumulated.as_mut() {
                    Some(acc) => acc.iter_mut().zip(&grads).for_each(|(a, g)| a.accumulate(g)),
                    None => accumulated = Some(grads),
                }
            }

            if let Some(mut grads) = accumulated {
                let factor = 1.0 / batch.len() as f32;
                grads.iter_mut().for_each(|g| g.scale(factor));
                self.network.update(&grads, lr);
            }

            let tag = format!("epoch {} batch {}", epoch + 1, batch_index + 1);
            observer.on_step(&TrainingEvent {
                tag: &tag,
                epoch,
                step: batch_index,
                loss: batch_loss / batch.len() as f32,
            });
            total_loss += batch_loss;
        }

        if examples.is_empty() {
            0.0
        } else {
            total_loss / examples.len() as f32
        }
    }

    /// **逐样本训练一个 epoch**
    pub fn learn_online(
        &mut self,
        examples: &[&Example],
        lr: f32,
        epoch: usize,
        observer: &mut dyn TrainingObserver,
    ) -> f32 {
        let mut total_loss = 0.0;

        for (step, example) in examples.iter().enumerate() {
            let (loss, grad) = self.loss_and_gradient(example);
            let tag = format!("epoch {}", epoch + 1);
            observer.on_step(&TrainingEvent {
                tag: &tag,
                epoch,
                step,
                loss,
            });
            self.network.backward_and_update(&grad, lr);
            total_loss += loss;
        }

        if examples.is_empty() {
            0.0
        } else {
            total_loss / examples.len() as f32
        }
    }

    /// 统计分类错误的样本数
    pub fn evaluate(&mut self, examples: &[Example]) -> Evaluation {
        let mut errors = 0;
        for example in examples {
            let predicted = self.classify(&example.input);
            log::debug!("正确 {}, 预测 {}", example.label, predicted);
            if predicted != example.label {
                errors += 1;
            }
        }
        let evaluation = Evaluation {
            total: examples.len(),
            errors,
        };
        log::info!(
            "评估完成: {} 个样本, {} 个错误, 准确率 {:.2}%",
            evaluation.total,
            evaluation.errors,
            evaluation.accuracy() * 100.0
        );
        evaluation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accuracy() {
        let e = Evaluation { total: 4, errors: 1 };
        assert!((e.accuracy() - 0.75).abs() < 1e-6);
        assert_eq!(Evaluation { total: 0, errors: 0 }.accuracy(), 0.0);
    }

    #[test]
    fn test_predict_is_distribution() {
        let mut clf = MlpClassifier::new(0.01, 4, &[8, 3]);
        assert_eq!(clf.num_classes(), 3);
        let probs = clf.predict(&Matrix::from_rows(&[[0.1, 0.2, 0.3, 0.4]]));
        assert_eq!(probs.shape(), (1, 3));
        assert!((probs.sum() - 1.0).abs() < 1e-5);
    }
}
