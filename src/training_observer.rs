//! # 训练进度观察者
//!
//! 训练循环不直接打印日志，而是把每一步的损失交给调用方注入的观察者。
//! 默认实现 [`LogObserver`] 通过 `log` 输出，[`LossHistory`] 把损失记下来供测试和绘图使用。

/// 一次训练步骤（一个窗口、一个样本或一个批次）的结果
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingEvent<'a> {
    /// 调用方给出的标签，例如文件名或 "epoch 样本号"
    pub tag: &'a str,
    pub epoch: usize,
    /// epoch 内的步骤编号
    pub step: usize,
    pub loss: f32,
}

pub trait TrainingObserver {
    fn on_step(&mut self, event: &TrainingEvent<'_>);

    /// 一个 epoch 结束，`mean_loss` 为该 epoch 所有步骤的平均损失
    fn on_epoch_end(&mut self, _epoch: usize, _mean_loss: f32) {}
}

/// 什么都不做的观察者
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentObserver;

impl TrainingObserver for SilentObserver {
    fn on_step(&mut self, _event: &TrainingEvent<'_>) {}
}

/// 通过 `log::info!` 输出每一步的交叉熵
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl TrainingObserver for LogObserver {
    fn on_step(&mut self, event: &TrainingEvent<'_>) {
        log::info!("{} CrossEntropy -> {:.4}", event.tag, event.loss);
    }

    fn on_epoch_end(&mut self, epoch: usize, mean_loss: f32) {
        log::info!("Epoch {}: 平均损失 = {:.4}", epoch, mean_loss);
    }
}

/// 记录所有步骤损失和每个 epoch 的平均损失
#[derive(Debug, Default, Clone)]
pub struct LossHistory {
    pub steps: Vec<f32>,
    pub epochs: Vec<f32>,
}

impl TrainingObserver for LossHistory {
    fn on_step(&mut self, event: &TrainingEvent<'_>) {
        self.steps.push(event.loss);
    }

    fn on_epoch_end(&mut self, _epoch: usize, mean_loss: f32) {
        self.epochs.push(mean_loss);
    }
}
