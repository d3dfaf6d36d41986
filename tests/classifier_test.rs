// MLP 分类器测试：两种训练策略

use llm::{Example, LossHistory, Matrix, MlpClassifier, SilentObserver, TrainingStrategy};

/// 两类线性可分的样本
fn toy_examples() -> Vec<Example> {
    let points = [
        ([1.0, 0.1], 0),
        ([0.9, -0.2], 0),
        ([1.2, 0.3], 0),
        ([0.8, 0.0], 0),
        ([0.1, 1.0], 1),
        ([-0.2, 0.9], 1),
        ([0.3, 1.1], 1),
        ([0.0, 0.8], 1),
    ];
    points
        .iter()
        .map(|(x, label)| Example {
            input: Matrix::from_rows(&[*x]),
            label: *label,
        })
        .collect()
}

#[test]
fn test_batched_training_reduces_loss() {
    let examples = toy_examples();
    let mut classifier = MlpClassifier::new(0.01, 2, &[8, 2]);
    let mut history = LossHistory::default();

    let losses = classifier.train(
        &examples,
        100,
        0.5,
        TrainingStrategy::Batched { batch_size: 4 },
        &mut history,
    );

    assert_eq!(losses.len(), 100);
    assert_eq!(history.epochs.len(), 100);
    // 8 个样本、批大小 4 → 每个 epoch 2 个批次
    assert_eq!(history.steps.len(), 200);
    assert!(losses[99] < losses[0], "损失未下降: {} -> {}", losses[0], losses[99]);
}

#[test]
fn test_online_training_reduces_loss() {
    let examples = toy_examples();
    let mut classifier = MlpClassifier::new(0.01, 2, &[8, 2]);
    let mut history = LossHistory::default();

    let losses = classifier.train(&examples, 50, 0.1, TrainingStrategy::Online, &mut history);

    assert_eq!(history.steps.len(), 50 * examples.len());
    assert!(losses[49] < losses[0], "损失未下降: {} -> {}", losses[0], losses[49]);
}

#[test]
fn test_uneven_last_batch() {
    let examples = toy_examples();
    let mut classifier = MlpClassifier::new(0.01, 2, &[4, 2]);
    let mut history = LossHistory::default();

    classifier.train(
        &examples,
        1,
        0.1,
        TrainingStrategy::Batched { batch_size: 3 },
        &mut history,
    );
    // 3 + 3 + 2
    assert_eq!(history.steps.len(), 3);
    assert!(history.steps.iter().all(|l| l.is_finite()));
}

#[test]
fn test_evaluate_counts_errors() {
    let examples = toy_examples();
    let mut classifier = MlpClassifier::new(0.01, 2, &[8, 2]);
    classifier.train(&examples, 200, 0.2, TrainingStrategy::Online, &mut SilentObserver);

    let evaluation = classifier.evaluate(&examples);
    assert_eq!(evaluation.total, examples.len());
    assert!(evaluation.errors <= evaluation.total);
    assert!(
        evaluation.accuracy() >= 0.75,
        "训练后准确率过低: {:.2}",
        evaluation.accuracy()
    );
}

#[test]
fn test_classify_is_argmax_of_predict() {
    let mut classifier = MlpClassifier::new(0.01, 2, &[5, 3]);
    let x = Matrix::from_rows(&[[0.4, -0.6]]);
    let probs = classifier.predict(&x);
    assert_eq!(classifier.classify(&x), probs.max_index().1);
}
