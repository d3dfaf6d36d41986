/// 注意力测试
///
/// 1. 固定权重下的前向数值
/// 2. 因果掩码下未来位置的注意力为 0
/// 3. 单头与多头的输入梯度与有限差分估计一致
use llm::{
    AttentionHead, Layer, Matrix, MultiHeadAttention,
    self_attention::causal_mask,
};

/// 数值梯度检查使用的扰动大小
const EPSILON: f32 = 1e-3;
/// 相对误差允许范围
const REL_TOLERANCE: f32 = 0.05;
const ABS_TOLERANCE: f32 = 5e-3;

fn assert_gradient_close(numerical: f32, analytical: f32, i: usize, j: usize) {
    let abs_err = (numerical - analytical).abs();
    let rel_err = if numerical.abs() > 1e-3 {
        abs_err / numerical.abs()
    } else {
        abs_err
    };
    assert!(
        rel_err <= REL_TOLERANCE || abs_err < ABS_TOLERANCE,
        "梯度验证失败: idx=({},{}) 数值梯度={:.6} 解析梯度={:.6}",
        i,
        j,
        numerical,
        analytical
    );
}

fn sample_input(rows: usize, cols: usize) -> Matrix {
    let mut input = Matrix::zeros(rows, cols);
    for i in 0..rows {
        for j in 0..cols {
            input.set(i, j, ((i * cols + j) as f32 * 0.37).sin() * 0.8);
        }
    }
    input
}

#[test]
fn test_head_forward_scenario() {
    let w = Matrix::from_rows(&[[0.2, 0.0], [-0.9, 0.85], [1.0, 0.15]]);
    let mut head = AttentionHead::from_weights(w.clone(), w.clone(), w);
    let x = Matrix::from_rows(&[[0.3, 0.5, -0.1], [1.0, 0.0, 0.4]]);

    let out = head.forward(&x, &Matrix::zeros(2, 2));

    let expected = [[-0.07312266, 0.27614030], [0.17497426, 0.19647616]];
    for (i, row) in expected.iter().enumerate() {
        for (j, value) in row.iter().enumerate() {
            assert!(
                (out.get(i, j) - value).abs() < 1e-5,
                "({},{}) 期望 {} 实际 {}",
                i,
                j,
                value,
                out.get(i, j)
            );
        }
    }
}

#[test]
fn test_causal_mask_zeroes_future_positions() {
    let mut head = AttentionHead::new(6, 3);
    head.forward(&sample_input(4, 6), &causal_mask(4));

    let weights = head.attention_weights().unwrap();
    for i in 0..4 {
        for j in 0..4 {
            if j > i {
                assert_eq!(weights.get(i, j), 0.0, "位置 {} 看到了未来位置 {}", i, j);
            }
        }
        let sum: f32 = weights.row_view(i).sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }
    // 第一行只能看到自己
    assert!((weights.get(0, 0) - 1.0).abs() < 1e-6);
}

#[test]
fn test_head_gradient_matches_numerical_estimate() {
    let (rows, cols) = (3, 6);
    let mask = causal_mask(rows);
    let mut head = AttentionHead::new(cols, 4);
    let input = sample_input(rows, cols);
    let upstream = sample_input(rows, 4).map(|x| x + 0.3);

    head.forward(&input, &mask);
    let analytical = head.backward(&upstream, 0.0);

    for i in 0..rows {
        for j in 0..cols {
            let mut plus = input.clone();
            plus.set(i, j, input.get(i, j) + EPSILON);
            let mut minus = input.clone();
            minus.set(i, j, input.get(i, j) - EPSILON);

            let loss_plus = head.forward(&plus, &mask).mul_elwise(&upstream).sum();
            let loss_minus = head.forward(&minus, &mask).mul_elwise(&upstream).sum();
            let numerical = (loss_plus - loss_minus) / (2.0 * EPSILON);

            assert_gradient_close(numerical, analytical.get(i, j), i, j);
        }
    }
}

#[test]
fn test_multi_head_gradient_matches_numerical_estimate() {
    let (ctx, emb) = (3, 8);
    let mut attention = MultiHeadAttention::new(ctx, emb, 4, 2);
    let input = sample_input(ctx, emb);
    let upstream = sample_input(ctx, emb).map(|x| 0.5 - x);

    attention.forward(&input);
    let analytical = attention.backward(&upstream, 0.0);

    for i in 0..ctx {
        for j in 0..emb {
            let mut plus = input.clone();
            plus.set(i, j, input.get(i, j) + EPSILON);
            let mut minus = input.clone();
            minus.set(i, j, input.get(i, j) - EPSILON);

            let loss_plus = attention.forward(&plus).mul_elwise(&upstream).sum();
            let loss_minus = attention.forward(&minus).mul_elwise(&upstream).sum();
            let numerical = (loss_plus - loss_minus) / (2.0 * EPSILON);

            assert_gradient_close(numerical, analytical.get(i, j), i, j);
        }
    }
}

#[test]
fn test_backward_with_zero_lr_keeps_weights() {
    let mut attention = MultiHeadAttention::new(3, 8, 4, 2);
    let before = attention.clone();
    attention.forward(&sample_input(3, 8));
    attention.backward(&sample_input(3, 8), 0.0);

    assert_eq!(attention.w_o, before.w_o);
    for (head, original) in attention.heads.iter().zip(&before.heads) {
        assert_eq!(head.w_q, original.w_q);
        assert_eq!(head.w_k, original.w_k);
        assert_eq!(head.w_v, original.w_v);
    }
    assert_eq!(attention.parameters(), before.parameters());
}

#[test]
fn test_input_gradient_uses_weights_before_update() {
    let mut frozen = MultiHeadAttention::new(3, 8, 4, 2);
    let mut updated = frozen.clone();
    let input = sample_input(3, 8);
    let upstream = sample_input(3, 8).map(|x| x - 0.2);

    frozen.forward(&input);
    updated.forward(&input);
    let expected = frozen.backward(&upstream, 0.0);
    let actual = updated.backward(&upstream, 0.5);

    // W_o 已更新，但回传的梯度与不更新时相同
    assert_ne!(updated.w_o, frozen.w_o);
    assert_eq!(actual, expected);
}
