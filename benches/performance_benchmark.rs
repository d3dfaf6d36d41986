//! # 性能基准测试
//!
//! 1. 矩阵乘法
//! 2. 多头注意力前向（各头并行）
//! 3. 语言模型单窗口训练步骤
//! 4. 贪心生成
//!
//! ## 运行方式
//! ```bash
//! cargo bench --bench performance_benchmark
//! ```

use std::time::Instant;

use llm::{LLM, Matrix, ModelConfig, MultiHeadAttention, SilentObserver, Vocab};

fn main() {
    println!("=== handcrafted-llm 性能基准测试 ===\n");

    benchmark_matrix_mul();
    benchmark_attention();
    benchmark_training_step();
    benchmark_generation();

    println!("\n=== 所有基准测试完成 ===");
}

fn benchmark_matrix_mul() {
    println!("📊 测试1: 矩阵乘法");
    println!("----------------------------------------");

    for (rows, cols) in [(64, 192), (256, 192), (256, 1536)] {
        let a = Matrix::random(rows, cols);
        let b = Matrix::random(cols, rows);

        let iterations = 50;
        let start = Instant::now();
        for _ in 0..iterations {
            let _c = a.mul(&b);
        }
        let elapsed = start.elapsed();

        println!(
            "  [{}×{}] · [{}×{}]: {:.3} ms/次",
            rows,
            cols,
            cols,
            rows,
            elapsed.as_secs_f64() * 1000.0 / iterations as f64
        );
    }
    println!();
}

fn benchmark_attention() {
    println!("📊 测试2: 多头注意力前向");
    println!("----------------------------------------");

    for heads in [1, 4, 8] {
        let mut attention = MultiHeadAttention::new(128, 192, 48, heads);
        let input = Matrix::random(128, 192);

        let iterations = 20;
        let start = Instant::now();
        for _ in 0..iterations {
            let _out = attention.forward(&input);
        }
        let elapsed = start.elapsed();

        println!(
            "  {} 个头: {:.3} ms/次",
            heads,
            elapsed.as_secs_f64() * 1000.0 / iterations as f64
        );
    }
    println!();
}

fn small_model() -> LLM {
    let texts = [
        "the quick brown fox jumps over the lazy dog",
        "a lazy cat sleeps while the quick dog runs",
    ];
    let vocab = match Vocab::learn(&texts, 64, 0) {
        Ok(vocab) => vocab,
        Err(e) => panic!("词表学习失败: {}", e),
    };
    let config = ModelConfig {
        context_len: 32,
        embedding_dim: 64,
        head_dim: 16,
        num_heads: 4,
        hidden_multiplier: 4,
        ..ModelConfig::default()
    };
    match LLM::new(vocab, config) {
        Ok(model) => model,
        Err(e) => panic!("模型创建失败: {}", e),
    }
}

fn benchmark_training_step() {
    println!("📊 测试3: 训练");
    println!("----------------------------------------");

    let mut model = small_model();
    let text = "the quick brown fox jumps over the lazy dog ".repeat(8);

    let start = Instant::now();
    let loss = model.learn_observed(&text, 1e-3, "bench", 0, &mut SilentObserver);
    let elapsed = start.elapsed();

    let windows = model.encode(&text).len().saturating_sub(model.context_len()).max(1);
    println!(
        "  {} 个窗口: 总计 {:.3} ms, 平均损失 {:.4}",
        windows,
        elapsed.as_secs_f64() * 1000.0,
        loss
    );
    println!();
}

fn benchmark_generation() {
    println!("📊 测试4: 贪心生成");
    println!("----------------------------------------");

    let mut model = small_model();
    let budget = 32;

    let start = Instant::now();
    let generated = model.generate("the quick", budget);
    let elapsed = start.elapsed();

    println!(
        "  {} 个 token: {:.3} ms/token",
        generated.len(),
        elapsed.as_secs_f64() * 1000.0 / generated.len().max(1) as f64
    );
}
