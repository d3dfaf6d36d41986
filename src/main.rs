use std::io::Write;

use llm::{
    DEFAULT_VOCAB_SIZE, LLM, LogObserver, ModelConfig, Result, TextCorpus, TrainingConfig, Vocab,
    load_model_auto, save_model_binary, save_model_json,
};

const DEFAULT_CORPUS: &str = "data/corpus.json";
const DEFAULT_TOKENS: &str = "data/tokens.json";
const DEFAULT_MODEL: &str = "checkpoints/model.bin";

// CLI 解析辅助函数
fn arg_has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn parse_str_arg<'a>(args: &'a [String], key: &str) -> Option<&'a str> {
    let prefix = format!("{}=", key);
    args.iter().find_map(|a| a.strip_prefix(prefix.as_str()))
}

fn parse_usize_arg(args: &[String], key: &str) -> Option<usize> {
    parse_str_arg(args, key).and_then(|v| v.parse::<usize>().ok())
}

fn parse_f32_arg(args: &[String], key: &str) -> Option<f32> {
    parse_str_arg(args, key).and_then(|v| v.parse::<f32>().ok())
}

fn print_usage() {
    println!("用法: handcrafted-llm <vocab|train|query> [选项]");
    println!();
    println!("  vocab   从语料学习 BPE 词表");
    println!("          --corpus=PATH --tokens=PATH --vocab-size=N");
    println!("  train   训练模型（--resume 时在已有模型上继续训练）");
    println!("          --corpus=PATH --tokens=PATH --model=PATH --epochs=N --lr=F --resume");
    println!("  query   加载模型并生成文本，不带提示词时进入交互模式");
    println!("          --model=PATH --max-tokens=N [提示词...]");
}

fn run_vocab(args: &[String]) -> Result<()> {
    let corpus = TextCorpus::from_json(parse_str_arg(args, "--corpus").unwrap_or(DEFAULT_CORPUS))?;
    let target = parse_usize_arg(args, "--vocab-size").unwrap_or(DEFAULT_VOCAB_SIZE);
    let tokens_path = parse_str_arg(args, "--tokens").unwrap_or(DEFAULT_TOKENS);

    let vocab = Vocab::learn(&corpus.texts, target, 0)?;
    vocab.save_json(tokens_path)?;
    println!("✓ 词表已保存: {} ({} 个 token)", tokens_path, vocab.len());
    Ok(())
}

fn save_model(llm: &LLM, path: &str) -> Result<()> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    if path.ends_with(".json") {
        save_model_json(llm, path)
    } else {
        save_model_binary(llm, path)
    }
}

fn run_train(args: &[String]) -> Result<()> {
    let defaults = TrainingConfig::default();
    let training = TrainingConfig {
        epochs: parse_usize_arg(args, "--epochs").unwrap_or(defaults.epochs),
        learning_rate: parse_f32_arg(args, "--lr").unwrap_or(defaults.learning_rate),
        ..defaults
    };
    let model_path = parse_str_arg(args, "--model").unwrap_or(DEFAULT_MODEL);
    let corpus = TextCorpus::from_json(parse_str_arg(args, "--corpus").unwrap_or(DEFAULT_CORPUS))?;

    let mut llm = if arg_has_flag(args, "--resume") {
        load_model_auto(model_path)?
    } else {
        let vocab = Vocab::load_json(parse_str_arg(args, "--tokens").unwrap_or(DEFAULT_TOKENS))?;
        LLM::new(vocab, ModelConfig::default())?
    };

    println!(
        "\n开始训练: epochs={}, lr={:.6}, 样本数={}",
        training.epochs,
        training.learning_rate,
        corpus.len()
    );
    let losses = llm.train(
        &corpus.texts,
        training.epochs,
        training.learning_rate,
        &mut LogObserver,
    );
    if let Some(last) = losses.last() {
        println!("✓ 训练完成，最后一个 epoch 平均损失 {:.4}", last);
    }

    save_model(&llm, model_path)?;
    println!("✅ 模型已保存: {}", model_path);
    Ok(())
}

fn run_query(args: &[String]) -> Result<()> {
    let max_tokens = parse_usize_arg(args, "--max-tokens")
        .unwrap_or_else(|| TrainingConfig::default().max_new_tokens);
    let mut llm = load_model_auto(parse_str_arg(args, "--model").unwrap_or(DEFAULT_MODEL))?;

    let prompt: Vec<&str> = args
        .iter()
        .filter(|a| !a.starts_with("--"))
        .map(String::as_str)
        .collect();
    if !prompt.is_empty() {
        println!("{}", llm.query_with_budget(&prompt.join(" "), max_tokens));
        return Ok(());
    }

    interactive_mode(&mut llm, max_tokens);
    Ok(())
}

/// 交互模式
fn interactive_mode(llm: &mut LLM, max_tokens: usize) {
    println!("\n💡 输入提示词后按回车生成文本，输入 'exit' 退出\n");

    let mut input = String::new();
    loop {
        input.clear();

        print!("> ");
        if let Err(e) = std::io::stdout().flush() {
            log::warn!("刷新标准输出失败: {}", e);
        }

        match std::io::stdin().read_line(&mut input) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                log::warn!("读取输入失败，已跳过本次交互: {}", e);
                continue;
            }
        }

        let trimmed_input = input.trim();
        if trimmed_input.eq_ignore_ascii_case("exit") {
            break;
        }
        if trimmed_input.is_empty() {
            continue;
        }

        println!("{}\n", llm.query_with_budget(trimmed_input, max_tokens));
    }
}

fn main() {
    // 初始化日志系统
    if let Err(e) = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
    {
        eprintln!("日志初始化失败: {}", e);
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        print_usage();
        return;
    };

    let outcome = match command.as_str() {
        "vocab" => run_vocab(rest),
        "train" => run_train(rest),
        "query" => run_query(rest),
        _ => {
            print_usage();
            return;
        }
    };

    if let Err(e) = outcome {
        log::error!("❌ {}", e);
        std::process::exit(1);
    }
}
