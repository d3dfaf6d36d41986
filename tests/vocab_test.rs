// BPE 词表测试

use llm::{
    ModelError, Vocab,
    vocab::{EOT, EOW, PAD, UNK},
};

#[test]
fn test_learn_merges_most_frequent_pairs() {
    let vocab = Vocab::learn(&["ab ab ab a"], 100, 0).unwrap();

    for token in ["a", "b", "ab", "ab</w>", "a</w>", EOW, UNK, PAD, EOT] {
        assert!(vocab.contains(token), "缺少 token {}", token);
    }
    // 频次最高的 (a, b) 先合并，之后不会再出现 b</w>
    assert!(!vocab.contains("b</w>"));
    assert!(vocab.tokens().windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_learn_stops_at_target_size() {
    let vocab = Vocab::learn(&["ab ab ab a"], 4, 0).unwrap();
    // 基础符号 a, b, </w> 加一次合并，再加 4 个特殊 token（</w> 重复）
    assert!(vocab.contains("ab"));
    assert!(!vocab.contains("ab</w>"));
    assert_eq!(vocab.len(), 4 + 3);
}

#[test]
fn test_learn_drops_rare_words() {
    let vocab = Vocab::learn(&["xy ab ab"], 100, 1).unwrap();
    assert!(vocab.contains("ab</w>"));
    assert!(!vocab.contains("x"));
}

#[test]
fn test_learn_is_deterministic() {
    let texts = ["the cat sat on the mat", "a cat and a hat"];
    let first = Vocab::learn(&texts, 40, 0).unwrap();
    let second = Vocab::learn(&texts, 40, 0).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_tokenize_and_encode() {
    let vocab = Vocab::learn(&["ab ab ab a"], 100, 0).unwrap();

    assert_eq!(vocab.tokenize("AB a"), vec!["ab</w>", "a</w>"]);
    assert_eq!(vocab.tokenize("ba"), vec!["b", "a</w>"]);

    let marks = vocab.encode("ab z");
    assert_eq!(marks[0], vocab.index_of("ab</w>").unwrap());
    // z 不在词表中
    assert_eq!(marks[1], vocab.unk_index());
    assert_eq!(marks[2], vocab.index_of(EOW).unwrap());
}

#[test]
fn test_break_line_is_kept_whole() {
    let vocab = Vocab::learn(&["a\n\nb\na"], 100, 0).unwrap();
    assert!(vocab.contains("</bl>"));

    let tokens = vocab.tokenize("a\nb");
    assert_eq!(tokens.iter().filter(|t| *t == "</bl>").count(), 1);
    assert_eq!(tokens[0], "a</w>");
}

#[test]
fn test_json_round_trip() {
    let dir = std::env::temp_dir().join(format!("handcrafted_llm_vocab_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("tokens.json");

    let vocab = Vocab::learn(&["hello world", "hello there"], 30, 0).unwrap();
    vocab.save_json(&path).unwrap();
    let loaded = Vocab::load_json(&path).unwrap();
    assert_eq!(loaded, vocab);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_missing_special_token_is_error() {
    let result = Vocab::from_tokens(vec!["a".to_string(), UNK.to_string(), PAD.to_string()]);
    assert!(matches!(result, Err(ModelError::MissingSpecialToken(EOT))));
}
