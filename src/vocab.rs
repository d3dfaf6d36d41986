//! # BPE 词表（Byte-Pair Encoding Vocabulary）
//!
//! 词表是一个**排序后**的子词列表，token 的编号就是它在列表中的下标，
//! 查找用二分搜索。保留的特殊 token：
//!
//! - `</unk>`: 未登录子词
//! - `</pad>`: 填充，嵌入行恒为 0
//! - `</w>`: 词尾标记，出现在子词末尾表示一个词结束
//! - `</eot>`: 文本结束
//!
//! ## 学习过程
//!
//! 1. 预分词后统计每个词的出现次数，丢弃出现次数不超过 `rarity` 的词
//! 2. 每个词拆成字符序列并追加 `</w>`，所有出现过的符号构成初始词表
//! 3. 反复统计相邻符号对的加权频次，把最高频的一对合并成新符号，直到词表达到目标大小
//!
//! ## 分词
//!
//! 特殊片段（换行标记）整体保留；其余片段拆成字符 + `</w>`，只要相邻两符号拼起来在词表中就合并，
//! 直到没有可合并的对为止。

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ModelError, Result},
    tokenizer::{TokenKind, pre_tokenize},
};

pub const UNK: &str = "</unk>";
pub const PAD: &str = "</pad>";
pub const EOW: &str = "</w>";
pub const EOT: &str = "</eot>";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Vocab {
    tokens: Vec<String>,
    unk_index: usize,
    pad_index: usize,
    eot_index: usize,
}

/// 学习阶段的一个词：出现次数和当前的符号切分
struct WordEntry {
    count: usize,
    symbols: Vec<String>,
}

impl WordEntry {
    fn new(word: &str, special: bool) -> Self {
        let symbols = if special {
            vec![word.to_string()]
        } else {
            split_symbols(word)
        };
        Self { count: 0, symbols }
    }

    fn merge(&mut self, left: &str, right: &str) {
        let mut i = 0;
        while i + 1 < self.symbols.len() {
            if self.symbols[i] == left && self.symbols[i + 1] == right {
                let right_sym = self.symbols.remove(i + 1);
                self.symbols[i].push_str(&right_sym);
            }
            i += 1;
        }
    }
}

/// 加权频次最高的相邻符号对，频次相同时取字典序最小者
fn most_frequent_pair(words: &BTreeMap<String, WordEntry>) -> Option<(String, String)> {
    let mut pair_counts: BTreeMap<(&str, &str), usize> = BTreeMap::new();
    for word in words.values() {
        for pair in word.symbols.windows(2) {
            *pair_counts
                .entry((pair[0].as_str(), pair[1].as_str()))
                .or_insert(0) += word.count;
        }
    }

    let mut best: Option<((&str, &str), usize)> = None;
    for (&pair, &count) in &pair_counts {
        if best.is_none_or(|(_, c)| count > c) {
            best = Some((pair, count));
        }
    }
    best.map(|((left, right), _)| (left.to_string(), right.to_string()))
}

fn split_symbols(word: &str) -> Vec<String> {
    word.chars()
        .map(String::from)
        .chain(std::iter::once(EOW.to_string()))
        .collect()
}

impl Vocab {
    /// **由 token 列表构造词表**
    ///
    /// 列表会被排序去重，缺少 `</unk>`、`</pad>` 或 `</eot>` 时返回错误。
    pub fn from_tokens(mut tokens: Vec<String>) -> Result<Self> {
        tokens.sort();
        tokens.dedup();

        let find = |special: &'static str| {
            tokens
                .binary_search_by(|t| t.as_str().cmp(special))
                .map_err(|_| ModelError::MissingSpecialToken(special))
        };
        let unk_index = find(UNK)?;
        let pad_index = find(PAD)?;
        let eot_index = find(EOT)?;

        Ok(Self {
            tokens,
            unk_index,
            pad_index,
            eot_index,
        })
    }

    /// **从语料学习 BPE 词表**
    ///
    /// # 参数
    /// - `texts`: 训练文本
    /// - `target_size`: 合并停止时的词表大小（不含特殊 token）
    /// - `rarity`: 出现次数不超过该值的词不参与学习
    ///
    /// 频次相同的符号对按字典序取最小者，结果可复现。
    pub fn learn<S: AsRef<str>>(texts: &[S], target_size: usize, rarity: usize) -> Result<Self> {
        let mut words: BTreeMap<String, WordEntry> = BTreeMap::new();
        for (i, text) in texts.iter().enumerate() {
            for token in pre_tokenize(text.as_ref()) {
                words
                    .entry(token.value.clone())
                    .or_insert_with(|| WordEntry::new(&token.value, token.kind == TokenKind::Special))
                    .count += 1;
            }
            log::debug!("已处理 {} 条文本，共 {} 个不同的词", i + 1, words.len());
        }
        words.retain(|_, w| w.count > rarity);
        log::info!("词频统计完成: {} 个词参与 BPE 学习", words.len());

        let mut dict: BTreeSet<String> = words
            .values()
            .flat_map(|w| w.symbols.iter().cloned())
            .collect();

        while dict.len() < target_size {
            let Some((left, right)) = most_frequent_pair(&words) else {
                break;
            };
            let merged = format!("{}{}", left, right);
            log::debug!("第 {} 个子词: {}", dict.len() + 1, merged);
            dict.insert(merged);

            for word in words.values_mut() {
                word.merge(&left, &right);
            }
        }

        let mut tokens: Vec<String> = dict.into_iter().collect();
        tokens.extend([UNK, PAD, EOW, EOT].map(String::from));
        let vocab = Self::from_tokens(tokens)?;
        log::info!("BPE 词表学习完成: {} 个 token", vocab.len());
        Ok(vocab)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn token(&self, index: usize) -> Option<&str> {
        self.tokens.get(index).map(String::as_str)
    }

    pub fn index_of(&self, token: &str) -> Option<usize> {
        self.tokens.binary_search_by(|t| t.as_str().cmp(token)).ok()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.index_of(token).is_some()
    }

    pub fn unk_index(&self) -> usize {
        self.unk_index
    }

    pub fn pad_index(&self) -> usize {
        self.pad_index
    }

    pub fn eot_index(&self) -> usize {
        self.eot_index
    }

    /// 把文本切成子词序列
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        for token in pre_tokenize(text) {
            if token.kind == TokenKind::Special {
                out.push(token.value);
                continue;
            }

            let mut symbols = split_symbols(&token.value);
            loop {
                let mergeable = (0..symbols.len().saturating_sub(1))
                    .find(|&i| self.contains(&format!("{}{}", symbols[i], symbols[i + 1])));
                let Some(i) = mergeable else {
                    break;
                };
                let right = symbols.remove(i + 1);
                symbols[i].push_str(&right);
            }
            out.extend(symbols);
        }
        out
    }

    /// 子词 → 编号，未登录的映射到 `</unk>`
    pub fn mark<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<usize> {
        tokens
            .iter()
            .map(|t| self.index_of(t.as_ref()).unwrap_or(self.unk_index))
            .collect()
    }

    pub fn encode(&self, text: &str) -> Vec<usize> {
        self.mark(&self.tokenize(text))
    }

    /// 保存为缩进格式的 JSON 数组（`tokens.json`）
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(writer, &self.tokens)?;
        log::info!("词表已保存: {:?} ({} 个 token)", path.as_ref(), self.len());
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let tokens: Vec<String> = serde_json::from_reader(reader)?;
        let vocab = Self::from_tokens(tokens)?;
        log::info!("词表已加载: {:?} ({} 个 token)", path.as_ref(), vocab.len());
        Ok(vocab)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specials() -> Vec<String> {
        [UNK, PAD, EOW, EOT].map(String::from).to_vec()
    }

    #[test]
    fn test_from_tokens_sorts_and_finds_specials() {
        let mut tokens = vec!["b".to_string(), "a".to_string()];
        tokens.extend(specials());
        let vocab = Vocab::from_tokens(tokens).unwrap();
        assert!(vocab.tokens().windows(2).all(|w| w[0] < w[1]));
        assert_eq!(vocab.token(vocab.pad_index()), Some(PAD));
        assert_eq!(vocab.token(vocab.unk_index()), Some(UNK));
        assert_eq!(vocab.token(vocab.eot_index()), Some(EOT));
    }

    #[test]
    fn test_missing_special_is_error() {
        let err = Vocab::from_tokens(vec![UNK.to_string(), EOT.to_string()]).unwrap_err();
        assert!(matches!(err, ModelError::MissingSpecialToken(PAD)));
    }

    #[test]
    fn test_word_merge() {
        let mut w = WordEntry::new("aaa", false);
        w.merge("a", "a");
        assert_eq!(w.symbols, vec!["aa", "a", EOW]);
    }
}
