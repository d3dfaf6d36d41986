//! # 预分词器（Pre-tokenizer）
//!
//! 在 BPE 之前把原始文本切成带类型的片段：
//!
//! | 类型 | 规则 |
//! |------|------|
//! | `Word` | 字母开头，之后可含字母、数字、撇号、词内连字符；统一转小写，去掉重音符 U+0301 |
//! | `Number` | 数字串，可带前导正负号（前一个片段不是数字时），`.`/`,` 保留，数字间的空格和 `'` 丢弃 |
//! | `Punct` | 单个标点字符（Unicode P 类） |
//! | `Special` | 换行符 → `</bl>`，连续换行只保留一个 |
//! | `Unknown` | 其他非空白字符，单字符一个片段 |
//!
//! 其余空白字符直接跳过。
//!
//! ```text
//! "Hello, world-wide 3,14!\n" →
//!   Word("hello") Punct(",") Word("world-wide") Number("3,14") Punct("!") Special("</bl>")
//! ```

use std::sync::LazyLock;

use regex::Regex;

/// 换行标记
pub const BREAK_LINE: &str = "</bl>";

/// 组合用重音符（俄语文本中常见）
const COMBINING_ACUTE: char = '\u{0301}';

static PUNCT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\p{P}$").unwrap_or_else(|e| panic!("标点正则无效: {}", e))
});

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    Number,
    Punct,
    Special,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreToken {
    pub kind: TokenKind,
    pub value: String,
}

impl PreToken {
    fn new(kind: TokenKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    fn is_break_line(&self) -> bool {
        self.kind == TokenKind::Special && self.value == BREAK_LINE
    }
}

fn is_punct(c: char) -> bool {
    let mut buf = [0u8; 4];
    PUNCT_RE.is_match(c.encode_utf8(&mut buf))
}

fn is_sign(c: char) -> bool {
    c == '-' || c == '+'
}

fn next_is_digit(chars: &[char], i: usize) -> bool {
    chars.get(i + 1).is_some_and(|c| c.is_numeric())
}

/// 把文本切成预分词片段
pub fn pre_tokenize(text: &str) -> Vec<PreToken> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens: Vec<PreToken> = Vec::new();

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let prev = tokens.last();

        let (token, consumed) = if c.is_alphabetic() {
            read_word(&chars[i..])
        } else if c.is_numeric()
            || (is_sign(c)
                && prev.is_none_or(|p| p.kind != TokenKind::Number)
                && next_is_digit(&chars, i))
        {
            read_number(&chars[i..])
        } else if is_punct(c) {
            (PreToken::new(TokenKind::Punct, c), 1)
        } else if c == '\n' && !prev.is_some_and(PreToken::is_break_line) {
            (PreToken::new(TokenKind::Special, BREAK_LINE), 1)
        } else if c.is_whitespace() {
            i += 1;
            continue;
        } else {
            (PreToken::new(TokenKind::Unknown, c), 1)
        };

        tokens.push(token);
        i += consumed;
    }

    tokens
}

fn read_word(chars: &[char]) -> (PreToken, usize) {
    let mut value = String::new();

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == COMBINING_ACUTE {
            i += 1;
            continue;
        }
        let keep = c.is_alphabetic()
            || (c.is_numeric() && !value.is_empty())
            || c == '\''
            || (c == '’' && !value.is_empty())
            || (c == '-'
                && !value.is_empty()
                && chars.get(i + 1).is_some_and(|n| n.is_alphanumeric()));

        if !keep {
            break;
        }
        value.extend(c.to_lowercase());
        i += 1;
    }

    (PreToken::new(TokenKind::Word, value), i)
}

fn read_number(chars: &[char]) -> (PreToken, usize) {
    let mut value = String::new();

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_numeric() || (is_sign(c) && value.is_empty() && next_is_digit(chars, i)) {
            value.push(c);
        } else if next_is_digit(chars, i) && !value.is_empty() {
            match c {
                ' ' | '\'' => {}
                '.' | ',' => value.push(c),
                _ => break,
            }
        } else {
            break;
        }
        i += 1;
    }

    (PreToken::new(TokenKind::Number, value), i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(text: &str) -> Vec<(TokenKind, String)> {
        pre_tokenize(text)
            .into_iter()
            .map(|t| (t.kind, t.value))
            .collect()
    }

    #[test]
    fn test_words_are_lowercased() {
        assert_eq!(
            values("Hello World"),
            vec![
                (TokenKind::Word, "hello".to_string()),
                (TokenKind::Word, "world".to_string()),
            ]
        );
    }

    #[test]
    fn test_inner_hyphen_and_apostrophe() {
        let toks = values("world-wide don't end-");
        assert_eq!(toks[0].1, "world-wide");
        assert_eq!(toks[1].1, "don't");
        assert_eq!(toks[2].1, "end");
        assert_eq!(toks[3], (TokenKind::Punct, "-".to_string()));
    }

    #[test]
    fn test_combining_accent_dropped() {
        assert_eq!(values("мо\u{0301}ре")[0].1, "море");
    }

    #[test]
    fn test_numbers() {
        assert_eq!(values("3,14")[0], (TokenKind::Number, "3,14".to_string()));
        assert_eq!(values("1 000 000")[0].1, "1000000");
        assert_eq!(values("-5")[0].1, "-5");
        // 前一个片段是数字时，符号不作为正负号
        let toks = values("5 -3");
        assert_eq!(toks[0].1, "5");
        assert_eq!(toks[1], (TokenKind::Punct, "-".to_string()));
        assert_eq!(toks[2].1, "3");
    }

    #[test]
    fn test_line_breaks_collapse() {
        let toks = values("a\n\n \nb");
        assert_eq!(
            toks,
            vec![
                (TokenKind::Word, "a".to_string()),
                (TokenKind::Special, BREAK_LINE.to_string()),
                (TokenKind::Word, "b".to_string()),
            ]
        );
    }

    #[test]
    fn test_punct_and_unknown() {
        let toks = values("hi! $");
        assert_eq!(toks[1], (TokenKind::Punct, "!".to_string()));
        assert_eq!(toks[2], (TokenKind::Unknown, "$".to_string()));
    }
}
