//! 條件編譯與比對
//!
//! 條件有兩種來源寫法：
//! - 文字條件：可用 `^` / `$` 錨定，`%0`..`%9` 為萬用佔位符，`%%` 為字面 `%`
//! - 正則條件：原樣交給 `regex`，捕獲群組依位置編號（`%0` 為整段匹配）
//!
//! 別名的條件必須吻合整條命令；觸發器與替換的條件在行內搜尋。

use std::ops::Range;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    /// `%n` 佔位符與 `%%` 跳脫
    static ref TOKEN: Regex = Regex::new(r"%(%|\d)").expect("佔位符正則");
}

/// 條件編譯錯誤
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("條件不可為空")]
    Empty,

    #[error("無效的正則表達式 `{pattern}`: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// 比對方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// 在文字中搜尋
    Search,
    /// 必須吻合整段文字
    Whole,
}

/// 條件種類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionKind {
    Literal {
        /// 第 i 個捕獲群組對應的佔位符編號（依出現順序，可重複）
        placeholders: Vec<u8>,
        /// 是否附加了隱含的尾端捕獲
        implicit_tail: bool,
    },
    Regex,
}

/// 編譯後的條件
#[derive(Debug, Clone)]
pub struct Condition {
    source: String,
    kind: ConditionKind,
    regex: Regex,
}

impl Condition {
    /// 依旗標選擇文字或正則條件
    pub fn compile(source: &str, is_regex: bool, mode: MatchMode) -> Result<Self, PatternError> {
        if is_regex {
            Self::regex(source, mode)
        } else {
            Self::literal(source, mode)
        }
    }

    /// 編譯文字條件
    ///
    /// # Example
    /// ```
    /// use mudengine::rules::{Condition, MatchMode};
    ///
    /// let cond = Condition::literal("^%0 entered the room", MatchMode::Search).unwrap();
    /// let caps = cond.captures("Mob entered the room").unwrap();
    /// assert_eq!(caps.get(0), Some("Mob"));
    /// ```
    pub fn literal(source: &str, mode: MatchMode) -> Result<Self, PatternError> {
        if source.is_empty() {
            return Err(PatternError::Empty);
        }

        let mut body = source;
        let anchored_start = body.starts_with('^');
        if anchored_start {
            body = &body[1..];
        }
        let anchored_end = body.ends_with('$');
        if anchored_end {
            body = &body[..body.len() - 1];
        }

        let mut pattern = String::with_capacity(body.len() * 2);
        let mut placeholders = Vec::new();
        let mut last = 0;
        for caps in TOKEN.captures_iter(body) {
            let Some(token) = caps.get(0) else { continue };
            pattern.push_str(&regex::escape(&body[last..token.start()]));
            match caps[1].as_bytes()[0] {
                b'%' => pattern.push('%'),
                digit => {
                    pattern.push_str("(.*)");
                    placeholders.push(digit - b'0');
                }
            }
            last = token.end();
        }
        pattern.push_str(&regex::escape(&body[last..]));

        let implicit_tail = placeholders.is_empty() && mode == MatchMode::Whole;
        let full = match mode {
            MatchMode::Whole if implicit_tail => format!(r"^(?:{pattern})(?:\s+(.*))?$"),
            MatchMode::Whole => format!("^(?:{pattern})$"),
            MatchMode::Search => format!(
                "{}{pattern}{}",
                if anchored_start { "^" } else { "" },
                if anchored_end { "$" } else { "" }
            ),
        };

        Ok(Self {
            source: source.to_string(),
            kind: ConditionKind::Literal {
                placeholders,
                implicit_tail,
            },
            regex: build(&full, source)?,
        })
    }

    /// 編譯正則條件
    pub fn regex(source: &str, mode: MatchMode) -> Result<Self, PatternError> {
        if source.is_empty() {
            return Err(PatternError::Empty);
        }
        // 先單獨編譯原文，包裝後的錯誤位置才不會偏移
        let regex = build(source, source)?;
        let regex = match mode {
            MatchMode::Search => regex,
            MatchMode::Whole => build(&format!("^(?:{source})$"), source)?,
        };
        Ok(Self {
            source: source.to_string(),
            kind: ConditionKind::Regex,
            regex,
        })
    }

    /// 使用者寫的原文，也是移除規則時的比對鍵
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn kind(&self) -> &ConditionKind {
        &self.kind
    }

    pub fn has_implicit_tail(&self) -> bool {
        matches!(self.kind, ConditionKind::Literal { implicit_tail: true, .. })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    pub fn captures(&self, text: &str) -> Option<Captures> {
        self.captures_at(text, 0).map(|(_, caps)| caps)
    }

    /// 從位元組位置 `start` 開始搜尋，回傳匹配範圍與捕獲
    pub fn captures_at(&self, text: &str, start: usize) -> Option<(Range<usize>, Captures)> {
        let caps = self.regex.captures_at(text, start)?;
        let range = caps.get(0)?.range();

        let captures = match &self.kind {
            ConditionKind::Literal {
                placeholders,
                implicit_tail,
            } => {
                let groups = placeholders
                    .iter()
                    .enumerate()
                    .filter_map(|(i, &n)| caps.get(i + 1).map(|m| (n as usize, m.as_str().to_string())))
                    .collect();
                let tail = if *implicit_tail {
                    caps.get(placeholders.len() + 1).map(|m| m.as_str().to_string())
                } else {
                    None
                };
                Captures { groups, tail }
            }
            ConditionKind::Regex => Captures {
                groups: caps
                    .iter()
                    .enumerate()
                    .filter_map(|(i, m)| m.map(|m| (i, m.as_str().to_string())))
                    .collect(),
                tail: None,
            },
        };

        Some((range, captures))
    }
}

fn build(pattern: &str, source: &str) -> Result<Regex, PatternError> {
    Regex::new(pattern).map_err(|source_err| PatternError::InvalidRegex {
        pattern: source.to_string(),
        source: source_err,
    })
}

/// 一次匹配的捕獲結果
///
/// 文字條件以佔位符編號為鍵，正則條件以群組位置為鍵。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captures {
    groups: Vec<(usize, String)>,
    tail: Option<String>,
}

impl Captures {
    /// 取得編號 `n` 的捕獲；重複的佔位符取第一次出現
    pub fn get(&self, n: usize) -> Option<&str> {
        self.groups
            .iter()
            .find(|(key, _)| *key == n)
            .map(|(_, value)| value.as_str())
    }

    /// 隱含尾端捕獲（只有無佔位符的別名條件才有）
    pub fn tail(&self) -> Option<&str> {
        self.tail.as_deref()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.groups.iter().map(|(key, value)| (*key, value.as_str()))
    }

    /// 展開模板：`%n` 換成捕獲（不存在則為空字串），`%%` 換成 `%`
    pub fn expand(&self, template: &str) -> String {
        TOKEN
            .replace_all(template, |caps: &regex::Captures| match caps[1].as_bytes()[0] {
                b'%' => "%".to_string(),
                digit => self.get((digit - b'0') as usize).unwrap_or_default().to_string(),
            })
            .into_owned()
    }
}

/// 模板中是否含有 `%n` 佔位符（`%%` 不算）
pub fn has_placeholders(template: &str) -> bool {
    TOKEN.captures_iter(template).any(|caps| &caps[1] != "%")
}
