//! 規則模型
//!
//! 五種規則共用同一個結構 [`Rule`]，只差在比對對象：
//! - [`Trigger`] / [`Alias`] / [`Substitute`]：文字條件 [`Condition`]
//! - [`Hotkey`]：按鍵組合 [`KeyChord`]
//! - [`RoundTrigger`]：戰鬥回合邊界 [`RoundBoundary`]

pub mod condition;
pub mod registry;
pub mod settings;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::router::CommandRouter;

pub use condition::{has_placeholders, Captures, Condition, ConditionKind, MatchMode, PatternError};
pub use registry::{RuleCounts, RuleRegistry, Snapshot};
pub use settings::{GroupSettings, MemorySettings, SettingsError};

/// 規則動作執行失敗
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("腳本錯誤: {0}")]
    Script(String),

    #[error("{0}")]
    Failed(String),
}

/// 規則觸發時傳給回呼的資料
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    /// 被比對的文字（行、命令；熱鍵與回合為空字串）
    pub text: &'a str,
    pub captures: &'a Captures,
    /// 回合觸發器才有
    pub round: Option<&'a RoundState>,
}

/// 使用者回呼：透過 [`CommandRouter`] 發出後續動作
pub type Callback =
    Arc<dyn Fn(&mut CommandRouter<'_>, &Invocation<'_>) -> Result<(), ActionError> + Send + Sync>;

/// 規則動作
#[derive(Clone)]
pub enum Action {
    /// 展開 `%n` 後送出（別名則作為改寫結果）
    Template(String),
    Callback(Callback),
}

impl Action {
    pub fn template(text: impl Into<String>) -> Self {
        Self::Template(text.into())
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&mut CommandRouter<'_>, &Invocation<'_>) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(f))
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Template(text) => f.debug_tuple("Template").field(text).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// 按鍵組合；四個欄位都相同才算吻合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyChord {
    pub key: u32,
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
}

impl KeyChord {
    pub const fn new(key: u32) -> Self {
        Self {
            key,
            ctrl: false,
            alt: false,
            shift: false,
        }
    }

    pub const fn ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub const fn alt(mut self) -> Self {
        self.alt = true;
        self
    }

    pub const fn shift(mut self) -> Self {
        self.shift = true;
        self
    }
}

/// 戰鬥回合邊界
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoundBoundary {
    NewRound,
    EndOfRound,
}

/// 戰鬥中的一個角色
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combatant {
    pub name: String,
    /// 生命百分比
    pub health: u8,
}

/// 回合狀態快照
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundState {
    pub party: Vec<Combatant>,
    pub enemies: Vec<Combatant>,
}

/// 一條規則
#[derive(Debug, Clone)]
pub struct Rule<M> {
    pub matcher: M,
    pub action: Action,
    /// 數字越小越先處理
    pub priority: i32,
    /// 加入登錄時由登錄設定
    pub group: String,
    /// 替換規則：套用後不再處理後續規則
    pub stop_process: bool,
}

impl<M> Rule<M> {
    pub fn new(matcher: M, action: Action) -> Self {
        Self {
            matcher,
            action,
            priority: 0,
            group: String::new(),
            stop_process: false,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn stop_process(mut self) -> Self {
        self.stop_process = true;
        self
    }
}

pub type Trigger = Rule<Condition>;
pub type Alias = Rule<Condition>;
pub type Substitute = Rule<Condition>;
pub type Hotkey = Rule<KeyChord>;
pub type RoundTrigger = Rule<RoundBoundary>;

impl Rule<Condition> {
    /// 觸發器：在行內搜尋
    pub fn trigger(pattern: &str, is_regex: bool, action: Action) -> Result<Self, PatternError> {
        Ok(Self::new(Condition::compile(pattern, is_regex, MatchMode::Search)?, action))
    }

    /// 別名：吻合整條命令
    pub fn alias(pattern: &str, is_regex: bool, action: Action) -> Result<Self, PatternError> {
        Ok(Self::new(Condition::compile(pattern, is_regex, MatchMode::Whole)?, action))
    }

    /// 替換：在行內搜尋
    pub fn substitute(pattern: &str, is_regex: bool, action: Action) -> Result<Self, PatternError> {
        Ok(Self::new(Condition::compile(pattern, is_regex, MatchMode::Search)?, action))
    }
}
