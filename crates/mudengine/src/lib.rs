//! MUD Engine Library
//!
//! MUD 客戶端核心：
//! - `telnet`: Telnet 連線、協定解碼與 MCCP 壓縮切換
//! - `encoding`: 單位元組字碼頁編解碼
//! - `style`: 帶樣式文字、ANSI 色碼與內嵌標記
//! - `rules`: 觸發器、別名、替換、熱鍵與回合觸發器的規則模型與登錄
//! - `matcher` / `splice`: 規則比對與保留樣式的替換
//! - `router` / `session`: 規則動作的命令介面與每個視窗的工作階段
//! - `script`: Lua 腳本載入
//! - `config`: 連線設定

pub mod config;
pub mod encoding;
pub mod host;
pub mod matcher;
pub mod router;
pub mod rules;
pub mod script;
pub mod session;
pub mod splice;
pub mod style;
pub mod telnet;

pub use config::{ClientConfig, ConfigError};
pub use encoding::{Codepage, EncodingError};
pub use host::{ChannelOutlet, Location, Outlet, OutletEvent, SingleWindowHost, WindowHost, WindowId};
pub use router::{CommandChain, CommandRouter};
pub use rules::{
    Action, ActionError, Captures, Combatant, Condition, GroupSettings, Invocation, KeyChord, MatchMode,
    MemorySettings, PatternError, RoundBoundary, RoundState, Rule, RuleRegistry,
};
pub use script::{DirectorySource, ScriptEngine, ScriptError, ScriptSource, ScriptUnit};
pub use session::{Session, SessionGuard, SessionHandle, DEPTH_WARNING, MAX_DEPTH};
pub use style::{Style, StyledLine, StyledRun};
pub use telnet::{ConnectionState, ServerEvent, TelnetClient, TelnetError};
