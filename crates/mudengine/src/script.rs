//! Lua 腳本支援模組
//!
//! 使用 mlua 執行腳本單元。腳本以 `trigger{}`、`alias{}`、`substitute{}`、
//! `hotkey{}`、`round{}` 註冊規則：
//!
//! ```lua
//! trigger { pattern = "^%0 entered the room", action = "kill %0", priority = 5 }
//! alias { pattern = "e", action = "eat" }
//! substitute { pattern = "(\\d+) gold", regex = true, action = "<fg:yellow>%1 gold</fg>" }
//! hotkey { key = 112, ctrl = true, action = function() mud.send("flee") end }
//! round { new_round = true, action = function(_, _, state) mud.echo(#state.enemies) end }
//! ```
//!
//! 回呼函式透過 `mud.*` 發出動作；動作先收集起來，函式返回後再依序交給路由器執行。

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mlua::{Function, Lua, Table, Value};
use thiserror::Error;
use tracing::debug;

use crate::router::CommandRouter;
use crate::rules::{
    Action, ActionError, Callback, Invocation, KeyChord, PatternError, RoundBoundary, RoundState, Rule,
};
use crate::rules::{Alias, Hotkey, RoundTrigger, Substitute, Trigger};

/// 註冊函式與 `mud` API
const PRELUDE: &str = r#"
__mudengine = true
__rules = {}
__effects = {}

local function register(family)
  return function(spec)
    if type(spec) ~= "table" then
      error(family .. " 需要表格參數", 2)
    end
    spec.family = family
    __rules[#__rules + 1] = spec
  end
end

trigger = register("trigger")
alias = register("alias")
substitute = register("substitute")
hotkey = register("hotkey")
round = register("round")

local function effect(...)
  __effects[#__effects + 1] = { ... }
end

mud = { vars = {}, status = {} }

function mud.send(command) effect("send", tostring(command)) end
function mud.send_all(command) effect("send_all", tostring(command)) end
function mud.send_to(target, command) effect("send_to", tostring(target), tostring(command)) end
function mud.echo(text) effect("echo", tostring(text)) end
function mud.switch(target) effect("switch", tostring(target)) end
function mud.get(name) return mud.vars[name] end

function mud.set(name, value)
  name, value = tostring(name), tostring(value)
  mud.vars[name] = value
  effect("set", name, value)
end

function mud.clear(name)
  name = tostring(name)
  mud.vars[name] = nil
  effect("clear", name)
end

function mud.connected() return mud.status.connected == true end
function mud.first_connected() return mud.status.first_connected == true end
function mud.same_room() return mud.status.same_room == true end
function mud.same_group() return mud.status.same_group == true end
"#;

/// 腳本執行錯誤
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Lua 錯誤: {0}")]
    Lua(String),

    #[error("腳本 `{unit}` 第 {index} 條規則無效: {reason}")]
    InvalidRule {
        unit: String,
        index: usize,
        reason: String,
    },

    #[error("腳本 `{unit}` 的條件無法編譯: {source}")]
    Pattern {
        unit: String,
        #[source]
        source: PatternError,
    },

    #[error("讀取腳本失敗: {0}")]
    Io(#[from] std::io::Error),
}

impl From<mlua::Error> for ScriptError {
    fn from(err: mlua::Error) -> Self {
        ScriptError::Lua(err.to_string())
    }
}

impl From<mlua::Error> for ActionError {
    fn from(err: mlua::Error) -> Self {
        ActionError::Script(err.to_string())
    }
}

/// 一個腳本單元；名稱同時是其規則的預設群組
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptUnit {
    pub name: String,
    pub source: String,
}

impl ScriptUnit {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }
}

/// 腳本單元來源
pub trait ScriptSource {
    fn units(&self) -> Result<Vec<ScriptUnit>, ScriptError>;
}

impl ScriptSource for [ScriptUnit] {
    fn units(&self) -> Result<Vec<ScriptUnit>, ScriptError> {
        Ok(self.to_vec())
    }
}

/// 目錄中的 `*.lua` 檔，依檔名排序
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl ScriptSource for DirectorySource {
    fn units(&self) -> Result<Vec<ScriptUnit>, ScriptError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "lua"))
            .collect();
        paths.sort();

        paths
            .into_iter()
            .map(|path| {
                let name = path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Ok(ScriptUnit::new(name, fs::read_to_string(&path)?))
            })
            .collect()
    }
}

/// 腳本註冊出的規則
#[derive(Debug)]
pub enum RegisteredRule {
    Trigger(Trigger),
    Alias(Alias),
    Substitute(Substitute),
    Hotkey(Hotkey),
    Round(RoundTrigger),
}

/// 一條註冊；未指定群組時使用腳本單元名稱
#[derive(Debug)]
pub struct Registration {
    pub group: Option<String>,
    pub rule: RegisteredRule,
}

/// Lua 腳本引擎
pub struct ScriptEngine {
    lua: Arc<Lua>,
}

impl ScriptEngine {
    pub fn new() -> Self {
        Self { lua: Arc::new(Lua::new()) }
    }

    fn ensure_prelude(&self) -> mlua::Result<()> {
        if self.lua.globals().get::<Option<bool>>("__mudengine")?.is_none() {
            self.lua.load(PRELUDE).set_name("prelude").exec()?;
        }
        Ok(())
    }

    /// 執行腳本單元並編譯它註冊的所有規則；任何一條失敗則整個單元失敗
    pub fn load(&self, unit: &ScriptUnit) -> Result<Vec<Registration>, ScriptError> {
        self.ensure_prelude()?;
        let globals = self.lua.globals();
        globals.set("__rules", self.lua.create_table()?)?;

        self.lua.load(unit.source.as_str()).set_name(unit.name.as_str()).exec()?;

        // 載入時期的 mud.* 呼叫不執行
        globals.set("__effects", self.lua.create_table()?)?;

        let specs: Table = globals.get("__rules")?;
        let mut registrations = Vec::new();
        for (i, spec) in specs.sequence_values::<Table>().enumerate() {
            registrations.push(self.registration(unit, i + 1, &spec?)?);
        }
        debug!("腳本 {} 註冊了 {} 條規則", unit.name, registrations.len());
        Ok(registrations)
    }

    fn registration(&self, unit: &ScriptUnit, index: usize, spec: &Table) -> Result<Registration, ScriptError> {
        let invalid = |reason: &str| ScriptError::InvalidRule {
            unit: unit.name.clone(),
            index,
            reason: reason.to_string(),
        };
        let pattern_error = |source: PatternError| ScriptError::Pattern {
            unit: unit.name.clone(),
            source,
        };

        let action = match spec.get::<Value>("action")? {
            Value::String(_) => Action::Template(spec.get::<String>("action")?),
            Value::Function(function) => Action::Callback(lua_callback(Arc::clone(&self.lua), function)),
            _ => return Err(invalid("action 必須是字串或函式")),
        };
        let family: String = spec.get("family")?;
        let priority = spec.get::<Option<i32>>("priority")?.unwrap_or(0);
        let stop = spec.get::<Option<bool>>("stop")?.unwrap_or(false);
        let is_regex = spec.get::<Option<bool>>("regex")?.unwrap_or(false);
        let group = spec.get::<Option<String>>("group")?;
        let pattern = || -> Result<String, ScriptError> {
            spec.get::<Option<String>>("pattern")?
                .ok_or_else(|| invalid("缺少 pattern"))
        };

        let finish = |mut rule: Rule<_>| {
            rule.priority = priority;
            rule.stop_process = stop;
            rule
        };

        let rule = match family.as_str() {
            "trigger" => RegisteredRule::Trigger(finish(
                Rule::trigger(&pattern()?, is_regex, action).map_err(pattern_error)?,
            )),
            "alias" => RegisteredRule::Alias(finish(
                Rule::alias(&pattern()?, is_regex, action).map_err(pattern_error)?,
            )),
            "substitute" => RegisteredRule::Substitute(finish(
                Rule::substitute(&pattern()?, is_regex, action).map_err(pattern_error)?,
            )),
            "hotkey" => {
                let key = spec
                    .get::<Option<u32>>("key")?
                    .ok_or_else(|| invalid("缺少 key"))?;
                let chord = KeyChord {
                    key,
                    ctrl: spec.get::<Option<bool>>("ctrl")?.unwrap_or(false),
                    alt: spec.get::<Option<bool>>("alt")?.unwrap_or(false),
                    shift: spec.get::<Option<bool>>("shift")?.unwrap_or(false),
                };
                let mut rule = Rule::new(chord, action);
                rule.priority = priority;
                RegisteredRule::Hotkey(rule)
            }
            "round" => {
                let boundary = if spec.get::<Option<bool>>("new_round")?.unwrap_or(false) {
                    RoundBoundary::NewRound
                } else {
                    RoundBoundary::EndOfRound
                };
                let mut rule = Rule::new(boundary, action);
                rule.priority = priority;
                RegisteredRule::Round(rule)
            }
            other => return Err(invalid(&format!("未知的規則種類 {other}"))),
        };

        Ok(Registration { group, rule })
    }

    /// 驗證腳本語法
    pub fn validate(&self, code: &str) -> Result<(), ScriptError> {
        self.lua.load(code).into_function()?;
        Ok(())
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// 回呼期間由 `mud.*` 收集的動作
#[derive(Debug, Clone, PartialEq, Eq)]
enum Effect {
    Send(String),
    SendAll(String),
    SendTo(String, String),
    Echo(String),
    Switch(String),
    Set(String, String),
    Clear(String),
}

impl Effect {
    fn from_entry(entry: &Table) -> mlua::Result<Self> {
        let kind: String = entry.get(1)?;
        let first: String = entry.get(2)?;
        let second = entry.get::<Option<String>>(3)?.unwrap_or_default();
        Ok(match kind.as_str() {
            "send" => Self::Send(first),
            "send_all" => Self::SendAll(first),
            "send_to" => Self::SendTo(first, second),
            "echo" => Self::Echo(first),
            "switch" => Self::Switch(first),
            "set" => Self::Set(first, second),
            "clear" => Self::Clear(first),
            other => return Err(mlua::Error::runtime(format!("未知的動作: {other}"))),
        })
    }

    fn apply(self, router: &mut CommandRouter<'_>) {
        match self {
            Self::Send(command) => router.send(&command),
            Self::SendAll(command) => router.send_all(&command),
            Self::SendTo(target, command) => {
                router.send_to(&target, &command);
            }
            Self::Echo(text) => router.echo(&text),
            Self::Switch(target) => {
                router.switch_window(&target);
            }
            Self::Set(name, value) => router.set_var(&name, &value),
            Self::Clear(name) => {
                router.clear_var(&name);
            }
        }
    }
}

fn lua_callback(lua: Arc<Lua>, function: Function) -> Callback {
    Arc::new(move |router: &mut CommandRouter<'_>, invocation: &Invocation<'_>| {
        let effects = call_lua(&lua, &function, router, invocation)?;
        for effect in effects {
            effect.apply(router);
        }
        Ok(())
    })
}

/// 以 `(text, captures, round)` 呼叫 Lua 函式，回傳收集到的動作
fn call_lua(
    lua: &Lua,
    function: &Function,
    router: &CommandRouter<'_>,
    invocation: &Invocation<'_>,
) -> mlua::Result<Vec<Effect>> {
    let globals = lua.globals();
    let mud: Table = globals.get("mud")?;

    let vars = lua.create_table()?;
    for (name, value) in router.variables() {
        vars.set(name, value)?;
    }
    mud.set("vars", vars)?;

    let status = lua.create_table()?;
    status.set("connected", router.is_connected())?;
    status.set("first_connected", router.is_first_connected())?;
    status.set("same_room", router.same_room())?;
    status.set("same_group", router.same_group())?;
    mud.set("status", status)?;

    globals.set("__effects", lua.create_table()?)?;

    let captures = lua.create_table()?;
    for (n, value) in invocation.captures.iter() {
        if !captures.contains_key(n)? {
            captures.set(n, value)?;
        }
    }
    if let Some(tail) = invocation.captures.tail() {
        captures.set("tail", tail)?;
    }
    let round = match invocation.round {
        Some(state) => Value::Table(round_table(lua, state)?),
        None => Value::Nil,
    };

    function.call::<()>((invocation.text, captures, round))?;

    let effects: Table = globals.get("__effects")?;
    effects
        .sequence_values::<Table>()
        .map(|entry| Effect::from_entry(&entry?))
        .collect()
}

fn round_table(lua: &Lua, state: &RoundState) -> mlua::Result<Table> {
    let side = |combatants: &[crate::rules::Combatant]| -> mlua::Result<Table> {
        let list = lua.create_table()?;
        for (i, combatant) in combatants.iter().enumerate() {
            let entry = lua.create_table()?;
            entry.set("name", combatant.name.as_str())?;
            entry.set("health", combatant.health)?;
            list.set(i + 1, entry)?;
        }
        Ok(list)
    };

    let table = lua.create_table()?;
    table.set("party", side(&state.party)?)?;
    table.set("enemies", side(&state.enemies)?)?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::ConditionKind;

    fn load(source: &str) -> Result<Vec<Registration>, ScriptError> {
        ScriptEngine::new().load(&ScriptUnit::new("unit", source))
    }

    #[test]
    fn test_script_validation() {
        let engine = ScriptEngine::new();
        assert!(engine.validate("local x = 1 + 2").is_ok());
        assert!(engine.validate("function broken(").is_err());
    }

    #[test]
    fn test_registers_all_families() {
        let registrations = load(
            r#"
trigger { pattern = "^%0 entered the room", action = "kill %0", priority = 5 }
alias { pattern = "e", action = "eat", group = "food" }
substitute { pattern = "red", action = "crimson", stop = true }
hotkey { key = 112, ctrl = true, action = function() mud.send("flee") end }
round { new_round = true, action = "kick" }
"#,
        )
        .unwrap();
        assert_eq!(registrations.len(), 5);

        match &registrations[0].rule {
            RegisteredRule::Trigger(rule) => {
                assert_eq!(rule.priority, 5);
                assert!(matches!(rule.matcher.kind(), ConditionKind::Literal { .. }));
            }
            other => panic!("unexpected rule: {other:?}"),
        }
        assert_eq!(registrations[1].group.as_deref(), Some("food"));
        assert!(matches!(&registrations[2].rule, RegisteredRule::Substitute(rule) if rule.stop_process));
        match &registrations[3].rule {
            RegisteredRule::Hotkey(rule) => {
                assert_eq!(rule.matcher, KeyChord::new(112).ctrl());
                assert!(matches!(rule.action, Action::Callback(_)));
            }
            other => panic!("unexpected rule: {other:?}"),
        }
        assert!(matches!(&registrations[4].rule, RegisteredRule::Round(rule) if rule.matcher == RoundBoundary::NewRound));
    }

    #[test]
    fn test_bad_pattern_fails_whole_unit() {
        let result = load(
            r#"
trigger { pattern = "fine", action = "x" }
trigger { pattern = "(broken", regex = true, action = "y" }
"#,
        );
        assert!(matches!(result, Err(ScriptError::Pattern { .. })));
    }

    #[test]
    fn test_missing_fields() {
        assert!(matches!(
            load(r#"trigger { action = "x" }"#),
            Err(ScriptError::InvalidRule { index: 1, .. })
        ));
        assert!(matches!(
            load(r#"alias { pattern = "x", action = 3 }"#),
            Err(ScriptError::InvalidRule { .. })
        ));
        assert!(matches!(load("trigger(1)"), Err(ScriptError::Lua(_))));
    }

    #[test]
    fn test_reload_starts_fresh() {
        let engine = ScriptEngine::new();
        let first = engine.load(&ScriptUnit::new("a", r#"alias { pattern = "x", action = "y" }"#)).unwrap();
        let second = engine.load(&ScriptUnit::new("b", "local nothing = true")).unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn test_directory_source_sorted() {
        let dir = std::env::temp_dir().join(format!("mudengine_scripts_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("b.lua"), "-- b").unwrap();
        fs::write(dir.join("a.lua"), "-- a").unwrap();
        fs::write(dir.join("notes.txt"), "skip").unwrap();

        let units = DirectorySource::new(&dir).units().unwrap();
        let names: Vec<&str> = units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(units[0].source, "-- a");

        let _ = fs::remove_dir_all(&dir);
    }
}
