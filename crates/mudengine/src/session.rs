//! 視窗工作階段
//!
//! 每個視窗（profile）一個 [`Session`]：持有變數、規則登錄、腳本引擎與視窗層介面，
//! 對外提供處理伺服器文字、使用者命令、熱鍵與戰鬥回合的入口。
//! 同一個 session 的比對一律循序執行；跨工作使用 [`SessionHandle`] 共享。
//! 其他視窗送來的命令經由 [`SessionHandle::dispatch`] 交付，session 忙碌時排隊，
//! 由持有者在釋放前執行。

use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::host::{Outlet, WindowHost, WindowId};
use crate::matcher;
use crate::router::{CommandChain, CommandRouter};
use crate::rules::{Action, Invocation, KeyChord, MemorySettings, RoundBoundary, RoundState, RuleRegistry};
use crate::script::{RegisteredRule, Registration, ScriptEngine, ScriptError, ScriptSource, ScriptUnit};
use crate::splice;
use crate::style::ansi::parse_ansi;
use crate::style::markup::parse_markup;
use crate::style::{Color, Style, StyledLine, StyledRun, Tone};
use crate::telnet::ServerEvent;

/// 命令展開的最大深度
pub const MAX_DEPTH: usize = 10;

/// 超過最大深度時顯示的固定警告
pub const DEPTH_WARNING: &str = "命令展開超過 10 層，已中止";

/// `#N` 重複命令的上限
const MAX_REPEAT: usize = 100;

/// 新回合觸發器的預設延遲
const DEFAULT_ROUND_DELAY: Duration = Duration::from_millis(10);

/// 單一視窗的工作階段
pub struct Session {
    window: WindowId,
    profile: String,
    registry: Arc<RuleRegistry>,
    variables: HashMap<String, String>,
    host: Arc<dyn WindowHost>,
    outlet: Arc<dyn Outlet>,
    scripts: ScriptEngine,
    closed: Arc<AtomicBool>,
}

impl Session {
    pub fn new(
        profile: impl Into<String>,
        window: WindowId,
        host: Arc<dyn WindowHost>,
        outlet: Arc<dyn Outlet>,
    ) -> Self {
        Self {
            window,
            profile: profile.into(),
            registry: Arc::new(RuleRegistry::new(Arc::new(MemorySettings::new()))),
            variables: HashMap::new(),
            host,
            outlet,
            scripts: ScriptEngine::new(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 使用外部建立的規則登錄（例如共用持久化的群組設定）
    pub fn with_registry(mut self, registry: Arc<RuleRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn window(&self) -> WindowId {
        self.window
    }

    pub fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    pub(crate) fn host(&self) -> &Arc<dyn WindowHost> {
        &self.host
    }

    pub fn variables(&self) -> impl Iterator<Item = (&str, &str)> {
        self.variables.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    pub fn set_variable(&mut self, name: &str, value: &str) {
        self.variables.insert(name.to_string(), value.to_string());
    }

    pub fn clear_variable(&mut self, name: &str) -> bool {
        self.variables.remove(name).is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 關閉後不再處理任何輸入或規則
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("關閉工作階段: {}", self.profile);
        }
    }

    /// 在本視窗顯示文字（支援內嵌樣式標記）
    pub fn echo(&self, text: &str) {
        self.outlet.display(parse_markup(text, Style::default()));
    }

    /// 顯示錯誤；內容可能含使用者寫的條件，不解析標記
    pub(crate) fn echo_plain_error(&self, text: &str) {
        let style = Style::default().with_fg(Tone::bright(Color::Red));
        self.outlet.display(StyledLine::new(vec![StyledRun::new(text, style)]));
    }

    /// 以觸發器處理一行伺服器文字，回傳觸發數量
    pub fn process_line(&mut self, line: &str) -> usize {
        if self.is_closed() {
            return 0;
        }
        let rules = self.registry.triggers();
        let mut router = CommandRouter::new(self, CommandChain::new());
        matcher::fire_triggers(&mut router, &rules, line)
    }

    /// 以別名處理一條命令：`(是否吻合, 改寫結果)`；回呼別名回傳 `(true, None)`
    pub fn process_alias(&mut self, command: &str) -> (bool, Option<String>) {
        self.process_alias_in(command, &CommandChain::new())
    }

    fn process_alias_in(&mut self, command: &str, chain: &CommandChain) -> (bool, Option<String>) {
        let rules = self.registry.aliases();
        let Some((rule, captures)) = matcher::first_alias(&rules, command) else {
            return (false, None);
        };
        debug!("別名吻合: {}", rule.matcher.source());

        match &rule.action {
            Action::Template(template) => (true, Some(matcher::expand_alias(rule, template, &captures))),
            Action::Callback(callback) => {
                let invocation = Invocation {
                    text: command,
                    captures: &captures,
                    round: None,
                };
                CommandRouter::new(self, chain.clone()).invoke(rule.matcher.source(), callback, &invocation);
                (true, None)
            }
        }
    }

    /// 套用替換規則；`None` 表示此行不顯示
    pub fn process_substitutes(&mut self, line: StyledLine) -> Option<StyledLine> {
        if self.is_closed() {
            return Some(line);
        }
        let rules = self.registry.substitutes();
        let mut router = CommandRouter::new(self, CommandChain::new());
        splice::apply_substitutes(&mut router, &rules, line)
    }

    /// 觸發熱鍵；回傳是否有綁定（呼叫端據此決定是否吃掉按鍵）
    pub fn process_hotkey(&mut self, chord: KeyChord) -> bool {
        if self.is_closed() {
            return false;
        }
        let rules = self.registry.hotkeys();
        let mut router = CommandRouter::new(self, CommandChain::new());
        matcher::fire_hotkeys(&mut router, &rules, chord)
    }

    pub fn is_bound_hotkey_event(&self, chord: KeyChord) -> bool {
        matcher::is_bound(&self.registry.hotkeys(), chord)
    }

    /// 立即觸發指定回合邊界的規則
    pub fn fire_round(&mut self, boundary: RoundBoundary, state: &RoundState) -> usize {
        if self.is_closed() {
            return 0;
        }
        let rules = self.registry.rounds();
        let mut router = CommandRouter::new(self, CommandChain::new());
        matcher::fire_rounds(&mut router, &rules, boundary, state)
    }

    /// 執行使用者命令：以 `;` 分段，`#` 開頭為內建命令，其餘經過別名後送出
    pub fn send_command(&mut self, input: &str) {
        self.send_command_in(input, &CommandChain::new());
    }

    /// 在既有呼叫鏈中執行命令。超過深度上限時整條鏈中止，警告只顯示一次。
    pub fn send_command_in(&mut self, input: &str, chain: &CommandChain) {
        if self.is_closed() || chain.is_aborted() {
            return;
        }
        if chain.depth() >= MAX_DEPTH {
            if chain.abort() {
                warn!(profile = %self.profile, "{}", DEPTH_WARNING);
                self.echo_plain_error(DEPTH_WARNING);
            }
            return;
        }

        // 單純按 Enter 送出空行；分段後的空段略過
        if input.trim().is_empty() {
            self.outlet.send_line("");
            return;
        }

        for piece in input.split(';').map(str::trim).filter(|piece| !piece.is_empty()) {
            if chain.is_aborted() {
                break;
            }
            if let Some(builtin) = piece.strip_prefix('#') {
                self.run_builtin(builtin, chain);
                continue;
            }
            match self.process_alias_in(piece, chain) {
                (true, Some(expanded)) => self.send_command_in(&expanded, &chain.next()),
                (true, None) => {}
                (false, _) => {
                    debug!("送出: {}", piece);
                    self.outlet.send_line(piece);
                }
            }
        }
    }

    fn run_builtin(&mut self, body: &str, chain: &CommandChain) {
        let (name, rest) = match body.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim_start()),
            None => (body, ""),
        };

        if let Ok(count) = name.parse::<usize>() {
            for _ in 0..count.min(MAX_REPEAT) {
                if chain.is_aborted() {
                    break;
                }
                self.send_command_in(rest, &chain.next());
            }
            return;
        }

        let mut router = CommandRouter::new(self, chain.clone());
        match name {
            "echo" => router.echo(rest),
            "var" => match rest.split_once(char::is_whitespace) {
                Some((var, value)) => router.set_var(var, value.trim_start()),
                None if !rest.is_empty() => {
                    let shown = format!("{} = {}", rest, router.get_var(rest).unwrap_or_default());
                    router.echo(&shown);
                }
                None => {
                    let mut lines: Vec<String> = router.variables().map(|(k, v)| format!("{k} = {v}")).collect();
                    lines.sort();
                    for line in lines {
                        router.echo(&line);
                    }
                }
            },
            "unvar" => {
                router.clear_var(rest);
            }
            "all" => router.send_all(rest),
            "win" => match rest.split_once(char::is_whitespace) {
                Some((target, command)) => {
                    router.send_to(target, command.trim_start());
                }
                None => router.echo("<fg:yellow>用法: #win 視窗 命令</fg>"),
            },
            "switch" => {
                router.switch_window(rest);
            }
            _ => router.echo(&format!("<fg:yellow>未知的指令: #{name}</fg>")),
        }
    }

    /// 處理一行伺服器文字：觸發器看純文字，替換規則處理帶色文字後顯示
    pub fn receive_line(&mut self, raw: &str) {
        let styled = parse_ansi(raw);
        self.process_line(&styled.text());
        if self.is_closed() {
            return;
        }
        if let Some(line) = self.process_substitutes(styled) {
            self.outlet.display(line);
        }
    }

    /// 處理讀取迴圈送來的事件
    pub fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Line(text) => self.receive_line(&text),
            ServerEvent::Message { kind, text } => self.outlet.message(kind, &text),
            ServerEvent::EchoMode { server_echo } => self.outlet.echo_mode(server_echo),
        }
    }

    /// 載入腳本單元，回傳註冊的規則數；重新載入時先清掉該單元的預設群組
    pub fn load_script(&mut self, unit: &ScriptUnit) -> Result<usize, ScriptError> {
        let registrations = self.scripts.load(unit)?;

        let cleared = self.registry.clear_group(&unit.name);
        if cleared > 0 {
            debug!("重新載入 {}，移除舊規則 {} 條", unit.name, cleared);
        }

        let count = registrations.len();
        for Registration { group, rule } in registrations {
            let group = group.as_deref().unwrap_or(&unit.name);
            match rule {
                RegisteredRule::Trigger(rule) => self.registry.add_trigger(group, rule),
                RegisteredRule::Alias(rule) => self.registry.add_alias(group, rule),
                RegisteredRule::Substitute(rule) => self.registry.add_substitute(group, rule),
                RegisteredRule::Hotkey(rule) => self.registry.add_hotkey(group, rule),
                RegisteredRule::Round(rule) => self.registry.add_round(group, rule),
            }
        }
        info!("已載入腳本 {}: {} 條規則", unit.name, count);
        Ok(count)
    }

    /// 依序載入來源中的所有腳本單元
    pub fn load_scripts<S: ScriptSource + ?Sized>(&mut self, source: &S) -> Result<usize, ScriptError> {
        let mut total = 0;
        for unit in source.units()? {
            total += self.load_script(&unit)?;
        }
        Ok(total)
    }
}

/// 其他視窗送來、等待執行的命令
#[derive(Debug, Default)]
struct Inbox {
    queue: VecDeque<(String, CommandChain)>,
    /// 有持有者正在使用 session，且會在釋放前清空佇列
    busy: bool,
}

/// [`SessionHandle::lock`] 取得的 session；釋放前先執行排隊中的命令
pub struct SessionGuard<'a> {
    session: MutexGuard<'a, Session>,
    inbox: &'a Mutex<Inbox>,
}

impl Deref for SessionGuard<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl DerefMut for SessionGuard<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        loop {
            let (command, chain) = {
                let mut inbox = self.inbox.lock().unwrap_or_else(PoisonError::into_inner);
                match inbox.queue.pop_front() {
                    Some(next) => next,
                    None => {
                        inbox.busy = false;
                        return;
                    }
                }
            };
            self.session.send_command_in(&command, &chain);
        }
    }
}

/// 可跨工作共享的 session
#[derive(Clone)]
pub struct SessionHandle {
    session: Arc<Mutex<Session>>,
    inbox: Arc<Mutex<Inbox>>,
    closed: Arc<AtomicBool>,
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
    round_delay: Duration,
}

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        let closed = Arc::clone(&session.closed);
        Self {
            session: Arc::new(Mutex::new(session)),
            inbox: Arc::new(Mutex::new(Inbox::default())),
            closed,
            pending: Arc::new(Mutex::new(Vec::new())),
            round_delay: DEFAULT_ROUND_DELAY,
        }
    }

    /// 依設定建立，套用新回合延遲
    pub fn from_config(session: Session, config: &ClientConfig) -> Self {
        Self::new(session).with_round_delay(config.round_delay())
    }

    pub fn with_round_delay(mut self, delay: Duration) -> Self {
        self.round_delay = delay;
        self
    }

    pub fn round_delay(&self) -> Duration {
        self.round_delay
    }

    /// 取得 session；同一時間只有一個持有者在比對
    pub fn lock(&self) -> SessionGuard<'_> {
        let session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        self.inbox.lock().unwrap_or_else(PoisonError::into_inner).busy = true;
        SessionGuard {
            session,
            inbox: &self.inbox,
        }
    }

    /// 交付其他視窗送來的命令。session 忙碌時（包括呼叫鏈繞回本視窗）
    /// 只排入佇列，由目前的持有者在釋放前執行，不會等鎖。
    pub fn dispatch(&self, command: &str, chain: CommandChain) {
        {
            let mut inbox = self.inbox.lock().unwrap_or_else(PoisonError::into_inner);
            inbox.queue.push_back((command.to_string(), chain));
            if inbox.busy {
                debug!("session 忙碌中，命令排入佇列: {}", command);
                return;
            }
        }
        drop(self.lock());
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 戰鬥回合通知：回合結束立即觸發；新回合延遲一小段時間再觸發，
    /// 讓同時抵達的狀態更新先處理完。沒有 tokio runtime 時立即觸發。
    pub fn process_round(&self, is_new_round: bool, state: RoundState) {
        if self.is_closed() {
            return;
        }
        if !is_new_round {
            self.lock().fire_round(RoundBoundary::EndOfRound, &state);
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.lock().fire_round(RoundBoundary::NewRound, &state);
            return;
        };

        let handle = self.clone();
        let task = runtime.spawn(async move {
            tokio::time::sleep(handle.round_delay).await;
            if !handle.is_closed() {
                handle.lock().fire_round(RoundBoundary::NewRound, &state);
            }
        });

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|task| !task.is_finished());
        pending.push(task);
    }

    /// 把讀取迴圈的事件交給 session，直到通道關閉或 session 關閉
    pub async fn run_events(&self, mut events: mpsc::Receiver<ServerEvent>) {
        while let Some(event) = events.recv().await {
            if self.is_closed() {
                break;
            }
            self.lock().handle_event(event);
        }
    }

    /// 關閉 session 並取消尚未觸發的新回合工作
    pub fn teardown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        for task in pending.drain(..) {
            task.abort();
        }
        info!("工作階段已拆除");
    }
}
