//! 命令路由
//!
//! 規則動作唯一能用的操作介面。所有會再觸發比對的操作都帶著同一條 [`CommandChain`]，
//! 跨視窗時也一樣；鏈上任何一處超過深度上限，整條鏈就此中止。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::host::WindowId;
use crate::rules::{Action, ActionError, Callback, Invocation};
use crate::session::Session;

/// 錯誤訊息顯示的最大字數
const FAULT_PREVIEW_CHARS: usize = 160;

/// 一條命令呼叫鏈：目前深度，以及整條鏈共用的中止旗標
#[derive(Debug, Clone, Default)]
pub struct CommandChain {
    depth: usize,
    aborted: Arc<AtomicBool>,
}

impl CommandChain {
    /// 使用者輸入或伺服器文字開始的新鏈
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at_depth(depth: usize) -> Self {
        Self {
            depth,
            ..Self::default()
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// 下一層；與本層共用中止旗標
    pub fn next(&self) -> Self {
        Self {
            depth: self.depth + 1,
            aborted: Arc::clone(&self.aborted),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// 中止整條鏈；只有第一次呼叫回傳 `true`
    pub(crate) fn abort(&self) -> bool {
        !self.aborted.swap(true, Ordering::SeqCst)
    }
}

/// 綁定在某個 session 與呼叫鏈上的路由器
pub struct CommandRouter<'a> {
    session: &'a mut Session,
    chain: CommandChain,
}

impl<'a> CommandRouter<'a> {
    pub(crate) fn new(session: &'a mut Session, chain: CommandChain) -> Self {
        Self { session, chain }
    }

    pub fn depth(&self) -> usize {
        self.chain.depth()
    }

    pub fn chain(&self) -> &CommandChain {
        &self.chain
    }

    pub fn profile(&self) -> &str {
        self.session.profile()
    }

    /// 在本視窗執行命令（會經過別名與 `#` 命令）
    pub fn send(&mut self, command: &str) {
        self.session.send_command_in(command, &self.chain.next());
    }

    /// 在每個視窗執行命令
    pub fn send_all(&mut self, command: &str) {
        let ids = self.session.host().window_ids();
        for id in ids {
            self.send_to_window(id, command);
        }
    }

    /// 在指定視窗執行命令；`target` 可以是視窗名稱或序號
    pub fn send_to(&mut self, target: &str, command: &str) -> bool {
        match self.resolve(target) {
            Some(id) => {
                self.send_to_window(id, command);
                true
            }
            None => {
                self.echo(&format!("<fg:yellow>找不到視窗: {target}</fg>"));
                false
            }
        }
    }

    fn send_to_window(&mut self, id: WindowId, command: &str) {
        if self.chain.is_aborted() {
            return;
        }
        if id == self.session.window() {
            self.send(command);
        } else {
            debug!("轉送命令到視窗 {}: {}", id, command);
            self.session.host().dispatch_command(id, command, self.chain.next());
        }
    }

    /// 名稱或序號轉成視窗編號
    pub fn resolve(&self, target: &str) -> Option<WindowId> {
        let host = self.session.host();
        match target.parse::<usize>() {
            Ok(index) => host.window_at(index),
            Err(_) => host.find_window(target),
        }
    }

    /// 只在本地顯示，支援內嵌樣式標記
    pub fn echo(&mut self, text: &str) {
        self.session.echo(text);
    }

    pub fn switch_window(&mut self, target: &str) -> bool {
        match self.resolve(target) {
            Some(id) => self.session.host().switch_window(id),
            None => {
                self.echo(&format!("<fg:yellow>找不到視窗: {target}</fg>"));
                false
            }
        }
    }

    pub fn variables(&self) -> impl Iterator<Item = (&str, &str)> {
        self.session.variables()
    }

    pub fn get_var(&self, name: &str) -> Option<&str> {
        self.session.variable(name)
    }

    pub fn set_var(&mut self, name: &str, value: &str) {
        self.session.set_variable(name, value);
    }

    pub fn clear_var(&mut self, name: &str) -> bool {
        self.session.clear_variable(name)
    }

    /// 本視窗是否已連線
    pub fn is_connected(&self) -> bool {
        self.session.host().is_connected(self.session.window())
    }

    /// 本視窗是否為第一個已連線的視窗
    pub fn is_first_connected(&self) -> bool {
        self.session.host().first_connected() == Some(self.session.window())
    }

    /// 本視窗的角色是否與目前視窗的角色在同一個房間
    pub fn same_room(&self) -> bool {
        let host = self.session.host();
        let own = host.location(self.session.window());
        own.same_room(&host.location(host.current_window()))
    }

    pub fn same_group(&self) -> bool {
        let host = self.session.host();
        let own = host.location(self.session.window());
        own.same_group(&host.location(host.current_window()))
    }

    /// 執行規則動作：模板展開後送出，回呼直接呼叫
    pub(crate) fn run_action(&mut self, pattern: &str, action: &Action, invocation: &Invocation<'_>) {
        match action {
            Action::Template(template) => {
                let command = invocation.captures.expand(template);
                self.send(&command);
            }
            Action::Callback(callback) => self.invoke(pattern, callback, invocation),
        }
    }

    /// 呼叫回呼；失敗時回報但不中斷後續規則
    pub(crate) fn invoke(&mut self, pattern: &str, callback: &Callback, invocation: &Invocation<'_>) {
        if self.session.is_closed() || self.chain.is_aborted() {
            return;
        }
        if let Err(e) = callback(self, invocation) {
            self.report_fault(pattern, &e);
        }
    }

    /// 把規則錯誤顯示給使用者並寫入日誌
    pub fn report_fault(&mut self, pattern: &str, error: &ActionError) {
        let message = error.to_string();
        let mut preview: String = message.chars().take(FAULT_PREVIEW_CHARS).collect();
        if preview.len() < message.len() {
            preview.push('…');
        }
        warn!(profile = self.session.profile(), pattern, "規則執行失敗: {}", message);
        self.session.echo_plain_error(&format!(
            "[{}] 規則 `{}` 執行失敗: {}",
            self.session.profile(),
            pattern,
            preview
        ));
    }
}
