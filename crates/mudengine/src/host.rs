//! 視窗層介面
//!
//! 引擎不直接持有視窗物件，只透過兩個窄介面與外界互動：
//! - [`WindowHost`]：查找與切換視窗、把命令交給其他視窗、查詢連線與位置
//! - [`Outlet`]：本視窗的輸出（送往伺服器、顯示、側通道訊息）

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::warn;

use crate::router::CommandChain;
use crate::style::StyledLine;

/// 視窗編號
pub type WindowId = usize;

/// 角色所在位置
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub room: Option<String>,
    pub group: Option<String>,
}

impl Location {
    pub fn same_room(&self, other: &Location) -> bool {
        self.room.is_some() && self.room == other.room
    }

    pub fn same_group(&self, other: &Location) -> bool {
        self.group.is_some() && self.group == other.group
    }
}

/// 多視窗管理者提供給引擎的能力
pub trait WindowHost: Send + Sync {
    /// 使用者目前看著的視窗
    fn current_window(&self) -> WindowId;

    fn find_window(&self, name: &str) -> Option<WindowId>;

    /// 依使用者看到的序號（從 1 開始）取得視窗
    fn window_at(&self, index: usize) -> Option<WindowId>;

    fn window_ids(&self) -> Vec<WindowId>;

    fn switch_window(&self, id: WindowId) -> bool;

    /// 讓另一個視窗執行命令，沿用同一條呼叫鏈。
    ///
    /// 呼叫端此時仍持有自己的 session；實作應經由 [`SessionHandle::dispatch`]
    /// 交付，繞回忙碌中的視窗時命令會排隊而不是等鎖。
    ///
    /// [`SessionHandle::dispatch`]: crate::session::SessionHandle::dispatch
    fn dispatch_command(&self, id: WindowId, command: &str, chain: CommandChain);

    fn is_connected(&self, id: WindowId) -> bool;

    fn first_connected(&self) -> Option<WindowId>;

    fn location(&self, id: WindowId) -> Location;
}

/// 單一視窗的輸出端
pub trait Outlet: Send + Sync {
    /// 送一行命令到伺服器
    fn send_line(&self, line: &str);

    /// 在本視窗顯示一行
    fn display(&self, line: StyledLine);

    /// 側通道訊息
    fn message(&self, _kind: u8, _text: &str) {}

    /// 伺服器回顯模式改變（輸入框遮蔽密碼用）
    fn echo_mode(&self, _server_echo: bool) {}
}

/// [`ChannelOutlet`] 送出的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutletEvent {
    Send(String),
    Display(StyledLine),
    Message { kind: u8, text: String },
    EchoMode { server_echo: bool },
}

/// 把輸出轉成事件送進通道，由視窗層另一端消化
#[derive(Debug, Clone)]
pub struct ChannelOutlet {
    tx: mpsc::UnboundedSender<OutletEvent>,
}

impl ChannelOutlet {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutletEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: OutletEvent) {
        if self.tx.send(event).is_err() {
            warn!("輸出通道已關閉");
        }
    }
}

impl Outlet for ChannelOutlet {
    fn send_line(&self, line: &str) {
        self.emit(OutletEvent::Send(line.to_string()));
    }

    fn display(&self, line: StyledLine) {
        self.emit(OutletEvent::Display(line));
    }

    fn message(&self, kind: u8, text: &str) {
        self.emit(OutletEvent::Message {
            kind,
            text: text.to_string(),
        });
    }

    fn echo_mode(&self, server_echo: bool) {
        self.emit(OutletEvent::EchoMode { server_echo });
    }
}

/// 只有一個視窗的宿主
#[derive(Debug)]
pub struct SingleWindowHost {
    name: String,
    connected: AtomicBool,
}

impl SingleWindowHost {
    /// 唯一視窗的編號
    pub const WINDOW: WindowId = 0;

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connected: AtomicBool::new(false),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl WindowHost for SingleWindowHost {
    fn current_window(&self) -> WindowId {
        Self::WINDOW
    }

    fn find_window(&self, name: &str) -> Option<WindowId> {
        (name == self.name).then_some(Self::WINDOW)
    }

    fn window_at(&self, index: usize) -> Option<WindowId> {
        (index == 1).then_some(Self::WINDOW)
    }

    fn window_ids(&self) -> Vec<WindowId> {
        vec![Self::WINDOW]
    }

    fn switch_window(&self, id: WindowId) -> bool {
        id == Self::WINDOW
    }

    fn dispatch_command(&self, id: WindowId, command: &str, _chain: CommandChain) {
        warn!("視窗 {} 不存在，忽略命令: {}", id, command);
    }

    fn is_connected(&self, id: WindowId) -> bool {
        id == Self::WINDOW && self.connected.load(Ordering::SeqCst)
    }

    fn first_connected(&self) -> Option<WindowId> {
        self.is_connected(Self::WINDOW).then_some(Self::WINDOW)
    }

    fn location(&self, _id: WindowId) -> Location {
        Location::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_comparison() {
        let here = Location {
            room: Some("Temple".to_string()),
            group: None,
        };
        assert!(here.same_room(&here.clone()));
        assert!(!here.same_group(&here.clone()));
        assert!(!Location::default().same_room(&Location::default()));
    }

    #[test]
    fn test_single_window_host() {
        let host = SingleWindowHost::new("main");
        assert_eq!(host.find_window("main"), Some(0));
        assert_eq!(host.window_at(2), None);
        assert_eq!(host.first_connected(), None);
        host.set_connected(true);
        assert_eq!(host.first_connected(), Some(0));
    }

    #[test]
    fn test_channel_outlet() {
        let (outlet, mut rx) = ChannelOutlet::channel();
        outlet.send_line("look");
        outlet.message(3, "chat");
        assert_eq!(rx.try_recv().unwrap(), OutletEvent::Send("look".to_string()));
        assert_eq!(
            rx.try_recv().unwrap(),
            OutletEvent::Message {
                kind: 3,
                text: "chat".to_string()
            }
        );
    }
}
