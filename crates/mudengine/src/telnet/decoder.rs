//! Telnet 協定解碼器
//!
//! 逐位元組掃描伺服器資料，分離出：
//! - 一般文字行（CR LF 或 GA 結束）
//! - 自訂訊息通道（`IAC SB 102 <type> ... IAC SE`）的帶型別文字
//! - 需要回送給伺服器的協商回應
//! - 壓縮起始標記（交由 [`Inbound`](super::inbound::Inbound) 切換位元組來源）
//!
//! 不完整的控制序列若剛好落在封包尾端，會保留到下一次 `feed` 再處理。

use bytes::{BufMut, BytesMut};
use tracing::{debug, trace};

use super::protocol::{reply_to, TelnetCommand, TelnetOption, IAC};
use crate::encoding::Codepage;

const SE: u8 = TelnetCommand::Se as u8;
const WILL: u8 = TelnetCommand::Will as u8;

/// 協商狀態（隨連線建立，斷線即丟棄）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NegotiationState {
    /// 伺服器已提議壓縮
    pub compression_negotiated: bool,
    /// 已收到壓縮起始標記
    pub compression_active: bool,
    /// 伺服器已提議自訂訊息通道
    pub custom_negotiated: bool,
    /// 目前開啟中的自訂訊息型別
    pub open_message: Option<u8>,
    /// 伺服器負責回顯（輸入應遮蔽，例如密碼）
    pub server_echo: bool,
}

/// 解碼事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    /// 一般文字行（不含行尾）
    Line(String),
    /// 自訂訊息通道的文字
    Message { kind: u8, text: String },
    /// 需要寫回伺服器的協商回應
    Reply(Vec<u8>),
    /// 回顯模式改變
    EchoMode { server_echo: bool },
}

/// 單次 `feed` 的結果
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Feed {
    pub events: Vec<DecodedEvent>,
    /// 壓縮起始標記之後的位置（以本次傳入的 chunk 為基準）；
    /// 之後的位元組都是壓縮資料，解碼器未處理
    pub compress_from: Option<usize>,
}

/// Telnet 協定解碼器
#[derive(Debug)]
pub struct ProtocolDecoder {
    codepage: Codepage,
    state: NegotiationState,
    /// 一般通道累積中的文字
    line: BytesMut,
    /// 自訂訊息通道累積中的文字
    message: BytesMut,
    /// 上一個 chunk 尾端未完成的控制序列
    carry: Vec<u8>,
    /// 正在略過不認得的 sub-negotiation 內容
    skipping: bool,
}

impl ProtocolDecoder {
    pub fn new(codepage: Codepage) -> Self {
        Self {
            codepage,
            state: NegotiationState::default(),
            line: BytesMut::with_capacity(256),
            message: BytesMut::new(),
            carry: Vec::new(),
            skipping: false,
        }
    }

    /// 目前協商狀態
    pub fn state(&self) -> &NegotiationState {
        &self.state
    }

    /// 解碼一個 chunk
    pub fn feed(&mut self, chunk: &[u8]) -> Feed {
        let carried = self.carry.len();
        let owned;
        let input: &[u8] = if carried == 0 {
            chunk
        } else {
            let mut joined = std::mem::take(&mut self.carry);
            joined.extend_from_slice(chunk);
            owned = joined;
            &owned
        };

        let mut feed = Feed::default();
        let mut i = 0;

        while i < input.len() {
            let b = input[i];

            if self.skipping {
                if b == IAC {
                    match input.get(i + 1) {
                        None => {
                            self.carry.extend_from_slice(&input[i..]);
                            break;
                        }
                        Some(&SE) => self.skipping = false,
                        Some(_) => {}
                    }
                    i += 2;
                } else {
                    i += 1;
                }
                continue;
            }

            if b != IAC {
                match b {
                    b'\n' => self.flush(&mut feed.events),
                    b'\r' => {}
                    _ => self.current_buffer().put_u8(b),
                }
                i += 1;
                continue;
            }

            let Some(&cmd_byte) = input.get(i + 1) else {
                self.carry.extend_from_slice(&input[i..]);
                break;
            };

            if cmd_byte == IAC {
                self.current_buffer().put_u8(IAC);
                i += 2;
                continue;
            }

            match TelnetCommand::from_byte(cmd_byte) {
                Some(cmd) if cmd.is_negotiation() => {
                    let Some(&opt) = input.get(i + 2) else {
                        self.carry.extend_from_slice(&input[i..]);
                        break;
                    };
                    self.negotiate(cmd, TelnetOption::from_byte(opt), &mut feed.events);
                    i += 3;
                }
                Some(TelnetCommand::Sb) => {
                    let Some(&opt) = input.get(i + 2) else {
                        self.carry.extend_from_slice(&input[i..]);
                        break;
                    };
                    match TelnetOption::from_byte(opt) {
                        TelnetOption::Compress => {
                            if input.len() < i + 5 {
                                self.carry.extend_from_slice(&input[i..]);
                                break;
                            }
                            if input[i + 3] != WILL || input[i + 4] != SE {
                                self.skipping = true;
                                i += 3;
                                continue;
                            }
                            i += 5;
                            if !self.state.compression_active {
                                debug!("收到壓縮起始標記，切換為解壓縮資料流");
                                self.state.compression_active = true;
                                // 標記一定在本次 chunk 內結束
                                feed.compress_from = Some(i - carried);
                                return feed;
                            }
                        }
                        TelnetOption::Custom => {
                            let Some(&kind) = input.get(i + 3) else {
                                self.carry.extend_from_slice(&input[i..]);
                                break;
                            };
                            if let Some(open) = self.state.open_message {
                                self.flush_message(open, &mut feed.events);
                            }
                            trace!("開啟自訂訊息 type={}", kind);
                            self.state.open_message = Some(kind);
                            i += 4;
                        }
                        _ => {
                            self.skipping = true;
                            i += 3;
                        }
                    }
                }
                Some(TelnetCommand::Se) => {
                    if let Some(kind) = self.state.open_message.take() {
                        self.flush_message(kind, &mut feed.events);
                    }
                    i += 2;
                }
                Some(TelnetCommand::GoAhead) => {
                    if !self.current_buffer().is_empty() {
                        self.flush(&mut feed.events);
                    }
                    i += 2;
                }
                _ => i += 2,
            }
        }

        feed
    }

    fn negotiate(&mut self, cmd: TelnetCommand, option: TelnetOption, events: &mut Vec<DecodedEvent>) {
        trace!("協商 {:?} {:?}", cmd, option);
        match (cmd, option) {
            (TelnetCommand::Will, TelnetOption::Compress) => self.state.compression_negotiated = true,
            (TelnetCommand::Will, TelnetOption::Custom) => self.state.custom_negotiated = true,
            (TelnetCommand::Will | TelnetCommand::Wont, TelnetOption::Echo) => {
                let server_echo = cmd == TelnetCommand::Will;
                if self.state.server_echo != server_echo {
                    self.state.server_echo = server_echo;
                    events.push(DecodedEvent::EchoMode { server_echo });
                }
            }
            _ => {}
        }
        if let Some(reply) = reply_to(cmd, option) {
            events.push(DecodedEvent::Reply(reply));
        }
    }

    fn current_buffer(&mut self) -> &mut BytesMut {
        if self.state.open_message.is_some() {
            &mut self.message
        } else {
            &mut self.line
        }
    }

    /// 行結束：依目前開啟的訊息型別決定送往哪個通道
    fn flush(&mut self, events: &mut Vec<DecodedEvent>) {
        match self.state.open_message {
            Some(kind) => {
                let bytes = self.message.split();
                events.push(DecodedEvent::Message {
                    kind,
                    text: self.codepage.decode(&bytes),
                });
            }
            None => {
                let bytes = self.line.split();
                events.push(DecodedEvent::Line(self.codepage.decode(&bytes)));
            }
        }
    }

    fn flush_message(&mut self, kind: u8, events: &mut Vec<DecodedEvent>) {
        if self.message.is_empty() {
            return;
        }
        let bytes = self.message.split();
        events.push(DecodedEvent::Message {
            kind,
            text: self.codepage.decode(&bytes),
        });
    }
}

impl Default for ProtocolDecoder {
    fn default() -> Self {
        Self::new(Codepage::default())
    }
}
