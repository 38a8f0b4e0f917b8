//! Telnet 客戶端
//!
//! 非同步連線管理與讀取迴圈。一條連線只有一個讀取迴圈，擁有 [`Inbound`]
//! 解碼管線；協商回應在迴圈內直接寫回 socket。

use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use super::compression::CompressionError;
use super::decoder::{DecodedEvent, NegotiationState};
use super::inbound::Inbound;
use super::protocol::escape_iac;
use crate::config::ClientConfig;
use crate::encoding::Codepage;

/// Telnet 客戶端錯誤
#[derive(Debug, Error)]
pub enum TelnetError {
    #[error("連線失敗: {0}")]
    ConnectionFailed(#[from] io::Error),

    #[error("連線逾時")]
    Timeout,

    #[error("連線已關閉")]
    Closed,

    #[error("DNS 解析失敗: {0}")]
    DnsResolutionFailed(String),

    #[error(transparent)]
    Compression(#[from] CompressionError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

/// 連線狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// 讀取迴圈送往視窗層的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// 一般文字行（可能含 ANSI 色碼）
    Line(String),
    /// 自訂訊息通道
    Message { kind: u8, text: String },
    /// 伺服器回顯模式改變
    EchoMode { server_echo: bool },
}

/// Telnet 客戶端
pub struct TelnetClient<S = TcpStream> {
    stream: Option<S>,
    codepage: Codepage,
    read_buffer_size: usize,
    state: ConnectionState,
    inbound: Inbound,
}

impl TelnetClient<TcpStream> {
    /// 依設定連線到 MUD 伺服器
    pub async fn connect(config: &ClientConfig) -> Result<Self, TelnetError> {
        let codepage = config.codepage()?;
        info!("正在連線到 {}:{}", config.host, config.port);

        let addr = format!("{}:{}", config.host, config.port);
        let socket_addrs: Vec<SocketAddr> = tokio::net::lookup_host(&addr)
            .await
            .map_err(|e| TelnetError::DnsResolutionFailed(e.to_string()))?
            .collect();

        let Some(target) = socket_addrs.first() else {
            return Err(TelnetError::DnsResolutionFailed(format!(
                "無法解析主機: {}",
                config.host
            )));
        };
        debug!("已解析到位址: {:?}", socket_addrs);

        let stream = timeout(config.connect_timeout(), TcpStream::connect(target))
            .await
            .map_err(|_| TelnetError::Timeout)?
            .map_err(TelnetError::ConnectionFailed)?;
        stream.set_nodelay(true)?;

        info!("已連線到 {}:{}", config.host, config.port);
        let mut client = Self::from_stream(stream, codepage);
        client.read_buffer_size = config.read_buffer_size;
        Ok(client)
    }
}

impl<S> TelnetClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// 包裝一個已建立的串流（測試時可用 mock I/O）
    pub fn from_stream(stream: S, codepage: Codepage) -> Self {
        Self {
            stream: Some(stream),
            codepage,
            read_buffer_size: 8192,
            state: ConnectionState::Connected,
            inbound: Inbound::new(codepage),
        }
    }

    /// 獲取連線狀態
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// 目前協商狀態
    pub fn negotiation(&self) -> &NegotiationState {
        self.inbound.negotiation()
    }

    /// 斷開連線
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        if self.state != ConnectionState::Failed {
            self.state = ConnectionState::Disconnected;
        }
        info!("已斷開連線");
    }

    /// 發送一行文字（字碼頁編碼、跳脫 IAC、加上 CRLF）
    pub async fn send(&mut self, text: &str) -> Result<(), TelnetError> {
        let mut data = escape_iac(&self.codepage.encode(text));
        data.extend_from_slice(b"\r\n");
        self.send_raw(&data).await?;
        debug!("已發送: {}", text);
        Ok(())
    }

    /// 發送原始位元組到伺服器
    pub async fn send_raw(&mut self, data: &[u8]) -> Result<(), TelnetError> {
        let stream = self.stream.as_mut().ok_or(TelnetError::Closed)?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    /// 讀取一個 chunk 並解碼；協商回應會直接寫回伺服器
    pub async fn read_events(&mut self) -> Result<Vec<ServerEvent>, TelnetError> {
        let decoded = self.read_chunk().await?;
        self.dispatch(decoded).await
    }

    /// 只讀取並解碼，不做任何寫入；`stream.read` 可安全取消
    async fn read_chunk(&mut self) -> Result<Vec<DecodedEvent>, TelnetError> {
        let stream = self.stream.as_mut().ok_or(TelnetError::Closed)?;

        let mut buffer = vec![0u8; self.read_buffer_size];
        let n = stream.read(&mut buffer).await?;
        if n == 0 {
            self.state = ConnectionState::Disconnected;
            return Err(TelnetError::Closed);
        }
        trace!(bytes = n, compressed = self.inbound.is_compressed(), "READ_RAW {:02X?}", &buffer[..n]);

        Ok(self.inbound.ingest(&buffer[..n])?)
    }

    async fn dispatch(&mut self, decoded: Vec<DecodedEvent>) -> Result<Vec<ServerEvent>, TelnetError> {
        let mut events = Vec::with_capacity(decoded.len());
        for event in decoded {
            match event {
                DecodedEvent::Reply(reply) => self.send_raw(&reply).await?,
                DecodedEvent::Line(text) => events.push(ServerEvent::Line(text)),
                DecodedEvent::Message { kind, text } => events.push(ServerEvent::Message { kind, text }),
                DecodedEvent::EchoMode { server_echo } => events.push(ServerEvent::EchoMode { server_echo }),
            }
        }
        Ok(events)
    }

    /// 讀取迴圈：把事件送到 `tx`，從 `outgoing` 取得要送出的指令，
    /// 收到 `shutdown` 或連線結束時停止。傳輸層錯誤會回傳給呼叫端。
    pub async fn run(
        mut self,
        tx: mpsc::Sender<ServerEvent>,
        mut outgoing: mpsc::Receiver<String>,
        mut shutdown: mpsc::Receiver<()>,
    ) -> Result<(), TelnetError> {
        let result = loop {
            tokio::select! {
                result = self.read_chunk() => {
                    let result = match result {
                        Ok(decoded) => self.dispatch(decoded).await,
                        Err(e) => Err(e),
                    };
                    match result {
                        Ok(events) => {
                            let mut receiver_gone = false;
                            for event in events {
                                if tx.send(event).await.is_err() {
                                    receiver_gone = true;
                                    break;
                                }
                            }
                            if receiver_gone {
                                warn!("接收端已關閉");
                                break Ok(());
                            }
                        }
                        Err(TelnetError::Closed) => {
                            info!("伺服器關閉連線");
                            break Ok(());
                        }
                        Err(e) => {
                            error!("讀取錯誤: {}", e);
                            self.state = ConnectionState::Failed;
                            break Err(e);
                        }
                    }
                }
                Some(line) = outgoing.recv() => {
                    if let Err(e) = self.send(&line).await {
                        error!("發送錯誤: {}", e);
                        self.state = ConnectionState::Failed;
                        break Err(e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("收到關閉信號");
                    break Ok(());
                }
            }
        };

        self.disconnect().await;
        result
    }
}
