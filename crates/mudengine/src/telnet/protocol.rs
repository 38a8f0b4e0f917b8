//! Telnet 協定常數
//!
//! RFC 854 命令位元組，以及本客戶端協商的三個選項：
//! 壓縮（MCCP v1 起始序列）、自訂訊息通道、回顯。

/// Telnet IAC (Interpret As Command) - 0xFF
pub const IAC: u8 = 255;

/// Telnet 命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TelnetCommand {
    /// Sub-negotiation End
    Se = 240,
    /// No Operation
    Nop = 241,
    /// Data Mark
    DataMark = 242,
    /// Break
    Break = 243,
    /// Interrupt Process
    InterruptProcess = 244,
    /// Abort Output
    AbortOutput = 245,
    /// Are You There
    AreYouThere = 246,
    /// Erase Character
    EraseCharacter = 247,
    /// Erase Line
    EraseLine = 248,
    /// Go Ahead
    GoAhead = 249,
    /// Sub-negotiation Begin
    Sb = 250,
    /// Will
    Will = 251,
    /// Won't
    Wont = 252,
    /// Do
    Do = 253,
    /// Don't
    Dont = 254,
}

impl TelnetCommand {
    /// 從位元組解析 Telnet 命令
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            240 => Some(Self::Se),
            241 => Some(Self::Nop),
            242 => Some(Self::DataMark),
            243 => Some(Self::Break),
            244 => Some(Self::InterruptProcess),
            245 => Some(Self::AbortOutput),
            246 => Some(Self::AreYouThere),
            247 => Some(Self::EraseCharacter),
            248 => Some(Self::EraseLine),
            249 => Some(Self::GoAhead),
            250 => Some(Self::Sb),
            251 => Some(Self::Will),
            252 => Some(Self::Wont),
            253 => Some(Self::Do),
            254 => Some(Self::Dont),
            _ => None,
        }
    }

    /// 是否為需要帶選項位元組的協商命令
    pub fn is_negotiation(self) -> bool {
        matches!(self, Self::Will | Self::Wont | Self::Do | Self::Dont)
    }
}

/// Telnet 選項
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelnetOption {
    /// Echo
    Echo,
    /// MCCP 壓縮（v1 起始序列 `IAC SB 85 WILL SE`）
    Compress,
    /// 伺服器自訂訊息通道（`IAC SB 102 <type> ... IAC SE`）
    Custom,
    /// 其他未處理的選項
    Unknown(u8),
}

impl TelnetOption {
    /// 從位元組解析 Telnet 選項
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::Echo,
            85 => Self::Compress,
            102 => Self::Custom,
            other => Self::Unknown(other),
        }
    }

    /// 獲取選項的位元組值
    pub fn as_byte(&self) -> u8 {
        match self {
            Self::Echo => 1,
            Self::Compress => 85,
            Self::Custom => 102,
            Self::Unknown(b) => *b,
        }
    }
}

/// 組出三位元組的協商命令 `IAC <cmd> <option>`
pub fn negotiation(cmd: TelnetCommand, option: TelnetOption) -> Vec<u8> {
    vec![IAC, cmd as u8, option.as_byte()]
}

/// 對伺服器的協商請求產生回應
///
/// 接受壓縮、自訂訊息與回顯；其餘 WILL 回 DONT，DO 一律回 WONT。
/// WONT/DONT 不需回應。
pub fn reply_to(cmd: TelnetCommand, option: TelnetOption) -> Option<Vec<u8>> {
    match (cmd, option) {
        (TelnetCommand::Will, TelnetOption::Compress | TelnetOption::Custom | TelnetOption::Echo) => {
            Some(negotiation(TelnetCommand::Do, option))
        }
        (TelnetCommand::Will, _) => Some(negotiation(TelnetCommand::Dont, option)),
        (TelnetCommand::Do, _) => Some(negotiation(TelnetCommand::Wont, option)),
        _ => None,
    }
}

/// 將外送位元組中的 0xFF 重複一次，避免被伺服器當成 IAC
pub fn escape_iac(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 2);
    for &b in data {
        out.push(b);
        if b == IAC {
            out.push(IAC);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_compress() {
        let reply = reply_to(TelnetCommand::Will, TelnetOption::Compress);
        assert_eq!(reply, Some(vec![IAC, TelnetCommand::Do as u8, 85]));
    }

    #[test]
    fn test_accept_custom() {
        let reply = reply_to(TelnetCommand::Will, TelnetOption::Custom);
        assert_eq!(reply, Some(vec![IAC, TelnetCommand::Do as u8, 102]));
    }

    #[test]
    fn test_refuse_unknown_will() {
        let reply = reply_to(TelnetCommand::Will, TelnetOption::Unknown(24));
        assert_eq!(reply, Some(vec![IAC, TelnetCommand::Dont as u8, 24]));
    }

    #[test]
    fn test_refuse_do() {
        let reply = reply_to(TelnetCommand::Do, TelnetOption::Unknown(31));
        assert_eq!(reply, Some(vec![IAC, TelnetCommand::Wont as u8, 31]));
    }

    #[test]
    fn test_no_reply_to_wont() {
        assert_eq!(reply_to(TelnetCommand::Wont, TelnetOption::Echo), None);
        assert_eq!(reply_to(TelnetCommand::Dont, TelnetOption::Echo), None);
    }

    #[test]
    fn test_escape_iac() {
        assert_eq!(escape_iac(&[b'a', IAC, b'b']), vec![b'a', IAC, IAC, b'b']);
    }

    #[test]
    fn test_telnet_option_roundtrip() {
        for byte in 0..=255u8 {
            assert_eq!(TelnetOption::from_byte(byte).as_byte(), byte);
        }
    }
}
