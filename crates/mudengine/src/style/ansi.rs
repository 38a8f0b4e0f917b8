//! ANSI 轉義碼解析
//!
//! 將伺服器送來、帶有 SGR 色碼的文字轉成 [`StyledLine`]。
//! 非 SGR 的 CSI 序列（游標控制等）直接丟棄。

use super::{Color, Style, StyledLine, StyledRun, Tone};

/// 解析器狀態
#[derive(Debug, Default, Clone, Copy)]
struct SgrState {
    fg: Option<Color>,
    bg: Option<Tone>,
    bold: bool,
    /// 前景是否明確指定為高亮色（90-97、38;5;8-15）
    fg_bright: bool,
}

impl SgrState {
    fn style(&self) -> Style {
        Style {
            fg: self.fg.map(|color| Tone {
                color,
                bright: self.bold || self.fg_bright,
            }),
            bg: self.bg,
            ..Style::default()
        }
    }

    fn apply_codes(&mut self, codes: &[u16]) {
        if codes.is_empty() {
            *self = Self::default();
            return;
        }

        let mut i = 0;
        while i < codes.len() {
            let code = codes[i];
            match code {
                0 => *self = Self::default(),
                1 => self.bold = true,
                22 => self.bold = false,
                30..=37 => {
                    self.fg = Color::from_index((code - 30) as u8);
                    self.fg_bright = false;
                }
                39 => {
                    self.fg = None;
                    self.fg_bright = false;
                }
                40..=47 => self.bg = Color::from_index((code - 40) as u8).map(Tone::dark),
                49 => self.bg = None,
                90..=97 => {
                    self.fg = Color::from_index((code - 90) as u8);
                    self.fg_bright = true;
                }
                100..=107 => self.bg = Color::from_index((code - 100) as u8).map(Tone::bright),
                38 | 48 => {
                    // 擴充色：只對應前 16 色，其餘略過參數
                    if codes.get(i + 1) == Some(&5) {
                        if let Some(&index) = codes.get(i + 2) {
                            if let Some(tone) = palette_16(index) {
                                if code == 38 {
                                    self.fg = Some(tone.color);
                                    self.fg_bright = tone.bright;
                                } else {
                                    self.bg = Some(tone);
                                }
                            }
                        }
                        i += 2;
                    } else if codes.get(i + 1) == Some(&2) {
                        i += 4;
                    }
                }
                _ => {}
            }
            i += 1;
        }
    }
}

fn palette_16(index: u16) -> Option<Tone> {
    match index {
        0..=7 => Color::from_index(index as u8).map(Tone::dark),
        8..=15 => Color::from_index((index - 8) as u8).map(Tone::bright),
        _ => None,
    }
}

/// 解析 ANSI 轉義碼，返回帶樣式的一行
pub fn parse_ansi(input: &str) -> StyledLine {
    let mut runs = Vec::new();
    let mut state = SgrState::default();
    let mut current = String::new();

    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\x1b' {
            if c >= ' ' || c == '\t' {
                current.push(c);
            }
            continue;
        }

        match chars.peek() {
            Some(&'[') => {
                chars.next();
                let mut params = String::new();
                let mut cmd = None;
                for ch in chars.by_ref() {
                    if ('\x40'..='\x7e').contains(&ch) {
                        cmd = Some(ch);
                        break;
                    }
                    params.push(ch);
                }

                if cmd == Some('m') {
                    if !current.is_empty() {
                        runs.push(StyledRun::new(std::mem::take(&mut current), state.style()));
                    }
                    let codes: Vec<u16> = params
                        .split(';')
                        .filter(|p| !p.is_empty())
                        .filter_map(|p| p.parse().ok())
                        .collect();
                    state.apply_codes(&codes);
                }
            }
            Some(&'(') | Some(&')') => {
                chars.next();
                chars.next();
            }
            _ => {}
        }
    }

    if !current.is_empty() {
        runs.push(StyledRun::new(current, state.style()));
    }

    StyledLine::new(runs).merged()
}

/// 移除 ANSI 轉義碼，只保留純文字
pub fn strip_ansi(input: &str) -> String {
    parse_ansi(input).text()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_text() {
        let line = parse_ansi("Hello World");
        assert_eq!(line.runs().len(), 1);
        assert_eq!(line.runs()[0].style(), Style::default());
    }

    #[test]
    fn test_parse_colored_text() {
        let line = parse_ansi("\x1b[31mRed\x1b[0m Normal");
        assert_eq!(line.runs().len(), 2);
        assert_eq!(line.runs()[0].text(), "Red");
        assert_eq!(line.runs()[0].style().fg, Some(Tone::dark(Color::Red)));
        assert_eq!(line.runs()[1].text(), " Normal");
        assert_eq!(line.runs()[1].style().fg, None);
    }

    #[test]
    fn test_bold_brightens() {
        let line = parse_ansi("\x1b[1;33mBold Yellow\x1b[0m");
        assert_eq!(line.runs()[0].style().fg, Some(Tone::bright(Color::Yellow)));
    }

    #[test]
    fn test_high_intensity_and_background() {
        let line = parse_ansi("\x1b[91;44mX");
        let style = line.runs()[0].style();
        assert_eq!(style.fg, Some(Tone::bright(Color::Red)));
        assert_eq!(style.bg, Some(Tone::dark(Color::Blue)));
    }

    #[test]
    fn test_bare_reset() {
        let line = parse_ansi("\x1b[32mA\x1b[mB");
        assert_eq!(line.runs()[1].style(), Style::default());
    }

    #[test]
    fn test_cursor_control_ignored() {
        let line = parse_ansi("Hello\x1b[2J\x1b[HWorld");
        assert_eq!(line.runs().len(), 1);
        assert_eq!(line.text(), "HelloWorld");
    }

    #[test]
    fn test_extended_palette() {
        let line = parse_ansi("\x1b[38;5;9mA\x1b[38;5;200mB");
        assert_eq!(line.runs()[0].style().fg, Some(Tone::bright(Color::Red)));
        assert_eq!(line.text(), "AB");
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[31mRed\x1b[0m Normal"), "Red Normal");
    }
}
