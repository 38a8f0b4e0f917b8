//! 帶樣式文字
//!
//! 一行顯示文字由多個 [`StyledRun`] 組成，每段有自己的前景、背景與字級。
//! 伺服器的 ANSI 色碼（[`ansi`]）與規則輸出的內嵌標記（[`markup`]）都轉成這個模型。

pub mod ansi;
pub mod markup;

/// 八個基本 ANSI 顏色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

impl Color {
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Black),
            1 => Some(Self::Red),
            2 => Some(Self::Green),
            3 => Some(Self::Yellow),
            4 => Some(Self::Blue),
            5 => Some(Self::Magenta),
            6 => Some(Self::Cyan),
            7 => Some(Self::White),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "black" => Some(Self::Black),
            "red" => Some(Self::Red),
            "green" => Some(Self::Green),
            "yellow" => Some(Self::Yellow),
            "blue" => Some(Self::Blue),
            "magenta" => Some(Self::Magenta),
            "cyan" => Some(Self::Cyan),
            "white" => Some(Self::White),
            _ => None,
        }
    }
}

/// 顏色加上亮/暗變化
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tone {
    pub color: Color,
    pub bright: bool,
}

impl Tone {
    pub const fn dark(color: Color) -> Self {
        Self { color, bright: false }
    }

    pub const fn bright(color: Color) -> Self {
        Self { color, bright: true }
    }
}

/// 字級提示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextSize {
    Small,
    #[default]
    Normal,
    Large,
}

/// 一段文字的樣式；`None` 代表使用顯示端的預設色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Style {
    pub fg: Option<Tone>,
    pub bg: Option<Tone>,
    pub size: TextSize,
}

impl Style {
    pub fn with_fg(mut self, tone: Tone) -> Self {
        self.fg = Some(tone);
        self
    }

    pub fn with_bg(mut self, tone: Tone) -> Self {
        self.bg = Some(tone);
        self
    }
}

/// 單一樣式的連續文字
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledRun {
    text: String,
    style: Style,
}

impl StyledRun {
    pub fn new(text: impl Into<String>, style: Style) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self::new(text, Style::default())
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn style(&self) -> Style {
        self.style
    }
}

/// 一行帶樣式文字；各段文字串接起來就是顯示內容
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StyledLine {
    runs: Vec<StyledRun>,
}

impl StyledLine {
    pub fn new(runs: Vec<StyledRun>) -> Self {
        Self { runs }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self::new(vec![StyledRun::plain(text)])
    }

    pub fn runs(&self) -> &[StyledRun] {
        &self.runs
    }

    pub fn into_runs(self) -> Vec<StyledRun> {
        self.runs
    }

    /// 攤平成純文字（僅供比對用）
    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.runs.iter().map(|r| r.text.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 取出攤平文字中 `[start, end)` 位元組範圍的片段，在非對齊處切開但保留樣式
    pub fn slice(&self, start: usize, end: usize) -> Vec<StyledRun> {
        let mut out = Vec::new();
        let mut offset = 0;
        for run in &self.runs {
            let run_start = offset;
            let run_end = offset + run.text.len();
            offset = run_end;

            let from = start.max(run_start);
            let to = end.min(run_end);
            if from < to {
                out.push(StyledRun::new(&run.text[from - run_start..to - run_start], run.style));
            }
        }
        out
    }

    /// 位元組位置所在那一段的樣式；位置在行尾時取最後一段
    pub fn style_at(&self, position: usize) -> Style {
        let mut offset = 0;
        for run in &self.runs {
            let run_end = offset + run.text.len();
            if position >= offset && position < run_end {
                return run.style;
            }
            offset = run_end;
        }
        self.runs.iter().rev().find(|r| !r.text.is_empty()).map(|r| r.style).unwrap_or_default()
    }

    /// 合併相鄰且樣式相同的段落，移除空段
    pub fn merged(self) -> Self {
        let mut runs: Vec<StyledRun> = Vec::with_capacity(self.runs.len());
        for run in self.runs {
            if run.text.is_empty() {
                continue;
            }
            match runs.last_mut() {
                Some(last) if last.style == run.style => last.text.push_str(&run.text),
                _ => runs.push(run),
            }
        }
        Self { runs }
    }
}

impl From<Vec<StyledRun>> for StyledLine {
    fn from(runs: Vec<StyledRun>) -> Self {
        Self::new(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_color() -> StyledLine {
        let red = Style::default().with_fg(Tone::dark(Color::Red));
        let blue = Style::default().with_fg(Tone::dark(Color::Blue));
        StyledLine::new(vec![StyledRun::new("abc", red), StyledRun::new("def", blue)])
    }

    #[test]
    fn test_text_concatenates_runs() {
        assert_eq!(two_color().text(), "abcdef");
        assert_eq!(two_color().len(), 6);
    }

    #[test]
    fn test_slice_splits_runs() {
        let line = two_color();
        let runs = line.slice(1, 5);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].text(), "bc");
        assert_eq!(runs[0].style(), line.runs()[0].style());
        assert_eq!(runs[1].text(), "de");
        assert_eq!(runs[1].style(), line.runs()[1].style());
    }

    #[test]
    fn test_style_at() {
        let line = two_color();
        assert_eq!(line.style_at(0), line.runs()[0].style());
        assert_eq!(line.style_at(3), line.runs()[1].style());
        assert_eq!(line.style_at(6), line.runs()[1].style());
        assert_eq!(StyledLine::default().style_at(0), Style::default());
    }

    #[test]
    fn test_merged() {
        let red = Style::default().with_fg(Tone::dark(Color::Red));
        let line = StyledLine::new(vec![
            StyledRun::new("a", red),
            StyledRun::new("", Style::default()),
            StyledRun::new("b", red),
            StyledRun::plain("c"),
        ])
        .merged();
        assert_eq!(line.runs().len(), 2);
        assert_eq!(line.runs()[0].text(), "ab");
    }
}
