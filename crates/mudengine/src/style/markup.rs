//! 內嵌樣式標記
//!
//! 規則輸出（echo、替換文字）可以夾帶標記：
//!
//! ```text
//! <fg:red>紅字</fg>  <fg:bright-green>亮綠</fg>  <bg:blue>藍底</bg>  <size:large>大字</size>
//! ```
//!
//! 標記可巢狀；沒有對應開頭的結尾標記與不認得的標記都原樣顯示。
//! 未標記的部分沿用呼叫端給的基底樣式。

use super::{Color, Style, StyledLine, StyledRun, TextSize, Tone};

enum Tag {
    OpenFg(Tone),
    OpenBg(Tone),
    OpenSize(TextSize),
    CloseFg,
    CloseBg,
    CloseSize,
}

fn parse_tone(value: &str) -> Option<Tone> {
    match value.strip_prefix("bright-") {
        Some(name) => Color::from_name(name).map(Tone::bright),
        None => Color::from_name(value).map(Tone::dark),
    }
}

fn parse_tag(body: &str) -> Option<Tag> {
    match body {
        "/fg" => return Some(Tag::CloseFg),
        "/bg" => return Some(Tag::CloseBg),
        "/size" => return Some(Tag::CloseSize),
        _ => {}
    }
    let (name, value) = body.split_once(':')?;
    match name {
        "fg" => parse_tone(value).map(Tag::OpenFg),
        "bg" => parse_tone(value).map(Tag::OpenBg),
        "size" => match value {
            "small" => Some(Tag::OpenSize(TextSize::Small)),
            "normal" => Some(Tag::OpenSize(TextSize::Normal)),
            "large" => Some(Tag::OpenSize(TextSize::Large)),
            _ => None,
        },
        _ => None,
    }
}

struct StyleStack {
    base: Style,
    fg: Vec<Tone>,
    bg: Vec<Tone>,
    size: Vec<TextSize>,
}

impl StyleStack {
    fn current(&self) -> Style {
        Style {
            fg: self.fg.last().copied().or(self.base.fg),
            bg: self.bg.last().copied().or(self.base.bg),
            size: self.size.last().copied().unwrap_or(self.base.size),
        }
    }

    /// 套用標記；結尾標記沒有對應開頭時回傳 false
    fn apply(&mut self, tag: Tag) -> bool {
        match tag {
            Tag::OpenFg(tone) => self.fg.push(tone),
            Tag::OpenBg(tone) => self.bg.push(tone),
            Tag::OpenSize(size) => self.size.push(size),
            Tag::CloseFg => return self.fg.pop().is_some(),
            Tag::CloseBg => return self.bg.pop().is_some(),
            Tag::CloseSize => return self.size.pop().is_some(),
        }
        true
    }
}

/// 以 `base` 為基底樣式解析標記文字
pub fn parse_markup(input: &str, base: Style) -> StyledLine {
    let mut stack = StyleStack {
        base,
        fg: Vec::new(),
        bg: Vec::new(),
        size: Vec::new(),
    };
    let mut runs = Vec::new();
    let mut current = String::new();
    let mut rest = input;

    while let Some(open) = rest.find('<') {
        current.push_str(&rest[..open]);
        let after = &rest[open..];

        let tag = after
            .find('>')
            .and_then(|close| parse_tag(&after[1..close]).map(|tag| (tag, close)));

        match tag {
            Some((tag, close)) => {
                let before = stack.current();
                if stack.apply(tag) {
                    if !current.is_empty() {
                        runs.push(StyledRun::new(std::mem::take(&mut current), before));
                    }
                } else {
                    current.push_str(&after[..=close]);
                }
                rest = &after[close + 1..];
            }
            None => {
                current.push('<');
                rest = &after[1..];
            }
        }
    }
    current.push_str(rest);
    if !current.is_empty() {
        runs.push(StyledRun::new(current, stack.current()));
    }

    StyledLine::new(runs).merged()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_keeps_base_style() {
        let base = Style::default().with_fg(Tone::dark(Color::Cyan));
        let line = parse_markup("hello", base);
        assert_eq!(line.runs(), &[StyledRun::new("hello", base)]);
    }

    #[test]
    fn test_nested_tags() {
        let line = parse_markup("a<fg:red>b<bg:bright-blue>c</bg>d</fg>e", Style::default());
        let runs = line.runs();
        assert_eq!(line.text(), "abcde");
        assert_eq!(runs.len(), 5);
        assert_eq!(runs[1].style().fg, Some(Tone::dark(Color::Red)));
        assert_eq!(runs[2].style().bg, Some(Tone::bright(Color::Blue)));
        assert_eq!(runs[2].style().fg, Some(Tone::dark(Color::Red)));
        assert_eq!(runs[3].style().bg, None);
        assert_eq!(runs[4].style(), Style::default());
    }

    #[test]
    fn test_unmatched_close_is_literal() {
        let line = parse_markup("x</fg>y", Style::default());
        assert_eq!(line.text(), "x</fg>y");
        assert_eq!(line.runs().len(), 1);
    }

    #[test]
    fn test_unknown_tag_is_literal() {
        let line = parse_markup("1 < 2 and <b>bold</b>", Style::default());
        assert_eq!(line.text(), "1 < 2 and <b>bold</b>");
    }

    #[test]
    fn test_size_tag() {
        let line = parse_markup("<size:large>BIG</size>", Style::default());
        assert_eq!(line.runs()[0].style().size, TextSize::Large);
    }

    #[test]
    fn test_inner_tag_overrides_base() {
        let base = Style::default().with_fg(Tone::dark(Color::Green));
        let line = parse_markup("<fg:white>w</fg>g", base);
        assert_eq!(line.runs()[0].style().fg, Some(Tone::dark(Color::White)));
        assert_eq!(line.runs()[1].style(), base);
    }
}
