//! 保留樣式的替換
//!
//! 替換規則比對的是攤平後的純文字，但輸出要保留原行的樣式：
//! 未被替換的部分照原樣切出，替換文字以匹配起點所在段落的樣式為基底，
//! 再套用其中的內嵌標記。

use std::sync::Arc;

use tracing::debug;

use crate::router::CommandRouter;
use crate::rules::{Action, Condition, Invocation, Substitute};
use crate::style::markup::parse_markup;
use crate::style::StyledLine;

/// 依優先序套用所有替換規則；回傳 `None` 表示整行被隱藏
pub fn apply_substitutes(
    router: &mut CommandRouter<'_>,
    rules: &[Arc<Substitute>],
    line: StyledLine,
) -> Option<StyledLine> {
    let mut line = line;
    for rule in rules {
        match &rule.action {
            Action::Callback(callback) => {
                let text = line.text();
                if let Some(captures) = rule.matcher.captures(&text) {
                    debug!("替換回呼吻合，隱藏此行: {}", rule.matcher.source());
                    let invocation = Invocation {
                        text: &text,
                        captures: &captures,
                        round: None,
                    };
                    router.invoke(rule.matcher.source(), callback, &invocation);
                    return None;
                }
            }
            Action::Template(template) => {
                let Some(next) = splice(&line, &rule.matcher, template) else {
                    continue;
                };
                line = next;
                if rule.stop_process {
                    return Some(line);
                }
            }
        }
    }
    Some(line)
}

/// 以模板替換所有不重疊的匹配；沒有匹配時回傳 `None`
pub fn splice(line: &StyledLine, condition: &Condition, template: &str) -> Option<StyledLine> {
    let text = line.text();
    let mut runs = Vec::new();
    let mut copied = 0;
    let mut position = 0;
    let mut matched = false;

    while position <= text.len() {
        let Some((range, captures)) = condition.captures_at(&text, position) else {
            break;
        };
        matched = true;

        runs.extend(line.slice(copied, range.start));
        let replacement = captures.expand(template);
        runs.extend(parse_markup(&replacement, line.style_at(range.start)).into_runs());
        copied = range.end;

        position = if range.is_empty() {
            // 空匹配至少前進一個字元
            match text[range.end..].chars().next() {
                Some(c) => range.end + c.len_utf8(),
                None => break,
            }
        } else {
            range.end
        };
    }

    if !matched {
        return None;
    }
    runs.extend(line.slice(copied, text.len()));
    Some(StyledLine::new(runs).merged())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::MatchMode;
    use crate::style::{Color, Style, StyledRun, Tone};

    fn search(pattern: &str) -> Condition {
        Condition::literal(pattern, MatchMode::Search).unwrap()
    }

    fn red() -> Style {
        Style::default().with_fg(Tone::dark(Color::Red))
    }

    fn blue() -> Style {
        Style::default().with_fg(Tone::dark(Color::Blue))
    }

    #[test]
    fn test_middle_word_across_runs() {
        // "one two three"：前段紅色到 "tw"，後段藍色從 "o three"
        let line = StyledLine::new(vec![StyledRun::new("one tw", red()), StyledRun::new("o three", blue())]);
        let out = splice(&line, &search("two"), "<size:large>2</size>").unwrap();

        assert_eq!(out.text(), "one 2 three");
        let runs = out.runs();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0], StyledRun::new("one ", red()));
        assert_eq!(runs[1].text(), "2");
        assert_eq!(runs[1].style().fg, red().fg);
        assert_eq!(runs[2], StyledRun::new(" three", blue()));
    }

    #[test]
    fn test_replacement_inherits_start_style() {
        let line = StyledLine::new(vec![StyledRun::new("one tw", red()), StyledRun::new("o three", blue())]);
        let out = splice(&line, &search("two"), "2").unwrap();
        // 沒有標記的替換文字沿用比對起點（前段）的樣式，相鄰同樣式合併，
        // 所以只剩兩段；要得到三段，替換文字需自帶樣式（見上一個測試）
        assert_eq!(out.runs(), &[StyledRun::new("one 2", red()), StyledRun::new(" three", blue())]);
    }

    #[test]
    fn test_all_matches_replaced() {
        let line = StyledLine::plain("a cat and a cat");
        let out = splice(&line, &search("cat"), "dog").unwrap();
        assert_eq!(out.text(), "a dog and a dog");
        assert_eq!(out.runs().len(), 1);
    }

    #[test]
    fn test_no_match_returns_none() {
        let line = StyledLine::plain("nothing here");
        assert!(splice(&line, &search("orc"), "x").is_none());
    }

    #[test]
    fn test_empty_match_terminates() {
        let line = StyledLine::plain("ab");
        let condition = Condition::regex("x*", MatchMode::Search).unwrap();
        let out = splice(&line, &condition, "-").unwrap();
        assert_eq!(out.text(), "-a-b-");
    }

    #[test]
    fn test_markup_in_replacement() {
        let line = StyledLine::plain("you hit the orc");
        let out = splice(&line, &search("orc"), "<fg:bright-red>ORC</fg>").unwrap();
        assert_eq!(out.runs().len(), 2);
        assert_eq!(out.runs()[1].style().fg, Some(Tone::bright(Color::Red)));
    }

    #[test]
    fn test_captures_in_template() {
        let line = StyledLine::plain("Bob tells you: hi");
        let out = splice(&line, &search("%1 tells you: %2"), "[%1] %2").unwrap();
        assert_eq!(out.text(), "[Bob] hi");
    }
}
