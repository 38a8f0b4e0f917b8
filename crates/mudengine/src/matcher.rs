//! 規則比對
//!
//! 各種規則的比對語意不同：
//! - 觸發器：所有吻合的規則都觸發
//! - 別名：第一個吻合的規則勝出
//! - 熱鍵、回合觸發器：所有吻合的規則都觸發
//!
//! 替換規則由 [`crate::splice`] 處理。

use std::sync::Arc;

use tracing::debug;

use crate::router::CommandRouter;
use crate::rules::{
    has_placeholders, Alias, Captures, Hotkey, Invocation, KeyChord, RoundBoundary, RoundState, RoundTrigger,
    Trigger,
};

/// 對一行文字觸發所有吻合的觸發器，回傳觸發數量
pub fn fire_triggers(router: &mut CommandRouter<'_>, rules: &[Arc<Trigger>], line: &str) -> usize {
    let mut fired = 0;
    for rule in rules {
        let Some(captures) = rule.matcher.captures(line) else {
            continue;
        };
        fired += 1;
        debug!("觸發器吻合: {}", rule.matcher.source());
        let invocation = Invocation {
            text: line,
            captures: &captures,
            round: None,
        };
        router.run_action(rule.matcher.source(), &rule.action, &invocation);
    }
    fired
}

/// 找出第一個吻合命令的別名
pub fn first_alias<'r>(rules: &'r [Arc<Alias>], command: &str) -> Option<(&'r Arc<Alias>, Captures)> {
    rules
        .iter()
        .find_map(|rule| rule.matcher.captures(command).map(|captures| (rule, captures)))
}

/// 別名模板展開；無佔位符的別名會把命令後續的字轉送下去
pub fn expand_alias(rule: &Alias, template: &str, captures: &Captures) -> String {
    let mut text = captures.expand(template);
    if rule.matcher.has_implicit_tail() && !has_placeholders(template) {
        if let Some(tail) = captures.tail().filter(|tail| !tail.is_empty()) {
            text.push(' ');
            text.push_str(tail);
        }
    }
    text
}

/// 是否有任何啟用中的熱鍵綁定此按鍵組合
pub fn is_bound(rules: &[Arc<Hotkey>], chord: KeyChord) -> bool {
    rules.iter().any(|rule| rule.matcher == chord)
}

/// 觸發所有綁定此按鍵組合的熱鍵
pub fn fire_hotkeys(router: &mut CommandRouter<'_>, rules: &[Arc<Hotkey>], chord: KeyChord) -> bool {
    let captures = Captures::default();
    let mut matched = false;
    for rule in rules.iter().filter(|rule| rule.matcher == chord) {
        matched = true;
        debug!("熱鍵吻合: {:?}", chord);
        let invocation = Invocation {
            text: "",
            captures: &captures,
            round: None,
        };
        router.run_action("hotkey", &rule.action, &invocation);
    }
    matched
}

/// 觸發指定回合邊界的所有回合觸發器
pub fn fire_rounds(
    router: &mut CommandRouter<'_>,
    rules: &[Arc<RoundTrigger>],
    boundary: RoundBoundary,
    state: &RoundState,
) -> usize {
    let captures = Captures::default();
    let mut fired = 0;
    for rule in rules.iter().filter(|rule| rule.matcher == boundary) {
        fired += 1;
        let invocation = Invocation {
            text: "",
            captures: &captures,
            round: Some(state),
        };
        let label = match boundary {
            RoundBoundary::NewRound => "new round",
            RoundBoundary::EndOfRound => "end of round",
        };
        router.run_action(label, &rule.action, &invocation);
    }
    fired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Action, Rule};

    fn alias(pattern: &str, template: &str, priority: i32) -> Arc<Alias> {
        Arc::new(
            Rule::alias(pattern, false, Action::template(template))
                .unwrap()
                .with_priority(priority),
        )
    }

    #[test]
    fn test_first_alias_wins() {
        let rules = vec![alias("k %1", "kill %1", 1), alias("k %1", "kick %1", 2)];
        let (rule, captures) = first_alias(&rules, "k orc").unwrap();
        assert_eq!(rule.priority, 1);
        assert_eq!(captures.get(1), Some("orc"));
        assert!(first_alias(&rules, "look").is_none());
    }

    #[test]
    fn test_alias_forwards_tail() {
        let rule = alias("e", "eat", 0);
        let captures = rule.matcher.captures("e bread").unwrap();
        assert_eq!(expand_alias(&rule, "eat", &captures), "eat bread");

        let captures = rule.matcher.captures("e").unwrap();
        assert_eq!(expand_alias(&rule, "eat", &captures), "eat");
    }

    #[test]
    fn test_alias_tail_not_appended_with_placeholders() {
        let rule = alias("e", "eat", 0);
        let captures = rule.matcher.captures("e bread").unwrap();
        assert_eq!(expand_alias(&rule, "eat %1", &captures), "eat ");
    }

    #[test]
    fn test_is_bound_exact_chord() {
        let rules = vec![Arc::new(Rule::new(KeyChord::new(112).ctrl(), Action::template("flee")))];
        assert!(is_bound(&rules, KeyChord::new(112).ctrl()));
        assert!(!is_bound(&rules, KeyChord::new(112)));
        assert!(!is_bound(&rules, KeyChord::new(112).ctrl().shift()));
    }
}
