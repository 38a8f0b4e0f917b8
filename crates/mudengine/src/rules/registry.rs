//! 規則登錄
//!
//! 每個 profile 一個登錄，五種規則各自分群存放。每次變動後重建排序好的快照，
//! 比對時只讀快照；規則動作在比對途中增刪規則也不會影響正在進行的比對。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::debug;

use super::settings::GroupSettings;
use super::{Condition, KeyChord, RoundBoundary, Rule};

/// 已排序、只含啟用群組的規則快照
pub type Snapshot<M> = Arc<[Arc<Rule<M>>]>;

struct Entry<M> {
    seq: u64,
    rule: Arc<Rule<M>>,
}

struct Live<M> {
    groups: HashMap<String, Vec<Entry<M>>>,
    next_seq: u64,
}

/// 單一種類規則的存放區
struct RuleStore<M> {
    live: Mutex<Live<M>>,
    snapshot: RwLock<Snapshot<M>>,
}

impl<M> RuleStore<M> {
    fn new() -> Self {
        Self {
            live: Mutex::new(Live {
                groups: HashMap::new(),
                next_seq: 0,
            }),
            snapshot: RwLock::new(Arc::from(Vec::new())),
        }
    }

    fn add(&self, rule: Rule<M>, settings: &dyn GroupSettings) {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = live.next_seq;
        live.next_seq += 1;
        live.groups.entry(rule.group.clone()).or_default().push(Entry {
            seq,
            rule: Arc::new(rule),
        });
        self.rebuild_locked(&live, settings);
    }

    fn remove(&self, group: &str, settings: &dyn GroupSettings, is_target: impl Fn(&Rule<M>) -> bool) -> bool {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = live.groups.get_mut(group) else {
            return false;
        };
        let Some(index) = entries.iter().position(|e| is_target(&e.rule)) else {
            return false;
        };
        entries.remove(index);
        if entries.is_empty() {
            live.groups.remove(group);
        }
        self.rebuild_locked(&live, settings);
        true
    }

    fn clear_group(&self, group: &str, settings: &dyn GroupSettings) -> usize {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = live.groups.remove(group).map(|entries| entries.len()).unwrap_or(0);
        if removed > 0 {
            self.rebuild_locked(&live, settings);
        }
        removed
    }

    fn rebuild(&self, settings: &dyn GroupSettings) {
        let live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        self.rebuild_locked(&live, settings);
    }

    /// 持有 live 鎖時重建，確保快照順序與變動順序一致
    fn rebuild_locked(&self, live: &Live<M>, settings: &dyn GroupSettings) {
        let mut active: Vec<&Entry<M>> = live
            .groups
            .iter()
            .filter(|(group, _)| settings.is_group_active(group))
            .flat_map(|(_, entries)| entries.iter())
            .collect();
        active.sort_by_key(|e| (e.rule.priority, e.seq));

        let snapshot: Snapshot<M> = active.into_iter().map(|e| Arc::clone(&e.rule)).collect();
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    fn snapshot(&self) -> Snapshot<M> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn len(&self) -> usize {
        let live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        live.groups.values().map(Vec::len).sum()
    }
}

/// 各種規則數量（包含停用群組）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleCounts {
    pub triggers: usize,
    pub aliases: usize,
    pub substitutes: usize,
    pub hotkeys: usize,
    pub rounds: usize,
}

impl RuleCounts {
    pub fn total(&self) -> usize {
        self.triggers + self.aliases + self.substitutes + self.hotkeys + self.rounds
    }
}

/// 一個 profile 的規則登錄
pub struct RuleRegistry {
    settings: Arc<dyn GroupSettings>,
    triggers: RuleStore<Condition>,
    aliases: RuleStore<Condition>,
    substitutes: RuleStore<Condition>,
    hotkeys: RuleStore<KeyChord>,
    rounds: RuleStore<RoundBoundary>,
}

impl RuleRegistry {
    pub fn new(settings: Arc<dyn GroupSettings>) -> Self {
        Self {
            settings,
            triggers: RuleStore::new(),
            aliases: RuleStore::new(),
            substitutes: RuleStore::new(),
            hotkeys: RuleStore::new(),
            rounds: RuleStore::new(),
        }
    }

    pub fn settings(&self) -> &Arc<dyn GroupSettings> {
        &self.settings
    }

    fn prepare<M>(&self, group: &str, mut rule: Rule<M>) -> Rule<M> {
        self.settings.register_group(group);
        rule.group = group.to_string();
        rule
    }

    pub fn add_trigger(&self, group: &str, rule: Rule<Condition>) {
        debug!("新增觸發器 [{}] {}", group, rule.matcher.source());
        self.triggers.add(self.prepare(group, rule), self.settings.as_ref());
    }

    pub fn add_alias(&self, group: &str, rule: Rule<Condition>) {
        debug!("新增別名 [{}] {}", group, rule.matcher.source());
        self.aliases.add(self.prepare(group, rule), self.settings.as_ref());
    }

    pub fn add_substitute(&self, group: &str, rule: Rule<Condition>) {
        debug!("新增替換 [{}] {}", group, rule.matcher.source());
        self.substitutes.add(self.prepare(group, rule), self.settings.as_ref());
    }

    pub fn add_hotkey(&self, group: &str, rule: Rule<KeyChord>) {
        debug!("新增熱鍵 [{}] {:?}", group, rule.matcher);
        self.hotkeys.add(self.prepare(group, rule), self.settings.as_ref());
    }

    pub fn add_round(&self, group: &str, rule: Rule<RoundBoundary>) {
        debug!("新增回合觸發器 [{}] {:?}", group, rule.matcher);
        self.rounds.add(self.prepare(group, rule), self.settings.as_ref());
    }

    /// 移除群組中第一個條件原文相同的觸發器
    pub fn remove_trigger(&self, group: &str, source: &str) -> bool {
        self.triggers
            .remove(group, self.settings.as_ref(), |r| r.matcher.source() == source)
    }

    pub fn remove_alias(&self, group: &str, source: &str) -> bool {
        self.aliases
            .remove(group, self.settings.as_ref(), |r| r.matcher.source() == source)
    }

    pub fn remove_substitute(&self, group: &str, source: &str) -> bool {
        self.substitutes
            .remove(group, self.settings.as_ref(), |r| r.matcher.source() == source)
    }

    pub fn remove_hotkey(&self, group: &str, chord: KeyChord) -> bool {
        self.hotkeys
            .remove(group, self.settings.as_ref(), |r| r.matcher == chord)
    }

    pub fn remove_round(&self, group: &str, boundary: RoundBoundary) -> bool {
        self.rounds
            .remove(group, self.settings.as_ref(), |r| r.matcher == boundary)
    }

    /// 清除群組在所有種類中的規則，回傳移除數量
    pub fn clear_group(&self, group: &str) -> usize {
        let settings = self.settings.as_ref();
        let removed = self.triggers.clear_group(group, settings)
            + self.aliases.clear_group(group, settings)
            + self.substitutes.clear_group(group, settings)
            + self.hotkeys.clear_group(group, settings)
            + self.rounds.clear_group(group, settings);
        if removed > 0 {
            debug!("清除群組 {}: {} 條規則", group, removed);
        }
        removed
    }

    /// 切換群組啟用狀態並重建快照
    pub fn set_group_active(&self, group: &str, active: bool) {
        self.settings.set_group_active(group, active);
        self.resort_by_priority();
    }

    pub fn is_group_active(&self, group: &str) -> bool {
        self.settings.is_group_active(group)
    }

    /// 重建所有快照：只留啟用群組，依優先序穩定排序
    pub fn resort_by_priority(&self) {
        let settings = self.settings.as_ref();
        self.triggers.rebuild(settings);
        self.aliases.rebuild(settings);
        self.substitutes.rebuild(settings);
        self.hotkeys.rebuild(settings);
        self.rounds.rebuild(settings);
    }

    pub fn triggers(&self) -> Snapshot<Condition> {
        self.triggers.snapshot()
    }

    pub fn aliases(&self) -> Snapshot<Condition> {
        self.aliases.snapshot()
    }

    pub fn substitutes(&self) -> Snapshot<Condition> {
        self.substitutes.snapshot()
    }

    pub fn hotkeys(&self) -> Snapshot<KeyChord> {
        self.hotkeys.snapshot()
    }

    pub fn rounds(&self) -> Snapshot<RoundBoundary> {
        self.rounds.snapshot()
    }

    pub fn counts(&self) -> RuleCounts {
        RuleCounts {
            triggers: self.triggers.len(),
            aliases: self.aliases.len(),
            substitutes: self.substitutes.len(),
            hotkeys: self.hotkeys.len(),
            rounds: self.rounds.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Action, MemorySettings};

    fn registry() -> RuleRegistry {
        RuleRegistry::new(Arc::new(MemorySettings::new()))
    }

    fn trigger(pattern: &str, priority: i32) -> Rule<Condition> {
        Rule::trigger(pattern, false, Action::template(pattern))
            .unwrap()
            .with_priority(priority)
    }

    #[test]
    fn test_snapshot_is_stable_sorted() {
        let reg = registry();
        reg.add_trigger("a", trigger("first five", 5));
        reg.add_trigger("b", trigger("one", 1));
        reg.add_trigger("a", trigger("second five", 5));
        reg.add_trigger("b", trigger("three", 3));

        let snapshot = reg.triggers();
        let order: Vec<&str> = snapshot.iter().map(|r| r.matcher.source()).collect();
        assert_eq!(order, vec!["one", "three", "first five", "second five"]);
    }

    #[test]
    fn test_group_deactivation() {
        let reg = registry();
        reg.add_trigger("combat", trigger("flee", 0));
        reg.add_trigger("travel", trigger("north", 0));

        reg.set_group_active("combat", false);
        let snapshot = reg.triggers();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].matcher.source(), "north");
        assert_eq!(reg.counts().triggers, 2);

        reg.set_group_active("combat", true);
        assert_eq!(reg.triggers().len(), 2);
    }

    #[test]
    fn test_old_snapshot_is_unaffected_by_mutation() {
        let reg = registry();
        reg.add_alias("g", Rule::alias("x", false, Action::template("y")).unwrap());
        let before = reg.aliases();
        reg.add_alias("g", Rule::alias("z", false, Action::template("w")).unwrap());
        assert_eq!(before.len(), 1);
        assert_eq!(reg.aliases().len(), 2);
    }

    #[test]
    fn test_remove_first_structural_match() {
        let reg = registry();
        reg.add_trigger("g", trigger("dup", 2));
        reg.add_trigger("g", trigger("dup", 1));
        assert!(reg.remove_trigger("g", "dup"));
        let snapshot = reg.triggers();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].priority, 1);
        assert!(!reg.remove_trigger("other", "dup"));
    }

    #[test]
    fn test_hotkey_and_round_removal() {
        let reg = registry();
        let chord = KeyChord::new(112).ctrl();
        reg.add_hotkey("keys", Rule::new(chord, Action::template("flee")));
        reg.add_round("fight", Rule::new(RoundBoundary::EndOfRound, Action::template("kick")));

        assert!(!reg.remove_hotkey("keys", KeyChord::new(112)));
        assert!(reg.remove_hotkey("keys", chord));
        assert!(reg.remove_round("fight", RoundBoundary::EndOfRound));
        assert_eq!(reg.counts().total(), 0);
    }

    #[test]
    fn test_clear_group_and_registration() {
        let settings = Arc::new(MemorySettings::new());
        let reg = RuleRegistry::new(settings.clone());
        reg.add_trigger("unit", trigger("a", 0));
        reg.add_alias("unit", Rule::alias("b", false, Action::template("c")).unwrap());
        reg.add_trigger("keep", trigger("d", 0));

        assert!(settings.groups().contains_key("unit"));
        assert_eq!(reg.clear_group("unit"), 2);
        assert_eq!(reg.triggers().len(), 1);
        assert!(reg.aliases().is_empty());
    }
}
