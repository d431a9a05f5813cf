use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::ReimbursableItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Expense,
    Mileage,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Expense => "expense",
            ItemKind::Mileage => "mileage",
        }
    }
}

/// Per-tab multi-select state. The expense and mileage tabs each own an
/// independent id set; a batch attach therefore always covers a single kind.
/// Switching tabs drops the selection of the tab being left, so nothing
/// stale survives into the next attach.
#[derive(Debug, Clone)]
pub struct SelectionManager {
    active: ItemKind,
    expenses: BTreeSet<String>,
    mileage: BTreeSet<String>,
}

impl Default for SelectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionManager {
    pub fn new() -> Self {
        Self {
            active: ItemKind::Expense,
            expenses: BTreeSet::new(),
            mileage: BTreeSet::new(),
        }
    }

    pub fn active_tab(&self) -> ItemKind {
        self.active
    }

    pub fn set_active_tab(&mut self, kind: ItemKind) {
        if kind != self.active {
            self.set_mut(self.active).clear();
            self.active = kind;
        }
    }

    fn set_of(&self, kind: ItemKind) -> &BTreeSet<String> {
        match kind {
            ItemKind::Expense => &self.expenses,
            ItemKind::Mileage => &self.mileage,
        }
    }

    fn set_mut(&mut self, kind: ItemKind) -> &mut BTreeSet<String> {
        match kind {
            ItemKind::Expense => &mut self.expenses,
            ItemKind::Mileage => &mut self.mileage,
        }
    }

    /// Adds or removes an id from the active tab's set.
    pub fn toggle(&mut self, id: &str) {
        let active = self.active;
        let set = self.set_mut(active);
        if !set.remove(id) {
            set.insert(id.to_string());
        }
    }

    /// Replaces the active tab's selection with every listed item of that
    /// kind. Callers pass the currently-loaded eligible items; ineligible
    /// records never become `ReimbursableItem`s in the first place.
    pub fn select_all_eligible(&mut self, items: &[ReimbursableItem]) {
        let active = self.active;
        let ids: BTreeSet<String> = items
            .iter()
            .filter(|item| item.kind() == active)
            .map(|item| item.id().to_string())
            .collect();
        *self.set_mut(active) = ids;
    }

    pub fn clear(&mut self, kind: ItemKind) {
        self.set_mut(kind).clear();
    }

    pub fn is_selected(&self, kind: ItemKind, id: &str) -> bool {
        self.set_of(kind).contains(id)
    }

    pub fn is_empty(&self, kind: ItemKind) -> bool {
        self.set_of(kind).is_empty()
    }

    pub fn len(&self, kind: ItemKind) -> usize {
        self.set_of(kind).len()
    }

    /// Selected ids for a kind, in stable order.
    pub fn selected(&self, kind: ItemKind) -> Vec<String> {
        self.set_of(kind).iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expense(id: &str, client: &str) -> ReimbursableItem {
        ReimbursableItem::Expense {
            id: id.to_string(),
            client_id: Some(client.to_string()),
            description: "test".to_string(),
            amount: 10.0,
        }
    }

    fn mileage(id: &str, client: &str) -> ReimbursableItem {
        ReimbursableItem::Mileage {
            id: id.to_string(),
            client_id: Some(client.to_string()),
            description: "trip".to_string(),
            amount: 5.0,
        }
    }

    #[test]
    fn toggle_adds_and_removes() {
        let mut sel = SelectionManager::new();
        sel.toggle("e-1");
        assert!(sel.is_selected(ItemKind::Expense, "e-1"));
        sel.toggle("e-1");
        assert!(!sel.is_selected(ItemKind::Expense, "e-1"));
        assert!(sel.is_empty(ItemKind::Expense));
    }

    #[test]
    fn select_all_only_takes_active_kind() {
        let mut sel = SelectionManager::new();
        let items = vec![expense("e-1", "7"), expense("e-2", "7"), mileage("m-1", "7")];
        sel.select_all_eligible(&items);
        assert_eq!(sel.selected(ItemKind::Expense), vec!["e-1", "e-2"]);
        assert!(sel.is_empty(ItemKind::Mileage));
    }

    #[test]
    fn tab_switch_drops_the_previous_selection() {
        let mut sel = SelectionManager::new();
        sel.toggle("e-1");
        sel.toggle("e-2");
        assert_eq!(sel.len(ItemKind::Expense), 2);

        sel.set_active_tab(ItemKind::Mileage);
        assert!(sel.is_empty(ItemKind::Expense));
        assert!(sel.is_empty(ItemKind::Mileage));

        sel.toggle("m-1");
        assert_eq!(sel.selected(ItemKind::Mileage), vec!["m-1"]);

        // Re-activating the same tab keeps the selection.
        sel.set_active_tab(ItemKind::Mileage);
        assert_eq!(sel.len(ItemKind::Mileage), 1);
    }

    #[test]
    fn sets_stay_independent_per_kind() {
        let mut sel = SelectionManager::new();
        sel.toggle("e-1");
        sel.set_active_tab(ItemKind::Mileage);
        sel.toggle("m-1");
        sel.clear(ItemKind::Mileage);
        assert!(sel.is_empty(ItemKind::Mileage));
        // Expense set was already dropped by the tab switch, not by clear().
        assert!(sel.is_empty(ItemKind::Expense));
    }
}
