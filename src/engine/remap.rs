use crate::buttons::{Buttons, REMAPPABLE_NAMES};
use crate::config::{ConfigStore, MAPPING};
use crate::device::PhysicalPadKind;
use std::sync::Arc;

/// Ordered `(source, target)` substitutions. Each source appears at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemapTable {
    pairs: Vec<(Buttons, Buttons)>,
}

impl RemapTable {
    pub fn new(pairs: impl IntoIterator<Item = (Buttons, Buttons)>) -> Self {
        let mut table = Self::default();
        for (source, target) in pairs {
            table.insert(source, target);
        }
        table
    }

    /// Add a pair. A repeated source replaces the earlier entry and moves to
    /// the end; identity pairs are dropped.
    pub fn insert(&mut self, source: Buttons, target: Buttons) {
        self.pairs.retain(|(s, _)| *s != source);
        if source != target {
            self.pairs.push((source, target));
        }
    }

    /// Read the `MAPPING` section: one key per remappable button whose value
    /// names the target button.
    pub fn load(store: &dyn ConfigStore) -> Self {
        let mut table = Self::default();
        for name in REMAPPABLE_NAMES {
            let Some(target_name) = store.get(MAPPING, name) else {
                continue;
            };
            let Some(source) = Buttons::from_config_name(name) else {
                continue;
            };
            match Buttons::from_config_name(target_name.trim()) {
                Some(target) => table.insert(source, target),
                None => log::warn!("Ignoring mapping {} -> unknown button '{}'", name, target_name),
            }
        }
        table
    }

    pub fn pairs(&self) -> &[(Buttons, Buttons)] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Pairs the hardware layer accepts for one pad kind. A lone half only
    /// remaps buttons it physically has.
    pub fn pairs_for_pad(&self, kind: PhysicalPadKind) -> Vec<(Buttons, Buttons)> {
        let owned = match kind {
            PhysicalPadKind::Embedded | PhysicalPadKind::FullKey => Buttons::all(),
            PhysicalPadKind::LeftHalf => Buttons::LEFT_HALF,
            PhysicalPadKind::RightHalf => Buttons::RIGHT_HALF,
        };
        self.pairs
            .iter()
            .copied()
            .filter(|(source, _)| owned.contains(*source))
            .collect()
    }
}

/// Forward and reverse substitution for one table snapshot.
pub struct RemapEngine {
    table: Arc<RemapTable>,
    /// `(target, source)`, one entry per target.
    reverse: Vec<(Buttons, Buttons)>,
}

impl RemapEngine {
    pub fn new(table: Arc<RemapTable>) -> Self {
        let mut reverse: Vec<(Buttons, Buttons)> = Vec::with_capacity(table.pairs.len());
        for &(source, target) in &table.pairs {
            if let Some(pos) = reverse.iter().position(|(t, _)| *t == target) {
                log::warn!(
                    "{:?} and {:?} both map to {:?}; reading back as {:?}",
                    reverse[pos].1,
                    source,
                    target,
                    source
                );
                reverse.remove(pos);
            }
            reverse.push((target, source));
        }
        Self { table, reverse }
    }

    pub fn table(&self) -> &Arc<RemapTable> {
        &self.table
    }

    /// Apply the user's mapping to outgoing buttons.
    pub fn forward(&self, buttons: Buttons, scope: Buttons) -> Buttons {
        substitute(buttons, &self.table.pairs, scope)
    }

    /// Undo a hardware-layer remap on incoming buttons.
    pub fn reverse(&self, buttons: Buttons, scope: Buttons) -> Buttons {
        substitute(buttons, &self.reverse, scope)
    }

    pub fn reverse_lookup(&self, target: Buttons) -> Option<Buttons> {
        self.reverse
            .iter()
            .find(|(t, _)| *t == target)
            .map(|(_, s)| *s)
    }
}

/// All matches are collected first so swaps (A->B, B->A) resolve correctly.
fn substitute(buttons: Buttons, pairs: &[(Buttons, Buttons)], scope: Buttons) -> Buttons {
    let mut clear = Buttons::empty();
    let mut set = Buttons::empty();
    for &(from, to) in pairs {
        if !scope.contains(from | to) {
            continue;
        }
        if buttons.contains(from) {
            clear |= from;
            set |= to;
        }
    }
    buttons.difference(clear) | set
}
