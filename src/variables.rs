use crate::insn::{Offset, Slot};

/// One `LocalVariableTable` entry, or a synthetic slot the reader had to name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalVariable {
    pub slot: Slot,
    pub name: String,
    pub signature: String,
    pub start_pc: Offset,
    pub length: u32,
    pub declared: bool,
    /// Exception holders, return-address holders and other compiler temporaries. Never declared
    /// explicitly.
    pub synthetic: bool,
}

impl LocalVariable {
    pub fn end_pc(&self) -> Offset {
        self.start_pc.saturating_add(self.length)
    }

    /// Whether the live range covers `offset`. Stores initializing a variable precede its live
    /// range by the size of the store instruction, so a few bytes of slack are allowed in front.
    pub fn is_live_at(&self, offset: Offset) -> bool {
        self.start_pc.saturating_sub(4) <= offset && offset < self.end_pc()
    }
}

/// The method's local variables. Every pass that removes, names, or declares a local goes through
/// this type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalVariableTable {
    variables: Vec<Option<LocalVariable>>,
}

impl LocalVariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index of the new entry. Indices stay stable across removals.
    pub fn insert(&mut self, variable: LocalVariable) -> usize {
        self.variables.push(Some(variable));
        self.variables.len() - 1
    }

    /// Adds a synthetic entry covering `[start_pc, end_pc)` unless one already covers `start_pc`.
    pub fn insert_synthetic(&mut self, slot: Slot, start_pc: Offset, end_pc: Offset) -> usize {
        if let Some(index) = self.find(slot, start_pc) {
            return index;
        }
        self.insert(LocalVariable {
            slot,
            name: format!("tmp{slot}_{start_pc}"),
            signature: String::new(),
            start_pc,
            length: end_pc.saturating_sub(start_pc),
            declared: true,
            synthetic: true,
        })
    }

    pub fn find(&self, slot: Slot, offset: Offset) -> Option<usize> {
        self.iter()
            .find(|(_, variable)| variable.slot == slot && variable.is_live_at(offset))
            .map(|(index, _)| index)
    }

    pub fn get(&self, index: usize) -> Option<&LocalVariable> {
        self.variables.get(index)?.as_ref()
    }

    pub fn mark_declared(&mut self, slot: Slot, offset: Offset) {
        if let Some(index) = self.find(slot, offset) {
            self.mark_declared_at(index);
        }
    }

    pub fn mark_declared_at(&mut self, index: usize) {
        if let Some(Some(variable)) = self.variables.get_mut(index) {
            variable.declared = true;
        }
    }

    /// Removes the entry for `slot` live at `offset`, if any.
    pub fn remove(&mut self, slot: Slot, offset: Offset) -> Option<LocalVariable> {
        let index = self.find(slot, offset)?;
        self.variables[index].take()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &LocalVariable)> {
        self.variables
            .iter()
            .enumerate()
            .filter_map(|(index, variable)| Some((index, variable.as_ref()?)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<LocalVariable> for LocalVariableTable {
    fn from_iter<T: IntoIterator<Item = LocalVariable>>(iter: T) -> Self {
        Self {
            variables: iter.into_iter().map(Some).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variable(slot: Slot, start_pc: Offset, length: u32) -> LocalVariable {
        LocalVariable {
            slot,
            name: format!("v{slot}"),
            signature: "I".to_owned(),
            start_pc,
            length,
            declared: false,
            synthetic: false,
        }
    }

    #[test]
    fn lookup_respects_live_ranges() {
        let mut table: LocalVariableTable =
            [variable(1, 10, 20), variable(1, 40, 10)].into_iter().collect();
        assert_eq!(table.find(1, 8), Some(0));
        assert_eq!(table.find(1, 30), None);
        assert_eq!(table.find(1, 45), Some(1));

        let removed = table.remove(1, 12);
        assert_eq!(removed.map(|v| v.start_pc), Some(10));
        assert_eq!(table.find(1, 12), None);
        // Indices of the remaining entries are unchanged.
        assert_eq!(table.find(1, 45), Some(1));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn synthetic_entries_are_declared() {
        let mut table = LocalVariableTable::new();
        let index = table.insert_synthetic(3, 5, 9);
        assert_eq!(table.insert_synthetic(3, 6, 9), index);
        assert!(table.get(index).is_some_and(|v| v.declared && v.synthetic));
    }
}
