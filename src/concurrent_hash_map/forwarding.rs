//! Forwarding markers (spec.md §3 "Forwarding marker"). Installed as a
//! bin head during resize to redirect operations into the table the
//! resize engine is building.

use crate::concurrent_hash_map::table::Table;

/// Table-forward variant: the bin has been fully transferred and
/// operations on it must restart against `next_table`.
pub(crate) struct Moved<K, V> {
    pub(crate) next_table: Table<K, V>,
}

impl<K, V> Moved<K, V> {
    pub(crate) fn new(next_table: Table<K, V>) -> Self {
        Self { next_table }
    }
}

impl<K, V> Clone for Moved<K, V> {
    fn clone(&self) -> Self {
        Self {
            next_table: Table::clone(&self.next_table),
        }
    }
}
