use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ColumnMemoryBudget {
    #[default]
    Other,
    TrieNodes,
}

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Column {
    pub rocksdb_name: &'static str,
    pub budget_tier: ColumnMemoryBudget,
    pub point_lookup: bool,
}

impl Column {
    pub const fn new(name: &'static str) -> Self {
        Self { rocksdb_name: name, budget_tier: ColumnMemoryBudget::Other, point_lookup: false }
    }
    pub const fn use_trie_nodes_mem_budget(mut self) -> Self {
        self.budget_tier = ColumnMemoryBudget::TrieNodes;
        self
    }
    pub const fn set_point_lookup(mut self) -> Self {
        self.point_lookup = true;
        self
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rocksdb_name)
    }
}

/// Content-addressed trie nodes: `node hash => encoded node`.
pub const ATOMIC_TRIE_NODES_COLUMN: &Column = &Column::new("atomic_trie_nodes").use_trie_nodes_mem_budget().set_point_lookup();
/// Commit height index: `height (u64 be) => root hash`.
pub const ATOMIC_COMMIT_HEIGHTS_COLUMN: &Column = &Column::new("atomic_commit_heights");
/// Atomic trie and applier metadata.
pub const ATOMIC_META_COLUMN: &Column = &Column::new("atomic_meta").set_point_lookup();
/// Local shared memory ledger: `chain id || key => value`.
pub const SHARED_MEMORY_COLUMN: &Column = &Column::new("shared_memory");

pub const ALL_COLUMNS: &[&Column] =
    &[ATOMIC_TRIE_NODES_COLUMN, ATOMIC_COMMIT_HEIGHTS_COLUMN, ATOMIC_META_COLUMN, SHARED_MEMORY_COLUMN];
