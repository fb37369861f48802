#![allow(clippy::identity_op)] // allow 1 * MiB
#![allow(non_upper_case_globals)] // allow KiB/MiB/GiB names

use crate::column::{Column, ColumnMemoryBudget};
use anyhow::{Context, Result};
use rocksdb::{DBCompressionType, Env, Options};

const KiB: usize = 1024;
const MiB: usize = 1024 * KiB;

pub use rocksdb::statistics::StatsLevel;

#[derive(Debug, Clone)]
pub struct RocksDBConfig {
    /// Enable statistics. Statistics will be put in the `LOG` file in the db folder. This can have an effect on performance.
    pub enable_statistics: bool,
    /// Dump statistics every `statistics_period_sec`.
    pub statistics_period_sec: u32,
    /// Statistics level. This can have an effect on performance.
    pub statistics_level: StatsLevel,
    /// Memory budget for the trie nodes column
    pub memtable_trie_nodes_budget_bytes: usize,
    /// Memory budget for other columns
    pub memtable_other_budget_bytes: usize,
    pub max_open_files: i32,
    /// Write to the write-ahead log. When disabled, durability relies on atomic flushes, and writes made since the
    /// last flush are lost on a crash without corrupting the database.
    pub enable_wal: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            enable_statistics: false,
            statistics_period_sec: 60,
            statistics_level: StatsLevel::All,
            memtable_trie_nodes_budget_bytes: 256 * MiB,
            memtable_other_budget_bytes: 64 * MiB,
            max_open_files: 2048,
            enable_wal: false,
        }
    }
}

pub fn rocksdb_global_options(config: &RocksDBConfig) -> Result<Options> {
    let mut options = Options::default();
    options.create_if_missing(true);
    options.create_missing_column_families(true);
    let cores = std::thread::available_parallelism().map(|e| e.get() as i32).unwrap_or(1);
    options.increase_parallelism(cores);
    options.set_max_background_jobs(cores);

    // all column families are flushed together, so a commit written in one batch is never partially persisted
    options.set_atomic_flush(true);
    options.set_max_subcompactions(cores as _);

    options.set_max_log_file_size(10 * MiB);
    options.set_max_open_files(config.max_open_files);
    options.set_keep_log_file_num(3);
    options.set_log_level(rocksdb::LogLevel::Warn);

    if config.enable_statistics {
        options.enable_statistics();
        options.set_statistics_level(config.statistics_level);
    }
    options.set_stats_dump_period_sec(config.statistics_period_sec);

    let mut env = Env::new().context("Creating rocksdb env")?;
    env.set_low_priority_background_threads(cores); // compaction

    options.set_env(&env);

    Ok(options)
}

impl Column {
    /// Per column rocksdb options: memory budget, compression and lookup profile.
    pub(crate) fn rocksdb_options(&self, config: &RocksDBConfig) -> Options {
        let mut options = Options::default();

        options.set_compression_type(DBCompressionType::Zstd);
        match self.budget_tier {
            ColumnMemoryBudget::TrieNodes => {
                options.optimize_level_style_compaction(config.memtable_trie_nodes_budget_bytes);
            }
            ColumnMemoryBudget::Other => {
                options.optimize_universal_style_compaction(config.memtable_other_budget_bytes);
            }
        }

        if self.point_lookup {
            options.optimize_for_point_lookup(5); // 5 MiB
        }

        options
    }
}
