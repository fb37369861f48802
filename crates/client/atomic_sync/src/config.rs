use crate::message::MAX_LEAVES_LIMIT;
use mc_atomic_trie::DEFAULT_COMMIT_INTERVAL;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// Heights between two roots that peers can sync to.
pub const DEFAULT_SYNCABLE_INTERVAL: u64 = 16384;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RESPONSE_BYTES: usize = 1024 * 1024;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    #[default]
    Mainnet,
    Testnet,
    Local,
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkType::Mainnet => write!(f, "mainnet"),
            NetworkType::Testnet => write!(f, "testnet"),
            NetworkType::Local => write!(f, "local"),
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("The atomic commit interval must be positive")]
    ZeroCommitInterval,
    #[error("The state sync commit interval {syncable} must be a multiple of the atomic commit interval {commit}")]
    NotAMultiple { syncable: u64, commit: u64 },
    #[error("Custom commit intervals are only allowed on local networks, not on {0}")]
    CustomIntervalOnPublicNetwork(NetworkType),
    #[error("The state sync request size must be between 1 and {MAX_LEAVES_LIMIT}, got {0}")]
    RequestSize(u16),
}

#[derive(Clone, Debug, clap::Args, Deserialize, Serialize)]
#[serde(default)]
pub struct AtomicSyncParams {
    /// Number of heights between two persisted roots of the atomic trie.
    #[arg(env = "MADARA_ATOMIC_COMMIT_INTERVAL", long, value_name = "HEIGHTS", default_value_t = DEFAULT_COMMIT_INTERVAL)]
    pub atomic_commit_interval: u64,

    /// Number of heights between two atomic trie roots that peers may sync to. Must be a multiple of the commit
    /// interval.
    #[arg(env = "MADARA_STATE_SYNC_COMMIT_INTERVAL", long, value_name = "HEIGHTS", default_value_t = DEFAULT_SYNCABLE_INTERVAL)]
    pub state_sync_commit_interval: u64,

    /// Leaves asked for in each state sync request.
    #[arg(
        env = "MADARA_STATE_SYNC_REQUEST_SIZE",
        long,
        default_value_t = MAX_LEAVES_LIMIT,
        value_parser = clap::value_parser!(u16).range(1..=MAX_LEAVES_LIMIT as i64),
    )]
    pub state_sync_request_size: u16,

    /// Timeout of a single state sync request, in milliseconds.
    #[arg(env = "MADARA_STATE_SYNC_REQUEST_TIMEOUT_MS", long, value_name = "MS", default_value_t = DEFAULT_REQUEST_TIMEOUT_MS)]
    pub state_sync_request_timeout_ms: u64,

    /// Size of the keys and values served in one leafs response, in bytes. Larger responses are cut short.
    #[arg(env = "MADARA_STATE_SYNC_RESPONSE_BYTES", long, value_name = "BYTES", default_value_t = DEFAULT_RESPONSE_BYTES)]
    pub state_sync_response_bytes: usize,

    /// The network this node is part of. Only local networks may change the commit intervals.
    #[arg(env = "MADARA_NETWORK", long, value_enum, default_value_t = NetworkType::Mainnet)]
    pub network: NetworkType,
}

impl Default for AtomicSyncParams {
    fn default() -> Self {
        Self {
            atomic_commit_interval: DEFAULT_COMMIT_INTERVAL,
            state_sync_commit_interval: DEFAULT_SYNCABLE_INTERVAL,
            state_sync_request_size: MAX_LEAVES_LIMIT,
            state_sync_request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            state_sync_response_bytes: DEFAULT_RESPONSE_BYTES,
            network: NetworkType::Mainnet,
        }
    }
}

impl AtomicSyncParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.atomic_commit_interval == 0 {
            return Err(ConfigError::ZeroCommitInterval);
        }
        if self.state_sync_commit_interval == 0 || self.state_sync_commit_interval % self.atomic_commit_interval != 0 {
            return Err(ConfigError::NotAMultiple {
                syncable: self.state_sync_commit_interval,
                commit: self.atomic_commit_interval,
            });
        }
        if self.network != NetworkType::Local
            && (self.atomic_commit_interval != DEFAULT_COMMIT_INTERVAL
                || self.state_sync_commit_interval != DEFAULT_SYNCABLE_INTERVAL)
        {
            return Err(ConfigError::CustomIntervalOnPublicNetwork(self.network));
        }
        if !(1..=MAX_LEAVES_LIMIT).contains(&self.state_sync_request_size) {
            return Err(ConfigError::RequestSize(self.state_sync_request_size));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.state_sync_request_timeout_ms)
    }

    /// Whether peers may sync to the root at `height`.
    pub fn is_syncable_height(&self, height: u64) -> bool {
        self.state_sync_commit_interval != 0 && height % self.state_sync_commit_interval == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use clap::Parser;
    use rstest::rstest;

    #[derive(Parser, Debug)]
    struct Cli {
        #[clap(flatten)]
        params: AtomicSyncParams,
    }

    #[test]
    fn defaults() {
        let params = Cli::try_parse_from(["madara"]).unwrap().params;
        assert_eq!(params.atomic_commit_interval, 4096);
        assert_eq!(params.state_sync_commit_interval, 16384);
        assert_eq!(params.state_sync_request_size, 1024);
        assert_eq!(params.request_timeout(), Duration::from_secs(30));
        assert_eq!(params.state_sync_response_bytes, 1 << 20);
        assert_eq!(params.network, NetworkType::Mainnet);
        assert_eq!(params.validate(), Ok(()));
        assert!(params.is_syncable_height(32768));
        assert!(!params.is_syncable_height(4096));
    }

    #[test]
    fn request_size_is_bounded() {
        assert!(Cli::try_parse_from(["madara", "--state-sync-request-size", "0"]).is_err());
        assert!(Cli::try_parse_from(["madara", "--state-sync-request-size", "1025"]).is_err());
        let params = Cli::try_parse_from(["madara", "--state-sync-request-size", "12"]).unwrap().params;
        assert_eq!(params.state_sync_request_size, 12);
    }

    #[rstest]
    #[case::local(NetworkType::Local, 1024, 4096, Ok(()))]
    #[case::not_a_multiple(NetworkType::Local, 1024, 1500, Err(ConfigError::NotAMultiple { syncable: 1500, commit: 1024 }))]
    #[case::zero(NetworkType::Local, 0, 4096, Err(ConfigError::ZeroCommitInterval))]
    #[case::public(NetworkType::Testnet, 1024, 4096, Err(ConfigError::CustomIntervalOnPublicNetwork(NetworkType::Testnet)))]
    fn intervals(
        #[case] network: NetworkType,
        #[case] commit: u64,
        #[case] syncable: u64,
        #[case] expected: Result<(), ConfigError>,
    ) {
        let params = AtomicSyncParams {
            network,
            atomic_commit_interval: commit,
            state_sync_commit_interval: syncable,
            ..Default::default()
        };
        assert_eq!(params.validate(), expected);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let params: AtomicSyncParams =
            serde_json::from_str(r#"{ "network": "local", "atomic_commit_interval": 8 }"#).unwrap();
        assert_eq!(params.network, NetworkType::Local);
        assert_eq!(params.atomic_commit_interval, 8);
        assert_eq!(params.state_sync_request_size, MAX_LEAVES_LIMIT);
        assert_eq!(serde_json::to_value(&params).unwrap()["network"], "local");
    }

    #[test]
    fn network_from_cli() {
        let params = Cli::try_parse_from(["madara", "--network", "local", "--atomic-commit-interval", "8"]).unwrap();
        assert_matches!(params.params.network, NetworkType::Local);
        assert_eq!(params.params.atomic_commit_interval, 8);
    }
}
