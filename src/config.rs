// Copyright Delta PubSub Contributors - SPDX Identifier: Apache-2.0

//! Layered configuration for the pub-sub core. Follows the same
//! "`Default` literal, optionally overridden by the embedding application,
//! then overlaid by a handful of env vars" shape this codebase uses for its
//! own runtime tunables (compare `jni_client::get_runtime`'s
//! `GLIDE_TOKIO_WORKER_THREADS` lookup and `logger_core::create_directory_from_env`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ddata::WriteConsistency;

const DEFAULT_SEED: &str = "delta-pubsub-default-seed";

/// Every tunable named in the external-interfaces table. All fields have
/// literal defaults; an embedding application is expected to override the
/// fields it cares about and leave the rest alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `k`, the number of independent hash functions in the family.
    pub hash_family_size: usize,
    /// Cluster-wide hash salt. Must match across every node in the cluster.
    pub seed: String,
    /// Delay before a crashed pub/sub supervisor child is respawned.
    pub restart_delay: Duration,
    /// Period of the Update Loop.
    pub update_interval: Duration,
    /// Probability per tick of a `replaceAll` (forced) write. `1.0` disables
    /// delta updates entirely.
    pub force_update_probability: f64,
    /// Replication consistency requested for ordinary (non-forced) writes.
    pub write_consistency: WriteConsistency,
    /// Per-write replication timeout.
    pub write_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hash_family_size: 2,
            seed: DEFAULT_SEED.to_string(),
            restart_delay: Duration::from_secs(10),
            update_interval: Duration::from_secs(3),
            force_update_probability: 0.01,
            write_consistency: WriteConsistency::Local,
            write_timeout: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Start from [`Config::default`] and overlay the `DELTA_PUBSUB_*`
    /// environment variables an operator would reasonably want to tune
    /// without a redeploy. A present-but-unparseable value is logged and
    /// silently ignored, falling back to whatever the field already held --
    /// the same policy `create_directory_from_env` applies to logging setup.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("DELTA_PUBSUB_UPDATE_INTERVAL_MS") {
            match raw.parse::<u64>() {
                Ok(ms) => config.update_interval = Duration::from_millis(ms),
                Err(_) => logger_core::log_warn(
                    "config",
                    format!("ignoring unparseable DELTA_PUBSUB_UPDATE_INTERVAL_MS={raw:?}"),
                ),
            }
        }

        if let Ok(raw) = std::env::var("DELTA_PUBSUB_FORCE_UPDATE_PROBABILITY") {
            match raw.parse::<f64>() {
                Ok(p) if (0.0..=1.0).contains(&p) => config.force_update_probability = p,
                _ => logger_core::log_warn(
                    "config",
                    format!("ignoring out-of-range DELTA_PUBSUB_FORCE_UPDATE_PROBABILITY={raw:?}"),
                ),
            }
        }

        if let Ok(seed) = std::env::var("DELTA_PUBSUB_SEED") {
            if !seed.is_empty() {
                config.seed = seed;
            }
        }

        config
    }
}
