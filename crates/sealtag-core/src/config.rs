//! Tunables for the key manager.
//!
//! Every field has a `DEFAULT_*` constant. [`KeyManagerConfig::validate`] runs
//! once when a [`KeyManager`](crate::KeyManager) is built; the engines assume a
//! validated config afterwards.

use std::time::Duration;

use crate::error::ConfigError;

/// Tags minted per batch.
pub const DEFAULT_TAG_BATCH_SIZE: usize = 40;

/// A fresh batch is minted when acked plus in-flight tags drop below this.
pub const DEFAULT_LOW_WATER_MARK: usize = 30;

/// PENDING sets older than this are discarded by the sweeper.
pub const DEFAULT_PENDING_ACK_TIMEOUT: Duration = Duration::from_secs(60);

/// Session keys older than this are rotated through the rekey protocol.
pub const DEFAULT_MAX_KEY_AGE: Duration = Duration::from_secs(30 * 60);

/// ACKED outbound sets older than this are discarded.
pub const DEFAULT_OUTBOUND_TAG_LIFETIME: Duration = Duration::from_secs(10 * 60);

/// Received sets outlive the sender's use of them.
pub const DEFAULT_INBOUND_TAG_LIFETIME: Duration = Duration::from_secs(15 * 60);

/// Tag table size above which the oldest received sets are evicted.
pub const DEFAULT_MAX_TAG_TABLE_ENTRIES: usize = 500_000;

/// Period of the background sweeper.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Sessions handled per sweeper burst.
pub const DEFAULT_SWEEP_BATCH_SIZE: usize = 64;

/// Tag table stripes.
pub const DEFAULT_TAG_TABLE_SHARDS: usize = 64;

/// Largest batch a single frame can carry (count is one byte).
pub const MAX_TAG_BATCH_SIZE: usize = u8::MAX as usize;

/// Key manager configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyManagerConfig {
    /// Tags minted per batch (1..=255)
    pub tag_batch_size: usize,
    /// Mint when acked + in-flight tags for the current key fall below this
    pub low_water_mark: usize,
    /// How long a delivered batch may wait for its ack
    pub pending_ack_timeout: Duration,
    /// Age at which the current key is rotated
    pub max_key_age: Duration,
    /// Lifetime of ACKED outbound sets
    pub outbound_tag_lifetime: Duration,
    /// Lifetime of received sets (must be >= `outbound_tag_lifetime`)
    pub inbound_tag_lifetime: Duration,
    /// Tag table capacity before overflow eviction
    pub max_tag_table_entries: usize,
    /// Background sweeper period
    pub sweep_interval: Duration,
    /// Sessions per sweeper burst
    pub sweep_batch_size: usize,
    /// Tag table stripes, rounded up to a power of two
    pub tag_table_shards: usize,
}

impl Default for KeyManagerConfig {
    fn default() -> Self {
        Self {
            tag_batch_size: DEFAULT_TAG_BATCH_SIZE,
            low_water_mark: DEFAULT_LOW_WATER_MARK,
            pending_ack_timeout: DEFAULT_PENDING_ACK_TIMEOUT,
            max_key_age: DEFAULT_MAX_KEY_AGE,
            outbound_tag_lifetime: DEFAULT_OUTBOUND_TAG_LIFETIME,
            inbound_tag_lifetime: DEFAULT_INBOUND_TAG_LIFETIME,
            max_tag_table_entries: DEFAULT_MAX_TAG_TABLE_ENTRIES,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            sweep_batch_size: DEFAULT_SWEEP_BATCH_SIZE,
            tag_table_shards: DEFAULT_TAG_TABLE_SHARDS,
        }
    }
}

impl KeyManagerConfig {
    /// Check the tunables against each other.
    ///
    /// # Errors
    ///
    /// - `ConfigError::InvalidBatchSize` if the batch size is 0 or above 255
    /// - `ConfigError::ZeroDuration` for a zero timeout, lifetime or interval
    /// - `ConfigError::InboundLifetimeTooShort` if received tags would expire
    ///   before the sender stops using them
    /// - `ConfigError::ZeroCapacity` for zero table size, shard count or sweep
    ///   batch
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tag_batch_size == 0 || self.tag_batch_size > MAX_TAG_BATCH_SIZE {
            return Err(ConfigError::InvalidBatchSize {
                size: self.tag_batch_size,
                max: MAX_TAG_BATCH_SIZE,
            });
        }

        for (field, value) in [
            ("pending_ack_timeout", self.pending_ack_timeout),
            ("max_key_age", self.max_key_age),
            ("outbound_tag_lifetime", self.outbound_tag_lifetime),
            ("inbound_tag_lifetime", self.inbound_tag_lifetime),
            ("sweep_interval", self.sweep_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { field });
            }
        }

        if self.inbound_tag_lifetime < self.outbound_tag_lifetime {
            return Err(ConfigError::InboundLifetimeTooShort {
                inbound: self.inbound_tag_lifetime,
                outbound: self.outbound_tag_lifetime,
            });
        }

        for (field, value) in [
            ("max_tag_table_entries", self.max_tag_table_entries),
            ("sweep_batch_size", self.sweep_batch_size),
            ("tag_table_shards", self.tag_table_shards),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroCapacity { field });
            }
        }

        Ok(())
    }
}
