//! Table Configuration
//!
//! Tunables shared by every peer at a table. All peers must agree on
//! `deck_size`; the rest are local.

use crate::core::sra::DEFAULT_KEY_BITS;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable is not a number.
    #[error("{var} is not a valid number: {value:?}")]
    InvalidNumber {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },

    /// Deck size outside `1..=max_deck_size`.
    #[error("deck size {size} outside 1..={max}")]
    DeckSize {
        /// Requested size.
        size: usize,
        /// Upper bound.
        max: usize,
    },

    /// Key size too small or larger than the modulus.
    #[error("key size {0} bits outside 64..=606")]
    KeyBits(u64),

    /// Relay channel capacity of zero.
    #[error("relay channel capacity must be positive")]
    ChannelCapacity,

    /// Relay channel too small to buffer one shuffle round.
    #[error("relay channel capacity {capacity} below {min} for this table")]
    CapacityBelowRound {
        /// Configured capacity.
        capacity: usize,
        /// Messages in one shuffle round.
        min: usize,
    },
}

/// Per-table settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    /// Cards per deck.
    pub deck_size: usize,
    /// Bit length of generated key exponents.
    pub key_bits: u64,
    /// Largest deck accepted from a peer's proposal.
    pub max_deck_size: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            deck_size: 52,
            key_bits: DEFAULT_KEY_BITS,
            max_deck_size: 1024,
        }
    }
}

impl TableConfig {
    /// Build from `SECRET_CARDS_*` environment variables, falling back
    /// to defaults for any that are unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            deck_size: env_number("SECRET_CARDS_DECK_SIZE")?.unwrap_or(defaults.deck_size),
            key_bits: env_number("SECRET_CARDS_KEY_BITS")?.unwrap_or(defaults.key_bits),
            max_deck_size: env_number("SECRET_CARDS_MAX_DECK_SIZE")?
                .unwrap_or(defaults.max_deck_size),
        };
        config.validate()?;
        Ok(config)
    }

    /// Convenience constructor for a given deck size.
    pub fn with_deck_size(deck_size: usize) -> Self {
        Self { deck_size, ..Self::default() }
    }

    /// Check that the settings are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.check_deck_size(self.deck_size)?;
        // exponents must stay below p - 1 = 2^607 - 2
        if !(64..=606).contains(&self.key_bits) {
            return Err(ConfigError::KeyBits(self.key_bits));
        }
        Ok(())
    }

    /// Check a proposed deck size against the configured bound.
    pub fn check_deck_size(&self, size: usize) -> Result<(), ConfigError> {
        if size == 0 || size > self.max_deck_size {
            return Err(ConfigError::DeckSize { size, max: self.max_deck_size });
        }
        Ok(())
    }
}

/// Settings for the async relay hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Capacity of each peer's inbound queue.
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { channel_capacity: 1024 }
    }
}

impl RelayConfig {
    /// Build from `SECRET_CARDS_CHANNEL_CAPACITY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let channel_capacity = env_number("SECRET_CARDS_CHANNEL_CAPACITY")?
            .unwrap_or(Self::default().channel_capacity);
        if channel_capacity == 0 {
            return Err(ConfigError::ChannelCapacity);
        }
        Ok(Self { channel_capacity })
    }
}

fn env_number<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = TableConfig::default();
        assert_eq!(config.deck_size, 52);
        assert_eq!(config.key_bits, 600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deck_size_bounds() {
        assert_eq!(
            TableConfig::with_deck_size(0).validate(),
            Err(ConfigError::DeckSize { size: 0, max: 1024 })
        );
        assert!(TableConfig::with_deck_size(1025).validate().is_err());
        assert!(TableConfig::with_deck_size(8).validate().is_ok());
    }

    #[test]
    fn test_key_bits_bounds() {
        let config = TableConfig { key_bits: 607, ..TableConfig::default() };
        assert_eq!(config.validate(), Err(ConfigError::KeyBits(607)));
    }

    #[test]
    fn test_env_number_parse() {
        std::env::set_var("SECRET_CARDS_TEST_NUMBER", " 16 ");
        assert_eq!(env_number::<usize>("SECRET_CARDS_TEST_NUMBER"), Ok(Some(16)));

        std::env::set_var("SECRET_CARDS_TEST_NUMBER", "sixteen");
        assert!(matches!(
            env_number::<usize>("SECRET_CARDS_TEST_NUMBER"),
            Err(ConfigError::InvalidNumber { .. })
        ));

        std::env::remove_var("SECRET_CARDS_TEST_NUMBER");
        assert_eq!(env_number::<usize>("SECRET_CARDS_TEST_NUMBER"), Ok(None));
    }
}
