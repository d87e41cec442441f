use crate::config::EndpointSettings;
use thiserror::Error;

/// Prefetch derived from the concurrency ceiling when not explicitly
/// configured; keeps worker queues fed without unbounded broker credit.
pub const DEFAULT_PREFETCH_MULTIPLIER: u16 = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointConfigError {
    #[error("endpoint concurrency limit must be at least 1")]
    ZeroConcurrency,
    #[error("endpoint prefetch {prefetch} must be at least the concurrency limit {concurrency_limit}")]
    PrefetchBelowConcurrency { prefetch: u16, concurrency_limit: u16 },
}

/// Immutable descriptor for one consumer binding, validated at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndpointConfig {
    durable: bool,
    concurrency_limit: u16,
    prefetch: u16,
}

impl EndpointConfig {
    pub fn new(
        durable: bool,
        concurrency_limit: u16,
        prefetch: Option<u16>,
    ) -> Result<Self, EndpointConfigError> {
        if concurrency_limit == 0 {
            return Err(EndpointConfigError::ZeroConcurrency);
        }

        let prefetch = match prefetch {
            Some(prefetch) if prefetch < concurrency_limit => {
                return Err(EndpointConfigError::PrefetchBelowConcurrency {
                    prefetch,
                    concurrency_limit,
                });
            }
            Some(prefetch) => prefetch,
            None => concurrency_limit.saturating_mul(DEFAULT_PREFETCH_MULTIPLIER),
        };

        Ok(Self {
            durable,
            concurrency_limit,
            prefetch,
        })
    }

    pub fn from_settings(settings: &EndpointSettings) -> Result<Self, EndpointConfigError> {
        Self::new(
            settings.durable,
            settings.concurrency_limit,
            settings.prefetch,
        )
    }

    pub fn durable(&self) -> bool {
        self.durable
    }

    pub fn concurrency_limit(&self) -> u16 {
        self.concurrency_limit
    }

    pub fn prefetch(&self) -> u16 {
        self.prefetch
    }
}
