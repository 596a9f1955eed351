use thiserror::Error;

/// Pending messages a session may have buffered before new ones are dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    queue_capacity: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("outbound queue capacity must be at least 1")]
    ZeroCapacity,
}

impl HubConfig {
    pub fn new(queue_capacity: usize) -> Result<Self, ConfigError> {
        if queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(Self { queue_capacity })
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_capacity_is_ten() {
        assert_eq!(HubConfig::default().queue_capacity(), 10);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(HubConfig::new(0), Err(ConfigError::ZeroCapacity));
        assert_eq!(HubConfig::new(3).map(|c| c.queue_capacity()), Ok(3));
    }
}
