//! Connection settings shared by the server and the client.
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;
/// Largest `max_frame_size` a configuration may ask for.
pub const FRAME_SIZE_LIMIT: u32 = 64 * 1024 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("buffer capacity must be non-zero")]
    ZeroCapacity,
    #[error("max frame size must be between 1 and {limit} bytes, got {size}")]
    FrameSize { size: u32, limit: u32 },
}

/// Settings applied to every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Bytes buffered between the socket pump and the frame decoder.
    pub buffer_capacity: usize,
    /// Largest frame body accepted or sent, in bytes.
    pub max_frame_size: u32,
    /// Socket read timeout. `None` blocks indefinitely.
    pub read_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_timeout: None,
        }
    }
}

impl Config {
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_max_frame_size(mut self, size: u32) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.max_frame_size == 0 || self.max_frame_size > FRAME_SIZE_LIMIT {
            return Err(ConfigError::FrameSize {
                size: self.max_frame_size,
                limit: FRAME_SIZE_LIMIT,
            });
        }
        Ok(())
    }
}
