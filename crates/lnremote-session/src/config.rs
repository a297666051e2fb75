use std::time::Duration;

use lnremote_protocol::CodecConfig;

/// Default time to wait for a command's ACK/NAK.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

/// Default time allowed to open the transport.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default notification broadcast buffer.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 256;

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bounded wait for each command's response.
    pub command_timeout: Duration,
    /// Bounded wait for `open`/`reconnect` to establish the transport.
    pub connect_timeout: Duration,
    /// Per-subscriber notification buffer; slow subscribers skip ahead.
    pub notification_capacity: usize,
    /// Wire framing.
    pub codec: CodecConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            codec: CodecConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Override the command timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}
