use std::ops::Deref;
use std::time::Instant;
use tracing::debug;

use crate::devices::entities::Platform;

/// An open push transport. The transport is released when the session is
/// dropped, whichever way `send_batch` exits.
pub struct GatewaySession<T> {
    platform: Platform,
    transport: Option<T>,
    opened_at: Instant,
}

impl<T> GatewaySession<T> {
    pub fn open(platform: Platform, transport: T) -> Self {
        debug!(%platform, "push transport started");
        Self {
            platform,
            transport: Some(transport),
            opened_at: Instant::now(),
        }
    }
}

impl<T> Deref for GatewaySession<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.transport {
            Some(transport) => transport,
            // Only taken in drop
            None => unreachable!("transport accessed after release"),
        }
    }
}

impl<T> Drop for GatewaySession<T> {
    fn drop(&mut self) {
        drop(self.transport.take());
        debug!(
            platform = %self.platform,
            elapsed_ms = self.opened_at.elapsed().as_millis() as u64,
            "push transport stopped"
        );
    }
}
