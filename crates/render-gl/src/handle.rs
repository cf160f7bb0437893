//! Base of every GPU mirror object: a raw handle plus idle tracking.

use std::time::Duration;

use gl::types::GLuint;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandleGL {
    handle: GLuint,
    /// Frame time (ms) of the last access.
    last_used: u64,
    /// Zero means "never expires".
    expiration_ms: u64,
}

impl ResourceHandleGL {
    pub fn new(expiration: Duration, frame_time: u64) -> Self {
        Self {
            handle: 0,
            last_used: frame_time,
            expiration_ms: expiration.as_millis() as u64,
        }
    }

    pub fn handle(&self) -> GLuint {
        self.handle
    }

    pub fn set_handle(&mut self, handle: GLuint) {
        self.handle = handle;
    }

    /// Take the handle out, leaving zero behind. Used when destroying.
    pub fn take_handle(&mut self) -> GLuint {
        std::mem::take(&mut self.handle)
    }

    pub fn touch(&mut self, frame_time: u64) {
        self.last_used = self.last_used.max(frame_time);
    }

    pub fn last_used(&self) -> u64 {
        self.last_used
    }

    pub fn set_expiration(&mut self, expiration: Duration) {
        self.expiration_ms = expiration.as_millis() as u64;
    }

    pub fn expiration(&self) -> Duration {
        Duration::from_millis(self.expiration_ms)
    }

    pub fn expired(&self, frame_time: u64) -> bool {
        self.expiration_ms > 0 && frame_time.saturating_sub(self.last_used) > self.expiration_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_only_after_idle_threshold() {
        let mut handle = ResourceHandleGL::new(Duration::from_millis(100), 1000);
        assert!(!handle.expired(1100));
        assert!(handle.expired(1101));
        handle.touch(1100);
        assert!(!handle.expired(1150));
    }

    #[test]
    fn zero_expiration_never_expires() {
        let handle = ResourceHandleGL::new(Duration::ZERO, 0);
        assert!(!handle.expired(u64::MAX));
    }
}
