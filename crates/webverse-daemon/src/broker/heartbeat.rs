//! Heartbeat age accounting.
//!
//! Each identified client has an age counter. A `HEARTBEAT` resets it to
//! zero; every tick adds a fixed increment to all counters and reports those
//! that went past the timeout.

use crate::config::HeartbeatSettings;
use std::collections::HashMap;
use tracing::{trace, warn};
use webverse_core::ConnectionId;

#[derive(Debug)]
pub struct HeartbeatMonitor {
    ages: HashMap<ConnectionId, u64>,
    increment: u64,
    timeout: u64,
}

impl HeartbeatMonitor {
    pub fn new(settings: HeartbeatSettings) -> Self {
        Self {
            ages: HashMap::new(),
            increment: settings.increment,
            timeout: settings.timeout,
        }
    }

    /// Start tracking a connection at age zero.
    pub fn track(&mut self, connection_id: ConnectionId) {
        self.ages.insert(connection_id, 0);
    }

    /// Stop tracking a connection.
    pub fn forget(&mut self, connection_id: &ConnectionId) {
        self.ages.remove(connection_id);
    }

    /// Reset the age of a tracked connection.
    ///
    /// Unknown connections are rejected; no counter is created for them.
    pub fn reset(&mut self, connection_id: &ConnectionId) -> bool {
        match self.ages.get_mut(connection_id) {
            Some(age) => {
                *age = 0;
                trace!(conn_id = %connection_id, "heartbeat");
                true
            }
            None => {
                warn!(conn_id = %connection_id, "heartbeat for unknown connection");
                false
            }
        }
    }

    /// Age every counter by one increment.
    ///
    /// Returns the connections whose age now exceeds the timeout. They stay
    /// tracked until the caller removes them.
    pub fn tick(&mut self) -> Vec<ConnectionId> {
        let mut expired = Vec::new();
        for (id, age) in self.ages.iter_mut() {
            *age = age.saturating_add(self.increment);
            if *age > self.timeout {
                expired.push(id.clone());
            }
        }
        expired.sort();
        expired
    }

    pub fn is_tracked(&self, connection_id: &ConnectionId) -> bool {
        self.ages.contains_key(connection_id)
    }

    pub fn age(&self, connection_id: &ConnectionId) -> Option<u64> {
        self.ages.get(connection_id).copied()
    }

    pub fn len(&self) -> usize {
        self.ages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HeartbeatMonitor {
        HeartbeatMonitor::new(HeartbeatSettings::default())
    }

    #[test]
    fn ages_by_increment_each_tick() {
        let mut hb = monitor();
        let id = ConnectionId::from("c");
        hb.track(id.clone());
        for n in 1..=6 {
            assert!(hb.tick().is_empty());
            assert_eq!(hb.age(&id), Some(5 * n));
        }
    }

    #[test]
    fn expires_only_past_timeout() {
        let mut hb = monitor();
        let id = ConnectionId::from("c");
        hb.track(id.clone());
        for _ in 0..6 {
            hb.tick();
        }
        // Exactly at the timeout is still alive.
        assert_eq!(hb.age(&id), Some(30));
        assert_eq!(hb.tick(), vec![id]);
    }

    #[test]
    fn reset_returns_to_zero() {
        let mut hb = monitor();
        let id = ConnectionId::from("c");
        hb.track(id.clone());
        hb.tick();
        hb.tick();
        assert!(hb.reset(&id));
        assert_eq!(hb.age(&id), Some(0));
    }

    #[test]
    fn reset_unknown_creates_nothing() {
        let mut hb = monitor();
        assert!(!hb.reset(&ConnectionId::from("ghost")));
        assert_eq!(hb.len(), 0);
    }

    #[test]
    fn forget_stops_tracking() {
        let mut hb = monitor();
        let id = ConnectionId::from("c");
        hb.track(id.clone());
        hb.forget(&id);
        assert!(!hb.is_tracked(&id));
        assert!(hb.tick().is_empty());
    }

    #[test]
    fn custom_settings() {
        let mut hb = HeartbeatMonitor::new(HeartbeatSettings {
            interval_secs: 1,
            increment: 10,
            timeout: 15,
        });
        let id = ConnectionId::from("c");
        hb.track(id.clone());
        assert!(hb.tick().is_empty());
        assert_eq!(hb.tick(), vec![id]);
    }
}
