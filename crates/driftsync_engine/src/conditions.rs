//! Device preconditions for starting and continuing a sync job.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// What started a sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// User-initiated, e.g. pull-to-refresh.
    OnDemand,
    /// Background, interval-based.
    Periodic,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::OnDemand => f.write_str("on-demand"),
            Trigger::Periodic => f.write_str("periodic"),
        }
    }
}

/// A device condition a job depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Precondition {
    /// The network is reachable.
    Network,
    /// Storage has headroom for incoming records.
    Storage,
    /// Battery is not critically low.
    Battery,
    /// The device is otherwise idle.
    Idle,
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precondition::Network => f.write_str("network unreachable"),
            Precondition::Storage => f.write_str("storage low"),
            Precondition::Battery => f.write_str("battery critically low"),
            Precondition::Idle => f.write_str("device busy"),
        }
    }
}

/// Reports host platform state for job preconditions.
pub trait DeviceConditions: Send + Sync {
    /// Returns true if the network is reachable.
    fn network_reachable(&self) -> bool;

    /// Returns true if storage has headroom.
    fn storage_available(&self) -> bool;

    /// Returns true unless the battery is critically low.
    fn battery_ok(&self) -> bool;

    /// Returns true if the device is otherwise idle.
    fn device_idle(&self) -> bool;

    /// Returns the first unmet precondition, if any.
    ///
    /// Idleness is only checked when `require_idle` is set.
    fn first_unmet(&self, require_idle: bool) -> Option<Precondition> {
        if !self.network_reachable() {
            Some(Precondition::Network)
        } else if !self.storage_available() {
            Some(Precondition::Storage)
        } else if !self.battery_ok() {
            Some(Precondition::Battery)
        } else if require_idle && !self.device_idle() {
            Some(Precondition::Idle)
        } else {
            None
        }
    }
}

/// Conditions that always hold.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReady;

impl DeviceConditions for AlwaysReady {
    fn network_reachable(&self) -> bool {
        true
    }

    fn storage_available(&self) -> bool {
        true
    }

    fn battery_ok(&self) -> bool {
        true
    }

    fn device_idle(&self) -> bool {
        true
    }
}

/// Conditions set by hand, for hosts that push state changes and for tests.
#[derive(Debug)]
pub struct ManualConditions {
    network: AtomicBool,
    storage: AtomicBool,
    battery: AtomicBool,
    idle: AtomicBool,
}

impl Default for ManualConditions {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualConditions {
    /// Creates conditions that all hold.
    pub fn new() -> Self {
        Self {
            network: AtomicBool::new(true),
            storage: AtomicBool::new(true),
            battery: AtomicBool::new(true),
            idle: AtomicBool::new(true),
        }
    }

    /// Sets network reachability.
    pub fn set_network(&self, reachable: bool) {
        self.network.store(reachable, Ordering::SeqCst);
    }

    /// Sets storage headroom.
    pub fn set_storage(&self, available: bool) {
        self.storage.store(available, Ordering::SeqCst);
    }

    /// Sets battery health.
    pub fn set_battery(&self, ok: bool) {
        self.battery.store(ok, Ordering::SeqCst);
    }

    /// Sets device idleness.
    pub fn set_idle(&self, idle: bool) {
        self.idle.store(idle, Ordering::SeqCst);
    }
}

impl DeviceConditions for ManualConditions {
    fn network_reachable(&self) -> bool {
        self.network.load(Ordering::SeqCst)
    }

    fn storage_available(&self) -> bool {
        self.storage.load(Ordering::SeqCst)
    }

    fn battery_ok(&self) -> bool {
        self.battery.load(Ordering::SeqCst)
    }

    fn device_idle(&self) -> bool {
        self.idle.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_only_matters_when_required() {
        let conditions = ManualConditions::new();
        conditions.set_idle(false);
        assert_eq!(conditions.first_unmet(false), None);
        assert_eq!(conditions.first_unmet(true), Some(Precondition::Idle));
    }

    #[test]
    fn network_is_checked_first() {
        let conditions = ManualConditions::new();
        conditions.set_battery(false);
        conditions.set_network(false);
        assert_eq!(conditions.first_unmet(false), Some(Precondition::Network));
        conditions.set_network(true);
        assert_eq!(conditions.first_unmet(false), Some(Precondition::Battery));
        assert_eq!(AlwaysReady.first_unmet(true), None);
    }
}
