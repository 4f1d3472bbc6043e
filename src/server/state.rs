//! Server-wide state outside the pool
//!
//! - Failover: scripted PRINCIPAL_ACTIVE -> PRINCIPAL_DOWN -> REPLICA_ACTIVE
//!   machine. It changes labels and command replies only; requests are served
//!   in every state.
//! - SemesterClock: current semester epoch plus the archived statistics of
//!   every semester that was reset away.

use crate::core::pool::{Inventory, ResourcePool};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailoverState {
    PrincipalActive,
    PrincipalDown,
    ReplicaActive,
}

impl FailoverState {
    #[inline]
    fn from_u8(value: u8) -> Self {
        match value {
            1 => FailoverState::PrincipalDown,
            2 => FailoverState::ReplicaActive,
            _ => FailoverState::PrincipalActive,
        }
    }

    /// Role label used in logs and the journal
    pub fn label(&self) -> &'static str {
        match self {
            FailoverState::ReplicaActive => "REPLICA",
            _ => "PRINCIPAL",
        }
    }
}

impl fmt::Display for FailoverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailoverState::PrincipalActive => "PRINCIPAL_ACTIVE",
            FailoverState::PrincipalDown => "PRINCIPAL_DOWN",
            FailoverState::ReplicaActive => "REPLICA_ACTIVE",
        };
        f.write_str(s)
    }
}

/// Scripted failover state machine
pub struct Failover {
    state: AtomicU8,
    replica_enabled: bool,
    delay: Duration,
}

impl Failover {
    pub fn new(replica_enabled: bool, delay: Duration) -> Self {
        Self {
            state: AtomicU8::new(FailoverState::PrincipalActive as u8),
            replica_enabled,
            delay,
        }
    }

    #[inline]
    pub fn state(&self) -> FailoverState {
        FailoverState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn replica_enabled(&self) -> bool {
        self.replica_enabled
    }

    /// Enter PRINCIPAL_DOWN. With replicas enabled, a timer promotes the
    /// replica after the configured delay; the handle is returned for tests.
    pub fn simulate_failure(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        self.state
            .store(FailoverState::PrincipalDown as u8, Ordering::Release);

        if !self.replica_enabled {
            return None;
        }

        let failover = Arc::clone(self);
        Some(tokio::spawn(async move {
            tokio::time::sleep(failover.delay).await;
            if failover.promote_if_down() {
                tracing::info!(target: "server", state = %failover.state(), "Replica promoted after simulated failure");
            }
        }))
    }

    /// Force REPLICA_ACTIVE. `false` when replicas are disabled.
    pub fn activate_replica(&self) -> bool {
        if !self.replica_enabled {
            return false;
        }
        self.state
            .store(FailoverState::ReplicaActive as u8, Ordering::Release);
        true
    }

    /// PRINCIPAL_DOWN -> REPLICA_ACTIVE, only with replicas enabled
    pub fn promote_if_down(&self) -> bool {
        self.replica_enabled
            && self
                .state
                .compare_exchange(
                    FailoverState::PrincipalDown as u8,
                    FailoverState::ReplicaActive as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
    }
}

/// Outcome of a semester reset request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemesterChange {
    /// Pool restored to full capacity; `archived` is what the old semester left
    Reset { previous: u32, archived: Inventory },
    /// Requested semester is already current
    Unchanged,
}

struct ClockState {
    current: u32,
    archive: BTreeMap<u32, String>,
}

/// Semester epoch
pub struct SemesterClock {
    state: Mutex<ClockState>,
}

impl SemesterClock {
    pub fn new(initial: u32) -> Self {
        Self {
            state: Mutex::new(ClockState {
                current: initial,
                archive: BTreeMap::new(),
            }),
        }
    }

    #[inline]
    pub fn current(&self) -> u32 {
        self.state.lock().current
    }

    /// Move to `semester`, resetting `pool` if it differs from the current one
    pub fn reset_to(&self, semester: u32, pool: &ResourcePool) -> SemesterChange {
        let mut state = self.state.lock();
        if state.current == semester {
            return SemesterChange::Unchanged;
        }

        let archived = pool.reset();
        let previous = state.current;
        state.archive.insert(previous, archived.to_string());
        state.current = semester;

        SemesterChange::Reset { previous, archived }
    }

    /// Final statistics of every semester reset away, by semester
    pub fn archive(&self) -> BTreeMap<u32, String> {
        self.state.lock().archive.clone()
    }
}

impl Default for SemesterClock {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pool::Capacity;

    #[test]
    fn test_activate_replica_requires_enablement() {
        let disabled = Failover::new(false, Duration::ZERO);
        assert!(!disabled.activate_replica());
        assert_eq!(disabled.state(), FailoverState::PrincipalActive);

        let enabled = Failover::new(true, Duration::ZERO);
        assert!(enabled.activate_replica());
        assert_eq!(enabled.state(), FailoverState::ReplicaActive);
        assert_eq!(enabled.state().label(), "REPLICA");
    }

    #[tokio::test]
    async fn test_simulated_failure_promotes_replica() {
        let failover = Arc::new(Failover::new(true, Duration::from_millis(20)));
        let timer = failover.simulate_failure().unwrap();
        assert_eq!(failover.state(), FailoverState::PrincipalDown);

        timer.await.unwrap();
        assert_eq!(failover.state(), FailoverState::ReplicaActive);
    }

    #[tokio::test]
    async fn test_simulated_failure_without_replica_stays_down() {
        let failover = Arc::new(Failover::new(false, Duration::from_millis(1)));
        assert!(failover.simulate_failure().is_none());
        assert_eq!(failover.state(), FailoverState::PrincipalDown);
        assert!(!failover.promote_if_down());
        assert_eq!(failover.state().label(), "PRINCIPAL");
    }

    #[test]
    fn test_semester_reset_restores_capacity() {
        let pool = ResourcePool::new(Capacity::new(30, 10));
        let clock = SemesterClock::new(1);
        pool.allocate(5, 2);

        let change = clock.reset_to(2, &pool);
        assert!(matches!(change, SemesterChange::Reset { previous: 1, .. }));
        assert_eq!(clock.current(), 2);

        let inventory = pool.snapshot();
        assert_eq!((inventory.classrooms, inventory.labs, inventory.mobile_classrooms), (30, 10, 0));
        assert!(clock.archive()[&1].contains("Classrooms available: 25"));
    }

    #[test]
    fn test_same_semester_is_unchanged() {
        let pool = ResourcePool::new(Capacity::new(30, 10));
        let clock = SemesterClock::new(1);
        pool.allocate(5, 2);
        let before = pool.snapshot();

        assert_eq!(clock.reset_to(1, &pool), SemesterChange::Unchanged);
        assert_eq!(pool.snapshot(), before);
        assert!(clock.archive().is_empty());
    }
}
