//! Resource pool for classrooms, labs and mobile classrooms
//!
//! One pool per running server process. Every mutation funnels through
//! `allocate`/`release`, each of which runs inside a single critical section
//! so the two-counter decision can never interleave with another requester.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Initial capacities of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    pub classrooms: u32,
    pub labs: u32,
}

impl Capacity {
    pub const fn new(classrooms: u32, labs: u32) -> Self {
        Self { classrooms, labs }
    }
}

/// Point-in-time view of the pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inventory {
    pub classrooms: u32,
    pub labs: u32,
    pub mobile_classrooms: u32,
}

impl Inventory {
    fn full(capacity: Capacity) -> Self {
        Self {
            classrooms: capacity.classrooms,
            labs: capacity.labs,
            mobile_classrooms: 0,
        }
    }
}

impl fmt::Display for Inventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Classrooms available: {}, Labs available: {}, Mobile classrooms: {}",
            self.classrooms, self.labs, self.mobile_classrooms
        )
    }
}

/// Amounts granted by a single `allocate` call
///
/// The all-zero value is the canonical denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationOutcome {
    pub labs: u32,
    pub mobile_classrooms: u32,
    pub classrooms: u32,
}

impl AllocationOutcome {
    /// Denied request: nothing granted
    pub const DENIED: Self = Self {
        labs: 0,
        mobile_classrooms: 0,
        classrooms: 0,
    };

    pub const fn new(labs: u32, mobile_classrooms: u32, classrooms: u32) -> Self {
        Self {
            labs,
            mobile_classrooms,
            classrooms,
        }
    }

    #[inline]
    pub fn is_denied(&self) -> bool {
        *self == Self::DENIED
    }

    /// True when part of the lab demand was covered by converted classrooms
    #[inline]
    pub fn has_conversion(&self) -> bool {
        self.mobile_classrooms > 0
    }
}

/// Release rejected because it does not fit the current counters
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReleaseError {
    #[error("release of {outcome:?} inconsistent with pool state ({state})")]
    Inconsistent {
        outcome: AllocationOutcome,
        state: Inventory,
    },
}

/// Shared classroom/lab allocator
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
#[derive(Debug)]
pub struct ResourcePool {
    capacity: Capacity,
    inventory: Mutex<Inventory>,
}

impl ResourcePool {
    /// Create a pool at full capacity
    pub fn new(capacity: Capacity) -> Self {
        Self {
            capacity,
            inventory: Mutex::new(Inventory::full(capacity)),
        }
    }

    /// Capacities the pool was created with (and resets to)
    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    /// Grant the request in full, with lab shortfall covered by classrooms, or deny it
    ///
    /// 1. Enough labs and classrooms: grant exactly what was asked.
    /// 2. Labs short: grant every remaining lab, grant the classrooms asked for,
    ///    and convert one extra classroom per missing lab into a mobile classroom.
    /// 3. Otherwise deny with no counter change.
    pub fn allocate(&self, classrooms_needed: u32, labs_needed: u32) -> AllocationOutcome {
        let mut inv = self.inventory.lock();

        if inv.labs >= labs_needed && inv.classrooms >= classrooms_needed {
            inv.labs -= labs_needed;
            inv.classrooms -= classrooms_needed;
            return AllocationOutcome::new(labs_needed, 0, classrooms_needed);
        }

        let labs_granted = inv.labs;
        let lab_shortfall = labs_needed.saturating_sub(labs_granted);
        let classrooms_required = match classrooms_needed.checked_add(lab_shortfall) {
            Some(required) => required,
            None => return AllocationOutcome::DENIED,
        };

        // lab_shortfall == 0 here means classrooms alone were short
        if lab_shortfall > 0 && inv.classrooms >= classrooms_required {
            // Every counter is computed before any is written
            let Some(mobile_classrooms) = inv.mobile_classrooms.checked_add(lab_shortfall) else {
                return AllocationOutcome::DENIED;
            };
            inv.labs -= labs_granted;
            inv.classrooms -= classrooms_required;
            inv.mobile_classrooms = mobile_classrooms;
            return AllocationOutcome::new(labs_granted, lab_shortfall, classrooms_needed);
        }

        AllocationOutcome::DENIED
    }

    /// Return a previously granted outcome to the pool
    ///
    /// The pool keeps no registry of holders, so the outcome is validated only
    /// against the counters: mobile classrooms returned may not exceed those
    /// outstanding and no counter may overflow.
    pub fn release(&self, outcome: &AllocationOutcome) -> Result<(), ReleaseError> {
        let mut inv = self.inventory.lock();

        let labs = inv.labs.checked_add(outcome.labs);
        let classrooms = inv
            .classrooms
            .checked_add(outcome.classrooms)
            .and_then(|c| c.checked_add(outcome.mobile_classrooms));
        let mobile = inv.mobile_classrooms.checked_sub(outcome.mobile_classrooms);

        match (labs, classrooms, mobile) {
            (Some(labs), Some(classrooms), Some(mobile_classrooms)) => {
                *inv = Inventory {
                    classrooms,
                    labs,
                    mobile_classrooms,
                };
                Ok(())
            }
            _ => Err(ReleaseError::Inconsistent {
                outcome: *outcome,
                state: *inv,
            }),
        }
    }

    /// Restore full capacity, returning the counters as they were before
    pub fn reset(&self) -> Inventory {
        let mut inv = self.inventory.lock();
        std::mem::replace(&mut *inv, Inventory::full(self.capacity))
    }

    /// Current counters
    pub fn snapshot(&self) -> Inventory {
        *self.inventory.lock()
    }

    /// Human-readable counters, for logs and monitoring only
    pub fn statistics(&self) -> String {
        self.snapshot().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    fn pool(classrooms: u32, labs: u32) -> ResourcePool {
        ResourcePool::new(Capacity::new(classrooms, labs))
    }

    #[test]
    fn test_direct_grant() {
        let pool = pool(10, 4);
        let outcome = pool.allocate(5, 2);

        assert_eq!(outcome, AllocationOutcome::new(2, 0, 5));
        assert_eq!(
            pool.snapshot(),
            Inventory {
                classrooms: 5,
                labs: 2,
                mobile_classrooms: 0
            }
        );
    }

    #[test]
    fn test_grant_with_conversion() {
        let pool = pool(10, 2);
        let outcome = pool.allocate(5, 5);

        assert_eq!(outcome, AllocationOutcome::new(2, 3, 5));
        assert!(outcome.has_conversion());
        assert_eq!(
            pool.snapshot(),
            Inventory {
                classrooms: 2,
                labs: 0,
                mobile_classrooms: 3
            }
        );
    }

    #[test]
    fn test_denied_when_classrooms_short() {
        let pool = pool(4, 0);
        let outcome = pool.allocate(5, 0);

        assert!(outcome.is_denied());
        assert_eq!(pool.snapshot(), Inventory::full(Capacity::new(4, 0)));
    }

    #[test]
    fn test_labs_enough_but_classrooms_short_is_denied() {
        let pool = pool(3, 10);
        assert!(pool.allocate(4, 1).is_denied());
        assert_eq!(pool.snapshot().labs, 10);
    }

    #[test]
    fn test_denied_when_conversion_needs_too_many_classrooms() {
        let pool = pool(7, 2);
        // shortfall 3, required 5 + 3 = 8 > 7
        assert!(pool.allocate(5, 5).is_denied());
        assert_eq!(pool.snapshot(), Inventory::full(Capacity::new(7, 2)));
    }

    #[test]
    fn test_release_round_trip() {
        let pool = pool(10, 2);
        let before = pool.snapshot();

        let outcome = pool.allocate(5, 5);
        pool.release(&outcome).unwrap();

        assert_eq!(pool.snapshot(), before);
    }

    #[test]
    fn test_release_rejects_unknown_mobile_classrooms() {
        let pool = pool(10, 4);
        let err = pool.release(&AllocationOutcome::new(0, 2, 0)).unwrap_err();

        assert!(matches!(err, ReleaseError::Inconsistent { .. }));
        assert_eq!(pool.snapshot(), Inventory::full(Capacity::new(10, 4)));
    }

    #[test]
    fn test_release_rejects_overflow() {
        let pool = pool(10, 4);
        assert!(pool.release(&AllocationOutcome::new(u32::MAX, 0, 0)).is_err());
        assert_eq!(pool.snapshot().labs, 4);
    }

    #[test]
    fn test_conversion_denied_when_mobile_counter_would_overflow() {
        let pool = pool(10, 0);
        pool.release(&AllocationOutcome::new(0, 0, u32::MAX - 10)).unwrap();
        assert_eq!(pool.allocate(0, u32::MAX), AllocationOutcome::new(0, u32::MAX, 0));
        pool.release(&AllocationOutcome::new(0, 0, u32::MAX)).unwrap();

        let before = pool.snapshot();
        assert_eq!(
            before,
            Inventory {
                classrooms: u32::MAX,
                labs: 0,
                mobile_classrooms: u32::MAX
            }
        );
        assert!(pool.allocate(0, 1).is_denied());
        assert_eq!(pool.snapshot(), before);
    }

    #[test]
    fn test_reset_restores_capacity() {
        let pool = pool(30, 10);
        pool.allocate(5, 2);

        let previous = pool.reset();

        assert_eq!(previous.classrooms, 25);
        assert_eq!(previous.labs, 8);
        assert_eq!(pool.snapshot(), Inventory::full(Capacity::new(30, 10)));
    }

    #[test]
    fn test_statistics_lists_every_counter() {
        let pool = pool(10, 2);
        pool.allocate(5, 5);
        assert_eq!(
            pool.statistics(),
            "Classrooms available: 2, Labs available: 0, Mobile classrooms: 3"
        );
    }

    #[test]
    fn test_concurrent_allocations_never_oversubscribe() {
        let pool = Arc::new(pool(100, 40));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    let mut granted = Vec::new();
                    for j in 0..50 {
                        let outcome = pool.allocate((i + j) % 4, (i * j) % 5);
                        if !outcome.is_denied() {
                            granted.push(outcome);
                        }
                    }
                    granted
                })
            })
            .collect();

        let mut outstanding = Vec::new();
        for handle in handles {
            outstanding.extend(handle.join().unwrap());
        }

        let inv = pool.snapshot();
        let labs_out: u32 = outstanding.iter().map(|o| o.labs).sum();
        let classrooms_out: u32 = outstanding
            .iter()
            .map(|o| o.classrooms + o.mobile_classrooms)
            .sum();
        let mobile_out: u32 = outstanding.iter().map(|o| o.mobile_classrooms).sum();

        assert_eq!(inv.labs + labs_out, 40);
        assert_eq!(inv.classrooms + classrooms_out, 100);
        assert_eq!(inv.mobile_classrooms, mobile_out);

        for outcome in &outstanding {
            pool.release(outcome).unwrap();
        }
        assert_eq!(pool.snapshot(), Inventory::full(Capacity::new(100, 40)));
    }

    proptest! {
        #[test]
        fn prop_exact_grant_within_capacity(
            classrooms in 0u32..200,
            labs in 0u32..200,
            c_frac in 0.0f64..=1.0,
            l_frac in 0.0f64..=1.0,
        ) {
            let c = (classrooms as f64 * c_frac) as u32;
            let l = (labs as f64 * l_frac) as u32;
            let pool = pool(classrooms, labs);

            let outcome = pool.allocate(c, l);

            prop_assert_eq!(outcome, AllocationOutcome::new(l, 0, c));
            prop_assert_eq!(pool.snapshot().classrooms, classrooms - c);
            prop_assert_eq!(pool.snapshot().labs, labs - l);
        }

        #[test]
        fn prop_allocation_laws(classrooms in 0u32..100, labs in 0u32..100, c in 0u32..120, l in 0u32..120) {
            let pool = pool(classrooms, labs);
            let before = pool.snapshot();
            let outcome = pool.allocate(c, l);

            if l <= labs && c <= classrooms {
                prop_assert_eq!(outcome, AllocationOutcome::new(l, 0, c));
            } else if l > labs && classrooms >= c + (l - labs) {
                prop_assert_eq!(outcome, AllocationOutcome::new(labs, l - labs, c));
                let after = pool.snapshot();
                prop_assert_eq!(after.labs, 0);
                prop_assert_eq!(after.classrooms, classrooms - c - (l - labs));
                prop_assert_eq!(after.mobile_classrooms, l - labs);
            } else {
                prop_assert!(outcome.is_denied());
                prop_assert_eq!(pool.snapshot(), before);
                // same state, same inputs, same denial
                prop_assert!(pool.allocate(c, l).is_denied());
                prop_assert_eq!(pool.snapshot(), before);
            }

            if !outcome.is_denied() {
                prop_assert!(pool.release(&outcome).is_ok());
                prop_assert_eq!(pool.snapshot(), before);
            }
        }
    }
}

// Allocator Checklist:
// ✓ allocate/release each hold the pool lock for the whole decision
// ✓ Denial leaves every counter untouched
// ✓ Release validated before any counter moves
// ✓ No panics on overflow (checked arithmetic)
