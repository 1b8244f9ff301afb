//! Machine pool — available and in-use machine identifiers.

use std::collections::{HashMap, VecDeque};

use crate::error::{SchedulerError, SchedulerResult};

/// Ordered machine slots, each either available or in use.
///
/// A host may be listed more than once (a process map that puts every
/// process on `127.0.0.1`); each listing is its own slot. Slots are bound
/// from the front and returned to the back, so the available order follows
/// completion order.
#[derive(Debug, Clone)]
pub struct MachinePool {
    available: VecDeque<String>,
    /// In-use slot count per host.
    in_use: HashMap<String, usize>,
}

impl MachinePool {
    pub fn new<I, S>(machines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            available: machines.into_iter().map(Into::into).collect(),
            in_use: HashMap::new(),
        }
    }

    pub fn available(&self) -> usize {
        self.available.len()
    }

    pub fn in_use(&self) -> usize {
        self.in_use.values().sum()
    }

    pub fn total(&self) -> usize {
        self.available() + self.in_use()
    }

    /// Bind `n` slots from the front, or `None` if fewer are available.
    pub fn take(&mut self, n: usize) -> Option<Vec<String>> {
        if n > self.available.len() {
            return None;
        }
        let taken: Vec<String> = self.available.drain(..n).collect();
        for machine in &taken {
            *self.in_use.entry(machine.clone()).or_default() += 1;
        }
        Some(taken)
    }

    /// Return slots to the back of the pool.
    ///
    /// Nothing is released if any machine has fewer slots in use than
    /// `machines` lists.
    pub fn release(&mut self, machines: &[String]) -> SchedulerResult<()> {
        let mut wanted: HashMap<&str, usize> = HashMap::new();
        for machine in machines {
            *wanted.entry(machine.as_str()).or_default() += 1;
        }
        for (&machine, &count) in &wanted {
            if self.in_use.get(machine).copied().unwrap_or(0) < count {
                return Err(SchedulerError::UnknownMachine(machine.to_string()));
            }
        }
        for machine in machines {
            if let Some(count) = self.in_use.get_mut(machine) {
                *count -= 1;
                if *count == 0 {
                    self.in_use.remove(machine);
                }
            }
            self.available.push_back(machine.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_host_is_one_slot_per_listing() {
        let mut pool = MachinePool::new(["127.0.0.1", "127.0.0.1", "127.0.0.1"]);
        assert_eq!(pool.total(), 3);
        let pair = pool.take(2).unwrap();
        assert_eq!(pair, vec!["127.0.0.1", "127.0.0.1"]);
        assert_eq!((pool.available(), pool.in_use()), (1, 2));

        let single = pool.take(1).unwrap();
        pool.release(&pair).unwrap();
        assert_eq!((pool.available(), pool.in_use()), (2, 1));

        // Only one slot of the host is still bound.
        assert!(pool.release(&pair).is_err());
        assert_eq!(pool.in_use(), 1);
        pool.release(&single).unwrap();
        assert_eq!((pool.available(), pool.in_use(), pool.total()), (3, 0, 3));
    }

    #[test]
    fn take_front_release_back() {
        let mut pool = MachinePool::new(["a", "b", "c", "d"]);
        let first = pool.take(2).unwrap();
        assert_eq!(first, vec!["a", "b"]);
        assert!(pool.take(3).is_none());
        let second = pool.take(1).unwrap();
        assert_eq!(second, vec!["c"]);
        assert_eq!((pool.available(), pool.in_use(), pool.total()), (1, 3, 4));

        pool.release(&second).unwrap();
        pool.release(&first).unwrap();
        assert_eq!(pool.take(4).unwrap(), vec!["d", "c", "a", "b"]);
    }

    #[test]
    fn release_unknown_is_error() {
        let mut pool = MachinePool::new(["a", "b"]);
        let taken = pool.take(1).unwrap();
        let err = pool
            .release(&["b".to_string(), taken[0].clone()])
            .unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownMachine(m) if m == "b"));
        // Nothing moved.
        assert_eq!(pool.in_use(), 1);
        pool.release(&taken).unwrap();
        assert!(pool.release(&taken).is_err());
    }
}
