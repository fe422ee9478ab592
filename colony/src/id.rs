use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of an actor registered with a [`System`](crate::system::System).
///
/// Ids are handed out by the system when an actor is created. They stay
/// unique for as long as the registry holds a live entry under them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(u64);

impl ActorId {
    /// Reserved for the bootstrap actor a deployment creates with an explicit id.
    pub const INIT: ActorId = ActorId(1);

    /// First id the generator hands out.
    pub(crate) const FIRST_GENERATED: u64 = 2;

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ActorId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Identifier of a timer started through [`System::start_timer`](crate::system::System::start_timer).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerId(u64);

impl TimerId {
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic source of raw identifiers.
pub(crate) struct IdGenerator(AtomicU64);

impl IdGenerator {
    pub const fn starting_at(first: u64) -> Self {
        Self(AtomicU64::new(first))
    }

    pub fn next_raw(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    pub fn next_actor(&self) -> ActorId {
        ActorId(self.next_raw())
    }

    pub fn next_timer(&self) -> TimerId {
        TimerId(self.next_raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_is_monotonic() {
        let ids = IdGenerator::starting_at(ActorId::FIRST_GENERATED);
        let first = ids.next_actor();
        let second = ids.next_actor();
        assert_eq!(first, ActorId::new(2));
        assert!(second > first);
        assert_ne!(first, ActorId::INIT);
    }
}
