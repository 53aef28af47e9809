use std::collections::BTreeSet;

use crate::IncidentClass;

/// Holds the set of currently active incident classes.
///
/// Machines ask the arbiter before starting a session and tell it when a
/// session ends. Collision and fire never block each other; a violent-act onset
/// is refused while either of them is active, since it would most likely be a
/// second recording of the same event.
#[derive(Clone, Debug, Default)]
pub struct Arbiter {
    active: BTreeSet<IncidentClass>,
}

impl Arbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `class` may transition Idle -> Active right now.
    pub fn may_start(&self, class: IncidentClass) -> bool {
        if self.active.contains(&class) {
            return false;
        }
        match class {
            IncidentClass::ViolentAct => !self.active.iter().any(|c| !c.is_continuous()),
            IncidentClass::Collision | IncidentClass::Fire => true,
        }
    }

    /// Record an onset. Returns false if `class` was already active.
    pub fn activate(&mut self, class: IncidentClass) -> bool {
        self.active.insert(class)
    }

    pub fn release(&mut self, class: IncidentClass) {
        self.active.remove(&class);
    }

    pub fn is_active(&self, class: IncidentClass) -> bool {
        self.active.contains(&class)
    }

    pub fn any_active(&self) -> bool {
        !self.active.is_empty()
    }

    /// Active classes in stable order.
    pub fn active(&self) -> Vec<IncidentClass> {
        self.active.iter().copied().collect()
    }
}
