use std::collections::HashMap;

use rapier3d::prelude::*;

/// Only collider pairs registered as contact pairs generate contacts; every
/// other pair is dropped before the solver sees it.
#[derive(Default)]
pub struct ContactPairFilter {
    pairs: HashMap<(u32, u32), Real>,
}

fn key(a: ColliderHandle, b: ColliderHandle) -> (u32, u32) {
    let (a, _) = a.into_raw_parts();
    let (b, _) = b.into_raw_parts();
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl ContactPairFilter {
    pub fn allow(&mut self, a: ColliderHandle, b: ColliderHandle, friction: Real) {
        self.pairs.insert(key(a, b), friction);
    }

    pub fn friction(&self, a: ColliderHandle, b: ColliderHandle) -> Option<Real> {
        self.pairs.get(&key(a, b)).copied()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }
}

impl PhysicsHooks for ContactPairFilter {
    fn filter_contact_pair(&self, context: &PairFilterContext) -> Option<SolverFlags> {
        self.pairs
            .contains_key(&key(context.collider1, context.collider2))
            .then_some(SolverFlags::COMPUTE_IMPULSES)
    }

    fn modify_solver_contacts(&self, context: &mut ContactModificationContext) {
        if let Some(friction) = self.friction(context.collider1, context.collider2) {
            for contact in context.solver_contacts.iter_mut() {
                contact.friction = friction;
            }
        }
    }
}
