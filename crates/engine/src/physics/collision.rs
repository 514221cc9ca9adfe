use std::collections::HashMap;

use tracing::debug;

use crate::coords::Vec3;
use crate::entity::{Contact, EntityId, EntityManager};

/// Minimum corner of a box centered on `position` in x/y and resting on
/// `position.z`.
pub fn min_corner(position: Vec3, size: Vec3) -> Vec3 {
    Vec3::new(
        position.x - size.x / 2.0,
        position.y - size.y / 2.0,
        position.z,
    )
}

/// Strict AABB overlap of two min-corner boxes. Touching faces do not overlap.
/// Negative extents are normalised first, so the result never depends on sign
/// or argument order.
pub fn overlap(pos_a: Vec3, size_a: Vec3, pos_b: Vec3, size_b: Vec3) -> bool {
    axis_overlap(pos_a.x, size_a.x, pos_b.x, size_b.x)
        && axis_overlap(pos_a.y, size_a.y, pos_b.y, size_b.y)
        && axis_overlap(pos_a.z, size_a.z, pos_b.z, size_b.z)
}

fn axis_overlap(a: f32, a_size: f32, b: f32, b_size: f32) -> bool {
    let (a_lo, a_hi) = span(a, a_size);
    let (b_lo, b_hi) = span(b, b_size);
    a_lo < b_hi && b_lo < a_hi
}

fn span(start: f32, size: f32) -> (f32, f32) {
    let end = start + size;
    if end < start {
        (end, start)
    } else {
        (start, end)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveReport {
    pub passes: u32,
    /// Overlapping pairs summed over every pass.
    pub overlaps: u32,
    /// True when the last pass found nothing to correct.
    pub stable: bool,
}

/// Iterative narrow phase. Each pass re-tests every candidate pair and lets
/// both entities respond; the loop ends after a quiet pass or `max_passes`.
/// This is a relaxation, not a solver: tightly packed bodies can still overlap
/// when the passes run out.
#[derive(Debug, Clone, Copy)]
pub struct CollisionResolver {
    max_passes: u32,
}

impl CollisionResolver {
    pub fn new(max_passes: u32) -> Self {
        Self {
            max_passes: max_passes.max(1),
        }
    }

    pub fn max_passes(&self) -> u32 {
        self.max_passes
    }

    pub fn resolve(
        &self,
        pairs: &[(EntityId, EntityId)],
        entities: &mut EntityManager,
        dt_seconds: f32,
    ) -> ResolveReport {
        let mut report = ResolveReport {
            stable: true,
            ..ResolveReport::default()
        };
        if pairs.is_empty() {
            return report;
        }

        let substep_seconds = dt_seconds / self.max_passes as f32;
        let step_fraction = 1.0 / self.max_passes as f32;
        let mut velocities: HashMap<EntityId, Vec3> = HashMap::new();
        for (a, b) in pairs {
            for id in [*a, *b] {
                if let Some(entity) = entities.get(id) {
                    velocities.entry(id).or_insert_with(|| entity.body.velocity());
                }
            }
        }

        for _ in 0..self.max_passes {
            report.passes += 1;
            let mut pass_overlaps = 0u32;
            for (a, b) in pairs {
                let (Some(first), Some(second)) = (entities.get(*a), entities.get(*b)) else {
                    continue;
                };
                let hit = overlap(
                    min_corner(first.body.position, first.body.size),
                    first.body.size,
                    min_corner(second.body.position, second.body.size),
                    second.body.size,
                );
                if !hit {
                    continue;
                }
                pass_overlaps += 1;

                let velocity_a = velocities.get(a).copied().unwrap_or(Vec3::ZERO);
                let velocity_b = velocities.get(b).copied().unwrap_or(Vec3::ZERO);
                let contact_a = Contact {
                    own_velocity: velocity_a,
                    other: *b,
                    other_classname: second.classname(),
                    other_solid: second.body.solid,
                    other_velocity: velocity_b,
                    substep_seconds,
                    step_fraction,
                };
                let contact_b = Contact {
                    own_velocity: velocity_b,
                    other: *a,
                    other_classname: first.classname(),
                    other_solid: first.body.solid,
                    other_velocity: velocity_a,
                    substep_seconds,
                    step_fraction,
                };
                entities.respond_to_contact(*a, &contact_a);
                entities.respond_to_contact(*b, &contact_b);
            }
            report.overlaps += pass_overlaps;
            if pass_overlaps == 0 {
                report.stable = true;
                break;
            }
            report.stable = false;
        }

        debug!(
            pairs = pairs.len(),
            passes = report.passes,
            overlaps = report.overlaps,
            stable = report.stable,
            "collisions_resolved"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Body, Critter, EntityDraft, OwnerHandle, Tree};

    const UNIT: Vec3 = Vec3::new(1.0, 1.0, 1.0);

    #[test]
    fn overlap_is_strict_and_symmetric() {
        let a = Vec3::ZERO;
        let touching = Vec3::xy(1.0, 0.0);
        let inside = Vec3::xy(0.5, 0.5);
        assert!(!overlap(a, UNIT, touching, UNIT));
        assert!(!overlap(touching, UNIT, a, UNIT));
        assert!(overlap(a, UNIT, inside, UNIT));
        assert!(overlap(inside, UNIT, a, UNIT));
    }

    #[test]
    fn overlap_normalises_negative_extents() {
        let flipped = Vec3::new(-1.0, -1.0, -1.0);
        let origin_far = Vec3::new(1.0, 1.0, 1.0);
        assert_eq!(
            overlap(origin_far, flipped, Vec3::xy(0.5, 0.5), UNIT),
            overlap(Vec3::ZERO, UNIT, Vec3::xy(0.5, 0.5), UNIT)
        );
    }

    #[test]
    fn zero_sized_boxes_are_tolerated_symmetrically() {
        let point = Vec3::new(0.5, 0.5, 0.5);
        assert_eq!(
            overlap(point, Vec3::ZERO, Vec3::ZERO, UNIT),
            overlap(Vec3::ZERO, UNIT, point, Vec3::ZERO)
        );
        assert!(!overlap(point, Vec3::ZERO, point, Vec3::ZERO));
    }

    #[test]
    fn resolve_without_pairs_does_nothing() {
        let mut entities = EntityManager::new(8.0, OwnerHandle(0));
        let report = CollisionResolver::new(5).resolve(&[], &mut entities, 1.0 / 60.0);
        assert_eq!(report.passes, 0);
        assert!(report.stable);
    }

    #[test]
    fn critter_walking_into_tree_backs_out() {
        let mut entities = EntityManager::new(8.0, OwnerHandle(0));
        let tree = entities.spawn(EntityDraft::new(Tree::body_at_tile(4, 4), Tree::default()));
        let mut body = Critter::body_at(Vec3::xy(3.5, 4.0));
        body.prev_position = Vec3::xy(2.5, 4.0);
        let critter = entities.spawn(EntityDraft::new(body, Critter::default()));

        let pairs = entities.broad_phase_pairs(0.0, 8.0, 0.0, 8.0);
        assert_eq!(pairs, vec![(tree, critter)]);

        let report = CollisionResolver::new(5).resolve(&pairs, &mut entities, 1.0 / 60.0);
        assert!(report.passes <= 5);
        assert!(report.stable);
        let position = entities.get(critter).expect("critter").body.position;
        assert!(position.x < 3.5);
        assert_eq!(entities.get(tree).expect("tree").body.position, Vec3::xy(4.0, 4.0));
    }

    #[test]
    fn resolve_never_exceeds_max_passes() {
        let mut entities = EntityManager::new(8.0, OwnerHandle(0));
        // Neither body moves, so nothing ever separates them.
        let a = entities.spawn(EntityDraft::new(
            Body::new(Vec3::xy(2.0, 2.0), UNIT, true),
            Critter::default(),
        ));
        let b = entities.spawn(EntityDraft::new(
            Body::new(Vec3::xy(2.2, 2.0), UNIT, true),
            Critter::default(),
        ));

        let report = CollisionResolver::new(3).resolve(&[(a, b)], &mut entities, 1.0 / 60.0);
        assert_eq!(report.passes, 3);
        assert_eq!(report.overlaps, 3);
        assert!(!report.stable);
    }
}
