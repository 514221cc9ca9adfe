use isoworld::{Critter, EntityDraft, EntityId, EntityManager, JobId, PathOutcome, Vec3, World};
use tracing::{debug, warn};

const WANDER_SPEED_UNITS_PER_SECOND: f32 = 3.0;
const ARRIVAL_THRESHOLD: f32 = 0.05;
const RETRY_COOLDOWN_TICKS: u32 = 20;

/// Destinations, relative to the viewpoint, cycled through by each wanderer.
const WANDER_OFFSETS: [Vec3; 5] = [
    Vec3::xy(6.0, 2.0),
    Vec3::xy(-4.0, 5.0),
    Vec3::xy(3.0, -7.0),
    Vec3::xy(-6.0, -3.0),
    Vec3::xy(0.5, 8.0),
];

#[derive(Debug, Clone, PartialEq)]
enum Plan {
    Idle { cooldown: u32 },
    Waiting(JobId),
    Walking { waypoints: Vec<Vec3>, next: usize },
}

#[derive(Debug)]
struct Wanderer {
    entity: EntityId,
    plan: Plan,
    trips: usize,
}

/// Critters that repeatedly ask the pathfinder for a route near the
/// viewpoint and walk it.
#[derive(Debug, Default)]
pub(crate) struct Wanderers {
    members: Vec<Wanderer>,
    arrivals: u64,
    unreachable: u64,
}

impl Wanderers {
    pub(crate) fn spawn_around(world: &mut World, center: Vec3, count: usize) -> Self {
        let mut members = Vec::with_capacity(count);
        for index in 0..count {
            let offset = WANDER_OFFSETS[index % WANDER_OFFSETS.len()] * 0.5;
            let position = (center + offset).tile_center();
            let entity = world
                .entities_mut()
                .spawn(EntityDraft::new(Critter::body_at(position), Critter::default()));
            members.push(Wanderer {
                entity,
                plan: Plan::Idle { cooldown: 0 },
                trips: index,
            });
        }
        Self {
            members,
            ..Self::default()
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.members.len()
    }

    pub(crate) fn arrivals(&self) -> u64 {
        self.arrivals
    }

    pub(crate) fn unreachable(&self) -> u64 {
        self.unreachable
    }

    /// Collects finished routes and requests new ones. Wanderers whose critter
    /// left the world are forgotten.
    pub(crate) fn plan(&mut self, world: &mut World) {
        let viewpoint = world.viewpoint();
        let mut kept = Vec::with_capacity(self.members.len());
        for mut member in self.members.drain(..) {
            if !world.entities().contains(member.entity) {
                if let Plan::Waiting(job) = member.plan {
                    world.cancel_path(job);
                }
                debug!(entity_id = member.entity.0, "wanderer_left_world");
                continue;
            }

            member.plan = match member.plan {
                Plan::Idle { cooldown } if cooldown > 0 => Plan::Idle {
                    cooldown: cooldown - 1,
                },
                Plan::Idle { .. } => {
                    let position = world.entities().get(member.entity).map(|e| e.body.position);
                    let Some(position) = position else {
                        continue;
                    };
                    let destination =
                        viewpoint + WANDER_OFFSETS[member.trips % WANDER_OFFSETS.len()];
                    match world.submit_path(position, destination) {
                        Ok((job, _)) => Plan::Waiting(job),
                        Err(error) => {
                            warn!(
                                entity_id = member.entity.0,
                                error = %error,
                                "wanderer_path_rejected"
                            );
                            Plan::Idle {
                                cooldown: RETRY_COOLDOWN_TICKS,
                            }
                        }
                    }
                }
                Plan::Waiting(job) => match world.collect_path(job) {
                    None => Plan::Waiting(job),
                    Some(PathOutcome::Found(steps)) => Plan::Walking {
                        waypoints: steps.waypoints(),
                        next: 0,
                    },
                    Some(PathOutcome::Unreachable) => {
                        self.unreachable += 1;
                        member.trips += 1;
                        Plan::Idle {
                            cooldown: RETRY_COOLDOWN_TICKS,
                        }
                    }
                },
                walking @ Plan::Walking { .. } => walking,
            };
            kept.push(member);
        }
        self.members = kept;
    }

    /// Moves every walking critter toward its next waypoint.
    pub(crate) fn step(&mut self, entities: &mut EntityManager, dt_seconds: f32) {
        let reach = WANDER_SPEED_UNITS_PER_SECOND * dt_seconds;
        for member in &mut self.members {
            let Plan::Walking { waypoints, next } = &mut member.plan else {
                continue;
            };
            let Some(position) = entities.get(member.entity).map(|e| e.body.position) else {
                continue;
            };
            let Some(target) = waypoints.get(*next).copied() else {
                continue;
            };
            let delta = step_toward(position, target, reach);
            entities.move_entity(member.entity, delta);
            if (position + delta).euclidean_2d(target) <= ARRIVAL_THRESHOLD {
                *next += 1;
            }
            if *next >= waypoints.len() {
                member.trips += 1;
                member.plan = Plan::Idle { cooldown: 0 };
                self.arrivals += 1;
            }
        }
    }
}

/// Displacement of at most `reach` from `position` toward `target` on the
/// ground plane.
fn step_toward(position: Vec3, target: Vec3, reach: f32) -> Vec3 {
    let offset = Vec3::xy(target.x - position.x, target.y - position.y);
    let distance = position.euclidean_2d(target);
    if distance <= reach || distance == 0.0 {
        return offset;
    }
    offset * (reach / distance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_toward_clamps_to_reach() {
        let delta = step_toward(Vec3::xy(0.0, 0.0), Vec3::xy(3.0, 4.0), 1.0);
        assert!(delta.approx_eq(Vec3::xy(0.6, 0.8)));

        let delta = step_toward(Vec3::xy(1.0, 1.0), Vec3::xy(1.2, 1.0), 1.0);
        assert!(delta.approx_eq(Vec3::xy(0.2, 0.0)));

        assert_eq!(step_toward(Vec3::xy(2.0, 2.0), Vec3::xy(2.0, 2.0), 1.0), Vec3::ZERO);
    }
}
