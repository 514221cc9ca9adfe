use std::process::ExitCode;

use isoworld::{Vec3, World, WorldError};
use tracing::{error, info};

use super::bootstrap::AppWiring;
use super::wanderers::Wanderers;

const TICK_SECONDS: f32 = 1.0 / 30.0;
const VIEWPOINT_SPEED_UNITS_PER_SECOND: f32 = 6.0;
const ROUTE_SIDE_UNITS: f32 = 96.0;
const WANDERER_COUNT: usize = 4;
const STATUS_EVERY_TICKS: u64 = 150;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RunSummary {
    pub(crate) ticks: u64,
    pub(crate) chunk_swaps: u64,
    pub(crate) arrivals: u64,
    pub(crate) unreachable: u64,
    pub(crate) chunks_saved: usize,
}

pub(crate) fn run(app: AppWiring) -> ExitCode {
    let AppWiring { mut world, ticks } = app;
    match simulate(&mut world, ticks) {
        Ok(summary) => {
            info!(
                ticks = summary.ticks,
                chunk_swaps = summary.chunk_swaps,
                arrivals = summary.arrivals,
                unreachable = summary.unreachable,
                chunks_saved = summary.chunks_saved,
                "shutdown"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "simulation_failed");
            ExitCode::FAILURE
        }
    }
}

/// Runs `ticks` fixed steps along the scripted route and saves the world.
pub(crate) fn simulate(world: &mut World, ticks: u64) -> Result<RunSummary, WorldError> {
    let origin = world.viewpoint();
    world.warm_up(origin)?;
    let mut wanderers = Wanderers::spawn_around(world, origin, WANDERER_COUNT);
    info!(
        origin_x = origin.x,
        origin_y = origin.y,
        wanderers = wanderers.len(),
        entities = world.entities().len(),
        "simulation_started"
    );

    let mut summary = RunSummary::default();
    for tick in 1..=ticks {
        let viewpoint = route_position(origin, tick);
        wanderers.plan(world);
        let report = world.tick_with(viewpoint, TICK_SECONDS, |entities| {
            wanderers.step(entities, TICK_SECONDS)
        })?;
        summary.ticks = report.tick;
        if report.reconcile.changed {
            summary.chunk_swaps += 1;
        }
        if tick % STATUS_EVERY_TICKS == 0 {
            info!(
                tick = report.tick,
                viewpoint_x = viewpoint.x,
                viewpoint_y = viewpoint.y,
                entities = world.entities().len(),
                wanderers = wanderers.len(),
                pending_paths = report.pending_paths,
                "simulation_status"
            );
        }
    }

    summary.arrivals = wanderers.arrivals();
    summary.unreachable = wanderers.unreachable();
    summary.chunks_saved = world.save()?;
    Ok(summary)
}

/// Viewpoint on a square circuit starting at `origin`: east, north, west, south.
pub(crate) fn route_position(origin: Vec3, tick: u64) -> Vec3 {
    let travelled = tick as f32 * TICK_SECONDS * VIEWPOINT_SPEED_UNITS_PER_SECOND;
    let lap = travelled % (4.0 * ROUTE_SIDE_UNITS);
    let side = (lap / ROUTE_SIDE_UNITS) as u32;
    let along = lap - side as f32 * ROUTE_SIDE_UNITS;
    let offset = match side {
        0 => Vec3::xy(along, 0.0),
        1 => Vec3::xy(ROUTE_SIDE_UNITS, along),
        2 => Vec3::xy(ROUTE_SIDE_UNITS - along, ROUTE_SIDE_UNITS),
        _ => Vec3::xy(0.0, ROUTE_SIDE_UNITS - along),
    };
    origin + offset
}
