//! When steps for queue processing BDD scenarios.

use super::world::{QueueWorld, run_async};
use chrono::Duration;
use eyre::WrapErr;
use rstest_bdd_macros::when;
use simqueue::queue::ports::TaskRepository;

/// Upper bound on worker ticks before a scenario gives up.
const MAX_TICKS: usize = 10;

#[when("the worker runs until the task settles")]
fn worker_runs_until_settled(world: &mut QueueWorld) -> Result<(), eyre::Report> {
    let id = world.current_task()?.id();
    let worker = world.worker();
    for _ in 0..MAX_TICKS {
        run_async(worker.tick());
        let reloaded = run_async(world.repository.find_by_id(id))
            .wrap_err("reload task after tick")?
            .ok_or_else(|| eyre::eyre!("task {id} disappeared"))?;
        let settled = reloaded.status().is_terminal();
        world.task = Some(reloaded);
        if settled {
            return Ok(());
        }
        world.clock.advance(Duration::minutes(10));
    }
    Err(eyre::eyre!("task {id} did not settle within {MAX_TICKS} ticks"))
}
