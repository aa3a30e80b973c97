//! Then steps for queue processing BDD scenarios.

use super::world::QueueWorld;
use eyre::WrapErr;
use rstest_bdd_macros::then;
use simqueue::queue::{
    domain::{TaskStatus, TaskType},
    ports::HistoryAction,
};

#[then(r#"the task status is "{status}""#)]
fn task_status_is(world: &QueueWorld, status: String) -> Result<(), eyre::Report> {
    let expected = TaskStatus::try_from(status.as_str())
        .map_err(|err| eyre::eyre!("invalid expected status in scenario: {err}"))?;
    let task = world.current_task()?;
    if task.status() != expected {
        return Err(eyre::eyre!(
            "expected status {}, found {} ({:?})",
            expected.as_str(),
            task.status().as_str(),
            task.result()
        ));
    }
    Ok(())
}

#[then(r#"the mirror status of "{msisdn}" is "{status}""#)]
fn mirror_status_is(world: &QueueWorld, msisdn: String, status: String) -> Result<(), eyre::Report> {
    let record = world
        .mirror
        .record(&msisdn)
        .wrap_err("read mirror record")?
        .ok_or_else(|| eyre::eyre!("SIM {msisdn} missing from mirror"))?;
    if record.status != status {
        return Err(eyre::eyre!(
            "expected mirror status {status}, found {}",
            record.status
        ));
    }
    Ok(())
}

#[then(r#"one status change from "{old_status}" to "{new_status}" is recorded"#)]
fn status_change_recorded(
    world: &QueueWorld,
    old_status: String,
    new_status: String,
) -> Result<(), eyre::Report> {
    let history = world.mirror.history().wrap_err("read mirror history")?;
    let matching = history
        .iter()
        .filter(|entry| {
            entry.action == HistoryAction::StatusChange
                && entry.old_value == old_status
                && entry.new_value == new_status
        })
        .count();
    if matching != 1 {
        return Err(eyre::eyre!(
            "expected one matching status change, found {matching} in {history:?}"
        ));
    }
    Ok(())
}

#[then(r#"{count:usize} "{action}" audit events fired"#)]
fn audit_events_fired(world: &QueueWorld, count: usize, action: String) -> Result<(), eyre::Report> {
    let fired = world
        .audit
        .events()
        .iter()
        .filter(|event| event.action.as_str() == action)
        .count();
    if fired != count {
        return Err(eyre::eyre!("expected {count} {action} events, found {fired}"));
    }
    Ok(())
}

#[then("no task events were broadcast")]
fn no_task_events(world: &QueueWorld) -> Result<(), eyre::Report> {
    let events = world.events.events();
    if !events.is_empty() {
        return Err(eyre::eyre!("expected no task events, found {events:?}"));
    }
    Ok(())
}

#[then("a mirror reconciliation is scheduled")]
fn reconciliation_scheduled(world: &QueueWorld) -> Result<(), eyre::Report> {
    let scheduled = world
        .repository
        .snapshot()
        .wrap_err("read queue snapshot")?
        .into_iter()
        .filter(|task| task.task_type() == TaskType::Reconcile)
        .count();
    if scheduled != 1 {
        return Err(eyre::eyre!("expected one reconcile task, found {scheduled}"));
    }
    Ok(())
}

#[then("the task has used all of its attempts")]
fn attempts_used(world: &QueueWorld) -> Result<(), eyre::Report> {
    let task = world.current_task()?;
    if task.attempt() != task.max_attempts() {
        return Err(eyre::eyre!(
            "expected {} attempts, found {}",
            task.max_attempts(),
            task.attempt()
        ));
    }
    Ok(())
}

#[then(r#"the task result starts with "{prefix}""#)]
fn result_starts_with(world: &QueueWorld, prefix: String) -> Result<(), eyre::Report> {
    let task = world.current_task()?;
    if !task.result().is_some_and(|result| result.starts_with(&prefix)) {
        return Err(eyre::eyre!(
            "expected result starting with {prefix:?}, found {:?}",
            task.result()
        ));
    }
    Ok(())
}

#[then("the task has not been retried")]
fn not_retried(world: &QueueWorld) -> Result<(), eyre::Report> {
    let task = world.current_task()?;
    if task.attempt() != 0 {
        return Err(eyre::eyre!("expected no retries, found {}", task.attempt()));
    }
    Ok(())
}
