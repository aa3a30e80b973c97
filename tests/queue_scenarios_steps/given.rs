//! Given steps for queue processing BDD scenarios.

use super::{
    provider::ProviderMode,
    world::{QueueWorld, run_async},
};
use eyre::WrapErr;
use rstest_bdd_macros::given;
use simqueue::queue::{
    domain::UserId,
    ports::{SimMirror, SimRecord},
    services::CreateTaskRequest,
};

#[given(r#"a SIM "{msisdn}" with status "{status}" in the mirror"#)]
fn sim_in_mirror(
    world: &mut QueueWorld,
    msisdn: String,
    status: String,
) -> Result<(), eyre::Report> {
    let record = SimRecord {
        cli: format!("cli-{msisdn}"),
        msisdn,
        status,
        ..SimRecord::default()
    };
    run_async(world.mirror.upsert(record)).wrap_err("seed mirror record")?;
    Ok(())
}

#[given("the provider accepts every request")]
fn provider_accepts(world: &mut QueueWorld) {
    world.provider_mode = ProviderMode::Accept;
}

#[given("the provider times out on every request")]
fn provider_times_out(world: &mut QueueWorld) {
    world.provider_mode = ProviderMode::Timeout;
}

#[given("the provider denies label updates")]
fn provider_denies_labels(world: &mut QueueWorld) {
    world.provider_mode = ProviderMode::DenyLabels;
}

#[given(
    r#"a status change of "{msisdn}" from "{old_status}" to "{new_status}" with {attempts:u32} attempts"#
)]
fn status_change_queued(
    world: &mut QueueWorld,
    msisdn: String,
    old_status: String,
    new_status: String,
    attempts: u32,
) -> Result<(), eyre::Report> {
    let request = CreateTaskRequest::status_change(msisdn, new_status)
        .with_old_status(old_status)
        .with_max_attempts(attempts)
        .requested_by(UserId::new(7), "alice");
    let task = run_async(world.service().create_task(request)).wrap_err("queue status change")?;
    world.task = Some(task);
    Ok(())
}

#[given(r#"a label update of "{msisdn}" setting "{field}" to "{value}""#)]
fn label_update_queued(
    world: &mut QueueWorld,
    msisdn: String,
    field: String,
    value: String,
) -> Result<(), eyre::Report> {
    let request =
        CreateTaskRequest::label_update(msisdn, field, value).requested_by(UserId::new(7), "alice");
    let task = run_async(world.service().create_task(request)).wrap_err("queue label update")?;
    world.task = Some(task);
    Ok(())
}
