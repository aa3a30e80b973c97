//! Domain-focused tests for task lifecycle, payloads and progress views.

use super::support::{MSISDN, start};
use crate::queue::domain::{
    BatchId, BatchProgress, LabelField, NewQueueTask, QueueTask, RequestId, Requester,
    StatusCounts, TaskDomainError, TaskId, TaskPayload, TaskPriority, TaskStatus, TaskTarget,
    TaskType, TaskUpdate, TransitionGuard, UserId,
};
use chrono::Duration;
use rstest::{fixture, rstest};
use serde_json::json;

#[fixture]
fn pending_task() -> QueueTask {
    QueueTask::from_new(
        TaskId::new(1),
        NewQueueTask {
            request_id: RequestId::new(),
            batch: None,
            priority: TaskPriority::HIGH,
            payload: TaskPayload::StatusChange {
                old_status: Some("Activated".to_owned()),
                new_status: "Suspended".to_owned(),
                targets: vec![MSISDN.to_owned()],
            },
            target: TaskTarget::new(MSISDN, ""),
            requester: Requester {
                user_id: Some(UserId::new(7)),
                username: "alice".to_owned(),
                ip_address: "10.0.0.1".to_owned(),
            },
            max_attempts: 3,
            next_run_at: start(),
            created_at: start(),
        },
    )
}

#[rstest]
#[case(TaskStatus::Pending, TaskStatus::Processing, true)]
#[case(TaskStatus::Pending, TaskStatus::Cancelled, true)]
#[case(TaskStatus::Pending, TaskStatus::Completed, false)]
#[case(TaskStatus::Processing, TaskStatus::Pending, true)]
#[case(TaskStatus::Processing, TaskStatus::Completed, true)]
#[case(TaskStatus::Completed, TaskStatus::Pending, false)]
#[case(TaskStatus::Failed, TaskStatus::Processing, false)]
#[case(TaskStatus::Cancelled, TaskStatus::Pending, false)]
fn status_transitions_follow_lifecycle(
    #[case] from: TaskStatus,
    #[case] to: TaskStatus,
    #[case] allowed: bool,
) {
    assert_eq!(from.can_transition_to(to), allowed);
}

#[rstest]
fn statuses_round_trip_through_storage_strings() {
    for status in TaskStatus::ALL {
        assert_eq!(TaskStatus::try_from(status.as_str()), Ok(status));
    }
    assert!(TaskStatus::try_from("archived").is_err());
    assert_eq!(TaskStatus::try_from(" FAILED "), Ok(TaskStatus::Failed));
}

#[rstest]
#[case(0)]
#[case(11)]
fn priority_outside_range_is_rejected(#[case] value: u8) {
    assert_eq!(
        TaskPriority::new(value),
        Err(TaskDomainError::InvalidPriority(value))
    );
}

#[rstest]
fn priority_defaults_to_high_and_orders_ascending() {
    assert_eq!(TaskPriority::default(), TaskPriority::HIGH);
    assert!(TaskPriority::URGENT < TaskPriority::NORMAL);
    assert!(TaskPriority::NORMAL < TaskPriority::BACKGROUND);
}

#[rstest]
#[case("label_1", LabelField::Label1)]
#[case("Label2", LabelField::Label2)]
#[case("customer_label_3", LabelField::Label3)]
fn label_field_accepts_known_names(#[case] name: &str, #[case] expected: LabelField) {
    assert_eq!(LabelField::parse(name), Ok(expected));
}

#[rstest]
fn label_field_rejects_unknown_names() {
    assert_eq!(
        LabelField::parse("label_4"),
        Err(TaskDomainError::UnknownLabelField("label_4".to_owned()))
    );
}

#[rstest]
fn payload_serialises_with_type_tag() {
    let payload = TaskPayload::LabelUpdate {
        field: LabelField::Label2,
        value: "fleet-7".to_owned(),
    };
    let encoded = serde_json::to_value(&payload).expect("payload should serialise");
    assert_eq!(
        encoded,
        json!({"type": "label_update", "field": "label_2", "value": "fleet-7"})
    );
    assert_eq!(payload.task_type(), TaskType::LabelUpdate);
}

#[rstest]
fn target_prefers_msisdn_and_falls_back_to_cli() {
    assert_eq!(TaskTarget::new(" 972 ", "cli").identifier(), Some("972"));
    assert_eq!(TaskTarget::new("  ", "cli-9").identifier(), Some("cli-9"));
    assert_eq!(TaskTarget::new("", "").identifier(), None);
}

#[rstest]
fn new_task_is_pending_and_due(pending_task: QueueTask) {
    assert_eq!(pending_task.status(), TaskStatus::Pending);
    assert_eq!(pending_task.attempt(), 0);
    assert!(pending_task.is_due(start()));
    assert!(!pending_task.is_due(start() - Duration::seconds(1)));
    assert_eq!(pending_task.updated_at(), pending_task.created_at());
}

#[rstest]
fn retry_update_keeps_task_pending_with_prefixed_result(mut pending_task: QueueTask) {
    let later = start() + Duration::minutes(2);
    pending_task.apply(&TaskUpdate::claim(start()));
    pending_task.apply(&TaskUpdate::schedule_retry(
        1,
        later,
        "dial tcp: timeout",
        120,
        start(),
    ));

    assert_eq!(pending_task.status(), TaskStatus::Pending);
    assert_eq!(pending_task.attempt(), 1);
    assert_eq!(pending_task.next_run_at(), later);
    assert_eq!(pending_task.result(), Some("RETRYING: dial tcp: timeout"));
    assert_eq!(pending_task.last_error(), Some("dial tcp: timeout"));
    assert!(!pending_task.is_due(start()));
}

#[rstest]
fn requeue_resets_attempts_and_clears_completion(mut pending_task: QueueTask) {
    pending_task.apply(&TaskUpdate::fail("boom", None, start()));
    assert_eq!(pending_task.completed_at(), Some(start()));

    let later = start() + Duration::hours(1);
    pending_task.apply(&TaskUpdate::requeue(later));

    assert_eq!(pending_task.status(), TaskStatus::Pending);
    assert_eq!(pending_task.attempt(), 0);
    assert_eq!(pending_task.next_run_at(), later);
    assert_eq!(pending_task.completed_at(), None);
    assert_eq!(pending_task.last_error(), None);
    assert_eq!(pending_task.result(), None);
}

#[rstest]
fn guard_checks_status_and_owner() {
    let guard = TransitionGuard::entering(TaskStatus::Cancelled).owned_by(UserId::new(7));

    assert!(guard.matches(TaskStatus::Processing, Some(UserId::new(7))));
    assert!(!guard.matches(TaskStatus::Pending, Some(UserId::new(8))));
    assert!(!guard.matches(TaskStatus::Pending, None));
    assert!(!guard.matches(TaskStatus::Completed, Some(UserId::new(7))));
}

#[rstest]
fn guards_follow_the_lifecycle() {
    assert_eq!(
        TransitionGuard::entering(TaskStatus::Cancelled).from,
        vec![TaskStatus::Pending, TaskStatus::Processing]
    );
    assert_eq!(
        TransitionGuard::entering(TaskStatus::Completed).from,
        vec![TaskStatus::Processing]
    );
    assert!(TransitionGuard::entering(TaskStatus::Pending)
        .matches(TaskStatus::Processing, None));
    assert!(!TransitionGuard::entering(TaskStatus::Pending).matches(TaskStatus::Failed, None));
}

#[rstest]
#[case(TaskStatus::Pending, TaskStatus::Completed)]
#[case(TaskStatus::Completed, TaskStatus::Processing)]
#[case(TaskStatus::Cancelled, TaskStatus::Pending)]
fn forbidden_moves_produce_guards_matching_nothing(
    #[case] from: TaskStatus,
    #[case] to: TaskStatus,
) {
    let guard = TransitionGuard::between(from, to);
    assert!(TaskStatus::ALL
        .into_iter()
        .all(|status| !guard.matches(status, None)));
}

#[rstest]
fn batch_progress_buckets_sum_to_total() {
    let counts: StatusCounts = [
        TaskStatus::Completed,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Pending,
    ]
    .into_iter()
    .collect();
    let progress = BatchProgress::from_counts(BatchId::new(), &counts);

    assert_eq!(progress.total, 7);
    assert_eq!(progress.completed, 2);
    assert_eq!(progress.failed, 2);
    assert_eq!(progress.pending, 3);
    assert_eq!(
        progress.completed + progress.failed + progress.pending,
        progress.total
    );
    assert_eq!(progress.percent, 57);
}

#[rstest]
fn reconcile_task_runs_in_background_as_system() {
    let run_at = start() + Duration::seconds(15);
    let task = NewQueueTask::reconcile(vec![MSISDN.to_owned()], 3, run_at, start());

    assert_eq!(task.priority, TaskPriority::BACKGROUND);
    assert_eq!(task.requester, Requester::system());
    assert_eq!(task.target.msisdn(), MSISDN);
    assert_eq!(task.next_run_at, run_at);
    assert_eq!(task.payload.task_type(), TaskType::Reconcile);
}
