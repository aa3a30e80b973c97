//! Diesel schema for queued task persistence.

diesel::table! {
    /// Queued SIM provisioning tasks.
    queue_tasks (id) {
        /// Store-assigned task identifier.
        id -> Int8,
        /// Caller-visible correlation identifier.
        request_id -> Uuid,
        /// Shared identifier of the task's batch.
        batch_id -> Nullable<Uuid>,
        /// One-based position within the batch.
        batch_index -> Nullable<Int4>,
        /// Number of tasks in the batch.
        batch_total -> Nullable<Int4>,
        /// Task type.
        #[max_length = 32]
        task_type -> Varchar,
        /// Scheduling priority, lower runs first.
        priority -> Int2,
        /// Type-specific payload.
        payload -> Jsonb,
        /// Target MSISDN.
        #[max_length = 32]
        target_msisdn -> Varchar,
        /// Target CLI.
        #[max_length = 32]
        target_cli -> Varchar,
        /// Creating user.
        user_id -> Nullable<Int8>,
        /// Creating username.
        #[max_length = 100]
        username -> Varchar,
        /// Client IP address.
        #[max_length = 64]
        ip_address -> Varchar,
        /// Lifecycle status.
        #[max_length = 20]
        status -> Varchar,
        /// Attempts consumed.
        attempt -> Int4,
        /// Attempt budget.
        max_attempts -> Int4,
        /// Earliest run time.
        next_run_at -> Timestamptz,
        /// Most recent error.
        last_error -> Nullable<Text>,
        /// Result or explanation text.
        result -> Nullable<Text>,
        /// Provider-side request identifier.
        provider_request_id -> Nullable<Int8>,
        /// Start of the latest attempt.
        started_at -> Nullable<Timestamptz>,
        /// Terminal transition time.
        completed_at -> Nullable<Timestamptz>,
        /// Duration of the latest attempt in milliseconds.
        duration_ms -> Nullable<Int8>,
        /// Creation timestamp.
        created_at -> Timestamptz,
        /// Last update timestamp.
        updated_at -> Timestamptz,
    }
}
