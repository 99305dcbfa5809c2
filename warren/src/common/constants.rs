/// Event type under which invalidation events are published on the event bus.
pub const INVALIDATION_EVENT: &str = "warren_invalidation";

/// Temporary table holding one monotonic version counter per tracked table.
pub const MODIFICATION_LOG_TABLE: &str = "warren_table_modification_log";

/// Name prefix of the change-tracking triggers.
pub const TRIGGER_NAME_PREFIX: &str = "warren_table_modification_trigger";

/// Write kinds a change-tracking trigger is installed for.
pub const TRIGGER_OPERATIONS: [&str; 3] = ["INSERT", "UPDATE", "DELETE"];

/// SQLite's reserved path for a private in-memory database.
pub const IN_MEMORY_PATH: &str = ":memory:";
