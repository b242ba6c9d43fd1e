//! Names of the system columns added by the Bronze and Silver layers.

/// Run timestamp of the load that wrote a Bronze row.
pub const BRONZE_LOAD_TS: &str = "_bronze_load_ts";

/// Path of the export file a Bronze row came from.
pub const BRONZE_FILENAME: &str = "_bronze_filename";

/// Run timestamp at which a Silver key was first seen. Never changed afterwards.
pub const SILVER_INSERTED_TS: &str = "_silver_inserted_ts";

/// Run timestamp of the last insert, update or reactivation of a Silver row.
pub const SILVER_UPDATED_TS: &str = "_silver_updated_ts";

/// Run timestamp of the soft delete, null while the row is active.
pub const SILVER_DELETED_TS: &str = "_silver_deleted_ts";

pub const IS_DELETED: &str = "is_deleted";
