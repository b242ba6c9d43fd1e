use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, MedallionResult};

/// Evaluated right before the Bronze loader writes the ingested rows.
pub const BRONZE_BEFORE_WRITE: &str = "bronze.before_write";

/// Evaluated after the Silver upsert and before delete detection.
pub const SILVER_AFTER_MERGE: &str = "silver.after_merge";

/// Evaluated after a local table's data file is written and before its log entry is appended.
pub const LOCAL_STORE_BEFORE_LOG_APPEND: &str = "local_store.before_log_append";

/// Returns an injected error when the named failpoint is configured with `return`.
///
/// The optional failpoint parameter is copied into the error detail.
pub fn medallion_fail_point(name: &str) -> MedallionResult<()> {
    fail_point!(name, |parameter| {
        let detail = match parameter {
            Some(parameter) => format!("The failpoint '{name}' returned an error: {parameter}"),
            None => format!("The failpoint '{name}' returned an error"),
        };

        bail!(
            ErrorKind::InjectedFailure,
            "An error occurred in a fail point",
            detail = detail
        );
    });

    Ok(())
}
