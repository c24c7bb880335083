//! End-of-run processing.
//!
//! Returns the session to editing, warns about anything left unresolved and builds the
//! summary handed back to the caller.

use crate::model::{Decision, Mode, RunSummary};
use crate::session::Presentation;

/// Single finalization step, run on the presentation side.
pub(crate) fn finalize(p: &mut Presentation, cancel_requested: bool) -> RunSummary {
    p.store_mut().set_mode(Mode::Editing);

    let store = p.store();
    let unresolved = store.has_unresolved();
    let canceled = store.cancel_count();
    let failed = store.failed_count();
    let layers = store.reports();

    if unresolved {
        tracing::warn!(canceled, failed, "upload/save incomplete");
        p.warn_unresolved(canceled, failed);
    } else {
        tracing::info!(layers = layers.len(), "all requested uploads and saves succeeded");
    }

    RunSummary {
        timestamp_utc: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "now".into()),
        canceled,
        failed,
        unresolved,
        cancel_requested,
        decision: decide(unresolved, cancel_requested),
        layers,
    }
}

pub(crate) fn decide(unresolved: bool, cancel_requested: bool) -> Decision {
    match (unresolved, cancel_requested) {
        (false, _) => Decision::Proceed,
        (true, true) => Decision::Cancel,
        (true, false) => Decision::Review,
    }
}
