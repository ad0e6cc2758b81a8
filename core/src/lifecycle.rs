//! Lifecycle of remote runs and the cancel-then-delete teardown.
//!
//! Runs move `PENDING -> RUNNING -> TERMINATING -> TERMINATED`; `SKIPPED`
//! and `INTERNAL_ERROR` also end a run. The service refuses to delete a run
//! that is still executing, so teardown is two-phase: while no result is
//! known the run is canceled and the pass reports incomplete; a later pass
//! that sees a result deletes it. A single pass never does both.

use tracing::{debug, info, warn};

use crate::finalizer::Cleanup;
use crate::reconcile::Context;
use crate::remote::models::{RunLifeCycleState, RunState};
use crate::remote::RemoteError;

/// A run in this lifecycle state will not change any more.
pub fn is_terminal(state: RunLifeCycleState) -> bool {
    matches!(
        state,
        RunLifeCycleState::Terminated | RunLifeCycleState::Skipped | RunLifeCycleState::InternalError
    )
}

/// Deleting is allowed once an outcome is known or the run ended without one.
pub fn safe_to_delete(state: &RunState) -> bool {
    state.result_state.is_some() || is_terminal(state.life_cycle_state)
}

/// One teardown pass for run `run_id`. Each remote call is timed on its own.
///
/// `get_run` and `delete_run` failures other than "does not exist" are
/// returned so the caller retries. A failed cancel is only logged: the next
/// pass will try again.
pub fn teardown_run(ctx: &Context, run_id: i64) -> Result<Cleanup, RemoteError> {
    let run = match ctx.call("run", "get", |r| r.get_run(run_id)) {
        Ok(run) => run,
        Err(e) if e.is_does_not_exist() => {
            debug!(run_id, "run already gone");
            return Ok(Cleanup::Complete);
        }
        Err(e) => return Err(e),
    };

    if !safe_to_delete(&run.state) {
        match ctx.call("run", "cancel", |r| r.cancel_run(run_id)) {
            Ok(()) => info!(run_id, state = %run.state.life_cycle_state, "cancel requested"),
            Err(e) => warn!(run_id, error = %e, "cancel failed, will retry"),
        }
        return Ok(Cleanup::Incomplete);
    }

    match ctx.call("run", "delete", |r| r.delete_run(run_id)) {
        Ok(()) => {
            info!(run_id, "run deleted");
            Ok(Cleanup::Complete)
        }
        Err(e) if e.is_does_not_exist() => Ok(Cleanup::Complete),
        Err(e) => Err(e),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::testing::harness;
    use crate::remote::mock::MockRemote;
    use crate::remote::models::{JobTask, NotebookTask, RunResultState, RunSubmission};
    use crate::remote::RunApi;
    use std::collections::BTreeMap;

    fn submit(mock: &MockRemote) -> i64 {
        mock.submit_run(&RunSubmission {
            run_name: "r".into(),
            existing_cluster_id: Some("c".into()),
            new_cluster: None,
            libraries: Vec::new(),
            task: JobTask {
                notebook_task: Some(NotebookTask {
                    notebook_path: "/nb".into(),
                    base_parameters: BTreeMap::new(),
                }),
                ..JobTask::default()
            },
            timeout_seconds: 0,
        })
        .unwrap()
    }

    #[test]
    fn terminal_states() {
        assert!(is_terminal(RunLifeCycleState::Terminated));
        assert!(is_terminal(RunLifeCycleState::Skipped));
        assert!(is_terminal(RunLifeCycleState::InternalError));
        assert!(!is_terminal(RunLifeCycleState::Running));
        assert!(!is_terminal(RunLifeCycleState::Terminating));
    }

    #[test]
    fn active_run_is_canceled_not_deleted() {
        let h = harness();
        let mock = h.remote.as_ref();
        let run_id = submit(mock);
        mock.clear_calls();

        assert_eq!(teardown_run(&h.ctx, run_id).unwrap(), Cleanup::Incomplete);
        assert_eq!(mock.calls_to("cancel_run"), 1);
        assert_eq!(mock.calls_to("delete_run"), 0);
    }

    #[test]
    fn canceled_run_is_deleted_on_next_pass() {
        let h = harness();
        let mock = h.remote.as_ref();
        let run_id = submit(mock);
        assert_eq!(teardown_run(&h.ctx, run_id).unwrap(), Cleanup::Incomplete);
        mock.clear_calls();

        assert_eq!(teardown_run(&h.ctx, run_id).unwrap(), Cleanup::Complete);
        assert_eq!(mock.calls_to("cancel_run"), 0);
        assert_eq!(mock.calls_to("delete_run"), 1);
        assert!(mock.run(run_id).is_none());
    }

    #[test]
    fn failed_cancel_is_not_fatal() {
        let h = harness();
        let mock = h.remote.as_ref();
        let run_id = submit(mock);
        mock.fail_next("cancel_run", RemoteError::Transient("timeout".into()));
        assert_eq!(teardown_run(&h.ctx, run_id).unwrap(), Cleanup::Incomplete);
        assert_eq!(teardown_run(&h.ctx, run_id).unwrap(), Cleanup::Incomplete);
        assert_eq!(teardown_run(&h.ctx, run_id).unwrap(), Cleanup::Complete);
    }

    #[test]
    fn finished_run_is_deleted_directly() {
        let h = harness();
        let mock = h.remote.as_ref();
        let run_id = submit(mock);
        mock.set_run_state(run_id, RunLifeCycleState::Terminated, Some(RunResultState::Failed));
        mock.clear_calls();
        assert_eq!(teardown_run(&h.ctx, run_id).unwrap(), Cleanup::Complete);
        assert_eq!(mock.calls_to("cancel_run"), 0);
    }

    #[test]
    fn each_call_is_timed_separately() {
        let h = harness();
        let run_id = submit(h.remote.as_ref());
        teardown_run(&h.ctx, run_id).unwrap();
        h.remote.set_run_state(run_id, RunLifeCycleState::Terminated, Some(RunResultState::Canceled));
        teardown_run(&h.ctx, run_id).unwrap();

        assert_eq!(h.stats.calls("run", "get").success, 2);
        assert_eq!(h.stats.calls("run", "cancel").success, 1);
        assert_eq!(h.stats.calls("run", "delete").success, 1);
        assert_eq!(h.stats.calls("run", "teardown").count(), 0);
    }

    #[test]
    fn missing_run_is_complete() {
        let h = harness();
        assert_eq!(teardown_run(&h.ctx, 404).unwrap(), Cleanup::Complete);
    }

    #[test]
    fn delete_failure_keeps_teardown_open() {
        let h = harness();
        let mock = h.remote.as_ref();
        let run_id = submit(mock);
        mock.set_run_state(run_id, RunLifeCycleState::Terminated, Some(RunResultState::Success));
        mock.fail_next("delete_run", RemoteError::Unavailable("503".into()));
        assert!(teardown_run(&h.ctx, run_id).is_err());
        assert!(mock.run(run_id).is_some());
    }
}
