//! The authoritative task state transition table.

use crate::model::task::TaskStatus;

use TaskStatus::*;

/// Whether `from -> to` is an allowed transition. Terminal states have no
/// outgoing transitions; deletion is handled outside the table.
pub fn is_legal(from: TaskStatus, to: TaskStatus) -> bool {
    match from {
        Init => matches!(to, Pending),
        Pending => matches!(to, Assigned | Killing),
        Assigned => matches!(
            to,
            Starting | Preempting | Killing | Lost | Updating | Rollback
        ),
        Starting => matches!(to, Running | Failed | Killing | Lost | Updating | Rollback),
        Running => matches!(
            to,
            Finished
                | Failed
                | Killed
                | Killing
                | Lost
                | Preempting
                | Updating
                | Rollback
                | Restarting
        ),
        Killing => matches!(to, Killed | Lost),
        Preempting => matches!(to, Killed | Lost),
        Updating => matches!(to, Killed | Finished | Killing | Lost),
        Rollback => matches!(to, Killed | Finished | Killing | Lost),
        Restarting => matches!(to, Killed | Lost),
        Finished | Failed | Killed | Lost | Unknown => false,
    }
}

/// Entering these states means the underlying process must be told to die.
pub fn requires_kill(to: TaskStatus) -> bool {
    matches!(to, Killing | Preempting | Updating | Rollback | Restarting)
}

/// States where the scheduler is waiting on a kill to land; an UNKNOWN
/// report while in one of these means the task is gone and can be dropped.
pub fn is_awaiting_kill(status: TaskStatus) -> bool {
    matches!(status, Killing | Preempting | Updating | Rollback | Restarting)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_exits() {
        for from in [Finished, Failed, Killed, Lost] {
            for to in [
                Init, Pending, Assigned, Starting, Running, Finished, Failed, Killing, Killed,
                Preempting, Updating, Rollback, Restarting, Lost,
            ] {
                assert!(!is_legal(from, to), "{from} -> {to} should be illegal");
            }
        }
    }

    #[test]
    fn happy_path_is_legal() {
        for (from, to) in [
            (Init, Pending),
            (Pending, Assigned),
            (Assigned, Starting),
            (Starting, Running),
            (Running, Finished),
        ] {
            assert!(is_legal(from, to), "{from} -> {to} should be legal");
        }
    }

    #[test]
    fn no_skipping_forward() {
        assert!(!is_legal(Pending, Running));
        assert!(!is_legal(Assigned, Finished));
        assert!(!is_legal(Init, Assigned));
    }
}
