//! Per-connection lifecycle.
//!
//! ```text
//! Disconnected -> Connecting -> Ready -> Backfilling -> Listening
//!                      |           |          |            |  ^
//!                      +-----------+----------+------------+--+--> Error | Ended
//! ```
//!
//! Any non-terminal state, `Disconnected` included, moves to `Error` on a
//! fault. `Listening` re-enters itself on every new-mail fetch cycle. `Error`
//! and `Ended` are terminal.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Backfilling,
    Listening,
    Error(String),
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connect,
    SessionReady,
    BackfillStarted,
    BackfillDone,
    NewMail,
    Fault(String),
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid transition from {from} on {event:?}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub event: ConnectionEvent,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Error(_) | ConnectionState::Ended)
    }

    pub fn next(&self, event: ConnectionEvent) -> Result<ConnectionState, InvalidTransition> {
        use ConnectionEvent as E;
        use ConnectionState as S;

        let next = match (self, &event) {
            _ if self.is_terminal() => None,
            (S::Disconnected, E::Connect) => Some(S::Connecting),
            (S::Connecting, E::SessionReady) => Some(S::Ready),
            (S::Ready, E::BackfillStarted) => Some(S::Backfilling),
            (S::Backfilling, E::BackfillDone) => Some(S::Listening),
            (S::Listening, E::NewMail) => Some(S::Listening),
            (_, E::Fault(reason)) => Some(S::Error(reason.clone())),
            (S::Disconnected, _) => None,
            (_, E::Closed) => Some(S::Ended),
            _ => None,
        };
        next.ok_or(InvalidTransition {
            from: self.clone(),
            event,
        })
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Ready => f.write_str("ready"),
            ConnectionState::Backfilling => f.write_str("backfilling"),
            ConnectionState::Listening => f.write_str("listening"),
            ConnectionState::Error(reason) => write!(f, "error ({reason})"),
            ConnectionState::Ended => f.write_str("ended"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionEvent as E;
    use ConnectionState as S;

    fn run(events: &[E]) -> Result<S, InvalidTransition> {
        events
            .iter()
            .cloned()
            .try_fold(S::Disconnected, |state, event| state.next(event))
    }

    #[test]
    fn happy_path_reaches_listening() {
        let state = run(&[E::Connect, E::SessionReady, E::BackfillStarted, E::BackfillDone]).unwrap();
        assert_eq!(state, S::Listening);
        assert_eq!(state.next(E::NewMail).unwrap(), S::Listening);
    }

    #[test]
    fn cannot_skip_ready() {
        let err = run(&[E::Connect, E::BackfillStarted]).unwrap_err();
        assert_eq!(err.from, S::Connecting);
        assert!(run(&[E::Connect, E::SessionReady, E::BackfillDone]).is_err());
        assert!(S::Ready.next(E::NewMail).is_err());
    }

    #[test]
    fn faults_and_close_from_any_live_state() {
        for prefix in [
            vec![E::Connect],
            vec![E::Connect, E::SessionReady],
            vec![E::Connect, E::SessionReady, E::BackfillStarted],
            vec![E::Connect, E::SessionReady, E::BackfillStarted, E::BackfillDone],
        ] {
            let state = run(&prefix).unwrap();
            assert_eq!(state.next(E::Fault("io".into())).unwrap(), S::Error("io".into()));
            assert_eq!(state.next(E::Closed).unwrap(), S::Ended);
        }
    }

    #[test]
    fn terminal_states_stay_terminal() {
        let ended = S::Ended;
        assert!(ended.is_terminal());
        assert!(ended.next(E::Connect).is_err());
        assert!(ended.next(E::Closed).is_err());

        let failed = S::Error("tls".into());
        assert!(failed.is_terminal());
        assert!(failed.next(E::SessionReady).is_err());
        assert!(failed.next(E::Fault("again".into())).is_err());
    }

    #[test]
    fn disconnected_accepts_connect_or_fault() {
        assert!(S::Disconnected.next(E::Closed).is_err());
        assert!(S::Disconnected.next(E::NewMail).is_err());
        assert_eq!(
            S::Disconnected.next(E::Fault("dns".into())).unwrap(),
            S::Error("dns".into())
        );
    }
}
