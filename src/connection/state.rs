//! Reconnect decision logic, free of sockets and timers.

use std::fmt;

/// Lifecycle status of the push channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// Never connected
    None,
    Connecting,
    Open,
    Closing,
    Closed,
    Error,
}

impl ConnectionStatus {
    /// Statuses after which the manager schedules a retry
    pub fn is_down(&self) -> bool {
        matches!(self, ConnectionStatus::Error | ConnectionStatus::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::None => "NONE",
            ConnectionStatus::Connecting => "CONNECTING",
            ConnectionStatus::Open => "OPEN",
            ConnectionStatus::Closing => "CLOSING",
            ConnectionStatus::Closed => "CLOSED",
            ConnectionStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the transport (or the caller) reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSignal {
    Connecting,
    Opened,
    Errored,
    Closed,
    /// Caller asked for teardown
    Closing,
}

impl TransportSignal {
    fn status(&self) -> ConnectionStatus {
        match self {
            TransportSignal::Connecting => ConnectionStatus::Connecting,
            TransportSignal::Opened => ConnectionStatus::Open,
            TransportSignal::Errored => ConnectionStatus::Error,
            TransportSignal::Closed => ConnectionStatus::Closed,
            TransportSignal::Closing => ConnectionStatus::Closing,
        }
    }
}

/// Effects the manager must carry out after a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Transition {
    /// Status to publish, `None` when the signal repeated the current one
    pub emit: Option<ConnectionStatus>,

    /// Arm the single retry timer
    pub schedule_retry: bool,
}

/// Holds the current status and whether a retry timer is armed.
///
/// At most one retry is ever pending. Once torn down no retry is scheduled.
#[derive(Debug, Clone)]
pub struct ReconnectMachine {
    status: ConnectionStatus,
    retry_pending: bool,
    torn_down: bool,
}

impl Default for ReconnectMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconnectMachine {
    pub fn new() -> Self {
        Self {
            status: ConnectionStatus::None,
            retry_pending: false,
            torn_down: false,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Re-arm after a teardown, for a fresh `connect()`
    pub fn revive(&mut self) {
        self.torn_down = false;
    }

    pub fn apply(&mut self, signal: TransportSignal) -> Transition {
        let next = signal.status();
        if next == self.status {
            return Transition::default();
        }
        // a late transport report must not reopen a torn down connection
        if self.torn_down && matches!(next, ConnectionStatus::Connecting | ConnectionStatus::Open) {
            return Transition::default();
        }
        self.status = next;

        let schedule_retry = next.is_down() && !self.retry_pending && !self.torn_down;
        if schedule_retry {
            self.retry_pending = true;
        }

        Transition {
            emit: Some(next),
            schedule_retry,
        }
    }

    /// The retry timer elapsed. Returns whether a reconnect attempt should start.
    pub fn retry_fired(&mut self) -> bool {
        self.retry_pending = false;
        !self.torn_down
    }

    /// Caller teardown: no retry will be scheduled from now on
    pub fn shutdown(&mut self) {
        self.torn_down = true;
        self.retry_pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_schedules_one_retry() {
        let mut machine = ReconnectMachine::new();
        machine.apply(TransportSignal::Connecting);
        machine.apply(TransportSignal::Opened);

        let first = machine.apply(TransportSignal::Errored);
        assert_eq!(first.emit, Some(ConnectionStatus::Error));
        assert!(first.schedule_retry);

        let repeat = machine.apply(TransportSignal::Errored);
        assert_eq!(repeat, Transition::default());

        let closed = machine.apply(TransportSignal::Closed);
        assert_eq!(closed.emit, Some(ConnectionStatus::Closed));
        assert!(!closed.schedule_retry);
        assert!(machine.retry_pending());
    }

    #[test]
    fn test_retry_cycle() {
        let mut machine = ReconnectMachine::new();
        machine.apply(TransportSignal::Connecting);
        assert!(machine.apply(TransportSignal::Errored).schedule_retry);

        assert!(machine.retry_fired());
        assert!(!machine.retry_pending());

        let connecting = machine.apply(TransportSignal::Connecting);
        assert_eq!(connecting.emit, Some(ConnectionStatus::Connecting));
        assert!(machine.apply(TransportSignal::Errored).schedule_retry);
    }

    #[test]
    fn test_no_retry_after_shutdown() {
        let mut machine = ReconnectMachine::new();
        machine.apply(TransportSignal::Connecting);
        machine.apply(TransportSignal::Opened);
        machine.shutdown();

        assert_eq!(
            machine.apply(TransportSignal::Closing).emit,
            Some(ConnectionStatus::Closing)
        );
        let closed = machine.apply(TransportSignal::Closed);
        assert_eq!(closed.emit, Some(ConnectionStatus::Closed));
        assert!(!closed.schedule_retry);
        assert!(!machine.retry_fired());

        assert_eq!(machine.apply(TransportSignal::Opened).emit, None);
        assert_eq!(machine.status(), ConnectionStatus::Closed);
    }

    #[test]
    fn test_duplicate_open_is_suppressed() {
        let mut machine = ReconnectMachine::new();
        machine.apply(TransportSignal::Opened);
        assert_eq!(machine.apply(TransportSignal::Opened).emit, None);
        assert_eq!(machine.status(), ConnectionStatus::Open);
    }
}
