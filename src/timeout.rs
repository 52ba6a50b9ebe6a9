use crate::{Frame, Opcode};
use std::time::Duration;
use tokio::time::Instant;

/// Why a [TimeoutManager] decided that its connection is dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutReason {
    /// An awaited pong or close never arrived within [TimeoutManager::TIMEOUT].
    NoResponse,
    /// Nothing was sent or received for [TimeoutManager::KEEP_ALIVE_TIMEOUT].
    KeepAlive,
}

/// Liveness bookkeeping of one connection.
///
/// The manager is told about every frame that crosses the wire and answers
/// whether the connection has been silent for too long. Two deadlines are
/// tracked:
///
/// - while a control frame we sent is waiting for its answer (a pong after a
///   ping, a close after a close), the answer must arrive within [Self::TIMEOUT];
/// - otherwise, some traffic must happen within [Self::KEEP_ALIVE_TIMEOUT].
///
/// It performs no I/O. Time is read from [tokio::time::Instant], so a paused
/// runtime clock freezes it.
#[derive(Debug)]
pub struct TimeoutManager {
    awaited_opcode: Option<Opcode>,
    last_control_send_time: Option<Instant>,
    last_activity_time: Instant,
    timeout_reason: Option<TimeoutReason>,
}

impl TimeoutManager {
    /// How long an awaited control frame may take to arrive.
    pub const TIMEOUT: Duration = Duration::from_secs(15);

    /// How long a connection may stay completely silent.
    pub const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(3600);

    pub fn new() -> Self {
        Self {
            awaited_opcode: None,
            last_control_send_time: None,
            last_activity_time: Instant::now(),
            timeout_reason: None,
        }
    }

    /// Control frame we are waiting for, if any.
    #[inline]
    pub fn awaited_opcode(&self) -> Option<Opcode> {
        self.awaited_opcode
    }

    /// Set by the last positive [Self::has_timed_out].
    #[inline]
    pub fn timeout_reason(&self) -> Option<TimeoutReason> {
        self.timeout_reason
    }

    #[inline]
    pub fn last_activity_time(&self) -> Instant {
        self.last_activity_time
    }

    pub fn acknowledge_frame_sent(&mut self, frame: &Frame) {
        let now = Instant::now();
        self.last_activity_time = now;
        let awaited = match frame.opcode() {
            Opcode::Ping => Opcode::Pong,
            Opcode::Close => Opcode::Close,
            _ => return,
        };
        self.awaited_opcode = Some(awaited);
        self.last_control_send_time = Some(now);
    }

    pub fn acknowledge_frame_receipt(&mut self, frame: &Frame) {
        self.last_activity_time = Instant::now();
        if self.awaited_opcode == Some(frame.opcode()) {
            self.awaited_opcode = None;
            self.last_control_send_time = None;
        }
    }

    /// Whether the connection should be considered dead as of now.
    ///
    /// An overdue handshake is reported as [TimeoutReason::NoResponse] even
    /// when the keep-alive deadline has passed as well.
    pub fn has_timed_out(&mut self) -> bool {
        let now = Instant::now();
        let reason = match (self.awaited_opcode, self.last_control_send_time) {
            (Some(_), Some(sent)) if now.duration_since(sent) >= Self::TIMEOUT => {
                TimeoutReason::NoResponse
            }
            _ if now.duration_since(self.last_activity_time) >= Self::KEEP_ALIVE_TIMEOUT => {
                TimeoutReason::KeepAlive
            }
            _ => return false,
        };
        self.timeout_reason = Some(reason);
        true
    }

    /// Earliest instant at which [Self::has_timed_out] may turn true.
    pub fn next_deadline(&self) -> Instant {
        let keep_alive = self.last_activity_time + Self::KEEP_ALIVE_TIMEOUT;
        match self.last_control_send_time {
            Some(sent) if self.awaited_opcode.is_some() => keep_alive.min(sent + Self::TIMEOUT),
            _ => keep_alive,
        }
    }
}

impl Default for TimeoutManager {
    fn default() -> Self {
        Self::new()
    }
}

const fn is_shorter(a: Duration, b: Duration) -> bool {
    a.as_nanos() < b.as_nanos()
}

const _: () = assert!(
    is_shorter(TimeoutManager::TIMEOUT, TimeoutManager::KEEP_ALIVE_TIMEOUT),
    "TIMEOUT must be shorter than KEEP_ALIVE_TIMEOUT"
);

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn no_response_timeout() {
        // A PING frame was just sent, if no pong has been received
        // within TIMEOUT, the connection has timed out.
        let mut timeout_manager = TimeoutManager::new();
        timeout_manager.acknowledge_frame_sent(&Frame::new(Opcode::Ping));
        assert_eq!(timeout_manager.awaited_opcode(), Some(Opcode::Pong));
        advance(TimeoutManager::TIMEOUT / 2).await;
        assert!(!timeout_manager.has_timed_out());
        advance(TimeoutManager::TIMEOUT / 2).await;
        assert!(timeout_manager.has_timed_out());
        assert_eq!(timeout_manager.timeout_reason(), Some(TimeoutReason::NoResponse));

        // Same for a CLOSE frame waiting for the peer's close.
        let mut timeout_manager = TimeoutManager::new();
        timeout_manager.acknowledge_frame_sent(&Frame::new(Opcode::Close));
        assert_eq!(timeout_manager.awaited_opcode(), Some(Opcode::Close));
        advance(TimeoutManager::TIMEOUT / 2).await;
        assert!(!timeout_manager.has_timed_out());
        advance(TimeoutManager::TIMEOUT / 2).await;
        assert!(timeout_manager.has_timed_out());
        assert_eq!(timeout_manager.timeout_reason(), Some(TimeoutReason::NoResponse));
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_timeout() {
        let mut timeout_manager = TimeoutManager::new();
        advance(TimeoutManager::KEEP_ALIVE_TIMEOUT / 2).await;
        assert!(!timeout_manager.has_timed_out());
        assert_eq!(timeout_manager.timeout_reason(), None);
        advance(TimeoutManager::KEEP_ALIVE_TIMEOUT / 2).await;
        assert!(timeout_manager.has_timed_out());
        assert_eq!(timeout_manager.timeout_reason(), Some(TimeoutReason::KeepAlive));
    }

    #[test]
    fn reset_wait_for() {
        let mut timeout_manager = TimeoutManager::new();
        timeout_manager.acknowledge_frame_sent(&Frame::new(Opcode::Ping));
        assert_eq!(timeout_manager.awaited_opcode(), Some(Opcode::Pong));
        timeout_manager.acknowledge_frame_receipt(&Frame::new(Opcode::Pong));
        assert_eq!(timeout_manager.awaited_opcode(), None);

        timeout_manager.acknowledge_frame_sent(&Frame::new(Opcode::Close));
        assert_eq!(timeout_manager.awaited_opcode(), Some(Opcode::Close));
        timeout_manager.acknowledge_frame_receipt(&Frame::new(Opcode::Close));
        assert_eq!(timeout_manager.awaited_opcode(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn unrelated_receipt_keeps_waiting() {
        let mut timeout_manager = TimeoutManager::new();
        timeout_manager.acknowledge_frame_sent(&Frame::new(Opcode::Ping));
        advance(Duration::from_secs(1)).await;
        timeout_manager.acknowledge_frame_receipt(&Frame::text("hi"));
        assert_eq!(timeout_manager.awaited_opcode(), Some(Opcode::Pong));
        assert_eq!(timeout_manager.last_activity_time(), Instant::now());

        // traffic does not extend the handshake deadline
        advance(TimeoutManager::TIMEOUT - Duration::from_secs(1)).await;
        assert!(timeout_manager.has_timed_out());
        assert_eq!(timeout_manager.timeout_reason(), Some(TimeoutReason::NoResponse));
    }

    #[tokio::test(start_paused = true)]
    async fn data_frames_only_refresh_activity() {
        let mut timeout_manager = TimeoutManager::new();
        advance(TimeoutManager::KEEP_ALIVE_TIMEOUT - Duration::from_secs(1)).await;
        timeout_manager.acknowledge_frame_sent(&Frame::binary(vec![1u8]));
        assert_eq!(timeout_manager.awaited_opcode(), None);
        advance(Duration::from_secs(1)).await;
        assert!(!timeout_manager.has_timed_out());
    }

    #[test]
    fn ordering_check_keeps_sub_second_precision() {
        assert!(is_shorter(Duration::from_millis(1200), Duration::from_millis(1800)));
        assert!(!is_shorter(Duration::from_millis(1800), Duration::from_millis(1200)));
        assert!(!is_shorter(Duration::from_millis(1500), Duration::from_millis(1500)));
    }

    #[tokio::test(start_paused = true)]
    async fn no_response_wins_over_keep_alive() {
        let mut timeout_manager = TimeoutManager::new();
        timeout_manager.acknowledge_frame_sent(&Frame::new(Opcode::Ping));
        advance(TimeoutManager::KEEP_ALIVE_TIMEOUT).await;
        assert!(timeout_manager.has_timed_out());
        assert_eq!(timeout_manager.timeout_reason(), Some(TimeoutReason::NoResponse));
    }

    #[tokio::test(start_paused = true)]
    async fn next_deadline_tracks_the_closest_timeout() {
        let mut timeout_manager = TimeoutManager::new();
        let start = Instant::now();
        assert_eq!(
            timeout_manager.next_deadline(),
            start + TimeoutManager::KEEP_ALIVE_TIMEOUT
        );
        timeout_manager.acknowledge_frame_sent(&Frame::new(Opcode::Ping));
        assert_eq!(timeout_manager.next_deadline(), start + TimeoutManager::TIMEOUT);
        timeout_manager.acknowledge_frame_receipt(&Frame::new(Opcode::Pong));
        assert_eq!(
            timeout_manager.next_deadline(),
            start + TimeoutManager::KEEP_ALIVE_TIMEOUT
        );
    }
}
