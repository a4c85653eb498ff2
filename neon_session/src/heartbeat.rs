// Heartbeat: ping scheduling and round-trip measurement.
//
// At most one ping is outstanding per engine. Issuing a new ping replaces
// the pending one, so only the most recent probe can produce an RTT. Each
// ping carries a correlation token in the frame's sequence field and the
// sender's timestamp in its payload; the responder echoes both. A pong
// matches only if token and echoed timestamp both equal the pending ping's.
// Anything else (a stale pong for a superseded ping, a duplicate) is
// discarded without a report.
//
// `Heartbeat` holds no clock and does no I/O. The client passes "now" in and
// sends the frame itself.

/// Default auto-ping interval.
pub const DEFAULT_PING_INTERVAL_MS: u64 = 5_000;

/// Round-trip time in whole milliseconds. Never negative: a receive time
/// before the send time (clock step) reads as 0.
pub fn round_trip_millis(sent_at: u64, received_at: u64) -> u64 {
    received_at.saturating_sub(sent_at)
}

/// The ping currently awaiting its pong.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingPing {
    pub sent_at: u64,
    pub token: u16,
}

#[derive(Debug)]
pub struct Heartbeat {
    auto: bool,
    interval_ms: u64,
    pending: Option<PendingPing>,
    next_token: u16,
    last_sent_at: Option<u64>,
    last_rtt: Option<u64>,
}

impl Heartbeat {
    pub fn new(auto: bool, interval_ms: u64) -> Self {
        Self {
            auto,
            interval_ms,
            pending: None,
            next_token: 1,
            last_sent_at: None,
            last_rtt: None,
        }
    }

    pub fn auto(&self) -> bool {
        self.auto
    }

    pub fn set_auto(&mut self, auto: bool) {
        self.auto = auto;
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn set_interval_ms(&mut self, interval_ms: u64) {
        self.interval_ms = interval_ms;
    }

    /// Whether an automatic ping should go out at `now`. The first ping
    /// after a (re)start is due immediately.
    pub fn is_due(&self, now: u64) -> bool {
        self.auto
            && self
                .last_sent_at
                .is_none_or(|sent| now.saturating_sub(sent) >= self.interval_ms)
    }

    /// Start a new probe, superseding any pending one.
    pub fn issue(&mut self, now: u64) -> PendingPing {
        let ping = PendingPing {
            sent_at: now,
            token: self.next_token,
        };
        self.next_token = self.next_token.wrapping_add(1);
        self.pending = Some(ping);
        self.last_sent_at = Some(now);
        ping
    }

    /// Match a pong against the pending ping. On a match the pending ping is
    /// consumed and the RTT returned; otherwise nothing changes.
    pub fn complete(&mut self, token: u16, original_timestamp: u64, now: u64) -> Option<u64> {
        match self.pending {
            Some(ping) if ping.token == token && ping.sent_at == original_timestamp => {
                self.pending = None;
                let rtt = round_trip_millis(ping.sent_at, now);
                self.last_rtt = Some(rtt);
                Some(rtt)
            }
            _ => None,
        }
    }

    pub fn pending(&self) -> Option<PendingPing> {
        self.pending
    }

    pub fn last_rtt(&self) -> Option<u64> {
        self.last_rtt
    }

    /// Forget the outstanding probe and schedule; keep settings and the last
    /// measurement.
    pub fn reset(&mut self) {
        self.pending = None;
        self.last_sent_at = None;
    }
}
