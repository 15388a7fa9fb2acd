use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::MessageType;

/// Track protocol counters without external dependencies.
pub(crate) struct Metrics;

static TOTAL_MESSAGES: AtomicU64 = AtomicU64::new(0);
static SENT_MESSAGES: AtomicU64 = AtomicU64::new(0);
static RECEIVED_MESSAGES: AtomicU64 = AtomicU64::new(0);
static DECODE_ERRORS: AtomicU64 = AtomicU64::new(0);
static ACTIVE_CONNECTIONS: AtomicU64 = AtomicU64::new(0);
static BROADCAST_LATENCY_TOTAL_NS: AtomicU64 = AtomicU64::new(0);
static BROADCAST_LATENCY_MAX_NS: AtomicU64 = AtomicU64::new(0);
static BROADCASTS: AtomicU64 = AtomicU64::new(0);

const NANOSECONDS_PER_MICROSECOND: u128 = 1_000;

struct MessageTypeCounters {
    discovery_request: AtomicU64,
    discovery_response: AtomicU64,
    colour_data: AtomicU64,
    config_update: AtomicU64,
    ping: AtomicU64,
    pong: AtomicU64,
    error: AtomicU64,
}

static MESSAGE_COUNTERS: MessageTypeCounters = MessageTypeCounters::new();

impl MessageTypeCounters {
    const fn new() -> Self {
        Self {
            discovery_request: AtomicU64::new(0),
            discovery_response: AtomicU64::new(0),
            colour_data: AtomicU64::new(0),
            config_update: AtomicU64::new(0),
            ping: AtomicU64::new(0),
            pong: AtomicU64::new(0),
            error: AtomicU64::new(0),
        }
    }

    fn counter(&self, msg_type: MessageType) -> &AtomicU64 {
        match msg_type {
            MessageType::DiscoveryRequest => &self.discovery_request,
            MessageType::DiscoveryResponse => &self.discovery_response,
            MessageType::ColourData => &self.colour_data,
            MessageType::ConfigUpdate => &self.config_update,
            MessageType::Ping => &self.ping,
            MessageType::Pong => &self.pong,
            MessageType::Error => &self.error,
        }
    }
}

/// Direction of message flow for counting.
#[derive(Clone, Copy)]
pub(crate) enum MessageDirection {
    Sent,
    Received,
}

impl Metrics {
    #[inline]
    pub(crate) fn record_message(direction: MessageDirection, msg_type: MessageType) {
        TOTAL_MESSAGES.fetch_add(1, Ordering::Relaxed);
        match direction {
            MessageDirection::Sent => {
                SENT_MESSAGES.fetch_add(1, Ordering::Relaxed);
            }
            MessageDirection::Received => {
                RECEIVED_MESSAGES.fetch_add(1, Ordering::Relaxed);
            }
        }
        MESSAGE_COUNTERS
            .counter(msg_type)
            .fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_decode_error() {
        DECODE_ERRORS.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_connection_open() {
        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_connection_close() {
        // Saturate; a close without a matching open must not wrap
        let _ = ACTIVE_CONNECTIONS.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
            Some(n.saturating_sub(1))
        });
    }

    #[inline]
    pub(crate) fn record_broadcast(duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);

        BROADCASTS.fetch_add(1, Ordering::Relaxed);
        BROADCAST_LATENCY_TOTAL_NS.fetch_add(nanos, Ordering::Relaxed);
        update_max(&BROADCAST_LATENCY_MAX_NS, nanos);
    }

    #[inline]
    pub(crate) fn totals() -> MetricsSnapshot {
        MetricsSnapshot {
            total_messages: TOTAL_MESSAGES.load(Ordering::Relaxed),
            sent_messages: SENT_MESSAGES.load(Ordering::Relaxed),
            received_messages: RECEIVED_MESSAGES.load(Ordering::Relaxed),
            colour_frames: MESSAGE_COUNTERS.colour_data.load(Ordering::Relaxed),
            config_updates: MESSAGE_COUNTERS.config_update.load(Ordering::Relaxed),
            discovery_messages: MESSAGE_COUNTERS.discovery_request.load(Ordering::Relaxed)
                + MESSAGE_COUNTERS.discovery_response.load(Ordering::Relaxed),
            pings: MESSAGE_COUNTERS.ping.load(Ordering::Relaxed),
            pongs: MESSAGE_COUNTERS.pong.load(Ordering::Relaxed),
            error_responses: MESSAGE_COUNTERS.error.load(Ordering::Relaxed),
            decode_errors: DECODE_ERRORS.load(Ordering::Relaxed),
            active_connections: ACTIVE_CONNECTIONS.load(Ordering::Relaxed),
            broadcasts: BROADCASTS.load(Ordering::Relaxed),
            broadcast_latency_total_ns: BROADCAST_LATENCY_TOTAL_NS.load(Ordering::Relaxed),
            broadcast_latency_max_ns: BROADCAST_LATENCY_MAX_NS.load(Ordering::Relaxed),
        }
    }
}

fn update_max(target: &AtomicU64, candidate: u64) {
    let mut current = target.load(Ordering::Relaxed);
    while candidate > current {
        match target.compare_exchange_weak(
            current,
            candidate,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return,
            Err(old) => current = old,
        }
    }
}

/// Process-wide snapshot of protocol counters.
#[derive(Default, Debug, Clone, Copy)]
#[allow(missing_docs)]
pub struct MetricsSnapshot {
    pub total_messages: u64,
    pub sent_messages: u64,
    pub received_messages: u64,
    pub colour_frames: u64,
    pub config_updates: u64,
    pub discovery_messages: u64,
    pub pings: u64,
    pub pongs: u64,
    pub error_responses: u64,
    pub decode_errors: u64,
    pub active_connections: u64,
    pub broadcasts: u64,
    pub broadcast_latency_total_ns: u64,
    pub broadcast_latency_max_ns: u64,
}

impl MetricsSnapshot {
    /// Current counter values.
    #[must_use]
    pub fn capture() -> Self {
        Metrics::totals()
    }

    /// Average time to fan one frame out to every peer, in microseconds.
    #[must_use]
    pub fn avg_broadcast_latency_us(&self) -> Option<u64> {
        average_microseconds(self.broadcast_latency_total_ns, self.broadcasts)
    }
}

fn average_microseconds(total_ns: u64, count: u64) -> Option<u64> {
    if count == 0 {
        return None;
    }

    let total_ns_u128 = u128::from(total_ns);
    u64::try_from(total_ns_u128 / (u128::from(count) * NANOSECONDS_PER_MICROSECOND)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_only_grow() {
        let before = MetricsSnapshot::capture();
        Metrics::record_message(MessageDirection::Sent, MessageType::ColourData);
        Metrics::record_message(MessageDirection::Received, MessageType::Ping);
        Metrics::record_decode_error();
        let after = MetricsSnapshot::capture();

        assert!(after.sent_messages > before.sent_messages);
        assert!(after.received_messages > before.received_messages);
        assert!(after.colour_frames > before.colour_frames);
        assert!(after.pings > before.pings);
        assert!(after.decode_errors > before.decode_errors);
    }

    #[test]
    fn test_average_latency() {
        assert_eq!(average_microseconds(0, 0), None);
        assert_eq!(average_microseconds(3_000, 3), Some(1));
    }
}
