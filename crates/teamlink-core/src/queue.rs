//! Ordered, resend-capable message delivery.
//!
//! The transport may drop, duplicate or reorder frames. The queue numbers
//! outgoing messages, keeps every one of them for retransmission, and on the
//! receiving side releases messages strictly in index order. A gap triggers a
//! single resend request for the lowest missing index; the request is armed
//! again only once the gap moves.
//!
//! # Invariants
//!
//! - Outgoing indices are `0, 1, 2, …` in the order `send` was called.
//! - Every inbound index is delivered at most once, in ascending order.
//! - Indices below the next expected one are discarded as duplicates.

use std::collections::BTreeMap;

use teamlink_proto::NumberedMessage;
use tracing::{debug, trace};

/// Output of [`MessageQueue::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent<M> {
    /// Next in-order message for the protocol
    Deliver(M),
    /// Ask the peer to resend everything from this index
    RequestResend(u64),
}

/// Per-connection message queue.
#[derive(Debug, Clone)]
pub struct MessageQueue<M> {
    outbound: Vec<NumberedMessage<M>>,
    inbound: BTreeMap<u64, M>,
    next_inbound: u64,
    requested: Option<u64>,
    started: bool,
    stopped: bool,
}

impl<M> Default for MessageQueue<M> {
    fn default() -> Self {
        Self {
            outbound: Vec::new(),
            inbound: BTreeMap::new(),
            next_inbound: 0,
            requested: None,
            started: false,
            stopped: false,
        }
    }
}

impl<M: Clone> MessageQueue<M> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin accepting inbound messages.
    pub fn start(&mut self) {
        self.started = true;
    }

    /// Stop the queue: no further deliveries or resend requests, and any
    /// buffered out-of-order messages are released.
    pub fn stop(&mut self) {
        self.stopped = true;
        self.inbound.clear();
        self.requested = None;
    }

    fn is_running(&self) -> bool {
        self.started && !self.stopped
    }

    /// Number the message, log it for resends and return the wire form.
    pub fn send(&mut self, message: M) -> NumberedMessage<M> {
        let numbered = NumberedMessage { index: self.outbound.len() as u64, message };
        trace!(index = numbered.index, "queued outbound message");
        self.outbound.push(numbered.clone());
        numbered
    }

    /// Accept a numbered message from the peer.
    ///
    /// Returns, in order, every message that became deliverable plus at most
    /// one resend request when a gap remains.
    pub fn receive(&mut self, numbered: NumberedMessage<M>) -> Vec<QueueEvent<M>> {
        if !self.is_running() {
            return Vec::new();
        }

        let NumberedMessage { index, message } = numbered;
        if !self.is_new(index) {
            trace!(index, "discarding duplicate message");
            return Vec::new();
        }
        self.inbound.insert(index, message);

        let mut events = Vec::new();
        while let Some(message) = self.inbound.remove(&self.next_inbound) {
            events.push(QueueEvent::Deliver(message));
            self.next_inbound += 1;
        }

        if self.inbound.is_empty() {
            self.requested = None;
        } else if self.requested != Some(self.next_inbound) {
            debug!(missing = self.next_inbound, buffered = self.inbound.len(), "gap in inbound messages");
            self.requested = Some(self.next_inbound);
            events.push(QueueEvent::RequestResend(self.next_inbound));
        }

        events
    }

    /// Whether `index` would be accepted rather than discarded as a duplicate.
    pub fn is_new(&self, index: u64) -> bool {
        self.is_running() && index >= self.next_inbound && !self.inbound.contains_key(&index)
    }

    /// Every logged outbound message with index `>= from`, in order.
    pub fn resend(&self, from: u64) -> Vec<NumberedMessage<M>> {
        let start = usize::try_from(from).unwrap_or(usize::MAX).min(self.outbound.len());
        self.outbound[start..].to_vec()
    }

    /// Index the next outbound message will get.
    pub fn next_outbound_index(&self) -> u64 {
        self.outbound.len() as u64
    }

    /// Index the next delivered inbound message must have.
    pub fn next_inbound_index(&self) -> u64 {
        self.next_inbound
    }

    /// Number of out-of-order messages waiting for a gap to fill.
    pub fn buffered(&self) -> usize {
        self.inbound.len()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn numbered(index: u64) -> NumberedMessage<u64> {
        NumberedMessage { index, message: index }
    }

    fn running() -> MessageQueue<u64> {
        let mut queue = MessageQueue::new();
        queue.start();
        queue
    }

    fn delivered(events: &[QueueEvent<u64>]) -> Vec<u64> {
        events
            .iter()
            .filter_map(|event| match event {
                QueueEvent::Deliver(message) => Some(*message),
                QueueEvent::RequestResend(_) => None,
            })
            .collect()
    }

    #[test]
    fn send_numbers_sequentially() {
        let mut queue = MessageQueue::new();
        assert_eq!(queue.send("a").index, 0);
        assert_eq!(queue.send("b").index, 1);
        assert_eq!(queue.send("c").index, 2);
        assert_eq!(queue.next_outbound_index(), 3);
    }

    #[test]
    fn gap_requests_lowest_missing_once() {
        let mut queue = running();
        assert_eq!(queue.receive(numbered(0)), vec![QueueEvent::Deliver(0)]);

        assert_eq!(queue.receive(numbered(2)), vec![QueueEvent::RequestResend(1)]);
        assert_eq!(queue.receive(numbered(3)), vec![]);
        assert_eq!(queue.buffered(), 2);

        let events = queue.receive(numbered(1));
        assert_eq!(delivered(&events), vec![1, 2, 3]);
        assert_eq!(queue.next_inbound_index(), 4);
    }

    #[test]
    fn moved_gap_rearms_request() {
        let mut queue = running();
        assert_eq!(queue.receive(numbered(1)), vec![QueueEvent::RequestResend(0)]);
        assert_eq!(queue.receive(numbered(3)), vec![]);

        let events = queue.receive(numbered(0));
        assert_eq!(events, vec![
            QueueEvent::Deliver(0),
            QueueEvent::Deliver(1),
            QueueEvent::RequestResend(2)
        ]);
    }

    #[test]
    fn duplicates_are_discarded() {
        let mut queue = running();
        queue.receive(numbered(0));
        assert!(queue.receive(numbered(0)).is_empty());

        queue.receive(numbered(2));
        assert!(queue.receive(numbered(2)).is_empty());
    }

    #[test]
    fn is_new_tracks_delivered_and_buffered() {
        let mut queue = running();
        assert!(queue.is_new(0));
        queue.receive(numbered(0));
        queue.receive(numbered(2));
        assert!(!queue.is_new(0));
        assert!(queue.is_new(1));
        assert!(!queue.is_new(2));
    }

    #[test]
    fn resend_returns_suffix() {
        let mut queue = MessageQueue::new();
        for i in 0..5u64 {
            queue.send(i);
        }
        let indices: Vec<u64> = queue.resend(3).iter().map(|m| m.index).collect();
        assert_eq!(indices, vec![3, 4]);
        assert!(queue.resend(9).is_empty());
    }

    #[test]
    fn stopped_queue_ignores_input() {
        let mut queue = running();
        queue.receive(numbered(2));
        queue.stop();
        assert_eq!(queue.buffered(), 0);
        assert!(queue.receive(numbered(0)).is_empty());
    }

    #[test]
    fn unstarted_queue_ignores_input() {
        let mut queue: MessageQueue<u64> = MessageQueue::new();
        assert!(queue.receive(numbered(0)).is_empty());
    }

    proptest! {
        #[test]
        fn any_arrival_order_delivers_in_order(
            order in Just((0..32u64).collect::<Vec<_>>()).prop_shuffle(),
            duplicates in prop::collection::vec(0..32u64, 0..16),
        ) {
            let mut queue = running();
            let mut out = Vec::new();
            for index in order.iter().chain(duplicates.iter()) {
                out.extend(delivered(&queue.receive(numbered(*index))));
            }
            prop_assert_eq!(out, (0..32).collect::<Vec<_>>());
        }

        #[test]
        fn each_gap_is_requested_once(order in Just((0..16u64).collect::<Vec<_>>()).prop_shuffle()) {
            let mut queue = running();
            let mut requests = Vec::new();
            for index in order {
                for event in queue.receive(numbered(index)) {
                    if let QueueEvent::RequestResend(missing) = event {
                        requests.push(missing);
                    }
                }
            }
            let mut deduped = requests.clone();
            deduped.dedup();
            prop_assert_eq!(requests, deduped);
        }
    }
}
