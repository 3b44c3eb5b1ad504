//! Link lifecycle events and subscription bookkeeping.

use std::collections::VecDeque;

use rumqttc::{QoS, SubscribeReasonCode};

/// Out-of-band notifications from the link's transport task.
///
/// Delivered over an mpsc channel so the transport task is never blocked
/// on the owner.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// The transport dropped unexpectedly; the link keeps reconnecting
    /// on its own and no action is required beyond logging.
    Interrupted {
        /// Description of the transport error
        error: String,
    },
    /// A reconnect succeeded.
    Resumed {
        /// Whether the broker kept the previous session's state
        session_present: bool,
    },
    /// The broker answered a subscribe or a post-resume reissue.
    SubscriptionResult {
        /// One grant per requested topic filter, in request order
        grants: Vec<SubscriptionGrant>,
        /// True when the request was a reissue after session loss
        resumed: bool,
    },
    /// A requested disconnect completed.
    Closed,
}

/// The broker's answer to one requested topic filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionGrant {
    /// Topic filter the grant answers
    pub topic: String,
    /// Granted QoS, or `None` when the broker rejected the subscription
    pub granted: Option<QoS>,
}

impl SubscriptionGrant {
    /// Whether the broker rejected this subscription.
    #[must_use]
    pub fn rejected(&self) -> bool {
        self.granted.is_none()
    }
}

#[derive(Debug, Clone)]
struct TrackedSubscription {
    topic: String,
    qos: QoS,
}

/// One subscribe request awaiting its acknowledgment.
#[derive(Debug, Clone)]
struct PendingRequest {
    topics: Vec<(String, QoS)>,
    resumed: bool,
}

/// Subscription state shared between the link handle and its transport
/// task.
///
/// Acknowledgments carry no topic names, only one reason code per
/// requested filter, so requests are queued here and matched to their
/// acknowledgment in order.
#[derive(Debug, Default)]
pub(crate) struct LinkTracker {
    subscriptions: Vec<TrackedSubscription>,
    pending: VecDeque<PendingRequest>,
}

impl LinkTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Track a topic and queue the expectation for its acknowledgment.
    pub(crate) fn track(&mut self, topic: String, qos: QoS) {
        self.subscriptions.push(TrackedSubscription {
            topic: topic.clone(),
            qos,
        });
        self.pending.push_back(PendingRequest {
            topics: vec![(topic, qos)],
            resumed: false,
        });
    }

    /// Forget a topic whose subscribe request could not be issued.
    pub(crate) fn untrack(&mut self, topic: &str) {
        if let Some(pos) = self.subscriptions.iter().rposition(|s| s.topic == topic) {
            self.subscriptions.remove(pos);
        }
        let stale = self
            .pending
            .iter()
            .rposition(|r| !r.resumed && r.topics.len() == 1 && r.topics[0].0 == topic);
        if let Some(pos) = stale {
            self.pending.remove(pos);
        }
    }

    /// Handle a successful reconnect.
    ///
    /// Returns the filters to reissue when the broker lost the session
    /// and any subscriptions are tracked, `None` otherwise.
    pub(crate) fn on_resumed(&mut self, session_present: bool) -> Option<Vec<(String, QoS)>> {
        if session_present || self.subscriptions.is_empty() {
            return None;
        }

        let filters: Vec<(String, QoS)> = self
            .subscriptions
            .iter()
            .map(|s| (s.topic.clone(), s.qos))
            .collect();
        self.pending.push_back(PendingRequest {
            topics: filters.clone(),
            resumed: true,
        });
        Some(filters)
    }

    /// Drop the newest queued reissue expectation after its request
    /// could not be handed to the transport.
    pub(crate) fn abandon_resumed_request(&mut self) {
        if let Some(pos) = self.pending.iter().rposition(|r| r.resumed) {
            self.pending.remove(pos);
        }
    }

    /// Match an acknowledgment to the oldest pending request.
    ///
    /// Returns `None` when no request is pending, which means the broker
    /// acknowledged something this link never asked for. An
    /// acknowledgment carrying fewer reason codes than the request had
    /// filters leaves the unanswered filters rejected.
    pub(crate) fn on_suback(&mut self, return_codes: &[SubscribeReasonCode]) -> Option<LinkEvent> {
        let request = self.pending.pop_front()?;

        let codes = return_codes
            .iter()
            .map(Some)
            .chain(std::iter::repeat(None));
        let grants = request
            .topics
            .iter()
            .zip(codes)
            .map(|((topic, _), code)| SubscriptionGrant {
                topic: topic.clone(),
                granted: match code {
                    Some(SubscribeReasonCode::Success(qos)) => Some(*qos),
                    Some(SubscribeReasonCode::Failure) | None => None,
                },
            })
            .collect();

        Some(LinkEvent::SubscriptionResult {
            grants,
            resumed: request.resumed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_with_surviving_session_reissues_nothing() {
        let mut tracker = LinkTracker::new();
        tracker.track("glucose/value".to_string(), QoS::AtLeastOnce);

        assert!(tracker.on_resumed(true).is_none());
    }

    #[test]
    fn resume_after_session_loss_reissues_tracked_subscriptions() {
        let mut tracker = LinkTracker::new();
        tracker.track("glucose/value".to_string(), QoS::AtLeastOnce);
        // Consume the ack for the original subscribe.
        tracker.on_suback(&[SubscribeReasonCode::Success(QoS::AtLeastOnce)]);

        let filters = tracker.on_resumed(false).unwrap();
        assert_eq!(
            filters,
            vec![("glucose/value".to_string(), QoS::AtLeastOnce)]
        );

        let event = tracker
            .on_suback(&[SubscribeReasonCode::Success(QoS::AtLeastOnce)])
            .unwrap();
        match event {
            LinkEvent::SubscriptionResult { grants, resumed } => {
                assert!(resumed);
                assert_eq!(grants.len(), 1);
                assert_eq!(grants[0].topic, "glucose/value");
                assert_eq!(grants[0].granted, Some(QoS::AtLeastOnce));
                assert!(!grants[0].rejected());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn resume_without_subscriptions_reissues_nothing() {
        let mut tracker = LinkTracker::new();
        assert!(tracker.on_resumed(false).is_none());
    }

    #[test]
    fn rejected_grant_is_surfaced() {
        let mut tracker = LinkTracker::new();
        tracker.track("glucose/value".to_string(), QoS::AtLeastOnce);

        let event = tracker.on_suback(&[SubscribeReasonCode::Failure]).unwrap();
        match event {
            LinkEvent::SubscriptionResult { grants, resumed } => {
                assert!(!resumed);
                assert_eq!(grants[0].topic, "glucose/value");
                assert!(grants[0].rejected());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn acknowledgment_without_request_is_ignored() {
        let mut tracker = LinkTracker::new();
        assert!(tracker
            .on_suback(&[SubscribeReasonCode::Success(QoS::AtLeastOnce)])
            .is_none());
    }

    #[test]
    fn acknowledgments_match_requests_in_order() {
        let mut tracker = LinkTracker::new();
        tracker.track("glucose/value".to_string(), QoS::AtLeastOnce);
        tracker.track("glucose/alarm".to_string(), QoS::AtLeastOnce);

        let first = tracker
            .on_suback(&[SubscribeReasonCode::Success(QoS::AtLeastOnce)])
            .unwrap();
        let second = tracker.on_suback(&[SubscribeReasonCode::Failure]).unwrap();

        match (first, second) {
            (
                LinkEvent::SubscriptionResult { grants: a, .. },
                LinkEvent::SubscriptionResult { grants: b, .. },
            ) => {
                assert_eq!(a[0].topic, "glucose/value");
                assert!(!a[0].rejected());
                assert_eq!(b[0].topic, "glucose/alarm");
                assert!(b[0].rejected());
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn untrack_drops_subscription_and_pending_request() {
        let mut tracker = LinkTracker::new();
        tracker.track("glucose/value".to_string(), QoS::AtLeastOnce);
        tracker.untrack("glucose/value");

        assert!(tracker.subscriptions.is_empty());
        assert!(tracker.pending.is_empty());
        assert!(tracker.on_resumed(false).is_none());
    }

    #[test]
    fn short_acknowledgment_rejects_unanswered_filters() {
        let mut tracker = LinkTracker::new();
        tracker.track("glucose/value".to_string(), QoS::AtLeastOnce);
        tracker.track("glucose/alarm".to_string(), QoS::AtLeastOnce);
        tracker.on_suback(&[SubscribeReasonCode::Success(QoS::AtLeastOnce)]);
        tracker.on_suback(&[SubscribeReasonCode::Success(QoS::AtLeastOnce)]);

        // Both topics reissue as one batch, answered with one code.
        let filters = tracker.on_resumed(false).unwrap();
        assert_eq!(filters.len(), 2);

        let event = tracker
            .on_suback(&[SubscribeReasonCode::Success(QoS::AtLeastOnce)])
            .unwrap();
        match event {
            LinkEvent::SubscriptionResult { grants, resumed } => {
                assert!(resumed);
                assert_eq!(grants.len(), 2);
                assert!(!grants[0].rejected());
                assert_eq!(grants[1].topic, "glucose/alarm");
                assert!(grants[1].rejected());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn abandoned_reissue_leaves_no_pending_expectation() {
        let mut tracker = LinkTracker::new();
        tracker.track("glucose/value".to_string(), QoS::AtLeastOnce);
        tracker.on_suback(&[SubscribeReasonCode::Success(QoS::AtLeastOnce)]);

        tracker.on_resumed(false).unwrap();
        tracker.abandon_resumed_request();

        assert!(tracker
            .on_suback(&[SubscribeReasonCode::Success(QoS::AtLeastOnce)])
            .is_none());
    }
}
