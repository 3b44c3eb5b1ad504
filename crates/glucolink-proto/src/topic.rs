//! MQTT topic layout.

/// Topic the latest reading is published to.
pub const GLUCOSE_TOPIC: &str = "glucose/value";

/// Validate a topic for publishing.
///
/// Wildcards are only meaningful in subscription filters; the broker
/// refuses publishes carrying them, so they are caught here at config
/// time instead of on the first publish.
///
/// # Errors
///
/// Returns error if the topic is empty or contains `#` or `+`.
pub fn validate_publish_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }

    if topic.contains(['#', '+']) {
        return Err(TopicError::Wildcard(topic.to_string()));
    }

    Ok(())
}

/// Errors for topic validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    /// Topic string is empty
    #[error("publish topic must not be empty")]
    Empty,
    /// Topic contains a subscription wildcard
    #[error("publish topic '{0}' contains a wildcard")]
    Wildcard(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_topic_is_valid() {
        validate_publish_topic(GLUCOSE_TOPIC).unwrap();
    }

    #[test]
    fn wildcards_are_rejected() {
        assert_eq!(
            validate_publish_topic("glucose/#"),
            Err(TopicError::Wildcard("glucose/#".to_string()))
        );
        assert_eq!(
            validate_publish_topic("glucose/+/value"),
            Err(TopicError::Wildcard("glucose/+/value".to_string()))
        );
    }

    #[test]
    fn empty_topic_is_rejected() {
        assert_eq!(validate_publish_topic(""), Err(TopicError::Empty));
    }
}
