//! Topic naming

const TOPIC_PREFIX: &str = "/beacon/pubsub/v0.0.0/";

/// Topic carrying the rounds of `network`
pub fn pubsub_topic(network: &str) -> String {
    format!("{}{}", TOPIC_PREFIX, network)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pubsub_topic() {
        assert_eq!(pubsub_topic("mainnet"), "/beacon/pubsub/v0.0.0/mainnet");
        assert_ne!(pubsub_topic("a"), pubsub_topic("b"));
    }
}
