use crate::{ConsumerError, Result};

const TOPIC_SCHEMES: [&str; 2] = ["persistent://", "non-persistent://"];

/// Suffix appended to the tenant to form the subscription name
pub const SUBSCRIPTION_SUFFIX: &str = "-sub";

/// Extract the tenant segment of a fully qualified topic name.
///
/// `persistent://tenant1/out/event` yields `tenant1`.
pub fn tenant(topic: &str) -> Result<&str> {
    let rest = TOPIC_SCHEMES
        .iter()
        .find_map(|scheme| topic.strip_prefix(scheme))
        .unwrap_or(topic);

    match rest.split_once('/') {
        Some((tenant, _)) if !tenant.is_empty() => Ok(tenant),
        _ => Err(ConsumerError::InvalidTopic(topic.to_string())),
    }
}

/// Derive the subscription name for a topic.
///
/// Every consumer of the same tenant converges on one logical subscription.
pub fn subscription_name(topic: &str) -> Result<String> {
    Ok(format!("{}{}", tenant(topic)?, SUBSCRIPTION_SUFFIX))
}
