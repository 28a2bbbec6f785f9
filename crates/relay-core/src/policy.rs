use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a worker does with a message whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Acknowledge and forget; the client never gets a response
    #[default]
    Drop,
    /// Hand the message back to the broker for another attempt
    Requeue,
    /// Move the original message to the dead-letter queue
    DeadLetter,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Drop => "drop",
            FailurePolicy::Requeue => "requeue",
            FailurePolicy::DeadLetter => "dead-letter",
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drop" => Ok(FailurePolicy::Drop),
            "requeue" => Ok(FailurePolicy::Requeue),
            "dead-letter" | "dead_letter" | "deadletter" => Ok(FailurePolicy::DeadLetter),
            other => Err(format!("unknown failure policy: {other}")),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the gateway does with a response whose connection has closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingMissPolicy {
    /// Count, log and discard
    #[default]
    Drop,
    /// Count, log, and publish a `ClientGone` notice
    Notify,
}

impl RoutingMissPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingMissPolicy::Drop => "drop",
            RoutingMissPolicy::Notify => "notify",
        }
    }
}

impl FromStr for RoutingMissPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drop" => Ok(RoutingMissPolicy::Drop),
            "notify" => Ok(RoutingMissPolicy::Notify),
            other => Err(format!("unknown routing miss policy: {other}")),
        }
    }
}

impl fmt::Display for RoutingMissPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
