use std::fmt;

use serde::Serialize;

/// Key of the global aggregate row.
pub const GLOBAL_KEY: &str = "ALL";

const ESCAPE: char = '\\';
const BRIDGE_SEGMENT: &str = "bridge";

/// Identifies one row of the traffic table: a topic truncated to the configured depth.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct AggregationKey(String);

impl AggregationKey {
    pub fn global() -> Self {
        Self(GLOBAL_KEY.to_string())
    }

    /// Builds a key from topic segments, escaping anything that could read as the global key.
    pub fn from_segments(joined: String) -> Self {
        if joined == GLOBAL_KEY || joined.starts_with(ESCAPE) {
            Self(format!("{ESCAPE}{joined}"))
        } else {
            Self(joined)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AggregationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns the part of `topic` below `base_topic/`, if any.
fn strip_base<'a>(topic: &'a str, base_topic: &str) -> Option<&'a str> {
    topic
        .strip_prefix(base_topic)?
        .strip_prefix('/')
        .filter(|rest| !rest.is_empty())
}

/// Bridge traffic is what the gateway publishes about itself under `<base>/bridge`.
pub fn is_bridge(topic: &str, base_topic: &str) -> bool {
    strip_base(topic, base_topic)
        .and_then(|rest| rest.split('/').next())
        .map_or(false, |first| first == BRIDGE_SEGMENT)
}

/// Maps a topic to its aggregation key. `None` means the event is dropped.
pub fn derive(
    topic: &str,
    base_topic: &str,
    detail_depth: u32,
    ignore_bridge: bool,
) -> Option<AggregationKey> {
    let rest = strip_base(topic, base_topic)?;
    let segments: Vec<&str> = rest.split('/').collect();
    if ignore_bridge && segments.first() == Some(&BRIDGE_SEGMENT) {
        return None;
    }
    let depth = (detail_depth.max(1) as usize).min(segments.len());
    Some(AggregationKey::from_segments(segments[..depth].join("/")))
}
