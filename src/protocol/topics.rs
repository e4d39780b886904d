//! Topic matching and validation for hierarchical pub/sub addresses
//!
//! Topics are `/`-delimited segment lists. Subscription patterns may use `+`
//! to match exactly one segment and a trailing `#` to match zero or more
//! remaining segments.

use thiserror::Error;

/// Segment delimiter for topics and patterns
pub const TOPIC_DELIMITER: char = '/';
/// Matches exactly one segment
pub const SINGLE_LEVEL_WILDCARD: &str = "+";
/// Matches the remainder of a topic; only valid as the last segment
pub const MULTI_LEVEL_WILDCARD: &str = "#";

/// Test whether a concrete `topic` satisfies a subscription `pattern`.
///
/// Literal segments compare exactly (case-sensitive). A `#` anywhere other
/// than the last pattern segment never matches.
pub fn matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_segments = pattern.split(TOPIC_DELIMITER);
    let mut topic_segments = topic.split(TOPIC_DELIMITER);

    loop {
        match (pattern_segments.next(), topic_segments.next()) {
            // `#` swallows the rest of the topic, including nothing at all
            (Some(MULTI_LEVEL_WILDCARD), _) => return pattern_segments.next().is_none(),
            (Some(SINGLE_LEVEL_WILDCARD), Some(_)) => continue,
            (Some(literal), Some(segment)) if literal == segment => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Validate a subscription pattern before it is registered or subscribed
pub fn validate_pattern(pattern: &str) -> Result<(), TopicError> {
    if pattern.is_empty() {
        return Err(TopicError::Empty);
    }

    let segments: Vec<&str> = pattern.split(TOPIC_DELIMITER).collect();
    let last = segments.len() - 1;

    for (position, segment) in segments.iter().enumerate() {
        if *segment == MULTI_LEVEL_WILDCARD {
            if position != last {
                return Err(TopicError::MisplacedMultiLevelWildcard {
                    pattern: pattern.to_string(),
                    position,
                });
            }
        } else if *segment != SINGLE_LEVEL_WILDCARD
            && (segment.contains('+') || segment.contains('#'))
        {
            return Err(TopicError::MixedWildcardSegment {
                segment: segment.to_string(),
                position,
            });
        }
    }

    Ok(())
}

/// Validate a concrete topic used as a publish target
pub fn validate_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.contains('+') || topic.contains('#') {
        return Err(TopicError::WildcardInTopic(topic.to_string()));
    }
    Ok(())
}

/// Topic and pattern validation errors
#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic cannot be empty")]
    Empty,
    #[error("Multi-level wildcard must be the last segment of '{pattern}' (found at segment {position})")]
    MisplacedMultiLevelWildcard { pattern: String, position: usize },
    #[error("Wildcard must occupy a whole segment, got '{segment}' at segment {position}")]
    MixedWildcardSegment { segment: String, position: usize },
    #[error("Publish topic cannot contain wildcards: {0}")]
    WildcardInTopic(String),
}
