use viewer_api::segment_count;

use crate::error::EngineError;

/// Subscription filter вместе с выведенной из него глубиной.
///
/// Глубина определена только для фильтров с завершающим `#`: это число
/// сегментов перед `#`. Сообщения, у которых сегментов больше, чем
/// `depth + 1`, dispatcher отбрасывает. Голый `#` глубину не ограничивает.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pattern: String,
    depth: Option<usize>,
}

impl SubscriptionFilter {
    pub fn parse(pattern: &str) -> Result<Self, EngineError> {
        let invalid = |reason: &'static str| EngineError::InvalidFilter {
            filter: pattern.to_string(),
            reason,
        };
        if pattern.is_empty() {
            return Err(invalid("filter is empty"));
        }

        let segments: Vec<&str> = pattern.split('/').collect();
        let last = segments.len() - 1;
        for (i, segment) in segments.iter().enumerate() {
            if segment.contains('#') && (*segment != "#" || i != last) {
                return Err(invalid("'#' must be the whole last segment"));
            }
            if segment.contains('+') && *segment != "+" {
                return Err(invalid("'+' must occupy a whole segment"));
            }
        }

        let depth = match segments.as_slice() {
            ["#"] => None,
            [prefix @ .., "#"] => Some(prefix.len()),
            _ => None,
        };

        Ok(Self {
            pattern: pattern.to_string(),
            depth,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn depth(&self) -> Option<usize> {
        self.depth
    }

    /// Проходит ли сообщение с полным путём `full_topic` ограничение глубины.
    pub fn admits(&self, full_topic: &str) -> bool {
        match self.depth {
            Some(depth) => segment_count(full_topic) <= depth + 1,
            None => true,
        }
    }
}

impl std::fmt::Display for SubscriptionFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.pattern)
    }
}
