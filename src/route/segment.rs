use std::collections::HashSet;
use std::fmt;

use crate::route::RouteError;

/// One segment of a route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// A literal segment, matched case-sensitively.
    Static(String),
    /// A named parameter consuming exactly one path segment.
    Param(String),
    /// A trailing named parameter consuming the remainder of the path.
    CatchAll(String),
}

impl Segment {
    pub fn is_catch_all(&self) -> bool {
        matches!(self, Segment::CatchAll(_))
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Static(literal) => write!(f, "{literal}"),
            Segment::Param(name) => write!(f, ":{name}"),
            Segment::CatchAll(name) => write!(f, "*{name}"),
        }
    }
}

/// Parses a route pattern like `/users/:id/items/*rest`.
///
/// Slash runs and trailing slashes are tolerated the same way request paths
/// tolerate them; the root pattern is the empty segment list.
pub(crate) fn parse_pattern(pattern: &str) -> Result<Vec<Segment>, RouteError> {
    let mut segments = Vec::new();
    let mut names = HashSet::new();

    for piece in pattern.split('/').filter(|piece| !piece.is_empty()) {
        if let Some(previous) = segments.last() {
            if matches!(previous, Segment::CatchAll(_)) {
                return Err(RouteError::CatchAllNotLast { pattern: pattern.to_string() });
            }
        }

        let segment = if let Some(name) = piece.strip_prefix(':') {
            Segment::Param(validate_name(pattern, name)?)
        } else if let Some(name) = piece.strip_prefix('*') {
            Segment::CatchAll(validate_name(pattern, name)?)
        } else {
            Segment::Static(piece.to_string())
        };

        if let Segment::Param(name) | Segment::CatchAll(name) = &segment {
            if !names.insert(name.clone()) {
                return Err(RouteError::DuplicateParamName { pattern: pattern.to_string(), name: name.clone() });
            }
        }

        segments.push(segment);
    }

    Ok(segments)
}

fn validate_name(pattern: &str, name: &str) -> Result<String, RouteError> {
    if name.is_empty() {
        return Err(RouteError::EmptyParamName { pattern: pattern.to_string() });
    }
    Ok(name.to_string())
}

/// Renders segments back into canonical pattern text.
pub(crate) fn pattern_text(segments: &[Segment]) -> String {
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut text = String::new();
    for segment in segments {
        text.push('/');
        text.push_str(&segment.to_string());
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_patterns() {
        let segments = parse_pattern("/users/:id/items/*rest").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Static("users".to_string()),
                Segment::Param("id".to_string()),
                Segment::Static("items".to_string()),
                Segment::CatchAll("rest".to_string()),
            ]
        );
    }

    #[test]
    fn root_is_the_empty_segment_list() {
        assert!(parse_pattern("/").unwrap().is_empty());
        assert!(parse_pattern("").unwrap().is_empty());
        assert!(parse_pattern("///").unwrap().is_empty());
    }

    #[test]
    fn catch_all_must_be_last() {
        assert!(matches!(
            parse_pattern("/files/*rest/meta"),
            Err(RouteError::CatchAllNotLast { .. })
        ));
    }

    #[test]
    fn parameter_names_must_be_unique_and_non_empty() {
        assert!(matches!(
            parse_pattern("/a/:x/b/:x"),
            Err(RouteError::DuplicateParamName { .. })
        ));
        assert!(matches!(
            parse_pattern("/a/:x/*x"),
            Err(RouteError::DuplicateParamName { .. })
        ));
        assert!(matches!(parse_pattern("/a/:"), Err(RouteError::EmptyParamName { .. })));
        assert!(matches!(parse_pattern("/a/*"), Err(RouteError::EmptyParamName { .. })));
    }

    #[test]
    fn pattern_text_round_trips() {
        for pattern in ["/", "/users/:id", "/files/*rest", "/a/b/c"] {
            let segments = parse_pattern(pattern).unwrap();
            assert_eq!(pattern_text(&segments), pattern);
        }
    }
}
