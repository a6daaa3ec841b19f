use std::fmt;

use crate::protocol::HttpError;

/// An HTTP version as it appears on the request line.
///
/// Any decimal `major.minor` pair parses; whether the version is acceptable
/// is the exchange's policy decision, not the parser's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HttpVersion {
    major: u8,
    minor: u8,
}

impl HttpVersion {
    pub const HTTP_10: HttpVersion = HttpVersion { major: 1, minor: 0 };
    pub const HTTP_11: HttpVersion = HttpVersion { major: 1, minor: 1 };

    pub fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Parses an `HTTP/<major>.<minor>` token.
    pub fn parse(token: &str) -> Result<Self, HttpError> {
        let digits = token.strip_prefix("HTTP/").ok_or_else(|| HttpError::version_parse(token))?;
        let (major, minor) = digits.split_once('.').ok_or_else(|| HttpError::version_parse(token))?;
        if major.is_empty() || minor.is_empty() || major.len() > 3 || minor.len() > 3 {
            return Err(HttpError::version_parse(token));
        }
        let major = major.parse::<u8>().map_err(|_| HttpError::version_parse(token))?;
        let minor = minor.parse::<u8>().map_err(|_| HttpError::version_parse(token))?;
        Ok(Self { major, minor })
    }

    pub fn major(&self) -> u8 {
        self.major
    }

    pub fn minor(&self) -> u8 {
        self.minor
    }

    pub fn is_1_0(&self) -> bool {
        *self == Self::HTTP_10
    }

    /// Whether this version is at least 1.1 (interim responses supported).
    pub fn supports_interim(&self) -> bool {
        *self >= Self::HTTP_11
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_versions() {
        assert_eq!(HttpVersion::parse("HTTP/1.1").unwrap(), HttpVersion::HTTP_11);
        assert_eq!(HttpVersion::parse("HTTP/1.0").unwrap(), HttpVersion::HTTP_10);
        assert_eq!(HttpVersion::parse("HTTP/0.9").unwrap(), HttpVersion::new(0, 9));
        assert_eq!(HttpVersion::parse("HTTP/2.0").unwrap(), HttpVersion::new(2, 0));
    }

    #[test]
    fn rejects_malformed_tokens() {
        for token in ["HTTP/1", "HTTP/1.", "HTTP/.1", "HTTP/one.one", "http/1.1", "HTTP/1.1.1", "1.1", ""] {
            assert!(
                matches!(HttpVersion::parse(token), Err(HttpError::VersionParse { .. })),
                "token {token:?} must not parse"
            );
        }
    }

    #[test]
    fn ordering_reflects_capability() {
        assert!(HttpVersion::HTTP_11.supports_interim());
        assert!(!HttpVersion::HTTP_10.supports_interim());
        assert!(HttpVersion::new(0, 9) < HttpVersion::HTTP_10);
        assert!(HttpVersion::new(2, 0) > HttpVersion::HTTP_11);
    }
}
