//! Media-type matching for handler selection.
//!
//! A handler declares what it consumes and produces as [`MediaRange`]s; the
//! client states its preferences through `Accept`. Selection ranks candidate
//! handlers by the specificity of the accept entry that covers them (an
//! exact type beats `text/*` beats `*/*`) and breaks ties with the client's
//! q-values.

use http::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use mime::Mime;

use crate::protocol::HttpError;

/// A media range: a concrete type or a wildcard pattern, parameters ignored
/// for matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRange {
    mime: Mime,
}

impl MediaRange {
    pub fn new(mime: Mime) -> Self {
        Self { mime }
    }

    pub fn parse(value: &str) -> Result<Self, HttpError> {
        value
            .trim()
            .parse::<Mime>()
            .map(Self::new)
            .map_err(|e| HttpError::media_type_parse(format!("{value:?}: {e}")))
    }

    pub fn mime(&self) -> &Mime {
        &self.mime
    }

    /// Whether this range covers the given concrete media type.
    pub fn covers(&self, candidate: &Mime) -> bool {
        (self.mime.type_() == mime::STAR || self.mime.type_() == candidate.type_())
            && (self.mime.subtype() == mime::STAR || self.mime.subtype() == candidate.subtype())
    }

    /// Whether this range and another range can describe a common media
    /// type (wildcards on either side).
    pub fn compatible(&self, other: &MediaRange) -> bool {
        let type_match = self.mime.type_() == mime::STAR
            || other.mime.type_() == mime::STAR
            || self.mime.type_() == other.mime.type_();
        let subtype_match = self.mime.subtype() == mime::STAR
            || other.mime.subtype() == mime::STAR
            || self.mime.subtype() == other.mime.subtype();
        type_match && subtype_match
    }

    /// How specific this range is: exact beats a subtype wildcard beats a
    /// type wildcard beats `*/*`.
    pub fn specificity(&self) -> u8 {
        match (self.mime.type_() == mime::STAR, self.mime.subtype() == mime::STAR) {
            (false, false) => 3,
            (false, true) => 2,
            (true, false) => 1,
            (true, true) => 0,
        }
    }
}

impl From<Mime> for MediaRange {
    fn from(mime: Mime) -> Self {
        Self::new(mime)
    }
}

/// One entry of a parsed `Accept` header, quality in per-mille.
#[derive(Debug, Clone)]
pub struct AcceptEntry {
    range: MediaRange,
    q: u16,
}

impl AcceptEntry {
    pub fn range(&self) -> &MediaRange {
        &self.range
    }

    /// Quality value scaled to `0..=1000`.
    pub fn quality(&self) -> u16 {
        self.q
    }
}

/// Parses the request's `Content-Type`, `None` when absent.
pub fn parse_content_type(headers: &HeaderMap) -> Result<Option<Mime>, HttpError> {
    let value = match headers.get(CONTENT_TYPE) {
        Some(value) => value,
        None => return Ok(None),
    };
    let text = value
        .to_str()
        .map_err(|_| HttpError::media_type_parse("content-type is not visible ascii"))?;
    let mime = text
        .trim()
        .parse::<Mime>()
        .map_err(|e| HttpError::media_type_parse(format!("{text:?}: {e}")))?;
    Ok(Some(mime))
}

/// Parses every `Accept` header value into an ordered entry list. An absent
/// header behaves as `*/*`.
pub fn parse_accept(headers: &HeaderMap) -> Result<Vec<AcceptEntry>, HttpError> {
    let mut entries = Vec::new();

    for value in headers.get_all(ACCEPT) {
        let text = value
            .to_str()
            .map_err(|_| HttpError::media_type_parse("accept is not visible ascii"))?;
        for piece in text.split(',') {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            let mime = piece
                .parse::<Mime>()
                .map_err(|e| HttpError::media_type_parse(format!("{piece:?}: {e}")))?;
            let q = parse_quality(&mime)?;
            entries.push(AcceptEntry { range: MediaRange::new(mime), q });
        }
    }

    if entries.is_empty() {
        entries.push(AcceptEntry { range: MediaRange::new(mime::STAR_STAR), q: 1000 });
    }
    Ok(entries)
}

fn parse_quality(mime: &Mime) -> Result<u16, HttpError> {
    let value = match mime.get_param("q") {
        Some(value) => value,
        None => return Ok(1000),
    };
    let q = value
        .as_str()
        .parse::<f32>()
        .map_err(|_| HttpError::media_type_parse(format!("bad quality value {:?}", value.as_str())))?;
    if !(0.0..=1.0).contains(&q) {
        return Err(HttpError::media_type_parse(format!("quality {q} out of range")));
    }
    Ok((q * 1000.0).round() as u16)
}
