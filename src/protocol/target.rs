//! The request target: path normalisation and query parsing.
//!
//! The target arrives as an opaque string on the request line. Before route
//! lookup the path component is normalised: slash runs collapse, trailing
//! slashes go, dot segments resolve (`.` removed, `..` pops, underflow
//! discarded), and each segment is percent-decoded as UTF-8 with `+` kept
//! literal. Both the raw and the decoded form of every segment survive, so
//! catch-all parameters can preserve the client's encoding.

/// One normalised path segment, in raw (still percent-encoded) and decoded
/// form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSegment {
    raw: String,
    decoded: String,
}

impl TargetSegment {
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn decoded(&self) -> &str {
        &self.decoded
    }
}

/// One query parameter, raw and decoded. A key without `=` has an empty
/// value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParam {
    name_raw: String,
    name: String,
    value_raw: String,
    value: String,
}

impl QueryParam {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_raw(&self) -> &str {
        &self.name_raw
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn value_raw(&self) -> &str {
        &self.value_raw
    }
}

/// A parsed request target: the normalised path plus the ordered query
/// multi-map.
#[derive(Debug, Clone)]
pub struct RequestTarget {
    raw: String,
    path: String,
    segments: Vec<TargetSegment>,
    query: Vec<QueryParam>,
}

impl RequestTarget {
    pub fn parse(target: &str) -> Self {
        let (path_part, query_part) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (target, None),
        };

        let segments = normalize_path(path_part);
        let path = display_path(&segments);
        let query = query_part.map(parse_query).unwrap_or_default();

        Self { raw: target.to_string(), path, segments, query }
    }

    /// The target exactly as it appeared on the request line.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The normalised, decoded path (always starts with `/`).
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn segments(&self) -> &[TargetSegment] {
        &self.segments
    }

    pub fn query(&self) -> &[QueryParam] {
        &self.query
    }

    /// First decoded value for the given decoded key.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.iter().find(|p| p.name == name).map(|p| p.value.as_str())
    }

    /// All decoded values for the given decoded key, in order of appearance.
    pub fn query_params(&self, name: &str) -> Vec<&str> {
        self.query.iter().filter(|p| p.name == name).map(|p| p.value.as_str()).collect()
    }
}

fn normalize_path(path: &str) -> Vec<TargetSegment> {
    let mut raw_segments: Vec<&str> = Vec::new();

    // empty pieces drop out, which collapses slash runs and strips leading
    // and trailing slashes in one pass
    for piece in path.split('/') {
        match piece {
            "" | "." => {}
            ".." => {
                // underflow discards the ".."
                raw_segments.pop();
            }
            segment => raw_segments.push(segment),
        }
    }

    raw_segments
        .into_iter()
        .map(|raw| TargetSegment { raw: raw.to_string(), decoded: percent_decode(raw) })
        .collect()
}

fn display_path(segments: &[TargetSegment]) -> String {
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut path = String::new();
    for segment in segments {
        path.push('/');
        path.push_str(&segment.decoded);
    }
    path
}

fn parse_query(query: &str) -> Vec<QueryParam> {
    if query.is_empty() {
        return Vec::new();
    }

    query
        .split('&')
        .filter(|piece| !piece.is_empty())
        .map(|piece| {
            let (name_raw, value_raw) = piece.split_once('=').unwrap_or((piece, ""));
            QueryParam {
                name: percent_decode(name_raw),
                name_raw: name_raw.to_string(),
                value: percent_decode(value_raw),
                value_raw: value_raw.to_string(),
            }
        })
        .collect()
}

/// Percent-decodes a string as UTF-8. `+` stays literal and invalid escapes
/// or invalid UTF-8 are kept as-is rather than failing the whole path.
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());

    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (hex_digit(bytes.get(i + 1)), hex_digit(bytes.get(i + 2))) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(byte: Option<&u8>) -> Option<u8> {
    byte.and_then(|b| (*b as char).to_digit(16)).map(|d| d as u8)
}
