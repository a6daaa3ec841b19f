use bytes::Bytes;

/// A decoded or to-be-encoded HTTP message part: a head or a payload item.
///
/// The generic parameter `T` is the head type (request head on the read
/// side, response head plus payload size on the write side).
pub enum Message<T> {
    /// The head of the message.
    Header(T),
    /// A chunk of payload data or the end-of-payload marker.
    Payload(PayloadItem),
}

/// One item of a message payload stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem {
    /// A chunk of payload bytes.
    Chunk(Bytes),
    /// End of the payload stream.
    Eof,
}

/// How large a message payload is, as declared by its head.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    /// Payload of a known length in bytes, greater than zero.
    Length(u64),
    /// Payload whose length is not known up front; delimited by the end of
    /// the stream.
    Unknown,
    /// No payload.
    Empty,
}

impl PayloadSize {
    pub fn from_content_length(length: u64) -> Self {
        match length {
            0 => PayloadSize::Empty,
            n => PayloadSize::Length(n),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, PayloadSize::Empty)
    }

    /// The exact length, when known.
    pub fn exact(&self) -> Option<u64> {
        match self {
            PayloadSize::Length(n) => Some(*n),
            PayloadSize::Empty => Some(0),
            PayloadSize::Unknown => None,
        }
    }
}

impl<T> Message<T> {
    #[inline]
    pub fn is_header(&self) -> bool {
        matches!(self, Message::Header(_))
    }

    #[inline]
    pub fn is_payload(&self) -> bool {
        matches!(self, Message::Payload(_))
    }
}

impl PayloadItem {
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, PayloadItem::Eof)
    }

    #[inline]
    pub fn is_chunk(&self) -> bool {
        matches!(self, PayloadItem::Chunk(_))
    }

    /// The contained bytes, when this is a chunk.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }

    /// Consumes the item, returning the contained bytes when this is a
    /// chunk.
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }
}

impl From<Bytes> for PayloadItem {
    fn from(bytes: Bytes) -> Self {
        PayloadItem::Chunk(bytes)
    }
}
