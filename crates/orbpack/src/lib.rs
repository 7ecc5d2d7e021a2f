//! # Orbpack
//!
//! A small, bounded binary codec used for call envelopes and their payloads.
//!
//! ## Format
//!
//! - **Scalars**: `[Tag: 1b][Data: N]`
//! - **Blobs**: `[Tag: 1b][Len: 4b][Data: Len]`
//! - **Containers**: `[Tag: 1b][Len: 4b][Body: Len]`
//!
//! All integers are little-endian. Every item is self-describing, so a reader
//! can skip fields it does not understand.
//!
//! Containers are written through closures. The closure receives the same
//! encoder, and the length header is back-patched when it returns, so a scope
//! can never be left open. Closures may return any error type that an
//! orbpack `Error` converts into, which lets higher layers write their own
//! values inside a container without re-wrapping errors.


/// Serialization and deserialization errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Byte does not correspond to a valid `Tag`.
    InvalidTag(u8),
    /// The next item has a different tag than the one requested.
    UnexpectedTag { expected: Tag, found: Tag },
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// Buffer exhausted while reading.
    UnexpectedEnd,
    /// Blob or container length exceeds `u32::MAX`.
    BlobTooLarge(usize),
    /// Containers nested deeper than `MAX_DEPTH`.
    TooDeep,
    /// Bytes were left over after a value that should have filled the buffer.
    TrailingBytes(usize),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidTag(b) => write!(f, "invalid tag byte: {:#04x}", b),
            Error::UnexpectedTag { expected, found } => {
                write!(f, "unexpected tag: expected {:?}, found {:?}", expected, found)
            }
            Error::InvalidUtf8 => write!(f, "string is not valid utf-8"),
            Error::UnexpectedEnd => write!(f, "unexpected end of buffer"),
            Error::BlobTooLarge(len) => write!(f, "blob of {} bytes exceeds u32 length", len),
            Error::TooDeep => write!(f, "containers nested deeper than {}", MAX_DEPTH),
            Error::TrailingBytes(n) => write!(f, "{} trailing bytes after value", n),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for orbpack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Maximum container nesting accepted by the encoder.
pub const MAX_DEPTH: usize = 64;

/// Identifies the type of the encoded value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Unit = 0x01,
    BoolTrue = 0x02,
    BoolFalse = 0x03,
    U8 = 0x04,
    U16 = 0x05,
    U32 = 0x06,
    U64 = 0x07,
    S32 = 0x08,
    S64 = 0x09,
    F64 = 0x0A,
    OptionNone = 0x0B,

    // Handle to an object living in a remote registry (u64 id).
    ObjectRef = 0x0C,

    // Blobs
    String = 0x10,
    Bytes = 0x11,

    // Containers
    List = 0x20,
    Map = 0x21,
    OptionSome = 0x30,
    Variant = 0x31,
}

impl Tag {
    /// Returns the tag for a given byte, or `None` if invalid.
    pub fn from_u8(b: u8) -> Option<Self> {
        let tag = match b {
            0x01 => Tag::Unit,
            0x02 => Tag::BoolTrue,
            0x03 => Tag::BoolFalse,
            0x04 => Tag::U8,
            0x05 => Tag::U16,
            0x06 => Tag::U32,
            0x07 => Tag::U64,
            0x08 => Tag::S32,
            0x09 => Tag::S64,
            0x0A => Tag::F64,
            0x0B => Tag::OptionNone,
            0x0C => Tag::ObjectRef,
            0x10 => Tag::String,
            0x11 => Tag::Bytes,
            0x20 => Tag::List,
            0x21 => Tag::Map,
            0x30 => Tag::OptionSome,
            0x31 => Tag::Variant,
            _ => return None,
        };
        Some(tag)
    }

    /// Width of the fixed payload following the tag, or `None` for
    /// length-prefixed items.
    fn fixed_width(self) -> Option<usize> {
        match self {
            Tag::Unit | Tag::BoolTrue | Tag::BoolFalse | Tag::OptionNone => Some(0),
            Tag::U8 => Some(1),
            Tag::U16 => Some(2),
            Tag::U32 | Tag::S32 => Some(4),
            Tag::U64 | Tag::S64 | Tag::F64 | Tag::ObjectRef => Some(8),
            Tag::String | Tag::Bytes | Tag::List | Tag::Map | Tag::OptionSome | Tag::Variant => None,
        }
    }
}

/// An append-only encoder.
///
/// Scalars are written directly. Containers take a closure that writes the
/// body; the length header is patched after the closure returns.
pub struct Encoder {
    buf: Vec<u8>,
    depth: usize,
}

impl Encoder {
    /// Creates a new encoder with a small initial capacity.
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(256), depth: 0 }
    }

    /// Consumes the encoder and returns the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Returns a view of the bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    fn tag(&mut self, tag: Tag) {
        self.buf.push(tag as u8);
    }

    fn len_prefix(&mut self, len: usize) -> Result<()> {
        if len > u32::MAX as usize {
            return Err(Error::BlobTooLarge(len));
        }
        self.buf.extend_from_slice(&(len as u32).to_le_bytes());
        Ok(())
    }

    fn scope<F, E>(&mut self, tag: Tag, body: F) -> std::result::Result<(), E>
    where
        F: FnOnce(&mut Encoder) -> std::result::Result<(), E>,
        E: From<Error>,
    {
        if self.depth >= MAX_DEPTH {
            return Err(Error::TooDeep.into());
        }
        self.tag(tag);
        let len_pos = self.buf.len();
        self.buf.extend_from_slice(&[0, 0, 0, 0]);

        self.depth += 1;
        let written = body(self);
        self.depth -= 1;
        written?;

        let body_len = self.buf.len() - len_pos - 4;
        if body_len > u32::MAX as usize {
            return Err(Error::BlobTooLarge(body_len).into());
        }
        self.buf[len_pos..len_pos + 4].copy_from_slice(&(body_len as u32).to_le_bytes());
        Ok(())
    }

    pub fn unit(&mut self) -> Result<()> { self.tag(Tag::Unit); Ok(()) }

    pub fn bool(&mut self, v: bool) -> Result<()> {
        self.tag(if v { Tag::BoolTrue } else { Tag::BoolFalse });
        Ok(())
    }

    pub fn u8(&mut self, v: u8) -> Result<()> { self.tag(Tag::U8); self.buf.push(v); Ok(()) }
    pub fn u16(&mut self, v: u16) -> Result<()> { self.tag(Tag::U16); self.buf.extend_from_slice(&v.to_le_bytes()); Ok(()) }
    pub fn u32(&mut self, v: u32) -> Result<()> { self.tag(Tag::U32); self.buf.extend_from_slice(&v.to_le_bytes()); Ok(()) }
    pub fn u64(&mut self, v: u64) -> Result<()> { self.tag(Tag::U64); self.buf.extend_from_slice(&v.to_le_bytes()); Ok(()) }
    pub fn s32(&mut self, v: i32) -> Result<()> { self.tag(Tag::S32); self.buf.extend_from_slice(&v.to_le_bytes()); Ok(()) }
    pub fn s64(&mut self, v: i64) -> Result<()> { self.tag(Tag::S64); self.buf.extend_from_slice(&v.to_le_bytes()); Ok(()) }
    pub fn f64(&mut self, v: f64) -> Result<()> { self.tag(Tag::F64); self.buf.extend_from_slice(&v.to_le_bytes()); Ok(()) }

    /// Encodes a handle to a remote object.
    pub fn object_ref(&mut self, id: u64) -> Result<()> {
        self.tag(Tag::ObjectRef);
        self.buf.extend_from_slice(&id.to_le_bytes());
        Ok(())
    }

    /// Encodes a UTF-8 string blob.
    pub fn str(&mut self, v: &str) -> Result<()> {
        self.tag(Tag::String);
        self.len_prefix(v.len())?;
        self.buf.extend_from_slice(v.as_bytes());
        Ok(())
    }

    /// Encodes a raw byte blob.
    pub fn bytes(&mut self, v: &[u8]) -> Result<()> {
        self.tag(Tag::Bytes);
        self.len_prefix(v.len())?;
        self.buf.extend_from_slice(v);
        Ok(())
    }

    /// Encodes `Option::None`.
    pub fn none(&mut self) -> Result<()> { self.tag(Tag::OptionNone); Ok(()) }

    /// Encodes `Option::Some` with the payload written by `body`.
    pub fn some<F, E>(&mut self, body: F) -> std::result::Result<(), E>
    where
        F: FnOnce(&mut Encoder) -> std::result::Result<(), E>,
        E: From<Error>,
    {
        self.scope(Tag::OptionSome, body)
    }

    /// Encodes a list; `body` writes any number of items.
    pub fn list<F, E>(&mut self, body: F) -> std::result::Result<(), E>
    where
        F: FnOnce(&mut Encoder) -> std::result::Result<(), E>,
        E: From<Error>,
    {
        self.scope(Tag::List, body)
    }

    /// Encodes a map; `body` must only write entries via `variant`.
    pub fn map<F, E>(&mut self, body: F) -> std::result::Result<(), E>
    where
        F: FnOnce(&mut Encoder) -> std::result::Result<(), E>,
        E: From<Error>,
    {
        self.scope(Tag::Map, body)
    }

    /// Encodes a named payload. Inside a map this is a key/value entry.
    pub fn variant<F, E>(&mut self, name: &str, body: F) -> std::result::Result<(), E>
    where
        F: FnOnce(&mut Encoder) -> std::result::Result<(), E>,
        E: From<Error>,
    {
        self.scope(Tag::Variant, |enc| {
            enc.str(name)?;
            body(enc)
        })
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// A zero-copy, bounds-checked cursor over a byte slice.
///
/// Reading advances the cursor. Container reads return new decoders
/// restricted to the container's body.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Fails unless every byte has been consumed.
    pub fn finish(&self) -> Result<()> {
        match self.buf.len() {
            0 => Ok(()),
            n => Err(Error::TrailingBytes(n)),
        }
    }

    /// Peeks the next tag without advancing.
    pub fn peek_tag(&self) -> Result<Tag> {
        let b = *self.buf.first().ok_or(Error::UnexpectedEnd)?;
        Tag::from_u8(b).ok_or(Error::InvalidTag(b))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() {
            return Err(Error::UnexpectedEnd);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn expect(&mut self, expected: Tag) -> Result<()> {
        let found = self.peek_tag()?;
        if found != expected {
            return Err(Error::UnexpectedTag { expected, found });
        }
        self.take(1)?;
        Ok(())
    }

    fn take_len(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.take_array()?) as usize)
    }

    fn enter(&mut self, expected: Tag) -> Result<Decoder<'a>> {
        self.expect(expected)?;
        let len = self.take_len()?;
        Ok(Decoder::new(self.take(len)?))
    }

    /// Skips the next item including any nested children.
    pub fn skip(&mut self) -> Result<()> {
        let tag = self.peek_tag()?;
        self.take(1)?;
        match tag.fixed_width() {
            Some(width) => { self.take(width)?; }
            None => {
                let len = self.take_len()?;
                self.take(len)?;
            }
        }
        Ok(())
    }

    pub fn unit(&mut self) -> Result<()> { self.expect(Tag::Unit) }

    pub fn bool(&mut self) -> Result<bool> {
        match self.peek_tag()? {
            Tag::BoolTrue => { self.take(1)?; Ok(true) }
            Tag::BoolFalse => { self.take(1)?; Ok(false) }
            found => Err(Error::UnexpectedTag { expected: Tag::BoolTrue, found }),
        }
    }

    pub fn u8(&mut self) -> Result<u8> { self.expect(Tag::U8)?; Ok(self.take(1)?[0]) }
    pub fn u16(&mut self) -> Result<u16> { self.expect(Tag::U16)?; Ok(u16::from_le_bytes(self.take_array()?)) }
    pub fn u32(&mut self) -> Result<u32> { self.expect(Tag::U32)?; Ok(u32::from_le_bytes(self.take_array()?)) }
    pub fn u64(&mut self) -> Result<u64> { self.expect(Tag::U64)?; Ok(u64::from_le_bytes(self.take_array()?)) }
    pub fn s32(&mut self) -> Result<i32> { self.expect(Tag::S32)?; Ok(i32::from_le_bytes(self.take_array()?)) }
    pub fn s64(&mut self) -> Result<i64> { self.expect(Tag::S64)?; Ok(i64::from_le_bytes(self.take_array()?)) }
    pub fn f64(&mut self) -> Result<f64> { self.expect(Tag::F64)?; Ok(f64::from_le_bytes(self.take_array()?)) }

    /// Decodes a remote object handle and returns its id.
    pub fn object_ref(&mut self) -> Result<u64> {
        self.expect(Tag::ObjectRef)?;
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    /// Decodes a string slice (UTF-8).
    pub fn str(&mut self) -> Result<&'a str> {
        self.expect(Tag::String)?;
        let len = self.take_len()?;
        std::str::from_utf8(self.take(len)?).map_err(|_| Error::InvalidUtf8)
    }

    /// Decodes a byte slice.
    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        self.expect(Tag::Bytes)?;
        let len = self.take_len()?;
        self.take(len)
    }

    /// Decodes an option, returning a decoder over the payload if present.
    pub fn option(&mut self) -> Result<Option<Decoder<'a>>> {
        match self.peek_tag()? {
            Tag::OptionNone => { self.take(1)?; Ok(None) }
            Tag::OptionSome => Ok(Some(self.enter(Tag::OptionSome)?)),
            found => Err(Error::UnexpectedTag { expected: Tag::OptionSome, found }),
        }
    }

    /// Decodes a list into an iterator of item decoders.
    pub fn list(&mut self) -> Result<ListIter<'a>> {
        Ok(ListIter { dec: self.enter(Tag::List)? })
    }

    /// Decodes a map into an iterator of `(key, value)` pairs.
    pub fn map(&mut self) -> Result<MapIter<'a>> {
        Ok(MapIter { dec: self.enter(Tag::Map)? })
    }

    /// Decodes a variant, returning `(name, payload decoder)`.
    pub fn variant(&mut self) -> Result<(&'a str, Decoder<'a>)> {
        let mut inner = self.enter(Tag::Variant)?;
        let name = inner.str()?;
        Ok((name, inner))
    }
}

/// Iterator over the items of a list.
#[derive(Debug)]
pub struct ListIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> ListIter<'a> {
    /// Returns a decoder for the next item, `Ok(None)` at the end.
    pub fn next(&mut self) -> Result<Option<Decoder<'a>>> {
        if self.dec.remaining() == 0 {
            return Ok(None);
        }
        let mut probe = self.dec.clone();
        probe.skip()?;
        let len = self.dec.remaining() - probe.remaining();
        Ok(Some(Decoder::new(self.dec.take(len)?)))
    }
}

/// Iterator over the entries of a map.
#[derive(Debug)]
pub struct MapIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> MapIter<'a> {
    /// Returns `(key, value decoder)` for the next entry, `Ok(None)` at the end.
    pub fn next(&mut self) -> Result<Option<(&'a str, Decoder<'a>)>> {
        if self.dec.remaining() == 0 {
            return Ok(None);
        }
        self.dec.variant().map(Some)
    }
}
