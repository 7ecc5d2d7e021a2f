//! # Protocol Frames
//!
//! Defines the call envelope: a `Call` carries routing metadata and packed
//! arguments, a `Reply` carries a status code and a packed body.
//!
//! ## Invariants
//! - **Panic Safety**: All decoding paths return `Result`, never panicking on unknown data.
//! - **Forward Compatibility**: Unknown header fields are safely skipped.
//! - **Flag Validity**: A decoded call never carries both QUERY and UPDATE.

use orbpack::Decoder;
use orbpack::Encoder;

use crate::context::ObjectId;
use crate::error::Error;
use crate::error::Result;
use crate::flag::CallFlags;
use crate::status::Status;

/// Encodes an outbound Call frame.
pub struct CallEncoder<'a> {
    pub seq: u64,
    pub client: u64,
    pub target: ObjectId,
    pub method: &'a str,
    pub flags: CallFlags,
    pub credential: Option<&'a str>,
    pub args: &'a [u8],
}

impl<'a> CallEncoder<'a> {
    pub fn new(seq: u64, client: u64, target: ObjectId, method: &'a str, args: &'a [u8]) -> Self {
        Self { seq, client, target, method, flags: CallFlags::NONE, credential: None, args }
    }

    pub fn with_flags(mut self, flags: CallFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_credential(mut self, credential: Option<&'a str>) -> Self {
        self.credential = credential;
        self
    }

    /// Encode this call into the encoder.
    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        self.flags.validate()?;
        enc.variant("Call", |enc| {
            enc.map(|enc| {
                enc.variant("seq", |e| e.u64(self.seq))?;
                enc.variant("client", |e| e.u64(self.client))?;
                enc.variant("target", |e| e.u64(self.target.0))?;
                enc.variant("method", |e| e.str(self.method))?;
                enc.variant("flags", |e| e.u8(self.flags.bits()))?;
                if let Some(credential) = self.credential {
                    enc.variant("credential", |e| e.str(credential))?;
                }
                enc.variant("args", |e| e.bytes(self.args))?;
                Ok(())
            })
        })
    }

    /// Encode this call into a fresh buffer.
    pub fn into_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        self.encode(&mut enc)?;
        Ok(enc.into_bytes())
    }
}

/// Decodes an inbound Call frame.
#[derive(Debug)]
pub struct CallDecoder<'a> {
    pub seq: u64,
    pub client: u64,
    pub target: ObjectId,
    pub method: &'a str,
    pub flags: CallFlags,
    pub credential: Option<&'a str>,
    /// Packed argument tuple; decode with `unpack_exact` and a `DecodeContext`.
    pub args: &'a [u8],
}

impl<'a> CallDecoder<'a> {
    /// Decode the body of a Call frame.
    pub fn decode(mut dec: Decoder<'a>) -> Result<Self> {
        let mut map = dec.map()?;
        let mut seq = None;
        let mut client = None;
        let mut target = None;
        let mut method = None;
        let mut flags = None;
        let mut credential = None;
        let mut args = None;

        while let Some((key, mut val)) = map.next()? {
            match key {
                "seq" => seq = Some(val.u64()?),
                "client" => client = Some(val.u64()?),
                "target" => target = Some(ObjectId(val.u64()?)),
                "method" => method = Some(val.str()?),
                "flags" => flags = Some(CallFlags::from_bits(val.u8()?)?),
                "credential" => credential = Some(val.str()?),
                "args" => args = Some(val.bytes()?),
                _ => val.skip()?,
            }
            val.finish()?;
        }

        Ok(CallDecoder {
            seq: seq.ok_or(missing("seq"))?,
            client: client.ok_or(missing("client"))?,
            target: target.ok_or(missing("target"))?,
            method: method.ok_or(missing("method"))?,
            flags: flags.unwrap_or_default(),
            credential,
            args: args.ok_or(missing("args"))?,
        })
    }
}

/// Encodes an outbound Reply frame.
pub struct ReplyEncoder<'a> {
    pub seq: u64,
    pub status: Status,
    pub body: &'a [u8],
}

impl<'a> ReplyEncoder<'a> {
    /// A successful reply carrying a packed result.
    pub fn success(seq: u64, body: &'a [u8]) -> Self {
        Self { seq, status: Status::Success, body }
    }

    /// A failed reply; `message` is sent as the body.
    pub fn failure(seq: u64, status: Status, message: &'a str) -> Self {
        Self { seq, status, body: message.as_bytes() }
    }

    /// Encode this reply into the encoder.
    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.variant("Reply", |enc| {
            enc.map(|enc| {
                enc.variant("seq", |e| e.u64(self.seq))?;
                enc.variant("status", |e| e.u8(self.status.code()))?;
                enc.variant("body", |e| e.bytes(self.body))?;
                Ok(())
            })
        })
    }

    /// Encode this reply into a fresh buffer.
    pub fn into_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        self.encode(&mut enc)?;
        Ok(enc.into_bytes())
    }
}

/// Decodes an inbound Reply frame.
#[derive(Debug)]
pub struct ReplyDecoder<'a> {
    pub seq: u64,
    pub status: Status,
    pub body: &'a [u8],
}

impl<'a> ReplyDecoder<'a> {
    /// Decode the body of a Reply frame.
    pub fn decode(mut dec: Decoder<'a>) -> Result<Self> {
        let mut map = dec.map()?;
        let mut seq = None;
        let mut status = None;
        let mut body = None;

        while let Some((key, mut val)) = map.next()? {
            match key {
                "seq" => seq = Some(val.u64()?),
                "status" => status = Some(Status::from_u8(val.u8()?)?),
                "body" => body = Some(val.bytes()?),
                _ => val.skip()?,
            }
            val.finish()?;
        }

        Ok(ReplyDecoder {
            seq: seq.ok_or(missing("seq"))?,
            status: status.ok_or(missing("status"))?,
            body: body.ok_or(missing("body"))?,
        })
    }

    /// The failure message carried by a non-success reply.
    pub fn message(&self) -> String {
        String::from_utf8_lossy(self.body).into_owned()
    }
}

/// Top-level frame decoder.
#[derive(Debug)]
pub enum Frame<'a> {
    Call(CallDecoder<'a>),
    Reply(ReplyDecoder<'a>),
}

impl<'a> Frame<'a> {
    /// Decode a frame that must span the whole buffer.
    pub fn decode(bytes: &'a [u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes);
        let (msg_type, body) = dec.variant()?;
        dec.finish()?;
        match msg_type {
            "Call" => Ok(Frame::Call(CallDecoder::decode(body)?)),
            "Reply" => Ok(Frame::Reply(ReplyDecoder::decode(body)?)),
            _ => Err(Error::ProtocolViolation(format!("unknown top-level frame: {}", msg_type))),
        }
    }
}

/// Decodes just the sequence number from a raw frame.
/// This is useful for addressing an error reply when the full decoding fails.
pub fn decode_seq(bytes: &[u8]) -> Result<u64> {
    let mut dec = Decoder::new(bytes);
    let (_, mut body) = dec.variant()?;
    let mut map = body.map()?;

    while let Some((key, mut val)) = map.next()? {
        if key == "seq" {
            return Ok(val.u64()?);
        }
        val.skip()?;
    }

    Err(missing("seq"))
}

fn missing(field: &str) -> Error {
    Error::ProtocolViolation(format!("missing {}", field))
}
