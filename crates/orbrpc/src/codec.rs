//! # Codec
//!
//! The contract between typed proxies, dispatch tables and the wire. A type
//! that implements `Pack` can be sent as an argument or result; a type that
//! implements `Unpack` can be received. Method arguments travel as a single
//! tuple, results as a single value.
//!
//! ## Invariants
//! - Decoding verifies wire tags against the requested type.
//! - `unpack_exact` rejects trailing bytes, so a payload has exactly one reading.

use orbpack::Decoder;
use orbpack::Encoder;

use crate::context::DecodeContext;
use crate::error::Error;
use crate::error::Result;

/// A value that can be written into an envelope payload.
pub trait Pack {
    fn pack(&self, enc: &mut Encoder) -> Result<()>;
}

/// A value that can be read from an envelope payload.
pub trait Unpack: Sized {
    fn unpack(dec: &mut Decoder<'_>, cx: &DecodeContext<'_>) -> Result<Self>;
}

/// Packs a single value into a fresh buffer.
pub fn pack_to_vec<T: Pack + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut enc = Encoder::new();
    value.pack(&mut enc)?;
    Ok(enc.into_bytes())
}

/// Unpacks a single value that must span the whole buffer.
pub fn unpack_exact<T: Unpack>(bytes: &[u8], cx: &DecodeContext<'_>) -> Result<T> {
    let mut dec = Decoder::new(bytes);
    let value = T::unpack(&mut dec, cx)?;
    dec.finish()?;
    Ok(value)
}

macro_rules! scalar_impl {
    ($ty:ty, $method:ident) => {
        impl Pack for $ty {
            fn pack(&self, enc: &mut Encoder) -> Result<()> {
                Ok(enc.$method(*self)?)
            }
        }

        impl Unpack for $ty {
            fn unpack(dec: &mut Decoder<'_>, _cx: &DecodeContext<'_>) -> Result<Self> {
                Ok(dec.$method()?)
            }
        }
    };
}

scalar_impl!(bool, bool);
scalar_impl!(u8, u8);
scalar_impl!(u16, u16);
scalar_impl!(u32, u32);
scalar_impl!(u64, u64);
scalar_impl!(i32, s32);
scalar_impl!(i64, s64);
scalar_impl!(f64, f64);

impl Pack for () {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        Ok(enc.unit()?)
    }
}

impl Unpack for () {
    fn unpack(dec: &mut Decoder<'_>, _cx: &DecodeContext<'_>) -> Result<Self> {
        Ok(dec.unit()?)
    }
}

impl Pack for str {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        Ok(enc.str(self)?)
    }
}

impl Pack for String {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        Ok(enc.str(self)?)
    }
}

impl Unpack for String {
    fn unpack(dec: &mut Decoder<'_>, _cx: &DecodeContext<'_>) -> Result<Self> {
        Ok(dec.str()?.to_string())
    }
}

impl<T: Pack + ?Sized> Pack for &T {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        (**self).pack(enc)
    }
}

impl<T: Pack> Pack for [T] {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.list(|enc| {
            for item in self {
                item.pack(enc)?;
            }
            Ok(())
        })
    }
}

impl<T: Pack> Pack for Vec<T> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        self.as_slice().pack(enc)
    }
}

impl<T: Unpack> Unpack for Vec<T> {
    fn unpack(dec: &mut Decoder<'_>, cx: &DecodeContext<'_>) -> Result<Self> {
        let mut iter = dec.list()?;
        let mut items = Vec::new();
        while let Some(mut item) = iter.next()? {
            items.push(T::unpack(&mut item, cx)?);
            item.finish()?;
        }
        Ok(items)
    }
}

impl<T: Pack> Pack for Option<T> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        match self {
            None => Ok(enc.none()?),
            Some(value) => enc.some(|enc| value.pack(enc)),
        }
    }
}

impl<T: Unpack> Unpack for Option<T> {
    fn unpack(dec: &mut Decoder<'_>, cx: &DecodeContext<'_>) -> Result<Self> {
        match dec.option()? {
            None => Ok(None),
            Some(mut inner) => {
                let value = T::unpack(&mut inner, cx)?;
                inner.finish()?;
                Ok(Some(value))
            }
        }
    }
}

macro_rules! tuple_impl {
    ($($ty:ident $var:ident),+) => {
        impl<$($ty: Pack),+> Pack for ($($ty,)+) {
            fn pack(&self, enc: &mut Encoder) -> Result<()> {
                let ($($var,)+) = self;
                enc.list(|enc| {
                    $( $var.pack(enc)?; )+
                    Ok(())
                })
            }
        }

        impl<$($ty: Unpack),+> Unpack for ($($ty,)+) {
            fn unpack(dec: &mut Decoder<'_>, cx: &DecodeContext<'_>) -> Result<Self> {
                let mut iter = dec.list()?;
                $(
                    let $var = {
                        let mut item = iter.next()?
                            .ok_or_else(|| Error::ProtocolViolation("fewer items than tuple arity".into()))?;
                        let value = $ty::unpack(&mut item, cx)?;
                        item.finish()?;
                        value
                    };
                )+
                if iter.next()?.is_some() {
                    return Err(Error::ProtocolViolation("more items than tuple arity".into()));
                }
                Ok(($($var,)+))
            }
        }
    };
}

tuple_impl!(A a);
tuple_impl!(A a, B b);
tuple_impl!(A a, B b, C c);
tuple_impl!(A a, B b, C c, D d);
