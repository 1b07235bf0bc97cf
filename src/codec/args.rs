//! Positional argument lists.
//!
//! Calls carry a heterogeneous argument sequence on the wire. These traits
//! turn a typed tuple into consecutive packed values and back, one trait
//! impl per tuple arity (0 through 8).

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Packer, Unpacker};
use crate::error::CodecError;

/// An argument list that can be appended to a [`Packer`], one top-level
/// value per element.
pub trait PackArgs {
    fn pack_into(&self, packer: &mut Packer) -> Result<(), CodecError>;
}

/// An argument list decodable from an [`Unpacker`], one top-level value per
/// element, in order. Element types must be owned, deserializable values;
/// reference and pointer types do not satisfy the bound, which rejects them
/// at registration time.
pub trait UnpackArgs: Sized {
    fn unpack_from(unpacker: &mut Unpacker<'_>) -> Result<Self, CodecError>;

    /// Element type names for method listings (`["i32", "String"]`).
    fn type_names() -> Vec<String>;
}

macro_rules! impl_args {
    ($($ty:ident),*) => {
        #[allow(non_snake_case)]
        impl<$($ty: Serialize),*> PackArgs for ($($ty,)*) {
            fn pack_into(&self, _packer: &mut Packer) -> Result<(), CodecError> {
                let ($($ty,)*) = self;
                $(_packer.pack($ty)?;)*
                Ok(())
            }
        }

        impl<$($ty: DeserializeOwned),*> UnpackArgs for ($($ty,)*) {
            fn unpack_from(_unpacker: &mut Unpacker<'_>) -> Result<Self, CodecError> {
                Ok(($(_unpacker.unpack::<$ty>()?,)*))
            }

            fn type_names() -> Vec<String> {
                vec![$(short_type_name(std::any::type_name::<$ty>())),*]
            }
        }
    };
}

impl_args!();
impl_args!(A0);
impl_args!(A0, A1);
impl_args!(A0, A1, A2);
impl_args!(A0, A1, A2, A3);
impl_args!(A0, A1, A2, A3, A4);
impl_args!(A0, A1, A2, A3, A4, A5);
impl_args!(A0, A1, A2, A3, A4, A5, A6);
impl_args!(A0, A1, A2, A3, A4, A5, A6, A7);

/// Strip module paths from a `std::any::type_name` rendering:
/// `alloc::vec::Vec<alloc::string::String>` becomes `Vec<String>`.
pub(crate) fn short_type_name(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut ident = String::new();
    let mut chars = full.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_alphanumeric() || c == '_' {
            ident.push(c);
        } else if c == ':' && chars.peek() == Some(&':') {
            chars.next();
            ident.clear();
        } else {
            out.push_str(&ident);
            ident.clear();
            out.push(c);
        }
    }
    out.push_str(&ident);
    out
}

/// `fn(i32, String) -> bool` style rendering for method listings.
pub(crate) fn render_signature(params: &[String], ret: &str) -> String {
    format!("fn({}) -> {}", params.join(", "), ret)
}
