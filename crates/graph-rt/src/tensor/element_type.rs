//! Scalar element types and the process-wide registry that names them.
//!
//! The registry is built once on first lookup and never mutated afterwards, so lookups are
//! safe from any thread without synchronization beyond the lazy initializer.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::backend::hashing::fnv1a_hash;
use crate::error::{Error, Result};

/// Describes the storage layout of one scalar element.
///
/// Two element types with the same canonical name are interchangeable; the registry hands out
/// exactly one descriptor per name.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementType {
    bit_width: u16,
    is_float: bool,
    is_signed: bool,
    canonical_name: &'static str,
    native_name: &'static str,
}

impl ElementType {
    pub const BOOLEAN: ElementType = ElementType::define(8, false, true, "boolean", "char");
    pub const F32: ElementType = ElementType::define(32, true, true, "f32", "float");
    pub const F64: ElementType = ElementType::define(64, true, true, "f64", "double");
    pub const I8: ElementType = ElementType::define(8, false, true, "i8", "int8_t");
    pub const I16: ElementType = ElementType::define(16, false, true, "i16", "int16_t");
    pub const I32: ElementType = ElementType::define(32, false, true, "i32", "int32_t");
    pub const I64: ElementType = ElementType::define(64, false, true, "i64", "int64_t");
    pub const U8: ElementType = ElementType::define(8, false, false, "u8", "uint8_t");
    pub const U16: ElementType = ElementType::define(16, false, false, "u16", "uint16_t");
    pub const U32: ElementType = ElementType::define(32, false, false, "u32", "uint32_t");
    pub const U64: ElementType = ElementType::define(64, false, false, "u64", "uint64_t");

    const fn define(
        bit_width: u16,
        is_float: bool,
        is_signed: bool,
        canonical_name: &'static str,
        native_name: &'static str,
    ) -> Self {
        assert!(bit_width > 0 && bit_width % 8 == 0);
        ElementType {
            bit_width,
            is_float,
            is_signed,
            canonical_name,
            native_name,
        }
    }

    pub fn bit_width(self) -> usize {
        usize::from(self.bit_width)
    }

    pub fn is_float(self) -> bool {
        self.is_float
    }

    pub fn is_signed(self) -> bool {
        self.is_signed
    }

    /// Registry key, e.g. `"f32"`.
    pub fn canonical_name(self) -> &'static str {
        self.canonical_name
    }

    /// C spelling of the type, e.g. `"float"` or `"uint32_t"`.
    pub fn native_name(self) -> &'static str {
        self.native_name
    }

    /// Returns the number of bytes one element occupies.
    pub fn size_in_bytes(self) -> usize {
        self.bit_width() / 8
    }

    /// Hash of the canonical name that is identical across process runs.
    ///
    /// `std::hash::Hash` uses a randomly keyed hasher, so cache keys that outlive the process
    /// must use this instead.
    pub fn stable_hash(self) -> u64 {
        fnv1a_hash(self.canonical_name.as_bytes())
    }
}

impl fmt::Debug for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name)
    }
}

impl Serialize for ElementType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.canonical_name)
    }
}

impl<'de> Deserialize<'de> for ElementType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        type_of(&name).map_err(serde::de::Error::custom)
    }
}

static REGISTRY: Lazy<HashMap<&'static str, ElementType>> = Lazy::new(|| {
    all_element_types()
        .iter()
        .map(|ty| (ty.canonical_name, *ty))
        .collect()
});

/// Every registered element type, in a fixed order.
pub fn all_element_types() -> &'static [ElementType] {
    const ALL: [ElementType; 11] = [
        ElementType::BOOLEAN,
        ElementType::F32,
        ElementType::F64,
        ElementType::I8,
        ElementType::I16,
        ElementType::I32,
        ElementType::I64,
        ElementType::U8,
        ElementType::U16,
        ElementType::U32,
        ElementType::U64,
    ];
    &ALL
}

/// Resolves a canonical type name, failing with [`Error::UnknownType`] when absent.
pub fn type_of(name: &str) -> Result<ElementType> {
    REGISTRY
        .get(name)
        .copied()
        .ok_or_else(|| Error::UnknownType(name.to_string()))
}

/// Rust scalar that maps onto a registered element type.
///
/// Conversions are little-endian, which is the byte order every runtime tensor uses.
pub trait NativeElement: Copy + Send + Sync + 'static {
    const ELEMENT_TYPE: ElementType;

    fn write_le(self, out: &mut [u8]);

    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_native_element {
    ($($ty:ty => $et:expr),* $(,)?) => {
        $(
            impl NativeElement for $ty {
                const ELEMENT_TYPE: ElementType = $et;

                fn write_le(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$ty>()];
                    buf.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(buf)
                }
            }
        )*
    };
}

impl_native_element!(
    f32 => ElementType::F32,
    f64 => ElementType::F64,
    i8 => ElementType::I8,
    i16 => ElementType::I16,
    i32 => ElementType::I32,
    i64 => ElementType::I64,
    u8 => ElementType::U8,
    u16 => ElementType::U16,
    u32 => ElementType::U32,
    u64 => ElementType::U64,
);

impl NativeElement for bool {
    const ELEMENT_TYPE: ElementType = ElementType::BOOLEAN;

    fn write_le(self, out: &mut [u8]) {
        out[0] = u8::from(self);
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// Returns the element type registered for `T`.
pub fn element_type_of<T: NativeElement>() -> ElementType {
    T::ELEMENT_TYPE
}

/// Encodes a slice of native values into little-endian bytes.
pub fn encode_values<T: NativeElement>(values: &[T]) -> Vec<u8> {
    let width = T::ELEMENT_TYPE.size_in_bytes();
    let mut bytes = vec![0u8; values.len() * width];
    for (chunk, value) in bytes.chunks_exact_mut(width).zip(values) {
        value.write_le(chunk);
    }
    bytes
}

/// Decodes little-endian bytes into native values; trailing partial elements are ignored.
pub fn decode_values<T: NativeElement>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(T::ELEMENT_TYPE.size_in_bytes())
        .map(T::read_le)
        .collect()
}
