//! Typed host kernels shared by the CPU and interpreter backends.

use graph_rt::graph::{Node, NodeKind};
use graph_rt::tensor::{decode_values, ElementType, NativeElement, TensorDesc};
use graph_rt::{Error, Result};

/// Decoded host values, one variant per registered element type.
#[derive(Debug, Clone, PartialEq)]
pub enum HostData {
    Bool(Vec<bool>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
}

macro_rules! for_each_variant {
    ($value:expr, $v:ident => $body:expr) => {
        match $value {
            HostData::Bool($v) => $body,
            HostData::F32($v) => $body,
            HostData::F64($v) => $body,
            HostData::I8($v) => $body,
            HostData::I16($v) => $body,
            HostData::I32($v) => $body,
            HostData::I64($v) => $body,
            HostData::U8($v) => $body,
            HostData::U16($v) => $body,
            HostData::U32($v) => $body,
            HostData::U64($v) => $body,
        }
    };
}

impl HostData {
    /// Decodes little-endian bytes holding exactly `desc` worth of elements.
    pub fn decode(desc: &TensorDesc, bytes: &[u8]) -> Result<Self> {
        let expected = desc.byte_size()?;
        if bytes.len() != expected {
            return Err(Error::argument(format!(
                "{desc} needs {expected} bytes, buffer holds {}",
                bytes.len()
            )));
        }
        let ty = desc.element_type;
        Ok(match ty {
            t if t == ElementType::BOOLEAN => HostData::Bool(decode_values(bytes)),
            t if t == ElementType::F32 => HostData::F32(decode_values(bytes)),
            t if t == ElementType::F64 => HostData::F64(decode_values(bytes)),
            t if t == ElementType::I8 => HostData::I8(decode_values(bytes)),
            t if t == ElementType::I16 => HostData::I16(decode_values(bytes)),
            t if t == ElementType::I32 => HostData::I32(decode_values(bytes)),
            t if t == ElementType::I64 => HostData::I64(decode_values(bytes)),
            t if t == ElementType::U8 => HostData::U8(decode_values(bytes)),
            t if t == ElementType::U16 => HostData::U16(decode_values(bytes)),
            t if t == ElementType::U32 => HostData::U32(decode_values(bytes)),
            t if t == ElementType::U64 => HostData::U64(decode_values(bytes)),
            other => return Err(Error::execution(format!("no host layout for {other}"))),
        })
    }

    /// Writes the values into `out`, which must be exactly the encoded size.
    pub fn encode_into(&self, out: &mut [u8]) -> Result<()> {
        let width = self.element_type().size_in_bytes();
        if out.len() != self.len() * width {
            return Err(Error::argument(format!(
                "output buffer holds {} bytes, result needs {}",
                out.len(),
                self.len() * width
            )));
        }
        for_each_variant!(self, values => {
            for (chunk, value) in out.chunks_exact_mut(width).zip(values) {
                value.write_le(chunk);
            }
        });
        Ok(())
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            HostData::Bool(_) => ElementType::BOOLEAN,
            HostData::F32(_) => ElementType::F32,
            HostData::F64(_) => ElementType::F64,
            HostData::I8(_) => ElementType::I8,
            HostData::I16(_) => ElementType::I16,
            HostData::I32(_) => ElementType::I32,
            HostData::I64(_) => ElementType::I64,
            HostData::U8(_) => ElementType::U8,
            HostData::U16(_) => ElementType::U16,
            HostData::U32(_) => ElementType::U32,
            HostData::U64(_) => ElementType::U64,
        }
    }

    pub fn len(&self) -> usize {
        for_each_variant!(self, values => values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scalar arithmetic used by the kernels. Integer arithmetic wraps; floats follow IEEE-754.
trait Scalar: NativeElement + PartialOrd {
    const FLOAT: bool;
    const SIGNED: bool;
    fn add(self, rhs: Self) -> Self;
    fn sub(self, rhs: Self) -> Self;
    fn mul(self, rhs: Self) -> Self;
    fn div(self, rhs: Self) -> Option<Self>;
    fn neg(self) -> Self;
    fn abs(self) -> Self;
    fn is_nan(self) -> bool;
    fn to_f64(self) -> f64;
    fn to_i128(self) -> i128;
    fn from_f64(value: f64) -> Self;
    fn from_i128(value: i128) -> Self;
}

macro_rules! impl_int_scalar {
    ($($ty:ty => $signed:expr),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const FLOAT: bool = false;
                const SIGNED: bool = $signed;
                fn add(self, rhs: Self) -> Self { self.wrapping_add(rhs) }
                fn sub(self, rhs: Self) -> Self { self.wrapping_sub(rhs) }
                fn mul(self, rhs: Self) -> Self { self.wrapping_mul(rhs) }
                fn div(self, rhs: Self) -> Option<Self> {
                    if rhs == 0 { None } else { Some(self.wrapping_div(rhs)) }
                }
                fn neg(self) -> Self { self.wrapping_neg() }
                #[allow(unused_comparisons)]
                fn abs(self) -> Self { if self < 0 { self.wrapping_neg() } else { self } }
                fn is_nan(self) -> bool { false }
                fn to_f64(self) -> f64 { self as f64 }
                fn to_i128(self) -> i128 { self as i128 }
                fn from_f64(value: f64) -> Self { value as Self }
                fn from_i128(value: i128) -> Self { value as Self }
            }
        )*
    };
}

impl_int_scalar!(
    i8 => true, i16 => true, i32 => true, i64 => true,
    u8 => false, u16 => false, u32 => false, u64 => false,
);

macro_rules! impl_float_scalar {
    ($($ty:ty),*) => {
        $(
            impl Scalar for $ty {
                const FLOAT: bool = true;
                const SIGNED: bool = true;
                fn add(self, rhs: Self) -> Self { self + rhs }
                fn sub(self, rhs: Self) -> Self { self - rhs }
                fn mul(self, rhs: Self) -> Self { self * rhs }
                fn div(self, rhs: Self) -> Option<Self> { Some(self / rhs) }
                fn neg(self) -> Self { -self }
                fn abs(self) -> Self { <$ty>::abs(self) }
                fn is_nan(self) -> bool { <$ty>::is_nan(self) }
                fn to_f64(self) -> f64 { self as f64 }
                fn to_i128(self) -> i128 { self as i128 }
                fn from_f64(value: f64) -> Self { value as Self }
                fn from_i128(value: i128) -> Self { value as Self }
            }
        )*
    };
}

impl_float_scalar!(f32, f64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Maximum,
    Minimum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negative,
    Abs,
    Exp,
    Log,
    Sqrt,
}

/// Executable form of one operation node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    Binary(BinaryOp),
    Unary(UnaryOp),
    Reshape,
    Convert(ElementType),
}

impl Kernel {
    /// Selects the kernel for an operation node, or `None` when no host kernel covers the op
    /// at these element types.
    pub fn select(node: &Node) -> Option<Kernel> {
        let NodeKind::Operation { op, .. } = node.kind() else {
            return None;
        };
        let input = node.inputs().first()?.desc().element_type;
        let kernel = match op.as_str() {
            "Add" => Kernel::Binary(BinaryOp::Add),
            "Subtract" => Kernel::Binary(BinaryOp::Subtract),
            "Multiply" => Kernel::Binary(BinaryOp::Multiply),
            "Divide" => Kernel::Binary(BinaryOp::Divide),
            "Maximum" => Kernel::Binary(BinaryOp::Maximum),
            "Minimum" => Kernel::Binary(BinaryOp::Minimum),
            "Negative" => Kernel::Unary(UnaryOp::Negative),
            "Abs" => Kernel::Unary(UnaryOp::Abs),
            "Exp" => Kernel::Unary(UnaryOp::Exp),
            "Log" => Kernel::Unary(UnaryOp::Log),
            "Sqrt" => Kernel::Unary(UnaryOp::Sqrt),
            "Reshape" => Kernel::Reshape,
            "Convert" => Kernel::Convert(node.element_type()),
            _ => return None,
        };
        let supported = match kernel {
            Kernel::Binary(_) => input != ElementType::BOOLEAN,
            Kernel::Unary(UnaryOp::Negative) => input.is_signed() && input != ElementType::BOOLEAN,
            Kernel::Unary(UnaryOp::Abs) => input != ElementType::BOOLEAN,
            Kernel::Unary(_) => input.is_float(),
            Kernel::Reshape | Kernel::Convert(_) => true,
        };
        supported.then_some(kernel)
    }

    pub fn arity(self) -> usize {
        match self {
            Kernel::Binary(_) => 2,
            _ => 1,
        }
    }

    pub fn run(self, inputs: &[&HostData]) -> Result<HostData> {
        if inputs.len() != self.arity() {
            return Err(Error::execution(format!(
                "{self:?} expects {} inputs, got {}",
                self.arity(),
                inputs.len()
            )));
        }
        match self {
            Kernel::Binary(op) => binary(op, inputs[0], inputs[1]),
            Kernel::Unary(op) => unary(op, inputs[0]),
            Kernel::Reshape => Ok(inputs[0].clone()),
            Kernel::Convert(target) => convert(inputs[0], target),
        }
    }
}

fn binary_values<T: Scalar>(op: BinaryOp, lhs: &[T], rhs: &[T]) -> Result<Vec<T>> {
    if lhs.len() != rhs.len() {
        return Err(Error::execution("elementwise size mismatch"));
    }
    lhs.iter()
        .zip(rhs)
        .map(|(&x, &y)| match op {
            BinaryOp::Add => Ok(x.add(y)),
            BinaryOp::Subtract => Ok(x.sub(y)),
            BinaryOp::Multiply => Ok(x.mul(y)),
            BinaryOp::Divide => x
                .div(y)
                .ok_or_else(|| Error::execution("integer division by zero")),
            BinaryOp::Maximum => Ok(max_of(x, y)),
            BinaryOp::Minimum => Ok(min_of(x, y)),
        })
        .collect()
}

// NaN propagates, matching IEEE maximum/minimum.
fn max_of<T: Scalar>(x: T, y: T) -> T {
    if x.is_nan() || x > y {
        x
    } else {
        y
    }
}

fn min_of<T: Scalar>(x: T, y: T) -> T {
    if x.is_nan() || x < y {
        x
    } else {
        y
    }
}

fn binary(op: BinaryOp, lhs: &HostData, rhs: &HostData) -> Result<HostData> {
    macro_rules! pair {
        ($($variant:ident),*) => {
            match (lhs, rhs) {
                $((HostData::$variant(a), HostData::$variant(b)) => {
                    Ok(HostData::$variant(binary_values(op, a, b)?))
                })*
                _ => Err(Error::execution(format!(
                    "{op:?} not supported for {} and {}",
                    lhs.element_type(),
                    rhs.element_type()
                ))),
            }
        };
    }
    pair!(F32, F64, I8, I16, I32, I64, U8, U16, U32, U64)
}

fn unary_values<T: Scalar>(op: UnaryOp, values: &[T]) -> Result<Vec<T>> {
    let float = |f: fn(f64) -> f64| -> Result<Vec<T>> {
        if !T::FLOAT {
            return Err(Error::execution(format!("{op:?} requires floating point")));
        }
        Ok(values.iter().map(|&x| T::from_f64(f(x.to_f64()))).collect())
    };
    match op {
        UnaryOp::Negative if !T::SIGNED => {
            Err(Error::execution("Negative requires a signed element type"))
        }
        UnaryOp::Negative => Ok(values.iter().map(|&x| x.neg()).collect()),
        UnaryOp::Abs => Ok(values.iter().map(|&x| x.abs()).collect()),
        UnaryOp::Exp => float(f64::exp),
        UnaryOp::Log => float(f64::ln),
        UnaryOp::Sqrt => float(f64::sqrt),
    }
}

fn unary(op: UnaryOp, input: &HostData) -> Result<HostData> {
    // f32 math goes through f32 directly so results match single-precision libm.
    if let HostData::F32(values) = input {
        let result = match op {
            UnaryOp::Negative => values.iter().map(|&x| -x).collect(),
            UnaryOp::Abs => values.iter().map(|&x| x.abs()).collect(),
            UnaryOp::Exp => values.iter().map(|&x| x.exp()).collect(),
            UnaryOp::Log => values.iter().map(|&x| x.ln()).collect(),
            UnaryOp::Sqrt => values.iter().map(|&x| x.sqrt()).collect(),
        };
        return Ok(HostData::F32(result));
    }
    macro_rules! apply {
        ($($variant:ident),*) => {
            match input {
                $(HostData::$variant(values) => Ok(HostData::$variant(unary_values(op, values)?)),)*
                HostData::Bool(_) => {
                    Err(Error::execution(format!("{op:?} not supported for boolean")))
                }
            }
        };
    }
    apply!(F32, F64, I8, I16, I32, I64, U8, U16, U32, U64)
}

fn cast_all<S: Scalar, T: Scalar>(values: &[S]) -> Vec<T> {
    if S::FLOAT {
        values.iter().map(|&x| T::from_f64(x.to_f64())).collect()
    } else {
        values.iter().map(|&x| T::from_i128(x.to_i128())).collect()
    }
}

fn convert_numeric<S: Scalar>(values: &[S], target: ElementType) -> Result<HostData> {
    Ok(match target {
        t if t == ElementType::BOOLEAN => {
            HostData::Bool(values.iter().map(|&x| x.to_f64() != 0.0).collect())
        }
        t if t == ElementType::F32 => HostData::F32(cast_all(values)),
        t if t == ElementType::F64 => HostData::F64(cast_all(values)),
        t if t == ElementType::I8 => HostData::I8(cast_all(values)),
        t if t == ElementType::I16 => HostData::I16(cast_all(values)),
        t if t == ElementType::I32 => HostData::I32(cast_all(values)),
        t if t == ElementType::I64 => HostData::I64(cast_all(values)),
        t if t == ElementType::U8 => HostData::U8(cast_all(values)),
        t if t == ElementType::U16 => HostData::U16(cast_all(values)),
        t if t == ElementType::U32 => HostData::U32(cast_all(values)),
        t if t == ElementType::U64 => HostData::U64(cast_all(values)),
        other => return Err(Error::execution(format!("cannot convert to {other}"))),
    })
}

/// Element-wise `as` conversion; integers truncate, floats saturate, booleans map to 0 and 1.
fn convert(input: &HostData, target: ElementType) -> Result<HostData> {
    match input {
        HostData::Bool(values) => {
            let widened: Vec<u8> = values.iter().map(|&b| u8::from(b)).collect();
            convert_numeric(&widened, target)
        }
        HostData::F32(values) => convert_numeric(values, target),
        HostData::F64(values) => convert_numeric(values, target),
        HostData::I8(values) => convert_numeric(values, target),
        HostData::I16(values) => convert_numeric(values, target),
        HostData::I32(values) => convert_numeric(values, target),
        HostData::I64(values) => convert_numeric(values, target),
        HostData::U8(values) => convert_numeric(values, target),
        HostData::U16(values) => convert_numeric(values, target),
        HostData::U32(values) => convert_numeric(values, target),
        HostData::U64(values) => convert_numeric(values, target),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_binary_ops_follow_ieee() {
        let lhs = HostData::F32(vec![1.0, -2.0, 6.0]);
        let rhs = HostData::F32(vec![0.5, 4.0, 0.0]);
        assert_eq!(
            binary(BinaryOp::Add, &lhs, &rhs).unwrap(),
            HostData::F32(vec![1.5, 2.0, 6.0])
        );
        assert_eq!(
            binary(BinaryOp::Divide, &lhs, &rhs).unwrap(),
            HostData::F32(vec![2.0, -0.5, f32::INFINITY])
        );
        assert_eq!(
            binary(BinaryOp::Maximum, &lhs, &rhs).unwrap(),
            HostData::F32(vec![1.0, 4.0, 6.0])
        );
    }

    #[test]
    fn integer_arithmetic_wraps_and_rejects_zero_division() {
        let lhs = HostData::U8(vec![250, 3]);
        let rhs = HostData::U8(vec![10, 0]);
        assert_eq!(
            binary(BinaryOp::Add, &lhs, &rhs).unwrap(),
            HostData::U8(vec![4, 3])
        );
        assert!(matches!(
            binary(BinaryOp::Divide, &lhs, &rhs),
            Err(Error::Execution(_))
        ));
    }

    #[test]
    fn unary_ops_cover_signed_and_float_types() {
        assert_eq!(
            unary(UnaryOp::Abs, &HostData::I32(vec![-3, 4])).unwrap(),
            HostData::I32(vec![3, 4])
        );
        assert_eq!(
            unary(UnaryOp::Sqrt, &HostData::F64(vec![9.0])).unwrap(),
            HostData::F64(vec![3.0])
        );
        assert!(unary(UnaryOp::Exp, &HostData::I64(vec![1])).is_err());
        assert!(unary(UnaryOp::Negative, &HostData::U16(vec![1])).is_err());
    }

    #[test]
    fn convert_truncates_and_saturates() {
        assert_eq!(
            convert(&HostData::F32(vec![2.9, -1.5, 300.0]), ElementType::U8).unwrap(),
            HostData::U8(vec![2, 0, 255])
        );
        assert_eq!(
            convert(&HostData::I32(vec![0, 7]), ElementType::BOOLEAN).unwrap(),
            HostData::Bool(vec![false, true])
        );
        assert_eq!(
            convert(&HostData::Bool(vec![true, false]), ElementType::F64).unwrap(),
            HostData::F64(vec![1.0, 0.0])
        );
    }

    #[test]
    fn convert_reaches_every_registered_type() {
        let source = HostData::I64(vec![0, 1, 200]);
        for &target in graph_rt::tensor::all_element_types() {
            let converted = convert(&source, target).unwrap();
            assert_eq!(converted.element_type(), target);
            assert_eq!(converted.len(), 3, "{target}");
        }
        assert_eq!(
            convert(&source, ElementType::U64).unwrap(),
            HostData::U64(vec![0, 1, 200])
        );
    }

    #[test]
    fn decode_checks_byte_length() {
        let desc = TensorDesc::new(ElementType::I16, [3]);
        assert!(HostData::decode(&desc, &[0u8; 5]).is_err());
        let data = HostData::decode(&desc, &[1, 0, 2, 0, 255, 255]).unwrap();
        assert_eq!(data, HostData::I16(vec![1, 2, -1]));

        let mut out = [0u8; 6];
        data.encode_into(&mut out).unwrap();
        assert_eq!(out, [1, 0, 2, 0, 255, 255]);
    }
}
