//! Reinterpretation of raw bytes as numeric elements.

use crate::error::{RemoteArrayError, Result};
use crate::types::{ArrayData, ByteOrder, DType};

/// Reinterpret `data` as `expected` elements of `dtype`.
pub fn decode_numeric(
    data: &[u8],
    dtype: DType,
    order: ByteOrder,
    expected: usize,
) -> Result<ArrayData> {
    let width = dtype.byte_width().ok_or_else(|| {
        RemoteArrayError::corrupt("object chunks cannot be decoded as numbers")
    })?;

    if data.len() % width != 0 {
        return Err(RemoteArrayError::corrupt(format!(
            "{} bytes is not a whole number of {} elements",
            data.len(),
            dtype
        )));
    }
    let count = data.len() / width;
    if count != expected {
        return Err(RemoteArrayError::corrupt(format!(
            "chunk holds {} elements, expected {}",
            count, expected
        )));
    }

    // pod_collect_to_vec copies into a correctly aligned buffer, so the
    // source may start at any offset.
    macro_rules! ints {
        ($ty:ty, $variant:ident) => {{
            let mut values: Vec<$ty> = bytemuck::pod_collect_to_vec(data);
            for v in values.iter_mut() {
                *v = match order {
                    ByteOrder::Little => <$ty>::from_le(*v),
                    ByteOrder::Big => <$ty>::from_be(*v),
                };
            }
            ArrayData::$variant(values)
        }};
    }
    macro_rules! floats {
        ($ty:ty, $bits:ty, $variant:ident) => {{
            let bits: Vec<$bits> = bytemuck::pod_collect_to_vec(data);
            ArrayData::$variant(
                bits.into_iter()
                    .map(|b| match order {
                        ByteOrder::Little => <$ty>::from_bits(<$bits>::from_le(b)),
                        ByteOrder::Big => <$ty>::from_bits(<$bits>::from_be(b)),
                    })
                    .collect(),
            )
        }};
    }

    Ok(match dtype {
        DType::Int8 => ArrayData::Int8(bytemuck::pod_collect_to_vec(data)),
        DType::UInt8 => ArrayData::UInt8(data.to_vec()),
        DType::Int16 => ints!(i16, Int16),
        DType::UInt16 => ints!(u16, UInt16),
        DType::Int32 => ints!(i32, Int32),
        DType::UInt32 => ints!(u32, UInt32),
        DType::Int64 => ints!(i64, Int64),
        DType::UInt64 => ints!(u64, UInt64),
        DType::Float32 => floats!(f32, u32, Float32),
        DType::Float64 => floats!(f64, u64, Float64),
        DType::Object => {
            return Err(RemoteArrayError::corrupt(
                "object chunks cannot be decoded as numbers",
            ))
        }
    })
}
