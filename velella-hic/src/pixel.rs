//! Pixel value types and the arithmetic count abstraction.
//!
//! Matrix cells travel as [`ThinPixel`] (bare bin ids) or [`Pixel`] (joined
//! genomic coordinates). The count type is generic: storage holds either
//! integers or floats, and callers pick the type they want at query time.
//! Converting a float-stored count to an integer uses half-to-even
//! (banker's) rounding, not truncation.

use std::fmt::Debug;

use crate::bins::Bin;

/// A nonzero matrix cell addressed by global bin ids.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ThinPixel<N> {
    pub bin1_id: u64,
    pub bin2_id: u64,
    pub count: N,
}

/// A nonzero matrix cell with joined genomic coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Pixel<N> {
    pub bin1: Bin,
    pub bin2: Bin,
    pub count: N,
}

impl<N> Pixel<N> {
    /// Drop the genomic coordinates, keeping bare bin ids.
    pub fn to_thin(&self) -> ThinPixel<N>
    where
        N: Copy,
    {
        ThinPixel {
            bin1_id: self.bin1.id,
            bin2_id: self.bin2.id,
            count: self.count,
        }
    }
}

/// An arithmetic pixel count.
///
/// Implemented for the integer and floating-point types the storage layer
/// can hold. `from_f64` on integer types rounds half-to-even.
pub trait Count:
    Copy + PartialEq + PartialOrd + Default + Debug + Send + Sync + 'static
{
    const IS_FLOAT: bool;

    fn zero() -> Self;
    fn from_f64(value: f64) -> Self;
    fn to_f64(self) -> f64;
    /// Saturating/overflow-agnostic addition, used when coalescing pixels.
    fn add(self, other: Self) -> Self;
}

macro_rules! impl_int_count {
    ($($t:ty),*) => {$(
        impl Count for $t {
            const IS_FLOAT: bool = false;

            fn zero() -> Self {
                0
            }

            fn from_f64(value: f64) -> Self {
                // Half-to-even, then the saturating float->int cast.
                value.round_ties_even() as $t
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn add(self, other: Self) -> Self {
                self.saturating_add(other)
            }
        }

        impl IntCount for $t {
            fn to_u64(self) -> u64 {
                self as u64
            }

            fn from_u64(value: u64) -> Self {
                value as $t
            }
        }
    )*};
}

macro_rules! impl_float_count {
    ($($t:ty),*) => {$(
        impl Count for $t {
            const IS_FLOAT: bool = true;

            fn zero() -> Self {
                0.0
            }

            fn from_f64(value: f64) -> Self {
                value as $t
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn add(self, other: Self) -> Self {
                self + other
            }
        }
    )*};
}

impl_int_count!(i32, i64, u32, u64);
impl_float_count!(f32, f64);

/// Integer pixel counts, required by operations that draw whole events
/// (e.g. binomial subsampling).
pub trait IntCount: Count {
    fn to_u64(self) -> u64;
    fn from_u64(value: u64) -> Self;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_counts_round_half_to_even() {
        assert_eq!(i32::from_f64(2.5), 2);
        assert_eq!(i32::from_f64(3.5), 4);
        assert_eq!(i32::from_f64(-2.5), -2);
        assert_eq!(i32::from_f64(2.4), 2);
        assert_eq!(i32::from_f64(2.6), 3);
        assert_eq!(u32::from_f64(0.5), 0);
        assert_eq!(u32::from_f64(1.5), 2);
    }

    #[test]
    fn float_counts_pass_through() {
        assert_eq!(f64::from_f64(2.5), 2.5);
        assert_eq!(f32::from_f64(1.25), 1.25);
    }

    #[test]
    fn nan_materializes_to_zero_for_integers() {
        assert_eq!(i32::from_f64(f64::NAN), 0);
    }

    #[test]
    fn thin_round_trip() {
        let bin = |id: u64| Bin {
            id,
            chrom_id: 0,
            rel_id: id,
            start: 0,
            end: 10,
        };
        let p = Pixel {
            bin1: bin(3),
            bin2: bin(5),
            count: 7i32,
        };
        let t = p.to_thin();
        assert_eq!((t.bin1_id, t.bin2_id, t.count), (3, 5, 7));
    }
}
