use std::fmt::{Debug, Display};

use bytemuck::Pod;
use derive_more::Display;
use half::f16;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DataType {
    F32,
    F16,
    U8,
    U16,
    U32,
    I32,
}

impl DataType {
    /// Size of one element in bytes.
    pub const fn size(self) -> usize {
        match self {
            DataType::F32 => 4,
            DataType::F16 => 2,
            DataType::U8 => 1,
            DataType::U16 => 2,
            DataType::U32 => 4,
            DataType::I32 => 4,
        }
    }

    /// Name of the type in WGSL, if it can be stored in a device buffer.
    pub const fn wgsl(self) -> Option<&'static str> {
        match self {
            DataType::F32 => Some("f32"),
            DataType::U32 => Some("u32"),
            DataType::I32 => Some("i32"),
            DataType::F16 | DataType::U8 | DataType::U16 => None,
        }
    }
}

pub trait Zero {
    fn zero() -> Self;
}

macro_rules! impl_zero {
    ($ty:ty, $zero:expr) => {
        impl Zero for $ty {
            fn zero() -> Self {
                $zero
            }
        }
    };
}

impl_zero!(f32, 0.0);
impl_zero!(f16, f16::ZERO);
impl_zero!(u8, 0);
impl_zero!(u16, 0);
impl_zero!(u32, 0);
impl_zero!(i32, 0);

/// Element type of a [`Vector`](crate::vector::Vector).
pub trait Scalar:
    Sized + Pod + Zero + PartialEq + Debug + Display + Send + Sync + sealed::Sealed
{
    const DATA_TYPE: DataType;

    /// Converts an element index into a value, wrapping for narrow integers.
    fn from_index(index: usize) -> Self;
}

impl Scalar for f32 {
    const DATA_TYPE: DataType = DataType::F32;

    fn from_index(index: usize) -> Self {
        index as f32
    }
}

impl Scalar for f16 {
    const DATA_TYPE: DataType = DataType::F16;

    fn from_index(index: usize) -> Self {
        f16::from_f32(index as f32)
    }
}

impl Scalar for u8 {
    const DATA_TYPE: DataType = DataType::U8;

    fn from_index(index: usize) -> Self {
        index as u8
    }
}

impl Scalar for u16 {
    const DATA_TYPE: DataType = DataType::U16;

    fn from_index(index: usize) -> Self {
        index as u16
    }
}

impl Scalar for u32 {
    const DATA_TYPE: DataType = DataType::U32;

    fn from_index(index: usize) -> Self {
        index as u32
    }
}

impl Scalar for i32 {
    const DATA_TYPE: DataType = DataType::I32;

    fn from_index(index: usize) -> Self {
        index as i32
    }
}

/// Arithmetic shared by every device. Integer operations wrap on overflow,
/// which is what WGSL does for 32-bit integers.
pub trait Arithmetic: Scalar {
    fn add(self, rhs: Self) -> Self;
    fn sub(self, rhs: Self) -> Self;
    fn mul(self, rhs: Self) -> Self;
    fn min(self, rhs: Self) -> Self;
    fn max(self, rhs: Self) -> Self;
}

macro_rules! impl_arithmetic_int {
    ($($ty:ty),+) => {
        $(
            impl Arithmetic for $ty {
                #[inline]
                fn add(self, rhs: Self) -> Self {
                    self.wrapping_add(rhs)
                }

                #[inline]
                fn sub(self, rhs: Self) -> Self {
                    self.wrapping_sub(rhs)
                }

                #[inline]
                fn mul(self, rhs: Self) -> Self {
                    self.wrapping_mul(rhs)
                }

                #[inline]
                fn min(self, rhs: Self) -> Self {
                    Ord::min(self, rhs)
                }

                #[inline]
                fn max(self, rhs: Self) -> Self {
                    Ord::max(self, rhs)
                }
            }
        )+
    };
}

macro_rules! impl_arithmetic_float {
    ($($ty:ty),+) => {
        $(
            impl Arithmetic for $ty {
                #[inline]
                fn add(self, rhs: Self) -> Self {
                    self + rhs
                }

                #[inline]
                fn sub(self, rhs: Self) -> Self {
                    self - rhs
                }

                #[inline]
                fn mul(self, rhs: Self) -> Self {
                    self * rhs
                }

                #[inline]
                fn min(self, rhs: Self) -> Self {
                    <$ty>::min(self, rhs)
                }

                #[inline]
                fn max(self, rhs: Self) -> Self {
                    <$ty>::max(self, rhs)
                }
            }
        )+
    };
}

impl_arithmetic_int!(u8, u16, u32, i32);
impl_arithmetic_float!(f32, f16);

mod sealed {
    use half::f16;

    pub trait Sealed {}

    impl Sealed for f32 {}
    impl Sealed for f16 {}
    impl Sealed for u8 {}
    impl Sealed for u16 {}
    impl Sealed for u32 {}
    impl Sealed for i32 {}
}
