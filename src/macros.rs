/// Implements `From<T>` in both directions for a newtype wrapper around a primitive.
#[macro_export]
macro_rules! impl_from_primitive {
    ($wrapper:ident, $primitive:ty) => {
        impl From<$primitive> for $wrapper {
            fn from(value: $primitive) -> Self {
                Self(value)
            }
        }

        impl From<$wrapper> for $primitive {
            fn from(wrapper: $wrapper) -> Self {
                wrapper.0
            }
        }
    };
}

/// Implements additive arithmetic (`Add`, `Sub`, `AddAssign`, `Sum`) and scaling by the
/// primitive (`Mul<$primitive>`) for a numeric newtype wrapper.
#[macro_export]
macro_rules! impl_additive_primitive {
    ($wrapper:ident, $primitive:ty) => {
        impl std::ops::Add for $wrapper {
            type Output = Self;

            fn add(self, other: Self) -> Self {
                Self(self.0 + other.0)
            }
        }

        impl std::ops::AddAssign for $wrapper {
            fn add_assign(&mut self, rhs: Self) {
                self.0 += rhs.0;
            }
        }

        impl std::ops::Sub for $wrapper {
            type Output = Self;

            fn sub(self, other: Self) -> Self {
                Self(self.0 - other.0)
            }
        }

        impl std::ops::Mul<$primitive> for $wrapper {
            type Output = Self;

            fn mul(self, rhs: $primitive) -> Self::Output {
                Self(self.0 * rhs)
            }
        }

        impl std::iter::Sum for $wrapper {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                iter.fold(Self(0 as $primitive), |acc, x| Self(acc.0 + x.0))
            }
        }
    };
}

/// Implements the `Neg` trait for a numeric newtype wrapper.
#[macro_export]
macro_rules! impl_neg_primitive {
    ($wrapper:ident, $primitive:ty) => {
        impl std::ops::Neg for $wrapper {
            type Output = Self;

            fn neg(self) -> Self::Output {
                Self(-self.0)
            }
        }
    };
}
