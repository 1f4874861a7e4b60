//! Combinators that derive new futures from existing ones without blocking.
//!
//! `a + b` is a two-stage continuation chain: when `a` is ready its value seeds the result,
//! and a second observer is attached to `b`; when `b` is ready the result resolves with the sum.
//! If either operand fails, so does the result. If either never settles, neither does the result.

use std::iter::Sum;
use std::ops::Add;

use super::Lazy;

impl<T: Clone + 'static> Lazy<T> {
    /// Derives a future holding `f` applied to this future's value.
    pub fn map<U, F>(&self, f: F) -> Lazy<U> where
    U: Clone + 'static,
    F: FnOnce(T) -> U + 'static {
        let result = Lazy::new();

        let on_value = result.clone();
        self.on_ready(move |a| on_value.resolve(f(a.clone())));
        let on_fail = result.clone();
        self.on_fail(move || on_fail.fail());

        result
    }

    /// Derives a future holding `f(a, b)`, where `a` is this future's value and `b` is `other`'s.
    ///
    /// The observer on `other` is only attached once this future is ready.
    pub fn merge<U, V, F>(&self, other: &Lazy<U>, f: F) -> Lazy<V> where
    U: Clone + 'static,
    V: Clone + 'static,
    F: FnOnce(T, U) -> V + 'static {
        let result = Lazy::new();

        let seeded = result.clone();
        let second = other.clone();
        self.on_ready(move |a| {
            let seed = a.clone();
            let on_fail = seeded.clone();
            second.on_ready(move |b| seeded.resolve(f(seed, b.clone())));
            second.on_fail(move || on_fail.fail());
        });
        let on_fail = result.clone();
        self.on_fail(move || on_fail.fail());

        result
    }
}

impl<'a, 'b, T> Add<&'b Lazy<T>> for &'a Lazy<T> where
T: Add<Output = T> + Clone + 'static {
    type Output = Lazy<T>;

    fn add(self, rhs: &'b Lazy<T>) -> Lazy<T> {
        self.merge(rhs, |a, b| a + b)
    }
}

impl<'b, T> Add<&'b Lazy<T>> for Lazy<T> where
T: Add<Output = T> + Clone + 'static {
    type Output = Lazy<T>;

    fn add(self, rhs: &'b Lazy<T>) -> Lazy<T> {
        &self + rhs
    }
}

impl<T> Add for Lazy<T> where
T: Add<Output = T> + Clone + 'static {
    type Output = Lazy<T>;

    fn add(self, rhs: Lazy<T>) -> Lazy<T> {
        &self + &rhs
    }
}

/// Implements `Lazy<T> + T` for a primitive `T`, lifting the literal with `Lazy::ready`.
macro_rules! derive_add_literal {
    ($($t:ty)*) => {
        $(
            impl<'a> Add<$t> for &'a Lazy<$t> {
                type Output = Lazy<$t>;

                fn add(self, rhs: $t) -> Lazy<$t> {
                    self + &Lazy::ready(rhs)
                }
            }

            impl Add<$t> for Lazy<$t> {
                type Output = Lazy<$t>;

                fn add(self, rhs: $t) -> Lazy<$t> {
                    &self + rhs
                }
            }
        )*
    }
}

derive_add_literal!(i8 i16 i32 i64 i128 isize u8 u16 u32 u64 u128 usize f32 f64);

/// Folds by chaining `+`, one intermediate future per element, seeded with `T::default()`.
impl<T> Sum for Lazy<T> where
T: Add<Output = T> + Default + Clone + 'static {
    fn sum<I: Iterator<Item = Lazy<T>>>(iter: I) -> Lazy<T> {
        iter.fold(Lazy::ready(T::default()), |acc, x| acc + x)
    }
}

impl<'a, T> Sum<&'a Lazy<T>> for Lazy<T> where
T: Add<Output = T> + Default + Clone + 'static {
    fn sum<I: Iterator<Item = &'a Lazy<T>>>(iter: I) -> Lazy<T> {
        iter.fold(Lazy::ready(T::default()), |acc, x| acc + x)
    }
}
