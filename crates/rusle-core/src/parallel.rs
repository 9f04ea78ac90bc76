//! rayon or sequential execution behind one API.
//!
//! With the `threading` feature this re-exports rayon's parallel iterators
//! and `join`. Without it, `into_par_iter()` falls back to `into_iter()` and
//! `join` runs both closures in order, so call sites stay identical.

#[cfg(feature = "threading")]
pub use rayon::prelude::*;

#[cfg(feature = "threading")]
pub fn join<A, B, RA, RB>(a: A, b: B) -> (RA, RB)
where
    A: FnOnce() -> RA + Send,
    B: FnOnce() -> RB + Send,
    RA: Send,
    RB: Send,
{
    rayon::join(a, b)
}

#[cfg(not(feature = "threading"))]
mod sequential {
    pub trait IntoParallelIterator {
        type Iter;
        type Item;
        fn into_par_iter(self) -> Self::Iter;
    }

    impl<I: IntoIterator> IntoParallelIterator for I {
        type Iter = I::IntoIter;
        type Item = I::Item;
        fn into_par_iter(self) -> Self::Iter {
            self.into_iter()
        }
    }

    pub fn join<A, B, RA, RB>(a: A, b: B) -> (RA, RB)
    where
        A: FnOnce() -> RA + Send,
        B: FnOnce() -> RB + Send,
        RA: Send,
        RB: Send,
    {
        let ra = a();
        let rb = b();
        (ra, rb)
    }
}

#[cfg(not(feature = "threading"))]
pub use sequential::*;
