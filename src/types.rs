use std::fmt::Debug;

use crate::errors::ForestError;

pub type Result<T> = std::result::Result<T, ForestError>;

/// A compact unsigned width backing the handle columns of the arenas.
///
/// Each store picks a width at construction and vends plain `usize` handles
/// at its API boundary; the width only decides how much memory a column
/// slot takes. The all-ones value of the width is reserved as the null
/// handle, so a slot can say "no link" without an option flag, and valid
/// handles live in `[0, NULL)`.
pub trait HandleWidth: Copy + PartialEq + Debug + Send + Sync {
    const NULL: Self;

    /// Narrows an in-range handle into a column slot; configurations are
    /// checked up front so the capacity always fits the width.
    fn from_index(index: usize) -> Self;

    /// Widens a column slot back into a handle.
    fn index(self) -> usize;

    fn is_null(self) -> bool {
        self == Self::NULL
    }
}

impl HandleWidth for u8 {
    const NULL: u8 = u8::MAX;

    fn from_index(index: usize) -> u8 {
        u8::try_from(index).expect("handle exceeds u8 column width")
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl HandleWidth for u16 {
    const NULL: u16 = u16::MAX;

    fn from_index(index: usize) -> u16 {
        u16::try_from(index).expect("handle exceeds u16 column width")
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl HandleWidth for usize {
    const NULL: usize = usize::MAX;

    fn from_index(index: usize) -> usize {
        index
    }

    fn index(self) -> usize {
        self
    }
}
