//! Address-stable mutable cells.

use std::cell::UnsafeCell;

/// A cell whose address is handed to generated code as a plain constant.
/// The runtime instance owning it is pinned (boxed) for its whole lifetime,
/// so the address stays valid across compilations and calls.
///
/// The runtime is single-threaded cooperative; nothing reads or writes these
/// cells concurrently.
#[derive(Debug)]
pub struct GlobalCell<T>(UnsafeCell<T>);

unsafe impl<T> Sync for GlobalCell<T> {}

impl<T: Copy> GlobalCell<T> {
    pub const fn new(v: T) -> Self {
        GlobalCell(UnsafeCell::new(v))
    }

    pub fn get(&self) -> T {
        unsafe { *self.0.get() }
    }

    pub fn set(&self, v: T) {
        unsafe { *self.0.get() = v }
    }

    /// The address generated code loads from or stores to.
    pub fn addr(&self) -> u64 {
        self.0.get() as u64
    }
}

impl<T: Copy + Default> Default for GlobalCell<T> {
    fn default() -> Self {
        GlobalCell::new(T::default())
    }
}
