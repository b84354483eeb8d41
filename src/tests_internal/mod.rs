//! End-to-end scenarios exercising the merge, the selector, and the
//! admission semaphore together.

mod properties;
mod semaphore;
