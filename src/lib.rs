//! Shared ownership without a reference count.
//!
//! A [`LinkedPtr`] behaves like `Rc` without weak pointers, but the owners of a value are tracked
//! by linking them together in a ring (see [`link`]). Joining and leaving the ring is O(1) and
//! there is no count stored next to the value; the last owner to leave the ring drops the value.
//!
//! With the `unsize` feature (nightly only), `LinkedPtr<T>` coerces to `LinkedPtr<dyn Trait>`
//! implicitly. On stable, use [`coerce_linked!`].
#![cfg_attr(feature = "unsize", feature(coerce_unsized, unsize))]

mod error;
pub mod link;
mod linked_ptr;

pub use error::UnwrapError;
pub use linked_ptr::{LinkedPtr, make_linked_ptr, swap};
