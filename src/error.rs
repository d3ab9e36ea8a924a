use thiserror::Error;

/// The reason [`LinkedPtr::into_box`](crate::LinkedPtr::into_box) could not hand over the value.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum UnwrapError {
    #[error("the pointer is empty")]
    Empty,
    #[error("the value is still owned by {others} other pointer(s)")]
    Shared { others: usize },
}
