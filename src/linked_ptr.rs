use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    mem::{self, ManuallyDrop},
    ops::Deref,
    ptr::{self, NonNull},
};

use log::{debug, trace};

use crate::{error::UnwrapError, link::Link};

/// A pointer that shares ownership of a heap-allocated `T` with every pointer it was cloned from
/// or into. There is no reference count: the co-owners form a ring (see [`crate::link`]), and the
/// value is dropped when the last member of the ring goes away.
///
/// Pointers of different types can share a ring, as long as one is an unsizing of the other
/// (e.g. `LinkedPtr<Circle>` and `LinkedPtr<dyn Shape>`); see [`coerce_linked!`].
///
/// Cloning, dropping and resetting are O(1). Asking for the number of owners
/// ([`LinkedPtr::use_count`]) walks the ring.
///
/// This type is neither `Send` nor `Sync`: the ring links are plain memory shared between all the
/// co-owners.
///
/// [`coerce_linked!`]: crate::coerce_linked
pub struct LinkedPtr<T: ?Sized> {
    link: NonNull<Link>,
    // Null data pointer when empty. Every pointer in the ring holds the same address.
    value: *const T,
    // We own a `T`, like `Box<T>` does.
    _owns: PhantomData<T>,
}

impl<T> LinkedPtr<T> {
    /// Move `value` to the heap and own it alone.
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }

    /// A pointer to nothing.
    pub fn empty() -> Self {
        // Safety: a null pointer is always fine.
        unsafe { Self::from_raw(ptr::null_mut()) }
    }
}

impl<T: ?Sized> LinkedPtr<T> {
    /// Take ownership of a boxed value.
    pub fn from_box(value: Box<T>) -> Self {
        // Safety: the pointer comes straight out of a `Box` we own.
        unsafe { Self::from_raw(Box::into_raw(value)) }
    }

    /// Take ownership of a raw pointer. A null pointer gives an empty `LinkedPtr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or come from [`Box::into_raw`], and nothing else may own it afterwards.
    /// In particular, building two `LinkedPtr`s from the same pointer makes two rings that each
    /// believe they are the sole owner, and the value gets freed twice. Use `clone` to share.
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        LinkedPtr {
            link: Link::new_ring(),
            value: ptr,
            _owns: PhantomData,
        }
    }

    /// Turn this into a pointer to `U` that stays in the same ring.
    ///
    /// # Safety
    ///
    /// `coerce` must return its argument unchanged apart from an unsizing coercion. Whichever
    /// pointer of the ring is dropped last frees the value through its own pointee type, so that
    /// type has to describe the same allocation. [`coerce_linked!`](crate::coerce_linked) is the
    /// safe way to call this.
    pub unsafe fn coerce_with<U: ?Sized>(
        this: Self,
        coerce: impl FnOnce(*const T) -> *const U,
    ) -> LinkedPtr<U> {
        let this = ManuallyDrop::new(this);
        LinkedPtr {
            link: this.link,
            value: coerce(this.value),
            _owns: PhantomData,
        }
    }

    /// The raw pointer to the value, without touching ownership. The pointer dangles once every
    /// owner is gone.
    pub fn get(&self) -> *const T {
        self.value
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    pub fn is_some(&self) -> bool {
        !self.is_null()
    }

    /// Borrow the value, or `None` if the pointer is empty.
    pub fn as_ref(&self) -> Option<&T> {
        // Safety: a non-null `value` is kept alive by the ring, which includes `self`.
        unsafe { self.value.as_ref() }
    }

    /// Mutably borrow the value, if this is its only owner.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        if !self.unique() {
            return None;
        }
        // Safety: no other pointer can reach the value, and we hold `self` mutably.
        unsafe { self.value.cast_mut().as_mut() }
    }

    /// Whether this is the only member of its ring. This says nothing about whether the pointer
    /// is empty.
    pub fn unique(&self) -> bool {
        // Safety: `self.link` is live for as long as `self`.
        unsafe { Link::is_unique(self.link) }
    }

    /// Number of pointers in the ring, `self` included. This walks the ring.
    pub fn use_count(&self) -> usize {
        // Safety: as above, and every member of our ring is live.
        unsafe { Link::ring_len(self.link) }
    }

    /// Whether `self` and `other` share ownership. This walks the ring.
    pub fn shares_ring_with<U: ?Sized>(&self, other: &LinkedPtr<U>) -> bool {
        // Safety: both links are live.
        unsafe { Link::same_ring(self.link, other.link) }
    }

    /// Let go of the value, dropping it if this was its last owner. `self` is left empty.
    pub fn reset(&mut self) {
        self.replace(self.value.with_addr(0));
    }

    /// Let go of the value, dropping it if this was its last owner, and own `value` alone instead.
    /// Former co-owners are unaffected.
    pub fn reset_with(&mut self, value: Box<T>) {
        self.replace(Box::into_raw(value));
    }

    /// Let go of the value, as [`LinkedPtr::reset`] does, then join the ring of `other`.
    ///
    /// Assigning from a pointer that is already a co-owner leaves the value and the size of the
    /// ring as they were.
    pub fn assign(&mut self, other: &Self) {
        self.bind_to(other.value, other.link);
    }

    /// Exchange the values of `self` and `other` together with their co-owners: whoever shared
    /// with `self` now shares with `other`, and vice versa. Nothing is allocated or dropped.
    ///
    /// If both hold the same value this does nothing. Zero-sized values all live at the same
    /// dangling address, so for those "the same value" means being in the same ring, which this
    /// checks by walking it.
    pub fn swap(&mut self, other: &mut Self) {
        if ptr::addr_eq(self.value, other.value) {
            let zero_sized = self.as_ref().is_some_and(|value| mem::size_of_val(value) == 0);
            if !zero_sized || self.shares_ring_with(other) {
                return;
            }
        }
        // Safety: a ring has a single value, so different values mean different rings. Equal
        // zero-sized values were checked to be in different rings above.
        unsafe { Link::swap_rings(self.link, other.link) };
        mem::swap(&mut self.value, &mut other.value);
    }

    /// Get the value back if `this` is its only owner. Otherwise, or if `this` is empty, `this`
    /// is returned unchanged.
    pub fn try_unwrap(this: Self) -> Result<Box<T>, Self> {
        if this.is_null() || !this.unique() {
            return Err(this);
        }
        let this = ManuallyDrop::new(this);
        // Safety: the link is a singleton that nothing else points to, and we are the only owner
        // of the value.
        unsafe {
            Link::free(this.link);
            Ok(Box::from_raw(this.value.cast_mut()))
        }
    }

    /// Like [`LinkedPtr::try_unwrap`], except that on failure `this` is dropped and the reason is
    /// returned.
    pub fn into_box(this: Self) -> Result<Box<T>, UnwrapError> {
        Self::try_unwrap(this).map_err(|this| {
            let err = if this.is_null() {
                UnwrapError::Empty
            } else {
                UnwrapError::Shared {
                    others: this.use_count() - 1,
                }
            };
            debug!("can't take the value out of a `LinkedPtr`: {err}");
            err
        })
    }

    /// Leave the current ring and return whether we were its last member. `self.link` is a
    /// singleton afterwards.
    fn leave_ring(&mut self) -> bool {
        // Safety: `self.link` is live and so is its ring.
        unsafe {
            if Link::is_unique(self.link) {
                true
            } else {
                trace!("leaving a ring that still has other owners");
                Link::remove(self.link);
                false
            }
        }
    }

    /// Release the current value and own `value` alone.
    fn replace(&mut self, value: *const T) {
        let old = mem::replace(&mut self.value, value);
        if self.leave_ring() {
            // Safety: we were the last owner of `old`.
            unsafe { Self::drop_value(old) };
        }
    }

    /// Release the current value and join the ring of `link`, which owns `value`.
    fn bind_to(&mut self, value: *const T, link: NonNull<Link>) {
        let old = mem::replace(&mut self.value, value);
        let was_last = self.leave_ring();
        // Safety: our link is a singleton after `leave_ring`, and `link` is live.
        unsafe { Link::splice_after(self.link, link) };
        if was_last {
            // Safety: we were the last owner of `old`, and we're done with it.
            unsafe { Self::drop_value(old) };
        }
    }

    /// Safety: `value` must be null or an allocation that nobody owns anymore.
    unsafe fn drop_value(value: *const T) {
        if value.is_null() {
            return;
        }
        trace!("last owner gone, dropping {value:p}");
        drop(unsafe { Box::from_raw(value.cast_mut()) });
    }

    fn addr(&self) -> *const () {
        self.value.cast()
    }
}

#[cfg(feature = "unsize")]
impl<T: ?Sized + std::marker::Unsize<U>, U: ?Sized> std::ops::CoerceUnsized<LinkedPtr<U>>
    for LinkedPtr<T>
{
}

#[cfg(feature = "unsize")]
impl<T: ?Sized> LinkedPtr<T> {
    /// [`LinkedPtr::assign`] from a pointer whose type unsizes to ours.
    pub fn assign_from<U: ?Sized + std::marker::Unsize<T>>(&mut self, other: &LinkedPtr<U>) {
        self.bind_to(other.value, other.link);
    }
}

/// Share a [`LinkedPtr`] as a pointer to a type it unsizes to, typically a trait object. The new
/// pointer stays in the same ring as the old one.
///
/// ```
/// # use linked_ptr::{LinkedPtr, coerce_linked};
/// use std::fmt::Display;
///
/// let text = LinkedPtr::new(String::from("hi"));
/// let shown: LinkedPtr<dyn Display> = coerce_linked!(text.clone() => dyn Display);
/// assert!(shown.shares_ring_with(&text));
/// ```
#[macro_export]
macro_rules! coerce_linked {
    ($ptr:expr => $target:ty) => {{
        let ptr = $ptr;
        // Safety: the closure can only coerce, not cast.
        unsafe { $crate::LinkedPtr::coerce_with(ptr, |p| -> *const $target { p }) }
    }};
}

/// Same as [`LinkedPtr::from_box`].
pub fn make_linked_ptr<T: ?Sized>(value: Box<T>) -> LinkedPtr<T> {
    LinkedPtr::from_box(value)
}

/// Same as [`LinkedPtr::swap`].
pub fn swap<T: ?Sized>(a: &mut LinkedPtr<T>, b: &mut LinkedPtr<T>) {
    a.swap(b)
}

impl<T: ?Sized> Clone for LinkedPtr<T> {
    /// Join the ring of `self`. This writes to the ring links of `self`, even though we only have
    /// a shared reference to it.
    fn clone(&self) -> Self {
        let link = Link::new_ring();
        // Safety: `link` is a fresh singleton and `self.link` is live.
        unsafe { Link::splice_after(link, self.link) };
        LinkedPtr {
            link,
            value: self.value,
            _owns: PhantomData,
        }
    }

    fn clone_from(&mut self, source: &Self) {
        self.assign(source)
    }
}

impl<T: ?Sized> Drop for LinkedPtr<T> {
    fn drop(&mut self) {
        let was_last = self.leave_ring();
        // Safety: the link is ours and a singleton now. The value is only dropped if nobody else
        // owns it.
        unsafe {
            Link::free(self.link);
            if was_last {
                Self::drop_value(self.value);
            }
        }
    }
}

impl<T: ?Sized> Deref for LinkedPtr<T> {
    type Target = T;
    fn deref(&self) -> &T {
        match self.as_ref() {
            Some(value) => value,
            None => panic!("dereferenced an empty `LinkedPtr`"),
        }
    }
}

impl<T> Default for LinkedPtr<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> From<T> for LinkedPtr<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: ?Sized> From<Box<T>> for LinkedPtr<T> {
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

// Comparisons only look at the address of the value, not at ring membership or at the metadata of
// wide pointers.
impl<T: ?Sized, U: ?Sized> PartialEq<LinkedPtr<U>> for LinkedPtr<T> {
    fn eq(&self, other: &LinkedPtr<U>) -> bool {
        ptr::addr_eq(self.value, other.value)
    }
}

impl<T: ?Sized> Eq for LinkedPtr<T> {}

impl<T: ?Sized, U: ?Sized> PartialOrd<LinkedPtr<U>> for LinkedPtr<T> {
    fn partial_cmp(&self, other: &LinkedPtr<U>) -> Option<Ordering> {
        Some(self.addr().cmp(&other.addr()))
    }
}

impl<T: ?Sized> Ord for LinkedPtr<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.addr().cmp(&other.addr())
    }
}

impl<T: ?Sized> Hash for LinkedPtr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state)
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for LinkedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_ref() {
            Some(value) => value.fmt(f),
            None => f.write_str("<empty>"),
        }
    }
}

impl<T: ?Sized + fmt::Display> fmt::Display for LinkedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_ref() {
            Some(value) => value.fmt(f),
            None => f.write_str("<empty>"),
        }
    }
}

impl<T: ?Sized> fmt::Pointer for LinkedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.value, f)
    }
}
