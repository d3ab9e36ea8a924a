//! The ring that a group of co-owning pointers forms: an intrusive, circular, doubly-linked list
//! with one link per pointer and no sentinel.
//!
//! Every function here takes raw links and is `unsafe`: the ring is a web of aliasing pointers
//! that the borrow checker can't see, so the caller vouches for it. The contract is always the
//! same unless stated otherwise: every link passed in (and every link reachable from it) is live
//! and part of a valid ring.
use std::{cell::Cell, collections::HashSet, ptr::NonNull};

/// One member of a ring.
///
/// Links live on the heap so that their address survives moves of the pointer that owns them. The
/// fields are `Cell`s because joining a ring writes to the link of the pointer we copy from, which
/// we only reach through a shared reference.
// Invariant: `self.prev.next == self` and `self.next.prev == self`.
#[derive(Debug)]
pub struct Link {
    prev: Cell<NonNull<Link>>,
    next: Cell<NonNull<Link>>,
}

impl Link {
    // Helpers
    unsafe fn prev(this: NonNull<Self>) -> NonNull<Self> {
        unsafe { this.as_ref().prev.get() }
    }
    unsafe fn next(this: NonNull<Self>) -> NonNull<Self> {
        unsafe { this.as_ref().next.get() }
    }
    unsafe fn set_prev(this: NonNull<Self>, prev: NonNull<Self>) {
        unsafe { this.as_ref().prev.set(prev) }
    }
    unsafe fn set_next(this: NonNull<Self>, next: NonNull<Self>) {
        unsafe { this.as_ref().next.set(next) }
    }
    unsafe fn make_singleton(this: NonNull<Self>) {
        unsafe {
            Self::set_prev(this, this);
            Self::set_next(this, this);
        }
    }
    /// Point the neighbours recorded in `this` back at `this`.
    unsafe fn relink_neighbours(this: NonNull<Self>) {
        unsafe {
            Self::set_prev(Self::next(this), this);
            Self::set_next(Self::prev(this), this);
        }
    }
    /// `singleton` takes the ring position of `member`, which is left as a singleton.
    unsafe fn take_place(singleton: NonNull<Self>, member: NonNull<Self>) {
        unsafe {
            Self::set_prev(singleton, Self::prev(member));
            Self::set_next(singleton, Self::next(member));
            Self::relink_neighbours(singleton);
            Self::make_singleton(member);
        }
    }

    /// Allocate a new link that forms a ring on its own.
    pub fn new_ring() -> NonNull<Self> {
        let link = NonNull::from(Box::leak(Box::new(Link {
            prev: Cell::new(NonNull::dangling()),
            next: Cell::new(NonNull::dangling()),
        })));
        // Safety: we just allocated it.
        unsafe { Self::make_singleton(link) };
        link
    }

    /// Deallocate a link.
    ///
    /// # Safety
    ///
    /// `this` must come from [`Link::new_ring`], must be a singleton and must not be used again.
    pub unsafe fn free(this: NonNull<Self>) {
        debug_assert!(
            unsafe { Self::is_unique(this) },
            "freed a link that is still part of a ring"
        );
        drop(unsafe { Box::from_raw(this.as_ptr()) });
    }

    /// Whether `this` is alone in its ring.
    ///
    /// # Safety
    ///
    /// See the module docs.
    pub unsafe fn is_unique(this: NonNull<Self>) -> bool {
        unsafe { Self::next(this) == this }
    }

    /// Insert `new` into the ring of `existing`, right after `existing`. Works for rings of any
    /// size.
    ///
    /// # Safety
    ///
    /// See the module docs. `new` must additionally be a singleton, otherwise its old ring is left
    /// pointing at it.
    pub unsafe fn splice_after(new: NonNull<Self>, existing: NonNull<Self>) {
        unsafe {
            debug_assert!(Self::is_unique(new), "spliced a link that is already in a ring");
            let next = Self::next(existing);
            Self::set_prev(new, existing);
            Self::set_next(new, next);
            Self::set_next(existing, new);
            Self::set_prev(next, new);
            debug_assert!(Self::is_linked(new) && Self::is_linked(existing));
        }
    }

    /// Take `this` out of its ring and make it a singleton. The rest of the ring is closed up
    /// around the gap. On a singleton this does nothing.
    ///
    /// Whether the removed link was the last owner of anything has to be decided by checking
    /// [`Link::is_unique`] before calling this.
    ///
    /// # Safety
    ///
    /// See the module docs.
    pub unsafe fn remove(this: NonNull<Self>) {
        unsafe {
            let prev = Self::prev(this);
            let next = Self::next(this);
            Self::set_next(prev, next);
            Self::set_prev(next, prev);
            Self::make_singleton(this);
            debug_assert!(Self::is_linked(prev) && Self::is_linked(this));
        }
    }

    /// Exchange the ring positions of `a` and `b`: afterwards `a` sits where `b` was, with `b`'s
    /// old neighbours pointing at it, and vice versa.
    ///
    /// # Safety
    ///
    /// See the module docs. `a` and `b` must be the same link or belong to different rings.
    pub unsafe fn swap_rings(a: NonNull<Self>, b: NonNull<Self>) {
        if a == b {
            return;
        }
        unsafe {
            match (Self::is_unique(a), Self::is_unique(b)) {
                (true, true) => {}
                (true, false) => Self::take_place(a, b),
                (false, true) => Self::take_place(b, a),
                (false, false) => {
                    let (a_prev, a_next) = (Self::prev(a), Self::next(a));
                    let (b_prev, b_next) = (Self::prev(b), Self::next(b));
                    Self::set_prev(a, b_prev);
                    Self::set_next(a, b_next);
                    Self::set_prev(b, a_prev);
                    Self::set_next(b, a_next);
                    Self::relink_neighbours(a);
                    Self::relink_neighbours(b);
                }
            }
            debug_assert!(Self::is_linked(a) && Self::is_linked(b));
        }
    }

    /// Iterate over the ring, starting at `this` and following `next`.
    ///
    /// # Safety
    ///
    /// See the module docs. The ring must not change while the iterator is in use.
    pub unsafe fn members(this: NonNull<Self>) -> impl Iterator<Item = NonNull<Self>> {
        let mut cur = Some(this);
        std::iter::from_fn(move || {
            let link = cur?;
            // Safety: the caller keeps the ring alive and unchanged.
            let next = unsafe { Self::next(link) };
            cur = (next != this).then_some(next);
            Some(link)
        })
    }

    /// Number of links in the ring of `this`.
    ///
    /// # Safety
    ///
    /// See the module docs.
    pub unsafe fn ring_len(this: NonNull<Self>) -> usize {
        unsafe { Self::members(this) }.count()
    }

    /// Whether `a` and `b` belong to the same ring.
    ///
    /// # Safety
    ///
    /// See the module docs.
    pub unsafe fn same_ring(a: NonNull<Self>, b: NonNull<Self>) -> bool {
        unsafe { Self::members(a) }.any(|link| link == b)
    }

    /// Check that `this` and its two neighbours point at each other. This is the O(1) part of
    /// [`Link::is_consistent`].
    ///
    /// # Safety
    ///
    /// `this` and its neighbours must be live; the links need not be consistent.
    pub unsafe fn is_linked(this: NonNull<Self>) -> bool {
        unsafe { Self::next(Self::prev(this)) == this && Self::prev(Self::next(this)) == this }
    }

    /// Walk the ring of `this` and check that every member is properly linked to both of its
    /// neighbours. Also catches `next` chains that loop without coming back to `this`.
    ///
    /// # Safety
    ///
    /// Every link reachable from `this` must be live; the links need not be consistent.
    pub unsafe fn is_consistent(this: NonNull<Self>) -> bool {
        let mut seen = HashSet::new();
        for link in unsafe { Self::members(this) } {
            if !seen.insert(link) {
                return false;
            }
            if !unsafe { Self::is_linked(link) } {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a ring of `len` links, in `next` order.
    fn ring(len: usize) -> Vec<NonNull<Link>> {
        let links: Vec<_> = (0..len).map(|_| Link::new_ring()).collect();
        for pair in links.windows(2) {
            unsafe { Link::splice_after(pair[1], pair[0]) };
        }
        links
    }

    fn free_all(links: impl IntoIterator<Item = NonNull<Link>>) {
        for link in links {
            unsafe {
                Link::remove(link);
                Link::free(link);
            }
        }
    }

    fn assert_consistent(links: &[NonNull<Link>]) {
        for &link in links {
            assert!(unsafe { Link::is_consistent(link) });
        }
    }

    #[test]
    fn new_ring_is_singleton() {
        let link = Link::new_ring();
        unsafe {
            assert!(Link::is_unique(link));
            assert_eq!(Link::prev(link), link);
            assert_eq!(Link::ring_len(link), 1);
            assert!(Link::is_consistent(link));
        }
        free_all([link]);
    }

    #[test]
    fn splice_keeps_order() {
        let links = ring(4);
        assert_consistent(&links);
        unsafe {
            let order: Vec<_> = Link::members(links[0]).collect();
            assert_eq!(order, links);
            assert_eq!(Link::ring_len(links[2]), 4);
            assert!(!Link::is_unique(links[3]));
        }

        // Splicing in the middle puts the new link right after its anchor.
        let new = Link::new_ring();
        unsafe {
            Link::splice_after(new, links[1]);
            assert_eq!(Link::next(links[1]), new);
            assert_eq!(Link::prev(links[2]), new);
            assert!(Link::same_ring(links[3], new));
        }
        assert_consistent(&links);
        free_all(links.into_iter().chain([new]));
    }

    #[test]
    fn remove() {
        let links = ring(3);
        unsafe {
            Link::remove(links[1]);
            assert!(Link::is_unique(links[1]));
            assert_eq!(Link::next(links[0]), links[2]);
            assert_eq!(Link::ring_len(links[0]), 2);
            assert!(!Link::same_ring(links[0], links[1]));

            // Removing a singleton keeps it a singleton.
            Link::remove(links[1]);
            assert!(Link::is_unique(links[1]));

            // Down to two then one.
            Link::remove(links[0]);
            assert!(Link::is_unique(links[2]));
        }
        assert_consistent(&links);
        free_all(links);
    }

    #[test]
    fn swap_two_singletons() {
        let (a, b) = (Link::new_ring(), Link::new_ring());
        unsafe {
            Link::swap_rings(a, b);
            assert!(Link::is_unique(a));
            assert!(Link::is_unique(b));
        }
        free_all([a, b]);
    }

    #[test]
    fn swap_singleton_into_ring() {
        let shared = ring(2);
        let (a, a2) = (shared[0], shared[1]);
        let b = Link::new_ring();
        unsafe {
            Link::swap_rings(a, b);
            assert!(Link::is_unique(a));
            assert!(Link::same_ring(b, a2));
            assert_eq!(Link::ring_len(a2), 2);
            // And back again, from the other side.
            Link::swap_rings(a, b);
            assert!(Link::is_unique(b));
            assert!(Link::same_ring(a, a2));
        }
        assert_consistent(&[a, a2, b]);
        free_all([a, a2, b]);
    }

    #[test]
    fn swap_two_rings() {
        let left = ring(3);
        let right = ring(2);
        let (a, b) = (left[1], right[0]);
        unsafe {
            Link::swap_rings(a, b);
            assert_eq!(Link::ring_len(a), 2);
            assert!(Link::same_ring(a, right[1]));
            assert_eq!(Link::ring_len(b), 3);
            assert!(Link::same_ring(b, left[0]));
            assert!(Link::same_ring(b, left[2]));
            // `b` took the exact position of `a`.
            assert_eq!(Link::next(left[0]), b);
            assert_eq!(Link::prev(left[2]), b);
        }
        assert_consistent(&left);
        assert_consistent(&right);
        free_all(left.into_iter().chain(right));
    }

    #[test]
    fn swap_with_itself() {
        let links = ring(2);
        unsafe { Link::swap_rings(links[0], links[0]) };
        assert_consistent(&links);
        assert_eq!(unsafe { Link::ring_len(links[0]) }, 2);
        free_all(links);
    }

    #[test]
    fn broken_ring_is_detected() {
        let links = ring(3);
        unsafe {
            // Skip over `links[1]` in the forward direction only.
            Link::set_next(links[0], links[2]);
            assert!(!Link::is_consistent(links[0]));
            assert!(!Link::is_linked(links[0]));
            assert!(!Link::is_linked(links[1]));
            Link::set_next(links[0], links[1]);
            assert!(Link::is_consistent(links[0]));
        }
        free_all(links);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "is_linked")]
    fn remove_checks_neighbours() {
        let links = ring(3);
        unsafe {
            // `links[2].next` should be `links[0]`.
            Link::set_next(links[2], links[1]);
            Link::remove(links[1]);
        }
    }
}
