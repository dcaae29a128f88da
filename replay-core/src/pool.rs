//! Pools of reusable queue-owned objects.
//!
//! Every object a queue hands to the GPU is cycled between an available
//! list and a busy list. Objects are only ever destroyed at queue teardown.

use hal::DeviceError;
use std::{
    collections::VecDeque, convert::TryFrom, fmt, hash, marker::PhantomData, num::NonZeroU32,
};

/// A strongly typed reference to a pooled object.
///
/// The "non-zero" part ensures that an `Option<Handle<T>>` has
/// the same size and representation as `Handle<T>`.
pub struct Handle<T> {
    index: NonZeroU32,
    marker: PhantomData<T>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "[{}]", self.index())
    }
}

impl<T> hash::Hash for Handle<T> {
    fn hash<H: hash::Hasher>(&self, hasher: &mut H) {
        self.index.hash(hasher)
    }
}

impl<T> Handle<T> {
    fn from_usize(index: usize) -> Option<Self> {
        let index = u32::try_from(index + 1).ok().and_then(NonZeroU32::new)?;
        Some(Handle {
            index,
            marker: PhantomData,
        })
    }

    /// Returns the index of this handle.
    pub fn index(self) -> usize {
        self.index.get() as usize - 1
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolState {
    Available,
    Busy,
}

/// An available/busy double queue of `T`.
///
/// Busy objects are kept in acquisition order, and have to be reclaimed
/// in that same order.
pub struct ResourcePool<T> {
    kind: &'static str,
    items: Vec<T>,
    available: VecDeque<Handle<T>>,
    busy: VecDeque<Handle<T>>,
}

impl<T> fmt::Debug for ResourcePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("kind", &self.kind)
            .field("available", &self.available.len())
            .field("busy", &self.busy.len())
            .finish()
    }
}

impl<T> ResourcePool<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            items: Vec::new(),
            available: VecDeque::new(),
            busy: VecDeque::new(),
        }
    }

    /// Marks the oldest available object busy, or creates a new one
    /// with `create` if there is none.
    ///
    /// If `create` fails, or the pool has run out of handles, the pool
    /// is left untouched.
    pub fn acquire<E, F>(&mut self, create: F) -> Result<Handle<T>, E>
    where
        E: From<DeviceError>,
        F: FnOnce() -> Result<T, E>,
    {
        let handle = match self.available.pop_front() {
            Some(handle) => handle,
            None => {
                let handle = match Handle::from_usize(self.items.len()) {
                    Some(handle) => handle,
                    None => {
                        log::error!("{} pool overflows its handle space", self.kind);
                        return Err(DeviceError::OutOfMemory.into());
                    }
                };
                let item = create()?;
                self.items.push(item);
                log::debug!("Growing {} pool to {} objects", self.kind, self.items.len());
                handle
            }
        };
        self.busy.push_back(handle);
        Ok(handle)
    }

    /// Moves `handles` from busy back to available, calling `recycle` on each.
    ///
    /// `handles` must list the objects in the order they were acquired.
    pub fn reclaim<F>(&mut self, handles: &[Handle<T>], mut recycle: F)
    where
        F: FnMut(&mut T),
    {
        for &handle in handles {
            if self.busy.front() == Some(&handle) {
                self.busy.pop_front();
            } else {
                debug_assert!(
                    false,
                    "{} {:?} reclaimed out of acquisition order",
                    self.kind, handle
                );
                match self.busy.iter().position(|&h| h == handle) {
                    Some(position) => {
                        self.busy.remove(position);
                    }
                    None => {
                        log::warn!("{} {:?} reclaimed while not busy", self.kind, handle);
                        continue;
                    }
                }
            }
            recycle(&mut self.items[handle.index()]);
            self.available.push_back(handle);
        }
    }

    /// Undoes the latest `acquire`, making `handle` the next object handed out.
    pub fn cancel(&mut self, handle: Handle<T>) {
        if self.busy.back() != Some(&handle) {
            debug_assert!(false, "{} {:?} is not the latest acquired", self.kind, handle);
            log::warn!("Cannot cancel {} {:?}", self.kind, handle);
            return;
        }
        self.busy.pop_back();
        self.available.push_front(handle);
    }

    pub fn get(&self, handle: Handle<T>) -> &T {
        &self.items[handle.index()]
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> &mut T {
        &mut self.items[handle.index()]
    }

    pub fn state(&self, handle: Handle<T>) -> PoolState {
        if self.available.contains(&handle) {
            PoolState::Available
        } else {
            PoolState::Busy
        }
    }

    pub fn available_count(&self) -> usize {
        self.available.len()
    }

    pub fn busy_count(&self) -> usize {
        self.busy.len()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Destroys every object of the pool.
    ///
    /// This is only called when the owning queue is dropped.
    pub fn dispose<F>(&mut self, mut destroy: F)
    where
        F: FnMut(T),
    {
        debug_assert!(
            self.busy.is_empty(),
            "{} {:?} still busy on teardown",
            self.kind,
            self.busy
        );
        log::trace!("Disposing {} {} objects", self.items.len(), self.kind);
        self.available.clear();
        self.busy.clear();
        for item in self.items.drain(..) {
            destroy(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Tagged {
        tag: usize,
        recycled: usize,
    }

    fn acquire(pool: &mut ResourcePool<Tagged>, next_tag: &mut usize) -> Handle<Tagged> {
        pool.acquire(|| -> Result<_, DeviceError> {
            *next_tag += 1;
            Ok(Tagged {
                tag: *next_tag,
                recycled: 0,
            })
        })
        .unwrap()
    }

    #[test]
    fn reuse_is_fifo() {
        let mut pool = ResourcePool::new("test");
        let mut tag = 0;
        let a = acquire(&mut pool, &mut tag);
        let b = acquire(&mut pool, &mut tag);
        let c = acquire(&mut pool, &mut tag);
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(pool.busy_count(), 3);

        pool.reclaim(&[a, b], |item| item.recycled += 1);
        assert_eq!(pool.state(a), PoolState::Available);
        assert_eq!(pool.state(c), PoolState::Busy);

        // The earliest released object comes back first, nothing new is created.
        assert_eq!(acquire(&mut pool, &mut tag), a);
        assert_eq!(acquire(&mut pool, &mut tag), b);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.get(b).recycled, 1);
        assert_eq!(pool.get(c).recycled, 0);

        // Nothing left: a busy object is never handed out twice.
        let d = acquire(&mut pool, &mut tag);
        assert!(d != a && d != b && d != c);
        assert_eq!(pool.get(d).tag, 4);
    }

    #[test]
    fn failed_creation_leaves_no_trace() {
        let mut pool = ResourcePool::<Tagged>::new("test");
        let result = pool.acquire(|| Err(DeviceError::Lost));
        assert_eq!(result, Err(DeviceError::Lost));
        assert_eq!(pool.len(), 0);
        assert_eq!(pool.busy_count(), 0);
    }

    #[test]
    fn handle_space_ends_below_u32_max() {
        assert!(Handle::<Tagged>::from_usize(u32::MAX as usize - 1).is_some());
        assert!(Handle::<Tagged>::from_usize(u32::MAX as usize).is_none());
    }

    #[test]
    fn cancel_returns_the_latest_acquisition() {
        let mut pool = ResourcePool::new("test");
        let mut tag = 0;
        let a = acquire(&mut pool, &mut tag);
        let b = acquire(&mut pool, &mut tag);
        pool.cancel(b);
        assert_eq!(pool.state(b), PoolState::Available);
        assert_eq!(pool.state(a), PoolState::Busy);
        assert_eq!(pool.busy_count(), 1);
        assert_eq!(acquire(&mut pool, &mut tag), b);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn dispose_destroys_everything() {
        let mut pool = ResourcePool::new("test");
        let mut tag = 0;
        let a = acquire(&mut pool, &mut tag);
        let _ = acquire(&mut pool, &mut tag);
        pool.reclaim(&[a], |_| {});
        let b = pool.busy.front().cloned().unwrap();
        pool.reclaim(&[b], |_| {});
        let mut destroyed = Vec::new();
        pool.dispose(|item| destroyed.push(item.tag));
        assert_eq!(destroyed, vec![1, 2]);
        assert!(pool.is_empty());
    }

    #[test]
    fn option_handle_is_small() {
        assert_eq!(
            std::mem::size_of::<Option<Handle<Tagged>>>(),
            std::mem::size_of::<Handle<Tagged>>()
        );
    }
}
