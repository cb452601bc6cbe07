//! Object pool
//! Mission: avoid allocating a fresh heap object per order on the hot path.
//! Pre-warms `preallocated_objects` instances at startup; `acquire` reuses
//! one if available, falling back to a fresh allocation under burst load.

use parking_lot::Mutex;

pub struct ObjectPool<T> {
    free: Mutex<Vec<T>>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
}

pub struct PooledObject<'a, T> {
    pool: &'a ObjectPool<T>,
    item: Option<T>,
}

impl<'a, T> std::ops::Deref for PooledObject<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.item.as_ref().expect("item taken only on drop")
    }
}

impl<'a, T> std::ops::DerefMut for PooledObject<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("item taken only on drop")
    }
}

impl<'a, T> Drop for PooledObject<'a, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.free.lock().push(item);
        }
    }
}

impl<T> ObjectPool<T> {
    pub fn new(preallocate: usize, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        let mut free = Vec::with_capacity(preallocate);
        for _ in 0..preallocate {
            free.push(factory());
        }
        Self {
            free: Mutex::new(free),
            factory: Box::new(factory),
        }
    }

    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    pub fn acquire(&self) -> PooledObject<'_, T> {
        let item = self.free.lock().pop().unwrap_or_else(|| (self.factory)());
        PooledObject {
            pool: self,
            item: Some(item),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_returned_objects() {
        let pool = ObjectPool::new(2, Vec::<u8>::new);
        assert_eq!(pool.available(), 2);
        {
            let _obj = pool.acquire();
            assert_eq!(pool.available(), 1);
        }
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn grows_beyond_preallocation_under_burst() {
        let pool = ObjectPool::new(1, Vec::<u8>::new);
        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(pool.available(), 0);
        drop(a);
        drop(b);
        assert_eq!(pool.available(), 2);
    }
}
