//! Bounded connection pool with scoped acquisition.
//!
//! Connections are opened lazily up to `max_size` and handed out as
//! [`Pooled`] guards. Dropping the guard returns the connection on every exit
//! path (normal return, `?`, panic unwinding). A guard marked broken closes
//! its connection instead and frees the slot.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use super::CollectError;

/// Opens new connections for a pool.
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + 'static;

    fn connect(&self) -> Result<Self::Connection, CollectError>;
}

struct PoolState<T> {
    idle: Vec<T>,
    open: usize,
}

struct PoolInner<C: Connector> {
    connector: C,
    max_size: usize,
    state: Mutex<PoolState<C::Connection>>,
    available: Condvar,
}

impl<C: Connector> PoolInner<C> {
    fn lock(&self) -> MutexGuard<'_, PoolState<C::Connection>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, conn: Option<C::Connection>) {
        let mut state = self.lock();
        match conn {
            Some(conn) => state.idle.push(conn),
            None => state.open = state.open.saturating_sub(1),
        }
        drop(state);
        self.available.notify_one();
    }
}

/// A pool of at most `max_size` connections.
pub struct ConnectionPool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(connector: C, max_size: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                max_size: max_size.max(1),
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    open: 0,
                }),
                available: Condvar::new(),
            }),
        }
    }

    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }

    /// Connections currently open (idle or checked out).
    pub fn open_connections(&self) -> usize {
        self.inner.lock().open
    }

    pub fn idle_connections(&self) -> usize {
        self.inner.lock().idle.len()
    }

    /// Takes an idle connection, opens a new one if below `max_size`, or
    /// waits up to `timeout` for one to be released.
    pub fn acquire(&self, timeout: Duration) -> Result<Pooled<C>, CollectError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.lock();
        loop {
            if let Some(conn) = state.idle.pop() {
                return Ok(self.guard(conn));
            }

            if state.open < self.inner.max_size {
                state.open += 1;
                drop(state);
                return match self.inner.connector.connect() {
                    Ok(conn) => {
                        debug!(max = self.inner.max_size, "pool connection opened");
                        Ok(self.guard(conn))
                    }
                    Err(e) => {
                        self.inner.release(None);
                        Err(e)
                    }
                };
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(CollectError::Timeout(format!(
                    "no pooled connection available within {}ms",
                    timeout.as_millis()
                )));
            }
            state = self
                .inner
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn guard(&self, conn: C::Connection) -> Pooled<C> {
        Pooled {
            conn: Some(conn),
            broken: false,
            pool: Arc::clone(&self.inner),
        }
    }
}

/// A checked-out connection. Returned to the pool on drop.
pub struct Pooled<C: Connector> {
    conn: Option<C::Connection>,
    broken: bool,
    pool: Arc<PoolInner<C>>,
}

impl<C: Connector> Pooled<C> {
    /// Closes the connection on drop instead of returning it.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl<C: Connector> Deref for Pooled<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        // Only `Drop` takes the connection out.
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<C: Connector> DerefMut for Pooled<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<C: Connector> Drop for Pooled<C> {
    fn drop(&mut self) {
        let conn = self.conn.take();
        if self.broken {
            drop(conn);
            self.pool.release(None);
        } else {
            self.pool.release(conn);
        }
    }
}
