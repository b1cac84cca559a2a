/*!
 * Bounded connection pool.
 *
 * The pool hands out at most `capacity` connections at a time. Idle
 * connections are kept in a queue; a connection found dead at checkout is
 * replaced transparently. All state lives behind a single `parking_lot`
 * mutex paired with a condvar, so callers block a worker thread while
 * waiting and must run inside `spawn_blocking` when called from async code.
 */

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use rusqlite::Connection;

use crate::errors::PoolError;

/// Opens and checks connections for a pool
pub trait ConnectionManager: Send + Sync + 'static {
    /// Connection type handed out by the pool
    type Connection: Send + 'static;

    /// Open a new connection
    fn connect(&self) -> Result<Self::Connection, PoolError>;

    /// Cheap liveness probe
    fn is_alive(&self, conn: &mut Self::Connection) -> bool;
}

/// SQLite connections to a database file
#[derive(Debug, Clone)]
pub struct SqliteConnectionManager {
    /// Database file
    path: PathBuf,
    /// How long SQLite waits on a locked database before failing
    busy_timeout: Duration,
}

impl SqliteConnectionManager {
    /// Manager for the database at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// Override the busy timeout
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }
}

impl ConnectionManager for SqliteConnectionManager {
    type Connection = Connection;

    fn connect(&self) -> Result<Connection, PoolError> {
        let conn = Connection::open(&self.path)
            .map_err(|e| PoolError::Connect(format!("{:?}: {}", self.path, e)))?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| PoolError::Connect(e.to_string()))?;
        Ok(conn)
    }

    fn is_alive(&self, conn: &mut Connection) -> bool {
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok()
    }
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Maximum number of live connections
    pub capacity: usize,
    /// Live connections, idle or checked out
    pub active: usize,
    /// Connections waiting in the idle queue
    pub idle: usize,
}

struct PoolState<C> {
    idle: VecDeque<C>,
    active: usize,
    closed: bool,
}

struct PoolShared<M: ConnectionManager> {
    manager: M,
    capacity: usize,
    state: Mutex<PoolState<M::Connection>>,
    available: Condvar,
}

/// Bounded, thread-safe connection pool
pub struct ConnectionPool<M: ConnectionManager> {
    shared: Arc<PoolShared<M>>,
}

impl<M: ConnectionManager> Clone for ConnectionPool<M> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<M: ConnectionManager> std::fmt::Debug for ConnectionPool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("status", &self.status())
            .finish()
    }
}

impl<M: ConnectionManager> ConnectionPool<M> {
    /// Create a pool and try to open `capacity` connections up front.
    ///
    /// Connections that fail to open are logged and skipped; the pool opens
    /// them lazily later.
    pub fn new(manager: M, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut idle = VecDeque::with_capacity(capacity);

        for slot in 0..capacity {
            match manager.connect() {
                Ok(conn) => idle.push_back(conn),
                Err(e) => {
                    warn!("Could not pre-open pooled connection {}/{}: {}", slot + 1, capacity, e);
                    break;
                }
            }
        }

        info!("Connection pool ready: {}/{} connections open", idle.len(), capacity);
        let active = idle.len();

        Self {
            shared: Arc::new(PoolShared {
                manager,
                capacity,
                state: Mutex::new(PoolState {
                    idle,
                    active,
                    closed: false,
                }),
                available: Condvar::new(),
            }),
        }
    }

    /// Borrow a connection, waiting up to `timeout` for one to free up
    pub fn acquire(&self, timeout: Duration) -> Result<PooledConnection<M>, PoolError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let shared = &self.shared;

        let mut state = shared.state.lock();
        let conn = loop {
            if let Some(conn) = state.idle.pop_front() {
                break Some(conn);
            }
            if state.active < shared.capacity {
                // Reserve the slot, then connect without holding the lock
                state.active += 1;
                break None;
            }
            if shared.available.wait_until(&mut state, deadline).timed_out() {
                if let Some(conn) = state.idle.pop_front() {
                    break Some(conn);
                }
                if state.active < shared.capacity {
                    state.active += 1;
                    break None;
                }
                return Err(PoolError::Exhausted {
                    capacity: shared.capacity,
                    waited_ms: started.elapsed().as_millis(),
                });
            }
        };
        drop(state);

        let conn = match conn {
            Some(mut conn) => {
                if shared.manager.is_alive(&mut conn) {
                    conn
                } else {
                    warn!("Pooled connection failed liveness check, replacing it");
                    drop(conn);
                    self.connect_reserved().map_err(|e| PoolError::DeadConnection(e.to_string()))?
                }
            }
            None => self.connect_reserved()?,
        };

        Ok(PooledConnection {
            pool: self.clone(),
            conn: Some(conn),
        })
    }

    // Open a connection for a slot already counted in `active`
    fn connect_reserved(&self) -> Result<M::Connection, PoolError> {
        match self.shared.manager.connect() {
            Ok(conn) => Ok(conn),
            Err(e) => {
                let mut state = self.shared.state.lock();
                state.active = state.active.saturating_sub(1);
                drop(state);
                self.shared.available.notify_one();
                Err(e)
            }
        }
    }

    fn release(&self, mut conn: M::Connection) {
        let alive = self.shared.manager.is_alive(&mut conn);
        let mut state = self.shared.state.lock();

        if alive && !state.closed && state.idle.len() < self.shared.capacity {
            state.idle.push_back(conn);
        } else {
            if !alive {
                debug!("Discarding dead connection on release");
            }
            state.active = state.active.saturating_sub(1);
            drop(conn);
        }

        drop(state);
        self.shared.available.notify_one();
    }

    /// Close every idle connection and reset the active count. Shutdown only:
    /// connections still checked out are closed when they come back.
    pub fn close_all(&self) {
        let mut state = self.shared.state.lock();
        let closed = state.idle.len();
        state.active = 0;
        state.idle.clear();
        state.closed = true;
        drop(state);

        self.shared.available.notify_all();
        info!("Connection pool closed ({} idle connections released)", closed);
    }

    /// Current occupancy
    pub fn status(&self) -> PoolStatus {
        let state = self.shared.state.lock();
        PoolStatus {
            capacity: self.shared.capacity,
            active: state.active,
            idle: state.idle.len(),
        }
    }
}

/// Connection checked out of a pool; returned on drop
pub struct PooledConnection<M: ConnectionManager> {
    pool: ConnectionPool<M>,
    conn: Option<M::Connection>,
}

impl<M: ConnectionManager> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        match self.conn.as_ref() {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<M: ConnectionManager> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.conn.as_mut() {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

/// Pool of SQLite connections
pub type SqlitePool = ConnectionPool<SqliteConnectionManager>;
