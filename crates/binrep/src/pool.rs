//! Connection pool
//!
//! Keeps between `min_alive` and `max_alive` live connections, with a
//! LIFO idle stack bounded by `max_idle`. A producer task pre-dials
//! connections and hands them to waiters over a rendezvous channel; a
//! janitor task pings stale idle connections, tops the pool up to
//! `min_alive`, and trims surplus idle connections.
//!
//! Connections are exclusively owned between [`Pool::get_conn`] and
//! [`Pool::put_conn`] / [`Pool::drop_conn`]; the pool owns them
//! otherwise. `max_alive` can be transiently exceeded by one while the
//! producer holds a reserved slot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Janitor wake-up period.
const JANITOR_INTERVAL: Duration = Duration::from_secs(5);

/// Deadline for liveness pings.
const PING_DEADLINE: Duration = Duration::from_millis(100);

/// Upper bound on connections the janitor dials per tick.
const MAX_NEW_CONNECTIONS_AT_ONCE: usize = 5;

/// Parallelism of the janitor's liveness recheck.
const RECHECK_WORKERS: usize = 2;

/// A transport the pool can hold. Queries and everything else the caller
/// does with it are outside the pool's contract.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Liveness probe.
    async fn ping(&mut self) -> Result<()>;

    /// Closes the transport; the pool calls this exactly once per
    /// connection it owns.
    async fn close(&mut self) -> Result<()>;
}

/// Dials new connections for the pool.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Establishes one connection.
    async fn connect(&self) -> Result<Box<dyn Connection>>;
}

/// Pool configuration. Constraints are clamped at construction:
/// `min_alive <= max_alive` and `min_alive <= max_idle <= max_alive`.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Lower bound the janitor tops the pool up to.
    pub min_alive: usize,
    /// Hard upper bound on live connections.
    pub max_alive: usize,
    /// Bound of the idle stack; surplus returns are closed.
    pub max_idle: usize,
    /// Idleness after which a connection may be closed.
    pub idle_close_timeout: Duration,
    /// Idleness after which a connection is pinged before reuse.
    pub idle_ping_timeout: Duration,
    /// When non-zero, construction dials and pings once within this
    /// deadline and fails if the server is unreachable.
    pub new_pool_ping_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            min_alive: 1,
            max_alive: 10,
            max_idle: 2,
            idle_close_timeout: Duration::from_secs(30),
            idle_ping_timeout: Duration::from_secs(10),
            new_pool_ping_timeout: Duration::ZERO,
        }
    }
}

impl PoolConfig {
    /// Creates a config with the given size bounds.
    pub fn new(min_alive: usize, max_alive: usize, max_idle: usize) -> Self {
        PoolConfig {
            min_alive,
            max_alive,
            max_idle,
            ..Default::default()
        }
    }

    /// Sets the idle-close timeout.
    pub fn with_idle_close_timeout(mut self, timeout: Duration) -> Self {
        self.idle_close_timeout = timeout;
        self
    }

    /// Sets the idle-ping timeout.
    pub fn with_idle_ping_timeout(mut self, timeout: Duration) -> Self {
        self.idle_ping_timeout = timeout;
        self
    }

    /// Sets the construction-time reachability deadline.
    pub fn with_new_pool_ping_timeout(mut self, timeout: Duration) -> Self {
        self.new_pool_ping_timeout = timeout;
        self
    }

    fn clamped(mut self) -> Self {
        if self.min_alive > self.max_alive {
            self.min_alive = self.max_alive;
        }
        if self.max_idle > self.max_alive {
            self.max_idle = self.max_alive;
        }
        if self.max_idle < self.min_alive {
            self.max_idle = self.min_alive;
        }
        self
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Live connections: idle, checked out, and producer-held.
    pub total_count: usize,
    /// Connections currently on the idle stack.
    pub idle_count: usize,
    /// Connections created over the pool's lifetime.
    pub created_count: u64,
}

struct PoolEntry {
    conn: Box<dyn Connection>,
    last_use_at: Instant,
}

impl PoolEntry {
    fn new(conn: Box<dyn Connection>) -> Self {
        PoolEntry {
            conn,
            last_use_at: Instant::now(),
        }
    }
}

#[derive(Default)]
struct PoolState {
    idle: Vec<PoolEntry>,
    total_count: usize,
    created_count: u64,
}

struct PoolInner {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    state: Mutex<PoolState>,
    ready_tx: mpsc::Sender<PoolEntry>,
    ready_rx: tokio::sync::Mutex<mpsc::Receiver<PoolEntry>>,
    waiting: AtomicUsize,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

async fn ping_with_deadline(conn: &mut Box<dyn Connection>) -> Result<()> {
    match tokio::time::timeout(PING_DEADLINE, conn.ping()).await {
        Ok(res) => res,
        Err(_) => Err(Error::ConnectFailed("ping deadline exceeded".into())),
    }
}

impl PoolInner {
    fn pop_idle(&self) -> Option<PoolEntry> {
        self.state.lock().idle.pop()
    }

    /// Closes a connection the pool owns; connection I/O happens outside
    /// the lock.
    async fn close_entry(&self, mut conn: Box<dyn Connection>) {
        self.state.lock().total_count -= 1;
        let _ = conn.close().await;
    }

    /// Returns a connection to the pool: direct hand-off if a waiter is
    /// ready, else the idle stack, else close it.
    async fn put_entry(&self, entry: PoolEntry) {
        let entry = if self.waiting.load(Ordering::Acquire) > 0 {
            match self.ready_tx.try_send(entry) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(entry))
                | Err(mpsc::error::TrySendError::Closed(entry)) => entry,
            }
        } else {
            entry
        };

        let overflow = {
            let mut state = self.state.lock();
            if state.idle.len() >= self.config.max_idle {
                state.total_count -= 1;
                Some(entry)
            } else {
                state.idle.push(entry);
                None
            }
        };
        if let Some(mut entry) = overflow {
            let _ = entry.conn.close().await;
        }
    }

    /// Long-running producer: prefers idle connections, otherwise
    /// reserves a slot and dials, retrying with jittered backoff, and
    /// publishes the result to the rendezvous channel.
    async fn producer(self: Arc<Self>) {
        enum Next {
            Entry(PoolEntry),
            Reserved,
            Full,
        }

        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            let next = {
                let mut state = self.state.lock();
                if let Some(entry) = state.idle.pop() {
                    Next::Entry(entry)
                } else if state.total_count >= self.config.max_alive {
                    Next::Full
                } else {
                    // Reserve the slot before dialing so the bound holds.
                    state.total_count += 1;
                    Next::Reserved
                }
            };

            let entry = match next {
                Next::Full => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(10)) => continue,
                        _ = self.cancel.cancelled() => return,
                    }
                }
                Next::Entry(entry) => entry,
                Next::Reserved => match self.factory.connect().await {
                    Ok(conn) => {
                        self.state.lock().created_count += 1;
                        PoolEntry::new(conn)
                    }
                    Err(err) => {
                        self.state.lock().total_count -= 1;
                        warn!(%err, "pool: cannot establish new connection");

                        let backoff =
                            Duration::from_millis(10 + rand::thread_rng().gen_range(0..90));
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => continue,
                            _ = self.cancel.cancelled() => return,
                        }
                    }
                },
            };

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.close_entry(entry.conn).await;
                    return;
                }
                permit = self.ready_tx.reserve() => match permit {
                    Ok(permit) => permit.send(entry),
                    Err(_) => {
                        self.close_entry(entry.conn).await;
                        return;
                    }
                },
            }
        }
    }

    /// Periodic janitor: rechecks stale idle connections, then either
    /// tops the pool up to `min_alive` or trims surplus idles.
    async fn janitor(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(JANITOR_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // the first tick is immediate

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let stale = self.take_stale_idle();
                    if stale.is_empty() {
                        continue;
                    }
                    self.recheck_connections(stale).await;

                    if !self.spawn_connections_if_needed().await {
                        self.close_idle_if_can().await;
                    }
                }
            }
        }
    }

    /// Removes idle connections old enough to need a liveness probe.
    fn take_stale_idle(&self) -> Vec<PoolEntry> {
        let mut state = self.state.lock();
        let mut stale = Vec::new();
        let mut i = 0;
        while i < state.idle.len() {
            if state.idle[i].last_use_at.elapsed() >= self.config.idle_ping_timeout {
                stale.push(state.idle.swap_remove(i));
            } else {
                i += 1;
            }
        }
        stale
    }

    /// Pings a batch of connections with bounded parallelism; survivors
    /// go back to the pool, the rest are closed.
    async fn recheck_connections(self: &Arc<Self>, stale: Vec<PoolEntry>) {
        let queue = Arc::new(Mutex::new(stale));

        let mut workers = Vec::with_capacity(RECHECK_WORKERS);
        for _ in 0..RECHECK_WORKERS {
            let inner = Arc::clone(self);
            let queue = Arc::clone(&queue);
            workers.push(tokio::spawn(async move {
                loop {
                    let entry = queue.lock().pop();
                    let Some(mut entry) = entry else { break };
                    match ping_with_deadline(&mut entry.conn).await {
                        Ok(()) => inner.put_entry(entry).await,
                        Err(err) => {
                            debug!(%err, "pool: closing dead idle connection");
                            inner.close_entry(entry.conn).await;
                        }
                    }
                }
            }));
        }
        for worker in workers {
            let _ = worker.await;
        }
    }

    /// Dials replacements when the pool dropped below `min_alive`.
    /// Returns whether anything needed doing.
    async fn spawn_connections_if_needed(&self) -> bool {
        let (need, total, idle_count) = {
            let state = self.state.lock();
            (
                self.config.min_alive.saturating_sub(state.total_count),
                state.total_count,
                state.idle.len(),
            )
        };
        if need == 0 {
            return false;
        }

        let need = need.min(MAX_NEW_CONNECTIONS_AT_ONCE);
        info!(new = need, total, idle = idle_count, "pool: topping up connections");
        self.start_new_connections(need).await;
        true
    }

    async fn start_new_connections(&self, count: usize) {
        for _ in 0..count {
            if self.cancel.is_cancelled() {
                return;
            }
            match self.factory.connect().await {
                Ok(conn) => {
                    {
                        let mut state = self.state.lock();
                        state.total_count += 1;
                        state.created_count += 1;
                    }
                    self.put_entry(PoolEntry::new(conn)).await;
                }
                Err(err) => warn!(%err, "pool: connection setup failed"),
            }
        }
    }

    /// Trims surplus idle connections that have been idle longer than
    /// `idle_close_timeout`, at most 10% of the idle stack per tick but
    /// at least one. One slot above `min_alive` is reserved for the
    /// producer-held connection.
    async fn close_idle_if_can(&self) {
        let to_close = {
            let mut state = self.state.lock();
            let idle_count = state.idle.len();

            let mut can_close =
                state.total_count as isize - self.config.min_alive as isize - 1;
            let idle_can_close = (idle_count / 10).max(1) as isize;
            if can_close > idle_can_close {
                can_close = idle_can_close;
            }
            if can_close <= 0 {
                return;
            }

            // Oldest first; fresh connections stay.
            let mut to_close = Vec::new();
            let mut i = 0;
            while i < state.idle.len() && to_close.len() < can_close as usize {
                if state.idle[i].last_use_at.elapsed() >= self.config.idle_close_timeout {
                    to_close.push(state.idle.remove(i));
                } else {
                    i += 1;
                }
            }
            to_close
        };

        if to_close.is_empty() {
            return;
        }
        info!(closed = to_close.len(), "pool: closing surplus idle connections");
        for entry in to_close {
            self.close_entry(entry.conn).await;
        }
    }

    /// One connect-and-ping round trip, used by the construction-time
    /// reachability check.
    async fn check_connection(&self) -> Result<()> {
        let mut conn = self.factory.connect().await?;
        let res = conn.ping().await;
        let _ = conn.close().await;
        res
    }
}

/// The connection pool. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Creates a pool and starts its background tasks. When
    /// `new_pool_ping_timeout` is set, performs one reachability check
    /// and fails construction if the server cannot be reached in time.
    pub async fn new(config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> Result<Pool> {
        let config = config.clamped();
        let ping_timeout = config.new_pool_ping_timeout;
        let min_alive = config.min_alive;

        let (ready_tx, ready_rx) = mpsc::channel(1);
        let inner = Arc::new(PoolInner {
            config,
            factory,
            state: Mutex::new(PoolState::default()),
            ready_tx,
            ready_rx: tokio::sync::Mutex::new(ready_rx),
            waiting: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        });

        let producer = tokio::spawn(Arc::clone(&inner).producer());
        let janitor = tokio::spawn(Arc::clone(&inner).janitor());
        inner.tasks.lock().extend([producer, janitor]);

        if min_alive > 0 {
            let warmup = Arc::clone(&inner);
            tokio::spawn(async move {
                warmup.start_new_connections(min_alive).await;
            });
        }

        let pool = Pool { inner };

        if ping_timeout > Duration::ZERO {
            let check = tokio::time::timeout(ping_timeout, pool.inner.check_connection()).await;
            match check {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    pool.close().await;
                    return Err(Error::ConnectFailed(format!("pool check failed: {err}")));
                }
                Err(_) => {
                    pool.close().await;
                    return Err(Error::ConnectFailed(format!(
                        "pool check timed out after {ping_timeout:?}"
                    )));
                }
            }
        }

        Ok(pool)
    }

    /// Takes a connection: the idle stack first, then the producer's
    /// rendezvous channel. Connections idle past `idle_ping_timeout` are
    /// pinged before being returned; dead ones are replaced
    /// transparently.
    pub async fn get_conn(&self) -> Result<Box<dyn Connection>> {
        self.get_conn_cancellable(&CancellationToken::new()).await
    }

    /// Like [`Pool::get_conn`] but aborts with `Cancelled` when `cancel`
    /// fires while waiting.
    pub async fn get_conn_cancellable(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn Connection>> {
        loop {
            if self.inner.cancel.is_cancelled() {
                return Err(Error::PoolClosed);
            }

            let mut entry = match self.inner.pop_idle() {
                Some(entry) => entry,
                None => {
                    self.inner.waiting.fetch_add(1, Ordering::AcqRel);
                    let received = tokio::select! {
                        _ = cancel.cancelled() => Err(Error::Cancelled),
                        _ = self.inner.cancel.cancelled() => Err(Error::PoolClosed),
                        entry = async {
                            // Waiters queue on this lock in FIFO order,
                            // which is what makes hand-off fair.
                            let mut rx = self.inner.ready_rx.lock().await;
                            rx.recv().await
                        } => entry.ok_or(Error::PoolClosed),
                    };
                    self.inner.waiting.fetch_sub(1, Ordering::AcqRel);
                    received?
                }
            };

            if entry.last_use_at.elapsed() > self.inner.config.idle_ping_timeout {
                if let Err(err) = ping_with_deadline(&mut entry.conn).await {
                    debug!(%err, "pool: discarding stale connection");
                    self.inner.close_entry(entry.conn).await;
                    continue;
                }
            }

            return Ok(entry.conn);
        }
    }

    /// Returns a working connection to the pool.
    pub async fn put_conn(&self, conn: Box<dyn Connection>) {
        if self.inner.cancel.is_cancelled() {
            self.inner.close_entry(conn).await;
            return;
        }
        self.inner.put_entry(PoolEntry::new(conn)).await;
    }

    /// Closes a connection without checks, e.g. after an I/O error.
    pub async fn drop_conn(&self, conn: Box<dyn Connection>) {
        self.inner.close_entry(conn).await;
    }

    /// Current counters.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            total_count: state.total_count,
            idle_count: state.idle.len(),
            created_count: state.created_count,
        }
    }

    /// Shuts the pool down: stops the background tasks and closes every
    /// idle connection. Checked-out connections are the callers' to
    /// return. Idempotent.
    pub async fn close(&self) {
        self.inner.cancel.cancel();

        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        // A connection may be parked in the hand-off channel.
        {
            let mut rx = self.inner.ready_rx.lock().await;
            while let Ok(entry) = rx.try_recv() {
                self.inner.close_entry(entry.conn).await;
            }
        }

        let idle: Vec<PoolEntry> = {
            let mut state = self.inner.state.lock();
            state.idle.drain(..).collect()
        };
        for entry in idle {
            self.inner.close_entry(entry.conn).await;
        }
    }
}
