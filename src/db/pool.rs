//! Leased-session pool, one per target instance.
//!
//! A session is pinned to the pool's snapshot marker once, right after it is
//! opened and before any other statement. Leases that end in error are
//! invalidated instead of returned, so a session with unknown state is never
//! handed out again.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::db::session::{Connector, Session, SnapshotMarker};
use crate::error::{AppError, ErrorKind, classify_error};

const POOL_SLACK: usize = 10;
const MAX_OPEN_CAP: usize = 500;
const IDLE_RATIO: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolOptions {
    pub max_open: usize,
    pub max_idle: usize,
    pub max_lifetime: Option<Duration>,
    pub acquire_timeout: Duration,
}

impl PoolOptions {
    /// Size a pool from the two concurrency limits: every concurrently
    /// processed database needs source and destination sessions for up to
    /// `table_concurrency` in-flight counts, plus some slack for enumeration.
    pub fn derive(db_concurrency: usize, table_concurrency: usize) -> Self {
        let max_open = db_concurrency
            .saturating_mul(2)
            .saturating_mul(table_concurrency.saturating_add(POOL_SLACK))
            .clamp(1, MAX_OPEN_CAP);
        Self {
            max_open,
            max_idle: idle_for(max_open),
            max_lifetime: Some(Duration::from_secs(30 * 60)),
            acquire_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_overrides(mut self, max_open: Option<usize>, max_idle: Option<usize>) -> Self {
        if let Some(open) = max_open {
            self.max_open = open.max(1);
            self.max_idle = idle_for(self.max_open);
        }
        if let Some(idle) = max_idle {
            self.max_idle = idle.clamp(1, self.max_open);
        }
        self
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::derive(5, 30)
    }
}

fn idle_for(max_open: usize) -> usize {
    ((max_open as f64 * IDLE_RATIO).floor() as usize).max(1)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub opened: u64,
    pub reused: u64,
    pub retired: u64,
    pub invalidated: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Clean,
    DeadlineExceeded,
}

#[derive(Default)]
struct Counters {
    opened: AtomicU64,
    reused: AtomicU64,
    retired: AtomicU64,
    invalidated: AtomicU64,
}

struct Idle<S> {
    session: S,
    created_at: Instant,
}

struct Shared<C: Connector> {
    connector: C,
    label: String,
    options: PoolOptions,
    snapshot: Option<SnapshotMarker>,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<Idle<C::Session>>>,
    closed: AtomicBool,
    counters: Counters,
}

impl<C: Connector> Shared<C> {
    fn idle(&self) -> MutexGuard<'_, VecDeque<Idle<C::Session>>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn expired(&self, created_at: Instant) -> bool {
        self.options
            .max_lifetime
            .is_some_and(|lifetime| created_at.elapsed() >= lifetime)
    }
}

pub struct Pool<C: Connector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connector> Pool<C> {
    pub fn new(connector: C, options: PoolOptions, snapshot: Option<SnapshotMarker>) -> Self {
        let label = connector.describe();
        let permits = Arc::new(Semaphore::new(options.max_open));
        Self {
            shared: Arc::new(Shared {
                connector,
                label,
                options,
                snapshot,
                permits,
                idle: Mutex::new(VecDeque::new()),
                closed: AtomicBool::new(false),
                counters: Counters::default(),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn options(&self) -> &PoolOptions {
        &self.shared.options
    }

    pub fn snapshot(&self) -> Option<SnapshotMarker> {
        self.shared.snapshot
    }

    pub fn idle_count(&self) -> usize {
        self.shared.idle().len()
    }

    pub fn stats(&self) -> PoolStats {
        let counters = &self.shared.counters;
        PoolStats {
            opened: counters.opened.load(Ordering::Relaxed),
            reused: counters.reused.load(Ordering::Relaxed),
            retired: counters.retired.load(Ordering::Relaxed),
            invalidated: counters.invalidated.load(Ordering::Relaxed),
        }
    }

    /// Lease a session, reusing an idle one when possible.
    ///
    /// # Errors
    ///
    /// `Connection` when the pool is closed, no slot frees up within the
    /// acquire timeout, or a new session cannot be opened; `SnapshotPin` when
    /// a freshly opened session rejects the snapshot marker.
    pub async fn lease(&self) -> Result<Lease<C>> {
        let shared = &self.shared;
        if shared.closed.load(Ordering::Acquire) {
            return Err(AppError::new(
                ErrorKind::Connection,
                format!("Connection pool for {} is closed", shared.label),
            )
            .into());
        }

        let permit = timeout(
            shared.options.acquire_timeout,
            Arc::clone(&shared.permits).acquire_owned(),
        )
        .await
        .map_err(|_| {
            AppError::new(
                ErrorKind::Connection,
                format!(
                    "Timed out after {}s waiting for a free connection to {}",
                    shared.options.acquire_timeout.as_secs(),
                    shared.label
                ),
            )
        })?
        .map_err(|_| {
            AppError::new(
                ErrorKind::Connection,
                format!("Connection pool for {} is closed", shared.label),
            )
        })?;

        loop {
            let candidate = shared.idle().pop_front();
            let Some(idle) = candidate else {
                break;
            };
            if shared.expired(idle.created_at) {
                shared.counters.retired.fetch_add(1, Ordering::Relaxed);
                debug!(instance = %shared.label, "retiring session past its max lifetime");
                if let Err(err) = idle.session.close().await {
                    debug!(instance = %shared.label, error = %err, "closing retired session failed");
                }
                continue;
            }
            shared.counters.reused.fetch_add(1, Ordering::Relaxed);
            return Ok(Lease {
                session: idle.session,
                created_at: idle.created_at,
                shared: Arc::clone(shared),
                _permit: permit,
            });
        }

        let mut session = shared.connector.connect().await.map_err(|err| {
            match classify_error(&err) {
                ErrorKind::Internal => anyhow::Error::from(AppError::new(
                    ErrorKind::Connection,
                    format!("Failed to connect to {}: {}", shared.label, err),
                )),
                _ => err,
            }
        })?;
        shared.counters.opened.fetch_add(1, Ordering::Relaxed);
        debug!(instance = %shared.label, "opened new session");

        if let Some(marker) = shared.snapshot {
            if let Err(err) = session.pin_snapshot(marker).await {
                shared.counters.invalidated.fetch_add(1, Ordering::Relaxed);
                drop(session);
                return Err(match classify_error(&err) {
                    ErrorKind::SnapshotPin => err,
                    _ => anyhow::Error::from(AppError::new(
                        ErrorKind::SnapshotPin,
                        format!(
                            "Failed to pin {} to snapshot {}: {}",
                            shared.label, marker, err
                        ),
                    )),
                });
            }
            debug!(instance = %shared.label, snapshot = %marker, "pinned session to snapshot");
        }

        Ok(Lease {
            session,
            created_at: Instant::now(),
            shared: Arc::clone(shared),
            _permit: permit,
        })
    }

    /// Close the pool: idle sessions are dropped and closed first, then
    /// outstanding leases are awaited, all within `deadline`.
    pub async fn shutdown_with_deadline(&self, deadline: Duration) -> ShutdownOutcome {
        let shared = &self.shared;
        shared.closed.store(true, Ordering::Release);
        let drained: Vec<_> = shared.idle().drain(..).collect();
        let max_open = u32::try_from(shared.options.max_open).unwrap_or(u32::MAX);

        let work = async {
            for idle in drained {
                if let Err(err) = idle.session.close().await {
                    debug!(instance = %shared.label, error = %err, "closing idle session failed");
                }
            }
            // Holding every permit means no lease is outstanding.
            let _all = shared.permits.acquire_many(max_open).await;
        };

        let outcome = match timeout(deadline, work).await {
            Ok(()) => ShutdownOutcome::Clean,
            Err(_) => {
                warn!(
                    instance = %shared.label,
                    deadline_ms = deadline.as_millis() as u64,
                    "connection pool did not close before its deadline, continuing"
                );
                ShutdownOutcome::DeadlineExceeded
            }
        };
        shared.permits.close();
        outcome
    }
}

/// A leased session. Return it with [`Lease::release`] after a successful
/// statement, or discard it with [`Lease::invalidate`]; dropping a lease
/// discards the session too.
pub struct Lease<C: Connector> {
    session: C::Session,
    created_at: Instant,
    shared: Arc<Shared<C>>,
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> Lease<C> {
    pub fn session_mut(&mut self) -> &mut C::Session {
        &mut self.session
    }

    pub fn release(self) {
        let Lease {
            session,
            created_at,
            shared,
            _permit,
        } = self;
        if shared.closed.load(Ordering::Acquire) {
            shared.counters.retired.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let mut idle = shared.idle();
        if idle.len() >= shared.options.max_idle {
            shared.counters.retired.fetch_add(1, Ordering::Relaxed);
            return;
        }
        idle.push_back(Idle {
            session,
            created_at,
        });
    }

    pub fn invalidate(self) {
        self.shared
            .counters
            .invalidated
            .fetch_add(1, Ordering::Relaxed);
        debug!(instance = %self.shared.label, "invalidated session");
    }
}
