//! Content-addressed build cache with per-fingerprint singleflight.
//!
//! Lookup and slot insertion happen under one short lock. The build itself
//! runs on a spawned task that publishes its own outcome, so a waiter that
//! gives up (deadline, disconnect) never cancels a build other callers may
//! still want.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use catapt_schema::{BuildRecord, Fingerprint};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::debug;

use crate::error::{Error, Result};

type SharedBuild = Shared<BoxFuture<'static, Result<BuildRecord>>>;

enum Slot {
    Ready(BuildRecord),
    Pending(SharedBuild),
}

/// Map from fingerprint to finished or in-flight build.
#[derive(Default)]
pub struct BuildCache {
    slots: Mutex<HashMap<Fingerprint, Slot>>,
}

impl std::fmt::Debug for BuildCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let ready = slots
            .values()
            .filter(|s| matches!(s, Slot::Ready(_)))
            .count();
        f.debug_struct("BuildCache")
            .field("ready", &ready)
            .field("pending", &(slots.len() - ready))
            .finish()
    }
}

impl BuildCache {
    /// Empty cache.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Finished build for `fingerprint`, if any.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<BuildRecord> {
        match self.lock().get(fingerprint) {
            Some(Slot::Ready(record)) => Some(record.clone()),
            _ => None,
        }
    }

    /// Return the record for `fingerprint`, running `job` only if no build
    /// is finished or in flight. Every concurrent caller observes the same
    /// outcome. Failures leave no entry behind.
    pub async fn get_or_build<F, Fut>(
        self: &Arc<Self>,
        fingerprint: Fingerprint,
        job: F,
    ) -> Result<BuildRecord>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<BuildRecord>> + Send + 'static,
    {
        let pending = {
            let mut slots = self.lock();
            match slots.get(&fingerprint) {
                Some(Slot::Ready(record)) => return Ok(record.clone()),
                Some(Slot::Pending(pending)) => {
                    debug!(%fingerprint, "joining in-flight build");
                    pending.clone()
                }
                None => {
                    debug!(%fingerprint, "starting build");
                    let pending = self.spawn(fingerprint.clone(), job());
                    slots.insert(fingerprint, Slot::Pending(pending.clone()));
                    pending
                }
            }
        };
        pending.await
    }

    fn spawn<Fut>(self: &Arc<Self>, fingerprint: Fingerprint, build: Fut) -> SharedBuild
    where
        Fut: Future<Output = Result<BuildRecord>> + Send + 'static,
    {
        let cache = Arc::clone(self);
        let key = fingerprint.clone();
        let handle = tokio::spawn(async move {
            let outcome = build.await;
            cache.settle(&key, &outcome);
            outcome
        });

        let cache = Arc::clone(self);
        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(join) => {
                    let err = Error::Internal(format!("build of {fingerprint} aborted: {join}"));
                    cache.settle(&fingerprint, &Err(err.clone()));
                    Err(err)
                }
            }
        }
        .boxed()
        .shared()
    }

    fn settle(&self, fingerprint: &Fingerprint, outcome: &Result<BuildRecord>) {
        let mut slots = self.lock();
        if !matches!(slots.get(fingerprint), Some(Slot::Pending(_))) {
            return;
        }
        match outcome {
            Ok(record) => {
                slots.insert(fingerprint.clone(), Slot::Ready(record.clone()));
            }
            Err(e) => {
                debug!(%fingerprint, error = %e, "build failed, clearing slot");
                slots.remove(fingerprint);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Fingerprint, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use catapt_schema::{Pin, Sha256Hash};

    use super::*;
    use crate::error::ErrorKind;

    fn fingerprint() -> Fingerprint {
        Fingerprint::new("foo", &Pin::new("1.0.0", "a".repeat(40)))
    }

    fn record() -> BuildRecord {
        BuildRecord {
            version: "1.0.0".into(),
            commit: "a".repeat(40),
            path: "/srv/pool/foo.deb".into(),
            sha256: Sha256Hash::compute(b"deb"),
            size: 3,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_build() {
        let cache = BuildCache::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let callers = (0..16).map(|_| {
            let cache = Arc::clone(&cache);
            let runs = Arc::clone(&runs);
            tokio::spawn(async move {
                cache
                    .get_or_build(fingerprint(), move || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(record())
                    })
                    .await
            })
        });
        let results = futures::future::join_all(callers).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap().unwrap(), record());
        }
        assert_eq!(cache.lookup(&fingerprint()), Some(record()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failures_reach_every_waiter_then_clear() {
        let cache = BuildCache::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let callers = (0..8).map(|_| {
            let cache = Arc::clone(&cache);
            let runs = Arc::clone(&runs);
            tokio::spawn(async move {
                cache
                    .get_or_build(fingerprint(), move || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(Error::Build("disk full".into()))
                    })
                    .await
            })
        });
        for result in futures::future::join_all(callers).await {
            assert_eq!(result.unwrap().unwrap_err().kind(), ErrorKind::Build);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cache.lookup(&fingerprint()), None);

        // the next request retries
        let retried = cache
            .get_or_build(fingerprint(), || async { Ok(record()) })
            .await
            .unwrap();
        assert_eq!(retried, record());
    }

    #[tokio::test]
    async fn abandoned_waiter_does_not_cancel_build() {
        let cache = BuildCache::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        let timed_out = tokio::time::timeout(
            Duration::from_millis(10),
            cache.get_or_build(fingerprint(), move || async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(record())
            }),
        )
        .await;
        assert!(timed_out.is_err());

        // a later caller joins the still-running build
        let record_seen = cache
            .get_or_build(fingerprint(), || async {
                Err(Error::Internal("rebuilt instead of joining".into()))
            })
            .await
            .unwrap();
        assert_eq!(record_seen, record());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
