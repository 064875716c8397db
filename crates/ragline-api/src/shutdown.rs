//! Shutdown gate middleware.
//!
//! Once shutdown begins every new request gets a 503. Requests already
//! admitted hold an [`InFlightGuard`] until they finish so the server can
//! wait for them. The middleware also places the guard in the request
//! extensions as a [`SharedGuard`]; a streamed response clones it to stay
//! counted until the stream ends.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Extension, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::error::ApiError;

/// Shared admission state.
#[derive(Clone, Default)]
pub struct ShutdownGate {
    draining: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl ShutdownGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop admitting requests.
    pub fn begin_shutdown(&self) {
        if !self.draining.swap(true, Ordering::SeqCst) {
            info!(in_flight = self.in_flight(), "Shutdown started, rejecting new requests");
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Admit one request. `None` once shutdown has begun.
    pub fn try_enter(&self) -> Option<InFlightGuard> {
        if self.is_draining() {
            return None;
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(InFlightGuard { gate: self.clone() })
    }

    /// Wait until no admitted request remains, up to `timeout`.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let idle = self.idle.notified();
                if self.in_flight() == 0 {
                    return;
                }
                idle.await;
            }
        };
        let drained = tokio::time::timeout(timeout, wait).await.is_ok();
        if !drained {
            warn!(
                in_flight = self.in_flight(),
                "Grace period elapsed with requests still in flight"
            );
        }
        drained
    }
}

/// Marks one admitted request; released on drop.
pub struct InFlightGuard {
    gate: ShutdownGate,
}

/// The admission guard as seen by handlers.
pub type SharedGuard = Arc<InFlightGuard>;

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.gate.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.gate.idle.notify_waiters();
        }
    }
}

/// Axum middleware that rejects requests once shutdown has begun.
pub async fn shutdown_guard(
    Extension(gate): Extension<ShutdownGate>,
    mut req: Request,
    next: Next,
) -> Response {
    match gate.try_enter() {
        Some(guard) => {
            let guard: SharedGuard = Arc::new(guard);
            req.extensions_mut().insert(Arc::clone(&guard));
            let response = next.run(req).await;
            drop(guard);
            response
        }
        None => {
            ApiError::ServiceUnavailable("Server is shutting down".to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    #[test]
    fn test_guard_counts_in_flight() {
        let gate = ShutdownGate::new();
        let a = gate.try_enter().unwrap();
        let b = gate.try_enter().unwrap();
        assert_eq!(gate.in_flight(), 2);
        drop(a);
        assert_eq!(gate.in_flight(), 1);
        drop(b);
        assert_eq!(gate.in_flight(), 0);
    }

    #[test]
    fn test_no_admission_after_shutdown() {
        let gate = ShutdownGate::new();
        gate.begin_shutdown();
        assert!(gate.is_draining());
        assert!(gate.try_enter().is_none());
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_drain_waits_for_guards() {
        let gate = ShutdownGate::new();
        let guard = gate.try_enter().unwrap();
        gate.begin_shutdown();

        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(guard);
        });
        assert!(gate.drain(Duration::from_secs(5)).await);
        releaser.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_times_out() {
        let gate = ShutdownGate::new();
        let _guard = gate.try_enter().unwrap();
        gate.begin_shutdown();
        assert!(!gate.drain(Duration::from_millis(100)).await);
        assert_eq!(gate.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_drain_immediate_when_idle() {
        let gate = ShutdownGate::new();
        gate.begin_shutdown();
        assert!(gate.drain(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_handler_sees_admission_guard_after_shutdown_begins() {
        let gate = ShutdownGate::new();
        let held: Arc<std::sync::Mutex<Option<SharedGuard>>> = Arc::default();
        let slot = Arc::clone(&held);
        let app = Router::new()
            .route(
                "/",
                get(
                    move |Extension(gate): Extension<ShutdownGate>,
                          guard: Option<Extension<SharedGuard>>| async move {
                        gate.begin_shutdown();
                        *slot.lock().unwrap() = guard.map(|Extension(g)| g);
                        "ok"
                    },
                ),
            )
            .layer(axum::middleware::from_fn(shutdown_guard))
            .layer(Extension(gate.clone()));

        let resp = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
        assert!(gate.is_draining());
        assert_eq!(gate.in_flight(), 1);

        let guard = held.lock().unwrap().take();
        assert!(guard.is_some());
        drop(guard);
        assert_eq!(gate.in_flight(), 0);
    }
}
