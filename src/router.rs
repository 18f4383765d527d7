//! Request-id router.
//!
//! The router hands out correlation ids, keeps one single-use response slot
//! per outstanding request and resolves incoming responses to the caller
//! waiting on that id.
//!
//! ```text
//! Client::send ──reserve()──► Router table {id → oneshot::Sender}
//!                                   ▲
//! Dispatcher ────resolve(msg)───────┘   abort(err) drains everything
//! ```
//!
//! `reserve` and `resolve` run on different tasks; the table sits behind a
//! mutex that is never held across an await point.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::codec::Message;
use crate::error::{Result, SftpError};

type Delivery = Result<Message>;

/// Single-use delivery slot for the response to one request.
#[derive(Debug)]
pub struct ResponseSlot {
    id: u32,
    rx: oneshot::Receiver<Delivery>,
}

impl ResponseSlot {
    /// Correlation id the slot is waiting on.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Wait for the response, or for the error delivered at shutdown.
    pub async fn recv(self) -> Result<Message> {
        match self.rx.await {
            Ok(delivery) => delivery,
            // Only reachable if the router itself was dropped.
            Err(_) => Err(SftpError::Shutdown("router dropped".to_string())),
        }
    }
}

struct RouterState {
    next_id: u32,
    pending: HashMap<u32, oneshot::Sender<Delivery>>,
    /// Reason the router was aborted, rendered once.
    aborted: Option<String>,
}

/// Correlation table shared by the client façade and the dispatcher.
pub struct Router {
    state: Mutex<RouterState>,
}

impl Router {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Router whose first id is `first_id`.
    pub(crate) fn starting_at(first_id: u32) -> Self {
        Self {
            state: Mutex::new(RouterState {
                next_id: first_id,
                pending: HashMap::new(),
                aborted: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RouterState> {
        // The table has no invariant a panicking holder could break halfway.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a fresh id and its response slot.
    ///
    /// Ids wrap around and skip any id still outstanding. Once the router is
    /// aborted the returned slot already holds the shutdown error.
    ///
    /// # Errors
    ///
    /// [`SftpError::RequestIdsExhausted`] if every 32-bit id is outstanding.
    pub fn reserve(&self) -> Result<(u32, ResponseSlot)> {
        let mut state = self.lock();
        let (tx, rx) = oneshot::channel();

        if let Some(reason) = state.aborted.clone() {
            let id = state.next_id;
            state.next_id = state.next_id.wrapping_add(1);
            let _ = tx.send(Err(SftpError::Shutdown(reason)));
            return Ok((id, ResponseSlot { id, rx }));
        }

        if state.pending.len() as u64 > u32::MAX as u64 {
            return Err(SftpError::RequestIdsExhausted);
        }

        let mut id = state.next_id;
        while state.pending.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        state.next_id = id.wrapping_add(1);
        state.pending.insert(id, tx);

        Ok((id, ResponseSlot { id, rx }))
    }

    /// Deliver a response to the request with the same id.
    ///
    /// # Errors
    ///
    /// [`SftpError::Routing`] if the message carries no id or no request
    /// with that id is outstanding. The table is left untouched.
    pub fn resolve(&self, message: Message) -> Result<()> {
        let id = message
            .request_id()
            .ok_or(SftpError::Routing { id: None })?;

        let tx = self
            .lock()
            .pending
            .remove(&id)
            .ok_or(SftpError::Routing { id: Some(id) })?;

        if tx.send(Ok(message)).is_err() {
            tracing::debug!("Caller for request {} went away before its response", id);
        }
        Ok(())
    }

    /// Forget an outstanding id without delivering anything.
    ///
    /// Used when a reserved request never made it onto the wire.
    pub fn release(&self, id: u32) -> bool {
        self.lock().pending.remove(&id).is_some()
    }

    /// Fail every outstanding request with a shutdown error carrying `reason`.
    ///
    /// Only the first call takes effect. Returns how many callers were
    /// unblocked.
    pub fn abort(&self, reason: &SftpError) -> usize {
        let reason = match reason {
            SftpError::Shutdown(inner) => inner.clone(),
            other => other.to_string(),
        };

        let drained: Vec<_> = {
            let mut state = self.lock();
            if state.aborted.is_some() {
                return 0;
            }
            state.aborted = Some(reason.clone());
            state.pending.drain().collect()
        };

        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(SftpError::Shutdown(reason.clone())));
        }
        count
    }

    /// Reason recorded by [`Router::abort`].
    pub fn abort_reason(&self) -> Option<String> {
        self.lock().aborted.clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.lock().aborted.is_some()
    }

    /// Number of outstanding requests.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Handle;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn handle_response(id: u32, handle: &str) -> Message {
        Message::Handle {
            id,
            handle: Handle::from(handle),
        }
    }

    #[test]
    fn test_reserve_ids_distinct() {
        let router = Router::new();
        let mut ids = HashSet::new();
        let mut slots = Vec::new();

        for _ in 0..1000 {
            let (id, slot) = router.reserve().unwrap();
            assert!(ids.insert(id), "id {} handed out twice", id);
            slots.push(slot);
        }
        assert_eq!(router.pending_count(), 1000);
    }

    #[test]
    fn test_wraparound_skips_outstanding() {
        let router = Router::starting_at(u32::MAX - 1);

        let (a, _slot_a) = router.reserve().unwrap();
        let (b, _slot_b) = router.reserve().unwrap();
        assert_eq!((a, b), (u32::MAX - 1, u32::MAX));

        // Wrapped back around; the next pass must skip both live ids.
        let (c, _slot_c) = router.reserve().unwrap();
        assert_eq!(c, 0);

        router.resolve(handle_response(c, "x")).unwrap();
        let mut state = router.lock();
        state.next_id = u32::MAX - 1;
        drop(state);

        let (d, _slot_d) = router.reserve().unwrap();
        assert_eq!(d, 0);
    }

    #[tokio::test]
    async fn test_resolve_delivers_to_matching_slot() {
        let router = Router::new();
        let (id, slot) = router.reserve().unwrap();

        router.resolve(handle_response(id, "abc")).unwrap();

        assert_eq!(slot.recv().await.unwrap(), handle_response(id, "abc"));
        assert_eq!(router.pending_count(), 0);
    }

    #[test]
    fn test_resolve_unknown_id_leaves_table() {
        let router = Router::new();
        let (id, _slot) = router.reserve().unwrap();

        let err = router.resolve(handle_response(id + 100, "x")).unwrap_err();

        assert!(matches!(err, SftpError::Routing { id: Some(_) }));
        assert_eq!(router.pending_count(), 1);
        assert!(!router.is_aborted());
    }

    #[tokio::test]
    async fn test_duplicate_response_is_routing_error() {
        let router = Router::new();
        let (id, slot) = router.reserve().unwrap();

        router.resolve(handle_response(id, "first")).unwrap();
        let err = router.resolve(handle_response(id, "second")).unwrap_err();
        assert!(matches!(err, SftpError::Routing { id: Some(x) } if x == id));

        assert_eq!(slot.recv().await.unwrap(), handle_response(id, "first"));
    }

    #[test]
    fn test_resolve_uncorrelated_message() {
        let router = Router::new();
        let err = router
            .resolve(Message::Version {
                version: 3,
                extensions: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, SftpError::Routing { id: None }));
    }

    #[tokio::test]
    async fn test_abort_fails_every_pending_slot() {
        let router = Router::new();
        let slots: Vec<_> = (0..5).map(|_| router.reserve().unwrap().1).collect();

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let count = router.abort(&SftpError::Transport(io));

        assert_eq!(count, 5);
        assert_eq!(router.pending_count(), 0);
        for slot in slots {
            match slot.recv().await {
                Err(SftpError::Shutdown(reason)) => assert!(reason.contains("pipe closed")),
                other => panic!("expected shutdown, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_abort_only_once() {
        let router = Router::new();
        let (_, slot) = router.reserve().unwrap();

        assert_eq!(router.abort(&SftpError::Shutdown("first".into())), 1);
        assert_eq!(router.abort(&SftpError::Shutdown("second".into())), 0);
        assert_eq!(router.abort_reason().as_deref(), Some("first"));

        assert!(matches!(slot.recv().await, Err(SftpError::Shutdown(r)) if r == "first"));
    }

    #[tokio::test]
    async fn test_reserve_after_abort_fails_fast() {
        let router = Router::new();
        router.abort(&SftpError::Shutdown("closed".into()));

        let (_, slot) = router.reserve().unwrap();

        assert_eq!(router.pending_count(), 0);
        assert!(matches!(slot.recv().await, Err(SftpError::Shutdown(_))));
    }

    #[test]
    fn test_release_forgets_id() {
        let router = Router::new();
        let (id, _slot) = router.reserve().unwrap();

        assert!(router.release(id));
        assert!(!router.release(id));
        assert_eq!(router.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_reserve_and_resolve() {
        let router = Arc::new(Router::new());
        let mut tasks = tokio::task::JoinSet::new();

        for i in 0..32 {
            let router = router.clone();
            tasks.spawn(async move {
                let (id, slot) = router.reserve().unwrap();
                let expected = format!("h{}", i);
                let responder = router.clone();
                let handle = expected.clone();
                tokio::spawn(async move {
                    responder.resolve(handle_response(id, &handle)).unwrap();
                });
                (slot.recv().await.unwrap(), handle_response(id, &expected))
            });
        }

        while let Some(result) = tasks.join_next().await {
            let (got, expected) = result.unwrap();
            assert_eq!(got, expected);
        }
        assert_eq!(router.pending_count(), 0);
    }
}
