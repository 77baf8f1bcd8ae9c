//! Ordered stub list with stable ids and per-stub response cursors.

use super::types::{ProxyMode, Stub, StubResponse};
use crate::predicate::{same_predicate_set, Predicate};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Identity of a stub that survives insertions and removals around it.
pub type StubId = u64;

#[derive(Debug)]
struct StubSlot {
    id: StubId,
    predicates: Arc<Vec<Predicate>>,
    responses: Vec<StubResponse>,
    cursor: usize,
    /// Proxy stub whose traffic created this stub.
    recorded_by: Option<StubId>,
}

/// Matching candidate captured before any mutation by the current request.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: StubId,
    pub predicates: Arc<Vec<Predicate>>,
}

/// Where a recording ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// Appended to an existing companion stub.
    Appended { index: usize },
    /// Inserted as a new stub.
    Inserted { index: usize },
    /// The proxy stub was removed while the origin round trip was in flight.
    Dropped,
}

#[derive(Debug, Default)]
pub struct StubList {
    slots: RwLock<Vec<StubSlot>>,
    next_id: AtomicU64,
}

impl StubList {
    pub fn new(stubs: Vec<Stub>) -> Self {
        let list = Self::default();
        list.replace(stubs);
        list
    }

    fn slot(&self, stub: Stub, recorded_by: Option<StubId>) -> StubSlot {
        StubSlot {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            predicates: Arc::new(stub.predicates),
            responses: stub.responses,
            cursor: 0,
            recorded_by,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Candidates in priority order.
    pub fn snapshot(&self) -> Vec<Candidate> {
        self.slots
            .read()
            .iter()
            .map(|slot| Candidate {
                id: slot.id,
                predicates: Arc::clone(&slot.predicates),
            })
            .collect()
    }

    /// Return the response under the stub's cursor and advance it, wrapping
    /// to the first response after the last. `None` if the stub is gone.
    pub fn next_response(&self, id: StubId) -> Option<StubResponse> {
        let mut slots = self.slots.write();
        let slot = slots.iter_mut().find(|slot| slot.id == id)?;
        if slot.responses.is_empty() {
            return Some(StubResponse::default());
        }
        let response = slot.responses[slot.cursor % slot.responses.len()].clone();
        slot.cursor = (slot.cursor + 1) % slot.responses.len();
        Some(response)
    }

    /// Store an origin response recorded through proxy stub `proxy_id`.
    ///
    /// A companion recorded earlier by the same proxy with an equivalent
    /// predicate set is extended; otherwise proxyOnce inserts a new stub just
    /// in front of the proxy and proxyAlways appends one at the end.
    pub fn record(
        &self,
        proxy_id: StubId,
        mode: ProxyMode,
        predicates: Vec<Predicate>,
        response: StubResponse,
    ) -> Recorded {
        let mut slots = self.slots.write();

        let companion = slots.iter().position(|slot| {
            slot.recorded_by == Some(proxy_id) && same_predicate_set(&slot.predicates, &predicates)
        });
        if let Some(index) = companion {
            slots[index].responses.push(response);
            debug!(
                "Appended recorded response to stub {} ({} responses)",
                index,
                slots[index].responses.len()
            );
            return Recorded::Appended { index };
        }

        let Some(proxy_index) = slots.iter().position(|slot| slot.id == proxy_id) else {
            return Recorded::Dropped;
        };
        let slot = self.slot(Stub::new(predicates, vec![response]), Some(proxy_id));
        let index = match mode {
            ProxyMode::ProxyOnce => proxy_index,
            ProxyMode::ProxyAlways => slots.len(),
        };
        slots.insert(index, slot);
        debug!("Inserted recorded stub at index {} ({:?})", index, mode);
        Recorded::Inserted { index }
    }

    /// Replace every stub. Cursors start over.
    pub fn replace(&self, stubs: Vec<Stub>) {
        let fresh: Vec<StubSlot> = stubs.into_iter().map(|s| self.slot(s, None)).collect();
        *self.slots.write() = fresh;
    }

    /// Insert at `index`, or append when `index` is `None` or past the end.
    pub fn insert(&self, index: Option<usize>, stub: Stub) -> usize {
        let slot = self.slot(stub, None);
        let mut slots = self.slots.write();
        let index = index.unwrap_or(slots.len()).min(slots.len());
        slots.insert(index, slot);
        index
    }

    pub fn remove(&self, index: usize) -> Option<Stub> {
        let mut slots = self.slots.write();
        if index >= slots.len() {
            return None;
        }
        let slot = slots.remove(index);
        Some(Stub::new(slot.predicates.as_ref().clone(), slot.responses))
    }

    /// Current stubs in order.
    pub fn stubs(&self) -> Vec<Stub> {
        self.slots
            .read()
            .iter()
            .map(|slot| Stub::new(slot.predicates.as_ref().clone(), slot.responses.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imposter::types::{IsResponse, ProxyResponse};
    use serde_json::json;

    fn is(body: &str) -> StubResponse {
        StubResponse::is(IsResponse {
            body: Some(json!(body)),
            ..IsResponse::default()
        })
    }

    fn body_of(response: &StubResponse) -> String {
        match response {
            StubResponse::Is { is, .. } => is.body.clone().unwrap_or_default().to_string(),
            other => panic!("expected is, got {other:?}"),
        }
    }

    fn path(p: &str) -> Vec<Predicate> {
        vec![Predicate::try_from(json!({"deepEquals": {"path": p}})).unwrap()]
    }

    fn proxy_stub(mode: ProxyMode) -> Stub {
        Stub::new(
            vec![],
            vec![StubResponse::Proxy {
                proxy: ProxyResponse::new("http://origin", mode),
            }],
        )
    }

    #[test]
    fn test_cursor_cycles() {
        let list = StubList::new(vec![Stub::new(vec![], vec![is("a"), is("b"), is("c")])]);
        let id = list.snapshot()[0].id;
        let bodies: Vec<String> = (0..4)
            .map(|_| body_of(&list.next_response(id).unwrap()))
            .collect();
        assert_eq!(bodies, vec!["\"a\"", "\"b\"", "\"c\"", "\"a\""]);
    }

    #[test]
    fn test_stub_without_responses_yields_default() {
        let list = StubList::new(vec![Stub::default()]);
        let id = list.snapshot()[0].id;
        assert_eq!(list.next_response(id), Some(StubResponse::default()));
    }

    #[test]
    fn test_proxy_once_inserts_before_proxy() {
        let list = StubList::new(vec![Stub::new(path("/other"), vec![is("x")]), proxy_stub(ProxyMode::ProxyOnce)]);
        let proxy_id = list.snapshot()[1].id;

        let first = list.record(proxy_id, ProxyMode::ProxyOnce, path("/first"), is("1"));
        assert_eq!(first, Recorded::Inserted { index: 1 });
        let second = list.record(proxy_id, ProxyMode::ProxyOnce, path("/second"), is("2"));
        assert_eq!(second, Recorded::Inserted { index: 2 });

        let stubs = list.stubs();
        assert_eq!(stubs.len(), 4);
        assert_eq!(stubs[1].predicates, path("/first"));
        assert_eq!(stubs[2].predicates, path("/second"));
        assert!(matches!(stubs[3].responses[0], StubResponse::Proxy { .. }));
    }

    #[test]
    fn test_proxy_always_appends_companions() {
        let list = StubList::new(vec![proxy_stub(ProxyMode::ProxyAlways)]);
        let proxy_id = list.snapshot()[0].id;

        list.record(proxy_id, ProxyMode::ProxyAlways, path("/first"), is("1"));
        list.record(proxy_id, ProxyMode::ProxyAlways, path("/second"), is("2"));
        let appended = list.record(proxy_id, ProxyMode::ProxyAlways, path("/first"), is("3"));
        assert_eq!(appended, Recorded::Appended { index: 1 });

        let stubs = list.stubs();
        assert_eq!(stubs.len(), 3);
        assert_eq!(stubs[1].responses, vec![is("1"), is("3")]);
        assert_eq!(stubs[2].responses, vec![is("2")]);
    }

    #[test]
    fn test_recording_for_removed_proxy_is_dropped() {
        let list = StubList::new(vec![proxy_stub(ProxyMode::ProxyOnce)]);
        let proxy_id = list.snapshot()[0].id;
        list.remove(0);
        assert_eq!(
            list.record(proxy_id, ProxyMode::ProxyOnce, path("/"), is("x")),
            Recorded::Dropped
        );
        assert!(list.is_empty());
    }

    #[test]
    fn test_replace_resets_cursors() {
        let list = StubList::new(vec![Stub::new(vec![], vec![is("a"), is("b")])]);
        let id = list.snapshot()[0].id;
        list.next_response(id);
        list.replace(list.stubs());
        let id = list.snapshot()[0].id;
        assert_eq!(body_of(&list.next_response(id).unwrap()), "\"a\"");
    }

    #[test]
    fn test_insert_and_remove_by_index() {
        let list = StubList::new(vec![Stub::new(path("/a"), vec![]), Stub::new(path("/c"), vec![])]);
        assert_eq!(list.insert(Some(1), Stub::new(path("/b"), vec![])), 1);
        assert_eq!(list.insert(None, Stub::new(path("/d"), vec![])), 3);
        assert_eq!(list.insert(Some(99), Stub::new(path("/e"), vec![])), 4);
        let removed = list.remove(0).unwrap();
        assert_eq!(removed.predicates, path("/a"));
        assert!(list.remove(10).is_none());
        let paths: Vec<Vec<Predicate>> = list.stubs().into_iter().map(|s| s.predicates).collect();
        assert_eq!(paths, vec![path("/b"), path("/c"), path("/d"), path("/e")]);
    }
}
