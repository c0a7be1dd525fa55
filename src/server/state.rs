use crate::common::data::{Request, Response};
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// Decides whether a mock rule applies to a request.
#[derive(Clone)]
pub enum Matcher {
    /// Exact match on `"METHOD PATH"`. The query string of the request is ignored.
    Endpoint(String),
    /// An arbitrary predicate over the decoded request.
    Predicate(Arc<dyn Fn(&Request) -> bool + Send + Sync>),
}

impl Matcher {
    pub fn matches(&self, req: &Request) -> bool {
        match self {
            Matcher::Endpoint(endpoint) => match endpoint.split_once(' ') {
                Some((method, path)) => req.method == method.trim() && req.path == path.trim(),
                None => false,
            },
            Matcher::Predicate(predicate) => predicate(req),
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Endpoint(endpoint) => f.debug_tuple("Endpoint").field(endpoint).finish(),
            Matcher::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct MockRule {
    pub id: usize,
    pub matcher: Option<Matcher>,
    pub response: Response,
    pub only_once: bool,
    pub consumed: bool,
    pub hits: usize,
}

impl MockRule {
    fn is_exhausted(&self) -> bool {
        self.only_once && self.consumed
    }

    fn is_candidate(&self, req: &Request) -> bool {
        if self.is_exhausted() {
            return false;
        }

        match &self.matcher {
            Some(matcher) => matcher.matches(req),
            None => true,
        }
    }
}

#[derive(Default)]
struct Rules {
    next_id: usize,
    rules: Vec<MockRule>,
}

/// The ordered list of mock rules. Registration order is match priority.
#[derive(Default)]
pub(crate) struct MockRegistry {
    state: Mutex<Rules>,
}

impl MockRegistry {
    /// Appends a rule and returns its id.
    pub fn add(&self, matcher: Option<Matcher>, response: Response, only_once: bool) -> usize {
        let mut state = lock(&self.state);

        let id = state.next_id;
        state.next_id += 1;

        tracing::debug!(
            "Adding mock rule with id={} (matcher={:?}, only_once={})",
            id,
            matcher,
            only_once
        );

        state.rules.push(MockRule {
            id,
            matcher,
            response,
            only_once,
            consumed: false,
            hits: 0,
        });

        id
    }

    /// Selects the response for `req`.
    ///
    /// The first rule (in registration order) whose matcher accepts the request and that is not
    /// an exhausted one-shot rule wins. Selection and consumption happen under one lock, so two
    /// concurrent requests can never both win the same one-shot rule.
    ///
    /// Without a winner, the most recently registered rule without a matcher that is not
    /// exhausted serves as the configured default. If there is none, an empty `200 OK` is
    /// returned.
    pub fn find_response(&self, req: &Request) -> Response {
        let mut state = lock(&self.state);

        if let Some(rule) = state.rules.iter_mut().find(|rule| rule.is_candidate(req)) {
            if rule.only_once {
                rule.consumed = true;
            }
            rule.hits += 1;

            tracing::debug!("Matched mock rule with id={} to request {}", rule.id, req);
            return rule.response.clone();
        }

        if let Some(rule) = state
            .rules
            .iter()
            .rev()
            .find(|rule| rule.matcher.is_none() && !rule.is_exhausted())
        {
            tracing::debug!(
                "No mock rule matched request {}, using default rule with id={}",
                req,
                rule.id
            );
            return rule.response.clone();
        }

        tracing::debug!("No mock rule matched request {}, using empty 200", req);
        Response::default()
    }

    /// Number of requests the rule with the given id has won, or `None` if it was removed.
    pub fn hits(&self, id: usize) -> Option<usize> {
        lock(&self.state)
            .rules
            .iter()
            .find(|rule| rule.id == id)
            .map(|rule| rule.hits)
    }

    pub fn is_consumed(&self, id: usize) -> Option<bool> {
        lock(&self.state)
            .rules
            .iter()
            .find(|rule| rule.id == id)
            .map(MockRule::is_exhausted)
    }

    pub fn clear(&self) {
        lock(&self.state).rules.clear();
        tracing::trace!("Deleted all mock rules");
    }
}

/// Every decoded request, in the order decoding completed.
pub(crate) struct RequestHistory {
    limit: Option<usize>,
    entries: Mutex<Vec<Arc<Request>>>,
}

impl RequestHistory {
    /// A limit of `Some(0)` is treated as no limit.
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit: limit.filter(|limit| *limit > 0),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, req: Arc<Request>) {
        let mut entries = lock(&self.entries);

        if let Some(limit) = self.limit {
            if entries.len() >= limit {
                let excess = entries.len() + 1 - limit;
                entries.drain(..excess);
            }
        }

        entries.push(req);
    }

    pub fn all(&self) -> Vec<Arc<Request>> {
        lock(&self.entries).clone()
    }

    pub fn endpoints(&self) -> Vec<String> {
        lock(&self.entries).iter().map(|req| req.endpoint()).collect()
    }

    pub fn last(&self) -> Option<Arc<Request>> {
        lock(&self.entries).last().cloned()
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
        tracing::trace!("Deleted request history");
    }
}

/// Shared mutable state of one mock server. The rule list and the history are guarded
/// independently.
pub(crate) struct MockState {
    pub registry: MockRegistry,
    pub history: RequestHistory,
}

impl MockState {
    pub fn new(history_limit: Option<usize>) -> Self {
        Self {
            registry: MockRegistry::default(),
            history: RequestHistory::new(history_limit),
        }
    }

    pub fn reset(&self) {
        self.registry.clear();
        self.history.clear();
    }
}

impl Default for MockState {
    fn default() -> Self {
        MockState::new(None)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
