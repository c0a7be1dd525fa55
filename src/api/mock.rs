use crate::{
    api::MockServer,
    common::data::{Body, Request, Response},
    server::state::Matcher,
};
use bytes::Bytes;
use std::{sync::Arc, time::Duration};

/// Describes a mocked response and the requests it applies to.
///
/// A `Mock` without [`endpoint`](Mock::endpoint) or [`matching`](Mock::matching) applies to
/// every request.
///
/// ```
/// use httpstub::{Mock, MockServer};
/// use std::time::Duration;
///
/// let server = MockServer::new();
/// server.start(0).unwrap();
///
/// server.mock_response(
///     Mock::new(201)
///         .endpoint("POST /users")
///         .header("Location", "/users/1")
///         .body("created")
///         .delay(Duration::from_millis(10)),
/// );
/// ```
#[derive(Debug, Clone)]
pub struct Mock {
    response: Response,
    only_once: bool,
    endpoint: Option<String>,
    predicate: Option<Matcher>,
}

impl Mock {
    pub fn new(status: u16) -> Self {
        Self {
            response: Response::new(status),
            only_once: false,
            endpoint: None,
            predicate: None,
        }
    }

    /// Overrides the reason phrase. By default the canonical phrase of the status code is used.
    pub fn reason<S: Into<String>>(mut self, reason: S) -> Self {
        self.response.reason = reason.into();
        self
    }

    pub fn body<B: Into<Bytes>>(mut self, body: B) -> Self {
        self.response.body = Body::Full(body.into());
        self
    }

    /// Sends the body in pieces without a `Content-Length` header. The connection is closed
    /// after the response, so the client reads the body until EOF.
    pub fn streaming_body<I, B>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        self.response.body = Body::Streaming(chunks.into_iter().map(Into::into).collect());
        self
    }

    /// Adds a response header. Headers are sent exactly as given and in the order they were
    /// added; repeated names are sent repeatedly.
    pub fn header<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.response.headers.push((name.into(), value.into()));
        self
    }

    /// Lets the rule answer a single request only.
    pub fn only_once(mut self) -> Self {
        self.only_once = true;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.response.delay = delay;
        self
    }

    /// Restricts the rule to requests with the given `"METHOD PATH"`, e.g. `"GET /users"`.
    /// Takes precedence over [`matching`](Mock::matching).
    pub fn endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Restricts the rule to requests accepted by `predicate`. Ignored if an
    /// [`endpoint`](Mock::endpoint) is set as well.
    pub fn matching<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Matcher::Predicate(Arc::new(predicate)));
        self
    }

    pub(crate) fn into_parts(self) -> (Option<Matcher>, Response, bool) {
        let matcher = match (self.endpoint, self.predicate) {
            (Some(endpoint), _) => Some(Matcher::Endpoint(endpoint)),
            (None, predicate) => predicate,
        };
        (matcher, self.response, self.only_once)
    }
}

impl Default for Mock {
    fn default() -> Self {
        Mock::new(200)
    }
}

impl From<u16> for Mock {
    fn from(status: u16) -> Self {
        Mock::new(status)
    }
}

/// A registered mock rule.
pub struct MockRef<'a> {
    pub(crate) id: usize,
    pub(crate) server: &'a MockServer,
}

impl<'a> MockRef<'a> {
    /// The registration index of the rule. Rules with lower ids take precedence.
    pub fn id(&self) -> usize {
        self.id
    }

    /// How many requests this rule has answered. Returns 0 once the rule has been cleared.
    pub fn hits(&self) -> usize {
        self.server.state.registry.hits(self.id).unwrap_or(0)
    }

    /// `true` if this is a one-shot rule that has already answered its request.
    pub fn is_consumed(&self) -> bool {
        self.server
            .state
            .registry
            .is_consumed(self.id)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::data::canonical_reason;

    #[test]
    fn endpoint_overrides_predicate() {
        let (matcher, _, _) = Mock::new(200)
            .matching(|_| true)
            .endpoint("GET /a")
            .into_parts();
        assert!(matches!(matcher, Some(Matcher::Endpoint(ref e)) if e == "GET /a"));

        let (matcher, _, _) = Mock::new(200)
            .endpoint("GET /a")
            .matching(|_| true)
            .into_parts();
        assert!(matches!(matcher, Some(Matcher::Endpoint(_))));
    }

    #[test]
    fn builder_fills_response_template() {
        let (matcher, response, only_once) = Mock::new(503)
            .reason("Nope")
            .header("Retry-After", "1")
            .header("Retry-After", "2")
            .body(vec![1u8, 2, 3])
            .delay(Duration::from_millis(5))
            .only_once()
            .into_parts();

        assert!(matcher.is_none());
        assert!(only_once);
        assert_eq!(response.status(), 503);
        assert_eq!(response.reason(), "Nope");
        assert_eq!(response.headers().len(), 2);
        assert_eq!(response.content_length(), Some(3));
        assert_eq!(response.delay(), Duration::from_millis(5));
        assert_eq!(Mock::from(404).response.reason(), canonical_reason(404));
    }
}
