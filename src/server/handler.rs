use crate::{
    common::{
        data::{Request, Response},
        runtime,
    },
    server::state::MockState,
};
use async_trait::async_trait;
use std::sync::Arc;

/// The boundary between the connection layer and the mock engine.
#[async_trait]
pub(crate) trait Handler {
    /// Called once per decoded request, before the request is dispatched.
    fn record(&self, req: &Arc<Request>);

    /// Produces the response for `req`. May suspend, e.g. to inject latency.
    async fn handle(&self, req: Arc<Request>) -> Response;
}

pub(crate) struct MockHandler {
    state: Arc<MockState>,
}

impl MockHandler {
    pub fn new(state: Arc<MockState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl Handler for MockHandler {
    fn record(&self, req: &Arc<Request>) {
        self.state.history.push(req.clone());
    }

    async fn handle(&self, req: Arc<Request>) -> Response {
        let response = self.state.registry.find_response(&req);

        if !response.delay.is_zero() {
            tracing::trace!("Delaying response to {} by {:?}", req, response.delay);
            runtime::sleep(response.delay).await;
        }

        response
    }
}
