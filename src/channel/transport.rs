// The seam between a channel and whatever actually carries requests.

use std::future::Future;

use crate::aggregator::AggregatorHandle;
use crate::error::PipelineError;
use crate::models::{Request, Response};

/// One request/response exchange. Implementations need not apply a deadline;
/// the channel wraps every call in its own timeout.
pub trait Transport: Send + Sync + 'static {
    fn call(&self, request: Request)
    -> impl Future<Output = Result<Response, PipelineError>> + Send;
}

/// In-process transport: hand the request to the aggregator service task.
impl Transport for AggregatorHandle {
    fn call(
        &self,
        request: Request,
    ) -> impl Future<Output = Result<Response, PipelineError>> + Send {
        self.request(request)
    }
}
