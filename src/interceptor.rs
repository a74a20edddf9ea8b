//! Request and response interceptors.
//!
//! Interceptors are kept in two ordered lists owned by the client. Request
//! interceptors run before every attempt and may rewrite the outgoing
//! [`RequestDescriptor`]; response interceptors run once per successful JSON
//! response and may rewrite the parsed payload. Both run in registration
//! order, each awaited before the next one starts.

use crate::{RequestDescriptor, ResponseParts, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Transforms a request before it is sent.
///
/// Returning an error aborts the request with that error; it is classified
/// like any other failure of the attempt.
///
/// # Examples
///
/// ```
/// use compliance_client::{RequestDescriptor, Result};
///
/// // Plain closures are interceptors.
/// let tag_tenant = |request: RequestDescriptor| -> Result<RequestDescriptor> {
///     request.with_header("x-tenant", "acme")
/// };
/// # let _ = tag_tenant;
/// ```
#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    /// Returns the (possibly modified) request.
    async fn intercept(&self, request: RequestDescriptor) -> Result<RequestDescriptor>;
}

/// Transforms the parsed payload of a successful response.
#[async_trait]
pub trait ResponseInterceptor: Send + Sync {
    /// Returns the (possibly modified) payload.
    async fn intercept(&self, response: &ResponseParts, data: Value) -> Result<Value>;
}

#[async_trait]
impl<F> RequestInterceptor for F
where
    F: Fn(RequestDescriptor) -> Result<RequestDescriptor> + Send + Sync,
{
    async fn intercept(&self, request: RequestDescriptor) -> Result<RequestDescriptor> {
        self(request)
    }
}

#[async_trait]
impl<F> ResponseInterceptor for F
where
    F: Fn(&ResponseParts, Value) -> Result<Value> + Send + Sync,
{
    async fn intercept(&self, response: &ResponseParts, data: Value) -> Result<Value> {
        self(response, data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Request,
    Response,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    request: Vec<(u64, Arc<dyn RequestInterceptor>)>,
    response: Vec<(u64, Arc<dyn ResponseInterceptor>)>,
}

impl Registry {
    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// The client's interceptor lists.
#[derive(Clone, Default)]
pub struct Interceptors {
    registry: Arc<Mutex<Registry>>,
}

/// Removes the interceptor it was returned for.
///
/// Dropping the handle keeps the interceptor registered.
#[derive(Debug)]
#[must_use = "dropping the handle keeps the interceptor registered; call remove() to unregister"]
pub struct InterceptorHandle {
    id: u64,
    side: Side,
    registry: Weak<Mutex<Registry>>,
}

impl InterceptorHandle {
    /// Unregisters exactly the interceptor this handle was returned for.
    ///
    /// Returns `false` if the client no longer exists.
    pub fn remove(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
        match self.side {
            Side::Request => {
                let before = registry.request.len();
                registry.request.retain(|(id, _)| *id != self.id);
                registry.request.len() != before
            }
            Side::Response => {
                let before = registry.response.len();
                registry.response.retain(|(id, _)| *id != self.id);
                registry.response.len() != before
            }
        }
    }
}

impl Interceptors {
    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a request interceptor.
    pub fn add_request(&self, interceptor: Arc<dyn RequestInterceptor>) -> InterceptorHandle {
        let mut registry = self.lock();
        let id = registry.allocate_id();
        registry.request.push((id, interceptor));
        InterceptorHandle {
            id,
            side: Side::Request,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Appends a response interceptor.
    pub fn add_response(&self, interceptor: Arc<dyn ResponseInterceptor>) -> InterceptorHandle {
        let mut registry = self.lock();
        let id = registry.allocate_id();
        registry.response.push((id, interceptor));
        InterceptorHandle {
            id,
            side: Side::Response,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Number of registered (request, response) interceptors.
    pub fn counts(&self) -> (usize, usize) {
        let registry = self.lock();
        (registry.request.len(), registry.response.len())
    }

    /// Runs every request interceptor over `request`, in order.
    pub async fn apply_request(
        &self,
        mut request: RequestDescriptor,
    ) -> Result<RequestDescriptor> {
        // Snapshot so the lock is not held across await points.
        let chain: Vec<_> = self
            .lock()
            .request
            .iter()
            .map(|(_, interceptor)| Arc::clone(interceptor))
            .collect();
        for interceptor in chain {
            request = interceptor.intercept(request).await?;
        }
        Ok(request)
    }

    /// Runs every response interceptor over `data`, in order.
    pub async fn apply_response(
        &self,
        response: &ResponseParts,
        mut data: Value,
    ) -> Result<Value> {
        let chain: Vec<_> = self
            .lock()
            .response
            .iter()
            .map(|(_, interceptor)| Arc::clone(interceptor))
            .collect();
        for interceptor in chain {
            data = interceptor.intercept(response, data).await?;
        }
        Ok(data)
    }
}
