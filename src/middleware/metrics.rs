//! Request accounting for the metrics endpoint.
//!
//! Every finished response is recorded with one [`AppState::record_request`]
//! call: global counters plus the per-endpoint entry. The media WebSocket
//! upgrade is the exception to latency tracking; its response only completes
//! when the call hangs up, so only its request and error counts are kept.

use crate::state::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};

/// The long-lived WebSocket route, excluded from latency accounting.
const MEDIA_PATH: &str = "/ws/media";

pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService { service }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let started = Instant::now();
        let endpoint = format!("{} {}", req.method(), req.uri().path());
        let timed = req.uri().path() != MEDIA_PATH;

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;

            let failed = match &result {
                Ok(response) => {
                    response.status().is_client_error() || response.status().is_server_error()
                }
                Err(_) => true,
            };
            if let Ok(response) = &result {
                if let Some(state) = response.request().app_data::<web::Data<AppState>>() {
                    let duration = timed.then(|| started.elapsed().as_millis() as u64);
                    state.record_request(&endpoint, duration, failed);
                }
            }

            result
        })
    }
}
