use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::rc::Rc;

use crate::errors::ApiError;

const API_KEY_HEADER: &str = "X-Api-Key";

/// Flat access-key gate for write operations.
///
/// With no key configured the gate is a pass-through; otherwise requests
/// must carry the key in `X-Api-Key` or they are rejected before the
/// handler runs.
pub struct ApiKeyGuard {
    key: Option<String>,
}

impl ApiKeyGuard {
    pub fn new(key: Option<String>) -> Self {
        Self { key }
    }
}

impl<S, B> Transform<S, ServiceRequest> for ApiKeyGuard
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = ApiKeyGuardMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ApiKeyGuardMiddleware {
            service: Rc::new(service),
            key: self.key.clone(),
        }))
    }
}

pub struct ApiKeyGuardMiddleware<S> {
    service: Rc<S>,
    key: Option<String>,
}

impl<S, B> Service<ServiceRequest> for ApiKeyGuardMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if let Some(expected) = &self.key {
            let presented = req
                .headers()
                .get(API_KEY_HEADER)
                .and_then(|value| value.to_str().ok());
            if presented != Some(expected.as_str()) {
                return Box::pin(async { Err(ApiError::Unauthorized.into()) });
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move { fut.await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, web, App, HttpResponse};

    async fn ok() -> HttpResponse {
        HttpResponse::Ok().finish()
    }

    #[actix_web::test]
    async fn test_gate_disabled_without_key() {
        let app = test::init_service(
            App::new()
                .wrap(ApiKeyGuard::new(None))
                .route("/", web::post().to(ok)),
        )
        .await;

        let req = test::TestRequest::post().uri("/").to_request();
        let res = test::call_service(&app, req).await;
        assert!(res.status().is_success());
    }

    #[actix_web::test]
    async fn test_gate_checks_header() {
        let app = test::init_service(
            App::new()
                .wrap(ApiKeyGuard::new(Some("sesame".to_string())))
                .route("/", web::post().to(ok)),
        )
        .await;

        let missing = test::TestRequest::post().uri("/").to_request();
        let res = test::try_call_service(&app, missing).await;
        assert!(res.is_err());

        let wrong = test::TestRequest::post()
            .uri("/")
            .insert_header((API_KEY_HEADER, "open"))
            .to_request();
        assert!(test::try_call_service(&app, wrong).await.is_err());

        let right = test::TestRequest::post()
            .uri("/")
            .insert_header((API_KEY_HEADER, "sesame"))
            .to_request();
        let res = test::call_service(&app, right).await;
        assert!(res.status().is_success());
    }
}
