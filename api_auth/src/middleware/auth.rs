use std::{future::Future, pin::Pin, rc::Rc, sync::Arc};

use actix_web::{
    Error, HttpMessage,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::{Method, header},
};
use common::{
    env_config::JwtConfig,
    error::AppError,
    jwt::{self, AccessClaims},
};
use futures::future::{Ready, ok};

pub const CSRF_HEADER: &str = "X-CSRF-TOKEN";

/// Validates the bearer access token on every non-public path, stores the
/// claims in the request extensions and, for state-changing methods, checks
/// that `X-CSRF-TOKEN` matches the token bound into the claims.
pub struct AuthMiddleware {
    jwt_config: Rc<JwtConfig>,
    public_paths: &'static [&'static str],
}

impl AuthMiddleware {
    pub fn new(jwt_config: JwtConfig, public_paths: &'static [&'static str]) -> Self {
        AuthMiddleware {
            jwt_config: Rc::new(jwt_config),
            public_paths,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<actix_web::body::BoxBody>;
    type Error = Error;
    type Transform = AuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddlewareService {
            service: Arc::new(service),
            jwt_config: self.jwt_config.clone(),
            public_paths: self.public_paths,
        })
    }
}

pub struct AuthMiddlewareService<S> {
    service: Arc<S>,
    jwt_config: Rc<JwtConfig>,
    public_paths: &'static [&'static str],
}

fn requires_csrf(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

fn authorize(req: &ServiceRequest, config: &JwtConfig) -> Result<AccessClaims, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(jwt::bearer_token)
        .ok_or_else(|| AppError::Unauthorized("No authorization token provided".to_string()))?;

    let claims = jwt::validate_access_token(token, config)?;

    if requires_csrf(req.method()) {
        let csrf = req
            .headers()
            .get(CSRF_HEADER)
            .and_then(|value| value.to_str().ok());
        if csrf != Some(claims.csrf.as_str()) {
            return Err(AppError::Forbidden("Missing or invalid CSRF token".to_string()));
        }
    }

    Ok(claims)
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<actix_web::body::BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let is_public = req.method() == Method::OPTIONS || self.public_paths.contains(&req.path());
        if is_public {
            let fut = self.service.call(req);
            return Box::pin(async move { fut.await.map(|res| res.map_into_boxed_body()) });
        }

        match authorize(&req, &self.jwt_config) {
            Ok(claims) => {
                req.extensions_mut().insert(claims);
                let srv = Arc::clone(&self.service);
                Box::pin(async move { srv.call(req).await.map(|res| res.map_into_boxed_body()) })
            }
            Err(error) => {
                log::debug!("Rejected {} {}: {}", req.method(), req.path(), error);
                let response = error.to_http_response();
                Box::pin(async move { Ok(req.into_response(response)) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, HttpResponse, http::StatusCode, test, web};
    use common::jwt::ClaimsSpec;
    use uuid::Uuid;

    const PUBLIC: &[&str] = &["/auth/login"];

    fn config() -> JwtConfig {
        JwtConfig {
            access_secret: "test-access".to_string(),
            refresh_secret: "test-refresh".to_string(),
            access_expiration_minutes: 15,
            refresh_expiration_days: 30,
        }
    }

    fn token(csrf: &str) -> String {
        jwt::generate_access_token(
            ClaimsSpec {
                user_id: Uuid::new_v4(),
                email: "user@example.com",
                csrf,
            },
            &config(),
        )
        .unwrap()
    }

    async fn whoami(claims: web::ReqData<AccessClaims>) -> HttpResponse {
        HttpResponse::Ok().body(claims.email.clone())
    }

    macro_rules! app {
        () => {
            test::init_service(
                App::new()
                    .wrap(AuthMiddleware::new(config(), PUBLIC))
                    .route("/auth/login", web::post().to(|| async { HttpResponse::Ok().finish() }))
                    .route("/auth/me", web::get().to(whoami))
                    .route("/subscription/cancel", web::post().to(whoami)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn public_path_needs_no_token() {
        let app = app!();
        let req = test::TestRequest::post().uri("/auth/login").to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn missing_token_is_unauthorized() {
        let app = app!();
        let req = test::TestRequest::get().uri("/auth/me").to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn garbage_token_is_unauthorized() {
        let app = app!();
        let req = test::TestRequest::get()
            .uri("/auth/me")
            .insert_header((header::AUTHORIZATION, "Bearer not-a-jwt"))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn valid_token_exposes_claims_to_handlers() {
        let app = app!();
        let req = test::TestRequest::get()
            .uri("/auth/me")
            .insert_header((header::AUTHORIZATION, format!("Bearer {}", token("c1"))))
            .to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert_eq!(body, "user@example.com");
    }

    #[actix_web::test]
    async fn post_without_matching_csrf_is_forbidden() {
        let app = app!();
        let bearer = format!("Bearer {}", token("c1"));

        let req = test::TestRequest::post()
            .uri("/subscription/cancel")
            .insert_header((header::AUTHORIZATION, bearer.clone()))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri("/subscription/cancel")
            .insert_header((header::AUTHORIZATION, bearer.clone()))
            .insert_header((CSRF_HEADER, "c2"))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri("/subscription/cancel")
            .insert_header((header::AUTHORIZATION, bearer))
            .insert_header((CSRF_HEADER, "c1"))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
    }
}
