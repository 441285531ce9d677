use actix_cors::Cors;
use actix_web::http::header::{self, HeaderName};

pub fn middleware(origin: &str) -> Cors {
    Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("x-csrf-token"),
            HeaderName::from_static("x-device-id"),
            HeaderName::from_static("x-device-name"),
            HeaderName::from_static("x-device-type"),
            HeaderName::from_static("x-os-name"),
            HeaderName::from_static("x-os-version"),
            HeaderName::from_static("x-app-version"),
        ])
        .allowed_origin(origin)
        .max_age(3600)
}
