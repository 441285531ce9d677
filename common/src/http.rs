use actix_web::{HttpResponse, Responder};
use serde::Serialize;

use crate::error::Res;

pub struct Success;
impl Success {
    pub fn created<T: Serialize>(body: T) -> Res<impl Responder> {
        Result::Ok(HttpResponse::Created().json(body))
    }
    pub fn ok<T: Serialize>(body: T) -> Res<impl Responder> {
        Result::Ok(HttpResponse::Ok().json(body))
    }
    /// `{"success": true, "message": ...}` used by the state-changing endpoints
    pub fn message(message: impl Into<String>) -> Res<impl Responder> {
        Result::Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "message": message.into(),
        })))
    }
}
