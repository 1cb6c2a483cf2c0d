use actix_web::{HttpResponse, Responder, get, web};
use serde_json::json;
use tracing::debug;

use super::error::AppError;
use crate::engine::Engine;
use crate::monitoring::push::PushSignal;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health_route).service(
        web::resource("/api/push/{token}")
            .route(web::get().to(push_route))
            .route(web::post().to(push_route)),
    );
}

/// Health check route
/// This route returns no content, the response status is enough.
#[get("/health")]
pub async fn health_route() -> impl Responder {
    HttpResponse::Ok()
}

/// Inbound heartbeat for a push target: `?status=up|down&msg=...&ping=...`
pub async fn push_route(
    engine: web::Data<Engine>,
    token: web::Path<String>,
    signal: web::Query<PushSignal>,
) -> Result<HttpResponse, AppError> {
    let target_id = engine.push(&token, signal.into_inner()).await?;
    debug!(target_id, "Push accepted");
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::database::models::{PushSettings, Target, TargetKind};
    use crate::monitoring::types::MonitorStatus;
    use crate::test_support::test_database;
    use actix_web::{App, test};
    use std::time::Duration;

    #[actix_web::test]
    async fn health_is_ok() {
        let app = test::init_service(App::new().configure(routes)).await;
        let response = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert!(response.status().is_success());
    }

    #[actix_web::test]
    async fn push_reaches_running_target() {
        let (db, _dir) = test_database().await.unwrap();
        let engine = web::Data::new(Engine::new(db, config::Engine::default()));
        let settings = PushSettings::generate();
        let token = settings.token.clone();
        let id = engine.save_target(&Target::new("cron", TargetKind::Push(settings))).await.unwrap();

        let app = test::init_service(App::new().app_data(engine.clone()).configure(routes)).await;

        let request = test::TestRequest::get().uri(&format!("/api/push/{token}?status=down&msg=backup%20failed")).to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, request).await;
        assert_eq!(body["ok"], true);

        let request = test::TestRequest::post().uri("/api/push/unknown").to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), actix_web::http::StatusCode::NOT_FOUND);

        let mut beats = Vec::new();
        for _ in 0..200 {
            beats = engine.get_heartbeats(id, 1).await.unwrap();
            if !beats.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(beats[0].status, MonitorStatus::Down);
        assert_eq!(beats[0].message, "backup failed");
        engine.stop_all().await;
    }
}
