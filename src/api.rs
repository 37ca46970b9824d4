use std::sync::Arc;

use actix_web::{
    delete, error::ErrorConflict, error::ErrorInternalServerError, error::ErrorServiceUnavailable,
    get, post, web, HttpResponse,
};
use serde::{Deserialize, Serialize};

use crate::{coordinator::Handle, db::RecordStore, results, status::Activity};

pub type Store = Arc<dyn RecordStore>;

#[get("/v1/status")]
pub async fn status_service(handle: web::Data<Handle>) -> HttpResponse {
    HttpResponse::Ok().json(handle.status())
}

#[post("/v1/campaign/start")]
pub async fn start_service(handle: web::Data<Handle>) -> actix_web::Result<HttpResponse> {
    let status = handle.status();
    if !status.can_start() {
        return Err(ErrorConflict(status.to_string()));
    }
    handle.start().await.map_err(ErrorServiceUnavailable)?;
    Ok(HttpResponse::Accepted().finish())
}

#[post("/v1/campaign/stop")]
pub async fn stop_service(handle: web::Data<Handle>) -> actix_web::Result<HttpResponse> {
    handle.stop().await.map_err(ErrorServiceUnavailable)?;
    Ok(HttpResponse::Accepted().finish())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelAnswer {
    location_key: String,
    label: Option<String>,
}

#[post("/v1/label")]
pub async fn label_service(
    data: web::Json<LabelAnswer>,
    handle: web::Data<Handle>,
) -> actix_web::Result<HttpResponse> {
    let data = data.into_inner();
    handle
        .label(data.location_key, data.label)
        .await
        .map_err(ErrorServiceUnavailable)?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/v1/results")]
pub async fn results_service(store: web::Data<Store>) -> actix_web::Result<HttpResponse> {
    let summary = results::summarize(store.get_ref().as_ref())
        .await
        .map_err(ErrorInternalServerError)?;
    Ok(HttpResponse::Ok().json(summary))
}

#[derive(Debug, Serialize)]
struct Cleared {
    deleted: u64,
}

#[delete("/v1/observations")]
pub async fn clear_service(
    store: web::Data<Store>,
    handle: web::Data<Handle>,
) -> actix_web::Result<HttpResponse> {
    if matches!(handle.status().activity, Activity::Sampling { .. }) {
        return Err(ErrorConflict("campaign in progress"));
    }
    let deleted = store
        .clear_all()
        .await
        .map_err(ErrorInternalServerError)?;
    Ok(HttpResponse::Ok().json(Cleared { deleted }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(status_service)
        .service(start_service)
        .service(stop_service)
        .service(label_service)
        .service(results_service)
        .service(clear_service);
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test, App};

    use super::*;
    use crate::{
        config::ScanConfig,
        coordinator,
        db::MemoryStore,
        status::Status,
        testing::{ap, FakePosition, FakeRadio},
    };

    async fn settled_status(handle: &Handle, f: impl FnMut(&Status) -> bool) {
        handle.subscribe().wait_for(f).await.unwrap();
    }

    #[actix_web::test]
    async fn status_results_and_clear() {
        let store: Store = Arc::new(MemoryStore::new());
        let (handle, _labels, _task) = coordinator::spawn(
            Arc::new(FakeRadio::steady(vec![ap("AA:BB", -40)])),
            Arc::new(FakePosition::at(1.0, 2.0)),
            store.clone(),
            ScanConfig::default(),
        );
        settled_status(&handle, |s| s.can_start()).await;

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(handle.clone()))
                .app_data(web::Data::new(store.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/v1/status").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["activity"]["state"], "detecting");
        assert_eq!(body["location"]["key"], "lat=1.000,lon=2.000");

        let req = test::TestRequest::get().uri("/v1/results").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body[0]["locationKey"], "lat=1.000,lon=2.000");
        assert_eq!(body[0]["accessPoints"][0]["accessPointId"], "AA:BB");

        let req = test::TestRequest::delete().uri("/v1/observations").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        handle.shutdown().await.unwrap();
    }

    #[actix_web::test]
    async fn start_and_stop_are_accepted() {
        let store: Store = Arc::new(MemoryStore::new());
        let (handle, _labels, _task) = coordinator::spawn(
            Arc::new(FakeRadio::steady(vec![ap("AA:BB", -40)])),
            Arc::new(FakePosition::at(1.0, 2.0)),
            store.clone(),
            ScanConfig::default(),
        );
        settled_status(&handle, |s| s.can_start()).await;

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(handle.clone()))
                .app_data(web::Data::new(store))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post().uri("/v1/campaign/start").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        settled_status(&handle, |s| s.location.locked).await;

        let req = test::TestRequest::post().uri("/v1/campaign/stop").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        settled_status(&handle, |s| !s.location.locked).await;

        handle.shutdown().await.unwrap();
    }

    #[actix_web::test]
    async fn start_refused_when_nothing_visible() {
        let store: Store = Arc::new(MemoryStore::new());
        let (handle, _labels, _task) = coordinator::spawn(
            Arc::new(FakeRadio::steady(Vec::new())),
            Arc::new(FakePosition::at(1.0, 2.0)),
            store.clone(),
            ScanConfig::default(),
        );
        settled_status(&handle, |s| s.location.key.is_some()).await;

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(handle.clone()))
                .app_data(web::Data::new(store.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post().uri("/v1/campaign/start").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert!(store.all().await.unwrap().is_empty());

        handle.shutdown().await.unwrap();
    }

    #[actix_web::test]
    async fn label_is_applied() {
        let store: Store = Arc::new(MemoryStore::new());
        let (handle, _labels, _task) = coordinator::spawn(
            Arc::new(FakeRadio::steady(vec![ap("AA:BB", -40)])),
            Arc::new(FakePosition::at(1.0, 2.0)),
            store.clone(),
            ScanConfig::default(),
        );
        settled_status(&handle, |s| s.awaiting_label).await;

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(handle.clone()))
                .app_data(web::Data::new(store))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/v1/label")
            .set_json(serde_json::json!({ "locationKey": "lat=1.000,lon=2.000", "label": "Kitchen" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        settled_status(&handle, |s| s.location.label == "Kitchen").await;
        handle.shutdown().await.unwrap();
    }
}
