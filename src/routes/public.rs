use actix_web::{web, HttpResponse};

use crate::{
    error::ApiResult,
    identity::{self, LoginRequest, RegisterUser},
    models::{Role, UserProfile},
    state::AppState,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health)))
        .service(
            web::scope("/auth")
                .service(web::resource("/users/register").route(web::post().to(register_user)))
                .service(web::resource("/users/login").route(web::post().to(login_user)))
                .service(web::resource("/mechanics/login").route(web::post().to(login_mechanic)))
                .service(web::resource("/managers/login").route(web::post().to(login_manager))),
        );
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

async fn register_user(
    state: web::Data<AppState>,
    body: web::Json<RegisterUser>,
) -> ApiResult<HttpResponse> {
    let user = identity::register_user(&state.db, body.into_inner()).await?;
    Ok(HttpResponse::Created().json(UserProfile::from(user)))
}

async fn login(state: &AppState, role: Role, body: &LoginRequest) -> ApiResult<HttpResponse> {
    let session = identity::login(&state.db, &state.config, role, body).await?;
    log::info!("{} {} logged in", role.as_str(), session.user.id);
    Ok(HttpResponse::Ok().json(session))
}

async fn login_user(state: web::Data<AppState>, body: web::Json<LoginRequest>) -> ApiResult<HttpResponse> {
    login(&state, Role::Customer, &body).await
}

async fn login_mechanic(
    state: web::Data<AppState>,
    body: web::Json<LoginRequest>,
) -> ApiResult<HttpResponse> {
    login(&state, Role::Mechanic, &body).await
}

async fn login_manager(
    state: web::Data<AppState>,
    body: web::Json<LoginRequest>,
) -> ApiResult<HttpResponse> {
    login(&state, Role::Manager, &body).await
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test, web, App};
    use serde_json::{json, Value};

    use crate::{
        models::Role,
        routes::{
            configure,
            test_support::{bearer, status_of},
        },
        testing::test_state,
    };

    #[actix_web::test]
    async fn health_is_public() {
        let state = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn register_then_login_returns_a_usable_token() {
        let state = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/auth/users/register")
            .set_json(json!({
                "firstname": "Nomena",
                "lastname": "Rakoto",
                "contact": "0341112233",
                "email": "nomena@example.com",
                "password": "s3cret"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["id"], "CST001");
        assert!(body.get("password_hash").is_none());

        let req = test::TestRequest::post()
            .uri("/auth/users/login")
            .set_json(json!({"contact": "0341112233", "password": "s3cret"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        let token = body["token"].as_str().unwrap().to_string();

        let req = test::TestRequest::get()
            .uri("/users/me")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["email"], "nomena@example.com");
    }

    #[actix_web::test]
    async fn bad_credentials_and_bodies_are_reported() {
        let state = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/auth/managers/login")
            .set_json(json!({"contact": "nobody", "password": "x"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "INVALID_CREDENTIALS");

        let req = test::TestRequest::post()
            .uri("/auth/users/register")
            .insert_header(("Content-Type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "INVALID");
    }

    #[actix_web::test]
    async fn scopes_require_a_token_of_the_right_role() {
        let state = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/managers/dashboard").to_request();
        assert_eq!(
            status_of(test::try_call_service(&app, req).await),
            StatusCode::UNAUTHORIZED
        );

        let req = test::TestRequest::get()
            .uri("/managers/dashboard")
            .insert_header(bearer(&state, "CST001", Role::Customer))
            .to_request();
        assert_eq!(
            status_of(test::try_call_service(&app, req).await),
            StatusCode::FORBIDDEN
        );

        let req = test::TestRequest::get()
            .uri("/managers/dashboard")
            .insert_header(("Authorization", "Bearer not-a-token"))
            .to_request();
        assert_eq!(
            status_of(test::try_call_service(&app, req).await),
            StatusCode::UNAUTHORIZED
        );

        let req = test::TestRequest::get()
            .uri("/managers/dashboard")
            .insert_header(bearer(&state, "MGR001", Role::Manager))
            .to_request();
        assert_eq!(
            status_of(test::try_call_service(&app, req).await),
            StatusCode::OK
        );
    }

    #[actix_web::test]
    async fn missing_token_is_reported_as_json() {
        let state = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/users/me").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "MISSING_TOKEN");
        assert_eq!(body["error"], "Missing authorization token");
    }
}
