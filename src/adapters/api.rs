use actix_web::http::StatusCode;
use actix_web::http::header::ContentType;
use actix_web::{HttpResponse, Responder, get, web};
use serde::Serialize;

use crate::app::services::{
    PersonCommandHandler, PersonQueryHandler, ServiceError, SqlitePersonService,
};
use crate::domain::validation::{
    ValidationError, decode_new_person, decode_update_person, parse_id,
};

#[derive(Clone)]
pub struct ApiState {
    pub persons: SqlitePersonService,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health).service(
        web::scope("/api/v1/person")
            .route("", web::post().to(create_person))
            .route("/", web::post().to(create_person))
            .route("", web::put().to(update_person))
            .route("/", web::put().to(update_person))
            .route("/{id}", web::get().to(fetch_person))
            .route("/{id}", web::delete().to(delete_person)),
    );
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok()
        .content_type(ContentType::plaintext())
        .body("OK")
}

async fn create_person(state: web::Data<ApiState>, body: web::Bytes) -> HttpResponse {
    let new_person =
        match decode_new_person(&body).and_then(|input| input.validate().map(|()| input)) {
            Ok(input) => input,
            Err(error) => return validation_error_response(error),
        };

    let service = state.persons.clone();
    match web::block(move || service.create(&new_person)).await {
        Ok(Ok(person)) => {
            tracing::debug!(person_id = person.id, "person created");
            json_response(StatusCode::CREATED, &person)
        }
        Ok(Err(error)) => service_error_response(error, "create person"),
        Err(error) => blocking_error_response(error, "create person"),
    }
}

async fn fetch_person(state: web::Data<ApiState>, path: web::Path<String>) -> HttpResponse {
    let id = match parse_id(&path.into_inner()) {
        Ok(id) => id,
        Err(error) => return validation_error_response(error),
    };

    let service = state.persons.clone();
    match web::block(move || service.read(id)).await {
        Ok(Ok(person)) => json_response(StatusCode::OK, &person),
        Ok(Err(error)) => service_error_response(error, "read person"),
        Err(error) => blocking_error_response(error, "read person"),
    }
}

async fn update_person(state: web::Data<ApiState>, body: web::Bytes) -> HttpResponse {
    let update =
        match decode_update_person(&body).and_then(|input| input.validate().map(|()| input)) {
            Ok(input) => input,
            Err(error) => return validation_error_response(error),
        };

    let service = state.persons.clone();
    match web::block(move || service.update(&update)).await {
        Ok(Ok(person)) => json_response(StatusCode::OK, &person),
        Ok(Err(error)) => service_error_response(error, "update person"),
        Err(error) => blocking_error_response(error, "update person"),
    }
}

async fn delete_person(state: web::Data<ApiState>, path: web::Path<String>) -> HttpResponse {
    let id = match parse_id(&path.into_inner()) {
        Ok(id) => id,
        Err(error) => return validation_error_response(error),
    };

    let service = state.persons.clone();
    match web::block(move || service.delete(id)).await {
        Ok(Ok(())) => {
            tracing::debug!(person_id = id, "person deleted");
            json_response(StatusCode::OK, &"SUCCESS")
        }
        Ok(Err(error)) => service_error_response(error, "delete person"),
        Err(error) => blocking_error_response(error, "delete person"),
    }
}

/// Serializes the body before the status is committed, so an encoding failure
/// turns into a plain 500 rather than a success status with a broken body.
fn json_response<T: Serialize>(status: StatusCode, body: &T) -> HttpResponse {
    match serde_json::to_vec(body) {
        Ok(bytes) => HttpResponse::build(status)
            .content_type(ContentType::json())
            .body(bytes),
        Err(error) => {
            tracing::error!(error = %error, "failed to encode response");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode response")
        }
    }
}

fn error_body(status: StatusCode, message: &str) -> HttpResponse {
    HttpResponse::build(status).json(serde_json::json!({ "error": message }))
}

fn validation_error_response(error: ValidationError) -> HttpResponse {
    tracing::warn!(error = %error, "rejected invalid request");
    error_body(StatusCode::BAD_REQUEST, &error.to_string())
}

fn service_error_response(error: ServiceError, action: &str) -> HttpResponse {
    match error {
        ServiceError::NotFound => error_body(StatusCode::NOT_FOUND, "person does not exist"),
        ServiceError::Database(error) => {
            tracing::error!(error = %error, action, "person service call failed");
            error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("failed to {action}"),
            )
        }
    }
}

fn blocking_error_response(error: actix_web::error::BlockingError, action: &str) -> HttpResponse {
    tracing::error!(error = %error, action, "blocking database task failed");
    error_body(
        StatusCode::INTERNAL_SERVER_ERROR,
        &format!("failed to {action}"),
    )
}
