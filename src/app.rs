//! app.rs
use actix_web::{error::InternalError, web, HttpRequest};

use crate::errors::{DispatchError, ValidationError};
use crate::handlers::{dispatch_handler, health_handler};

/// Body and query parse failures share the error envelope of the handlers.
fn json_error(err: actix_web::error::JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let message = err.to_string();
    InternalError::from_response(
        err,
        actix_web::ResponseError::error_response(&DispatchError::Validation(
            ValidationError::new("body", message),
        )),
    )
    .into()
}

fn query_error(err: actix_web::error::QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let message = err.to_string();
    InternalError::from_response(
        err,
        actix_web::ResponseError::error_response(&DispatchError::Validation(
            ValidationError::new("query", message),
        )),
    )
    .into()
}

pub fn init_app(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().limit(1 << 20).error_handler(json_error))
        .app_data(web::QueryConfig::default().error_handler(query_error))
        .service(
            web::scope("/api/v1")
                .route("/health", web::get().to(health_handler::health_endpoint))
                .service(
                    web::scope("/dispatch")
                        .route(
                            "",
                            web::post().to(dispatch_handler::create_dispatch_endpoint),
                        )
                        .route(
                            "",
                            web::get().to(dispatch_handler::list_dispatches_endpoint),
                        )
                        .route(
                            "/batch",
                            web::post().to(dispatch_handler::batch_dispatch_endpoint),
                        )
                        .route(
                            "/stats",
                            web::get().to(dispatch_handler::dispatch_stats_endpoint),
                        )
                        .route(
                            "/{id}",
                            web::get().to(dispatch_handler::get_dispatch_endpoint),
                        ),
                ),
        );
}
