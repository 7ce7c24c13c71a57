use http::header::CONTENT_TYPE;
use http::{Method, StatusCode};
use lambda_http::{Body, Request, RequestExt, Response};
use lambda_runtime::Error;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, MissingKeyPolicy};
use crate::events::BatchClass;
use crate::store::KvStore;

pub mod config;
pub mod events;
pub mod key;
pub mod process;
pub mod store;

pub const DEFAULT_GREETING: &str = "Hello, Azure Stream Analytics";

pub fn set_up_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .init();
}

// http handler
pub async fn handler<S: KvStore>(
    store: &S,
    config: &Config,
    request: Request,
) -> Result<Response<Body>, Error> {
    info!("Handling http invocation");

    if request.method() != Method::GET && request.method() != Method::POST {
        warn!("method {} not allowed", request.method());
        return respond(StatusCode::METHOD_NOT_ALLOWED, None);
    }

    let ack = greeting(&request);
    info!("processing a request from {}", ack);

    let body = request.body().as_ref();
    debug!("body received: {} bytes", body.len());

    match events::classify(body) {
        BatchClass::Empty => {
            info!("empty body, answering connectivity check");
            return respond(StatusCode::NO_CONTENT, None);
        }
        BatchClass::TooLarge => {
            warn!(
                "body of {} bytes exceeds the {} byte limit",
                body.len(),
                crate::config::MAX_PAYLOAD_BYTES
            );
            return respond(StatusCode::PAYLOAD_TOO_LARGE, None);
        }
        BatchClass::Proceed => {}
    }

    let batch = match events::decode(body) {
        Ok(batch) => batch,
        Err(e) => {
            warn!("rejecting payload: {}", e);
            return respond(StatusCode::BAD_REQUEST, Some("invalid JSON payload"));
        }
    };
    debug!("decoded {} records", batch.len());

    let keyed = process::key_records(&batch.items, &config.key_field);
    if config.missing_key_policy == MissingKeyPolicy::Reject {
        let first_failure = keyed
            .iter()
            .enumerate()
            .find_map(|(index, entry)| entry.as_ref().err().map(|e| (index, e)));
        if let Some((index, e)) = first_failure {
            warn!("rejecting batch, record {}: {}", index, e);
            return respond(StatusCode::BAD_REQUEST, Some("record key missing"));
        }
    }

    // the connection lives until the end of this block and is dropped on every path out of it
    let summary = {
        let mut conn = match store.connect().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("store connection failed: {}", e);
                return respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Some("internal server error"),
                );
            }
        };
        info!("store connection established");
        process::upsert_records(&mut conn, keyed).await
    };

    if !summary.failures.is_empty() {
        warn!(
            "{} of {} records were not stored",
            summary.failures.len(),
            summary.received
        );
    }

    respond(StatusCode::OK, Some(ack.as_str()))
}

/// Acknowledgement text, built from the optional `name` query or path parameter.
pub fn greeting(request: &Request) -> String {
    let name = request
        .query_string_parameters_ref()
        .and_then(|params| params.first("name"))
        .or_else(|| {
            request
                .path_parameters_ref()
                .and_then(|params| params.first("name"))
        })
        .filter(|name| !name.is_empty());

    match name {
        Some(name) => format!("Hello, {}.", name),
        None => DEFAULT_GREETING.to_string(),
    }
}

fn respond(status: StatusCode, text: Option<&str>) -> Result<Response<Body>, Error> {
    let response = match text {
        Some(text) => Response::builder()
            .status(status)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(Body::from(text))?,
        None => Response::builder().status(status).body(Body::Empty)?,
    };
    Ok(response)
}
