use axum::{
    body::Body,
    extract::{Request, State},
    response::Response,
};
use http::HeaderValue;
use tracing::error;

use super::{
    AppState,
    error::{RouteError, RouteResult},
};
use crate::{
    consts::{CACHE_SOURCE_HEADER, MAX_BODY_SIZE},
    worker::{Served, WorkerRequest},
};

/// Hand every request to the registration, the host side of the worker's
/// `fetch` hook.
pub async fn intercept(
    State(state): State<AppState>,
    req: Request<Body>,
) -> RouteResult<Response<Body>> {
    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, MAX_BODY_SIZE)
        .await
        .map_err(|err| {
            error!("Failed to read request body: {}", err);
            RouteError::BadRequest()
        })?;

    let request = WorkerRequest::from_parts(parts.method, &parts.uri, parts.headers, body);
    let served = state.registration.handle(&request).await?;
    into_response(served)
}

fn into_response(served: Served) -> RouteResult<Response<Body>> {
    let Served { response, source, .. } = served;

    let mut builder = Response::builder().status(response.status);
    let headers = builder.headers_mut().ok_or(RouteError::InternalError())?;
    headers.extend(response.headers);
    headers.insert(CACHE_SOURCE_HEADER, HeaderValue::from_static(source.as_str()));

    builder.body(Body::from(response.body)).map_err(|err| {
        error!("Failed to build response: {}", err);
        RouteError::InternalError()
    })
}
