//! HTTP surface of the archive.
//!
//! ```text
//! GET /repositories/{repo}/dists/{distro}/Release
//! GET /repositories/{repo}/dists/{distro}/InRelease
//! GET /repositories/{repo}/dists/{distro}/packages/{arch}/Packages[.xz]
//! GET /repositories/{repo}/pool/{package}/{version}/{commit}/install.deb
//! GET /healthz
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use catapt_core::indexer::Compression;
use catapt_core::{Error, ErrorKind};
use catapt_schema::Arch;
use tokio_util::io::ReaderStream;
use tracing::{error, instrument, warn};

use crate::state::AppState;

const TEXT: &str = "text/plain; charset=utf-8";
const DEB: &str = "application/vnd.debian.binary-package";
const XZ: &str = "application/x-xz";

/// Build the router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/repositories/{repo}/dists/{distro}/Release", get(release))
        .route("/repositories/{repo}/dists/{distro}/InRelease", get(in_release))
        .route(
            "/repositories/{repo}/dists/{distro}/packages/{arch}/{file}",
            get(packages),
        )
        .route(
            "/repositories/{repo}/pool/{package}/{version}/{commit}/install.deb",
            get(pool),
        )
        .with_state(state)
}

/// Engine errors rendered as HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Failure reported by the engine.
    Engine(Error),
    /// The request ran past its deadline.
    Timeout(Duration),
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self::Engine(err)
    }
}

impl From<catapt_schema::SchemaError> for AppError {
    fn from(err: catapt_schema::SchemaError) -> Self {
        Self::Engine(err.into())
    }
}

impl AppError {
    /// Status code for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Engine(e) => match e.kind() {
                ErrorKind::Parse | ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Timeout(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Engine(e) => e.report(),
            Self::Timeout(limit) => format!("request exceeded {}s deadline", limit.as_secs()),
        };
        if status.is_server_error() {
            error!(%status, error = %body, "request failed");
        } else {
            warn!(%status, error = %body, "request rejected");
        }
        (status, [(header::CONTENT_TYPE, TEXT)], format!("{body}\n")).into_response()
    }
}

type HandlerResult = Result<Response, AppError>;

/// Run `work` under the request deadline. Timing out drops only this
/// request's wait; builds it joined keep running.
async fn with_deadline<T>(
    limit: Duration,
    work: impl Future<Output = catapt_core::Result<T>>,
) -> Result<T, AppError> {
    tokio::time::timeout(limit, work)
        .await
        .map_err(|_| AppError::Timeout(limit))?
        .map_err(AppError::from)
}

fn check_archive(state: &AppState, repo: &str, distro: Option<&str>) -> Result<(), AppError> {
    if repo != state.config.archive.repository {
        return Err(Error::NotFound(format!("repository '{repo}'")).into());
    }
    if let Some(distro) = distro.filter(|d| !state.config.serves_distro(d)) {
        return Err(Error::NotFound(format!("distribution '{distro}'")).into());
    }
    Ok(())
}

fn bytes_response(content_type: &'static str, body: impl Into<Body>) -> Response {
    ([(header::CONTENT_TYPE, content_type)], body.into()).into_response()
}

async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    let components = state.indexer.engine().catalogue().len();
    bytes_response(TEXT, format!("ok {components} components\n"))
}

#[instrument(skip(state))]
async fn release(
    State(state): State<Arc<AppState>>,
    Path((repo, distro)): Path<(String, String)>,
) -> HandlerResult {
    check_archive(&state, &repo, Some(&distro))?;
    let text = with_deadline(state.timeout, state.indexer.release()).await?;
    Ok(bytes_response(TEXT, text))
}

#[instrument(skip(state))]
async fn in_release(
    State(state): State<Arc<AppState>>,
    Path((repo, distro)): Path<(String, String)>,
) -> HandlerResult {
    check_archive(&state, &repo, Some(&distro))?;
    let text = with_deadline(state.timeout, state.indexer.in_release()).await?;
    Ok(bytes_response(TEXT, text))
}

#[instrument(skip(state))]
async fn packages(
    State(state): State<Arc<AppState>>,
    Path((repo, distro, arch, file)): Path<(String, String, String, String)>,
) -> HandlerResult {
    check_archive(&state, &repo, Some(&distro))?;
    let compression = Compression::from_file_name(&file)
        .ok_or_else(|| Error::NotFound(format!("index file '{file}'")))?;
    let arch: Arch = arch.strip_prefix("binary-").unwrap_or(&arch).parse()?;

    let bytes = with_deadline(state.timeout, state.indexer.packages(arch, compression)).await?;
    let content_type = match compression {
        Compression::Plain => TEXT,
        Compression::Xz => XZ,
    };
    Ok(bytes_response(content_type, bytes))
}

#[instrument(skip(state))]
async fn pool(
    State(state): State<Arc<AppState>>,
    Path((repo, package, version, commit)): Path<(String, String, String, String)>,
) -> HandlerResult {
    check_archive(&state, &repo, None)?;
    let engine = state.indexer.engine();
    let (file, length) = with_deadline(state.timeout, async {
        let path = engine.pool_file(&package, &version, &commit)?;
        let file = engine.disk().open(&path).await?;
        let length = file.metadata().await.map(|m| m.len()).ok();
        Ok::<_, Error>((file, length))
    })
    .await?;

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(DEB));
    if let Some(length) = length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deadline_maps_to_server_error() {
        let limit = Duration::from_millis(10);
        let err = with_deadline(limit, std::future::pending::<catapt_core::Result<()>>())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Timeout(l) if l == limit));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let ok = with_deadline(limit, async { Ok(7) }).await.unwrap();
        assert_eq!(ok, 7);
    }

    #[test]
    fn error_kinds_map_to_status() {
        let status = |e: Error| AppError::from(e).status();
        assert_eq!(status(Error::Parse("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(Error::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(Error::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status(Error::NotFound("x".into()).context("pool")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(Error::BlockedPath("/etc".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
