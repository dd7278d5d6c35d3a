//! The pull-side scrape surface: rendering the registry state and serving it
//! over HTTP.

use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::warn;

use crate::registry::Registry;
use crate::telemetry::Telemetry;

/// Read-only access to everything the bridge exposes.
///
/// Rendering takes a point-in-time snapshot of the registry, so it is safe
/// concurrently with the exporter's mutations.
#[derive(Clone)]
pub struct ScrapeHandle {
    registry: Arc<Registry>,
    telemetry: Arc<Telemetry>,
}

impl ScrapeHandle {
    pub(crate) fn new(registry: Arc<Registry>, telemetry: Arc<Telemetry>) -> Self {
        ScrapeHandle { registry, telemetry }
    }

    /// Renders every live translated metric followed by the bridge's own
    /// operational counters, in exposition format.
    pub fn render(&self) -> String {
        let mut buffer = String::new();
        self.registry.render(&mut buffer);
        self.telemetry.render(&mut buffer);
        buffer
    }
}

fn respond(handle: &ScrapeHandle, req: &Request<Incoming>) -> Response<Full<Bytes>> {
    let mut response = Response::new(match req.uri().path() {
        "/health" => "OK".into(),
        _ => handle.render().into(),
    });
    response.headers_mut().append(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

/// Serves scrape requests until the listener fails.
pub(crate) async fn serve(listener: TcpListener, handle: ScrapeHandle) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(error) => {
                warn!(error = ?error, "error accepting scrape connection");
                continue;
            }
        };

        let handle = handle.clone();
        let service = service_fn(move |req: Request<Incoming>| {
            let handle = handle.clone();
            async move { Ok::<_, hyper::Error>(respond(&handle, &req)) }
        });

        tokio::spawn(async move {
            if let Err(error) =
                http1::Builder::new().serve_connection(TokioIo::new(stream), service).await
            {
                warn!(error = ?error, "error serving scrape connection");
            }
        });
    }
}
