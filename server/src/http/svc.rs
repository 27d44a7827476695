use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_cell::sync::AsyncCell;
use async_trait::async_trait;
use axum::{Router, extract::Request, http::StatusCode, http::Uri, routing::get};
use regex::Regex;
use tokio::sync::Mutex;
use tower::Service;
use tower_http::trace::TraceLayer;
use tracing::{Level, debug, error, info, instrument};

use crate::http::{api, stream};
use crate::service::{
    GlimpseService, GsInner, Gsm, GsmReceiver, GsmRegistry, GsmSender, ServiceType,
};
use common::config::GsConfig;

// unlike the thumbnail service, the http endpoint has no rpc surface of its
// own; its state exists so the axum handlers can reach the config and the
// thumbnail service sender
#[derive(Clone, Debug)]
pub struct HttpEndpoint {
    pub(super) config: Arc<GsConfig>,
    registry: GsmRegistry,
    pub(super) thumb_svc_sender: GsmSender,
    pub(super) range_regex: Regex,
}

#[async_trait]
impl GsInner for HttpEndpoint {
    fn new(config: Arc<GsConfig>, registry: GsmRegistry) -> Result<Self> {
        Ok(HttpEndpoint {
            config,
            thumb_svc_sender: registry.get(&ServiceType::Thumb)?,
            registry,
            // matches the endpoints of a single bytes range; anchoring and
            // unit checks happen in the parser
            range_regex: Regex::new(r"(\d+)-(\d*)")
                .context("failed to compile range header regex")?,
        })
    }

    fn registry(&self) -> GsmRegistry {
        self.registry.clone()
    }

    async fn message_handler(&self, msg: Gsm) -> Result<()> {
        match msg {
            _ => Err(anyhow::Error::msg("http service has no message handlers")),
        }
    }
}

pub struct HttpService {
    config: Arc<GsConfig>,
    receiver: Arc<Mutex<GsmReceiver>>,
    msg_handle: AsyncCell<tokio::task::JoinHandle<Result<()>>>,
    hyper_handle: AsyncCell<tokio::task::JoinHandle<Result<()>>>,
}

#[async_trait]
impl GlimpseService for HttpService {
    type Inner = HttpEndpoint;

    fn create(config: Arc<GsConfig>, registry: &GsmRegistry) -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel::<Gsm>(32);

        registry
            .insert(ServiceType::Http, tx)
            .expect("failed to add http sender to registry");

        HttpService {
            config: config.clone(),
            receiver: Arc::new(Mutex::new(rx)),
            msg_handle: AsyncCell::new(),
            hyper_handle: AsyncCell::new(),
        }
    }

    #[instrument(level=Level::DEBUG, skip(self, registry))]
    async fn start(&self, registry: &GsmRegistry) -> Result<()> {
        info!("starting");

        let receiver = Arc::clone(&self.receiver);
        let state = Arc::new(HttpEndpoint::new(self.config.clone(), registry.clone())?);

        let socket: SocketAddr = self
            .config
            .http
            .socket
            .parse()
            .context("failed to parse http socket address")?;

        self.hyper_handle
            .set(tokio::task::spawn(serve_http(socket, Arc::clone(&state))));

        let msg_serve = {
            async move {
                let mut receiver = receiver.lock().await;

                while let Some(msg) = receiver.recv().await {
                    let state = Arc::clone(&state);
                    tokio::task::spawn(async move {
                        match state.message_handler(msg).await {
                            Ok(()) => (),
                            Err(err) => {
                                error!({service = "http", channel = "gsm", error = %err})
                            }
                        }
                    });
                }

                Err(anyhow::Error::msg("http service gsm channel disconnected"))
            }
        };

        self.msg_handle.set(tokio::task::spawn(msg_serve));

        debug!("started");
        Ok(())
    }
}

async fn serve_http(socket: SocketAddr, state: Arc<HttpEndpoint>) -> Result<()> {
    let router: Router<()> = Router::new()
        .route("/api/thumbnail", get(api::get_thumbnail))
        .route("/api/thumbnail/status", get(api::get_thumbnail_status))
        .route("/api/media", get(stream::stream_media))
        .route("/api/assets", get(api::list_assets))
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let service = hyper::service::service_fn(move |request: Request<hyper::body::Incoming>| {
        router.clone().call(request)
    });

    let listener = tokio::net::TcpListener::bind(socket)
        .await
        .context("failed to bind http socket")?;

    info!({socket = %socket}, "listening");

    // the main http server loop
    while let Ok((stream, _)) = listener.accept().await {
        let service = service.clone();

        let io = hyper_util::rt::TokioIo::new(stream);

        tokio::task::spawn(async move {
            match hyper_util::server::conn::auto::Builder::new(hyper_util::rt::TokioExecutor::new())
                .serve_connection(io, service.clone())
                .await
            {
                Ok(()) => (),
                Err(err) => debug!({error = %err}, "connection closed with error"),
            }
        });
    }

    Ok(())
}

async fn fallback(_uri: Uri) -> StatusCode {
    StatusCode::NOT_FOUND
}
