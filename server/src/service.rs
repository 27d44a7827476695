use std::{fmt, future::Future, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio;

use common::config::GsConfig;

// these are the services that make up the glimpse server
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ServiceType {
    Http,
    Thumb,
}

// Glimpse Service Messages
//
// without higher-kinded types, we use the normal enum-of-enums
// to enable general safe message passing between services
pub type GsmSender = tokio::sync::mpsc::Sender<Gsm>;
pub type GsmReceiver = tokio::sync::mpsc::Receiver<Gsm>;

// message responses are carried back via oneshot channels.  this
// type eliminates quite a bit of boilerplate in the responder logic.
pub type GsmResp<T> = tokio::sync::oneshot::Sender<Result<T, GsError>>;

#[derive(Debug)]
pub enum Gsm {
    Thumb(crate::thumb::msg::ThumbMsg),
}

// error taxonomy
//
// per-call failures are classified once, here, so the http layer can map
// them onto status codes without string matching; anything not covered by
// a specific variant rides along as Internal
#[derive(Debug)]
pub enum GsError {
    // asset or route target absent; never retried
    NotFound(String),
    // malformed range header, unsupported extension, bad path
    InvalidInput(String),
    // extraction utility missing or broken; recorded once, then
    // short-circuited without further subprocess attempts
    Unavailable(String),
    // requested byte range cannot be satisfied against the file size
    RangeUnsatisfiable(String),
    // transient i/o or any other unexpected failure
    Internal(anyhow::Error),
    ChannelSend,
    ChannelRecv,
}

impl fmt::Display for GsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GsError::NotFound(msg) => write!(f, "not found: {msg}"),
            GsError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            GsError::Unavailable(msg) => write!(f, "unavailable: {msg}"),
            GsError::RangeUnsatisfiable(msg) => write!(f, "range unsatisfiable: {msg}"),
            GsError::Internal(err) => write!(f, "internal error: {err}"),
            GsError::ChannelSend => write!(f, "internal communications error (send)"),
            GsError::ChannelRecv => write!(f, "internal communications error (recv)"),
        }
    }
}

impl From<anyhow::Error> for GsError {
    fn from(err: anyhow::Error) -> Self {
        GsError::Internal(err)
    }
}

impl From<std::io::Error> for GsError {
    fn from(err: std::io::Error) -> Self {
        GsError::Internal(anyhow::Error::from(err))
    }
}

impl From<tokio::sync::mpsc::error::SendError<Gsm>> for GsError {
    fn from(_: tokio::sync::mpsc::error::SendError<Gsm>) -> Self {
        GsError::ChannelSend
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for GsError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        GsError::ChannelRecv
    }
}

// service registry
//
// currently, we assume that each service will be instantiated once, and that there
// should be one message namespace.  for this project, these are not terribly onerous
// requirements, and it simplifies generic service traits via get_registry().
//
// however, many services avoid the hash table lookup by cloning the sender, so care
// needs to be taken if this struct becomes dynamic in some fashion.
#[derive(Clone, Debug)]
pub struct GsmRegistry(Arc<DashMap<ServiceType, GsmSender>>);

impl GsmRegistry {
    pub fn new() -> Self {
        GsmRegistry(Arc::new(DashMap::new()))
    }

    pub fn insert(&self, k: ServiceType, v: GsmSender) -> Result<()> {
        match self.0.clone().insert(k.clone(), v) {
            None => Ok(()),
            Some(w) => {
                self.0.clone().insert(k, w);
                Err(anyhow::Error::msg(
                    "internal error: a sender was added twice to the registry",
                ))
            }
        }
    }

    pub fn get(&self, k: &ServiceType) -> Result<GsmSender> {
        Ok(self
            .0
            .get(k)
            .ok_or_else(|| {
                anyhow::Error::msg(format!(
                    "internal error: a service was started without a necessary dependency ({k:?})"
                ))
            })?
            .clone())
    }
}

impl Default for GsmRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// core service trait
//
// create() registers the service's sender with the registry, so all of the
// senders exist before any start() runs and the services can find each other
#[async_trait]
pub trait GlimpseService: Send + Sync + 'static {
    type Inner: GsInner;

    fn create(config: Arc<GsConfig>, registry: &GsmRegistry) -> Self;

    async fn start(&self, registry: &GsmRegistry) -> Result<()>;
}

// service message responder
//
// the interesting state lives behind this trait; services respond to their
// channel messages here, and may serve other surfaces (http) as well
#[async_trait]
pub trait GsInner: Sized + Send + Sync + 'static {
    fn new(config: Arc<GsConfig>, registry: GsmRegistry) -> Result<Self>;

    fn registry(&self) -> GsmRegistry;

    async fn message_handler(&self, msg: Gsm) -> Result<()>;

    // rather than have the inner service trait functions (i.e., the rpc calls) respond directly,
    // we define this helper function for use in the message_handler loop
    //
    // this is necessary so that the rpc functions can be used by each other without any weird
    // Option<resp> or the like
    async fn respond<T, Fut>(&self, resp: GsmResp<T>, fut: Fut) -> Result<()>
    where
        T: Send + Sync,
        Fut: Future<Output = Result<T, GsError>> + Send,
    {
        resp.send(fut.await).map_err(|_| {
            anyhow::Error::msg(format!(
                "failed to respond to a {} message",
                std::any::type_name::<T>()
            ))
        })
    }
}
