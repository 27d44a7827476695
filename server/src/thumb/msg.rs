use crate::service::{Gsm, GsmResp};
use api::ThumbStatus;

#[derive(Debug)]
pub enum ThumbMsg {
    Status {
        resp: GsmResp<ThumbStatus>,
        path: String,
    },
    RequestGeneration {
        resp: GsmResp<bool>,
        path: String,
    },
    GetArtifact {
        resp: GsmResp<Option<Vec<u8>>>,
        path: String,
    },
    EvictStale {
        resp: GsmResp<u64>,
        max_age_days: u64,
    },
}

impl From<ThumbMsg> for Gsm {
    fn from(value: ThumbMsg) -> Self {
        Gsm::Thumb(value)
    }
}
