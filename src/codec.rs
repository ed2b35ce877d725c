use kube::core::DynamicObject;
use kube::core::admission::AdmissionReview;
use thiserror::Error;

pub type Review = AdmissionReview<DynamicObject>;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("could not decode AdmissionReview: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("could not encode response: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Wire format for admission reviews. Handlers only see this trait.
pub trait ReviewCodec: Send + Sync {
    fn decode(&self, body: &[u8]) -> Result<Review, CodecError>;
    fn encode(&self, review: &Review) -> Result<Vec<u8>, CodecError>;
    /// Best-effort read of `request.uid` from a body that failed to decode.
    fn request_uid(&self, body: &[u8]) -> Option<String>;
}

pub struct JsonCodec;

impl ReviewCodec for JsonCodec {
    fn decode(&self, body: &[u8]) -> Result<Review, CodecError> {
        serde_json::from_slice(body).map_err(CodecError::Decode)
    }

    fn encode(&self, review: &Review) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(review).map_err(CodecError::Encode)
    }

    fn request_uid(&self, body: &[u8]) -> Option<String> {
        let value: serde_json::Value = serde_json::from_slice(body).ok()?;
        value
            .pointer("/request/uid")
            .and_then(|uid| uid.as_str())
            .map(str::to_string)
    }
}
