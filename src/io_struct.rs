use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A value the remote service may report as one item or a batch of
/// items. Extract results in particular can be a single model file or
/// a list of format variants; never assume a fixed cardinality.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SingleOrBatch<T> {
    Single(T),
    Batch(Vec<T>),
}

impl<T> SingleOrBatch<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            SingleOrBatch::Single(item) => vec![item],
            SingleOrBatch::Batch(items) => items,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SingleOrBatch::Single(_) => 1,
            SingleOrBatch::Batch(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn default_user_id() -> String {
    "anonymous".to_string()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GenerateReqInput {
    pub image_url: Option<String>,
    #[serde(rename = "userId", default = "default_user_id")]
    pub user_id: String,
    #[serde(rename = "designId")]
    pub design_id: Option<String>,

    #[serde(flatten)]
    pub other: Value,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub success: bool,
    pub preprocessed_url: String,
    pub video_url: String,
    pub glb_urls: Vec<String>,
    pub processing_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ConvertReqInput {
    #[serde(rename = "glbUrl")]
    pub glb_url: Option<String>,
    #[serde(rename = "designId")]
    pub design_id: Option<String>,
    #[serde(rename = "userId", default = "default_user_id")]
    pub user_id: String,

    #[serde(flatten)]
    pub other: Value,
}

#[derive(Debug, Serialize)]
pub struct ConvertResponse {
    pub success: bool,
    #[serde(rename = "stlUrl")]
    pub stl_url: String,
    #[serde(rename = "fileSize")]
    pub file_size: u64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}
