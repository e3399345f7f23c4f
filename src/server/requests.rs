use serde::{Deserialize, Serialize};

/// Body of the submit endpoint. The field defaults to empty when absent so
/// validation owns the error shape instead of the deserializer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateContextRequest {
    #[serde(default)]
    pub lyric: String,
}

/// Body of the word-match endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchWordsRequest {
    #[serde(default)]
    pub lyrics: String,
}
