use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 管線中流動的資料單位
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Chunk {
    Bytes(Vec<u8>),
    Text(String),
    /// object mode 的單位，不論內容大小一律算 1
    Value(serde_json::Value),
}

impl Chunk {
    pub fn len(&self) -> usize {
        match self {
            Chunk::Bytes(bytes) => bytes.len(),
            Chunk::Text(text) => text.len(),
            Chunk::Value(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Byte view used by byte-oriented sinks. Values are written as JSON.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Chunk::Bytes(bytes) => bytes.clone(),
            Chunk::Text(text) => text.as_bytes().to_vec(),
            Chunk::Value(value) => value.to_string().into_bytes(),
        }
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(bytes: Vec<u8>) -> Self {
        Chunk::Bytes(bytes)
    }
}

impl From<&[u8]> for Chunk {
    fn from(bytes: &[u8]) -> Self {
        Chunk::Bytes(bytes.to_vec())
    }
}

impl From<String> for Chunk {
    fn from(text: String) -> Self {
        Chunk::Text(text)
    }
}

impl From<&str> for Chunk {
    fn from(text: &str) -> Self {
        Chunk::Text(text.to_string())
    }
}

impl From<serde_json::Value> for Chunk {
    fn from(value: serde_json::Value) -> Self {
        Chunk::Value(value)
    }
}

/// HTTP 風格的標頭，key 一律小寫
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: HashMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn with(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn content_length(&self) -> Option<u64> {
        self.get("content-length")
            .and_then(|value| value.trim().parse().ok())
    }

    /// A body is compressed when any content-encoding other than identity is declared.
    pub fn is_compressed(&self) -> bool {
        self.get("content-encoding")
            .map(|encoding| {
                let encoding = encoding.trim();
                !encoding.is_empty() && !encoding.eq_ignore_ascii_case("identity")
            })
            .unwrap_or(false)
    }

    /// 未壓縮時才採用 content-length
    pub fn expected_size(&self) -> Option<u64> {
        if self.is_compressed() {
            None
        } else {
            self.content_length()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<&reqwest::header::HeaderMap> for Headers {
    fn from(map: &reqwest::header::HeaderMap) -> Self {
        let mut headers = Headers::new();
        for (name, value) in map {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str(), value);
            }
        }
        headers
    }
}

/// 進度快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub percentage: f64,
    pub transferred: u64,
    pub length: u64,
    pub remaining: u64,
    pub eta: f64,
    pub runtime: f64,
    pub delta: u64,
    pub speed: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_len() {
        assert_eq!(Chunk::from(vec![0u8; 10]).len(), 10);
        assert_eq!(Chunk::from("héllo").len(), 6);
        assert_eq!(Chunk::from(serde_json::json!({"data": "chunk1"})).len(), 1);
        assert!(Chunk::Bytes(Vec::new()).is_empty());
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let headers = Headers::new().with("Content-Length", "20");
        assert_eq!(headers.get("content-length"), Some("20"));
        assert_eq!(headers.content_length(), Some(20));
        assert_eq!(headers.expected_size(), Some(20));
    }

    #[test]
    fn test_compressed_headers_have_no_expected_size() {
        let gzip = Headers::new()
            .with("content-length", "20")
            .with("Content-Encoding", "gzip");
        assert!(gzip.is_compressed());
        assert_eq!(gzip.expected_size(), None);

        let identity = Headers::new()
            .with("content-length", "20")
            .with("content-encoding", "identity");
        assert_eq!(identity.expected_size(), Some(20));
    }

    #[test]
    fn test_progress_update_wire_shape() {
        let update = ProgressUpdate {
            percentage: 50.0,
            transferred: 10,
            length: 20,
            remaining: 10,
            ..Default::default()
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["percentage"], 50.0);
        assert_eq!(json["transferred"], 10);
        assert_eq!(json["remaining"], 10);
        assert!(json.get("speed").is_some());
        assert!(json.get("delta").is_some());
    }
}
