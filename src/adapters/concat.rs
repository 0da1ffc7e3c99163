use crate::core::stage::StageIo;
use crate::domain::model::Chunk;
use crate::domain::ports::{Capabilities, Stage};
use crate::utils::error::{FlowError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    String,
    Buffer,
    Uint8Array,
    Array,
    Object,
}

impl FromStr for Encoding {
    type Err = FlowError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "string" => Ok(Encoding::String),
            "buffer" => Ok(Encoding::Buffer),
            "uint8array" | "u8" | "uint8" => Ok(Encoding::Uint8Array),
            "array" => Ok(Encoding::Array),
            "object" => Ok(Encoding::Object),
            other => Err(FlowError::InvalidConfigValueError {
                field: "encoding".to_string(),
                value: other.to_string(),
                reason: "Expected string, buffer, uint8array, array or object".to_string(),
            }),
        }
    }
}

/// 聚合後的結果
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Text(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Chunks(Vec<Chunk>),
}

/// Collects chunks and reduces them to one [`Body`].
#[derive(Debug, Clone, Default)]
pub struct Concat {
    encoding: Option<Encoding>,
    parts: Vec<Chunk>,
}

impl Concat {
    pub fn new(encoding: Option<Encoding>) -> Self {
        Self {
            encoding,
            parts: Vec::new(),
        }
    }

    pub fn push(&mut self, chunk: Chunk) {
        self.parts.push(chunk);
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Encoding implied by the first chunk.
    pub fn infer_encoding(&self) -> Encoding {
        match self.parts.first() {
            Some(Chunk::Text(_)) | Some(Chunk::Value(Value::String(_))) => Encoding::String,
            Some(Chunk::Value(Value::Array(_))) => Encoding::Array,
            Some(Chunk::Value(Value::Object(_))) => Encoding::Object,
            _ => Encoding::Buffer,
        }
    }

    pub fn body(&self) -> Body {
        if self.encoding.is_none() && self.parts.is_empty() {
            return Body::Array(Vec::new());
        }

        match self.encoding.unwrap_or_else(|| self.infer_encoding()) {
            Encoding::String => Body::Text(self.string_concat()),
            Encoding::Buffer | Encoding::Uint8Array => Body::Bytes(self.bytes_concat()),
            Encoding::Array => Body::Array(self.array_concat()),
            Encoding::Object => Body::Chunks(self.parts.clone()),
        }
    }

    fn string_concat(&self) -> String {
        // 第一塊是 bytes 時整體當 UTF-8 解碼，避免切斷多位元組字元
        if matches!(self.parts.first(), Some(Chunk::Bytes(_))) {
            return String::from_utf8_lossy(&self.bytes_concat()).into_owned();
        }
        self.parts.iter().map(text_of).collect()
    }

    fn bytes_concat(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.parts.iter().map(Chunk::len).sum());
        for part in &self.parts {
            match part {
                Chunk::Bytes(bytes) => out.extend_from_slice(bytes),
                other => out.extend_from_slice(text_of(other).as_bytes()),
            }
        }
        out
    }

    fn array_concat(&self) -> Vec<Value> {
        let mut out = Vec::new();
        for part in &self.parts {
            match part {
                Chunk::Value(Value::Array(items)) => out.extend(items.iter().cloned()),
                Chunk::Value(value) => out.push(value.clone()),
                other => out.push(Value::String(text_of(other))),
            }
        }
        out
    }
}

fn text_of(chunk: &Chunk) -> String {
    match chunk {
        Chunk::Text(text) => text.clone(),
        Chunk::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Chunk::Value(Value::String(text)) => text.clone(),
        Chunk::Value(value) => value.to_string(),
    }
}

type BodyCallback = Box<dyn FnOnce(Body) + Send>;

/// Sink stage that hands the aggregated body to a callback once its input ends.
pub struct ConcatSink {
    concat: Concat,
    on_body: Option<BodyCallback>,
}

impl ConcatSink {
    pub fn new<F>(encoding: Option<Encoding>, on_body: F) -> Self
    where
        F: FnOnce(Body) + Send + 'static,
    {
        Self {
            concat: Concat::new(encoding),
            on_body: Some(Box::new(on_body)),
        }
    }

    /// Sink paired with a receiver resolving to the body.
    pub fn channel(encoding: Option<Encoding>) -> (Self, oneshot::Receiver<Body>) {
        let (tx, rx) = oneshot::channel();
        let sink = Self::new(encoding, move |body| {
            let _ = tx.send(body);
        });
        (sink, rx)
    }
}

#[async_trait]
impl Stage for ConcatSink {
    fn name(&self) -> &str {
        "concat"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SINK
    }

    async fn run(self: Box<Self>, mut io: StageIo) -> Result<()> {
        let ConcatSink {
            mut concat,
            on_body,
        } = *self;

        while let Some(chunk) = io.recv().await {
            concat.push(chunk);
        }
        io.ensure_upstream_completed("concat")?;
        if let Some(on_body) = on_body {
            on_body(concat.body());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn concat_of(encoding: Option<Encoding>, parts: Vec<Chunk>) -> Body {
        let mut concat = Concat::new(encoding);
        for part in parts {
            concat.push(part);
        }
        concat.body()
    }

    #[test]
    fn test_empty_without_encoding_is_empty_array() {
        assert_eq!(concat_of(None, vec![]), Body::Array(vec![]));
        assert_eq!(
            concat_of(Some(Encoding::String), vec![]),
            Body::Text(String::new())
        );
    }

    #[test]
    fn test_infers_string_from_first_chunk() {
        let body = concat_of(
            None,
            vec![Chunk::from("abc"), Chunk::from(b"def".to_vec()), json!(1).into()],
        );
        assert_eq!(body, Body::Text("abcdef1".to_string()));
    }

    #[test]
    fn test_bytes_first_decodes_as_a_whole() {
        let snowman = "☃".as_bytes();
        let body = concat_of(
            Some(Encoding::String),
            vec![snowman[..1].into(), snowman[1..].into()],
        );
        assert_eq!(body, Body::Text("☃".to_string()));
    }

    #[test]
    fn test_infers_buffer_and_converts_parts() {
        let body = concat_of(None, vec![Chunk::from(vec![1u8, 2]), Chunk::from("A")]);
        assert_eq!(body, Body::Bytes(vec![1, 2, b'A']));
    }

    #[test]
    fn test_array_flattens_one_level() {
        let body = concat_of(
            None,
            vec![json!([1, 2]).into(), json!([3, [4]]).into(), json!(5).into()],
        );
        assert_eq!(
            body,
            Body::Array(vec![json!(1), json!(2), json!(3), json!([4]), json!(5)])
        );
    }

    #[test]
    fn test_objects_are_kept_as_chunks() {
        let parts = vec![
            Chunk::from(json!({"data": "chunk1"})),
            Chunk::from(json!({"data": "chunk2"})),
        ];
        assert_eq!(concat_of(None, parts.clone()), Body::Chunks(parts));
    }

    #[test]
    fn test_encoding_from_str() {
        assert_eq!("STRING".parse::<Encoding>().unwrap(), Encoding::String);
        assert_eq!("u8".parse::<Encoding>().unwrap(), Encoding::Uint8Array);
        assert!("utf16".parse::<Encoding>().is_err());
    }
}
