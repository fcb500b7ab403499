//! Chunk input records and the retained chunk shape.

use crate::types::{DocId, Field};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-field token lists of a chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldTokens {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub name: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signature: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub doc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comment: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body: Vec<String>,
}

impl FieldTokens {
    pub fn get(&self, field: Field) -> &[String] {
        match field {
            Field::Name => &self.name,
            Field::Signature => &self.signature,
            Field::Doc => &self.doc,
            Field::Comment => &self.comment,
            Field::Body => &self.body,
        }
    }

    pub fn get_mut(&mut self, field: Field) -> &mut Vec<String> {
        match field {
            Field::Name => &mut self.name,
            Field::Signature => &mut self.signature,
            Field::Doc => &mut self.doc,
            Field::Comment => &mut self.comment,
            Field::Body => &mut self.body,
        }
    }

    pub fn is_empty(&self) -> bool {
        Field::ALL.iter().all(|&field| self.get(field).is_empty())
    }
}

/// One tokenized chunk as produced by an upstream tokenizer.
///
/// Keys this struct does not know pass through untouched in `metadata`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Repository-relative path of the file the chunk came from
    pub file: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_uid: Option<String>,

    #[serde(default)]
    pub tokens: Vec<String>,

    /// Synonym-expanded token sequence, preferred for phrases when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "FieldTokens::is_empty")]
    pub fields: FieldTokens,

    /// Precomputed chargrams; replaces local chargram generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chargrams: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Doc-only vector; an empty list explicitly marks "no doc"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed_doc: Option<Vec<f32>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed_code: Option<Vec<f32>>,

    /// Already quantized merged vector; takes precedence over the float ones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_u8: Option<Vec<u8>>,

    /// Quantized doc vector; an empty list marks "no doc" like `embed_doc`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed_doc_u8: Option<Vec<u8>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed_code_u8: Option<Vec<u8>>,

    /// Per-file relation summary, recorded once per file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relations: Option<Value>,

    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl ChunkRecord {
    pub fn new(file: impl Into<String>, tokens: Vec<String>) -> Self {
        Self {
            file: file.into(),
            tokens,
            ..Self::default()
        }
    }

    /// The token stream used for phrases: `seq` when non-empty, else `tokens`.
    pub fn phrase_stream(&self) -> &[String] {
        match &self.seq {
            Some(seq) if !seq.is_empty() => seq,
            _ => &self.tokens,
        }
    }

    /// Tokens charged against the retention budget
    pub fn budget_tokens(&self) -> usize {
        self.seq.as_ref().map_or(self.tokens.len(), Vec::len)
    }

    pub fn has_content(&self) -> bool {
        !self.tokens.is_empty() || self.seq.as_ref().is_some_and(|seq| !seq.is_empty())
    }

    /// Rough in-memory size, used for queue accounting
    pub fn approx_bytes(&self) -> u64 {
        let strings = |list: &[String]| list.iter().map(|s| s.len() + 24).sum::<usize>();
        let vectors = |v: &Option<Vec<f32>>| v.as_ref().map_or(0, |v| v.len() * 4);
        let mut total = self.file.len() + strings(&self.tokens);
        if let Some(seq) = &self.seq {
            total += strings(seq);
        }
        for field in Field::ALL {
            total += strings(self.fields.get(field));
        }
        if let Some(grams) = &self.chargrams {
            total += strings(grams);
        }
        total += vectors(&self.embedding) + vectors(&self.embed_doc) + vectors(&self.embed_code);
        for codes in [&self.embedding_u8, &self.embed_doc_u8, &self.embed_code_u8] {
            total += codes.as_ref().map_or(0, Vec::len);
        }
        total as u64
    }
}

/// A chunk as kept by the accumulator after its postings were recorded.
///
/// Transient inputs (`seq`, field tokens, chargrams) are dropped; `tokens`
/// holds whatever the retention policy left.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Chunk {
    pub id: DocId,
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_uid: Option<String>,
    pub tokens: Vec<String>,
    pub token_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed_doc: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed_code: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_u8: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed_doc_u8: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed_code_u8: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_keys_land_in_metadata() {
        let line = r#"{"file":"src/a.rs","tokens":["a","b"],"kind":"function","start_line":3}"#;
        let record: ChunkRecord = serde_json::from_str(line).unwrap();
        assert_eq!(record.file, "src/a.rs");
        assert_eq!(record.tokens, vec!["a", "b"]);
        assert_eq!(record.metadata["kind"], "function");
        assert_eq!(record.metadata["start_line"], 3);
        assert!(record.seq.is_none());
    }

    #[test]
    fn test_empty_doc_marker_survives_parsing() {
        let record: ChunkRecord =
            serde_json::from_str(r#"{"file":"a","embed_doc":[],"embedding":[0.5]}"#).unwrap();
        assert_eq!(record.embed_doc, Some(vec![]));
        assert_eq!(record.embedding, Some(vec![0.5]));

        let missing: ChunkRecord = serde_json::from_str(r#"{"file":"a"}"#).unwrap();
        assert!(missing.embed_doc.is_none());
    }

    #[test]
    fn test_quantized_vectors_parse_as_bytes() {
        let record: ChunkRecord = serde_json::from_str(
            r#"{"file":"a","embedding_u8":[0,128,255],"embed_doc_u8":[]}"#,
        )
        .unwrap();
        assert_eq!(record.embedding_u8, Some(vec![0, 128, 255]));
        assert_eq!(record.embed_doc_u8, Some(vec![]));
        assert!(record.embed_code_u8.is_none());
        assert!(!record.metadata.contains_key("embedding_u8"));
    }

    #[test]
    fn test_field_tokens_parse() {
        let record: ChunkRecord = serde_json::from_str(
            r#"{"file":"a","fields":{"name":["parse"],"doc":["reads","input"]}}"#,
        )
        .unwrap();
        assert_eq!(record.fields.get(Field::Name), &["parse".to_string()]);
        assert_eq!(record.fields.get(Field::Doc).len(), 2);
        assert!(record.fields.get(Field::Body).is_empty());
    }

    #[test]
    fn test_phrase_stream_and_budget() {
        let mut record = ChunkRecord::new("a", vec!["x".into(), "y".into()]);
        assert_eq!(record.phrase_stream(), &["x".to_string(), "y".to_string()]);
        assert_eq!(record.budget_tokens(), 2);

        record.seq = Some(vec!["x".into(), "why".into(), "y".into()]);
        assert_eq!(record.phrase_stream().len(), 3);
        assert_eq!(record.budget_tokens(), 3);

        let empty = ChunkRecord::new("b", Vec::new());
        assert!(!empty.has_content());
    }
}
