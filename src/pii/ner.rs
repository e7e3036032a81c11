// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! ONNX named-entity recognition for unstructured PII.
//!
//! Wraps a BERT-style token-classification model: tokenize with byte
//! offsets, run ONNX Runtime, softmax per token, decode BIO tags into
//! character spans. Weights load once at startup and are shared read-only
//! across requests.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use ndarray::{Array2, Axis};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use tokenizers::Tokenizer;
use tracing::info;

use super::PiiKind;

/// A recognized span in the source text, byte offsets
#[derive(Debug, Clone, PartialEq)]
pub struct NerSpan {
    pub kind: PiiKind,
    pub start: usize,
    pub end: usize,
    pub confidence: f32,
}

/// Capability interface for the statistical recognizer, so the resolver is
/// testable without model weights.
pub trait NamedEntityRecognizer: Send + Sync {
    fn recognize(&self, text: &str) -> Result<Vec<NerSpan>>;
}

/// BIO label set of dslim/bert-base-NER; OntoNotes-style checkpoints load
/// their own list from config.
const DEFAULT_LABELS: &[&str] = &[
    "O", "B-MISC", "I-MISC", "B-PER", "I-PER", "B-ORG", "I-ORG", "B-LOC", "I-LOC",
];

/// Map a BIO tag's entity part onto a PII kind. Labels without a PII
/// interpretation (MISC, CARDINAL, …) are ignored rather than redacted.
fn map_label(entity: &str) -> Option<PiiKind> {
    match entity {
        "PER" | "PERSON" => Some(PiiKind::Person),
        "ORG" => Some(PiiKind::Organization),
        "LOC" | "GPE" => Some(PiiKind::Location),
        "DATE" | "TIME" => Some(PiiKind::DateTime),
        "MONEY" => Some(PiiKind::Money),
        _ => None,
    }
}

/// Per-token argmax outcome, ready for BIO decoding
#[derive(Debug, Clone)]
struct TokenPrediction {
    label_id: usize,
    /// Byte offsets into the source text; (0, 0) for special tokens
    offset: (usize, usize),
    confidence: f32,
}

/// Fold BIO-tagged tokens into entity spans. `I-` continuing a different
/// kind, or appearing without an open span, starts a new span (models emit
/// both dialects).
fn decode_spans(predictions: &[TokenPrediction], labels: &[String]) -> Vec<NerSpan> {
    let mut spans: Vec<NerSpan> = Vec::new();
    let mut open: Option<(PiiKind, usize, usize, f32, u32)> = None;

    for p in predictions {
        if p.offset.0 == p.offset.1 {
            continue; // special token
        }

        let label = labels.get(p.label_id).map(String::as_str).unwrap_or("O");
        let (prefix, entity) = match label.split_once('-') {
            Some((prefix, entity)) => (prefix, entity),
            None => ("O", ""),
        };
        let kind = map_label(entity);

        match (prefix, kind) {
            ("I", Some(kind)) if matches!(open, Some((k, ..)) if k == kind) => {
                if let Some((_, start, _, sum, n)) = open.take() {
                    open = Some((kind, start, p.offset.1, sum + p.confidence, n + 1));
                }
            }
            ("B", Some(kind)) | ("I", Some(kind)) => {
                if let Some((k, start, end, sum, n)) = open.take() {
                    spans.push(NerSpan { kind: k, start, end, confidence: sum / n as f32 });
                }
                open = Some((kind, p.offset.0, p.offset.1, p.confidence, 1));
            }
            _ => {
                if let Some((k, start, end, sum, n)) = open.take() {
                    spans.push(NerSpan { kind: k, start, end, confidence: sum / n as f32 });
                }
            }
        }
    }

    if let Some((k, start, end, sum, n)) = open {
        spans.push(NerSpan { kind: k, start, end, confidence: sum / n as f32 });
    }

    spans
}

fn softmax(row: &[f32]) -> Vec<f32> {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = row.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}

/// ONNX-backed token-classification recognizer
pub struct OnnxNerModel {
    /// ONNX Runtime session (Arc<Mutex> for thread-safe shared access)
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    labels: Vec<String>,
    max_length: usize,
}

impl std::fmt::Debug for OnnxNerModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxNerModel")
            .field("labels", &self.labels.len())
            .field("max_length", &self.max_length)
            .finish_non_exhaustive()
    }
}

impl OnnxNerModel {
    /// Load the model and tokenizer from disk.
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file (model.onnx)
    /// * `tokenizer_path` - Path to the tokenizer JSON file (tokenizer.json)
    /// * `labels` - BIO label list in model output order; defaults to the
    ///   CoNLL set when `None`
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        tokenizer_path: P,
        labels: Option<Vec<String>>,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let tokenizer_path = tokenizer_path.as_ref();

        if !model_path.exists() {
            anyhow::bail!("ONNX model file not found: {}", model_path.display());
        }
        if !tokenizer_path.exists() {
            anyhow::bail!("Tokenizer file not found: {}", tokenizer_path.display());
        }

        let session = Session::builder()
            .context("Failed to create session builder")?
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .context("Failed to set CPU execution provider")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("Failed to set optimization level")?
            .with_intra_threads(4)
            .context("Failed to set intra threads")?
            .commit_from_file(model_path)
            .context(format!("Failed to load ONNX model from {}", model_path.display()))?;

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;

        let labels = labels
            .unwrap_or_else(|| DEFAULT_LABELS.iter().map(|l| l.to_string()).collect());
        info!("NER model loaded with {} labels", labels.len());

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            labels,
            max_length: 512,
        })
    }
}

impl NamedEntityRecognizer for OnnxNerModel {
    fn recognize(&self, text: &str) -> Result<Vec<NerSpan>> {
        if text.is_empty() {
            return Ok(vec![]);
        }

        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;

        let seq_len = encoding.get_ids().len().min(self.max_length);
        let input_ids: Vec<i64> =
            encoding.get_ids()[..seq_len].iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding.get_attention_mask()[..seq_len]
            .iter()
            .map(|&m| m as i64)
            .collect();
        let token_type_ids = vec![0i64; seq_len];
        let offsets = &encoding.get_offsets()[..seq_len];

        let input_ids_array = Array2::from_shape_vec((1, seq_len), input_ids)
            .context("Failed to create input_ids array")?;
        let attention_mask_array = Array2::from_shape_vec((1, seq_len), attention_mask)
            .context("Failed to create attention_mask array")?;
        let token_type_ids_array = Array2::from_shape_vec((1, seq_len), token_type_ids)
            .context("Failed to create token_type_ids array")?;

        // Lock the session for thread-safe access
        let mut session = self.session.lock().unwrap();
        let outputs = session.run(ort::inputs![
            "input_ids" => Value::from_array(input_ids_array)?,
            "attention_mask" => Value::from_array(attention_mask_array)?,
            "token_type_ids" => Value::from_array(token_type_ids_array)?
        ])?;

        // Logits: [batch, seq_len, num_labels]
        let logits = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract logits tensor")?;
        let shape = logits.shape();
        if shape.len() != 3 {
            anyhow::bail!("Model outputs unexpected dimensions: {:?}", shape);
        }

        let batch = logits.index_axis(Axis(0), 0); // [seq_len, num_labels]
        let mut predictions = Vec::with_capacity(seq_len);
        for (i, offset) in offsets.iter().enumerate().take(batch.shape()[0]) {
            let row: Vec<f32> = batch.index_axis(Axis(0), i).iter().copied().collect();
            let probs = softmax(&row);
            let (label_id, confidence) = probs
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, p)| (i, *p))
                .unwrap_or((0, 0.0));

            predictions.push(TokenPrediction { label_id, offset: *offset, confidence });
        }

        Ok(decode_spans(&predictions, &self.labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<String> {
        DEFAULT_LABELS.iter().map(|l| l.to_string()).collect()
    }

    fn prediction(label: &str, offset: (usize, usize), confidence: f32) -> TokenPrediction {
        let label_id = DEFAULT_LABELS.iter().position(|l| *l == label).unwrap();
        TokenPrediction { label_id, offset, confidence }
    }

    #[test]
    fn test_map_label_covers_both_schemes() {
        assert_eq!(map_label("PER"), Some(PiiKind::Person));
        assert_eq!(map_label("PERSON"), Some(PiiKind::Person));
        assert_eq!(map_label("GPE"), Some(PiiKind::Location));
        assert_eq!(map_label("MONEY"), Some(PiiKind::Money));
        assert_eq!(map_label("MISC"), None);
        assert_eq!(map_label("CARDINAL"), None);
    }

    #[test]
    fn test_decode_spans_merges_bio_run() {
        // "John Smith" -> B-PER I-PER
        let predictions = vec![
            prediction("B-PER", (0, 4), 0.9),
            prediction("I-PER", (5, 10), 0.7),
        ];
        let spans = decode_spans(&predictions, &labels());
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].kind, PiiKind::Person);
        assert_eq!((spans[0].start, spans[0].end), (0, 10));
        assert!((spans[0].confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_decode_spans_splits_on_o() {
        let predictions = vec![
            prediction("B-PER", (0, 4), 0.9),
            prediction("O", (5, 7), 0.9),
            prediction("B-ORG", (8, 12), 0.8),
        ];
        let spans = decode_spans(&predictions, &labels());
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].kind, PiiKind::Person);
        assert_eq!(spans[1].kind, PiiKind::Organization);
    }

    #[test]
    fn test_decode_spans_orphan_i_starts_span() {
        let predictions = vec![prediction("I-LOC", (3, 9), 0.6)];
        let spans = decode_spans(&predictions, &labels());
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].kind, PiiKind::Location);
    }

    #[test]
    fn test_decode_spans_kind_switch_closes_previous() {
        let predictions = vec![
            prediction("B-PER", (0, 4), 0.9),
            prediction("I-ORG", (5, 9), 0.8),
        ];
        let spans = decode_spans(&predictions, &labels());
        assert_eq!(spans.len(), 2);
        assert_eq!((spans[0].start, spans[0].end), (0, 4));
        assert_eq!((spans[1].start, spans[1].end), (5, 9));
    }

    #[test]
    fn test_decode_spans_skips_special_tokens() {
        let predictions = vec![
            prediction("B-PER", (0, 0), 0.9), // [CLS]
            prediction("B-PER", (0, 4), 0.9),
        ];
        let spans = decode_spans(&predictions, &labels());
        assert_eq!(spans.len(), 1);
        assert_eq!((spans[0].start, spans[0].end), (0, 4));
    }

    #[test]
    fn test_decode_spans_ignores_unmapped_labels() {
        let predictions = vec![prediction("B-MISC", (0, 4), 0.9)];
        assert!(decode_spans(&predictions, &labels()).is_empty());
    }

    #[test]
    fn test_softmax_normalizes() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn test_missing_model_path_fails() {
        let result = OnnxNerModel::new("/nonexistent/model.onnx", "/nonexistent/tokenizer.json", None);
        assert!(result.is_err());
    }

    const MODEL_PATH: &str = "/workspace/models/bert-base-ner-onnx/model.onnx";
    const TOKENIZER_PATH: &str = "/workspace/models/bert-base-ner-onnx/tokenizer.json";

    #[test]
    #[ignore] // Only run if model files are downloaded
    fn test_recognize_person() {
        let model = OnnxNerModel::new(MODEL_PATH, TOKENIZER_PATH, None).unwrap();
        let spans = model.recognize("My name is John Smith and I work at Acme Corp.").unwrap();
        assert!(spans.iter().any(|s| s.kind == PiiKind::Person));
        assert!(spans.iter().any(|s| s.kind == PiiKind::Organization));
    }
}
