use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use hf_hub::api::sync::{Api, ApiRepo};
use ndarray::{Array2, Array3, ArrayD};
use tokenizers::{Tokenizer, TruncationParams};

// onnx runtime (ORT)
use ort::inputs;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Value;

use super::EntityLabeler;
use crate::ner::span::RawEntitySpan;

pub const DEFAULT_MODEL_ID: &str = "hmoreira/xlm-roberta-large-petrogeoner";
const MODEL_MAX_LENGTH: usize = 512;
/// Longest window the classifier takes whole; two positions go to the
/// sequence start and end tokens.
pub const MAX_WINDOW_TOKENS: usize = MODEL_MAX_LENGTH - 2;

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
pub enum Device {
    #[value(name = "cpu")] Cpu,
    #[value(name = "cuda")] Cuda,
}

/// Local model artifacts. Whatever is left out is fetched from the Hub.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelFiles<'a> {
    pub onnx: Option<&'a Path>,
    pub tokenizer: Option<&'a Path>,
    pub config: Option<&'a Path>,
}

/// Token-classification (BIO) model served through ONNX Runtime.
///
/// Words take the label of their first sub-token; consecutive `B-X I-X ..`
/// words are merged into one entity scored by the mean word probability.
pub struct OnnxTokenClassifier {
    tok: Tokenizer,
    session: Session,
    id2label: Vec<String>,
}

impl OnnxTokenClassifier {
    pub fn new(model_id: &str, files: ModelFiles<'_>, device: Device) -> Result<Self> {
        let mut hub = HubRepo::new(model_id);

        let tok_path = hub.resolve(files.tokenizer, &["tokenizer.json"])?;
        let mut tok = Tokenizer::from_file(&tok_path).map_err(|e| anyhow!("{}", e))?;
        tok.with_truncation(Some(TruncationParams {
            max_length: MODEL_MAX_LENGTH,
            ..Default::default()
        }))
        .map_err(|e| anyhow!("{}", e))?;
        tok.with_padding(None);

        let cfg_path = hub.resolve(files.config, &["config.json"])?;
        let cfg_raw = std::fs::read_to_string(&cfg_path)
            .with_context(|| format!("read {}", cfg_path.display()))?;
        let id2label = parse_id2label(&cfg_raw)?;

        let onnx_path = hub.resolve(files.onnx, &["onnx/model.onnx", "model.onnx"])?;
        let session = build_session(&onnx_path, device)?;
        Ok(Self { tok, session, id2label })
    }

    fn predict(&mut self, text: &str) -> Result<Vec<TokenPrediction>> {
        let enc = self.tok.encode(text, true).map_err(|e| anyhow!("{}", e))?;
        if !enc.get_overflowing().is_empty() {
            bail!("window re-encodes to more than {} tokens", MODEL_MAX_LENGTH);
        }
        let n = enc.get_ids().len();
        if n == 0 { return Ok(vec![]); }

        let ids: Vec<i64> = enc.get_ids().iter().map(|&x| x as i64).collect();
        let mask: Vec<i64> = enc.get_attention_mask().iter().map(|&x| x as i64).collect();
        let ids = Array2::from_shape_vec((1, n), ids)?;
        let mask = Array2::from_shape_vec((1, n), mask)?;

        let input_ids_val = Value::from_array(ids).map_err(|e| anyhow!("{}", e))?;
        let attn_mask_val = Value::from_array(mask).map_err(|e| anyhow!("{}", e))?;

        let outputs = self.session
            .run(inputs! {
                "input_ids" => &input_ids_val,
                "attention_mask" => &attn_mask_val,
            })
            .map_err(|e| anyhow!("{}", e))?;

        let first = outputs.iter().next().map(|(_n, v)| v).ok_or_else(|| anyhow!("no outputs from ONNX session"))?;
        let arr_view = first.try_extract_array().map_err(|e| anyhow!("{}", e))?;
        let arr: ArrayD<f32> = arr_view.to_owned();
        // [batch, seq, num_labels]
        let logits: Array3<f32> = arr.into_dimensionality().map_err(|_| anyhow!("expect 3D logits"))?;
        if logits.shape()[1] != n { bail!("logits cover {} tokens, expected {}", logits.shape()[1], n); }
        if logits.shape()[2] != self.id2label.len() {
            bail!("model emits {} labels but config has {}", logits.shape()[2], self.id2label.len());
        }

        let special = enc.get_special_tokens_mask();
        let word_ids = enc.get_word_ids();
        let offsets = enc.get_offsets();
        let mut preds = Vec::with_capacity(n);
        for i in 0..n {
            preds.push(TokenPrediction {
                word: word_ids.get(i).copied().flatten(),
                offsets: offsets[i],
                special: special.get(i).copied().unwrap_or(0) == 1,
                probs: softmax(logits.slice(ndarray::s![0, i, ..]).iter().copied()),
            });
        }
        Ok(preds)
    }
}

impl EntityLabeler for OnnxTokenClassifier {
    fn label(&mut self, text: &str) -> Result<Vec<RawEntitySpan>> {
        let preds = self.predict(text)?;
        Ok(group_entities(text, &preds, &self.id2label))
    }

    fn max_window_tokens(&self) -> Option<usize> { Some(MAX_WINDOW_TOKENS) }
}

/// Per-token model output aligned with the tokenizer encoding.
#[derive(Debug, Clone)]
pub struct TokenPrediction {
    pub word: Option<u32>,
    pub offsets: (usize, usize),
    pub special: bool,
    pub probs: Vec<f32>,
}

struct WordTag<'a> {
    begin: bool,
    group: &'a str,
    score: f32,
    start: usize,
    end: usize,
}

pub fn group_entities(text: &str, preds: &[TokenPrediction], id2label: &[String]) -> Vec<RawEntitySpan> {
    // collapse sub-tokens into words; a word keeps its first token's prediction
    let mut words: Vec<WordTag<'_>> = Vec::new();
    let mut last_word: Option<u32> = None;
    for p in preds.iter().filter(|p| !p.special) {
        if p.word.is_some() && p.word == last_word {
            if let Some(w) = words.last_mut() { w.end = w.end.max(p.offsets.1); }
            continue;
        }
        last_word = p.word;
        let Some((idx, score)) = argmax(&p.probs) else { continue };
        let Some(label) = id2label.get(idx) else { continue };
        let (begin, group) = split_tag(label);
        words.push(WordTag { begin, group, score, start: p.offsets.0, end: p.offsets.1 });
    }

    let mut out: Vec<RawEntitySpan> = Vec::new();
    let mut current: Vec<&WordTag<'_>> = Vec::new();
    for w in &words {
        let continues = current.last().map(|c| c.group == w.group && !w.begin).unwrap_or(false);
        if !continues {
            flush_group(text, &current, &mut out);
            current.clear();
        }
        current.push(w);
    }
    flush_group(text, &current, &mut out);
    out
}

fn flush_group(text: &str, group: &[&WordTag<'_>], out: &mut Vec<RawEntitySpan>) {
    let (Some(first), Some(last)) = (group.first(), group.last()) else { return };
    if first.group == "O" { return; }
    let (start, end) = (first.start, last.end);
    let Some(surface) = text.get(start..end) else { return };
    let score = group.iter().map(|w| w.score as f64).sum::<f64>() / group.len() as f64;
    out.push(RawEntitySpan {
        text: surface.trim().to_string(),
        label: first.group.to_string(),
        score: score as f32,
        start,
        end,
    });
}

// "B-X" -> (true, "X"); "I-X" -> (false, "X"); anything else is an inside tag
fn split_tag(label: &str) -> (bool, &str) {
    if let Some(rest) = label.strip_prefix("B-") { return (true, rest); }
    if let Some(rest) = label.strip_prefix("I-") { return (false, rest); }
    (false, label)
}

fn argmax(probs: &[f32]) -> Option<(usize, f32)> {
    probs
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, p)| match best {
            Some((_, bp)) if bp >= p => best,
            _ => Some((i, p)),
        })
}

fn softmax(logits: impl Iterator<Item = f32>) -> Vec<f32> {
    let v: Vec<f32> = logits.collect();
    let max = v.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = v.iter().map(|x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 { exps.into_iter().map(|e| e / sum).collect() } else { exps }
}

pub fn parse_id2label(config_json: &str) -> Result<Vec<String>> {
    let cfg: serde_json::Value = serde_json::from_str(config_json).context("parse config.json")?;
    let map: HashMap<String, String> = cfg
        .get("id2label")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .context("id2label must map ids to label strings")?
        .ok_or_else(|| anyhow!("config.json has no id2label"))?;

    let mut labels = vec![String::new(); map.len()];
    for (k, v) in map {
        let idx: usize = k.parse().with_context(|| format!("bad id2label key {k:?}"))?;
        let slot = labels.get_mut(idx).ok_or_else(|| anyhow!("id2label ids are not contiguous"))?;
        *slot = v;
    }
    Ok(labels)
}

// hub handle created on first use, so fully local runs never reach it
struct HubRepo<'a> {
    model_id: &'a str,
    repo: Option<ApiRepo>,
}

impl<'a> HubRepo<'a> {
    fn new(model_id: &'a str) -> Self { Self { model_id, repo: None } }

    fn repo(&mut self) -> Result<&ApiRepo> {
        let repo = match self.repo.take() {
            Some(r) => r,
            None => Api::new()?.model(self.model_id.to_string()),
        };
        let repo: &ApiRepo = self.repo.insert(repo);
        Ok(repo)
    }

    /// `local` when given, otherwise the first of `names` published with the model.
    fn resolve(&mut self, local: Option<&Path>, names: &[&str]) -> Result<PathBuf> {
        if let Some(p) = local {
            return Ok(p.to_path_buf());
        }
        let model_id = self.model_id;
        let repo = self.repo()?;
        for name in names {
            if let Ok(p) = repo.get(name) { return Ok(p); }
        }
        bail!("Could not find {} in {model_id}. Pass a local path to override.", names.join(" or "))
    }
}

fn build_session(onnx_path: &Path, device: Device) -> Result<Session> {
    let builder = SessionBuilder::new()
        .map_err(|e| anyhow!("{}", e))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| anyhow!("{}", e))?;

    #[allow(unreachable_code)]
    let builder = match device {
        Device::Cpu => builder,
        Device::Cuda => {
            #[cfg(feature = "cuda")]
            {
                use ort::execution_providers::CUDAExecutionProvider;
                builder
                    .with_execution_providers([CUDAExecutionProvider::default().into()])
                    .map_err(|e| anyhow!("{}", e))?
            }
            #[cfg(not(feature = "cuda"))]
            {
                bail!("Binary built without CUDA support. Rebuild with `--features cuda` and ensure CUDA is available.")
            }
        }
    };

    let session = builder
        .commit_from_file(onnx_path)
        .map_err(|e| anyhow!("{}", e))?;
    Ok(session)
}
