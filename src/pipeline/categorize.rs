use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use clap::Args;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::batch::{run_batches, BatchClassifier};
use crate::error::PipelineError;
use crate::io::{self, CsvFormat, CsvRecord, CsvTable};
use crate::llm::{parse_json_array, ChatClient, ChatClientConfig, ChatCompletionRequest, LlmClient};
use crate::telemetry::{self};
use crate::telemetry::ops::categorize::Phase as CategorizePhase;

use super::args::{BatchArgs, CsvArgs};
use super::review::ReviewRow;

pub const STAGE: &str = "categorize";
pub const NOT_CLASSIFIED: &str = "NOT_CLASSIFIED";

const SYSTEM: &str = "You are an ontology engineer who knows the BFO foundational ontology and the GeoCore and \
GeoReservoir geology ontologies. You process data in batches and always answer with a JSON array of objects.";

#[derive(Args, Debug)]
pub struct CategorizeCmd {
    /// Defined terms (term,nld,original_label)
    #[arg(long)]
    input: PathBuf,
    #[arg(long, default_value = "output/categorized_terms.csv")]
    output: PathBuf,
    #[arg(long, default_value = "output/categorize_review.csv")]
    review_output: PathBuf,
    /// Optional; skipped with a warning when the file is absent
    #[arg(long, default_value = "resources/georeservoir-definitions.txt")]
    georeservoir_defs: PathBuf,
    #[arg(long, default_value = "resources/geocore-definitions.txt")]
    geocore_defs: PathBuf,
    #[arg(long, default_value = "resources/bfo-definitions.txt")]
    bfo_defs: PathBuf,
    #[command(flatten)]
    csv: CsvArgs,
    #[command(flatten)]
    batch: BatchArgs,
    #[arg(long, default_value_t = false)]
    apply: bool,
}

/// Category reference text injected into every prompt.
#[derive(Debug, Clone)]
pub struct Ontologies {
    pub georeservoir: Option<String>,
    pub geocore: String,
    pub bfo: String,
}

impl Ontologies {
    /// GeoCore and BFO definitions are required; GeoReservoir is optional.
    pub fn load(georeservoir: &Path, geocore: &Path, bfo: &Path) -> Result<Self, PipelineError> {
        let geocore = required(geocore)?;
        let bfo = required(bfo)?;
        let georeservoir = if georeservoir.exists() {
            Some(required(georeservoir)?)
        } else {
            telemetry::categorize().warn(format!(
                "⚠️  {} not found; classifying against GeoCore and BFO only",
                georeservoir.display()
            ));
            None
        };
        Ok(Self { georeservoir, geocore, bfo })
    }

    pub fn prompt(&self, batch_json: &str) -> String {
        let mut steps = Vec::new();
        let mut sections = String::new();
        if let Some(defs) = &self.georeservoir {
            steps.push("Try the GeoReservoir categories first.".to_string());
            sections.push_str(&format!("### GeoReservoir categories\n{}\n\n", defs.trim()));
        }
        steps.push(if self.georeservoir.is_some() {
            "If none fits, try the GeoCore categories.".to_string()
        } else {
            "Try the GeoCore categories first.".to_string()
        });
        steps.push("If no GeoCore category fits, try the BFO categories.".to_string());
        steps.push(format!("If nothing fits at all, use the category {NOT_CLASSIFIED}."));
        steps.push("Give one short sentence of reasoning based on the NLD.".to_string());
        sections.push_str(&format!("### GeoCore categories\n{}\n\n", self.geocore.trim()));
        sections.push_str(&format!("### BFO categories\n{}\n", self.bfo.trim()));

        let steps: Vec<String> = steps.iter().enumerate().map(|(i, s)| format!("{}. {}", i + 1, s)).collect();
        format!(
            "Classify each geological term of the batch from its natural language definition (NLD).\n\n\
             For every item:\n{}\n\n\
             INPUT: a JSON array of objects with \"term\" and \"nld\".\n\
             OUTPUT: a JSON array with exactly one object per input item, in the same order, \
             each with \"term\", \"category\" and \"reasoning\".\n\n\
             ONTOLOGY CATEGORIES\n\n{}\n\
             BATCH:\n{}",
            steps.join("\n"),
            sections,
            batch_json
        )
    }
}

fn required(path: &Path) -> Result<String, PipelineError> {
    let text = io::load_text(path)?;
    if text.trim().is_empty() {
        return Err(PipelineError::InvalidConfiguration(format!("{} is empty", path.display())));
    }
    Ok(text)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NldInput {
    pub term: String,
    pub nld: String,
    #[serde(skip)]
    pub original_label: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryReply {
    #[serde(default)]
    pub term: String,
    pub category: String,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorizedTerm {
    pub term: String,
    pub category: String,
    pub reasoning: String,
    pub original_label: String,
    pub nld: String,
}

impl CsvRecord for CategorizedTerm {
    const HEADER: &'static [&'static str] = &["term", "category", "reasoning", "original_label", "nld"];
    fn fields(&self, _fmt: &CsvFormat) -> Vec<String> {
        vec![
            self.term.clone(),
            self.category.clone(),
            self.reasoning.clone(),
            self.original_label.clone(),
            self.nld.clone(),
        ]
    }
}

pub struct Categorizer<'a> {
    client: &'a dyn LlmClient,
    ontologies: &'a Ontologies,
}

#[async_trait]
impl BatchClassifier<NldInput> for Categorizer<'_> {
    type Output = CategoryReply;

    async fn classify(&self, batch: &[NldInput]) -> Result<Vec<CategoryReply>, PipelineError> {
        let payload = serde_json::to_string_pretty(batch)
            .map_err(|e| PipelineError::InvalidConfiguration(format!("encode batch: {e}")))?;
        let req = ChatCompletionRequest::prompt(SYSTEM, self.ontologies.prompt(&payload));
        let reply = self.client.chat_completion(req).await?;
        parse_json_array::<CategoryReply>(&reply.content)
    }
}

#[derive(Debug, Default)]
pub struct Categorization {
    pub categorized: Vec<CategorizedTerm>,
    pub review: Vec<ReviewRow>,
}

impl Categorization {
    pub fn not_classified(&self) -> usize {
        self.categorized.iter().filter(|t| t.category == NOT_CLASSIFIED).count()
    }
}

/// Classify `terms` in batches; every term of a failed batch goes to review.
pub async fn categorize_terms(
    terms: &[NldInput],
    ontologies: &Ontologies,
    client: &dyn LlmClient,
    batch: &BatchArgs,
) -> Result<Categorization, PipelineError> {
    let log = telemetry::categorize();
    let policy = batch.policy()?;
    let outcome = run_batches(terms, &policy, &Categorizer { client, ontologies }, &log).await?;
    if !outcome.failed.is_empty() {
        log.warn(format!("⚠️  {} batch(es) failed; {} term(s) routed to review", outcome.failed.len(), outcome.failed_records()));
    }

    let mut out = Categorization::default();
    for (input, reply) in outcome.completed {
        out.categorized.push(CategorizedTerm {
            term: input.term,
            category: reply.category.trim().to_string(),
            reasoning: reply.reasoning.trim().to_string(),
            original_label: input.original_label,
            nld: input.nld,
        });
    }
    for failed in outcome.failed {
        for t in failed.records {
            out.review.push(ReviewRow::new(t.term, t.original_label, STAGE, failed.error.to_string()));
        }
    }
    Ok(out)
}

fn load_terms(path: &Path, delimiter: char) -> Result<Vec<NldInput>, PipelineError> {
    let table = CsvTable::read(path, delimiter)?;
    let (term, nld, label) = (table.column("term")?, table.column("nld")?, table.column("original_label")?);
    Ok(table
        .rows
        .iter()
        .map(|r| NldInput {
            term: CsvTable::cell(r, term).trim().to_string(),
            nld: CsvTable::cell(r, nld).trim().to_string(),
            original_label: CsvTable::cell(r, label).trim().to_string(),
        })
        .filter(|t| !t.term.is_empty())
        .collect())
}

pub async fn run(args: CategorizeCmd) -> Result<()> {
    let log = telemetry::categorize();
    let _g = log
        .root_span_kv([
            ("input", args.input.display().to_string()),
            ("output", args.output.display().to_string()),
            ("batch_size", args.batch.batch_size.to_string()),
            ("max_retries", args.batch.pacing.max_retries.to_string()),
            ("apply", args.apply.to_string()),
        ])
        .entered();

    let fmt = args.csv.format()?;
    let policy = args.batch.policy()?;
    let (terms, ontologies) = {
        let _l = log.span(&CategorizePhase::Load).entered();
        let ontologies = Ontologies::load(&args.georeservoir_defs, &args.geocore_defs, &args.bfo_defs)?;
        (load_terms(&args.input, fmt.delimiter)?, ontologies)
    };

    if !args.apply {
        let _sp = log.span(&CategorizePhase::Plan).entered();
        #[derive(Serialize)]
        struct CategorizePlan { terms: usize, batches: usize, georeservoir: bool, batch: crate::batch::BatchPolicy }
        let plan = CategorizePlan {
            terms: terms.len(),
            batches: policy.batch_count(terms.len()),
            georeservoir: ontologies.georeservoir.is_some(),
            batch: policy,
        };
        if telemetry::config::json_mode() {
            log.plan(&plan)?;
        } else {
            log.info(format!(
                "📝 Categorize plan: terms={} batches={} batch_size={} georeservoir={}",
                plan.terms, plan.batches, policy.batch_size, plan.georeservoir
            ));
            log.info("   Use --apply to call the LLM.");
        }
        return Ok(());
    }

    let client = ChatClient::new(ChatClientConfig::from_env())?;
    log.info(format!("🤖 categorizing {} term(s) in {} batch(es) with {}", terms.len(), policy.batch_count(terms.len()), client.model()));
    let out = categorize_terms(&terms, &ontologies, &client, &args.batch)
        .instrument(log.span(&CategorizePhase::Classify))
        .await?;

    let _w = log.span(&CategorizePhase::Write).entered();
    let written = io::write_records(&args.output, fmt, &out.categorized)?;
    let review = if out.review.is_empty() { 0 } else { io::write_records(&args.review_output, fmt, &out.review)? };
    log.totals(written, review, review);
    if out.not_classified() > 0 {
        log.info(format!("ℹ️  {} term(s) fit no category ({})", out.not_classified(), NOT_CLASSIFIED));
    }

    if telemetry::config::json_mode() {
        #[derive(Serialize)]
        struct CategorizeResult { terms: usize, categorized: usize, not_classified: usize, review: Vec<ReviewRow> }
        log.result(&CategorizeResult {
            terms: terms.len(),
            categorized: written,
            not_classified: out.not_classified(),
            review: out.review,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::MockClient;
    use crate::pipeline::args::PacingArgs;

    fn ontologies(georeservoir: bool) -> Ontologies {
        Ontologies {
            georeservoir: georeservoir.then(|| "Reservoir Rock: a rock that stores fluids".to_string()),
            geocore: "Geological Structure: a structure in rock".to_string(),
            bfo: "Material Entity: an independent continuant".to_string(),
        }
    }

    fn nld(term: &str, label: &str) -> NldInput {
        NldInput { term: term.into(), nld: format!("A {term} is a thing that exists."), original_label: label.into() }
    }

    fn batch(size: usize) -> BatchArgs {
        BatchArgs { batch_size: size, pacing: PacingArgs { delay_ms: 0, max_retries: 0, retry_base_ms: 0 } }
    }

    #[test]
    fn georeservoir_section_is_optional() {
        let with = ontologies(true).prompt("[]");
        assert!(with.contains("### GeoReservoir categories"));
        assert!(with.contains("1. Try the GeoReservoir categories first."));
        let without = ontologies(false).prompt("[]");
        assert!(!without.contains("GeoReservoir categories"));
        assert!(without.contains("1. Try the GeoCore categories first."));
        assert!(without.contains(NOT_CLASSIFIED));
    }

    #[test]
    fn missing_required_definitions_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let geocore = dir.path().join("geocore.txt");
        std::fs::write(&geocore, "Rock: an aggregate of minerals").unwrap();
        let bfo = dir.path().join("bfo.txt");
        let err = Ontologies::load(&dir.path().join("georeservoir.txt"), &geocore, &bfo).unwrap_err();
        assert!(matches!(err, PipelineError::SourceNotFound(p) if p == bfo));

        std::fs::write(&bfo, "Entity: anything").unwrap();
        let loaded = Ontologies::load(&dir.path().join("georeservoir.txt"), &geocore, &bfo).unwrap();
        assert!(loaded.georeservoir.is_none());
    }

    #[tokio::test]
    async fn failed_batch_terms_go_to_review_with_reason() {
        let mock = MockClient::new();
        mock.push_text(
            r#"[{"term":"arenito","category":"Reservoir Rock","reasoning":"It stores fluids."},
                {"term":"falha","category":"Geological Structure","reasoning":"It is a structure."}]"#,
        );
        // second batch answers with only one item for two terms
        mock.push_text(r#"[{"term":"óleo","category":"Material Entity","reasoning":"Matter."}]"#);
        mock.push_text(r#"[{"term":"mistério","category":"NOT_CLASSIFIED","reasoning":"Nothing fits."}]"#);

        let terms = [nld("arenito", "ROCHA"), nld("falha", "EST"), nld("óleo", "FLUIDO"), nld("sal", "ROCHA"), nld("mistério", "X")];
        let out = categorize_terms(&terms, &ontologies(true), &mock, &batch(2)).await.unwrap();

        let cats: Vec<(&str, &str)> = out.categorized.iter().map(|t| (t.term.as_str(), t.category.as_str())).collect();
        assert_eq!(cats, vec![("arenito", "Reservoir Rock"), ("falha", "Geological Structure"), ("mistério", NOT_CLASSIFIED)]);
        assert_eq!(out.categorized[0].original_label, "ROCHA");
        assert_eq!(out.not_classified(), 1);

        let review: Vec<(&str, &str)> = out.review.iter().map(|r| (r.term.as_str(), r.label.as_str())).collect();
        assert_eq!(review, vec![("óleo", "FLUIDO"), ("sal", "ROCHA")]);
        assert!(out.review[0].reason.contains("batch 1"));

        let payload = &mock.calls()[0].messages[1].content;
        assert!(payload.contains("\"nld\": \"A arenito is a thing that exists.\""));
        assert!(!payload.contains("original_label"));
    }
}
