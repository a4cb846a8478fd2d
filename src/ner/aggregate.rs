use std::collections::HashMap;

use serde::Serialize;

use super::span::DocumentEntitySpan;

/// How a surface form seen under several labels picks its label.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LabelPolicy {
    /// Label of the first occurrence; later labels are ignored.
    #[default]
    #[value(name = "first-seen")]
    FirstSeen,
    /// Most common label; ties go to the one seen first.
    #[value(name = "most-frequent")]
    MostFrequent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedEntity {
    pub entity: String,
    pub label: String,
    pub count: usize,
    pub avg_score: f32,
}

#[derive(Debug, Default)]
pub struct Aggregation {
    pub entities: Vec<AggregatedEntity>,
    /// Surface forms that appeared under more than one label.
    pub ambiguous: Vec<String>,
}

struct Group {
    scores: Vec<f32>,
    // (label, count) in first-seen order
    labels: Vec<(String, usize)>,
}

impl Group {
    fn add(&mut self, label: &str, score: f32) {
        self.scores.push(score);
        match self.labels.iter_mut().find(|(l, _)| l == label) {
            Some((_, n)) => *n += 1,
            None => self.labels.push((label.to_string(), 1)),
        }
    }

    fn label(&self, policy: LabelPolicy) -> String {
        let picked = match policy {
            LabelPolicy::FirstSeen => self.labels.first(),
            // max_by_key keeps the last max; scan in reverse to prefer first-seen
            LabelPolicy::MostFrequent => self.labels.iter().rev().max_by_key(|(_, n)| *n),
        };
        picked.map(|(l, _)| l.clone()).unwrap_or_default()
    }
}

/// Group spans by exact (case-sensitive) surface text.
///
/// Output is sorted by occurrence count, descending; ties keep the order in
/// which surface forms were first encountered.
pub fn aggregate(spans: &[DocumentEntitySpan], policy: LabelPolicy) -> Aggregation {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Group> = HashMap::new();
    for span in spans {
        let group = groups.entry(span.text.as_str()).or_insert_with(|| {
            order.push(span.text.as_str());
            Group { scores: Vec::new(), labels: Vec::new() }
        });
        group.add(&span.label, span.score);
    }

    let mut out = Aggregation::default();
    for text in order {
        let Some(group) = groups.get(text) else { continue };
        let count = group.scores.len();
        let avg = group.scores.iter().map(|s| *s as f64).sum::<f64>() / count as f64;
        if group.labels.len() > 1 {
            out.ambiguous.push(text.to_string());
        }
        out.entities.push(AggregatedEntity {
            entity: text.to_string(),
            label: group.label(policy),
            count,
            avg_score: avg as f32,
        });
    }
    out.entities.sort_by(|a, b| b.count.cmp(&a.count));
    out
}
