use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Snapshot of the environment the assistant is looking at.
///
/// Passed through work items and updates untouched; only custom subscriber
/// filters look inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub namespace: String,
    pub cluster: String,
    /// Problem kind -> number of occurrences (e.g. "crash_loop" -> 3).
    #[serde(default)]
    pub problem_counts: BTreeMap<String, u32>,
}

impl ContextSummary {
    pub fn new(namespace: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            cluster: cluster.into(),
            problem_counts: BTreeMap::new(),
        }
    }

    pub fn with_problem(mut self, kind: impl Into<String>, count: u32) -> Self {
        self.problem_counts.insert(kind.into(), count);
        self
    }

    pub fn total_problems(&self) -> u32 {
        self.problem_counts.values().sum()
    }
}

/// Data carried by work items, results, cache entries and updates.
///
/// One variant per kind of work so that handlers match exhaustively
/// instead of downcasting an opaque blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Empty,
    Text(String),
    Number(i64),
    Context(ContextSummary),
    Analysis {
        subject: String,
        #[serde(default)]
        findings: Vec<String>,
    },
    Prediction {
        subject: String,
        horizon_secs: u64,
        score: f64,
    },
    Validation {
        subject: String,
        passed: bool,
        #[serde(default)]
        messages: Vec<String>,
    },
    Optimization {
        subject: String,
        #[serde(default)]
        suggestions: Vec<String>,
    },
    Diagnostic {
        subject: String,
        #[serde(default)]
        details: BTreeMap<String, String>,
    },
    /// Request to warm the cache entry for `key`.
    Prefetch { key: String },
}

impl Payload {
    /// MessagePack encoding with field names, so the tagged variants decode.
    pub fn encode(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec_named(self).map_err(|e| CoreError::Serialize(e.to_string()))
    }

    /// Approximate in-memory footprint, measured as the encoded length.
    pub fn approx_size(&self) -> usize {
        self.encode().map(|b| b.len()).unwrap_or(0)
    }

    /// The embedded context summary, if this payload carries one.
    pub fn context(&self) -> Option<&ContextSummary> {
        match self {
            Payload::Context(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// Subject line for the domain variants.
    pub fn subject(&self) -> Option<&str> {
        match self {
            Payload::Analysis { subject, .. }
            | Payload::Prediction { subject, .. }
            | Payload::Validation { subject, .. }
            | Payload::Optimization { subject, .. }
            | Payload::Diagnostic { subject, .. } => Some(subject),
            Payload::Prefetch { key } => Some(key),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Empty
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<i64> for Payload {
    fn from(n: i64) -> Self {
        Payload::Number(n)
    }
}

impl From<ContextSummary> for Payload {
    fn from(ctx: ContextSummary) -> Self {
        Payload::Context(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_json_shape() {
        let json = serde_json::to_value(Payload::Prefetch { key: "pods/default".into() }).unwrap();
        assert_eq!(json["kind"], "prefetch");
        assert_eq!(json["data"]["key"], "pods/default");
    }

    #[test]
    fn approx_size_grows_with_content() {
        let small = Payload::Text("a".into());
        let large = Payload::Text("a".repeat(512));
        assert!(small.approx_size() > 0);
        assert!(large.approx_size() > small.approx_size());
    }

    #[test]
    fn msgpack_encoding_decodes_back() {
        let payload = Payload::Prediction {
            subject: "node/worker-3".into(),
            horizon_secs: 600,
            score: 0.82,
        };
        let bytes = payload.encode().unwrap();
        let decoded: Payload = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, payload);

        let context = Payload::Context(ContextSummary::new("default", "prod-eu").with_problem("oom", 1));
        let decoded: Payload = rmp_serde::from_slice(&context.encode().unwrap()).unwrap();
        assert_eq!(decoded, context);
    }

    #[test]
    fn context_accessor() {
        let ctx = ContextSummary::new("default", "prod-eu")
            .with_problem("crash_loop", 2)
            .with_problem("oom", 1);
        let payload = Payload::from(ctx.clone());
        assert_eq!(payload.context(), Some(&ctx));
        assert_eq!(ctx.total_problems(), 3);
        assert!(Payload::Number(4).context().is_none());
    }

    #[test]
    fn subject_for_domain_variants() {
        let p = Payload::Validation {
            subject: "deploy/api".into(),
            passed: false,
            messages: vec!["missing probe".into()],
        };
        assert_eq!(p.subject(), Some("deploy/api"));
        assert_eq!(Payload::Empty.subject(), None);
    }
}
