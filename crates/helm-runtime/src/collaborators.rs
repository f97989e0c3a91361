//! External collaborator seams.
//!
//! The runtime never talks to classifiers, routing tables, or fact
//! stores directly; it goes through these traits so deployments can wire
//! real services and tests can substitute in-memory stand-ins. All
//! failures surface as `anyhow::Error` and map to the
//! `collaborator_failed` dispatch error code.

use async_trait::async_trait;
use helm_core::facts::Fact;
use serde::{Deserialize, Serialize};

use crate::types::DispatchRole;

// ── complexity classification ──

/// Coarse task-complexity buckets used for routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    /// Single obvious change.
    Trivial,
    /// Typical bounded task.
    Standard,
    /// Multi-file or design-heavy work.
    Complex,
}

impl ComplexityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityLevel::Trivial => "trivial",
            ComplexityLevel::Standard => "standard",
            ComplexityLevel::Complex => "complex",
        }
    }
}

/// What the classifier gets to look at.
#[derive(Debug, Clone)]
pub struct ClassifyRequest {
    /// Ledger-derived task description.
    pub task_description: String,
    /// Task being classified.
    pub task_id: String,
    /// Spec the task belongs to.
    pub spec_name: String,
}

/// Classifier verdict, seeded into the run's snapshot facts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    /// Assigned complexity bucket.
    pub level: ComplexityLevel,
    /// In `[0, 1]`.
    pub confidence: f64,
    /// Signals that drove the decision.
    pub features: Vec<String>,
    /// Identifier of the classifier that produced this.
    pub classifier_id: String,
}

/// Assigns a complexity level to a task before routing.
#[async_trait]
pub trait TaskComplexityClassifier: Send + Sync {
    /// Classify one task.
    async fn classify(&self, request: ClassifyRequest) -> anyhow::Result<Classification>;
}

// ── routing ──

/// Provider/CLI pair a dispatch is routed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Model provider identifier.
    pub provider: String,
    /// CLI binary used to drive the agent.
    pub cli: String,
}

/// Maps a complexity level and role to a provider/CLI route.
#[async_trait]
pub trait RoutingTable: Send + Sync {
    /// Resolve the route for one dispatch.
    async fn resolve(&self, level: ComplexityLevel, role: DispatchRole) -> anyhow::Result<Route>;
}

/// Per-role CLI override, consulted after the routing table. `None`
/// keeps the routed CLI.
pub trait CliOverrideResolver: Send + Sync {
    /// CLI to use instead of the routed one, if any.
    fn resolve(&self, role: DispatchRole, level: ComplexityLevel) -> Option<String>;
}

// ── session facts ──

/// Bounds for a session-fact retrieval.
#[derive(Debug, Clone)]
pub struct RetrieveQuery {
    /// Task description, usable for relevance ranking.
    pub task_description: String,
    /// Task being compiled for.
    pub task_id: String,
    /// Maximum facts to return.
    pub max_facts: usize,
    /// Token budget across returned fact values.
    pub max_tokens: u32,
    /// Characters per estimated token.
    pub chars_per_token: u32,
}

/// Durable store for facts extracted across a session.
#[async_trait]
pub trait SessionFactStore: Send + Sync {
    /// Persist a batch of facts, merging by key.
    async fn add(&self, facts: Vec<Fact>) -> anyhow::Result<()>;
}

/// Derives durable session facts from a validated agent result.
pub trait FactExtractor: Send + Sync {
    /// Facts worth keeping from an implementer result.
    fn extract_from_implementer(
        &self,
        result: &crate::contract::ImplementerResult,
        task_id: &str,
    ) -> Vec<Fact>;

    /// Facts worth keeping from a reviewer result.
    fn extract_from_reviewer(
        &self,
        result: &crate::contract::ReviewerResult,
        task_id: &str,
    ) -> Vec<Fact>;
}

/// Pulls session facts relevant to the task being compiled.
#[async_trait]
pub trait FactRetriever: Send + Sync {
    /// Retrieve facts within the query's count and token bounds.
    async fn retrieve(&self, query: RetrieveQuery) -> anyhow::Result<Vec<Fact>>;
}

// ── default in-process implementations ──

/// Length-based classifier used when no external classifier is wired.
#[derive(Debug, Default)]
pub struct HeuristicClassifier;

#[async_trait]
impl TaskComplexityClassifier for HeuristicClassifier {
    async fn classify(&self, request: ClassifyRequest) -> anyhow::Result<Classification> {
        let words = request.task_description.split_whitespace().count();
        let (level, confidence) = match words {
            0..=40 => (ComplexityLevel::Trivial, 0.6),
            41..=240 => (ComplexityLevel::Standard, 0.7),
            _ => (ComplexityLevel::Complex, 0.8),
        };
        Ok(Classification {
            level,
            confidence,
            features: vec![format!("word_count:{words}")],
            classifier_id: "heuristic.v1".into(),
        })
    }
}

/// Fixed single-provider routing.
#[derive(Debug, Clone)]
pub struct StaticRoutingTable {
    /// Route returned for every dispatch.
    pub route: Route,
}

impl Default for StaticRoutingTable {
    fn default() -> Self {
        Self {
            route: Route {
                provider: "default".into(),
                cli: "agent".into(),
            },
        }
    }
}

#[async_trait]
impl RoutingTable for StaticRoutingTable {
    async fn resolve(&self, _level: ComplexityLevel, _role: DispatchRole) -> anyhow::Result<Route> {
        Ok(self.route.clone())
    }
}

/// Resolver that never overrides.
#[derive(Debug, Default)]
pub struct NoCliOverrides;

impl CliOverrideResolver for NoCliOverrides {
    fn resolve(&self, _role: DispatchRole, _level: ComplexityLevel) -> Option<String> {
        None
    }
}

/// Keeps facts in memory, capped retrieval by count and token budget.
#[derive(Debug, Default)]
pub struct MemoryFactStore {
    facts: parking_lot::RwLock<Vec<Fact>>,
}

impl MemoryFactStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored facts.
    pub fn len(&self) -> usize {
        self.facts.read().len()
    }

    /// Whether the store holds no facts.
    pub fn is_empty(&self) -> bool {
        self.facts.read().is_empty()
    }
}

#[async_trait]
impl SessionFactStore for MemoryFactStore {
    async fn add(&self, facts: Vec<Fact>) -> anyhow::Result<()> {
        helm_core::facts::merge_facts(&mut self.facts.write(), facts);
        Ok(())
    }
}

#[async_trait]
impl FactRetriever for MemoryFactStore {
    async fn retrieve(&self, query: RetrieveQuery) -> anyhow::Result<Vec<Fact>> {
        let facts = self.facts.read();
        let mut out = Vec::new();
        let mut spent_tokens = 0u32;
        for fact in facts.iter() {
            if out.len() == query.max_facts {
                break;
            }
            let cost = helm_core::tokens::estimate_tokens(&fact.value, query.chars_per_token);
            if spent_tokens + cost > query.max_tokens {
                break;
            }
            spent_tokens += cost;
            out.push(fact.clone());
        }
        Ok(out)
    }
}

/// Turns results into prefixed summary facts.
#[derive(Debug, Default)]
pub struct ResultFactExtractor;

impl FactExtractor for ResultFactExtractor {
    fn extract_from_implementer(
        &self,
        result: &crate::contract::ImplementerResult,
        task_id: &str,
    ) -> Vec<Fact> {
        let mut facts = vec![
            Fact::new(
                format!("result:{task_id}:implementer_status"),
                result.status.as_str(),
            ),
            Fact::new(format!("result:{task_id}:implementer_summary"), &result.summary),
        ];
        if !result.files_changed.is_empty() {
            facts.push(Fact::new(
                format!("result:{task_id}:files_changed"),
                result.files_changed.join(","),
            ));
        }
        facts
    }

    fn extract_from_reviewer(
        &self,
        result: &crate::contract::ReviewerResult,
        task_id: &str,
    ) -> Vec<Fact> {
        vec![
            Fact::new(
                format!("result:{task_id}:reviewer_assessment"),
                result.assessment.as_str(),
            ),
            Fact::new(
                format!("result:{task_id}:reviewer_issue_count"),
                result.issues.len().to_string(),
            ),
        ]
    }
}

// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn heuristic_classifier_scales_with_length() {
        let classifier = HeuristicClassifier;
        let short = classifier
            .classify(ClassifyRequest {
                task_description: "rename one function".into(),
                task_id: "T-1".into(),
                spec_name: "demo".into(),
            })
            .await
            .unwrap();
        assert_eq!(short.level, ComplexityLevel::Trivial);

        let long = classifier
            .classify(ClassifyRequest {
                task_description: "word ".repeat(500),
                task_id: "T-2".into(),
                spec_name: "demo".into(),
            })
            .await
            .unwrap();
        assert_eq!(long.level, ComplexityLevel::Complex);
    }

    #[tokio::test]
    async fn memory_store_respects_retrieval_budgets() {
        let store = MemoryFactStore::new();
        store
            .add(vec![
                Fact::new("a", "x".repeat(40)),
                Fact::new("b", "y".repeat(40)),
                Fact::new("c", "z".repeat(40)),
            ])
            .await
            .unwrap();

        let facts = store
            .retrieve(RetrieveQuery {
                task_description: String::new(),
                task_id: "T-1".into(),
                max_facts: 10,
                max_tokens: 20, // each value costs 10 tokens
                chars_per_token: 4,
            })
            .await
            .unwrap();
        assert_eq!(facts.len(), 2);
    }

    #[test]
    fn extractor_emits_issue_count_fact() {
        let result = crate::contract::ReviewerResult {
            task_id: "T-7".into(),
            assessment: crate::contract::ReviewerAssessment::NeedsChanges,
            summary: "two problems".into(),
            issues: vec![
                crate::contract::ReviewIssue {
                    severity: "major".into(),
                    message: "m1".into(),
                    file: None,
                },
                crate::contract::ReviewIssue {
                    severity: "minor".into(),
                    message: "m2".into(),
                    file: None,
                },
            ],
            required_fixes: vec![],
        };
        let facts = ResultFactExtractor.extract_from_reviewer(&result, "T-7");
        let count = helm_core::facts::fact_value(&facts, "result:T-7:reviewer_issue_count");
        assert_eq!(count, Some("2"));
    }
}
