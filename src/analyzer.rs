//! Task analysis: classification, domains, entities and search queries

use crate::error::{Result, TailorError};
use crate::llm::{strip_json_fences, system_message, user_message, LlmClient};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Category of the user's task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Coding,
    Debugging,
    Research,
    Analysis,
    Other,
}

/// Estimated effort class of the task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Complexity {
    Low,
    Medium,
    High,
    Expert,
}

/// Fixed knowledge domain tags used for coverage reasoning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KnowledgeDomain {
    Frontend,
    Backend,
    Database,
    Devops,
    Security,
    Testing,
    Design,
    Architecture,
    Documentation,
    Business,
    DataScience,
    General,
}

impl KnowledgeDomain {
    pub const ALL: [KnowledgeDomain; 12] = [
        Self::Frontend,
        Self::Backend,
        Self::Database,
        Self::Devops,
        Self::Security,
        Self::Testing,
        Self::Design,
        Self::Architecture,
        Self::Documentation,
        Self::Business,
        Self::DataScience,
        Self::General,
    ];

    /// Fixed keyword lexicon for this domain, lowercased
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Self::Frontend => &[
                "react", "vue", "angular", "css", "html", "dom", "component", "ui", "browser",
                "frontend", "javascript", "typescript",
            ],
            Self::Backend => &[
                "api", "endpoint", "server", "route", "express", "middleware", "backend", "rest",
                "http", "request", "response", "controller",
            ],
            Self::Database => &[
                "sql", "database", "query", "table", "index", "postgres", "sqlite", "mysql",
                "schema", "migration", "orm", "transaction",
            ],
            Self::Devops => &[
                "docker", "kubernetes", "deploy", "ci", "cd", "pipeline", "terraform", "aws",
                "cloud", "container", "infrastructure", "devops",
            ],
            Self::Security => &[
                "auth", "authentication", "authorization", "token", "password", "encryption",
                "hash", "bcrypt", "argon2", "oauth", "jwt", "security", "vulnerability",
            ],
            Self::Testing => &[
                "test", "unit", "integration", "mock", "assert", "coverage", "jest", "pytest",
                "fixture", "e2e",
            ],
            Self::Design => &[
                "design", "ux", "layout", "wireframe", "figma", "accessibility", "typography",
            ],
            Self::Architecture => &[
                "architecture", "microservice", "monolith", "pattern", "scalability", "event",
                "queue", "message", "distributed", "modular",
            ],
            Self::Documentation => &[
                "documentation", "readme", "docs", "comment", "changelog", "guide", "tutorial",
            ],
            Self::Business => &[
                "requirement", "stakeholder", "roadmap", "budget", "cost", "pricing", "customer",
            ],
            Self::DataScience => &[
                "model", "training", "dataset", "pandas", "numpy", "machine learning", "embedding",
                "neural", "statistics", "analytics",
            ],
            Self::General => &[],
        }
    }
}

/// Result of analyzing a task input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAnalysis {
    pub task_type: TaskType,
    pub complexity: Complexity,
    pub domains: Vec<KnowledgeDomain>,
    pub key_entities: Vec<String>,
    /// Between 1 and 5 queries, most relevant first
    pub suggested_search_queries: Vec<String>,
    pub estimated_token_budget: usize,
    /// Confidence in this analysis, in [0,1]
    pub confidence: f32,
}

/// Shape expected back from the LLM
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LlmAnalysis {
    task_type: TaskType,
    complexity: Complexity,
    #[serde(default)]
    domains: Vec<KnowledgeDomain>,
    #[serde(default)]
    key_entities: Vec<String>,
    #[serde(default)]
    suggested_search_queries: Vec<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

const ANALYSIS_PROMPT: &str = "You classify developer tasks for a retrieval system. \
Respond with only a JSON object with keys: taskType (CODING|DEBUGGING|RESEARCH|ANALYSIS|OTHER), \
complexity (LOW|MEDIUM|HIGH|EXPERT), domains (array of FRONTEND|BACKEND|DATABASE|DEVOPS|SECURITY|\
TESTING|DESIGN|ARCHITECTURE|DOCUMENTATION|BUSINESS|DATA_SCIENCE|GENERAL), keyEntities (array of \
strings), suggestedSearchQueries (1 to 5 strings), confidence (0 to 1).";

/// Classifies tasks with an LLM when available, falling back to a
/// deterministic rule-based classifier
pub struct TaskAnalyzer {
    llm: Option<Arc<dyn LlmClient>>,
}

impl TaskAnalyzer {
    pub fn new(llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self { llm }
    }

    /// Analyze a task, cascading LLM to rule-based to minimal fallback;
    /// never fails, the worst case is the minimal fallback
    pub async fn analyze(&self, task: &str) -> TaskAnalysis {
        if let Some(llm) = &self.llm {
            match self.analyze_with_llm(llm.as_ref(), task).await {
                Ok(analysis) => return analysis,
                Err(e) => {
                    warn!(error = %e, "LLM analysis failed, using rule-based classifier");
                }
            }
        }
        self.analyze_rule_based(task)
    }

    async fn analyze_with_llm(&self, llm: &dyn LlmClient, task: &str) -> Result<TaskAnalysis> {
        let messages = vec![system_message(ANALYSIS_PROMPT), user_message(task)];
        let response = llm.generate(&messages).await?;
        let parsed: LlmAnalysis = serde_json::from_str(strip_json_fences(&response.text))?;

        let mut queries: Vec<String> = parsed
            .suggested_search_queries
            .into_iter()
            .filter(|q| !q.trim().is_empty())
            .take(5)
            .collect();
        if queries.is_empty() {
            queries.push(truncate_task(task));
        }

        let complexity = parsed.complexity;
        Ok(TaskAnalysis {
            task_type: parsed.task_type,
            complexity,
            domains: dedup_domains(parsed.domains),
            key_entities: parsed.key_entities.into_iter().take(10).collect(),
            suggested_search_queries: queries,
            estimated_token_budget: budget_for(complexity),
            confidence: parsed.confidence.unwrap_or(0.8).clamp(0.0, 1.0),
        })
    }

    /// Deterministic classifier used when no LLM is reachable; drops to the
    /// minimal fallback when even rule-based analysis cannot proceed
    pub fn analyze_rule_based(&self, task: &str) -> TaskAnalysis {
        match self.try_rule_based(task) {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(error = %e, "rule-based analysis failed, using minimal fallback");
                Self::fallback_analysis(task)
            }
        }
    }

    fn try_rule_based(&self, task: &str) -> Result<TaskAnalysis> {
        if task.trim().is_empty() {
            return Err(TailorError::Validation(
                "task has no analyzable content".to_string(),
            ));
        }

        let lower = task.to_lowercase();

        let task_type = classify_task_type(&lower);
        let domains = detect_domains(&lower);
        let key_entities = extract_entities(task);
        let complexity = classify_complexity(task, &domains);

        let mut queries = vec![truncate_task(task)];
        for entity in key_entities.iter().take(4) {
            let query = match domains.first() {
                Some(domain) if !domain.keywords().is_empty() => {
                    format!("{} {}", entity, domain.keywords()[0])
                }
                _ => entity.clone(),
            };
            if !queries.contains(&query) {
                queries.push(query);
            }
            if queries.len() == 5 {
                break;
            }
        }
        queries.retain(|q| !q.is_empty());
        if queries.is_empty() {
            return Err(TailorError::Validation(
                "no usable search query derived from the task".to_string(),
            ));
        }

        debug!(?task_type, ?complexity, domains = domains.len(), "rule-based analysis");

        Ok(TaskAnalysis {
            task_type,
            complexity,
            domains,
            key_entities,
            suggested_search_queries: queries,
            estimated_token_budget: budget_for(complexity),
            confidence: 0.6,
        })
    }

    /// Minimal analysis keeping the pipeline operable after total failure
    pub fn fallback_analysis(task: &str) -> TaskAnalysis {
        TaskAnalysis {
            task_type: TaskType::Other,
            complexity: Complexity::Medium,
            domains: vec![KnowledgeDomain::General],
            key_entities: Vec::new(),
            suggested_search_queries: vec![truncate_task(task)],
            estimated_token_budget: budget_for(Complexity::Medium),
            confidence: 0.1,
        }
    }
}

fn classify_task_type(lower: &str) -> TaskType {
    const DEBUG_MARKERS: &[&str] = &[
        "debug", "error", "fix", "crash", "broken", "fails", "failing", "exception", "stack trace",
    ];
    const CODING_MARKERS: &[&str] = &[
        "implement", "write", "add", "create", "build", "refactor", "endpoint", "function",
        "class", "method", "code",
    ];
    const RESEARCH_MARKERS: &[&str] = &[
        "compare", "vs", "versus", "research", "which", "alternative", "best practice",
        "trade-off", "tradeoff",
    ];
    const ANALYSIS_MARKERS: &[&str] = &["analyze", "analyse", "review", "evaluate", "assess", "audit"];

    if DEBUG_MARKERS.iter().any(|m| lower.contains(m)) {
        TaskType::Debugging
    } else if CODING_MARKERS.iter().any(|m| lower.contains(m)) {
        TaskType::Coding
    } else if RESEARCH_MARKERS.iter().any(|m| lower.contains(m)) {
        TaskType::Research
    } else if ANALYSIS_MARKERS.iter().any(|m| lower.contains(m)) {
        TaskType::Analysis
    } else {
        TaskType::Other
    }
}

fn detect_domains(lower: &str) -> Vec<KnowledgeDomain> {
    let mut domains: Vec<KnowledgeDomain> = KnowledgeDomain::ALL
        .iter()
        .filter(|d| d.keywords().iter().any(|k| lower.contains(k)))
        .copied()
        .collect();
    if domains.is_empty() {
        domains.push(KnowledgeDomain::General);
    }
    domains
}

fn classify_complexity(task: &str, domains: &[KnowledgeDomain]) -> Complexity {
    let words = task.split_whitespace().count();
    match (words, domains.len()) {
        (w, d) if w > 80 || d >= 4 => Complexity::Expert,
        (w, d) if w > 40 || d == 3 => Complexity::High,
        (w, d) if w > 12 || d == 2 => Complexity::Medium,
        _ => Complexity::Low,
    }
}

/// Extract identifier-like and proper-noun entities from the raw task text
fn extract_entities(task: &str) -> Vec<String> {
    // Backtick spans, dotted/colon identifiers, and CapitalizedWords
    let patterns = [
        r"`([^`]+)`",
        r"\b([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)+)\b",
        r"\b([A-Z][a-z0-9]+(?:[A-Z][a-z0-9]+)*)\b",
    ];

    let mut entities: Vec<String> = Vec::new();
    for pattern in patterns {
        let re = Regex::new(pattern).expect("static entity pattern");
        for cap in re.captures_iter(task) {
            if let Some(m) = cap.get(1) {
                let entity = m.as_str().to_string();
                if entity.len() >= 3 && !entities.contains(&entity) {
                    entities.push(entity);
                }
            }
        }
    }
    entities.truncate(10);
    entities
}

fn dedup_domains(domains: Vec<KnowledgeDomain>) -> Vec<KnowledgeDomain> {
    let mut out = Vec::new();
    for domain in domains {
        if !out.contains(&domain) {
            out.push(domain);
        }
    }
    if out.is_empty() {
        out.push(KnowledgeDomain::General);
    }
    out
}

fn budget_for(complexity: Complexity) -> usize {
    match complexity {
        Complexity::Low => 2000,
        Complexity::Medium => 4000,
        Complexity::High => 8000,
        Complexity::Expert => 12000,
    }
}

fn truncate_task(task: &str) -> String {
    task.chars().take(200).collect::<String>().trim().to_string()
}
