use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ConceptId = String;
pub type ResourceId = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConceptNode {
    pub id: ConceptId,
    pub name: String,
    pub difficulty: f64,
    #[serde(default)]
    pub mastery: f64,
    #[serde(default = "default_importance")]
    pub importance: f64,
    #[serde(default = "default_category")]
    pub category: String,
}

impl ConceptNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>, difficulty: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            difficulty: difficulty.clamp(0.0, 1.0),
            mastery: 0.0,
            importance: default_importance(),
            category: default_category(),
        }
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance.max(0.0);
        self
    }

    pub fn with_mastery(mut self, mastery: f64) -> Self {
        self.mastery = mastery.clamp(0.0, 1.0);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }
}

fn default_importance() -> f64 {
    1.0
}

fn default_category() -> String {
    "general".to_string()
}

/// Raw signals of a prerequisite edge, each in [0, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EdgeSignals {
    pub prerequisite_strength: f64,
    #[serde(default)]
    pub semantic_similarity: f64,
    #[serde(default)]
    pub temporal_correlation: f64,
}

impl EdgeSignals {
    pub fn new(prerequisite_strength: f64, semantic_similarity: f64, temporal_correlation: f64) -> Self {
        Self {
            prerequisite_strength,
            semantic_similarity,
            temporal_correlation,
        }
    }
}

impl Default for EdgeSignals {
    fn default() -> Self {
        Self::new(0.5, 0.0, 0.0)
    }
}

/// One recorded answer. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub concept_id: ConceptId,
    pub correct: bool,
    pub time_spent_secs: f64,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
    #[serde(default)]
    pub resource_id: Option<ResourceId>,
}

impl Attempt {
    pub fn new(concept_id: impl Into<String>, correct: bool, timestamp: i64) -> Self {
        Self {
            concept_id: concept_id.into(),
            correct,
            time_spent_secs: 60.0,
            confidence: default_confidence(),
            timestamp,
            resource_id: None,
        }
    }

    pub fn with_time_spent(mut self, secs: f64) -> Self {
        self.time_spent_secs = secs;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }
}

fn default_confidence() -> f64 {
    0.5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    #[default]
    Video,
    Article,
    Quiz,
    Interactive,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Article => "article",
            Self::Quiz => "quiz",
            Self::Interactive => "interactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "video" => Some(Self::Video),
            "article" | "text" | "reading" => Some(Self::Article),
            "quiz" => Some(Self::Quiz),
            "interactive" => Some(Self::Interactive),
            _ => None,
        }
    }

    pub const COUNT: usize = 4;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LearningStyle {
    #[default]
    Visual,
    Reading,
    Interactive,
    HandsOn,
}

impl LearningStyle {
    pub fn from_kind(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Video => Self::Visual,
            ResourceKind::Article => Self::Reading,
            ResourceKind::Quiz => Self::HandsOn,
            ResourceKind::Interactive => Self::Interactive,
        }
    }

    pub fn affinity(&self, kind: ResourceKind) -> f64 {
        use ResourceKind::*;
        match (self, kind) {
            (Self::Visual, Video) => 1.0,
            (Self::Visual, Interactive) => 0.7,
            (Self::Visual, Quiz) => 0.5,
            (Self::Visual, Article) => 0.3,
            (Self::Reading, Article) => 1.0,
            (Self::Reading, Quiz) => 0.7,
            (Self::Reading, Interactive) => 0.5,
            (Self::Reading, Video) => 0.4,
            (Self::Interactive, Interactive) => 1.0,
            (Self::Interactive, Quiz) => 0.9,
            (Self::Interactive, Video) => 0.6,
            (Self::Interactive, Article) => 0.3,
            (Self::HandsOn, Interactive) => 1.0,
            (Self::HandsOn, Quiz) => 0.8,
            (Self::HandsOn, Video) => 0.5,
            (Self::HandsOn, Article) => 0.3,
        }
    }
}

/// Content catalog entry. Bandit counters live in the shared reward store, not here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: ResourceId,
    pub concept_id: ConceptId,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default)]
    pub kind: ResourceKind,
    pub difficulty: f64,
    pub estimated_minutes: f64,
    #[serde(default = "default_engagement")]
    pub engagement_score: f64,
}

impl Resource {
    pub fn new(
        id: impl Into<String>,
        concept_id: impl Into<String>,
        kind: ResourceKind,
        difficulty: f64,
        estimated_minutes: f64,
    ) -> Self {
        Self {
            id: id.into(),
            concept_id: concept_id.into(),
            title: String::new(),
            kind,
            difficulty: difficulty.clamp(0.0, 1.0),
            estimated_minutes: estimated_minutes.max(0.0),
            engagement_score: default_engagement(),
        }
    }

    pub fn with_engagement(mut self, engagement: f64) -> Self {
        self.engagement_score = engagement.clamp(0.0, 1.0);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Low-difficulty stand-in used when a concept has no catalog entries.
    pub fn fallback(concept_id: &str, difficulty: f64, estimated_minutes: f64) -> Self {
        Self {
            id: format!("fallback:{concept_id}"),
            concept_id: concept_id.to_string(),
            title: format!("Introductory review: {concept_id}"),
            kind: ResourceKind::Article,
            difficulty: difficulty.clamp(0.0, 1.0),
            estimated_minutes,
            engagement_score: default_engagement(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.id.starts_with("fallback:")
    }
}

fn default_engagement() -> f64 {
    0.5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResourceRole {
    #[default]
    Core,
    Scaffold,
    Stretch,
    Substitute,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RankedResource {
    pub resource: Resource,
    pub bandit_score: f64,
    pub context_score: f64,
    pub score: f64,
    pub role: ResourceRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    #[default]
    Core,
    Remediation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepWarning {
    /// No catalog resource existed; a default low-difficulty resource was used.
    SubstitutedResource,
    /// An unmastered prerequisite did not fit in the budget.
    PrerequisiteNotScheduled,
}

/// Position of a step that was split into smaller parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSegment {
    pub index: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PathStep {
    pub concept_id: ConceptId,
    pub concept_name: String,
    pub kind: StepKind,
    pub current_mastery: f64,
    pub target_mastery: f64,
    pub difficulty: f64,
    pub resources: Vec<RankedResource>,
    pub estimated_minutes: f64,
    pub priority_score: f64,
    pub prerequisites_met: bool,
    #[serde(default)]
    pub segment: Option<StepSegment>,
    #[serde(default)]
    pub warnings: Vec<StepWarning>,
}

impl PathStep {
    pub fn primary_resource(&self) -> Option<&Resource> {
        self.resources.first().map(|r| &r.resource)
    }

    pub fn expected_gain(&self) -> f64 {
        (self.target_mastery - self.current_mastery).max(0.0)
    }

    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn is_substituted(&self) -> bool {
        self.warnings.contains(&StepWarning::SubstitutedResource)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdaptationState {
    #[default]
    OnTrack,
    Struggling,
    Excelling,
}

impl AdaptationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnTrack => "ON_TRACK",
            Self::Struggling => "STRUGGLING",
            Self::Excelling => "EXCELLING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PathStatus {
    #[default]
    InProgress,
    /// Every target concept is at or above the mastery threshold.
    Complete,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PathQuality {
    pub overall: f64,
    pub mastery_score: f64,
    pub time_efficiency: f64,
    pub diversity: f64,
    pub difficulty_smoothness: f64,
}

/// Immutable snapshot returned by every recommend/adapt call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LearningPath {
    pub id: Uuid,
    pub user_id: String,
    pub target_concepts: Vec<ConceptId>,
    pub steps: Vec<PathStep>,
    pub total_minutes: f64,
    pub budget_minutes: f64,
    pub estimated_mastery_gain: f64,
    pub status: PathStatus,
    pub adaptation: AdaptationState,
    pub degraded: bool,
    pub quality: PathQuality,
    pub generated_at: DateTime<Utc>,
}

impl LearningPath {
    pub fn concept_sequence(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.concept_id.as_str()).collect()
    }

    pub fn remediation_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.kind == StepKind::Remediation)
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.status == PathStatus::Complete
    }
}
