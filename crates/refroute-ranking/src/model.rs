use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrgRole {
    Sender,
    Receiver,
    Both,
}

impl OrgRole {
    pub fn can_receive(self) -> bool {
        matches!(self, Self::Receiver | Self::Both)
    }
}

/// One coverage area joined with its owning organization, as produced by the
/// coverage-lookup query. An organization may appear in several rows when it
/// claims multiple areas intersecting the same query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageRow {
    pub organization_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub org_type: String,
    pub role: OrgRole,
    #[serde(default)]
    pub contact_info: Value,
    #[serde(default)]
    pub zip_code: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub county: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

/// Aggregate referral history for one organization.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AcceptanceStats {
    pub total_referrals: u64,
    pub accepted_count: u64,
    pub completed_count: u64,
    pub recent_accepted: u64,
}

/// City/county/state resolved for a query ZIP code. Any field may be unknown;
/// a fully unknown area still allows exact-ZIP coverage matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZipArea {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub county: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageLevel {
    ZipCode,
    City,
    County,
    State,
}

impl CoverageLevel {
    pub fn label(self) -> &'static str {
        match self {
            Self::ZipCode => "zip code",
            Self::City => "city",
            Self::County => "county",
            Self::State => "state",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub org_type: String,
    #[serde(default)]
    pub contact_info: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CandidateAcceptance {
    pub acceptance_rate: f64,
    pub success_rate: f64,
    pub total_referrals: u64,
    pub recent_accepted: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub organization: OrganizationSummary,
    pub match_score: f64,
    pub coverage_level: CoverageLevel,
    pub acceptance_stats: CandidateAcceptance,
    pub reasons: Vec<String>,
}

/// The suggestion payload returned to callers. `total_found` counts candidates
/// before truncation to the top 10; `message` is set only when no coverage
/// rows matched the query at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionList {
    pub zip_code: String,
    pub organization_type: Option<String>,
    pub suggestions: Vec<ScoredCandidate>,
    pub total_found: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
