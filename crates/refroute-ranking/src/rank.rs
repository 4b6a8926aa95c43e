use std::cmp::Ordering;
use std::collections::HashMap;

use crate::model::{
    AcceptanceStats, CandidateAcceptance, CoverageLevel, CoverageRow, OrganizationSummary,
    ScoredCandidate, SuggestionList, ZipArea,
};

const MAX_SUGGESTIONS: usize = 10;
const NO_COVERAGE_MESSAGE: &str = "No organizations found covering this area";

const ZIP_SCORE: f64 = 40.0;
const CITY_SCORE: f64 = 30.0;
const COUNTY_SCORE: f64 = 20.0;
const STATE_SCORE: f64 = 10.0;
const ACCEPTANCE_WEIGHT: f64 = 30.0;
const TYPE_MATCH_BONUS: f64 = 20.0;
const RECENT_BONUS_CAP: f64 = 10.0;

/// Inputs identifying one suggestion request.
#[derive(Debug, Clone)]
pub struct SuggestRequest<'a> {
    pub zip_code: &'a str,
    pub area: &'a ZipArea,
    pub organization_type: Option<&'a str>,
    pub sender_org_id: Option<&'a str>,
}

/// Scores and orders candidate receiver organizations.
///
/// Deterministic and side-effect free: the output depends only on the coverage
/// rows, the acceptance aggregates, and the request. Rows for organizations
/// that cannot receive, that belong to the requesting sender, or that fail the
/// type filter are skipped; remaining rows are reduced to one best-tier row
/// per organization before scoring.
pub fn rank_candidates(
    rows: &[CoverageRow],
    stats: &HashMap<String, AcceptanceStats>,
    request: &SuggestRequest<'_>,
) -> SuggestionList {
    let mut best: HashMap<&str, (&CoverageRow, CoverageLevel, f64)> = HashMap::new();
    for row in rows {
        if !row.role.can_receive() {
            continue;
        }
        if request.sender_org_id == Some(row.organization_id.as_str()) {
            continue;
        }
        if let Some(wanted) = request.organization_type {
            if row.org_type != wanted {
                continue;
            }
        }
        let (level, score) = coverage_match(row, request.zip_code, request.area)
            .unwrap_or((CoverageLevel::State, 0.0));
        let keep = match best.get(row.organization_id.as_str()) {
            Some((_, _, kept)) => score > *kept,
            None => true,
        };
        if keep {
            best.insert(row.organization_id.as_str(), (row, level, score));
        }
    }

    if best.is_empty() {
        return SuggestionList {
            zip_code: request.zip_code.to_string(),
            organization_type: request.organization_type.map(ToString::to_string),
            suggestions: Vec::new(),
            total_found: 0,
            message: Some(NO_COVERAGE_MESSAGE.to_string()),
        };
    }

    let mut suggestions = best
        .into_values()
        .map(|(row, level, coverage_score)| {
            score_candidate(row, level, coverage_score, stats, request)
        })
        .collect::<Vec<_>>();

    suggestions.sort_by(|a, b| {
        b.match_score
            .partial_cmp(&a.match_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.organization.name.cmp(&b.organization.name))
    });

    let total_found = suggestions.len();
    suggestions.truncate(MAX_SUGGESTIONS);

    SuggestionList {
        zip_code: request.zip_code.to_string(),
        organization_type: request.organization_type.map(ToString::to_string),
        suggestions,
        total_found,
        message: None,
    }
}

/// Finest granularity at which a coverage row matches the query geography.
/// Tiers are exclusive: a ZIP-level match never also earns city, county, or
/// state points.
fn coverage_match(row: &CoverageRow, zip: &str, area: &ZipArea) -> Option<(CoverageLevel, f64)> {
    if row.zip_code.as_deref() == Some(zip) {
        return Some((CoverageLevel::ZipCode, ZIP_SCORE));
    }
    if field_matches(row.city.as_deref(), area.city.as_deref()) {
        return Some((CoverageLevel::City, CITY_SCORE));
    }
    if field_matches(row.county.as_deref(), area.county.as_deref()) {
        return Some((CoverageLevel::County, COUNTY_SCORE));
    }
    if field_matches(row.state.as_deref(), area.state.as_deref()) {
        return Some((CoverageLevel::State, STATE_SCORE));
    }
    None
}

fn field_matches(row_value: Option<&str>, area_value: Option<&str>) -> bool {
    matches!((row_value, area_value), (Some(a), Some(b)) if a == b)
}

fn score_candidate(
    row: &CoverageRow,
    level: CoverageLevel,
    coverage_score: f64,
    stats: &HashMap<String, AcceptanceStats>,
    request: &SuggestRequest<'_>,
) -> ScoredCandidate {
    let acceptance = stats
        .get(&row.organization_id)
        .copied()
        .unwrap_or_default();
    let total = acceptance.total_referrals;
    let acceptance_rate = if total > 0 {
        acceptance.accepted_count as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    let success_rate = if total > 0 {
        (acceptance.accepted_count + acceptance.completed_count) as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    let recent_bonus = (acceptance.recent_accepted as f64 * 2.0).min(RECENT_BONUS_CAP);
    let type_matched = request.organization_type == Some(row.org_type.as_str());

    let mut match_score = coverage_score + acceptance_rate / 100.0 * ACCEPTANCE_WEIGHT;
    if type_matched {
        match_score += TYPE_MATCH_BONUS;
    }
    match_score += recent_bonus;

    let mut reasons = vec![format!(
        "Covers {} at {} level",
        request.zip_code,
        level.label()
    )];
    if total > 0 {
        reasons.push(format!(
            "{acceptance_rate:.1}% acceptance rate ({total} total referrals)"
        ));
    } else {
        reasons.push("No referral history".to_string());
    }
    if type_matched {
        if let Some(wanted) = request.organization_type {
            reasons.push(format!("Matches requested type: {wanted}"));
        }
    }
    if acceptance.recent_accepted > 0 {
        reasons.push(format!(
            "{} recent accepted referrals",
            acceptance.recent_accepted
        ));
    }

    ScoredCandidate {
        organization: OrganizationSummary {
            id: row.organization_id.clone(),
            name: row.name.clone(),
            org_type: row.org_type.clone(),
            contact_info: row.contact_info.clone(),
        },
        match_score: round1(match_score),
        coverage_level: level,
        acceptance_stats: CandidateAcceptance {
            acceptance_rate: round1(acceptance_rate),
            success_rate: round1(success_rate),
            total_referrals: total,
            recent_accepted: acceptance.recent_accepted,
        },
        reasons,
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
