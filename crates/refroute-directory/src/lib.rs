use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use refroute_ranking::{AcceptanceStats, CoverageRow, OrgRole, ZipArea};

const RECENT_WINDOW_MS: u64 = 30 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub org_type: String,
    pub role: OrgRole,
    #[serde(default)]
    pub contact_info: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageAreaRecord {
    pub organization_id: String,
    #[serde(default)]
    pub zip_code: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub county: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralStatus {
    Pending,
    Accepted,
    Rejected,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralRecord {
    pub receiver_org_id: String,
    pub status: ReferralStatus,
    pub created_ms: u64,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DirectoryData {
    #[serde(default)]
    pub organizations: Vec<OrganizationRecord>,
    #[serde(default)]
    pub coverage_areas: Vec<CoverageAreaRecord>,
    #[serde(default)]
    pub referrals: Vec<ReferralRecord>,
}

/// Parameters of one coverage lookup. Mirrors the filters of the upstream
/// coverage query: match at any geographic level, restrict to organizations
/// that can receive, optionally exclude the sender and filter by type.
#[derive(Debug, Clone)]
pub struct CoverageQuery<'a> {
    pub zip_code: &'a str,
    pub area: &'a ZipArea,
    pub exclude_org_id: Option<&'a str>,
    pub organization_type: Option<&'a str>,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Read-only query capabilities the ranking tool consumes.
pub trait ReferralDirectory: Send + Sync {
    /// Resolves a ZIP code to its city/county/state via one representative
    /// coverage row. `None` when the ZIP has no known geography.
    fn resolve_zip(&self, zip: &str) -> Result<Option<ZipArea>, DirectoryError>;

    /// All coverage rows intersecting the query geography, one row per
    /// matching coverage area, ordered by organization name ascending.
    fn coverage_lookup(&self, query: &CoverageQuery<'_>)
        -> Result<Vec<CoverageRow>, DirectoryError>;

    /// Aggregate referral history keyed by organization id, restricted to the
    /// given ids. Organizations without history are absent from the map.
    fn acceptance_lookup(
        &self,
        org_ids: &[String],
    ) -> Result<HashMap<String, AcceptanceStats>, DirectoryError>;
}

/// Directory backed by a single JSON document of organizations, coverage
/// areas, and referral history.
pub struct JsonDirectory {
    organizations: HashMap<String, OrganizationRecord>,
    coverage_areas: Vec<CoverageAreaRecord>,
    referrals: Vec<ReferralRecord>,
}

impl JsonDirectory {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let bytes = fs::read(path.as_ref())?;
        let data: DirectoryData = serde_json::from_slice(&bytes)?;
        Ok(Self::from_data(data))
    }

    pub fn from_data(data: DirectoryData) -> Self {
        let organizations = data
            .organizations
            .into_iter()
            .map(|org| (org.id.clone(), org))
            .collect();
        Self {
            organizations,
            coverage_areas: data.coverage_areas,
            referrals: data.referrals,
        }
    }

    pub fn organization_count(&self) -> usize {
        self.organizations.len()
    }

    fn area_matches(area: &CoverageAreaRecord, query: &CoverageQuery<'_>) -> bool {
        if area.zip_code.as_deref() == Some(query.zip_code) {
            return true;
        }
        let geo = query.area;
        option_eq(area.city.as_deref(), geo.city.as_deref())
            || option_eq(area.county.as_deref(), geo.county.as_deref())
            || option_eq(area.state.as_deref(), geo.state.as_deref())
    }
}

fn option_eq(a: Option<&str>, b: Option<&str>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a == b)
}

impl ReferralDirectory for JsonDirectory {
    fn resolve_zip(&self, zip: &str) -> Result<Option<ZipArea>, DirectoryError> {
        if zip.trim().is_empty() {
            return Err(DirectoryError::InvalidInput(
                "zip code must be non-empty".to_string(),
            ));
        }
        let area = self
            .coverage_areas
            .iter()
            .find(|area| area.zip_code.as_deref() == Some(zip))
            .map(|area| ZipArea {
                city: area.city.clone(),
                county: area.county.clone(),
                state: area.state.clone(),
            });
        Ok(area)
    }

    fn coverage_lookup(
        &self,
        query: &CoverageQuery<'_>,
    ) -> Result<Vec<CoverageRow>, DirectoryError> {
        let mut rows = Vec::new();
        for area in &self.coverage_areas {
            if !Self::area_matches(area, query) {
                continue;
            }
            let Some(org) = self.organizations.get(&area.organization_id) else {
                continue;
            };
            if !org.role.can_receive() {
                continue;
            }
            if query.exclude_org_id == Some(org.id.as_str()) {
                continue;
            }
            if let Some(wanted) = query.organization_type {
                if org.org_type != wanted {
                    continue;
                }
            }
            rows.push(CoverageRow {
                organization_id: org.id.clone(),
                name: org.name.clone(),
                org_type: org.org_type.clone(),
                role: org.role,
                contact_info: org.contact_info.clone(),
                zip_code: area.zip_code.clone(),
                city: area.city.clone(),
                county: area.county.clone(),
                state: area.state.clone(),
            });
        }
        rows.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.organization_id.cmp(&b.organization_id))
        });
        Ok(rows)
    }

    fn acceptance_lookup(
        &self,
        org_ids: &[String],
    ) -> Result<HashMap<String, AcceptanceStats>, DirectoryError> {
        let now = now_ms();
        let recent_cutoff = now.saturating_sub(RECENT_WINDOW_MS);
        let mut stats: HashMap<String, AcceptanceStats> = HashMap::new();
        for referral in &self.referrals {
            if !org_ids.contains(&referral.receiver_org_id) {
                continue;
            }
            let entry = stats.entry(referral.receiver_org_id.clone()).or_default();
            entry.total_referrals += 1;
            match referral.status {
                ReferralStatus::Accepted => {
                    entry.accepted_count += 1;
                    if referral.created_ms > recent_cutoff {
                        entry.recent_accepted += 1;
                    }
                }
                ReferralStatus::Completed => entry.completed_count += 1,
                ReferralStatus::Pending | ReferralStatus::Rejected => {}
            }
        }
        Ok(stats)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org(id: &str, name: &str, org_type: &str, role: OrgRole) -> OrganizationRecord {
        OrganizationRecord {
            id: id.to_string(),
            name: name.to_string(),
            org_type: org_type.to_string(),
            role,
            contact_info: Value::Null,
        }
    }

    fn area(
        org_id: &str,
        zip: Option<&str>,
        city: Option<&str>,
        county: Option<&str>,
        state: Option<&str>,
    ) -> CoverageAreaRecord {
        CoverageAreaRecord {
            organization_id: org_id.to_string(),
            zip_code: zip.map(ToString::to_string),
            city: city.map(ToString::to_string),
            county: county.map(ToString::to_string),
            state: state.map(ToString::to_string),
        }
    }

    fn sample_directory() -> JsonDirectory {
        let now = now_ms();
        JsonDirectory::from_data(DirectoryData {
            organizations: vec![
                org("org-a", "Alpha Clinic", "clinic", OrgRole::Receiver),
                org("org-b", "Beta Pharmacy", "pharmacy", OrgRole::Both),
                org("org-s", "Sender Practice", "clinic", OrgRole::Sender),
            ],
            coverage_areas: vec![
                area(
                    "org-a",
                    Some("90210"),
                    Some("Beverly Hills"),
                    Some("Los Angeles"),
                    Some("CA"),
                ),
                area("org-b", None, Some("Beverly Hills"), None, None),
                area("org-s", Some("90210"), None, None, None),
            ],
            referrals: vec![
                ReferralRecord {
                    receiver_org_id: "org-a".to_string(),
                    status: ReferralStatus::Accepted,
                    created_ms: now.saturating_sub(1_000),
                },
                ReferralRecord {
                    receiver_org_id: "org-a".to_string(),
                    status: ReferralStatus::Accepted,
                    created_ms: now.saturating_sub(RECENT_WINDOW_MS + 60_000),
                },
                ReferralRecord {
                    receiver_org_id: "org-a".to_string(),
                    status: ReferralStatus::Rejected,
                    created_ms: now.saturating_sub(2_000),
                },
                ReferralRecord {
                    receiver_org_id: "org-b".to_string(),
                    status: ReferralStatus::Completed,
                    created_ms: now.saturating_sub(3_000),
                },
            ],
        })
    }

    #[test]
    fn resolve_zip_uses_first_matching_coverage_row() {
        let dir = sample_directory();
        let resolved = dir.resolve_zip("90210").expect("resolve");
        assert_eq!(
            resolved,
            Some(ZipArea {
                city: Some("Beverly Hills".to_string()),
                county: Some("Los Angeles".to_string()),
                state: Some("CA".to_string()),
            })
        );
        assert_eq!(dir.resolve_zip("00000").expect("resolve"), None);
    }

    #[test]
    fn coverage_lookup_matches_any_level_and_filters_roles() {
        let dir = sample_directory();
        let resolved = dir.resolve_zip("90210").expect("resolve").expect("area");
        let rows = dir
            .coverage_lookup(&CoverageQuery {
                zip_code: "90210",
                area: &resolved,
                exclude_org_id: None,
                organization_type: None,
            })
            .expect("lookup");
        // org-s claims the ZIP but cannot receive; org-b matches at city level.
        let ids: Vec<&str> = rows.iter().map(|r| r.organization_id.as_str()).collect();
        assert_eq!(ids, vec!["org-a", "org-b"]);
    }

    #[test]
    fn coverage_lookup_applies_type_and_exclusion_filters() {
        let dir = sample_directory();
        let resolved = dir.resolve_zip("90210").expect("resolve").expect("area");
        let rows = dir
            .coverage_lookup(&CoverageQuery {
                zip_code: "90210",
                area: &resolved,
                exclude_org_id: Some("org-a"),
                organization_type: Some("pharmacy"),
            })
            .expect("lookup");
        let ids: Vec<&str> = rows.iter().map(|r| r.organization_id.as_str()).collect();
        assert_eq!(ids, vec!["org-b"]);
    }

    #[test]
    fn acceptance_lookup_aggregates_and_windows_recent_accepts() {
        let dir = sample_directory();
        let stats = dir
            .acceptance_lookup(&["org-a".to_string(), "org-b".to_string()])
            .expect("lookup");

        let a = stats.get("org-a").expect("org-a stats");
        assert_eq!(a.total_referrals, 3);
        assert_eq!(a.accepted_count, 2);
        assert_eq!(a.completed_count, 0);
        assert_eq!(a.recent_accepted, 1);

        let b = stats.get("org-b").expect("org-b stats");
        assert_eq!(b.total_referrals, 1);
        assert_eq!(b.completed_count, 1);
        assert_eq!(b.accepted_count, 0);
    }

    #[test]
    fn acceptance_lookup_is_restricted_to_requested_ids() {
        let dir = sample_directory();
        let stats = dir
            .acceptance_lookup(&["org-b".to_string()])
            .expect("lookup");
        assert!(!stats.contains_key("org-a"));
    }
}
