//! Advisory annotations on change reports.
//!
//! Providers are best effort: a failing provider yields a report with
//! `risk: unavailable` and the authoritative [`ChangeReport`] is never
//! touched. Reports accumulate in `reports/ai-analysis.json`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::{keys, read_json, write_json, BlobStore, ChangeDetailKind, ChangeReport, RiskLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryRisk {
    Low,
    Medium,
    High,
    Unavailable,
}

/// What a provider returns for one report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advisory {
    pub risk: AdvisoryRisk,
    pub summary: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryReport {
    pub file_path: String,
    pub provider: String,
    pub created_at: String,
    pub risk: AdvisoryRisk,
    pub summary: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub trait AdvisoryProvider: Send + Sync {
    fn name(&self) -> &str;

    fn advise(&self, report: &ChangeReport) -> Result<Advisory>;
}

/// Offline provider deriving advice from the report itself
#[derive(Debug, Default)]
pub struct RuleBasedProvider;

impl AdvisoryProvider for RuleBasedProvider {
    fn name(&self) -> &str {
        "rules"
    }

    fn advise(&self, report: &ChangeReport) -> Result<Advisory> {
        let risk = match report.risk_level {
            RiskLevel::Breaking => AdvisoryRisk::High,
            RiskLevel::Risky => AdvisoryRisk::Medium,
            RiskLevel::Safe => AdvisoryRisk::Low,
        };

        let mut recommendations = Vec::new();
        for detail in &report.changes {
            let advice = match detail.kind {
                ChangeDetailKind::ExportRemoved => "Restore the export or update every importer",
                ChangeDetailKind::ParameterChanged | ChangeDetailKind::SignatureChanged => {
                    "Check all call sites against the new signature"
                }
                ChangeDetailKind::ReturnTypeChanged => "Review consumers of the return value",
                ChangeDetailKind::TypeChanged => "Recompile dependents to surface type errors",
                ChangeDetailKind::InternalChange => continue,
            };
            if !recommendations.iter().any(|r| r == advice) {
                recommendations.push(advice.to_string());
            }
        }

        Ok(Advisory {
            risk,
            summary: format!(
                "{} change with {} detail(s), risk score {:.0}",
                report.risk_level.as_str(),
                report.changes.len(),
                report.risk_score
            ),
            recommendations,
        })
    }
}

pub struct AdvisoryStore {
    store: Arc<dyn BlobStore>,
}

impl AdvisoryStore {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Runs `provider` over every report. Never fails on provider errors.
    pub fn annotate(&self, provider: &dyn AdvisoryProvider, reports: &[ChangeReport]) -> Vec<AdvisoryReport> {
        reports
            .iter()
            .map(|report| {
                let created_at = chrono::Utc::now().to_rfc3339();
                match provider.advise(report) {
                    Ok(advisory) => AdvisoryReport {
                        file_path: report.file_path.clone(),
                        provider: provider.name().to_string(),
                        created_at,
                        risk: advisory.risk,
                        summary: advisory.summary,
                        recommendations: advisory.recommendations,
                        error: None,
                    },
                    Err(e) => {
                        tracing::warn!("Advisory provider {} failed for {}: {}", provider.name(), report.file_path, e);
                        AdvisoryReport {
                            file_path: report.file_path.clone(),
                            provider: provider.name().to_string(),
                            created_at,
                            risk: AdvisoryRisk::Unavailable,
                            summary: "Advisory analysis unavailable".to_string(),
                            recommendations: Vec::new(),
                            error: Some(e.to_string()),
                        }
                    }
                }
            })
            .collect()
    }

    pub fn append(&self, reports: &[AdvisoryReport]) -> Result<()> {
        if reports.is_empty() {
            return Ok(());
        }
        let mut all = self.all();
        all.extend_from_slice(reports);
        write_json(self.store.as_ref(), keys::AI_REPORTS, &all)
    }

    pub fn all(&self) -> Vec<AdvisoryReport> {
        read_json(self.store.as_ref(), keys::AI_REPORTS).unwrap_or_default()
    }

    pub fn for_file(&self, path: &str) -> Vec<AdvisoryReport> {
        self.all().into_iter().filter(|r| r.file_path == path).collect()
    }
}
