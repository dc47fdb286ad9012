use crate::db;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

const SETTINGS_KEY: &str = "portal.config";

pub const DEFAULT_ATTENDANCE_THRESHOLD: f64 = 75.0;

fn default_threshold() -> f64 {
    DEFAULT_ATTENDANCE_THRESHOLD
}

fn default_institution_name() -> String {
    "COLLEGE OF ENGINEERING".to_string()
}

fn default_document_label() -> String {
    "Internal Assessment Marksheet".to_string()
}

fn default_watermark_text() -> String {
    "INTERNAL ASSESSMENT REPORT".to_string()
}

fn default_footer_text() -> String {
    "Generated by College Portal | This is a system-generated report.".to_string()
}

fn default_subjects() -> Vec<String> {
    vec![
        "Subject1".to_string(),
        "Subject2".to_string(),
        "Subject3".to_string(),
    ]
}

/// Portal-wide presentation and policy settings, stored as one JSON blob in
/// the settings table. Missing fields fall back to the stock values, so
/// older workspaces keep working after new fields appear.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalConfig {
    #[serde(default = "default_threshold")]
    pub attendance_threshold: f64,
    #[serde(default = "default_institution_name")]
    pub institution_name: String,
    #[serde(default = "default_document_label")]
    pub document_label: String,
    #[serde(default = "default_watermark_text")]
    pub watermark_text: String,
    #[serde(default = "default_footer_text")]
    pub footer_text: String,
    #[serde(default)]
    pub logo_path: Option<String>,
    /// Subject names offered in the entry grid when a student has no marks
    /// record yet; defined per deployment, not per record.
    #[serde(default = "default_subjects")]
    pub default_subjects: Vec<String>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        PortalConfig {
            attendance_threshold: default_threshold(),
            institution_name: default_institution_name(),
            document_label: default_document_label(),
            watermark_text: default_watermark_text(),
            footer_text: default_footer_text(),
            logo_path: None,
            default_subjects: default_subjects(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalConfigPatch {
    pub attendance_threshold: Option<f64>,
    pub institution_name: Option<String>,
    pub document_label: Option<String>,
    pub watermark_text: Option<String>,
    pub footer_text: Option<String>,
    /// Empty string clears the logo.
    pub logo_path: Option<String>,
    pub default_subjects: Option<Vec<String>>,
}

impl PortalConfig {
    pub fn apply(&mut self, patch: PortalConfigPatch) {
        if let Some(v) = patch.attendance_threshold {
            self.attendance_threshold = v;
        }
        if let Some(v) = patch.institution_name {
            self.institution_name = v;
        }
        if let Some(v) = patch.document_label {
            self.document_label = v;
        }
        if let Some(v) = patch.watermark_text {
            self.watermark_text = v;
        }
        if let Some(v) = patch.footer_text {
            self.footer_text = v;
        }
        if let Some(v) = patch.logo_path {
            self.logo_path = if v.trim().is_empty() { None } else { Some(v) };
        }
        if let Some(v) = patch.default_subjects {
            if !v.is_empty() {
                self.default_subjects = v;
            }
        }
    }
}

pub fn load(conn: &Connection) -> anyhow::Result<PortalConfig> {
    match db::settings_get_json(conn, SETTINGS_KEY)? {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Ok(PortalConfig::default()),
    }
}

pub fn store(conn: &Connection, cfg: &PortalConfig) -> anyhow::Result<()> {
    db::settings_set_json(conn, SETTINGS_KEY, &serde_json::to_value(cfg)?)
}
