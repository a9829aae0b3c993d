//! Site profile: the probed portal's page structure as configuration
//!
//! Selectors, button labels and phrase lists are volatile third-party markup,
//! not a stable schema. They are therefore data: a TOML file that can be
//! redeployed and hot-reloaded without rebuilding the binary. The built-in
//! defaults describe the reference deployment (the Düsseldorf appointment
//! portal).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

/// Page-structure description of the monitored booking portal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteProfile {
    /// Entry point of the multi-step booking flow
    pub base_url: String,

    /// Consent-banner accept labels, tried in order; absence is fine
    pub consent_labels: Vec<String>,

    /// Confirmation-dialog dismiss labels after step one; absence is fine
    pub interstitial_labels: Vec<String>,

    /// Label of the continue control between steps
    pub continue_label: String,

    /// CSS selector for service rows inside an expanded category
    pub row_selector: String,

    /// CSS selector for the quantity input inside a service row
    pub quantity_input_selector: String,

    /// Locale-specific "no appointments" phrases, matched case-insensitively
    /// against the terminal page text
    pub no_slot_phrases: Vec<String>,

    /// CSS selector for date-section accordion headers on the results page
    pub date_header_selector: String,

    /// Attribute on a header referencing its content panel's id
    pub panel_ref_attr: String,

    /// CSS selector for clickable time-slot controls inside a panel
    pub time_slot_selector: String,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            base_url: String::from("https://termine.duesseldorf.de/select2?md=3"),
            consent_labels: vec![
                String::from("Akzeptieren"),
                String::from("Alle akzeptieren"),
                String::from("Zustimmen"),
                String::from("OK"),
            ],
            interstitial_labels: vec![
                String::from("OK"),
                String::from("Fortfahren"),
                String::from("Bestätigen"),
            ],
            continue_label: String::from("Weiter"),
            row_selector: String::from("li"),
            quantity_input_selector: String::from("input[type=number]"),
            no_slot_phrases: vec![
                String::from("Zurzeit sind keine Termine frei"),
                String::from("Zurzeit sind keine Termine verfügbar"),
                String::from("Leider sind derzeit keine Termine verfügbar"),
                String::from("Es sind zurzeit keine Termine verfügbar"),
                String::from("Aktuell sind keine Termine buchbar"),
                String::from("Keine Zeiten verfügbar"),
                String::from("keine freien Termine"),
            ],
            date_header_selector: String::from("h3.ui-accordion-header"),
            panel_ref_attr: String::from("aria-controls"),
            time_slot_selector: String::from("button.suggest_btn, td button"),
        }
    }
}

impl SiteProfile {
    /// Load a profile from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read site profile {}", path.display()))?;
        let profile: SiteProfile = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse site profile {}", path.display()))?;
        profile.validate()?;
        Ok(profile)
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize site profile")
    }

    /// Validate that the profile is usable
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.base_url.is_empty(), "base_url cannot be empty");
        anyhow::ensure!(
            !self.continue_label.is_empty(),
            "continue_label cannot be empty"
        );
        anyhow::ensure!(
            !self.date_header_selector.is_empty(),
            "date_header_selector cannot be empty"
        );
        anyhow::ensure!(
            !self.time_slot_selector.is_empty(),
            "time_slot_selector cannot be empty"
        );
        anyhow::ensure!(
            !self.no_slot_phrases.is_empty(),
            "no_slot_phrases cannot be empty"
        );
        Ok(())
    }
}

/// Shared, hot-reloadable handle on the current site profile
///
/// The scheduler calls [`ProfileStore::reload_if_changed`] at the start of
/// each tick; a changed file mtime triggers a re-read, so markup drift is
/// fixed by editing the profile file while the monitor keeps running.
pub struct ProfileStore {
    current: RwLock<SiteProfile>,
    path: Option<PathBuf>,
    last_modified: RwLock<Option<SystemTime>>,
}

impl ProfileStore {
    /// Create a store backed by a profile file; falls back to the built-in
    /// defaults if the file does not exist yet.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (profile, mtime) = if path.exists() {
            let profile = SiteProfile::load(&path)?;
            let mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
            (profile, mtime)
        } else {
            tracing::warn!(
                path = %path.display(),
                "site profile file not found, using built-in defaults"
            );
            (SiteProfile::default(), None)
        };

        Ok(Self {
            current: RwLock::new(profile),
            path: Some(path),
            last_modified: RwLock::new(mtime),
        })
    }

    /// Create a fixed store with no backing file (defaults or tests)
    pub fn fixed(profile: SiteProfile) -> Self {
        Self {
            current: RwLock::new(profile),
            path: None,
            last_modified: RwLock::new(None),
        }
    }

    /// Snapshot of the current profile
    pub fn current(&self) -> SiteProfile {
        self.current.read().expect("profile lock poisoned").clone()
    }

    /// Re-read the backing file if its mtime changed. Returns whether a
    /// reload happened. A broken file is reported and the previous profile
    /// stays in effect.
    pub fn reload_if_changed(&self) -> Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        if !path.exists() {
            return Ok(false);
        }

        let mtime = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .with_context(|| format!("Failed to stat site profile {}", path.display()))?;

        {
            let last = self.last_modified.read().expect("profile lock poisoned");
            if *last == Some(mtime) {
                return Ok(false);
            }
        }

        let profile = SiteProfile::load(path)?;
        *self.current.write().expect("profile lock poisoned") = profile;
        *self.last_modified.write().expect("profile lock poisoned") = Some(mtime);

        tracing::info!(path = %path.display(), "site profile reloaded");
        Ok(true)
    }
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::fixed(SiteProfile::default())
    }
}
