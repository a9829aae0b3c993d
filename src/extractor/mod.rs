//! Slot extraction from the terminal results page
//!
//! The results page is an accordion: one collapsible header per calendar
//! date, each with a panel of clickable time buttons. Extraction yields
//! either a definitive negative ([`Extraction::NoSlots`]), an ordered slot
//! list, or [`Extraction::Indeterminate`] when the structure is unrecognized.
//! The negative-phrase check runs first and wins over any structural markup,
//! because the portal can show the negative message alongside stale
//! accordion remnants.

use chrono::{NaiveDate, NaiveTime};
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use thiserror::Error;

use crate::models::{Slot, SlotKey};
use crate::site::SiteProfile;

lazy_static! {
    // D.M.YYYY / DD.MM.YYYY, optionally preceded by a weekday name
    static ref DATE_RE: Regex =
        Regex::new(r"\b(\d{1,2})\.(\d{1,2})\.(\d{4})\b").expect("invalid date regex");

    // H:MM / HH:MM time token
    static ref TIME_RE: Regex =
        Regex::new(r"\b(\d{1,2}):(\d{2})\b").expect("invalid time regex");
}

/// Verdict of one extraction pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// The portal definitively reported no free appointments
    NoSlots,
    /// Ordered slots, deduplicated by (date, time) within the page
    Slots(Vec<Slot>),
    /// Neither a negative phrase nor any date header was recognized;
    /// upstream structure has likely drifted
    Indeterminate,
}

/// Errors building an extractor from a site profile
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Invalid selector '{selector}': {detail}")]
    InvalidSelector { selector: String, detail: String },
}

/// Extractor with selectors compiled from the current site profile
pub struct SlotExtractor {
    no_slot_phrases: Vec<String>,
    date_header: Selector,
    time_slot: Selector,
    panel_ref_attr: String,
}

impl SlotExtractor {
    /// Compile the profile's selectors. Fails fast on an unusable profile so
    /// a broken hot-reload is caught before any probe runs with it.
    pub fn from_profile(profile: &SiteProfile) -> Result<Self, ExtractError> {
        Ok(Self {
            no_slot_phrases: profile
                .no_slot_phrases
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
            date_header: parse_selector(&profile.date_header_selector)?,
            time_slot: parse_selector(&profile.time_slot_selector)?,
            panel_ref_attr: profile.panel_ref_attr.clone(),
        })
    }

    /// Extract slots (or a verdict) from the terminal page HTML.
    pub fn extract(&self, html: &str) -> Extraction {
        let document = Html::parse_document(html);

        // Negative phrases take priority over structural parsing
        let page_text = document
            .root_element()
            .text()
            .collect::<String>()
            .to_lowercase();
        if let Some(phrase) = self
            .no_slot_phrases
            .iter()
            .find(|p| page_text.contains(p.as_str()))
        {
            tracing::debug!(%phrase, "negative phrase matched, no slots");
            return Extraction::NoSlots;
        }

        let headers: Vec<ElementRef> = document.select(&self.date_header).collect();
        if headers.is_empty() {
            tracing::warn!("no negative phrase and no date headers, page structure unrecognized");
            return Extraction::Indeterminate;
        }

        let mut slots = Vec::new();
        let mut seen: HashSet<SlotKey> = HashSet::new();

        for header in &headers {
            let header_text = collapse_whitespace(&header.text().collect::<String>());

            let Some(date) = parse_header_date(&header_text) else {
                tracing::warn!(text = %header_text, "date header without recognizable date, skipping");
                continue;
            };

            let Some(panel) = self.resolve_panel(&document, header) else {
                tracing::warn!(text = %header_text, "date header without content panel, skipping");
                continue;
            };

            for control in panel.select(&self.time_slot) {
                let control_text = collapse_whitespace(&control.text().collect::<String>());
                let Some(time) = parse_time_token(&control_text) else {
                    continue;
                };

                let slot = Slot::new(date, time, format!("{header_text} {control_text}"));
                if seen.insert(slot.key()) {
                    slots.push(slot);
                }
            }
        }

        if slots.is_empty() {
            // Headers existed but yielded nothing usable
            tracing::warn!(
                headers = headers.len(),
                "date headers present but no slots extracted"
            );
            return Extraction::Indeterminate;
        }

        tracing::debug!(count = slots.len(), "slots extracted");
        Extraction::Slots(slots)
    }

    /// Resolve the content panel for a header: explicit id reference first,
    /// next-sibling element as fallback.
    fn resolve_panel<'a>(
        &self,
        document: &'a Html,
        header: &ElementRef<'a>,
    ) -> Option<ElementRef<'a>> {
        if let Some(panel_id) = header.value().attr(&self.panel_ref_attr) {
            if let Ok(selector) = Selector::parse(&format!("[id=\"{panel_id}\"]")) {
                if let Some(panel) = document.select(&selector).next() {
                    return Some(panel);
                }
            }
        }
        header.next_siblings().find_map(ElementRef::wrap)
    }
}

fn parse_selector(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::InvalidSelector {
        selector: selector.to_string(),
        detail: e.to_string(),
    })
}

/// Parse a date-section header like "Dienstag, 18.11.2025" or "5.3.2026"
/// into a calendar date. Single-digit day/month are zero-padded by the
/// normalization into `NaiveDate`.
pub fn parse_header_date(text: &str) -> Option<NaiveDate> {
    let captures = DATE_RE.captures(text)?;
    let day: u32 = captures.get(1)?.as_str().parse().ok()?;
    let month: u32 = captures.get(2)?.as_str().parse().ok()?;
    let year: i32 = captures.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Parse the first `H:MM`/`HH:MM` token in a control label like
/// "14:30 Uhr" into a time of day. No timezone conversion.
pub fn parse_time_token(text: &str) -> Option<NaiveTime> {
    let captures = TIME_RE.captures(text)?;
    let hour: u32 = captures.get(1)?.as_str().parse().ok()?;
    let minute: u32 = captures.get(2)?.as_str().parse().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> SlotExtractor {
        SlotExtractor::from_profile(&SiteProfile::default()).unwrap()
    }

    fn accordion_page(sections: &[(&str, &[&str])]) -> String {
        let mut body = String::new();
        for (i, (header, times)) in sections.iter().enumerate() {
            body.push_str(&format!(
                "<h3 class=\"ui-accordion-header\" aria-controls=\"panel-{i}\">{header}</h3>"
            ));
            body.push_str(&format!("<div id=\"panel-{i}\"><table><tr>"));
            for time in *times {
                body.push_str(&format!("<td><button>{time}</button></td>"));
            }
            body.push_str("</tr></table></div>");
        }
        format!("<html><body><div id=\"suggest\">{body}</div></body></html>")
    }

    #[test]
    fn test_parse_header_date_with_weekday() {
        assert_eq!(
            parse_header_date("Dienstag, 18.11.2025"),
            NaiveDate::from_ymd_opt(2025, 11, 18)
        );
    }

    #[test]
    fn test_parse_header_date_single_digits() {
        assert_eq!(
            parse_header_date("5.3.2026"),
            NaiveDate::from_ymd_opt(2026, 3, 5)
        );
    }

    #[test]
    fn test_parse_header_date_rejects_dateless_text() {
        assert_eq!(parse_header_date("Bitte wählen Sie einen Termin"), None);
    }

    #[test]
    fn test_parse_header_date_rejects_impossible_date() {
        assert_eq!(parse_header_date("32.13.2025"), None);
    }

    #[test]
    fn test_parse_time_token() {
        assert_eq!(
            parse_time_token("14:30 Uhr"),
            NaiveTime::from_hms_opt(14, 30, 0)
        );
        assert_eq!(parse_time_token("9:05"), NaiveTime::from_hms_opt(9, 5, 0));
        assert_eq!(parse_time_token("kein Zeitfenster"), None);
    }

    #[test]
    fn test_time_normalization_zero_pads() {
        let time = parse_time_token("9:05").unwrap();
        assert_eq!(time.format("%H:%M").to_string(), "09:05");
    }

    #[test]
    fn test_negative_phrase_yields_no_slots() {
        let html = "<html><body><p>Zurzeit sind keine Termine frei.</p></body></html>";
        assert_eq!(extractor().extract(html), Extraction::NoSlots);
    }

    #[test]
    fn test_negative_phrase_is_case_insensitive() {
        let html = "<html><body><p>ZURZEIT SIND KEINE TERMINE FREI</p></body></html>";
        assert_eq!(extractor().extract(html), Extraction::NoSlots);
    }

    #[test]
    fn test_negative_phrase_beats_structural_markup() {
        // Stale accordion remnants must not override the negative message
        let html = format!(
            "<html><body><p>Zurzeit sind keine Termine frei</p>{}</body></html>",
            accordion_page(&[("Montag, 01.01.2030", &["08:00"][..])])
        );
        assert_eq!(extractor().extract(&html), Extraction::NoSlots);
    }

    #[test]
    fn test_unrecognized_page_is_indeterminate_not_no_slots() {
        let html = "<html><body><p>Etwas ist schiefgelaufen</p></body></html>";
        assert_eq!(extractor().extract(html), Extraction::Indeterminate);
    }

    #[test]
    fn test_extracts_slots_across_sections() {
        let html = accordion_page(&[
            ("Dienstag, 18.11.2025", &["14:00 Uhr", "14:30 Uhr"][..]),
            ("Mittwoch, 19.11.2025", &["9:05 Uhr"][..]),
        ]);

        let Extraction::Slots(slots) = extractor().extract(&html) else {
            panic!("expected slots");
        };
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[0].date_label(), "2025-11-18");
        assert_eq!(slots[0].time_label(), "14:00");
        assert_eq!(slots[1].time_label(), "14:30");
        assert_eq!(slots[2].date_label(), "2025-11-19");
        assert_eq!(slots[2].time_label(), "09:05");
        assert!(slots[0].raw_label.contains("Dienstag, 18.11.2025"));
        assert!(slots[0].raw_label.contains("14:00 Uhr"));
    }

    #[test]
    fn test_dateless_header_is_skipped() {
        let html = accordion_page(&[
            ("Weitere Termine", &["10:00"][..]),
            ("Dienstag, 18.11.2025", &["14:00"][..]),
        ]);

        let Extraction::Slots(slots) = extractor().extract(&html) else {
            panic!("expected slots");
        };
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].date_label(), "2025-11-18");
    }

    #[test]
    fn test_timeless_control_is_skipped() {
        let html = accordion_page(&[(
            "Dienstag, 18.11.2025",
            &["ausgebucht", "14:00 Uhr"][..],
        )]);

        let Extraction::Slots(slots) = extractor().extract(&html) else {
            panic!("expected slots");
        };
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].time_label(), "14:00");
    }

    #[test]
    fn test_duplicate_slot_within_page_dropped() {
        let html = accordion_page(&[(
            "Dienstag, 18.11.2025",
            &["14:00 Uhr", "14:00 Uhr"][..],
        )]);

        let Extraction::Slots(slots) = extractor().extract(&html) else {
            panic!("expected slots");
        };
        assert_eq!(slots.len(), 1);
    }

    #[test]
    fn test_panel_fallback_to_next_sibling() {
        // No aria-controls reference; panel is the next sibling element
        let html = "<html><body>\
            <h3 class=\"ui-accordion-header\">Dienstag, 18.11.2025</h3>\
            <div><button class=\"suggest_btn\">15:45 Uhr</button></div>\
            </body></html>";

        let Extraction::Slots(slots) = extractor().extract(html) else {
            panic!("expected slots");
        };
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].time_label(), "15:45");
    }

    #[test]
    fn test_headers_without_usable_slots_is_indeterminate() {
        let html = accordion_page(&[("Dienstag, 18.11.2025", &[][..])]);
        assert_eq!(extractor().extract(&html), Extraction::Indeterminate);
    }

    #[test]
    fn test_invalid_profile_selector_rejected() {
        let profile = SiteProfile {
            date_header_selector: "h3..broken".to_string(),
            ..Default::default()
        };
        assert!(SlotExtractor::from_profile(&profile).is_err());
    }
}
