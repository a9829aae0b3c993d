//! Extractor tests against realistic terminal-page markup

use chrono::NaiveDate;
use terminwatch::extractor::{Extraction, SlotExtractor};
use terminwatch::site::SiteProfile;

/// A results page close to what the portal actually serves: chrome, nav,
/// cookie remnants, a suggestion area with accordion date sections, and
/// assorted noise buttons that carry no time token.
const REALISTIC_RESULTS_PAGE: &str = r#"<!DOCTYPE html>
<html lang="de">
<head><title>Terminvergabe</title></head>
<body>
  <header><nav><button>Menü</button><button>Kontakt</button></nav></header>
  <main>
    <h1>Terminvorschläge</h1>
    <p>Bitte wählen Sie einen der folgenden Termine.</p>
    <div id="suggest_accordion" class="ui-accordion">
      <h3 class="ui-accordion-header" aria-controls="panel-2035-11-18">
        Dienstag, 18.11.2035
      </h3>
      <div id="panel-2035-11-18" class="ui-accordion-content">
        <table>
          <tr>
            <td><button class="suggest_btn">8:30 Uhr</button></td>
            <td><button class="suggest_btn">14:00 Uhr</button></td>
            <td><button class="suggest_btn">14:30 Uhr</button></td>
          </tr>
        </table>
      </div>
      <h3 class="ui-accordion-header" aria-controls="panel-2035-11-19">
        Mittwoch, 19.11.2035
      </h3>
      <div id="panel-2035-11-19" class="ui-accordion-content">
        <table>
          <tr>
            <td><button class="suggest_btn">9:05 Uhr</button></td>
            <td><button class="suggest_btn">weitere anzeigen</button></td>
          </tr>
        </table>
      </div>
      <h3 class="ui-accordion-header" aria-controls="panel-info">
        Hinweise zur Terminvergabe
      </h3>
      <div id="panel-info" class="ui-accordion-content">
        <button class="suggest_btn">10:00 Uhr</button>
      </div>
    </div>
  </main>
  <footer><button>Impressum</button></footer>
</body>
</html>"#;

fn extractor() -> SlotExtractor {
    SlotExtractor::from_profile(&SiteProfile::default()).unwrap()
}

#[test]
fn realistic_page_extracts_ordered_normalized_slots() {
    let Extraction::Slots(slots) = extractor().extract(REALISTIC_RESULTS_PAGE) else {
        panic!("expected slots");
    };

    // Three slots from the first day, one from the second. The time-less
    // "weitere anzeigen" button and the date-less info header are skipped.
    let rendered: Vec<String> = slots
        .iter()
        .map(|s| format!("{} {}", s.date_label(), s.time_label()))
        .collect();
    assert_eq!(
        rendered,
        vec![
            "2035-11-18 08:30",
            "2035-11-18 14:00",
            "2035-11-18 14:30",
            "2035-11-19 09:05",
        ]
    );

    // Raw labels carry the original header and control text for audit
    assert!(slots[0].raw_label.contains("Dienstag, 18.11.2035"));
    assert!(slots[0].raw_label.contains("8:30 Uhr"));
}

#[test]
fn negative_phrase_wins_over_stale_accordion() {
    let html = format!(
        "<html><body><div class=\"alert\">Zurzeit sind keine Termine frei.</div>{}</body></html>",
        REALISTIC_RESULTS_PAGE
    );
    assert_eq!(extractor().extract(&html), Extraction::NoSlots);
}

#[test]
fn every_configured_phrase_is_honored() {
    let profile = SiteProfile::default();
    let extractor = SlotExtractor::from_profile(&profile).unwrap();

    for phrase in &profile.no_slot_phrases {
        let html = format!("<html><body><p>{phrase}</p></body></html>");
        assert_eq!(
            extractor.extract(&html),
            Extraction::NoSlots,
            "phrase not honored: {phrase}"
        );
    }
}

#[test]
fn maintenance_page_is_indeterminate() {
    let html = "<html><body><h1>Wartungsarbeiten</h1>\
                <p>Die Terminvergabe ist vorübergehend nicht erreichbar.</p></body></html>";
    assert_eq!(extractor().extract(html), Extraction::Indeterminate);
}

#[test]
fn custom_profile_selectors_drive_extraction() {
    // A drifted portal build with renamed markup, absorbed purely by profile
    // configuration
    let profile = SiteProfile {
        date_header_selector: "h2.day".to_string(),
        time_slot_selector: "a.slot".to_string(),
        panel_ref_attr: "data-panel".to_string(),
        ..Default::default()
    };
    let extractor = SlotExtractor::from_profile(&profile).unwrap();

    let html = r#"<html><body>
        <h2 class="day" data-panel="d1">5.3.2036</h2>
        <div id="d1"><a class="slot">7:45</a></div>
        </body></html>"#;

    let Extraction::Slots(slots) = extractor.extract(html) else {
        panic!("expected slots");
    };
    assert_eq!(slots.len(), 1);
    assert_eq!(
        slots[0].date,
        NaiveDate::from_ymd_opt(2036, 3, 5).unwrap()
    );
    assert_eq!(slots[0].time_label(), "07:45");
}
