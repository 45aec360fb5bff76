//! `ChangeDetector` (C9): hashes four top-level sections of the shared XML
//! database file and reports which ones changed since the last observation.

use std::collections::HashMap;

use c123_protocol::XML_CHANGE_SECTIONS;

#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub sections: Vec<String>,
    pub checksum: String,
}

pub struct ChangeDetector {
    last_hashes: HashMap<&'static str, blake3::Hash>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self {
            last_hashes: HashMap::new(),
        }
    }

    /// Hashes each section in `xml_db_content` and reports the subset whose
    /// hash differs from the previous call, plus a checksum over all four
    /// (order-stable, so the checksum changes whenever any section does).
    pub fn observe(&mut self, xml_db_content: &str) -> Option<ChangeEvent> {
        let mut changed = Vec::new();
        let mut combined = blake3::Hasher::new();

        for &section in XML_CHANGE_SECTIONS.iter() {
            let substring = extract_section(xml_db_content, section).unwrap_or("");
            let hash = blake3::hash(substring.as_bytes());
            combined.update(hash.as_bytes());

            match self.last_hashes.get(section) {
                Some(prev) if *prev == hash => {}
                _ => {
                    changed.push(section.to_string());
                    self.last_hashes.insert(section, hash);
                }
            }
        }

        if changed.is_empty() {
            return None;
        }

        Some(ChangeEvent {
            sections: changed,
            checksum: combined.finalize().to_hex().to_string(),
        })
    }
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Extracts the substring from `<tag` (start of opening tag) through the
/// matching `</tag>` (or self-closing `/>`), first occurrence only.
fn extract_section<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open_needle = format!("<{tag}");
    let start = xml.find(&open_needle)?;

    let close_needle = format!("</{tag}>");
    if let Some(close_rel) = xml[start..].find(&close_needle) {
        let end = start + close_rel + close_needle.len();
        return Some(&xml[start..end]);
    }

    // Possibly self-closing: find the end of the opening tag itself.
    let tag_end_rel = xml[start..].find('>')?;
    Some(&xml[start..start + tag_end_rel + 1])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(participants: &str, results: &str) -> String {
        format!(
            "<Canoe123Data><Participants>{participants}</Participants><Schedule/><Results>{results}</Results><Classes/></Canoe123Data>"
        )
    }

    #[test]
    fn first_observation_reports_all_sections_changed() {
        let mut detector = ChangeDetector::new();
        let event = detector.observe(&doc("p1", "r1")).unwrap();
        assert_eq!(event.sections.len(), 4);
    }

    #[test]
    fn unchanged_document_reports_no_change() {
        let mut detector = ChangeDetector::new();
        detector.observe(&doc("p1", "r1"));
        assert!(detector.observe(&doc("p1", "r1")).is_none());
    }

    #[test]
    fn only_modified_section_is_reported() {
        let mut detector = ChangeDetector::new();
        detector.observe(&doc("p1", "r1"));
        let event = detector.observe(&doc("p1", "r2")).unwrap();
        assert_eq!(event.sections, vec!["Results".to_string()]);
    }

    #[test]
    fn checksum_differs_when_any_section_changes() {
        let mut detector = ChangeDetector::new();
        let first = detector.observe(&doc("p1", "r1")).unwrap().checksum;
        let second = detector.observe(&doc("p1", "r2")).unwrap().checksum;
        assert_ne!(first, second);
    }
}
