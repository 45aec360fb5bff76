//! `XmlDecoder` (C6): stateless translation of a raw engine frame into
//! `DecodedRecord`s (§4.5).

use c123_protocol::elements;

use crate::error::{DecodeError, DecodeResult};
use crate::record::{
    DecodedRecord, OnCourseCompetitor, OnCoursePayload, RaceConfigPayload, ResultRow,
    ResultsPayload, ScheduledRace, SchedulePayload,
};
use crate::xml_tree::{Element, parse_document};

/// Decode one frame (a complete `<Canoe123 ...>` document) into zero or more
/// records — the engine may batch several top-level records per frame.
pub fn decode_frame(xml: &str) -> DecodeResult<Vec<DecodedRecord>> {
    let root = parse_document(xml)?;
    Ok(root.children.iter().map(decode_top_level).collect())
}

fn decode_top_level(node: &Element) -> DecodedRecord {
    match node.name.as_str() {
        name if name == elements::TIME_OF_DAY => DecodedRecord::TimeOfDay(decode_time_of_day(node)),
        name if name == elements::ON_COURSE => DecodedRecord::OnCourse(decode_on_course(node)),
        name if name == elements::RESULTS => DecodedRecord::Results(decode_results(node)),
        name if name == elements::RACE_CONFIG => DecodedRecord::RaceConfig(decode_race_config(node)),
        name if name == elements::SCHEDULE => DecodedRecord::Schedule(decode_schedule(node)),
        other => DecodedRecord::Unknown {
            element: other.to_string(),
        },
    }
}

/// `TimeOfDay` accepts plain text or a `{ #text }` wrapper form; both end up
/// as this element's text content either way. Empty/absent text is `None`.
fn decode_time_of_day(node: &Element) -> Option<String> {
    let text = node.text_trimmed();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn decode_on_course(node: &Element) -> OnCoursePayload {
    let nested: Vec<&Element> = node.children_named(elements::ON_COURSE).collect();

    // A single inline form is equivalent to one child: the outer element
    // carries `Participant`/`Result` directly instead of nesting another
    // `OnCourse`. An element with neither form present means zero
    // competitors on course right now (§3.1's "empty competitors" case).
    let competitors = if !nested.is_empty() {
        nested
            .iter()
            .enumerate()
            .map(|(i, n)| decode_on_course_competitor(n, (i + 1) as u32))
            .collect()
    } else if node.child(elements::PARTICIPANT).is_some() {
        vec![decode_on_course_competitor(node, 1)]
    } else {
        Vec::new()
    };

    OnCoursePayload { competitors }
}

fn decode_on_course_competitor(node: &Element, fallback_position: u32) -> OnCourseCompetitor {
    let participant = node.child(elements::PARTICIPANT);
    let result = preferred_result(node);

    let position = node
        .attr_i64("Position")
        .map(|v| v.max(0) as u32)
        .unwrap_or(fallback_position);

    OnCourseCompetitor {
        bib: participant.map(|p| p.attr_trimmed("Bib")).unwrap_or_default(),
        name: participant.map(|p| p.attr_trimmed("Name")).unwrap_or_default(),
        club: participant.map(|p| p.attr_trimmed("Club")).unwrap_or_default(),
        nat: participant.map(|p| p.attr_trimmed("Nat")).unwrap_or_default(),
        race_id: participant.map(|p| p.attr_trimmed("RaceID")).unwrap_or_default(),
        race_name: participant
            .map(|p| p.attr_trimmed("RaceName"))
            .unwrap_or_default(),
        start_order: participant.and_then(|p| p.attr_i64("StartOrder")).unwrap_or(0),
        gates: result.map(|r| r.attr_trimmed("Gates")).unwrap_or_default(),
        completed: result.map(|r| r.attr_bool_y("Completed")).unwrap_or(false),
        dt_start: result.map(|r| r.attr_trimmed("DTStart")).unwrap_or_default(),
        dt_finish: result
            .map(|r| r.attr_trimmed("DTFinish"))
            .filter(|s| !s.is_empty()),
        pen: result.and_then(|r| r.attr_i64("Pen")).unwrap_or(0),
        time: result.map(|r| r.attr_trimmed("Time")).unwrap_or_default(),
        total: result.map(|r| r.attr_trimmed("Total")).unwrap_or_default(),
        ttb_diff: result.map(|r| r.attr_trimmed("TTBDiff")).unwrap_or_default(),
        ttb_name: result.map(|r| r.attr_trimmed("TTBName")).unwrap_or_default(),
        rank: result.and_then(|r| r.attr_i64("Rank")).unwrap_or(0),
        position,
    }
}

/// `Result` elements carry a `Type` attribute (`C`ourse / `T`iming); when
/// more than one is present prefer the timing one, since that's where `Pen`
/// and `Rank` live (§4.5).
fn preferred_result(node: &Element) -> Option<&Element> {
    node.children_named(elements::RESULT)
        .find(|r| r.attr("Type") == Some("T"))
        .or_else(|| node.children_named(elements::RESULT).next())
}

fn decode_results(node: &Element) -> ResultsPayload {
    let mut rows: Vec<ResultRow> = node
        .children_named(elements::ROW)
        .map(decode_result_row)
        .collect();

    rows.sort_by_key(|r| (rank_sort_key(r.rank), r.start_order));

    ResultsPayload {
        race_id: node.attr_trimmed("RaceID"),
        class_id: node.attr_trimmed("ClassID"),
        is_current: node.attr_bool_y("Current"),
        main_title: node.attr_trimmed("MainTitle"),
        sub_title: node.attr_trimmed("SubTitle"),
        rows,
    }
}

/// rank=0 sorts last regardless of numeric value.
fn rank_sort_key(rank: i64) -> i64 {
    if rank == 0 { i64::MAX } else { rank }
}

fn decode_result_row(row: &Element) -> ResultRow {
    let participant = row.child(elements::PARTICIPANT);
    let result = preferred_result(row);
    let row_number = row.attr_i64("Number").unwrap_or(0);

    // Fallback rank equals Row/@Number when the timing Result has no rank.
    let rank = result
        .and_then(|r| r.attr_i64("Rank"))
        .filter(|&r| r != 0)
        .unwrap_or(row_number);

    ResultRow {
        rank,
        bib: participant.map(|p| p.attr_trimmed("Bib")).unwrap_or_default(),
        name: participant.map(|p| p.attr_trimmed("Name")).unwrap_or_default(),
        given_name: participant
            .map(|p| p.attr_trimmed("GivenName"))
            .unwrap_or_default(),
        family_name: participant
            .map(|p| p.attr_trimmed("FamilyName"))
            .unwrap_or_default(),
        club: participant.map(|p| p.attr_trimmed("Club")).unwrap_or_default(),
        nat: participant.map(|p| p.attr_trimmed("Nat")).unwrap_or_default(),
        start_order: participant.and_then(|p| p.attr_i64("StartOrder")).unwrap_or(0),
        start_time: participant
            .map(|p| p.attr_trimmed("StartTime"))
            .unwrap_or_default(),
        gates: result.map(|r| r.attr_trimmed("Gates")).unwrap_or_default(),
        pen: result.and_then(|r| r.attr_i64("Pen")).unwrap_or(0),
        time: result.map(|r| r.attr_trimmed("Time")).unwrap_or_default(),
        total: result.map(|r| r.attr_trimmed("Total")).unwrap_or_default(),
        behind: result.map(|r| r.attr_trimmed("Behind")).unwrap_or_default(),
        status: result
            .map(|r| r.attr_trimmed("Status"))
            .filter(|s| !s.is_empty()),
    }
}

fn decode_race_config(node: &Element) -> RaceConfigPayload {
    RaceConfigPayload {
        nr_splits: node.attr_i64("NrSplits").unwrap_or(0),
        nr_gates: node.attr_i64("NrGates").unwrap_or(0),
        gate_config: node.attr_trimmed("GateConfig"),
        gate_captions: node.attr_trimmed("GateCaptions"),
    }
}

fn decode_schedule(node: &Element) -> SchedulePayload {
    let races = node
        .children_named(elements::RACE)
        .map(decode_scheduled_race)
        .collect();
    SchedulePayload { races }
}

fn decode_scheduled_race(node: &Element) -> ScheduledRace {
    let start_time = node
        .child("StartTime")
        .map(|e| e.text_trimmed().to_string())
        .filter(|s| !s.is_empty());

    ScheduledRace {
        race_id: node.attr_trimmed("RaceID"),
        class_id: node.attr_trimmed("ClassID"),
        description: node.attr_trimmed("Description"),
        start_time,
    }
}

/// Validate a frame is a complete, parseable document rooted as expected
/// before handing it to [`decode_frame`]. Sources call this so a wrong-root
/// frame is logged and dropped rather than silently yielding zero records.
pub fn validate_root(xml: &str, expected_root: &str) -> DecodeResult<()> {
    let root = parse_document(xml)?;
    if root.name != expected_root {
        return Err(DecodeError::UnexpectedRoot(root.name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_of_day_progresses() {
        let recs = decode_frame(r#"<Canoe123><TimeOfDay>10:30:00</TimeOfDay></Canoe123>"#).unwrap();
        assert_eq!(recs, vec![DecodedRecord::TimeOfDay(Some("10:30:00".into()))]);
    }

    #[test]
    fn time_of_day_empty_is_none() {
        let recs = decode_frame(r#"<Canoe123><TimeOfDay></TimeOfDay></Canoe123>"#).unwrap();
        assert_eq!(recs, vec![DecodedRecord::TimeOfDay(None)]);
    }

    #[test]
    fn on_course_single_inline_form() {
        let xml = r#"<Canoe123><OnCourse Position="1">
            <Participant Bib="9" Name="A Paddler" RaceID="K1M_ST_BR2_6" StartOrder="3"/>
            <Result Type="T" Pen="2" Time="90.00" Total="92.00" Rank="0"/>
        </OnCourse></Canoe123>"#;
        let recs = decode_frame(xml).unwrap();
        let DecodedRecord::OnCourse(payload) = &recs[0] else {
            panic!("expected on-course");
        };
        assert_eq!(payload.competitors.len(), 1);
        let c = &payload.competitors[0];
        assert_eq!(c.bib, "9");
        assert_eq!(c.pen, 2);
        assert_eq!(c.rank, 0);
        assert_eq!(c.position, 1);
    }

    #[test]
    fn on_course_with_no_competitors_is_empty() {
        let recs = decode_frame(r#"<Canoe123><OnCourse></OnCourse></Canoe123>"#).unwrap();
        let DecodedRecord::OnCourse(payload) = &recs[0] else {
            panic!("expected on-course");
        };
        assert!(payload.competitors.is_empty());
    }

    #[test]
    fn on_course_multiple_nested_children() {
        let xml = r#"<Canoe123><OnCourse>
            <OnCourse Position="2"><Participant Bib="9"/><Result Type="T"/></OnCourse>
            <OnCourse Position="1"><Participant Bib="10"/><Result Type="T"/></OnCourse>
        </OnCourse></Canoe123>"#;
        let recs = decode_frame(xml).unwrap();
        let DecodedRecord::OnCourse(payload) = &recs[0] else {
            panic!("expected on-course");
        };
        assert_eq!(payload.competitors.len(), 2);
        assert_eq!(payload.competitors[0].bib, "9");
        assert_eq!(payload.competitors[0].position, 2);
        assert_eq!(payload.competitors[1].position, 1);
    }

    #[test]
    fn results_sorted_by_rank_then_start_order_with_rank_zero_last() {
        let xml = r#"<Canoe123><Results RaceID="K1M_ST_BR2_6" Current="Y">
            <Row Number="1"><Participant Bib="1" StartOrder="2"/><Result Type="T" Rank="0"/></Row>
            <Row Number="2"><Participant Bib="2" StartOrder="1"/><Result Type="T" Rank="1"/></Row>
        </Results></Canoe123>"#;
        let recs = decode_frame(xml).unwrap();
        let DecodedRecord::Results(payload) = &recs[0] else {
            panic!("expected results");
        };
        assert!(payload.is_current);
        assert_eq!(payload.rows[0].bib, "2");
        assert_eq!(payload.rows[1].bib, "1");
    }

    #[test]
    fn result_row_fallback_rank_uses_row_number() {
        let xml = r#"<Canoe123><Results RaceID="r"><Row Number="3"><Participant Bib="1"/><Result Type="T"/></Row></Results></Canoe123>"#;
        let recs = decode_frame(xml).unwrap();
        let DecodedRecord::Results(payload) = &recs[0] else {
            panic!("expected results");
        };
        assert_eq!(payload.rows[0].rank, 3);
    }

    #[test]
    fn unknown_top_level_element_is_kept_for_visibility() {
        let recs = decode_frame(r#"<Canoe123><SomethingElse Foo="1"/></Canoe123>"#).unwrap();
        assert_eq!(
            recs,
            vec![DecodedRecord::Unknown {
                element: "SomethingElse".into()
            }]
        );
    }

    #[test]
    fn schedule_filters_nothing_itself_races_kept_verbatim() {
        let xml = r#"<Canoe123><Schedule>
            <Race RaceID="K1M_ST_BR2_6" ClassID="K1M" Description="Run 2"><StartTime/></Race>
        </Schedule></Canoe123>"#;
        let recs = decode_frame(xml).unwrap();
        let DecodedRecord::Schedule(payload) = &recs[0] else {
            panic!("expected schedule");
        };
        assert_eq!(payload.races.len(), 1);
        assert_eq!(payload.races[0].start_time, None);
    }

    #[test]
    fn multiple_top_level_records_in_one_frame() {
        let xml = r#"<Canoe123><TimeOfDay>10:30:00</TimeOfDay><RaceConfig NrSplits="4" NrGates="20"/></Canoe123>"#;
        let recs = decode_frame(xml).unwrap();
        assert_eq!(recs.len(), 2);
        assert!(matches!(recs[1], DecodedRecord::RaceConfig(_)));
    }
}
