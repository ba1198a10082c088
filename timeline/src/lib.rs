//! Timeline domain library: dated events packed into lanes on a day grid.
//! The core stays pure (parse, pack, map); interaction state machines return
//! replacement values and the session decides when to adopt them.

pub mod core {
    use chrono::NaiveDate;
    use serde::{Deserialize, Serialize};
    use std::fmt;

    /// Canonical on-disk date format for `start`/`end`.
    pub const DATE_FORMAT: &str = "%Y-%m-%d";

    /* ------------------------------- IDs ------------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct EventId(pub i64);

    impl fmt::Display for EventId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    /* ---------------------------- Seed records ---------------------------- */

    /// A record as handed over by the seed loader; dates are still text.
    ///
    /// Absent dates deserialize to `None` so the parser can report them
    /// against the record's id.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RawEvent {
        pub id: EventId,
        pub name: String,
        #[serde(default)]
        pub start: Option<String>,
        #[serde(default)]
        pub end: Option<String>,
    }

    /* ------------------------------ Entities ------------------------------ */

    /// A timeline event with its dates resolved.
    ///
    /// `start`/`end` are the canonical source strings; `start_date`/`end_date`
    /// are derived from them and the two pairs are always updated together.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Event {
        pub id: EventId,
        pub name: String,
        pub start: String,
        pub end: String,
        pub start_date: NaiveDate,
        pub end_date: NaiveDate,
    }

    impl Event {
        /// Copy of this event moved to a new range; the source strings follow the dates.
        pub fn rescheduled(&self, start_date: NaiveDate, end_date: NaiveDate) -> Self {
            Self {
                id: self.id,
                name: self.name.clone(),
                start: start_date.format(DATE_FORMAT).to_string(),
                end: end_date.format(DATE_FORMAT).to_string(),
                start_date,
                end_date,
            }
        }

        pub fn renamed(&self, name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                ..self.clone()
            }
        }

        pub fn is_inverted(&self) -> bool {
            self.start_date > self.end_date
        }

        /// Inclusive length in days (a single-day event is 1).
        pub fn span_days(&self) -> i64 {
            (self.end_date - self.start_date).num_days() + 1
        }
    }

    /* ------------------------------- Policies ------------------------------- */

    /// Order in which the lane packer visits events.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum PackOrder {
        /// First-fit over the collection order. Order-sensitive.
        #[default]
        InputOrder,
        /// Stable sort by start date before first-fit; yields the minimum lane count.
        ByStart,
    }

    /// What loading does with a record whose start is after its end.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum RangePolicy {
        /// Load as-is. Lanes may then lose their start ordering.
        Accept,
        Reject,
        /// Collapse to a single day at `start`.
        #[default]
        Clamp,
    }

    /// What a rename commit does with a blank draft.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum NamePolicy {
        AcceptAny,
        #[default]
        KeepPreviousIfBlank,
    }

    /* ----------------------------- Configuration ----------------------------- */

    /// Named constants for mapping and interaction. Every field has a default,
    /// so partial JSON documents are accepted.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct TimelineConfig {
        /// Day that maps to grid column 1.
        pub origin: NaiveDate,
        /// Pointer distance that equals one day while dragging.
        pub column_width_px: f64,
        /// Number of day columns the grid is laid out with.
        pub grid_columns: u32,
        /// Rendered width of one day at zoom level 1.0.
        pub cell_width_px: f64,
        pub pack_order: PackOrder,
        pub range_policy: RangePolicy,
        pub name_policy: NamePolicy,
    }

    impl Default for TimelineConfig {
        fn default() -> Self {
            Self {
                origin: NaiveDate::from_ymd_opt(2021, 1, 1).expect("valid origin date"),
                column_width_px: 100.0,
                grid_columns: 100,
                cell_width_px: 50.0,
                pack_order: PackOrder::default(),
                range_policy: RangePolicy::default(),
                name_policy: NamePolicy::default(),
            }
        }
    }

    impl TimelineConfig {
        pub fn validate(&self) -> Result<(), DomainError> {
            if !(self.column_width_px.is_finite() && self.column_width_px > 0.0) {
                return Err(DomainError::InvalidConfig {
                    field: "column_width_px",
                    reason: format!("expected a positive width, got {}", self.column_width_px),
                });
            }
            if !(self.cell_width_px.is_finite() && self.cell_width_px > 0.0) {
                return Err(DomainError::InvalidConfig {
                    field: "cell_width_px",
                    reason: format!("expected a positive width, got {}", self.cell_width_px),
                });
            }
            if self.grid_columns == 0 {
                return Err(DomainError::InvalidConfig {
                    field: "grid_columns",
                    reason: "expected at least one column".into(),
                });
            }
            Ok(())
        }
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum DateField {
        Start,
        End,
    }

    impl fmt::Display for DateField {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                DateField::Start => f.write_str("start"),
                DateField::End => f.write_str("end"),
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    pub enum DomainError {
        #[error("event {id}: invalid {field} date {value:?} (expected YYYY-MM-DD)")]
        InvalidDate {
            id: EventId,
            field: DateField,
            value: String,
        },
        #[error("event {id}: missing {field} date")]
        MissingDate { id: EventId, field: DateField },
        #[error("event {id}: start {start} is after end {end}")]
        InvertedRange {
            id: EventId,
            start: NaiveDate,
            end: NaiveDate,
        },
        #[error("duplicate event id {0}")]
        DuplicateId(EventId),
        #[error("invalid configuration for {field}: {reason}")]
        InvalidConfig { field: &'static str, reason: String },
    }

}

pub mod parser {
    //! Seed normalization built on `nom`.
    //!
    //! Accepts `YYYY-MM-DD`, optionally followed by a `T`/space time-of-day and
    //! zone suffix. The time is validated and then dropped, so every event sits
    //! on whole days and grid coordinates stay integral.

    use crate::core::*;
    use chrono::{NaiveDate, NaiveTime};
    use log::debug;
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{tag, take_while_m_n},
        character::complete::{char, digit1, one_of},
        combinator::{all_consuming, map_res, opt, recognize},
        sequence::{preceded, tuple},
    };
    use std::collections::HashSet;

    /* ------------------------ Public entry points ------------------------ */

    /// Parse a whole batch. The first bad record fails the batch; nothing partial
    /// is returned.
    pub fn parse_events(raw: &[RawEvent], policy: RangePolicy) -> Result<Vec<Event>, DomainError> {
        let mut seen = HashSet::with_capacity(raw.len());
        let mut out = Vec::with_capacity(raw.len());
        for record in raw {
            if !seen.insert(record.id) {
                return Err(DomainError::DuplicateId(record.id));
            }
            out.push(parse_event(record, policy)?);
        }
        debug!("parsed {} events", out.len());
        Ok(out)
    }

    pub fn parse_event(raw: &RawEvent, policy: RangePolicy) -> Result<Event, DomainError> {
        let (start, start_date) = parse_field(raw, DateField::Start, raw.start.as_deref())?;
        let (end, end_date) = parse_field(raw, DateField::End, raw.end.as_deref())?;

        let mut event = Event {
            id: raw.id,
            name: raw.name.clone(),
            start,
            end,
            start_date,
            end_date,
        };

        if event.is_inverted() {
            match policy {
                RangePolicy::Accept => {}
                RangePolicy::Reject => {
                    return Err(DomainError::InvertedRange {
                        id: raw.id,
                        start: start_date,
                        end: end_date,
                    });
                }
                RangePolicy::Clamp => {
                    debug!("event {}: clamping end {} to start {}", raw.id, end_date, start_date);
                    event.end = start_date.format(DATE_FORMAT).to_string();
                    event.end_date = start_date;
                }
            }
        }
        Ok(event)
    }

    /// Parse a date-like string, discarding any time-of-day.
    pub fn parse_date(input: &str) -> Option<NaiveDate> {
        all_consuming(date_with_optional_time)(input.trim())
            .ok()
            .map(|(_, date)| date)
    }

    fn parse_field(
        raw: &RawEvent,
        field: DateField,
        value: Option<&str>,
    ) -> Result<(String, NaiveDate), DomainError> {
        let value = value.ok_or(DomainError::MissingDate { id: raw.id, field })?;
        let date = parse_date(value).ok_or_else(|| DomainError::InvalidDate {
            id: raw.id,
            field,
            value: value.to_string(),
        })?;
        Ok((value.to_string(), date))
    }

    /* ----------------------------- Combinators ----------------------------- */

    type PResult<'a, T> = IResult<&'a str, T>;

    fn date_with_optional_time(i: &str) -> PResult<'_, NaiveDate> {
        let (i, date) = calendar_date(i)?;
        let (i, _) = opt(preceded(
            one_of("Tt "),
            tuple((time_of_day, opt(zone_suffix))),
        ))(i)?;
        Ok((i, date))
    }

    fn calendar_date(i: &str) -> PResult<'_, NaiveDate> {
        map_res(
            tuple((
                map_res(four_digits, |s: &str| s.parse::<i32>()),
                char('-'),
                map_res(two_digits, |s: &str| s.parse::<u32>()),
                char('-'),
                map_res(two_digits, |s: &str| s.parse::<u32>()),
            )),
            |(y, _, m, _, d)| NaiveDate::from_ymd_opt(y, m, d).ok_or("invalid date"),
        )(i)
    }

    fn time_of_day(i: &str) -> PResult<'_, NaiveTime> {
        map_res(
            tuple((
                map_res(two_digits, |s: &str| s.parse::<u32>()),
                preceded(char(':'), map_res(two_digits, |s: &str| s.parse::<u32>())),
                opt(preceded(
                    char(':'),
                    map_res(two_digits, |s: &str| s.parse::<u32>()),
                )),
                opt(preceded(char('.'), digit1)),
            )),
            |(h, m, s, _frac)| NaiveTime::from_hms_opt(h, m, s.unwrap_or(0)).ok_or("invalid time"),
        )(i)
    }

    fn zone_suffix(i: &str) -> PResult<'_, &str> {
        alt((
            tag("Z"),
            recognize(tuple((one_of("+-"), two_digits, char(':'), two_digits))),
        ))(i)
    }

    fn four_digits(i: &str) -> PResult<'_, &str> {
        take_while_m_n(4, 4, |c: char| c.is_ascii_digit())(i)
    }

    fn two_digits(i: &str) -> PResult<'_, &str> {
        take_while_m_n(2, 2, |c: char| c.is_ascii_digit())(i)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn raw(id: i64, start: &str, end: &str) -> RawEvent {
            RawEvent {
                id: EventId(id),
                name: format!("Event {id}"),
                start: Some(start.into()),
                end: Some(end.into()),
            }
        }

        fn date(y: i32, m: u32, d: u32) -> NaiveDate {
            NaiveDate::from_ymd_opt(y, m, d).unwrap()
        }

        #[test]
        fn iso_dates_parse() {
            assert_eq!(parse_date("2021-01-05"), Some(date(2021, 1, 5)));
            assert_eq!(parse_date(" 2021-12-31 "), Some(date(2021, 12, 31)));
        }

        #[test]
        fn time_of_day_is_truncated() {
            assert_eq!(parse_date("2021-01-05T23:59:59"), Some(date(2021, 1, 5)));
            assert_eq!(parse_date("2021-01-05T08:00Z"), Some(date(2021, 1, 5)));
            assert_eq!(parse_date("2021-01-05 08:00:00.250+02:00"), Some(date(2021, 1, 5)));
        }

        #[test]
        fn malformed_dates_are_rejected() {
            for bad in [
                "",
                "2021-1-05",
                "2021/01/05",
                "2021-02-30",
                "2021-01-05T25:00",
                "2021-01-05Tnoon",
                "2021-01-05 extra",
                "yesterday",
            ] {
                assert_eq!(parse_date(bad), None, "{bad:?} should not parse");
            }
        }

        #[test]
        fn batch_preserves_order_and_length() {
            let input = vec![
                raw(3, "2021-01-04", "2021-01-06"),
                raw(1, "2021-01-01", "2021-01-03"),
                raw(2, "2021-01-02", "2021-01-05"),
            ];
            let events = parse_events(&input, RangePolicy::Accept).expect("parse");
            let ids: Vec<i64> = events.iter().map(|e| e.id.0).collect();
            assert_eq!(ids, vec![3, 1, 2]);
            assert_eq!(events[1].start_date, date(2021, 1, 1));
            assert_eq!(events[1].end_date, date(2021, 1, 3));
            assert_eq!(events[1].start, "2021-01-01");
        }

        #[test]
        fn bad_record_fails_the_batch_with_its_id() {
            let input = vec![
                raw(1, "2021-01-01", "2021-01-03"),
                raw(2, "2021-01-02", "not-a-date"),
            ];
            let err = parse_events(&input, RangePolicy::Accept).unwrap_err();
            assert_eq!(
                err,
                DomainError::InvalidDate {
                    id: EventId(2),
                    field: DateField::End,
                    value: "not-a-date".into(),
                }
            );
            assert!(err.to_string().contains("event 2"));
        }

        #[test]
        fn duplicate_ids_are_rejected() {
            let input = vec![
                raw(1, "2021-01-01", "2021-01-03"),
                raw(1, "2021-01-04", "2021-01-05"),
            ];
            assert_eq!(
                parse_events(&input, RangePolicy::Accept),
                Err(DomainError::DuplicateId(EventId(1)))
            );
        }

        #[test]
        fn inverted_range_policies() {
            let record = raw(9, "2021-01-05", "2021-01-02");

            let accepted = parse_event(&record, RangePolicy::Accept).expect("accept");
            assert!(accepted.is_inverted());

            assert!(matches!(
                parse_event(&record, RangePolicy::Reject),
                Err(DomainError::InvertedRange { id: EventId(9), .. })
            ));

            let clamped = parse_event(&record, RangePolicy::Clamp).expect("clamp");
            assert_eq!(clamped.end_date, date(2021, 1, 5));
            assert_eq!(clamped.end, "2021-01-05");
            assert_eq!(clamped.span_days(), 1);
        }
    }
}

pub mod storage {
    use crate::core::RawEvent;
    use anyhow::{Context, Result};
    use std::{fs, path::Path};

    /// Where seed records come from. Parsing into events is a separate step.
    pub trait EventSource {
        fn load(&self, path: &Path) -> Result<Vec<RawEvent>>;
    }

    /// Reads a JSON array of `{ id, name, start, end }` records. Extra fields are ignored.
    pub struct JsonEventSource;

    impl EventSource for JsonEventSource {
        fn load(&self, path: &Path) -> Result<Vec<RawEvent>> {
            let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
            raw_events_from_str(&text).with_context(|| format!("decoding {:?}", path))
        }
    }

    pub fn raw_events_from_str(text: &str) -> Result<Vec<RawEvent>> {
        let records: Vec<RawEvent> =
            serde_json::from_str(text).context("expected a JSON array of event records")?;
        Ok(records)
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::core::{DateField, DomainError, EventId, RangePolicy};
        use crate::parser::parse_events;

        #[test]
        fn json_source_reads_seed_file() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("items.json");
            fs::write(
                &path,
                r#"[{"id":1,"name":"Plan","start":"2021-01-01","end":"2021-01-03","color":"red"}]"#,
            )
            .expect("write seed");

            let records = JsonEventSource.load(&path).expect("load");
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].id, EventId(1));
            assert_eq!(records[0].end.as_deref(), Some("2021-01-03"));
        }

        #[test]
        fn missing_file_reports_path() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("absent.json");
            let err = JsonEventSource.load(&path).unwrap_err();
            assert!(format!("{err:#}").contains("absent.json"));
        }

        #[test]
        fn missing_date_is_reported_with_record_id() {
            let records = raw_events_from_str(r#"[{"id":7,"name":"x","end":"2021-01-01"}]"#)
                .expect("record decodes without start");
            assert_eq!(records[0].start, None);

            let err = parse_events(&records, RangePolicy::default()).unwrap_err();
            assert_eq!(
                err,
                DomainError::MissingDate {
                    id: EventId(7),
                    field: DateField::Start,
                }
            );
            assert!(err.to_string().contains("event 7"));
        }
    }
}

pub mod lanes {
    //! First-fit lane packing over one dimension (days).
    //!
    //! Lanes are a derived view: recomputed from the current events on every
    //! call and never cached.

    use crate::core::{Event, PackOrder};
    use log::debug;

    /// Non-overlapping run of events, in placement order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Lane<'a> {
        pub events: Vec<&'a Event>,
    }

    impl<'a> Lane<'a> {
        /// Strict: an event starting on the day the last one ends does not fit.
        fn fits(&self, event: &Event) -> bool {
            self.events
                .last()
                .is_some_and(|last| last.end_date < event.start_date)
        }

        pub fn len(&self) -> usize {
            self.events.len()
        }

        pub fn is_empty(&self) -> bool {
            self.events.is_empty()
        }

        pub fn iter(&self) -> impl Iterator<Item = &'a Event> + '_ {
            self.events.iter().copied()
        }
    }

    /// Pack in the order given.
    pub fn pack_lanes(events: &[Event]) -> Vec<Lane<'_>> {
        pack_lanes_with_order(events, PackOrder::InputOrder)
    }

    pub fn pack_lanes_with_order<'a>(
        events: impl IntoIterator<Item = &'a Event>,
        order: PackOrder,
    ) -> Vec<Lane<'a>> {
        let mut queue: Vec<&'a Event> = events.into_iter().collect();
        if order == PackOrder::ByStart {
            queue.sort_by_key(|e| e.start_date);
        }

        let mut lanes: Vec<Lane<'a>> = Vec::new();
        for event in queue {
            match lanes.iter_mut().find(|lane| lane.fits(event)) {
                Some(lane) => lane.events.push(event),
                None => lanes.push(Lane {
                    events: vec![event],
                }),
            }
        }
        debug!(
            "packed {} events into {} lanes ({:?})",
            lanes.iter().map(Lane::len).sum::<usize>(),
            lanes.len(),
            order
        );
        lanes
    }

}

pub mod grid {
    //! Date ↔ grid column mapping. Columns are 1-indexed and half-open:
    //! a one-day event at the origin occupies `[1, 2)`.

    use crate::core::Event;
    use chrono::NaiveDate;
    use serde::Serialize;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GridSpan {
        pub grid_start: i64,
        pub grid_end: i64,
    }

    impl GridSpan {
        pub fn width(&self) -> i64 {
            self.grid_end - self.grid_start
        }

        /// True for spans produced by inverted ranges.
        pub fn is_degenerate(&self) -> bool {
            self.grid_end <= self.grid_start
        }
    }

    /// Whole days from `a` to `b` (negative when `b` is earlier).
    pub fn days_between(a: NaiveDate, b: NaiveDate) -> i64 {
        (b - a).num_days()
    }

    pub fn grid_span(event: &Event, origin: NaiveDate) -> GridSpan {
        GridSpan {
            grid_start: days_between(origin, event.start_date) + 1,
            grid_end: days_between(origin, event.end_date) + 2,
        }
    }

}

pub mod interaction {
    //! Drag and rename state machines plus zoom.
    //!
    //! None of these own the event collection. They read the current event and
    //! hand back a replacement; the session swaps it in.

    use crate::core::{Event, EventId, NamePolicy};
    use chrono::{Days, NaiveDate};
    use log::debug;
    use serde::{Deserialize, Serialize};

    /* --------------------------------- Drag --------------------------------- */

    /// Pointer position and event range captured at drag start.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct DragAnchor {
        pub event_id: EventId,
        pub pointer_x: f64,
        pub start_date: NaiveDate,
        pub end_date: NaiveDate,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    pub enum DragState {
        #[default]
        Idle,
        Dragging(DragAnchor),
    }

    impl DragState {
        /// Capture the anchor. Starting over an active drag replaces its anchor.
        pub fn begin(&mut self, event: &Event, pointer_x: f64) {
            if let DragState::Dragging(previous) = self {
                debug!(
                    "re-anchoring drag: event {} -> event {}",
                    previous.event_id, event.id
                );
            }
            *self = DragState::Dragging(DragAnchor {
                event_id: event.id,
                pointer_x,
                start_date: event.start_date,
                end_date: event.end_date,
            });
        }

        pub fn anchor(&self) -> Option<&DragAnchor> {
            match self {
                DragState::Dragging(anchor) => Some(anchor),
                DragState::Idle => None,
            }
        }

        pub fn dragged_event(&self) -> Option<EventId> {
            self.anchor().map(|a| a.event_id)
        }

        pub fn is_dragging(&self) -> bool {
            matches!(self, DragState::Dragging(_))
        }

        /// Replacement for the dragged event with the pointer at `pointer_x`.
        ///
        /// Always computed from the anchor, never from `event`'s current dates.
        /// `None` when idle, when `event` is not the one being dragged, or when the
        /// shift leaves the representable calendar.
        pub fn reschedule(&self, event: &Event, pointer_x: f64, column_width_px: f64) -> Option<Event> {
            let anchor = self.anchor()?;
            if anchor.event_id != event.id {
                return None;
            }
            let days = drag_days(pointer_x - anchor.pointer_x, column_width_px);
            let start = shift_days(anchor.start_date, days)?;
            let end = shift_days(anchor.end_date, days)?;
            Some(event.rescheduled(start, end))
        }

        /// Back to idle; returns the anchor that was active, if any.
        pub fn end(&mut self) -> Option<DragAnchor> {
            match std::mem::take(self) {
                DragState::Dragging(anchor) => Some(anchor),
                DragState::Idle => None,
            }
        }
    }

    /// Signed whole days for a pointer delta, floored toward negative infinity.
    pub fn drag_days(delta_x: f64, column_width_px: f64) -> i64 {
        (delta_x / column_width_px).floor() as i64
    }

    fn shift_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
        let magnitude = Days::new(days.unsigned_abs());
        if days >= 0 {
            date.checked_add_days(magnitude)
        } else {
            date.checked_sub_days(magnitude)
        }
    }

    /* -------------------------------- Rename -------------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq, Default)]
    pub enum EditState {
        #[default]
        Idle,
        Editing { event_id: EventId, draft: String },
    }

    impl EditState {
        /// Enter editing with the draft seeded from the current name.
        pub fn begin(&mut self, event: &Event) {
            *self = EditState::Editing {
                event_id: event.id,
                draft: event.name.clone(),
            };
        }

        /// Replace the draft; `false` when nothing is being edited.
        pub fn set_draft(&mut self, text: impl Into<String>) -> bool {
            match self {
                EditState::Editing { draft, .. } => {
                    *draft = text.into();
                    true
                }
                EditState::Idle => false,
            }
        }

        pub fn editing(&self) -> Option<(EventId, &str)> {
            match self {
                EditState::Editing { event_id, draft } => Some((*event_id, draft.as_str())),
                EditState::Idle => None,
            }
        }

        /// Leave editing, returning what was being edited.
        pub fn take(&mut self) -> Option<(EventId, String)> {
            match std::mem::take(self) {
                EditState::Editing { event_id, draft } => Some((event_id, draft)),
                EditState::Idle => None,
            }
        }
    }

    /// The renamed event, or `None` when `policy` refuses the draft.
    pub fn apply_rename(event: &Event, draft: &str, policy: NamePolicy) -> Option<Event> {
        match policy {
            NamePolicy::KeepPreviousIfBlank if draft.trim().is_empty() => None,
            _ => Some(event.renamed(draft)),
        }
    }

    /* --------------------------------- Zoom --------------------------------- */

    pub const ZOOM_STEP: f64 = 1.2;
    pub const MIN_ZOOM: f64 = 0.2;
    pub const MAX_ZOOM: f64 = 5.0;

    /// Render-only scale factor; dragging keeps its own column width.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct Zoom {
        level: f64,
    }

    impl Default for Zoom {
        fn default() -> Self {
            Self { level: 1.0 }
        }
    }

    impl Zoom {
        pub fn level(&self) -> f64 {
            self.level
        }

        pub fn can_zoom_in(&self) -> bool {
            self.level < MAX_ZOOM
        }

        pub fn can_zoom_out(&self) -> bool {
            self.level > MIN_ZOOM
        }

        pub fn zoom_in(&mut self) -> bool {
            let before = self.level;
            self.level = (self.level * ZOOM_STEP).min(MAX_ZOOM);
            self.level != before
        }

        pub fn zoom_out(&mut self) -> bool {
            let before = self.level;
            self.level = (self.level / ZOOM_STEP).max(MIN_ZOOM);
            self.level != before
        }

        pub fn cell_width_px(&self, base_cell_width_px: f64) -> f64 {
            self.level * base_cell_width_px
        }
    }

    /* -------------------------------- Signals -------------------------------- */

    /// Inputs from the pointer/keyboard layer. Serialized with a `signal` tag so
    /// recorded sessions can be replayed.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "signal", rename_all = "snake_case")]
    pub enum Signal {
        BeginEdit { event_id: EventId },
        ChangeDraftName { text: String },
        /// Accept key or focus loss.
        CommitEdit,
        BeginDrag { event_id: EventId, pointer_x: f64 },
        MoveDrag { pointer_x: f64 },
        EndDrag,
        /// Pointer-up anywhere on the surface.
        PointerReleased,
        ZoomIn,
        ZoomOut,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SignalOutcome {
        /// An event in the collection was replaced.
        Mutated,
        /// Valid in the current state; the event collection is unchanged.
        Accepted,
        /// Unknown event or wrong state; nothing changed.
        Ignored,
    }

}

pub mod session {
    //! Headless coordinator: the single owner of the event collection.
    //!
    //! Signals are applied one at a time. A mutating signal computes the
    //! replacement event first and swaps it into the collection in one step.

    use crate::core::*;
    use crate::interaction::*;
    use crate::lanes::{Lane, pack_lanes_with_order};
    use crate::parser::parse_events;
    use crate::projectors::render_projector::{self, RenderedTimeline};
    use indexmap::IndexMap;
    use log::{debug, warn};

    #[derive(Debug, Clone)]
    pub struct TimelineSession {
        config: TimelineConfig,
        events: IndexMap<EventId, Event>,
        drag: DragState,
        edit: EditState,
        zoom: Zoom,
    }

    impl TimelineSession {
        /// Validate `config`, parse the seed batch, and start with both machines idle.
        pub fn load(raw: &[RawEvent], config: TimelineConfig) -> Result<Self, DomainError> {
            config.validate()?;
            let events = parse_events(raw, config.range_policy)?
                .into_iter()
                .map(|e| (e.id, e))
                .collect();
            Ok(Self {
                config,
                events,
                drag: DragState::default(),
                edit: EditState::default(),
                zoom: Zoom::default(),
            })
        }

        pub fn config(&self) -> &TimelineConfig {
            &self.config
        }

        /// Events in load order.
        pub fn events(&self) -> impl Iterator<Item = &Event> {
            self.events.values()
        }

        pub fn event(&self, id: EventId) -> Option<&Event> {
            self.events.get(&id)
        }

        pub fn drag_state(&self) -> &DragState {
            &self.drag
        }

        pub fn edit_state(&self) -> &EditState {
            &self.edit
        }

        pub fn zoom(&self) -> &Zoom {
            &self.zoom
        }

        pub fn lanes(&self) -> Vec<Lane<'_>> {
            pack_lanes_with_order(self.events.values(), self.config.pack_order)
        }

        pub fn render(&self) -> RenderedTimeline {
            render_projector::project(self)
        }

        pub fn apply(&mut self, signal: Signal) -> SignalOutcome {
            match signal {
                Signal::BeginEdit { event_id } => self.begin_edit(event_id),
                Signal::ChangeDraftName { text } => self.change_draft_name(text),
                Signal::CommitEdit => self.commit_edit(),
                Signal::BeginDrag {
                    event_id,
                    pointer_x,
                } => self.begin_drag(event_id, pointer_x),
                Signal::MoveDrag { pointer_x } => self.move_drag(pointer_x),
                Signal::EndDrag => self.end_drag(),
                Signal::PointerReleased => self.pointer_released(),
                Signal::ZoomIn => accepted_if(self.zoom.zoom_in()),
                Signal::ZoomOut => accepted_if(self.zoom.zoom_out()),
            }
        }

        /* ------------------------------ Rename ------------------------------ */

        pub fn begin_edit(&mut self, id: EventId) -> SignalOutcome {
            let Some(event) = self.events.get(&id) else {
                warn!("begin_edit: unknown event {id}");
                return SignalOutcome::Ignored;
            };
            self.edit.begin(event);
            debug!("editing event {id}");
            SignalOutcome::Accepted
        }

        pub fn change_draft_name(&mut self, text: impl Into<String>) -> SignalOutcome {
            accepted_if(self.edit.set_draft(text))
        }

        pub fn commit_edit(&mut self) -> SignalOutcome {
            let Some((id, draft)) = self.edit.take() else {
                return SignalOutcome::Ignored;
            };
            let Some(event) = self.events.get(&id) else {
                warn!("commit_edit: event {id} is gone; draft dropped");
                return SignalOutcome::Ignored;
            };
            match apply_rename(event, &draft, self.config.name_policy) {
                Some(renamed) => self.replace(renamed),
                None => {
                    warn!("commit_edit: blank name for event {id}; keeping previous name");
                    SignalOutcome::Accepted
                }
            }
        }

        /* ------------------------------- Drag ------------------------------- */

        pub fn begin_drag(&mut self, id: EventId, pointer_x: f64) -> SignalOutcome {
            let Some(event) = self.events.get(&id) else {
                warn!("begin_drag: unknown event {id}");
                return SignalOutcome::Ignored;
            };
            self.drag.begin(event, pointer_x);
            debug!("dragging event {id} from x={pointer_x}");
            SignalOutcome::Accepted
        }

        pub fn move_drag(&mut self, pointer_x: f64) -> SignalOutcome {
            let Some(id) = self.drag.dragged_event() else {
                return SignalOutcome::Ignored;
            };
            let Some(event) = self.events.get(&id) else {
                warn!("move_drag: dragged event {id} is gone");
                return SignalOutcome::Ignored;
            };
            match self
                .drag
                .reschedule(event, pointer_x, self.config.column_width_px)
            {
                Some(moved) => self.replace(moved),
                None => {
                    warn!("move_drag: event {id} cannot be shifted to x={pointer_x}");
                    SignalOutcome::Ignored
                }
            }
        }

        pub fn end_drag(&mut self) -> SignalOutcome {
            match self.drag.end() {
                Some(anchor) => {
                    debug!("drag of event {} ended", anchor.event_id);
                    SignalOutcome::Accepted
                }
                None => SignalOutcome::Ignored,
            }
        }

        /// Pointer-up anywhere; ends a drag that never saw its own end signal.
        pub fn pointer_released(&mut self) -> SignalOutcome {
            self.end_drag()
        }

        /* ------------------------------ Helpers ------------------------------ */

        fn replace(&mut self, event: Event) -> SignalOutcome {
            match self.events.get_mut(&event.id) {
                Some(slot) if *slot != event => {
                    *slot = event;
                    SignalOutcome::Mutated
                }
                Some(_) => SignalOutcome::Accepted,
                None => SignalOutcome::Ignored,
            }
        }
    }

    fn accepted_if(changed: bool) -> SignalOutcome {
        if changed {
            SignalOutcome::Accepted
        } else {
            SignalOutcome::Ignored
        }
    }

}

pub mod projectors {
    pub mod render_projector {
        //! Projects a session into what a painter needs: lanes of events with
        //! their grid spans and the text to show.

        use crate::core::{Event, EventId};
        use crate::grid::{GridSpan, grid_span};
        use crate::lanes::Lane;
        use crate::session::TimelineSession;
        use chrono::NaiveDate;
        use serde::Serialize;

        #[derive(Debug, Clone, PartialEq, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct RenderedTimeline {
            pub origin: NaiveDate,
            pub grid_columns: u32,
            pub cell_width_px: f64,
            pub zoom: f64,
            pub can_zoom_in: bool,
            pub can_zoom_out: bool,
            pub lanes: Vec<RenderedLane>,
        }

        #[derive(Debug, Clone, PartialEq, Serialize)]
        pub struct RenderedLane {
            pub index: usize,
            pub events: Vec<RenderedEvent>,
        }

        #[derive(Debug, Clone, PartialEq, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct RenderedEvent {
            pub id: EventId,
            pub name: String,
            pub start_date: NaiveDate,
            pub end_date: NaiveDate,
            #[serde(flatten)]
            pub grid: GridSpan,
            /// Draft text while this event's name is being edited.
            #[serde(skip_serializing_if = "Option::is_none")]
            pub draft: Option<String>,
            pub dragging: bool,
        }

        impl RenderedEvent {
            /// Text a painter shows: the draft while editing, otherwise the name.
            pub fn label(&self) -> &str {
                self.draft.as_deref().unwrap_or(&self.name)
            }
        }

        pub fn project(session: &TimelineSession) -> RenderedTimeline {
            let config = session.config();
            let zoom = session.zoom();
            let editing = session.edit_state().editing();
            let dragging = session.drag_state().dragged_event();

            let lanes = session
                .lanes()
                .iter()
                .enumerate()
                .map(|(index, lane)| RenderedLane {
                    index,
                    events: lane
                        .iter()
                        .map(|event| {
                            let mut rendered = project_event(event, config.origin);
                            rendered.draft = editing
                                .filter(|(id, _)| *id == event.id)
                                .map(|(_, draft)| draft.to_string());
                            rendered.dragging = dragging == Some(event.id);
                            rendered
                        })
                        .collect(),
                })
                .collect();

            RenderedTimeline {
                origin: config.origin,
                grid_columns: config.grid_columns,
                cell_width_px: zoom.cell_width_px(config.cell_width_px),
                zoom: zoom.level(),
                can_zoom_in: zoom.can_zoom_in(),
                can_zoom_out: zoom.can_zoom_out(),
                lanes,
            }
        }

        /// Lanes without session state (no draft, nothing dragged).
        pub fn project_lanes(lanes: &[Lane<'_>], origin: NaiveDate) -> Vec<RenderedLane> {
            lanes
                .iter()
                .enumerate()
                .map(|(index, lane)| RenderedLane {
                    index,
                    events: lane.iter().map(|e| project_event(e, origin)).collect(),
                })
                .collect()
        }

        fn project_event(event: &Event, origin: NaiveDate) -> RenderedEvent {
            RenderedEvent {
                id: event.id,
                name: event.name.clone(),
                start_date: event.start_date,
                end_date: event.end_date,
                grid: grid_span(event, origin),
                draft: None,
                dragging: false,
            }
        }

    }
}

pub use lanes::{Lane, pack_lanes};
pub use parser::parse_events;
pub use session::TimelineSession;
