//! New-notice differ: decides which notices are new for a subscriber based on
//! their cursor, and computes the cursor's next value.

use crate::fibapi::Notice;

/// Result of diffing a fetched notice list against a subscriber's cursor.
#[derive(Debug)]
pub struct Diff {
    /// Notices to deliver, ordered ascending by publish time (ties broken by
    /// subject code, then title, matching the Racó web UI's own ordering).
    pub new_notices: Vec<Notice>,
    /// Next value for `last_notice_timestamp`. Never less than the input
    /// cursor value.
    pub max_timestamp: i64,
}

/// Computes the notices published after `last_timestamp`, in delivery order.
///
/// A `last_timestamp` of zero marks a subscriber whose baseline has not been
/// established yet: nothing is reported as new, the run only seeds the cursor
/// with the newest publish time seen (so an old backlog is never delivered).
pub fn new_notices(notices: &[Notice], last_timestamp: i64) -> Diff {
    let mut sorted: Vec<Notice> = notices.to_vec();
    sorted.sort_by(|a, b| {
        a.published_at()
            .cmp(&b.published_at())
            .then_with(|| a.subject_code.cmp(&b.subject_code))
            .then_with(|| a.title.cmp(&b.title))
    });

    let max_timestamp = sorted
        .last()
        .map(|n| n.published_at().unix())
        .unwrap_or(last_timestamp)
        .max(last_timestamp);

    let new_notices = if last_timestamp == 0 {
        Vec::new()
    } else {
        sorted
            .into_iter()
            .filter(|n| n.published_at().unix() > last_timestamp)
            .collect()
    };

    Diff {
        new_notices,
        max_timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(id: i64, subject: &str, title: &str, modified: &str) -> Notice {
        serde_json::from_str(&format!(
            r#"{{"id": {id}, "titol": "{title}", "codi_assig": "{subject}", "text": "",
                "data_insercio": "2022-01-01T00:00:00",
                "data_modificacio": "{modified}",
                "data_caducitat": "2023-01-01T00:00:00", "adjunts": []}}"#
        ))
        .unwrap()
    }

    fn unix(modified: &str) -> i64 {
        notice(0, "X", "x", modified).published_at().unix()
    }

    #[test]
    fn empty_list_keeps_cursor() {
        let diff = new_notices(&[], 1234);
        assert!(diff.new_notices.is_empty());
        assert_eq!(diff.max_timestamp, 1234);
    }

    #[test]
    fn uninitialized_cursor_suppresses_backlog() {
        let notices = vec![
            notice(1, "SI", "a", "2022-02-12T10:00:00"),
            notice(2, "PROP", "b", "2022-02-12T11:00:00"),
        ];
        let diff = new_notices(&notices, 0);
        assert!(diff.new_notices.is_empty());
        assert_eq!(diff.max_timestamp, unix("2022-02-12T11:00:00"));
    }

    #[test]
    fn only_notices_after_cursor_are_new() {
        let cursor = unix("2022-02-12T10:30:00");
        let notices = vec![
            notice(1, "SI", "old", "2022-02-12T10:00:00"),
            notice(2, "PROP", "new", "2022-02-12T11:00:00"),
            notice(3, "AC", "boundary", "2022-02-12T10:30:00"),
        ];
        let diff = new_notices(&notices, cursor);
        let ids: Vec<i64> = diff.new_notices.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![2]);
        assert_eq!(diff.max_timestamp, unix("2022-02-12T11:00:00"));
    }

    #[test]
    fn delivery_order_is_ascending_with_tie_breaks() {
        let cursor = unix("2022-02-12T00:00:01");
        let notices = vec![
            notice(4, "SI", "b", "2022-02-12T11:00:00"),
            notice(1, "PROP", "a", "2022-02-12T10:00:00"),
            notice(3, "SI", "a", "2022-02-12T11:00:00"),
            notice(2, "AC", "z", "2022-02-12T11:00:00"),
        ];
        let diff = new_notices(&notices, cursor);
        let ids: Vec<i64> = diff.new_notices.iter().map(|n| n.id).collect();
        // 10:00 first, then the 11:00 ties ordered AC < SI, then title a < b.
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn max_timestamp_is_monotonic() {
        let cursor = unix("2022-06-01T00:00:00");
        let notices = vec![notice(1, "SI", "stale", "2022-02-12T10:00:00")];
        let diff = new_notices(&notices, cursor);
        assert!(diff.new_notices.is_empty());
        assert_eq!(diff.max_timestamp, cursor);
    }
}
