// Timestamp helpers
use chrono::Local;

/// Local time as an ISO-8601 string with microseconds and no offset.
pub fn iso_now() -> String {
    Local::now()
        .naive_local()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_now_parses_back() {
        let stamp = iso_now();
        assert!(chrono::NaiveDateTime::parse_from_str(&stamp, "%Y-%m-%dT%H:%M:%S%.f").is_ok());
        assert_eq!(stamp.len(), "2024-01-01T00:00:00.000000".len());
    }
}
