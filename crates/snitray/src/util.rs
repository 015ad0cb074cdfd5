#[macro_export]
macro_rules! print_result_err {
    ($context:expr, $result:expr $(,)?) => {{
        if let Err(err) = $result {
            log::error!("[{}:{}] Error {}: {:?}", ::std::file!(), ::std::line!(), $context, err);
        }
    }};
}

/// Truncate a string to at most `max` characters for log output, marking the cut.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_owned(),
    }
}

#[cfg(test)]
mod test {
    use super::truncate_for_log;

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("org.example.A", 40), "org.example.A");
        assert_eq!(truncate_for_log("StatusNotifierItem", 6), "Status…");
        assert_eq!(truncate_for_log("", 0), "");
    }
}
