use crate::AppError;
use std::cmp::Ordering;

/// Order of identifiers when no sort is requested: integers ascending, then everything else
/// lexicographically.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

pub fn parse_score(value: &str) -> Result<f64, AppError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| !v.is_nan())
        .ok_or_else(|| AppError::Store(format!("One or more scores can't be converted into double: {value:?}")))
}

pub fn parse_integer(value: &str) -> Result<i64, AppError> {
    value
        .parse::<i64>()
        .map_err(|_| AppError::Store(format!("value is not an integer or out of range: {value:?}")))
}

/// Resolves redis-style `start`/`stop` list offsets (negative counts from the end, both inclusive)
/// into a half-open range over `len` elements.
pub fn list_window(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len_i = len as isize;
    let mut from = if start < 0 { len_i + start } else { start };
    let mut to = if stop < 0 { len_i + stop } else { stop };
    if from < 0 {
        from = 0;
    }
    if to >= len_i {
        to = len_i - 1;
    }
    if from > to || from >= len_i {
        return None;
    }
    Some((from as usize, to as usize + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_order_is_numeric_first() {
        let mut ids = vec!["10", "2", "abc", "1", "-4"];
        ids.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(ids, vec!["-4", "1", "2", "10", "abc"]);
    }

    #[test]
    fn list_window_handles_negative_offsets() {
        assert_eq!(list_window(5, 0, -1), Some((0, 5)));
        assert_eq!(list_window(5, -2, -1), Some((3, 5)));
        assert_eq!(list_window(5, 1, 2), Some((1, 3)));
        assert_eq!(list_window(5, 3, 1), None);
        assert_eq!(list_window(0, 0, -1), None);
        assert_eq!(list_window(3, 0, 100), Some((0, 3)));
    }

    #[test]
    fn scores_reject_text() {
        assert_eq!(parse_score(" 15.1 ").unwrap(), 15.1);
        assert!(matches!(parse_score("sail"), Err(AppError::Store(_))));
    }
}
