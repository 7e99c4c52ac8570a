use crate::storage::{SortBy, SortOptions};
use crate::utils::{natural_cmp, parse_score};
use crate::AppError;
use std::cmp::Ordering;

/// A `*`-pattern resolved against one member: the key to read and, for `key->field` patterns,
/// the hash field within it.
pub fn resolve_pattern(pattern: &str, member: &str) -> (String, Option<String>) {
    let (key_part, hash_field) = match pattern.split_once("->") {
        Some((k, f)) => (k, Some(f.to_string())),
        None => (pattern, None),
    };
    (key_part.replacen('*', member, 1), hash_field)
}

enum SortKey {
    Num(f64),
    Text(String),
}

/// Store-agnostic implementation of the `sort` command. `lookup` reads a string key, or a hash
/// field when the second argument is set.
pub fn sort_members<I, F>(members: I, opts: &SortOptions, mut lookup: F) -> Result<Vec<Vec<Option<String>>>, AppError>
where
    I: IntoIterator<Item = String>,
    F: FnMut(&str, Option<&str>) -> Result<Option<String>, AppError>,
{
    let mut members: Vec<String> = members.into_iter().collect();

    match &opts.by {
        SortBy::NoSort => members.sort_by(|a, b| natural_cmp(a, b)),
        by => {
            let mut keyed = Vec::with_capacity(members.len());
            for member in members {
                let raw = match by {
                    SortBy::Pattern(pattern) => {
                        let (key, field) = resolve_pattern(pattern, &member);
                        lookup(&key, field.as_deref())?
                    }
                    _ => Some(member.clone()),
                };
                let key = if opts.alpha {
                    SortKey::Text(raw.unwrap_or_default())
                } else {
                    match raw {
                        None => SortKey::Num(0.0),
                        Some(v) => SortKey::Num(parse_score(&v)?),
                    }
                };
                keyed.push((key, member));
            }
            keyed.sort_by(|(ka, ma), (kb, mb)| {
                let ord = match (ka, kb) {
                    (SortKey::Num(a), SortKey::Num(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
                    (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
                    _ => Ordering::Equal,
                }
                .then_with(|| natural_cmp(ma, mb));
                if opts.desc { ord.reverse() } else { ord }
            });
            members = keyed.into_iter().map(|(_, m)| m).collect();
        }
    }

    if opts.by == SortBy::NoSort && opts.desc {
        members.reverse();
    }

    let window: Vec<String> = match opts.limit {
        Some((offset, count)) => members.into_iter().skip(offset).take(count).collect(),
        None => members,
    };

    if opts.get.is_empty() {
        return Ok(window.into_iter().map(|m| vec![Some(m)]).collect());
    }

    let mut rows = Vec::with_capacity(window.len());
    for member in window {
        let mut row = Vec::with_capacity(opts.get.len());
        for pattern in &opts.get {
            if pattern == crate::keys::MEMBER_PATTERN {
                row.push(Some(member.clone()));
            } else {
                let (key, field) = resolve_pattern(pattern, &member);
                row.push(lookup(&key, field.as_deref())?);
            }
        }
        rows.push(row);
    }
    Ok(rows)
}
