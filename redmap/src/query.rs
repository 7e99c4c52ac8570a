use std::collections::BTreeSet;
use std::ops::{Bound, RangeBounds};

/// Ordering of a collection: by identifier when `field` is `None`.
///
/// Instances with equal values keep identifier order, integers first, so `"9"` precedes `"10"`.
/// A descending sort reverses the whole order, ties included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: Option<String>,
    pub desc: bool,
    pub alpha: bool,
}

impl Sort {
    /// Identifier order, numeric unless [`Sort::alpha`] is set.
    pub fn pk() -> Self {
        Sort { field: None, desc: false, alpha: false }
    }

    /// Order by a field; a leading `-` reverses it, e.g. `Sort::by("-length")`.
    pub fn by(spec: &str) -> Self {
        match spec.strip_prefix('-') {
            Some(field) => Sort { field: Some(field.to_string()), desc: true, alpha: false },
            None => Sort { field: Some(spec.to_string()), desc: false, alpha: false },
        }
    }

    pub fn alpha(mut self) -> Self {
        self.alpha = true;
        self
    }

    pub fn desc(mut self) -> Self {
        self.desc = true;
        self
    }
}

/// Equality filter, already checked against the model.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Filter {
    Pk(String),
    Field { index: usize, value: String },
    Ids(BTreeSet<String>),
}

/// Half-open window over the ordered result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Window {
    pub offset: usize,
    pub count: Option<usize>,
}

impl Window {
    pub fn is_all(&self) -> bool {
        self.offset == 0 && self.count.is_none()
    }

    /// Narrows the window by `range`, interpreted relative to the current window.
    pub fn narrow(self, range: impl RangeBounds<usize>) -> Window {
        let start = match range.start_bound() {
            Bound::Included(s) => *s,
            Bound::Excluded(s) => s.saturating_add(1),
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(e) => Some(e.saturating_add(1)),
            Bound::Excluded(e) => Some(*e),
            Bound::Unbounded => None,
        };
        let wanted = end.map(|e| e.saturating_sub(start));
        let available = self.count.map(|c| c.saturating_sub(start));
        let count = match (wanted, available) {
            (Some(w), Some(a)) => Some(w.min(a)),
            (w, a) => w.or(a),
        };
        Window { offset: self.offset.saturating_add(start), count }
    }

    pub fn as_limit(&self) -> Option<(usize, usize)> {
        if self.is_all() {
            None
        } else {
            Some((self.offset, self.count.unwrap_or(usize::MAX)))
        }
    }
}
