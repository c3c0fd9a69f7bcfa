//! Filter types shared by the list/search endpoints.

/// A comma-separated enum filter where each token is either `VAL` (include)
/// or `!VAL` (exclude). Both sets may be present at once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl ValueFilter {
    /// Parses `"A,!B,C"` into include `[A, C]` / exclude `[B]`. Empty tokens
    /// are dropped; a bare `!` is ignored.
    pub fn parse(raw: &str) -> Self {
        let mut filter = Self::default();
        for token in raw.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            if let Some(rest) = token.strip_prefix('!') {
                if !rest.is_empty() {
                    filter.exclude.push(rest.to_owned());
                }
            } else {
                filter.include.push(token.to_owned());
            }
        }
        filter
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }
}

/// How a tag list constrains results.
///
/// Projects require every listed tag; features and tasks require at least
/// one. The asymmetry is deliberate and preserved from the original data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagMatch {
    All,
    #[default]
    Any,
}

/// Options recognized by the search endpoints. Unused fields are ignored by
/// repositories they do not apply to.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Case-insensitive substring against the denormalized search vector.
    pub query: Option<String>,

    pub status: Option<ValueFilter>,
    pub priority: Option<ValueFilter>,

    /// Exact parent filters.
    pub project_id: Option<String>,
    pub feature_id: Option<String>,

    /// Comma-separated in the external surface; already split here.
    pub tags: Vec<String>,

    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl SearchFilter {
    /// Convenience constructor for a substring query.
    pub fn query(q: impl Into<String>) -> Self {
        Self {
            query: Some(q.into()),
            ..Self::default()
        }
    }
}
