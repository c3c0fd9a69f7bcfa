//! Shared predicate builder for the list/search endpoints.
//!
//! Composes a WHERE clause from `(fragment, values)` pairs joined with AND.
//! User input is always parameterized; LIKE wildcards are escaped before the
//! `%...%` wrap.

use rusqlite::types::ToSql;

use trellis_core::entity::normalize_tag;
use trellis_core::enums::EntityType;
use trellis_core::filter::{TagMatch, ValueFilter};

/// Escapes `%`, `_` and `\` in a LIKE operand. Clauses produced here always
/// carry `ESCAPE '\'`.
pub(crate) fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Accumulates AND-joined predicates with their bound values.
#[derive(Default)]
pub(crate) struct QueryBuilder {
    clauses: Vec<String>,
    params: Vec<Box<dyn ToSql>>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a value and returns its numbered placeholder.
    fn bind(&mut self, value: impl ToSql + 'static) -> String {
        self.params.push(Box::new(value));
        format!("?{}", self.params.len())
    }

    /// Appends a raw predicate with no bound values.
    pub fn push(&mut self, clause: impl Into<String>) {
        self.clauses.push(clause.into());
    }

    /// Case-insensitive substring over the denormalized search vector.
    pub fn query_substring(&mut self, column: &str, query: &str) {
        let needle = format!("%{}%", escape_like(&query.to_lowercase()));
        let ph = self.bind(needle);
        self.clauses.push(format!("{column} LIKE {ph} ESCAPE '\\'"));
    }

    /// Exact-match predicate on a single column.
    pub fn equals(&mut self, column: &str, value: impl ToSql + 'static) {
        let ph = self.bind(value);
        self.clauses.push(format!("{column} = {ph}"));
    }

    /// Include/exclude sets for an enum-valued column.
    pub fn value_filter(&mut self, column: &str, filter: &ValueFilter) {
        if !filter.include.is_empty() {
            let phs: Vec<String> = filter
                .include
                .iter()
                .map(|v| self.bind(v.clone()))
                .collect();
            self.clauses
                .push(format!("{column} IN ({})", phs.join(", ")));
        }
        if !filter.exclude.is_empty() {
            let phs: Vec<String> = filter
                .exclude
                .iter()
                .map(|v| self.bind(v.clone()))
                .collect();
            self.clauses
                .push(format!("{column} NOT IN ({})", phs.join(", ")));
        }
    }

    /// Tag set predicate against `entity_tags`.
    ///
    /// `All` emits one EXISTS per tag (entity must carry every tag); `Any`
    /// emits a single EXISTS with an IN list. Tags are normalized the same
    /// way tag rows are stored, so wildcards in tokens stay literal.
    pub fn tags(&mut self, entity_type: EntityType, id_column: &str, tags: &[String], mode: TagMatch) {
        let normalized: Vec<String> = tags
            .iter()
            .map(|t| normalize_tag(t))
            .filter(|t| !t.is_empty())
            .collect();
        if normalized.is_empty() {
            return;
        }

        match mode {
            TagMatch::All => {
                for tag in normalized {
                    let ty = self.bind(entity_type.as_str().to_owned());
                    let tg = self.bind(tag);
                    self.clauses.push(format!(
                        "EXISTS (SELECT 1 FROM entity_tags t \
                         WHERE t.entity_type = {ty} AND t.entity_id = {id_column} AND t.tag = {tg})"
                    ));
                }
            }
            TagMatch::Any => {
                let ty = self.bind(entity_type.as_str().to_owned());
                let phs: Vec<String> = normalized
                    .into_iter()
                    .map(|t| self.bind(t))
                    .collect();
                self.clauses.push(format!(
                    "EXISTS (SELECT 1 FROM entity_tags t \
                     WHERE t.entity_type = {ty} AND t.entity_id = {id_column} AND t.tag IN ({}))",
                    phs.join(", ")
                ));
            }
        }
    }

    /// The assembled `WHERE ...` clause, or an empty string.
    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    /// Bound values in placeholder order.
    pub fn params(&self) -> Vec<&dyn ToSql> {
        self.params.iter().map(|p| p.as_ref()).collect()
    }
}

/// Deterministic pagination clause. `LIMIT -1` means unbounded, which SQLite
/// requires when only OFFSET is present.
pub(crate) fn pagination_sql(limit: Option<i64>, offset: Option<i64>) -> String {
    let limit = limit.filter(|l| *l >= 0);
    let offset = offset.filter(|o| *o > 0);
    match (limit, offset) {
        (None, None) => String::new(),
        (Some(l), None) => format!(" LIMIT {l}"),
        (None, Some(o)) => format!(" LIMIT -1 OFFSET {o}"),
        (Some(l), Some(o)) => format!(" LIMIT {l} OFFSET {o}"),
    }
}
