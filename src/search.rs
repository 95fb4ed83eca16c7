use std::collections::HashMap;

use sea_orm::{ColumnTrait, Condition};

use crate::entity::books;
use crate::error::{AppError, AppResult};

/// Search input, one list of accepted values per searchable column.
#[derive(Debug, Clone, Default)]
pub struct BookSearchParams {
    pub authors: Vec<String>,
    pub titles: Vec<String>,
}

impl BookSearchParams {
    pub fn is_empty(&self) -> bool {
        self.authors.is_empty() && self.titles.is_empty()
    }
}

/// A provider turns the accepted values for one search key into a predicate.
pub type SpecificationProvider = fn(&[String]) -> Condition;

/// Author matches are exact: any of the given names, no normalization.
fn author_spec(values: &[String]) -> Condition {
    Condition::all().add(books::Column::Author.is_in(values.to_vec()))
}

/// Title matches are substring based, one LIKE per value, OR-ed together.
fn title_spec(values: &[String]) -> Condition {
    values.iter().fold(Condition::any(), |cond, value| {
        cond.add(books::Column::Title.contains(value.as_str()))
    })
}

fn providers() -> HashMap<&'static str, SpecificationProvider> {
    HashMap::from([
        ("author", author_spec as SpecificationProvider),
        ("title", title_spec as SpecificationProvider),
    ])
}

/// Look up the provider registered for a search key.
pub fn provider_for(key: &str) -> AppResult<SpecificationProvider> {
    providers()
        .get(key)
        .copied()
        .ok_or_else(|| AppError::not_found("specification provider", key))
}

/// AND together one predicate per non-empty dimension. Empty input yields
/// an unrestricted condition, so the search degrades to a plain listing.
pub fn build_condition(params: &BookSearchParams) -> AppResult<Condition> {
    let mut condition = Condition::all();
    for (key, values) in [("author", &params.authors), ("title", &params.titles)] {
        if values.is_empty() {
            continue;
        }
        let provider = provider_for(key)?;
        condition = condition.add(provider(values));
    }
    Ok(condition)
}
