use serde::Deserialize;
use utoipa::ToSchema;

use crate::models::OrderStatus;
use crate::search::BookSearchParams;

#[derive(Debug, Deserialize, ToSchema)]
pub struct Pagination {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl Pagination {
    pub fn normalize(&self) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self.per_page.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1) * per_page;
        (page, per_page, offset)
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BookSearchQuery {
    #[serde(flatten)]
    pub pagination: Pagination,
    /// Comma separated author names, matched exactly.
    pub authors: Option<String>,
    /// Comma separated title fragments.
    pub titles: Option<String>,
}

impl BookSearchQuery {
    /// Query strings carry one comma separated list per key.
    pub fn search_params(&self) -> BookSearchParams {
        BookSearchParams {
            authors: split_csv(self.authors.as_deref()),
            titles: split_csv(self.titles.as_deref()),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OrderListQuery {
    #[serde(flatten)]
    pub pagination: Pagination,
    pub status: Option<OrderStatus>,
    pub sort_order: Option<SortOrder>,
}

fn split_csv(raw: Option<&str>) -> Vec<String> {
    raw.map(|joined| {
        joined
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}
