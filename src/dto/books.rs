use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Book, BookSummary};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateBookRequest {
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub price: Decimal,
    pub description: Option<String>,
    pub cover_image: Option<String>,
    #[serde(default)]
    pub category_ids: Vec<Uuid>,
}

/// Partial update. The isbn is deliberately absent: it identifies the
/// physical edition and never changes after creation.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateBookRequest {
    pub title: Option<String>,
    pub author: Option<String>,
    pub price: Option<Decimal>,
    pub description: Option<String>,
    pub cover_image: Option<String>,
    pub category_ids: Option<Vec<Uuid>>,
}

#[derive(Serialize, ToSchema)]
#[serde(transparent)]
pub struct BookList {
    #[schema(value_type = Vec<Book>)]
    pub items: Vec<Book>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(transparent)]
pub struct CategoryBookList {
    #[schema(value_type = Vec<BookSummary>)]
    pub items: Vec<BookSummary>,
}
