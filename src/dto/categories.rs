use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::Category;

/// Shared by create and update; a category is small enough to replace whole.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CategoryRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(transparent)]
pub struct CategoryList {
    #[schema(value_type = Vec<Category>)]
    pub items: Vec<Category>,
}
