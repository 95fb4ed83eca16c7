use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddToCartRequest {
    pub book_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateQuantityRequest {
    pub quantity: i32,
}

/// The cart as the client sees it: every line joined with its book title.
#[derive(Debug, Serialize, ToSchema)]
pub struct ShoppingCartView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items: Vec<CartItemView>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartItemView {
    pub id: Uuid,
    pub book_id: Uuid,
    pub book_title: String,
    pub quantity: i32,
}
