use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityOrSelect, EntityTrait, FromQueryResult,
    JoinType, QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::cart::{AddToCartRequest, CartItemView, ShoppingCartView, UpdateQuantityRequest},
    entity::{
        Books, CartItems, ShoppingCarts,
        books::Column as BookCol,
        cart_items::{self, ActiveModel as CartItemActive, Column as CartItemCol},
        shopping_carts::{ActiveModel as CartActive, Column as CartCol, Model as CartModel},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::CartItem,
    response::{ApiResponse, Meta},
    state::AppState,
};

const MAX_QUANTITY: i32 = 100;

pub async fn get_cart(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<ShoppingCartView>> {
    let cart = find_or_create_cart(&state.orm, user.user_id).await?;
    let view = load_cart_view(&state.orm, cart).await?;
    Ok(ApiResponse::success("OK", view, None))
}

pub async fn add_item(
    state: &AppState,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartItem>> {
    check_quantity(payload.quantity)?;

    // make sure the cart exists before entering the transaction, so the
    // unique-violation fallback in create_cart can re-read it
    let cart = find_or_create_cart(&state.orm, user.user_id).await?;

    let txn = state.orm.begin().await?;

    // serialize cart mutations per user on the cart row
    let cart = match ShoppingCarts::find_by_id(cart.id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
    {
        Some(cart) => cart,
        // a checkout deleted the cart in between; start a fresh one
        None => create_cart(&txn, user.user_id).await?,
    };

    let book = Books::find_by_id(payload.book_id)
        .filter(BookCol::IsDeleted.eq(false))
        .one(&txn)
        .await?;
    if book.is_none() {
        return Err(AppError::not_found("book", payload.book_id));
    }

    let existing = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .filter(CartItemCol::BookId.eq(payload.book_id))
        .one(&txn)
        .await?;

    let item = match existing {
        Some(item) => {
            let merged = item.quantity + payload.quantity;
            check_quantity(merged)?;
            let mut active: CartItemActive = item.into();
            active.quantity = Set(merged);
            active.update(&txn).await?
        }
        None => {
            CartItemActive {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                book_id: Set(payload.book_id),
                quantity: Set(payload.quantity),
                created_at: NotSet,
            }
            .insert(&txn)
            .await?
        }
    };

    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_add_item",
        Some("cart_items"),
        Some(serde_json::json!({ "book_id": payload.book_id, "quantity": item.quantity })),
    )
    .await;

    Ok(ApiResponse::success(
        "Added to cart",
        cart_item_from_entity(item),
        None,
    ))
}

pub async fn update_quantity(
    state: &AppState,
    user: &AuthUser,
    item_id: Uuid,
    payload: UpdateQuantityRequest,
) -> AppResult<ApiResponse<CartItem>> {
    check_quantity(payload.quantity)?;

    let txn = state.orm.begin().await?;

    let cart = ShoppingCarts::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::not_found("shopping cart", user.user_id))?;

    let item = CartItems::find_by_id(item_id)
        .filter(CartItemCol::CartId.eq(cart.id))
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::not_found("cart item", item_id))?;

    let mut active: CartItemActive = item.into();
    active.quantity = Set(payload.quantity);
    let item = active.update(&txn).await?;

    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_update_quantity",
        Some("cart_items"),
        Some(serde_json::json!({ "cart_item_id": item_id, "quantity": item.quantity })),
    )
    .await;

    Ok(ApiResponse::success(
        "Quantity updated",
        cart_item_from_entity(item),
        None,
    ))
}

pub async fn remove_item(
    state: &AppState,
    user: &AuthUser,
    item_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let cart = ShoppingCarts::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("shopping cart", user.user_id))?;

    let result = CartItems::delete_many()
        .filter(CartItemCol::Id.eq(item_id))
        .filter(CartItemCol::CartId.eq(cart.id))
        .exec(&state.orm)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::not_found("cart item", item_id));
    }

    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_remove_item",
        Some("cart_items"),
        Some(serde_json::json!({ "cart_item_id": item_id })),
    )
    .await;

    Ok(ApiResponse::success(
        "Removed from cart",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

fn check_quantity(quantity: i32) -> AppResult<()> {
    if !(1..=MAX_QUANTITY).contains(&quantity) {
        return Err(AppError::validation(
            "quantity",
            format!("must be between 1 and {MAX_QUANTITY}"),
        ));
    }
    Ok(())
}

async fn find_or_create_cart<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> AppResult<CartModel> {
    if let Some(cart) = ShoppingCarts::find()
        .filter(CartCol::UserId.eq(user_id))
        .one(conn)
        .await?
    {
        return Ok(cart);
    }
    create_cart(conn, user_id).await
}

async fn create_cart<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> AppResult<CartModel> {
    let insert = CartActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        created_at: NotSet,
    }
    .insert(conn)
    .await;

    match insert {
        Ok(cart) => Ok(cart),
        // a concurrent request created the cart first and tripped the unique
        // user_id constraint; re-read instead of failing
        Err(err) => {
            let cart = ShoppingCarts::find()
                .filter(CartCol::UserId.eq(user_id))
                .one(conn)
                .await?;
            match cart {
                Some(cart) => Ok(cart),
                None => Err(err.into()),
            }
        }
    }
}

#[derive(Debug, FromQueryResult)]
struct CartLineRow {
    id: Uuid,
    book_id: Uuid,
    quantity: i32,
    title: String,
}

async fn load_cart_view<C: ConnectionTrait>(
    conn: &C,
    cart: CartModel,
) -> AppResult<ShoppingCartView> {
    let rows = CartItems::find()
        .select()
        .join(JoinType::InnerJoin, cart_items::Relation::Books.def())
        .column_as(BookCol::Title, "title")
        .filter(CartItemCol::CartId.eq(cart.id))
        .order_by_asc(CartItemCol::CreatedAt)
        .into_model::<CartLineRow>()
        .all(conn)
        .await?;

    let items = rows
        .into_iter()
        .map(|row| CartItemView {
            id: row.id,
            book_id: row.book_id,
            book_title: row.title,
            quantity: row.quantity,
        })
        .collect();

    Ok(ShoppingCartView {
        id: cart.id,
        user_id: cart.user_id,
        items,
    })
}

fn cart_item_from_entity(model: cart_items::Model) -> CartItem {
    CartItem {
        id: model.id,
        cart_id: model.cart_id,
        book_id: model.book_id,
        quantity: model.quantity,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
