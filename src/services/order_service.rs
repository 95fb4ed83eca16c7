use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityOrSelect, EntityTrait, FromQueryResult,
    JoinType, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set,
    TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::orders::{OrderItemList, OrderList, OrderWithItems, PlaceOrderRequest, UpdateOrderStatusRequest},
    entity::{
        CartItems, OrderItems, Orders, ShoppingCarts,
        books::Column as BookCol,
        cart_items::{self, Column as CartItemCol},
        order_items::{ActiveModel as OrderItemActive, Column as OrderItemCol, Model as OrderItemModel},
        orders::{ActiveModel as OrderActive, Column as OrderCol, Model as OrderModel},
        shopping_carts::Column as CartCol,
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Order, OrderItem, OrderStatus},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, Pagination, SortOrder},
    state::AppState,
};

/// Turn the caller's cart into an order. The order takes each line's current
/// book price as its frozen price, and the cart itself is deleted afterwards;
/// the next cart read starts an empty one.
pub async fn place_order(
    state: &AppState,
    user: &AuthUser,
    payload: PlaceOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    if payload.shipping_address.trim().is_empty() {
        return Err(AppError::validation("shipping_address", "must not be blank"));
    }

    let txn = state.orm.begin().await?;

    let cart = ShoppingCarts::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::not_found("shopping cart", user.user_id))?;

    #[derive(Debug, FromQueryResult)]
    struct CartBookRow {
        book_id: Uuid,
        quantity: i32,
        price: Decimal,
        is_deleted: bool,
    }

    let rows = CartItems::find()
        .select()
        .join(JoinType::InnerJoin, cart_items::Relation::Books.def())
        .column_as(BookCol::Price, "price")
        .column_as(BookCol::IsDeleted, "is_deleted")
        .filter(CartItemCol::CartId.eq(cart.id))
        .lock(LockType::Update)
        .into_model::<CartBookRow>()
        .all(&txn)
        .await?;

    if rows.is_empty() {
        return Err(AppError::validation("cart", "cart is empty"));
    }
    for row in &rows {
        if row.is_deleted {
            return Err(AppError::not_found("book", row.book_id));
        }
    }

    let total: Decimal = rows
        .iter()
        .map(|row| row.price * Decimal::from(row.quantity))
        .sum();

    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        status: Set(OrderStatus::New.as_str().to_string()),
        total: Set(total),
        shipping_address: Set(payload.shipping_address),
        order_date: Set(Utc::now().into()),
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            book_id: Set(row.book_id),
            quantity: Set(row.quantity),
            price: Set(row.price),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;
        items.push(order_item_from_entity(item));
    }

    // drop the whole cart; its items go with it
    ShoppingCarts::delete_by_id(cart.id).exec(&txn).await?;

    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "order_place",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "total": order.total })),
    )
    .await;

    let order = order_from_entity(order)?;
    Ok(ApiResponse::success(
        "Order placed",
        OrderWithItems { order, items },
        Some(Meta::empty()),
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();

    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status {
        condition = condition.add(OrderCol::Status.eq(status.as_str()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::OrderDate),
        SortOrder::Desc => finder.order_by_desc(OrderCol::OrderDate),
    };

    let total = finder.clone().count(&state.orm).await? as i64;
    let order_models = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let order_ids: Vec<Uuid> = order_models.iter().map(|order| order.id).collect();
    let mut items_by_order: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
    if !order_ids.is_empty() {
        let item_models = OrderItems::find()
            .filter(OrderItemCol::OrderId.is_in(order_ids))
            .all(&state.orm)
            .await?;
        for model in item_models {
            items_by_order
                .entry(model.order_id)
                .or_default()
                .push(order_item_from_entity(model));
        }
    }

    let mut items = Vec::with_capacity(order_models.len());
    for model in order_models {
        let order = order_from_entity(model)?;
        let order_items = items_by_order.remove(&order.id).unwrap_or_default();
        items.push(OrderWithItems {
            order,
            items: order_items,
        });
    }

    Ok(ApiResponse::paged("OK", OrderList { items }, page, limit, total))
}

pub async fn list_order_items(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
    pagination: Pagination,
) -> AppResult<ApiResponse<OrderItemList>> {
    let (page, limit, offset) = pagination.normalize();
    let order = find_user_order(state, user, order_id).await?;

    let finder = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .order_by_asc(OrderItemCol::CreatedAt);

    let total = finder.clone().count(&state.orm).await? as i64;
    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    Ok(ApiResponse::paged("OK", OrderItemList { items }, page, limit, total))
}

pub async fn get_order_item(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
    item_id: Uuid,
) -> AppResult<ApiResponse<OrderItem>> {
    let order = find_user_order(state, user, order_id).await?;

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?;

    let item = items
        .into_iter()
        .map(order_item_from_entity)
        .find(|item| item.id == item_id)
        .ok_or_else(|| AppError::not_found("order item", item_id))?;

    Ok(ApiResponse::success("OK", item, None))
}

/// Admin sets any status on any order; ownership is not part of the lookup.
pub async fn update_status(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    ensure_admin(user)?;

    let txn = state.orm.begin().await?;

    let order = Orders::find_by_id(order_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::not_found("order", order_id))?;

    let mut active: OrderActive = order.into();
    active.status = Set(payload.status.as_str().to_string());
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&txn)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "order_status_update",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "status": payload.status })),
    )
    .await;

    let order = order_from_entity(order)?;
    Ok(ApiResponse::success(
        "Order updated",
        OrderWithItems { order, items },
        Some(Meta::empty()),
    ))
}

async fn find_user_order(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
) -> AppResult<OrderModel> {
    Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(order_id)),
        )
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("order", order_id))
}

fn order_from_entity(model: OrderModel) -> AppResult<Order> {
    let status = model
        .status
        .parse::<OrderStatus>()
        .map_err(|err| AppError::Internal(anyhow::anyhow!(err)))?;
    Ok(Order {
        id: model.id,
        user_id: model.user_id,
        status,
        total: model.total,
        shipping_address: model.shipping_address,
        order_date: model.order_date.with_timezone(&Utc),
    })
}

fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        book_id: model.book_id,
        quantity: model.quantity,
        price: model.price,
    }
}
