use std::collections::{HashMap, HashSet};

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, JoinType, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::books::{BookList, CategoryBookList, CreateBookRequest, UpdateBookRequest},
    entity::{
        BookCategories, Books, Categories, book_categories,
        book_categories::{ActiveModel as BookCategoryActive, Column as BookCategoryCol},
        books::{ActiveModel as BookActive, Column as BookCol, Model as BookModel},
        categories::Column as CategoryCol,
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Book, BookSummary},
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    search::{self, BookSearchParams},
    state::AppState,
};

pub async fn list_books(
    state: &AppState,
    pagination: Pagination,
) -> AppResult<ApiResponse<BookList>> {
    let (page, limit, offset) = pagination.normalize();

    let finder = Books::find()
        .filter(BookCol::IsDeleted.eq(false))
        .order_by_desc(BookCol::CreatedAt);

    let total = finder.clone().count(&state.orm).await? as i64;
    let book_models = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let items = attach_categories(state, book_models).await?;
    Ok(ApiResponse::paged("OK", BookList { items }, page, limit, total))
}

pub async fn get_book(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Book>> {
    let model = Books::find_by_id(id)
        .filter(BookCol::IsDeleted.eq(false))
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("book", id))?;

    let category_ids = live_category_ids(&state.orm, model.id).await?;
    Ok(ApiResponse::success(
        "OK",
        book_from_entity(model, category_ids),
        None,
    ))
}

pub async fn create_book(
    state: &AppState,
    user: &AuthUser,
    payload: CreateBookRequest,
) -> AppResult<ApiResponse<Book>> {
    ensure_admin(user)?;
    if payload.title.trim().is_empty() {
        return Err(AppError::validation("title", "must not be blank"));
    }
    if payload.author.trim().is_empty() {
        return Err(AppError::validation("author", "must not be blank"));
    }
    if payload.isbn.trim().is_empty() {
        return Err(AppError::validation("isbn", "must not be blank"));
    }
    if payload.price < Decimal::ZERO {
        return Err(AppError::validation("price", "must not be negative"));
    }

    let txn = state.orm.begin().await?;

    // the unique index also covers soft deleted rows, so check against all of them
    let taken = Books::find()
        .filter(BookCol::Isbn.eq(payload.isbn.as_str()))
        .one(&txn)
        .await?;
    if taken.is_some() {
        return Err(AppError::validation("isbn", "is already in use"));
    }

    let category_ids = check_categories(&txn, &payload.category_ids).await?;

    let book = BookActive {
        id: Set(Uuid::new_v4()),
        title: Set(payload.title),
        author: Set(payload.author),
        isbn: Set(payload.isbn),
        price: Set(payload.price),
        description: Set(payload.description),
        cover_image: Set(payload.cover_image),
        is_deleted: Set(false),
        created_at: NotSet,
    }
    .insert(&txn)
    .await?;

    link_categories(&txn, book.id, &category_ids).await?;

    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "book_create",
        Some("books"),
        Some(serde_json::json!({ "book_id": book.id })),
    )
    .await;

    Ok(ApiResponse::success(
        "Book created",
        book_from_entity(book, category_ids),
        None,
    ))
}

pub async fn update_book(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateBookRequest,
) -> AppResult<ApiResponse<Book>> {
    ensure_admin(user)?;
    if let Some(title) = payload.title.as_deref() {
        if title.trim().is_empty() {
            return Err(AppError::validation("title", "must not be blank"));
        }
    }
    if let Some(author) = payload.author.as_deref() {
        if author.trim().is_empty() {
            return Err(AppError::validation("author", "must not be blank"));
        }
    }
    if let Some(price) = payload.price {
        if price < Decimal::ZERO {
            return Err(AppError::validation("price", "must not be negative"));
        }
    }

    let txn = state.orm.begin().await?;

    let model = Books::find_by_id(id)
        .filter(BookCol::IsDeleted.eq(false))
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::not_found("book", id))?;

    let mut active: BookActive = model.into();
    if let Some(title) = payload.title {
        active.title = Set(title);
    }
    if let Some(author) = payload.author {
        active.author = Set(author);
    }
    if let Some(price) = payload.price {
        active.price = Set(price);
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(cover_image) = payload.cover_image {
        active.cover_image = Set(Some(cover_image));
    }
    let model = active.update(&txn).await?;

    let category_ids = match payload.category_ids {
        Some(ids) => {
            let ids = check_categories(&txn, &ids).await?;
            BookCategories::delete_many()
                .filter(BookCategoryCol::BookId.eq(id))
                .exec(&txn)
                .await?;
            link_categories(&txn, id, &ids).await?;
            ids
        }
        None => live_category_ids(&txn, id).await?,
    };

    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "book_update",
        Some("books"),
        Some(serde_json::json!({ "book_id": id })),
    )
    .await;

    Ok(ApiResponse::success(
        "Book updated",
        book_from_entity(model, category_ids),
        None,
    ))
}

pub async fn delete_book(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;

    let model = Books::find_by_id(id)
        .filter(BookCol::IsDeleted.eq(false))
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("book", id))?;

    let mut active: BookActive = model.into();
    active.is_deleted = Set(true);
    active.update(&state.orm).await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "book_delete",
        Some("books"),
        Some(serde_json::json!({ "book_id": id })),
    )
    .await;

    Ok(ApiResponse::success(
        "Book deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn search_books(
    state: &AppState,
    params: BookSearchParams,
    pagination: Pagination,
) -> AppResult<ApiResponse<BookList>> {
    let (page, limit, offset) = pagination.normalize();
    let condition = search::build_condition(&params)?;

    let finder = Books::find()
        .filter(condition)
        .filter(BookCol::IsDeleted.eq(false))
        .order_by_desc(BookCol::CreatedAt);

    let total = finder.clone().count(&state.orm).await? as i64;
    let book_models = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let items = attach_categories(state, book_models).await?;
    Ok(ApiResponse::paged("OK", BookList { items }, page, limit, total))
}

pub async fn list_books_by_category(
    state: &AppState,
    category_id: Uuid,
    pagination: Pagination,
) -> AppResult<ApiResponse<CategoryBookList>> {
    let (page, limit, offset) = pagination.normalize();

    let category = Categories::find_by_id(category_id)
        .filter(CategoryCol::IsDeleted.eq(false))
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("category", category_id))?;

    let finder = category
        .find_related(Books)
        .filter(BookCol::IsDeleted.eq(false))
        .order_by_desc(BookCol::CreatedAt);

    let total = finder.clone().count(&state.orm).await? as i64;
    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(summary_from_entity)
        .collect();

    Ok(ApiResponse::paged(
        "OK",
        CategoryBookList { items },
        page,
        limit,
        total,
    ))
}

/// Resolve the live category ids for one book.
async fn live_category_ids<C: ConnectionTrait>(conn: &C, book_id: Uuid) -> AppResult<Vec<Uuid>> {
    let links = BookCategories::find()
        .join(
            JoinType::InnerJoin,
            book_categories::Relation::Categories.def(),
        )
        .filter(BookCategoryCol::BookId.eq(book_id))
        .filter(CategoryCol::IsDeleted.eq(false))
        .all(conn)
        .await?;
    Ok(links.into_iter().map(|link| link.category_id).collect())
}

/// Batch variant of [`live_category_ids`] for listings, one query per page.
async fn attach_categories(state: &AppState, books: Vec<BookModel>) -> AppResult<Vec<Book>> {
    let ids: Vec<Uuid> = books.iter().map(|book| book.id).collect();
    let mut by_book: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    if !ids.is_empty() {
        let links = BookCategories::find()
            .join(
                JoinType::InnerJoin,
                book_categories::Relation::Categories.def(),
            )
            .filter(BookCategoryCol::BookId.is_in(ids))
            .filter(CategoryCol::IsDeleted.eq(false))
            .all(&state.orm)
            .await?;
        for link in links {
            by_book.entry(link.book_id).or_default().push(link.category_id);
        }
    }

    Ok(books
        .into_iter()
        .map(|model| {
            let category_ids = by_book.remove(&model.id).unwrap_or_default();
            book_from_entity(model, category_ids)
        })
        .collect())
}

/// Every id must name a live category; the first unknown one fails the call.
async fn check_categories<C: ConnectionTrait>(conn: &C, ids: &[Uuid]) -> AppResult<Vec<Uuid>> {
    let mut unique: Vec<Uuid> = Vec::new();
    for id in ids {
        if !unique.contains(id) {
            unique.push(*id);
        }
    }
    if unique.is_empty() {
        return Ok(unique);
    }

    let found: HashSet<Uuid> = Categories::find()
        .filter(CategoryCol::Id.is_in(unique.clone()))
        .filter(CategoryCol::IsDeleted.eq(false))
        .all(conn)
        .await?
        .into_iter()
        .map(|category| category.id)
        .collect();

    if let Some(missing) = unique.iter().find(|id| !found.contains(id)) {
        return Err(AppError::not_found("category", missing));
    }
    Ok(unique)
}

async fn link_categories<C: ConnectionTrait>(
    conn: &C,
    book_id: Uuid,
    category_ids: &[Uuid],
) -> AppResult<()> {
    if category_ids.is_empty() {
        return Ok(());
    }
    let rows: Vec<BookCategoryActive> = category_ids
        .iter()
        .map(|category_id| BookCategoryActive {
            book_id: Set(book_id),
            category_id: Set(*category_id),
        })
        .collect();
    BookCategories::insert_many(rows).exec(conn).await?;
    Ok(())
}

fn book_from_entity(model: BookModel, category_ids: Vec<Uuid>) -> Book {
    Book {
        id: model.id,
        title: model.title,
        author: model.author,
        isbn: model.isbn,
        price: model.price,
        description: model.description,
        cover_image: model.cover_image,
        category_ids,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

fn summary_from_entity(model: BookModel) -> BookSummary {
    BookSummary {
        id: model.id,
        title: model.title,
        author: model.author,
        isbn: model.isbn,
        price: model.price,
        description: model.description,
        cover_image: model.cover_image,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
