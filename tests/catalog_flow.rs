use axum_bookstore_api::{
    db::{create_orm_conn, create_pool, run_migrations},
    dto::{
        books::{CreateBookRequest, UpdateBookRequest},
        categories::CategoryRequest,
    },
    entity::users::ActiveModel as UserActive,
    error::AppError,
    middleware::auth::AuthUser,
    routes::params::Pagination,
    search::BookSearchParams,
    services::{book_service, category_service},
    state::AppState,
};
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ConnectionTrait, Set, Statement};
use uuid::Uuid;

fn unpaged() -> Pagination {
    Pagination {
        page: None,
        per_page: None,
    }
}

// Integration flow: admin builds the catalog, readers browse and search it,
// soft deleted rows disappear from every read path.
#[tokio::test]
async fn catalog_crud_soft_delete_and_search() -> anyhow::Result<()> {
    // Allow skipping when no DB is configured in the environment.
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(());
        }
    };

    let state = setup_state(&database_url).await?;

    let admin_id = create_user(&state, "admin", "catalog-admin@example.com").await?;
    let reader_id = create_user(&state, "user", "catalog-reader@example.com").await?;

    let auth_admin = AuthUser {
        user_id: admin_id,
        role: "admin".into(),
    };
    let auth_reader = AuthUser {
        user_id: reader_id,
        role: "user".into(),
    };

    // Only admins may touch the catalog
    let err = category_service::create_category(
        &state,
        &auth_reader,
        CategoryRequest {
            name: "Fiction".into(),
            description: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let fiction = category_service::create_category(
        &state,
        &auth_admin,
        CategoryRequest {
            name: "Fiction".into(),
            description: Some("Made up stories".into()),
        },
    )
    .await?
    .data
    .unwrap();

    // Unknown category ids fail book creation up front
    let err = book_service::create_book(
        &state,
        &auth_admin,
        CreateBookRequest {
            title: "Nowhere".into(),
            author: "No One".into(),
            isbn: "9780000000000".into(),
            price: Decimal::new(100, 2),
            description: None,
            cover_image: None,
            category_ids: vec![Uuid::new_v4()],
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotFound { entity: "category", .. }));

    // Blank titles are rejected before any row is written
    let err = book_service::create_book(
        &state,
        &auth_admin,
        CreateBookRequest {
            title: "   ".into(),
            author: "No One".into(),
            isbn: "9780000000001".into(),
            price: Decimal::new(100, 2),
            description: None,
            cover_image: None,
            category_ids: vec![],
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation { field: "title", .. }));

    let margarita = book_service::create_book(
        &state,
        &auth_admin,
        CreateBookRequest {
            title: "The Master and Margarita".into(),
            author: "Mikhail Bulgakov".into(),
            isbn: "9780143108276".into(),
            price: Decimal::new(1799, 2),
            description: None,
            cover_image: None,
            category_ids: vec![fiction.id],
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(margarita.category_ids, [fiction.id]);

    // An isbn can be used once, ever
    let err = book_service::create_book(
        &state,
        &auth_admin,
        CreateBookRequest {
            title: "Duplicate".into(),
            author: "Someone Else".into(),
            isbn: "9780143108276".into(),
            price: Decimal::new(999, 2),
            description: None,
            cover_image: None,
            category_ids: vec![],
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation { field: "isbn", .. }));

    let hobbit = book_service::create_book(
        &state,
        &auth_admin,
        CreateBookRequest {
            title: "The Hobbit".into(),
            author: "J. R. R. Tolkien".into(),
            isbn: "9780547928227".into(),
            price: Decimal::new(2100, 2),
            description: None,
            cover_image: None,
            category_ids: vec![fiction.id],
        },
    )
    .await?
    .data
    .unwrap();

    // Both books are live and browsable
    let listed = book_service::list_books(&state, unpaged()).await?;
    assert_eq!(listed.meta.unwrap().total, Some(2));
    let in_fiction = book_service::list_books_by_category(&state, fiction.id, unpaged())
        .await?
        .data
        .unwrap();
    assert_eq!(in_fiction.items.len(), 2);

    // Partial update keeps every field it does not mention
    let updated = book_service::update_book(
        &state,
        &auth_admin,
        margarita.id,
        UpdateBookRequest {
            title: None,
            author: None,
            price: Some(Decimal::new(1999, 2)),
            description: Some("Annotated edition".into()),
            cover_image: None,
            category_ids: None,
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(updated.price, Decimal::new(1999, 2));
    assert_eq!(updated.description.as_deref(), Some("Annotated edition"));
    assert_eq!(updated.title, "The Master and Margarita");
    assert_eq!(updated.isbn, "9780143108276");
    assert_eq!(updated.category_ids, [fiction.id]);

    // Author search is exact, title search matches fragments, and the two
    // narrow each other
    let found = book_service::search_books(
        &state,
        BookSearchParams {
            authors: vec!["Mikhail Bulgakov".into()],
            titles: vec![],
        },
        unpaged(),
    )
    .await?
    .data
    .unwrap();
    assert_eq!(found.items.len(), 1);
    assert_eq!(found.items[0].id, margarita.id);

    let found = book_service::search_books(
        &state,
        BookSearchParams {
            authors: vec!["Bulgakov".into()],
            titles: vec![],
        },
        unpaged(),
    )
    .await?
    .data
    .unwrap();
    assert!(found.items.is_empty());

    let found = book_service::search_books(
        &state,
        BookSearchParams {
            authors: vec![],
            titles: vec!["Hobbit".into(), "Margarita".into()],
        },
        unpaged(),
    )
    .await?
    .data
    .unwrap();
    assert_eq!(found.items.len(), 2);

    let found = book_service::search_books(
        &state,
        BookSearchParams {
            authors: vec!["Mikhail Bulgakov".into()],
            titles: vec!["Master".into()],
        },
        unpaged(),
    )
    .await?
    .data
    .unwrap();
    assert_eq!(found.items.len(), 1);
    assert_eq!(found.items[0].id, margarita.id);

    let found = book_service::search_books(
        &state,
        BookSearchParams {
            authors: vec!["J. R. R. Tolkien".into()],
            titles: vec!["Margarita".into()],
        },
        unpaged(),
    )
    .await?
    .data
    .unwrap();
    assert!(found.items.is_empty());

    // Soft deleted books disappear from every read path
    book_service::delete_book(&state, &auth_admin, margarita.id).await?;
    let err = book_service::get_book(&state, margarita.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound { entity: "book", .. }));
    let listed = book_service::list_books(&state, unpaged()).await?;
    assert_eq!(listed.meta.unwrap().total, Some(1));
    let in_fiction = book_service::list_books_by_category(&state, fiction.id, unpaged())
        .await?
        .data
        .unwrap();
    assert_eq!(in_fiction.items.len(), 1);
    assert_eq!(in_fiction.items[0].id, hobbit.id);

    // The isbn stays reserved even after deletion
    let err = book_service::create_book(
        &state,
        &auth_admin,
        CreateBookRequest {
            title: "Reprint".into(),
            author: "Mikhail Bulgakov".into(),
            isbn: "9780143108276".into(),
            price: Decimal::new(1500, 2),
            description: None,
            cover_image: None,
            category_ids: vec![],
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation { field: "isbn", .. }));

    // Categories update in place and soft delete out of sight
    let renamed = category_service::update_category(
        &state,
        &auth_admin,
        fiction.id,
        CategoryRequest {
            name: "Classics".into(),
            description: None,
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(renamed.name, "Classics");

    category_service::delete_category(&state, &auth_admin, fiction.id).await?;
    let err = category_service::get_category(&state, fiction.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound { entity: "category", .. }));
    let err = book_service::list_books_by_category(&state, fiction.id, unpaged())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound { entity: "category", .. }));
    let listed = category_service::list_categories(&state, unpaged()).await?;
    assert_eq!(listed.meta.unwrap().total, Some(0));

    // The surviving book no longer reports the deleted category
    let hobbit = book_service::get_book(&state, hobbit.id).await?.data.unwrap();
    assert!(hobbit.category_ids.is_empty());

    Ok(())
}

async fn setup_state(database_url: &str) -> anyhow::Result<AppState> {
    let pool = create_pool(database_url, 5).await?;
    let orm = create_orm_conn(database_url).await?;
    run_migrations(&orm).await?;

    // Clean tables between runs
    let backend = orm.get_database_backend();
    orm.execute(Statement::from_string(
        backend,
        "TRUNCATE TABLE order_items, orders, cart_items, shopping_carts, book_categories, books, categories, audit_logs, users RESTART IDENTITY CASCADE",
    ))
    .await?;

    Ok(AppState { pool, orm })
}

async fn create_user(state: &AppState, role: &str, email: &str) -> anyhow::Result<Uuid> {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        password_hash: Set("dummy".into()),
        role: Set(role.into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(user.id)
}
