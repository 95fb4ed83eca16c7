use axum_bookstore_api::{
    db::{create_orm_conn, create_pool, run_migrations},
    dto::auth::{Claims, LoginRequest, RegisterRequest},
    error::AppError,
    services::auth_service,
    state::AppState,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use sea_orm::{ConnectionTrait, Statement};

// Integration flow: register -> login -> the token round-trips through the
// same claims the extractor reads.
#[tokio::test]
async fn register_and_login_issue_a_usable_token() -> anyhow::Result<()> {
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
    if std::env::var("JWT_SECRET").is_err() {
        // login signs a token, so a key must exist before the first call
        unsafe { std::env::set_var("JWT_SECRET", "integration-test-secret") };
    }

    let state = setup_state(&database_url).await?;

    // Weak or blank credentials never reach the database
    let err = auth_service::register_user(
        &state.pool,
        RegisterRequest {
            email: "  ".into(),
            password: "long-enough-password".into(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation { field: "email", .. }));

    let err = auth_service::register_user(
        &state.pool,
        RegisterRequest {
            email: "reader@example.com".into(),
            password: "short".into(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation { field: "password", .. }));

    // Register
    let user = auth_service::register_user(
        &state.pool,
        RegisterRequest {
            email: "reader@example.com".into(),
            password: "correct horse battery".into(),
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(user.email, "reader@example.com");
    assert_eq!(user.role, "user");

    // The email is taken from now on
    let err = auth_service::register_user(
        &state.pool,
        RegisterRequest {
            email: "reader@example.com".into(),
            password: "another password".into(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    // Wrong credentials fail the same way whether the email exists or not
    let err = auth_service::login_user(
        &state.pool,
        LoginRequest {
            email: "reader@example.com".into(),
            password: "wrong password".into(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let err = auth_service::login_user(
        &state.pool,
        LoginRequest {
            email: "nobody@example.com".into(),
            password: "correct horse battery".into(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    // Login
    let login = auth_service::login_user(
        &state.pool,
        LoginRequest {
            email: "reader@example.com".into(),
            password: "correct horse battery".into(),
        },
    )
    .await?
    .data
    .unwrap();
    assert!(login.token.starts_with("Bearer "));

    // The token carries the claims the auth extractor expects
    let raw = login.token.trim_start_matches("Bearer ");
    let secret = std::env::var("JWT_SECRET")?;
    let claims = decode::<Claims>(
        raw,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?
    .claims;
    assert_eq!(claims.sub, user.id.to_string());
    assert_eq!(claims.role, "user");

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
