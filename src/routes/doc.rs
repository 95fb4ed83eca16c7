use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        auth::{LoginRequest, LoginResponse, RegisterRequest},
        books::{BookList, CategoryBookList, CreateBookRequest, UpdateBookRequest},
        cart::{AddToCartRequest, CartItemView, ShoppingCartView, UpdateQuantityRequest},
        categories::{CategoryList, CategoryRequest},
        orders::{
            OrderItemList, OrderList, OrderWithItems, PlaceOrderRequest, UpdateOrderStatusRequest,
        },
    },
    models::{Book, BookSummary, CartItem, Category, Order, OrderItem, OrderStatus, User},
    response::{ApiResponse, Meta},
    routes::{auth, books, cart, categories, health, orders, params},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::register,
        auth::login,
        books::list_books,
        books::search_books,
        books::get_book,
        books::create_book,
        books::update_book,
        books::delete_book,
        categories::list_categories,
        categories::get_category,
        categories::list_category_books,
        categories::create_category,
        categories::update_category,
        categories::delete_category,
        cart::get_cart,
        cart::add_item,
        cart::update_quantity,
        cart::remove_item,
        orders::place_order,
        orders::list_orders,
        orders::list_order_items,
        orders::get_order_item,
        orders::update_status
    ),
    components(
        schemas(
            User,
            Book,
            BookSummary,
            Category,
            CartItem,
            Order,
            OrderItem,
            OrderStatus,
            RegisterRequest,
            LoginRequest,
            LoginResponse,
            CreateBookRequest,
            UpdateBookRequest,
            BookList,
            CategoryBookList,
            CategoryRequest,
            CategoryList,
            AddToCartRequest,
            UpdateQuantityRequest,
            ShoppingCartView,
            CartItemView,
            PlaceOrderRequest,
            UpdateOrderStatusRequest,
            OrderWithItems,
            OrderList,
            OrderItemList,
            params::Pagination,
            params::BookSearchQuery,
            params::OrderListQuery,
            params::SortOrder,
            Meta,
            ApiResponse<Book>,
            ApiResponse<BookList>,
            ApiResponse<CategoryBookList>,
            ApiResponse<Category>,
            ApiResponse<CategoryList>,
            ApiResponse<ShoppingCartView>,
            ApiResponse<CartItem>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<OrderItemList>,
            ApiResponse<OrderItem>,
            ApiResponse<User>,
            ApiResponse<LoginResponse>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Books", description = "Catalog endpoints"),
        (name = "Categories", description = "Category endpoints"),
        (name = "Cart", description = "Shopping cart endpoints"),
        (name = "Orders", description = "Order endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
