pub mod audit_logs;
pub mod book_categories;
pub mod books;
pub mod cart_items;
pub mod categories;
pub mod order_items;
pub mod orders;
pub mod shopping_carts;
pub mod users;

pub use audit_logs::Entity as AuditLogs;
pub use book_categories::Entity as BookCategories;
pub use books::Entity as Books;
pub use cart_items::Entity as CartItems;
pub use categories::Entity as Categories;
pub use order_items::Entity as OrderItems;
pub use orders::Entity as Orders;
pub use shopping_carts::Entity as ShoppingCarts;
pub use users::Entity as Users;
