//! Strongly-typed sea-orm models for every table the storefront core touches.
//! Query results are decoded into these at the boundary; internal logic never
//! handles loosely-typed rows.

pub mod cart_item;
pub mod coupon;
pub mod coupon_usage;
pub mod order;
pub mod order_item;
pub mod product;
pub mod product_co_purchase;
pub mod product_variant;
pub mod user_product_view;

pub use cart_item::Entity as CartItem;
pub use coupon::Entity as Coupon;
pub use coupon_usage::Entity as CouponUsage;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use product::Entity as Product;
pub use product_co_purchase::Entity as ProductCoPurchase;
pub use product_variant::Entity as ProductVariant;
pub use user_product_view::Entity as UserProductView;
