pub mod messenger;
pub mod models;
pub mod origin;
pub mod telegram;
pub mod upload;

/// Boxed future used by the object-safe network traits.
pub use futures_util::future::BoxFuture;
