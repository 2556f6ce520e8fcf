//! Message handlers.

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;

use crate::error::HandlerError;

/// Handles one stream entry on behalf of a reader.
///
/// The reader acknowledges the entry only when `handle_message` returns `Ok`.
/// Entries can be delivered more than once, so handling should be idempotent.
#[async_trait]
pub trait Delegate: Send + Sync {
    /// Handle the entry `id` read from `stream`.
    async fn handle_message(
        &self,
        stream: &str,
        id: &str,
        fields: &HashMap<String, String>,
    ) -> Result<(), HandlerError>;
}

/// Adapts an async closure into a [`Delegate`].
///
/// # Example
///
/// ```ignore
/// let delegate = DelegateFn::new(|stream, id, fields| async move {
///     println!("{}/{}: {:?}", stream, id, fields);
///     Ok(())
/// });
/// ```
pub struct DelegateFn<F> {
    f: F,
}

impl<F> DelegateFn<F> {
    /// Wrap `f`, which receives owned copies of the stream name, id and fields.
    pub fn new<Fut>(f: F) -> Self
    where
        F: Fn(String, String, HashMap<String, String>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<(), HandlerError>> + Send,
    {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Delegate for DelegateFn<F>
where
    F: Fn(String, String, HashMap<String, String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle_message(
        &self,
        stream: &str,
        id: &str,
        fields: &HashMap<String, String>,
    ) -> Result<(), HandlerError> {
        (self.f)(stream.to_string(), id.to_string(), fields.clone()).await
    }
}
