use std::pin::Pin;

/// A boxed async stream, used for event flows across the external node
/// boundary (`ExternalNodeRuntime::invoke`).
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;
