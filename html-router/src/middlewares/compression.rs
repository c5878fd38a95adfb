use tower_http::compression::{
    predicate::{DefaultPredicate, NotForContentType, Predicate},
    CompressionLayer,
};

/// Provides a compression layer that negotiates encoding based on the
/// `Accept-Encoding` header of the incoming request. Event streams are never
/// compressed.
pub fn compression_layer() -> CompressionLayer<impl Predicate> {
    CompressionLayer::new().compress_when(DefaultPredicate::new().and(NotForContentType::SSE))
}
