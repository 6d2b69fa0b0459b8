//! Statement definition macro.
//!
//! Writing a [`RawStatement`](crate::db::statements::RawStatement) by hand
//! means spelling out a higher-ranked closure returning a boxed future. The
//! macro expands to a plain generic fn, which satisfies the bound without
//! inference gymnastics.

/// Define a raw statement from a `(client, schema, args)` body.
///
/// # Example
///
/// ```ignore
/// let find_user = statement!(|client, schema, args| {
///     client.query("SELECT * FROM users WHERE id = $1", &args).await
/// });
/// ```
#[macro_export]
macro_rules! statement {
    (|$client:ident, $schema:ident, $args:ident| $body:block) => {{
        fn __statement<'a>(
            $client: &'a dyn $crate::db::Client,
            $schema: &'a str,
            $args: Vec<$crate::SqlParam>,
        ) -> $crate::db::statements::StatementFuture<'a> {
            Box::pin(async move { $body })
        }
        $crate::db::statements::raw_statement(__statement)
    }};
}
