//! The HTTP transport surface: the anti-script-inclusion prelude and the
//! no-cache headers every response carries.

use http::{HeaderMap, HeaderValue};

/// Prepended to every HTTP transport response body before its
/// length-prefix-B framed frames, so the body can never be directly
/// `<script src>`-included by a third party.
pub const PRELUDE: &str = "for(;;);\n";

/// The three headers spec'd for the HTTP transport surface.
pub fn no_cache_headers() -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(3);
    headers.insert(
        http::header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, max-age=0, must-revalidate"),
    );
    headers.insert(http::header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(http::header::EXPIRES, HeaderValue::from_static("Fri, 01 Jan 1990 00:00:00 GMT"));
    headers
}
