use http::HeaderMap;

/// Inbound header prefixes never forwarded upstream: routing and auth
/// context of the client-facing side, plus framing the body is re-sent with.
pub const INBOUND_DENYLIST: &[&str] = &[
    "host",
    "cookie",
    "x-ms-",
    "x-arr-",
    "x-forwarded-",
    "forwarded",
    "disguised-host",
    "referer",
    "connection",
    "content-length",
    "transfer-encoding",
];

/// Upstream response header prefixes never relayed to the caller
pub const OUTBOUND_DENYLIST: &[&str] = &[
    "set-cookie",
    "transfer-encoding",
    "content-length",
    "server",
    "date",
    "connection",
];

/// Copy of `headers` without any header whose name starts with a denied prefix.
///
/// Header names are already lowercase in `HeaderMap`, so the comparison is
/// case-insensitive as long as the prefixes are lowercase.
pub fn filter_headers(headers: &HeaderMap, denied_prefixes: &[&str]) -> HeaderMap {
    let mut clean = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let lower = name.as_str();
        if denied_prefixes.iter().any(|prefix| lower.starts_with(prefix)) {
            continue;
        }
        clean.append(name.clone(), value.clone());
    }
    clean
}
