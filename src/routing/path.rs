//! Path primitives shared by the blocklist, the route compiler and the
//! forwarding handler.

use std::borrow::Cow;

/// Whether `request_path` is covered by `blocked_path`.
///
/// Exact equality always matches. A `blocked_path` ending in `/*` also
/// matches any request path that starts with the part before `/*`.
pub fn is_blocked(request_path: &str, blocked_path: &str) -> bool {
    if request_path == blocked_path {
        return true;
    }
    match blocked_path.strip_suffix("/*") {
        Some(prefix) => request_path.starts_with(prefix),
        None => false,
    }
}

/// Replace the leading `route_prefix + "/"` of `request_path` with
/// `rewrite_to`. Paths outside the prefix, or an empty prefix or target,
/// leave the path untouched.
pub fn rewrite<'a>(request_path: &'a str, route_prefix: &str, rewrite_to: &str) -> Cow<'a, str> {
    if route_prefix.is_empty() || rewrite_to.is_empty() {
        return Cow::Borrowed(request_path);
    }
    let mut with_slash = String::with_capacity(route_prefix.len() + 1);
    with_slash.push_str(route_prefix);
    with_slash.push('/');

    match request_path.strip_prefix(with_slash.as_str()) {
        Some(rest) => {
            let mut out = String::with_capacity(rewrite_to.len() + rest.len());
            out.push_str(rewrite_to);
            out.push_str(rest);
            Cow::Owned(out)
        }
        None => Cow::Borrowed(request_path),
    }
}

/// Concatenate path segments, collapsing runs of `/` into one and making
/// sure the result starts with a single `/`.
pub fn join_paths(base: &str, suffix: &str) -> String {
    let mut out = String::with_capacity(base.len() + suffix.len() + 1);
    out.push('/');
    for ch in base.chars().chain(suffix.chars()) {
        if ch == '/' && out.ends_with('/') {
            continue;
        }
        out.push(ch);
    }
    out
}

/// Join a destination base path with a request path using exactly one
/// slash between them.
pub fn single_joining_slash(a: &str, b: &str) -> String {
    match (a.ends_with('/'), b.starts_with('/')) {
        (true, true) => format!("{}{}", a, &b[1..]),
        (false, false) => format!("{}/{}", a, b),
        _ => format!("{}{}", a, b),
    }
}
