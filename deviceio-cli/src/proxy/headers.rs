use reqwest::header::{CONNECTION, HOST, HeaderMap, HeaderName, HeaderValue, TE};

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "transfer-encoding",
    "upgrade",
];

/// Removes headers that only apply to a single connection, including any
/// listed in `Connection`. `Trailer` names end-to-end fields and is kept.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Prepares inbound headers for the hub: hop-by-hop headers go, and so
/// does `Host`, which the client sets from the hub URL. A caller that
/// accepts trailers keeps `TE: trailers`.
pub fn upstream_request_headers(mut headers: HeaderMap) -> HeaderMap {
    let accepts_trailers = headers
        .get_all(TE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case("trailers"));

    strip_hop_by_hop(&mut headers);
    headers.remove(HOST);
    if accepts_trailers {
        headers.insert(TE, HeaderValue::from_static("trailers"));
    }
    headers
}
