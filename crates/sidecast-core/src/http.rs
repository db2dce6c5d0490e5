//! Byte-level HTTP operations on a raw request/response payload.
//!
//! These operate directly on the wire bytes without building a full
//! parse tree: locate the request-line via the first CRLF, split
//! method/path/version, find the CRLFCRLF header terminator, and
//! enumerate headers lazily. `set_*` operations always return a new
//! buffer (Rust gives no safe in-place resize of a borrowed slice);
//! they preserve CRLF line endings and recompute `Content-Length`
//! whenever body length changes.

const CRLF: &[u8] = b"\r\n";

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    memchr::memmem::find(haystack, needle)
}

/// Byte offset of the CRLFCRLF header terminator, if present.
fn header_end(payload: &[u8]) -> Option<usize> {
    find(payload, b"\r\n\r\n")
}

/// The request-line or status-line: everything before the first CRLF.
fn first_line(payload: &[u8]) -> &[u8] {
    match find(payload, CRLF) {
        Some(idx) => &payload[..idx],
        None => payload,
    }
}

/// HTTP method of a request payload, e.g. `b"GET"`.
pub fn method(payload: &[u8]) -> Option<&[u8]> {
    let line = first_line(payload);
    line.split(|&b| b == b' ').next().filter(|m| !m.is_empty())
}

/// Request target (path + query), e.g. `b"/api/x?y=1"`.
pub fn path(payload: &[u8]) -> Option<&[u8]> {
    let line = first_line(payload);
    let mut parts = line.split(|&b| b == b' ');
    parts.next()?;
    parts.next().filter(|p| !p.is_empty())
}

/// Replace the request target, rewriting the request-line only.
pub fn set_path(payload: &[u8], new_path: &[u8]) -> Vec<u8> {
    let Some(line_end) = find(payload, CRLF) else {
        return payload.to_vec();
    };
    let line = &payload[..line_end];
    let mut parts = line.splitn(3, |&b| b == b' ');
    let method = parts.next().unwrap_or(b"GET");
    let _old_path = parts.next();
    let version = parts.next().unwrap_or(b"HTTP/1.1");

    let mut out = Vec::with_capacity(payload.len());
    out.extend_from_slice(method);
    out.push(b' ');
    out.extend_from_slice(new_path);
    out.push(b' ');
    out.extend_from_slice(version);
    out.extend_from_slice(&payload[line_end..]);
    out
}

/// Extract the value of a path/query parameter (the part after `name=`
/// in the query string).
pub fn path_param<'a>(payload: &'a [u8], name: &str) -> Option<&'a [u8]> {
    let p = path(payload)?;
    let query_start = find(p, b"?")? + 1;
    let query = &p[query_start..];
    for pair in query.split(|&b| b == b'&') {
        if let Some(eq) = find(pair, b"=") {
            if &pair[..eq] == name.as_bytes() {
                return Some(&pair[eq + 1..]);
            }
        } else if pair == name.as_bytes() {
            return Some(&pair[pair.len()..]);
        }
    }
    None
}

/// Set (or add) a query parameter, returning a rewritten request-line.
pub fn set_path_param(payload: &[u8], name: &str, value: &str) -> Vec<u8> {
    let Some(p) = path(payload) else {
        return payload.to_vec();
    };
    let p = p.to_vec();

    let (base, query) = match find(&p, b"?") {
        Some(idx) => (p[..idx].to_vec(), String::from_utf8_lossy(&p[idx + 1..]).to_string()),
        None => (p.clone(), String::new()),
    };

    let mut pairs: Vec<(String, String)> = if query.is_empty() {
        Vec::new()
    } else {
        query
            .split('&')
            .filter(|s| !s.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect()
    };

    if let Some(existing) = pairs.iter_mut().find(|(k, _)| k == name) {
        existing.1 = value.to_string();
    } else {
        pairs.push((name.to_string(), value.to_string()));
    }

    let new_query = pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut new_path = String::from_utf8_lossy(&base).to_string();
    if !new_query.is_empty() {
        new_path.push('?');
        new_path.push_str(&new_query);
    }

    set_path(payload, new_path.as_bytes())
}

/// Find a header value by case-insensitive name match.
pub fn header<'a>(payload: &'a [u8], name: &str) -> Option<&'a [u8]> {
    let end = header_end(payload)?;
    let header_block = &payload[..end];
    let mut lines = header_block.split(|&b| b == b'\n').skip(1); // skip request-line
    for line in &mut lines {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        let colon = find(line, b":")?;
        let key = &line[..colon];
        if key.eq_ignore_ascii_case(name.as_bytes()) {
            let value = &line[colon + 1..];
            let value = value.strip_prefix(b" ").unwrap_or(value);
            return Some(value);
        }
    }
    None
}

/// All headers as `(name, value)` pairs, in wire order. Used by
/// dispatchers that need the full set rather than a single lookup.
pub fn headers(payload: &[u8]) -> Vec<(String, String)> {
    let Some(end) = header_end(payload) else {
        return Vec::new();
    };
    let header_block = &payload[..end];
    header_block
        .split(|&b| b == b'\n')
        .skip(1) // request-line
        .filter_map(|line| {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.is_empty() {
                return None;
            }
            let colon = find(line, b":")?;
            let name = String::from_utf8_lossy(&line[..colon]).into_owned();
            let value = &line[colon + 1..];
            let value = value.strip_prefix(b" ").unwrap_or(value);
            Some((name, String::from_utf8_lossy(value).into_owned()))
        })
        .collect()
}

/// Set (or insert) a header, rewriting the header block.
pub fn set_header(payload: &[u8], name: &str, value: &str) -> Vec<u8> {
    let Some(end) = header_end(payload) else {
        return payload.to_vec();
    };
    let request_line_end = find(payload, CRLF).unwrap_or(end);

    let header_block = &payload[request_line_end + 2..end];
    let mut lines: Vec<Vec<u8>> = header_block
        .split(|&b| b == b'\n')
        .filter(|l| !l.is_empty())
        .map(|l| l.strip_suffix(b"\r").unwrap_or(l).to_vec())
        .collect();

    let new_line = format!("{name}: {value}");
    let mut replaced = false;
    for line in lines.iter_mut() {
        if let Some(colon) = find(line, b":") {
            if line[..colon].eq_ignore_ascii_case(name.as_bytes()) {
                *line = new_line.as_bytes().to_vec();
                replaced = true;
                break;
            }
        }
    }
    if !replaced {
        lines.push(new_line.as_bytes().to_vec());
    }

    rebuild(payload, request_line_end, &lines, end)
}

/// Remove a header by case-insensitive name, if present.
pub fn delete_header(payload: &[u8], name: &str) -> Vec<u8> {
    let Some(end) = header_end(payload) else {
        return payload.to_vec();
    };
    let request_line_end = find(payload, CRLF).unwrap_or(end);

    let header_block = &payload[request_line_end + 2..end];
    let lines: Vec<Vec<u8>> = header_block
        .split(|&b| b == b'\n')
        .filter(|l| !l.is_empty())
        .map(|l| l.strip_suffix(b"\r").unwrap_or(l).to_vec())
        .filter(|l| {
            find(l, b":")
                .map(|colon| !l[..colon].eq_ignore_ascii_case(name.as_bytes()))
                .unwrap_or(true)
        })
        .collect();

    rebuild(payload, request_line_end, &lines, end)
}

fn rebuild(payload: &[u8], request_line_end: usize, header_lines: &[Vec<u8>], old_header_end: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    out.extend_from_slice(&payload[..=request_line_end + 1]);
    for line in header_lines {
        out.extend_from_slice(line);
        out.extend_from_slice(CRLF);
    }
    out.extend_from_slice(CRLF);
    out.extend_from_slice(&payload[old_header_end + 4..]);
    out
}

/// The body: everything after the CRLFCRLF terminator.
pub fn body(payload: &[u8]) -> &[u8] {
    match header_end(payload) {
        Some(end) => &payload[end + 4..],
        None => &[],
    }
}

/// Replace the body and recompute `Content-Length`.
pub fn set_body(payload: &[u8], new_body: &[u8]) -> Vec<u8> {
    let Some(end) = header_end(payload) else {
        return payload.to_vec();
    };
    let with_headers = set_header(&payload[..end + 4], "Content-Length", &new_body.len().to_string());
    let mut out = with_headers;
    out.extend_from_slice(new_body);
    out
}

/// HTTP status code of a response payload's status-line.
pub fn status(payload: &[u8]) -> Option<u16> {
    let line = first_line(payload);
    let mut parts = line.split(|&b| b == b' ');
    parts.next()?; // HTTP/1.1
    let code = parts.next()?;
    std::str::from_utf8(code).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQ: &[u8] = b"GET /api/users?id=1 HTTP/1.1\r\nHost: example.com\r\nContent-Length: 4\r\n\r\nbody";

    #[test]
    fn parses_method_and_path() {
        assert_eq!(method(REQ), Some(b"GET".as_ref()));
        assert_eq!(path(REQ), Some(b"/api/users?id=1".as_ref()));
    }

    #[test]
    fn reads_header_case_insensitively() {
        assert_eq!(header(REQ, "host"), Some(b"example.com".as_ref()));
        assert_eq!(header(REQ, "HOST"), Some(b"example.com".as_ref()));
        assert_eq!(header(REQ, "missing"), None);
    }

    #[test]
    fn reads_body() {
        assert_eq!(body(REQ), b"body");
    }

    #[test]
    fn set_path_rewrites_request_line_only() {
        let out = set_path(REQ, b"/v2/users");
        assert_eq!(path(&out), Some(b"/v2/users".as_ref()));
        assert_eq!(body(&out), b"body");
    }

    #[test]
    fn path_param_extracts_query_value() {
        assert_eq!(path_param(REQ, "id"), Some(b"1".as_ref()));
        assert_eq!(path_param(REQ, "missing"), None);
    }

    #[test]
    fn set_path_param_adds_and_replaces() {
        let out = set_path_param(REQ, "id", "42");
        assert_eq!(path_param(&out, "id"), Some(b"42".as_ref()));

        let out2 = set_path_param(REQ, "new", "v");
        assert_eq!(path_param(&out2, "new"), Some(b"v".as_ref()));
        assert_eq!(path_param(&out2, "id"), Some(b"1".as_ref()));
    }

    #[test]
    fn set_header_replaces_existing_value() {
        let out = set_header(REQ, "Host", "other.com");
        assert_eq!(header(&out, "Host"), Some(b"other.com".as_ref()));
    }

    #[test]
    fn set_header_inserts_new_header() {
        let out = set_header(REQ, "X-New", "1");
        assert_eq!(header(&out, "X-New"), Some(b"1".as_ref()));
        assert_eq!(header(&out, "Host"), Some(b"example.com".as_ref()));
    }

    #[test]
    fn delete_header_removes_it() {
        let out = delete_header(REQ, "Host");
        assert_eq!(header(&out, "Host"), None);
        assert_eq!(header(&out, "Content-Length"), Some(b"4".as_ref()));
    }

    #[test]
    fn set_body_recomputes_content_length() {
        let out = set_body(REQ, b"a longer body");
        assert_eq!(body(&out), b"a longer body");
        assert_eq!(header(&out, "Content-Length"), Some(b"13".as_ref()));
    }

    #[test]
    fn status_reads_response_status_line() {
        let resp = b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
        assert_eq!(status(resp), Some(404));
    }

    #[test]
    fn headers_lists_all_pairs_in_order() {
        let all = headers(REQ);
        assert_eq!(
            all,
            vec![
                ("Host".to_string(), "example.com".to_string()),
                ("Content-Length".to_string(), "4".to_string()),
            ]
        );
    }
}
