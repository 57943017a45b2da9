use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use prerender_session::{RenderResult, Request};
use std::time::Instant;
use tracing::{debug, trace};

use super::state::ServeState;

pub const TITLE_MARKER: &str = "<!-- EMBER_CLI_FASTBOOT_TITLE -->";
pub const HEAD_MARKER: &str = "<!-- EMBER_CLI_FASTBOOT_HEAD -->";
pub const BODY_MARKER: &str = "<!-- EMBER_CLI_FASTBOOT_BODY -->";
pub const BODY_START: &str = r#"<script type="x/boundary" id="fastboot-body-start"></script>"#;
pub const BODY_END: &str = r#"<script type="x/boundary" id="fastboot-body-end"></script>"#;

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Entry point for every request that is not a built-in route.
pub(crate) async fn serve_app(
    State(state): State<ServeState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let Some(renderer) = state.renderer.clone() else {
        let (path, content) = state.app.resolve(uri.path());
        return file_response(path, content);
    };

    let path = uri.path().trim_matches('/');
    if let Some(content) = state.app.file(path) {
        trace!(target: "prerender-server", path, "serving stored file");
        return file_response(path, content);
    }

    let url = uri
        .path_and_query()
        .map(|target| target.as_str())
        .unwrap_or("/")
        .to_string();

    if let Some(page) = state.cache().and_then(|cache| cache.get(&url)) {
        debug!(target: "prerender-server", %url, "serving cached render");
        return html_response(page.to_vec());
    }

    let mut request = build_request(&state.protocol, &uri, &headers);
    state.hooks.on_request(&mut request);

    let started = Instant::now();
    let index = state.app.index();
    match renderer.render(&url, &request, state.visit_timeout).await {
        Ok(mut result) => {
            state.hooks.on_result(&mut result);
            let page = splice(index, &result);
            if let Some(cache) = state.cache() {
                cache.insert(url.clone(), page.clone());
            }
            debug!(
                target: "prerender-server",
                %url,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "rendered"
            );
            html_response(page)
        }
        Err(err) => {
            state.hooks.on_error(&err);
            html_response(index.to_vec())
        }
    }
}

/// Describe an incoming HTTP request the way the application expects it.
pub fn build_request(protocol: &str, uri: &Uri, headers: &HeaderMap) -> Request {
    let mut request = Request::get(uri.path());
    request.protocol = protocol.to_string();

    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            request.headers.append(name.as_str(), value);
        }
    }
    if !request.headers.contains("host") {
        if let Some(authority) = uri.authority() {
            request.headers.set("host", authority.as_str());
        }
    }

    for value in headers.get_all(header::COOKIE) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                request
                    .cookies
                    .insert(name.trim().to_string(), value.trim().to_string());
            }
        }
    }

    if let Some(query) = uri.query() {
        request.query_params = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
    }

    request
}

/// Insert a render into the index document: attributes go into the opening
/// tags, markup replaces the placeholders.
pub fn splice(index: &[u8], result: &RenderResult) -> Vec<u8> {
    let page = String::from_utf8_lossy(index)
        .replacen(
            "<body>",
            &format!("<body{}>", result.body_attributes_string()),
            1,
        )
        .replacen(
            "<head>",
            &format!("<head{}>", result.head_attributes_string()),
            1,
        )
        .replacen(
            "<html>",
            &format!("<html{}>", result.html_attributes_string()),
            1,
        );

    let body = format!("{BODY_START}{}{BODY_END}", result.body_content);
    page.replacen(TITLE_MARKER, "", 1)
        .replacen(HEAD_MARKER, &result.head_content, 1)
        .replacen(BODY_MARKER, &body, 1)
        .into_bytes()
}

fn file_response(path: &str, content: &[u8]) -> Response {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let mut response = Response::new(Body::from(content.to_vec()));
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
}

fn html_response(page: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, HTML_CONTENT_TYPE)], page).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    const INDEX: &str = concat!(
        "<!DOCTYPE html>\n<html>\n<head>\n",
        "<!-- EMBER_CLI_FASTBOOT_TITLE --><title>Shop</title>\n",
        "<!-- EMBER_CLI_FASTBOOT_HEAD -->\n</head>\n<body>\n",
        "<!-- EMBER_CLI_FASTBOOT_BODY -->\n</body>\n</html>\n"
    );

    #[test]
    fn splices_markup_and_attributes() {
        let result = RenderResult {
            head_content: "<title>Cart</title>".into(),
            body_content: "<h1>Cart</h1>".into(),
            html_attributes: BTreeMap::from([("lang".to_string(), "en".to_string())]),
            head_attributes: BTreeMap::new(),
            body_attributes: BTreeMap::from([("class".to_string(), "a \"b\"".to_string())]),
        };

        let page = String::from_utf8(splice(INDEX.as_bytes(), &result)).unwrap();
        assert_eq!(
            page,
            concat!(
                "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n",
                "<title>Shop</title>\n",
                "<title>Cart</title>\n</head>\n<body class=\"a &quot;b&quot;\">\n",
                "<script type=\"x/boundary\" id=\"fastboot-body-start\"></script>",
                "<h1>Cart</h1>",
                "<script type=\"x/boundary\" id=\"fastboot-body-end\"></script>\n",
                "</body>\n</html>\n"
            )
        );
    }

    #[test]
    fn request_carries_headers_cookies_and_query() {
        let uri: Uri = "/search?q=rust+lang&page=2".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("shop.example"));
        headers.append(header::COOKIE, HeaderValue::from_static("session=abc; theme=dark"));
        headers.append(header::COOKIE, HeaderValue::from_static("foo=bar"));
        headers.append("x-trace", HeaderValue::from_static("1"));
        headers.append("x-trace", HeaderValue::from_static("2"));

        let request = build_request("https:", &uri, &headers);
        assert_eq!(request.method, "GET");
        assert_eq!(request.protocol, "https:");
        assert_eq!(request.path, "/search");
        assert_eq!(request.host(), Some("shop.example"));
        assert_eq!(request.headers.get_all("X-Trace"), ["1", "2"]);
        assert_eq!(request.cookies.get("session").map(String::as_str), Some("abc"));
        assert_eq!(request.cookies.get("theme").map(String::as_str), Some("dark"));
        assert_eq!(request.cookies.get("foo").map(String::as_str), Some("bar"));
        assert_eq!(request.query_params.get("q").map(String::as_str), Some("rust lang"));
        assert_eq!(request.query_params.get("page").map(String::as_str), Some("2"));
    }

    #[test]
    fn host_falls_back_to_the_uri_authority() {
        let uri: Uri = "http://shop.example:8080/cart".parse().unwrap();
        let request = build_request("http:", &uri, &HeaderMap::new());
        assert_eq!(request.host(), Some("shop.example:8080"));
        assert_eq!(request.path, "/cart");
    }
}
