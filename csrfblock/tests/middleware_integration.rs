//! End-to-end tests: session layer + CsrfLayer + axum router, driven through
//! `tower::ServiceExt::oneshot`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use csrfblock::{
    BlockedHandler, CsrfConfig, CsrfLayer, MemoryStore, Session, BLOCKED_BODY,
};
use http_body_util::BodyExt;
use tower::ServiceExt;

const PAGE: &str = concat!(
    "<html><head><title>demo</title></head><body>",
    "<form method=\"post\" action=\"/submit\"><button>go</button></form>",
    "<form method=\"post\" action=\"http://evil.example/steal\"></form>",
    "<form method=\"get\" action=\"/search\"></form>",
    "</body></html>"
);

async fn page() -> Html<&'static str> {
    Html(PAGE)
}

async fn submit() -> &'static str {
    "accepted"
}

fn app(config: CsrfConfig, session: Session) -> Router {
    Router::new()
        .route("/", get(page))
        .route("/submit", post(submit))
        .layer(CsrfLayer::new(config))
        .layer(middleware::from_fn(
            move |mut request: Request, next: Next| {
                let session = session.clone();
                async move {
                    request.extensions_mut().insert(session);
                    next.run(request).await
                }
            },
        ))
}

fn fresh_session() -> Session {
    Session::new(Arc::new(MemoryStore::default()))
}

async fn body_string(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Fetch the landing page and return the token the middleware issued.
async fn issue_token(app: &Router, session: &Session) -> String {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/")
                .header(header::HOST, "example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let html = body_string(response).await;
    let token = session.get("csrfblock.token").await.expect("token issued");
    assert!(
        html.contains(&format!(
            r#"<input type="hidden" name="SEC" value="{token}" />"#
        )),
        "page should carry the issued token: {html}"
    );
    token
}

#[tokio::test]
async fn test_get_issues_token_and_injects_same_origin_forms_only() {
    let session = fresh_session();
    let app = app(CsrfConfig::default(), session.clone());

    let token = issue_token(&app, &session).await;
    assert_eq!(token.len(), 16);
    assert!(token.chars().all(|c| c.is_ascii_hexdigit()));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/")
                .header(header::HOST, "example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let html = body_string(response).await;

    // One injection for the same-origin POST form; the cross-origin POST
    // form and the GET form stay untouched.
    let hidden = format!(r#"<input type="hidden" name="SEC" value="{token}" />"#);
    assert_eq!(html.matches(&hidden).count(), 1);
    assert!(html.contains(&format!(
        r#"<form method="post" action="/submit">{hidden}"#
    )));
    assert!(html.contains(r#"<form method="post" action="http://evil.example/steal"></form>"#));
    assert!(html.contains(r#"<form method="get" action="/search"></form>"#));

    // A second GET reuses the stored token.
    assert_eq!(session.get("csrfblock.token").await, Some(token));
}

#[tokio::test]
async fn test_round_trip_via_header() {
    let session = fresh_session();
    let app = app(CsrfConfig::default(), session.clone());
    let token = issue_token(&app, &session).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/submit")
                .header("x-csrf-token", &token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "accepted");
}

#[tokio::test]
async fn test_round_trip_via_urlencoded_body() {
    let session = fresh_session();
    let app = app(CsrfConfig::default(), session.clone());
    let token = issue_token(&app, &session).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/submit")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(format!("SEC={token}&comment=hello")))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_round_trip_via_multipart_body() {
    let session = fresh_session();
    let app = app(CsrfConfig::default(), session.clone());
    let token = issue_token(&app, &session).await;

    let body = format!(
        "--XBOUNDARY\r\nContent-Disposition: form-data; name=\"SEC\"\r\n\r\n{token}\r\n--XBOUNDARY--\r\n"
    );
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/submit")
                .header(
                    header::CONTENT_TYPE,
                    "multipart/form-data; boundary=XBOUNDARY",
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_post_without_token_gets_the_default_403() {
    let session = fresh_session();
    let app = app(CsrfConfig::default(), session.clone());
    issue_token(&app, &session).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/submit")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/plain"
    );
    assert_eq!(
        response.headers().get(header::CONTENT_LENGTH).unwrap(),
        &HeaderValue::from(BLOCKED_BODY.len())
    );
    assert_eq!(body_string(response).await, "CSRF detected");
}

#[tokio::test]
async fn test_first_post_before_any_page_is_rejected() {
    let session = fresh_session();
    let app = app(CsrfConfig::default(), session);

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/submit")
                .header("x-csrf-token", "0123456789abcdef")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_onetime_token_cannot_be_replayed() {
    let session = fresh_session();
    let app = app(CsrfConfig::default().with_onetime(true), session.clone());
    let token = issue_token(&app, &session).await;

    let first = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/submit")
                .header("x-csrf-token", &token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let replay = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/submit")
                .header("x-csrf-token", &token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(replay.status(), StatusCode::FORBIDDEN);

    // The next page issues a fresh token.
    let fresh = issue_token(&app, &session).await;
    assert_ne!(fresh, token);
}

#[tokio::test]
async fn test_whitelisted_post_passes_without_token() {
    let session = fresh_session();
    let config = CsrfConfig::default()
        .with_whitelist(|request: &Request| request.uri().path() == "/submit");
    let app = app(config, session);

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/submit")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_session_layer_is_a_hard_failure() {
    let app = Router::new()
        .route("/", get(page))
        .route("/submit", post(submit))
        .layer(CsrfLayer::new(CsrfConfig::default()));

    for method in [Method::GET, Method::POST] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method.clone())
                    .uri("/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.status(),
            StatusCode::INTERNAL_SERVER_ERROR,
            "{method} without a session must fail loudly"
        );
    }
}

#[tokio::test]
async fn test_non_html_responses_pass_through_untouched() {
    let session = fresh_session();
    let app = Router::new()
        .route(
            "/raw",
            get(|| async {
                (
                    [(header::CONTENT_TYPE, "text/plain")],
                    r#"<form method="post" action="/x"></form>"#,
                )
            }),
        )
        .layer(CsrfLayer::new(CsrfConfig::default()))
        .layer(middleware::from_fn(
            move |mut request: Request, next: Next| {
                let session = session.clone();
                async move {
                    request.extensions_mut().insert(session);
                    next.run(request).await
                }
            },
        ));

    let response = app
        .oneshot(Request::builder().uri("/raw").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(
        body_string(response).await,
        r#"<form method="post" action="/x"></form>"#
    );
}

#[tokio::test]
async fn test_meta_tag_injected_when_enabled() {
    let session = fresh_session();
    let app = app(
        CsrfConfig::default().with_meta("csrftoken"),
        session.clone(),
    );

    let token = issue_token(&app, &session).await;
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/")
                .header(header::HOST, "example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let html = body_string(response).await;

    let meta = format!(r#"<meta name="csrftoken" content="{token}"/>"#);
    assert_eq!(html.matches(&meta).count(), 1);
    assert!(html.starts_with(&format!("<html><head>{meta}")));
}

#[tokio::test]
async fn test_streamed_html_is_rewritten_across_chunk_boundaries() {
    let session = fresh_session();

    // The form tag is deliberately split across frames.
    async fn streamed() -> Response {
        let chunks: Vec<Result<&'static [u8], Infallible>> = vec![
            Ok(b"<html><body><fo"),
            Ok(b"rm method=\"po"),
            Ok(b"st\" action=\"/submit\">"),
            Ok(b"</form></body></html>"),
        ];
        Response::builder()
            .header(header::CONTENT_TYPE, "text/html")
            .header(header::CONTENT_LENGTH, "75")
            .body(Body::from_stream(futures_util::stream::iter(chunks)))
            .unwrap()
    }

    let app = Router::new()
        .route("/stream", get(streamed))
        .layer(CsrfLayer::new(CsrfConfig::default()))
        .layer(middleware::from_fn({
            let session = session.clone();
            move |mut request: Request, next: Next| {
                let session = session.clone();
                async move {
                    request.extensions_mut().insert(session);
                    next.run(request).await
                }
            }
        }));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/stream")
                .header(header::HOST, "example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // A stale length would be wrong after injection.
    assert!(response.headers().get(header::CONTENT_LENGTH).is_none());

    let token = session.get("csrfblock.token").await.unwrap();
    let html = body_string(response).await;
    assert_eq!(
        html,
        format!(
            "<html><body><form method=\"post\" action=\"/submit\">\
             <input type=\"hidden\" name=\"SEC\" value=\"{token}\" />\
             </form></body></html>"
        )
    );
}

#[tokio::test]
async fn test_custom_blocked_handler_sees_the_posted_body() {
    struct EchoBlocked;

    #[async_trait::async_trait]
    impl BlockedHandler for EchoBlocked {
        async fn handle(&self, request: Request) -> Response {
            let bytes = axum::body::to_bytes(request.into_body(), usize::MAX)
                .await
                .unwrap_or_default();
            (
                StatusCode::FORBIDDEN,
                format!("blocked: {}", String::from_utf8_lossy(&bytes)),
            )
                .into_response()
        }
    }

    let session = fresh_session();
    let app = app(
        CsrfConfig::default().with_blocked(EchoBlocked),
        session.clone(),
    );
    issue_token(&app, &session).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/submit")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("SEC=wrong&comment=hi"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_string(response).await, "blocked: SEC=wrong&comment=hi");
}

#[tokio::test]
async fn test_custom_parameter_and_header_names() {
    let session = fresh_session();
    let config = CsrfConfig::default()
        .with_parameter_name("_token")
        .with_header_name("X_MY_TOKEN")
        .unwrap();
    let app = app(config, session.clone());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/")
                .header(header::HOST, "example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let html = body_string(response).await;
    let token = session.get("csrfblock.token").await.unwrap();
    assert!(html.contains(&format!(
        r#"<input type="hidden" name="_token" value="{token}" />"#
    )));

    let accepted = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/submit")
                .header("x-my-token", &token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::OK);
}
