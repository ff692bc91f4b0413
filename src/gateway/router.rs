//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Router,
    extract::{ConnectInfo, State},
    http::{Method, Uri},
    routing::get,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use super::audit::{self, AuditEvent};
use super::error::BrokerError;
use crate::minter::{TokenMinter, TokenRequest};
use crate::mtls::{CertIdentity, PeerConnection};
use crate::peer::PeerVerifier;

/// Shared application state
pub struct AppState {
    /// Binds peers to their hostnames
    pub verifier: PeerVerifier,
    /// Upstream token minter
    pub minter: Arc<dyn TokenMinter>,
    /// The one token every verified peer receives
    pub token_request: TokenRequest,
}

/// Create the router
///
/// `GET /token` is the only route. Every other method on `/token` and every
/// other path answers 404.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/token",
            get(token_handler).head(not_found).fallback(not_found),
        )
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Verify the peer, then mint.
async fn token_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<PeerConnection>,
) -> Result<String, BrokerError> {
    let client_ip = peer.remote_addr().ip().to_canonical();

    let verified = match state.verifier.verify(&peer).await {
        Ok(verified) => verified,
        Err(e) => {
            warn!(
                peer_addr = %peer.remote_addr(),
                certificate = %certificate_summary(&peer),
                error = %e,
                "Certificate validation failed"
            );
            audit::emit(&AuditEvent::denied(client_ip, &e));
            return Err(e.into());
        }
    };

    info!(
        peer_addr = %peer.remote_addr(),
        hostname = %verified.hostname,
        certificate = %verified.identity.display_name,
        "Peer identity verified"
    );

    match state.minter.mint(&state.token_request).await {
        Ok(token) => {
            audit::emit(&AuditEvent::issued(&verified, &state.token_request, &token));
            Ok(token.into_secret())
        }
        Err(e) => {
            error!(
                hostname = %verified.hostname,
                service_account = %state.token_request.service_account,
                error = %e,
                "Token minting failed"
            );
            audit::emit(&AuditEvent::mint_failed(&verified, &state.token_request, &e));
            Err(e.into())
        }
    }
}

async fn not_found(method: Method, uri: Uri) -> BrokerError {
    debug!(%method, %uri, "No route");
    BrokerError::NotFound
}

fn certificate_summary(peer: &PeerConnection) -> String {
    match peer.certificate_der().map(CertIdentity::from_der) {
        None => "<none>".to_string(),
        Some(Ok(identity)) => format!(
            "subject={} issuer={} serial={} dns={:?}",
            identity.subject, identity.issuer, identity.serial, identity.san_dns_names
        ),
        Some(Err(_)) => "<unparseable>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minter::{AccessToken, MintError};
    use crate::mtls::test_certs::TestCa;
    use crate::peer::StaticResolver;
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use rustls::pki_types::CertificateDer;
    use std::sync::Mutex;
    use std::time::Duration;
    use tower::ServiceExt;

    /// Minter returning a canned result and recording every request.
    struct StubMinter {
        result: Result<&'static str, fn() -> MintError>,
        calls: Mutex<Vec<TokenRequest>>,
    }

    impl StubMinter {
        fn ok(token: &'static str) -> Arc<Self> {
            Arc::new(Self {
                result: Ok(token),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing(err: fn() -> MintError) -> Arc<Self> {
            Arc::new(Self {
                result: Err(err),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<TokenRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TokenMinter for StubMinter {
        async fn mint(&self, request: &TokenRequest) -> Result<AccessToken, MintError> {
            self.calls.lock().unwrap().push(request.clone());
            match self.result {
                Ok(token) => Ok(AccessToken::new(token, None)),
                Err(make) => Err(make()),
            }
        }
    }

    fn token_request() -> TokenRequest {
        TokenRequest {
            service_account: "svc@project.iam".into(),
            scopes: vec!["https://www.googleapis.com/auth/cloud-platform".into()],
            lifetime: Duration::from_secs(600),
        }
    }

    fn router(minter: Arc<StubMinter>) -> Router {
        let resolver = StaticResolver::new()
            .with_host("10.0.0.1".parse().unwrap(), "worker1.internal")
            .with_host("10.0.0.2".parse().unwrap(), "worker2.internal");
        create_router(Arc::new(AppState {
            verifier: PeerVerifier::new(Arc::new(resolver)),
            minter,
            token_request: token_request(),
        }))
    }

    fn request(method: Method, uri: &str, peer: PeerConnection) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .extension(ConnectInfo(peer))
            .body(Body::empty())
            .unwrap()
    }

    fn worker1_peer(addr: &str) -> PeerConnection {
        let ca = TestCa::new("Broker Test CA");
        let leaf = ca.client("worker1", &["worker1.internal"]);
        PeerConnection::new(addr.parse().unwrap(), Some(CertificateDer::from(leaf.der)))
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn verified_peer_receives_token_as_plain_text() {
        // GIVEN: worker1's cert from worker1's address
        let minter = StubMinter::ok("ya29.stub-token");
        let app = router(minter.clone());

        // WHEN: GET /token
        let response = app
            .oneshot(request(Method::GET, "/token", worker1_peer("10.0.0.1:50000")))
            .await
            .unwrap();

        // THEN: 200, text/plain, body is exactly the token
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(body_string(response).await, "ya29.stub-token");
        assert_eq!(minter.calls(), vec![token_request()]);
    }

    #[tokio::test]
    async fn mismatched_peer_is_forbidden_and_never_mints() {
        // GIVEN: worker1's cert from worker2's address
        let minter = StubMinter::ok("ya29.stub-token");
        let app = router(minter.clone());

        let response = app
            .oneshot(request(Method::GET, "/token", worker1_peer("10.0.0.2:50000")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_string(response).await, "Forbidden");
        assert!(minter.calls().is_empty());
    }

    #[tokio::test]
    async fn connection_without_certificate_is_forbidden() {
        let minter = StubMinter::ok("ya29.stub-token");
        let peer = PeerConnection::new("10.0.0.1:50000".parse().unwrap(), None);

        let response = router(minter.clone())
            .oneshot(request(Method::GET, "/token", peer))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(minter.calls().is_empty());
    }

    #[tokio::test]
    async fn mint_failure_is_a_generic_500() {
        // GIVEN: a verified peer but an upstream that times out
        let minter = StubMinter::failing(|| MintError::Timeout(Duration::from_secs(10)));

        let response = router(minter.clone())
            .oneshot(request(Method::GET, "/token", worker1_peer("10.0.0.1:50000")))
            .await
            .unwrap();

        // THEN: 500 without upstream detail
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_string(response).await;
        assert_eq!(body, "Internal Server Error");
        assert!(!body.contains("timed out"));
        assert_eq!(minter.calls().len(), 1);
    }

    /// Log sink shared between a test and its subscriber.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        (logs, tracing::subscriber::set_default(subscriber))
    }

    #[tokio::test]
    async fn mint_timeout_still_logs_the_verified_peer() {
        // GIVEN: log capture, a verified peer and an upstream that times out
        let (logs, _guard) = capture_logs();
        let minter = StubMinter::failing(|| MintError::Timeout(Duration::from_secs(10)));

        // WHEN: GET /token
        let response = router(minter)
            .oneshot(request(Method::GET, "/token", worker1_peer("10.0.0.1:50000")))
            .await
            .unwrap();

        // THEN: the peer gets a bare 500
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_string(response).await;
        assert_eq!(body, "Internal Server Error");
        assert!(!body.contains("timed out"));

        // AND: the logs carry the verification success and the failure detail
        let logs = logs.contents();
        assert!(logs.contains("Peer identity verified"), "{logs}");
        assert!(logs.contains("worker1.internal"), "{logs}");
        assert!(logs.contains("\"event\":\"token.mint_failed\""), "{logs}");
        assert!(logs.contains("\"kind\":\"timeout\""), "{logs}");
        assert!(logs.contains("timed out"), "{logs}");
    }

    #[tokio::test]
    async fn issued_token_never_reaches_the_logs() {
        let (logs, _guard) = capture_logs();
        let minter = StubMinter::ok("ya29.stub-token");

        let response = router(minter)
            .oneshot(request(Method::GET, "/token", worker1_peer("10.0.0.1:50000")))
            .await
            .unwrap();

        assert_eq!(body_string(response).await, "ya29.stub-token");
        let logs = logs.contents();
        assert!(logs.contains("\"event\":\"token.issued\""), "{logs}");
        assert!(!logs.contains("ya29.stub-token"), "{logs}");
    }

    #[tokio::test]
    async fn other_paths_are_not_found() {
        let minter = StubMinter::ok("ya29.stub-token");

        for uri in ["/", "/other", "/token/extra", "/tokens"] {
            let response = router(minter.clone())
                .oneshot(request(Method::GET, uri, worker1_peer("10.0.0.1:50000")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        }
        assert!(minter.calls().is_empty());
    }

    #[tokio::test]
    async fn other_methods_on_token_are_not_found() {
        let minter = StubMinter::ok("ya29.stub-token");

        for method in [Method::POST, Method::PUT, Method::DELETE, Method::HEAD] {
            let response = router(minter.clone())
                .oneshot(request(method.clone(), "/token", worker1_peer("10.0.0.1:50000")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{method}");
        }
        assert!(minter.calls().is_empty());
    }

    #[test]
    fn certificate_summary_handles_missing_and_garbage() {
        let addr = "10.0.0.1:1".parse().unwrap();
        assert_eq!(certificate_summary(&PeerConnection::new(addr, None)), "<none>");
        let garbage = PeerConnection::new(addr, Some(CertificateDer::from(b"junk".to_vec())));
        assert_eq!(certificate_summary(&garbage), "<unparseable>");
        let summary = certificate_summary(&worker1_peer("10.0.0.1:1"));
        assert!(summary.contains("worker1.internal"));
    }
}
