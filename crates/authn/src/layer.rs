//! Tower integration.
//!
//! [`AuthLayer`] runs an [`Authenticator`] on every request, inserts the
//! resulting [`AuthOutcome`] into the request extensions and always forwards
//! the request to the inner service. Handlers read the outcome back with
//! [`AuthOutcome::from_extensions`] and hand it to the
//! [`Authorizer`](crate::authorizer::Authorizer).

use std::task::{Context, Poll};

use tower::{Layer, Service};

use crate::middleware::{AuthOutcome, Authenticator};

/// Tower layer attaching an [`AuthOutcome`] to each request.
#[derive(Clone, Debug)]
pub struct AuthLayer {
    authenticator: Authenticator,
}

impl AuthLayer {
    /// Creates the layer.
    #[must_use]
    pub fn new(authenticator: Authenticator) -> Self {
        Self { authenticator }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService { inner, authenticator: self.authenticator.clone() }
    }
}

/// Service produced by [`AuthLayer`].
#[derive(Clone, Debug)]
pub struct AuthService<S> {
    inner: S,
    authenticator: Authenticator,
}

impl<S, B> Service<http::Request<B>> for AuthService<S>
where
    S: Service<http::Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<B>) -> Self::Future {
        let outcome: AuthOutcome = self.authenticator.authenticate_headers(req.headers());
        req.extensions_mut().insert(outcome);
        self.inner.call(req)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::convert::Infallible;

    use jsonwebtoken::Algorithm;
    use tower::{ServiceBuilder, ServiceExt, service_fn};

    use super::*;
    use crate::{
        key_set::{Key, KeySet, SharedKeySet},
        middleware::AuthFailure,
        testutil::sign_hmac_token,
    };

    const SECRET: &[u8] = b"0123456789abcdef";

    fn authenticator() -> Authenticator {
        let mut set = KeySet::new();
        set.add(Key::symmetric("k1", Algorithm::HS256, SECRET).unwrap()).unwrap();
        Authenticator::new(SharedKeySet::from(set), ["Bearer"], Algorithm::HS256)
    }

    async fn echo(req: http::Request<()>) -> Result<AuthOutcome, Infallible> {
        Ok(AuthOutcome::from_extensions(req.extensions()))
    }

    #[tokio::test]
    async fn test_missing_header_still_reaches_handler() {
        let svc = ServiceBuilder::new().layer(AuthLayer::new(authenticator())).service(service_fn(echo));

        let req = http::Request::builder().uri("/public").body(()).unwrap();
        let outcome = svc.oneshot(req).await.unwrap();

        assert_eq!(outcome, AuthOutcome::Rejected(AuthFailure::MissingHeader));
    }

    #[tokio::test]
    async fn test_malformed_header_still_reaches_handler() {
        let svc = ServiceBuilder::new().layer(AuthLayer::new(authenticator())).service(service_fn(echo));

        let req = http::Request::builder()
            .header("Authorization", "Bearer a.b.c trailing")
            .body(())
            .unwrap();
        let outcome = svc.oneshot(req).await.unwrap();

        assert_eq!(outcome, AuthOutcome::Rejected(AuthFailure::MalformedHeader));
    }

    #[tokio::test]
    async fn test_valid_token_attaches_claims() {
        let svc = ServiceBuilder::new().layer(AuthLayer::new(authenticator())).service(service_fn(echo));

        let token = sign_hmac_token(SECRET, Algorithm::HS256, "k1", &serde_json::json!({"sub": "u1"}));
        let req = http::Request::builder()
            .header("Authorization", format!("Bearer {token}"))
            .body(())
            .unwrap();
        let outcome = svc.oneshot(req).await.unwrap();

        assert_eq!(outcome.claims().unwrap().subject(), Some("u1"));
    }
}
