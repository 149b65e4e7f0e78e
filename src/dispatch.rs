//! Permission-scoped dispatch.
//!
//! One state machine per request: transport check, source rate check,
//! brute-force lockout check, authentication, identity rate check,
//! operation resolution, capability authorization, invocation. Every
//! terminal state is recovered into the uniform envelope; rate-limit
//! metadata is attached to every response from the identity check onward.

use std::net::IpAddr;
use std::sync::Arc;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::audit;
use crate::auth::{AuthSuccess, Authenticator};
use crate::catalog;
use crate::config::RateLimitSettings;
use crate::content::ContentStore;
use crate::errors::{Envelope, GatewayError};
use crate::identity::IdentityDirectory;
use crate::metrics;
use crate::rate_limit::{identity_key, source_key, BruteForceGuard, RateLimitDecision, RateLimiter};

/// Terminal result of one dispatched request, transport-ready.
#[derive(Debug)]
pub struct DispatchReply {
    pub status: StatusCode,
    pub envelope: Envelope,
    /// Identity-window decision, rendered as X-RateLimit-* headers.
    pub rate: Option<RateLimitDecision>,
    pub www_authenticate: bool,
}

impl IntoResponse for DispatchReply {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.envelope)).into_response();
        if let Some(rate) = self.rate {
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", header_value(rate.limit as u64));
            headers.insert("x-ratelimit-remaining", header_value(rate.remaining as u64));
            headers.insert("x-ratelimit-reset", header_value(rate.reset_at));
        }
        if self.www_authenticate {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

fn header_value(value: u64) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).unwrap_or(HeaderValue::from_static("0"))
}

pub struct Dispatcher {
    authenticator: Authenticator,
    limiter: Arc<RateLimiter>,
    guard: BruteForceGuard,
    store: Arc<dyn ContentStore>,
    limits: RateLimitSettings,
    debug: bool,
}

impl Dispatcher {
    pub fn new(
        directory: Arc<dyn IdentityDirectory>,
        store: Arc<dyn ContentStore>,
        limiter: Arc<RateLimiter>,
        limits: RateLimitSettings,
        debug: bool,
    ) -> Self {
        Self {
            authenticator: Authenticator::new(directory),
            guard: BruteForceGuard::new(limiter.clone(), &limits),
            limiter,
            store,
            limits,
            debug,
        }
    }

    /// Invoke one named operation. Steps 2-9 of the request state machine;
    /// the transport method whitelist (step 1) is enforced by the router.
    pub async fn dispatch_invoke(
        &self,
        source: IpAddr,
        auth_header: Option<&str>,
        name: &str,
        arguments: Value,
    ) -> DispatchReply {
        let auth = match self.front_checks(source, auth_header).await {
            Ok(auth) => auth,
            Err(reply) => return reply,
        };
        let (auth, rate) = auth;

        // Resolve. An unknown name is its own terminal state, reported
        // before any capability comparison.
        let Some(operation) = catalog::find(name) else {
            return self.failure(
                GatewayError::UnknownOperation { name: name.to_string() },
                Some(rate),
                false,
            );
        };

        // Authorize.
        if let Some(required) = operation.required_capability {
            if !auth.capabilities.contains(required) {
                return self.failure(GatewayError::Forbidden, Some(rate), false);
            }
        }

        // Destructive operations need the explicit confirmation argument
        // before the handler is ever consulted.
        if operation.confirm_required
            && arguments.get("confirm").and_then(Value::as_bool) != Some(true)
        {
            return self.failure(GatewayError::ConfirmationRequired, Some(rate), false);
        }

        // Invoke on a spawned task: a handler panic surfaces as a join
        // error and maps to InternalError instead of tearing down the
        // connection task.
        let store = self.store.clone();
        let op_name = operation.name;
        let joined =
            tokio::spawn(async move { invoke_operation(store.as_ref(), op_name, arguments).await })
                .await;
        let result = match joined {
            Ok(result) => result,
            Err(join_err) => Err(GatewayError::internal(anyhow::anyhow!(
                "handler for '{op_name}' panicked: {join_err}"
            ))),
        };

        match result {
            Ok(data) => {
                metrics::record_dispatch("success");
                DispatchReply {
                    status: StatusCode::OK,
                    envelope: Envelope::success(data),
                    rate: Some(rate),
                    www_authenticate: false,
                }
            }
            Err(err) => self.failure(err, Some(rate), false),
        }
    }

    /// List the operations visible to the caller. Same gating as
    /// invocation through the identity rate check, then a pure filter.
    pub async fn dispatch_list(&self, source: IpAddr, auth_header: Option<&str>) -> DispatchReply {
        let (auth, rate) = match self.front_checks(source, auth_header).await {
            Ok(auth) => auth,
            Err(reply) => return reply,
        };

        let operations = catalog::visible_for(&auth.capabilities);
        metrics::record_dispatch("success");
        DispatchReply {
            status: StatusCode::OK,
            envelope: Envelope::success(json!({
                "operations": operations,
                "capabilities": auth.capabilities,
            })),
            rate: Some(rate),
            www_authenticate: false,
        }
    }

    /// Steps 2-5: source window, lockout probe, authentication, identity
    /// window. Returns the authenticated caller and the identity-window
    /// decision to be attached to whatever response follows.
    async fn front_checks(
        &self,
        source: IpAddr,
        auth_header: Option<&str>,
    ) -> Result<(AuthSuccess, RateLimitDecision), DispatchReply> {
        let source_id = source_key(source);
        let source_rate =
            self.limiter
                .check(&source_id, self.limits.source_max, self.limits.window_secs);
        if !source_rate.allowed {
            audit::rate_limited(source, &source_id);
            metrics::record_rate_limited("source");
            return Err(self.failure(GatewayError::RateLimited, None, false));
        }

        // Peek only: probing for lockout must not extend the lockout.
        if self.guard.locked_out(source) {
            audit::lockout(source);
            metrics::record_rate_limited("failed_auth");
            return Err(self.failure(GatewayError::TooManyFailedAttempts, None, false));
        }

        let auth = match self.authenticator.authenticate(auth_header, source).await {
            Ok(auth) => auth,
            Err(_kind) => {
                // Every failure counts toward lockout, even once locked.
                self.guard.record_failure(source);
                return Err(self.failure(GatewayError::Unauthorized, None, true));
            }
        };

        let identity_id = identity_key(&auth.identity.username);
        let rate = self.limiter.check(
            &identity_id,
            self.limits.identity_max,
            self.limits.window_secs,
        );
        if !rate.allowed {
            audit::rate_limited(source, &identity_id);
            metrics::record_rate_limited("identity");
            return Err(self.failure(GatewayError::RateLimited, Some(rate), false));
        }

        Ok((auth, rate))
    }

    fn failure(
        &self,
        err: GatewayError,
        rate: Option<RateLimitDecision>,
        www_authenticate: bool,
    ) -> DispatchReply {
        metrics::record_dispatch(err.code());
        DispatchReply {
            status: err.http_status(),
            envelope: err.envelope(self.debug),
            rate,
            www_authenticate,
        }
    }

    /// Envelope for a transport-level method rejection (step 1).
    pub fn method_not_allowed(&self) -> DispatchReply {
        self.failure(GatewayError::MethodNotAllowed, None, false)
    }
}

/// Decode the arguments against the operation's input shape and delegate
/// to the matching handler. Decoding failures surface as `ValidationError`
/// before the handler runs.
async fn invoke_operation(
    store: &dyn ContentStore,
    name: &str,
    arguments: Value,
) -> Result<Value, GatewayError> {
    fn decode<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T, GatewayError> {
        serde_json::from_value(arguments).map_err(|err| GatewayError::Validation(err.to_string()))
    }

    let result = match name {
        "list_posts" => store.list_posts(decode(arguments)?).await,
        "get_post" => store.get_post(decode(arguments)?).await,
        "create_post" => store.create_post(decode(arguments)?).await,
        "update_post" => store.update_post(decode(arguments)?).await,
        "delete_post" => store.delete_post(decode(arguments)?).await,
        "create_translation" => store.create_translation(decode(arguments)?).await,
        "upload_media" => store.upload_media(decode(arguments)?).await,
        "delete_media" => store.delete_media(decode(arguments)?).await,
        "list_tags" => store.list_tags(decode(arguments)?).await,
        other => {
            return Err(GatewayError::UnknownOperation {
                name: other.to_string(),
            })
        }
    };
    result.map_err(GatewayError::from)
}
