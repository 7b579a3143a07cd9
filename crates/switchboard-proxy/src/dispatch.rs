//! Per-request orchestration
//!
//! fingerprint → dedup join-or-lead → candidate iteration → upstream call →
//! classification → broadcast. The leader's attempt loop runs as a detached
//! task writing into the broadcaster; every client (the leader's included)
//! consumes through a subscription, so duplicates and the original are
//! indistinguishable on the way out.
//!
//! Failover is pre-commit only: once a stream chunk has been published,
//! a later failure closes the broadcaster instead of trying anywhere else.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use secrecy::ExposeSecret;
use switchboard_config::{AuthType, ProviderType, StreamingMode, TestingSettings};
use switchboard_core::{HttpError, InboundCredential, RequestContext};

use crate::broadcast::{Broadcaster, ResponseHead, Subscription, Terminal};
use crate::classify::Outcome;
use crate::convert;
use crate::dedup::JoinOutcome;
use crate::error::ProxyError;
use crate::fingerprint::fingerprint;
use crate::protocol::anthropic::MessagesRequest;
use crate::routes::Candidate;
use crate::state::{ProxyState, Snapshot};
use crate::upstream::anthropic::SseErrorScanner;
use crate::upstream::openai::ChatFetch;
use crate::upstream::{AuthHeader, BearerKind, BufferedResponse, StreamOpen, anthropic, openai};

/// What one request hands back to the HTTP layer
pub enum ClientResponse {
    /// Complete response body
    Buffered {
        /// HTTP status to send
        status: u16,
        /// Body content type
        content_type: String,
        /// The body
        body: Bytes,
    },
    /// Live SSE relay
    Stream {
        /// HTTP status to send (errors past this point ride in the stream)
        status: u16,
        /// Body content type
        content_type: String,
        /// Chunk stream; terminal errors are already rendered as SSE frames
        body: BoxStream<'static, Result<Bytes, Infallible>>,
    },
}

/// Result of one candidate attempt
enum AttemptOutcome {
    /// The broadcaster has been finalized one way or another
    Finished,
    /// Health-counting failure; the loop moves to the next candidate
    Retry { reason: String, status: Option<u16> },
    /// Non-counting skip (credential unavailable)
    Skip { error: ProxyError },
}

impl ProxyState {
    /// Dispatch one inbound `/v1/messages` request
    pub async fn handle_messages(
        &self,
        request: MessagesRequest,
        ctx: RequestContext,
    ) -> Result<ClientResponse, ProxyError> {
        let snapshot = self.snapshot();
        let settings = &snapshot.config.settings;

        if let Some(testing) = &settings.testing {
            simulate_delay(testing, &request).await;
        }

        let dedup_settings = settings.deduplication;
        let wait_budget = settings.timeouts.caching.deduplication();
        let wants_stream = request.wants_stream();
        let key = fingerprint(&request, dedup_settings.include_max_tokens_in_signature);

        let (subscription, lead) = if dedup_settings.enabled {
            match self.dedup().join_or_lead(&key) {
                JoinOutcome::Follower(broadcaster) => {
                    tracing::info!(
                        fingerprint = %key,
                        waiters = broadcaster.subscriber_count(),
                        "joined in-flight identical request"
                    );
                    (broadcaster.subscribe(), None)
                }
                JoinOutcome::Leader(broadcaster) => (broadcaster.subscribe(), Some(broadcaster)),
            }
        } else {
            let broadcaster = Broadcaster::new();
            (broadcaster.subscribe(), Some(broadcaster))
        };

        if let Some(broadcaster) = lead {
            let state = self.clone();
            let snapshot = Arc::clone(&snapshot);
            let retention = Duration::from_secs(dedup_settings.sse_error_cleanup_delay);
            let dedup_installed = dedup_settings.enabled;
            let key = key.clone();

            tokio::spawn(async move {
                state.run_attempts(&snapshot, request, ctx, &broadcaster).await;
                if dedup_installed {
                    state.dedup().finish(&key, wants_stream, retention);
                }
            });
        }

        consume(subscription, wait_budget).await
    }

    /// Leader task body: run the attempt loop, bounded by cancellation
    async fn run_attempts(
        &self,
        snapshot: &Arc<Snapshot>,
        request: MessagesRequest,
        ctx: RequestContext,
        broadcaster: &Arc<Broadcaster>,
    ) {
        let cancel = broadcaster.cancellation();

        let result = tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!("all subscribers gone, abandoning upstream work");
                Err(ProxyError::Cancelled)
            }
            result = self.attempt_loop(snapshot, &request, &ctx, broadcaster) => result,
        };

        if let Err(error) = result {
            broadcaster.close_error(error);
        }
    }

    /// Iterate candidates until one finalizes the broadcaster
    async fn attempt_loop(
        &self,
        snapshot: &Arc<Snapshot>,
        request: &MessagesRequest,
        ctx: &RequestContext,
        broadcaster: &Arc<Broadcaster>,
    ) -> Result<(), ProxyError> {
        let settings = &snapshot.config.settings;
        let candidates = snapshot.routes.resolve(
            &request.model,
            settings.selection_strategy,
            &snapshot.registry,
            self.health(),
            &snapshot.policy,
        )?;

        let mut last_failure: Option<ProxyError> = None;
        let mut last_status: Option<u16> = None;

        for candidate in candidates {
            let identity = candidate.provider.identity.clone();

            match self.attempt_candidate(snapshot, &candidate, request, ctx, broadcaster).await {
                AttemptOutcome::Finished => return Ok(()),
                AttemptOutcome::Retry { reason, status } => {
                    self.health().record_failure(&identity, &snapshot.policy);
                    tracing::warn!(provider = %identity, reason, "candidate failed, advancing to next");
                    last_status = status;
                    last_failure = Some(ProxyError::Upstream(reason));
                }
                AttemptOutcome::Skip { error } => {
                    tracing::warn!(provider = %identity, error = %error, "candidate skipped (no health penalty)");
                    last_failure = Some(error);
                }
            }
        }

        match last_failure {
            Some(error @ ProxyError::AuthRequired { .. }) => Err(error),
            Some(ProxyError::Upstream(last)) => Err(ProxyError::AllProvidersFailed {
                last,
                status: ProxyError::exhaustion_status(last_status),
            }),
            Some(other) => Err(other),
            // resolve() never returns an empty list, but don't trust that here
            None => Err(ProxyError::NoRoute {
                model: request.model.clone(),
            }),
        }
    }

    /// Try one candidate end to end
    async fn attempt_candidate(
        &self,
        snapshot: &Arc<Snapshot>,
        candidate: &Candidate,
        request: &MessagesRequest,
        ctx: &RequestContext,
        broadcaster: &Arc<Broadcaster>,
    ) -> AttemptOutcome {
        let (auth, bearer_kind) = match self.resolve_credential(candidate, ctx).await {
            Ok(pair) => pair,
            Err(error) => return AttemptOutcome::Skip { error },
        };

        let mut upstream_request = request.clone();
        upstream_request.model.clone_from(&candidate.upstream_model);

        let wants_stream = request.wants_stream();

        match candidate.provider.config.provider_type {
            ProviderType::Anthropic if !wants_stream => {
                upstream_request.stream = None;
                self.attempt_anthropic_buffered(snapshot, candidate, &upstream_request, &auth, bearer_kind, ctx, broadcaster)
                    .await
            }
            ProviderType::Anthropic => {
                upstream_request.stream = Some(true);
                let direct = !matches!(snapshot.config.settings.streaming_mode, StreamingMode::Background);
                if direct {
                    self.attempt_anthropic_direct(snapshot, candidate, &upstream_request, &auth, bearer_kind, ctx, broadcaster)
                        .await
                } else {
                    self.attempt_anthropic_background(snapshot, candidate, &upstream_request, &auth, bearer_kind, ctx, broadcaster)
                        .await
                }
            }
            ProviderType::Openai => {
                self.attempt_openai(snapshot, candidate, &upstream_request, &auth, bearer_kind, wants_stream, broadcaster)
                    .await
            }
        }
    }

    /// Buffered call to an Anthropic-typed provider
    async fn attempt_anthropic_buffered(
        &self,
        snapshot: &Arc<Snapshot>,
        candidate: &Candidate,
        upstream_request: &MessagesRequest,
        auth: &AuthHeader,
        bearer_kind: BearerKind,
        ctx: &RequestContext,
        broadcaster: &Arc<Broadcaster>,
    ) -> AttemptOutcome {
        let provider = &candidate.provider;
        let response = anthropic::fetch_buffered(provider, upstream_request, auth, bearer_kind, ctx.anthropic_version.as_deref())
            .await;

        match response {
            Err(transport) => transport_outcome(snapshot, broadcaster, transport),
            Ok(response) => match snapshot.rules.classify_response(response.status, &response.body) {
                Outcome::Success => {
                    self.health().record_success(&provider.identity, &snapshot.policy);
                    publish_buffered(broadcaster, response);
                    AttemptOutcome::Finished
                }
                Outcome::Retryable { reason, status } => AttemptOutcome::Retry { reason, status },
                Outcome::NonRetryable { .. } => {
                    // Client error: passed through verbatim, no health penalty
                    publish_buffered(broadcaster, response);
                    AttemptOutcome::Finished
                }
            },
        }
    }

    /// Direct-mode stream from an Anthropic-typed provider
    ///
    /// Bytes are piped through unmodified. The first published chunk is the
    /// commit point; everything after it is post-commit and closes the
    /// broadcaster on failure instead of failing over.
    async fn attempt_anthropic_direct(
        &self,
        snapshot: &Arc<Snapshot>,
        candidate: &Candidate,
        upstream_request: &MessagesRequest,
        auth: &AuthHeader,
        bearer_kind: BearerKind,
        ctx: &RequestContext,
        broadcaster: &Arc<Broadcaster>,
    ) -> AttemptOutcome {
        let provider = &candidate.provider;
        let opened = anthropic::open_stream(provider, upstream_request, auth, bearer_kind, ctx.anthropic_version.as_deref())
            .await;

        let (status, content_type, mut bytes) = match opened {
            Err(transport) => return transport_outcome(snapshot, broadcaster, transport),
            Ok(StreamOpen::Http(response)) => {
                return self.classify_buffered(snapshot, candidate, response, broadcaster);
            }
            Ok(StreamOpen::Stream {
                status,
                content_type,
                bytes,
            }) => (status, content_type, bytes),
        };

        // Nothing is committed until the first chunk arrives
        let first = match bytes.next().await {
            None => {
                self.health().record_success(&provider.identity, &snapshot.policy);
                broadcaster.set_head(ResponseHead { status, content_type });
                broadcaster.close_ok();
                return AttemptOutcome::Finished;
            }
            Some(Err(e)) => return transport_outcome(snapshot, broadcaster, format!("stream failed before first chunk: {e}")),
            Some(Ok(chunk)) => chunk,
        };

        self.health().record_success(&provider.identity, &snapshot.policy);
        broadcaster.set_head(ResponseHead { status, content_type });

        let mut scanner = SseErrorScanner::default();
        scanner.scan(&first);
        broadcaster.publish(first);

        loop {
            match bytes.next().await {
                Some(Ok(chunk)) => {
                    scanner.scan(&chunk);
                    broadcaster.publish(chunk);
                }
                Some(Err(e)) => {
                    // Post-commit: surfaced to the client, counted, never retried
                    self.health().record_failure(&provider.identity, &snapshot.policy);
                    broadcaster.close_error(ProxyError::Streaming(format!("upstream connection lost: {e}")));
                    return AttemptOutcome::Finished;
                }
                None => break,
            }
        }

        if scanner.saw_error() {
            self.health().record_failure(&provider.identity, &snapshot.policy);
            broadcaster.close_error(ProxyError::Streaming("upstream emitted an error event".to_owned()));
        } else {
            broadcaster.close_ok();
        }
        AttemptOutcome::Finished
    }

    /// Background-mode stream from an Anthropic-typed provider
    ///
    /// The whole stream is buffered and classified before anything is
    /// published, so a mid-stream failure here can still fail over.
    async fn attempt_anthropic_background(
        &self,
        snapshot: &Arc<Snapshot>,
        candidate: &Candidate,
        upstream_request: &MessagesRequest,
        auth: &AuthHeader,
        bearer_kind: BearerKind,
        ctx: &RequestContext,
        broadcaster: &Arc<Broadcaster>,
    ) -> AttemptOutcome {
        let provider = &candidate.provider;
        let opened = anthropic::open_stream(provider, upstream_request, auth, bearer_kind, ctx.anthropic_version.as_deref())
            .await;

        let (status, content_type, mut bytes) = match opened {
            Err(transport) => return transport_outcome(snapshot, broadcaster, transport),
            Ok(StreamOpen::Http(response)) => {
                return self.classify_buffered(snapshot, candidate, response, broadcaster);
            }
            Ok(StreamOpen::Stream {
                status,
                content_type,
                bytes,
            }) => (status, content_type, bytes),
        };

        let mut scanner = SseErrorScanner::default();
        let mut buffered: Vec<Bytes> = Vec::new();

        while let Some(item) = bytes.next().await {
            match item {
                Ok(chunk) => {
                    scanner.scan(&chunk);
                    buffered.push(chunk);
                }
                Err(e) => {
                    return AttemptOutcome::Retry {
                        reason: format!("stream broke while buffering: {e}"),
                        status: None,
                    };
                }
            }
        }

        if scanner.saw_error() {
            return AttemptOutcome::Retry {
                reason: "upstream emitted an error event mid-stream".to_owned(),
                status: None,
            };
        }

        let mut whole = BytesMut::new();
        for chunk in &buffered {
            whole.extend_from_slice(chunk);
        }

        match snapshot.rules.classify_response(status, &whole) {
            Outcome::Retryable { reason, status } => AttemptOutcome::Retry { reason, status },
            Outcome::Success | Outcome::NonRetryable { .. } => {
                self.health().record_success(&provider.identity, &snapshot.policy);
                broadcaster.set_head(ResponseHead { status, content_type });
                for chunk in buffered {
                    broadcaster.publish(chunk);
                }
                broadcaster.close_ok();
                AttemptOutcome::Finished
            }
        }
    }

    /// Call to an OpenAI-typed provider (always buffered before publishing)
    async fn attempt_openai(
        &self,
        snapshot: &Arc<Snapshot>,
        candidate: &Candidate,
        upstream_request: &MessagesRequest,
        auth: &AuthHeader,
        bearer_kind: BearerKind,
        wants_stream: bool,
        broadcaster: &Arc<Broadcaster>,
    ) -> AttemptOutcome {
        let provider = &candidate.provider;
        let chat = convert::messages_to_chat(upstream_request, &candidate.upstream_model, wants_stream);

        let fetched = openai::fetch_chat(provider, &chat, auth, bearer_kind, wants_stream).await;

        let chat_response = match fetched {
            Err(transport) => return transport_outcome(snapshot, broadcaster, transport),
            Ok(ChatFetch::Raw(response)) => {
                match snapshot.rules.classify_response(response.status, &response.body) {
                    Outcome::Retryable { reason, status } => {
                        return AttemptOutcome::Retry { reason, status };
                    }
                    Outcome::NonRetryable { .. } => {
                        publish_buffered(broadcaster, response);
                        return AttemptOutcome::Finished;
                    }
                    Outcome::Success => match serde_json::from_slice(&response.body) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            return AttemptOutcome::Retry {
                                reason: format!("unparseable 2xx response: {e}"),
                                status: Some(response.status),
                            };
                        }
                    },
                }
            }
            Ok(ChatFetch::Aggregated(response)) => response,
        };

        let translated = convert::chat_to_messages(&chat_response, &candidate.upstream_model);
        self.health().record_success(&provider.identity, &snapshot.policy);

        if wants_stream {
            broadcaster.set_head(ResponseHead {
                status: 200,
                content_type: "text/event-stream".to_owned(),
            });
            for frame in convert::synthesize_sse(&translated) {
                broadcaster.publish(frame);
            }
            broadcaster.close_ok();
        } else {
            match serde_json::to_vec(&translated) {
                Ok(body) => {
                    broadcaster.set_head(ResponseHead {
                        status: 200,
                        content_type: "application/json".to_owned(),
                    });
                    broadcaster.publish(Bytes::from(body));
                    broadcaster.close_ok();
                }
                Err(e) => {
                    broadcaster.close_error(ProxyError::Internal(format!("serializing translated response: {e}")));
                }
            }
        }
        AttemptOutcome::Finished
    }

    /// Shared classification for fully buffered upstream responses
    fn classify_buffered(
        &self,
        snapshot: &Arc<Snapshot>,
        candidate: &Candidate,
        response: BufferedResponse,
        broadcaster: &Arc<Broadcaster>,
    ) -> AttemptOutcome {
        match snapshot.rules.classify_response(response.status, &response.body) {
            Outcome::Retryable { reason, status } => AttemptOutcome::Retry { reason, status },
            Outcome::Success => {
                self.health().record_success(&candidate.provider.identity, &snapshot.policy);
                publish_buffered(broadcaster, response);
                AttemptOutcome::Finished
            }
            Outcome::NonRetryable { .. } => {
                publish_buffered(broadcaster, response);
                AttemptOutcome::Finished
            }
        }
    }

    /// Resolve the outbound credential for a candidate
    async fn resolve_credential(
        &self,
        candidate: &Candidate,
        ctx: &RequestContext,
    ) -> Result<(AuthHeader, BearerKind), ProxyError> {
        let config = &candidate.provider.config;

        if config.forwards_client_credential() {
            return match &ctx.credential {
                Some(InboundCredential::ApiKey(key)) => {
                    Ok((AuthHeader::ApiKey(key.expose_secret().to_owned()), BearerKind::Static))
                }
                Some(InboundCredential::Authorization(value)) => {
                    Ok((AuthHeader::Raw(value.expose_secret().to_owned()), BearerKind::Static))
                }
                None => Err(ProxyError::InvalidRequest(
                    "provider forwards the client credential, but the request carried none".to_owned(),
                )),
            };
        }

        match config.auth_type {
            AuthType::ApiKey => literal_value(config).map(|v| (AuthHeader::ApiKey(v), BearerKind::Static)),
            AuthType::AuthToken => literal_value(config).map(|v| (AuthHeader::Bearer(v), BearerKind::Static)),
            AuthType::Oauth => {
                let account = config
                    .account_email
                    .clone()
                    .or_else(|| self.oauth().select_account());

                let Some(account) = account else {
                    tracing::warn!(
                        provider = %candidate.provider.identity,
                        "no oauth account available; authorize one via GET /oauth/generate-url"
                    );
                    return Err(ProxyError::AuthRequired {
                        account: "<no account authorized>".to_owned(),
                    });
                };

                match self.oauth().access_token(&account).await {
                    Ok(token) => Ok((AuthHeader::Bearer(token), BearerKind::Oauth)),
                    Err(e) => {
                        tracing::warn!(
                            account,
                            error = %e,
                            "no usable oauth token; run GET /oauth/generate-url then POST /oauth/exchange-code for this account"
                        );
                        Err(ProxyError::AuthRequired { account })
                    }
                }
            }
        }
    }
}

fn literal_value(config: &switchboard_config::ProviderConfig) -> Result<String, ProxyError> {
    config
        .auth_value
        .as_ref()
        .map(|v| v.expose_secret().to_owned())
        .ok_or_else(|| ProxyError::Internal(format!("provider '{}' has no auth_value", config.name)))
}

/// Classify a transport failure: retryable, or published as terminal
fn transport_outcome(snapshot: &Arc<Snapshot>, broadcaster: &Arc<Broadcaster>, message: String) -> AttemptOutcome {
    match snapshot.rules.classify_transport(&message) {
        Outcome::Retryable { reason, status } => AttemptOutcome::Retry { reason, status },
        _ => {
            broadcaster.close_error(ProxyError::Upstream(message));
            AttemptOutcome::Finished
        }
    }
}

/// Replicate a fully buffered upstream response to all subscribers
fn publish_buffered(broadcaster: &Arc<Broadcaster>, response: BufferedResponse) {
    broadcaster.set_head(ResponseHead {
        status: response.status,
        content_type: response.content_type,
    });
    broadcaster.publish(response.body);
    broadcaster.close_ok();
}

/// Honor the configured test-only delay injection
async fn simulate_delay(testing: &TestingSettings, request: &MessagesRequest) {
    if !testing.simulate_delay {
        return;
    }

    let triggered = testing.delay_trigger_keywords.is_empty() || {
        let content = request.text_content();
        testing.delay_trigger_keywords.iter().any(|k| content.contains(k))
    };

    if triggered {
        tracing::debug!(seconds = testing.delay_seconds, "injecting configured delay");
        tokio::time::sleep(Duration::from_secs(testing.delay_seconds)).await;
    }
}

/// Consume a subscription into a client response
async fn consume(mut subscription: Subscription, wait_budget: Duration) -> Result<ClientResponse, ProxyError> {
    let broadcaster = Arc::clone(subscription.broadcaster());

    tokio::time::timeout(wait_budget, broadcaster.ready())
        .await
        .map_err(|_| ProxyError::DeduplicationTimeout)?;

    // Terminal error with nothing on the wire: a plain error response
    if let Some(Terminal::Error(error)) = broadcaster.terminal()
        && !broadcaster.has_published()
    {
        return Err(error);
    }

    let head = broadcaster
        .head()
        .cloned()
        .ok_or_else(|| ProxyError::Internal("broadcaster closed without a response head".to_owned()))?;

    if head.is_event_stream() {
        let body = futures_util::stream::unfold(Some(subscription), move |state| async move {
            let mut subscription = state?;
            match tokio::time::timeout(wait_budget, subscription.next_chunk()).await {
                Err(_) => Some((error_frame(&ProxyError::DeduplicationTimeout), None)),
                Ok(None) => None,
                Ok(Some(Ok(chunk))) => Some((chunk, Some(subscription))),
                Ok(Some(Err(error))) => Some((error_frame(&error), None)),
            }
        })
        .map(Ok::<_, Infallible>)
        .boxed();

        Ok(ClientResponse::Stream {
            status: head.status,
            content_type: head.content_type,
            body,
        })
    } else {
        let mut body = BytesMut::new();
        loop {
            match tokio::time::timeout(wait_budget, subscription.next_chunk()).await {
                Err(_) => return Err(ProxyError::DeduplicationTimeout),
                Ok(None) => break,
                Ok(Some(Ok(chunk))) => body.extend_from_slice(&chunk),
                Ok(Some(Err(error))) => return Err(error),
            }
        }

        Ok(ClientResponse::Buffered {
            status: head.status,
            content_type: head.content_type,
            body: body.freeze(),
        })
    }
}

/// Render an error as a terminal SSE frame
fn error_frame(error: &ProxyError) -> Bytes {
    let data = serde_json::json!({
        "type": "error",
        "error": {
            "type": error.error_type(),
            "message": error.client_message(),
        }
    });
    Bytes::from(format!("event: error\ndata: {data}\n\n"))
}
