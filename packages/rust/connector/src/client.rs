//! HTTP client for the Knowledge Engine Smart Connector REST API.
//!
//! Requests are scoped with the custom `Knowledge-Base-Id` and
//! `Knowledge-Interaction-Id` headers rather than path parameters.
//! Status codes carry protocol meaning on the handle route: 200 = work
//! ready, 202 = heartbeat, 410 = connector gone, anything else = error.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use kenect_shared::{
    AppConfig, BindingSet, HandleRequest, InteractionId, KenectError, KnowledgeBaseId,
    KnowledgeInteraction, Result, SmartConnector,
};

use crate::cancel::CancellationToken;

/// User-Agent string for engine requests.
const USER_AGENT: &str = concat!("kenect/", env!("CARGO_PKG_VERSION"));

/// Header carrying the knowledge base URI.
const HEADER_KB_ID: &str = "Knowledge-Base-Id";

/// Header carrying the knowledge interaction identifier.
const HEADER_KI_ID: &str = "Knowledge-Interaction-Id";

/// Default wait before repolling after an unexpected status.
const DEFAULT_POLL_BACKOFF: Duration = Duration::from_secs(2);

/// Default timeout for non-polling requests.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Raw outcome of a connector registration.
///
/// Registration reports a rejection instead of raising it: the engine's
/// status and body are handed back for the caller to inspect, and only
/// transport failures become errors.
#[derive(Debug, Clone)]
pub struct EngineResponse {
    /// HTTP status the engine answered with.
    pub status: StatusCode,
    /// Raw response body.
    pub body: String,
}

impl EngineResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Parsed answer to an ASK interaction.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskResult {
    /// Bindings the engine computed for the query pattern.
    pub binding_set: BindingSet,
    /// Per-exchange metadata the engine attaches, if any.
    #[serde(default)]
    pub exchange_info: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterInteractionResponse {
    knowledge_interaction_id: InteractionId,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Caller-supplied computation for one ANSWER/REACT interaction: takes
/// the pending bindings, returns the result bindings.
pub type Handler = Box<dyn FnMut(&BindingSet) -> Result<BindingSet> + Send>;

/// Handlers keyed by the interaction they serve, for loops that answer
/// several interactions over one connector.
pub type HandlerMap = HashMap<InteractionId, Handler>;

// ---------------------------------------------------------------------------
// EngineClient
// ---------------------------------------------------------------------------

/// Client for one Knowledge Base's smart connector.
pub struct EngineClient {
    base_url: Url,
    kb_id: KnowledgeBaseId,
    client: Client,
    request_timeout: Duration,
    poll_backoff: Duration,
}

impl EngineClient {
    /// Create a client for the engine at `base_url`, acting as `kb_id`.
    pub fn new(base_url: Url, kb_id: KnowledgeBaseId) -> Result<Self> {
        // No client-wide timeout: the handle long poll must be able to
        // block until the engine has work. Non-polling requests set a
        // per-request timeout instead.
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| KenectError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            kb_id,
            client,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll_backoff: DEFAULT_POLL_BACKOFF,
        })
    }

    /// Create a client from loaded configuration.
    pub fn from_config(config: &AppConfig, kb_id: KnowledgeBaseId) -> Result<Self> {
        let base_url = Url::parse(&config.engine.url)
            .map_err(|e| KenectError::config(format!("invalid engine url: {e}")))?;

        Ok(Self::new(base_url, kb_id)?
            .with_request_timeout(Duration::from_secs(config.engine.request_timeout_secs))
            .with_poll_backoff(Duration::from_secs(config.engine.poll_backoff_secs)))
    }

    /// Override the timeout applied to non-polling requests.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the wait before repolling after an unexpected status.
    pub fn with_poll_backoff(mut self, backoff: Duration) -> Self {
        self.poll_backoff = backoff;
        self
    }

    pub fn knowledge_base_id(&self) -> &KnowledgeBaseId {
        &self.kb_id
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    // -----------------------------------------------------------------------
    // Connector registration
    // -----------------------------------------------------------------------

    /// Register a smart connector for the given descriptor.
    ///
    /// A non-success status is logged and returned in the
    /// [`EngineResponse`]; the caller decides whether it is fatal.
    #[instrument(skip_all, fields(kb = %connector.knowledge_base_id))]
    pub async fn register(&self, connector: &SmartConnector) -> Result<EngineResponse> {
        let response = self
            .client
            .post(self.endpoint("sc"))
            .timeout(self.request_timeout)
            .header(HEADER_KB_ID, connector.knowledge_base_id.as_str())
            .json(connector)
            .send()
            .await
            .map_err(|e| KenectError::Network(format!("connector registration failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| KenectError::Network(format!("failed to read response body: {e}")))?;

        if status.is_success() {
            info!(%status, "smart connector registered");
            debug!(body = %body);
        } else {
            error!(%status, body = %body, "smart connector registration rejected");
        }

        Ok(EngineResponse { status, body })
    }

    // -----------------------------------------------------------------------
    // Interaction registration
    // -----------------------------------------------------------------------

    /// Register a knowledge interaction and return its assigned identifier.
    ///
    /// The interaction is validated before any network call; a type or
    /// pattern-shape mismatch fails with an invalid-argument error.
    #[instrument(skip_all, fields(kb = %self.kb_id, name = %interaction.name, ty = %interaction.ty))]
    pub async fn register_interaction(
        &self,
        interaction: &KnowledgeInteraction,
    ) -> Result<InteractionId> {
        interaction.validate()?;

        let payload = interaction_payload(interaction);
        let response = self
            .client
            .post(self.endpoint("sc/ki"))
            .timeout(self.request_timeout)
            .header(HEADER_KB_ID, self.kb_id.as_str())
            .json(&payload)
            .send()
            .await
            .map_err(|e| KenectError::Network(format!("interaction registration failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| KenectError::Network(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(KenectError::Network(format!(
                "interaction registration rejected: HTTP {status}: {body}"
            )));
        }

        let parsed: RegisterInteractionResponse = serde_json::from_str(&body).map_err(|e| {
            KenectError::protocol(format!("malformed registration response: {e}"))
        })?;

        info!(id = %parsed.knowledge_interaction_id, "knowledge interaction registered");
        Ok(parsed.knowledge_interaction_id)
    }

    // -----------------------------------------------------------------------
    // ASK
    // -----------------------------------------------------------------------

    /// Post an ASK query and return the bindings the engine computed.
    ///
    /// Unbound variables are signaled with empty binding maps.
    #[instrument(skip_all, fields(kb = %self.kb_id, ki = %interaction_id))]
    pub async fn ask(
        &self,
        interaction_id: &InteractionId,
        bindings: &BindingSet,
    ) -> Result<AskResult> {
        let response = self
            .client
            .post(self.endpoint("sc/ask"))
            .timeout(self.request_timeout)
            .header(HEADER_KB_ID, self.kb_id.as_str())
            .header(HEADER_KI_ID, interaction_id.as_str())
            .json(bindings)
            .send()
            .await
            .map_err(|e| KenectError::Network(format!("ask failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| KenectError::Network(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(KenectError::Network(format!(
                "ask rejected: HTTP {status}: {body}"
            )));
        }

        let result: AskResult = serde_json::from_str(&body)
            .map_err(|e| KenectError::protocol(format!("malformed ask response: {e}")))?;

        debug!(bindings = result.binding_set.len(), "ask answered");
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Handle loop
    // -----------------------------------------------------------------------

    /// Long-poll for handle requests and answer them with the handlers
    /// in `handlers`, keyed by interaction identifier.
    ///
    /// Requests are processed strictly one at a time in receipt order;
    /// no second poll is issued while a handler or its response post is
    /// outstanding. The loop ends with `Ok(())` when the engine answers
    /// 410 (connector gone) or when `cancel` is cancelled. A malformed
    /// handle request, a missing handler, or a handler error ends it
    /// with `Err`.
    #[instrument(skip_all, fields(kb = %self.kb_id))]
    pub async fn handle_loop(
        &self,
        handlers: &mut HandlerMap,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            // Long poll; intentionally no request timeout.
            let poll = self
                .client
                .get(self.endpoint("sc/handle"))
                .header(HEADER_KB_ID, self.kb_id.as_str())
                .send();

            let response = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = poll => match outcome {
                    Ok(response) => response,
                    Err(e) => {
                        warn!(error = %e, "handle poll failed, repolling after backoff");
                        self.backoff(cancel).await;
                        continue;
                    }
                },
            };

            match response.status() {
                StatusCode::OK => {
                    self.answer_handle_request(response, handlers, cancel)
                        .await?;
                }
                StatusCode::ACCEPTED => {
                    // Heartbeat: no work yet, repoll immediately.
                    debug!("heartbeat, repolling");
                }
                StatusCode::GONE => {
                    info!("engine reports connector gone, stopping handle loop");
                    break;
                }
                status => {
                    let body = response.text().await.unwrap_or_default();
                    warn!(%status, body = %body, "unexpected handle poll status, repolling after backoff");
                    self.backoff(cancel).await;
                }
            }
        }

        info!("exiting handle loop");
        Ok(())
    }

    /// Long-poll for handle requests targeting one ANSWER/REACT
    /// interaction and answer them with `handler`.
    pub async fn answer_loop<F>(
        &self,
        interaction_id: &InteractionId,
        handler: F,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        F: FnMut(&BindingSet) -> Result<BindingSet> + Send + 'static,
    {
        let mut handlers: HandlerMap = HashMap::new();
        handlers.insert(interaction_id.clone(), Box::new(handler));
        self.handle_loop(&mut handlers, cancel).await
    }

    /// Decode one handle request, run its handler, and post the result
    /// back tagged with the same handle request id.
    async fn answer_handle_request(
        &self,
        response: reqwest::Response,
        handlers: &mut HandlerMap,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let body = response
            .text()
            .await
            .map_err(|e| KenectError::protocol(format!("failed to read handle request: {e}")))?;
        let request: HandleRequest = serde_json::from_str(&body)
            .map_err(|e| KenectError::protocol(format!("malformed handle request: {e}")))?;

        debug!(
            handle_request_id = request.handle_request_id,
            ki = %request.knowledge_interaction_id,
            bindings = request.binding_set.len(),
            "handle request received"
        );

        let handler = handlers
            .get_mut(&request.knowledge_interaction_id)
            .ok_or_else(|| {
                KenectError::protocol(format!(
                    "no handler registered for interaction {}",
                    request.knowledge_interaction_id
                ))
            })?;

        let result_bindings = handler(&request.binding_set)?;

        let answer = serde_json::json!({
            "handleRequestId": request.handle_request_id,
            "bindingSet": result_bindings,
        });

        let post = self
            .client
            .post(self.endpoint("sc/handle"))
            .timeout(self.request_timeout)
            .header(HEADER_KB_ID, self.kb_id.as_str())
            .header(HEADER_KI_ID, request.knowledge_interaction_id.as_str())
            .json(&answer)
            .send();

        let posted = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            outcome = post => outcome,
        };

        match posted {
            Ok(response) if response.status().is_success() => {
                debug!(
                    handle_request_id = request.handle_request_id,
                    "handle response accepted"
                );
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                warn!(%status, body = %body, "handle response rejected, repolling after backoff");
                self.backoff(cancel).await;
            }
            Err(e) => {
                warn!(error = %e, "handle response post failed, repolling after backoff");
                self.backoff(cancel).await;
            }
        }

        Ok(())
    }

    /// Sleep the configured backoff, waking early on cancellation.
    async fn backoff(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {},
            _ = tokio::time::sleep(self.poll_backoff) => {},
        }
    }
}

/// Build the type-specific registration payload for `/sc/ki`.
fn interaction_payload(interaction: &KnowledgeInteraction) -> serde_json::Value {
    let mut payload = serde_json::json!({
        "knowledgeInteractionName": interaction.name,
        "knowledgeInteractionType": interaction.ty.wire_name(),
        "prefixes": interaction.prefixes,
    });

    let fields = payload.as_object_mut().expect("payload is an object");
    if let Some(pattern) = &interaction.graph_pattern {
        fields.insert("graphPattern".into(), serde_json::json!(pattern));
    }
    if let Some(pattern) = &interaction.argument_pattern {
        fields.insert("argumentGraphPattern".into(), serde_json::json!(pattern));
    }
    if let Some(pattern) = &interaction.result_pattern {
        fields.insert("resultGraphPattern".into(), serde_json::json!(pattern));
    }

    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use kenect_shared::{Binding, GraphPattern, InteractionType, PrefixMap};
    use wiremock::matchers::{any, body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    const KB_ID: &str = "https://example.org/kb/sensors";

    fn test_client(server: &MockServer) -> EngineClient {
        let base = Url::parse(&server.uri()).expect("server uri");
        let kb = KnowledgeBaseId::from_str(KB_ID).expect("kb id");
        EngineClient::new(base, kb)
            .expect("build client")
            .with_poll_backoff(Duration::from_millis(10))
    }

    fn saref_prefixes() -> PrefixMap {
        PrefixMap::from([("saref".into(), "https://saref.etsi.org/core/".into())])
    }

    /// Replays a fixed sequence of responses; the last one repeats.
    struct ScriptedResponder {
        hits: AtomicUsize,
        steps: Vec<ResponseTemplate>,
    }

    impl ScriptedResponder {
        fn new(steps: Vec<ResponseTemplate>) -> Self {
            assert!(!steps.is_empty());
            Self {
                hits: AtomicUsize::new(0),
                steps,
            }
        }
    }

    impl Respond for ScriptedResponder {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            let i = self.hits.fetch_add(1, Ordering::SeqCst);
            self.steps[i.min(self.steps.len() - 1)].clone()
        }
    }

    fn handle_request_json() -> serde_json::Value {
        serde_json::json!({
            "handleRequestId": 42,
            "knowledgeInteractionId": "https://example.org/ki/1",
            "bindingSet": [{"sensor": "<https://example.org/sensor/1>"}],
        })
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn register_posts_descriptor_with_kb_header() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/sc"))
            .and(header(HEADER_KB_ID, KB_ID))
            .and(body_partial_json(serde_json::json!({
                "knowledgeBaseId": KB_ID,
                "reasonerEnabled": false,
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let connector = SmartConnector {
            knowledge_base_id: KnowledgeBaseId::from_str(KB_ID).unwrap(),
            knowledge_base_name: "sensor-kb".into(),
            knowledge_base_description: "Publishes sensor readings".into(),
            reasoner_enabled: false,
        };

        let response = client.register(&connector).await.expect("register");
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn register_reports_rejection_instead_of_raising() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/sc"))
            .respond_with(ResponseTemplate::new(400).set_body_string("already registered"))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let connector = SmartConnector {
            knowledge_base_id: KnowledgeBaseId::from_str(KB_ID).unwrap(),
            knowledge_base_name: "sensor-kb".into(),
            knowledge_base_description: "Publishes sensor readings".into(),
            reasoner_enabled: true,
        };

        let response = client.register(&connector).await.expect("transport ok");
        assert!(!response.is_success());
        assert_eq!(response.status.as_u16(), 400);
        assert_eq!(response.body, "already registered");
    }

    // -----------------------------------------------------------------------
    // Interaction registration
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn register_interaction_returns_assigned_id() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/sc/ki"))
            .and(header(HEADER_KB_ID, KB_ID))
            .and(body_partial_json(serde_json::json!({
                "knowledgeInteractionType": "AnswerKnowledgeInteraction",
                "graphPattern": "?sensor saref:hasValue ?value .",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "knowledgeInteractionId": "https://example.org/ki/1",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let interaction = KnowledgeInteraction::answer(
            "measurements",
            saref_prefixes(),
            GraphPattern::from("?sensor saref:hasValue ?value ."),
        );

        let id = client
            .register_interaction(&interaction)
            .await
            .expect("register interaction");
        assert_eq!(id.as_str(), "https://example.org/ki/1");
    }

    #[tokio::test]
    async fn register_interaction_validates_before_network() {
        let server = MockServer::start().await;

        // No request must ever reach the server.
        Mock::given(any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let mut broken = KnowledgeInteraction::ask(
            "measurements",
            saref_prefixes(),
            GraphPattern::from("?sensor saref:hasValue ?value ."),
        );
        broken.graph_pattern = None;

        let err = client.register_interaction(&broken).await.unwrap_err();
        assert!(matches!(err, KenectError::InvalidArgument { .. }));
    }

    #[test]
    fn bogus_interaction_type_is_invalid_argument() {
        let err = InteractionType::from_str("BogusInteraction").unwrap_err();
        assert!(matches!(err, KenectError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn register_interaction_missing_id_is_protocol_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/sc/ki"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let interaction = KnowledgeInteraction::ask(
            "measurements",
            saref_prefixes(),
            GraphPattern::from("?sensor saref:hasValue ?value ."),
        );

        let err = client.register_interaction(&interaction).await.unwrap_err();
        assert!(matches!(err, KenectError::Protocol { .. }));
    }

    // -----------------------------------------------------------------------
    // ASK
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn ask_returns_engine_bindings() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/sc/ask"))
            .and(header(HEADER_KB_ID, KB_ID))
            .and(header(HEADER_KI_ID, "https://example.org/ki/ask"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "bindingSet": [
                    {"sensor": "<https://example.org/sensor/1>", "value": "21.5"},
                    {"sensor": "<https://example.org/sensor/2>", "value": "19.0"},
                ],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let id = InteractionId::from("https://example.org/ki/ask");
        // One empty map: all variables unbound.
        let query: BindingSet = vec![Binding::new()];

        let result = client.ask(&id, &query).await.expect("ask");
        assert_eq!(result.binding_set.len(), 2);
        assert_eq!(result.binding_set[0]["value"], "21.5");
    }

    // -----------------------------------------------------------------------
    // Handle loop
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn answer_loop_handles_request_then_exits_on_410() {
        let server = MockServer::start().await;

        // 202, 202, then a handle request, then the engine shuts down.
        Mock::given(method("GET"))
            .and(path("/sc/handle"))
            .respond_with(ScriptedResponder::new(vec![
                ResponseTemplate::new(202),
                ResponseTemplate::new(202),
                ResponseTemplate::new(200).set_body_json(handle_request_json()),
                ResponseTemplate::new(410),
            ]))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/sc/handle"))
            .and(header(HEADER_KB_ID, KB_ID))
            .and(header(HEADER_KI_ID, "https://example.org/ki/1"))
            .and(body_partial_json(serde_json::json!({
                "handleRequestId": 42,
                "bindingSet": [{"sensor": "<https://example.org/sensor/1>", "value": "21.5"}],
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        client
            .answer_loop(
                &InteractionId::from("https://example.org/ki/1"),
                move |bindings: &BindingSet| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(bindings.len(), 1);
                    assert_eq!(bindings[0]["sensor"], "<https://example.org/sensor/1>");
                    let mut answered = bindings[0].clone();
                    answered.insert("value".into(), "21.5".into());
                    Ok(vec![answered])
                },
                &cancel,
            )
            .await
            .expect("loop exits cleanly on 410");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handle_loop_backs_off_on_unexpected_status() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/sc/handle"))
            .respond_with(ScriptedResponder::new(vec![
                ResponseTemplate::new(500).set_body_string("boom"),
                ResponseTemplate::new(200).set_body_json(handle_request_json()),
                ResponseTemplate::new(410),
            ]))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/sc/handle"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        client
            .answer_loop(
                &InteractionId::from("https://example.org/ki/1"),
                move |bindings: &BindingSet| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(bindings.clone())
                },
                &cancel,
            )
            .await
            .expect("loop survives the 500 and exits on 410");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handle_loop_fails_hard_on_malformed_handle_request() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/sc/handle"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"bindingSet": []})),
            )
            .mount(&server)
            .await;

        let client = test_client(&server);
        let cancel = CancellationToken::new();

        let err = client
            .answer_loop(
                &InteractionId::from("https://example.org/ki/1"),
                |bindings: &BindingSet| Ok(bindings.clone()),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KenectError::Protocol { .. }));
    }

    #[tokio::test]
    async fn handle_loop_fails_hard_on_unknown_interaction() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/sc/handle"))
            .respond_with(ResponseTemplate::new(200).set_body_json(handle_request_json()))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let cancel = CancellationToken::new();

        let err = client
            .answer_loop(
                &InteractionId::from("https://example.org/ki/other"),
                |bindings: &BindingSet| Ok(bindings.clone()),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KenectError::Protocol { .. }));
        assert!(err.to_string().contains("no handler registered"));
    }

    #[tokio::test]
    async fn cancellation_stops_an_idle_loop() {
        let server = MockServer::start().await;

        // Engine that never has work: heartbeat forever.
        Mock::given(method("GET"))
            .and(path("/sc/handle"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            client
                .answer_loop(
                    &InteractionId::from("https://example.org/ki/1"),
                    |bindings: &BindingSet| Ok(bindings.clone()),
                    &loop_cancel,
                )
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("loop should stop promptly after cancellation")
            .expect("loop task should not panic");
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn handle_loop_serves_multiple_interactions() {
        let server = MockServer::start().await;

        let request_for = |ki: &str, id: i64| {
            serde_json::json!({
                "handleRequestId": id,
                "knowledgeInteractionId": ki,
                "bindingSet": [{}],
            })
        };

        Mock::given(method("GET"))
            .and(path("/sc/handle"))
            .respond_with(ScriptedResponder::new(vec![
                ResponseTemplate::new(200)
                    .set_body_json(request_for("https://example.org/ki/answer", 1)),
                ResponseTemplate::new(200)
                    .set_body_json(request_for("https://example.org/ki/react", 2)),
                ResponseTemplate::new(410),
            ]))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/sc/handle"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let cancel = CancellationToken::new();
        let answered = Arc::new(AtomicUsize::new(0));
        let reacted = Arc::new(AtomicUsize::new(0));

        let mut handlers: HandlerMap = HashMap::new();
        let counter = answered.clone();
        handlers.insert(
            InteractionId::from("https://example.org/ki/answer"),
            Box::new(move |bindings: &BindingSet| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(bindings.clone())
            }),
        );
        let counter = reacted.clone();
        handlers.insert(
            InteractionId::from("https://example.org/ki/react"),
            Box::new(move |bindings: &BindingSet| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(bindings.clone())
            }),
        );

        client
            .handle_loop(&mut handlers, &cancel)
            .await
            .expect("loop exits on 410");

        assert_eq!(answered.load(Ordering::SeqCst), 1);
        assert_eq!(reacted.load(Ordering::SeqCst), 1);
    }

    // -----------------------------------------------------------------------
    // Payload shapes
    // -----------------------------------------------------------------------

    #[test]
    fn ask_payload_uses_single_graph_pattern() {
        let interaction = KnowledgeInteraction::ask(
            "measurements",
            saref_prefixes(),
            GraphPattern::from("?sensor saref:hasValue ?value ."),
        );
        let payload = interaction_payload(&interaction);

        assert_eq!(
            payload["knowledgeInteractionType"],
            "AskKnowledgeInteraction"
        );
        assert_eq!(payload["graphPattern"], "?sensor saref:hasValue ?value .");
        assert!(payload.get("argumentGraphPattern").is_none());
    }

    #[test]
    fn react_payload_uses_argument_and_result_patterns() {
        let interaction = KnowledgeInteraction::react(
            "conversion",
            saref_prefixes(),
            GraphPattern::from("?m saref:hasValue ?celsius ."),
            GraphPattern::from("?m saref:hasValue ?fahrenheit ."),
        );
        let payload = interaction_payload(&interaction);

        assert_eq!(
            payload["knowledgeInteractionType"],
            "ReactKnowledgeInteraction"
        );
        assert_eq!(payload["argumentGraphPattern"], "?m saref:hasValue ?celsius .");
        assert_eq!(
            payload["resultGraphPattern"],
            "?m saref:hasValue ?fahrenheit ."
        );
        assert!(payload.get("graphPattern").is_none());
    }
}
