//! The network/session façade.
//!
//! One `Service` per signed-in session: authentication and token lifecycle,
//! request envelope construction, the five core remote operations
//! (`get_query`, `get_persistent_object`, `execute_query`, `execute_action`,
//! `get_stream`) and the bootstrap/sign-in flows. All requests are JSON POSTs
//! (or GETs for a few read-only endpoints) through a single retry-wrapped
//! transport primitive.

pub mod actions;
pub mod config;
pub mod credentials;
pub mod culture;
pub mod hooks;
pub mod streaming;
pub mod transport;

pub use actions::{ActionDefinition, ActionDefinitionRegistry};
pub use config::ServiceConfig;
pub use credentials::{CredentialStore, MemoryCredentialStore};
pub use culture::{CultureInfo, Language};
pub use hooks::{DefaultServiceHooks, ExecuteActionArgs, ServiceHooks};
pub use streaming::{StreamingAbortHandle, StreamingActionMessages};
pub use transport::{
    FilePayload, HttpBody, HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport,
};

use crate::core::{Result, ServiceError};
use crate::dto::{
    ClientDataDto, ClientOperationDto, ForgotPasswordDto, InstantSearchResultDto,
    NotificationType, PersistentObjectDto, ProviderParametersDto, QueryResultDto,
    QueryResultItemDto, ResponseEnvelope,
};
use crate::model::{PersistentObject, PersistentObjectAttribute, Query};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map as JsonMap, Value as Json, json};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tracing::{debug, warn};

/// Client library version reported in every request envelope.
pub const CLIENT_VERSION: &str = concat!("lobsync-", env!("CARGO_PKG_VERSION"));

const PROFILED_REQUESTS_CAP: usize = 20;

lazy_static! {
    static ref NO_INTERNET_MESSAGES: HashMap<&'static str, &'static str> = HashMap::from([
        ("en", "Unable to connect to the server."),
        ("nl", "Kan geen verbinding maken met de server."),
        ("de", "Es kann keine Verbindung mit dem Server hergestellt werden."),
        ("fr", "Impossible de se connecter au serveur."),
        ("es", "No se puede conectar con el servidor."),
        ("it", "Impossibile connettersi al server."),
        ("pt", "N\u{e3}o \u{e9} poss\u{ed}vel conectar-se ao servidor."),
        ("da", "Kan ikke oprette forbindelse til serveren."),
        ("sv", "Det g\u{e5}r inte att ansluta till servern."),
        ("nb", "Kan ikke koble til serveren."),
        ("pl", "Nie mo\u{17c}na po\u{142}\u{105}czy\u{107} si\u{119} z serwerem."),
        ("ja", "\u{30b5}\u{30fc}\u{30d0}\u{30fc}\u{306b}\u{63a5}\u{7d9a}\u{3067}\u{304d}\u{307e}\u{305b}\u{3093}\u{3002}"),
    ]);
    static ref EMBEDDED_JSON: Regex = Regex::new(r"(?s)(\{.*\})<").expect("static pattern");
    static ref CONTENT_DISPOSITION_FILENAME: Regex =
        Regex::new(r#"filename[^;=\n]*=(?:"([^"]*)"|'([^']*)'|([^;\n]*))"#).expect("static pattern");
}

fn no_internet_message(language: Option<&str>) -> String {
    let key = language
        .and_then(|l| l.split('-').next())
        .map(|l| l.to_lowercase())
        .unwrap_or_else(|| "en".to_string());
    NO_INTERNET_MESSAGES
        .get(key.as_str())
        .or_else(|| NO_INTERNET_MESSAGES.get("en"))
        .unwrap_or(&"Unable to connect to the server.")
        .to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthTokenType {
    Basic,
    Jwt,
}

/// One diagnostic entry of the profiler ring buffer (newest first, cap 20).
#[derive(Debug, Clone)]
pub struct ProfilerRequestEntry {
    pub when: DateTime<Utc>,
    pub method: String,
    pub profiler: Json,
    pub elapsed_milliseconds: i64,
    pub transport_milliseconds: i64,
    pub request: Json,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GetQueryOptions {
    pub as_lookup: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    pub filter: String,
    pub order_by: Option<String>,
    pub top: Option<i64>,
    pub skip: Option<i64>,
    pub hide_ids: bool,
    pub hide_type: bool,
}

/// A downloaded stream result.
#[derive(Debug, Clone)]
pub struct StreamedFile {
    pub file_name: Option<String>,
    pub content: Vec<u8>,
}

struct SessionState {
    client_data: Option<ClientDataDto>,
    language: Option<Language>,
    languages: Vec<Language>,
    windows_authentication: bool,
    providers: HashMap<String, ProviderParametersDto>,
    is_signed_in: bool,
    is_using_default_credentials: bool,
    application: Option<Arc<PersistentObject>>,
    initial: Option<Arc<PersistentObject>>,
    session: Option<Json>,
    culture: CultureInfo,
    profile: bool,
    bootstrap_token: Option<String>,
    // Transient services keep these here instead of the credential store.
    transient_user_name: Option<String>,
    transient_auth_token: Option<String>,
    transient_requested_language: Option<String>,
    stay_signed_in: bool,
}

pub struct Service {
    config: ServiceConfig,
    hooks: Arc<dyn ServiceHooks>,
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn CredentialStore>,
    state: RwLock<SessionState>,
    action_definitions: RwLock<ActionDefinitionRegistry>,
    icons: RwLock<HashMap<String, String>>,
    profiled_requests: RwLock<VecDeque<ProfilerRequestEntry>>,
    queued_client_operations: Mutex<VecDeque<ClientOperationDto>>,
    dispatching_operations: AtomicBool,
    last_auth_token_update: RwLock<DateTime<Utc>>,
}

impl Service {
    /// Creates a service with default hooks, transport and credential store.
    pub fn new(service_uri: &str) -> Arc<Self> {
        Self::with_config(ServiceConfig::new(service_uri))
    }

    pub fn with_config(config: ServiceConfig) -> Arc<Self> {
        let transport = Arc::new(ReqwestTransport::new(config.request_timeout));
        Self::build(config, Arc::new(DefaultServiceHooks::new()), transport, None)
    }

    pub fn with_hooks(config: ServiceConfig, hooks: Arc<dyn ServiceHooks>) -> Arc<Self> {
        let transport = Arc::new(ReqwestTransport::new(config.request_timeout));
        Self::build(config, hooks, transport, None)
    }

    /// Full control over the collaborators; tests plug a scripted transport
    /// in here.
    pub fn with_collaborators(
        config: ServiceConfig,
        hooks: Arc<dyn ServiceHooks>,
        transport: Arc<dyn HttpTransport>,
        credentials: Option<Arc<dyn CredentialStore>>,
    ) -> Arc<Self> {
        Self::build(config, hooks, transport, credentials)
    }

    fn build(
        config: ServiceConfig,
        hooks: Arc<dyn ServiceHooks>,
        transport: Arc<dyn HttpTransport>,
        credentials: Option<Arc<dyn CredentialStore>>,
    ) -> Arc<Self> {
        let bootstrap_token = config.bootstrap_token.clone();
        let credentials =
            credentials.unwrap_or_else(|| Arc::new(MemoryCredentialStore::new()) as Arc<dyn CredentialStore>);
        let stay_signed_in = !config.is_transient
            && credentials
                .get(credentials::STAY_SIGNED_IN_KEY)
                .map(|v| v == "true")
                .unwrap_or(false);

        Arc::new(Self {
            config,
            hooks,
            transport,
            credentials,
            state: RwLock::new(SessionState {
                client_data: None,
                language: None,
                languages: Vec::new(),
                windows_authentication: false,
                providers: HashMap::new(),
                is_signed_in: false,
                is_using_default_credentials: false,
                application: None,
                initial: None,
                session: None,
                culture: CultureInfo::default(),
                profile: false,
                bootstrap_token,
                transient_user_name: None,
                transient_auth_token: None,
                transient_requested_language: None,
                stay_signed_in,
            }),
            action_definitions: RwLock::new(ActionDefinitionRegistry::new()),
            icons: RwLock::new(HashMap::new()),
            profiled_requests: RwLock::new(VecDeque::new()),
            queued_client_operations: Mutex::new(VecDeque::new()),
            dispatching_operations: AtomicBool::new(false),
            last_auth_token_update: RwLock::new(Utc::now()),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn hooks(&self) -> &Arc<dyn ServiceHooks> {
        &self.hooks
    }

    pub fn is_transient(&self) -> bool {
        self.config.is_transient
    }

    // ------------------------------------------------------------------
    // Session state
    // ------------------------------------------------------------------

    pub fn user_name(&self) -> Option<String> {
        if self.config.is_transient {
            self.state.read().ok().and_then(|s| s.transient_user_name.clone())
        } else {
            self.credentials.get(credentials::USER_NAME_KEY)
        }
    }

    fn set_user_name(&self, value: Option<&str>) {
        if self.config.is_transient {
            if let Ok(mut state) = self.state.write() {
                state.transient_user_name = value.map(str::to_string);
            }
        } else {
            self.credentials.set(credentials::USER_NAME_KEY, value);
        }
    }

    pub fn auth_token(&self) -> Option<String> {
        if self.config.is_transient {
            self.state.read().ok().and_then(|s| s.transient_auth_token.clone())
        } else {
            self.credentials.get(credentials::AUTH_TOKEN_KEY)
        }
    }

    pub fn set_auth_token(&self, value: Option<&str>) {
        if self.config.is_transient {
            if let Ok(mut state) = self.state.write() {
                state.transient_auth_token = value.map(str::to_string);
            }
        } else {
            self.credentials.set(credentials::AUTH_TOKEN_KEY, value);
        }
    }

    pub fn auth_token_type(&self) -> Option<AuthTokenType> {
        self.auth_token().map(|token| {
            if token.starts_with("JWT:") {
                AuthTokenType::Jwt
            } else {
                AuthTokenType::Basic
            }
        })
    }

    pub fn default_user_name(&self) -> Option<String> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.client_data.as_ref().and_then(|c| c.default_user.clone()))
    }

    pub fn register_user_name(&self) -> Option<String> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.providers.values().find_map(|p| p.register_user.clone()))
    }

    pub fn requested_language(&self) -> Option<String> {
        if self.config.is_transient {
            self.state
                .read()
                .ok()
                .and_then(|s| s.transient_requested_language.clone())
        } else {
            self.credentials.get(credentials::REQUESTED_LANGUAGE_KEY)
        }
    }

    pub fn set_requested_language(&self, value: Option<&str>) {
        if self.config.is_transient {
            if let Ok(mut state) = self.state.write() {
                state.transient_requested_language = value.map(str::to_string);
            }
        } else {
            self.credentials.set(credentials::REQUESTED_LANGUAGE_KEY, value);
        }
    }

    pub fn stay_signed_in(&self) -> bool {
        self.state.read().map(|s| s.stay_signed_in).unwrap_or(false)
    }

    pub fn is_signed_in(&self) -> bool {
        self.state.read().map(|s| s.is_signed_in).unwrap_or(false)
    }

    pub fn is_using_default_credentials(&self) -> bool {
        self.state
            .read()
            .map(|s| s.is_using_default_credentials)
            .unwrap_or(false)
    }

    fn set_is_signed_in(&self, value: bool) {
        if let Ok(mut state) = self.state.write() {
            state.is_signed_in = value;
            state.is_using_default_credentials = false;
        }

        let default_user = self.default_user_name();
        let user = self.user_name();
        if let (Some(default_user), Some(user)) = (default_user, user) {
            if let Ok(mut state) = self.state.write() {
                state.is_using_default_credentials =
                    default_user.to_lowercase() == user.to_lowercase();
            }
        }
    }

    pub fn language(&self) -> Option<Language> {
        self.state.read().ok().and_then(|s| s.language.clone())
    }

    pub fn languages(&self) -> Vec<Language> {
        self.state.read().map(|s| s.languages.clone()).unwrap_or_default()
    }

    pub fn windows_authentication(&self) -> bool {
        self.state.read().map(|s| s.windows_authentication).unwrap_or(false)
    }

    pub fn providers(&self) -> HashMap<String, ProviderParametersDto> {
        self.state.read().map(|s| s.providers.clone()).unwrap_or_default()
    }

    pub fn application(&self) -> Option<Arc<PersistentObject>> {
        self.state.read().ok().and_then(|s| s.application.clone())
    }

    pub fn initial(&self) -> Option<Arc<PersistentObject>> {
        self.state.read().ok().and_then(|s| s.initial.clone())
    }

    pub fn current_culture(&self) -> CultureInfo {
        self.state.read().map(|s| s.culture.clone()).unwrap_or_default()
    }

    pub fn icons(&self) -> HashMap<String, String> {
        self.icons.read().map(|i| i.clone()).unwrap_or_default()
    }

    pub fn action_definition(&self, name: &str) -> Option<ActionDefinition> {
        self.action_definitions.read().ok()?.get(name).cloned()
    }

    pub fn is_profiling(&self) -> bool {
        self.state.read().map(|s| s.profile).unwrap_or(false)
    }

    pub fn set_profile(&self, value: bool) {
        if let Ok(mut state) = self.state.write() {
            state.profile = value;
        }
        if !self.config.is_transient {
            self.credentials
                .set(credentials::PROFILE_KEY, value.then_some("true"));
        }
        if !value {
            if let Ok(mut requests) = self.profiled_requests.write() {
                requests.clear();
            }
        }
    }

    /// Diagnostic ring buffer of profiled requests, newest first, capped at 20.
    pub fn profiled_requests(&self) -> Vec<ProfilerRequestEntry> {
        self.profiled_requests
            .read()
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn queued_client_operations(&self) -> usize {
        self.queued_client_operations
            .lock()
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// Materializes a persistent object from a wire DTO through the
    /// construction hook.
    pub fn construct_persistent_object(
        self: &Arc<Self>,
        dto: PersistentObjectDto,
    ) -> Arc<PersistentObject> {
        self.hooks.on_construct_persistent_object(self, dto)
    }

    /// Materializes a query from a wire DTO through the construction hook.
    pub fn construct_query(
        self: &Arc<Self>,
        dto: crate::dto::QueryDto,
        parent: Option<Arc<PersistentObject>>,
        as_lookup: bool,
    ) -> Arc<Query> {
        self.hooks.on_construct_query(self, dto, parent, as_lookup)
    }

    /// Returns the translated message for a key, or the key itself.
    pub fn get_translated_message(&self, key: &str) -> String {
        self.language()
            .and_then(|l| l.get_message(key).map(str::to_string))
            .unwrap_or_else(|| key.to_string())
    }

    fn transport_error(&self, error: ServiceError) -> ServiceError {
        match error {
            ServiceError::Transport(_) => {
                let language = self
                    .requested_language()
                    .or_else(|| self.language().map(|l| l.culture));
                ServiceError::Transport(no_internet_message(language.as_deref()))
            }
            other => other,
        }
    }

    // ------------------------------------------------------------------
    // Request plumbing
    // ------------------------------------------------------------------

    /// Builds the generic request envelope for a service method.
    fn create_data(&self, method: &str) -> JsonMap<String, Json> {
        let mut data = JsonMap::new();
        data.insert("clientVersion".to_string(), json!(CLIENT_VERSION));
        data.insert("environment".to_string(), json!(self.config.environment));
        data.insert(
            "environmentVersion".to_string(),
            json!(self.config.environment_version),
        );

        if method != "getApplication" {
            let user_name = self.user_name();
            data.insert("userName".to_string(), json!(user_name));
            if user_name != self.default_user_name() {
                data.insert("authToken".to_string(), json!(self.auth_token()));
            }
        }

        if let Some(requested_language) = self.requested_language() {
            data.insert("requestedLanguage".to_string(), json!(requested_language));
        }

        if let Some(session) = self.state.read().ok().and_then(|s| s.session.clone()) {
            data.insert("session".to_string(), session);
        }

        if self.is_profiling() {
            data.insert("profile".to_string(), json!(true));
        }

        self.hooks.create_data(&mut data);

        data
    }

    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
        transport::fetch_with_retry(&*self.transport, request, self.config.rate_limit_default_delay)
            .await
    }

    async fn get_json(&self, url: &str, headers: Vec<(String, String)>) -> Result<Json> {
        let mut request = HttpRequest::get(url);
        request.headers = headers;

        let response = self
            .fetch(request)
            .await
            .map_err(|e| self.transport_error(e))?;
        if !response.is_ok() {
            return Err(ServiceError::Transport(format!("HTTP {}", response.status)));
        }

        serde_json::from_slice(&response.body).map_err(ServiceError::from)
    }

    async fn post_json(self: &Arc<Self>, url: &str, data: JsonMap<String, Json>) -> Result<ResponseEnvelope> {
        self.post_json_with_files(url, data, Vec::new()).await
    }

    /// The single POST primitive: JSON (or multipart when files ride along),
    /// embedded-JSON extraction from `text/html` bodies, auth-token rotation,
    /// silent re-authentication on `"Session expired"`, profiling and
    /// server-pushed operation intake.
    async fn post_json_with_files(
        self: &Arc<Self>,
        url: &str,
        mut data: JsonMap<String, Json>,
        files: Vec<(String, FilePayload)>,
    ) -> Result<ResponseEnvelope> {
        let method_name = url.rsplit('/').next().unwrap_or_default().to_string();

        // Streaming actions replace the POST with a server-push event stream.
        if let Some(action) = data.get("action").and_then(|a| a.as_str()) {
            let name = action.rsplit('.').next().unwrap_or(action).to_string();
            let is_streaming = self
                .action_definition(&name)
                .map(|d| d.is_streaming)
                .unwrap_or(false);

            if is_streaming {
                let mut data = data;
                let headers = self.authorization_headers(&mut data);
                let mut request =
                    HttpRequest::post(url, HttpBody::Json(Json::Object(data)));
                request.headers = headers;

                let (messages, abort) =
                    streaming::run_streaming_action(&self.transport, request).await?;
                self.hooks.on_streaming_action(&name, messages, abort);

                return Ok(ResponseEnvelope::default());
            }
        }

        // Session-expiry recovery re-enters the loop with refreshed
        // credentials, at most once per hook/default-credential decision.
        loop {
            let created_request = Utc::now();
            let request_start = Instant::now();

            let headers = self.authorization_headers(&mut data);

            let body = if files.is_empty() {
                HttpBody::Json(Json::Object(data.clone()))
            } else {
                HttpBody::Multipart {
                    data: Json::Object(data.clone()),
                    files: files.clone(),
                }
            };
            let mut request = HttpRequest::post(url, body);
            request.headers = headers;

            let response = self
                .fetch(request)
                .await
                .map_err(|e| self.transport_error(e))?;
            if !response.is_ok() {
                return Err(ServiceError::Transport(format!("HTTP {}", response.status)));
            }

            let parsed = parse_response_body(&response)?;
            let mut envelope: ResponseEnvelope = serde_json::from_value(parsed)?;

            match envelope.exception().map(str::to_string) {
                None => {
                    let rotate = {
                        let last_update = self
                            .last_auth_token_update
                            .read()
                            .map(|t| *t)
                            .unwrap_or_else(|_| Utc::now());
                        created_request > last_update
                            && self.auth_token_type() != Some(AuthTokenType::Jwt)
                    };
                    if rotate {
                        if let Some(token) = &envelope.auth_token {
                            self.set_auth_token(Some(token.as_str()));
                            if let Ok(mut last_update) = self.last_auth_token_update.write() {
                                *last_update = created_request;
                            }
                        }
                    }

                    if let Some(session) = envelope.session.take() {
                        if let Ok(mut state) = self.state.write() {
                            state.session = Some(session);
                        }
                    }

                    self.post_json_process(
                        &method_name,
                        &data,
                        &mut envelope,
                        created_request,
                        request_start,
                        response.header("x-elapsedmilliseconds"),
                    );

                    return Ok(envelope);
                }
                Some(exception) if exception == "Session expired" => {
                    warn!(url, "session expired, attempting silent re-authentication");
                    self.set_auth_token(None);
                    data.remove("authToken");

                    let default_user = self.default_user_name();
                    if default_user.is_some() && default_user == self.user_name() {
                        data.remove("password");
                        continue;
                    } else if !self.hooks.on_session_expired().await? {
                        return Err(ServiceError::SessionExpired);
                    } else if let Some(default_user) = default_user {
                        data.remove("password");
                        data.insert("userName".to_string(), json!(default_user));
                        continue;
                    } else {
                        return Err(ServiceError::SessionExpired);
                    }
                }
                Some(exception) => {
                    self.post_json_process(
                        &method_name,
                        &data,
                        &mut envelope,
                        created_request,
                        request_start,
                        response.header("x-elapsedmilliseconds"),
                    );
                    return Err(ServiceError::Server(exception));
                }
            }
        }
    }

    /// Builds the per-request authorization headers. JWT tokens ride in an
    /// `Authorization` header and leave the body without credentials.
    fn authorization_headers(&self, data: &mut JsonMap<String, Json>) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        if self.auth_token_type() == Some(AuthTokenType::Jwt) {
            if let Some(token) = self.auth_token() {
                headers.push(("Authorization".to_string(), format!("bearer {}", &token[4..])));
            }
            data.remove("userName");
            data.remove("authToken");
        }
        headers
    }

    fn post_json_process(
        self: &Arc<Self>,
        method: &str,
        request_data: &JsonMap<String, Json>,
        envelope: &mut ResponseEnvelope,
        created_request: DateTime<Utc>,
        request_start: Instant,
        elapsed_header: Option<&str>,
    ) {
        if self.is_profiling() {
            if let Some(profiler) = &envelope.profiler {
                let elapsed_milliseconds = elapsed_header
                    .and_then(|v| v.parse::<i64>().ok())
                    .or_else(|| profiler.get("elapsedMilliseconds").and_then(Json::as_i64))
                    .unwrap_or(-1);
                let total = request_start.elapsed().as_millis() as i64;

                let entry = ProfilerRequestEntry {
                    when: created_request,
                    method: method.to_string(),
                    profiler: profiler.clone(),
                    elapsed_milliseconds,
                    transport_milliseconds: (total - elapsed_milliseconds).max(0),
                    request: Json::Object(request_data.clone()),
                };

                if let Ok(mut requests) = self.profiled_requests.write() {
                    requests.push_front(entry);
                    requests.truncate(PROFILED_REQUESTS_CAP);
                }
            }
        }

        if let Some(operations) = envelope.operations.take() {
            if let Ok(mut queue) = self.queued_client_operations.lock() {
                queue.extend(operations);
            }
        }

        self.dispatch_client_operations();
    }

    /// Drains the pending client operations FIFO, one per task turn, never
    /// concurrently.
    fn dispatch_client_operations(self: &Arc<Self>) {
        let pending = self
            .queued_client_operations
            .lock()
            .map(|q| !q.is_empty())
            .unwrap_or(false);
        if !pending || self.dispatching_operations.swap(true, Ordering::AcqRel) {
            return;
        }

        let service = self.clone();
        tokio::spawn(async move {
            loop {
                let operation = service
                    .queued_client_operations
                    .lock()
                    .ok()
                    .and_then(|mut q| q.pop_front());

                match operation {
                    Some(operation) => {
                        service.hooks.on_client_operation(operation);
                        tokio::task::yield_now().await;
                    }
                    None => break,
                }
            }
            service.dispatching_operations.store(false, Ordering::Release);
        });
    }

    // ------------------------------------------------------------------
    // Bootstrap and sign-in
    // ------------------------------------------------------------------

    /// Fetches the bootstrap client data and signs in with whatever
    /// credentials are available (bootstrap token, stored token, default
    /// user, or Windows authentication).
    pub async fn initialize(
        self: &Arc<Self>,
        skip_default_credential_login: bool,
    ) -> Result<Option<Arc<PersistentObject>>> {
        let mut url = "GetClientData?v=3".to_string();
        if let Some(requested_language) = self.requested_language() {
            url = format!("{}&lang={}", url, requested_language);
        }

        let raw = self
            .get_json(&self.config.create_uri(&url), Vec::new())
            .await?;
        let client_data: ClientDataDto = serde_json::from_value(raw)?;
        let client_data = self.hooks.on_initialize(client_data);

        if let Some(exception) = &client_data.exception {
            return Err(ServiceError::Server(exception.clone()));
        }

        let languages: Vec<Language> = client_data
            .languages
            .iter()
            .map(|(culture, data)| Language::new(data, culture))
            .collect();
        let language = languages
            .iter()
            .find(|l| l.is_default)
            .or_else(|| languages.first())
            .cloned();

        let providers: HashMap<String, ProviderParametersDto> = client_data
            .providers
            .iter()
            .map(|(name, provider)| (name.clone(), provider.parameters.clone()))
            .collect();

        let bootstrap_token = {
            let mut state = self.state.write().map_err(ServiceError::from)?;
            state.languages = languages;
            state.language = language;
            state.providers = providers;
            state.windows_authentication = client_data.windows_authentication;
            state.client_data = Some(client_data);
            state.bootstrap_token.take()
        };

        if let Some(token) = bootstrap_token {
            if let Some((user, token)) = token
                .strip_prefix("JWT:")
                .is_none()
                .then(|| token.split_once('/'))
                .flatten()
            {
                self.set_user_name(Some(user));
                let token = token.replace('_', "/");
                self.set_auth_token(Some(token.as_str()));
            } else {
                self.set_auth_token(Some(token.as_str()));
            }

            return self.get_application(None).await.map(Some);
        }

        if self.user_name().is_none() {
            let default_user = self.default_user_name();
            self.set_user_name(default_user.as_deref());
        }

        let can_auto_sign_in = self.auth_token().is_some()
            || ((self.default_user_name().is_some() || self.windows_authentication())
                && !skip_default_credential_login);

        if can_auto_sign_in {
            match self.get_application(None).await {
                Ok(application) => Ok(Some(application)),
                Err(e) => {
                    debug!(error = %e, "automatic sign-in failed");
                    Ok(None)
                }
            }
        } else {
            let has_application = self.application().is_some();
            self.set_is_signed_in(has_application);
            Ok(None)
        }
    }

    /// Signs in with explicit credentials (and optional verification code).
    pub async fn sign_in_using_credentials(
        self: &Arc<Self>,
        user_name: &str,
        password: &str,
        code: Option<&str>,
        stay_signed_in: bool,
    ) -> Result<Arc<PersistentObject>> {
        self.set_user_name(Some(user_name));

        let mut data = self.create_data("getApplication");
        data.insert("userName".to_string(), json!(user_name));
        data.insert("password".to_string(), json!(password));
        if let Some(code) = code {
            data.insert("code".to_string(), json!(code));
        }

        let application = self.get_application(Some(data)).await?;

        if self.is_signed_in() && !self.config.is_transient {
            if let Ok(mut state) = self.state.write() {
                state.stay_signed_in = stay_signed_in;
            }
            self.credentials.set(
                credentials::STAY_SIGNED_IN_KEY,
                stay_signed_in.then_some("true"),
            );
        }

        Ok(application)
    }

    pub async fn sign_in_using_default_credentials(
        self: &Arc<Self>,
    ) -> Result<Arc<PersistentObject>> {
        let default_user = self.default_user_name();
        self.set_user_name(default_user.as_deref());
        self.get_application(None).await
    }

    /// Tears the session down: clears tokens and the application graph.
    pub fn sign_out(&self) -> bool {
        let user_name = self.user_name();
        if user_name.is_some()
            && (user_name == self.default_user_name() || user_name == self.register_user_name())
        {
            self.set_user_name(None);
        }

        self.set_auth_token(None);

        if let Ok(mut state) = self.state.write() {
            state.application = None;
            state.initial = None;
            state.session = None;
            state.is_signed_in = false;
            state.is_using_default_credentials = false;
        }

        if let Ok(mut registry) = self.action_definitions.write() {
            registry.clear();
        }

        true
    }

    async fn get_application(
        self: &Arc<Self>,
        data: Option<JsonMap<String, Json>>,
    ) -> Result<Arc<PersistentObject>> {
        let mut data = data.unwrap_or_else(|| self.create_data(""));

        let has_credentials = data.contains_key("authToken")
            || data.contains_key("accessToken")
            || data.contains_key("password");
        let user_name = self.user_name();
        if !has_credentials
            && user_name.is_some()
            && user_name != self.default_user_name()
            && user_name != self.register_user_name()
        {
            if self.default_user_name().is_some() {
                let default_user = self.default_user_name();
                self.set_user_name(default_user.as_deref());
            }

            if self.user_name().is_none() && !self.hooks.on_session_expired().await? {
                return Err(ServiceError::SessionExpired);
            }

            data.insert("userName".to_string(), json!(self.user_name()));
        }

        let envelope = self
            .post_json(&self.config.create_uri("GetApplication"), data)
            .await?;

        let application_dto = envelope
            .application
            .clone()
            .ok_or_else(|| ServiceError::MalformedResponse("missing application".to_string()))?;

        let application = self
            .hooks
            .on_construct_persistent_object(self, application_dto);

        if let Ok(mut state) = self.state.write() {
            state.application = Some(application.clone());
        }

        // Action-definition registration happens after provider/language
        // setup, from the application's Actions query.
        if let Some(actions_query) = application.get_query("Actions") {
            if let Ok(mut registry) = self.action_definitions.write() {
                for item in actions_query.items() {
                    registry.register(ActionDefinition::from_query_item(&item));
                }
            }
        }

        if let Some(resources_query) = application.get_query("Resources") {
            let icons: HashMap<String, String> = resources_query
                .items()
                .iter()
                .filter(|i| i.value("Type") == Some("Icon"))
                .filter_map(|i| {
                    Some((i.value("Key")?.to_string(), i.value("Data")?.to_string()))
                })
                .collect();
            if let Ok(mut slot) = self.icons.write() {
                *slot = icons;
            }
        }

        {
            let mut state = self.state.write().map_err(ServiceError::from)?;

            if let Some(user_language) = &envelope.user_language {
                if let Some(language) = state
                    .languages
                    .iter()
                    .find(|l| &l.culture == user_language)
                    .or_else(|| state.languages.iter().find(|l| l.is_default))
                    .cloned()
                {
                    state.language = Some(language);
                }
            }

            let culture_name = envelope
                .user_culture_info
                .as_deref()
                .or(envelope.user_language.as_deref())
                .unwrap_or_default();
            state.culture = CultureInfo::from_name(culture_name);
        }

        if let Some(client_messages) = application.get_query("ClientMessages") {
            if let Ok(mut state) = self.state.write() {
                if let Some(language) = &mut state.language {
                    for item in client_messages.items() {
                        if let (Some(key), Some(value)) = (item.value("Key"), item.value("Value")) {
                            language.messages.insert(key.to_string(), value.to_string());
                        }
                    }
                }
            }
        }

        if let Some(initial_dto) = envelope.initial.clone() {
            let initial = self.hooks.on_construct_persistent_object(self, initial_dto);
            if let Ok(mut state) = self.state.write() {
                state.initial = Some(initial);
            }
        }

        let register_user = self.register_user_name();
        let default_user = self.default_user_name();
        match &envelope.user_name {
            Some(user) if Some(user) != register_user.as_ref() || Some(user) == default_user.as_ref() => {
                self.set_user_name(Some(user.as_str()));
                self.set_is_signed_in(true);
            }
            _ => self.set_is_signed_in(false),
        }

        Ok(application)
    }

    // ------------------------------------------------------------------
    // Core remote operations
    // ------------------------------------------------------------------

    pub async fn get_query(
        self: &Arc<Self>,
        id: &str,
        options: GetQueryOptions,
        parent: Option<&Arc<PersistentObject>>,
        text_search: Option<&str>,
        sort_options: Option<&str>,
    ) -> Result<Arc<Query>> {
        let mut data = self.create_data("getQuery");
        data.insert("id".to_string(), json!(id));

        if let Some(parent) = parent {
            data.insert("parent".to_string(), parent.to_service_object(false));
        }
        if let Some(text_search) = text_search {
            data.insert("textSearch".to_string(), json!(text_search));
        }
        if let Some(sort_options) = sort_options {
            data.insert("sortOptions".to_string(), json!(sort_options));
        }

        let envelope = self
            .post_json(&self.config.create_uri("GetQuery"), data)
            .await?;

        let query_dto = envelope
            .query
            .ok_or_else(|| ServiceError::MalformedResponse("missing query".to_string()))?;

        Ok(self
            .hooks
            .on_construct_query(self, query_dto, None, options.as_lookup))
    }

    pub async fn get_persistent_object(
        self: &Arc<Self>,
        parent: Option<&Arc<PersistentObject>>,
        id: &str,
        object_id: Option<&str>,
        is_new: bool,
    ) -> Result<Arc<PersistentObject>> {
        let mut data = self.create_data("getPersistentObject");
        data.insert("persistentObjectTypeId".to_string(), json!(id));
        data.insert("objectId".to_string(), json!(object_id));
        if is_new {
            data.insert("isNew".to_string(), json!(is_new));
        }
        if let Some(parent) = parent {
            data.insert("parent".to_string(), parent.to_service_object(false));
        }

        let envelope = self
            .post_json(&self.config.create_uri("GetPersistentObject"), data)
            .await?;

        let mut dto: PersistentObjectDto = envelope
            .result
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| ServiceError::MalformedResponse("missing result".to_string()))?;

        if let Some(notification) = dto.notification.clone() {
            if dto.notification_duration != 0 {
                self.hooks.on_show_notification(
                    &notification,
                    dto.notification_type,
                    dto.notification_duration,
                );
                dto.notification = None;
                dto.notification_duration = 0;
            } else if dto.notification_type == NotificationType::Error {
                return Err(ServiceError::Server(notification));
            }
        }

        Ok(self.hooks.on_construct_persistent_object(self, dto))
    }

    /// Executes a query, following continuation tokens until the requested
    /// page size is reached. The total item count is only finalized once no
    /// continuation remains.
    pub async fn execute_query(
        self: &Arc<Self>,
        parent: Option<Arc<PersistentObject>>,
        query: &Arc<Query>,
        as_lookup: bool,
        throw_exceptions: bool,
    ) -> Result<Option<QueryResultDto>> {
        let mut data = self.create_data("executeQuery");
        data.insert("query".to_string(), query.to_service_object());

        if let Some(parent) = &parent {
            data.insert("parent".to_string(), parent.to_service_object(false));
        }
        if as_lookup {
            data.insert("asLookup".to_string(), json!(as_lookup));
        }
        if let Some(owner) = query.owner_attribute_with_reference() {
            data.insert("forReferenceAttribute".to_string(), json!(owner.name()));
        }

        let outcome: Result<QueryResultDto> = async {
            let envelope = self
                .post_json(&self.config.create_uri("ExecuteQuery"), data.clone())
                .await?;

            let mut result: QueryResultDto = envelope
                .result
                .map(serde_json::from_value)
                .transpose()?
                .ok_or_else(|| ServiceError::MalformedResponse("missing result".to_string()))?;

            if result.continuation.is_some() {
                let wanted = data
                    .get("query")
                    .and_then(|q| q.get("top"))
                    .and_then(Json::as_i64)
                    .or(result.page_size)
                    .unwrap_or(0) as usize;

                while result.continuation.is_some() && result.items.len() < wanted {
                    if let Some(query_data) = data.get_mut("query").and_then(Json::as_object_mut) {
                        query_data.insert("continuation".to_string(), json!(result.continuation));
                        query_data.insert(
                            "top".to_string(),
                            json!((wanted - result.items.len()) as i64),
                        );
                    }

                    let inner_envelope = self
                        .post_json(&self.config.create_uri("ExecuteQuery"), data.clone())
                        .await?;
                    let inner_result: QueryResultDto = inner_envelope
                        .result
                        .map(serde_json::from_value)
                        .transpose()?
                        .ok_or_else(|| {
                            ServiceError::MalformedResponse("missing result".to_string())
                        })?;

                    result.items.extend(inner_result.items);
                    result.continuation = inner_result.continuation;
                }

                if result.continuation.is_none() {
                    result.total_items =
                        Some((query.items().len() + result.items.len()) as i64);
                }
            }

            Ok(result)
        }
        .await;

        match outcome {
            Ok(result) => Ok(Some(result)),
            Err(e) => {
                query.set_notification(Some(e.to_string()), NotificationType::Error, 0);
                if throw_exceptions { Err(e) } else { Ok(None) }
            }
        }
    }

    /// Executes a named action against a persistent object or query.
    ///
    /// Runs the pre-action hook (which may short-circuit or rewrite
    /// parameters), freezes the parent for the duration of any action other
    /// than `PersistentObject.Refresh`, switches to multipart when changed
    /// `BinaryFile` attributes carry pending files, and loops through
    /// server-driven retry prompts until a final result arrives.
    pub async fn execute_action(
        self: &Arc<Self>,
        action: &str,
        parent: Option<Arc<PersistentObject>>,
        query: Option<Arc<Query>>,
        selected_items: Vec<QueryResultItemDto>,
        parameters: Option<JsonMap<String, Json>>,
    ) -> Result<Option<Arc<PersistentObject>>> {
        let is_object_action = action.starts_with("PersistentObject.") || query.is_none();

        if is_object_action {
            if let Some(parent) = &parent {
                parent.clear_notification();
            }
        } else if let Some(query) = &query {
            query.clear_notification();
        }

        let mut selected_items = selected_items;
        if !is_object_action {
            if let Some(query) = &query {
                let select_all = query.select_all();
                if select_all.all_selected && !select_all.inverse {
                    selected_items = Vec::new();
                }
            }
        }

        let menu_option = parameters.as_ref().and_then(|p| {
            p.get("MenuLabel")
                .or_else(|| p.get("MenuOption"))
                .and_then(Json::as_str)
                .map(str::to_string)
        });
        self.hooks.track_event(action, menu_option.as_deref());

        let mut args = ExecuteActionArgs {
            action: action.to_string(),
            parameters,
            is_handled: false,
            result: None,
        };

        if let Err(e) = self.hooks.on_action(&mut args).await {
            self.set_action_notification(&parent, &query, is_object_action, &e);
            return Err(e);
        }

        if args.is_handled {
            return Ok(args.result);
        }

        let result = self
            .execute_action_core(action, &parent, &query, selected_items, args.parameters)
            .await;

        if let Err(e) = &result {
            self.set_action_notification(&parent, &query, is_object_action, e);
        }

        result
    }

    fn set_action_notification(
        &self,
        parent: &Option<Arc<PersistentObject>>,
        query: &Option<Arc<Query>>,
        is_object_action: bool,
        error: &ServiceError,
    ) {
        if is_object_action {
            if let Some(parent) = parent {
                parent.set_notification(Some(error.to_string()), NotificationType::Error, 0);
            }
        } else if let Some(query) = query {
            query.set_notification(Some(error.to_string()), NotificationType::Error, 0);
        }
    }

    async fn execute_action_core(
        self: &Arc<Self>,
        action: &str,
        parent: &Option<Arc<PersistentObject>>,
        query: &Option<Arc<Query>>,
        selected_items: Vec<QueryResultItemDto>,
        parameters: Option<JsonMap<String, Json>>,
    ) -> Result<Option<Arc<PersistentObject>>> {
        let is_object_action = action.starts_with("PersistentObject.") || query.is_none();
        let is_freezing_action = is_object_action && action != "PersistentObject.Refresh";

        let mut data = self.create_data("executeAction");
        data.insert("action".to_string(), json!(action));
        if let Some(parent) = parent {
            data.insert("parent".to_string(), parent.to_service_object(false));
        }
        if let Some(query) = query {
            data.insert("query".to_string(), query.to_service_object());
        }
        if !selected_items.is_empty() {
            data.insert("selectedItems".to_string(), serde_json::to_value(&selected_items)?);
        }
        if let Some(parameters) = &parameters {
            data.insert("parameters".to_string(), Json::Object(parameters.clone()));
        }

        let files = parent
            .as_ref()
            .map(|p| collect_file_inputs(p))
            .unwrap_or_default();

        // Unfreezing rides on the guard's Drop: every exit path releases it.
        let _freeze_guard = if is_freezing_action {
            parent.as_ref().map(|p| p.freeze_scope())
        } else {
            None
        };

        let mut parameters = parameters;
        let mut envelope = self
            .post_json_with_files(&self.config.create_uri("ExecuteAction"), data.clone(), files)
            .await?;

        // Server-driven retry loop: show the prompt, resend the chosen option
        // (and the possibly edited object) until a non-retry result arrives.
        while let Some(retry) = envelope.retry.take() {
            let retry_po = retry
                .persistent_object
                .as_ref()
                .map(|dto| self.hooks.on_construct_persistent_object(self, dto.clone()));

            let option = self.hooks.on_retry_action(&retry).await?;

            let parameters = parameters.get_or_insert_with(JsonMap::new);
            parameters.insert("RetryActionOption".to_string(), json!(option));
            data.insert("parameters".to_string(), Json::Object(parameters.clone()));

            if let Some(retry_po) = retry_po {
                data.insert(
                    "retryPersistentObject".to_string(),
                    retry_po.to_service_object(false),
                );
            }

            envelope = self
                .post_json(&self.config.create_uri("ExecuteAction"), data.clone())
                .await?;
        }

        let result = envelope
            .result
            .map(serde_json::from_value::<PersistentObjectDto>)
            .transpose()?
            .map(|dto| self.hooks.on_construct_persistent_object(self, dto));

        Ok(result)
    }

    /// Downloads a stream produced by an action.
    pub async fn get_stream(
        self: &Arc<Self>,
        object: Option<&Arc<PersistentObject>>,
        action: Option<&str>,
        parent: Option<&Arc<PersistentObject>>,
        query: Option<&Arc<Query>>,
        selected_items: Vec<QueryResultItemDto>,
        parameters: Option<JsonMap<String, Json>>,
    ) -> Result<Option<StreamedFile>> {
        let mut data = self.create_data("getStream");
        data.insert("action".to_string(), json!(action));
        if let Some(object) = object {
            data.insert("id".to_string(), json!(object.object_id()));
        }
        if let Some(parent) = parent {
            data.insert("parent".to_string(), parent.to_service_object(false));
        }
        if let Some(query) = query {
            data.insert("query".to_string(), query.to_service_object());
        }
        if !selected_items.is_empty() {
            data.insert("selectedItems".to_string(), serde_json::to_value(&selected_items)?);
        }
        if let Some(parameters) = parameters {
            data.insert("parameters".to_string(), Json::Object(parameters));
        }

        let request = HttpRequest::post(
            &self.config.create_uri("GetStream"),
            HttpBody::Multipart {
                data: Json::Object(data),
                files: Vec::new(),
            },
        );

        let response = self
            .fetch(request)
            .await
            .map_err(|e| self.transport_error(e))?;
        if !response.is_ok() {
            return Ok(None);
        }

        let file_name = response
            .header("content-disposition")
            .and_then(|value| CONTENT_DISPOSITION_FILENAME.captures(value))
            .and_then(|captures| {
                captures
                    .get(1)
                    .or_else(|| captures.get(2))
                    .or_else(|| captures.get(3))
            })
            .map(|m| m.as_str().to_string());

        Ok(Some(StreamedFile {
            file_name,
            content: response.body,
        }))
    }

    // ------------------------------------------------------------------
    // Auxiliary read-only endpoints
    // ------------------------------------------------------------------

    pub async fn get_report(&self, token: &str, options: ReportOptions) -> Result<Vec<Json>> {
        let mut uri = self.config.create_uri(&format!(
            "GetReport/{}?format=json&$filter={}",
            token,
            urlencode(&options.filter)
        ));

        if let Some(order_by) = &options.order_by {
            uri = format!("{}&$orderBy={}", uri, order_by);
        }
        if let Some(top) = options.top {
            uri = format!("{}&$top={}", uri, top);
        }
        if let Some(skip) = options.skip {
            uri = format!("{}&$skip={}", uri, skip);
        }
        if options.hide_ids {
            uri = format!("{}&hideIds=true", uri);
        }
        if options.hide_type {
            uri = format!("{}&hideType=true", uri);
        }

        let result = self.get_json(&uri, Vec::new()).await?;
        Ok(result
            .get("d")
            .and_then(Json::as_array)
            .cloned()
            .unwrap_or_default())
    }

    pub async fn get_instant_search(&self, search: &str) -> Result<Vec<InstantSearchResultDto>> {
        let uri = self
            .config
            .create_uri(&format!("Instant?q={}", urlencode(search)));

        let authorization = match self.auth_token_type() {
            Some(AuthTokenType::Jwt) => self.auth_token().map(|t| t[4..].to_string()),
            _ => {
                let user_name = self.user_name().unwrap_or_default();
                let auth_token = self
                    .auth_token()
                    .map(|t| t.replace('/', "_"))
                    .unwrap_or_default();
                Some(format!("{}/{}", urlencode(&user_name), auth_token))
            }
        };

        let headers = authorization
            .map(|a| vec![("Authorization".to_string(), format!("Bearer {}", a))])
            .unwrap_or_default();

        let result = self.get_json(&uri, headers).await?;
        let items = result.get("d").cloned().unwrap_or(Json::Array(Vec::new()));
        serde_json::from_value(items).map_err(ServiceError::from)
    }

    pub async fn forgot_password(self: &Arc<Self>, user_name: &str) -> Result<ForgotPasswordDto> {
        let mut data = JsonMap::new();
        data.insert("userName".to_string(), json!(user_name));

        let envelope = self
            .post_json(&self.config.create_uri("forgotpassword"), data)
            .await?;

        Ok(serde_json::from_value(Json::Object(envelope.extra))?)
    }

    pub async fn get_credential_type(self: &Arc<Self>, user_name: &str) -> Result<Json> {
        let mut data = JsonMap::new();
        data.insert("userName".to_string(), json!(user_name));

        let envelope = self
            .post_json(
                &self.config.create_uri("authenticate/GetCredentialType"),
                data,
            )
            .await?;

        Ok(Json::Object(envelope.extra))
    }
}

/// Collects `attributeName → file` pairs for every changed `BinaryFile`
/// attribute, descending into detail children with the
/// `parentName.index.attrName` key scheme.
fn collect_file_inputs(po: &Arc<PersistentObject>) -> Vec<(String, FilePayload)> {
    fn walk(
        po: &Arc<PersistentObject>,
        result: &mut Vec<(String, FilePayload)>,
    ) {
        for attr in po.attributes() {
            if let Some(file) = attr.pending_file() {
                if attr.is_value_changed() {
                    result.push((file_input_name(&attr), file));
                }
            } else if let Some(detail) = attr.as_detail() {
                for child in detail.objects() {
                    walk(&child, result);
                }
            }
        }
    }

    fn file_input_name(attr: &Arc<PersistentObjectAttribute>) -> String {
        let Some(parent) = attr.parent() else {
            return attr.name().to_string();
        };
        let Some(owner) = parent.owner_detail_attribute() else {
            return attr.name().to_string();
        };

        let index = owner
            .as_detail()
            .map(|detail| {
                detail
                    .objects()
                    .iter()
                    .position(|o| Arc::ptr_eq(o, &parent))
                    .unwrap_or(0)
            })
            .unwrap_or(0);

        format!("{}.{}.{}", owner.name(), index, attr.name())
    }

    let mut result = Vec::new();
    walk(po, &mut result);
    result
}

/// Parses a response body: JSON, or a `text/html` page with an embedded
/// leading JSON object.
fn parse_response_body(response: &HttpResponse) -> Result<Json> {
    let content_type = response.content_type().unwrap_or_default();

    if content_type.contains("application/json") {
        return serde_json::from_slice(&response.body).map_err(ServiceError::from);
    }

    if content_type.starts_with("text/html") {
        let text = String::from_utf8_lossy(&response.body);
        let embedded = EMBEDDED_JSON
            .captures(&text)
            .and_then(|captures| captures.get(1))
            .ok_or_else(|| {
                ServiceError::MalformedResponse("no JSON object in text/html body".to_string())
            })?;
        return serde_json::from_str(embedded.as_str()).map_err(ServiceError::from);
    }

    Err(ServiceError::InvalidContentType(content_type.to_string()))
}

fn urlencode(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char)
            }
            other => result.push_str(&format!("%{:02X}", other)),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_internet_message_falls_back_to_english() {
        assert_eq!(no_internet_message(Some("xx")), NO_INTERNET_MESSAGES["en"]);
        assert_eq!(no_internet_message(Some("nl-BE")), NO_INTERNET_MESSAGES["nl"]);
        assert_eq!(no_internet_message(None), NO_INTERNET_MESSAGES["en"]);
    }

    #[test]
    fn embedded_json_extraction() {
        let response = HttpResponse {
            status: 200,
            headers: HashMap::from([(
                "content-type".to_string(),
                "text/html".to_string(),
            )]),
            body: br#"<html>{"exception":null,"result":{"id":"1"}}<body></body></html>"#.to_vec(),
        };

        let parsed = parse_response_body(&response).unwrap();
        assert_eq!(parsed["result"]["id"], "1");
    }

    #[test]
    fn unexpected_content_type_is_fatal() {
        let response = HttpResponse {
            status: 200,
            headers: HashMap::from([(
                "content-type".to_string(),
                "application/octet-stream".to_string(),
            )]),
            body: Vec::new(),
        };

        assert!(matches!(
            parse_response_body(&response),
            Err(ServiceError::InvalidContentType(_))
        ));
    }

    #[test]
    fn urlencode_reserved_characters() {
        assert_eq!(urlencode("a b/c"), "a%20b%2Fc");
    }
}
