/*!
Stub du cloud Meross HTTP

Sert `/v1/Auth/signIn` et `/v1/Device/devList` sur un port local éphémère.
Chaque requête est enregistrée avec le résultat de la vérification de signature,
pour que les tests puissent vérifier ce que le client a réellement envoyé.
*/

use anyhow::Result;
use axum::extract::{Form, State};
use axum::http::{header, HeaderMap};
use axum::routing::post;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use md5::{Digest, Md5};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const CLOUD_SECRET: &str = "23x17ahWarFH6w29";

const STATUS_WRONG_PASSWORD: i64 = 1004;
const STATUS_TOKEN_EXPIRED: i64 = 1019;
const STATUS_BAD_SIGNATURE: i64 = 1300;

/// Compte servi par le stub
#[derive(Debug, Clone, PartialEq)]
pub struct StubAccount {
    pub email: String,
    pub password: String,
    pub user_id: String,
    pub token: String,
    pub key: String,
    pub mqtt_domain: String,
}

impl StubAccount {
    pub fn new(email: &str, password: &str) -> Self {
        Self {
            email: email.to_string(),
            password: password.to_string(),
            user_id: "1001".to_string(),
            token: "stub-token-1".to_string(),
            key: "stub-key".to_string(),
            mqtt_domain: "mqtt-stub.local:2001".to_string(),
        }
    }
}

/// Une requête reçue par le stub
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub authorization: Option<String>,
    /// Paramètres décodés (base64 + JSON), `Null` si illisibles
    pub params: Value,
    pub signature_valid: bool,
}

#[derive(Debug, Deserialize)]
struct SignedForm {
    params: String,
    sign: String,
    timestamp: i64,
    nonce: String,
}

impl SignedForm {
    fn signature_valid(&self) -> bool {
        let expected = md5_hex(&format!("{}{}{}{}", CLOUD_SECRET, self.timestamp, self.nonce, self.params));
        expected == self.sign
    }

    fn decoded_params(&self) -> Value {
        BASE64
            .decode(&self.params)
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
            .unwrap_or(Value::Null)
    }
}

struct StubState {
    account: StubAccount,
    token_generation: u32,
    devices: Vec<Value>,
    requests: Vec<RecordedRequest>,
    base_url: String,
}

type SharedStub = Arc<Mutex<StubState>>;

/// Faux cloud Meross lancé sur 127.0.0.1
pub struct CloudStub {
    state: SharedStub,
    base_url: String,
    task: JoinHandle<()>,
}

impl CloudStub {
    pub async fn start(account: StubAccount) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base_url = format!("http://{}", listener.local_addr()?);

        let state: SharedStub = Arc::new(Mutex::new(StubState {
            account,
            token_generation: 1,
            devices: Vec::new(),
            requests: Vec::new(),
            base_url: base_url.clone(),
        }));

        let app = Router::new()
            .route("/v1/Auth/signIn", post(sign_in))
            .route("/v1/Device/devList", post(device_list))
            .with_state(state.clone());

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("[stub] server stopped: {}", e);
            }
        });

        log::info!("[stub] Meross cloud listening on {}", base_url);
        Ok(Self { state, base_url, task })
    }

    pub fn base_url(&self) -> String {
        self.base_url.clone()
    }

    /// Compte courant (le token change après `expire_tokens`)
    pub fn account(&self) -> StubAccount {
        self.lock().account.clone()
    }

    /// Remplace la liste renvoyée par devList
    pub fn set_devices(&self, devices: Vec<Value>) {
        self.lock().devices = devices;
    }

    /// Invalide le token courant, le prochain signIn en délivre un nouveau
    pub fn expire_tokens(&self) {
        let mut state = self.lock();
        state.token_generation += 1;
        state.account.token = format!("stub-token-{}", state.token_generation);
        log::info!("[stub] tokens expired, next token is {}", state.account.token);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for CloudStub {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

fn envelope(status: i64, info: &str, data: Value) -> Json<Value> {
    Json(json!({ "apiStatus": status, "info": info, "data": data }))
}

/// Enregistre la requête, renvoie les params décodés si la signature est bonne
fn record(state: &mut StubState, path: &str, headers: &HeaderMap, form: &SignedForm) -> Option<Value> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let signature_valid = form.signature_valid();
    let params = form.decoded_params();

    log::debug!("[stub] POST {} signature_valid={}", path, signature_valid);
    state.requests.push(RecordedRequest {
        path: path.to_string(),
        authorization,
        params: params.clone(),
        signature_valid,
    });

    signature_valid.then_some(params)
}

// POST /v1/Auth/signIn
async fn sign_in(State(state): State<SharedStub>, headers: HeaderMap, Form(form): Form<SignedForm>) -> Json<Value> {
    let mut state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let Some(params) = record(&mut state, "/v1/Auth/signIn", &headers, &form) else {
        return envelope(STATUS_BAD_SIGNATURE, "Invalid signature", Value::Null);
    };

    let account = &state.account;
    let email_ok = params["email"].as_str() == Some(account.email.as_str());
    let password_ok = params["password"].as_str() == Some(md5_hex(&account.password).as_str());
    if !email_ok || !password_ok {
        log::info!("[stub] sign-in rejected for {:?}", params["email"]);
        return envelope(STATUS_WRONG_PASSWORD, "Wrong email or password", Value::Null);
    }

    envelope(
        0,
        "Success",
        json!({
            "userid": account.user_id,
            "email": account.email,
            "token": account.token,
            "key": account.key,
            "domain": state.base_url,
            "mqttDomain": account.mqtt_domain,
        }),
    )
}

// POST /v1/Device/devList
async fn device_list(State(state): State<SharedStub>, headers: HeaderMap, Form(form): Form<SignedForm>) -> Json<Value> {
    let mut state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if record(&mut state, "/v1/Device/devList", &headers, &form).is_none() {
        return envelope(STATUS_BAD_SIGNATURE, "Invalid signature", Value::Null);
    }

    let expected = format!("Basic {}", state.account.token);
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    if !authorized {
        return envelope(STATUS_TOKEN_EXPIRED, "Token expired", Value::Null);
    }

    envelope(0, "Success", Value::Array(state.devices.clone()))
}
