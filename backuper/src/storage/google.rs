//! Google Drive backend (Drive v3 REST API, installed-app OAuth flow).

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use super::secrets::Secrets;
use super::{
    check_status, file_name, filter_backups, prompt, save_response, upload_body, BackendKind,
    StorageBackend,
};
use crate::utils::{BackuperError, Result};

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const REDIRECT_URI: &str = "http://localhost";
const SCOPE: &str = "https://www.googleapis.com/auth/drive.file";
const ROOT_QUERY: &str = "'root' in parents and trashed=false";

/// Tokens are refreshed this long before they actually expire
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Stored under `"google"` in the secrets file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleSecrets {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAuthError {
    error: String,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    name: String,
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

pub struct GoogleDrive {
    client: Client,
    secrets: GoogleSecrets,
    token: Mutex<Option<AccessToken>>,
}

impl GoogleDrive {
    pub fn new(client: Client, secrets: GoogleSecrets) -> Self {
        Self {
            client,
            secrets,
            token: Mutex::new(None),
        }
    }

    pub fn from_secrets(client: Client, secrets: Secrets) -> Result<Self> {
        let secrets: GoogleSecrets = serde_json::from_value(Value::Object(secrets))
            .map_err(|_| BackuperError::NotAuthorized(BackendKind::Google.to_string()))?;
        Ok(Self::new(client, secrets))
    }

    /// Current access token, refreshed when missing or about to expire
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + EXPIRY_MARGIN {
                return Ok(token.value.clone());
            }
        }

        debug!("Refreshing Google access token");
        let response = self
            .client
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.secrets.client_id.as_str()),
                ("client_secret", self.secrets.client_secret.as_str()),
                ("refresh_token", self.secrets.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;
        if response.status() == StatusCode::BAD_REQUEST || response.status() == StatusCode::UNAUTHORIZED {
            return Err(BackuperError::NotAuthorized(BackendKind::Google.to_string()));
        }
        let fresh: TokenResponse = check_status(response, "refreshing Google token")
            .await?
            .json()
            .await?;

        let token = AccessToken {
            value: fresh.access_token,
            expires_at: Instant::now() + Duration::from_secs(fresh.expires_in),
        };
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn list_root(&self, query: &str) -> Result<Vec<DriveFile>> {
        let token = self.access_token().await?;
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(FILES_URL)
                .bearer_auth(&token)
                .query(&[
                    ("q", query),
                    ("fields", "nextPageToken,files(id,name)"),
                    ("pageSize", "1000"),
                ]);
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page.as_str())]);
            }

            let page: FileList = check_status(request.send().await?, "listing Google Drive")
                .await?
                .json()
                .await?;
            files.extend(page.files);

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl StorageBackend for GoogleDrive {
    fn kind(&self) -> BackendKind {
        BackendKind::Google
    }

    async fn upload(&self, local_path: &Path) -> Result<()> {
        let name = file_name(local_path)?;
        let token = self.access_token().await?;

        let session = self
            .client
            .post(UPLOAD_URL)
            .bearer_auth(&token)
            .query(&[("uploadType", "resumable")])
            .json(&json!({ "name": name, "parents": ["root"] }))
            .send()
            .await?;
        let session = check_status(session, "starting Google Drive upload").await?;
        let location = session
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| BackuperError::Storage("Google Drive returned no upload session".to_string()))?;

        let (body, size) = upload_body(local_path).await?;
        let response = self
            .client
            .put(location)
            .header(reqwest::header::CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await?;
        check_status(response, "uploading to Google Drive").await?;

        info!("Uploaded {} to Google Drive", name);
        Ok(())
    }

    async fn list_of_files(&self) -> Result<Vec<String>> {
        let files = self.list_root(ROOT_QUERY).await?;
        Ok(filter_backups(files.into_iter().map(|file| file.name)))
    }

    async fn download(&self, name: &str, dest_dir: &Path) -> Result<PathBuf> {
        let query = format!("name = '{}' and {}", escape_query(name), ROOT_QUERY);
        let file = self
            .list_root(&query)
            .await?
            .into_iter()
            .find(|file| file.name == name)
            .ok_or_else(|| BackuperError::FileNotFound(name.to_string()))?;

        let token = self.access_token().await?;
        let response = self
            .client
            .get(format!("{}/{}", FILES_URL, file.id))
            .bearer_auth(&token)
            .query(&[("alt", "media")])
            .send()
            .await?;
        let response = check_status(response, "downloading from Google Drive").await?;

        let dest = dest_dir.join(name);
        save_response(response, &dest).await?;
        debug!("Downloaded {} to {}", name, dest.display());
        Ok(dest)
    }
}

/// Installed-app flow: the user opens the consent page and pastes back the
/// code (or the whole redirect URL).
pub async fn authenticate(client: &Client) -> Result<Secrets> {
    let client_id = prompt("Enter client id: ")?;
    let client_secret = prompt("Enter client secret: ")?;

    if !client_credentials_valid(client, &client_id, &client_secret).await? {
        return Err(BackuperError::Authentication(
            "client id or secret was rejected".to_string(),
        ));
    }

    println!("Go to the following url: {}", consent_url(&client_id)?);
    let code = extract_code(&prompt("Enter the authorization code: ")?);

    let response = client
        .post(TOKEN_URL)
        .form(&[
            ("code", code.as_str()),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await?;
    if response.status() == StatusCode::BAD_REQUEST {
        return Err(BackuperError::Authentication("Bad code".to_string()));
    }
    let token: TokenResponse = check_status(response, "exchanging authorization code")
        .await?
        .json()
        .await?;
    let refresh_token = token.refresh_token.ok_or_else(|| {
        BackuperError::Authentication("Google did not return a refresh token".to_string())
    })?;

    let secrets = serde_json::to_value(GoogleSecrets {
        client_id,
        client_secret,
        refresh_token,
    })?;
    match secrets {
        Value::Object(map) => Ok(map),
        _ => Err(BackuperError::Authentication("unexpected secrets shape".to_string())),
    }
}

/// A refresh with a dummy token fails with `invalid_grant` only when the
/// client itself is known to Google.
async fn client_credentials_valid(client: &Client, client_id: &str, client_secret: &str) -> Result<bool> {
    let response = client
        .post(TOKEN_URL)
        .form(&[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("refresh_token", "dummy"),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .await?;
    if response.status() != StatusCode::BAD_REQUEST {
        return Ok(false);
    }
    let error: OAuthError = response.json().await?;
    Ok(error.error == "invalid_grant")
}

fn consent_url(client_id: &str) -> Result<Url> {
    Url::parse_with_params(
        AUTH_URL,
        &[
            ("client_id", client_id),
            ("redirect_uri", REDIRECT_URI),
            ("response_type", "code"),
            ("scope", SCOPE),
            ("access_type", "offline"),
            ("prompt", "consent"),
        ],
    )
    .map_err(|e| BackuperError::Authentication(e.to_string()))
}

fn extract_code(input: &str) -> String {
    Url::parse(input)
        .ok()
        .and_then(|url| {
            url.query_pairs()
                .find(|(key, _)| key == "code")
                .map(|(_, value)| value.into_owned())
        })
        .unwrap_or_else(|| input.trim().to_string())
}

fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
