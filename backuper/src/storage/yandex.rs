//! Yandex Disk backend over the public REST API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::secrets::Secrets;
use super::{
    check_status, file_name, filter_backups, prompt, save_response, upload_body, BackendKind,
    StorageBackend,
};
use crate::utils::{BackuperError, Result};

const API_URL: &str = "https://cloud-api.yandex.net/v1/disk";
const OAUTH_URL: &str = "https://oauth.yandex.ru";
const LIST_LIMIT: u32 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppInfo {
    pub app_id: String,
    pub app_secret: String,
}

/// Stored under `"yandex"` in the secrets file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YandexSecrets {
    pub app_info: AppInfo,
    pub token: String,
}

/// Upload/download link handed out by the API
#[derive(Debug, Deserialize)]
struct Link {
    href: String,
}

#[derive(Debug, Deserialize)]
struct ResourceList {
    #[serde(rename = "_embedded")]
    embedded: Option<Embedded>,
}

#[derive(Debug, Deserialize)]
struct Embedded {
    #[serde(default)]
    items: Vec<Resource>,
}

#[derive(Debug, Deserialize)]
struct Resource {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct YandexDisk {
    client: Client,
    token: String,
}

impl YandexDisk {
    pub fn new(client: Client, token: impl Into<String>) -> Self {
        Self {
            client,
            token: token.into(),
        }
    }

    pub fn from_secrets(client: Client, secrets: Secrets) -> Result<Self> {
        let secrets: YandexSecrets = serde_json::from_value(Value::Object(secrets))
            .map_err(|_| BackuperError::NotAuthorized(BackendKind::Yandex.to_string()))?;
        Ok(Self::new(client, secrets.token))
    }

    fn auth_header(&self) -> String {
        format!("OAuth {}", self.token)
    }

    async fn link(&self, endpoint: &str, query: &[(&str, &str)], action: &str) -> Result<Link> {
        let response = self
            .client
            .get(format!("{}/resources/{}", API_URL, endpoint))
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .query(query)
            .send()
            .await?;
        Ok(check_status(response, action).await?.json().await?)
    }
}

#[async_trait]
impl StorageBackend for YandexDisk {
    fn kind(&self) -> BackendKind {
        BackendKind::Yandex
    }

    async fn upload(&self, local_path: &Path) -> Result<()> {
        let name = file_name(local_path)?;
        let remote = format!("/{}", name);
        let link = self
            .link(
                "upload",
                &[("path", remote.as_str()), ("overwrite", "true")],
                "requesting upload link",
            )
            .await?;

        let (body, size) = upload_body(local_path).await?;
        let response = self
            .client
            .put(&link.href)
            .header(reqwest::header::CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await?;
        check_status(response, "uploading to Yandex Disk").await?;

        info!("Uploaded {} to Yandex Disk", name);
        Ok(())
    }

    async fn list_of_files(&self) -> Result<Vec<String>> {
        let limit = LIST_LIMIT.to_string();
        let response = self
            .client
            .get(format!("{}/resources", API_URL))
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .query(&[
                ("path", "/"),
                ("limit", limit.as_str()),
                ("fields", "_embedded.items.name"),
            ])
            .send()
            .await?;
        let listing: ResourceList = check_status(response, "listing Yandex Disk")
            .await?
            .json()
            .await?;

        let names = listing
            .embedded
            .map(|embedded| embedded.items)
            .unwrap_or_default()
            .into_iter()
            .map(|resource| resource.name);
        Ok(filter_backups(names))
    }

    async fn download(&self, name: &str, dest_dir: &Path) -> Result<PathBuf> {
        let remote = format!("/{}", name);
        let response = self
            .client
            .get(format!("{}/resources/download", API_URL))
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .query(&[("path", remote.as_str())])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(BackuperError::FileNotFound(name.to_string()));
        }
        let link: Link = check_status(response, "requesting download link")
            .await?
            .json()
            .await?;

        let response = self.client.get(&link.href).send().await?;
        let response = check_status(response, "downloading from Yandex Disk").await?;

        let dest = dest_dir.join(name);
        save_response(response, &dest).await?;
        debug!("Downloaded {} to {}", name, dest.display());
        Ok(dest)
    }
}

/// Confirmation-code flow. App credentials already on file are reused.
pub async fn authenticate(client: &Client, existing: Secrets) -> Result<Secrets> {
    let app_info = match existing.get("app_info").cloned() {
        Some(value) => serde_json::from_value::<AppInfo>(value)?,
        None => AppInfo {
            app_id: prompt("Enter app id: ")?,
            app_secret: prompt("Enter app secret: ")?,
        },
    };

    println!(
        "Go to the following url: {}/authorize?response_type=code&client_id={}",
        OAUTH_URL, app_info.app_id
    );
    let code = prompt("Enter the confirmation code: ")?;

    let response = client
        .post(format!("{}/token", OAUTH_URL))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("client_id", app_info.app_id.as_str()),
            ("client_secret", app_info.app_secret.as_str()),
        ])
        .send()
        .await?;
    if response.status() == StatusCode::BAD_REQUEST {
        return Err(BackuperError::Authentication("Bad code".to_string()));
    }
    let token: TokenResponse = check_status(response, "exchanging confirmation code")
        .await?
        .json()
        .await?;

    let secrets = serde_json::to_value(YandexSecrets {
        app_info,
        token: token.access_token,
    })?;
    match secrets {
        Value::Object(map) => Ok(map),
        _ => Err(BackuperError::Authentication("unexpected secrets shape".to_string())),
    }
}
