use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::TelegramConfig;
use crate::error::RelayError;
use crate::relay::{FileResolver, ResultNotifier};
use crate::update::FileReference;

/// getFile ceiling of the public Bot API. The local gateway in local mode
/// serves from its temp storage and is not bound by it.
pub const PUBLIC_API_MAX_FILE_SIZE: u64 = 20 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct TgResponse<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TgFile {
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    file_size: Option<u64>,
}

/// HTTP client for the local Bot API gateway: resolves file references to
/// bytes and delivers result messages back to the chat.
#[derive(Clone)]
pub struct GatewayClient {
    client: reqwest::Client,
    config: TelegramConfig,
}

impl GatewayClient {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    fn file_url(&self, file_path: &str) -> String {
        format!(
            "{}/file/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token,
            file_path.trim_start_matches('/')
        )
    }

    /// Size gate applied before any network transfer. Without local mode
    /// the gateway is subject to the public getFile ceiling, so oversized
    /// files are unresolvable and we say so up-front.
    fn check_size(&self, declared_size: Option<u64>) -> Result<(), RelayError> {
        if self.config.local_mode {
            return Ok(());
        }
        match declared_size {
            Some(size) if size > PUBLIC_API_MAX_FILE_SIZE => Err(RelayError::Resolution(format!(
                "file is {} bytes but the Bot API caps getFile at {} bytes without local mode",
                size, PUBLIC_API_MAX_FILE_SIZE
            ))),
            _ => Ok(()),
        }
    }

    async fn get_file(&self, file_id: &str, mime_type: Option<&str>) -> Result<TgFile, RelayError> {
        let url = self.method_url("getFile");
        debug!(
            "getFile for {} ({})",
            file_id,
            mime_type.unwrap_or("unknown type")
        );
        let response = self
            .client
            .get(&url)
            .query(&[("file_id", file_id)])
            .send()
            .await
            .map_err(|e| RelayError::Resolution(format!("getFile request failed: {e}")))?;
        let body: TgResponse<TgFile> = response
            .json()
            .await
            .map_err(|e| RelayError::Resolution(format!("getFile returned invalid JSON: {e}")))?;
        into_file(body)
    }
}

/// The gateway reports missing or expired files as ok=false with a
/// description; both map to a terminal resolution failure.
fn into_file(body: TgResponse<TgFile>) -> Result<TgFile, RelayError> {
    if !body.ok {
        return Err(RelayError::Resolution(format!(
            "gateway rejected getFile: {}",
            body.description.unwrap_or_else(|| "no description".to_string())
        )));
    }
    match body.result {
        Some(file) if file.file_path.is_some() => Ok(file),
        _ => Err(RelayError::Resolution(
            "gateway returned no file_path; temp file likely expired".to_string(),
        )),
    }
}

#[async_trait]
impl FileResolver for GatewayClient {
    async fn resolve(&self, file: &FileReference) -> Result<Vec<u8>, RelayError> {
        self.check_size(file.declared_size)?;

        let meta = self
            .get_file(&file.file_id, file.mime_type.as_deref())
            .await?;
        // getFile may know a more accurate size than the update did.
        self.check_size(meta.file_size.or(file.declared_size))?;

        let file_path = meta.file_path.unwrap_or_default();
        let url = self.file_url(&file_path);
        debug!("Downloading {} ({} declared bytes)", file_path, file.declared_size.unwrap_or(0));

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RelayError::Resolution(format!("file download failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Resolution(format!(
                "file download failed with status {status}; temp file likely expired"
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RelayError::Resolution(format!("file download interrupted: {e}")))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ResultNotifier for GatewayClient {
    async fn notify(&self, chat_id: i64, text: &str) -> Result<(), RelayError> {
        let url = self.method_url("sendMessage");
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await
            .map_err(|e| RelayError::Notify(format!("sendMessage request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Notify(format!(
                "sendMessage failed ({status}): {body}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(local_mode: bool) -> GatewayClient {
        GatewayClient::new(TelegramConfig {
            bot_token: "123:abc".to_string(),
            api_base: "http://localhost:8080".to_string(),
            local_mode,
        })
    }

    #[test]
    fn test_30mb_file_passes_only_in_local_mode() {
        let thirty_mb = Some(30 * 1024 * 1024);
        assert!(client(true).check_size(thirty_mb).is_ok());
        let err = client(false).check_size(thirty_mb).unwrap_err();
        assert!(matches!(err, RelayError::Resolution(_)));
        assert!(err.to_string().contains("local mode"));
    }

    #[test]
    fn test_small_file_passes_without_local_mode() {
        assert!(client(false).check_size(Some(1024)).is_ok());
        // Unknown size is let through; getFile will be the judge.
        assert!(client(false).check_size(None).is_ok());
    }

    #[test]
    fn test_gateway_error_maps_to_resolution() {
        let body: TgResponse<TgFile> = serde_json::from_str(
            r#"{"ok": false, "error_code": 400, "description": "Bad Request: file not found"}"#,
        )
        .unwrap();
        let err = into_file(body).unwrap_err();
        assert!(matches!(err, RelayError::Resolution(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_missing_file_path_maps_to_resolution() {
        let body: TgResponse<TgFile> =
            serde_json::from_str(r#"{"ok": true, "result": {"file_id": "x"}}"#).unwrap();
        assert!(into_file(body).is_err());
    }

    #[test]
    fn test_ok_response_yields_file_path() {
        let body: TgResponse<TgFile> = serde_json::from_str(
            r#"{"ok": true, "result": {"file_path": "documents/file_1.ipa", "file_size": 42}}"#,
        )
        .unwrap();
        let file = into_file(body).unwrap();
        assert_eq!(file.file_path.as_deref(), Some("documents/file_1.ipa"));
        assert_eq!(file.file_size, Some(42));
    }

    #[test]
    fn test_urls_are_local_bot_api_shaped() {
        let c = client(true);
        assert_eq!(
            c.method_url("getFile"),
            "http://localhost:8080/bot123:abc/getFile"
        );
        assert_eq!(
            c.file_url("/var/lib/telegram-bot-api/123/documents/file_1.ipa"),
            "http://localhost:8080/file/bot123:abc/var/lib/telegram-bot-api/123/documents/file_1.ipa"
        );
    }
}
