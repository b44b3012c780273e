use chrono::{TimeZone, Utc};
use serde::Deserialize;

/// One inbound event from the gateway, in Telegram's webhook shape.
/// Unknown fields are ignored so gateway upgrades don't break ingress.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    /// Unix timestamp assigned by Telegram.
    pub date: i64,
    pub chat: Chat,
    #[serde(default)]
    pub document: Option<Document>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// File attachment metadata as delivered in the update. The bytes live
/// in the gateway's temp storage until resolved.
#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

impl Update {
    /// The attachment to relay, if this update carries one.
    pub fn file_reference(&self) -> Option<FileReference> {
        let msg = self.message.as_ref()?;
        let doc = msg.document.as_ref()?;
        Some(FileReference {
            file_id: doc.file_id.clone(),
            file_name: sanitize_file_name(doc.file_name.as_deref()),
            mime_type: doc.mime_type.clone(),
            declared_size: doc.file_size,
        })
    }

    pub fn chat_id(&self) -> Option<i64> {
        self.message.as_ref().map(|m| m.chat.id)
    }
}

/// Transient handle to a gateway-owned file.
#[derive(Debug, Clone)]
pub struct FileReference {
    pub file_id: String,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub declared_size: Option<u64>,
}

/// Where an upload lands in the repository and under which commit message.
///
/// Derived deterministically from the update so a redelivered update maps
/// to the same path; [`UploadTarget::regenerate`] breaks out of a genuine
/// path collision with a fresh suffix.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadTarget {
    pub path: String,
    pub branch: String,
    pub commit_message: String,
}

impl UploadTarget {
    pub fn derive(update: &Update, file: &FileReference, prefix: &str, branch: &str) -> Self {
        let msg = update.message.as_ref();
        let date = msg
            .and_then(|m| Utc.timestamp_opt(m.date, 0).single())
            .unwrap_or_else(Utc::now);
        let chat_id = msg.map(|m| m.chat.id).unwrap_or_default();
        let path = format!(
            "{}/{}/{}-{}",
            prefix.trim_matches('/'),
            date.format("%Y%m%d"),
            update.update_id,
            file.file_name,
        );
        UploadTarget {
            path,
            branch: branch.to_string(),
            commit_message: format!(
                "Upload {} from chat {} (update {})",
                file.file_name, chat_id, update.update_id
            ),
        }
    }

    /// New unique target after a path conflict. Keeps branch and message,
    /// appends a short random suffix before the extension-less tail.
    pub fn regenerate(&self) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        UploadTarget {
            path: format!("{}-{}", self.path, &suffix[..8]),
            branch: self.branch.clone(),
            commit_message: self.commit_message.clone(),
        }
    }
}

/// Outcome of one publish, reported back to the chat.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadResult {
    Published { commit_sha: String, path: String },
    /// Redelivery hit a path that already holds identical content.
    AlreadyPublished { blob_sha: String, path: String },
}

/// Keep repo paths flat and shell-safe: path separators and anything
/// outside [A-Za-z0-9._-] collapse to '_'; empty names fall back to
/// "file.bin".
pub fn sanitize_file_name(name: Option<&str>) -> String {
    let name = name.unwrap_or("").trim();
    if name.is_empty() {
        return "file.bin".to_string();
    }
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    // A name of only separators/dots would vanish into noise.
    if cleaned.chars().all(|c| c == '_' || c == '.') {
        "file.bin".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_update(update_id: i64, file_name: &str) -> Update {
        serde_json::from_value(serde_json::json!({
            "update_id": update_id,
            "message": {
                "message_id": 7,
                "date": 1700000000,
                "chat": { "id": 42, "type": "private" },
                "document": {
                    "file_id": "BQACAgUAAx",
                    "file_unique_id": "AgADFgQ",
                    "file_name": file_name,
                    "mime_type": "application/octet-stream",
                    "file_size": 1024
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_parses_real_webhook_shape() {
        let update = sample_update(100, "app.ipa");
        let file = update.file_reference().unwrap();
        assert_eq!(file.file_id, "BQACAgUAAx");
        assert_eq!(file.file_name, "app.ipa");
        assert_eq!(file.mime_type.as_deref(), Some("application/octet-stream"));
        assert_eq!(file.declared_size, Some(1024));
        assert_eq!(update.chat_id(), Some(42));
    }

    #[test]
    fn test_text_only_update_has_no_file() {
        let update: Update = serde_json::from_value(serde_json::json!({
            "update_id": 5,
            "message": {
                "message_id": 1,
                "date": 1700000000,
                "chat": { "id": 42 },
                "text": "hello"
            }
        }))
        .unwrap();
        assert!(update.file_reference().is_none());
    }

    #[test]
    fn test_target_is_deterministic_per_update() {
        let update = sample_update(100, "app.ipa");
        let file = update.file_reference().unwrap();
        let a = UploadTarget::derive(&update, &file, "uploads", "main");
        let b = UploadTarget::derive(&update, &file, "uploads", "main");
        assert_eq!(a, b);
        // 2023-11-14 is the date of the fixed timestamp above.
        assert_eq!(a.path, "uploads/20231114/100-app.ipa");
        assert_eq!(a.branch, "main");
    }

    #[test]
    fn test_targets_unique_across_updates() {
        let u1 = sample_update(100, "app.ipa");
        let u2 = sample_update(101, "app.ipa");
        let f1 = u1.file_reference().unwrap();
        let f2 = u2.file_reference().unwrap();
        let t1 = UploadTarget::derive(&u1, &f1, "uploads", "main");
        let t2 = UploadTarget::derive(&u2, &f2, "uploads", "main");
        assert_ne!(t1.path, t2.path);
    }

    #[test]
    fn test_regenerate_changes_path_only() {
        let update = sample_update(100, "app.ipa");
        let file = update.file_reference().unwrap();
        let target = UploadTarget::derive(&update, &file, "uploads", "main");
        let fresh = target.regenerate();
        assert_ne!(fresh.path, target.path);
        assert!(fresh.path.starts_with(&target.path));
        assert_eq!(fresh.branch, target.branch);
        assert_eq!(fresh.commit_message, target.commit_message);
        // Two regenerations diverge from each other too.
        assert_ne!(target.regenerate().path, fresh.path);
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name(Some("app.ipa")), "app.ipa");
        assert_eq!(sanitize_file_name(Some("../../etc/passwd")), ".._.._etc_passwd");
        assert_eq!(sanitize_file_name(Some("my file (1).zip")), "my_file__1_.zip");
        assert_eq!(sanitize_file_name(Some("")), "file.bin");
        assert_eq!(sanitize_file_name(None), "file.bin");
        assert_eq!(sanitize_file_name(Some("///")), "file.bin");
    }
}
