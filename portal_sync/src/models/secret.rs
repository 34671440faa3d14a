//! portal.secret — encrypted cloud credentials, and their decrypted form.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredSecret {
    pub id: Uuid,
    pub name: String,
    pub provider: String,
    /// `nonce || ciphertext || tag`, see [`crate::services::vault`].
    #[serde(skip_serializing)]
    pub encrypted_value: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudCredential {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

impl fmt::Debug for CloudCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudCredential")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_key_material() {
        let cred = CloudCredential {
            access_key_id: "AKIAEXAMPLE".into(),
            secret_access_key: "wJalrXUtnFEMI".into(),
            session_token: Some("FQoGZXIvYXdzE".into()),
        };
        let out = format!("{cred:?}");
        assert!(out.contains("AKIAEXAMPLE"));
        assert!(!out.contains("wJalrXUtnFEMI"));
        assert!(!out.contains("FQoGZXIvYXdzE"));
    }
}
