//! Signed, client-held session cookie
//!
//! The session never lives on the server. Its fields are serialized to JSON,
//! signed with HMAC-SHA256 under the configured key and stored in a cookie
//! as `base64url(payload).base64url(mac)`. An expiry is embedded in the
//! payload so a replayed old cookie stops working after seven days even if
//! the browser ignores `Max-Age`.

use crate::auth::UserInfo;
use crate::config::{MIN_SESSION_KEY_LEN, ServerConfig};
use crate::error::{ConfigError, SessionError};
use crate::http::request::Request;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE_NAME: &str = "cas_gateway_session";

/// Seven days
pub const SESSION_MAX_AGE_SECS: i64 = 7 * 24 * 60 * 60;

const EXPIRED_DATE: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// Authentication state carried by the cookie
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub oaid: String,
    #[serde(
        rename = "employeeName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub employee_name: Option<String>,
}

impl Session {
    pub fn for_user(user: &UserInfo) -> Self {
        Self {
            authenticated: true,
            oaid: user.oaid.clone(),
            employee_name: user.employee_name.clone().filter(|n| !n.is_empty()),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SignedPayload {
    #[serde(flatten)]
    session: Session,
    exp: i64,
}

/// Encodes and verifies session cookies
#[derive(Clone)]
pub struct SessionCodec {
    key: Vec<u8>,
    secure: bool,
}

impl fmt::Debug for SessionCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCodec")
            .field("key", &"<redacted>")
            .field("secure", &self.secure)
            .finish()
    }
}

impl SessionCodec {
    pub fn new(key: impl AsRef<[u8]>, secure: bool) -> Result<Self, ConfigError> {
        let key = key.as_ref();
        if key.len() < MIN_SESSION_KEY_LEN {
            return Err(ConfigError::SessionKeyTooShort {
                min: MIN_SESSION_KEY_LEN,
                actual: key.len(),
            });
        }
        Ok(Self {
            key: key.to_vec(),
            secure,
        })
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self, ConfigError> {
        Self::new(config.session_key.as_bytes(), config.secure_cookie)
    }

    fn mac(&self) -> Result<HmacSha256, SessionError> {
        HmacSha256::new_from_slice(&self.key).map_err(|_| SessionError::Signature)
    }

    /// Cookie value for `session`, valid for seven days from now
    pub fn encode(&self, session: &Session) -> Result<String, SessionError> {
        self.encode_at(session, chrono::Utc::now().timestamp())
    }

    pub fn encode_at(&self, session: &Session, now: i64) -> Result<String, SessionError> {
        let payload = SignedPayload {
            session: session.clone(),
            exp: now + SESSION_MAX_AGE_SECS,
        };
        let json =
            serde_json::to_vec(&payload).map_err(|e| SessionError::Payload(e.to_string()))?;
        let body = URL_SAFE_NO_PAD.encode(json);

        let mut mac = self.mac()?;
        mac.update(body.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{body}.{signature}"))
    }

    pub fn decode(&self, value: &str) -> Result<Session, SessionError> {
        self.decode_at(value, chrono::Utc::now().timestamp())
    }

    pub fn decode_at(&self, value: &str, now: i64) -> Result<Session, SessionError> {
        let (body, signature) = value.trim().split_once('.').ok_or(SessionError::Format)?;
        if body.is_empty() || signature.is_empty() {
            return Err(SessionError::Format);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| SessionError::Encoding)?;
        let mut mac = self.mac()?;
        mac.update(body.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| SessionError::Signature)?;

        let json = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| SessionError::Encoding)?;
        let payload: SignedPayload =
            serde_json::from_slice(&json).map_err(|e| SessionError::Payload(e.to_string()))?;

        if payload.exp <= now {
            return Err(SessionError::Expired);
        }
        Ok(payload.session)
    }

    /// Session carried by the request; an absent cookie is an empty session
    pub fn read(&self, request: &Request) -> Result<Session, SessionError> {
        match cookie_value(request, SESSION_COOKIE_NAME) {
            Some(value) if !value.is_empty() => self.decode(value),
            _ => Ok(Session::default()),
        }
    }

    /// `Set-Cookie` value establishing `session`
    pub fn set_cookie(&self, session: &Session) -> Result<String, SessionError> {
        let value = self.encode(session)?;
        let expires = (chrono::Utc::now() + chrono::Duration::seconds(SESSION_MAX_AGE_SECS))
            .format("%a, %d %b %Y %H:%M:%S GMT");
        Ok(format!(
            "{SESSION_COOKIE_NAME}={value}; Path=/; Max-Age={SESSION_MAX_AGE_SECS}; Expires={expires}; HttpOnly; SameSite=Lax{}",
            self.secure_attr()
        ))
    }

    /// `Set-Cookie` value that empties and expires the session immediately
    pub fn clear_cookie(&self) -> String {
        format!(
            "{SESSION_COOKIE_NAME}=; Path=/; Max-Age=0; Expires={EXPIRED_DATE}; HttpOnly; SameSite=Lax{}",
            self.secure_attr()
        )
    }

    fn secure_attr(&self) -> &'static str {
        if self.secure { "; Secure" } else { "" }
    }
}

/// First value of cookie `name` across all `Cookie` headers
pub fn cookie_value<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request
        .headers
        .get_all("Cookie")
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| k.trim() == name)
        .map(|(_, v)| v.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn expiry_is_enforced() {
        let codec = SessionCodec::new(KEY, false).unwrap();
        let session = Session {
            authenticated: true,
            oaid: "u1".to_string(),
            employee_name: None,
        };
        let value = codec.encode_at(&session, 1_000).unwrap();

        assert_eq!(codec.decode_at(&value, 1_000 + 60).unwrap(), session);
        assert_eq!(
            codec.decode_at(&value, 1_000 + SESSION_MAX_AGE_SECS),
            Err(SessionError::Expired)
        );
    }

    #[test]
    fn short_key_is_rejected() {
        assert!(SessionCodec::new(b"short", false).is_err());
    }
}
