//! Interactive phone authentication.
//!
//! Flow: `request_code` (phone in, temporary token out), then `sign_in`
//! with the texted code, or `register` when the account does not exist
//! yet. Both finish by logging in with the earned session token.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};

use oneme_wire::Opcode;

use crate::client::{login_payload, Client, ConnectionState, Inner};
use crate::error::{Error, Result};
use crate::event::Event;

static PHONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?\d{10,15}$").expect("phone pattern is valid"));

/// International phone number, optional leading `+`, 10 to 15 digits.
pub(crate) fn is_valid_phone(phone: &str) -> bool {
    PHONE_PATTERN.is_match(phone)
}

fn is_valid_code(code: &str) -> bool {
    code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit())
}

impl Client {
    /// Ask the service to text a verification code to the configured
    /// phone number. The phone is validated before anything goes on the
    /// wire.
    pub async fn request_code(&self) -> Result<()> {
        let phone = self
            .inner
            .session
            .lock()
            .phone
            .clone()
            .ok_or_else(|| Error::Auth("no phone number configured".into()))?;
        if !is_valid_phone(&phone) {
            return Err(Error::Auth(format!("invalid phone number {phone:?}")));
        }

        let payload = json!({
            "phone": phone,
            "type": "START_AUTH",
            "language": self.inner.cfg.device.locale,
        });
        let reply = self
            .inner
            .request(Opcode::AuthRequest, payload, self.inner.cfg.request_timeout)
            .await?;

        let token = reply
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol("auth response carried no token".into()))?;
        self.inner.session.lock().temp_token = Some(token.to_string());
        tracing::info!("verification code requested");
        Ok(())
    }

    /// Submit the verification code. On success the session token is
    /// persisted and login completes; the client ends up `Connected`.
    ///
    /// An account that does not exist yet fails with an auth error and
    /// keeps the temporary token, so [`register`](Client::register) can
    /// follow directly.
    pub async fn sign_in(&self, code: &str) -> Result<()> {
        if !is_valid_code(code) {
            return Err(Error::Auth("verification code must be 6 digits".into()));
        }
        let temp = self
            .inner
            .session
            .lock()
            .temp_token
            .clone()
            .ok_or_else(|| Error::Auth("request_code must run first".into()))?;

        let payload = json!({
            "token": temp,
            "verifyCode": code,
            "authTokenType": "CHECK_CODE",
        });
        let reply = self
            .inner
            .request(Opcode::Auth, payload, self.inner.cfg.request_timeout)
            .await?;

        match reply
            .pointer("/tokenAttrs/LOGIN/token")
            .and_then(Value::as_str)
        {
            Some(token) => {
                let token = token.to_string();
                self.inner.complete_sign_in(&token).await
            }
            None => Err(Error::Auth(
                "account is not registered; call register()".into(),
            )),
        }
    }

    /// Create an account for the phone, then complete login. Only valid
    /// after `sign_in` reported an unregistered account.
    pub async fn register(&self, first_name: &str, last_name: Option<&str>) -> Result<()> {
        let temp = self
            .inner
            .session
            .lock()
            .temp_token
            .clone()
            .ok_or_else(|| Error::Auth("request_code must run first".into()))?;

        let mut payload = json!({
            "token": temp,
            "firstName": first_name,
            "authTokenType": "REGISTER",
        });
        if let Some(last) = last_name {
            payload["lastName"] = json!(last);
        }
        let reply = self
            .inner
            .request(Opcode::Auth, payload, self.inner.cfg.request_timeout)
            .await?;

        let token = reply
            .pointer("/tokenAttrs/LOGIN/token")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol("register response carried no login token".into()))?;
        let token = token.to_string();
        self.inner.complete_sign_in(&token).await
    }
}

impl Inner {
    /// Keep the earned session token, persist it and bring the session
    /// fully up.
    pub(crate) async fn complete_sign_in(&self, token: &str) -> Result<()> {
        {
            let mut session = self.session.lock();
            session.token = Some(token.to_string());
            session.temp_token = None;
        }
        self.persist_session();

        let reply = self
            .request(Opcode::Login, login_payload(token), self.cfg.request_timeout)
            .await?;
        self.apply_login(&reply);
        self.set_state(ConnectionState::Connected);
        self.registry.dispatch(&Event::Ready);
        Ok(())
    }
}
