//! Delegated-signer session
//!
//! A `Session` is passed explicitly to every component that acts on behalf of
//! the user. It carries the relay wallet's signer handle and the session
//! credential whose presence and expiry gate every flow.

use crate::error::AuthorizationError;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Abilities the delegated signer may be granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Ability {
    Swap,
    Bridge,
    VaultDeposit,
    VaultWithdraw,
    Transfer,
}

impl Ability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ability::Swap => "swap",
            Ability::Bridge => "bridge",
            Ability::VaultDeposit => "vault-deposit",
            Ability::VaultWithdraw => "vault-withdraw",
            Ability::Transfer => "transfer",
        }
    }
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle on the delegated signing wallet (the relay wallet)
pub trait DelegatedSigner: Send + Sync {
    fn address(&self) -> Address;

    fn permits(&self, ability: Ability) -> bool;
}

/// Signer whose permissions are fixed at startup from configuration
#[derive(Debug, Clone)]
pub struct StaticSigner {
    address: Address,
    permitted: HashSet<Ability>,
}

impl StaticSigner {
    pub fn new(address: Address, permitted: impl IntoIterator<Item = Ability>) -> Self {
        Self {
            address,
            permitted: permitted.into_iter().collect(),
        }
    }
}

impl DelegatedSigner for StaticSigner {
    fn address(&self) -> Address {
        self.address
    }

    fn permits(&self, ability: Ability) -> bool {
        self.permitted.contains(&ability)
    }
}

/// Bearer credential for the delegated-signer service
#[derive(Clone)]
pub struct SessionCredential {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct JwtClaims {
    exp: i64,
}

impl SessionCredential {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Build a credential from a JWT, reading the expiry from its `exp` claim
    pub fn from_jwt(token: &str) -> Result<Self, AuthorizationError> {
        let payload = token
            .split('.')
            .nth(1)
            .ok_or_else(|| AuthorizationError::MalformedCredential("not a JWT".into()))?;

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| AuthorizationError::MalformedCredential(e.to_string()))?;

        let claims: JwtClaims = serde_json::from_slice(&bytes)
            .map_err(|e| AuthorizationError::MalformedCredential(e.to_string()))?;

        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or_else(|| AuthorizationError::MalformedCredential("exp out of range".into()))?;

        Ok(Self::new(token, expires_at))
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Signer handle plus credential, cloned into each component that needs it
#[derive(Clone)]
pub struct Session {
    signer: Arc<dyn DelegatedSigner>,
    credential: Option<SessionCredential>,
}

impl Session {
    pub fn new(signer: Arc<dyn DelegatedSigner>, credential: Option<SessionCredential>) -> Self {
        Self { signer, credential }
    }

    pub fn relay_address(&self) -> Address {
        self.signer.address()
    }

    pub fn credential(&self) -> Option<&SessionCredential> {
        self.credential.as_ref()
    }

    /// Refuse to act without a live credential
    pub fn authorize(&self, now: DateTime<Utc>) -> Result<&SessionCredential, AuthorizationError> {
        let credential = self
            .credential
            .as_ref()
            .ok_or(AuthorizationError::MissingCredential)?;

        if credential.expires_at <= now {
            return Err(AuthorizationError::Expired {
                expired_at: credential.expires_at,
            });
        }

        Ok(credential)
    }

    /// Check that every listed ability has been granted
    pub fn require_abilities(&self, abilities: &[Ability]) -> Result<(), AuthorizationError> {
        match abilities.iter().find(|a| !self.signer.permits(**a)) {
            Some(missing) => Err(AuthorizationError::AbilityNotPermitted(*missing)),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("relay_address", &self.relay_address())
            .field("credential", &self.credential)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn jwt_with_exp(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"ES256K","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{},"sub":"pkp"}}"#, exp));
        format!("{}.{}.signature", header, payload)
    }

    fn signer() -> Arc<dyn DelegatedSigner> {
        Arc::new(StaticSigner::new(
            Address::repeat_byte(0x22),
            [Ability::Swap, Ability::Bridge],
        ))
    }

    #[test]
    fn reads_expiry_from_jwt() {
        let credential = SessionCredential::from_jwt(&jwt_with_exp(1_900_000_000)).unwrap();
        assert_eq!(credential.expires_at().timestamp(), 1_900_000_000);
    }

    #[test]
    fn rejects_token_without_payload() {
        let err = SessionCredential::from_jwt("opaque-token").unwrap_err();
        assert!(matches!(err, AuthorizationError::MalformedCredential(_)));
    }

    #[test]
    fn missing_credential_is_refused() {
        let session = Session::new(signer(), None);
        assert_eq!(
            session.authorize(Utc::now()).unwrap_err(),
            AuthorizationError::MissingCredential
        );
    }

    #[test]
    fn expired_credential_is_refused() {
        let now = Utc::now();
        let expired_at = now - Duration::minutes(1);
        let session = Session::new(signer(), Some(SessionCredential::new("t", expired_at)));

        assert_eq!(
            session.authorize(now).unwrap_err(),
            AuthorizationError::Expired { expired_at }
        );
    }

    #[test]
    fn live_credential_is_accepted() {
        let now = Utc::now();
        let session = Session::new(
            signer(),
            Some(SessionCredential::new("t", now + Duration::hours(1))),
        );
        assert_eq!(session.authorize(now).unwrap().token(), "t");
    }

    #[test]
    fn reports_first_missing_ability() {
        let session = Session::new(signer(), None);
        assert!(session
            .require_abilities(&[Ability::Swap, Ability::Bridge])
            .is_ok());
        assert_eq!(
            session
                .require_abilities(&[Ability::Swap, Ability::VaultDeposit])
                .unwrap_err(),
            AuthorizationError::AbilityNotPermitted(Ability::VaultDeposit)
        );
    }
}
