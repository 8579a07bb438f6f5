//! Identity token issuance, validation and refresh.
//!
//! Tokens are HS256 JWTs. Lifetime and binding come from the bundle's
//! [`TokenPolicy`]; the only shared state consulted is the revocation set,
//! and only when reuse detection is enabled.

use crate::clock::seconds;
use crate::{Clock, Identity, IdentityClaims, Role, TokenBinding, TokenPolicy};
use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use taskward_error::{AuthenticationError, AuthenticationErrorKind};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// JWT payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenClaims {
    sub: String,
    org: String,
    role: Role,
    iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ip: Option<IpAddr>,
    jti: String,
    fam: String,
}

/// Where a token stands with respect to rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RevocationStatus {
    Active,
    RotatedOut,
    FamilyRevoked,
}

/// Rotated-out token ids and revoked rotation families.
///
/// Sharded maps give per-key isolation between unrelated tenants.
#[derive(Debug, Default)]
pub struct RevocationSet {
    /// Rotated-out token id -> instant after which it would have expired anyway
    rotated: DashMap<String, DateTime<Utc>>,
    /// Revoked family id -> instant after which every member has expired
    families: DashMap<String, DateTime<Utc>>,
}

impl RevocationSet {
    fn status(&self, claims: &TokenClaims) -> RevocationStatus {
        if self.families.contains_key(&claims.fam) {
            RevocationStatus::FamilyRevoked
        } else if self.rotated.contains_key(&claims.jti) {
            RevocationStatus::RotatedOut
        } else {
            RevocationStatus::Active
        }
    }

    /// Mark `jti` rotated out. Returns `false` if another refresh already claimed it.
    fn claim_rotation(&self, jti: &str, expires_at: DateTime<Utc>) -> bool {
        match self.rotated.entry(jti.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(expires_at);
                true
            }
        }
    }

    fn release_rotation(&self, jti: &str) {
        self.rotated.remove(jti);
    }

    fn revoke_family(&self, family: &str, expires_at: DateTime<Utc>) {
        self.families
            .entry(family.to_string())
            .and_modify(|existing| {
                if *existing < expires_at {
                    *existing = expires_at;
                }
            })
            .or_insert(expires_at);
    }

    /// Number of tracked entries.
    pub fn len(&self) -> usize {
        self.rotated.len() + self.families.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries whose tokens can no longer validate anyway.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.len();
        self.rotated.retain(|_, expires_at| *expires_at > now);
        self.families.retain(|_, expires_at| *expires_at > now);
        before - self.len()
    }
}

/// Issues, validates and refreshes identity tokens under one [`TokenPolicy`].
#[derive(derive_getters::Getters)]
pub struct TokenService {
    policy: TokenPolicy,
    #[getter(skip)]
    encoding_key: EncodingKey,
    #[getter(skip)]
    decoding_key: DecodingKey,
    #[getter(skip)]
    validation: Validation,
    revocations: RevocationSet,
    #[getter(skip)]
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("policy", &self.policy)
            .field("revocations", &self.revocations.len())
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// Create a token service signing with `secret`.
    pub fn new(policy: TokenPolicy, secret: &[u8], clock: Arc<dyn Clock>) -> Self {
        // Expiry is checked against the injected clock and the bundle TTL,
        // not by the JWT library.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims.clear();

        Self {
            policy,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            revocations: RevocationSet::default(),
            clock,
        }
    }

    /// Issue a token for `claims`, bound to `issuing_ip` when the policy requires it.
    ///
    /// # Errors
    ///
    /// `Issuance` if binding is required but no address is known, or signing fails.
    #[instrument(skip(self, claims), fields(user_id = %claims.user_id()))]
    pub fn issue(
        &self,
        claims: &IdentityClaims,
        issuing_ip: Option<IpAddr>,
    ) -> Result<String, AuthenticationError> {
        self.sign(claims, issuing_ip, Uuid::new_v4().to_string())
    }

    fn sign(
        &self,
        claims: &IdentityClaims,
        issuing_ip: Option<IpAddr>,
        family: String,
    ) -> Result<String, AuthenticationError> {
        let ip = match self.policy.binding() {
            TokenBinding::None => None,
            TokenBinding::IpBound => Some(issuing_ip.ok_or_else(|| {
                AuthenticationError::new(AuthenticationErrorKind::Issuance(
                    "IP-bound token requested without an issuing address".to_string(),
                ))
            })?),
        };
        let iat = self.clock.now().timestamp();
        let payload = TokenClaims {
            sub: claims.user_id().clone(),
            org: claims.organization_id().clone(),
            role: *claims.role(),
            iat,
            exp: self.policy.ttl_secs().map(|ttl| iat.saturating_add(ttl as i64)),
            ip,
            jti: Uuid::new_v4().to_string(),
            fam: family,
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &payload, &self.encoding_key)
            .map_err(|e| {
                AuthenticationError::new(AuthenticationErrorKind::Issuance(e.to_string()))
            })?;
        debug!(jti = %payload.jti, bound = payload.ip.is_some(), "Token issued");
        Ok(token)
    }

    /// Validate `token` presented from `request_ip`.
    ///
    /// Checks run in order: signature, revocation, expiry, binding.
    ///
    /// # Errors
    ///
    /// `Malformed`, `Revoked`, `Expired` or `IpMismatch`.
    #[instrument(skip(self, token))]
    pub fn validate(
        &self,
        token: &str,
        request_ip: Option<IpAddr>,
    ) -> Result<Identity, AuthenticationError> {
        let claims = self.decode(token)?;
        match self.revocation_status(&claims) {
            RevocationStatus::Active => {}
            RevocationStatus::RotatedOut => {
                warn!(jti = %claims.jti, family = %claims.fam, "Rotated-out token presented, revoking family");
                self.revocations
                    .revoke_family(&claims.fam, self.family_horizon(&claims));
                return Err(AuthenticationError::new(AuthenticationErrorKind::Revoked));
            }
            RevocationStatus::FamilyRevoked => {
                return Err(AuthenticationError::new(AuthenticationErrorKind::Revoked));
            }
        }
        self.check_lifetime(&claims)?;
        self.check_binding(&claims, request_ip)?;
        Ok(self.identity(claims))
    }

    /// Exchange `token` for a fresh one in the same rotation family.
    ///
    /// With reuse detection on, the presented token is rotated out; presenting
    /// it again revokes the whole family.
    ///
    /// # Errors
    ///
    /// `Reused` for a rotated-out token, `Revoked` for a revoked family,
    /// plus every validation failure.
    #[instrument(skip(self, token))]
    pub fn refresh(
        &self,
        token: &str,
        request_ip: Option<IpAddr>,
    ) -> Result<String, AuthenticationError> {
        let claims = self.decode(token)?;
        match self.revocation_status(&claims) {
            RevocationStatus::Active => {}
            RevocationStatus::RotatedOut => {
                warn!(jti = %claims.jti, family = %claims.fam, "Refresh token reuse detected, revoking family");
                self.revocations
                    .revoke_family(&claims.fam, self.family_horizon(&claims));
                return Err(AuthenticationError::new(AuthenticationErrorKind::Reused));
            }
            RevocationStatus::FamilyRevoked => {
                return Err(AuthenticationError::new(AuthenticationErrorKind::Revoked));
            }
        }
        self.check_lifetime(&claims)?;
        self.check_binding(&claims, request_ip)?;

        // The presented token is claimed before a successor exists, so two
        // concurrent refreshes of one token cannot both succeed.
        let detect_reuse = *self.policy.reuse_detection();
        if detect_reuse
            && !self
                .revocations
                .claim_rotation(&claims.jti, self.expiry_of(&claims))
        {
            warn!(jti = %claims.jti, family = %claims.fam, "Concurrent refresh of one token, revoking family");
            self.revocations
                .revoke_family(&claims.fam, self.family_horizon(&claims));
            return Err(AuthenticationError::new(AuthenticationErrorKind::Reused));
        }

        let identity_claims =
            IdentityClaims::new(claims.sub.clone(), claims.org.clone(), claims.role);
        let fresh = self
            .sign(&identity_claims, claims.ip.or(request_ip), claims.fam.clone())
            .inspect_err(|_| {
                if detect_reuse {
                    self.revocations.release_rotation(&claims.jti);
                }
            })?;
        debug!(family = %claims.fam, "Token rotated");
        Ok(fresh)
    }

    fn decode(&self, token: &str) -> Result<TokenClaims, AuthenticationError> {
        jsonwebtoken::decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "Token failed to decode");
                AuthenticationError::new(AuthenticationErrorKind::Malformed(e.to_string()))
            })
    }

    fn revocation_status(&self, claims: &TokenClaims) -> RevocationStatus {
        if *self.policy.reuse_detection() {
            self.revocations.status(claims)
        } else {
            RevocationStatus::Active
        }
    }

    fn check_lifetime(&self, claims: &TokenClaims) -> Result<(), AuthenticationError> {
        let Some(ttl) = self.policy.ttl_secs() else {
            return Ok(());
        };
        let now = self.clock.now().timestamp();
        if now >= claims.iat.saturating_add(*ttl as i64) {
            debug!(iat = claims.iat, ttl, "Token expired");
            return Err(AuthenticationError::new(AuthenticationErrorKind::Expired));
        }
        Ok(())
    }

    fn check_binding(
        &self,
        claims: &TokenClaims,
        request_ip: Option<IpAddr>,
    ) -> Result<(), AuthenticationError> {
        if *self.policy.binding() == TokenBinding::None {
            return Ok(());
        }
        match (claims.ip, request_ip) {
            (Some(bound), Some(seen)) if bound == seen => Ok(()),
            _ => {
                debug!(bound = ?claims.ip, seen = ?request_ip, "Token binding mismatch");
                Err(AuthenticationError::new(AuthenticationErrorKind::IpMismatch))
            }
        }
    }

    /// When this token stops validating regardless of revocation.
    fn expiry_of(&self, claims: &TokenClaims) -> DateTime<Utc> {
        let secs = claims
            .iat
            .saturating_add(self.policy.ttl_secs().unwrap_or(0) as i64);
        DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Family members are issued no later than now, so they all expire within one TTL.
    fn family_horizon(&self, claims: &TokenClaims) -> DateTime<Utc> {
        let now = self.clock.now();
        let ttl = seconds(self.policy.ttl_secs().unwrap_or(0));
        now.checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
            .max(self.expiry_of(claims))
    }

    fn identity(&self, claims: TokenClaims) -> Identity {
        let issued_at = DateTime::from_timestamp(claims.iat, 0).unwrap_or_default();
        Identity::new(
            IdentityClaims::new(claims.sub, claims.org, claims.role),
            issued_at,
            claims.ip,
            claims.jti,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ManualClock, PolicyBundle, SecurityMode};
    use chrono::TimeDelta;

    const SECRET: &[u8] = b"unit-test-signing-secret-32-bytes!!";

    fn service(mode: SecurityMode) -> (TokenService, ManualClock) {
        let clock = ManualClock::new(DateTime::from_timestamp(1_767_225_600, 0).unwrap());
        let policy = PolicyBundle::for_mode(mode).token().clone();
        (TokenService::new(policy, SECRET, Arc::new(clock.clone())), clock)
    }

    fn claims() -> IdentityClaims {
        IdentityClaims::new("alice", "acme", Role::Member)
    }

    #[test]
    fn test_mvp_tokens_never_expire() {
        let (tokens, clock) = service(SecurityMode::Mvp);
        let token = tokens.issue(&claims(), None).unwrap();
        clock.advance(TimeDelta::days(3650));
        let identity = tokens.validate(&token, None).unwrap();
        assert_eq!(identity.user_id(), "alice");
    }

    #[test]
    fn test_production_ttl_is_one_hour() {
        let (tokens, clock) = service(SecurityMode::Production);
        let token = tokens.issue(&claims(), None).unwrap();
        clock.advance(TimeDelta::minutes(59));
        assert!(tokens.validate(&token, None).is_ok());
        clock.advance(TimeDelta::minutes(2));
        let err = tokens.validate(&token, None).unwrap_err();
        assert_eq!(err.kind(), &AuthenticationErrorKind::Expired);
    }

    #[test]
    fn test_foreign_signature_is_malformed() {
        let (tokens, _) = service(SecurityMode::Production);
        let other = TokenService::new(
            PolicyBundle::for_mode(SecurityMode::Production).token().clone(),
            b"a-completely-different-secret-value",
            Arc::new(crate::SystemClock),
        );
        let token = other.issue(&claims(), None).unwrap();
        let err = tokens.validate(&token, None).unwrap_err();
        assert!(matches!(err.kind(), AuthenticationErrorKind::Malformed(_)));
        assert!(matches!(
            tokens.validate("not-a-jwt", None).unwrap_err().kind(),
            AuthenticationErrorKind::Malformed(_)
        ));
    }

    #[test]
    fn test_high_assurance_issue_requires_address() {
        let (tokens, _) = service(SecurityMode::HighAssurance);
        let err = tokens.issue(&claims(), None).unwrap_err();
        assert!(matches!(err.kind(), AuthenticationErrorKind::Issuance(_)));
    }

    #[test]
    fn test_production_refresh_keeps_old_token_valid() {
        let (tokens, _) = service(SecurityMode::Production);
        let token = tokens.issue(&claims(), None).unwrap();
        let fresh = tokens.refresh(&token, None).unwrap();
        assert!(tokens.validate(&token, None).is_ok());
        assert!(tokens.validate(&fresh, None).is_ok());
        assert!(tokens.revocations().is_empty());
    }

    #[test]
    fn test_purge_drops_expired_revocations() {
        let ip: IpAddr = "10.0.0.7".parse().unwrap();
        let (tokens, clock) = service(SecurityMode::HighAssurance);
        let token = tokens.issue(&claims(), Some(ip)).unwrap();
        tokens.refresh(&token, Some(ip)).unwrap();
        assert_eq!(tokens.revocations().len(), 1);
        clock.advance(TimeDelta::minutes(16));
        assert_eq!(tokens.revocations().purge_expired(clock.now()), 1);
        assert!(tokens.revocations().is_empty());
    }
}
