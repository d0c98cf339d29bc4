use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::error::{ConfigError, VerificationError};

const DEFAULT_LEEWAY_SECS: u64 = 0;

/// Realm public key used to check token signatures.
#[derive(Clone)]
pub struct VerificationKey {
    key: DecodingKey,
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VerificationKey(RS256)")
    }
}

impl VerificationKey {
    /// Accepts a PEM public key (SPKI or PKCS#1) or the bare base64 SPKI
    /// body that identity servers publish as the realm public key.
    pub fn from_pem_or_base64(material: &str) -> Result<Self, ConfigError> {
        let value = material.trim();

        if value.starts_with("-----BEGIN") {
            return Self::from_pem(value);
        }

        let compact: String = value.split_whitespace().collect();
        let der = STANDARD.decode(compact.as_bytes()).map_err(|_| {
            ConfigError::Key("realm public key is neither PEM nor base64".to_string())
        })?;

        Self::from_pem(&spki_pem(&der))
    }

    fn from_pem(pem: &str) -> Result<Self, ConfigError> {
        DecodingKey::from_rsa_pem(pem.as_bytes())
            .map(|key| Self { key })
            .map_err(|e| ConfigError::Key(e.to_string()))
    }
}

fn spki_pem(der: &[u8]) -> String {
    let body = STANDARD.encode(der);
    let mut out = String::from("-----BEGIN PUBLIC KEY-----\n");
    for line in body.as_bytes().chunks(64) {
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }
    out.push_str("-----END PUBLIC KEY-----\n");
    out
}

/// An access token whose signature, realm binding and lifetime checked out.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedToken {
    pub subject: String,
    pub realm: String,
    pub issued_at: u64,
    pub expires_at: u64,
    pub roles: Vec<String>,
    pub claims: Map<String, Value>,
}

impl VerifiedToken {
    /// Claim value as a string: scalars verbatim, arrays and objects as compact JSON.
    pub fn claim(&self, name: &str) -> Option<String> {
        claim_string(&self.claims, name)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdToken {
    pub subject: Option<String>,
    pub claims: Map<String, Value>,
}

impl IdToken {
    pub fn claim(&self, name: &str) -> Option<String> {
        claim_string(&self.claims, name)
    }
}

fn claim_string(claims: &Map<String, Value>, name: &str) -> Option<String> {
    match claims.get(name)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(v) => Some(v.to_string()),
        Value::Array(v) => serde_json::to_string(v).ok(),
        Value::Object(v) => serde_json::to_string(v).ok(),
        Value::Null => None,
    }
}

/// Signature and claim checks for tokens returned by the token endpoint.
pub trait TokenVerifier: Send + Sync {
    fn verify_access_token(
        &self,
        token: &str,
        key: &VerificationKey,
        realm: &str,
    ) -> Result<VerifiedToken, VerificationError>;

    fn parse_id_token(
        &self,
        token: &str,
        key: &VerificationKey,
    ) -> Result<IdToken, VerificationError>;
}

/// RS256 verifier backed by `jsonwebtoken`.
#[derive(Debug, Clone)]
pub struct RsaTokenVerifier {
    leeway_secs: u64,
}

impl Default for RsaTokenVerifier {
    fn default() -> Self {
        Self {
            leeway_secs: DEFAULT_LEEWAY_SECS,
        }
    }
}

impl RsaTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock skew tolerated on `exp` and `nbf`.
    pub fn with_leeway(mut self, secs: u64) -> Self {
        self.leeway_secs = secs;
        self
    }

    fn decode_claims(
        &self,
        token: &str,
        key: &VerificationKey,
        required: &[&str],
    ) -> Result<Map<String, Value>, VerificationError> {
        let header = decode_header(token)?;
        if header.alg != Algorithm::RS256 {
            return Err(VerificationError(
                "only RS256 tokens are accepted".to_string(),
            ));
        }

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = self.leeway_secs;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.required_spec_claims = required.iter().map(|c| c.to_string()).collect::<HashSet<_>>();

        let data = decode::<Value>(token, &key.key, &validation)?;
        match data.claims {
            Value::Object(map) => Ok(map),
            _ => Err(VerificationError(
                "token payload must be a JSON object".to_string(),
            )),
        }
    }
}

impl TokenVerifier for RsaTokenVerifier {
    fn verify_access_token(
        &self,
        token: &str,
        key: &VerificationKey,
        realm: &str,
    ) -> Result<VerifiedToken, VerificationError> {
        let claims = self.decode_claims(token, key, &["exp", "sub"])?;

        if !bound_to_realm(&claims, realm) {
            return Err(VerificationError(
                "token audience doesn't match realm".to_string(),
            ));
        }

        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| VerificationError("token user was null".to_string()))?
            .to_string();
        let issued_at = timestamp(&claims, "iat")
            .ok_or_else(|| VerificationError("iat claim missing".to_string()))?;
        let expires_at = timestamp(&claims, "exp")
            .ok_or_else(|| VerificationError("exp claim missing".to_string()))?;

        let roles = claims
            .get("realm_access")
            .and_then(|access| access.get("roles"))
            .and_then(Value::as_array)
            .map(|roles| {
                roles
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(VerifiedToken {
            subject,
            realm: realm.to_string(),
            issued_at,
            expires_at,
            roles,
            claims,
        })
    }

    fn parse_id_token(
        &self,
        token: &str,
        key: &VerificationKey,
    ) -> Result<IdToken, VerificationError> {
        let claims = self.decode_claims(token, key, &[])?;
        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(IdToken { subject, claims })
    }
}

fn bound_to_realm(claims: &Map<String, Value>, realm: &str) -> bool {
    let audience_matches = match claims.get("aud") {
        Some(Value::String(aud)) => aud == realm,
        Some(Value::Array(auds)) => auds.iter().any(|a| a.as_str() == Some(realm)),
        _ => false,
    };
    if audience_matches {
        return true;
    }

    let suffix = format!("/realms/{realm}");
    claims
        .get("iss")
        .and_then(Value::as_str)
        .is_some_and(|iss| iss.trim_end_matches('/').ends_with(&suffix))
}

fn timestamp(claims: &Map<String, Value>, name: &str) -> Option<u64> {
    let value = claims.get(name)?;
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::now_secs;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    const FIXTURE_RSA_PRIVATE_PEM: &str = include_str!("../fixtures/test-keys/rsa-private.pem");
    const FIXTURE_WRONG_RSA_PRIVATE_PEM: &str =
        include_str!("../fixtures/test-keys/wrong-key-private.pem");
    const FIXTURE_RSA_PUBLIC_PEM: &str = include_str!("../fixtures/test-keys/rsa-public.pem");
    const FIXTURE_REALM_PUBLIC_KEY: &str =
        include_str!("../fixtures/test-keys/realm-public-key.txt");

    fn sign(claims: &Value, private_pem: &str) -> String {
        let key = EncodingKey::from_rsa_pem(private_pem.as_bytes()).expect("valid rsa private key");
        encode(&Header::new(Algorithm::RS256), claims, &key).expect("token should be signed")
    }

    fn key() -> VerificationKey {
        VerificationKey::from_pem_or_base64(FIXTURE_REALM_PUBLIC_KEY).expect("fixture key")
    }

    fn access_claims() -> Value {
        json!({
            "sub": "f2b1c1c4",
            "iss": "https://sso.example.test/realms/demo",
            "aud": "account",
            "iat": now_secs(),
            "exp": now_secs() + 300,
            "preferred_username": "alice",
            "realm_access": { "roles": ["user", "admin"] }
        })
    }

    #[test]
    fn key_material_formats() {
        assert!(VerificationKey::from_pem_or_base64(FIXTURE_RSA_PUBLIC_PEM).is_ok());
        assert!(VerificationKey::from_pem_or_base64(FIXTURE_REALM_PUBLIC_KEY).is_ok());

        let err = VerificationKey::from_pem_or_base64("%%%").unwrap_err();
        assert!(err.to_string().contains("neither PEM nor base64"));
        assert!(VerificationKey::from_pem_or_base64("AAAA").is_err());
    }

    #[test]
    fn valid_access_token_is_verified() {
        let token = sign(&access_claims(), FIXTURE_RSA_PRIVATE_PEM);
        let verified = RsaTokenVerifier::new()
            .verify_access_token(&token, &key(), "demo")
            .expect("token should verify");

        assert_eq!(verified.subject, "f2b1c1c4");
        assert_eq!(verified.realm, "demo");
        assert!(verified.has_role("admin"));
        assert!(!verified.has_role("auditor"));
        assert_eq!(verified.claim("preferred_username").as_deref(), Some("alice"));
        assert_eq!(
            verified.claim("realm_access").as_deref(),
            Some("{\"roles\":[\"user\",\"admin\"]}")
        );
    }

    #[test]
    fn realm_binding_accepts_audience_or_issuer() {
        let mut by_aud = access_claims();
        by_aud["iss"] = json!("https://elsewhere.test");
        by_aud["aud"] = json!(["other", "demo"]);
        let token = sign(&by_aud, FIXTURE_RSA_PRIVATE_PEM);
        assert!(
            RsaTokenVerifier::new()
                .verify_access_token(&token, &key(), "demo")
                .is_ok()
        );

        let token = sign(&access_claims(), FIXTURE_RSA_PRIVATE_PEM);
        let err = RsaTokenVerifier::new()
            .verify_access_token(&token, &key(), "other-realm")
            .unwrap_err();
        assert!(err.0.contains("realm"));
    }

    #[test]
    fn access_token_rejections() {
        let verifier = RsaTokenVerifier::new();

        let wrong_key = sign(&access_claims(), FIXTURE_WRONG_RSA_PRIVATE_PEM);
        assert!(verifier.verify_access_token(&wrong_key, &key(), "demo").is_err());

        let mut expired = access_claims();
        expired["exp"] = json!(now_secs() - 3600);
        let token = sign(&expired, FIXTURE_RSA_PRIVATE_PEM);
        assert!(verifier.verify_access_token(&token, &key(), "demo").is_err());

        let mut not_yet = access_claims();
        not_yet["nbf"] = json!(now_secs() + 3600);
        let token = sign(&not_yet, FIXTURE_RSA_PRIVATE_PEM);
        assert!(verifier.verify_access_token(&token, &key(), "demo").is_err());

        let mut no_sub = access_claims();
        no_sub.as_object_mut().unwrap().remove("sub");
        let token = sign(&no_sub, FIXTURE_RSA_PRIVATE_PEM);
        assert!(verifier.verify_access_token(&token, &key(), "demo").is_err());

        let mut no_iat = access_claims();
        no_iat.as_object_mut().unwrap().remove("iat");
        let token = sign(&no_iat, FIXTURE_RSA_PRIVATE_PEM);
        let err = verifier.verify_access_token(&token, &key(), "demo").unwrap_err();
        assert!(err.0.contains("iat"));

        let hs = encode(
            &Header::new(Algorithm::HS256),
            &access_claims(),
            &EncodingKey::from_secret(b"shared"),
        )
        .unwrap();
        let err = verifier.verify_access_token(&hs, &key(), "demo").unwrap_err();
        assert!(err.0.contains("RS256"));

        assert!(verifier.verify_access_token("garbage", &key(), "demo").is_err());
    }

    #[test]
    fn leeway_tolerates_small_skew() {
        let mut claims = access_claims();
        claims["exp"] = json!(now_secs() - 5);
        let token = sign(&claims, FIXTURE_RSA_PRIVATE_PEM);

        assert!(
            RsaTokenVerifier::new()
                .verify_access_token(&token, &key(), "demo")
                .is_err()
        );
        assert!(
            RsaTokenVerifier::new()
                .with_leeway(60)
                .verify_access_token(&token, &key(), "demo")
                .is_ok()
        );
    }

    #[test]
    fn id_token_parsing() {
        let verifier = RsaTokenVerifier::new();
        let claims = json!({
            "sub": "f2b1c1c4",
            "aud": "customer-portal",
            "email": "alice@example.test",
            "email_verified": true
        });

        let token = sign(&claims, FIXTURE_RSA_PRIVATE_PEM);
        let id = verifier.parse_id_token(&token, &key()).expect("id token parses");
        assert_eq!(id.subject.as_deref(), Some("f2b1c1c4"));
        assert_eq!(id.claim("email").as_deref(), Some("alice@example.test"));
        assert_eq!(id.claim("email_verified").as_deref(), Some("true"));

        let forged = sign(&claims, FIXTURE_WRONG_RSA_PRIVATE_PEM);
        assert!(verifier.parse_id_token(&forged, &key()).is_err());
        assert!(verifier.parse_id_token("not.a.jwt", &key()).is_err());
    }
}
