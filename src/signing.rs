// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! FAPI request object signing with the QSEAL key.
//!
//! The request object carries the OAuth authorization parameters as an
//! RS256 JWT instead of plain query parameters. The signer does no I/O after
//! construction: output depends only on the key, the parameters and the
//! supplied issue time.

use std::{fs, path::Path};

use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePrivateKey, PrivateKeyInfo};
use rsa::RsaPrivateKey;
use serde::Serialize;

/// Validity window of a signed request object, in seconds.
pub const REQUEST_OBJECT_LIFETIME_SECS: i64 = 300;

/// `max_age` requested from the authorization server (24 hours).
pub const MAX_AUTH_AGE_SECS: u32 = 86_400;

/// Strong customer authentication ACR value.
pub const PSD2_SCA_ACR: &str = "urn:openbanking:psd2:sca";

#[derive(Debug, thiserror::Error)]
pub enum KeyFormatError {
    #[error("read qseal key {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("qseal key is not valid UTF-8 PEM")]
    Encoding,

    #[error("parse private key (pkcs1/pkcs8): {0}")]
    Unparseable(String),

    #[error("not RSA private key")]
    NotRsa,

    #[error("re-encode RSA key: {0}")]
    Encode(String),
}

#[derive(Debug, thiserror::Error)]
#[error("sign request object: {0}")]
pub struct SigningError(#[from] jsonwebtoken::errors::Error);

/// Authorization parameters bound into a request object.
#[derive(Debug, Clone, Copy)]
pub struct RequestObjectParams<'a> {
    pub audience: &'a str,
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub scope: &'a str,
    pub state: &'a str,
    pub nonce: &'a str,
    pub authorization_id: &'a str,
}

/// Claim set of the request object. Field names are the wire names.
#[derive(Debug, Serialize)]
pub struct RequestObjectClaims<'a> {
    pub aud: &'a str,
    pub iss: &'a str,
    pub response_type: &'static str,
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub scope: &'a str,
    pub state: &'a str,
    pub nonce: &'a str,
    pub max_age: u32,
    pub iat: i64,
    pub exp: i64,
    pub claims: RequestedClaims<'a>,
}

#[derive(Debug, Serialize)]
pub struct RequestedClaims<'a> {
    pub userinfo: UserinfoClaims<'a>,
    pub id_token: IdTokenClaims<'a>,
}

#[derive(Debug, Serialize)]
pub struct UserinfoClaims<'a> {
    #[serde(rename = "authorizationId")]
    pub authorization_id: EssentialValue<'a>,
}

#[derive(Debug, Serialize)]
pub struct IdTokenClaims<'a> {
    #[serde(rename = "authorizationId")]
    pub authorization_id: EssentialValue<'a>,
    pub acr: EssentialValues,
}

#[derive(Debug, Serialize)]
pub struct EssentialValue<'a> {
    pub value: &'a str,
    pub essential: bool,
}

#[derive(Debug, Serialize)]
pub struct EssentialValues {
    pub essential: bool,
    pub values: [&'static str; 1],
}

impl<'a> RequestObjectClaims<'a> {
    pub fn new(params: &RequestObjectParams<'a>, issued_at: DateTime<Utc>) -> Self {
        let iat = issued_at.timestamp();
        Self {
            aud: params.audience,
            iss: params.client_id,
            response_type: "code",
            client_id: params.client_id,
            redirect_uri: params.redirect_uri,
            scope: params.scope,
            state: params.state,
            nonce: params.nonce,
            max_age: MAX_AUTH_AGE_SECS,
            iat,
            exp: iat + REQUEST_OBJECT_LIFETIME_SECS,
            claims: RequestedClaims {
                userinfo: UserinfoClaims {
                    authorization_id: EssentialValue {
                        value: params.authorization_id,
                        essential: true,
                    },
                },
                id_token: IdTokenClaims {
                    authorization_id: EssentialValue {
                        value: params.authorization_id,
                        essential: true,
                    },
                    acr: EssentialValues {
                        essential: true,
                        values: [PSD2_SCA_ACR],
                    },
                },
            },
        }
    }
}

/// RS256 signer holding the QSEAL key and its `kid`.
#[derive(Clone)]
pub struct RequestObjectSigner {
    key: EncodingKey,
    kid: String,
}

impl std::fmt::Debug for RequestObjectSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestObjectSigner")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

impl RequestObjectSigner {
    /// Load the key from a PEM file.
    pub fn from_pem_file(path: &Path, kid: impl Into<String>) -> Result<Self, KeyFormatError> {
        let bytes = fs::read(path).map_err(|source| KeyFormatError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_pem(&bytes, kid)
    }

    /// Parse the first PEM block as an RSA key, trying PKCS#1 before PKCS#8.
    ///
    /// The block label is not checked, and anything after the first block
    /// (such as the matching certificate) is ignored.
    pub fn from_pem(pem_bytes: &[u8], kid: impl Into<String>) -> Result<Self, KeyFormatError> {
        let pem_str = std::str::from_utf8(pem_bytes).map_err(|_| KeyFormatError::Encoding)?;
        let block =
            pem::parse(pem_str).map_err(|e| KeyFormatError::Unparseable(e.to_string()))?;
        let key = parse_rsa_private_key(block.contents())?;

        let der = key
            .to_pkcs1_der()
            .map_err(|e| KeyFormatError::Encode(e.to_string()))?;

        Ok(Self {
            key: EncodingKey::from_rsa_der(der.as_bytes()),
            kid: kid.into(),
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Sign a request object issued at `issued_at`, valid for five minutes.
    pub fn sign(
        &self,
        params: &RequestObjectParams<'_>,
        issued_at: DateTime<Utc>,
    ) -> Result<String, SigningError> {
        let mut header = Header::new(Algorithm::RS256);
        header.typ = Some("JWT".to_string());
        header.kid = Some(self.kid.clone());

        let claims = RequestObjectClaims::new(params, issued_at);
        Ok(encode(&header, &claims, &self.key)?)
    }
}

fn parse_rsa_private_key(der: &[u8]) -> Result<RsaPrivateKey, KeyFormatError> {
    if let Ok(key) = RsaPrivateKey::from_pkcs1_der(der) {
        return Ok(key);
    }

    match RsaPrivateKey::from_pkcs8_der(der) {
        Ok(key) => Ok(key),
        Err(_) if is_non_rsa_pkcs8(der) => Err(KeyFormatError::NotRsa),
        Err(e) => Err(KeyFormatError::Unparseable(e.to_string())),
    }
}

/// True when the DER is a well-formed PKCS#8 key for another algorithm.
fn is_non_rsa_pkcs8(der: &[u8]) -> bool {
    match PrivateKeyInfo::try_from(der) {
        Ok(info) => info.algorithm.oid != rsa::pkcs1::ALGORITHM_OID,
        Err(_) => false,
    }
}
