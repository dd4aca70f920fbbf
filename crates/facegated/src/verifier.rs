//! Client for the external authorization service.
//!
//! The service decides whether a recognized identity is eligible (for a
//! meal, a door, ...). It is consulted at most once per matched face per
//! frame, and any failure degrades the face to "unverified" instead of
//! failing the frame.

use crate::roster::RosterEntry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Reason reported when the authorization service could not be consulted.
pub const UNAVAILABLE_REASON: &str = "verification unavailable";

/// Eligibility decision for one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub verified: bool,
    pub eligible: bool,
    #[serde(default)]
    pub reason: String,
    /// Identity attributes returned by the service, passed through untouched.
    #[serde(default, rename = "user")]
    pub attributes: serde_json::Value,
}

/// What happened to verification for one face.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationStatus {
    /// No match, or verification disabled.
    Skipped,
    /// The service could not be reached or answered badly.
    Unavailable,
    Completed(VerificationOutcome),
}

impl VerificationStatus {
    pub fn verified(&self) -> bool {
        matches!(self, Self::Completed(o) if o.verified)
    }

    pub fn eligible(&self) -> bool {
        matches!(self, Self::Completed(o) if o.eligible)
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Skipped => "",
            Self::Unavailable => UNAVAILABLE_REASON,
            Self::Completed(o) => &o.reason,
        }
    }

    pub fn attributes(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Completed(o) if !o.attributes.is_null() => Some(&o.attributes),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum AuthorityError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("invalid response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Error, Debug)]
#[error("verifier unavailable: {reason}")]
pub struct VerifierUnavailable {
    pub reason: String,
}

impl From<AuthorityError> for VerifierUnavailable {
    fn from(e: AuthorityError) -> Self {
        Self { reason: e.to_string() }
    }
}

/// Eligibility check for a recognized identity.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, label: &str) -> Result<VerificationOutcome, VerifierUnavailable>;
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    method: &'a str,
    #[serde(rename = "faceId")]
    face_id: &'a str,
}

#[derive(Serialize)]
struct LinkFaceRequest<'a> {
    #[serde(rename = "studentId")]
    student_id: &'a str,
    #[serde(rename = "faceId")]
    face_id: &'a str,
}

/// HTTP client for the authorization service.
pub struct AuthorityClient {
    client: reqwest::Client,
    base_url: String,
    verify_timeout: Duration,
    roster_timeout: Duration,
}

impl AuthorityClient {
    pub fn new(base_url: &str, verify_timeout: Duration, roster_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            verify_timeout,
            roster_timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// All identities with a reference photo.
    pub async fn fetch_roster(&self) -> Result<Vec<RosterEntry>, AuthorityError> {
        let url = format!("{}/api/hardware/enrolled-faces", self.base_url);
        let resp = self.client.get(&url).timeout(self.roster_timeout).send().await;
        decode_json(url, resp).await
    }

    /// Record the label assigned to `subject_id` on the service side.
    pub async fn link_face_id(&self, subject_id: &str, face_id: &str) -> Result<(), AuthorityError> {
        let url = format!("{}/api/hardware/update-face-id", self.base_url);
        let resp = self
            .client
            .put(&url)
            .timeout(self.verify_timeout)
            .json(&LinkFaceRequest {
                student_id: subject_id,
                face_id,
            })
            .send()
            .await;
        check_status(url, resp).map(|_| ())
    }
}

#[async_trait]
impl Verifier for AuthorityClient {
    async fn verify(&self, label: &str) -> Result<VerificationOutcome, VerifierUnavailable> {
        let url = format!("{}/api/hardware/verify", self.base_url);
        let resp = self
            .client
            .post(&url)
            .timeout(self.verify_timeout)
            .json(&VerifyRequest {
                method: "FACE",
                face_id: label,
            })
            .send()
            .await;
        Ok(decode_json(url, resp).await?)
    }
}

fn check_status(
    url: String,
    resp: Result<reqwest::Response, reqwest::Error>,
) -> Result<reqwest::Response, AuthorityError> {
    let resp = match resp {
        Ok(resp) => resp,
        Err(source) => return Err(AuthorityError::Request { url, source }),
    };
    if !resp.status().is_success() {
        return Err(AuthorityError::Status {
            url,
            status: resp.status().as_u16(),
        });
    }
    Ok(resp)
}

async fn decode_json<T: serde::de::DeserializeOwned>(
    url: String,
    resp: Result<reqwest::Response, reqwest::Error>,
) -> Result<T, AuthorityError> {
    let resp = check_status(url.clone(), resp)?;
    resp.json::<T>()
        .await
        .map_err(|source| AuthorityError::Decode { url, source })
}
