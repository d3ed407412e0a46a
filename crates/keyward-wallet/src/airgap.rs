//! Air-gapped signing over QR codes.
//!
//! A session carries one sign request to an offline device and accepts one
//! signature back. It is single-use: once a response is verified or
//! rejected, or the user cancels, every further call fails with
//! [`WalletError::SessionClosed`] and a retry needs a new session with a
//! new request id.
//!
//! ```text
//! RequestBuilt -> AwaitingScan -> ResponseReceived -> Verified
//!                      |                 |
//!                      +-> Cancelled     +-> Rejected
//! ```
//!
//! Payloads travel as `ur:<type>/<hex(bincode)>` strings.

use async_trait::async_trait;
use bincode::{Decode, Encode};
use std::fmt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::WalletError;

/// UR type of a sign request.
pub const SIGN_REQUEST_UR_TYPE: &str = "keyward-sign-request";

/// UR type of a signature response.
pub const SIGNATURE_UR_TYPE: &str = "keyward-signature";

/// Origin stamped on requests unless the caller names one.
pub const DEFAULT_ORIGIN: &str = "keyward";

/// Length of one digest in a transaction batch.
pub const DIGEST_LEN: usize = 32;

/// Length of one Schnorr signature.
pub const SIGNATURE_LEN: usize = 64;

/// Largest bincode payload a UR may carry, in bytes.
pub const MAX_UR_BYTES: usize = 64 * 1024;

/// What the device is asked to sign.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub enum SignDataType {
    /// Concatenated 32-byte input digests.
    Transaction,
    /// A personal message, signed as one unit.
    Message,
}

/// Request shown to the offline device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignRequest {
    pub request_id: Uuid,
    pub path: String,
    pub sign_data: Vec<u8>,
    pub data_type: SignDataType,
    /// Master key fingerprint, 8 hex characters.
    pub xfp: String,
    pub address: String,
    pub origin: String,
}

#[derive(Encode, Decode)]
struct SignRequestWire {
    request_id: [u8; 16],
    path: String,
    sign_data: Vec<u8>,
    data_type: SignDataType,
    xfp: String,
    address: String,
    origin: String,
}

/// Signature scanned back from the device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureResponse {
    pub request_id: Uuid,
    /// Concatenated 64-byte signatures.
    pub signature: Vec<u8>,
}

#[derive(Encode, Decode)]
struct SignatureWire {
    request_id: [u8; 16],
    signature: Vec<u8>,
}

fn encode_ur<T: Encode>(ur_type: &str, value: &T) -> Result<String, WalletError> {
    let bytes = bincode::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| WalletError::BuildError(format!("encode {ur_type}: {e}")))?;
    if bytes.len() > MAX_UR_BYTES {
        return Err(WalletError::BuildError(format!(
            "{ur_type} payload is {} bytes, limit {MAX_UR_BYTES}",
            bytes.len()
        )));
    }
    Ok(format!("ur:{ur_type}/{}", hex::encode(bytes)))
}

fn decode_ur<T: Decode<()>>(ur_type: &str, ur: &str) -> Result<T, WalletError> {
    let body = ur
        .trim()
        .strip_prefix("ur:")
        .and_then(|rest| rest.strip_prefix(ur_type))
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(|| WalletError::InvalidQrCode(format!("expected ur:{ur_type}")))?;
    // Size check before any decoding.
    if body.len() > 2 * MAX_UR_BYTES {
        return Err(WalletError::InvalidQrCode(format!("payload exceeds {MAX_UR_BYTES} bytes")));
    }
    let bytes = hex::decode(body).map_err(|e| WalletError::InvalidQrCode(e.to_string()))?;
    let config = bincode::config::standard().with_limit::<MAX_UR_BYTES>();
    let (value, read) = bincode::decode_from_slice(&bytes, config)
        .map_err(|e| WalletError::InvalidQrCode(e.to_string()))?;
    if read != bytes.len() {
        return Err(WalletError::InvalidQrCode("trailing bytes".into()));
    }
    Ok(value)
}

impl SignRequest {
    pub fn to_ur(&self) -> Result<String, WalletError> {
        let wire = SignRequestWire {
            request_id: *self.request_id.as_bytes(),
            path: self.path.clone(),
            sign_data: self.sign_data.clone(),
            data_type: self.data_type,
            xfp: self.xfp.clone(),
            address: self.address.clone(),
            origin: self.origin.clone(),
        };
        encode_ur(SIGN_REQUEST_UR_TYPE, &wire)
    }

    pub fn from_ur(ur: &str) -> Result<Self, WalletError> {
        let wire: SignRequestWire = decode_ur(SIGN_REQUEST_UR_TYPE, ur)?;
        Ok(Self {
            request_id: Uuid::from_bytes(wire.request_id),
            path: wire.path,
            sign_data: wire.sign_data,
            data_type: wire.data_type,
            xfp: wire.xfp,
            address: wire.address,
            origin: wire.origin,
        })
    }

    /// Digests of a transaction request, in input order.
    pub fn digests(&self) -> Result<Vec<[u8; DIGEST_LEN]>, WalletError> {
        if self.sign_data.is_empty() || self.sign_data.len() % DIGEST_LEN != 0 {
            return Err(WalletError::InvalidQrCode(format!(
                "sign data is not a digest batch ({} bytes)",
                self.sign_data.len()
            )));
        }
        Ok(self
            .sign_data
            .chunks_exact(DIGEST_LEN)
            .map(|c| {
                let mut d = [0u8; DIGEST_LEN];
                d.copy_from_slice(c);
                d
            })
            .collect())
    }

    /// Number of signatures a valid response carries.
    pub fn expected_signatures(&self) -> usize {
        match self.data_type {
            SignDataType::Transaction => self.sign_data.len() / DIGEST_LEN,
            SignDataType::Message => 1,
        }
    }
}

impl SignatureResponse {
    pub fn to_ur(&self) -> Result<String, WalletError> {
        let wire = SignatureWire {
            request_id: *self.request_id.as_bytes(),
            signature: self.signature.clone(),
        };
        encode_ur(SIGNATURE_UR_TYPE, &wire)
    }

    pub fn from_ur(ur: &str) -> Result<Self, WalletError> {
        let wire: SignatureWire = decode_ur(SIGNATURE_UR_TYPE, ur)?;
        Ok(Self {
            request_id: Uuid::from_bytes(wire.request_id),
            signature: wire.signature,
        })
    }
}

/// Inputs for a new request.
#[derive(Clone, Debug)]
pub struct SignRequestParams {
    pub path: String,
    pub sign_data: Vec<u8>,
    pub data_type: SignDataType,
    pub xfp: Option<String>,
    pub address: String,
    pub origin: Option<String>,
}

/// Displays a request and returns whatever the camera scans back.
#[async_trait]
pub trait QrScanner: Send + Sync {
    async fn scan(&self, request_ur: &str) -> Result<String, WalletError>;
}

/// Lifecycle of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AirGapState {
    RequestBuilt,
    AwaitingScan,
    ResponseReceived,
    Verified,
    Rejected,
    Cancelled,
}

impl AirGapState {
    pub fn is_closed(self) -> bool {
        matches!(self, AirGapState::Verified | AirGapState::Rejected | AirGapState::Cancelled)
    }
}

impl fmt::Display for AirGapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One request/response exchange with an offline device.
#[derive(Debug)]
pub struct AirGapSession {
    request: SignRequest,
    state: AirGapState,
    response: Option<SignatureResponse>,
}

impl AirGapSession {
    /// Build a request with a fresh v4 id.
    ///
    /// Fails with [`WalletError::MissingFingerprint`] when no master
    /// fingerprint is known for the account.
    pub fn new(params: SignRequestParams) -> Result<Self, WalletError> {
        let xfp = params
            .xfp
            .filter(|x| !x.is_empty())
            .ok_or(WalletError::MissingFingerprint)?;
        let request = SignRequest {
            request_id: Uuid::new_v4(),
            path: params.path,
            sign_data: params.sign_data,
            data_type: params.data_type,
            xfp,
            address: params.address,
            origin: params.origin.unwrap_or_else(|| DEFAULT_ORIGIN.to_string()),
        };
        if request.data_type == SignDataType::Transaction {
            request.digests()?;
        }
        tracing::debug!(request_id = %request.request_id, path = %request.path, "air-gap request built");
        Ok(Self {
            request,
            state: AirGapState::RequestBuilt,
            response: None,
        })
    }

    pub fn request(&self) -> &SignRequest {
        &self.request
    }

    pub fn request_id(&self) -> Uuid {
        self.request.request_id
    }

    pub fn state(&self) -> AirGapState {
        self.state
    }

    fn ensure_open(&self) -> Result<(), WalletError> {
        if self.state.is_closed() {
            return Err(WalletError::SessionClosed);
        }
        Ok(())
    }

    /// The request as a UR string for display.
    pub fn request_ur(&self) -> Result<String, WalletError> {
        self.ensure_open()?;
        self.request.to_ur()
    }

    /// Show the request and wait for the device's answer, with no timeout.
    ///
    /// Cancelling `cancel` moves the session to `Cancelled` and returns
    /// [`WalletError::SigningCancelled`]. Dropping the returned future
    /// abandons the scan without changing state.
    pub async fn await_response<S>(
        &mut self,
        scanner: &S,
        cancel: &CancellationToken,
    ) -> Result<SignatureResponse, WalletError>
    where
        S: QrScanner + ?Sized,
    {
        self.ensure_open()?;
        let ur = self.request.to_ur()?;
        self.state = AirGapState::AwaitingScan;
        tracing::debug!(request_id = %self.request.request_id, "awaiting air-gap scan");

        let scanned = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.state = AirGapState::Cancelled;
                self.response = None;
                tracing::info!(request_id = %self.request.request_id, "air-gap signing cancelled");
                return Err(WalletError::SigningCancelled);
            }
            scanned = scanner.scan(&ur) => scanned,
        };

        match scanned {
            Ok(text) => self.receive(&text),
            Err(e) => {
                self.state = AirGapState::Rejected;
                Err(e)
            }
        }
    }

    /// Accept a scanned signature UR.
    ///
    /// A malformed payload or one answering a different request rejects
    /// the session, even if the signature itself would verify.
    pub fn receive(&mut self, ur: &str) -> Result<SignatureResponse, WalletError> {
        self.ensure_open()?;
        let response = match SignatureResponse::from_ur(ur) {
            Ok(r) => r,
            Err(e) => {
                self.state = AirGapState::Rejected;
                return Err(e);
            }
        };
        if response.request_id != self.request.request_id {
            self.state = AirGapState::Rejected;
            tracing::warn!(
                expected = %self.request.request_id,
                got = %response.request_id,
                "air-gap response for another request"
            );
            return Err(WalletError::InvalidQrCode("request id mismatch".into()));
        }
        self.state = AirGapState::ResponseReceived;
        self.response = Some(response.clone());
        Ok(response)
    }

    /// Split the received signature into one 64-byte signature per digest.
    pub fn signatures(&self) -> Result<Vec<[u8; SIGNATURE_LEN]>, WalletError> {
        let response = self
            .response
            .as_ref()
            .ok_or_else(|| WalletError::InvalidQrCode("no response received".into()))?;
        let expected = self.request.expected_signatures();
        if response.signature.len() != expected * SIGNATURE_LEN {
            return Err(WalletError::InvalidQrCode(format!(
                "expected {expected} signatures, got {} bytes",
                response.signature.len()
            )));
        }
        Ok(response
            .signature
            .chunks_exact(SIGNATURE_LEN)
            .map(|c| {
                let mut s = [0u8; SIGNATURE_LEN];
                s.copy_from_slice(c);
                s
            })
            .collect())
    }

    /// Record that the keyring verified the response.
    pub fn mark_verified(&mut self) -> Result<(), WalletError> {
        self.ensure_open()?;
        if self.state != AirGapState::ResponseReceived {
            return Err(WalletError::InvalidQrCode("no response received".into()));
        }
        self.state = AirGapState::Verified;
        tracing::info!(request_id = %self.request.request_id, "air-gap response verified");
        Ok(())
    }

    /// Record that the keyring refused the response.
    pub fn reject(&mut self) -> Result<(), WalletError> {
        self.ensure_open()?;
        self.state = AirGapState::Rejected;
        tracing::warn!(request_id = %self.request.request_id, "air-gap response rejected");
        Ok(())
    }
}
