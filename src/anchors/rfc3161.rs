//! RFC 3161 Time-Stamp Protocol anchor: request build, submission, and
//! strict response validation.

use crate::anchors::der::{self, Tlv};
use crate::core::errors::{WitnessError, WitnessResult};
use crate::core::logging::log_anchor_submission;
use rand::RngCore;
use std::time::Duration;

pub const OID_SHA256: &[u64] = &[2, 16, 840, 1, 101, 3, 4, 2, 1];
pub const OID_SHA384: &[u64] = &[2, 16, 840, 1, 101, 3, 4, 2, 2];
pub const OID_SHA512: &[u64] = &[2, 16, 840, 1, 101, 3, 4, 2, 3];
pub const OID_SHA1: &[u64] = &[1, 3, 14, 3, 2, 26];
pub const OID_SIGNED_DATA: &[u64] = &[1, 2, 840, 113549, 1, 7, 2];
pub const OID_TST_INFO: &[u64] = &[1, 2, 840, 113549, 1, 9, 16, 1, 4];
pub const OID_KEY_USAGE: &[u64] = &[2, 5, 29, 15];
pub const OID_EXT_KEY_USAGE: &[u64] = &[2, 5, 29, 37];
pub const OID_EKU_TIMESTAMPING: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 3, 8];
pub const OID_COMMON_NAME: &[u64] = &[2, 5, 4, 3];

/// The `digitalSignature` bit (bit 0, the most significant bit of the first
/// content octet) of the keyUsage BIT STRING.
const KEY_USAGE_DIGITAL_SIGNATURE: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    fn oid(self) -> &'static [u64] {
        match self {
            DigestAlgorithm::Sha1 => OID_SHA1,
            DigestAlgorithm::Sha256 => OID_SHA256,
            DigestAlgorithm::Sha384 => OID_SHA384,
            DigestAlgorithm::Sha512 => OID_SHA512,
        }
    }

    fn expected_len(self) -> usize {
        match self {
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }

    pub fn from_oid(arcs: &[u64]) -> WitnessResult<Self> {
        for candidate in [
            DigestAlgorithm::Sha1,
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Sha384,
            DigestAlgorithm::Sha512,
        ] {
            if candidate.oid() == arcs {
                return Ok(candidate);
            }
        }
        Err(WitnessError::Malformed(format!(
            "unsupported digest algorithm OID {}",
            der::oid_string(arcs)
        )))
    }
}

#[derive(Debug, Clone)]
pub struct TimeStampRequest {
    pub algorithm: DigestAlgorithm,
    pub hash: Vec<u8>,
    pub nonce: [u8; 8],
    pub cert_req: bool,
    pub req_policy: Option<Vec<u64>>,
}

/// Builds a request with a fresh CSPRNG nonce (62 bits of entropy, top two
/// bits cleared so the DER INTEGER encoding is always unambiguously
/// non-negative without a padding byte).
pub fn build_request(
    algorithm: DigestAlgorithm,
    hash: &[u8],
    cert_req: bool,
    req_policy: Option<Vec<u64>>,
) -> WitnessResult<TimeStampRequest> {
    if hash.len() != algorithm.expected_len() {
        return Err(WitnessError::Malformed(format!(
            "hash length {} does not match algorithm (expected {})",
            hash.len(),
            algorithm.expected_len()
        )));
    }
    let mut nonce = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce[0] &= 0x3f;
    Ok(TimeStampRequest {
        algorithm,
        hash: hash.to_vec(),
        nonce,
        cert_req,
        req_policy,
    })
}

pub fn encode_request(request: &TimeStampRequest) -> Vec<u8> {
    let algorithm_identifier = der::encode_sequence(&[der::encode_oid(request.algorithm.oid()), der::encode_null()]);
    let message_imprint = der::encode_sequence(&[algorithm_identifier, der::encode_octet_string(&request.hash)]);

    let mut fields = vec![
        der::encode_integer(1),
        message_imprint,
        der::encode_integer_unsigned(&request.nonce),
    ];
    if request.cert_req {
        fields.push(der::encode_boolean(true));
    }
    if let Some(policy) = &request.req_policy {
        fields.push(der::encode_oid(policy));
    }

    der::encode_sequence(&fields)
}

#[derive(Debug, Clone)]
pub struct TimeStampResponse {
    pub status: i64,
    pub fail_info: Option<String>,
    pub token: Option<TstInfo>,
    pub raw: Vec<u8>,
}

impl TimeStampResponse {
    pub fn gen_time(&self) -> Option<&str> {
        self.token.as_ref().map(|t| t.gen_time.as_str())
    }

    pub fn serial_number(&self) -> Option<&[u8]> {
        self.token.as_ref().map(|t| t.serial_number.as_slice())
    }

    pub fn policy_oid(&self) -> Option<&[u64]> {
        self.token.as_ref().map(|t| t.policy_oid.as_slice())
    }

    pub fn certificates(&self) -> &[Certificate] {
        self.token.as_ref().map(|t| t.certificates.as_slice()).unwrap_or_default()
    }

    /// The signer certificate's subject Common Name, if a certificate set
    /// was present in the response and a leaf certificate can be identified.
    pub fn tsa_name(&self) -> Option<&str> {
        let token = self.token.as_ref()?;
        leaf_certificate(&token.certificates)?.subject_common_name.as_deref()
    }
}

#[derive(Debug, Clone)]
pub struct TstInfo {
    pub gen_time: String,
    pub serial_number: Vec<u8>,
    pub nonce: Option<[u8; 8]>,
    pub policy_oid: Vec<u64>,
    pub message_imprint_algorithm: DigestAlgorithm,
    pub message_imprint_hash: Vec<u8>,
    pub accuracy_seconds: Option<i64>,
    pub certificates: Vec<Certificate>,
}

/// An X.509 certificate as embedded in a CMS `SignedData`'s optional
/// `certificates [0] IMPLICIT CertificateSet`. Only the fields needed to
/// link a chain and check timestamping eligibility are extracted; unknown
/// extensions are ignored.
#[derive(Debug, Clone)]
pub struct Certificate {
    pub raw: Vec<u8>,
    pub subject: Vec<u8>,
    pub issuer: Vec<u8>,
    pub subject_common_name: Option<String>,
    pub not_before: String,
    pub not_after: String,
    pub key_usage_digital_signature: bool,
    pub extended_key_usage: Vec<Vec<u64>>,
}

impl Certificate {
    fn has_timestamping_eku(&self) -> bool {
        self.extended_key_usage.iter().any(|oid| oid == OID_EKU_TIMESTAMPING)
    }
}

/// Parses a CMS `certificates [0] IMPLICIT CertificateSet` field. The
/// context tag is IMPLICIT on a `SET OF Certificate`, so its children are
/// the individual `Certificate ::= SEQUENCE` TLVs directly.
fn parse_certificates_field(field: &Tlv) -> WitnessResult<Vec<Certificate>> {
    let mut certs = Vec::new();
    let mut pos = 0;
    while pos < field.value.len() {
        let (tlv, next) = der::read_tlv(&field.value, pos)?;
        pos = next;
        certs.push(parse_certificate(&tlv)?);
    }
    Ok(certs)
}

fn parse_certificate(cert_tlv: &Tlv) -> WitnessResult<Certificate> {
    let raw = der::raw_bytes(cert_tlv);
    let cert_fields = der::read_sequence_children(&raw)?;
    let tbs = cert_fields
        .first()
        .ok_or_else(|| WitnessError::CertificateInvalid("certificate missing tbsCertificate".into()))?;
    let tbs_fields = der::read_sequence_children(&der::raw_bytes(tbs))?;

    let mut idx = 0;
    if tbs_fields
        .first()
        .map(|f| f.tag == der::CONTEXT_CONSTRUCTED_0)
        .unwrap_or(false)
    {
        idx += 1; // version [0] EXPLICIT, defaults to v1 when absent
    }
    idx += 1; // serialNumber
    idx += 1; // signature AlgorithmIdentifier
    let issuer = tbs_fields
        .get(idx)
        .ok_or_else(|| WitnessError::CertificateInvalid("certificate missing issuer".into()))?;
    idx += 1;
    let validity = tbs_fields
        .get(idx)
        .ok_or_else(|| WitnessError::CertificateInvalid("certificate missing validity".into()))?;
    idx += 1;
    let subject = tbs_fields
        .get(idx)
        .ok_or_else(|| WitnessError::CertificateInvalid("certificate missing subject".into()))?;
    idx += 1;
    idx += 1; // subjectPublicKeyInfo

    let validity_fields = der::read_sequence_children(&der::raw_bytes(validity))?;
    let not_before = time_value_to_string(
        validity_fields
            .first()
            .ok_or_else(|| WitnessError::CertificateInvalid("validity missing notBefore".into()))?,
    );
    let not_after = time_value_to_string(
        validity_fields
            .get(1)
            .ok_or_else(|| WitnessError::CertificateInvalid("validity missing notAfter".into()))?,
    );

    let mut key_usage_digital_signature = false;
    let mut extended_key_usage = Vec::new();
    for field in tbs_fields.iter().skip(idx) {
        if field.tag != der::CONTEXT_CONSTRUCTED_3 {
            continue; // issuerUniqueID/subjectUniqueID, not needed here
        }
        for extension_tlv in der::read_sequence_children(&field.value)? {
            let extension_fields = der::read_sequence_children(&der::raw_bytes(&extension_tlv))?;
            let oid = der::decode_oid(
                extension_fields
                    .first()
                    .ok_or_else(|| WitnessError::CertificateInvalid("extension missing OID".into()))?,
            )?;
            let extn_value = extension_fields
                .last()
                .ok_or_else(|| WitnessError::CertificateInvalid("extension missing extnValue".into()))?;
            let (inner, _) = der::read_tlv(&extn_value.value, 0)?;

            if oid == OID_KEY_USAGE {
                let bits = der::decode_bit_string(&inner)?;
                key_usage_digital_signature =
                    bits.first().map(|b| b & KEY_USAGE_DIGITAL_SIGNATURE != 0).unwrap_or(false);
            } else if oid == OID_EXT_KEY_USAGE {
                for eku_tlv in der::read_sequence_children(&der::raw_bytes(&inner))? {
                    extended_key_usage.push(der::decode_oid(&eku_tlv)?);
                }
            }
        }
    }

    let subject_common_name = common_name_from_name(subject)?;

    Ok(Certificate {
        raw,
        subject: subject.value.clone(),
        issuer: issuer.value.clone(),
        subject_common_name,
        not_before,
        not_after,
        key_usage_digital_signature,
        extended_key_usage,
    })
}

fn time_value_to_string(tlv: &Tlv) -> String {
    String::from_utf8_lossy(&tlv.value).into_owned()
}

/// Extracts the `commonName` attribute value from a `Name` (RDNSequence),
/// which DER-encodes as a SEQUENCE of SET OF { SEQUENCE { OID, value } }.
fn common_name_from_name(name: &Tlv) -> WitnessResult<Option<String>> {
    let rdn_sequence = der::read_children(name)?;
    for rdn_set in &rdn_sequence {
        for attribute_tlv in der::read_children(rdn_set)? {
            let attribute_fields = der::read_children(&attribute_tlv)?;
            let oid = attribute_fields.first().and_then(|tlv| der::decode_oid(tlv).ok());
            if oid.as_deref() == Some(OID_COMMON_NAME) {
                if let Some(value) = attribute_fields.get(1) {
                    return Ok(Some(String::from_utf8_lossy(&value.value).into_owned()));
                }
            }
        }
    }
    Ok(None)
}

/// The certificate nobody else in the set lists as their issuer: the end
/// of the chain, i.e. the signer's own certificate.
fn leaf_certificate(certificates: &[Certificate]) -> Option<&Certificate> {
    certificates
        .iter()
        .find(|candidate| !certificates.iter().any(|other| other.raw != candidate.raw && other.issuer == candidate.subject))
}

/// Parses a TSP response down to the `pkiStatusInfo` and a best-effort
/// extraction of the `TSTInfo` fields actually consumed by validation.
pub fn parse_response(data: &[u8]) -> WitnessResult<TimeStampResponse> {
    let children = der::read_sequence_children(data)?;
    let status_info = children
        .first()
        .ok_or_else(|| WitnessError::Malformed("TimeStampResp missing pkiStatusInfo".into()))?;
    let status_children = {
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < status_info.value.len() {
            let (tlv, next) = der::read_tlv(&status_info.value, pos)?;
            out.push(tlv);
            pos = next;
        }
        out
    };
    let status_tlv = status_children
        .first()
        .ok_or_else(|| WitnessError::Malformed("pkiStatusInfo missing status".into()))?;
    let status = der::decode_integer(status_tlv)?;

    let fail_info = if status_children.len() > 1 {
        Some(format!("{:?}", status_children[1].value))
    } else {
        None
    };

    let token = if children.len() > 1 {
        Some(parse_tst_info_from_content_info(&children[1])?)
    } else {
        None
    };

    Ok(TimeStampResponse {
        status,
        fail_info,
        token,
        raw: data.to_vec(),
    })
}

fn parse_tst_info_from_content_info(content_info: &Tlv) -> WitnessResult<TstInfo> {
    let outer = der::read_sequence_children(&wrap_sequence(content_info))?;
    let _content_type = outer
        .first()
        .ok_or_else(|| WitnessError::Malformed("ContentInfo missing contentType".into()))?;

    let signed_data_wrapper = outer
        .get(1)
        .ok_or_else(|| WitnessError::Malformed("ContentInfo missing content".into()))?;
    let signed_data = der::read_sequence_children(&signed_data_wrapper.value)?;

    let certificates = signed_data
        .iter()
        .skip(3)
        .find(|field| field.tag == der::CONTEXT_CONSTRUCTED_0)
        .map(parse_certificates_field)
        .transpose()?
        .unwrap_or_default();

    let encap_content_info = signed_data
        .get(2)
        .ok_or_else(|| WitnessError::Malformed("SignedData missing encapContentInfo".into()))?;
    let encap_children = der::read_sequence_children(&wrap_sequence(encap_content_info))?;
    let tst_info_wrapper = encap_children
        .get(1)
        .ok_or_else(|| WitnessError::Malformed("encapContentInfo missing eContent".into()))?;
    let tst_info_bytes = &tst_info_wrapper.value;

    let tst_fields = der::read_sequence_children(tst_info_bytes)?;
    // TSTInfo ::= SEQUENCE { version, policy, messageImprint, serialNumber,
    //                        genTime, [accuracy], [ordering], [nonce], ... }
    let policy_oid = der::decode_oid(tst_fields.get(1).ok_or_else(|| {
        WitnessError::Malformed("TSTInfo missing policy".into())
    })?)?;
    let message_imprint_children = der::read_sequence_children(&wrap_sequence(
        tst_fields
            .get(2)
            .ok_or_else(|| WitnessError::Malformed("TSTInfo missing messageImprint".into()))?,
    ))?;
    let algorithm_identifier = der::read_sequence_children(&wrap_sequence(
        message_imprint_children
            .first()
            .ok_or_else(|| WitnessError::Malformed("messageImprint missing algorithmIdentifier".into()))?,
    ))?;
    let algorithm_oid = der::decode_oid(algorithm_identifier.first().ok_or_else(|| {
        WitnessError::Malformed("algorithmIdentifier missing algorithm OID".into())
    })?)?;
    let message_imprint_algorithm = DigestAlgorithm::from_oid(&algorithm_oid)?;
    let message_imprint_hash = message_imprint_children
        .get(1)
        .ok_or_else(|| WitnessError::Malformed("messageImprint missing hashedMessage".into()))?
        .value
        .clone();
    let serial_number = tst_fields
        .get(3)
        .ok_or_else(|| WitnessError::Malformed("TSTInfo missing serialNumber".into()))?
        .value
        .clone();
    let gen_time = tst_fields
        .get(4)
        .ok_or_else(|| WitnessError::Malformed("TSTInfo missing genTime".into()))?;
    let gen_time = String::from_utf8_lossy(&gen_time.value).into_owned();

    let mut accuracy_seconds = None;
    let mut nonce = None;
    for field in &tst_fields[5..] {
        if field.tag == der::TAG_INTEGER {
            if der::decode_integer(field).is_ok() && field.value.len() <= 8 {
                let mut bytes = [0u8; 8];
                let start = 8 - field.value.len().min(8);
                bytes[start..].copy_from_slice(&field.value[field.value.len().saturating_sub(8)..]);
                nonce = Some(bytes);
            }
        } else if field.tag == der::TAG_SEQUENCE {
            if let Ok(seconds_tlv) = der::read_tlv(&field.value, 0) {
                if let Ok(seconds) = der::decode_integer(&seconds_tlv.0) {
                    accuracy_seconds = Some(seconds);
                }
            }
        }
    }

    Ok(TstInfo {
        gen_time,
        serial_number,
        nonce,
        policy_oid,
        message_imprint_algorithm,
        message_imprint_hash,
        accuracy_seconds,
        certificates,
    })
}

fn wrap_sequence(tlv: &Tlv) -> Vec<u8> {
    let mut out = Vec::new();
    der::encode_tlv(der::TAG_SEQUENCE, &tlv.value, &mut out);
    out
}

#[derive(Debug, Clone)]
pub struct TsaConfig {
    pub urls: Vec<String>,
    pub basic_auth: Option<(String, String)>,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
    /// Gates certificate-chain validation (SignedData's embedded certs
    /// linked to one of `trusted_roots`, key-usage, and validity at
    /// genTime). Off by default: many TSAs are used purely for their
    /// timestamp token and never ship a root store to pin against.
    pub verify_certificates: bool,
    /// Raw DER bytes of trusted root certificates. Only consulted when
    /// `verify_certificates` is set.
    pub trusted_roots: Vec<Vec<u8>>,
}

impl Default for TsaConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            basic_auth: None,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
            verify_certificates: false,
            trusted_roots: Vec::new(),
        }
    }
}

/// Verifies the response's embedded certificate chain: the signer
/// certificate must carry the timestamping extended key usage and
/// `digitalSignature` key usage, every certificate in the chain must be
/// valid at `gen_time`, and the chain must terminate at one of
/// `config.trusted_roots`. A no-op when `config.verify_certificates` is
/// false.
fn validate_certificate_chain(certificates: &[Certificate], gen_time: &str, config: &TsaConfig) -> WitnessResult<()> {
    if !config.verify_certificates {
        return Ok(());
    }

    let signer = leaf_certificate(certificates)
        .ok_or_else(|| WitnessError::CertificateInvalid("response carried no certificates".into()))?;

    if !signer.has_timestamping_eku() {
        return Err(WitnessError::CertificateInvalid(
            "signer certificate missing id-kp-timeStamping extended key usage".into(),
        ));
    }
    if !signer.key_usage_digital_signature {
        return Err(WitnessError::CertificateInvalid(
            "signer certificate missing digitalSignature key usage".into(),
        ));
    }

    for cert in certificates {
        if !validity_covers(&cert.not_before, &cert.not_after, gen_time) {
            return Err(WitnessError::CertificateInvalid(format!(
                "certificate not valid at genTime {gen_time}"
            )));
        }
    }

    let mut current = signer;
    for _ in 0..=certificates.len() {
        if config.trusted_roots.iter().any(|root| root == &current.raw) {
            return Ok(());
        }
        match certificates
            .iter()
            .find(|candidate| candidate.raw != current.raw && candidate.subject == current.issuer)
        {
            Some(issuer) => current = issuer,
            None => break,
        }
    }

    Err(WitnessError::CertificateInvalid(
        "certificate chain did not terminate at a trusted root".into(),
    ))
}

fn parse_x509_time(value: &str) -> Option<chrono::NaiveDateTime> {
    let trimmed = value.trim_end_matches('Z');
    if trimmed.len() == 12 {
        chrono::NaiveDateTime::parse_from_str(trimmed, "%y%m%d%H%M%S").ok()
    } else if trimmed.len() >= 14 {
        chrono::NaiveDateTime::parse_from_str(&trimmed[..14], "%Y%m%d%H%M%S").ok()
    } else {
        None
    }
}

fn validity_covers(not_before: &str, not_after: &str, at: &str) -> bool {
    match (parse_x509_time(not_before), parse_x509_time(not_after), parse_x509_time(at)) {
        (Some(nb), Some(na), Some(t)) => t >= nb && t <= na,
        _ => false,
    }
}

const MAX_RESPONSE_BODY: u64 = 10 * 1024 * 1024;

pub fn submit(request: &TimeStampRequest, config: &TsaConfig) -> WitnessResult<TimeStampResponse> {
    let client = reqwest::blocking::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .map_err(|e| WitnessError::Malformed(e.to_string()))?;
    let body = encode_request(request);

    let mut last_err = None;
    for url in &config.urls {
        for _attempt in 0..config.retry_attempts {
            let mut builder = client
                .post(url)
                .header("content-type", "application/timestamp-query")
                .header("accept", "application/timestamp-reply")
                .body(body.clone());
            if let Some((user, pass)) = &config.basic_auth {
                builder = builder.basic_auth(user, Some(pass));
            }
            match builder.send() {
                Ok(response) if response.status().is_success() => {
                    use std::io::Read;
                    let mut buf = Vec::new();
                    if response.take(MAX_RESPONSE_BODY).read_to_end(&mut buf).is_ok() {
                        log_anchor_submission("rfc3161", true, url);
                        return validate_response(&buf, request, config);
                    }
                }
                Ok(response) => last_err = Some(format!("TSA {url} returned {}", response.status())),
                Err(e) => last_err = Some(e.to_string()),
            }
            std::thread::sleep(config.retry_delay);
        }
        if let Some(err) = &last_err {
            log_anchor_submission("rfc3161", false, err);
        }
    }

    Err(WitnessError::Rejected {
        status: -1,
        fail_info: last_err.unwrap_or_else(|| "no TSA responded".into()),
    })
}

/// Runs the full response validation sequence against the originating
/// request (nonce + hash binding), plus certificate-chain verification
/// when `config.verify_certificates` is set.
pub fn validate_response(data: &[u8], request: &TimeStampRequest, config: &TsaConfig) -> WitnessResult<TimeStampResponse> {
    let response = parse_response(data)?;

    if response.status != 0 && response.status != 1 {
        return Err(WitnessError::Rejected {
            status: response.status,
            fail_info: response.fail_info.unwrap_or_default(),
        });
    }

    let token = response
        .token
        .as_ref()
        .ok_or_else(|| WitnessError::Malformed("granted response missing timeStampToken".into()))?;

    if let Some(token_nonce) = token.nonce {
        if token_nonce != request.nonce {
            return Err(WitnessError::NonceMismatch);
        }
    }

    if token.message_imprint_algorithm != request.algorithm || token.message_imprint_hash != request.hash {
        return Err(WitnessError::HashMismatch);
    }

    check_gen_time_not_future(&token.gen_time)?;
    validate_certificate_chain(&token.certificates, &token.gen_time, config)?;

    Ok(response)
}

/// Re-validates a previously received proof against a hash, ignoring the
/// nonce (request-bound, not meaningful on replay).
pub fn verify(hash: &[u8], proof: &[u8], config: &TsaConfig) -> WitnessResult<TimeStampResponse> {
    let response = parse_response(proof)?;
    if response.status != 0 && response.status != 1 {
        return Err(WitnessError::Rejected {
            status: response.status,
            fail_info: response.fail_info.unwrap_or_default(),
        });
    }
    let token = response
        .token
        .as_ref()
        .ok_or_else(|| WitnessError::Malformed("granted response missing timeStampToken".into()))?;
    if token.message_imprint_hash != hash {
        return Err(WitnessError::HashMismatch);
    }
    check_gen_time_not_future(&token.gen_time)?;
    validate_certificate_chain(&token.certificates, &token.gen_time, config)?;
    Ok(response)
}

fn check_gen_time_not_future(gen_time: &str) -> WitnessResult<()> {
    // genTime is GeneralizedTime, "YYYYMMDDHHMMSSZ"; parsed structurally
    // rather than via a full calendar library since only a future-timestamp
    // bound is enforced here.
    if gen_time.len() < 14 {
        return Err(WitnessError::Malformed("genTime malformed".into()));
    }
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    if let Ok(parsed) = chrono::NaiveDateTime::parse_from_str(&gen_time[..14], "%Y%m%d%H%M%S") {
        let gen_secs = parsed.and_utc().timestamp();
        let tolerance = 5 * 60;
        if gen_secs > now.as_secs() as i64 + tolerance {
            return Err(WitnessError::FutureTimestamp);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_der() {
        let request = build_request(DigestAlgorithm::Sha256, &[7u8; 32], true, None).unwrap();
        let encoded = encode_request(&request);
        let children = der::read_sequence_children(&encoded).unwrap();
        assert_eq!(der::decode_integer(&children[0]).unwrap(), 1);
    }

    #[test]
    fn build_request_rejects_wrong_length_hash() {
        assert!(build_request(DigestAlgorithm::Sha256, &[0u8; 20], false, None).is_err());
    }

    #[test]
    fn digest_algorithm_oid_round_trips() {
        for algo in [
            DigestAlgorithm::Sha1,
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Sha384,
            DigestAlgorithm::Sha512,
        ] {
            assert_eq!(DigestAlgorithm::from_oid(algo.oid()).unwrap(), algo);
        }
    }

    #[test]
    fn nonce_top_bits_cleared_for_unsigned_encoding() {
        let request = build_request(DigestAlgorithm::Sha256, &[1u8; 32], false, None).unwrap();
        assert_eq!(request.nonce[0] & 0xc0, 0);
    }

    fn encode_set(items: &[Vec<u8>]) -> Vec<u8> {
        let mut body = Vec::new();
        for item in items {
            body.extend_from_slice(item);
        }
        let mut out = Vec::new();
        der::encode_tlv(der::TAG_SET, &body, &mut out);
        out
    }

    fn encode_printable_string(s: &str) -> Vec<u8> {
        let mut out = Vec::new();
        der::encode_tlv(0x13, s.as_bytes(), &mut out);
        out
    }

    fn encode_name(cn: &str) -> Vec<u8> {
        let attr = der::encode_sequence(&[der::encode_oid(OID_COMMON_NAME), encode_printable_string(cn)]);
        der::encode_sequence(&[encode_set(&[attr])])
    }

    fn encode_utc_time(s: &str) -> Vec<u8> {
        let mut out = Vec::new();
        der::encode_tlv(der::TAG_UTC_TIME, s.as_bytes(), &mut out);
        out
    }

    fn encode_key_usage_extension(digital_signature: bool) -> Vec<u8> {
        let byte0 = if digital_signature { 0x80u8 } else { 0x00 };
        let mut bit_string = Vec::new();
        der::encode_tlv(der::TAG_BIT_STRING, &[0u8, byte0], &mut bit_string);
        der::encode_sequence(&[der::encode_oid(OID_KEY_USAGE), der::encode_octet_string(&bit_string)])
    }

    fn encode_eku_extension(ekus: &[&[u64]]) -> Vec<u8> {
        let oid_list = der::encode_sequence(&ekus.iter().map(|o| der::encode_oid(o)).collect::<Vec<_>>());
        der::encode_sequence(&[der::encode_oid(OID_EXT_KEY_USAGE), der::encode_octet_string(&oid_list)])
    }

    fn encode_test_certificate(
        issuer_cn: &str,
        subject_cn: &str,
        not_before: &str,
        not_after: &str,
        key_usage_ds: bool,
        ekus: &[&[u64]],
    ) -> Vec<u8> {
        let validity = der::encode_sequence(&[encode_utc_time(not_before), encode_utc_time(not_after)]);
        let spki = der::encode_sequence(&[]);
        let extensions = der::encode_context(
            der::CONTEXT_CONSTRUCTED_3,
            &[der::encode_sequence(&[
                encode_key_usage_extension(key_usage_ds),
                encode_eku_extension(ekus),
            ])],
        );
        let tbs = der::encode_sequence(&[
            der::encode_integer(1),
            der::encode_sequence(&[der::encode_oid(OID_SHA256), der::encode_null()]),
            encode_name(issuer_cn),
            validity,
            encode_name(subject_cn),
            spki,
            extensions,
        ]);
        let sig_alg = der::encode_sequence(&[der::encode_oid(OID_SHA256), der::encode_null()]);
        let mut sig_value = Vec::new();
        der::encode_tlv(der::TAG_BIT_STRING, &[0u8, 0xAB], &mut sig_value);
        der::encode_sequence(&[tbs, sig_alg, sig_value])
    }

    fn test_chain() -> (Certificate, Certificate, Vec<u8>) {
        let root_bytes = encode_test_certificate("test-root", "test-root", "240101000000Z", "260101000000Z", true, &[]);
        let leaf_bytes = encode_test_certificate(
            "test-root",
            "test-tsa",
            "240101000000Z",
            "260101000000Z",
            true,
            &[OID_EKU_TIMESTAMPING],
        );
        let root = parse_certificate(&der::read_tlv(&root_bytes, 0).unwrap().0).unwrap();
        let leaf = parse_certificate(&der::read_tlv(&leaf_bytes, 0).unwrap().0).unwrap();
        (root, leaf, root_bytes)
    }

    #[test]
    fn certificate_verification_is_skipped_when_disabled() {
        let (root, leaf, _root_bytes) = test_chain();
        let config = TsaConfig::default();
        assert!(validate_certificate_chain(&[leaf, root], "20250615120000Z", &config).is_ok());
    }

    #[test]
    fn trusted_chain_to_root_verifies() {
        let (root, leaf, root_bytes) = test_chain();
        let config = TsaConfig {
            verify_certificates: true,
            trusted_roots: vec![root_bytes],
            ..Default::default()
        };
        assert!(validate_certificate_chain(&[leaf, root], "20250615120000Z", &config).is_ok());
    }

    #[test]
    fn untrusted_root_is_rejected() {
        let (root, leaf, _root_bytes) = test_chain();
        let config = TsaConfig {
            verify_certificates: true,
            trusted_roots: Vec::new(),
            ..Default::default()
        };
        assert!(matches!(
            validate_certificate_chain(&[leaf, root], "20250615120000Z", &config),
            Err(WitnessError::CertificateInvalid(_))
        ));
    }

    #[test]
    fn missing_timestamping_eku_is_rejected() {
        let root_bytes = encode_test_certificate("test-root", "test-root", "240101000000Z", "260101000000Z", true, &[]);
        let leaf_bytes = encode_test_certificate("test-root", "test-tsa", "240101000000Z", "260101000000Z", true, &[]);
        let root = parse_certificate(&der::read_tlv(&root_bytes, 0).unwrap().0).unwrap();
        let leaf = parse_certificate(&der::read_tlv(&leaf_bytes, 0).unwrap().0).unwrap();
        let config = TsaConfig {
            verify_certificates: true,
            trusted_roots: vec![root_bytes],
            ..Default::default()
        };
        assert!(matches!(
            validate_certificate_chain(&[leaf, root], "20250615120000Z", &config),
            Err(WitnessError::CertificateInvalid(_))
        ));
    }

    #[test]
    fn expired_certificate_is_rejected() {
        let (root, leaf, root_bytes) = test_chain();
        let config = TsaConfig {
            verify_certificates: true,
            trusted_roots: vec![root_bytes],
            ..Default::default()
        };
        assert!(matches!(
            validate_certificate_chain(&[leaf, root], "20270101000000Z", &config),
            Err(WitnessError::CertificateInvalid(_))
        ));
    }

    #[test]
    fn subject_common_name_is_extracted_for_tsa_name() {
        let leaf_bytes = encode_test_certificate(
            "test-root",
            "test-tsa",
            "240101000000Z",
            "260101000000Z",
            true,
            &[OID_EKU_TIMESTAMPING],
        );
        let leaf = parse_certificate(&der::read_tlv(&leaf_bytes, 0).unwrap().0).unwrap();
        assert_eq!(leaf.subject_common_name.as_deref(), Some("test-tsa"));
    }
}
