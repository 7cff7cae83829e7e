//! Signing backends.
//!
//! An enveloped XML-DSig (exclusive C14N, SHA-256 digest, RSA-SHA256) is
//! appended as the last child of the `eSocial` root. The cryptographic
//! primitive is pluggable: [`A1Signer`] operates on a PKCS#12 archive,
//! [`A3Signer`] delegates to a hardware-token gateway by thumbprint.
//!
//! The payloads being signed are produced by this workspace's own document
//! builder, which already emits canonical form (UTF-8, no comments, no
//! redundant whitespace), so the reference digest is computed over the
//! payload bytes as rendered.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use openssl::hash::MessageDigest;
use openssl::pkcs12::Pkcs12;
use std::sync::Arc;

use vinculo_events::XmlElement;

use crate::certificate::CertificateKind;
use crate::error::{SignatureError, SignatureResult};

const ALG_C14N_EXCLUSIVE: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
const ALG_ENVELOPED: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const ALG_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
const ALG_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
const NS_XMLDSIG: &str = "http://www.w3.org/2000/09/xmldsig#";

/// Material resolved for a signing operation.
#[derive(Debug, Clone)]
pub enum SigningMaterial {
    /// PKCS#12 archive bytes plus its password.
    Pkcs12 { der: Vec<u8>, password: String },
    /// Thumbprint of a token-held certificate.
    Token { thumbprint: String },
}

/// A signing backend for one certificate kind.
#[async_trait]
pub trait XmlSigner: Send + Sync {
    /// The certificate kind this backend handles.
    fn kind(&self) -> CertificateKind;

    /// Sign `xml` and return the payload with the enveloped signature.
    async fn sign(&self, xml: &str, material: &SigningMaterial) -> SignatureResult<String>;
}

/// Access to a hardware token holding the private key.
#[async_trait]
pub trait TokenGateway: Send + Sync {
    /// RSA-SHA256 signature over `data` with the key behind `thumbprint`.
    async fn sign_sha256(&self, thumbprint: &str, data: &[u8]) -> Result<Vec<u8>, String>;

    /// DER encoding of the certificate behind `thumbprint`.
    async fn certificate_der(&self, thumbprint: &str) -> Result<Vec<u8>, String>;
}

/// File-based (A1) signer over a PKCS#12 archive.
#[derive(Debug, Default, Clone, Copy)]
pub struct A1Signer;

impl A1Signer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl XmlSigner for A1Signer {
    fn kind(&self) -> CertificateKind {
        CertificateKind::FileBased
    }

    async fn sign(&self, xml: &str, material: &SigningMaterial) -> SignatureResult<String> {
        let SigningMaterial::Pkcs12 { der, password } = material else {
            return Err(SignatureError::MaterialMissing {
                detail: "A1 signer requires a PKCS#12 archive".to_string(),
            });
        };

        let parsed = Pkcs12::from_der(der)?.parse2(password)?;
        let pkey = parsed.pkey.ok_or_else(|| SignatureError::MaterialMissing {
            detail: "PKCS#12 archive carries no private key".to_string(),
        })?;
        let cert = parsed.cert.ok_or_else(|| SignatureError::MaterialMissing {
            detail: "PKCS#12 archive carries no certificate".to_string(),
        })?;

        let digest_value = sha256_base64(xml.as_bytes())?;
        let signed_info = signed_info_element(&digest_value);
        let signed_info_xml = signed_info.to_xml();

        let mut signer = openssl::sign::Signer::new(MessageDigest::sha256(), &pkey)?;
        let signature_bytes = signer.sign_oneshot_to_vec(signed_info_xml.as_bytes())?;

        let certificate_b64 = STANDARD.encode(cert.to_der()?);
        let signature =
            signature_element(signed_info, &STANDARD.encode(signature_bytes), &certificate_b64);
        insert_signature(xml, &signature.to_xml())
    }
}

/// Hardware-token (A3) signer delegating to a [`TokenGateway`].
pub struct A3Signer {
    gateway: Arc<dyn TokenGateway>,
}

impl A3Signer {
    pub fn new(gateway: Arc<dyn TokenGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl XmlSigner for A3Signer {
    fn kind(&self) -> CertificateKind {
        CertificateKind::HardwareToken
    }

    async fn sign(&self, xml: &str, material: &SigningMaterial) -> SignatureResult<String> {
        let SigningMaterial::Token { thumbprint } = material else {
            return Err(SignatureError::MaterialMissing {
                detail: "A3 signer requires a token thumbprint".to_string(),
            });
        };

        let digest_value = sha256_base64(xml.as_bytes())?;
        let signed_info = signed_info_element(&digest_value);
        let signed_info_xml = signed_info.to_xml();

        let signature_bytes = self
            .gateway
            .sign_sha256(thumbprint, signed_info_xml.as_bytes())
            .await
            .map_err(|message| SignatureError::TokenUnavailable { message })?;
        let certificate_der = self
            .gateway
            .certificate_der(thumbprint)
            .await
            .map_err(|message| SignatureError::TokenUnavailable { message })?;

        let signature = signature_element(
            signed_info,
            &STANDARD.encode(signature_bytes),
            &STANDARD.encode(certificate_der),
        );
        insert_signature(xml, &signature.to_xml())
    }
}

fn sha256_base64(data: &[u8]) -> SignatureResult<String> {
    let digest = openssl::hash::hash(MessageDigest::sha256(), data)?;
    Ok(STANDARD.encode(&*digest))
}

fn signed_info_element(digest_value: &str) -> XmlElement {
    XmlElement::new("SignedInfo")
        .child(XmlElement::new("CanonicalizationMethod").attr("Algorithm", ALG_C14N_EXCLUSIVE))
        .child(XmlElement::new("SignatureMethod").attr("Algorithm", ALG_RSA_SHA256))
        .child(
            XmlElement::new("Reference")
                .attr("URI", "")
                .child(
                    XmlElement::new("Transforms")
                        .child(XmlElement::new("Transform").attr("Algorithm", ALG_ENVELOPED))
                        .child(XmlElement::new("Transform").attr("Algorithm", ALG_C14N_EXCLUSIVE)),
                )
                .child(XmlElement::new("DigestMethod").attr("Algorithm", ALG_SHA256))
                .child(XmlElement::leaf("DigestValue", digest_value)),
        )
}

fn signature_element(
    signed_info: XmlElement,
    signature_value: &str,
    certificate_b64: &str,
) -> XmlElement {
    XmlElement::new("Signature")
        .attr("xmlns", NS_XMLDSIG)
        .child(signed_info)
        .child(XmlElement::leaf("SignatureValue", signature_value))
        .child(
            XmlElement::new("KeyInfo").child(
                XmlElement::new("X509Data")
                    .child(XmlElement::leaf("X509Certificate", certificate_b64)),
            ),
        )
}

/// Insert the signature as the last child of the `eSocial` root.
fn insert_signature(xml: &str, signature_xml: &str) -> SignatureResult<String> {
    const CLOSE: &str = "</eSocial>";
    let position = xml.rfind(CLOSE).ok_or_else(|| SignatureError::SigningFailed {
        message: "payload has no eSocial root to envelope".to_string(),
    })?;
    let mut signed = String::with_capacity(xml.len() + signature_xml.len());
    signed.push_str(&xml[..position]);
    signed.push_str(signature_xml);
    signed.push_str(&xml[position..]);
    Ok(signed)
}
