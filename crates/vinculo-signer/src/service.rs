//! Signature service.
//!
//! Resolves the organization's single active certificate, enforces its
//! validity window, dispatches to the kind-specific signing backend and
//! re-validates the signed payload before handing it back. A payload that
//! fails the post-signature gate never reaches the transport layer.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

use vinculo_core::validation::{ValidationTarget, Validator};
use vinculo_core::{CertificateId, OrgId};
use vinculo_events::EventType;

use crate::certificate::{Certificate, CertificateKind, CertificateMaterial, CertificateProvider};
use crate::crypto::CredentialEncryption;
use crate::error::{SignatureError, SignatureResult};
use crate::signer::{A1Signer, A3Signer, SigningMaterial, TokenGateway, XmlSigner};

/// A signed event payload.
#[derive(Debug, Clone)]
pub struct SignedEvent {
    pub xml: String,
    pub certificate_id: CertificateId,
    pub certificate_subject: String,
}

/// Signs built event payloads with the organization's active certificate.
pub struct SignatureService {
    provider: Arc<dyn CertificateProvider>,
    crypto: CredentialEncryption,
    a1: A1Signer,
    a3: Option<A3Signer>,
    validator: Validator,
}

impl SignatureService {
    pub fn new(provider: Arc<dyn CertificateProvider>, crypto: CredentialEncryption) -> Self {
        Self {
            provider,
            crypto,
            a1: A1Signer::new(),
            a3: None,
            validator: Validator::new(),
        }
    }

    /// Enable hardware-token signing through `gateway`.
    #[must_use]
    pub fn with_token_gateway(mut self, gateway: Arc<dyn TokenGateway>) -> Self {
        self.a3 = Some(A3Signer::new(gateway));
        self
    }

    /// Sign `xml` for `org_id`.
    ///
    /// `secret` overrides the stored archive password for file-based
    /// certificates (hardware tokens authenticate out of band).
    pub async fn sign_event(
        &self,
        org_id: OrgId,
        event_type: EventType,
        xml: &str,
        secret: Option<&str>,
    ) -> SignatureResult<SignedEvent> {
        let certificate = self
            .provider
            .active_certificate(org_id)
            .await?
            .ok_or(SignatureError::NoActiveCertificate { org_id })?;
        certificate.check_validity(Utc::now())?;

        let material = self.resolve_material(&certificate, secret).await?;
        let signed_xml = match certificate.kind {
            CertificateKind::FileBased => self.a1.sign(xml, &material).await?,
            CertificateKind::HardwareToken => match &self.a3 {
                Some(signer) => signer.sign(xml, &material).await?,
                None => {
                    return Err(SignatureError::TokenUnavailable {
                        message: "no token gateway configured".to_string(),
                    })
                }
            },
        };

        // Post-signature gate: catch a signature that corrupted or
        // incompletely wrapped the payload before it can reach the wire.
        let outcome = self.validator.validate(&ValidationTarget::Xml {
            event_code: event_type.code(),
            root_element: event_type.root_element(),
            xml: &signed_xml,
            signed: true,
        });
        if outcome.has_errors() {
            warn!(
                org_id = %org_id,
                event_type = %event_type,
                errors = outcome.errors().count(),
                "signed payload failed re-validation"
            );
            return Err(SignatureError::PostSignValidation {
                issues: outcome.issues,
            });
        }

        debug!(
            org_id = %org_id,
            event_type = %event_type,
            certificate = %certificate.id,
            "event payload signed"
        );
        Ok(SignedEvent {
            xml: signed_xml,
            certificate_id: certificate.id,
            certificate_subject: certificate.subject,
        })
    }

    async fn resolve_material(
        &self,
        certificate: &Certificate,
        secret: Option<&str>,
    ) -> SignatureResult<SigningMaterial> {
        match &certificate.material {
            CertificateMaterial::PfxRef {
                blob_key,
                encrypted_password,
            } => {
                let der = self.provider.fetch_pkcs12(blob_key).await?;
                let password = match (secret, encrypted_password) {
                    (Some(secret), _) => secret.to_string(),
                    (None, Some(stored)) => {
                        let plaintext = self.crypto.decrypt(certificate.org_id, stored)?;
                        String::from_utf8(plaintext).map_err(|_| SignatureError::Decryption {
                            message: "stored password is not valid UTF-8".to_string(),
                        })?
                    }
                    (None, None) => {
                        return Err(SignatureError::MaterialMissing {
                            detail: "no archive password supplied or stored".to_string(),
                        })
                    }
                };
                Ok(SigningMaterial::Pkcs12 { der, password })
            }
            CertificateMaterial::Thumbprint { value } => Ok(SigningMaterial::Token {
                thumbprint: value.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_pkcs12;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const PAYLOAD: &str = "<eSocial xmlns=\"http://www.esocial.gov.br/schema/evt/evtMonit/v_S_01_02_00\"><evtMonit Id=\"ID1\"><ideEvento><tpAmb>2</tpAmb></ideEvento></evtMonit></eSocial>";

    struct InMemoryProvider {
        certificates: Mutex<HashMap<OrgId, Certificate>>,
        blobs: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl CertificateProvider for InMemoryProvider {
        async fn active_certificate(&self, org_id: OrgId) -> SignatureResult<Option<Certificate>> {
            Ok(self.certificates.lock().unwrap().get(&org_id).cloned())
        }

        async fn fetch_pkcs12(&self, blob_key: &str) -> SignatureResult<Vec<u8>> {
            self.blobs
                .get(blob_key)
                .cloned()
                .ok_or_else(|| SignatureError::BlobFetch {
                    key: blob_key.to_string(),
                    message: "not found".to_string(),
                })
        }
    }

    fn valid_certificate(org_id: OrgId, encrypted_password: Option<Vec<u8>>) -> Certificate {
        let now = Utc::now();
        Certificate {
            id: CertificateId::new(),
            org_id,
            kind: CertificateKind::FileBased,
            subject: "CN=Vinculo Test".to_string(),
            not_before: now - Duration::days(1),
            not_after: now + Duration::days(364),
            material: CertificateMaterial::PfxRef {
                blob_key: "certs/test.p12".to_string(),
                encrypted_password,
            },
            active: true,
        }
    }

    fn crypto() -> CredentialEncryption {
        CredentialEncryption::new([3u8; 32])
    }

    fn service_for(org_id: OrgId, certificate: Option<Certificate>) -> SignatureService {
        let mut certificates = HashMap::new();
        if let Some(certificate) = certificate {
            certificates.insert(org_id, certificate);
        }
        let mut blobs = HashMap::new();
        blobs.insert("certs/test.p12".to_string(), test_pkcs12("changeit"));
        let provider = InMemoryProvider {
            certificates: Mutex::new(certificates),
            blobs,
        };
        SignatureService::new(Arc::new(provider), crypto())
    }

    #[tokio::test]
    async fn test_sign_with_explicit_secret() {
        let org_id = OrgId::new();
        let service = service_for(org_id, Some(valid_certificate(org_id, None)));
        let signed = service
            .sign_event(org_id, EventType::HealthMonitoring, PAYLOAD, Some("changeit"))
            .await
            .unwrap();
        assert!(signed.xml.contains("<Signature"));
        assert_eq!(signed.certificate_subject, "CN=Vinculo Test");
    }

    #[tokio::test]
    async fn test_sign_with_stored_password() {
        let org_id = OrgId::new();
        let stored = crypto().encrypt(org_id, b"changeit").unwrap();
        let service = service_for(org_id, Some(valid_certificate(org_id, Some(stored))));
        let signed = service
            .sign_event(org_id, EventType::HealthMonitoring, PAYLOAD, None)
            .await
            .unwrap();
        assert!(signed.xml.contains("<SignatureValue>"));
    }

    #[tokio::test]
    async fn test_no_active_certificate() {
        let org_id = OrgId::new();
        let service = service_for(org_id, None);
        assert!(matches!(
            service
                .sign_event(org_id, EventType::HealthMonitoring, PAYLOAD, Some("x"))
                .await,
            Err(SignatureError::NoActiveCertificate { .. })
        ));
    }

    #[tokio::test]
    async fn test_expired_certificate_rejected() {
        let org_id = OrgId::new();
        let mut certificate = valid_certificate(org_id, None);
        certificate.not_after = Utc::now() - Duration::days(1);
        let service = service_for(org_id, Some(certificate));
        assert!(matches!(
            service
                .sign_event(org_id, EventType::HealthMonitoring, PAYLOAD, Some("changeit"))
                .await,
            Err(SignatureError::CertificateExpired { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_password_is_material_missing() {
        let org_id = OrgId::new();
        let service = service_for(org_id, Some(valid_certificate(org_id, None)));
        assert!(matches!(
            service
                .sign_event(org_id, EventType::HealthMonitoring, PAYLOAD, None)
                .await,
            Err(SignatureError::MaterialMissing { .. })
        ));
    }

    #[tokio::test]
    async fn test_token_certificate_without_gateway() {
        let org_id = OrgId::new();
        let mut certificate = valid_certificate(org_id, None);
        certificate.kind = CertificateKind::HardwareToken;
        certificate.material = CertificateMaterial::Thumbprint {
            value: "ab12cd34".to_string(),
        };
        let service = service_for(org_id, Some(certificate));
        assert!(matches!(
            service
                .sign_event(org_id, EventType::HealthMonitoring, PAYLOAD, None)
                .await,
            Err(SignatureError::TokenUnavailable { .. })
        ));
    }
}
