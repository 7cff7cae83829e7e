//! Validation rule engine.
//!
//! Runs an ordered set of named rules over an event, accumulating every
//! issue instead of short-circuiting on the first failure. Error-level
//! issues block the owning operation (build, pre/post-signature gate);
//! warning-level issues are recorded and propagated without blocking.

use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

use crate::documents::{Cnpj, Competence, Cpf};

/// Severity of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueLevel {
    /// Blocks the owning operation.
    Error,
    /// Recorded for audit, never blocks.
    Warning,
}

impl std::fmt::Display for IssueLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single finding produced by a validation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub level: IssueLevel,
    /// Name of the rule that produced the issue.
    pub rule: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn error(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Error,
            rule: rule.into(),
            message: message.into(),
        }
    }

    pub fn warning(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warning,
            rule: rule.into(),
            message: message.into(),
        }
    }
}

/// Accumulated result of a validation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationOutcome {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.level == IssueLevel::Error)
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.has_errors()
    }

    /// Error-level issues only.
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.level == IssueLevel::Error)
    }

    /// Warning-level issues only.
    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.level == IssueLevel::Warning)
    }
}

/// Logical fields of an event, extracted by the event builder before the
/// payload is rendered. Only the fields relevant to the rule set appear
/// here; `None` means "absent in the source record".
#[derive(Debug, Clone, Default)]
pub struct LogicalEvent {
    /// Event type code, e.g. `"S-2220"`.
    pub event_code: String,
    pub worker_cpf: Option<String>,
    pub employer_cnpj: Option<String>,
    pub competence: Option<String>,
    /// Exam date, required for health-monitoring events.
    pub exam_date: Option<String>,
    /// Exam result, required for health-monitoring events.
    pub exam_result: Option<String>,
    /// Exposure start date, required for risk-exposure events.
    pub exposure_start: Option<String>,
    /// Number of hazard agents attached to a risk-exposure event.
    pub hazard_agent_count: usize,
    /// Accident date, required for accident-communication events.
    pub accident_date: Option<String>,
    /// Whether the event retifies a previously accepted one.
    pub is_retification: bool,
    /// Receipt number of the retified event, required when retifying.
    pub prior_receipt: Option<String>,
}

/// Input handed to the validator.
#[derive(Debug, Clone)]
pub enum ValidationTarget<'a> {
    /// Pre-build check over the logical fields of an event.
    Fields(LogicalEvent),
    /// Structural check over a rendered (and possibly signed) payload.
    Xml {
        event_code: &'a str,
        /// Expected event root element, e.g. `evtMonit`.
        root_element: &'a str,
        xml: &'a str,
        /// When true, the signature algorithm rules run at error level.
        signed: bool,
    },
}

type RuleFn = fn(&ValidationTarget<'_>) -> Vec<ValidationIssue>;

struct Rule {
    name: &'static str,
    enabled: bool,
    run: RuleFn,
}

/// Ordered, named-rule validator.
///
/// Rules run in registration order and every rule runs even after a prior
/// rule produced errors.
pub struct Validator {
    rules: Vec<Rule>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    /// Build a validator with the default rule set registered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: vec![
                Rule { name: "required_fields", enabled: true, run: rule_required_fields },
                Rule { name: "worker_cpf_format", enabled: true, run: rule_cpf_format },
                Rule { name: "employer_cnpj_format", enabled: true, run: rule_cnpj_format },
                Rule { name: "competence_format", enabled: true, run: rule_competence_format },
                Rule { name: "xml_well_formed", enabled: true, run: rule_xml_well_formed },
                Rule { name: "xml_root_element", enabled: true, run: rule_xml_root_element },
                Rule { name: "signature_present", enabled: true, run: rule_signature_present },
                Rule { name: "signature_algorithms", enabled: true, run: rule_signature_algorithms },
            ],
        }
    }

    /// Enable or disable a rule by name. Unknown names are ignored.
    pub fn set_rule_enabled(&mut self, name: &str, enabled: bool) {
        if let Some(rule) = self.rules.iter_mut().find(|r| r.name == name) {
            rule.enabled = enabled;
        }
    }

    /// Run every enabled rule, accumulating all issues.
    #[must_use]
    pub fn validate(&self, target: &ValidationTarget<'_>) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();
        for rule in self.rules.iter().filter(|r| r.enabled) {
            outcome.issues.extend((rule.run)(target));
        }
        outcome
    }
}

fn rule_required_fields(target: &ValidationTarget<'_>) -> Vec<ValidationIssue> {
    let ValidationTarget::Fields(event) = target else {
        return Vec::new();
    };
    let mut issues = Vec::new();
    let mut require = |present: bool, message: &str| {
        if !present {
            issues.push(ValidationIssue::error("required_fields", message));
        }
    };

    require(event.worker_cpf.is_some() || event.event_code == "S-1000",
        "worker CPF is required");

    match event.event_code.as_str() {
        "S-2220" => {
            require(event.exam_date.is_some(), "exam date is required for health-monitoring events");
            require(event.exam_result.is_some(), "exam result is required for health-monitoring events");
        }
        "S-2240" => {
            require(
                event.exposure_start.is_some(),
                "exposure start date is required for risk-exposure events",
            );
            require(
                event.hazard_agent_count >= 1,
                "at least one hazard agent is required for risk-exposure events",
            );
        }
        "S-2210" => {
            require(event.accident_date.is_some(), "accident date is required for accident events");
        }
        _ => {}
    }

    if event.is_retification {
        require(
            event.prior_receipt.is_some(),
            "receipt number of the original event is required when retifying",
        );
    }
    issues
}

fn rule_cpf_format(target: &ValidationTarget<'_>) -> Vec<ValidationIssue> {
    let ValidationTarget::Fields(event) = target else {
        return Vec::new();
    };
    match event.worker_cpf.as_deref() {
        Some(raw) => match Cpf::parse(raw) {
            Ok(_) => Vec::new(),
            Err(e) => vec![ValidationIssue::error("worker_cpf_format", e.to_string())],
        },
        None => Vec::new(),
    }
}

fn rule_cnpj_format(target: &ValidationTarget<'_>) -> Vec<ValidationIssue> {
    let ValidationTarget::Fields(event) = target else {
        return Vec::new();
    };
    match event.employer_cnpj.as_deref() {
        Some(raw) => match Cnpj::parse(raw) {
            Ok(_) => Vec::new(),
            Err(e) => vec![ValidationIssue::error("employer_cnpj_format", e.to_string())],
        },
        None => Vec::new(),
    }
}

fn rule_competence_format(target: &ValidationTarget<'_>) -> Vec<ValidationIssue> {
    let ValidationTarget::Fields(event) = target else {
        return Vec::new();
    };
    match event.competence.as_deref() {
        Some(raw) => match Competence::parse(raw) {
            Ok(_) => Vec::new(),
            Err(e) => vec![ValidationIssue::error("competence_format", e.to_string())],
        },
        None => Vec::new(),
    }
}

/// Scan with quick-xml until EOF; any reader error means the document is
/// not well formed (unbalanced tags, bad entities, truncation).
fn rule_xml_well_formed(target: &ValidationTarget<'_>) -> Vec<ValidationIssue> {
    let ValidationTarget::Xml { xml, .. } = target else {
        return Vec::new();
    };
    let mut reader = Reader::from_str(xml);
    let mut depth: i64 = 0;
    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(_)) => depth += 1,
            Ok(XmlEvent::End(_)) => depth -= 1,
            Ok(XmlEvent::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return vec![ValidationIssue::error(
                    "xml_well_formed",
                    format!("payload is not well-formed XML: {e}"),
                )];
            }
        }
    }
    if depth != 0 {
        return vec![ValidationIssue::error(
            "xml_well_formed",
            "payload has unbalanced open/close tags",
        )];
    }
    Vec::new()
}

fn rule_xml_root_element(target: &ValidationTarget<'_>) -> Vec<ValidationIssue> {
    let ValidationTarget::Xml { root_element, xml, .. } = target else {
        return Vec::new();
    };
    let mut reader = Reader::from_str(xml);
    let mut document_root: Option<String> = None;
    let mut event_root_found = false;
    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if document_root.is_none() {
                    document_root = Some(name.clone());
                }
                if name == *root_element {
                    event_root_found = true;
                }
            }
            Ok(XmlEvent::Eof) | Err(_) => break,
            Ok(_) => {}
        }
    }
    let mut issues = Vec::new();
    match document_root.as_deref() {
        Some("eSocial") => {}
        Some(other) => issues.push(ValidationIssue::error(
            "xml_root_element",
            format!("document root must be 'eSocial', found '{other}'"),
        )),
        None => issues.push(ValidationIssue::error(
            "xml_root_element",
            "payload has no root element",
        )),
    }
    if !event_root_found {
        issues.push(ValidationIssue::error(
            "xml_root_element",
            format!("expected event element '{root_element}' not present"),
        ));
    }
    issues
}

fn rule_signature_present(target: &ValidationTarget<'_>) -> Vec<ValidationIssue> {
    let ValidationTarget::Xml { xml, signed, .. } = target else {
        return Vec::new();
    };
    let present = element_present(xml, "Signature");
    if *signed && !present {
        vec![ValidationIssue::error(
            "signature_present",
            "signed payload carries no Signature element",
        )]
    } else if !*signed && !present {
        // Pre-signature payloads are expected to be unsigned; record for audit.
        vec![ValidationIssue::warning(
            "signature_present",
            "payload carries no digital-signature block",
        )]
    } else {
        Vec::new()
    }
}

/// Post-signature algorithm checks: exclusive C14N, enveloped transform,
/// SHA-256 digest, RSA-SHA256 signature. X509Data absence is only a warning.
fn rule_signature_algorithms(target: &ValidationTarget<'_>) -> Vec<ValidationIssue> {
    let ValidationTarget::Xml { xml, signed, .. } = target else {
        return Vec::new();
    };
    if !*signed || !element_present(xml, "Signature") {
        return Vec::new();
    }

    let mut issues = Vec::new();
    let mut check = |element: &str, algorithm: &str, message: &str| {
        if !algorithm_matches(xml, element, algorithm) {
            issues.push(ValidationIssue::error("signature_algorithms", message));
        }
    };

    check(
        "CanonicalizationMethod",
        "xml-exc-c14n#",
        "CanonicalizationMethod must use exclusive XML canonicalization",
    );
    check(
        "Transform",
        "enveloped-signature",
        "Transforms must include the enveloped-signature transform",
    );
    check("DigestMethod", "sha256", "DigestMethod must use SHA-256");
    check(
        "SignatureMethod",
        "rsa-sha256",
        "SignatureMethod must use RSA-SHA256",
    );

    if !element_present(xml, "X509Data") {
        issues.push(ValidationIssue::warning(
            "signature_algorithms",
            "KeyInfo should include the X509 certificate chain",
        ));
    }
    issues
}

fn element_present(xml: &str, local_name: &str) -> bool {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) | Ok(XmlEvent::Empty(e)) => {
                if e.local_name().as_ref() == local_name.as_bytes() {
                    return true;
                }
            }
            Ok(XmlEvent::Eof) | Err(_) => return false,
            Ok(_) => {}
        }
    }
}

/// True when at least one `local_name` element carries an `Algorithm`
/// attribute containing `fragment`.
fn algorithm_matches(xml: &str, local_name: &str, fragment: &str) -> bool {
    let mut reader = Reader::from_str(xml);
    loop {
        let event = match reader.read_event() {
            Ok(e) => e,
            Err(_) => return false,
        };
        match event {
            XmlEvent::Start(e) | XmlEvent::Empty(e) => {
                if e.local_name().as_ref() != local_name.as_bytes() {
                    continue;
                }
                for attr in e.attributes().flatten() {
                    if attr.key.local_name().as_ref() == b"Algorithm" {
                        let value = String::from_utf8_lossy(&attr.value).into_owned();
                        if value.contains(fragment) {
                            return true;
                        }
                    }
                }
            }
            XmlEvent::Eof => return false,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exam_event() -> LogicalEvent {
        LogicalEvent {
            event_code: "S-2220".into(),
            worker_cpf: Some("52998224725".into()),
            employer_cnpj: Some("11222333000181".into()),
            exam_date: Some("2024-03-10".into()),
            exam_result: Some("1".into()),
            ..LogicalEvent::default()
        }
    }

    #[test]
    fn test_valid_exam_event_passes() {
        let validator = Validator::new();
        let outcome = validator.validate(&ValidationTarget::Fields(exam_event()));
        assert!(outcome.is_valid(), "{:?}", outcome.issues);
    }

    #[test]
    fn test_missing_exam_date_is_error() {
        let mut event = exam_event();
        event.exam_date = None;
        let outcome = Validator::new().validate(&ValidationTarget::Fields(event));
        assert!(outcome.has_errors());
        assert!(outcome.errors().any(|i| i.rule == "required_fields"));
    }

    #[test]
    fn test_risk_event_requires_hazard_agents() {
        let event = LogicalEvent {
            event_code: "S-2240".into(),
            worker_cpf: Some("52998224725".into()),
            exposure_start: Some("2023-01-01".into()),
            hazard_agent_count: 0,
            ..LogicalEvent::default()
        };
        let outcome = Validator::new().validate(&ValidationTarget::Fields(event));
        assert!(outcome
            .errors()
            .any(|i| i.message.contains("hazard agent")));
    }

    #[test]
    fn test_accident_event_requires_accident_date() {
        let event = LogicalEvent {
            event_code: "S-2210".into(),
            worker_cpf: Some("52998224725".into()),
            accident_date: None,
            ..LogicalEvent::default()
        };
        let outcome = Validator::new().validate(&ValidationTarget::Fields(event));
        assert!(outcome.errors().any(|i| i.message.contains("accident date")));
    }

    #[test]
    fn test_repeated_digit_cpf_always_errors() {
        let mut event = exam_event();
        event.worker_cpf = Some("11111111111".into());
        let outcome = Validator::new().validate(&ValidationTarget::Fields(event));
        assert!(outcome.errors().any(|i| i.rule == "worker_cpf_format"));
    }

    #[test]
    fn test_cnpj_check_digits() {
        let mut event = exam_event();
        event.employer_cnpj = Some("11.222.333/0001-81".into());
        assert!(Validator::new()
            .validate(&ValidationTarget::Fields(event.clone()))
            .is_valid());

        event.employer_cnpj = Some("11.222.333/0001-00".into());
        let outcome = Validator::new().validate(&ValidationTarget::Fields(event));
        assert!(outcome.errors().any(|i| i.rule == "employer_cnpj_format"));
    }

    #[test]
    fn test_retification_requires_receipt() {
        let mut event = exam_event();
        event.is_retification = true;
        event.prior_receipt = None;
        let outcome = Validator::new().validate(&ValidationTarget::Fields(event));
        assert!(outcome.errors().any(|i| i.message.contains("receipt")));
    }

    #[test]
    fn test_issues_accumulate_across_rules() {
        let event = LogicalEvent {
            event_code: "S-2220".into(),
            worker_cpf: Some("123".into()),
            employer_cnpj: Some("999".into()),
            ..LogicalEvent::default()
        };
        let outcome = Validator::new().validate(&ValidationTarget::Fields(event));
        // required fields + cpf format + cnpj format all report.
        assert!(outcome.errors().count() >= 3);
    }

    #[test]
    fn test_rule_can_be_disabled() {
        let mut validator = Validator::new();
        validator.set_rule_enabled("employer_cnpj_format", false);
        let mut event = exam_event();
        event.employer_cnpj = Some("not-a-cnpj".into());
        let outcome = validator.validate(&ValidationTarget::Fields(event));
        assert!(outcome.is_valid());
    }

    const UNSIGNED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<eSocial xmlns="http://www.esocial.gov.br/schema/lote/eventos/envio/v1_1_1">
  <evtMonit><ideEvento><tpAmb>2</tpAmb></ideEvento></evtMonit>
</eSocial>"#;

    #[test]
    fn test_unsigned_xml_passes_with_signature_warning() {
        let outcome = Validator::new().validate(&ValidationTarget::Xml {
            event_code: "S-2220",
            root_element: "evtMonit",
            xml: UNSIGNED,
            signed: false,
        });
        assert!(outcome.is_valid());
        assert!(outcome.warnings().any(|i| i.rule == "signature_present"));
    }

    #[test]
    fn test_unbalanced_xml_is_error() {
        let outcome = Validator::new().validate(&ValidationTarget::Xml {
            event_code: "S-2220",
            root_element: "evtMonit",
            xml: "<eSocial><evtMonit></eSocial>",
            signed: false,
        });
        assert!(outcome.errors().any(|i| i.rule == "xml_well_formed"));
    }

    #[test]
    fn test_wrong_event_root_is_error() {
        let outcome = Validator::new().validate(&ValidationTarget::Xml {
            event_code: "S-2210",
            root_element: "evtCAT",
            xml: UNSIGNED,
            signed: false,
        });
        assert!(outcome
            .errors()
            .any(|i| i.message.contains("evtCAT")));
    }

    const SIGNED: &str = r#"<eSocial><evtMonit Id="ID1"></evtMonit>
<Signature xmlns="http://www.w3.org/2000/09/xmldsig#">
  <SignedInfo>
    <CanonicalizationMethod Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/>
    <SignatureMethod Algorithm="http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"/>
    <Reference URI="">
      <Transforms>
        <Transform Algorithm="http://www.w3.org/2000/09/xmldsig#enveloped-signature"/>
        <Transform Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/>
      </Transforms>
      <DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/>
      <DigestValue>AAAA</DigestValue>
    </Reference>
  </SignedInfo>
  <SignatureValue>BBBB</SignatureValue>
  <KeyInfo><X509Data><X509Certificate>CCCC</X509Certificate></X509Data></KeyInfo>
</Signature></eSocial>"#;

    #[test]
    fn test_signed_payload_with_expected_algorithms_passes() {
        let outcome = Validator::new().validate(&ValidationTarget::Xml {
            event_code: "S-2220",
            root_element: "evtMonit",
            xml: SIGNED,
            signed: true,
        });
        assert!(outcome.is_valid(), "{:?}", outcome.issues);
    }

    #[test]
    fn test_signed_payload_with_sha1_digest_fails() {
        let xml = SIGNED.replace("xmlenc#sha256", "xmldsig#sha1");
        let outcome = Validator::new().validate(&ValidationTarget::Xml {
            event_code: "S-2220",
            root_element: "evtMonit",
            xml: &xml,
            signed: true,
        });
        assert!(outcome
            .errors()
            .any(|i| i.message.contains("SHA-256")));
    }

    #[test]
    fn test_signed_payload_without_signature_block_fails() {
        let outcome = Validator::new().validate(&ValidationTarget::Xml {
            event_code: "S-2220",
            root_element: "evtMonit",
            xml: UNSIGNED,
            signed: true,
        });
        assert!(outcome.errors().any(|i| i.rule == "signature_present"));
    }
}
