//! Typed event payloads.
//!
//! One struct per submittable event type, grouped under the
//! [`EventPayload`] tagged union. Field groups mirror the government layout
//! for each event; required fields are required at the type level, so a
//! payload that constructs is structurally complete before the rule engine
//! ever runs.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use vinculo_core::validation::LogicalEvent;
use vinculo_core::Competence;

use crate::types::EventType;

/// Worker identification block shared by the SST events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRef {
    /// National person identifier, bare digits.
    pub cpf: String,
    /// Employer-side registration number of the bond.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Kind of occupational health exam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamKind {
    Admission,
    Periodic,
    RoleChange,
    ReturnToWork,
    Dismissal,
}

impl ExamKind {
    /// Government code for `tpExameOcup`.
    #[must_use]
    pub fn wire_code(&self) -> &'static str {
        match self {
            Self::Admission => "0",
            Self::Periodic => "1",
            Self::RoleChange => "2",
            Self::ReturnToWork => "3",
            Self::Dismissal => "4",
        }
    }
}

/// Outcome of an occupational health exam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamResult {
    Fit,
    Unfit,
}

impl ExamResult {
    /// Government code for `resAso`.
    #[must_use]
    pub fn wire_code(&self) -> &'static str {
        match self {
            Self::Fit => "1",
            Self::Unfit => "2",
        }
    }
}

/// A procedure performed during an exam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamProcedure {
    /// Procedure table code.
    pub code: String,
    pub performed_at: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Responsible physician block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Physician {
    pub name: String,
    /// Regional council registration (CRM).
    pub crm: String,
    /// Council state, two-letter code.
    pub crm_state: String,
}

/// S-2220 payload: occupational health monitoring (ASO).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthExam {
    pub worker: WorkerRef,
    pub kind: ExamKind,
    pub exam_date: NaiveDate,
    pub result: ExamResult,
    pub physician: Physician,
    #[serde(default)]
    pub procedures: Vec<ExamProcedure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A hazard agent the worker is exposed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HazardAgent {
    /// Agent table code, e.g. `"01.01.001"`.
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intensity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurement_technique: Option<String>,
    /// Collective protective equipment in use.
    pub collective_protection: bool,
    /// Individual protective equipment in use and effective.
    pub effective_ppe: bool,
}

/// S-2240 payload: hazardous-condition exposure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskExposure {
    pub worker: WorkerRef,
    pub start_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    pub sector: String,
    pub activity_description: String,
    pub agents: Vec<HazardAgent>,
}

/// Kind of workplace accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccidentKind {
    Typical,
    Commute,
    OccupationalDisease,
}

impl AccidentKind {
    /// Government code for `tpAcid`.
    #[must_use]
    pub fn wire_code(&self) -> &'static str {
        match self {
            Self::Typical => "1",
            Self::Commute => "2",
            Self::OccupationalDisease => "3",
        }
    }
}

/// Medical-care certificate attached to an accident communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CareCertificate {
    pub attended_at: NaiveDate,
    /// `HHMM` wall-clock of attendance.
    pub attended_time: String,
    pub hospitalized: bool,
    pub treatment_days: u32,
    pub injury_description: String,
    pub physician: Physician,
}

/// S-2210 payload: workplace accident communication (CAT).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkAccident {
    pub worker: WorkerRef,
    pub accident_date: NaiveDate,
    /// `HHMM` wall-clock of the accident.
    pub accident_time: String,
    pub kind: AccidentKind,
    pub site_description: String,
    pub description: String,
    /// Situation table code (`codSitGeradora`).
    pub situation_code: String,
    /// Body part table code (`codParteAting`).
    pub body_part_code: String,
    /// Causing agent table code (`codAgntCausador`).
    pub causing_agent_code: String,
    pub fatal: bool,
    pub leave_granted: bool,
    pub care: CareCertificate,
}

/// S-2230 payload: temporary leave.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporaryLeave {
    pub worker: WorkerRef,
    pub start_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    /// Leave reason table code (`codMotAfast`).
    pub reason_code: String,
}

/// Operation carried by an employer-info event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmployerInfoOperation {
    Include,
    Alter,
    Exclude,
}

/// Employer contact block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployerContact {
    pub name: String,
    pub cpf: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Optional software-house block on S-1000.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftwareHouse {
    pub cnpj: String,
    pub corporate_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// S-1000 payload: employer registration information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployerInfo {
    pub operation: EmployerInfoOperation,
    pub validity_start: Competence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validity_end: Option<Competence>,
    /// Tax classification table code (`classTrib`).
    pub tax_classification: String,
    pub contact: EmployerContact,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub software_house: Option<SoftwareHouse>,
}

/// Tagged union of submittable event payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum EventPayload {
    #[serde(rename = "S-1000")]
    EmployerInfo(EmployerInfo),
    #[serde(rename = "S-2210")]
    WorkAccident(WorkAccident),
    #[serde(rename = "S-2220")]
    HealthExam(HealthExam),
    #[serde(rename = "S-2230")]
    TemporaryLeave(TemporaryLeave),
    #[serde(rename = "S-2240")]
    RiskExposure(RiskExposure),
}

impl EventPayload {
    /// The event type of this payload.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::EmployerInfo(_) => EventType::EmployerInfo,
            Self::WorkAccident(_) => EventType::WorkAccident,
            Self::HealthExam(_) => EventType::HealthMonitoring,
            Self::TemporaryLeave(_) => EventType::TemporaryLeave,
            Self::RiskExposure(_) => EventType::RiskExposure,
        }
    }

    /// The worker the event refers to, when the type carries one.
    #[must_use]
    pub fn worker(&self) -> Option<&WorkerRef> {
        match self {
            Self::EmployerInfo(_) => None,
            Self::WorkAccident(p) => Some(&p.worker),
            Self::HealthExam(p) => Some(&p.worker),
            Self::TemporaryLeave(p) => Some(&p.worker),
            Self::RiskExposure(p) => Some(&p.worker),
        }
    }

    /// Project the payload onto the logical-field view the rule engine
    /// validates before rendering.
    #[must_use]
    pub fn logical_fields(
        &self,
        employer_cnpj: &str,
        is_retification: bool,
        prior_receipt: Option<&str>,
    ) -> LogicalEvent {
        let mut logical = LogicalEvent {
            event_code: self.event_type().code().to_string(),
            worker_cpf: self.worker().map(|w| w.cpf.clone()),
            employer_cnpj: Some(employer_cnpj.to_string()),
            is_retification,
            prior_receipt: prior_receipt.map(str::to_string),
            ..LogicalEvent::default()
        };
        match self {
            Self::HealthExam(p) => {
                logical.exam_date = Some(p.exam_date.to_string());
                logical.exam_result = Some(p.result.wire_code().to_string());
            }
            Self::RiskExposure(p) => {
                logical.exposure_start = Some(p.start_date.to_string());
                logical.hazard_agent_count = p.agents.len();
            }
            Self::WorkAccident(p) => {
                logical.accident_date = Some(p.accident_date.to_string());
            }
            Self::EmployerInfo(p) => {
                logical.competence = Some(p.validity_start.to_string());
            }
            Self::TemporaryLeave(_) => {}
        }
        logical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker() -> WorkerRef {
        WorkerRef {
            cpf: "52998224725".to_string(),
            registration: Some("M-1042".to_string()),
            name: Some("Ana Souza".to_string()),
        }
    }

    #[test]
    fn test_payload_event_type() {
        let payload = EventPayload::RiskExposure(RiskExposure {
            worker: worker(),
            start_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            end_date: None,
            sector: "Produção".to_string(),
            activity_description: "Operação de prensa".to_string(),
            agents: vec![],
        });
        assert_eq!(payload.event_type(), EventType::RiskExposure);
        assert_eq!(payload.worker().unwrap().cpf, "52998224725");
    }

    #[test]
    fn test_logical_fields_for_exam() {
        let payload = EventPayload::HealthExam(HealthExam {
            worker: worker(),
            kind: ExamKind::Periodic,
            exam_date: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            result: ExamResult::Fit,
            physician: Physician {
                name: "Dr. Lima".to_string(),
                crm: "12345".to_string(),
                crm_state: "SP".to_string(),
            },
            procedures: vec![],
            notes: None,
        });
        let logical = payload.logical_fields("11222333000181", false, None);
        assert_eq!(logical.event_code, "S-2220");
        assert_eq!(logical.exam_date.as_deref(), Some("2024-03-10"));
        assert_eq!(logical.exam_result.as_deref(), Some("1"));
    }

    #[test]
    fn test_logical_fields_count_hazard_agents() {
        let payload = EventPayload::RiskExposure(RiskExposure {
            worker: worker(),
            start_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            end_date: None,
            sector: "Caldeiraria".to_string(),
            activity_description: "Solda".to_string(),
            agents: vec![HazardAgent {
                code: "01.01.001".to_string(),
                intensity: Some("87".to_string()),
                unit: Some("dB".to_string()),
                measurement_technique: Some("Dosimetria".to_string()),
                collective_protection: true,
                effective_ppe: true,
            }],
        });
        let logical = payload.logical_fields("11222333000181", false, None);
        assert_eq!(logical.hazard_agent_count, 1);
    }

    #[test]
    fn test_serde_tags_by_wire_code() {
        let payload = EventPayload::TemporaryLeave(TemporaryLeave {
            worker: worker(),
            start_date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            end_date: None,
            reason_code: "01".to_string(),
        });
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"event_type\":\"S-2230\""));
        let back: EventPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type(), EventType::TemporaryLeave);
    }
}
