//! Event builder.
//!
//! Turns a typed [`EventPayload`] into the rendered government payload:
//! validates the logical fields, stamps the environment metadata
//! (`ideEvento` block), assigns the globally unique event identifier and
//! renders the element tree for the event's schema.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use vinculo_core::validation::{ValidationIssue, ValidationTarget, Validator};
use vinculo_core::Cnpj;

use crate::payload::{
    EmployerInfo, EmployerInfoOperation, EventPayload, HealthExam, RiskExposure, TemporaryLeave,
    WorkAccident, WorkerRef,
};
use crate::types::EventType;
use crate::xml::{XmlDocument, XmlElement};

/// Target environment of the reporting service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Live production endpoint (`tpAmb` 1).
    Production,
    /// Restricted production / sandbox endpoint (`tpAmb` 2).
    Restricted,
}

impl Environment {
    /// Government code for `tpAmb`.
    #[must_use]
    pub fn wire_code(&self) -> &'static str {
        match self {
            Self::Production => "1",
            Self::Restricted => "2",
        }
    }
}

/// Per-organization context injected into every build.
///
/// Emission metadata is configuration, never hard-coded into payloads.
#[derive(Debug, Clone)]
pub struct OrgContext {
    pub cnpj: Cnpj,
    pub corporate_name: String,
    pub environment: Environment,
    /// Emission process code (`procEmi`).
    pub emission_process: String,
    /// Version string of the emitting processor (`verProc`).
    pub processor_version: String,
}

/// A successfully built event, ready for signing.
#[derive(Debug, Clone)]
pub struct BuiltEvent {
    /// Globally unique event identifier (`Id` attribute).
    pub event_id: String,
    pub event_type: EventType,
    /// Rendered, unsigned payload.
    pub xml: String,
    /// Warning-level findings recorded during the build.
    pub warnings: Vec<ValidationIssue>,
}

/// Failure to build an event payload.
#[derive(Debug, Error)]
pub enum EventBuildError {
    /// Error-level validation issues on the logical fields or the rendered
    /// payload.
    #[error("event validation failed with {} issue(s)", issues.len())]
    Validation { issues: Vec<ValidationIssue> },
}

/// Builds government payloads from typed event payloads.
pub struct EventBuilder {
    validator: Validator,
}

impl Default for EventBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            validator: Validator::new(),
        }
    }

    /// Build the payload for `event`. `prior_receipt` marks the build as a
    /// retification of a previously accepted event.
    pub fn build(
        &self,
        payload: &EventPayload,
        ctx: &OrgContext,
        prior_receipt: Option<&str>,
    ) -> Result<BuiltEvent, EventBuildError> {
        let event_type = payload.event_type();
        let logical =
            payload.logical_fields(ctx.cnpj.as_str(), prior_receipt.is_some(), prior_receipt);

        let outcome = self.validator.validate(&ValidationTarget::Fields(logical));
        if outcome.has_errors() {
            warn!(
                event_type = %event_type,
                errors = outcome.errors().count(),
                "event rejected by pre-build validation"
            );
            return Err(EventBuildError::Validation {
                issues: outcome.issues,
            });
        }
        let mut warnings: Vec<ValidationIssue> = outcome.warnings().cloned().collect();

        let event_id = generate_event_id(&ctx.cnpj);
        let document = render_event(&event_id, payload, ctx, prior_receipt);
        let xml = document.to_xml();

        // Structural re-check of what was just rendered. Signature presence
        // is expected to warn here; anything error-level is a builder bug
        // surfaced to the caller rather than shipped to the wire.
        let rendered = self.validator.validate(&ValidationTarget::Xml {
            event_code: event_type.code(),
            root_element: event_type.root_element(),
            xml: &xml,
            signed: false,
        });
        if rendered.has_errors() {
            return Err(EventBuildError::Validation {
                issues: rendered.issues,
            });
        }
        warnings.extend(rendered.warnings().cloned());

        debug!(event_type = %event_type, event_id = %event_id, "event payload built");
        Ok(BuiltEvent {
            event_id,
            event_type,
            xml,
            warnings,
        })
    }
}

/// Event identifier: `ID1` + 14-digit employer number + UTC timestamp +
/// 5-digit random sequence (36 characters total). Collision probability over
/// one employer-second is negligible.
fn generate_event_id(cnpj: &Cnpj) -> String {
    let employer: String = format!("{:0>14}", cnpj.as_str());
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let sequence: u32 = rand::thread_rng().gen_range(1..=99_999);
    format!("ID1{employer}{timestamp}{sequence:05}")
}

fn render_event(
    event_id: &str,
    payload: &EventPayload,
    ctx: &OrgContext,
    prior_receipt: Option<&str>,
) -> XmlDocument {
    let event_type = payload.event_type();
    let ide_evento = ide_evento(ctx, prior_receipt);
    let ide_empregador = ide_empregador(&ctx.cnpj);

    let body = match payload {
        EventPayload::HealthExam(p) => map_health_exam(p),
        EventPayload::RiskExposure(p) => map_risk_exposure(p, ctx),
        EventPayload::WorkAccident(p) => map_work_accident(p),
        EventPayload::TemporaryLeave(p) => map_temporary_leave(p),
        EventPayload::EmployerInfo(p) => map_employer_info(p),
    };

    let mut event_element = XmlElement::new(event_type.root_element())
        .attr("Id", event_id)
        .child(ide_evento);
    // S-1000 nests infoEmpregador directly after ideEvento/ideEmpregador.
    event_element = event_element.child(ide_empregador);
    for element in body {
        event_element = event_element.child(element);
    }

    let root = XmlElement::new("eSocial")
        .attr("xmlns", event_type.schema_namespace())
        .child(event_element);
    XmlDocument::new(root)
}

/// Common `ideEvento` block.
fn ide_evento(ctx: &OrgContext, prior_receipt: Option<&str>) -> XmlElement {
    let ind_retif = if prior_receipt.is_some() { "2" } else { "1" };
    XmlElement::new("ideEvento")
        .child(XmlElement::leaf("indRetif", ind_retif))
        .opt_child(XmlElement::opt_leaf("nrRecibo", prior_receipt))
        .child(XmlElement::leaf("tpAmb", ctx.environment.wire_code()))
        .child(XmlElement::leaf("procEmi", &*ctx.emission_process))
        .child(XmlElement::leaf("verProc", &*ctx.processor_version))
}

fn ide_empregador(cnpj: &Cnpj) -> XmlElement {
    XmlElement::new("ideEmpregador")
        .child(XmlElement::leaf("tpInsc", "1"))
        .child(XmlElement::leaf("nrInsc", cnpj.as_str()))
}

fn ide_vinculo(worker: &WorkerRef) -> XmlElement {
    XmlElement::new("ideVinculo")
        .child(XmlElement::leaf("cpfTrab", &*worker.cpf))
        .opt_child(XmlElement::opt_leaf(
            "matricula",
            worker.registration.as_deref(),
        ))
}

fn map_health_exam(exam: &HealthExam) -> Vec<XmlElement> {
    let exames = exam.procedures.iter().map(|procedure| {
        XmlElement::new("exame")
            .child(XmlElement::leaf("dtExm", procedure.performed_at.to_string()))
            .child(XmlElement::leaf("procRealizado", &*procedure.code))
            .opt_child(XmlElement::opt_leaf("obsProc", procedure.notes.as_deref()))
    });

    let aso = XmlElement::new("aso")
        .child(XmlElement::leaf("dtAso", exam.exam_date.to_string()))
        .child(XmlElement::leaf("resAso", exam.result.wire_code()))
        .children(exames)
        .child(
            XmlElement::new("medico")
                .child(XmlElement::leaf("nmMed", &*exam.physician.name))
                .child(XmlElement::leaf("nrCRM", &*exam.physician.crm))
                .child(XmlElement::leaf("ufCRM", &*exam.physician.crm_state)),
        );

    vec![
        ide_vinculo(&exam.worker),
        XmlElement::new("exMedOcup")
            .child(XmlElement::leaf("tpExameOcup", exam.kind.wire_code()))
            .child(aso),
    ]
}

fn map_risk_exposure(exposure: &RiskExposure, ctx: &OrgContext) -> Vec<XmlElement> {
    let agents = exposure.agents.iter().map(|agent| {
        XmlElement::new("agNoc")
            .child(XmlElement::leaf("codAgNoc", &*agent.code))
            .opt_child(XmlElement::opt_leaf("intConc", agent.intensity.as_deref()))
            .opt_child(XmlElement::opt_leaf("unMed", agent.unit.as_deref()))
            .opt_child(XmlElement::opt_leaf(
                "tecMedicao",
                agent.measurement_technique.as_deref(),
            ))
            .child(XmlElement::leaf(
                "utilizEPC",
                if agent.collective_protection { "S" } else { "N" },
            ))
            .child(XmlElement::leaf(
                "utilizEPI",
                if agent.effective_ppe { "S" } else { "N" },
            ))
    });

    let info = XmlElement::new("infoExpRisco")
        .child(XmlElement::leaf(
            "dtIniCondicao",
            exposure.start_date.to_string(),
        ))
        .opt_child(XmlElement::opt_leaf(
            "dtFimCondicao",
            exposure.end_date.map(|d| d.to_string()),
        ))
        .child(
            XmlElement::new("infoAmb")
                .child(XmlElement::leaf("localAmb", "1"))
                .child(XmlElement::leaf("dscSetor", &*exposure.sector))
                .child(XmlElement::leaf("tpInsc", "1"))
                .child(XmlElement::leaf("nrInsc", ctx.cnpj.as_str())),
        )
        .child(
            XmlElement::new("infoAtiv").child(XmlElement::leaf(
                "dscAtivDes",
                &*exposure.activity_description,
            )),
        )
        .children(agents);

    vec![ide_vinculo(&exposure.worker), info]
}

fn map_work_accident(accident: &WorkAccident) -> Vec<XmlElement> {
    let atestado = XmlElement::new("atestado")
        .child(XmlElement::leaf(
            "dtAtendimento",
            accident.care.attended_at.to_string(),
        ))
        .child(XmlElement::leaf(
            "hrAtendimento",
            &*accident.care.attended_time,
        ))
        .child(XmlElement::leaf(
            "indInternacao",
            if accident.care.hospitalized { "S" } else { "N" },
        ))
        .child(XmlElement::leaf(
            "durTrat",
            accident.care.treatment_days.to_string(),
        ))
        .child(XmlElement::leaf(
            "indAfast",
            if accident.leave_granted { "S" } else { "N" },
        ))
        .child(XmlElement::leaf(
            "dscLesao",
            &*accident.care.injury_description,
        ))
        .child(
            XmlElement::new("emitente")
                .child(XmlElement::leaf("nmEmit", &*accident.care.physician.name))
                .child(XmlElement::leaf("ideOC", "1"))
                .child(XmlElement::leaf("nrOc", &*accident.care.physician.crm))
                .child(XmlElement::leaf(
                    "ufOC",
                    &*accident.care.physician.crm_state,
                )),
        );

    let cat = XmlElement::new("cat")
        .child(XmlElement::leaf("dtAcid", accident.accident_date.to_string()))
        .child(XmlElement::leaf("tpAcid", accident.kind.wire_code()))
        .child(XmlElement::leaf("hrAcid", &*accident.accident_time))
        .child(XmlElement::leaf(
            "indCatObito",
            if accident.fatal { "S" } else { "N" },
        ))
        .child(XmlElement::leaf("codSitGeradora", &*accident.situation_code))
        .child(XmlElement::leaf("obsCAT", &*accident.description))
        .child(
            XmlElement::new("localAcidente")
                .child(XmlElement::leaf("tpLocal", "1"))
                .child(XmlElement::leaf("dscLocal", &*accident.site_description)),
        )
        .child(
            XmlElement::new("parteAtingida")
                .child(XmlElement::leaf("codParteAting", &*accident.body_part_code)),
        )
        .child(
            XmlElement::new("agenteCausador").child(XmlElement::leaf(
                "codAgntCausador",
                &*accident.causing_agent_code,
            )),
        )
        .child(atestado);

    vec![ide_vinculo(&accident.worker), cat]
}

fn map_temporary_leave(leave: &TemporaryLeave) -> Vec<XmlElement> {
    let info = XmlElement::new("infoAfastamento")
        .child(
            XmlElement::new("iniAfastamento")
                .child(XmlElement::leaf("dtIniAfast", leave.start_date.to_string()))
                .child(XmlElement::leaf("codMotAfast", &*leave.reason_code)),
        )
        .opt_child(leave.end_date.map(|end| {
            XmlElement::new("fimAfastamento")
                .child(XmlElement::leaf("dtFimAfast", end.to_string()))
        }));
    vec![ide_vinculo(&leave.worker), info]
}

fn map_employer_info(info: &EmployerInfo) -> Vec<XmlElement> {
    let ide_periodo = XmlElement::new("idePeriodo")
        .child(XmlElement::leaf("iniValid", info.validity_start.to_string()))
        .opt_child(XmlElement::opt_leaf(
            "fimValid",
            info.validity_end.map(|c| c.to_string()),
        ));

    let operation_name = match info.operation {
        EmployerInfoOperation::Include => "inclusao",
        EmployerInfoOperation::Alter => "alteracao",
        EmployerInfoOperation::Exclude => "exclusao",
    };

    let mut operation = XmlElement::new(operation_name).child(ide_periodo);
    if info.operation != EmployerInfoOperation::Exclude {
        let contato = XmlElement::new("contato")
            .child(XmlElement::leaf("nmCtt", &*info.contact.name))
            .child(XmlElement::leaf("cpfCtt", &*info.contact.cpf))
            .opt_child(XmlElement::opt_leaf(
                "foneFix",
                info.contact.phone.as_deref(),
            ))
            .child(XmlElement::leaf("email", &*info.contact.email));

        let mut cadastro = XmlElement::new("infoCadastro")
            .child(XmlElement::leaf("classTrib", &*info.tax_classification))
            .child(contato);
        if let Some(sh) = &info.software_house {
            cadastro = cadastro.child(
                XmlElement::new("softHouse")
                    .child(XmlElement::leaf("cnpjSoft", &*sh.cnpj))
                    .child(XmlElement::leaf("nmRazao", &*sh.corporate_name))
                    .opt_child(XmlElement::opt_leaf("nmContato", sh.contact_name.as_deref()))
                    .opt_child(XmlElement::opt_leaf("email", sh.email.as_deref())),
            );
        }
        operation = operation.child(cadastro);
    }

    vec![XmlElement::new("infoEmpregador").child(operation)]
}
