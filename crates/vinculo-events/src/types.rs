//! Event type enumeration.
//!
//! Closed set of supported government event codes. The submission family is
//! what this system builds, signs and transmits; the lifecycle family is
//! what the reconciliation engine consumes from the government stream.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Schema catalogue version the payloads are rendered against.
pub const SCHEMA_VERSION: &str = "v_S_01_02_00";

/// Supported government event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Employer registration information.
    #[serde(rename = "S-1000")]
    EmployerInfo,
    /// Hire of an employee (lifecycle stream).
    #[serde(rename = "S-2200")]
    Hire,
    /// Contract amendment (lifecycle stream).
    #[serde(rename = "S-2206")]
    ContractAmendment,
    /// Workplace accident communication (CAT).
    #[serde(rename = "S-2210")]
    WorkAccident,
    /// Occupational health monitoring (ASO).
    #[serde(rename = "S-2220")]
    HealthMonitoring,
    /// Temporary leave.
    #[serde(rename = "S-2230")]
    TemporaryLeave,
    /// Hazardous-condition exposure.
    #[serde(rename = "S-2240")]
    RiskExposure,
    /// Termination of an employment bond (lifecycle stream).
    #[serde(rename = "S-2299")]
    Termination,
    /// Start of a no-bond engagement (lifecycle stream).
    #[serde(rename = "S-2300")]
    NoBondStart,
    /// End of a no-bond engagement (lifecycle stream).
    #[serde(rename = "S-2399")]
    NoBondEnd,
}

impl EventType {
    /// Every supported type, submission family first.
    pub const ALL: [EventType; 10] = [
        EventType::EmployerInfo,
        EventType::WorkAccident,
        EventType::HealthMonitoring,
        EventType::TemporaryLeave,
        EventType::RiskExposure,
        EventType::Hire,
        EventType::ContractAmendment,
        EventType::Termination,
        EventType::NoBondStart,
        EventType::NoBondEnd,
    ];

    /// The lifecycle consultation family, in the fixed order jobs fetch it.
    pub const LIFECYCLE: [EventType; 5] = [
        EventType::Hire,
        EventType::ContractAmendment,
        EventType::Termination,
        EventType::NoBondStart,
        EventType::NoBondEnd,
    ];

    /// The wire code, e.g. `"S-2220"`.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmployerInfo => "S-1000",
            Self::Hire => "S-2200",
            Self::ContractAmendment => "S-2206",
            Self::WorkAccident => "S-2210",
            Self::HealthMonitoring => "S-2220",
            Self::TemporaryLeave => "S-2230",
            Self::RiskExposure => "S-2240",
            Self::Termination => "S-2299",
            Self::NoBondStart => "S-2300",
            Self::NoBondEnd => "S-2399",
        }
    }

    /// Root element of the event inside the batch envelope.
    #[must_use]
    pub fn root_element(&self) -> &'static str {
        match self {
            Self::EmployerInfo => "evtInfoEmpregador",
            Self::Hire => "evtAdmissao",
            Self::ContractAmendment => "evtAltContratual",
            Self::WorkAccident => "evtCAT",
            Self::HealthMonitoring => "evtMonit",
            Self::TemporaryLeave => "evtAfastTemp",
            Self::RiskExposure => "evtExpRisco",
            Self::Termination => "evtDeslig",
            Self::NoBondStart => "evtTSVInicio",
            Self::NoBondEnd => "evtTSVTermino",
        }
    }

    /// Namespace of the event schema, versioned per type.
    #[must_use]
    pub fn schema_namespace(&self) -> String {
        format!(
            "http://www.esocial.gov.br/schema/evt/{}/{}",
            self.root_element(),
            SCHEMA_VERSION
        )
    }

    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::EmployerInfo => "Informações do Empregador",
            Self::Hire => "Admissão de Trabalhador",
            Self::ContractAmendment => "Alteração de Contrato de Trabalho",
            Self::WorkAccident => "Comunicação de Acidente de Trabalho",
            Self::HealthMonitoring => "Monitoramento da Saúde do Trabalhador",
            Self::TemporaryLeave => "Afastamento Temporário",
            Self::RiskExposure => "Condições Ambientais do Trabalho - Fatores de Risco",
            Self::Termination => "Desligamento",
            Self::NoBondStart => "Trabalhador Sem Vínculo - Início",
            Self::NoBondEnd => "Trabalhador Sem Vínculo - Término",
        }
    }

    /// Whether this system builds and submits events of this type.
    #[must_use]
    pub fn is_submittable(&self) -> bool {
        matches!(
            self,
            Self::EmployerInfo
                | Self::WorkAccident
                | Self::HealthMonitoring
                | Self::TemporaryLeave
                | Self::RiskExposure
        )
    }

    /// Whether this type belongs to the worker lifecycle family consumed
    /// by reconciliation.
    #[must_use]
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::Hire
                | Self::ContractAmendment
                | Self::Termination
                | Self::NoBondStart
                | Self::NoBondEnd
        )
    }

    /// Whether a lifecycle event of this type starts an employment bond.
    #[must_use]
    pub fn starts_bond(&self) -> bool {
        matches!(self, Self::Hire | Self::NoBondStart)
    }

    /// Whether a lifecycle event of this type ends an employment bond.
    #[must_use]
    pub fn ends_bond(&self) -> bool {
        matches!(self, Self::Termination | Self::NoBondEnd)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S-1000" => Ok(Self::EmployerInfo),
            "S-2200" => Ok(Self::Hire),
            "S-2206" => Ok(Self::ContractAmendment),
            "S-2210" => Ok(Self::WorkAccident),
            "S-2220" => Ok(Self::HealthMonitoring),
            "S-2230" => Ok(Self::TemporaryLeave),
            "S-2240" => Ok(Self::RiskExposure),
            "S-2299" => Ok(Self::Termination),
            "S-2300" => Ok(Self::NoBondStart),
            "S-2399" => Ok(Self::NoBondEnd),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for event_type in EventType::ALL {
            let parsed: EventType = event_type.code().parse().unwrap();
            assert_eq!(parsed, event_type);
        }
    }

    #[test]
    fn test_unknown_code_rejected() {
        assert!("S-9999".parse::<EventType>().is_err());
    }

    #[test]
    fn test_families_are_disjoint() {
        for event_type in EventType::ALL {
            assert!(
                event_type.is_submittable() != event_type.is_lifecycle(),
                "{event_type} must be in exactly one family"
            );
        }
    }

    #[test]
    fn test_schema_namespace_carries_root_and_version() {
        let ns = EventType::HealthMonitoring.schema_namespace();
        assert_eq!(
            ns,
            "http://www.esocial.gov.br/schema/evt/evtMonit/v_S_01_02_00"
        );
    }

    #[test]
    fn test_bond_predicates() {
        assert!(EventType::Hire.starts_bond());
        assert!(EventType::NoBondStart.starts_bond());
        assert!(EventType::Termination.ends_bond());
        assert!(EventType::NoBondEnd.ends_bond());
        assert!(!EventType::ContractAmendment.starts_bond());
        assert!(!EventType::ContractAmendment.ends_bond());
    }

    #[test]
    fn test_serde_uses_wire_code() {
        let json = serde_json::to_string(&EventType::RiskExposure).unwrap();
        assert_eq!(json, "\"S-2240\"");
        let back: EventType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventType::RiskExposure);
    }
}
