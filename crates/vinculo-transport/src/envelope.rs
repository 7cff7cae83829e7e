//! Submission envelope construction.
//!
//! All three operations share the same framing: operation name, employer
//! identity block and an operation-specific body. Only the inner body and
//! the target endpoint vary.

use vinculo_events::{XmlDocument, XmlElement};

const NS_SOAP: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const NS_SEND: &str = "http://www.esocial.gov.br/servicos/empregador/lote/eventos/envio/v1_1_1";
const NS_QUERY: &str =
    "http://www.esocial.gov.br/servicos/empregador/lote/eventos/envio/consulta/retornoProcessamento/v1_1_0";
const NS_DOWNLOAD: &str =
    "http://www.esocial.gov.br/servicos/empregador/download/solicitacao/v1_0_0";
const NS_CONSULT: &str =
    "http://www.esocial.gov.br/servicos/empregador/consulta/eventos/v1_0_0";
const NS_BATCH: &str = "http://www.esocial.gov.br/schema/lote/eventos/envio/v1_1_1";

/// SOAPAction header value per operation.
pub mod soap_action {
    pub const SUBMIT: &str = "http://www.esocial.gov.br/servicos/empregador/lote/eventos/envio/v1_1_1/ServicoEnviarLoteEventos/EnviarLoteEventos";
    pub const QUERY: &str = "http://www.esocial.gov.br/servicos/empregador/lote/eventos/envio/v1_1_1/ServicoConsultarLoteEventos/ConsultarLoteEventos";
    pub const DOWNLOAD: &str = "http://www.esocial.gov.br/servicos/empregador/download/solicitacao/v1_0_0/ServicoSolicitarDownloadEventos/SolicitarDownloadEventos";
    pub const CONSULT: &str = "http://www.esocial.gov.br/servicos/empregador/consulta/eventos/v1_0_0/ServicoConsultarEventos/ConsultarEventos";
}

/// Endpoint addresses for one environment.
#[derive(Debug, Clone)]
pub struct EndpointSet {
    pub submit: String,
    pub query: String,
    pub download: String,
    pub consult: String,
}

impl EndpointSet {
    /// Live production endpoints.
    #[must_use]
    pub fn production() -> Self {
        Self {
            submit: "https://webservices.producao.esocial.gov.br/servicos/empregador/recepcaoloteeventos/WsRecepcaoLoteEventos.svc".to_string(),
            query: "https://webservices.producao.esocial.gov.br/servicos/empregador/consultarloteeventos/WsConsultarLoteEventos.svc".to_string(),
            download: "https://webservices.producao.esocial.gov.br/servicos/empregador/downloadeventos/WsDownloadEventos.svc".to_string(),
            consult: "https://webservices.producao.esocial.gov.br/servicos/empregador/consultareventos/WsConsultarEventos.svc".to_string(),
        }
    }

    /// Restricted-production (sandbox) endpoints.
    #[must_use]
    pub fn restricted() -> Self {
        Self {
            submit: "https://webservices.producaorestrita.esocial.gov.br/servicos/empregador/recepcaoloteeventos/WsRecepcaoLoteEventos.svc".to_string(),
            query: "https://webservices.producaorestrita.esocial.gov.br/servicos/empregador/consultarloteeventos/WsConsultarLoteEventos.svc".to_string(),
            download: "https://webservices.producaorestrita.esocial.gov.br/servicos/empregador/downloadeventos/WsDownloadEventos.svc".to_string(),
            consult: "https://webservices.producaorestrita.esocial.gov.br/servicos/empregador/consultareventos/WsConsultarEventos.svc".to_string(),
        }
    }
}

/// Employer identity block shared by every envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmployerIdent {
    /// Registration type: 1 = CNPJ, 2 = CPF.
    pub registration_type: u8,
    /// Registration number, bare digits.
    pub registration_number: String,
}

impl EmployerIdent {
    /// CNPJ-registered employer.
    #[must_use]
    pub fn cnpj(number: impl Into<String>) -> Self {
        Self {
            registration_type: 1,
            registration_number: number.into(),
        }
    }

    fn element(&self, name: &str) -> XmlElement {
        XmlElement::new(name)
            .child(XmlElement::leaf("tpInsc", self.registration_type.to_string()))
            .child(XmlElement::leaf("nrInsc", &*self.registration_number))
    }
}

fn soap_envelope(operation_ns: &str, body: XmlElement) -> String {
    let root = XmlElement::new("soap:Envelope")
        .attr("xmlns:soap", NS_SOAP)
        .attr("xmlns:v1", operation_ns)
        .child(XmlElement::new("soap:Header"))
        .child(XmlElement::new("soap:Body").child(body));
    XmlDocument::new(root).to_xml()
}

/// Strip the XML declaration from a signed payload so it can be embedded.
fn strip_declaration(xml: &str) -> &str {
    let trimmed = xml.trim_start();
    if let Some(rest) = trimmed.strip_prefix("<?xml") {
        if let Some(end) = rest.find("?>") {
            return rest[end + 2..].trim_start();
        }
    }
    trimmed
}

/// Build the submission envelope for a group of signed events.
///
/// Each entry is `(event_id, signed_xml)`; the signed payload is embedded
/// verbatim so the signature stays valid.
#[must_use]
pub fn submit_envelope(employer: &EmployerIdent, events: &[(String, String)]) -> String {
    let mut eventos = XmlElement::new("eventos");
    for (event_id, signed_xml) in events {
        eventos = eventos.child(
            XmlElement::new("evento")
                .attr("Id", event_id.as_str())
                .raw_child(strip_declaration(signed_xml)),
        );
    }

    let batch = XmlElement::new("eSocial").attr("xmlns", NS_BATCH).child(
        XmlElement::new("envioLoteEventos")
            .attr("grupo", "2")
            .child(employer.element("ideEmpregador"))
            .child(employer.element("ideTransmissor"))
            .child(eventos),
    );

    let body = XmlElement::new("v1:EnviarLoteEventos")
        .child(XmlElement::new("v1:loteEventos").raw_child(batch.to_xml()));
    soap_envelope(NS_SEND, body)
}

/// Build the batch status query envelope.
#[must_use]
pub fn query_envelope(employer: &EmployerIdent, protocol: &str) -> String {
    let body = XmlElement::new("v1:ConsultarLoteEventos").child(
        XmlElement::new("v1:consulta")
            .child(employer.element("ideEmpregador"))
            .child(XmlElement::leaf("v1:protocolo", protocol)),
    );
    soap_envelope(NS_QUERY, body)
}

/// Build the event consultation envelope: all events of one type inside a
/// reporting period.
#[must_use]
pub fn consult_envelope(
    employer: &EmployerIdent,
    event_code: &str,
    period_start: &str,
    period_end: &str,
) -> String {
    let body = XmlElement::new("v1:ConsultarEventos").child(
        XmlElement::new("v1:consulta")
            .child(employer.element("ideEmpregador"))
            .child(
                XmlElement::new("v1:consultaEventos")
                    .child(XmlElement::leaf("v1:tipoEvento", event_code))
                    .child(XmlElement::leaf("v1:perApur", period_start))
                    .child(XmlElement::leaf("v1:perApurFim", period_end)),
            ),
    );
    soap_envelope(NS_CONSULT, body)
}

/// Build the processed-event download envelope.
#[must_use]
pub fn download_envelope(employer: &EmployerIdent, receipt: &str) -> String {
    let body = XmlElement::new("v1:SolicitarDownloadEventos").child(
        XmlElement::new("v1:solicita")
            .child(employer.element("ideEmpregador"))
            .child(
                XmlElement::new("v1:solicDownload").child(XmlElement::leaf("v1:nrRec", receipt)),
            ),
    );
    soap_envelope(NS_DOWNLOAD, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employer() -> EmployerIdent {
        EmployerIdent::cnpj("11222333000181")
    }

    #[test]
    fn test_submit_envelope_frames_batch() {
        let events = vec![(
            "ID1".to_string(),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><eSocial><evtMonit Id=\"ID1\"/></eSocial>"
                .to_string(),
        )];
        let envelope = submit_envelope(&employer(), &events);

        assert!(envelope.contains("<v1:EnviarLoteEventos>"));
        assert!(envelope.contains("<nrInsc>11222333000181</nrInsc>"));
        assert!(envelope.contains("<ideTransmissor>"));
        assert!(envelope.contains("<evento Id=\"ID1\"><eSocial><evtMonit Id=\"ID1\"/></eSocial></evento>"));
        // The embedded payload must not carry a second declaration.
        assert_eq!(envelope.matches("<?xml").count(), 1);
    }

    #[test]
    fn test_query_envelope_carries_protocol() {
        let envelope = query_envelope(&employer(), "1.2.202403.0001234");
        assert!(envelope.contains("<v1:ConsultarLoteEventos>"));
        assert!(envelope.contains("<v1:protocolo>1.2.202403.0001234</v1:protocolo>"));
        assert!(envelope.contains("<tpInsc>1</tpInsc>"));
    }

    #[test]
    fn test_download_envelope_carries_receipt() {
        let envelope = download_envelope(&employer(), "1.1.0000000000001");
        assert!(envelope.contains("<v1:SolicitarDownloadEventos>"));
        assert!(envelope.contains("<v1:nrRec>1.1.0000000000001</v1:nrRec>"));
    }

    #[test]
    fn test_consult_envelope_carries_type_and_period() {
        let envelope = consult_envelope(&employer(), "S-2200", "2023-01", "2023-12");
        assert!(envelope.contains("<v1:tipoEvento>S-2200</v1:tipoEvento>"));
        assert!(envelope.contains("<v1:perApur>2023-01</v1:perApur>"));
        assert!(envelope.contains("<v1:perApurFim>2023-12</v1:perApurFim>"));
    }

    #[test]
    fn test_all_envelopes_share_identity_framing() {
        let events: Vec<(String, String)> = Vec::new();
        for envelope in [
            submit_envelope(&employer(), &events),
            query_envelope(&employer(), "p"),
            download_envelope(&employer(), "r"),
            consult_envelope(&employer(), "S-2200", "2023-01", "2023-12"),
        ] {
            assert!(envelope.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
            assert!(envelope.contains("<soap:Header/>"));
            assert!(envelope.contains("<ideEmpregador>"));
        }
    }

    #[test]
    fn test_strip_declaration() {
        assert_eq!(strip_declaration("<?xml version=\"1.0\"?><a/>"), "<a/>");
        assert_eq!(strip_declaration("<a/>"), "<a/>");
    }
}
