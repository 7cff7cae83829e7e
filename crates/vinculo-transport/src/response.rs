//! Response parsing.
//!
//! Extracts the success discriminator, protocol/receipt numbers and the
//! structured occurrence list from acknowledgement bodies. A 2xx response
//! missing its expected fields is a malformed-response transport failure,
//! never silently treated as success.

use base64::{engine::general_purpose::STANDARD, Engine};
use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

use crate::error::{BusinessError, TransportError, TransportResult};

/// Discriminator code the service answers on an accepted batch.
pub const CODE_BATCH_ACCEPTED: &str = "201";

/// Severity of a structured occurrence record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceSeverity {
    Error,
    Warning,
}

impl OccurrenceSeverity {
    fn from_wire(code: &str) -> Self {
        match code.trim() {
            "2" => Self::Warning,
            _ => Self::Error,
        }
    }
}

/// A structured error/warning record from a response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub code: String,
    pub description: String,
    pub severity: OccurrenceSeverity,
}

/// Acknowledgement of a batch submission.
#[derive(Debug, Clone)]
pub struct SubmitResponse {
    /// Discriminator code (`cdResposta`).
    pub response_code: String,
    pub response_description: Option<String>,
    /// Protocol number assigned to the batch, present when accepted.
    pub protocol: Option<String>,
    pub occurrences: Vec<Occurrence>,
}

impl SubmitResponse {
    /// Whether the batch was accepted for processing.
    #[must_use]
    pub fn accepted(&self) -> bool {
        self.response_code == CODE_BATCH_ACCEPTED
    }

    /// The protocol number, or the business refusal carried by the body.
    pub fn into_protocol(self) -> Result<String, BusinessError> {
        if self.accepted() {
            if let Some(protocol) = self.protocol {
                return Ok(protocol);
            }
        }
        Err(BusinessError {
            code: self.response_code,
            description: self
                .response_description
                .unwrap_or_else(|| "batch refused".to_string()),
            occurrences: self.occurrences,
        })
    }

    /// Parse a submission acknowledgement body.
    pub fn parse(xml: &str) -> TransportResult<Self> {
        let response_code =
            first_leaf_text(xml, "cdResposta").ok_or_else(|| TransportError::MalformedResponse {
                detail: "response carries no cdResposta discriminator".to_string(),
            })?;
        let protocol =
            first_leaf_text(xml, "protocoloEnvio").or_else(|| first_leaf_text(xml, "protocolo"));
        let response = Self {
            response_code,
            response_description: first_leaf_text(xml, "descResposta"),
            protocol,
            occurrences: parse_occurrences(xml),
        };
        if response.accepted() && response.protocol.is_none() {
            return Err(TransportError::MalformedResponse {
                detail: "accepted batch without protocol number".to_string(),
            });
        }
        Ok(response)
    }
}

/// Processing state of a submitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchSituation {
    Processed,
    Processing,
    Error,
}

impl BatchSituation {
    fn from_wire(value: &str) -> Option<Self> {
        match value.trim() {
            "Processado" => Some(Self::Processed),
            "Processando" | "Em Processamento" => Some(Self::Processing),
            "Erro" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Per-event outcome inside a batch status answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventResult {
    /// Event identifier, as submitted.
    pub event_id: String,
    /// Receipt number, present once the event was processed successfully.
    pub receipt: Option<String>,
    pub occurrences: Vec<Occurrence>,
}

impl EventResult {
    /// An event with a receipt and no error-level occurrence processed
    /// successfully.
    #[must_use]
    pub fn processed(&self) -> bool {
        self.receipt.is_some()
            && !self
                .occurrences
                .iter()
                .any(|o| o.severity == OccurrenceSeverity::Error)
    }
}

/// Answer to a batch status query.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub situation: BatchSituation,
    pub processed_count: u32,
    pub error_count: u32,
    /// Per-event outcomes, when the service details them.
    pub event_results: Vec<EventResult>,
    pub occurrences: Vec<Occurrence>,
}

impl QueryResponse {
    /// Parse a batch status answer body.
    pub fn parse(xml: &str) -> TransportResult<Self> {
        let situation_text =
            first_leaf_text(xml, "situacao").ok_or_else(|| TransportError::MalformedResponse {
                detail: "query response carries no batch situation".to_string(),
            })?;
        let situation = BatchSituation::from_wire(&situation_text).ok_or_else(|| {
            TransportError::MalformedResponse {
                detail: format!("unknown batch situation '{situation_text}'"),
            }
        })?;
        Ok(Self {
            situation,
            processed_count: parse_count(xml, "qtdEventosProcessados"),
            error_count: parse_count(xml, "qtdEventosComErro"),
            event_results: parse_event_results(xml),
            occurrences: parse_occurrences(xml),
        })
    }
}

/// Answer to a processed-event download.
#[derive(Debug, Clone)]
pub struct DownloadResponse {
    /// The decoded event payload as stored by the government.
    pub xml: String,
}

impl DownloadResponse {
    /// Parse a download answer body; the archive arrives base64-encoded.
    pub fn parse(xml: &str) -> TransportResult<Self> {
        let archive =
            first_leaf_text(xml, "arquivo").ok_or_else(|| TransportError::MalformedResponse {
                detail: "download response carries no event archive".to_string(),
            })?;
        let bytes = STANDARD
            .decode(archive.replace(['\n', '\r', ' '], ""))
            .map_err(|e| TransportError::MalformedResponse {
                detail: format!("event archive is not valid base64: {e}"),
            })?;
        let decoded = String::from_utf8(bytes).map_err(|_| TransportError::MalformedResponse {
            detail: "event archive is not valid UTF-8".to_string(),
        })?;
        Ok(Self { xml: decoded })
    }
}

/// Answer to an event consultation: zero or more raw `<evento>` blocks.
#[derive(Debug, Clone)]
pub struct ConsultEventsResponse {
    /// Each entry is one full `<evento>` block as returned by the service.
    pub events: Vec<String>,
    pub occurrences: Vec<Occurrence>,
}

impl ConsultEventsResponse {
    /// Parse a consultation answer body. An answer without `<evento>`
    /// blocks is a valid empty result, not an error.
    pub fn parse(xml: &str) -> TransportResult<Self> {
        let mut events = Vec::new();
        let mut reader = Reader::from_str(xml);
        loop {
            match reader.read_event() {
                Ok(XmlEvent::Start(e)) if e.local_name().as_ref() == b"evento" => {
                    let attributes: Vec<String> = e
                        .attributes()
                        .flatten()
                        .map(|a| {
                            format!(
                                " {}=\"{}\"",
                                String::from_utf8_lossy(a.key.as_ref()),
                                String::from_utf8_lossy(&a.value)
                            )
                        })
                        .collect();
                    if let Ok(inner) = reader.read_text(e.name()) {
                        events.push(format!(
                            "<evento{}>{}</evento>",
                            attributes.concat(),
                            inner
                        ));
                    }
                }
                Ok(XmlEvent::Eof) => break,
                Err(e) => {
                    return Err(TransportError::MalformedResponse {
                        detail: format!("consultation answer is not well-formed: {e}"),
                    })
                }
                Ok(_) => {}
            }
        }
        Ok(Self {
            events,
            occurrences: parse_occurrences(xml),
        })
    }
}

/// Text content of the first `local_name` leaf in `xml`.
fn first_leaf_text(xml: &str, local_name: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let mut capture = false;
    let mut buffer = String::new();
    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) if e.local_name().as_ref() == local_name.as_bytes() => {
                capture = true;
                buffer.clear();
            }
            Ok(XmlEvent::Text(t)) if capture => {
                if let Ok(text) = t.unescape() {
                    buffer.push_str(&text);
                }
            }
            Ok(XmlEvent::End(e)) if e.local_name().as_ref() == local_name.as_bytes() => {
                let trimmed = buffer.trim();
                if trimmed.is_empty() {
                    return None;
                }
                return Some(trimmed.to_string());
            }
            Ok(XmlEvent::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

fn parse_count(xml: &str, local_name: &str) -> u32 {
    first_leaf_text(xml, local_name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// All `<ocorrencia>` records in `xml`.
fn parse_occurrences(xml: &str) -> Vec<Occurrence> {
    let mut occurrences = Vec::new();
    let mut reader = Reader::from_str(xml);
    let mut current: Option<(Option<String>, Option<String>, Option<String>)> = None;
    let mut field: Option<&'static str> = None;
    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) => match e.local_name().as_ref() {
                b"ocorrencia" => current = Some((None, None, None)),
                b"codigo" if current.is_some() => field = Some("codigo"),
                b"descricao" if current.is_some() => field = Some("descricao"),
                b"tipo" if current.is_some() => field = Some("tipo"),
                _ => field = None,
            },
            Ok(XmlEvent::Text(t)) => {
                if let (Some(slot), Some(name)) = (current.as_mut(), field) {
                    if let Ok(text) = t.unescape() {
                        let value = Some(text.trim().to_string());
                        match name {
                            "codigo" => slot.0 = value,
                            "descricao" => slot.1 = value,
                            _ => slot.2 = value,
                        }
                    }
                }
            }
            Ok(XmlEvent::End(e)) => {
                field = None;
                if e.local_name().as_ref() == b"ocorrencia" {
                    if let Some((code, description, kind)) = current.take() {
                        occurrences.push(Occurrence {
                            code: code.unwrap_or_default(),
                            description: description.unwrap_or_default(),
                            severity: OccurrenceSeverity::from_wire(
                                kind.as_deref().unwrap_or("1"),
                            ),
                        });
                    }
                }
            }
            Ok(XmlEvent::Eof) | Err(_) => break,
            Ok(_) => {}
        }
    }
    occurrences
}

/// All `<evento Id="...">` result blocks in a query answer.
fn parse_event_results(xml: &str) -> Vec<EventResult> {
    let mut results = Vec::new();
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) if e.local_name().as_ref() == b"evento" => {
                let event_id = e
                    .attributes()
                    .flatten()
                    .find(|a| a.key.local_name().as_ref() == b"Id")
                    .map(|a| String::from_utf8_lossy(&a.value).into_owned());
                let Some(event_id) = event_id else { continue };

                // Collect the raw block up to the matching close so the
                // leaf/occurrence helpers can run on it in isolation.
                if let Ok(span) = reader.read_text(e.name()) {
                    let block = span.into_owned();
                    results.push(EventResult {
                        event_id,
                        receipt: first_leaf_text(&block, "nrRecibo"),
                        occurrences: parse_occurrences(&block),
                    });
                }
            }
            Ok(XmlEvent::Eof) | Err(_) => break,
            Ok(_) => {}
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUBMIT_OK: &str = r#"<retornoEnvioLoteEventos>
      <status><cdResposta>201</cdResposta><descResposta>Lote recebido</descResposta></status>
      <dadosRecepcaoLote><protocoloEnvio>1.2.202403.0001234</protocoloEnvio></dadosRecepcaoLote>
    </retornoEnvioLoteEventos>"#;

    const SUBMIT_REFUSED: &str = r#"<retornoEnvioLoteEventos>
      <status><cdResposta>301</cdResposta><descResposta>Erro no lote</descResposta></status>
      <ocorrencias>
        <ocorrencia><codigo>405</codigo><descricao>CNPJ invalido</descricao><tipo>1</tipo></ocorrencia>
        <ocorrencia><codigo>720</codigo><descricao>Schema em revisao</descricao><tipo>2</tipo></ocorrencia>
      </ocorrencias>
    </retornoEnvioLoteEventos>"#;

    #[test]
    fn test_parse_accepted_submission() {
        let response = SubmitResponse::parse(SUBMIT_OK).unwrap();
        assert!(response.accepted());
        assert_eq!(response.into_protocol().unwrap(), "1.2.202403.0001234");
    }

    #[test]
    fn test_parse_refused_submission() {
        let response = SubmitResponse::parse(SUBMIT_REFUSED).unwrap();
        assert!(!response.accepted());
        let err = response.into_protocol().unwrap_err();
        assert_eq!(err.code, "301");
        assert_eq!(err.occurrences.len(), 2);
        assert_eq!(err.occurrences[0].severity, OccurrenceSeverity::Error);
        assert_eq!(err.occurrences[1].severity, OccurrenceSeverity::Warning);
    }

    #[test]
    fn test_submission_without_discriminator_is_malformed() {
        let err = SubmitResponse::parse("<retorno><protocolo>1</protocolo></retorno>").unwrap_err();
        assert!(matches!(err, TransportError::MalformedResponse { .. }));
    }

    #[test]
    fn test_accepted_without_protocol_is_malformed() {
        let xml = "<retorno><cdResposta>201</cdResposta></retorno>";
        assert!(matches!(
            SubmitResponse::parse(xml).unwrap_err(),
            TransportError::MalformedResponse { .. }
        ));
    }

    const QUERY_PROCESSED: &str = r#"<retornoProcessamentoLoteEventos>
      <situacao>Processado</situacao>
      <qtdEventosProcessados>3</qtdEventosProcessados>
      <qtdEventosComErro>1</qtdEventosComErro>
      <retornoEventos>
        <evento Id="ID1"><nrRecibo>1.1.0000000000001</nrRecibo></evento>
        <evento Id="ID2">
          <ocorrencias>
            <ocorrencia><codigo>172</codigo><descricao>CPF invalido</descricao><tipo>1</tipo></ocorrencia>
          </ocorrencias>
        </evento>
      </retornoEventos>
    </retornoProcessamentoLoteEventos>"#;

    #[test]
    fn test_parse_query_response() {
        let response = QueryResponse::parse(QUERY_PROCESSED).unwrap();
        assert_eq!(response.situation, BatchSituation::Processed);
        assert_eq!(response.processed_count, 3);
        assert_eq!(response.error_count, 1);
        assert_eq!(response.event_results.len(), 2);

        let ok = &response.event_results[0];
        assert_eq!(ok.event_id, "ID1");
        assert!(ok.processed());
        assert_eq!(ok.receipt.as_deref(), Some("1.1.0000000000001"));

        let failed = &response.event_results[1];
        assert!(!failed.processed());
        assert_eq!(failed.occurrences[0].code, "172");
    }

    #[test]
    fn test_parse_query_processing() {
        let xml = "<retorno><situacao>Em Processamento</situacao></retorno>";
        let response = QueryResponse::parse(xml).unwrap();
        assert_eq!(response.situation, BatchSituation::Processing);
        assert_eq!(response.processed_count, 0);
    }

    #[test]
    fn test_query_unknown_situation_is_malformed() {
        let xml = "<retorno><situacao>Talvez</situacao></retorno>";
        assert!(QueryResponse::parse(xml).is_err());
    }

    #[test]
    fn test_parse_download_decodes_archive() {
        let payload = "<eSocial><evtAdmissao/></eSocial>";
        let xml = format!("<retorno><arquivo>{}</arquivo></retorno>", STANDARD.encode(payload));
        let response = DownloadResponse::parse(&xml).unwrap();
        assert_eq!(response.xml, payload);
    }

    #[test]
    fn test_download_without_archive_is_malformed() {
        assert!(DownloadResponse::parse("<retorno/>").is_err());
    }

    #[test]
    fn test_download_bad_base64_is_malformed() {
        let xml = "<retorno><arquivo>not base64!!</arquivo></retorno>";
        assert!(DownloadResponse::parse(xml).is_err());
    }

    #[test]
    fn test_parse_consultation_blocks() {
        let xml = r#"<retornoConsulta>
          <eventos>
            <evento Id="A"><evtAdmissao><cpfTrab>52998224725</cpfTrab></evtAdmissao></evento>
            <evento Id="B"><evtDeslig><cpfTrab>52998224725</cpfTrab></evtDeslig></evento>
          </eventos>
        </retornoConsulta>"#;
        let response = ConsultEventsResponse::parse(xml).unwrap();
        assert_eq!(response.events.len(), 2);
        assert!(response.events[0].starts_with("<evento Id=\"A\">"));
        assert!(response.events[1].contains("<evtDeslig>"));
    }

    #[test]
    fn test_parse_consultation_empty_result() {
        let response = ConsultEventsResponse::parse("<retornoConsulta/>").unwrap();
        assert!(response.events.is_empty());
    }
}
