//! Raw lifecycle event parsing.
//!
//! Extracts the per-type field set from downloaded government event XML.
//! A malformed individual event is logged and skipped without aborting the
//! run; duplicates (same worker, type and date) are discarded before
//! reconciliation so re-processing the same stream is idempotent.

use chrono::NaiveDate;
use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

use vinculo_events::EventType;

/// One worker-lifecycle event as fetched from the government stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLifecycleEvent {
    pub event_type: EventType,
    /// Worker taxpayer id, bare digits.
    pub cpf: String,
    pub event_date: NaiveDate,
    pub receipt: Option<String>,
    pub name: Option<String>,
    pub registration: Option<String>,
    pub role: Option<String>,
    pub category: Option<String>,
    pub admission_date: Option<NaiveDate>,
    pub termination_date: Option<NaiveDate>,
    /// Original XML block, kept as audit trail.
    pub raw_xml: String,
}

impl RawLifecycleEvent {
    /// Natural duplicate key: worker + type + date.
    #[must_use]
    pub fn dedup_key(&self) -> (String, EventType, NaiveDate) {
        (self.cpf.clone(), self.event_type, self.event_date)
    }
}

/// Parse every event of `event_type` out of a consultation or download
/// answer. Individual blocks that fail to parse are skipped with a log line.
#[must_use]
pub fn parse_lifecycle_events(xml: &str, event_type: EventType) -> Vec<RawLifecycleEvent> {
    let blocks = split_event_blocks(xml);
    let candidates: Vec<&str> = if blocks.is_empty() {
        // A downloaded single-event document has no <evento> wrapper.
        vec![xml]
    } else {
        blocks.iter().map(String::as_str).collect()
    };

    let mut events = Vec::new();
    for block in candidates {
        if !contains_element(block, event_type.root_element()) {
            continue;
        }
        match parse_single(block, event_type) {
            Some(event) => events.push(event),
            None => {
                warn!(event_type = %event_type, "skipping malformed lifecycle event");
            }
        }
    }
    events
}

/// Discard duplicates (same cpf + type + date), keeping first occurrence.
#[must_use]
pub fn dedup_events(events: Vec<RawLifecycleEvent>) -> Vec<RawLifecycleEvent> {
    let mut seen = HashSet::new();
    events
        .into_iter()
        .filter(|event| seen.insert(event.dedup_key()))
        .collect()
}

/// Map a worker category code to its description.
#[must_use]
pub fn category_description(code: &str) -> String {
    let description = match code {
        "101" => "Empregado CLT",
        "102" => "Empregado CLT - Trabalhador Rural",
        "103" => "Empregado CLT - Aprendiz",
        "104" => "Empregado CLT - Doméstico",
        "201" => "Servidor público ocupante de cargo efetivo",
        "202" => "Servidor público ocupante de cargo em comissão",
        "301" => "Trabalhador sem vínculo - Autônomo",
        "302" => "Trabalhador sem vínculo - Avulso",
        _ => return format!("Categoria {code}"),
    };
    description.to_string()
}

fn parse_single(block: &str, event_type: EventType) -> Option<RawLifecycleEvent> {
    let cpf = leaf_text(block, "cpfTrab")?;
    let receipt = leaf_text(block, "nrRecibo");
    let name = leaf_text(block, "nmTrab");
    let registration = leaf_text(block, "matricula");
    let role = leaf_text(block, "codCargo");
    let category = leaf_text(block, "codCateg").map(|c| category_description(&c));

    let admission_date = match event_type {
        EventType::Hire => parse_date(block, "dtAdm"),
        EventType::NoBondStart => parse_date(block, "dtIniTSV"),
        _ => None,
    };
    let termination_date = match event_type {
        EventType::Termination => parse_date(block, "dtDeslig"),
        EventType::NoBondEnd => parse_date(block, "dtTerm"),
        _ => None,
    };

    // The stream stamps dtEvento on each entry; the type's own date is the
    // fallback for archive downloads.
    let event_date = parse_date(block, "dtEvento")
        .or(admission_date)
        .or(termination_date)
        .or_else(|| parse_date(block, "dtAlteracao"))?;

    Some(RawLifecycleEvent {
        event_type,
        cpf,
        event_date,
        receipt,
        name,
        registration,
        role,
        category,
        admission_date,
        termination_date,
        raw_xml: block.to_string(),
    })
}

fn parse_date(xml: &str, local_name: &str) -> Option<NaiveDate> {
    leaf_text(xml, local_name).and_then(|v| NaiveDate::parse_from_str(&v, "%Y-%m-%d").ok())
}

/// Collect raw `<evento>` blocks.
fn split_event_blocks(xml: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) if e.local_name().as_ref() == b"evento" => {
                if let Ok(inner) = reader.read_text(e.name()) {
                    blocks.push(inner.into_owned());
                }
            }
            Ok(XmlEvent::Eof) | Err(_) => break,
            Ok(_) => {}
        }
    }
    blocks
}

fn contains_element(xml: &str, local_name: &str) -> bool {
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

/// Text content of the first `local_name` leaf.
fn leaf_text(xml: &str, local_name: &str) -> Option<String> {
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
