//! DMN XML Parser
//!
//! Event-driven parse of DMN 1.3 documents (namespace
//! `https://www.omg.org/spec/DMN/20191111/MODEL/`). Element matching is by
//! local name so prefixed and default-namespace documents both parse.
//!
//! Recognized elements: `decision`, `decisionTable`, `input`, `output`,
//! `rule`, `inputEntry`, `outputEntry` and
//! `informationRequirement/requiredDecision[@href]`.

use super::{Decision, DecisionRow, DmnDocument, DmnError, DmnResult, HitPolicy};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::warn;

/// What an active text capture belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
enum CaptureKind {
    InputEntry,
    OutputEntry,
}

#[derive(Debug, Default)]
struct RowBuilder {
    input_entries: Vec<String>,
    output_entries: Vec<String>,
}

#[derive(Debug)]
struct DecisionBuilder {
    decision_id: String,
    decision_name: String,
    requirements: Vec<String>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    hit_policy: HitPolicy,
    rows: Vec<DecisionRow>,
}

/// Parse a DMN document from its XML source.
pub fn parse_document(xml: &str) -> DmnResult<DmnDocument> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut decisions: Vec<Decision> = Vec::new();
    let mut current: Option<DecisionBuilder> = None;
    let mut row: Option<RowBuilder> = None;
    let mut capture: Option<(CaptureKind, String)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                handle_open(&e, &mut current, &mut row, &mut capture)?;
            }
            Ok(Event::Empty(e)) => {
                // Self-closing elements: an empty entry is a wildcard cell.
                match local_name(&e) {
                    b"inputEntry" => {
                        if let Some(row) = row.as_mut() {
                            row.input_entries.push(String::new());
                        }
                    }
                    b"outputEntry" => {
                        if let Some(row) = row.as_mut() {
                            row.output_entries.push(String::new());
                        }
                    }
                    _ => handle_open(&e, &mut current, &mut row, &mut capture)?,
                }
            }
            Ok(Event::Text(t)) => {
                if let Some((_, buf)) = capture.as_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| DmnError::Xml(e.to_string()))?;
                    buf.push_str(&text);
                }
            }
            Ok(Event::CData(t)) => {
                if let Some((_, buf)) = capture.as_mut() {
                    buf.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"inputEntry" | b"outputEntry" => {
                    if let (Some((kind, buf)), Some(row)) = (capture.take(), row.as_mut()) {
                        match kind {
                            CaptureKind::InputEntry => row.input_entries.push(buf),
                            CaptureKind::OutputEntry => row.output_entries.push(buf),
                        }
                    }
                }
                b"rule" => {
                    if let (Some(row), Some(decision)) = (row.take(), current.as_mut()) {
                        decision.rows.push(DecisionRow {
                            input_entries: row.input_entries,
                            output_entries: row.output_entries,
                        });
                    }
                }
                b"decision" => {
                    if let Some(builder) = current.take() {
                        decisions.push(Decision {
                            decision_id: builder.decision_id,
                            decision_name: builder.decision_name,
                            requirements: builder.requirements,
                            inputs: builder.inputs,
                            outputs: builder.outputs,
                            hit_policy: builder.hit_policy,
                            rows: builder.rows,
                        });
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(DmnError::Xml(e.to_string())),
        }
    }

    if decisions.is_empty() {
        return Err(DmnError::Empty);
    }

    Ok(DmnDocument { decisions })
}

fn handle_open(
    e: &BytesStart<'_>,
    current: &mut Option<DecisionBuilder>,
    row: &mut Option<RowBuilder>,
    capture: &mut Option<(CaptureKind, String)>,
) -> DmnResult<()> {
    match local_name(e) {
        b"decision" => {
            let decision_id = attribute(e, b"id")?.ok_or_else(|| {
                DmnError::MalformedDocument("decision element missing 'id' attribute".to_string())
            })?;
            let decision_name = attribute(e, b"name")?.unwrap_or_else(|| decision_id.clone());
            *current = Some(DecisionBuilder {
                decision_id,
                decision_name,
                requirements: Vec::new(),
                inputs: Vec::new(),
                outputs: Vec::new(),
                hit_policy: HitPolicy::Unique,
                rows: Vec::new(),
            });
        }
        b"requiredDecision" => {
            if let (Some(decision), Some(href)) = (current.as_mut(), attribute(e, b"href")?) {
                decision
                    .requirements
                    .push(href.trim_start_matches('#').to_string());
            }
        }
        b"decisionTable" => {
            if let Some(decision) = current.as_mut() {
                if let Some(policy) = attribute(e, b"hitPolicy")? {
                    decision.hit_policy = HitPolicy::parse(&policy).unwrap_or_else(|| {
                        warn!(
                            decision_id = %decision.decision_id,
                            hit_policy = %policy,
                            "unknown hit policy, defaulting to UNIQUE"
                        );
                        HitPolicy::Unique
                    });
                }
            }
        }
        b"input" => {
            if let Some(decision) = current.as_mut() {
                let label = match attribute(e, b"label")? {
                    Some(label) => label,
                    None => attribute(e, b"id")?.ok_or_else(|| {
                        DmnError::MalformedDocument(format!(
                            "decision '{}': input column without label",
                            decision.decision_id
                        ))
                    })?,
                };
                decision.inputs.push(label);
            }
        }
        b"output" => {
            if let Some(decision) = current.as_mut() {
                let label = match attribute(e, b"label")? {
                    Some(label) => label,
                    None => attribute(e, b"id")?.ok_or_else(|| {
                        DmnError::MalformedDocument(format!(
                            "decision '{}': output column without label",
                            decision.decision_id
                        ))
                    })?,
                };
                decision.outputs.push(label);
            }
        }
        b"rule" => {
            if current.is_some() {
                *row = Some(RowBuilder::default());
            }
        }
        b"inputEntry" => {
            if row.is_some() {
                *capture = Some((CaptureKind::InputEntry, String::new()));
            }
        }
        b"outputEntry" => {
            if row.is_some() {
                *capture = Some((CaptureKind::OutputEntry, String::new()));
            }
        }
        _ => {}
    }
    Ok(())
}

fn local_name<'a>(e: &'a BytesStart<'_>) -> &'a [u8] {
    let raw = e.name().into_inner();
    match raw.iter().rposition(|&b| b == b':') {
        Some(idx) => &raw[idx + 1..],
        None => raw,
    }
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> DmnResult<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| DmnError::Xml(err.to_string()))?;
        if attr.key.local_name().as_ref() == key {
            let value = attr
                .unescape_value()
                .map_err(|err| DmnError::Xml(err.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}
