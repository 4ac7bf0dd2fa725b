//! Snapshot wire and file formats.
//!
//! Two encodings are supported:
//! - `json`: `{"timestamp": ..., "processes": [...]}`, pretty printed with a
//!   fixed two-space indent so re-encoding is byte-identical
//! - `xml`: `<processes>` root with a `<timestamp>` element and a
//!   `<process_list>` holding one `<process>` per record
//!
//! Both can be decoded back into a [`ProcessSnapshot`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::{Deserialize, Serialize};

use crate::error::{FormatError, FormatResult};
use crate::record::{ProcessRecord, ProcessSnapshot};

const XML_ROOT: &str = "processes";
const XML_TIMESTAMP: &str = "timestamp";
const XML_LIST: &str = "process_list";
const XML_PROCESS: &str = "process";

/// Encoding used for a serialized snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    #[default]
    Json,
    Xml,
}

impl SnapshotFormat {
    /// Lowercase name, also used as the file extension.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Xml => "xml",
        }
    }
}

impl fmt::Display for SnapshotFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "xml" => Ok(Self::Xml),
            _ => Err(FormatError::UnsupportedFormat(s.to_string())),
        }
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Encodes a snapshot in the given format.
pub fn encode(snapshot: &ProcessSnapshot, format: SnapshotFormat) -> FormatResult<Vec<u8>> {
    match format {
        SnapshotFormat::Json => Ok(serde_json::to_vec_pretty(snapshot)?),
        SnapshotFormat::Xml => encode_xml(snapshot),
    }
}

fn encode_xml(snapshot: &ProcessSnapshot) -> FormatResult<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    emit(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;
    emit(&mut writer, Event::Start(BytesStart::new(XML_ROOT)))?;
    emit_text_element(&mut writer, XML_TIMESTAMP, &snapshot.timestamp)?;

    emit(&mut writer, Event::Start(BytesStart::new(XML_LIST)))?;
    for record in &snapshot.processes {
        emit(&mut writer, Event::Start(BytesStart::new(XML_PROCESS)))?;
        for (name, value) in record.fields() {
            emit_text_element(&mut writer, name, &value)?;
        }
        emit(&mut writer, Event::End(BytesEnd::new(XML_PROCESS)))?;
    }
    emit(&mut writer, Event::End(BytesEnd::new(XML_LIST)))?;
    emit(&mut writer, Event::End(BytesEnd::new(XML_ROOT)))?;

    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    Ok(bytes)
}

fn emit_text_element(writer: &mut Writer<Vec<u8>>, name: &str, value: &str) -> FormatResult<()> {
    emit(writer, Event::Start(BytesStart::new(name)))?;
    emit(writer, Event::Text(BytesText::new(value)))?;
    emit(writer, Event::End(BytesEnd::new(name)))
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> FormatResult<()> {
    writer
        .write_event(event)
        .map_err(|e| FormatError::Xml(e.to_string()))
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes a snapshot previously produced by [`encode`].
pub fn decode(bytes: &[u8], format: SnapshotFormat) -> FormatResult<ProcessSnapshot> {
    match format {
        SnapshotFormat::Json => Ok(serde_json::from_slice(bytes)?),
        SnapshotFormat::Xml => decode_xml(bytes),
    }
}

fn decode_xml(bytes: &[u8]) -> FormatResult<ProcessSnapshot> {
    let text = std::str::from_utf8(bytes).map_err(|e| FormatError::Xml(e.to_string()))?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut timestamp: Option<String> = None;
    let mut processes = Vec::new();
    let mut current: Option<HashMap<String, String>> = None;
    let mut element: Option<String> = None;

    loop {
        match reader.read_event().map_err(|e| FormatError::Xml(e.to_string()))? {
            Event::Start(start) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                match name.as_str() {
                    XML_PROCESS => current = Some(HashMap::new()),
                    XML_ROOT | XML_LIST => {}
                    _ => element = Some(name),
                }
            }
            Event::Empty(empty) => {
                let name = String::from_utf8_lossy(empty.name().as_ref()).into_owned();
                if let Some(fields) = current.as_mut() {
                    fields.insert(name, String::new());
                }
            }
            Event::Text(text) => {
                let value = text
                    .unescape()
                    .map_err(|e| FormatError::Xml(e.to_string()))?
                    .into_owned();
                match (element.as_deref(), current.as_mut()) {
                    (Some(name), Some(fields)) => {
                        fields.insert(name.to_string(), value);
                    }
                    (Some(XML_TIMESTAMP), None) => timestamp = Some(value),
                    _ => {}
                }
            }
            Event::End(end) => {
                if end.name().as_ref() == XML_PROCESS.as_bytes() {
                    if let Some(fields) = current.take() {
                        processes.push(record_from_fields(&fields)?);
                    }
                }
                element = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| FormatError::Malformed("missing <timestamp> element".to_string()))?;
    Ok(ProcessSnapshot::with_timestamp(timestamp, processes))
}

fn record_from_fields(fields: &HashMap<String, String>) -> FormatResult<ProcessRecord> {
    let text = |name: &str| -> FormatResult<String> {
        fields
            .get(name)
            .cloned()
            .ok_or_else(|| FormatError::Malformed(format!("process is missing <{name}>")))
    };
    let number = |name: &str| -> FormatResult<u64> {
        let value = text(name)?;
        value
            .parse()
            .map_err(|_| FormatError::Malformed(format!("<{name}> is not a number: {value}")))
    };

    let pid = u32::try_from(number("pid")?)
        .map_err(|_| FormatError::Malformed("<pid> out of range".to_string()))?;

    Ok(ProcessRecord {
        user: text("user")?,
        pid,
        cpu: text("cpu")?,
        mem: text("mem")?,
        vsz: number("vsz")?,
        rss: number("rss")?,
        tty: text("tty")?,
        stat: text("stat")?,
        start: text("start")?,
        time: text("time")?,
        command: text("command")?,
    })
}
