use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;
use skybridge_frame::{message_name, Heartbeat, ProtocolMessage};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HeartbeatOutput {
    pub vehicle_type: u8,
    pub autopilot: u8,
    pub base_mode: u8,
    pub custom_mode: u32,
    pub system_status: u8,
    pub armed: bool,
}

#[derive(Debug, Serialize)]
pub struct MessageOutput {
    pub generation: &'static str,
    pub sequence: u8,
    pub system_id: u8,
    pub component_id: u8,
    pub message_id: u32,
    pub message_name: &'static str,
    pub payload_size: usize,
    pub signed: bool,
    pub payload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<HeartbeatOutput>,
}

impl MessageOutput {
    pub fn from_message(message: &ProtocolMessage) -> Self {
        Self {
            generation: message.generation.name(),
            sequence: message.sequence,
            system_id: message.system_id,
            component_id: message.component_id,
            message_id: message.message_id,
            message_name: message_name(message.message_id),
            payload_size: message.payload.len(),
            signed: message.is_signed(),
            payload: hex(&message.payload),
            heartbeat: Heartbeat::from_message(message).map(|hb| HeartbeatOutput {
                vehicle_type: hb.vehicle_type,
                autopilot: hb.autopilot,
                base_mode: hb.base_mode,
                custom_mode: hb.custom_mode,
                system_status: hb.system_status,
                armed: hb.is_armed(),
            }),
        }
    }
}

/// Print one message as it arrives.
pub fn print_message(message: &ProtocolMessage, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&MessageOutput::from_message(message)),
        OutputFormat::Table => {
            let mut table = message_table();
            table.add_row(message_row(message));
            println!("{table}");
        }
        OutputFormat::Pretty => print_pretty(message),
        OutputFormat::Raw => print_raw(message.raw()),
    }
}

/// Print a batch of messages as a single table.
pub fn print_message_table(messages: &[ProtocolMessage]) {
    let mut table = message_table();
    for message in messages {
        table.add_row(message_row(message));
    }
    println!("{table}");
}

/// Print any serializable record (stats, summaries) as a key/value report.
pub fn print_report<T: Serialize>(title: &str, value: &T, format: OutputFormat) {
    let value = serde_json::to_value(value).unwrap_or(Value::Null);
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(&value),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![title.to_uppercase(), String::new()]);
            for (key, field) in fields(&value) {
                table.add_row(vec![key, field]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let line: Vec<String> = fields(&value)
                .into_iter()
                .map(|(key, field)| format!("{key}={field}"))
                .collect();
            println!("{title}: {}", line.join(" "));
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn print_pretty(message: &ProtocolMessage) {
    let mut line = format!(
        "{} seq={} sys={} comp={} id={} ({}) size={}",
        message.generation,
        message.sequence,
        message.system_id,
        message.component_id,
        message.message_id,
        message_name(message.message_id),
        message.payload.len()
    );
    if let Some(hb) = Heartbeat::from_message(message) {
        line.push_str(&format!(
            " type={} autopilot={} armed={}",
            hb.vehicle_type,
            hb.autopilot,
            hb.is_armed()
        ));
    }
    if message.is_signed() {
        line.push_str(" signed");
    }
    println!("{line}");
}

fn message_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["VER", "SEQ", "SYS", "COMP", "MSG", "SIZE", "PAYLOAD"]);
    table
}

fn message_row(message: &ProtocolMessage) -> Vec<String> {
    vec![
        message.generation.name().to_string(),
        message.sequence.to_string(),
        message.system_id.to_string(),
        message.component_id.to_string(),
        format!(
            "{} ({})",
            message_name(message.message_id),
            message.message_id
        ),
        message.payload.len().to_string(),
        hex(&message.payload),
    ]
}

fn fields(value: &Value) -> Vec<(String, String)> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(key, field)| {
                let text = match field {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                (key.clone(), text)
            })
            .collect(),
        other => vec![("value".to_string(), other.to_string())],
    }
}

pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
