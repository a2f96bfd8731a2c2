use color_eyre::Result;
use crossbeam_channel::Receiver;
use serde::Serialize;
use tokio::io::{AsyncWriteExt, Stdout};
use world_core::{LogEnvelope, SimulationEvent};

/// Forwarded engine log line, tagged so it can share a stream with events.
#[derive(Serialize)]
struct ForwardedLog<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    envelope: &'a LogEnvelope,
}

/// Drains engine events (and optionally forwarded logs) to stdout as JSON
/// lines. When streaming is off the channels are still emptied.
pub struct EventSink {
    events: Receiver<SimulationEvent>,
    logs: Option<Receiver<LogEnvelope>>,
    stream: bool,
    stdout: Stdout,
}

impl EventSink {
    pub fn new(
        events: Receiver<SimulationEvent>,
        logs: Option<Receiver<LogEnvelope>>,
        stream: bool,
    ) -> Self {
        Self {
            events,
            logs,
            stream,
            stdout: tokio::io::stdout(),
        }
    }

    pub async fn drain(&mut self) -> Result<usize> {
        let events: Vec<SimulationEvent> = self.events.try_iter().collect();
        let logs: Vec<LogEnvelope> = self
            .logs
            .as_ref()
            .map(|receiver| receiver.try_iter().collect())
            .unwrap_or_default();
        if !self.stream {
            return Ok(events.len());
        }

        let mut buffer = String::new();
        for envelope in &logs {
            buffer.push_str(&serde_json::to_string(&ForwardedLog {
                kind: "engine_log",
                envelope,
            })?);
            buffer.push('\n');
        }
        for event in &events {
            buffer.push_str(&serde_json::to_string(event)?);
            buffer.push('\n');
        }
        self.stdout.write_all(buffer.as_bytes()).await?;
        self.stdout.flush().await?;
        Ok(events.len())
    }
}
