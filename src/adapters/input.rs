// Input adapters: each runs as its own async task pushing parsed
// events onto a shared channel, tagging every event with its own
// `origin` and optionally pre-filtering before it ever reaches the
// channel.

use crate::error::Result;
use crate::event::{Event, EventKind};
use crate::filter::FilterPredicate;
use async_trait::async_trait;
use std::io::SeekFrom;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{interval, Duration};
use tracing::{debug, warn};

/// Common shape of every input adapter: drive to completion (or
/// forever, for the long-lived receivers), pushing events onto `tx`.
/// Uses `async_trait` because a trait object (`Box<dyn InputAdapter>`)
/// needs an async method in its vtable. `main.rs` wires configured
/// adapters into a single `Vec<Box<dyn InputAdapter>>` rather than
/// three parallel `if let`/`tokio::spawn` blocks.
#[async_trait]
pub trait InputAdapter: Send {
    async fn run(self: Box<Self>, tx: UnboundedSender<Event>);
}

fn now_ns() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64
}

fn push(tx: &UnboundedSender<Event>, pre_filter: &Option<FilterPredicate>, event: Event) {
    if pre_filter.as_ref().is_none_or(|p| p.eval(&event)) {
        let _ = tx.send(event);
    }
}

/// Polls a newline-delimited JSON log file for appended lines, seeking
/// back to the last read offset each tick rather than holding the file
/// open for inotify-style push notification.
pub struct LogTailer {
    pub path: String,
    pub origin: String,
    pub poll_interval: Duration,
    pub pre_filter: Option<FilterPredicate>,
}

impl LogTailer {
    pub async fn run(self, tx: UnboundedSender<Event>) {
        let mut offset: u64 = 0;
        let mut ticker = interval(self.poll_interval);
        loop {
            ticker.tick().await;
            match self.poll_once(&mut offset, &tx).await {
                Ok(()) => {}
                Err(e) => warn!(error = %e, path = %self.path, "log tailer read failed"),
            }
        }
    }

    async fn poll_once(&self, offset: &mut u64, tx: &UnboundedSender<Event>) -> Result<()> {
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(*offset)).await?;
        let mut reader = BufReader::new(file);
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                break;
            }
            *offset += n as u64;
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str(trimmed) {
                Ok(payload) => {
                    let event = Event::new(EventKind::Log, now_ns(), Some(self.origin.clone()), payload);
                    push(tx, &self.pre_filter, event);
                }
                Err(e) => debug!(error = %e, line = trimmed, "skipping unparseable log line"),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl InputAdapter for LogTailer {
    async fn run(self: Box<Self>, tx: UnboundedSender<Event>) {
        LogTailer::run(*self, tx).await
    }
}

/// UDP syslog receiver, parsing RFC3164/5424-ish lines into structured
/// log events (`severity`/`facility`/`app_name`/`message`).
pub struct SyslogReceiver {
    pub bind_addr: String,
    pub origin: String,
    pub pre_filter: Option<FilterPredicate>,
}

impl SyslogReceiver {
    pub async fn run(self, tx: UnboundedSender<Event>) {
        let socket = match UdpSocket::bind(&self.bind_addr).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, addr = %self.bind_addr, "syslog receiver failed to bind");
                return;
            }
        };
        let mut buf = vec![0u8; 65536];
        loop {
            let (len, _peer) = match socket.recv_from(&mut buf).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "syslog receiver recv failed");
                    continue;
                }
            };
            let text = String::from_utf8_lossy(&buf[..len]);
            let payload = parse_syslog_line(&text);
            let event = Event::new(EventKind::Log, now_ns(), Some(self.origin.clone()), payload);
            push(&tx, &self.pre_filter, event);
        }
    }
}

#[async_trait]
impl InputAdapter for SyslogReceiver {
    async fn run(self: Box<Self>, tx: UnboundedSender<Event>) {
        SyslogReceiver::run(*self, tx).await
    }
}

/// Extracts `<PRI>` severity/facility plus the trailing app/message
/// text from a syslog datagram. Deliberately permissive: malformed
/// input degrades to `{"message": <raw line>}` rather than being
/// dropped.
fn parse_syslog_line(line: &str) -> serde_json::Value {
    let line = line.trim_end();
    if let Some(rest) = line.strip_prefix('<') {
        if let Some((pri_str, tail)) = rest.split_once('>') {
            if let Ok(pri) = pri_str.parse::<u32>() {
                let severity = pri % 8;
                let facility = pri / 8;
                let mut parts = tail.splitn(2, ": ");
                let header = parts.next().unwrap_or_default();
                let message = parts.next().unwrap_or(header);
                let app_name = header.split_whitespace().last().unwrap_or_default().trim_end_matches(':');
                return serde_json::json!({
                    "severity": severity,
                    "facility": facility,
                    "app_name": app_name,
                    "message": message,
                });
            }
        }
    }
    serde_json::json!({ "message": line })
}

/// Reads newline-delimited JSON packet summaries from a file or stdin
/// into network events (`src_ip`/`dst_ip`/`port`/`proto`/`flags`/`dns`/`http`).
pub struct PacketReader {
    pub path: String,
    pub origin: String,
    pub pre_filter: Option<FilterPredicate>,
}

impl PacketReader {
    pub async fn run(self, tx: UnboundedSender<Event>) {
        let result = if self.path == "-" {
            self.read_from(tokio::io::stdin(), &tx).await
        } else {
            match tokio::fs::File::open(&self.path).await {
                Ok(f) => self.read_from(f, &tx).await,
                Err(e) => Err(e.into()),
            }
        };
        if let Err(e) = result {
            warn!(error = %e, path = %self.path, "packet reader failed");
        }
    }

    async fn read_from<R: tokio::io::AsyncRead + Unpin>(&self, reader: R, tx: &UnboundedSender<Event>) -> Result<()> {
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str(trimmed) {
                Ok(payload) => {
                    let event = Event::new(EventKind::Network, now_ns(), Some(self.origin.clone()), payload);
                    push(tx, &self.pre_filter, event);
                }
                Err(e) => debug!(error = %e, line = trimmed, "skipping unparseable packet summary line"),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl InputAdapter for PacketReader {
    async fn run(self: Box<Self>, tx: UnboundedSender<Event>) {
        PacketReader::run(*self, tx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3164_style_pri_header() {
        let payload = parse_syslog_line("<34>sshd[1234]: Failed password for root");
        assert_eq!(payload["severity"], 2);
        assert_eq!(payload["facility"], 4);
        assert_eq!(payload["app_name"], "sshd[1234]");
        assert_eq!(payload["message"], "Failed password for root");
    }

    #[test]
    fn malformed_syslog_line_degrades_to_raw_message() {
        let payload = parse_syslog_line("not a syslog line at all");
        assert_eq!(payload["message"], "not a syslog line at all");
    }
}
