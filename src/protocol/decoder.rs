use uuid::Uuid;

use super::{ALL_FILES_SENT_MARKER, ECHO_MARKER, END_FILE_MARKER, START_FILE_MARKER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Normal,
    CapturingFile,
}

/// Something the rest of the host must act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderEvent {
    /// Status line for the active job
    Progress { job_id: Uuid, line: String },
    /// Completed file transfer, attributed to the job active when it began
    File {
        job_id: Uuid,
        name: String,
        content: Vec<u8>,
    },
}

#[derive(Debug)]
struct Capture {
    name: String,
    job_id: Option<Uuid>,
    buffer: Vec<u8>,
}

/// Demultiplexes device status text from embedded file payloads.
///
/// The decoder never fails: unknown or out-of-order framing is ignored so a
/// misbehaving device cannot wedge the host.
#[derive(Debug, Default)]
pub struct Decoder {
    capture: Option<Capture>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DecoderState {
        match self.capture {
            Some(_) => DecoderState::CapturingFile,
            None => DecoderState::Normal,
        }
    }

    /// Consume one line (without its terminator). `active` is the job
    /// currently running on the device, if any.
    pub fn feed(&mut self, line: &str, active: Option<Uuid>) -> Option<DecoderEvent> {
        match self.capture.as_mut() {
            None => self.feed_normal(line, active),
            Some(capture) => {
                let marker = line.trim();
                if marker == END_FILE_MARKER {
                    let capture = self.capture.take()?;
                    return Self::finish(capture);
                }
                if marker == ALL_FILES_SENT_MARKER {
                    if let Some(capture) = self.capture.take() {
                        tracing::debug!(file = %capture.name, "Capture aborted by device");
                    }
                    return None;
                }
                capture.buffer.extend_from_slice(line.as_bytes());
                capture.buffer.push(b'\n');
                None
            }
        }
    }

    fn feed_normal(&mut self, line: &str, active: Option<Uuid>) -> Option<DecoderEvent> {
        if line.starts_with(ECHO_MARKER) {
            return None;
        }
        if let Some(name) = line.strip_prefix(START_FILE_MARKER) {
            let name = name.trim().to_string();
            tracing::debug!(file = %name, job_id = ?active, "File capture started");
            self.capture = Some(Capture {
                name,
                job_id: active,
                buffer: Vec::new(),
            });
            return None;
        }

        let trimmed = line.trim();
        if trimmed == END_FILE_MARKER || trimmed == ALL_FILES_SENT_MARKER {
            tracing::debug!(line, "Stray file marker ignored");
            return None;
        }

        match active {
            Some(job_id) => Some(DecoderEvent::Progress {
                job_id,
                line: line.to_string(),
            }),
            None => {
                tracing::debug!(line, "No active job, line dropped");
                None
            }
        }
    }

    fn finish(capture: Capture) -> Option<DecoderEvent> {
        match capture.job_id {
            Some(job_id) => Some(DecoderEvent::File {
                job_id,
                name: capture.name,
                content: capture.buffer,
            }),
            None => {
                tracing::warn!(
                    file = %capture.name,
                    bytes = capture.buffer.len(),
                    "File received with no active job, dropped"
                );
                None
            }
        }
    }
}
