use super::{
    ExecutionError, ExecutionStatus, OUTPUT_END_MARKER, OUTPUT_START_MARKER, TRUNCATION_MARKER,
};
use serde::Deserialize;
use std::io::{BufRead, BufReader, ErrorKind, Read};

const MIN_LINE_BYTES: usize = 256;

/// What the agent writes between the output markers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOutput {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub new_session_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Frame {
    Missing,
    Overflow,
    Complete(String),
}

/// Line-oriented stdout capture. Text between the markers is the payload;
/// everything else is diagnostic and capped at the output limit.
#[derive(Debug)]
pub struct OutputCapture {
    limit: usize,
    frame_limit: usize,
    in_frame: bool,
    current: String,
    current_overflow: bool,
    last_frame: Frame,
    diagnostics: String,
    diagnostics_truncated: bool,
}

impl OutputCapture {
    pub fn new(max_output_bytes: usize) -> Self {
        Self {
            limit: max_output_bytes,
            frame_limit: max_output_bytes.saturating_mul(2),
            in_frame: false,
            current: String::new(),
            current_overflow: false,
            last_frame: Frame::Missing,
            diagnostics: String::new(),
            diagnostics_truncated: false,
        }
    }

    pub fn push_line(&mut self, line: &str) {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.trim() == OUTPUT_START_MARKER {
            self.in_frame = true;
            self.current.clear();
            self.current_overflow = false;
            return;
        }
        if self.in_frame && trimmed.trim() == OUTPUT_END_MARKER {
            self.in_frame = false;
            // Last complete frame wins.
            self.last_frame = if self.current_overflow {
                Frame::Overflow
            } else {
                Frame::Complete(std::mem::take(&mut self.current))
            };
            return;
        }

        if self.in_frame {
            if self.current_overflow {
                return;
            }
            if self.current.len() + trimmed.len() + 1 > self.frame_limit {
                self.current_overflow = true;
                self.current.clear();
                return;
            }
            self.current.push_str(trimmed);
            self.current.push('\n');
        } else {
            append_capped(
                &mut self.diagnostics,
                &mut self.diagnostics_truncated,
                trimmed,
                self.limit,
            );
        }
    }

    pub fn read_from<R: Read>(mut self, reader: R) -> Self {
        // Marker lines must survive even a tiny output limit.
        let max_line = self.frame_limit.max(MIN_LINE_BYTES);
        for_each_line(reader, max_line, |line, clipped| {
            if clipped {
                self.push_clipped();
            } else {
                self.push_line(&String::from_utf8_lossy(line));
            }
        });
        self
    }

    /// A line longer than the per-line bound never fits the frame or the
    /// diagnostics, so it only flips the matching overflow flag.
    fn push_clipped(&mut self) {
        if self.in_frame {
            self.current_overflow = true;
            self.current.clear();
        } else {
            self.diagnostics_truncated = true;
        }
    }

    pub fn diagnostics(&self) -> String {
        with_marker(&self.diagnostics, self.diagnostics_truncated)
    }

    /// Raw JSON of the last complete frame.
    pub fn frame(&self) -> Result<&str, ExecutionError> {
        match &self.last_frame {
            Frame::Complete(raw) => Ok(raw.as_str()),
            Frame::Overflow => Err(ExecutionError::FrameOverflow {
                limit: self.frame_limit,
            }),
            Frame::Missing => Err(ExecutionError::MissingFrame),
        }
    }
}

pub fn parse_agent_output(raw: &str) -> Result<AgentOutput, ExecutionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ExecutionError::MalformedFrame {
            reason: "output frame was empty".to_string(),
        });
    }
    serde_json::from_str(trimmed).map_err(|err| ExecutionError::MalformedFrame {
        reason: err.to_string(),
    })
}

/// Reads a whole stream, keeping at most `limit` bytes.
pub fn read_capped<R: Read>(reader: R, limit: usize) -> String {
    let mut capture = String::new();
    let mut truncated = false;
    for_each_line(reader, limit.saturating_add(1), |line, clipped| {
        if clipped {
            truncated = true;
            return;
        }
        let line = String::from_utf8_lossy(line);
        append_capped(
            &mut capture,
            &mut truncated,
            line.trim_end_matches(['\r', '\n']),
            limit,
        );
    });
    with_marker(&capture, truncated)
}

/// Splits `reader` into lines, holding at most `max_line` bytes of any one
/// line. The rest of a longer line is drained and dropped, and the callback
/// is told the line was clipped.
fn for_each_line<R: Read>(reader: R, max_line: usize, mut on_line: impl FnMut(&[u8], bool)) {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    let mut clipped = false;
    loop {
        let chunk = match reader.fill_buf() {
            Ok(chunk) if chunk.is_empty() => break,
            Ok(chunk) => chunk,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        let (used, line_done) = match chunk.iter().position(|b| *b == b'\n') {
            Some(newline) => (newline + 1, true),
            None => (chunk.len(), false),
        };
        let room = max_line.saturating_sub(line.len());
        if used > room {
            clipped = true;
        }
        line.extend_from_slice(&chunk[..used.min(room)]);
        reader.consume(used);

        if line_done {
            on_line(&line, clipped);
            line.clear();
            clipped = false;
        }
    }
    if !line.is_empty() || clipped {
        on_line(&line, clipped);
    }
}

pub fn truncate_with_marker(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut cut = max_bytes;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n{TRUNCATION_MARKER}", &text[..cut])
}

fn append_capped(buf: &mut String, truncated: &mut bool, line: &str, limit: usize) {
    if *truncated {
        return;
    }
    if buf.len() + line.len() + 1 > limit {
        *truncated = true;
        return;
    }
    buf.push_str(line);
    buf.push('\n');
}

fn with_marker(text: &str, truncated: bool) -> String {
    if truncated {
        format!("{text}{TRUNCATION_MARKER}")
    } else {
        text.trim_end().to_string()
    }
}
