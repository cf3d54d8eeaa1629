//! Log sink writing one JSON object per line.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tagsim_common::{LogRecord, LogSink, SinkError};

/// Writes records as JSON lines.
pub struct JsonLinesSink<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> JsonLinesSink<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        JsonLinesSink {
            writer: BufWriter::new(writer),
        }
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer
            .into_inner()
            .map_err(|e| SinkError::Io(e.into_error()))
    }
}

impl JsonLinesSink<File> {
    /// Create (or truncate) a file, creating parent directories as needed.
    pub fn create(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(JsonLinesSink::new(File::create(path)?))
    }
}

impl<W: Write> LogSink for JsonLinesSink<W> {
    fn record(&mut self, record: &LogRecord) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, record)
            .map_err(|e| SinkError::Serialize(e.to_string()))?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagsim_common::{Emission, MachineKind, RecordKind, SimTime, TagId};

    #[test]
    fn test_writes_one_object_per_line() {
        let mut sink = JsonLinesSink::new(Vec::new());
        for seq in 0..2 {
            sink.record(&LogRecord {
                seq,
                time: SimTime::from_nanos(1_500),
                tag: "alice".to_string(),
                tag_id: TagId::new(0),
                machine: Some(MachineKind::Input),
                state: Some("listen".to_string()),
                kind: RecordKind::Emit(Emission {
                    voltage: Some(0.25),
                    distance_from_sender: Some(3.0),
                    ..Default::default()
                }),
            })
            .unwrap();
        }
        let bytes = sink.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let value: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(value["seq"], 1);
        assert_eq!(value["time"], 1_500);
        assert_eq!(value["record"], "emit");
        assert_eq!(value["machine"], "input");
        assert_eq!(value["voltage"], 0.25);
        assert_eq!(value["distance_from_sender"], 3.0);
        assert!(value.get("phase").is_none());
    }
}
