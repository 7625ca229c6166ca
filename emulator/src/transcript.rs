use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Who produced a transcript line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TranscriptRole {
    Bench,
    Node,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Bench => "BENCH>",
            TranscriptRole::Node => "NODE <",
        }
    }
}

/// Writes timestamped lines to stdout and, optionally, to a transcript file.
pub struct TranscriptLogger {
    file: Option<BufWriter<std::fs::File>>,
}

impl TranscriptLogger {
    pub fn new(path: Option<&Path>, header: &str) -> io::Result<Self> {
        let file = match path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(path)?;
                Some(BufWriter::new(file))
            }
            None => None,
        };

        let mut logger = Self { file };
        logger.write_header(header)?;
        Ok(logger)
    }

    fn write_header(&mut self, header: &str) -> io::Result<()> {
        println!("# {header}");
        if let Some(writer) = self.file.as_mut() {
            writeln!(writer, "# {header}")?;
            writeln!(writer, "# Timestamps are virtual milliseconds since the first boot")?;
            writeln!(writer)?;
            writer.flush()?;
        }
        Ok(())
    }

    pub fn append_line(&mut self, at_ms: u64, role: TranscriptRole, line: &str) -> io::Result<()> {
        let formatted = format!("[+{:>9} ms] {} {}", at_ms, role.prefix(), line);
        println!("{formatted}");
        if let Some(writer) = self.file.as_mut() {
            writeln!(writer, "{formatted}")?;
            writer.flush()?;
        }
        Ok(())
    }
}
