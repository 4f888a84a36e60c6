use anyhow::Context;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use stormcore::radar_interface::TrackEvent;

/// Append-only JSON-lines log of track events.
pub struct Journal {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl Journal {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating journal directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening journal {}", path.display()))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn append(&mut self, event: &TrackEvent) -> anyhow::Result<()> {
        let line = serde_json::to_string(event).context("serializing track event")?;
        writeln!(self.writer, "{}", line)
            .with_context(|| format!("writing journal {}", self.path.display()))?;
        self.written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        self.writer
            .flush()
            .with_context(|| format!("flushing journal {}", self.path.display()))
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
