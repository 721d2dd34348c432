//! Output sinks for normalized entities.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::metrics::Metrics;
use crate::model::Entity;

#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    #[error("failed to write entity: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode {kind} entity: {source}")]
    Encode {
        kind: &'static str,
        source: serde_json::Error,
    },
}

/// Destination for exported entities. Implementations must accept
/// concurrent writers.
pub trait Pipe: Send + Sync {
    fn write(&self, entity: Entity) -> Result<(), PipeError>;
    fn flush(&self) -> Result<(), PipeError> {
        Ok(())
    }
}

/// Newline-delimited JSON, one entity per line.
pub struct JsonLinesPipe {
    out: Mutex<BufWriter<Box<dyn Write + Send>>>,
    metrics: Option<Arc<Metrics>>,
}

impl JsonLinesPipe {
    /// Writes to `path`, or stdout when `path` is empty.
    pub fn open(path: &str) -> Result<Self, PipeError> {
        let sink: Box<dyn Write + Send> = if path.trim().is_empty() {
            Box::new(io::stdout())
        } else {
            let path = Path::new(path);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Box::new(File::create(path)?)
        };
        Ok(Self::from_writer(sink))
    }

    pub fn from_writer(sink: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(BufWriter::new(sink)),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl Pipe for JsonLinesPipe {
    fn write(&self, entity: Entity) -> Result<(), PipeError> {
        let kind = entity.kind();
        let mut line =
            serde_json::to_vec(&entity).map_err(|source| PipeError::Encode { kind, source })?;
        line.push(b'\n');

        let mut out = self.out.lock().expect("pipe mutex poisoned");
        out.write_all(&line)?;
        if let Some(metrics) = &self.metrics {
            metrics.inc_entity_written();
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), PipeError> {
        self.out.lock().expect("pipe mutex poisoned").flush()?;
        Ok(())
    }
}

/// Collects entities in memory.
#[derive(Debug, Default)]
pub struct MemoryPipe {
    entities: Mutex<Vec<Entity>>,
}

impl MemoryPipe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entities(&self) -> Vec<Entity> {
        self.entities.lock().expect("pipe mutex poisoned").clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.entities
            .lock()
            .expect("pipe mutex poisoned")
            .iter()
            .filter(|entity| entity.kind() == kind)
            .count()
    }
}

impl Pipe for MemoryPipe {
    fn write(&self, entity: Entity) -> Result<(), PipeError> {
        self.entities
            .lock()
            .expect("pipe mutex poisoned")
            .push(entity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityIds, ProjectCapability};

    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("buf mutex").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn json_lines_writes_one_object_per_line() {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let metrics = Arc::new(Metrics::new());
        let pipe = JsonLinesPipe::from_writer(Box::new(SharedBuf(Arc::clone(&buf))))
            .with_metrics(Arc::clone(&metrics));
        let ids = EntityIds::new("cust", "azure");

        for project in ["p1", "p2"] {
            pipe.write(Entity::ProjectCapability(ProjectCapability::for_project(
                &ids, project,
            )))
            .expect("write");
        }
        pipe.flush().expect("flush");

        let text = String::from_utf8(buf.lock().expect("buf mutex").clone()).expect("utf8");
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: serde_json::Value = serde_json::from_str(lines[1]).expect("json line");
        assert_eq!(second["ref_id"], "p2");
        assert_eq!(metrics.snapshot().entities_written, 2);
    }

    #[test]
    fn memory_pipe_counts_by_kind() {
        let pipe = MemoryPipe::new();
        let ids = EntityIds::new("cust", "azure");
        pipe.write(Entity::ProjectCapability(ProjectCapability::for_project(
            &ids, "p1",
        )))
        .expect("write");
        assert_eq!(pipe.count("project_capability"), 1);
        assert_eq!(pipe.count("issue"), 0);
    }
}
