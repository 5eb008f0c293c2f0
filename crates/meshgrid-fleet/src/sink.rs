//! Aggregate log sink: one append-only file per role.
//!
//! Every line a node prints is appended to its role's file, together with
//! the command banners the orchestrator writes. Benchmarks and reports
//! read these files back.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info};

use mesh_core::Role;

use crate::observer::LineObserver;

/// File name of a role's aggregate log.
pub fn file_name(role: Role) -> &'static str {
    match role {
        Role::Root => "rootOutput.txt",
        Role::Server => "serversOutput.txt",
        Role::Broker => "brokerOutput.txt",
    }
}

struct Files {
    dir: PathBuf,
    root: Mutex<File>,
    server: Mutex<File>,
    broker: Mutex<File>,
}

/// Shared handle to the aggregate logs of one run.
#[derive(Clone)]
pub struct LogSink {
    files: Arc<Files>,
}

impl LogSink {
    /// Create (truncating) the three aggregate files under `dir`.
    pub async fn create(dir: &Path) -> std::io::Result<Self> {
        fs::create_dir_all(dir).await?;
        let open = |role: Role| {
            let path = dir.join(file_name(role));
            async move {
                OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(path)
                    .await
            }
        };
        let files = Files {
            dir: dir.to_path_buf(),
            root: Mutex::new(open(Role::Root).await?),
            server: Mutex::new(open(Role::Server).await?),
            broker: Mutex::new(open(Role::Broker).await?),
        };
        info!(dir = %dir.display(), "log sink created");
        Ok(Self {
            files: Arc::new(files),
        })
    }

    /// Create the sink of one run: `<output>/exec_<tag>/`.
    pub async fn for_run(output: &Path, tag: &str) -> std::io::Result<Self> {
        Self::create(&output.join(format!("exec_{tag}"))).await
    }

    pub fn dir(&self) -> &Path {
        &self.files.dir
    }

    pub fn path(&self, role: Role) -> PathBuf {
        self.files.dir.join(file_name(role))
    }

    fn file(&self, role: Role) -> &Mutex<File> {
        match role {
            Role::Root => &self.files.root,
            Role::Server => &self.files.server,
            Role::Broker => &self.files.broker,
        }
    }

    pub async fn append(&self, role: Role, text: &str) -> std::io::Result<()> {
        let mut file = self.file(role).lock().await;
        file.write_all(text.as_bytes()).await?;
        file.flush().await
    }

    pub async fn append_line(&self, role: Role, line: &str) -> std::io::Result<()> {
        self.append(role, &format!("{line}\n")).await
    }

    /// Append the same text to every role's file.
    pub async fn write_all(&self, text: &str) -> std::io::Result<()> {
        for role in [Role::Root, Role::Server, Role::Broker] {
            self.append(role, text).await?;
        }
        Ok(())
    }

    /// Current size of a role's file in bytes.
    pub async fn len(&self, role: Role) -> std::io::Result<u64> {
        Ok(fs::metadata(self.path(role)).await?.len())
    }

    pub async fn read(&self, role: Role) -> std::io::Result<String> {
        fs::read_to_string(self.path(role)).await
    }

    async fn read_bytes_from(&self, role: Role, offset: u64) -> std::io::Result<Vec<u8>> {
        let mut file = File::open(self.path(role)).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    /// Feed complete lines written to a role's file after `offset` into
    /// `observer`, polling until it is satisfied. Returns the number of
    /// lines consumed.
    ///
    /// There is no timeout; wrap the call if one is needed.
    pub async fn wait_for(
        &self,
        role: Role,
        offset: u64,
        observer: &mut dyn LineObserver,
        poll: Duration,
    ) -> std::io::Result<usize> {
        let mut pos = offset;
        let mut pending: Vec<u8> = Vec::new();
        let mut consumed = 0usize;
        if observer.satisfied() {
            return Ok(consumed);
        }
        loop {
            let chunk = self.read_bytes_from(role, pos).await?;
            pos += chunk.len() as u64;
            pending.extend_from_slice(&chunk);
            while let Some(end) = pending.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = pending.drain(..=end).collect();
                let line = String::from_utf8_lossy(&raw);
                consumed += 1;
                if observer.accept(line.trim_end_matches(['\n', '\r'])) {
                    debug!(%role, consumed, "log wait satisfied");
                    return Ok(consumed);
                }
            }
            tokio::time::sleep(poll).await;
        }
    }
}
