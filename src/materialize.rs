//! Generation of each engine's native config file.
//!
//! A config file is only written when absent. Once it exists it belongs to the operator and is never
//! regenerated, so manual edits survive.
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::info;

use crate::{
    config::{EngineKind, ServiceDescriptor},
    logs::LogSink,
    runtime::InstallRoot,
};

/// Writes missing native config files from engine templates.
#[derive(Debug, Clone)]
pub struct ConfigMaterializer {
    root: InstallRoot,
    log: Arc<LogSink>,
}

impl ConfigMaterializer {
    pub fn new(root: InstallRoot, log: Arc<LogSink>) -> Self {
        Self { root, log }
    }

    /// Ensures the descriptor's config file exists, generating it when missing.
    ///
    /// Returns the path of a newly generated file, or `None` when one was already there.
    pub fn ensure(&self, descriptor: &ServiceDescriptor) -> io::Result<Option<PathBuf>> {
        let config_path = self.root.resolve(&descriptor.config_file_path);
        if config_path.exists() {
            return Ok(None);
        }

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = self.render(descriptor);
        fs::write(&config_path, content)?;

        info!(
            "Generated {} config for '{}' at {}",
            descriptor.kind,
            descriptor.name,
            config_path.display()
        );
        self.log.append(format!(
            "Generated {} config file: {}",
            descriptor.kind,
            config_path.display()
        ));
        Ok(Some(config_path))
    }

    /// Renders the native config text for `descriptor` without touching disk.
    pub fn render(&self, descriptor: &ServiceDescriptor) -> String {
        match descriptor.kind {
            EngineKind::MySql => self.render_mysql(descriptor),
            EngineKind::MongoDb => self.render_mongodb(descriptor),
            EngineKind::Redis => self.render_redis(descriptor),
        }
    }

    fn absolute(&self, path: &Path) -> String {
        forward_slashes(&self.root.resolve(path))
    }

    fn render_mysql(&self, descriptor: &ServiceDescriptor) -> String {
        let mut client = String::from("[client]\ndefault-character-set=utf8\n");
        if !descriptor.credentials.user.is_empty() {
            client.push_str(&format!("user={}\n", descriptor.credentials.user));
        }
        if !descriptor.credentials.password.is_empty() {
            client.push_str(&format!("password={}\n", descriptor.credentials.password));
        }

        format!(
            "{client}
[mysqld]
port = {port}
basedir = {basedir}
datadir = {datadir}
max_connections = 200
character-set-server = utf8
default-storage-engine = INNODB
explicit_defaults_for_timestamp = 1
",
            port = descriptor.port,
            basedir = self.absolute(&descriptor.home_dir),
            datadir = self.absolute(&descriptor.data_dir),
        )
    }

    fn render_mongodb(&self, descriptor: &ServiceDescriptor) -> String {
        format!(
            "systemLog:
  destination: file
  path: {log}
  logAppend: true
storage:
  dbPath: {data}
net:
  bindIp: 127.0.0.1
  port: {port}
",
            log = forward_slashes(&self.root.resolve(descriptor.log_dir.join("mongo.log"))),
            data = self.absolute(&descriptor.data_dir),
            port = descriptor.port,
        )
    }

    fn render_redis(&self, descriptor: &ServiceDescriptor) -> String {
        let mut content = format!(
            "bind 127.0.0.1 -::1
protected-mode yes
port {port}
tcp-backlog 511
timeout 0
tcp-keepalive 300
daemonize no
pidfile ./redis.pid
loglevel notice
logfile \"\"
databases 16
always-show-logo no
set-proc-title yes
stop-writes-on-bgsave-error yes
rdbcompression yes
rdbchecksum yes
dbfilename dump.rdb
dir {data}
replica-serve-stale-data yes
replica-read-only yes
appendonly no
appendfilename \"appendonly.aof\"
appendfsync everysec
slowlog-log-slower-than 10000
slowlog-max-len 128
hz 10
dynamic-hz yes
",
            port = descriptor.port,
            data = self.absolute(&descriptor.data_dir),
        );
        if !descriptor.credentials.password.is_empty() {
            content.push_str(&format!("requirepass {}\n", descriptor.credentials.password));
        }
        content
    }
}

fn forward_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
