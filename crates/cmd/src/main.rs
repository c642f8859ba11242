// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use fileflow_common_telemetry::{LogFormat, LoggingOptions, init_global_logging, set_panic_hook};
use fileflow_error::ClassifiedError;
use fileflow_transfer::{
    AccessCode, OutgoingFile, Progress, ReceiverId, SignalingKind, TransferConfig,
    TransferOrchestrator, TransferReport,
    error::{ReadFileSnafu, TransferError, WriteFileSnafu},
};
use snafu::{ResultExt, Whatever, whatever};
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[clap(
name = "fileflow",
about = "Send and receive files by access code",
author = env!("CARGO_PKG_AUTHORS"),
version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(flatten)]
    global:   GlobalArgs,
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Clone, Args)]
struct GlobalArgs {
    /// Relay origin
    #[arg(long, global = true, env = "FILEFLOW_SERVER", default_value = "http://127.0.0.1:8080")]
    server:     String,
    /// Log filter, e.g. "info" or "info,fileflow_transfer=debug"
    #[arg(long, global = true, env = "FILEFLOW_LOG")]
    log_level:  Option<String>,
    /// Write hourly rotated log files to this directory
    #[arg(long, global = true, default_value = "")]
    log_dir:    String,
    #[arg(long, global = true, value_enum, default_value_t = FormatArg::Text)]
    log_format: FormatArg,
    /// Signaling transport of the direct channel: websocket or relay
    #[arg(long, global = true, default_value = "websocket")]
    signaling:  SignalingKind,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Text,
    Json,
}

impl GlobalArgs {
    fn logging(&self) -> LoggingOptions {
        LoggingOptions {
            dir: self.log_dir.clone(),
            level: self.log_level.clone(),
            log_format: match self.log_format {
                FormatArg::Text => LogFormat::Text,
                FormatArg::Json => LogFormat::Json,
            },
            ..LoggingOptions::default()
        }
    }

    fn transfer(&self, no_peer: bool) -> TransferConfig {
        TransferConfig::builder()
            .server(self.server.clone())
            .peer_enabled(!no_peer)
            .signaling(self.signaling)
            .build()
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Send(SendArgs),
    Receive(ReceiveArgs),
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Send a file. Prints the access code the receiver needs.
Examples:

fileflow send ./report.pdf
fileflow send ./report.pdf --code A1B2C3 --no-peer

")]
struct SendArgs {
    file:    PathBuf,
    /// Reuse an access code instead of asking the relay for one
    #[arg(long)]
    code:    Option<String>,
    /// Go straight to the relay
    #[arg(long)]
    no_peer: bool,
}

impl SendArgs {
    async fn run(&self, global: &GlobalArgs) -> Result<(), Whatever> {
        let data = reported(
            tokio::fs::read(&self.file)
                .await
                .context(ReadFileSnafu { path: &self.file }),
        )?;
        let name = self
            .file
            .file_name()
            .map_or_else(|| "file".to_string(), |n| n.to_string_lossy().into_owned());
        let file = OutgoingFile::new(name, data);

        let mut orchestrator = reported(TransferOrchestrator::new(global.transfer(self.no_peer)))?;
        let code = match &self.code {
            Some(code) => AccessCode::from(code.as_str()),
            None => reported(orchestrator.api().request_access_code(&file.name, file.size()).await)?,
        };
        println!("access code: {code}");
        info!(%code, name = %file.name, size = file.size(), "waiting for the receiver");

        let watcher = watch_progress(&orchestrator.progress());
        let result = tokio::select! {
            result = orchestrator.send(&code, &file) => result,
            _ = tokio::signal::ctrl_c() => {
                watcher.abort();
                whatever!("interrupted");
            }
        };
        watcher.abort();
        let report = reported(result)?;
        summarize(&report);
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Receive the file published under an access code.
Examples:

fileflow receive A1B2C3
fileflow receive A1B2C3 --out ~/Downloads

")]
struct ReceiveArgs {
    code:    String,
    /// Directory the file is written to
    #[arg(long, default_value = ".")]
    out:     PathBuf,
    /// Receiver id to present to the relay; a fresh one by default
    #[arg(long)]
    rid:     Option<String>,
    #[arg(long)]
    no_peer: bool,
}

impl ReceiveArgs {
    async fn run(&self, global: &GlobalArgs) -> Result<(), Whatever> {
        let code = AccessCode::from(self.code.as_str());
        let rid = self
            .rid
            .as_deref()
            .map_or_else(ReceiverId::generate, ReceiverId::from);
        let mut orchestrator = reported(TransferOrchestrator::new(global.transfer(self.no_peer)))?;

        let watcher = watch_progress(&orchestrator.progress());
        let result = tokio::select! {
            result = orchestrator.receive(&code, &rid) => result,
            _ = tokio::signal::ctrl_c() => {
                watcher.abort();
                whatever!("interrupted");
            }
        };
        watcher.abort();
        let (file, report) = reported(result)?;

        // Only the final component of the announced name is trusted.
        let name = Path::new(&file.name)
            .file_name()
            .map_or_else(|| code.to_string(), |n| n.to_string_lossy().into_owned());
        let path = self.out.join(name);
        reported(
            tokio::fs::create_dir_all(&self.out)
                .await
                .context(WriteFileSnafu { path: &self.out }),
        )?;
        reported(
            tokio::fs::write(&path, &file.data)
                .await
                .context(WriteFileSnafu { path: &path }),
        )?;
        println!("saved {}", path.display());
        summarize(&report);
        Ok(())
    }
}

/// Log every percentage step until aborted.
fn watch_progress(progress: &Progress) -> JoinHandle<()> {
    let mut rx = progress.subscribe();
    tokio::spawn(async move {
        let mut last = None;
        while rx.changed().await.is_ok() {
            let percent = rx.borrow_and_update().percent();
            if last != Some(percent) {
                info!(percent, "progress");
                last = Some(percent);
            }
        }
    })
}

fn summarize(report: &TransferReport) {
    match &report.fallback {
        Some(reason) => info!(path = %report.path, bytes = report.bytes, %reason, confirmed = report.confirmed, "transfer finished after fallback"),
        None => info!(path = %report.path, bytes = report.bytes, confirmed = report.confirmed, "transfer finished"),
    }
}

fn reported<T>(result: Result<T, TransferError>) -> Result<T, Whatever> {
    match result {
        Ok(value) => Ok(value),
        Err(e) => {
            error!(class = %e.class(), error = %e, "transfer failed");
            whatever!("{}", e.output_msg())
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();
    let _guards = init_global_logging("fileflow", &cli.global.logging());
    set_panic_hook();

    match &cli.commands {
        Commands::Send(args) => args.run(&cli.global).await,
        Commands::Receive(args) => args.run(&cli.global).await,
    }
}
