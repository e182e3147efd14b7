//! Progress bar driven by transfer events

use crate::display::{format_bytes, format_duration, format_speed};
use anyhow::Result;
use console::style;
use courier_transfer::{
    PhaseProgress, ResponseBody, TransferEvent, TransferProcessInfo, TransferState,
};
use courier_types::{Error, TaskId};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::mpsc;

/// Renders the events of one submission
pub struct TransferProgress {
    progress_bar: Option<ProgressBar>,
    last_info: TransferProcessInfo,
    last_error: Option<Error>,
    response: Option<(u16, String)>,
}

impl TransferProgress {
    /// Create a tracker; `quiet` disables the bar
    pub fn new(label: String, quiet: bool) -> Result<Self> {
        let progress_bar = if quiet {
            None
        } else {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} {prefix} {msg} [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")?
                    .progress_chars("█▉▊▋▌▍▎▏  "),
            );
            pb.set_message(label);
            pb.enable_steady_tick(Duration::from_millis(100));
            Some(pb)
        };

        Ok(Self {
            progress_bar,
            last_info: TransferProcessInfo::default(),
            last_error: None,
            response: None,
        })
    }

    /// Consume events until the submission reaches its final state
    pub async fn follow(
        &mut self,
        mut events: mpsc::UnboundedReceiver<TransferEvent>,
        id: TaskId,
    ) -> TransferState {
        while let Some(event) = events.recv().await {
            if event.id() != id {
                continue;
            }
            match event {
                TransferEvent::State {
                    state, info, error, ..
                } => {
                    self.on_state(state, &info, error.as_ref());
                    let finished = info.is_finished();
                    self.last_info = info;
                    self.last_error = error;
                    if finished {
                        return state;
                    }
                }
                TransferEvent::Response { response, .. } => {
                    let summary = match &response.body {
                        ResponseBody::File(path) => path.display().to_string(),
                        ResponseBody::Text(text) => text.chars().take(200).collect(),
                        ResponseBody::Bytes(bytes) => format_bytes(bytes.len() as u64),
                        ResponseBody::Empty => String::new(),
                    };
                    self.response = Some((response.code, summary));
                }
            }
        }
        TransferState::Cancelled
    }

    fn on_state(&self, state: TransferState, info: &TransferProcessInfo, error: Option<&Error>) {
        let Some(pb) = &self.progress_bar else {
            return;
        };
        match state {
            TransferState::Starting if info.retries() > 0 => {
                pb.set_prefix(format!("retry {}", info.retries()));
            }
            TransferState::Uploading => show_phase(pb, info.upload()),
            TransferState::Downloading => show_phase(pb, info.download()),
            TransferState::Failed if !info.is_finished() => {
                if let Some(error) = error {
                    pb.println(format!("{} {}", style("!").yellow(), error));
                }
            }
            state if info.is_finished() => pb.finish_with_message(state.to_string()),
            _ => {}
        }
    }

    /// Print the outcome of the submission
    pub fn print_summary(&self, state: TransferState) {
        println!();
        let marker = if state == TransferState::Success {
            style("✓").green()
        } else {
            style("✗").red()
        };
        println!("{} {}", marker, style(state).bold());
        if let Some((code, summary)) = &self.response {
            println!("  Response: {} {}", style(code).cyan(), summary);
        }
        let phase = if self.last_info.download().transferred() > 0 {
            self.last_info.download()
        } else {
            self.last_info.upload()
        };
        println!(
            "  Transferred: {} in {} ({})",
            style(format_bytes(phase.transferred())).green(),
            format_duration(phase.elapsed()),
            format_speed(phase.speed())
        );
        if self.last_info.retries() > 0 {
            println!("  Retries: {}", style(self.last_info.retries()).yellow());
        }
        if let Some(error) = &self.last_error {
            println!("  Error: {}", style(error).red());
        }
    }
}

fn show_phase(pb: &ProgressBar, phase: &PhaseProgress) {
    if let Some(total) = phase.total() {
        pb.set_length(total);
    }
    pb.set_position(phase.transferred());
}
