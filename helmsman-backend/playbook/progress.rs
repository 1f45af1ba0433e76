//! Lexical progress parsing for the fleet-update playbook.
//!
//! The expected playbook tags its task names with `[PLAY 1]` / `[PLAY 2]`
//! markers and uses well-known task names; mapping those substrings onto
//! stages is all this does. No semantic understanding of the playbook, no
//! state carried between lines.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: String,
    pub message: String,
}

impl ProgressEvent {
    fn new(stage: &str, message: &str) -> Self {
        Self {
            stage: stage.to_string(),
            message: message.to_string(),
        }
    }
}

/// Map one line of playbook output onto a progress event, if it matches any
/// trigger. Lines that match nothing produce no event.
pub fn parse_progress(line: &str) -> Option<ProgressEvent> {
    if let Some(idx) = line.find("TASK [") {
        let task = &line[idx + 6..];
        if line.contains("[PLAY 1]") {
            return parse_play1_task(task);
        }
        if line.contains("[PLAY 2]") {
            return parse_play2_task(task);
        }
        return None;
    }

    if line.contains("PLAY [") {
        return parse_play_header(line);
    }

    None
}

/// Play 1: the control-plane server updates itself first.
fn parse_play1_task(task: &str) -> Option<ProgressEvent> {
    if task.contains("Starting SLM Server") {
        Some(ProgressEvent::new(
            "slm_starting",
            "Preparing SLM server update...",
        ))
    } else if task.contains("Sync autobot-slm-backend") {
        Some(ProgressEvent::new(
            "slm_syncing",
            "Syncing SLM backend code...",
        ))
    } else if task.contains("Restart autobot-slm-backend") {
        Some(ProgressEvent::new(
            "slm_restarting",
            "Restarting SLM backend (expect brief disconnect)...",
        ))
    } else if task.contains("Wait for SLM backend") {
        Some(ProgressEvent::new(
            "slm_waiting",
            "Waiting for SLM backend to stabilize...",
        ))
    } else if task.contains("SLM Server Update Complete") {
        Some(ProgressEvent::new(
            "slm_complete",
            "SLM server update complete ✓",
        ))
    } else {
        None
    }
}

/// Play 2: the rest of the infrastructure.
fn parse_play2_task(task: &str) -> Option<ProgressEvent> {
    if task.contains("Starting Node Update") {
        Some(ProgressEvent::new(
            "nodes_starting",
            "Starting infrastructure node updates...",
        ))
    } else if task.contains("Backend | Sync") {
        Some(ProgressEvent::new(
            "node_backend",
            "Syncing backend node code...",
        ))
    } else if task.contains("Frontend | Sync") {
        Some(ProgressEvent::new(
            "node_frontend",
            "Syncing frontend node code...",
        ))
    } else if task.contains("NPU | Sync") {
        Some(ProgressEvent::new("node_npu", "Syncing NPU worker code..."))
    } else if task.contains("Browser | Sync") {
        Some(ProgressEvent::new(
            "node_browser",
            "Syncing browser automation code...",
        ))
    } else if task.contains("Node Update Complete") {
        Some(ProgressEvent::new("node_complete", "Node update complete ✓"))
    } else {
        None
    }
}

fn parse_play_header(line: &str) -> Option<ProgressEvent> {
    if line.contains("Play 1 - Update SLM Server First") {
        Some(ProgressEvent::new(
            "play1_start",
            "Play 1: Updating SLM server first...",
        ))
    } else if line.contains("Play 2 - Update Other Infrastructure") {
        Some(ProgressEvent::new(
            "play2_start",
            "Play 2: Updating infrastructure nodes...",
        ))
    } else if line.contains("Fleet Update Summary") {
        Some(ProgressEvent::new("complete", "Fleet update complete ✓"))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slm_sync_task_line() {
        let event =
            parse_progress("TASK [Sync autobot-slm-backend | rsync] [PLAY 1]").unwrap();
        assert_eq!(event.stage, "slm_syncing");
        assert_eq!(event.message, "Syncing SLM backend code...");
    }

    #[test]
    fn play1_stage_table() {
        let cases = [
            ("Starting SLM Server Update", "slm_starting"),
            ("Restart autobot-slm-backend service", "slm_restarting"),
            ("Wait for SLM backend port", "slm_waiting"),
            ("SLM Server Update Complete", "slm_complete"),
        ];
        for (task, stage) in cases {
            let line = format!("TASK [{task}] [PLAY 1] ****");
            let event = parse_progress(&line).unwrap();
            assert_eq!(event.stage, stage, "line: {line}");
        }
    }

    #[test]
    fn play2_stage_table() {
        let cases = [
            ("Starting Node Update", "nodes_starting"),
            ("Backend | Sync code", "node_backend"),
            ("Frontend | Sync dist", "node_frontend"),
            ("NPU | Sync worker", "node_npu"),
            ("Browser | Sync automation", "node_browser"),
            ("Node Update Complete", "node_complete"),
        ];
        for (task, stage) in cases {
            let line = format!("TASK [{task}] [PLAY 2] ****");
            let event = parse_progress(&line).unwrap();
            assert_eq!(event.stage, stage, "line: {line}");
        }
    }

    #[test]
    fn play_headers() {
        assert_eq!(
            parse_progress("PLAY [Play 1 - Update SLM Server First] ****")
                .unwrap()
                .stage,
            "play1_start"
        );
        assert_eq!(
            parse_progress("PLAY [Play 2 - Update Other Infrastructure] ****")
                .unwrap()
                .stage,
            "play2_start"
        );
        assert_eq!(
            parse_progress("PLAY [Fleet Update Summary] ****").unwrap().stage,
            "complete"
        );
    }

    #[test]
    fn unmarked_task_lines_produce_nothing() {
        // No [PLAY n] marker.
        assert!(parse_progress("TASK [Gathering Facts] ****").is_none());
        // Marked but unknown task name.
        assert!(parse_progress("TASK [Collect disk usage] [PLAY 1]").is_none());
        // Ordinary output.
        assert!(parse_progress("ok: [backend-01]").is_none());
        assert!(parse_progress("").is_none());
    }

    #[test]
    fn unknown_play_header_produces_nothing() {
        assert!(parse_progress("PLAY [Some Other Playbook] ****").is_none());
    }
}
