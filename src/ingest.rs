/*!
 * Inbound task events.
 *
 * Events are delivered at least once and may repeat. Each one is recorded
 * with an idempotent upsert; finished events carrying a subtitle URL also
 * produce a translation job.
 */

use serde::{Deserialize, Serialize};

use crate::database::TaskRecord;
use crate::jobs::Job;

/// Upstream statuses that mean the subtitle document is ready
pub const FINISHED_STATUSES: &[&str] = &["FINISH", "SUCCESS"];

/// One upstream task notification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskEvent {
    /// Upstream task identifier
    pub task_id: String,
    /// Upstream status
    pub status: String,
    /// Upstream creation time
    pub create_time: String,
    /// Display name; derived when absent
    pub video_name: Option<String>,
    /// Source media URL
    pub source_url: String,
    /// Upstream output path
    pub output_path: String,
    /// Source-language subtitle URL
    pub source_subtitle_url: String,
    /// Already translated subtitle URL, if upstream has one
    pub translated_subtitle_url: String,
    /// Owner of the task
    pub owner: String,
}

impl TaskEvent {
    /// Whether the event should start a translation
    pub fn should_translate(&self) -> bool {
        let status = self.status.trim().to_ascii_uppercase();
        FINISHED_STATUSES.contains(&status.as_str()) && !self.source_subtitle_url.trim().is_empty()
    }

    /// Display name of the media: explicit value, else the last two path
    /// segments of the output path, the media URL or the subtitle URL
    pub fn derived_video_name(&self) -> String {
        if let Some(name) = self.video_name.as_deref().filter(|name| !name.trim().is_empty()) {
            return name.to_string();
        }

        if let Some(name) = last_two_segments(&self.output_path).or_else(|| last_two_segments(&self.source_url)) {
            return name;
        }

        match last_two_segments(&self.source_subtitle_url) {
            Some(name) => match name.rsplit_once('.') {
                Some((stem, _)) if !stem.is_empty() => format!("{}.mp4", stem),
                _ => name,
            },
            None => String::new(),
        }
    }

    /// Record persisted for this event
    pub fn to_record(&self) -> TaskRecord {
        TaskRecord {
            task_id: self.task_id.trim().to_string(),
            status: self.status.clone(),
            create_time: self.create_time.clone(),
            video_name: self.derived_video_name(),
            source_url: self.source_url.clone(),
            output_path: self.output_path.clone(),
            source_subtitle_url: self.source_subtitle_url.trim().to_string(),
            translated_subtitle_url: self.translated_subtitle_url.trim().to_string(),
            owner: self.owner.clone(),
            updated_at: String::new(),
        }
    }

    /// Translation job for this event, if it should start one
    pub fn to_job(&self) -> Option<Job> {
        self.should_translate().then(|| {
            Job::new(
                self.task_id.trim(),
                self.source_subtitle_url.trim(),
                self.owner.clone(),
            )
        })
    }
}

// `/a/b/c.mp4` -> `b/c.mp4`; the host of a URL never counts as a segment
fn last_two_segments(location: &str) -> Option<String> {
    let path = location.split(['?', '#']).next().unwrap_or_default();
    let path = match path.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, p)| p).unwrap_or_default(),
        None => path,
    };

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [.., parent, last] => Some(format!("{}/{}", parent, last)),
        _ => None,
    }
}
